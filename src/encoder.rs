/*!
Colour buffer to wire bytes.

Bit-level peripherals (SPI and friends) get a waveform: every logical WS2811
bit becomes one byte clocked out at eight times the protocol bit rate, so each
byte is one bit period split into eight ticks. A "zero" symbol holds the line
high for a few ticks, a "one" symbol for more; the rest of the byte is low.

Serial links to a pixel-pushing microcontroller get plain channel bytes in a
[`SerialFraming`] envelope; the firmware on the other side makes the waveform.
*/

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::Snapshot;
use crate::error::{PipelineError, Result};
use crate::pixel_format::{ColorOrder, Pixel};
use crate::protocol::SerialFraming;

/// Ticks of the transmission clock per protocol bit (one byte per symbol)
pub const TICKS_PER_BIT: u32 = 8;

/// Shortest low period the WS2811 accepts as end-of-frame
pub const MIN_RESET: Duration = Duration::from_micros(50);

/// Protocol speed variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Speed {
    #[serde(rename = "400khz")]
    Khz400,
    #[default]
    #[serde(rename = "800khz")]
    Khz800,
}

impl Speed {
    pub fn bit_rate_hz(self) -> u32 {
        match self {
            Speed::Khz400 => 400_000,
            Speed::Khz800 => 800_000,
        }
    }

    /// One protocol bit, high plus low
    pub fn bit_period_ns(self) -> f64 {
        1e9 / self.bit_rate_hz() as f64
    }

    /// Clock the peripheral must run at so one byte spans one bit period
    pub fn clock_hz(self) -> u32 {
        self.bit_rate_hz() * TICKS_PER_BIT
    }

    pub fn tick_ns(self) -> f64 {
        self.bit_period_ns() / TICKS_PER_BIT as f64
    }

    /// Shortest high time the chip reliably latches as a bit
    pub fn min_high_ns(self) -> f64 {
        match self {
            Speed::Khz400 => 350.0,
            Speed::Khz800 => 200.0,
        }
    }

    /// Margin the "zero" high time should keep above [`Speed::min_high_ns`].
    ///
    /// Slow edges on long cables eat into the high time; zero bits are the
    /// first casualties.
    pub fn recommended_margin_ns(self) -> f64 {
        match self {
            Speed::Khz400 => 150.0,
            Speed::Khz800 => 100.0,
        }
    }
}

/// High-tick counts for the two symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTemplate {
    pub zero_high_ticks: u32,
    pub one_high_ticks: u32,
}

impl Default for SymbolTemplate {
    fn default() -> Self {
        // 0b1100_0000 and 0b1111_1000
        Self {
            zero_high_ticks: 2,
            one_high_ticks: 5,
        }
    }
}

impl SymbolTemplate {
    /// Check the template fits the bit period and keeps the zero high time
    /// above the chip's minimum. Returns the zero-symbol margin in ns.
    pub fn validate(&self, speed: Speed) -> Result<f64> {
        let (zero, one) = (self.zero_high_ticks, self.one_high_ticks);
        if zero == 0 || zero >= one || one >= TICKS_PER_BIT {
            return Err(PipelineError::config(format!(
                "symbol template needs 0 < zero_high_ticks < one_high_ticks < {} (got {} and {})",
                TICKS_PER_BIT, zero, one
            )));
        }

        let margin = self.zero_high_ns(speed) - speed.min_high_ns();
        if margin < 0.0 {
            return Err(PipelineError::config(format!(
                "zero symbol high time {:.1}ns is below the {:.0}ns minimum at {}",
                self.zero_high_ns(speed),
                speed.min_high_ns(),
                speed.bit_rate_hz()
            )));
        }
        Ok(margin)
    }

    pub fn zero_high_ns(&self, speed: Speed) -> f64 {
        self.zero_high_ticks as f64 * speed.tick_ns()
    }

    pub fn one_high_ns(&self, speed: Speed) -> f64 {
        self.one_high_ticks as f64 * speed.tick_ns()
    }

    /// Wire byte for one logical bit: `high` leading ones, MSB first
    pub fn symbol(&self, bit: bool) -> u8 {
        let high = if bit {
            self.one_high_ticks
        } else {
            self.zero_high_ticks
        };
        !0xFFu8.checked_shr(high).unwrap_or(0)
    }
}

/// Pure colour-bytes to waveform-bytes encoder
#[derive(Clone)]
pub struct WaveformEncoder {
    template: SymbolTemplate,
    table: Box<[[u8; 8]; 256]>,
}

impl WaveformEncoder {
    pub fn new(template: SymbolTemplate) -> Self {
        let zero = template.symbol(false);
        let one = template.symbol(true);

        let mut table = Box::new([[0u8; 8]; 256]);
        for (value, symbols) in table.iter_mut().enumerate() {
            for (bit, symbol) in symbols.iter_mut().enumerate() {
                *symbol = if value & (0x80 >> bit) != 0 { one } else { zero };
            }
        }

        Self { template, table }
    }

    pub fn template(&self) -> SymbolTemplate {
        self.template
    }

    /// Symbols for one channel byte, MSB first
    pub fn symbols(&self, byte: u8) -> &[u8; 8] {
        &self.table[byte as usize]
    }

    /// Encode already-ordered channel bytes
    pub fn encode_bytes(&self, channel_bytes: &[u8], out: &mut Vec<u8>) {
        out.reserve(channel_bytes.len() * 8);
        for &byte in channel_bytes {
            out.extend_from_slice(self.symbols(byte));
        }
    }

    /// Encode pixels in wire colour order
    pub fn encode(&self, order: ColorOrder, pixels: &[Pixel]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::encoded_len(order, pixels.len()));
        let mut channel_bytes = Vec::with_capacity(4);
        for &pixel in pixels {
            channel_bytes.clear();
            order.push_pixel(pixel, &mut channel_bytes);
            self.encode_bytes(&channel_bytes, &mut out);
        }
        out
    }

    /// Recover channel bytes from symbols. `None` if any byte is not one of
    /// the two templates or the length is not a whole number of bytes.
    pub fn decode(&self, symbols: &[u8]) -> Option<Vec<u8>> {
        if symbols.len() % 8 != 0 {
            return None;
        }
        let zero = self.template.symbol(false);
        let one = self.template.symbol(true);

        symbols
            .chunks_exact(8)
            .map(|chunk| {
                chunk.iter().try_fold(0u8, |acc, &symbol| match symbol {
                    s if s == one => Some(acc << 1 | 1),
                    s if s == zero => Some(acc << 1),
                    _ => None,
                })
            })
            .collect()
    }

    pub fn encoded_len(order: ColorOrder, pixel_count: usize) -> usize {
        8 * order.channels() * pixel_count
    }
}

impl std::fmt::Debug for WaveformEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveformEncoder")
            .field("template", &self.template)
            .finish()
    }
}

/// How one physical channel wants its bytes
#[derive(Debug, Clone)]
pub enum Encoding {
    Waveform(WaveformEncoder),
    Serial(SerialFraming),
}

impl Encoding {
    pub fn encode(&self, order: ColorOrder, pixels: &[Pixel]) -> Vec<u8> {
        match self {
            Encoding::Waveform(encoder) => encoder.encode(order, pixels),
            Encoding::Serial(framing) => framing.frame(&order.order_pixels(pixels), pixels.len()),
        }
    }

    pub fn encoded_len(&self, order: ColorOrder, pixel_count: usize) -> usize {
        match self {
            Encoding::Waveform(_) => WaveformEncoder::encoded_len(order, pixel_count),
            Encoding::Serial(framing) => framing.overhead() + order.channels() * pixel_count,
        }
    }
}

/// Which buffer ranges go out on one channel, in chain order
#[derive(Debug, Clone)]
pub struct ChannelPlan {
    pub channel: String,
    pub ranges: Vec<Range<usize>>,
    pub encoding: Encoding,
}

impl ChannelPlan {
    pub fn pixel_count(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }
}

/// Encoded bytes for one frame, one immutable part per channel
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    sequence: u64,
    pixel_count: usize,
    parts: Arc<[Vec<u8>]>,
}

impl EncodedFrame {
    pub fn new(sequence: u64, pixel_count: usize, parts: Vec<Vec<u8>>) -> Self {
        Self {
            sequence,
            pixel_count,
            parts: Arc::from(parts),
        }
    }

    /// Sequence number of the snapshot this frame was encoded from
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    pub fn parts(&self) -> &[Vec<u8>] {
        &self.parts
    }

    pub fn total_bytes(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }
}

/// Encodes whole snapshots according to the channel layout
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    order: ColorOrder,
    plans: Vec<ChannelPlan>,
    pixel_count: usize,
}

impl FrameEncoder {
    pub fn new(order: ColorOrder, plans: Vec<ChannelPlan>) -> Self {
        let pixel_count = plans.iter().map(ChannelPlan::pixel_count).sum();
        Self {
            order,
            plans,
            pixel_count,
        }
    }

    pub fn order(&self) -> ColorOrder {
        self.order
    }

    pub fn plans(&self) -> &[ChannelPlan] {
        &self.plans
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    /// Byte length of each channel's part, in plan order
    pub fn part_lengths(&self) -> Vec<usize> {
        self.plans
            .iter()
            .map(|plan| plan.encoding.encoded_len(self.order, plan.pixel_count()))
            .collect()
    }

    /// Encode one snapshot. Only a snapshot of the wrong length fails.
    pub fn encode(&self, snapshot: &Snapshot) -> Result<EncodedFrame> {
        self.encode_pixels(snapshot.sequence(), snapshot)
    }

    pub fn encode_pixels(&self, sequence: u64, pixels: &[Pixel]) -> Result<EncodedFrame> {
        if pixels.len() != self.pixel_count {
            return Err(PipelineError::LengthMismatch {
                expected: self.pixel_count,
                actual: pixels.len(),
            });
        }

        let mut parts = Vec::with_capacity(self.plans.len());
        for plan in &self.plans {
            let part = if let [range] = plan.ranges.as_slice() {
                plan.encoding.encode(self.order, &pixels[range.clone()])
            } else {
                let chained: Vec<Pixel> = plan
                    .ranges
                    .iter()
                    .flat_map(|r| pixels[r.clone()].iter().copied())
                    .collect();
                plan.encoding.encode(self.order, &chained)
            };
            parts.push(part);
        }

        Ok(EncodedFrame::new(sequence, pixels.len(), parts))
    }

    /// Every pixel off, used for the final frame on shutdown
    pub fn blank(&self) -> EncodedFrame {
        let parts = self
            .plans
            .iter()
            .map(|plan| {
                plan.encoding
                    .encode(self.order, &vec![Pixel::OFF; plan.pixel_count()])
            })
            .collect();
        EncodedFrame::new(0, self.pixel_count, parts)
    }
}
