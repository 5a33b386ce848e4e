/*!
Physical output channels.

Everything above this module sees a [`PixelChannel`]: a sink that takes one
encoded byte buffer per frame and moves it in a single blocking transfer.
Swapping a direct SPI waveform for a serial link to a microcontroller only
changes which channel (and matching [`Encoding`]) gets built here.
*/

mod serial;
mod simulated;
mod spi;

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoder::{Encoding, Speed, SymbolTemplate, WaveformEncoder};
use crate::error::{PipelineError, Result};
use crate::protocol::SerialFraming;

pub use serial::SerialChannel;
pub use simulated::{FailureMode, SimulatedChannel, TransferLog};
pub use spi::SpiChannel;

/// Blocking byte sink behind which the hardware lives
pub trait PixelChannel: Send {
    /// Identifier used in logs and health reports
    fn name(&self) -> &str;

    /// Move `data` to the device, returning how many bytes went out
    fn transfer(&mut self, data: &[u8]) -> io::Result<usize>;

    /// How long a healthy transfer of `len` bytes should take
    fn expected_duration(&self, _len: usize) -> Option<Duration> {
        None
    }

    /// Largest transfer the device accepts in one call
    fn max_transfer(&self) -> Option<usize> {
        None
    }
}

/// Channel kinds selectable from the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelKind {
    /// Linux spidev node driven as a waveform generator
    Spi { device: String },
    /// Serial link to a pixel-pushing microcontroller
    Serial {
        port: String,
        baud_rate: u32,
        #[serde(default)]
        framing: SerialFraming,
    },
    /// In-memory sink for dry runs
    Simulated,
}

impl ChannelKind {
    /// The byte format this channel expects
    pub fn encoding(&self, template: SymbolTemplate) -> Encoding {
        match self {
            ChannelKind::Spi { .. } | ChannelKind::Simulated => {
                Encoding::Waveform(WaveformEncoder::new(template))
            }
            ChannelKind::Serial { framing, .. } => Encoding::Serial(*framing),
        }
    }
}

/// Open the device for one configured channel, failing fast if it is missing
pub fn open(id: &str, kind: &ChannelKind, speed: Speed) -> Result<Box<dyn PixelChannel>> {
    let channel: Box<dyn PixelChannel> = match kind {
        ChannelKind::Spi { device } => Box::new(SpiChannel::open(device, speed.clock_hz())?),
        ChannelKind::Serial {
            port, baud_rate, ..
        } => Box::new(SerialChannel::open(port, *baud_rate)?),
        ChannelKind::Simulated => Box::new(dry_run(id, speed)),
    };
    Ok(channel)
}

/// Simulated channel paced like real hardware, keeping counters only
fn dry_run(id: &str, speed: Speed) -> SimulatedChannel {
    SimulatedChannel::new(id).with_clock(speed.clock_hz())
}

/// Check that a channel can take a whole frame in one call
pub fn check_capacity(channel: &dyn PixelChannel, frame_len: usize) -> Result<()> {
    match channel.max_transfer() {
        Some(max) if frame_len > max => Err(PipelineError::channel_unavailable(
            channel.name(),
            format!(
                "frame of {} bytes exceeds the {} byte transfer limit",
                frame_len, max
            ),
        )),
        _ => Ok(()),
    }
}

/// Time to clock `len` bytes at `bits_per_byte` bits each
fn wire_time(len: usize, bits_per_byte: u64, bit_rate: u32) -> Duration {
    Duration::from_nanos(len as u64 * bits_per_byte * 1_000_000_000 / bit_rate.max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_from_json() {
        let spi: ChannelKind =
            serde_json::from_str(r#"{"kind": "spi", "device": "/dev/spidev0.0"}"#).unwrap();
        assert_eq!(
            spi,
            ChannelKind::Spi {
                device: "/dev/spidev0.0".into()
            }
        );

        let serial: ChannelKind = serde_json::from_str(
            r#"{"kind": "serial", "port": "/dev/ttyACM0", "baud_rate": 2000000}"#,
        )
        .unwrap();
        assert!(matches!(
            serial,
            ChannelKind::Serial {
                framing: SerialFraming::Awa,
                ..
            }
        ));
    }

    #[test]
    fn test_encoding_follows_channel_kind() {
        let template = SymbolTemplate::default();
        assert!(matches!(
            ChannelKind::Simulated.encoding(template),
            Encoding::Waveform(_)
        ));
        let serial = ChannelKind::Serial {
            port: "/dev/ttyACM0".into(),
            baud_rate: 115_200,
            framing: SerialFraming::Raw,
        };
        assert!(matches!(
            serial.encoding(template),
            Encoding::Serial(SerialFraming::Raw)
        ));
    }

    #[test]
    fn test_wire_time() {
        // 24 bytes at 6.4MHz, 8 bits each = 30us
        assert_eq!(wire_time(24, 8, 6_400_000), Duration::from_micros(30));
        // 10 bytes of 8N1 at 115200 baud
        assert_eq!(wire_time(10, 10, 100_000), Duration::from_millis(1));
    }

    #[test]
    fn test_capacity_check() {
        let channel = SimulatedChannel::new("sim").with_max_transfer(4096);
        assert!(check_capacity(&channel, 4096).is_ok());
        assert!(matches!(
            check_capacity(&channel, 10_800),
            Err(PipelineError::ChannelUnavailable { .. })
        ));
    }

    #[test]
    fn test_dry_run_channel_keeps_no_payloads() {
        let mut channel = dry_run("sim0", Speed::Khz800);
        let log = channel.log();
        let frame = vec![0xC0; 10 * 24];
        for _ in 0..200 {
            assert_eq!(channel.transfer(&frame).unwrap(), frame.len());
        }
        assert_eq!(log.transfers(), 200);
        assert!(log.frames().is_empty());
    }

    #[test]
    fn test_open_missing_spi_device_fails_fast() {
        let kind = ChannelKind::Spi {
            device: "/nonexistent/spidev9.9".into(),
        };
        assert!(matches!(
            open("cap", &kind, Speed::Khz800),
            Err(PipelineError::ChannelUnavailable { .. })
        ));
    }
}
