/*!
Per-frame colour buffer and its immutable snapshots.

Patterns write into a [`ColorBuffer`]; the encoder only ever reads a
[`Snapshot`], so a frame on its way to the wire can never observe a later
write.
*/

use std::ops::{Deref, Range};
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::pixel_format::Pixel;

/// Fixed-length pixel buffer for the whole chain of segments
#[derive(Debug, Clone)]
pub struct ColorBuffer {
    pixels: Vec<Pixel>,
    sequence: u64,
}

impl ColorBuffer {
    /// All pixels off. The length never changes afterwards.
    pub fn new(len: usize) -> Self {
        Self {
            pixels: vec![Pixel::OFF; len],
            sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<Pixel> {
        self.pixels
            .get(index)
            .copied()
            .ok_or(PipelineError::IndexOutOfRange {
                index,
                len: self.pixels.len(),
            })
    }

    pub fn set(&mut self, index: usize, pixel: Pixel) -> Result<()> {
        let len = self.pixels.len();
        let slot = self
            .pixels
            .get_mut(index)
            .ok_or(PipelineError::IndexOutOfRange { index, len })?;
        *slot = pixel;
        Ok(())
    }

    pub fn fill(&mut self, pixel: Pixel) {
        self.pixels.fill(pixel);
    }

    /// Fill a contiguous index range, e.g. one segment
    pub fn fill_range(&mut self, range: Range<usize>, pixel: Pixel) -> Result<()> {
        let len = self.pixels.len();
        if range.start > range.end || range.end > len {
            return Err(PipelineError::IndexOutOfRange {
                index: range.end.max(range.start),
                len,
            });
        }
        self.pixels[range].fill(pixel);
        Ok(())
    }

    /// Replace the whole contents. The source must match the buffer length.
    pub fn copy_from(&mut self, pixels: &[Pixel]) -> Result<()> {
        if pixels.len() != self.pixels.len() {
            return Err(PipelineError::LengthMismatch {
                expected: self.pixels.len(),
                actual: pixels.len(),
            });
        }
        self.pixels.copy_from_slice(pixels);
        Ok(())
    }

    /// Apply a global brightness level (255 leaves colours untouched)
    pub fn scale(&mut self, level: u8) {
        if level == u8::MAX {
            return;
        }
        for pixel in &mut self.pixels {
            *pixel = pixel.scaled(level);
        }
    }

    /// Move each pixel's shared grey onto its white channel, for RGBW strips
    pub fn extract_white(&mut self) {
        for pixel in &mut self.pixels {
            *pixel = pixel.with_white_extracted();
        }
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Pixel] {
        &mut self.pixels
    }

    /// Freeze the current contents. Each call gets the next sequence number.
    pub fn snapshot(&mut self) -> Snapshot {
        self.sequence += 1;
        Snapshot {
            sequence: self.sequence,
            pixels: Arc::from(self.pixels.as_slice()),
        }
    }
}

/// Immutable copy of a [`ColorBuffer`] taken at one instant
#[derive(Debug, Clone)]
pub struct Snapshot {
    sequence: u64,
    pixels: Arc<[Pixel]>,
}

impl Snapshot {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Deref for Snapshot {
    type Target = [Pixel];

    fn deref(&self) -> &[Pixel] {
        &self.pixels
    }
}

/// Named contiguous range of buffer indices (one physical zone)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub range: Range<usize>,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Static partition of the buffer into chained segments
#[derive(Debug, Clone, Default)]
pub struct SegmentMap {
    segments: Vec<Segment>,
}

impl SegmentMap {
    /// Lay segments end to end in the given order
    pub fn from_counts<S: Into<String>>(counts: impl IntoIterator<Item = (S, usize)>) -> Self {
        let mut start = 0;
        let segments = counts
            .into_iter()
            .map(|(name, count)| {
                let segment = Segment {
                    name: name.into(),
                    range: start..start + count,
                };
                start += count;
                segment
            })
            .collect();
        Self { segments }
    }

    pub fn total_len(&self) -> usize {
        self.segments.last().map_or(0, |s| s.range.end)
    }

    pub fn get(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
