/*!
Framings for serial links to a pixel-pushing microcontroller.

The microcontroller generates the WS2811 waveform itself, so these frames
carry plain channel bytes (already in wire colour order) plus a header.
*/

mod adalight;
mod awa;
mod raw;

use serde::{Deserialize, Serialize};

pub use adalight::build_adalight_frame;
pub use awa::build_awa_frame;
pub use raw::build_raw_frame;

/// Header/trailer scheme spoken by the receiving firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFraming {
    /// HyperSerial "Awa" header with Fletcher checksums
    #[default]
    Awa,
    /// Classic Adalight header
    Adalight,
    /// `<>` marker followed by raw channel bytes (OctoWS2811 senders)
    Raw,
}

impl SerialFraming {
    /// Wrap channel bytes for `led_count` pixels
    pub fn frame(self, payload: &[u8], led_count: usize) -> Vec<u8> {
        match self {
            SerialFraming::Awa => build_awa_frame(payload, led_count),
            SerialFraming::Adalight => build_adalight_frame(payload, led_count),
            SerialFraming::Raw => build_raw_frame(payload),
        }
    }

    /// Bytes added around the payload
    pub fn overhead(self) -> usize {
        match self {
            SerialFraming::Awa => 9,
            SerialFraming::Adalight => 6,
            SerialFraming::Raw => 2,
        }
    }
}
