/*!
WS2811 frame pipeline: colour buffers, waveform encoding and a two-thread
producer/consumer that keeps pattern generation off the timing-critical
output path.
*/

pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod encoder;
pub mod error;
pub mod exchange;
pub mod health;
pub mod metrics;
pub mod output;
pub mod pattern;
pub mod pipeline;
pub mod pixel_format;
pub mod protocol;
pub mod transmitter;

pub use buffer::{ColorBuffer, SegmentMap, Snapshot};
pub use config::Config;
pub use encoder::{EncodedFrame, FrameEncoder, Speed, SymbolTemplate, WaveformEncoder};
pub use error::{PipelineError, Result};
pub use exchange::{FrameExchange, IdlePolicy};
pub use health::{Health, HealthSnapshot};
pub use output::PixelChannel;
pub use pattern::{ParamValue, Pattern, PatternControl};
pub use pipeline::Pipeline;
pub use pixel_format::{ColorOrder, Pixel};
pub use transmitter::Transmitter;
