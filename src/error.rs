/*!
Error types for the frame pipeline.
*/

use thiserror::Error;

/// Result type used throughout the pipeline library
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Every failure the core can report
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Pixel index past the end of a buffer
    #[error("pixel index {index} out of range (buffer holds {len} pixels)")]
    IndexOutOfRange { index: usize, len: usize },

    /// A buffer or frame whose size does not match the configured layout
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Pattern parameter name not known to the pattern
    #[error("unknown parameter '{name}' for pattern '{pattern}' (valid: {valid})")]
    UnknownParam {
        pattern: String,
        name: String,
        valid: String,
    },

    /// Parameter value of the wrong kind or outside its range
    #[error("invalid value for parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },

    /// Pattern name missing from the registry
    #[error("unknown pattern '{0}'")]
    UnknownPattern(String),

    /// Invalid configuration, detected before startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Output device could not be opened or configured
    #[error("channel {channel} unavailable: {reason}")]
    ChannelUnavailable { channel: String, reason: String },

    /// Transfer moved fewer bytes than the frame holds
    #[error("partial write on {channel}: {written} of {expected} bytes")]
    PartialWrite {
        channel: String,
        written: usize,
        expected: usize,
    },

    /// Single failed transfer
    #[error("transmit error on {channel}: {source}")]
    Transmit {
        channel: String,
        #[source]
        source: std::io::Error,
    },

    /// Consecutive failures reached the configured threshold
    #[error("{failures} consecutive transmission failures, output stopped")]
    PersistentFailure { failures: u32 },

    /// Transmitter already entered its fatal state
    #[error("transmitter stopped: {0}")]
    TransmitterStopped(String),

    /// A second claim was attempted while a frame is in flight
    #[error("frame exchange already has a frame in flight")]
    ExchangeBusy,

    /// I/O errors outside of frame transfers
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new channel-unavailable error
    pub fn channel_unavailable(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ChannelUnavailable {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid-parameter error
    pub fn invalid_param(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether output must stop when this error surfaces.
    ///
    /// Single failed or short transfers are transient: the next frame retries
    /// and the consecutive-error counter decides when to escalate.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Transmit { .. } | Self::PartialWrite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_not_fatal() {
        let err = PipelineError::Transmit {
            channel: "spi0".into(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"),
        };
        assert!(!err.is_fatal());

        let err = PipelineError::PartialWrite {
            channel: "spi0".into(),
            written: 10,
            expected: 24,
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_contract_and_config_errors_are_fatal() {
        assert!(PipelineError::config("no segments").is_fatal());
        assert!(PipelineError::PersistentFailure { failures: 5 }.is_fatal());
        assert!(PipelineError::LengthMismatch { expected: 3, actual: 2 }.is_fatal());
        assert!(PipelineError::UnknownPattern("plasma".into()).is_fatal());
    }

    #[test]
    fn test_error_messages_name_the_cause() {
        let err = PipelineError::channel_unavailable("/dev/spidev0.0", "No such file");
        assert_eq!(
            err.to_string(),
            "channel /dev/spidev0.0 unavailable: No such file"
        );
    }
}
