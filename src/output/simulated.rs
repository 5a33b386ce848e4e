use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::{wire_time, PixelChannel};

/// How a [`SimulatedChannel`] misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    None,
    /// Every transfer returns an I/O error
    Always,
    /// The first `n` transfers fail, later ones succeed
    First(usize),
    /// Every transfer moves only half the bytes
    Partial,
}

/// Shared record of transfer attempts, readable after the channel has moved
/// into a transmitter.
///
/// Counters are always kept. Payloads are kept only when recording was asked
/// for, and then only the most recent `limit` of them.
#[derive(Debug, Clone, Default)]
pub struct TransferLog {
    inner: Arc<Mutex<LogInner>>,
}

#[derive(Debug, Default)]
struct LogInner {
    attempts: usize,
    transfers: usize,
    bytes: u64,
    limit: usize,
    frames: VecDeque<Vec<u8>>,
}

impl TransferLog {
    /// Every call to `transfer`, failed or not
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Transfers that moved the whole payload
    pub fn transfers(&self) -> usize {
        self.lock().transfers
    }

    pub fn bytes(&self) -> u64 {
        self.lock().bytes
    }

    /// Recorded payloads, oldest first
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.iter().cloned().collect()
    }

    fn record(&self, data: &[u8]) {
        let mut log = self.lock();
        log.transfers += 1;
        log.bytes += data.len() as u64;
        if log.limit == 0 {
            return;
        }
        if log.frames.len() == log.limit {
            log.frames.pop_front();
        }
        log.frames.push_back(data.to_vec());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory channel for dry runs and tests
pub struct SimulatedChannel {
    name: String,
    failure: FailureMode,
    clock_hz: Option<u32>,
    max_transfer: Option<usize>,
    log: TransferLog,
}

impl SimulatedChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure: FailureMode::None,
            clock_hz: None,
            max_transfer: None,
            log: TransferLog::default(),
        }
    }

    pub fn with_failure(mut self, failure: FailureMode) -> Self {
        self.failure = failure;
        self
    }

    /// Behave like a device clocked at `clock_hz`: transfers block for the
    /// wire time and report it as their expected duration
    pub fn with_clock(mut self, clock_hz: u32) -> Self {
        self.clock_hz = Some(clock_hz);
        self
    }

    pub fn with_max_transfer(mut self, max: usize) -> Self {
        self.max_transfer = Some(max);
        self
    }

    /// Keep copies of the last `limit` successful payloads
    pub fn with_recording(self, limit: usize) -> Self {
        self.log.lock().limit = limit;
        self
    }

    pub fn log(&self) -> TransferLog {
        self.log.clone()
    }
}

impl PixelChannel for SimulatedChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn transfer(&mut self, data: &[u8]) -> io::Result<usize> {
        let attempts = {
            let mut log = self.log.lock();
            log.attempts += 1;
            log.attempts
        };

        match self.failure {
            FailureMode::Always => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated transfer failure",
            )),
            FailureMode::First(n) if attempts <= n => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "simulated transient failure",
            )),
            FailureMode::Partial => Ok(data.len() / 2),
            _ => {
                self.log.record(data);
                if let Some(hz) = self.clock_hz {
                    thread::sleep(wire_time(data.len(), 8, hz));
                }
                Ok(data.len())
            }
        }
    }

    fn expected_duration(&self, len: usize) -> Option<Duration> {
        self.clock_hz.map(|hz| wire_time(len, 8, hz))
    }

    fn max_transfer(&self) -> Option<usize> {
        self.max_transfer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payloads_not_kept_by_default() {
        let mut channel = SimulatedChannel::new("sim");
        let log = channel.log();
        for _ in 0..3_000 {
            channel.transfer(&[0xC0; 240]).unwrap();
        }
        assert_eq!(log.transfers(), 3_000);
        assert_eq!(log.bytes(), 720_000);
        assert!(log.frames().is_empty());
    }

    #[test]
    fn test_recording_keeps_most_recent() {
        let mut channel = SimulatedChannel::new("sim").with_recording(2);
        let log = channel.log();
        for n in 1..=5u8 {
            channel.transfer(&[n; 4]).unwrap();
        }
        assert_eq!(log.frames(), vec![vec![4; 4], vec![5; 4]]);
        assert_eq!(log.transfers(), 5);
    }

    #[test]
    fn test_failures_are_not_recorded() {
        let mut channel = SimulatedChannel::new("sim")
            .with_failure(FailureMode::First(2))
            .with_recording(8);
        let log = channel.log();
        assert!(channel.transfer(&[1]).is_err());
        assert!(channel.transfer(&[2]).is_err());
        assert_eq!(channel.transfer(&[3]).unwrap(), 1);
        assert_eq!(log.attempts(), 3);
        assert_eq!(log.frames(), vec![vec![3]]);
    }
}
