/*!
Owns every output channel and pushes encoded frames to them.

All channels are written one after another while holding the bus lock, and
the latch delay is served before the lock is released. Anything else that
touches the same hardware (diagnostics, a second transmitter) must take the
same [`BusLock`]; related peripherals running concurrently is a known source
of waveform corruption.
*/

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, enabled, error, trace, warn, Level};

use crate::encoder::EncodedFrame;
use crate::error::{PipelineError, Result};
use crate::health::{Health, Stage};
use crate::output::{self, PixelChannel};

/// Mutual exclusion over the shared I/O hardware
pub type BusLock = Arc<Mutex<()>>;

/// Slack added to expected durations for syscall and scheduling overhead
const DURATION_SLACK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct TransmitterSettings {
    /// Low time after each frame so the strip latches
    pub latch_delay: Duration,
    /// Consecutive failed frames before output stops for good
    pub error_threshold: u32,
    /// Allowed deviation from the expected transfer time, as a fraction
    pub duration_tolerance: f64,
    /// Consecutive deviating frames before a warning
    pub sustained_violation_frames: u32,
}

impl Default for TransmitterSettings {
    fn default() -> Self {
        Self {
            latch_delay: Duration::from_micros(300),
            error_threshold: 5,
            duration_tolerance: 0.5,
            sustained_violation_frames: 30,
        }
    }
}

struct Output {
    channel: Box<dyn PixelChannel>,
    frame_len: usize,
}

pub struct Transmitter {
    outputs: Vec<Output>,
    pixel_count: usize,
    settings: TransmitterSettings,
    bus: BusLock,
    health: Arc<Health>,
    fatal: Option<String>,
    violation_streak: u32,
    fps_window_start: Instant,
    fps_frames: u32,
}

impl Transmitter {
    /// `frame_lens[i]` is the byte length every frame part for `channels[i]`
    /// must have.
    pub fn new(
        channels: Vec<Box<dyn PixelChannel>>,
        frame_lens: Vec<usize>,
        pixel_count: usize,
        settings: TransmitterSettings,
        bus: BusLock,
        health: Arc<Health>,
    ) -> Result<Self> {
        if channels.len() != frame_lens.len() {
            return Err(PipelineError::LengthMismatch {
                expected: frame_lens.len(),
                actual: channels.len(),
            });
        }
        if settings.error_threshold == 0 {
            return Err(PipelineError::config("error threshold must be at least 1"));
        }

        let mut outputs = Vec::with_capacity(channels.len());
        for (channel, frame_len) in channels.into_iter().zip(frame_lens) {
            output::check_capacity(channel.as_ref(), frame_len)?;
            outputs.push(Output { channel, frame_len });
        }

        Ok(Self {
            outputs,
            pixel_count,
            settings,
            bus,
            health,
            fatal: None,
            violation_streak: 0,
            fps_window_start: Instant::now(),
            fps_frames: 0,
        })
    }

    pub fn health(&self) -> &Arc<Health> {
        &self.health
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.outputs
            .iter()
            .map(|o| o.channel.name().to_string())
            .collect()
    }

    /// Write one frame to every channel, then hold the line low for the latch
    /// delay.
    ///
    /// A failed or short transfer is returned as is and counted; once the
    /// count of consecutive failed frames reaches the threshold the
    /// transmitter stops and refuses every later frame without touching the
    /// hardware.
    pub fn present(&mut self, frame: &EncodedFrame) -> Result<()> {
        if let Some(reason) = &self.fatal {
            return Err(PipelineError::TransmitterStopped(reason.clone()));
        }
        self.check_layout(frame)?;

        let bus = self.bus.clone();
        let guard = lock_bus(&bus);
        let started = Instant::now();
        let mut failure = None;
        let mut deviated = false;

        for (index, (output, part)) in self.outputs.iter_mut().zip(frame.parts()).enumerate() {
            if enabled!(Level::TRACE) {
                let hex: String = part
                    .iter()
                    .take(32)
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(" ");
                trace!(
                    "[{}] frame {}: {} bytes: {} ...",
                    output.channel.name(),
                    frame.sequence(),
                    part.len(),
                    hex
                );
            }

            let transfer_start = Instant::now();
            let result = output.channel.transfer(part);
            let elapsed = transfer_start.elapsed();

            match result {
                Ok(written) if written == part.len() => {
                    self.health.set_channel_up(index, true);
                    let expected = output.channel.expected_duration(part.len());
                    deviated |= outside_tolerance(expected, elapsed, self.settings.duration_tolerance);
                }
                Ok(written) => {
                    self.health.set_channel_up(index, false);
                    failure.get_or_insert(PipelineError::PartialWrite {
                        channel: output.channel.name().to_string(),
                        written,
                        expected: part.len(),
                    });
                }
                Err(source) => {
                    self.health.set_channel_up(index, false);
                    failure.get_or_insert(PipelineError::Transmit {
                        channel: output.channel.name().to_string(),
                        source,
                    });
                }
            }
        }

        let writes = started.elapsed();
        thread::sleep(self.settings.latch_delay);
        drop(guard);

        match failure {
            None => {
                let duration = started.elapsed();
                self.health.record_presented(duration);
                self.health.record_stage(Stage::Transmit, writes);
                self.track_timing(deviated);
                self.track_fps(1);
                debug!("Frame {} presented in {:?}", frame.sequence(), duration);
                Ok(())
            }
            Some(err) => {
                self.track_fps(0);
                let failures = self.health.record_error();
                if failures >= self.settings.error_threshold {
                    let reason = format!("{} consecutive failures, last: {}", failures, err);
                    error!("Output stopped after {}", reason);
                    self.fatal = Some(reason);
                    self.health.set_fatal();
                    Err(PipelineError::PersistentFailure { failures })
                } else {
                    warn!(
                        "Frame {} failed ({}/{}): {}",
                        frame.sequence(),
                        failures,
                        self.settings.error_threshold,
                        err
                    );
                    Err(err)
                }
            }
        }
    }

    fn check_layout(&self, frame: &EncodedFrame) -> Result<()> {
        if frame.pixel_count() != self.pixel_count {
            return Err(PipelineError::LengthMismatch {
                expected: self.pixel_count,
                actual: frame.pixel_count(),
            });
        }
        if frame.parts().len() != self.outputs.len() {
            return Err(PipelineError::LengthMismatch {
                expected: self.outputs.len(),
                actual: frame.parts().len(),
            });
        }
        for (output, part) in self.outputs.iter().zip(frame.parts()) {
            if part.len() != output.frame_len {
                return Err(PipelineError::LengthMismatch {
                    expected: output.frame_len,
                    actual: part.len(),
                });
            }
        }
        Ok(())
    }

    fn track_timing(&mut self, deviated: bool) {
        if !deviated {
            self.violation_streak = 0;
            return;
        }
        self.health.record_timing_violation();
        self.violation_streak += 1;
        if self.violation_streak == self.settings.sustained_violation_frames {
            warn!(
                "Transfer time outside expected bounds for {} consecutive frames (last {:?}); \
                 signal integrity may be degraded",
                self.violation_streak,
                self.health.last_tx_duration()
            );
        }
    }

    /// Account for a cycle where nothing was sent, so the reported rate
    /// falls instead of holding the last good value.
    pub fn idle_cycle(&mut self) {
        if self.fatal.is_none() {
            self.track_fps(0);
        }
    }

    fn track_fps(&mut self, presented: u32) {
        self.fps_frames += presented;
        let elapsed = self.fps_window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.health
                .set_fps(self.fps_frames as f64 / elapsed.as_secs_f64());
            self.fps_frames = 0;
            self.fps_window_start = Instant::now();
        }
    }
}

fn lock_bus(bus: &BusLock) -> MutexGuard<'_, ()> {
    bus.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn outside_tolerance(expected: Option<Duration>, measured: Duration, tolerance: f64) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    let upper = expected.mul_f64(1.0 + tolerance) + DURATION_SLACK;
    let lower = expected.mul_f64((1.0 - tolerance).max(0.0));
    measured > upper || measured < lower
}
