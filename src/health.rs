/*!
Process-wide health counters.

Written by the pattern and transmit threads, read by reporters. Everything is
an atomic so the transmit thread never waits on a reader.
*/

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Per-channel up/down state and error tally
#[derive(Debug)]
pub struct ChannelHealth {
    name: String,
    up: AtomicBool,
    errors: AtomicU64,
}

impl ChannelHealth {
    fn new(name: String) -> Self {
        Self {
            name,
            up: AtomicBool::new(true),
            errors: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }
}

/// Pipeline stages with their own duration statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Pattern render plus brightness
    Render,
    /// Snapshot and encode
    Encode,
    /// Pattern thread sleeping to hold the frame rate
    Pacing,
    /// Transmit thread waiting for a frame to claim
    ClaimWait,
    /// Channel writes, without the latch delay
    Transmit,
}

impl Stage {
    fn index(self) -> usize {
        self as usize
    }
}

/// Running duration statistics for one stage, in microseconds
#[derive(Debug)]
struct StageTimer {
    samples: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
    last: AtomicU64,
}

impl StageTimer {
    fn new() -> Self {
        Self {
            samples: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
            last: AtomicU64::new(0),
        }
    }

    fn record(&self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.min.fetch_min(micros, Ordering::Relaxed);
        self.max.fetch_max(micros, Ordering::Relaxed);
        self.last.store(micros, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.samples.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.min.store(u64::MAX, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
        self.last.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StageSnapshot {
        let samples = self.samples.load(Ordering::Relaxed);
        if samples == 0 {
            return StageSnapshot::default();
        }
        StageSnapshot {
            avg_micros: self.sum.load(Ordering::Relaxed) / samples,
            min_micros: self.min.load(Ordering::Relaxed),
            max_micros: self.max.load(Ordering::Relaxed),
            last_micros: self.last.load(Ordering::Relaxed),
            samples,
        }
    }
}

#[derive(Debug)]
pub struct Health {
    frames_generated: AtomicU64,
    frames_presented: AtomicU64,
    frames_repeated: AtomicU64,
    dropped_frames: AtomicU64,
    consecutive_errors: AtomicU32,
    total_errors: AtomicU64,
    last_tx_micros: AtomicU64,
    max_tx_micros: AtomicU64,
    timing_violations: AtomicU64,
    fps_bits: AtomicU64,
    fatal: AtomicBool,
    stages: [StageTimer; 5],
    channels: Vec<ChannelHealth>,
}

impl Health {
    pub fn new<S: Into<String>>(channel_names: impl IntoIterator<Item = S>) -> Self {
        Self {
            frames_generated: AtomicU64::new(0),
            frames_presented: AtomicU64::new(0),
            frames_repeated: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            consecutive_errors: AtomicU32::new(0),
            total_errors: AtomicU64::new(0),
            last_tx_micros: AtomicU64::new(0),
            max_tx_micros: AtomicU64::new(0),
            timing_violations: AtomicU64::new(0),
            fps_bits: AtomicU64::new(0f64.to_bits()),
            fatal: AtomicBool::new(false),
            stages: std::array::from_fn(|_| StageTimer::new()),
            channels: channel_names
                .into_iter()
                .map(|name| ChannelHealth::new(name.into()))
                .collect(),
        }
    }

    // Writers

    pub fn record_generated(&self) {
        self.frames_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_repeated(&self) {
        self.frames_repeated.fetch_add(1, Ordering::Relaxed);
    }

    /// Successful frame: clears the consecutive-error streak
    pub fn record_presented(&self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        self.frames_presented.fetch_add(1, Ordering::Relaxed);
        self.last_tx_micros.store(micros, Ordering::Relaxed);
        self.max_tx_micros.fetch_max(micros, Ordering::Relaxed);
        self.consecutive_errors.store(0, Ordering::Relaxed);
    }

    /// Failed frame; returns the consecutive-error count including this one
    pub fn record_error(&self) -> u32 {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_timing_violation(&self) {
        self.timing_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage(&self, stage: Stage, duration: Duration) {
        self.stages[stage.index()].record(duration);
    }

    pub fn set_fps(&self, fps: f64) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn set_channel_up(&self, index: usize, up: bool) {
        if let Some(channel) = self.channels.get(index) {
            channel.up.store(up, Ordering::Relaxed);
            if !up {
                channel.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn set_fatal(&self) {
        self.fatal.store(true, Ordering::Relaxed);
        for channel in &self.channels {
            channel.up.store(false, Ordering::Relaxed);
        }
    }

    /// Explicit external reset; the only way counters go back to zero mid-session
    pub fn reset(&self) {
        for counter in [
            &self.frames_generated,
            &self.frames_presented,
            &self.frames_repeated,
            &self.dropped_frames,
            &self.total_errors,
            &self.last_tx_micros,
            &self.max_tx_micros,
            &self.timing_violations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.consecutive_errors.store(0, Ordering::Relaxed);
        self.fps_bits.store(0f64.to_bits(), Ordering::Relaxed);
        for stage in &self.stages {
            stage.reset();
        }
        for channel in &self.channels {
            channel.errors.store(0, Ordering::Relaxed);
        }
    }

    // Readers

    pub fn frames_generated(&self) -> u64 {
        self.frames_generated.load(Ordering::Relaxed)
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented.load(Ordering::Relaxed)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    pub fn timing_violations(&self) -> u64 {
        self.timing_violations.load(Ordering::Relaxed)
    }

    pub fn last_tx_duration(&self) -> Duration {
        Duration::from_micros(self.last_tx_micros.load(Ordering::Relaxed))
    }

    pub fn fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Relaxed)
    }

    pub fn stage(&self, stage: Stage) -> StageSnapshot {
        self.stages[stage.index()].snapshot()
    }

    pub fn channels(&self) -> &[ChannelHealth] {
        &self.channels
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            fps: self.fps(),
            frames_generated: self.frames_generated(),
            frames_presented: self.frames_presented(),
            frames_repeated: self.frames_repeated.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames(),
            consecutive_errors: self.consecutive_errors(),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            last_tx_micros: self.last_tx_micros.load(Ordering::Relaxed),
            max_tx_micros: self.max_tx_micros.load(Ordering::Relaxed),
            timing_violations: self.timing_violations(),
            fatal: self.is_fatal(),
            stages: StageTimings {
                render: self.stage(Stage::Render),
                encode: self.stage(Stage::Encode),
                pacing: self.stage(Stage::Pacing),
                claim_wait: self.stage(Stage::ClaimWait),
                transmit: self.stage(Stage::Transmit),
            },
            channels: self
                .channels
                .iter()
                .map(|c| ChannelSnapshot {
                    name: c.name.clone(),
                    up: c.is_up(),
                    errors: c.errors.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }
}

/// Point-in-time copy of all counters for reporters
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthSnapshot {
    pub fps: f64,
    pub frames_generated: u64,
    pub frames_presented: u64,
    pub frames_repeated: u64,
    pub dropped_frames: u64,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub last_tx_micros: u64,
    pub max_tx_micros: u64,
    pub timing_violations: u64,
    pub fatal: bool,
    pub stages: StageTimings,
    pub channels: Vec<ChannelSnapshot>,
}

/// Per-stage durations since start or the last reset
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageTimings {
    pub render: StageSnapshot,
    pub encode: StageSnapshot,
    pub pacing: StageSnapshot,
    pub claim_wait: StageSnapshot,
    pub transmit: StageSnapshot,
}

impl StageTimings {
    /// Generation cost per frame against transmission cost per frame.
    /// Above 1.0 the pattern thread is the bottleneck.
    pub fn generation_ratio(&self) -> Option<f64> {
        if self.transmit.avg_micros == 0 {
            return None;
        }
        let generation = self.render.avg_micros + self.encode.avg_micros;
        Some(generation as f64 / self.transmit.avg_micros as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StageSnapshot {
    pub avg_micros: u64,
    pub min_micros: u64,
    pub max_micros: u64,
    pub last_micros: u64,
    pub samples: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChannelSnapshot {
    pub name: String,
    pub up: bool,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_streak_resets_on_success() {
        let health = Health::new(["spi0"]);
        assert_eq!(health.record_error(), 1);
        assert_eq!(health.record_error(), 2);
        health.record_presented(Duration::from_millis(14));
        assert_eq!(health.consecutive_errors(), 0);
        assert_eq!(health.record_error(), 1);

        let snapshot = health.snapshot();
        assert_eq!(snapshot.total_errors, 3);
        assert_eq!(snapshot.last_tx_micros, 14_000);
    }

    #[test]
    fn test_reset_clears_counters() {
        let health = Health::new(["spi0", "spi1"]);
        health.record_dropped();
        health.record_generated();
        health.set_fps(29.5);
        health.set_channel_up(1, false);
        health.reset();

        let snapshot = health.snapshot();
        assert_eq!(snapshot.dropped_frames, 0);
        assert_eq!(snapshot.frames_generated, 0);
        assert_eq!(snapshot.fps, 0.0);
        assert_eq!(snapshot.channels[1].errors, 0);
    }

    #[test]
    fn test_fatal_marks_channels_down() {
        let health = Health::new(["spi0", "spi1"]);
        assert!(health.channels().iter().all(ChannelHealth::is_up));
        health.set_fatal();
        assert!(health.is_fatal());
        assert!(health.channels().iter().all(|c| !c.is_up()));
    }

    #[test]
    fn test_stage_statistics() {
        let health = Health::new(["spi0"]);
        assert_eq!(health.stage(Stage::Render), StageSnapshot::default());

        for ms in [4, 2, 6] {
            health.record_stage(Stage::Render, Duration::from_millis(ms));
        }
        health.record_stage(Stage::Transmit, Duration::from_millis(12));

        let render = health.stage(Stage::Render);
        assert_eq!(render.samples, 3);
        assert_eq!(render.avg_micros, 4_000);
        assert_eq!(render.min_micros, 2_000);
        assert_eq!(render.max_micros, 6_000);
        assert_eq!(render.last_micros, 6_000);
        assert_eq!(health.stage(Stage::Encode).samples, 0);

        let stages = health.snapshot().stages;
        assert_eq!(stages.generation_ratio(), Some(4_000.0 / 12_000.0));

        health.reset();
        assert_eq!(health.stage(Stage::Render), StageSnapshot::default());
        assert_eq!(health.snapshot().stages.generation_ratio(), None);
    }

    #[test]
    fn test_snapshot_serializes() {
        let health = Health::new(["cap"]);
        health.set_fps(30.0);
        let json = serde_json::to_value(health.snapshot()).unwrap();
        assert_eq!(json["fps"], 30.0);
        assert_eq!(json["channels"][0]["name"], "cap");
        assert_eq!(json["stages"]["claim_wait"]["samples"], 0);
    }
}
