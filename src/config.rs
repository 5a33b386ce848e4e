use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::buffer::SegmentMap;
use crate::encoder::{ChannelPlan, Speed, SymbolTemplate, MIN_RESET};
use crate::error::{PipelineError, Result};
use crate::exchange::IdlePolicy;
use crate::output::ChannelKind;
use crate::pattern::{self, Params, Pattern};
use crate::pixel_format::ColorOrder;
use crate::transmitter::TransmitterSettings;

const MAX_FPS: u32 = 240;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Consecutive failed frames before output stops
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default)]
    pub idle_policy: IdlePolicy,
    /// Global brightness, 255 = unscaled
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    pub channels: Vec<ChannelConfig>,
    pub segments: Vec<SegmentConfig>,
    #[serde(default)]
    pub pattern: PatternConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub speed: Speed,
    #[serde(default)]
    pub color_order: ColorOrder,
    #[serde(default = "default_zero_high_ticks")]
    pub zero_high_ticks: u32,
    #[serde(default = "default_one_high_ticks")]
    pub one_high_ticks: u32,
    /// Move shared grey onto the white LED before each frame is frozen
    #[serde(default)]
    pub extract_white: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            speed: Speed::default(),
            color_order: ColorOrder::default(),
            zero_high_ticks: default_zero_high_ticks(),
            one_high_ticks: default_one_high_ticks(),
            extract_white: false,
        }
    }
}

impl ProtocolConfig {
    pub fn template(&self) -> SymbolTemplate {
        SymbolTemplate {
            zero_high_ticks: self.zero_high_ticks,
            one_high_ticks: self.one_high_ticks,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    #[serde(default = "default_latch_delay_us")]
    pub latch_delay_us: u64,
    /// How long the transmitter waits for a new frame before applying the idle policy
    #[serde(default = "default_claim_timeout_ms")]
    pub claim_timeout_ms: u64,
    #[serde(default = "default_duration_tolerance_percent")]
    pub duration_tolerance_percent: f64,
    #[serde(default = "default_sustained_violation_frames")]
    pub sustained_violation_frames: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            latch_delay_us: default_latch_delay_us(),
            claim_timeout_ms: default_claim_timeout_ms(),
            duration_tolerance_percent: default_duration_tolerance_percent(),
            sustained_violation_frames: default_sustained_violation_frames(),
        }
    }
}

impl TimingConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }

    pub fn latch_delay(&self) -> Duration {
        Duration::from_micros(self.latch_delay_us)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }
}

/// One physical output
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub id: String,
    #[serde(flatten)]
    pub kind: ChannelKind,
}

/// A run of LEDs wired to one channel. Segments sharing a channel are chained
/// in the order they are listed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SegmentConfig {
    pub name: String,
    pub led_count: usize,
    pub channel: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PatternConfig {
    #[serde(default = "default_pattern")]
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            name: default_pattern(),
            params: Params::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// JSON snapshot written every interval for external displays
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval(),
            path: None,
        }
    }
}

fn default_error_threshold() -> u32 {
    5
}

fn default_brightness() -> u8 {
    128
}

fn default_zero_high_ticks() -> u32 {
    SymbolTemplate::default().zero_high_ticks
}

fn default_one_high_ticks() -> u32 {
    SymbolTemplate::default().one_high_ticks
}

fn default_target_fps() -> u32 {
    30
}

fn default_latch_delay_us() -> u64 {
    300
}

fn default_claim_timeout_ms() -> u64 {
    100
}

fn default_duration_tolerance_percent() -> f64 {
    50.0
}

fn default_sustained_violation_frames() -> u32 {
    30
}

fn default_pattern() -> String {
    "rainbow_wave".to_string()
}

fn default_metrics_interval() -> u64 {
    5
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Reject anything that would fail or misbehave after startup
    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(PipelineError::config("no segments configured"));
        }
        if self.channels.is_empty() {
            return Err(PipelineError::config("no channels configured"));
        }

        let mut ids = HashSet::new();
        for channel in &self.channels {
            if !ids.insert(channel.id.as_str()) {
                return Err(PipelineError::config(format!(
                    "duplicate channel id '{}'",
                    channel.id
                )));
            }
        }

        let mut segment_names = HashSet::new();
        for segment in &self.segments {
            if segment.led_count == 0 {
                return Err(PipelineError::config(format!(
                    "segment '{}' has no LEDs",
                    segment.name
                )));
            }
            if !segment_names.insert(segment.name.as_str()) {
                return Err(PipelineError::config(format!(
                    "duplicate segment name '{}'",
                    segment.name
                )));
            }
            if !ids.contains(segment.channel.as_str()) {
                return Err(PipelineError::config(format!(
                    "segment '{}' uses unknown channel '{}'",
                    segment.name, segment.channel
                )));
            }
        }
        for channel in &self.channels {
            if !self.segments.iter().any(|s| s.channel == channel.id) {
                return Err(PipelineError::config(format!(
                    "channel '{}' drives no segment",
                    channel.id
                )));
            }
        }

        let timing = &self.timing;
        if !(1..=MAX_FPS).contains(&timing.target_fps) {
            return Err(PipelineError::config(format!(
                "target_fps {} outside 1..={}",
                timing.target_fps, MAX_FPS
            )));
        }
        if timing.latch_delay() <= MIN_RESET {
            return Err(PipelineError::config(format!(
                "latch_delay_us {} must exceed the {}us reset time",
                timing.latch_delay_us,
                MIN_RESET.as_micros()
            )));
        }
        if timing.claim_timeout_ms == 0 {
            return Err(PipelineError::config("claim_timeout_ms must be at least 1"));
        }
        if !(0.0..100.0).contains(&timing.duration_tolerance_percent) {
            return Err(PipelineError::config(format!(
                "duration_tolerance_percent {} outside 0..100",
                timing.duration_tolerance_percent
            )));
        }
        if self.error_threshold == 0 {
            return Err(PipelineError::config("error_threshold must be at least 1"));
        }
        if self.metrics.interval_secs == 0 {
            return Err(PipelineError::config("metrics.interval_secs must be at least 1"));
        }

        let speed = self.protocol.speed;
        let margin = self.protocol.template().validate(speed)?;
        if margin < speed.recommended_margin_ns() {
            warn!(
                "Zero symbol keeps only {:.0}ns above the {:.0}ns minimum high time \
                 (recommended {:.0}ns); expect colour-dependent glitches on long cables",
                margin,
                speed.min_high_ns(),
                speed.recommended_margin_ns()
            );
        }

        self.start_pattern()?;

        Ok(())
    }

    /// The configured pattern with its configured parameters applied
    pub fn start_pattern(&self) -> Result<Box<dyn Pattern>> {
        let mut pattern = pattern::create(&self.pattern.name, self.led_count())?;
        for (name, value) in &self.pattern.params {
            pattern.set_param(name, *value)?;
        }
        Ok(pattern)
    }

    pub fn led_count(&self) -> usize {
        self.segments.iter().map(|s| s.led_count).sum()
    }

    /// Buffer layout: segments occupy consecutive ranges in listed order
    pub fn segment_map(&self) -> SegmentMap {
        SegmentMap::from_counts(
            self.segments
                .iter()
                .map(|s| (s.name.clone(), s.led_count)),
        )
    }

    /// One plan per channel, in channel order, with its segments chained
    pub fn plans(&self) -> Vec<ChannelPlan> {
        let map = self.segment_map();
        let template = self.protocol.template();
        self.channels
            .iter()
            .map(|channel| ChannelPlan {
                channel: channel.id.clone(),
                ranges: self
                    .segments
                    .iter()
                    .filter(|s| s.channel == channel.id)
                    .filter_map(|s| map.get(&s.name).map(|segment| segment.range.clone()))
                    .collect(),
                encoding: channel.kind.encoding(template),
            })
            .collect()
    }

    pub fn transmitter_settings(&self) -> TransmitterSettings {
        TransmitterSettings {
            latch_delay: self.timing.latch_delay(),
            error_threshold: self.error_threshold,
            duration_tolerance: self.timing.duration_tolerance_percent / 100.0,
            sustained_violation_frames: self.timing.sustained_violation_frames,
        }
    }
}
