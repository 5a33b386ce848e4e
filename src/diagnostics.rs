/*!
Hardware check that drives the transmitter directly, without the pattern
thread or the exchange.

Each step holds one solid colour for a while at the target frame rate. The
last step encodes a single frame once and sends those same bytes over and over,
which separates transmission problems from anything upstream of the encoder.
Mixed bit patterns (e.g. 50% grey) are the interesting case: a full-white
frame contains only "one" symbols and hides marginal zero timing.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::encoder::{EncodedFrame, FrameEncoder};
use crate::error::Result;
use crate::health::Health;
use crate::output::{self, PixelChannel};
use crate::pixel_format::Pixel;
use crate::transmitter::{BusLock, Transmitter};

#[derive(Debug, Clone)]
pub struct DiagnoseOptions {
    /// How long each solid colour step runs
    pub step: Duration,
    /// Colour of the pre-encoded repeated frame
    pub repeat_color: Pixel,
    /// How long the pre-encoded frame is repeated
    pub repeat: Duration,
}

impl Default for DiagnoseOptions {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(2),
            repeat_color: Pixel::rgb(128, 128, 128),
            repeat: Duration::from_secs(5),
        }
    }
}

/// Outcome of one diagnostic step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub label: String,
    pub frames: u32,
    pub failures: u32,
    pub mean_tx_micros: u64,
    pub max_tx_micros: u64,
    pub timing_violations: u64,
}

pub struct Diagnostics {
    encoder: FrameEncoder,
    transmitter: Transmitter,
    health: Arc<Health>,
    frame_interval: Duration,
}

impl Diagnostics {
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let speed = config.protocol.speed;
        let channels = config
            .channels
            .iter()
            .map(|c| output::open(&c.id, &c.kind, speed))
            .collect::<Result<Vec<_>>>()?;
        Self::build(config, channels)
    }

    pub fn with_channels(config: &Config, channels: Vec<Box<dyn PixelChannel>>) -> Result<Self> {
        config.validate()?;
        Self::build(config, channels)
    }

    fn build(config: &Config, channels: Vec<Box<dyn PixelChannel>>) -> Result<Self> {
        let encoder = FrameEncoder::new(config.protocol.color_order, config.plans());
        let health = Arc::new(Health::new(config.channels.iter().map(|c| c.id.clone())));
        let transmitter = Transmitter::new(
            channels,
            encoder.part_lengths(),
            encoder.pixel_count(),
            config.transmitter_settings(),
            BusLock::default(),
            Arc::clone(&health),
        )?;
        Ok(Self {
            encoder,
            transmitter,
            health,
            frame_interval: config.timing.frame_interval(),
        })
    }

    pub fn health(&self) -> &Arc<Health> {
        &self.health
    }

    /// Run every step, then switch the LEDs off.
    ///
    /// Clearing `running` cuts the current step short and skips the rest.
    /// Transient failures are counted per step; a persistent failure aborts.
    pub fn run(&mut self, options: &DiagnoseOptions, running: &AtomicBool) -> Result<Vec<StepReport>> {
        let steps = [
            ("red", Pixel::rgb(255, 0, 0)),
            ("green", Pixel::rgb(0, 255, 0)),
            ("blue", Pixel::rgb(0, 0, 255)),
            ("dim white", Pixel::rgb(51, 51, 51)),
            ("full white", Pixel::rgb(255, 255, 255)),
        ];

        let mut reports = Vec::with_capacity(steps.len() + 1);
        for (label, color) in steps {
            if !running.load(Ordering::Relaxed) {
                break;
            }
            // Encoded again for every frame, like a live pattern
            let report = self.hold(label, options.step, running, |encoder, n| {
                encoder.encode_pixels(n, &vec![color; encoder.pixel_count()])
            })?;
            reports.push(report);
        }

        if running.load(Ordering::Relaxed) {
            let color = options.repeat_color;
            let prebuilt = self
                .encoder
                .encode_pixels(0, &vec![color; self.encoder.pixel_count()])?;
            info!(
                "Pre-encoded frame: {} bytes for ({}, {}, {})",
                prebuilt.total_bytes(),
                color.r,
                color.g,
                color.b
            );
            let label = format!("pre-encoded ({}, {}, {})", color.r, color.g, color.b);
            let report = self.hold(&label, options.repeat, running, |_, _| Ok(prebuilt.clone()))?;
            reports.push(report);
        }

        if let Err(e) = self.transmitter.present(&self.encoder.blank()) {
            warn!("Final all-off frame failed: {}", e);
        }
        Ok(reports)
    }

    fn hold(
        &mut self,
        label: &str,
        duration: Duration,
        running: &AtomicBool,
        mut frame: impl FnMut(&FrameEncoder, u64) -> Result<EncodedFrame>,
    ) -> Result<StepReport> {
        info!("Step: {} for {:?}", label, duration);
        let violations_before = self.health.timing_violations();
        let started = Instant::now();
        let mut frames = 0u32;
        let mut failures = 0u32;
        let mut total_tx = Duration::ZERO;
        let mut max_tx = Duration::ZERO;

        while started.elapsed() < duration && running.load(Ordering::Relaxed) {
            let tick = Instant::now();
            let encoded = frame(&self.encoder, u64::from(frames) + 1)?;
            match self.transmitter.present(&encoded) {
                Ok(()) => {
                    let tx = self.health.last_tx_duration();
                    total_tx += tx;
                    max_tx = max_tx.max(tx);
                    frames += 1;
                }
                Err(e) if !e.is_fatal() => failures += 1,
                Err(e) => return Err(e),
            }
            if let Some(rest) = self.frame_interval.checked_sub(tick.elapsed()) {
                thread::sleep(rest);
            }
        }

        let report = StepReport {
            label: label.to_string(),
            frames,
            failures,
            mean_tx_micros: if frames == 0 {
                0
            } else {
                (total_tx / frames).as_micros() as u64
            },
            max_tx_micros: max_tx.as_micros() as u64,
            timing_violations: self.health.timing_violations() - violations_before,
        };
        info!(
            "  {}: {} frames, {} failed, tx mean {}us max {}us, {} timing violations",
            report.label,
            report.frames,
            report.failures,
            report.mean_tx_micros,
            report.max_tx_micros,
            report.timing_violations
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::WaveformEncoder;
    use crate::error::PipelineError;
    use crate::output::{FailureMode, SimulatedChannel};

    fn config() -> Config {
        Config::from_json(
            r#"{
                "timing": {"target_fps": 200, "latch_delay_us": 60},
                "error_threshold": 4,
                "channels": [{"id": "sim0", "kind": "simulated"}],
                "segments": [{"name": "strip", "led_count": 5, "channel": "sim0"}]
            }"#,
        )
        .unwrap()
    }

    fn options() -> DiagnoseOptions {
        DiagnoseOptions {
            step: Duration::from_millis(30),
            repeat_color: Pixel::rgb(255, 0, 0),
            repeat: Duration::from_millis(30),
        }
    }

    #[test]
    fn test_runs_every_step_and_blanks() {
        let channel = SimulatedChannel::new("sim0").with_recording(1024);
        let log = channel.log();
        let mut diagnostics = Diagnostics::with_channels(&config(), vec![Box::new(channel)]).unwrap();

        let reports = diagnostics
            .run(&options(), &AtomicBool::new(true))
            .unwrap();
        let labels: Vec<_> = reports.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "red",
                "green",
                "blue",
                "dim white",
                "full white",
                "pre-encoded (255, 0, 0)"
            ]
        );
        assert!(reports.iter().all(|r| r.frames > 0 && r.failures == 0));

        let decoder = WaveformEncoder::new(Default::default());
        let frames = log.frames();
        assert_eq!(&decoder.decode(&frames[0]).unwrap()[..3], &[255, 0, 0]);
        assert!(decoder
            .decode(frames.last().unwrap())
            .unwrap()
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn test_transient_failures_are_counted() {
        let channel = SimulatedChannel::new("sim0").with_failure(FailureMode::First(2));
        let mut diagnostics = Diagnostics::with_channels(&config(), vec![Box::new(channel)]).unwrap();
        let reports = diagnostics
            .run(&options(), &AtomicBool::new(true))
            .unwrap();
        assert_eq!(reports[0].failures, 2);
        assert!(reports[1..].iter().all(|r| r.failures == 0));
    }

    #[test]
    fn test_persistent_failure_aborts() {
        let channel = SimulatedChannel::new("sim0").with_failure(FailureMode::Always);
        let mut diagnostics = Diagnostics::with_channels(&config(), vec![Box::new(channel)]).unwrap();
        assert!(matches!(
            diagnostics.run(&options(), &AtomicBool::new(true)),
            Err(PipelineError::PersistentFailure { failures: 4 })
        ));
        assert!(diagnostics.health().is_fatal());
    }

    #[test]
    fn test_stops_when_flag_clears() {
        let mut diagnostics =
            Diagnostics::with_channels(&config(), vec![Box::new(SimulatedChannel::new("sim0"))])
                .unwrap();
        let reports = diagnostics
            .run(&options(), &AtomicBool::new(false))
            .unwrap();
        assert!(reports.is_empty());
    }
}
