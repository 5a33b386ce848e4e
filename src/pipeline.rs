/*!
Session orchestration: the pattern thread, the transmit thread and the
exchange between them.

```text
pattern thread:  render -> snapshot -> encode -> publish ─┐
                                                          │ FrameExchange (1 slot)
transmit thread: claim -> present -> latch ───────────────┘
```
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use tracing::{debug, error, info, warn};

use crate::buffer::ColorBuffer;
use crate::config::Config;
use crate::encoder::{EncodedFrame, FrameEncoder};
use crate::error::Result;
use crate::exchange::{Claimed, FrameExchange};
use crate::health::{Health, Stage};
use crate::metrics;
use crate::output::{self, PixelChannel};
use crate::pattern::PatternControl;
use crate::transmitter::{BusLock, Transmitter};

/// How often the supervising thread checks the running flag
const SUPERVISOR_POLL: Duration = Duration::from_millis(20);

/// Keeps the pattern thread on a fixed cadence.
///
/// Deadlines advance by whole intervals so short oversleeps do not accumulate.
/// Falling more than two frames behind drops the backlog instead of rendering
/// a burst of catch-up frames.
#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    next: Instant,
}

impl FramePacer {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next: now + interval,
        }
    }

    /// Advance to the next deadline and return how long to sleep from `now`
    pub fn tick(&mut self, now: Instant) -> Duration {
        let max_drift = self.interval * 2;
        if now > self.next + max_drift {
            self.next = now + self.interval;
            return Duration::ZERO;
        }
        let wait = self.next.saturating_duration_since(now);
        self.next += self.interval;
        wait
    }
}

pub struct Pipeline {
    config: Config,
    encoder: FrameEncoder,
    transmitter: Transmitter,
    exchange: Arc<FrameExchange>,
    control: PatternControl,
    health: Arc<Health>,
    running: Arc<AtomicBool>,
    bus: BusLock,
}

impl Pipeline {
    /// Validate the configuration and open every configured channel.
    ///
    /// Nothing is left running if any channel fails to open.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let speed = config.protocol.speed;
        let mut channels = Vec::with_capacity(config.channels.len());
        for channel in &config.channels {
            let opened = output::open(&channel.id, &channel.kind, speed)?;
            info!("✓ Opened channel {} ({})", channel.id, opened.name());
            channels.push(opened);
        }

        Self::build(config, channels)
    }

    /// Build a pipeline on already opened channels, one per configured channel
    /// in the same order.
    pub fn with_channels(config: Config, channels: Vec<Box<dyn PixelChannel>>) -> Result<Self> {
        config.validate()?;
        Self::build(config, channels)
    }

    fn build(config: Config, channels: Vec<Box<dyn PixelChannel>>) -> Result<Self> {
        let encoder = FrameEncoder::new(config.protocol.color_order, config.plans());
        let health = Arc::new(Health::new(config.channels.iter().map(|c| c.id.clone())));
        let bus = BusLock::default();
        let transmitter = Transmitter::new(
            channels,
            encoder.part_lengths(),
            encoder.pixel_count(),
            config.transmitter_settings(),
            Arc::clone(&bus),
            Arc::clone(&health),
        )?;

        let led_count = config.led_count();
        let control = PatternControl::new(config.start_pattern()?, led_count, config.brightness);

        let exchange = Arc::new(FrameExchange::new(config.idle_policy, Arc::clone(&health)));

        info!(
            "Pipeline ready: {} LEDs on {} channel(s), {} @ {}fps, brightness {}",
            led_count,
            config.channels.len(),
            config.pattern.name,
            config.timing.target_fps,
            config.brightness
        );

        Ok(Self {
            config,
            encoder,
            transmitter,
            exchange,
            control,
            health,
            running: Arc::new(AtomicBool::new(true)),
            bus,
        })
    }

    /// Shutdown signal for signal handlers
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn control(&self) -> PatternControl {
        self.control.clone()
    }

    pub fn health(&self) -> Arc<Health> {
        Arc::clone(&self.health)
    }

    /// Lock that every user of the output hardware must hold
    pub fn bus(&self) -> BusLock {
        Arc::clone(&self.bus)
    }

    /// Run until the running flag clears or output fails for good.
    ///
    /// On a clean stop every LED is switched off before returning. A fatal
    /// transmission or pattern error is returned after both threads have
    /// exited.
    pub fn run(self) -> anyhow::Result<()> {
        let Pipeline {
            config,
            encoder,
            transmitter,
            exchange,
            control,
            health,
            running,
            bus: _,
        } = self;

        let reporter = metrics::spawn_reporter(
            Arc::clone(&health),
            control.clone(),
            Arc::clone(&running),
            Duration::from_secs(config.metrics.interval_secs),
            config.metrics.path.clone(),
        )
        .context("Failed to spawn metrics thread")?;

        let pattern_thread = spawn_pattern_thread(
            control,
            encoder.clone(),
            Arc::clone(&exchange),
            Arc::clone(&health),
            Arc::clone(&running),
            config.timing.frame_interval(),
            config.protocol.extract_white,
        )
        .context("Failed to spawn pattern thread")?;

        let transmit_thread = spawn_transmit_thread(
            transmitter,
            Arc::clone(&exchange),
            Arc::clone(&running),
            config.timing.claim_timeout(),
        )
        .context("Failed to spawn transmit thread")?;

        info!("Running (Ctrl-C to stop)");
        while running.load(Ordering::Relaxed) {
            thread::sleep(SUPERVISOR_POLL);
        }

        exchange.close();
        // Both threads are joined before any outcome is acted on
        let pattern_joined = pattern_thread.join();
        let transmit_joined = transmit_thread.join();
        let (mut transmitter, transmit_result) =
            transmit_joined.map_err(|_| anyhow!("transmit thread panicked"))?;
        if reporter.join().is_err() {
            warn!("Metrics thread panicked");
        }

        if transmitter.is_fatal() {
            error!("Output stopped; LEDs left as last shown");
        } else {
            info!("Turning off LEDs...");
            if let Err(e) = transmitter.present(&encoder.blank()) {
                warn!("Final all-off frame failed: {}", e);
            }
        }

        let snapshot = health.snapshot();
        info!(
            "Stopped after {} frames ({} dropped, {} errors)",
            snapshot.frames_presented, snapshot.dropped_frames, snapshot.total_errors
        );

        transmit_result.context("Output stopped")?;
        pattern_joined
            .map_err(|_| anyhow!("pattern thread panicked"))?
            .context("Pattern generation failed")?;
        Ok(())
    }
}

/// Clears the running flag when dropped, so a panicking thread still stops
/// the session
struct StopOnExit(Arc<AtomicBool>);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        if thread::panicking() {
            let current = thread::current();
            error!("{} thread panicked, stopping", current.name().unwrap_or("worker"));
        }
        self.0.store(false, Ordering::Relaxed);
    }
}

fn spawn_pattern_thread(
    control: PatternControl,
    encoder: FrameEncoder,
    exchange: Arc<FrameExchange>,
    health: Arc<Health>,
    running: Arc<AtomicBool>,
    interval: Duration,
    extract_white: bool,
) -> std::io::Result<JoinHandle<Result<()>>> {
    thread::Builder::new()
        .name("pattern".into())
        .spawn(move || {
            let _stop = StopOnExit(Arc::clone(&running));
            let mut buffer = ColorBuffer::new(encoder.pixel_count());
            let mut pacer = FramePacer::new(interval, Instant::now());

            while running.load(Ordering::Relaxed) {
                let frame = render_frame(&control, &encoder, &health, &mut buffer, extract_white);
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Pattern {} failed: {}", control.pattern_name(), e);
                        running.store(false, Ordering::Relaxed);
                        return Err(e);
                    }
                };

                health.record_generated();
                if exchange.publish(frame) {
                    debug!("Transmitter behind, dropped an unclaimed frame");
                }

                let wait = pacer.tick(Instant::now());
                health.record_stage(Stage::Pacing, wait);
                thread::sleep(wait);
            }
            Ok(())
        })
}

/// Render, freeze and encode one frame, timing each half
fn render_frame(
    control: &PatternControl,
    encoder: &FrameEncoder,
    health: &Health,
    buffer: &mut ColorBuffer,
    extract_white: bool,
) -> Result<EncodedFrame> {
    let started = Instant::now();
    control.render(buffer)?;
    if extract_white {
        buffer.extract_white();
    }
    let rendered = Instant::now();
    health.record_stage(Stage::Render, rendered - started);

    let frame = encoder.encode(&buffer.snapshot())?;
    health.record_stage(Stage::Encode, rendered.elapsed());
    Ok(frame)
}

fn spawn_transmit_thread(
    mut transmitter: Transmitter,
    exchange: Arc<FrameExchange>,
    running: Arc<AtomicBool>,
    claim_timeout: Duration,
) -> std::io::Result<JoinHandle<(Transmitter, Result<()>)>> {
    thread::Builder::new()
        .name("transmit".into())
        .spawn(move || {
            let _stop = StopOnExit(Arc::clone(&running));
            let result = transmit_loop(&mut transmitter, &exchange, &running, claim_timeout);
            (transmitter, result)
        })
}

fn transmit_loop(
    transmitter: &mut Transmitter,
    exchange: &FrameExchange,
    running: &AtomicBool,
    claim_timeout: Duration,
) -> Result<()> {
    while running.load(Ordering::Relaxed) {
        let waiting = Instant::now();
        let in_flight = match exchange.claim(claim_timeout)? {
            Claimed::Frame(in_flight) => in_flight,
            Claimed::Idle => {
                transmitter.idle_cycle();
                continue;
            }
            Claimed::Closed => break,
        };
        // A repeat means the wait timed out; only fresh frames say how long
        // the transmitter sat idle between frames
        if !in_flight.is_repeat() {
            transmitter
                .health()
                .record_stage(Stage::ClaimWait, waiting.elapsed());
        }
        match transmitter.present(in_flight.frame()) {
            Ok(()) => {}
            // Already counted and logged; the next frame retries
            Err(e) if !e.is_fatal() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::WaveformEncoder;
    use crate::error::PipelineError;
    use crate::output::{FailureMode, SimulatedChannel, TransferLog};
    use crate::pattern::{ParamValue, Params, Pattern};
    use crate::pixel_format::{ColorOrder, Pixel};

    fn config(pattern: &str) -> Config {
        let mut config = Config::from_json(&format!(
            r#"{{
                "timing": {{"target_fps": 100, "latch_delay_us": 100, "claim_timeout_ms": 20}},
                "error_threshold": 3,
                "brightness": 255,
                "channels": [{{"id": "sim0", "kind": "simulated"}}],
                "segments": [{{"name": "strip", "led_count": 10, "channel": "sim0"}}],
                "pattern": {{"name": "{}"}}
            }}"#,
            pattern
        ))
        .unwrap();
        config.metrics.interval_secs = 1;
        config
    }

    fn pipeline(pattern: &str, failure: FailureMode) -> (Pipeline, TransferLog) {
        let channel = SimulatedChannel::new("sim0")
            .with_failure(failure)
            .with_recording(1024);
        let log = channel.log();
        let pipeline = Pipeline::with_channels(config(pattern), vec![Box::new(channel)]).unwrap();
        (pipeline, log)
    }

    fn stop_after(pipeline: &Pipeline, after: Duration) -> JoinHandle<()> {
        let running = pipeline.running_flag();
        thread::spawn(move || {
            thread::sleep(after);
            running.store(false, Ordering::Relaxed);
        })
    }

    #[test]
    fn test_runs_and_blanks_on_shutdown() {
        let (pipeline, log) = pipeline("test", FailureMode::None);
        let health = pipeline.health();
        let stopper = stop_after(&pipeline, Duration::from_millis(300));
        pipeline.run().unwrap();
        stopper.join().unwrap();

        let frames = log.frames();
        assert!(frames.len() > 2, "only {} frames sent", frames.len());
        assert!(health.frames_generated() > 0);

        let decoder = WaveformEncoder::new(Default::default());
        // The test pattern opens with solid red
        let first = decoder.decode(&frames[0]).unwrap();
        assert_eq!(&first[..3], &[255, 0, 0]);
        // Final frame switches everything off
        let last = decoder.decode(frames.last().unwrap()).unwrap();
        assert!(last.iter().all(|&b| b == 0));
        assert_eq!(last.len(), WaveformEncoder::encoded_len(ColorOrder::Rgb, 10) / 8);
    }

    #[test]
    fn test_persistent_failure_ends_run() {
        let (pipeline, log) = pipeline("solid", FailureMode::Always);
        let health = pipeline.health();
        let running = pipeline.running_flag();
        // Safety net in case the failure is not detected
        let _stopper = stop_after(&pipeline, Duration::from_secs(5));

        let started = Instant::now();
        let err = pipeline.run().unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(format!("{:#}", err).contains("consecutive"));
        assert!(health.is_fatal());
        assert!(!running.load(Ordering::Relaxed));
        // No blank frame attempted after the fatal transition
        assert_eq!(log.attempts(), 3);
    }

    #[test]
    fn test_control_changes_output() {
        let (pipeline, log) = pipeline("solid", FailureMode::None);
        let control = pipeline.control();
        control
            .set_param("blue", ParamValue::Number(255.0))
            .unwrap();
        assert_eq!(control.pattern_name(), "solid");

        let stopper = stop_after(&pipeline, Duration::from_millis(200));
        pipeline.run().unwrap();
        stopper.join().unwrap();

        let decoder = WaveformEncoder::new(Default::default());
        let first = decoder.decode(&log.frames()[0]).unwrap();
        assert_eq!(&first[..3], &[255, 0, 255]);
    }

    #[test]
    fn test_unknown_start_param_is_rejected() {
        let mut config = config("solid");
        config
            .pattern
            .params
            .insert("speed".into(), ParamValue::Number(1.0));
        let result = Pipeline::with_channels(config, vec![Box::new(SimulatedChannel::new("sim0"))]);
        assert!(matches!(result, Err(PipelineError::UnknownParam { .. })));
    }

    #[test]
    fn test_start_params_checked_before_opening_channels() {
        let mut config = config("solid");
        config
            .pattern
            .params
            .insert("speed".into(), ParamValue::Number(1.0));
        config.channels[0].kind = output::ChannelKind::Spi {
            device: "/nonexistent/spidev0.0".into(),
        };
        // The device is never reached
        assert!(matches!(
            Pipeline::open(config),
            Err(PipelineError::UnknownParam { .. })
        ));
    }

    /// Blue for a while, then panics mid-render
    struct Faulty;

    impl Pattern for Faulty {
        fn name(&self) -> &'static str {
            "faulty"
        }

        fn params(&self) -> Params {
            Params::new()
        }

        fn set_param(&mut self, name: &str, _value: ParamValue) -> Result<()> {
            Err(PipelineError::config(format!("no parameter {}", name)))
        }

        fn render(&self, elapsed: Duration, buffer: &mut ColorBuffer) -> Result<()> {
            if elapsed > Duration::from_millis(80) {
                panic!("render fault");
            }
            buffer.fill(Pixel::rgb(0, 0, 255));
            Ok(())
        }
    }

    #[test]
    fn test_pattern_panic_stops_run_and_blanks() {
        let (mut pipeline, log) = pipeline("solid", FailureMode::None);
        pipeline.control = PatternControl::new(Box::new(Faulty), 10, 255);
        let running = pipeline.running_flag();
        // Safety net in case the panic goes unnoticed
        let _stopper = stop_after(&pipeline, Duration::from_secs(5));

        let started = Instant::now();
        let err = pipeline.run().unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(format!("{:#}", err).contains("panicked"));
        assert!(!running.load(Ordering::Relaxed));

        let decoder = WaveformEncoder::new(Default::default());
        let frames = log.frames();
        assert_eq!(&decoder.decode(&frames[0]).unwrap()[..3], &[0, 0, 255]);
        assert!(decoder
            .decode(frames.last().unwrap())
            .unwrap()
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn test_stage_timings_are_recorded() {
        let (pipeline, _) = pipeline("rainbow_wave", FailureMode::None);
        let health = pipeline.health();
        let stopper = stop_after(&pipeline, Duration::from_millis(200));
        pipeline.run().unwrap();
        stopper.join().unwrap();

        let stages = health.snapshot().stages;
        assert!(stages.render.samples > 0);
        assert_eq!(stages.render.samples, stages.encode.samples);
        assert!(stages.pacing.samples > 0);
        assert!(stages.transmit.samples > 0);
        assert!(stages.render.max_micros >= stages.render.min_micros);
        assert!(stages.generation_ratio().is_some());
    }

    #[test]
    fn test_white_extraction_when_enabled() {
        let mut config = config("solid");
        config.protocol.color_order = ColorOrder::Grbw;
        config.protocol.extract_white = true;
        for name in ["green", "blue"] {
            config
                .pattern
                .params
                .insert(name.into(), ParamValue::Number(255.0));
        }
        let channel = SimulatedChannel::new("sim0").with_recording(64);
        let log = channel.log();
        let pipeline = Pipeline::with_channels(config, vec![Box::new(channel)]).unwrap();
        let stopper = stop_after(&pipeline, Duration::from_millis(100));
        pipeline.run().unwrap();
        stopper.join().unwrap();

        let decoder = WaveformEncoder::new(Default::default());
        let first = decoder.decode(&log.frames()[0]).unwrap();
        assert_eq!(first.len(), 10 * 4);
        assert_eq!(&first[..4], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_open_fails_fast_on_missing_device() {
        let mut config = config("solid");
        config.channels[0].kind = output::ChannelKind::Spi {
            device: "/nonexistent/spidev0.0".into(),
        };
        assert!(matches!(
            Pipeline::open(config),
            Err(PipelineError::ChannelUnavailable { .. })
        ));
    }

    #[test]
    fn test_pacer_keeps_cadence() {
        let start = Instant::now();
        let interval = Duration::from_millis(10);
        let mut pacer = FramePacer::new(interval, start);

        assert_eq!(pacer.tick(start + Duration::from_millis(4)), Duration::from_millis(6));
        // Late by 3ms: the next wait shrinks instead of drifting
        assert_eq!(pacer.tick(start + Duration::from_millis(23)), Duration::ZERO);
        assert_eq!(pacer.tick(start + Duration::from_millis(25)), Duration::from_millis(5));
    }

    #[test]
    fn test_pacer_skips_backlog() {
        let start = Instant::now();
        let interval = Duration::from_millis(10);
        let mut pacer = FramePacer::new(interval, start);

        // 100ms stall: no burst of zero-length waits afterwards
        let late = start + Duration::from_millis(100);
        assert_eq!(pacer.tick(late), Duration::ZERO);
        assert_eq!(pacer.tick(late), interval);
    }
}
