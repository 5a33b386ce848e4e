/*!
Periodic health reporting.

Logs a one-line summary every interval and, when a path is configured, writes
the latest counters as JSON for external display tools. The reporter only
reads atomics; it never slows the transmit thread.
*/

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::health::{Health, HealthSnapshot};
use crate::pattern::PatternControl;

const POLL: Duration = Duration::from_millis(100);

/// One line of the metrics file
#[derive(Debug, Serialize)]
pub struct MetricsRecord {
    /// Seconds since the unix epoch
    pub timestamp: f64,
    pub pattern: &'static str,
    #[serde(flatten)]
    pub health: HealthSnapshot,
}

impl MetricsRecord {
    pub fn capture(health: &Health, control: &PatternControl) -> Self {
        Self {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            pattern: control.pattern_name(),
            health: health.snapshot(),
        }
    }
}

/// Replace the metrics file in one step so readers never see half a document
pub fn write_metrics(path: &Path, record: &MetricsRecord) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn spawn_reporter(
    health: Arc<Health>,
    control: PatternControl,
    running: Arc<AtomicBool>,
    interval: Duration,
    path: Option<PathBuf>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("metrics".into())
        .spawn(move || {
            let mut last_report = Instant::now();
            let mut last_presented = 0u64;

            while running.load(Ordering::Relaxed) {
                thread::sleep(POLL);
                if last_report.elapsed() < interval {
                    continue;
                }

                let record = MetricsRecord::capture(&health, &control);
                let presented = record.health.frames_presented;
                debug!(
                    "[Stats] {} | {:.1} fps | presented {} (+{}) | repeated {} | dropped {} | errors {} ({} in a row) | tx {}us (max {}us) | timing violations {}",
                    record.pattern,
                    record.health.fps,
                    presented,
                    presented.saturating_sub(last_presented),
                    record.health.frames_repeated,
                    record.health.dropped_frames,
                    record.health.total_errors,
                    record.health.consecutive_errors,
                    record.health.last_tx_micros,
                    record.health.max_tx_micros,
                    record.health.timing_violations,
                );
                let stages = &record.health.stages;
                debug!(
                    "[Stages] render {}us | encode {}us | pacing {}us | claim wait {}us | transmit {}us",
                    stages.render.avg_micros,
                    stages.encode.avg_micros,
                    stages.pacing.avg_micros,
                    stages.claim_wait.avg_micros,
                    stages.transmit.avg_micros,
                );
                if let Some(ratio) = stages.generation_ratio().filter(|&r| r > 1.0) {
                    warn!(
                        "Pattern generation takes {:.1}x the transmit time; frame rate is limited by the pattern",
                        ratio
                    );
                }
                for channel in record.health.channels.iter().filter(|c| !c.up) {
                    info!("Channel {} is down ({} errors)", channel.name, channel.errors);
                }

                if let Some(path) = &path {
                    if let Err(e) = write_metrics(path, &record) {
                        warn!("Could not write metrics to {}: {}", path.display(), e);
                    }
                }

                last_presented = presented;
                last_report = Instant::now();
            }
        })
}
