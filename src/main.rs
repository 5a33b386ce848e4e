use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use ws2811_pipeline::diagnostics::{DiagnoseOptions, Diagnostics};
use ws2811_pipeline::{pattern, Config, Pipeline, Pixel};

#[derive(Parser)]
#[command(name = "ws2811")]
#[command(about = "WS2811 LED frame pipeline\n\nRenders patterns and drives LED strips over SPI or a serial-attached microcontroller.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (JSON)
    #[arg(short, long, global = true, default_value = "config/led_config.json")]
    config: PathBuf,

    /// Enable debug output (statistics, per-frame timing)
    #[arg(long, global = true)]
    debug: bool,

    /// Enable detailed debug (hex dumps every frame)
    #[arg(long, global = true)]
    ddebug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pattern pipeline (default)
    Run {
        /// Initial pattern, overriding the configuration
        #[arg(short, long)]
        pattern: Option<String>,

        /// Global brightness 0-255, overriding the configuration
        #[arg(short, long)]
        brightness: Option<u8>,
    },

    /// List available patterns and their default parameters
    ListPatterns,

    /// Step through solid test colours and a repeated pre-encoded frame
    Diagnose {
        /// Seconds per solid colour step
        #[arg(long, default_value_t = 2)]
        step_secs: u64,

        /// Seconds to repeat the pre-encoded frame
        #[arg(long, default_value_t = 5)]
        repeat_secs: u64,

        /// Colour of the pre-encoded frame as r,g,b
        #[arg(long, default_value = "128,128,128", value_parser = parse_color)]
        color: Pixel,
    },
}

fn parse_color(s: &str) -> std::result::Result<Pixel, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid colour '{}': {}", s, e))?;
    match parts.as_slice() {
        [r, g, b] => Ok(Pixel::rgb(*r, *g, *b)),
        _ => Err(format!("expected r,g,b, got '{}'", s)),
    }
}

/// Clear `running` on Ctrl-C / SIGTERM
fn install_shutdown_handler(running: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        info!("Shutting down...");
        running.store(false, Ordering::Relaxed);
    });
    if let Err(e) = result {
        warn!("Could not set Ctrl-C handler: {}", e);
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ddebug implies debug
    let level = if cli.ddebug {
        Level::TRACE
    } else if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_thread_names(true)
        .init();

    match cli.command {
        None => run(&cli, None, None),
        Some(Command::Run {
            ref pattern,
            brightness,
        }) => run(&cli, pattern.clone(), brightness),
        Some(Command::ListPatterns) => {
            list_patterns();
            Ok(())
        }
        Some(Command::Diagnose {
            step_secs,
            repeat_secs,
            color,
        }) => diagnose(
            &cli,
            DiagnoseOptions {
                step: Duration::from_secs(step_secs),
                repeat_color: color,
                repeat: Duration::from_secs(repeat_secs),
            },
        ),
    }
}

fn run(cli: &Cli, pattern: Option<String>, brightness: Option<u8>) -> Result<()> {
    let mut config = load_config(cli)?;
    if let Some(pattern) = pattern {
        config.pattern.name = pattern;
        // Parameters belong to the configured pattern, not the override
        config.pattern.params.clear();
    }
    if let Some(brightness) = brightness {
        config.brightness = brightness;
    }

    let pipeline = Pipeline::open(config).context("Failed to start pipeline")?;
    install_shutdown_handler(pipeline.running_flag());

    // Blocks until shutdown; turns the LEDs off unless output failed
    pipeline.run()
}

fn list_patterns() {
    for name in pattern::names() {
        let params = match pattern::create(name, 1) {
            Ok(p) => p
                .params()
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", "),
            Err(e) => e.to_string(),
        };
        println!("{:<14} {}", name, params);
    }
}

fn diagnose(cli: &Cli, options: DiagnoseOptions) -> Result<()> {
    let config = load_config(cli)?;
    let mut diagnostics = Diagnostics::open(&config).context("Failed to open channels")?;

    let running = Arc::new(AtomicBool::new(true));
    install_shutdown_handler(Arc::clone(&running));

    let reports = diagnostics
        .run(&options, &running)
        .context("Diagnostics aborted")?;

    println!(
        "{:<28} {:>7} {:>7} {:>10} {:>10} {:>9}",
        "step", "frames", "failed", "mean us", "max us", "timing"
    );
    for r in &reports {
        println!(
            "{:<28} {:>7} {:>7} {:>10} {:>10} {:>9}",
            r.label, r.frames, r.failures, r.mean_tx_micros, r.max_tx_micros, r.timing_violations
        );
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&diagnostics.health().snapshot())?
    );
    Ok(())
}
