//! # pitchwatch
//!
//! Terminal front end for the pitch monitor. Starts a [`DetectionEngine`]
//! on the microphone (or a synthetic tone) and prints the note label each
//! time the engine publishes a new one.
//!
//! ## Threads
//! - **Main thread**: polls the shared engine state and prints labels
//! - **Capture thread**: owned by the engine
//! - **Stdin thread**: signals the main thread when Enter is pressed

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{select, Receiver};
use env_logger::Env;
use log::{debug, info};
use pitchwatch_core::audio::{AudioSource, ToneSource};
use pitchwatch_core::{DetectionEngine, EngineConfig};
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Live pitch and note monitor
#[derive(Parser, Debug)]
#[command(name = "pitchwatch", version, about = "Live pitch and note monitor")]
struct Cli {
    /// Path to a JSON engine configuration
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen to a synthetic sine at this frequency instead of the microphone
    #[arg(long, value_name = "HZ")]
    simulate: Option<f64>,

    /// Stop after this long (e.g. 30s, 2m). Runs until Enter otherwise
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Interval between reads of the engine state, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 50)]
    poll_ms: u64,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Log engine activity to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if let Some(hz) = cli.simulate {
        if !hz.is_finite() || hz <= 0.0 {
            bail!("--simulate needs a positive frequency, got {hz}");
        }
        let source = ToneSource::new(hz).paced(true);
        let engine = DetectionEngine::new(source, config).context("Invalid configuration")?;
        return watch(engine, &cli);
    }

    microphone(config, &cli)
}

#[cfg(feature = "cpal-audio")]
fn microphone(config: EngineConfig, cli: &Cli) -> Result<()> {
    let engine = DetectionEngine::with_microphone(config).context("Invalid configuration")?;
    watch(engine, cli)
}

#[cfg(not(feature = "cpal-audio"))]
fn microphone(_config: EngineConfig, _cli: &Cli) -> Result<()> {
    bail!("built without microphone support; pass --simulate <HZ>")
}

/// Runs the engine until the duration elapses, Enter is pressed, or
/// capture ends on its own.
fn watch<S: AudioSource>(engine: DetectionEngine<S>, cli: &Cli) -> Result<()> {
    let state = engine.state();

    engine.start();
    if !engine.is_running() {
        let label = engine.label();
        println!("{label}");
        bail!("capture did not start: {label}");
    }

    let poll = Duration::from_millis(cli.poll_ms.max(1));
    let deadline = cli.duration.map(|d| Instant::now() + d);
    let mut quit = enter_pressed().context("Failed to watch stdin")?;
    let mut printed = None;

    loop {
        let generation = state.generation();
        if printed != Some(generation) {
            println!("{}", state.label());
            printed = Some(generation);
        }

        if !state.is_running() {
            info!("Capture ended");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            debug!("Duration elapsed");
            break;
        }

        let signal = select! {
            recv(quit) -> msg => Some(msg.is_ok()),
            default(poll) => None,
        };
        match signal {
            Some(true) => {
                debug!("Enter pressed");
                break;
            }
            // Stdin closed; keep running until the duration or the engine ends.
            Some(false) => quit = crossbeam_channel::never(),
            None => {}
        }
    }

    engine.stop();
    if printed != Some(state.generation()) {
        println!("{}", state.label());
    }
    Ok(())
}

/// Fires once for the first line read from stdin. Disconnects on EOF.
fn enter_pressed() -> std::io::Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::Builder::new()
        .name("pitchwatch-stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            if let Ok(n) = std::io::stdin().lock().read_line(&mut line) {
                if n > 0 {
                    let _ = tx.send(());
                }
            }
        })?;
    Ok(rx)
}
