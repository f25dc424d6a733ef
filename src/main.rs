mod builder;
mod config;
mod console;
mod debounce;
mod error;
mod event;
mod orchestrator;
mod probation;
mod process;
mod signals;
mod slot;
mod watcher;

use clap::{Parser, Subcommand};
use console::OutputMode;
use orchestrator::Orchestrator;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use watcher::ChangeDetector;

/// A crash-safe live reloader: watch a source tree, rebuild on change, and run
/// each new build on probation, falling back to the last good binary if it
/// fails to build or crashes.
#[derive(Parser, Debug)]
#[command(name = "aegis", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file path
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Probation window in milliseconds (overrides config)
    #[arg(long)]
    probation_ms: Option<u64>,

    /// Wait for the first file change instead of building on startup
    #[arg(long)]
    no_initial_build: bool,

    /// Print events as JSON lines instead of log lines
    #[arg(long)]
    json: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (watch registration, signal and reap details)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "aegis=debug" } else { "aegis=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    if let Some(Command::Init { force }) = cli.command {
        return match config::write_default(&cli.config, force) {
            Ok(()) => {
                println!("{} created", cli.config.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let mut cfg = match config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e}. Run `aegis init` to create one.");
            return ExitCode::FAILURE;
        }
    };
    if let Some(ms) = cli.probation_ms {
        cfg.safety_net.probation_ms = ms;
    }

    if cli.dry_run {
        print_settings(&cfg);
        return ExitCode::SUCCESS;
    }

    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    run(Arc::new(cfg), mode, !cli.no_initial_build).await
}

fn print_settings(cfg: &config::AegisConfig) {
    println!("build command:  {}", cfg.build.cmd);
    println!("binary:         {}", cfg.bin_path().display());
    println!("backup:         {}", cfg.backup_path().display());
    println!("watch root:     {}", cfg.root().display());
    println!("excluded dirs:  {}", cfg.watch.exclude_dir.join(", "));
    println!("debounce:       {:?}", cfg.debounce());
    println!("probation:      {:?}", cfg.probation());
    println!("stop grace:     {:?}", cfg.grace());
}

async fn run(cfg: Arc<config::AegisConfig>, mode: OutputMode, initial_build: bool) -> ExitCode {
    let mut signals = match signals::ShutdownSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(root = %cfg.root().display(), "aegis starting");

    let (sink, events) = event::channel();
    let console = tokio::spawn(console::render(events, mode));
    let orchestrator = Orchestrator::new(Arc::clone(&cfg), sink.clone());

    // A watcher that cannot start is reported but does not stop supervision.
    let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
    let detector = match ChangeDetector::new(cfg.root(), &cfg.watch.exclude_dir) {
        Ok(detector) => Some(detector.spawn(cfg.debounce(), trigger_tx, sink.clone())),
        Err(e) => {
            sink.error(e);
            None
        }
    };

    if initial_build {
        orchestrator.trigger_build();
    } else {
        sink.status("waiting for file changes");
    }

    let signal = loop {
        tokio::select! {
            trigger = trigger_rx.recv() => match trigger {
                Some(trigger) => {
                    tracing::debug!(changes = trigger.changes, last = %trigger.last_change.display(), "rebuild requested");
                    orchestrator.trigger_build();
                }
                // Detector is gone; keep supervising until asked to stop.
                None => break signals.recv().await,
            },
            signal = signals.recv() => break signal,
        }
    };
    tracing::info!(signal, "shutdown requested");
    sink.status("shutting down");

    if let Some(detector) = detector {
        detector.abort();
        let _ = detector.await;
    }

    {
        let shutdown = orchestrator.shutdown();
        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut shutdown => {}
            signal = signals.recv() => {
                tracing::warn!(signal, "second signal, aborting in-flight build cycle");
                sink.status("forcing shutdown");
                orchestrator.abort();
                shutdown.await;
            }
        }
    }
    drop(orchestrator);
    drop(sink);

    if tokio::time::timeout(Duration::from_secs(1), console).await.is_err() {
        tracing::debug!("event console did not drain in time");
    }
    ExitCode::SUCCESS
}
