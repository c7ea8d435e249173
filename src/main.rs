//! TTSAM-RT realtime shaking-intensity forecaster.
//!
//! # Usage
//!
//! ```bash
//! # Live operation: waveforms and picks from upstream streams
//! ttsam-rt --waves /var/run/waves.jsonl --picks /var/run/picks.txt
//!
//! # Replay from captured files
//! ttsam-rt --waves capture/waves.jsonl --picks capture/picks.txt
//!
//! # Synthetic quiet-network demo (no picks, no reports)
//! ttsam-rt --synthetic
//! ```
//!
//! # Environment Variables
//!
//! - `TTSAM_CONFIG`: path to the TOML config file
//! - `TTSAM_WINDOW_SECONDS`, `TTSAM_N_STATIONS_MAX`, `TTSAM_TICK_INTERVAL`,
//!   `TTSAM_ALARM_MIN_INTENSITY`, `TTSAM_INTENSITY_CUTOFF`: field overrides
//! - `RUST_LOG`: logging filter (default: info)
//!
//! # Exit codes
//!
//! 0 clean shutdown · 1 catalog load failure · 2 predictor init failure ·
//! 3 unrecoverable transport error

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ttsam_rt::api::{self, ApiState};
use ttsam_rt::catalog::SiteCatalog;
use ttsam_rt::config::RuntimeConfig;
use ttsam_rt::inference::{Predictor, StubPredictor};
use ttsam_rt::pipeline::{
    JsonlWaveSource, Pipeline, PipelineError, SilentPickSource, SyntheticWaveSource,
    TextPickSource,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "ttsam-rt")]
#[command(about = "Real-time earthquake shaking-intensity forecaster")]
#[command(version)]
struct CliArgs {
    /// Waveform stream: JSON-lines file path, or "-" for stdin
    #[arg(long, value_name = "PATH")]
    waves: Option<String>,

    /// Pick stream: whitespace text file path, or "-" for stdin
    #[arg(long, value_name = "PATH")]
    picks: Option<String>,

    /// Generate synthetic quiet-network waveforms instead of reading a stream
    #[arg(long, conflicts_with = "waves")]
    synthetic: bool,

    /// Override the view-channel bind address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the site catalog directory
    #[arg(long, value_name = "DIR")]
    site_dir: Option<String>,

    /// Override the log root directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    let mut config = RuntimeConfig::load();
    if let Some(addr) = &args.addr {
        config.paths.server_addr = addr.clone();
    }
    if let Some(dir) = &args.site_dir {
        config.paths.site_dir = dir.into();
    }
    if let Some(dir) = &args.log_dir {
        config.paths.log_dir = dir.into();
    }

    // Stage 1: site catalogs. Failure is fatal with exit code 1.
    let catalog = match SiteCatalog::load(&config.paths.site_dir) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            error!(error = %e, "Site catalog load failed");
            return ExitCode::from(1);
        }
    };

    // Stage 2: predictor runtime. Failure is fatal with exit code 2.
    let predictor = match init_predictor() {
        Ok(predictor) => predictor,
        Err(e) => {
            error!(error = %e, "Predictor initialization failed");
            return ExitCode::from(2);
        }
    };

    match run(args, config, catalog, predictor).await {
        Ok(()) => {
            info!("Clean shutdown");
            ExitCode::SUCCESS
        }
        Err(RunError::Transport(e)) => {
            error!(error = %e, "Unrecoverable transport error");
            ExitCode::from(3)
        }
        Err(RunError::Startup(e)) => {
            error!(error = %e, "Startup failed");
            ExitCode::from(1)
        }
    }
}

/// Build the predictor runtime.
///
/// The trained network runtime is deployment-provided; the built-in stub
/// keeps replay and demo runs functional without model weights.
fn init_predictor() -> Result<Box<dyn Predictor>> {
    info!("Using built-in stub predictor (no model weights configured)");
    Ok(Box::new(StubPredictor::new()))
}

enum RunError {
    Startup(anyhow::Error),
    Transport(anyhow::Error),
}

async fn run(
    args: CliArgs,
    config: RuntimeConfig,
    catalog: Arc<SiteCatalog>,
    predictor: Box<dyn Predictor>,
) -> Result<(), RunError> {
    let pipeline =
        Pipeline::new(config.clone(), catalog.clone(), predictor).map_err(RunError::Startup)?;

    let cancel = CancellationToken::new();

    // View channel over the live pipeline handles.
    let api_state = ApiState {
        bus: pipeline.bus.clone(),
        wave: pipeline.wave.clone(),
        pick_counters: pipeline.pick_counters.clone(),
        dispatch_counters: pipeline.dispatch_counters.clone(),
        queue: pipeline.queue.clone(),
        started: Instant::now(),
    };
    let server = tokio::spawn(api::serve(
        api_state,
        config.paths.server_addr.clone(),
        cancel.clone(),
    ));

    // Ctrl-C broadcasts shutdown to every component.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let result = if args.synthetic {
        let stations: Vec<String> = catalog.station_ids().map(str::to_string).collect();
        let waves = SyntheticWaveSource::new(stations, config.wave.sample_rate_hz)
            .map_err(RunError::Startup)?;
        match &args.picks {
            Some(path) => {
                let picks = open_picks(path).await.map_err(RunError::Startup)?;
                pipeline.run(waves, picks, cancel.clone()).await
            }
            None => {
                pipeline
                    .run(waves, SilentPickSource, cancel.clone())
                    .await
            }
        }
    } else {
        let waves = match &args.waves {
            Some(path) if path == "-" => JsonlWaveSource::stdin(),
            Some(path) => JsonlWaveSource::open(std::path::Path::new(path))
                .await
                .map_err(RunError::Startup)?,
            None => {
                return Err(RunError::Startup(anyhow::anyhow!(
                    "no waveform input: pass --waves PATH or --synthetic"
                )))
            }
        };
        let picks = match &args.picks {
            Some(path) => open_picks(path).await.map_err(RunError::Startup)?,
            None => {
                return Err(RunError::Startup(anyhow::anyhow!(
                    "no pick input: pass --picks PATH"
                )))
            }
        };
        pipeline.run(waves, picks, cancel.clone()).await
    };

    cancel.cancel();
    let _ = server.await;

    result.map_err(|e| match e {
        PipelineError::Transport(source) => RunError::Transport(source),
    })
}

async fn open_picks(path: &str) -> Result<TextPickSource> {
    if path == "-" {
        Ok(TextPickSource::stdin())
    } else {
        TextPickSource::open(std::path::Path::new(path))
            .await
            .context("opening pick stream")
    }
}
