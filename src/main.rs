//! Duplex Engine - a full-duplex, low-latency audio streaming demo.
//!
//! Captures audio from the default input device, routes it through a
//! fixed-ratio resample and streaming spectral round trip, and plays the
//! result back with a lock-free, zero-fill-on-underflow callback path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use duplex_engine::audio::{CpalCapture, CpalPlayback, PlaybackSink};
use duplex_engine::{AppConfig, DuplexEngine};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown(shutdown: Arc<AtomicBool>) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown.store(true, Ordering::SeqCst);
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_args();

    // Respect RUST_LOG, fall back to the verbose flag, default to info.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })
        .unwrap();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("Duplex Engine v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }
    config.log_config();

    // The sink drives parameter negotiation; the capture side follows.
    let playback = CpalPlayback::new(config.frames_per_burst)?;
    let params = playback.params()?;
    let capture = CpalCapture::new(params)?;

    let mut duplex = DuplexEngine::new(config.engine_config());
    duplex.set_capture_source(capture);
    duplex.set_playback_sink(playback);
    duplex.start()?;

    info!("Engine running - press Ctrl+C to stop");

    let shutdown = Arc::new(AtomicBool::new(false));
    wait_for_shutdown(shutdown).await;

    duplex.stop();

    let stats = duplex.stats();
    info!("Final stats: {} overflow frames, {} underflow frames", stats.overflows, stats.underflows);
    info!("Duplex engine stopped");
    Ok(())
}
