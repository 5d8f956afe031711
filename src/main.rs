//! EPOCH client - Main Application
//!
//! Connects to a DERO GetWork server and serves EPOCH hash attempts over
//! JSON-RPC until interrupted.

use epoch_client::{
    config::{Config, LogFormat},
    rpc,
    utils::{compute_hash_rate, format_hash_rate, format_hashes},
    Engine, Result, APP_NAME, APP_VERSION,
};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How often session totals are logged
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration
    let config = Config::load().await?;

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    init_tracing(&config);

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: daemon={}, work_port={}, threads={}, max_hashes={}",
        config.daemon, config.work_port, config.threads, config.max_hashes
    );

    let engine = Arc::new(Engine::new(config.engine_config()?)?);
    engine.start("", &config.daemon).await?;

    if let Err(e) = engine.wait_for_job(config.job_timeout_duration()?).await {
        error!("{}", e);
        engine.stop().await;
        return Err(e);
    }
    info!("[EPOCH] First job received at height {}", engine.get_job().height);

    let shutdown = CancellationToken::new();

    let server = tokio::spawn(rpc::serve(
        Arc::clone(&engine),
        config.rpc_socket_addr()?,
        shutdown.clone(),
    ));
    let reporter = tokio::spawn(report_status(Arc::clone(&engine), shutdown.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
    engine.stop().await;

    if let Err(e) = reporter.await {
        warn!("Status reporter failed: {}", e);
    }
    match server.await {
        Ok(result) => result?,
        Err(e) => warn!("JSON-RPC server task failed: {}", e),
    }

    let session = engine.get_session(rpc::SESSION_TIMEOUT).await?;
    info!(
        "Session totals: {} hashes, {} miniblocks",
        format_hashes(session.hashes),
        session.miniblocks
    );

    Ok(())
}

/// Install the tracing subscriber; `RUST_LOG` overrides the configured level
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    match config.log_format {
        LogFormat::Plain => tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false))
            .with(filter)
            .init(),
    }
}

/// Log session totals until shutdown; shuts down when the upstream closes
async fn report_status(engine: Arc<Engine>, shutdown: CancellationToken) {
    let mut ticker = interval(STATUS_INTERVAL);
    ticker.tick().await;

    let mut last_hashes = 0u64;
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !engine.is_active() {
            error!("[EPOCH] GetWork connection lost");
            shutdown.cancel();
            break;
        }

        // Skip this report while a long batch holds the session
        let Ok(session) = engine.get_session(Duration::from_secs(1)).await else {
            continue;
        };

        let rate = compute_hash_rate(
            session.hashes.saturating_sub(last_hashes),
            last_tick.elapsed(),
        );
        info!(
            "[EPOCH] Session: {} hashes, {} miniblocks, {}",
            format_hashes(session.hashes),
            session.miniblocks,
            format_hash_rate(rate)
        );

        last_hashes = session.hashes;
        last_tick = Instant::now();
    }
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}
