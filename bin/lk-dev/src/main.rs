//! Latchkey Development Binary
//!
//! Everything needed to watch an election on one machine:
//! - In-process coordination ensemble
//! - Status port answering `stat`, polled for readiness
//! - N election services competing in one scene
//! - Leadership hand-offs logged as they happen

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use uuid::Uuid;

use lk_config::{AppConfig, ConfigLoader};
use lk_coord::{
    ClientOptions, ConnectionRetry, ElectionScope, LeadershipStatus, MemoryEnsemble,
    StatusListener, StatusServer,
};
use lk_election::{ElectionService, ElectionSettings, RetryPolicy};
use lk_probe::ReadinessConfig;

/// Latchkey Development Server
#[derive(Parser, Debug)]
#[command(name = "lk-dev")]
#[command(about = "Latchkey development binary - in-process ensemble and competing candidates")]
struct Args {
    /// Config file path
    #[arg(long, env = "LATCHKEY_CONFIG")]
    config: Option<String>,

    /// Number of candidates (overrides config)
    #[arg(long, env = "LATCHKEY_DEV_CANDIDATES")]
    candidates: Option<usize>,

    /// Election scene (overrides config)
    #[arg(long, env = "LATCHKEY_SCENE")]
    scene: Option<String>,

    /// Status port, 0 picks a free one (overrides config)
    #[arg(long, env = "LATCHKEY_DEV_STATUS_PORT")]
    status_port: Option<u16>,

    /// Expire the current leader's session every N seconds to exercise failover
    #[arg(long, env = "LATCHKEY_DEV_CHURN_SECS")]
    churn_secs: Option<u64>,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_config: bool,
}

struct Candidate {
    service: ElectionService,
    status: Arc<StatusListener>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (JSON if LOG_FORMAT=json, text otherwise)
    lk_common::init_logging("lk-dev");

    let args = Args::parse();

    if args.print_config {
        println!("{}", AppConfig::example_toml());
        return Ok(());
    }

    let loader = match &args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;
    if let Some(candidates) = args.candidates {
        config.dev.candidates = candidates;
    }
    if let Some(scene) = args.scene {
        config.election.scene = scene;
    }
    if let Some(port) = args.status_port {
        config.dev.status_port = port;
    }
    config.validate()?;

    info!(
        candidates = config.dev.candidates,
        scene = %config.election.scene,
        "Starting Latchkey dev server"
    );

    // Ensemble and its status port
    let ensemble = MemoryEnsemble::new();
    let status_server = StatusServer::bind(
        ensemble.clone(),
        SocketAddr::from(([127, 0, 0, 1], config.dev.status_port)),
    )
    .await?;
    let port = status_server.local_addr().port();

    let readiness = ReadinessConfig::default()
        .with_timeout(Duration::from_millis(config.probe.ready_timeout_ms))
        .with_poll_interval(Duration::from_millis(config.probe.poll_interval_ms));
    lk_probe::wait_until_ready("127.0.0.1", port, readiness).await?;
    let report = lk_probe::get_status_lines("127.0.0.1", port).await?;
    let version = report.first().map(String::as_str).unwrap_or_default();
    info!(port, version = %version, "Ensemble ready");

    // Candidates
    let connect_string = format!("127.0.0.1:{port}");
    let client_options = ClientOptions {
        session_timeout: config.coordination.session_timeout(),
        connection_timeout: config.coordination.connection_timeout(),
        retry: ConnectionRetry::new(
            config.coordination.base_sleep(),
            config.coordination.max_retries,
        ),
    };
    let mut retry = RetryPolicy::forever(config.election.retry_delay());
    if let Some(jitter) = config.election.retry_jitter() {
        retry = retry.with_jitter(jitter);
    }

    let mut candidates = Vec::with_capacity(config.dev.candidates);
    for index in 0..config.dev.candidates {
        let candidate_id = if config.election.candidate_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{}-{index}", config.election.candidate_id)
        };

        let status = Arc::new(StatusListener::new(candidate_id.clone()));
        let settings = ElectionSettings::new(connect_string.clone(), config.election.scene.clone())
            .with_candidate_id(candidate_id)
            .with_retry(retry)
            .with_client_options(client_options);
        let service = ElectionService::new(&ensemble, settings, status.clone())?;
        candidates.push(Candidate { service, status });
    }

    for candidate in &candidates {
        candidate.service.wait_until_active().await?;
    }
    log_leader(&candidates);

    let scope = ElectionScope::new(config.election.scene.clone())?;
    let churn = args.churn_secs.map(|secs| {
        let ensemble = ensemble.clone();
        tokio::spawn(churn_leader(ensemble, scope, Duration::from_secs(secs)))
    });

    info!("Press Ctrl+C to shutdown");
    shutdown_signal().await;
    info!("Shutdown signal received, closing candidates...");

    if let Some(churn) = churn {
        churn.abort();
    }
    for candidate in &candidates {
        candidate.service.close().await;
    }
    status_server.shutdown().await;

    info!("Latchkey dev server shutdown complete");
    Ok(())
}

fn log_leader(candidates: &[Candidate]) {
    let leaders: Vec<&str> = candidates
        .iter()
        .filter(|c| c.status.status() == LeadershipStatus::Leader)
        .map(|c| c.service.candidate_id())
        .collect();

    match leaders.as_slice() {
        [leader] => info!(leader = %leader, "Election settled"),
        [] => warn!("No leader elected yet"),
        many => warn!(leaders = ?many, "More than one candidate reports leadership"),
    }
}

/// Periodically end the session owning the lowest candidacy node
async fn churn_leader(ensemble: MemoryEnsemble, scope: ElectionScope, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        interval.tick().await;
        match ensemble.leader_session(&scope) {
            Some(session) => {
                info!(session, "Expiring leader session");
                ensemble.close_session(session);
            }
            None => warn!("No leader session to expire"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
