//! Quorum Daemon - Main entry point
//!
//! Follows the ledger, takes part in keygen and signing ceremonies through
//! the signature backend and submits the results.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quorum_core::{Hash, KeyId, PublicKey};
use quorum_daemon::broadcast;
use quorum_daemon::dispatch::{self, ceremony_starts, streamed_ceremonies};
use quorum_daemon::health::{HealthRequest, HealthResponse};
use quorum_daemon::{
    BackendMode, DaemonConfig, EventBus, GrpcBackend, HealthClient, HealthServer, Ledger,
    SignatureBackend, StatusHandle, StreamingManager, UnaryManager, UnixLedgerClient,
};

/// Key UID queried by the health check; the backend only has to answer
const HEALTH_CHECK_KEY_UID: &str = "quorum-health-check";

#[derive(Parser)]
#[command(name = "quorum-daemon")]
#[command(about = "Validator-side coordinator for threshold keygen and signing ceremonies", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator
    Start,

    /// Probe the signature backend and the running daemon
    HealthCheck {
        /// Do not query the signature backend
        #[arg(long)]
        skip_backend: bool,

        /// Do not query the daemon's health socket
        #[arg(long)]
        skip_daemon: bool,
    },

    /// Sign a 32-byte hash with the first share of a key
    Sign {
        /// Key ID
        key_id: String,

        /// Compressed public key of the share (hex)
        pub_key: String,

        /// Hash to sign (hex)
        hash: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quorum_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config()?;

    match cli.command {
        Commands::Start => start(config).await,
        Commands::HealthCheck {
            skip_backend,
            skip_daemon,
        } => health_check(config, skip_backend, skip_daemon).await,
        Commands::Sign {
            key_id,
            pub_key,
            hash,
        } => sign(config, key_id, pub_key, hash).await,
    }
}

/// Load the config, writing the default on first start
fn load_config() -> anyhow::Result<DaemonConfig> {
    let config_path = std::env::var("QUORUM_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| DaemonConfig::default_path());

    if config_path.exists() {
        return DaemonConfig::load(&config_path)
            .with_context(|| format!("failed to load config from {:?}", config_path));
    }

    let config = DaemonConfig::default();
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(&config_path)?;
    info!("Created default config at {:?}", config_path);
    Ok(config)
}

async fn start(config: DaemonConfig) -> anyhow::Result<()> {
    info!("Starting Quorum daemon v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;
    config.ensure_directories()?;

    let validator = config.validator()?;
    let ledger: Arc<dyn Ledger> = Arc::new(UnixLedgerClient::new(config.ledger_socket_path.clone()));
    let broadcaster = broadcast::pipeline(Arc::clone(&ledger), config.sender()?, &config.broadcast);
    let backend = Arc::new(GrpcBackend::connect(&config.backend).await?);

    let bus = EventBus::new(256);
    let (dispatch_handle, status) = match config.backend.mode {
        BackendMode::Unary => {
            let manager = Arc::new(UnaryManager::new(
                backend,
                broadcaster,
                validator.clone(),
                config.backend.rpc_timeout(),
            ));
            let status = StatusHandle::new(None);
            let subscription = bus.subscribe(ceremony_starts);
            let handle = tokio::spawn(dispatch::run_unary(manager, subscription, status.clone()));
            (handle, status)
        }
        BackendMode::Streaming => {
            let manager = Arc::new(StreamingManager::new(backend, broadcaster, validator.clone()));
            let status = StatusHandle::new(Some(Arc::clone(&manager)));
            let subscription = bus.subscribe(streamed_ceremonies);
            let handle =
                tokio::spawn(dispatch::run_streaming(manager, subscription, status.clone()));
            (handle, status)
        }
    };

    let health_server = HealthServer::new(config.health_socket_path.clone(), status.clone());
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            error!("Health socket error: {}", e);
        }
    });

    let feed_handle = tokio::spawn(dispatch::run_feed(
        ledger,
        bus,
        status,
        config.no_new_block_timeout(),
    ));

    info!(validator = %validator, mode = ?config.backend.mode, "Daemon started successfully");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = feed_handle => {
            result??;
            error!("Ledger feed exited unexpectedly");
        }
        _ = dispatch_handle => {
            error!("Dispatch loop exited unexpectedly");
        }
        _ = health_handle => {
            error!("Health socket exited unexpectedly");
        }
    }

    info!("Daemon shutting down");

    Ok(())
}

async fn health_check(
    config: DaemonConfig,
    skip_backend: bool,
    skip_daemon: bool,
) -> anyhow::Result<()> {
    let mut healthy = true;

    if !skip_backend {
        let presence = match GrpcBackend::connect(&config.backend).await {
            Ok(backend) => backend.key_presence(HEALTH_CHECK_KEY_UID).await,
            Err(e) => Err(e),
        };
        match presence {
            Ok(presence) if presence.is_healthy() => println!("backend: ok"),
            Ok(presence) => {
                println!("backend: unhealthy ({:?})", presence);
                healthy = false;
            }
            Err(e) => {
                println!("backend: unreachable ({})", e);
                healthy = false;
            }
        }
    }

    if !skip_daemon {
        let client = HealthClient::new(config.health_socket_path.clone());
        match client.request(&HealthRequest::Status).await {
            Ok(HealthResponse::Status(status)) => println!(
                "daemon: ok (height {}, {} keygen and {} sign sessions open)",
                status
                    .last_height
                    .map_or_else(|| "none".to_string(), |h| h.to_string()),
                status.open_keygen_sessions,
                status.open_sign_sessions
            ),
            Ok(other) => {
                println!("daemon: unexpected response {:?}", other);
                healthy = false;
            }
            Err(e) => {
                println!("daemon: {}", e);
                healthy = false;
            }
        }
    }

    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

async fn sign(
    config: DaemonConfig,
    key_id: String,
    pub_key: String,
    hash: String,
) -> anyhow::Result<()> {
    let key_id = KeyId::new(key_id);
    key_id.validate_basic()?;
    let pub_key = PublicKey::from_hex(&pub_key)?;
    let hash = Hash::from_hex(&hash)?;
    let validator = config.validator()?;

    let backend = GrpcBackend::connect(&config.backend).await?;
    let signature = backend
        .sign(&key_id.share_uid(0), hash.as_bytes(), &validator.to_hex(), &pub_key)
        .await?;
    pub_key
        .verify_hash(&hash, &signature)
        .context("backend returned a signature that does not verify")?;

    println!("{}", signature.to_hex());
    Ok(())
}
