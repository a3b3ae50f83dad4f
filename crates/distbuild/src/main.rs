//! distbuild - master/worker binary wiring the RPC proxy connection manager
//! (`distproto`) to content-addressed storage (`cas`) and configuration
//! (`distconf`).
//!
//! Two roles share one binary, selected by subcommand:
//!
//! - `master`: binds a ROUTER socket and dispatches verified requests from
//!   attached workers (§4.F).
//! - `worker`: builds a `ConnectionManager` against a master endpoint,
//!   starts its heartbeat supervisor, attaches, then stays alive issuing
//!   periodic notifications until interrupted (§4.A-§4.D).

mod handlers;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use distconf::DistConfig;
use distproto::manager::{CallOptions, CallOutcome, ConnectionManager};
use distproto::methods::{self, AttachRequest, NotifyRequest};
use distproto::server::ServerDispatcher;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (overrides ./distbuild.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run the master: bind the ROUTER socket and dispatch worker calls.
    Master,
    /// Run a worker: connect to a master and attach.
    Worker {
        /// Master host to dial.
        #[arg(long)]
        host: String,
        /// Master port to dial.
        #[arg(long)]
        port: u16,
        /// Display name reported in the Attach request.
        #[arg(long, default_value = "worker")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DistConfig::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    telemetry::init(&config.infra.telemetry.log_level, &config.infra.telemetry.otlp_endpoint)
        .context("failed to initialize telemetry")?;

    match cli.role {
        Role::Master => run_master(config).await,
        Role::Worker { host, port, name } => run_worker(config, host, port, name).await,
    }
}

async fn run_master(config: DistConfig) -> Result<()> {
    std::fs::create_dir_all(&config.infra.paths.cas_dir)
        .context("failed to create CAS directory")?;
    let _cas = cas::FileStore::at_path(&config.infra.paths.cas_dir)
        .context("failed to open content-addressable store")?;
    info!(path = %config.infra.paths.cas_dir.display(), "CAS ready");

    let mut dispatcher = ServerDispatcher::new(config.runtime.build_id.clone());
    dispatcher.register("Attach", Arc::new(handlers::AttachHandler::new()));
    dispatcher.register("ExecutePips", Arc::new(handlers::ExecutePipsHandler));
    dispatcher.register("Notify", Arc::new(handlers::NotifyHandler));

    info!(endpoint = %config.infra.bind.zmq_router, build_id = %config.runtime.build_id, "starting master dispatcher");
    dispatcher
        .serve(&config.infra.bind.zmq_router)
        .await
        .context("dispatcher terminated")
}

async fn run_worker(config: DistConfig, host: String, port: u16, name: String) -> Result<()> {
    let manager = ConnectionManager::new(name.clone(), host.clone(), port, &config.runtime);
    manager.start().await.context("failed to start connection manager")?;
    info!(host, port, "worker connection manager started");

    let attach = methods::attach(
        &manager,
        AttachRequest {
            build_id: config.runtime.build_id.clone(),
            worker_name: name.clone(),
            worker_capabilities: vec!["execute_pips".to_string()],
        },
        CallOptions::default(),
    )
    .await
    .context("attach call failed")?;

    match attach {
        CallOutcome::Succeeded { response, .. } => {
            info!(accepted = response.accepted, "attached to master");
        }
        CallOutcome::Cancelled { .. } => {
            warn!("attach was cancelled before completing");
            return Ok(());
        }
        CallOutcome::Failed(reason) => {
            warn!(%reason, "attach failed");
            return Ok(());
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = methods::notify(
                    &manager,
                    NotifyRequest {
                        event: "heartbeat_demo".to_string(),
                        detail: format!("worker {name} still alive"),
                    },
                    CallOptions::default(),
                )
                .await;
                if let Err(e) = outcome {
                    warn!(error = %e, "notify call failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down worker");
                break;
            }
        }
    }

    manager.dispose().await;
    Ok(())
}
