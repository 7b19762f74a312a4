//! flowd - runs a flow configuration
//!
//! The agent:
//! - loads the configuration file into a component graph and runs it
//! - reloads the file when its content changes, keeping the running graph
//!   when the new content is rejected
//! - serves the debug API (node list, node detail, component handlers)

use std::path::PathBuf;

use clap::Parser;
use flow_engine::{testcomponents, ComponentRegistry, Flow, FlowOptions};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod reload;
mod server;

use config::AgentConfig;
use error::{AgentError, AgentResult};
use server::{create_router, AppState};

/// flowd CLI
#[derive(Parser)]
#[command(name = "flowd")]
#[command(about = "Run a flow configuration", long_about = None)]
#[command(version)]
struct Cli {
    /// Flow configuration file to run
    path: PathBuf,

    /// Agent configuration file
    #[arg(short, long, env = "FLOW_AGENT_CONFIG")]
    config: Option<String>,

    /// Listen address of the debug API
    #[arg(short, long, env = "FLOW_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "FLOW_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "FLOW_LOG_JSON")]
    json: bool,

    /// Do not reload the configuration file on change
    #[arg(long)]
    no_reload: bool,
}

#[tokio::main]
async fn main() -> AgentResult<()> {
    let cli = Cli::parse();

    let mut config =
        AgentConfig::load(cli.config.as_deref()).map_err(|e| AgentError::Config(e.to_string()))?;
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| AgentError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.json;
    config.reload.enabled &= !cli.no_reload;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut components = ComponentRegistry::new();
    testcomponents::register_all(&mut components)
        .map_err(|e| AgentError::Config(e.to_string()))?;
    let flow = Flow::new(FlowOptions::new(components).with_config(config.flow.clone()));

    let revision = reload::load_file(&flow, &cli.path)
        .await
        .map_err(|e| AgentError::Config(format!("{e:#}")))?;
    tracing::info!(path = %cli.path.display(), revision = %revision, "Configuration loaded");

    let cancel = CancellationToken::new();
    let runner = tokio::spawn({
        let flow = flow.clone();
        let cancel = cancel.clone();
        async move { flow.run(cancel).await }
    });

    if config.reload.enabled {
        tokio::spawn(reload::watch_file(
            flow.clone(),
            cli.path.clone(),
            revision,
            config.reload.poll_interval(),
            cancel.clone(),
        ));
    }

    let app = create_router(AppState::new(flow), config.server.enable_cors);
    let listener = TcpListener::bind(config.server.listen_addr).await?;
    tracing::info!("flowd listening on {}", config.server.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AgentError::Server(e.to_string()))?;

    tracing::info!("flowd shutting down");
    cancel.cancel();
    runner
        .await
        .map_err(|e| AgentError::Server(format!("flow task failed: {e}")))??;
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
