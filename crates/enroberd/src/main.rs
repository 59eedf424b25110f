//! enroberd — the Enrober daemon.
//!
//! Provisions environments (namespace + routing secret + hostnames) and
//! deployments over a REST API backed by the redb resource store.
//!
//! # Usage
//!
//! ```text
//! enroberd serve --config /etc/enrober/enrober.toml --port 9000
//! enroberd check-config --config /etc/enrober/enrober.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use enrober_core::{Enrober, EnroberConfig};
use enrober_state::StateStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "enroberd", about = "Enrober environment and deployment service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server.
    Serve {
        /// Path to enrober.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file and ENROBER_PORT).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the resource store.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        log_format: LogFormat,
    },
    /// Print the effective configuration as TOML.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,enroberd=debug,enrober=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            log_format,
        } => {
            init_tracing(log_format);
            let mut config = EnroberConfig::load(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = data_dir {
                config.store.data_dir = dir;
            }
            serve(config).await
        }
        Command::CheckConfig { config } => {
            let config = EnroberConfig::load(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn serve(config: EnroberConfig) -> anyhow::Result<()> {
    info!(
        hardened = config.profile.hardened,
        kvm = config.kvm.enabled,
        "Enrober daemon starting"
    );

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.store.data_dir)?;
    let db_path = config.store.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "resource store opened");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let prefix = config.server.api_prefix.clone();
    let enrober = Arc::new(Enrober::new(Arc::new(store), config));
    let router = enrober_api::build_router(enrober);

    info!(%addr, %prefix, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C, running until killed");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("Enrober daemon stopped");
    Ok(())
}
