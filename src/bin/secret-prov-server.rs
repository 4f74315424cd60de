use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use attested_secret_prov::{MockVerifier, ProvisioningServer, ServerConfig, ServerIdentity};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "secret-prov-server",
    about = "Provision a wrapping key to attested enclaves"
)]
struct Args {
    /// Path to the TOML configuration file (required; holds the policy)
    #[arg(long, default_value = "secret-prov.toml")]
    config: PathBuf,

    /// Override the configured listening port
    #[arg(long)]
    port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a server identity at the configured cert/key paths
    Keygen,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    ServerConfig::load_with_overrides(&args.config, args.port)
        .with_context(|| format!("loading {}", args.config.display()))
}

fn keygen(config: &ServerConfig) -> Result<()> {
    let server = &config.server;
    let identity = ServerIdentity::generate();
    identity
        .write(&server.cert_path, &server.key_path)
        .context("writing server identity")?;
    tracing::info!(
        cert = %server.cert_path.display(),
        key = %server.key_path.display(),
        public_key = %hex::encode(identity.public_key()),
        "server identity generated"
    );
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    if let Some(Command::Keygen) = args.command {
        return keygen(&config);
    }

    tracing::warn!("using mock quote verifier: quotes are NOT cryptographically verified");
    let server = ProvisioningServer::start(&config, Arc::new(MockVerifier::new()))
        .await
        .context("server startup failed")?;

    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        })
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_json);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
