//! `mockd` — the command-line entry point for the mock service engine.
//! Owns the config-file loader and the cold-load path for startup mock
//! collections; everything else is `mockforge-http::Server` composed with
//! the default protocol factories.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use mockforge_core::{Mock, ServerConfiguration};
use mockforge_graphql::DynamicGraphQlFactory;
use mockforge_grpc::DynamicGrpcFactory;
use mockforge_http::{ProtocolFactories, Server};
use mockforge_mqtt::InProcessMqttFactory;
use mockforge_oauth::JwtOAuthFactory;
use mockforge_soap::XmlSoapFactory;
use mockforge_ws::GenericWsFactory;

#[derive(Parser)]
#[command(name = "mockd")]
#[command(about = "Multi-protocol mock service engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Log level passed to the `RUST_LOG`-style env filter when
    /// `RUST_LOG` itself is unset
    #[arg(short = 'v', long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine: HTTP/HTTPS listeners, protocol instances, and the
    /// management API.
    Serve(ServeArgs),
    /// Load and validate a mock collection file without starting a server.
    Validate {
        /// Path to a YAML or JSON file containing a list of mocks
        #[arg(long)]
        mocks: PathBuf,
    },
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Engine configuration file (YAML or JSON); falls back to
    /// [`ServerConfiguration::default`] when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mock collection file (YAML or JSON list of mocks) to cold-load
    /// before the listeners start
    #[arg(long)]
    mocks: Option<PathBuf>,

    /// Override the configured/default HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override the configured/default HTTPS port
    #[arg(long)]
    https_port: Option<u16>,

    /// Override the configured/default management API port
    #[arg(long)]
    management_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Validate { mocks } => validate(&mocks).await,
    }
}

fn init_tracing(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn load_config(path: Option<&PathBuf>) -> Result<ServerConfiguration> {
    let Some(path) = path else {
        return Ok(ServerConfiguration::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        ServerConfiguration::from_json(&raw).context("failed to parse JSON config")
    } else {
        ServerConfiguration::from_yaml(&raw).context("failed to parse YAML config")
    }
}

async fn load_mocks(path: &PathBuf) -> Result<Vec<Mock>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read mocks file {}", path.display()))?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&raw).context("failed to parse JSON mock collection")
    } else {
        serde_yaml::from_str(&raw).context("failed to parse YAML mock collection")
    }
}

fn default_factories() -> ProtocolFactories {
    ProtocolFactories {
        grpc: Some(Arc::new(DynamicGrpcFactory::default())),
        mqtt: Some(Arc::new(InProcessMqttFactory::default())),
        graphql: Some(Arc::new(DynamicGraphQlFactory)),
        oauth: Some(Arc::new(JwtOAuthFactory)),
        soap: Some(Arc::new(XmlSoapFactory)),
        ws: Some(Arc::new(GenericWsFactory::default())),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref()).await?;
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(port) = args.https_port {
        config.https_port = port;
    }
    if let Some(port) = args.management_port {
        config.management_port = port;
    }

    let server = Server::new(config, default_factories());
    server.start().await.context("failed to start server")?;
    info!("mockd engine started");

    if let Some(mocks_path) = &args.mocks {
        let mocks = load_mocks(mocks_path).await?;
        let count = mocks.len();
        server
            .mock_manager()
            .deploy(mocks, false)
            .await
            .context("failed to deploy startup mock collection")?;
        info!(count, "loaded mock collection");
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");
    server.stop().await.context("failed to stop server cleanly")?;
    Ok(())
}

async fn validate(path: &PathBuf) -> Result<()> {
    let mocks = load_mocks(path).await?;
    let mut failures = 0;
    for mut mock in mocks {
        let label = mock.name.clone().unwrap_or_else(|| mock.id.clone());
        match mock.validate_and_prepare() {
            Ok(()) => info!(mock = %label, "ok"),
            Err(e) => {
                failures += 1;
                warn!(mock = %label, error = %e, "invalid");
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} mock(s) failed validation");
    }
    Ok(())
}
