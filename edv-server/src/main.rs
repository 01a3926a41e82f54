use anyhow::Result;
use clap::Parser;
use edv::config::{default_config_path, Config, ObservabilityConfig};
use edv::{api::ApiServer, VaultCollection};
use edv_storage::EdvProvider;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "edv-server")]
#[command(about = "Encrypted Data Vault server")]
#[command(version)]
struct Args {
    /// Configuration file path (default: ~/.edv/config.toml)
    #[arg(short, long, env = "EDV_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to, overrides server.bind_addr
    #[arg(long)]
    bind_addr: Option<String>,

    /// Storage backend (memory or sqlite), overrides storage.backend
    #[arg(long)]
    backend: Option<String>,
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if observability.log_format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(default_config_path);
    let mut config = Config::load_or_create(&config_path)?;
    if let Some(addr) = args.bind_addr {
        config.server.bind_addr = addr;
    }
    if let Some(backend) = args.backend.as_deref() {
        config.set_backend(backend)?;
    }

    init_tracing(&config.observability);
    tracing::info!("Config file: {}", config_path.display());

    let provider = config.create_provider()?;
    tracing::info!("Using {} storage", provider.backend_name());

    let collection = Arc::new(VaultCollection::new(provider).await?);

    let mut server = ApiServer::with_config(collection, config.server.clone());
    if config.observability.metrics_enabled {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
        server = server.with_metrics(handle);
    }

    server.serve().await?;

    Ok(())
}
