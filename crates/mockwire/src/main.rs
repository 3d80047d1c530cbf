use anyhow::Context;
use clap::Parser;
use mockwire::config::{load_mapping_files, Config};
use mockwire::proxy::HyperProxyClient;
use mockwire::server::serve;
use mockwire::{Mapping, MockServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mockwire", version, about = "Programmable HTTP test double")]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "MOCKWIRE_PORT")]
    port: Option<u16>,

    /// Path to a YAML or JSON config file
    #[arg(short, long, env = "MOCKWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "MOCKWIRE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, env = "MOCKWIRE_LOG_FORMAT", default_value = "text", value_parser = ["text", "json"])]
    log_format: String,
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if args.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    init_tracing(&args);

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.listen.port = port;
    }

    let client = HyperProxyClient::new(&config.client).context("Failed to build outbound client")?;
    let server = MockServer::new(config.settings.clone(), Arc::new(client))
        .context("Failed to register built-in mappings")?;

    let saved = load_mapping_files(&config.settings.mappings_dir)?;
    let models = config.mappings.iter().cloned().chain(saved);
    let mut registered = 0;
    for model in models {
        let guid = model.guid;
        let mapping = Mapping::try_from(model).with_context(|| format!("Invalid mapping {guid}"))?;
        if let Err(e) = server.add_or_update_mapping(mapping) {
            warn!("Skipping mapping {}: {}", guid, e);
            continue;
        }
        registered += 1;
    }
    info!("Registered {} mapping(s)", registered);

    let handle = serve(Arc::new(server), &config.listen.host, config.listen.port).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    handle.shutdown().await;
    Ok(())
}
