//! Headless Log Server
//!
//! Resolves and serves headless task logs: live from the workspace supervisor,
//! archived from the content service once the instance stopped.

use anyhow::Result;
use clap::Parser;
use headless_logs::{
    HeadlessLogResolver, HttpArchiveClient, HttpSupervisorClient, LogServer, LogServiceConfig,
    SqliteInstanceStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hlog-server")]
#[command(about = "Headless task log server")]
struct Args {
    /// TOML config file; environment variables are used when absent
    #[arg(short, long, env = "HEADLESS_LOG_CONFIG")]
    config: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long, env = "HEADLESS_LOG_LISTEN_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "HEADLESS_LOG_LISTEN_HOST")]
    host: Option<String>,

    /// Public base URL used in rendered log URLs (overrides config)
    #[arg(long, env = "HEADLESS_LOG_HOST_URL")]
    host_url: Option<String>,
}

fn load_config(args: &Args) -> Result<LogServiceConfig> {
    let mut config = match &args.config {
        Some(path) => LogServiceConfig::from_file(path)?,
        None => LogServiceConfig::from_env(),
    };
    if let Some(port) = args.port {
        config.listen_port = port;
    }
    if let Some(host) = &args.host {
        config.listen_host = host.clone();
    }
    if let Some(host_url) = &args.host_url {
        config.host_url = host_url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("headless_logs=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("Starting headless log server");
    info!("  Host URL: {}", config.host_url());
    info!("  Instance store: {}", config.database_path);
    info!("  Content service: {}", config.content_service_url);
    info!("  Resolve timeout: {:?}", config.resolve_timeout());

    let instances = Arc::new(SqliteInstanceStore::open(Path::new(&config.database_path))?);
    let supervisor = Arc::new(HttpSupervisorClient::new(Duration::from_secs(
        config.supervisor_request_timeout_secs,
    )));
    let archive = Arc::new(HttpArchiveClient::new(&config.content_service_url));
    let resolver = Arc::new(HeadlessLogResolver::new(
        &config,
        instances,
        supervisor,
        archive,
    ));

    let server = LogServer::new(&config, resolver);

    // Start server (blocks until shutdown)
    server.start().await?;

    Ok(())
}
