use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use filedrop::config::{self, Config};
use filedrop::handlers::{ListingTemplate, Service};
use filedrop::server::Server;
use filedrop::storage::DirStore;

#[derive(Debug, Parser)]
#[command(name = "filedrop", version, about = "Upload, list, download and delete files over HTTP")]
struct Cli {
    /// YAML config file (default: ./config.yaml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and LISTEN)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory that holds the shared files
    #[arg(short = 'd', long)]
    upload_dir: Option<PathBuf>,

    /// HTML template for the listing page
    #[arg(short, long)]
    template: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    let store = DirStore::new(&cfg.upload_dir)
        .with_context(|| format!("cannot use upload directory {}", cfg.upload_dir.display()))?;
    let template = ListingTemplate::load(cfg.template.as_deref());

    let mut server = Server::bind(&cfg, Service::new(store, template)).context("failed to start server")?;
    server.run().context("event loop failed")?;
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = config::load_config(cli.config.as_deref(), Path::new(config::DEFAULT_CONFIG_PATH))?;
    config::apply_env(&mut cfg)?;

    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(dir) = &cli.upload_dir {
        cfg.upload_dir = dir.clone();
    }
    if let Some(template) = &cli.template {
        cfg.template = Some(template.clone());
    }
    Ok(cfg)
}
