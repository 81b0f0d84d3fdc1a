//! Ember CLI library.

pub mod http;
pub mod preload;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ember_core::EnvInputs;
use ember_server::{BaseImage, ImageRegistry, IsoInserter, Nmstatectl, RamdiskInserter};
use tracing::info;
use url::Url;

/// Mounted fallback when the pull secret is not in the environment.
const PULL_SECRET_FILE: &str = "/run/secrets/pull-secret";

#[derive(Parser, Debug)]
#[command(name = "ember", version, about = "Serves customized boot images over HTTP")]
pub struct Cli {
    /// Address the image server listens on
    #[arg(long, default_value = "0.0.0.0:8084")]
    pub images_bind_addr: String,

    /// Base URL under which served images are reachable from machines
    #[arg(long, default_value = "http://127.0.0.1:8084")]
    pub images_publish_addr: String,

    /// Directory of network state YAML files to serve statically
    #[arg(long)]
    pub network_state_dir: Option<std::path::PathBuf>,
}

pub async fn run(cli: Cli) -> Result<()> {
    info!(version = ember_core::VERSION, "starting ember");

    let mut inputs = EnvInputs::from_env()?;
    if inputs.agent_pull_secret.is_empty() {
        if let Ok(secret) = std::fs::read_to_string(PULL_SECRET_FILE) {
            inputs.agent_pull_secret = secret.trim().to_string();
        }
    }

    let publish_url = Url::parse(&cli.images_publish_addr)
        .with_context(|| format!("invalid publish address {}", cli.images_publish_addr))?;

    let registry = Arc::new(ImageRegistry::new(
        BaseImage::new(&inputs.deploy_iso, Arc::new(IsoInserter)),
        BaseImage::new(&inputs.deploy_initrd, Arc::new(RamdiskInserter)),
        publish_url,
    ));

    if let Some(dir) = &cli.network_state_dir {
        preload::preload_directory(&registry, &inputs, &Nmstatectl, dir)?;
    }

    let app = http::router(registry);
    let listener = tokio::net::TcpListener::bind(&cli.images_bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", cli.images_bind_addr))?;
    info!(addr = %cli.images_bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("image server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        Err(_) => {
            let _ = ctrl_c.await;
            info!("received SIGINT");
        }
    }
}
