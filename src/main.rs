// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tang_operator::config::Config;
use tang_operator::kubernetes::wait_for_tang_server_crd;
use tang_operator::reconcilers::TangServerReconciler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Tang operator");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: watch_namespace={}, exec_timeout={:?}",
        config.watch_namespace.as_deref().unwrap_or("all"),
        config.exec_timeout
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for TangServer CRD to become available...");
    wait_for_tang_server_crd(&client).await?;

    TangServerReconciler::new(client, config).run().await?;

    warn!("TangServer controller stopped unexpectedly");
    Ok(())
}
