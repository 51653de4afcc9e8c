//! # Aqua Operator
//!
//! A Kubernetes operator that deploys and keeps converged a multi-tier
//! security platform from custom resources.
//!
//! ## Overview
//!
//! The operator watches seven custom resource kinds across all namespaces:
//!
//! 1. **AquaCsp** - The composite. Owns RBAC and shared secrets, and composes the tiers below
//! 2. **AquaDatabase**, **AquaGateway**, **AquaServer** - Platform tiers, brought up in dependency order
//! 3. **AquaEnforcer** - Node agent DaemonSet, created once the gateway is running
//! 4. **AquaKubeEnforcer** - Admission controller, composes **AquaStarboard**
//!
//! Every pass is level-triggered: desired children are synthesized from the
//! entity spec, compared field by field with the live objects and written only
//! when they drift.
//!
//! ## Usage
//!
//! Configuration comes from environment variables (see [`aqua_operator::config`]).
//! The flags below override them.

use anyhow::{Context, Result};
use aqua_operator::config::create_shared_config;
use aqua_operator::observability::logging::init_tracing;
use aqua_operator::runtime::{initialize, run_controllers};
use clap::Parser;
use tracing::info;

/// Aqua platform operator
#[derive(Parser, Debug)]
#[command(name = "aqua-operator", version, about, long_about = None)]
struct Cli {
    /// Log level for the operator's own targets
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format (`json` or `text`)
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<String>,

    /// Port for `/metrics`, `/healthz` and `/readyz`
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Upper bound on concurrent reconciles per entity kind
    #[arg(long, env = "MAX_CONCURRENT_RECONCILIATIONS")]
    max_concurrent_reconciliations: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (controller_config, server_config) = create_shared_config();

    {
        let mut config = controller_config.write().await;
        if let Some(level) = cli.log_level {
            config.log_level = level;
        }
        if let Some(format) = cli.log_format {
            config.log_format = format;
        }
        if let Some(concurrency) = cli.max_concurrent_reconciliations {
            config.max_concurrent_reconciliations = concurrency;
        }
        init_tracing(&config.log_level, &config.log_format, config.log_enable_color)?;
    }
    if let Some(port) = cli.metrics_port {
        server_config.write().await.metrics_port = port;
    }

    let result = initialize(controller_config, server_config)
        .await
        .context("Failed to initialize operator")?;

    run_controllers(
        result.context,
        result.server_state,
        result.controller_config,
    )
    .await;

    info!("Operator stopped");
    Ok(())
}
