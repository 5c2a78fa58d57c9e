//! provider-coder - reconciles Workspace resources against a Coder deployment

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{self, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, ResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use provider_coder::controller::{error_policy, reconcile, Context, ControllerConfig};
use provider_coder::crd::{self, Workspace};
use provider_coder::retry::{retry_with_backoff, RetryConfig};
use provider_coder::FIELD_MANAGER;

/// provider-coder - Kubernetes controller for Coder workspaces
#[derive(Parser, Debug)]
#[command(name = "provider-coder", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests as YAML and exit
    #[arg(long)]
    crd: bool,

    /// Seconds between polls of an in-sync Workspace
    #[arg(long, env = "PROVIDER_POLL_INTERVAL_SECS", default_value = "60")]
    poll_interval_secs: u64,

    /// Timeout for each Coder API request in seconds
    #[arg(long, env = "PROVIDER_REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    /// Workspaces reconciled at the same time
    #[arg(long, env = "PROVIDER_MAX_CONCURRENT_RECONCILES", default_value = "10")]
    max_concurrent_reconciles: u16,

    /// Do not install CRDs on startup
    #[arg(long)]
    skip_crd_install: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_concurrent_reconciles: self.max_concurrent_reconciles,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if cli.crd {
        let docs = crd::all()
            .iter()
            .map(serde_yaml::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRDs: {}", e))?;
        println!("{}", docs.join("---\n"));
        return Ok(());
    }

    run_controller(cli).await
}

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

/// Server-side apply every CRD this provider serves
///
/// CRD versions always match the running binary.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for definition in crd::all() {
        let name = definition.name_any();
        tracing::info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&definition))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All provider CRDs installed/updated");
    Ok(())
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("Starting provider-coder controller");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if cli.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        retry_with_backoff(
            &RetryConfig::default(),
            "ensure_crds_installed",
            |_| true,
            || ensure_crds_installed(&client),
        )
        .await?;
    }

    let config = cli.controller_config();
    let concurrency = config.max_concurrent_reconciles;
    tracing::info!(
        poll_interval = ?config.poll_interval,
        request_timeout = ?config.request_timeout,
        concurrency,
        "Controller configured"
    );

    let ctx = Arc::new(Context::builder(client.clone()).config(config).build());
    let workspaces: Api<Workspace> = Api::all(client);

    Controller::new(workspaces, WatcherConfig::default())
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    tracing::debug!(
                        workspace = %object.name,
                        ?action,
                        "Workspace reconciliation completed"
                    );
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Workspace reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("provider-coder controller shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_controller_config() {
        let cli = Cli::parse_from(["provider-coder"]);
        assert_eq!(cli.controller_config(), ControllerConfig::default());
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(!cli.crd);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "provider-coder",
            "--poll-interval-secs",
            "5",
            "--max-concurrent-reconciles",
            "2",
            "--log-format",
            "json",
        ]);
        let config = cli.controller_config();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_concurrent_reconciles, 2);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
