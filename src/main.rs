use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mongo_labeler::config::{
    DEFAULT_MONGO_PORT, DEFAULT_NAMESPACE, DEFAULT_POD_SELECTOR, DEFAULT_PROBE_TIMEOUT_SECS,
    DEFAULT_UPDATE_PERIOD_SECS,
};
use mongo_labeler::labeler::labels::DEFAULT_ROLE_LABEL;
use mongo_labeler::labeler::{
    KubeDiscoverer, KubeLabelReconciler, Labeler, MongoProber, SleepTicker, UnknownRolePolicy,
};
use mongo_labeler::{KubeClientOptions, LabelerConfig};
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Checking mongo pods and labelling them with primary/secondary accordingly
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Probe members and log the labels that would be applied, without patching
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Namespace to search for replica set pods
    #[arg(long, env = "LABELER_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Label selector identifying replica set pods
    #[arg(long, env = "POD_SELECTOR", default_value = DEFAULT_POD_SELECTOR)]
    pod_selector: String,

    /// Kubeconfig file; in-cluster credentials are used when absent
    #[arg(long, env = "KUBECONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Use the pod's service account credentials
    #[arg(long, env = "INCLUSTER_CONFIG", conflicts_with = "config_file")]
    incluster_config: bool,

    /// Disable TLS certificate verification towards the API server
    #[arg(long, env = "INSECURE_SKIP_TLS_VERIFY")]
    insecure_skip_tls_verify: bool,

    /// Log at debug level
    #[arg(long, env = "VERBOSE")]
    verbose: bool,

    /// Seconds between reconciliation cycles
    #[arg(long, env = "UPDATE_PERIOD", default_value_t = DEFAULT_UPDATE_PERIOD_SECS)]
    update_period: u64,

    /// Port MongoDB listens on in every member pod
    #[arg(long, env = "MONGO_PORT", default_value_t = DEFAULT_MONGO_PORT)]
    mongo_port: u16,

    /// Seconds allowed for probing a single member
    #[arg(long, env = "PROBE_TIMEOUT", default_value_t = DEFAULT_PROBE_TIMEOUT_SECS)]
    probe_timeout: u64,

    /// Label key carrying the replication role
    #[arg(long, env = "ROLE_LABEL", default_value = DEFAULT_ROLE_LABEL)]
    role_label: String,

    /// Treatment of members whose role could not be determined
    #[arg(long, env = "UNKNOWN_ROLE_POLICY", value_enum, default_value_t = UnknownRolePolicy::Skip)]
    unknown_role_policy: UnknownRolePolicy,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Address of the metrics and health endpoint
    #[cfg(feature = "metrics")]
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: std::net::SocketAddr,
}

impl Args {
    fn labeler_config(&self) -> LabelerConfig {
        LabelerConfig {
            namespace: self.namespace.clone(),
            pod_selector: self.pod_selector.clone(),
            update_period: Duration::from_secs(self.update_period),
            dry_run: self.dry_run,
            mongo_port: self.mongo_port,
            probe_timeout: Duration::from_secs(self.probe_timeout),
            role_label: self.role_label.clone(),
            unknown_role_policy: self.unknown_role_policy,
        }
    }

    fn kube_client_options(&self) -> KubeClientOptions {
        KubeClientOptions {
            config_file: if self.incluster_config {
                None
            } else {
                self.config_file.clone()
            },
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.log_json);

    info!(
        "Starting mongo replica labeler v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Dry run: {}", args.dry_run);

    let config = args.labeler_config();
    config.validate().context("invalid configuration")?;

    let client = args
        .kube_client_options()
        .build_client()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let discoverer = Arc::new(KubeDiscoverer::new(client.clone(), config.mongo_port));
    discoverer
        .preflight(&config.namespace, &config.pod_selector)
        .await
        .context("startup check against the Kubernetes API failed")?;

    #[cfg(feature = "metrics")]
    {
        let addr = args.metrics_addr;
        tokio::spawn(async move {
            if let Err(e) = mongo_labeler::server::run_server(addr).await {
                tracing::error!("Metrics server error: {:?}", e);
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let labeler = Labeler::new(
        config.clone(),
        discoverer,
        Arc::new(MongoProber::new(config.probe_timeout)),
        Arc::new(KubeLabelReconciler::new(client)),
    );
    let mut ticker = SleepTicker::new(config.update_period);

    labeler.run(&mut ticker, shutdown_rx).await?;
    Ok(())
}
