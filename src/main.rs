//! Load balancer membership manager.
//!
//! Keeps external load balancers in line with the desired membership stored
//! in an etcd tree.
//!
//! # Architecture Overview
//!
//! ```text
//!   etcd tree                 ┌──────────────────────────────────────────────┐
//!   <root>/elb/...            │                 LB MANAGER                   │
//!   <root>/route53/...        │                                              │
//!   ──────────────────────────┼─▶ store ──▶ entry ──▶ manager                 │
//!     get (once) + watch      │   (etcd)   (parse)    (registry, apply)       │
//!                             │                          │                   │
//!                             │                          ▼ sync (coalesced)  │
//!                             │              ┌───────────┴───────────┐       │
//!                             │              ▼                       ▼       │
//!                             │         Elb worker             Route53 worker│
//!                             │              │                       │       │
//!                             │              │                  zone updater │
//!                             │              ▼                       ▼       │
//!   provider APIs ◀───────────┼──────── MembershipBackend   RecordSetBackend │
//!                             └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use lb_manager::config::loader::{check_config, load_config};
use lb_manager::config::ProviderMode;
use lb_manager::observability::{logging, metrics};
use lb_manager::provider::{AwsProvider, MemoryProvider, ProviderFactory};
use lb_manager::store::EtcdStore;
use lb_manager::{Manager, Shutdown};

#[derive(Parser)]
#[command(name = "lb-manager")]
#[command(about = "Syncs load balancer membership from etcd", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// etcd endpoint, overrides store.endpoint
    #[arg(long)]
    etcd_host: Option<String>,

    /// Root of the desired-state tree, overrides store.root
    #[arg(long)]
    config_path: Option<String>,

    /// Log level, overrides observability.log_level
    #[arg(long)]
    log_level: Option<String>,

    /// Provider mode (dry-run or aws), overrides provider.mode
    #[arg(long)]
    provider: Option<ProviderMode>,

    /// AWS access key, overrides provider.access_key_id
    #[arg(long)]
    aws_access_key: Option<String>,

    /// AWS secret key, overrides provider.secret_access_key
    #[arg(long)]
    aws_secret_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(endpoint) = cli.etcd_host {
        config.store.endpoint = endpoint;
    }
    if let Some(root) = cli.config_path {
        config.store.root = root;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if let Some(mode) = cli.provider {
        config.provider.mode = mode;
    }
    if let Some(key) = cli.aws_access_key {
        config.provider.access_key_id = key;
    }
    if let Some(secret) = cli.aws_secret_key {
        config.provider.secret_access_key = secret;
    }
    check_config(&config)?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!("lb-manager v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        endpoint = %config.store.endpoint,
        root = %config.store.normalized_root(),
        provider = ?config.provider.mode,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let store = EtcdStore::new(&config.store)?;
    let providers: Arc<dyn ProviderFactory> = match config.provider.mode {
        ProviderMode::Aws => Arc::new(AwsProvider::new(&config.provider, &config.route53)?),
        ProviderMode::DryRun => {
            tracing::warn!("Running with the dry-run provider, no load balancer will change");
            Arc::new(MemoryProvider::new())
        }
    };

    let shutdown = Arc::new(Shutdown::new());
    let rx = shutdown.subscribe();
    let signal = shutdown.clone();
    tokio::spawn(async move { signal.trigger_on_ctrl_c().await });

    let mut manager = Manager::new(config, Arc::new(store), providers);
    manager.run(rx).await;
    drop(manager);

    tracing::info!("Shutdown complete");
    Ok(())
}
