use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use xns_cache::k8s::cache::{CacheConfig, CacheRegistry, KubeSourceProvider, LabelSelector, ResourceId};
use xns_cache::k8s::{USER_AGENT, client};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace to watch; repeat for several, "" for all namespaces
    #[arg(short, long = "namespace", required = true)]
    namespaces: Vec<String>,

    /// API group of the resource, empty for the core group
    #[arg(short, long, default_value = "")]
    group: String,

    /// API version of the resource
    #[arg(short = 'v', long = "api-version", default_value = "v1")]
    api_version: String,

    /// Plural resource name, e.g. services
    #[arg(short, long)]
    resource: String,

    /// Treat the resource as cluster-scoped
    #[arg(long)]
    cluster: bool,

    /// Seconds to wait for the caches to sync
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();
    let client = client::new(Some(USER_AGENT)).await?;
    let registry = CacheRegistry::new(
        Arc::new(KubeSourceProvider::new(client)),
        CacheConfig::from_env(),
        args.namespaces,
    )?;

    let resource = ResourceId::new(args.group, args.api_version, args.resource);
    let cache = registry.for_resource(&resource, !args.cluster);

    let stop = CancellationToken::new();
    registry.start(&stop)?;

    let deadline = stop.child_token();
    let timer = deadline.clone();
    let timeout = Duration::from_secs(args.timeout);
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        timer.cancel();
    });

    let synced = registry.wait_for_cache_sync(&deadline).await;
    if synced.values().any(|ok| !ok) {
        warn!("Not every cache synced within {}s: {:?}", args.timeout, synced);
    }

    let mut objects: Vec<_> = cache
        .list(&LabelSelector::new())
        .iter()
        .map(|obj| {
            let namespace = obj.metadata.namespace.clone().unwrap_or_default();
            let name = obj.metadata.name.clone().unwrap_or_default();
            (namespace, name)
        })
        .collect();
    objects.sort();

    for (namespace, name) in &objects {
        if namespace.is_empty() {
            println!("{name}");
        } else {
            println!("{namespace}/{name}");
        }
    }
    info!("{} {} cached", objects.len(), resource);

    stop.cancel();
    Ok(())
}
