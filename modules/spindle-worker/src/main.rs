use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use spindle_common::{telemetry, Config};
use spindle_crawler::AccountPool;
use spindle_graph::{CredentialStore, GraphStore, JobStore, MemoryStore};
use spindle_protocol::{ClientConfig, ProtocolClient, ProxyPool, SocialClient};
use spindle_worker::{PipelineConfig, SearchPipeline, SearchWorker};

#[derive(Debug, Parser)]
#[command(name = "spindle-worker", about = "Influence graph discovery worker")]
struct Args {
    /// Process at most one job, then exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env();
    telemetry::init_tracing(&config);
    config.log_redacted();

    // The in-memory store doubles as the credential source, seeded from the
    // environment. A durable deployment implements the same traits instead.
    let store = Arc::new(MemoryStore::new());
    store.set_credentials(config.credentials.clone()).await;
    store.set_proxies(config.proxy_urls.clone()).await;

    let credentials = store.load_active_credentials().await?;
    if credentials.is_empty() {
        bail!("no accounts configured, set SPINDLE_CREDENTIALS");
    }
    let proxy_urls = store.load_active_proxies().await?;

    let proxies = Arc::new(ProxyPool::new(proxy_urls, config.allow_direct));
    let client_config = ClientConfig {
        timeout: Duration::from_secs(config.request_timeout_secs),
        max_retries: config.max_retries,
        ..ClientConfig::default()
    };
    let clients: Vec<Arc<dyn SocialClient>> = credentials
        .into_iter()
        .map(|credential| {
            Arc::new(ProtocolClient::for_credential(
                credential,
                client_config.clone(),
                proxies.clone(),
            )) as Arc<dyn SocialClient>
        })
        .collect();
    let accounts = Arc::new(AccountPool::new(clients));

    let graph: Arc<dyn GraphStore> = store.clone();
    let jobs: Arc<dyn JobStore> = store.clone();

    let pipeline_config = PipelineConfig {
        max_followings_per_user: config.max_followings_per_user as u32,
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(SearchPipeline::new(
        accounts,
        graph,
        jobs.clone(),
        pipeline_config,
    ));
    let worker = Arc::new(SearchWorker::new(
        jobs,
        pipeline,
        Duration::from_secs(config.worker_poll_secs),
    ));

    if args.once {
        let processed = worker.run_once().await?;
        if !processed {
            tracing::info!("No pending jobs");
        }
        return Ok(());
    }

    let handle = worker.start();
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    handle.stop().await;
    Ok(())
}
