mod api;
mod cache;
mod config;
mod connectivity;
mod dashboard;
mod engine;
mod error;
mod model;
mod poller;
mod resolver;
mod session;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Stable logical path of the reading feed, used for fuzzy cache lookups
/// when the base URL differs between environments.
const FEED_LOGICAL_PATH: &str = "/api/data/";

#[derive(Parser, Debug)]
#[command(name = "sensorsync")]
#[command(about = "Offline-resilient synchronization client for a sensor dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/sensorsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the cache generation (a deploy-time version bump)
  #[arg(long)]
  cache_version: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(version) = args.cache_version {
    config.cache.version = version;
  }

  let cache_dir = config.cache_dir()?;
  let _log_guard = init_tracing(&cache_dir)?;

  let client = api::ApiClient::new(&config)?;
  let feed_url = client.feed_url()?;

  let store = Arc::new(cache::VersionedStore::open(
    &cache_dir.join("cache.db"),
    &config.cache.version,
    config.cache.asset_store_limit,
  )?);
  let fallback = Arc::new(cache::FallbackStore::open(&cache_dir.join("fallback.db"))?);

  let resolver = resolver::TieredResolver::new(
    store.clone(),
    fallback,
    feed_url.clone(),
    FEED_LOGICAL_PATH.to_string(),
    config.synthetic.clone(),
  );

  let session = session::SessionManager::new({
    let client = client.clone();
    move || {
      let client = client.clone();
      async move { client.login().await }
    }
  });

  let engine = Arc::new(engine::SyncEngine::new(resolver, session, {
    let client = client.clone();
    move |token| {
      let client = client.clone();
      async move { client.fetch_readings(&token).await }
    }
  }));

  // The lifecycle runs concurrently with the foreground loop; the readiness
  // gate holds the first poll cycle until activation completes.
  let (ready_tx, ready_rx) = watch::channel(false);
  let lifecycle = cache::LifecycleManager::new(
    store.clone(),
    config.synthetic.clone(),
    feed_url.clone(),
  );
  let install_client = client.clone();
  tokio::spawn(async move {
    let outcome = lifecycle
      .run(ready_tx, move || async move {
        let token = install_client.login().await?;
        install_client.fetch_readings(&token).await
      })
      .await;
    if let Err(e) = outcome {
      error!(error = %e, "cache lifecycle failed");
    }
  });

  let connectivity = connectivity::spawn_probe(
    client.clone(),
    Duration::from_secs(config.probe_interval_secs),
  );

  let (poller, handle) = poller::Poller::new(
    Duration::from_secs(config.poll_interval_secs),
    connectivity,
    {
      let engine = engine.clone();
      move |online| {
        let engine = engine.clone();
        async move { engine.cycle(online).await }
      }
    },
  );
  let poller_task = tokio::spawn(poller.run(ready_rx));
  let dashboard_task = tokio::spawn(dashboard::run(handle.results.clone()));

  info!(feed = %feed_url, version = %config.cache.version, "sensorsync started");

  tokio::signal::ctrl_c().await?;
  info!("shutting down");

  handle.stop();
  poller_task.await?;
  // The poller dropped its publish side, so the dashboard loop drains out.
  let _ = dashboard_task.await;

  Ok(())
}

fn init_tracing(dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let file_appender = tracing_appender::rolling::daily(dir.join("logs"), "sensorsync.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
