//! Cache lifecycle: install-time pre-population and version activation.
//!
//! Runs concurrently with foreground polling. The readiness gate is flipped
//! only after activation completes, so no resolve call ever reads from a
//! store mid-rotation.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SyntheticConfig;
use crate::error::{SyncError, SyncResult};
use crate::model::{normalize, synthetic_series, RawReading};

use super::store::VersionedStore;

pub struct LifecycleManager {
  store: Arc<VersionedStore>,
  synthetic: SyntheticConfig,
  /// The primary resource key, i.e. the full feed URL.
  primary_key: String,
}

impl LifecycleManager {
  pub fn new(store: Arc<VersionedStore>, synthetic: SyntheticConfig, primary_key: String) -> Self {
    Self {
      store,
      synthetic,
      primary_key,
    }
  }

  /// Install then activate, flipping the readiness gate when done.
  ///
  /// `install_fetch` is one best-effort network fetch, bounded by the same
  /// timeout policy as runtime fetches (the HTTP client carries the bound).
  pub async fn run<F, Fut>(&self, ready: watch::Sender<bool>, install_fetch: F) -> SyncResult<()>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<Vec<RawReading>>>,
  {
    self.install(install_fetch).await?;
    self.activate()?;
    let _ = ready.send(true);
    Ok(())
  }

  /// Pre-populate the sensor store if it has no entry for the primary key.
  ///
  /// On fetch failure the synthetic series is stored instead, never an empty
  /// array, so the dashboard has something to render on a first-ever offline
  /// launch.
  async fn install<F, Fut>(&self, install_fetch: F) -> SyncResult<()>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<Vec<RawReading>>>,
  {
    match self.store.get(&self.primary_key) {
      Ok(_) => {
        debug!(key = %self.primary_key, "sensor store already populated, skipping install fetch");
        return Ok(());
      }
      Err(SyncError::NotFound) => {}
      Err(e) => return Err(e),
    }

    let readings = match install_fetch().await {
      Ok(raw) => {
        let set = normalize(raw);
        if set.is_empty() {
          warn!("install fetch returned no valid readings, storing synthetic series");
          synthetic_series(&self.synthetic.series, self.synthetic.spacing_minutes)
        } else {
          info!(count = set.len(), "pre-populated sensor store from live fetch");
          set
        }
      }
      Err(e) => {
        warn!(error = %e, "install fetch failed, storing synthetic series");
        synthetic_series(&self.synthetic.series, self.synthetic.spacing_minutes)
      }
    };

    let payload = serde_json::to_vec(&readings)
      .map_err(|e| SyncError::Storage(format!("failed to serialize install payload: {}", e)))?;
    self.store.put(&self.primary_key, &payload)
  }

  /// Enumerate stores and rotate to the configured version.
  fn activate(&self) -> SyncResult<()> {
    let before = self.store.store_names()?;
    self.store.rotate(self.store.version())?;
    info!(
      version = self.store.version(),
      purged = before.len().saturating_sub(self.store.store_names()?.len()),
      sensor_keys = self.store.keys()?.len(),
      "cache generation activated"
    );
    Ok(())
  }
}
