//! Tiered fallback resolution.
//!
//! One resolve per poll cycle, trying tiers in strict order and
//! short-circuiting on the first success:
//!
//! 1. live network fetch (write-through on success)
//! 2. exact cache key
//! 3. fuzzy cache key (same logical path, different base URL or query)
//! 4. secondary durable fallback (last known good)
//! 5. synthetic single-point reading
//! 6. empty result, provenance `none`
//!
//! Normalization is applied to every tier's raw payload, so the published
//! contract is identical regardless of where the data came from.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{FallbackStore, VersionedStore, CACHED_SENSOR_DATA_KEY};
use crate::config::SyntheticConfig;
use crate::error::{SyncError, SyncResult};
use crate::model::{normalize, synthetic_series, Provenance, RawReading, ReadingSet, ResolvedResult};

/// Outcome of a live-tier resolution. The live error is reported separately
/// so the caller can react to token rejection (invalidate the session)
/// without the result itself ever carrying an error.
pub struct Resolution {
  pub result: ResolvedResult,
  pub live_error: Option<SyncError>,
}

pub struct TieredResolver {
  store: Arc<VersionedStore>,
  fallback: Arc<FallbackStore>,
  /// Primary resource key: the full feed URL.
  resource_key: String,
  /// Stable logical path used for fuzzy sibling lookups.
  logical_path: String,
  synthetic: SyntheticConfig,
}

impl TieredResolver {
  pub fn new(
    store: Arc<VersionedStore>,
    fallback: Arc<FallbackStore>,
    resource_key: String,
    logical_path: String,
    synthetic: SyntheticConfig,
  ) -> Self {
    Self {
      store,
      fallback,
      resource_key,
      logical_path,
      synthetic,
    }
  }

  /// Resolve with the live tier enabled.
  pub async fn resolve_live<F, Fut>(&self, fetch: F) -> Resolution
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<Vec<RawReading>>>,
  {
    match fetch().await {
      Ok(raw) => {
        let set = normalize(raw);
        self.write_through(&set);
        Resolution {
          result: ResolvedResult::new(set, Provenance::Live),
          live_error: None,
        }
      }
      Err(e) => {
        debug!(error = %e, "live tier failed, falling back to cache");
        Resolution {
          result: self.resolve_cached(),
          live_error: Some(e),
        }
      }
    }
  }

  /// Resolve from tiers 2–6 only; the network is never touched.
  pub fn resolve_cached(&self) -> ResolvedResult {
    // Tier 2: exact key.
    if let Some(set) = self.read_store(|| self.store.get(&self.resource_key), "cache-exact") {
      return ResolvedResult::new(set, Provenance::CacheExact);
    }

    // Tier 3: fuzzy sibling under a different base URL or query string.
    if let Some(set) = self.read_store(
      || self.store.match_fuzzy(&self.logical_path).map(|(key, payload)| {
        debug!(%key, "fuzzy cache hit");
        payload
      }),
      "cache-fuzzy",
    ) {
      return ResolvedResult::new(set, Provenance::CacheFuzzy);
    }

    // Tier 4: last known good, durable across version rotation. Reported as
    // cache-exact: semantically it is the same last-known-good contract.
    if let Some(set) = self.read_store(|| self.fallback.get(CACHED_SENSOR_DATA_KEY), "fallback") {
      return ResolvedResult::new(set, Provenance::CacheExact);
    }

    // Tier 5: single-point synthetic reading, computed locally.
    if let Some(point) = self.synthetic.series.last() {
      let set = synthetic_series(std::slice::from_ref(point), self.synthetic.spacing_minutes);
      return ResolvedResult::new(set, Provenance::Synthetic);
    }

    // Tier 6: nothing could be constructed. Local computation only, so this
    // is a configuration defect rather than a runtime condition.
    ResolvedResult::unavailable()
  }

  /// Read one tier's payload and normalize it. A miss, a storage error, or a
  /// malformed payload all advance to the next tier; an empty normalized set
  /// also counts as a miss so a tier never publishes less than a lower tier
  /// could.
  fn read_store<F>(&self, read: F, tier: &str) -> Option<ReadingSet>
  where
    F: FnOnce() -> SyncResult<Vec<u8>>,
  {
    let payload = match read() {
      Ok(p) => p,
      Err(SyncError::NotFound) => return None,
      Err(e) => {
        warn!(tier, error = %e, "cache tier read failed");
        return None;
      }
    };

    let raw: Vec<RawReading> = match serde_json::from_slice(&payload) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(tier, error = %e, "cached payload malformed, skipping tier");
        return None;
      }
    };

    let set = normalize(raw);
    if set.is_empty() {
      None
    } else {
      Some(set)
    }
  }

  /// Write a freshly fetched, normalized set into both the versioned store
  /// and the durable fallback. Idempotent, and deliberately non-fatal: a
  /// storage failure must not turn a successful live fetch into a miss.
  fn write_through(&self, set: &ReadingSet) {
    let payload = match serde_json::to_vec(set) {
      Ok(p) => p,
      Err(e) => {
        warn!(error = %e, "failed to serialize reading set for write-through");
        return;
      }
    };

    if let Err(e) = self.store.put(&self.resource_key, &payload) {
      warn!(error = %e, "write-through to versioned store failed");
    }
    if let Err(e) = self.fallback.put(CACHED_SENSOR_DATA_KEY, &payload) {
      warn!(error = %e, "write-through to durable fallback failed");
    }
  }
}
