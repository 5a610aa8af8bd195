//! One poll cycle: ensure a session token, resolve through the tiers, and
//! react to token rejection by invalidating the session.

use futures::future::BoxFuture;
use std::future::Future;
use tracing::warn;

use crate::error::SyncResult;
use crate::model::{RawReading, ResolvedResult};
use crate::resolver::TieredResolver;
use crate::session::SessionManager;

type FetchFn = Box<dyn Fn(String) -> BoxFuture<'static, SyncResult<Vec<RawReading>>> + Send + Sync>;

pub struct SyncEngine {
  resolver: TieredResolver,
  session: SessionManager,
  fetch: FetchFn,
}

impl SyncEngine {
  /// `fetch` issues the authenticated feed request for a given token.
  pub fn new<F, Fut>(resolver: TieredResolver, session: SessionManager, fetch: F) -> Self
  where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<Vec<RawReading>>> + Send + 'static,
  {
    Self {
      resolver,
      session,
      fetch: Box::new(move |token| Box::pin(fetch(token))),
    }
  }

  /// Run one cycle and return the result to publish.
  ///
  /// Offline, or when the login exchange itself fails, resolution is
  /// restricted to the cache tiers; an auth failure therefore never surfaces
  /// as "no data" while any cache tier has content.
  pub async fn cycle(&self, online: bool) -> ResolvedResult {
    if !online {
      return self.resolver.resolve_cached();
    }

    let token = match self.session.ensure_token().await {
      Ok(token) => token,
      Err(e) => {
        warn!(error = %e, "login exchange failed, resolving cache-only");
        return self.resolver.resolve_cached();
      }
    };

    let resolution = self.resolver.resolve_live(|| (self.fetch)(token)).await;

    // A rejected token means re-authenticate on the next cycle rather than
    // retrying a dead token forever.
    if resolution.live_error.as_ref().is_some_and(|e| e.is_auth()) {
      self.session.invalidate();
    }

    resolution.result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{FallbackStore, VersionedStore};
  use crate::config::SyntheticConfig;
  use crate::error::SyncError;
  use crate::model::Provenance;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  const FEED: &str = "https://host/api/data/";

  fn resolver() -> TieredResolver {
    TieredResolver::new(
      Arc::new(VersionedStore::open_in_memory("v1", 4).unwrap()),
      Arc::new(FallbackStore::open_in_memory().unwrap()),
      FEED.to_string(),
      "/api/data/".to_string(),
      SyntheticConfig::default(),
    )
  }

  fn one_reading() -> Vec<RawReading> {
    vec![RawReading {
      timestamp: Some(json!("2024-01-01T00:00:00Z")),
      temperature: Some(21.0),
      humidity: Some(44.0),
    }]
  }

  #[tokio::test]
  async fn online_cycle_publishes_live_data() {
    let session = SessionManager::new(|| async { Ok("token".to_string()) });
    let engine = SyncEngine::new(resolver(), session, |_token| async { Ok(one_reading()) });

    let result = engine.cycle(true).await;
    assert_eq!(result.provenance, Provenance::Live);
    assert_eq!(result.data.len(), 1);
  }

  #[tokio::test]
  async fn offline_cycle_never_touches_the_network() {
    let session = SessionManager::new(|| async {
      panic!("login must not run while offline");
    });
    let engine = SyncEngine::new(resolver(), session, |_token| async {
      panic!("fetch must not run while offline");
    });

    let result = engine.cycle(false).await;
    assert_eq!(result.provenance, Provenance::Synthetic);
  }

  #[tokio::test]
  async fn rejected_token_triggers_fresh_login_on_next_cycle() {
    let logins = Arc::new(AtomicU32::new(0));

    let session = SessionManager::new({
      let logins = logins.clone();
      move || {
        let logins = logins.clone();
        async move {
          let n = logins.fetch_add(1, Ordering::SeqCst);
          Ok(format!("token-{}", n))
        }
      }
    });

    // The first token is rejected as unauthorized; any later token works.
    let engine = SyncEngine::new(resolver(), session, |token| async move {
      if token == "token-0" {
        Err(SyncError::Auth("401".into()))
      } else {
        Ok(one_reading())
      }
    });

    let first = engine.cycle(true).await;
    // Auth failure with an empty cache still yields a publishable result.
    assert_eq!(first.provenance, Provenance::Synthetic);
    assert_eq!(logins.load(Ordering::SeqCst), 1);

    let second = engine.cycle(true).await;
    assert_eq!(second.provenance, Provenance::Live);
    assert_eq!(logins.load(Ordering::SeqCst), 2, "next cycle must re-login");
  }

  #[tokio::test]
  async fn login_failure_resolves_cache_only() {
    let r = resolver();
    // Seed the cache through a successful live pass first.
    r.resolve_live(|| async { Ok(one_reading()) }).await;

    let session = SessionManager::new(|| async { Err(SyncError::Auth("rejected".into())) });
    let engine = SyncEngine::new(r, session, |_token| async {
      panic!("live tier must be skipped when the login exchange fails");
    });

    let result = engine.cycle(true).await;
    assert_eq!(result.provenance, Provenance::CacheExact);
    assert!(!result.data.is_empty(), "auth failure must not surface as no-data");
  }
}
