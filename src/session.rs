//! Session token lifecycle.
//!
//! The token lives in volatile memory only; it is never written to any cache
//! store by this component. Whenever an authenticated request is rejected the
//! poller calls [`SessionManager::invalidate`], so the next cycle performs a
//! fresh login exchange instead of retrying a dead token forever.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Mutex;
use tracing::debug;

use crate::error::SyncResult;

type LoginFn = Box<dyn Fn() -> BoxFuture<'static, SyncResult<String>> + Send + Sync>;

#[derive(Debug, Clone)]
struct Session {
  token: String,
  acquired_at: DateTime<Utc>,
}

pub struct SessionManager {
  session: Mutex<Option<Session>>,
  login: LoginFn,
}

impl SessionManager {
  /// Create a session manager around a login exchange.
  pub fn new<F, Fut>(login: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<String>> + Send + 'static,
  {
    Self {
      session: Mutex::new(None),
      login: Box::new(move || Box::pin(login())),
    }
  }

  /// Return the held token, or perform the login exchange and hold the result.
  pub async fn ensure_token(&self) -> SyncResult<String> {
    if let Some(session) = self.session.lock().unwrap_or_else(|e| e.into_inner()).clone() {
      return Ok(session.token);
    }

    let token = (self.login)().await?;
    let session = Session {
      token: token.clone(),
      acquired_at: Utc::now(),
    };
    debug!(acquired_at = %session.acquired_at, "session token acquired");
    *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session);

    Ok(token)
  }

  /// Drop the held token so the next cycle re-authenticates.
  pub fn invalidate(&self) {
    debug!("session token invalidated");
    *self.session.lock().unwrap_or_else(|e| e.into_inner()) = None;
  }

  #[cfg(test)]
  pub fn has_token(&self) -> bool {
    self.session.lock().unwrap().is_some()
  }
}
