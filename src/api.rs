//! HTTP client for the sensor API.
//!
//! Two consumed endpoints: the login exchange and the reading feed. Every
//! request carries the configured timeout; exceeding it is treated the same
//! as any other network failure by the caller.

use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::model::RawReading;

#[derive(Debug, Deserialize)]
struct LoginResponse {
  token: String,
}

#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
  username: String,
  password: String,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base = Url::parse(&config.api.url)
      .map_err(|e| eyre!("Invalid api.url {}: {}", config.api.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      username: config.api.username.clone(),
      password: config.password()?,
    })
  }

  /// Full URL of the reading feed; doubles as the primary cache key.
  pub fn feed_url(&self) -> SyncResult<String> {
    self
      .base
      .join("api/data/")
      .map(|u| u.to_string())
      .map_err(|e| SyncError::Network(format!("invalid feed url: {}", e)))
  }

  /// Perform the login exchange and return the bearer token.
  pub async fn login(&self) -> SyncResult<String> {
    let url = self
      .base
      .join("api/login")
      .map_err(|e| SyncError::Network(format!("invalid login url: {}", e)))?;

    let response = self
      .http
      .post(url)
      .json(&serde_json::json!({
        "username": self.username,
        "password": self.password,
      }))
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(SyncError::Auth(format!(
        "login rejected with status {}",
        response.status()
      )));
    }

    let body: LoginResponse = response
      .json()
      .await
      .map_err(|e| SyncError::MalformedPayload(format!("login response: {}", e)))?;

    Ok(body.token)
  }

  /// Fetch the raw reading array using the given bearer token.
  pub async fn fetch_readings(&self, token: &str) -> SyncResult<Vec<RawReading>> {
    let url = self
      .base
      .join("api/data/")
      .map_err(|e| SyncError::Network(format!("invalid feed url: {}", e)))?;

    let response = self
      .http
      .get(url)
      .bearer_auth(token)
      .header(reqwest::header::CACHE_CONTROL, "no-store")
      .send()
      .await?;

    match response.status() {
      s if s.is_success() => {}
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
        return Err(SyncError::Auth(format!("token rejected with status {}", response.status())));
      }
      s => {
        return Err(SyncError::Network(format!("feed returned status {}", s)));
      }
    }

    response
      .json::<Vec<RawReading>>()
      .await
      .map_err(|e| SyncError::MalformedPayload(format!("feed response: {}", e)))
  }

  /// Cheap connectivity check. Any HTTP response counts as online, even an
  /// error status; only transport-level failures count as offline.
  pub async fn probe(&self) -> bool {
    self.http.head(self.base.clone()).send().await.is_ok()
  }
}
