//! Domain types: readings, normalized reading sets, and the resolved result
//! published to the dashboard each poll cycle.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A raw reading as received from the feed endpoint (or a cache tier).
///
/// Every field is optional because the source order and completeness are not
/// trusted; validation happens in [`normalize`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReading {
  #[serde(default)]
  pub timestamp: Option<serde_json::Value>,
  #[serde(default)]
  pub temperature: Option<f64>,
  #[serde(default)]
  pub humidity: Option<f64>,
}

/// A validated sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
  pub timestamp: DateTime<Utc>,
  pub temperature: f64,
  pub humidity: f64,
}

impl Reading {
  pub fn new(timestamp: DateTime<Utc>, temperature: f64, humidity: f64) -> Self {
    Self {
      timestamp,
      temperature,
      humidity,
    }
  }
}

/// An ordered set of validated readings, ascending by timestamp.
pub type ReadingSet = Vec<Reading>;

/// Which fallback tier produced a resolved result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
  /// Fresh data from the network.
  Live,
  /// Exact cache key hit, or the last-known-good durable fallback.
  CacheExact,
  /// Cache hit under a sibling key sharing the logical resource path.
  CacheFuzzy,
  /// Locally constructed fallback, no real data available.
  Synthetic,
  /// Degenerate case: nothing could be constructed.
  None,
}

impl Provenance {
  /// True when the data came from any cache tier rather than the network.
  pub fn is_cached(&self) -> bool {
    matches!(self, Provenance::CacheExact | Provenance::CacheFuzzy)
  }
}

impl std::fmt::Display for Provenance {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Provenance::Live => "live",
      Provenance::CacheExact => "cache-exact",
      Provenance::CacheFuzzy => "cache-fuzzy",
      Provenance::Synthetic => "synthetic",
      Provenance::None => "none",
    };
    f.write_str(s)
  }
}

/// The unit published to the dashboard each poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResult {
  pub data: ReadingSet,
  pub provenance: Provenance,
  pub resolved_at: DateTime<Utc>,
}

impl ResolvedResult {
  pub fn new(data: ReadingSet, provenance: Provenance) -> Self {
    Self {
      data,
      provenance,
      resolved_at: Utc::now(),
    }
  }

  /// The degenerate empty result, provenance `none`.
  pub fn unavailable() -> Self {
    Self::new(Vec::new(), Provenance::None)
  }
}

/// Validate and order raw readings.
///
/// A reading is valid iff timestamp, temperature, and humidity are all present
/// and the timestamp parses to a valid instant. Invalid readings are dropped.
/// The output is re-sorted ascending by timestamp regardless of source order.
pub fn normalize(raw: Vec<RawReading>) -> ReadingSet {
  let mut readings: ReadingSet = raw
    .into_iter()
    .filter_map(|r| {
      let timestamp = r.timestamp.as_ref().and_then(parse_timestamp)?;
      let temperature = r.temperature?;
      let humidity = r.humidity?;
      Some(Reading::new(timestamp, temperature, humidity))
    })
    .collect();

  readings.sort_by_key(|r| r.timestamp);
  readings
}

/// Build a synthetic reading series ending at the current instant.
///
/// Used for install-time pre-population (multi-point, so a first-ever offline
/// launch has a plausible series to render) and for the runtime single-point
/// synthetic tier. The values come from configuration.
pub fn synthetic_series(points: &[crate::config::SyntheticPoint], spacing_minutes: i64) -> ReadingSet {
  let now = Utc::now();
  points
    .iter()
    .enumerate()
    .map(|(i, p)| {
      let offset = (points.len() - 1 - i) as i64 * spacing_minutes;
      Reading::new(
        now - chrono::Duration::minutes(offset),
        p.temperature,
        p.humidity,
      )
    })
    .collect()
}

/// Parse a timestamp value that may be ISO-8601 or epoch-convertible.
///
/// Numbers above 10^12 are interpreted as epoch milliseconds, below as epoch
/// seconds (the feed has emitted both over its lifetime).
fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
  match value {
    serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
      .ok()
      .map(|dt| dt.with_timezone(&Utc)),
    serde_json::Value::Number(n) => {
      let n = n.as_i64()?;
      if n > 1_000_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
      } else {
        Utc.timestamp_opt(n, 0).single()
      }
    }
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn raw(ts: serde_json::Value, temp: Option<f64>, hum: Option<f64>) -> RawReading {
    RawReading {
      timestamp: Some(ts),
      temperature: temp,
      humidity: hum,
    }
  }

  #[test]
  fn normalize_drops_readings_with_null_fields() {
    let input = vec![
      raw(json!("2024-01-01T00:00:00Z"), Some(21.5), Some(44.0)),
      raw(json!("2024-01-01T00:01:00Z"), None, Some(50.0)),
    ];

    let out = normalize(input);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].temperature, 21.5);
    assert_eq!(out[0].humidity, 44.0);
  }

  #[test]
  fn normalize_keeps_exactly_the_valid_entries() {
    let input = vec![
      raw(json!("2024-01-01T00:00:00Z"), Some(20.0), Some(40.0)),
      RawReading {
        timestamp: None,
        temperature: Some(21.0),
        humidity: Some(41.0),
      },
      raw(json!("not a timestamp"), Some(22.0), Some(42.0)),
      raw(json!("2024-01-01T00:02:00Z"), Some(23.0), None),
      raw(json!("2024-01-01T00:03:00Z"), Some(24.0), Some(44.0)),
    ];

    let out = normalize(input);
    assert_eq!(out.len(), 2);
  }

  #[test]
  fn normalize_sorts_ascending_by_timestamp() {
    let input = vec![
      raw(json!("2024-01-01T00:05:00Z"), Some(22.0), Some(45.0)),
      raw(json!("2024-01-01T00:01:00Z"), Some(21.0), Some(44.0)),
      raw(json!("2024-01-01T00:03:00Z"), Some(21.5), Some(44.5)),
    ];

    let out = normalize(input);
    let stamps: Vec<_> = out.iter().map(|r| r.timestamp).collect();
    let mut sorted = stamps.clone();
    sorted.sort();
    assert_eq!(stamps, sorted);
  }

  #[test]
  fn timestamps_accept_epoch_seconds_and_millis() {
    let input = vec![
      raw(json!(1_704_067_200), Some(20.0), Some(40.0)),
      raw(json!(1_704_067_260_000i64), Some(21.0), Some(41.0)),
    ];

    let out = normalize(input);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].timestamp.timestamp(), 1_704_067_200);
    assert_eq!(out[1].timestamp.timestamp(), 1_704_067_260);
  }
}
