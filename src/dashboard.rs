//! Dashboard output.
//!
//! The chart-rendering UI is an external consumer; this binary's stand-in
//! derives the user-visible situation purely from the provenance tag and
//! prints one line per published result. It never sees a raw error.

use tokio::sync::watch;

use crate::model::{Provenance, ResolvedResult};

/// Render published results until the poller stops publishing.
pub async fn run(mut results: watch::Receiver<ResolvedResult>) {
  while results.changed().await.is_ok() {
    let result = results.borrow_and_update().clone();
    println!("{}", render_line(&result));
  }
}

fn render_line(result: &ResolvedResult) -> String {
  let latest = result.data.last().map(|r| r.timestamp);
  match result.provenance {
    Provenance::Live => match latest {
      Some(t) => format!("live data, updated at {}", t.to_rfc3339()),
      None => "live data, no readings yet".to_string(),
    },
    p if p.is_cached() => match latest {
      Some(t) => format!("showing cached data (stale, from {})", t.to_rfc3339()),
      None => "showing cached data".to_string(),
    },
    Provenance::Synthetic => "showing fallback data (no real readings available)".to_string(),
    _ => "no data available".to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Reading;
  use chrono::{TimeZone, Utc};

  fn reading() -> Reading {
    Reading::new(
      Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
      21.0,
      44.0,
    )
  }

  #[test]
  fn the_three_situations_derive_from_provenance_alone() {
    let live = ResolvedResult::new(vec![reading()], Provenance::Live);
    assert!(render_line(&live).starts_with("live data, updated at"));

    let exact = ResolvedResult::new(vec![reading()], Provenance::CacheExact);
    assert!(render_line(&exact).starts_with("showing cached data (stale, from"));

    let fuzzy = ResolvedResult::new(vec![reading()], Provenance::CacheFuzzy);
    assert!(render_line(&fuzzy).starts_with("showing cached data"));

    let synthetic = ResolvedResult::new(vec![reading()], Provenance::Synthetic);
    assert!(render_line(&synthetic).contains("fallback"));

    let none = ResolvedResult::unavailable();
    assert_eq!(render_line(&none), "no data available");
  }
}
