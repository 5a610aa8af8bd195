//! Connectivity signal for the poller.
//!
//! A background task probes the API base at a fixed period and publishes
//! online/offline flips on a watch channel. Any HTTP response counts as
//! online; only transport-level failures flip the signal to offline.

use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::api::ApiClient;

/// Spawn the probe task and return the receiving end of the signal.
///
/// The channel starts out online; the first probe runs immediately and
/// corrects the value if the network is actually down.
pub fn spawn_probe(client: ApiClient, period: Duration) -> watch::Receiver<bool> {
  let (tx, rx) = watch::channel(true);

  tokio::spawn(async move {
    let mut timer = tokio::time::interval(period);
    loop {
      timer.tick().await;
      let online = client.probe().await;
      if *tx.borrow() != online {
        info!(online, "connectivity changed");
        if tx.send(online).is_err() {
          break;
        }
      } else if tx.is_closed() {
        break;
      }
    }
  });

  rx
}
