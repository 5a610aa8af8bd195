//! Foreground polling loop.
//!
//! State machine: `Idle → Polling(online) | Polling(offline) → Stopped`.
//! While online a periodic timer drives one resolve per period; losing
//! connectivity cancels the timer (no wasted network attempts) and a single
//! cache-only pass keeps the dashboard supplied until connectivity returns.
//! Teardown discards any in-flight cycle's result instead of aborting the
//! underlying fetch: its write-through may still complete, which is fine
//! because write-through is idempotent.

use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::model::ResolvedResult;

type CycleFn = Box<dyn Fn(bool) -> BoxFuture<'static, ResolvedResult> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
  Idle,
  PollingOnline,
  PollingOffline,
  Stopped,
}

pub struct Poller {
  cycle: CycleFn,
  period: Duration,
  connectivity: watch::Receiver<bool>,
  shutdown: watch::Receiver<bool>,
  publish: watch::Sender<ResolvedResult>,
  state: watch::Sender<PollerState>,
}

/// Control surface handed to the owner: observe results and state, stop the
/// loop. Dropping the handle also stops the poller.
pub struct PollerHandle {
  shutdown: watch::Sender<bool>,
  pub results: watch::Receiver<ResolvedResult>,
  pub state: watch::Receiver<PollerState>,
}

impl PollerHandle {
  pub fn stop(&self) {
    let _ = self.shutdown.send(true);
  }
}

impl Poller {
  /// `cycle` runs one resolution pass; the flag tells it whether the live
  /// tier may be attempted.
  pub fn new<F, Fut>(
    period: Duration,
    connectivity: watch::Receiver<bool>,
    cycle: F,
  ) -> (Self, PollerHandle)
  where
    F: Fn(bool) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ResolvedResult> + Send + 'static,
  {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (publish_tx, results) = watch::channel(ResolvedResult::unavailable());
    let (state_tx, state_rx) = watch::channel(PollerState::Idle);

    let poller = Self {
      cycle: Box::new(move |online| Box::pin(cycle(online))),
      period,
      connectivity,
      shutdown: shutdown_rx,
      publish: publish_tx,
      state: state_tx,
    };

    let handle = PollerHandle {
      shutdown: shutdown_tx,
      results,
      state: state_rx,
    };

    (poller, handle)
  }

  /// Run until stopped. Waits for the cache readiness gate before the first
  /// cycle so no resolve reads a store mid-rotation.
  pub async fn run(self, mut ready: watch::Receiver<bool>) {
    let Poller {
      cycle,
      period,
      mut connectivity,
      mut shutdown,
      publish,
      state,
    } = self;

    while !*ready.borrow() {
      if ready.changed().await.is_err() {
        // Lifecycle task ended without flipping the gate; the store keeps
        // serving the previous generation consistently, which is safe.
        debug!("readiness gate closed without activation, proceeding");
        break;
      }
    }

    let run_cycle = |online: bool, shutdown: &watch::Receiver<bool>| {
      let fut = (cycle)(online);
      let shutdown = shutdown.clone();
      let publish = publish.clone();
      async move {
        let result = fut.await;
        // Published-after-stop guard: an in-flight cycle's result is
        // discarded once teardown began.
        if *shutdown.borrow() {
          return false;
        }
        let _ = publish.send(result);
        true
      }
    };

    let mut timer = new_timer(period, *connectivity.borrow());
    if timer.is_some() {
      info!(period_secs = period.as_secs_f64(), "polling online");
      let _ = state.send(PollerState::PollingOnline);
    } else {
      info!("starting offline, serving cache");
      let _ = state.send(PollerState::PollingOffline);
      // One cache-only pass so the dashboard has data before connectivity
      // ever appears.
      if !run_cycle(false, &shutdown).await {
        let _ = state.send(PollerState::Stopped);
        return;
      }
    }

    let mut connectivity_open = true;

    loop {
      tokio::select! {
        _ = tick(&mut timer), if timer.is_some() => {
          let online = *connectivity.borrow();
          if !run_cycle(online, &shutdown).await {
            break;
          }
        }
        changed = connectivity.changed(), if connectivity_open => {
          if changed.is_err() {
            debug!("connectivity signal source gone");
            connectivity_open = false;
            continue;
          }
          let online = *connectivity.borrow();
          if online && timer.is_none() {
            info!("connectivity restored, re-establishing poll timer");
            let _ = state.send(PollerState::PollingOnline);
            timer = new_timer(period, true);
          } else if !online && timer.is_some() {
            info!("connectivity lost, cancelling poll timer");
            let _ = state.send(PollerState::PollingOffline);
            timer = None;
            if !run_cycle(false, &shutdown).await {
              break;
            }
          }
        }
        changed = shutdown.changed() => {
          // A dropped handle counts as teardown too.
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
        }
      }
    }

    let _ = state.send(PollerState::Stopped);
  }
}

fn new_timer(period: Duration, online: bool) -> Option<Interval> {
  if !online {
    return None;
  }
  let mut timer = interval(period);
  // The first tick fires immediately; later ones are not allowed to burst
  // after a long cycle.
  timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
  Some(timer)
}

async fn tick(timer: &mut Option<Interval>) {
  match timer {
    Some(t) => {
      t.tick().await;
    }
    None => std::future::pending().await,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Provenance, ResolvedResult};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn ready_now() -> watch::Receiver<bool> {
    // The gate loop reads the initial value before ever awaiting a change,
    // so the sender can be dropped right away.
    let (_tx, rx) = watch::channel(true);
    rx
  }

  fn counted_cycle(counter: Arc<AtomicU32>) -> impl Fn(bool) -> BoxFuture<'static, ResolvedResult> + Send + Sync {
    move |online| {
      counter.fetch_add(1, Ordering::SeqCst);
      let provenance = if online {
        Provenance::Live
      } else {
        Provenance::CacheExact
      };
      Box::pin(async move { ResolvedResult::new(Vec::new(), provenance) })
    }
  }

  #[tokio::test]
  async fn starts_online_and_polls_periodically() {
    let (_conn_tx, conn_rx) = watch::channel(true);
    let cycles = Arc::new(AtomicU32::new(0));
    let (poller, handle) = Poller::new(
      Duration::from_millis(20),
      conn_rx,
      counted_cycle(cycles.clone()),
    );

    let task = tokio::spawn(poller.run(ready_now()));
    tokio::time::sleep(Duration::from_millis(90)).await;

    assert_eq!(*handle.state.borrow(), PollerState::PollingOnline);
    let n = cycles.load(Ordering::SeqCst);
    assert!((3..=7).contains(&n), "expected ~5 cycles, got {}", n);
    assert_eq!(handle.results.borrow().provenance, Provenance::Live);

    handle.stop();
    task.await.unwrap();
  }

  #[tokio::test]
  async fn offline_cancels_the_timer_and_serves_cache_once() {
    let (conn_tx, conn_rx) = watch::channel(true);
    let cycles = Arc::new(AtomicU32::new(0));
    let (poller, handle) = Poller::new(
      Duration::from_millis(20),
      conn_rx,
      counted_cycle(cycles.clone()),
    );

    let task = tokio::spawn(poller.run(ready_now()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    conn_tx.send(false).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*handle.state.borrow(), PollerState::PollingOffline);
    let at_offline = cycles.load(Ordering::SeqCst);
    assert_eq!(handle.results.borrow().provenance, Provenance::CacheExact);

    // No timer while offline: the count stays put.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cycles.load(Ordering::SeqCst), at_offline);

    handle.stop();
    task.await.unwrap();
  }

  #[tokio::test]
  async fn reconnect_establishes_exactly_one_timer() {
    let (conn_tx, conn_rx) = watch::channel(true);
    let cycles = Arc::new(AtomicU32::new(0));
    let (poller, handle) = Poller::new(
      Duration::from_millis(50),
      conn_rx,
      counted_cycle(cycles.clone()),
    );

    let task = tokio::spawn(poller.run(ready_now()));
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Bounce connectivity a few times; only one timer may survive.
    for _ in 0..3 {
      conn_tx.send(false).unwrap();
      tokio::time::sleep(Duration::from_millis(10)).await;
      conn_tx.send(true).unwrap();
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*handle.state.borrow(), PollerState::PollingOnline);

    let before = cycles.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(220)).await;
    let polled = cycles.load(Ordering::SeqCst) - before;
    // A duplicate timer would roughly double this.
    assert!((3..=7).contains(&polled), "expected ~5 cycles, got {}", polled);

    handle.stop();
    task.await.unwrap();
  }

  #[tokio::test]
  async fn starting_offline_runs_one_cache_only_pass() {
    let (_conn_tx, conn_rx) = watch::channel(false);
    let cycles = Arc::new(AtomicU32::new(0));
    let (poller, handle) = Poller::new(
      Duration::from_millis(20),
      conn_rx,
      counted_cycle(cycles.clone()),
    );

    let task = tokio::spawn(poller.run(ready_now()));
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(*handle.state.borrow(), PollerState::PollingOffline);
    assert_eq!(cycles.load(Ordering::SeqCst), 1);
    assert_eq!(handle.results.borrow().provenance, Provenance::CacheExact);

    handle.stop();
    task.await.unwrap();
  }

  #[tokio::test]
  async fn teardown_discards_the_in_flight_result() {
    let (_conn_tx, conn_rx) = watch::channel(true);
    let (poller, handle) = Poller::new(Duration::from_millis(10), conn_rx, |_online| async {
      // Slow cycle so stop() lands while it is in flight.
      tokio::time::sleep(Duration::from_millis(60)).await;
      ResolvedResult::new(Vec::new(), Provenance::Live)
    });

    let task = tokio::spawn(poller.run(ready_now()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.stop();
    task.await.unwrap();

    assert_eq!(*handle.state.borrow(), PollerState::Stopped);
    // The initial placeholder is still the latest published value.
    assert_eq!(handle.results.borrow().provenance, Provenance::None);
  }

  #[tokio::test]
  async fn first_cycle_waits_for_the_readiness_gate() {
    let (ready_tx, ready_rx) = watch::channel(false);
    let (_conn_tx, conn_rx) = watch::channel(true);
    let cycles = Arc::new(AtomicU32::new(0));
    let (poller, handle) = Poller::new(
      Duration::from_millis(10),
      conn_rx,
      counted_cycle(cycles.clone()),
    );

    let task = tokio::spawn(poller.run(ready_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cycles.load(Ordering::SeqCst), 0, "gated cycles ran early");

    ready_tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(cycles.load(Ordering::SeqCst) >= 1);

    handle.stop();
    task.await.unwrap();
  }
}
