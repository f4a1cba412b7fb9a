//! The refresh scheduler: runs the fetch-diff cycle on a fixed
//! interval, owns cancellation, and publishes completed snapshots.
//!
//! One coordinating task owns the entity cache; per-kind fetch tasks run
//! concurrently and report back over a channel, so the cache has a
//! single mutator and needs no locking. Ticks arriving while a cycle is
//! in flight are dropped, force-refresh triggers are coalesced.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cache::{ChangeRecord, EntityCache, Snapshot, StaleKind};
use crate::pagerduty::client::PagerDutyClient;
use crate::pagerduty::types::{Collection, ResourceKind};
use crate::pagerduty::FetchError;

/// Shared fetch contract between the live client and test doubles.
pub trait CollectionSource: Clone + Send + Sync + 'static {
  fn fetch(
    &self,
    kind: ResourceKind,
  ) -> impl Future<Output = Result<Collection, FetchError>> + Send;
}

impl CollectionSource for PagerDutyClient {
  fn fetch(
    &self,
    kind: ResourceKind,
  ) -> impl Future<Output = Result<Collection, FetchError>> + Send {
    self.fetch_collection(kind, None)
  }
}

/// Cadence and scope of the refresh loop.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
  pub interval: Duration,
  /// Kinds not completed by this deadline count as failed for the
  /// cycle.
  pub cycle_deadline: Duration,
  pub kinds: Vec<ResourceKind>,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(10),
      cycle_deadline: Duration::from_secs(30),
      kinds: ResourceKind::ALL.to_vec(),
    }
  }
}

/// Scheduler lifecycle, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Idle,
  Fetching,
  Diffing,
  Publishing,
  Cancelling,
  Stopped,
}

/// Sink-side handle: receives snapshots, forces refreshes, shuts the
/// scheduler down.
pub struct RefreshHandle {
  snapshots: Option<mpsc::UnboundedReceiver<Snapshot>>,
  force_tx: mpsc::Sender<()>,
  cancel: CancellationToken,
  task: JoinHandle<()>,
}

impl RefreshHandle {
  /// Receive the next published snapshot. Returns `None` once the
  /// scheduler has stopped (or after `take_snapshots`).
  pub async fn next_snapshot(&mut self) -> Option<Snapshot> {
    match &mut self.snapshots {
      Some(rx) => rx.recv().await,
      None => None,
    }
  }

  /// Hand the snapshot stream to another task (the app's event bridge).
  pub fn take_snapshots(&mut self) -> Option<mpsc::UnboundedReceiver<Snapshot>> {
    self.snapshots.take()
  }

  /// Request an immediate refresh cycle. A trigger arriving while a
  /// cycle is already in flight coalesces into a no-op.
  pub fn force_refresh(&self) {
    let _ = self.force_tx.try_send(());
  }

  /// Signal cooperative shutdown; in-flight fetches are abandoned.
  pub fn shutdown(&self) {
    self.cancel.cancel();
  }

  /// Wait for the scheduler task to reach its terminal state.
  pub async fn join(&mut self) {
    let _ = (&mut self.task).await;
  }
}

/// The coordinating task. Owns the cache; the only caller of `diff`.
pub struct RefreshScheduler<S: CollectionSource> {
  source: S,
  config: RefreshConfig,
  cache: EntityCache,
  snapshot_tx: mpsc::UnboundedSender<Snapshot>,
  force_rx: mpsc::Receiver<()>,
  cancel: CancellationToken,
  phase: Phase,
  /// Last successful refresh per kind, for "stale since" reporting.
  last_refreshed: HashMap<ResourceKind, DateTime<Utc>>,
  started_at: DateTime<Utc>,
}

impl<S: CollectionSource> RefreshScheduler<S> {
  /// Spawn the scheduler onto the runtime and return the sink-side
  /// handle. The first cycle starts immediately.
  pub fn spawn(source: S, config: RefreshConfig) -> RefreshHandle {
    let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
    let (force_tx, force_rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();

    let scheduler = Self {
      source,
      config,
      cache: EntityCache::new(),
      snapshot_tx,
      force_rx,
      cancel: cancel.clone(),
      phase: Phase::Idle,
      last_refreshed: HashMap::new(),
      started_at: Utc::now(),
    };

    let task = tokio::spawn(scheduler.run());

    RefreshHandle {
      snapshots: Some(snapshot_rx),
      force_tx,
      cancel,
      task,
    }
  }

  async fn run(mut self) {
    // Ticks that fire while a cycle is in flight are dropped outright,
    // not queued behind it.
    let mut ticker = tokio::time::interval(self.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let cancel = self.cancel.clone();

    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => {}
        Some(()) = self.force_rx.recv() => {
          debug!("force refresh trigger");
        }
      }

      if !self.run_cycle().await {
        break;
      }

      // Triggers that arrived mid-cycle coalesce into the cycle that
      // just ran.
      while self.force_rx.try_recv().is_ok() {}
    }

    self.set_phase(Phase::Stopped);
    debug!("refresh scheduler stopped");
  }

  /// One fetch-diff-publish cycle. Returns false when cancelled
  /// mid-cycle (no snapshot is produced).
  async fn run_cycle(&mut self) -> bool {
    let started = Utc::now();
    self.set_phase(Phase::Fetching);

    let (tx, mut rx) = mpsc::channel(self.config.kinds.len().max(1));
    for &kind in &self.config.kinds {
      let source = self.source.clone();
      let cancel = self.cancel.clone();
      let tx = tx.clone();
      tokio::spawn(async move {
        let result = tokio::select! {
          // Abandoned: the in-flight fetch is dropped, nothing reported.
          _ = cancel.cancelled() => return,
          result = source.fetch(kind) => result,
        };
        let _ = tx.send((kind, result)).await;
      });
    }
    drop(tx);

    let cancel = self.cancel.clone();
    let deadline = tokio::time::sleep(self.config.cycle_deadline);
    tokio::pin!(deadline);

    let mut pending: BTreeSet<ResourceKind> = self.config.kinds.iter().copied().collect();
    let mut changes: Vec<ChangeRecord> = Vec::new();
    let mut failed: Vec<(ResourceKind, String)> = Vec::new();

    while !pending.is_empty() {
      tokio::select! {
        _ = cancel.cancelled() => {
          self.set_phase(Phase::Cancelling);
          return false;
        }
        _ = &mut deadline => {
          for &kind in &pending {
            warn!(kind = %kind, "cycle deadline exceeded; kind treated as failed");
            failed.push((kind, "cycle deadline exceeded".to_string()));
          }
          pending.clear();
        }
        received = rx.recv() => match received {
          Some((kind, Ok(collection))) => {
            pending.remove(&kind);
            self.set_phase(Phase::Diffing);
            changes.extend(self.cache.diff(collection));
            self.last_refreshed.insert(kind, started);
            self.set_phase(Phase::Fetching);
          }
          Some((kind, Err(err))) => {
            pending.remove(&kind);
            warn!(kind = %kind, error = %err, "fetch failed; reusing prior entities");
            failed.push((kind, err.reason()));
          }
          None => {
            for &kind in &pending {
              failed.push((kind, "fetch abandoned".to_string()));
            }
            pending.clear();
          }
        }
      }
    }

    let partial = !failed.is_empty();
    let mut stale = Vec::with_capacity(failed.len());
    for (kind, reason) in failed {
      let since = self
        .last_refreshed
        .get(&kind)
        .copied()
        .unwrap_or(self.started_at);
      stale.push(StaleKind { kind, since, reason });
      changes.extend(self.cache.unchanged_records(kind));
    }

    changes.sort_by(|a, b| {
      (a.kind, a.change)
        .cmp(&(b.kind, b.change))
        .then_with(|| a.id.cmp(&b.id))
    });

    self.set_phase(Phase::Publishing);
    let snapshot = Snapshot {
      generation: self.cache.generation(),
      changes,
      fetched_at: started,
      partial,
      stale,
    };
    debug!(
      generation = snapshot.generation,
      records = snapshot.changes.len(),
      partial = snapshot.partial,
      "publishing snapshot"
    );
    if self.snapshot_tx.send(snapshot).is_err() {
      debug!("snapshot receiver dropped");
    }

    self.set_phase(Phase::Idle);
    true
  }

  fn set_phase(&mut self, phase: Phase) {
    if self.phase != phase {
      trace!(from = ?self.phase, to = ?phase, "phase transition");
      self.phase = phase;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ChangeKind;
  use crate::pagerduty::types::{content_revision, Entity};
  use serde_json::{json, Value};
  use std::collections::VecDeque;
  use std::sync::{Arc, Mutex};

  fn entity(kind: ResourceKind, id: &str, status: &str) -> Entity {
    let fields = match json!({ "id": id, "status": status }) {
      Value::Object(map) => map,
      _ => unreachable!(),
    };
    Entity {
      id: id.to_string(),
      kind,
      revision: content_revision(&fields),
      fields,
      fetched_at: Utc::now(),
    }
  }

  fn collection(kind: ResourceKind, entities: Vec<Entity>) -> Collection {
    Collection::from_entities(kind, entities)
  }

  /// Scripted source: pops one response per fetch, the last response
  /// sticks. `Err` strings become `FetchError::Unavailable`.
  #[derive(Clone, Default)]
  struct FakeSource {
    responses: Arc<Mutex<HashMap<ResourceKind, VecDeque<Result<Collection, String>>>>>,
    delay: Duration,
  }

  impl FakeSource {
    fn new() -> Self {
      Self::default()
    }

    fn with_delay(delay: Duration) -> Self {
      Self {
        delay,
        ..Self::default()
      }
    }

    fn push(&self, kind: ResourceKind, response: Result<Collection, &str>) {
      self
        .responses
        .lock()
        .unwrap()
        .entry(kind)
        .or_default()
        .push_back(response.map_err(String::from));
    }

    fn next_response(&self, kind: ResourceKind) -> Result<Collection, String> {
      let mut responses = self.responses.lock().unwrap();
      let queue = responses.entry(kind).or_default();
      match queue.len() {
        0 => Ok(Collection::new(kind)),
        1 => queue.front().cloned().unwrap(),
        _ => queue.pop_front().unwrap(),
      }
    }
  }

  impl CollectionSource for FakeSource {
    fn fetch(
      &self,
      kind: ResourceKind,
    ) -> impl Future<Output = Result<Collection, FetchError>> + Send {
      let source = self.clone();
      async move {
        if source.delay > Duration::ZERO {
          tokio::time::sleep(source.delay).await;
        }
        source.next_response(kind).map_err(|reason| FetchError::Unavailable {
          attempts: 1,
          reason,
        })
      }
    }
  }

  fn config(interval_ms: u64, kinds: Vec<ResourceKind>) -> RefreshConfig {
    RefreshConfig {
      interval: Duration::from_millis(interval_ms),
      cycle_deadline: Duration::from_secs(5),
      kinds,
    }
  }

  #[tokio::test]
  async fn test_generations_increase_across_cycles() {
    let source = FakeSource::new();
    source.push(
      ResourceKind::Incidents,
      Ok(collection(
        ResourceKind::Incidents,
        vec![entity(ResourceKind::Incidents, "INC1", "triggered")],
      )),
    );
    source.push(
      ResourceKind::Incidents,
      Ok(collection(
        ResourceKind::Incidents,
        vec![
          entity(ResourceKind::Incidents, "INC1", "acknowledged"),
          entity(ResourceKind::Incidents, "INC2", "triggered"),
        ],
      )),
    );

    let mut handle =
      RefreshScheduler::spawn(source, config(20, vec![ResourceKind::Incidents]));

    let first = handle.next_snapshot().await.expect("first snapshot");
    assert!(!first.partial);
    assert_eq!(first.changes.len(), 1);
    assert_eq!(first.changes[0].change, ChangeKind::Added);

    let second = handle.next_snapshot().await.expect("second snapshot");
    assert!(second.generation > first.generation);
    let tagged: Vec<(ChangeKind, &str)> = second
      .changes
      .iter()
      .map(|r| (r.change, r.id.as_str()))
      .collect();
    assert_eq!(
      tagged,
      vec![
        (ChangeKind::Updated, "INC1"),
        (ChangeKind::Added, "INC2"),
      ]
    );

    handle.shutdown();
    handle.join().await;
  }

  #[tokio::test]
  async fn test_failed_kind_goes_stale_without_blanking_the_rest() {
    let kinds = vec![ResourceKind::Incidents, ResourceKind::Oncalls];
    let source = FakeSource::new();
    source.push(
      ResourceKind::Incidents,
      Ok(collection(
        ResourceKind::Incidents,
        vec![entity(ResourceKind::Incidents, "INC1", "triggered")],
      )),
    );
    source.push(ResourceKind::Incidents, Err("connection refused"));
    source.push(
      ResourceKind::Oncalls,
      Ok(collection(
        ResourceKind::Oncalls,
        vec![entity(ResourceKind::Oncalls, "SHIFT1", "on")],
      )),
    );
    source.push(
      ResourceKind::Oncalls,
      Ok(collection(
        ResourceKind::Oncalls,
        vec![
          entity(ResourceKind::Oncalls, "SHIFT1", "on"),
          entity(ResourceKind::Oncalls, "SHIFT2", "on"),
        ],
      )),
    );

    let mut handle = RefreshScheduler::spawn(source, config(20, kinds));

    let first = handle.next_snapshot().await.expect("first snapshot");
    assert!(!first.partial);

    let second = handle.next_snapshot().await.expect("second snapshot");
    assert!(second.partial);
    assert!(second.generation > first.generation);

    let marker = second
      .stale_for(ResourceKind::Incidents)
      .expect("incidents stale");
    assert!(marker.reason.contains("unavailable"));
    assert!(second.stale_for(ResourceKind::Oncalls).is_none());

    // Incidents reused from the prior generation.
    let incidents: Vec<&str> = second
      .entities_of(ResourceKind::Incidents)
      .map(|e| e.id.as_str())
      .collect();
    assert_eq!(incidents, vec!["INC1"]);

    // On-calls are fresh.
    let added: Vec<&str> = second
      .changes
      .iter()
      .filter(|r| r.change == ChangeKind::Added)
      .map(|r| r.id.as_str())
      .collect();
    assert_eq!(added, vec!["SHIFT2"]);

    handle.shutdown();
    handle.join().await;
  }

  #[tokio::test]
  async fn test_cancellation_mid_cycle_produces_no_snapshot() {
    let source = FakeSource::with_delay(Duration::from_millis(500));
    let mut handle =
      RefreshScheduler::spawn(source, config(10, vec![ResourceKind::Incidents]));

    // Let the first cycle get in flight, then cancel.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown();
    handle.join().await;

    assert!(handle.next_snapshot().await.is_none());
  }

  #[tokio::test]
  async fn test_force_refresh_runs_ahead_of_the_interval() {
    let source = FakeSource::new();
    let mut handle = RefreshScheduler::spawn(
      source,
      RefreshConfig {
        interval: Duration::from_secs(60),
        cycle_deadline: Duration::from_secs(5),
        kinds: vec![ResourceKind::Incidents],
      },
    );

    // First cycle fires immediately.
    let first = tokio::time::timeout(Duration::from_secs(1), handle.next_snapshot())
      .await
      .expect("first snapshot in time")
      .expect("snapshot");

    handle.force_refresh();
    let second = tokio::time::timeout(Duration::from_secs(1), handle.next_snapshot())
      .await
      .expect("forced snapshot well before the interval")
      .expect("snapshot");
    assert!(second.generation > first.generation);

    handle.shutdown();
    handle.join().await;
  }

  #[tokio::test]
  async fn test_cycle_deadline_marks_slow_kinds_stale() {
    let source = FakeSource::with_delay(Duration::from_millis(400));
    let mut handle = RefreshScheduler::spawn(
      source,
      RefreshConfig {
        interval: Duration::from_secs(60),
        cycle_deadline: Duration::from_millis(50),
        kinds: vec![ResourceKind::Incidents],
      },
    );

    let snapshot = tokio::time::timeout(Duration::from_secs(1), handle.next_snapshot())
      .await
      .expect("snapshot despite slow fetch")
      .expect("snapshot");

    assert!(snapshot.partial);
    let marker = snapshot
      .stale_for(ResourceKind::Incidents)
      .expect("incidents stale");
    assert!(marker.reason.contains("deadline"));

    handle.shutdown();
    handle.join().await;
  }
}
