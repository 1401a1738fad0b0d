//! Drain loop worker and the handle applications use to talk to it.
//!
//! The worker is a single tokio task that owns every queue mutation.
//! Callers hold a [`SyncHandle`] and send it commands over a channel; reads
//! go straight to the store. One remote attempt runs at a time, on its own
//! task, so enqueues are answered while the network call is outstanding.

use std::collections::HashSet;
use std::future::pending;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::db::{QueueStore, SnapshotStore};
use crate::error::{Error, Result};
use crate::models::{NewOperation, Operation, OperationId, OperationKind, OperationPatch, OperationStatus};
use crate::state::SyncStatus;
use crate::util::compact_text;

use super::backoff::Backoff;
use super::remote::{RemoteWrite, WriteOutcome};
use super::surface::{attention_items, AttentionItem, AttentionSummary};

/// What one drain pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub applied: usize,
    pub retrying: usize,
    pub failed: usize,
    pub conflicts: usize,
}

/// Builder for the sync engine worker.
pub struct SyncEngine<R> {
    queue: Arc<dyn QueueStore>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    remote: Arc<R>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<R: RemoteWrite> SyncEngine<R> {
    pub fn new(queue: Arc<dyn QueueStore>, remote: R) -> Self {
        Self {
            queue,
            snapshots: None,
            remote: Arc::new(remote),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Overwrite local snapshots with entities acknowledged by the remote
    #[must_use]
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start the worker on the current tokio runtime.
    ///
    /// Fails on invalid configuration or when the queue cannot be read.
    pub fn spawn(self) -> Result<SyncHandle> {
        self.config.validate()?;

        let online = self.config.start_online;
        let initial = SyncStatus::from_operations(&self.queue.list()?, online, false);
        let (commands_tx, commands_rx) = mpsc::channel(self.config.command_buffer);
        let (status_tx, status_rx) = watch::channel(initial);

        let handle = SyncHandle {
            commands: commands_tx,
            status: status_rx,
            queue: Arc::clone(&self.queue),
        };

        let worker = Worker {
            backoff: Backoff::from_config(&self.config),
            queue: self.queue,
            snapshots: self.snapshots,
            remote: self.remote,
            clock: self.clock,
            config: self.config,
            commands: commands_rx,
            status: status_tx,
            online,
            pass: None,
            in_flight: None,
            wake_at: None,
        };
        tokio::spawn(worker.run());

        Ok(handle)
    }
}

enum Command {
    Enqueue {
        request: NewOperation,
        reply: oneshot::Sender<Result<Operation>>,
    },
    Retry {
        id: OperationId,
        reply: oneshot::Sender<Result<bool>>,
    },
    Discard {
        id: OperationId,
        reply: oneshot::Sender<Result<bool>>,
    },
    Clear {
        reply: oneshot::Sender<Result<()>>,
    },
    SetOnline {
        online: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    SyncNow {
        reply: oneshot::Sender<Result<DrainReport>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Queue inspection and control API exposed to the application shell.
///
/// Cheap to clone. The worker stops when `shutdown` is called or every
/// handle is dropped.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SyncStatus>,
    queue: Arc<dyn QueueStore>,
}

impl SyncHandle {
    /// Queue a write; it is durable once this returns
    pub async fn enqueue(
        &self,
        kind: impl Into<OperationKind>,
        payload: Value,
    ) -> Result<Operation> {
        self.enqueue_request(NewOperation::new(kind, payload)).await
    }

    /// Queue a write for an explicitly named remote resource
    pub async fn enqueue_for(
        &self,
        kind: impl Into<OperationKind>,
        resource_key: impl Into<String>,
        payload: Value,
    ) -> Result<Operation> {
        self.enqueue_request(NewOperation::new(kind, payload).with_resource_key(resource_key))
            .await
    }

    pub async fn enqueue_request(&self, request: NewOperation) -> Result<Operation> {
        self.request(|reply| Command::Enqueue { request, reply })
            .await
    }

    /// Current queue in insertion order
    pub fn list(&self) -> Result<Vec<Operation>> {
        self.queue.list()
    }

    /// Re-arm a `FAILED` or `CONFLICT` operation.
    ///
    /// Returns `false` when the operation is absent or not waiting on the
    /// user.
    pub async fn retry(&self, id: OperationId) -> Result<bool> {
        self.request(|reply| Command::Retry { id, reply }).await
    }

    /// Remove an operation whatever its status. Returns whether it existed.
    pub async fn discard(&self, id: OperationId) -> Result<bool> {
        self.request(|reply| Command::Discard { id, reply }).await
    }

    /// Drop the whole queue (administrative use)
    pub async fn clear(&self) -> Result<()> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// Report connectivity; coming online starts a drain pass
    pub async fn set_online(&self, online: bool) -> Result<()> {
        self.request(|reply| Command::SetOnline { online, reply })
            .await
    }

    /// Run a drain pass (or join the running one) and wait for it to end
    pub async fn sync_now(&self) -> Result<DrainReport> {
        self.request(|reply| Command::SyncNow { reply }).await
    }

    /// Stop the worker after the in-flight attempt, if any, is recorded
    pub async fn shutdown(self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Operations in `PENDING` or `RETRYING`
    pub fn pending_count(&self) -> usize {
        self.status.borrow().pending_count
    }

    pub fn is_syncing(&self) -> bool {
        self.status.borrow().syncing
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Operations waiting for the user to retry or discard them
    pub fn attention(&self) -> Result<Vec<AttentionItem>> {
        Ok(attention_items(&self.queue.list()?))
    }

    pub fn attention_summary(&self) -> Result<AttentionSummary> {
        Ok(AttentionSummary::from_operations(&self.queue.list()?))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::EngineStopped)?;
        response.await.map_err(|_| Error::EngineStopped)?
    }
}

struct DrainPass {
    /// Attempted during this pass; never attempted twice in one pass
    visited: HashSet<OperationId>,
    report: DrainReport,
    waiters: Vec<oneshot::Sender<Result<DrainReport>>>,
}

struct Attempt {
    operation: Operation,
    task: JoinHandle<WriteOutcome>,
}

struct Worker<R> {
    queue: Arc<dyn QueueStore>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    remote: Arc<R>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    backoff: Backoff,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<SyncStatus>,
    online: bool,
    pass: Option<DrainPass>,
    in_flight: Option<Attempt>,
    /// Earliest moment a `RETRYING` operation leaves its backoff window
    wake_at: Option<Instant>,
}

impl<R: RemoteWrite> Worker<R> {
    async fn run(mut self) {
        tracing::info!(
            "Sync engine started ({})",
            if self.online { "online" } else { "offline" }
        );

        let mut ticker = self.config.sync_interval().and_then(|period| {
            let Some(start) = Instant::now().checked_add(period) else {
                tracing::warn!("Sync interval {period:?} is out of range; periodic drain disabled");
                return None;
            };
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(ticker)
        });

        // Leftovers from a previous session go out as soon as possible
        self.begin_pass(None);
        self.advance();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let ControlFlow::Break(reply) = self.handle(command) {
                            self.stop().await;
                            reply.send(Ok(())).ok();
                            break;
                        }
                    }
                    None => {
                        tracing::debug!("All sync handles dropped; stopping worker");
                        break;
                    }
                },
                (operation, outcome) = join_attempt(&mut self.in_flight) => {
                    self.finish_attempt(&operation, outcome);
                }
                () = tick(&mut ticker) => self.begin_pass(None),
                () = sleep_until_deadline(self.wake_at) => {
                    self.wake_at = None;
                    self.begin_pass(None);
                }
            }
            self.advance();
        }

        tracing::info!("Sync engine stopped");
    }

    /// Apply one command; `Break` carries the reply of a shutdown request
    fn handle(&mut self, command: Command) -> ControlFlow<oneshot::Sender<Result<()>>> {
        match command {
            Command::Enqueue { request, reply } => {
                let result = self.queue.enqueue(request);
                self.publish();
                if result.is_ok() {
                    self.begin_pass(None);
                }
                reply.send(result).ok();
            }
            Command::Retry { id, reply } => {
                let result = self.rearm(&id);
                self.publish();
                if matches!(result, Ok(true)) {
                    self.begin_pass(None);
                }
                reply.send(result).ok();
            }
            Command::Discard { id, reply } => {
                let result = self.queue.remove(&id);
                if matches!(result, Ok(true)) {
                    tracing::info!("Discarded operation {id}");
                }
                self.publish();
                reply.send(result).ok();
            }
            Command::Clear { reply } => {
                let result = self.queue.clear();
                self.publish();
                reply.send(result).ok();
            }
            Command::SetOnline { online, reply } => {
                if self.online != online {
                    tracing::info!(
                        "Connectivity changed: {}",
                        if online { "online" } else { "offline" }
                    );
                    self.online = online;
                    if !online {
                        self.wake_at = None;
                    }
                    self.publish();
                    self.begin_pass(None);
                }
                reply.send(Ok(())).ok();
            }
            Command::SyncNow { reply } => self.begin_pass(Some(reply)),
            Command::Shutdown { reply } => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    /// User-triggered retry: a fresh start with no retry history
    fn rearm(&mut self, id: &OperationId) -> Result<bool> {
        let Some(op) = self.queue.get(id)? else {
            return Ok(false);
        };
        if !op.status.needs_attention() {
            return Ok(false);
        }

        self.queue.update(id, OperationPatch::rearm())?;
        if let Some(pass) = self.pass.as_mut() {
            pass.visited.remove(id);
        }
        tracing::info!("Re-armed {} operation {id} after {}", op.kind, op.status);
        Ok(true)
    }

    /// Start a drain pass, or attach `waiter` to the running one
    fn begin_pass(&mut self, waiter: Option<oneshot::Sender<Result<DrainReport>>>) {
        if !self.online {
            if let Some(waiter) = waiter {
                tracing::debug!("Drain requested while offline; nothing sent");
                waiter.send(Ok(DrainReport::default())).ok();
            }
            return;
        }

        if self.pass.is_none() {
            tracing::debug!("Drain pass started");
            self.wake_at = None;
            self.pass = Some(DrainPass {
                visited: HashSet::new(),
                report: DrainReport::default(),
                waiters: Vec::new(),
            });
            self.publish();
        }
        if let (Some(pass), Some(waiter)) = (self.pass.as_mut(), waiter) {
            pass.waiters.push(waiter);
        }
    }

    /// Start the next attempt, or end the pass when nothing is left
    fn advance(&mut self) {
        if self.in_flight.is_some() || self.pass.is_none() {
            return;
        }
        if !self.online {
            self.finish_pass(Ok(()));
            return;
        }

        match self.next_candidate() {
            Ok(Some(op)) => self.start_attempt(op),
            Ok(None) => self.finish_pass(Ok(())),
            Err(error) => {
                tracing::error!("Failed to read sync queue: {error}");
                self.finish_pass(Err(error));
            }
        }
    }

    /// Oldest runnable operation that is out of its backoff window and not
    /// yet attempted in this pass
    fn next_candidate(&self) -> Result<Option<Operation>> {
        let Some(pass) = self.pass.as_ref() else {
            return Ok(None);
        };
        let now = self.clock.now_millis();
        let ops = self.queue.list()?;

        Ok(runnable(&ops)
            .into_iter()
            .find(|op| !pass.visited.contains(&op.id) && self.backoff.is_eligible(op, now))
            .cloned())
    }

    fn start_attempt(&mut self, operation: Operation) {
        tracing::debug!(
            "Sending {} operation {} (attempt {})",
            operation.kind,
            operation.id,
            operation.retries.saturating_add(1)
        );

        let remote = Arc::clone(&self.remote);
        let kind = operation.kind.clone();
        let payload = operation.payload.clone();
        let task = tokio::spawn(async move { remote.apply(&kind, &payload).await });

        if let Some(pass) = self.pass.as_mut() {
            pass.visited.insert(operation.id);
            pass.report.attempted += 1;
        }
        self.in_flight = Some(Attempt { operation, task });
    }

    fn finish_attempt(&mut self, operation: &Operation, outcome: WriteOutcome) {
        if let Err(error) = self.record(operation, outcome) {
            tracing::error!(
                "Failed to record outcome of operation {}: {error}",
                operation.id
            );
            self.finish_pass(Err(error));
        }
        self.publish();
    }

    /// Turn a remote outcome into a queue transition
    fn record(&mut self, operation: &Operation, outcome: WriteOutcome) -> Result<()> {
        let id = &operation.id;
        let now = self.clock.now_millis();
        let retries = operation.retries.saturating_add(1);
        let attempted = OperationPatch::default().retries(retries).last_attempt(now);

        let counter: fn(&mut DrainReport) = match outcome {
            WriteOutcome::Applied(acknowledged) => {
                self.queue.remove(id)?;
                if let (Some(snapshot), Some(store)) = (acknowledged, self.snapshots.as_ref()) {
                    let snapshot = snapshot.with_stored_at(now);
                    // The remote already holds the write; only the local copy is stale
                    if let Err(error) = store.put(&snapshot) {
                        tracing::error!(
                            "Failed to refresh snapshot {} after operation {id}: {error}",
                            snapshot.id
                        );
                    }
                }
                tracing::info!("Synced {} operation {id}", operation.kind);
                |report: &mut DrainReport| report.applied += 1
            }
            WriteOutcome::Retryable(message) if retries >= self.config.max_retries => {
                tracing::warn!(
                    "Operation {id} failed after {retries} attempts: {message}"
                );
                self.queue.update(
                    id,
                    attempted
                        .status(OperationStatus::Failed)
                        .error(compact_text(&format!("Max retries exceeded: {message}"))),
                )?;
                |report: &mut DrainReport| report.failed += 1
            }
            WriteOutcome::Retryable(message) => {
                tracing::debug!("Operation {id} will be retried: {message}");
                self.queue.update(
                    id,
                    attempted
                        .status(OperationStatus::Retrying)
                        .error(compact_text(&message)),
                )?;
                |report: &mut DrainReport| report.retrying += 1
            }
            WriteOutcome::Permanent(message) => {
                tracing::warn!("Operation {id} rejected: {message}");
                self.queue.update(
                    id,
                    attempted
                        .status(OperationStatus::Failed)
                        .error(compact_text(&message)),
                )?;
                |report: &mut DrainReport| report.failed += 1
            }
            WriteOutcome::Conflict(details) => {
                tracing::warn!("Operation {id} conflicts with remote state: {}", details.message);
                self.queue.update(
                    id,
                    attempted
                        .status(OperationStatus::Conflict)
                        .error(compact_text(&details.message))
                        .remote_snapshot(details.remote),
                )?;
                |report: &mut DrainReport| report.conflicts += 1
            }
        };

        if let Some(pass) = self.pass.as_mut() {
            counter(&mut pass.report);
        }
        Ok(())
    }

    fn finish_pass(&mut self, result: Result<()>) {
        let Some(pass) = self.pass.take() else {
            return;
        };
        let report = pass.report;
        match &result {
            Ok(()) => tracing::debug!("Drain pass finished: {report:?}"),
            Err(error) => tracing::warn!("Drain pass aborted: {error}"),
        }

        self.schedule_wake();
        self.publish();

        // The first waiter gets the original error, later ones its message
        let message = result.as_ref().err().map(ToString::to_string);
        let mut error = result.err();
        for waiter in pass.waiters {
            let reply = match (error.take(), &message) {
                (Some(error), _) => Err(error),
                (None, Some(message)) => Err(Error::SyncAborted(message.clone())),
                (None, None) => Ok(report),
            };
            waiter.send(reply).ok();
        }
    }

    /// Arm the wake-up for the earliest backoff window to close
    fn schedule_wake(&mut self) {
        self.wake_at = None;
        if !self.online {
            return;
        }

        let ops = match self.queue.list() {
            Ok(ops) => ops,
            Err(error) => {
                tracing::warn!("Failed to read queue for retry scheduling: {error}");
                return;
            }
        };
        let Some(next) = runnable(&ops)
            .into_iter()
            .filter_map(|op| self.backoff.next_eligible_at(op))
            .min()
        else {
            return;
        };

        let wait = u64::try_from(next.saturating_sub(self.clock.now_millis())).unwrap_or(0);
        self.wake_at = Instant::now().checked_add(Duration::from_millis(wait));
        tracing::debug!("Next retry in {wait}ms");
    }

    /// Let the in-flight attempt land, then close the pass
    async fn stop(&mut self) {
        if let Some(attempt) = self.in_flight.take() {
            let outcome = task_outcome(attempt.task.await);
            self.finish_attempt(&attempt.operation, outcome);
        }
        self.finish_pass(Ok(()));
    }

    fn publish(&self) {
        let syncing = self.pass.is_some();
        let status = match self.queue.list() {
            Ok(ops) => SyncStatus::from_operations(&ops, self.online, syncing),
            Err(error) => {
                tracing::warn!("Failed to read queue for status: {error}");
                SyncStatus {
                    online: self.online,
                    syncing,
                    ..*self.status.borrow()
                }
            }
        };
        self.status.send_replace(status);
    }
}

/// `PENDING`/`RETRYING` operations not held back by an earlier active
/// operation on the same resource, in queue order
fn runnable(ops: &[Operation]) -> Vec<&Operation> {
    let mut held = HashSet::new();
    ops.iter()
        .filter(|op| op.status.is_active())
        .filter(|op| match op.resource_key.as_deref() {
            Some(key) => held.insert(key),
            None => true,
        })
        .collect()
}

/// A panicking or aborted remote write is a transient failure
fn task_outcome(joined: std::result::Result<WriteOutcome, tokio::task::JoinError>) -> WriteOutcome {
    joined.unwrap_or_else(|error| WriteOutcome::Retryable(format!("remote write task failed: {error}")))
}

/// Resolves when the in-flight attempt completes; never while idle.
///
/// Cancel safe: if dropped early the attempt stays in `slot`.
async fn join_attempt(slot: &mut Option<Attempt>) -> (Operation, WriteOutcome) {
    let Some(attempt) = slot.as_mut() else {
        return pending().await;
    };
    let outcome = task_outcome((&mut attempt.task).await);
    let operation = attempt.operation.clone();
    *slot = None;
    (operation, outcome)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
