use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vaultsync_core::{OperationOutcome, QueuedOperation, SyncProgress};

use crate::sync::SyncError;
use crate::tracker::{Notification, ProgressBook, ProgressCallback};

/// Runs one queued operation to completion. The scheduler owns retries;
/// implementations make a single attempt.
#[async_trait::async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, op: &QueuedOperation) -> Result<OperationOutcome, SyncError>;
}

/// Point-in-time queue counters for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub active: usize,
}

type Reply = oneshot::Sender<Result<OperationOutcome, SyncError>>;

/// Resolves once the operation succeeds or is abandoned.
#[derive(Debug)]
pub struct OperationHandle {
    id: Uuid,
    rx: oneshot::Receiver<Result<OperationOutcome, SyncError>>,
}

impl OperationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn wait(self) -> Result<OperationOutcome, SyncError> {
        self.rx.await.unwrap_or(Err(SyncError::Cancelled))
    }
}

struct Pending {
    op: QueuedOperation,
    seq: u64,
    pass: u64,
    reply: Reply,
}

struct Running {
    op: QueuedOperation,
    pass: u64,
    reply: Reply,
}

#[derive(Default)]
struct State {
    queue: Vec<Pending>,
    next_seq: u64,
    workers_started: bool,
    progress: ProgressBook,
}

impl State {
    /// Highest priority first, insertion order among equals.
    fn take_next(&mut self) -> Option<Pending> {
        let idx = self
            .queue
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.op.priority
                    .cmp(&b.op.priority)
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i)?;
        Some(self.queue.swap_remove(idx))
    }

    fn queued_for(&self, vault_id: &str, pass: u64) -> usize {
        self.queue
            .iter()
            .filter(|p| p.pass == pass && p.op.vault_id == vault_id)
            .count()
    }

    fn push(&mut self, op: QueuedOperation, pass: u64, reply: Reply) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Pending {
            op,
            seq,
            pass,
            reply,
        });
    }
}

struct Shared {
    executor: Arc<dyn OperationExecutor>,
    state: Mutex<State>,
    wake: Notify,
    shutdown: CancellationToken,
    workers: usize,
    pending: AtomicUsize,
    active: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sync_counters(&self, state: &State) {
        self.pending.store(state.queue.len(), Ordering::Relaxed);
    }

    fn next_job(&self) -> Option<Running> {
        let (job, note, more) = {
            let mut state = self.lock();
            let next = state.take_next()?;
            let note = state.progress.op_started(&next.op.vault_id, next.pass);
            self.active.fetch_add(1, Ordering::Relaxed);
            self.sync_counters(&state);
            let more = !state.queue.is_empty();
            (next, note, more)
        };
        // Pass the wakeup on so idle workers pick up the rest.
        if more {
            self.wake.notify_one();
        }
        notify(note);
        Some(Running {
            op: job.op,
            pass: job.pass,
            reply: job.reply,
        })
    }

    fn settle(&self, job: Running, result: Result<OperationOutcome, SyncError>) {
        let Running { mut op, pass, reply } = job;
        let vault_id = op.vault_id.clone();

        let (note, terminal) = {
            let mut state = self.lock();
            self.active.fetch_sub(1, Ordering::Relaxed);

            match result {
                Err(e)
                    if e.is_retryable()
                        && op.retries < op.max_retries
                        && !self.shutdown.is_cancelled()
                        && state.progress.is_current(&vault_id, pass) =>
                {
                    op.retries += 1;
                    op.priority = op.priority.saturating_sub(1);
                    warn!(
                        id = %op.id,
                        retries = op.retries,
                        priority = op.priority,
                        "Operation failed, requeueing: {}",
                        e
                    );
                    let note = state.progress.op_requeued(&vault_id, pass);
                    state.push(op, pass, reply);
                    self.sync_counters(&state);
                    (note, None)
                }
                result => {
                    let queued_left = state.queued_for(&vault_id, pass);
                    let note = state.progress.op_finished(
                        &vault_id,
                        pass,
                        result.is_ok(),
                        queued_left,
                    );
                    (note, Some((op, reply, result)))
                }
            }
        };

        notify(note);
        match terminal {
            None => self.wake.notify_one(),
            Some((op, reply, result)) => {
                match &result {
                    Ok(outcome) => debug!(id = %op.id, path = %outcome.relative_path, "Operation completed"),
                    Err(e) => warn!(id = %op.id, retries = op.retries, "Operation failed permanently: {}", e),
                }
                // The caller may have stopped waiting.
                let _ = reply.send(result);
            }
        }
    }
}

fn notify(note: Notification) {
    if let Some((callback, progress)) = note {
        callback(&progress);
    }
}

fn reject(dropped: Vec<Pending>) -> usize {
    let count = dropped.len();
    for pending in dropped {
        let _ = pending.reply.send(Err(SyncError::Cancelled));
    }
    count
}

fn cancel(vault_id: &str, dropped: Vec<Pending>) -> usize {
    let count = reject(dropped);
    if count > 0 {
        info!(vault_id, count, "Cleared queued operations");
    }
    count
}

async fn worker_loop(shared: Arc<Shared>, worker: usize) {
    debug!(worker, "Scheduler worker started");
    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }
        let Some(job) = shared.next_job() else {
            tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                _ = shared.wake.notified() => continue,
            }
        };
        let result = shared.executor.execute(&job.op).await;
        shared.settle(job, result);
    }
    debug!(worker, "Scheduler worker stopped");
}

/// Bounded worker pool over a priority queue of upload and download
/// operations, with per-vault progress.
///
/// Workers are spawned on the first enqueue and run until the scheduler is
/// shut down or dropped. Enqueueing never waits for a free slot.
pub struct OperationScheduler {
    shared: Arc<Shared>,
}

impl OperationScheduler {
    pub fn new(executor: Arc<dyn OperationExecutor>, max_concurrent: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                executor,
                state: Mutex::new(State::default()),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                workers: max_concurrent.max(1),
                pending: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.workers
    }

    fn ensure_workers(&self, state: &mut State) {
        if state.workers_started {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available; queued work waits for the next enqueue");
            return;
        };
        for worker in 0..self.shared.workers {
            handle.spawn(worker_loop(self.shared.clone(), worker));
        }
        state.workers_started = true;
    }

    pub fn enqueue(&self, op: QueuedOperation) -> OperationHandle {
        let (tx, rx) = oneshot::channel();
        let id = op.id;
        {
            let mut state = self.shared.lock();
            if self.shared.shutdown.is_cancelled() {
                debug!(%id, "Scheduler is shut down, rejecting operation");
                let _ = tx.send(Err(SyncError::Cancelled));
                return OperationHandle { id, rx };
            }
            self.ensure_workers(&mut state);
            let pass = state.progress.pass_for_enqueue(&op.vault_id);
            debug!(%id, kind = ?op.kind(), priority = op.priority, "Enqueued");
            state.push(op, pass, tx);
            self.shared.sync_counters(&state);
        }
        self.shared.wake.notify_one();
        OperationHandle { id, rx }
    }

    /// Drop every not-yet-started operation of the vault. Their handles
    /// resolve to [`SyncError::Cancelled`]; running operations finish.
    pub fn clear(&self, vault_id: &str) -> usize {
        let (dropped, note) = {
            let mut state = self.shared.lock();
            let dropped = self.take_queued(&mut state, vault_id);
            (dropped, state.progress.retire(vault_id))
        };
        notify(note);
        cancel(vault_id, dropped)
    }

    fn take_queued(&self, state: &mut State, vault_id: &str) -> Vec<Pending> {
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.queue)
            .into_iter()
            .partition(|p| p.op.vault_id == vault_id);
        state.queue = kept;
        self.shared.sync_counters(state);
        dropped
    }

    /// Lock-free read; may lag the next scheduling decision.
    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            pending: self.shared.pending.load(Ordering::Relaxed),
            active: self.shared.active.load(Ordering::Relaxed),
        }
    }

    /// Start a sync pass of `total` operations for the vault. Work still
    /// queued from an earlier pass is dropped.
    pub fn begin_pass(&self, vault_id: &str, total: u64) -> u64 {
        let (pass, note, dropped) = {
            let mut state = self.shared.lock();
            let dropped = self.take_queued(&mut state, vault_id);
            let (pass, note) = state.progress.begin_pass(vault_id, total);
            (pass, note, dropped)
        };
        notify(note);
        cancel(vault_id, dropped);
        pass
    }

    /// Close the pass. After shutdown the pass is retired instead, since its
    /// cancelled operations were never counted.
    pub fn finish_pass(&self, vault_id: &str, pass: u64) {
        let note = {
            let mut state = self.shared.lock();
            if self.shared.shutdown.is_cancelled() {
                if state.progress.is_current(vault_id, pass) {
                    state.progress.retire(vault_id)
                } else {
                    None
                }
            } else {
                state.progress.finish_pass(vault_id, pass)
            }
        };
        notify(note);
    }

    pub fn mark_error(&self, vault_id: &str) {
        let note = self.shared.lock().progress.mark_error(vault_id);
        notify(note);
    }

    pub fn progress(&self, vault_id: &str) -> Option<SyncProgress> {
        self.shared.lock().progress.snapshot(vault_id)
    }

    pub fn subscribe(&self, vault_id: &str, callback: ProgressCallback) {
        self.shared.lock().progress.subscribe(vault_id, callback);
    }

    pub fn unsubscribe(&self, vault_id: &str) {
        self.shared.lock().progress.unsubscribe(vault_id);
    }

    /// Clear queued work, listener and counters for the vault.
    pub fn forget(&self, vault_id: &str) {
        self.clear(vault_id);
        let mut state = self.shared.lock();
        state.progress.unsubscribe(vault_id);
        state.progress.forget(vault_id);
    }

    /// Stop the workers and cancel every queued operation. Running
    /// operations finish without retrying; later enqueues resolve as
    /// [`SyncError::Cancelled`].
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let (dropped, notes) = {
            let mut state = self.shared.lock();
            let dropped = std::mem::take(&mut state.queue);
            self.shared.sync_counters(&state);
            let mut vaults: Vec<&str> = dropped.iter().map(|p| p.op.vault_id.as_str()).collect();
            vaults.sort_unstable();
            vaults.dedup();
            let notes: Vec<Notification> = vaults
                .into_iter()
                .map(|vault_id| state.progress.retire(vault_id))
                .collect();
            (dropped, notes)
        };
        notes.into_iter().for_each(notify);
        let count = reject(dropped);
        info!(count, "Scheduler shut down");
    }
}

impl Drop for OperationScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}
