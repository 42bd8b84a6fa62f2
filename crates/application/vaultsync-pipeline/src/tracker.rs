use std::collections::HashMap;
use std::sync::Arc;
use vaultsync_core::{SyncProgress, SyncStatus};

/// Receives a vault's progress after every state transition.
pub type ProgressCallback = Arc<dyn Fn(&SyncProgress) + Send + Sync>;

/// A listener together with the snapshot it should see. Returned instead of
/// invoked so callers can fire it after releasing their lock.
pub(crate) type Notification = Option<(ProgressCallback, SyncProgress)>;

#[derive(Debug, Clone, Copy)]
struct VaultProgress {
    pass: u64,
    /// Total fixed up front by `begin_pass`; otherwise it grows per enqueue.
    planned: bool,
    open: bool,
    progress: SyncProgress,
}

/// Per-vault progress counters, split into passes.
///
/// Every operation carries the pass id it was enqueued under. Transitions
/// reported with a stale pass id are dropped, so a restarted sync never sees
/// terminal outcomes of the pass it replaced.
#[derive(Default)]
pub struct ProgressBook {
    vaults: HashMap<String, VaultProgress>,
    listeners: HashMap<String, ProgressCallback>,
    next_pass: u64,
}

impl ProgressBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_pass(&mut self) -> u64 {
        self.next_pass += 1;
        self.next_pass
    }

    fn notification(&self, vault_id: &str) -> Notification {
        let listener = self.listeners.get(vault_id)?;
        let state = self.vaults.get(vault_id)?;
        Some((listener.clone(), state.progress))
    }

    /// Start a planned pass with a known number of operations.
    pub(crate) fn begin_pass(&mut self, vault_id: &str, total: u64) -> (u64, Notification) {
        let pass = self.fresh_pass();
        let status = if total == 0 {
            SyncStatus::Completed
        } else {
            SyncStatus::Syncing
        };
        self.vaults.insert(
            vault_id.to_string(),
            VaultProgress {
                pass,
                planned: true,
                open: total > 0,
                progress: SyncProgress {
                    total,
                    status,
                    ..SyncProgress::default()
                },
            },
        );
        (pass, self.notification(vault_id))
    }

    /// Pass id for a newly enqueued operation. Outside a planned pass each
    /// enqueue adds one to the total of an implicit pass.
    pub(crate) fn pass_for_enqueue(&mut self, vault_id: &str) -> u64 {
        if let Some(state) = self.vaults.get_mut(vault_id) {
            if state.open {
                if !state.planned {
                    state.progress.total += 1;
                }
                return state.pass;
            }
        }

        let pass = self.fresh_pass();
        self.vaults.insert(
            vault_id.to_string(),
            VaultProgress {
                pass,
                planned: false,
                open: true,
                progress: SyncProgress {
                    total: 1,
                    status: SyncStatus::Syncing,
                    ..SyncProgress::default()
                },
            },
        );
        pass
    }

    fn current(&mut self, vault_id: &str, pass: u64) -> Option<&mut VaultProgress> {
        self.vaults.get_mut(vault_id).filter(|s| s.pass == pass)
    }

    pub(crate) fn op_started(&mut self, vault_id: &str, pass: u64) -> Notification {
        let state = self.current(vault_id, pass)?;
        state.progress.in_progress += 1;
        state.progress.status = SyncStatus::Processing;
        self.notification(vault_id)
    }

    /// A failed attempt went back to the queue.
    pub(crate) fn op_requeued(&mut self, vault_id: &str, pass: u64) -> Notification {
        let state = self.current(vault_id, pass)?;
        state.progress.in_progress = state.progress.in_progress.saturating_sub(1);
        self.notification(vault_id)
    }

    /// Terminal outcome. `queued_left` is how many operations of this pass
    /// are still waiting in the queue.
    pub(crate) fn op_finished(
        &mut self,
        vault_id: &str,
        pass: u64,
        success: bool,
        queued_left: usize,
    ) -> Notification {
        let state = self.current(vault_id, pass)?;
        let p = &mut state.progress;
        p.in_progress = p.in_progress.saturating_sub(1);
        if p.settled() < p.total {
            if success {
                p.completed += 1;
            } else {
                p.failed += 1;
            }
        }
        if p.in_progress == 0 && queued_left == 0 && p.settled() >= p.total {
            p.status = SyncStatus::Completed;
            state.open = false;
        }
        self.notification(vault_id)
    }

    /// All handles of `pass` have settled.
    pub(crate) fn finish_pass(&mut self, vault_id: &str, pass: u64) -> Notification {
        let state = self.current(vault_id, pass)?;
        if state.progress.in_progress == 0 && state.progress.status != SyncStatus::Error {
            state.progress.status = SyncStatus::Completed;
        }
        state.open = false;
        self.notification(vault_id)
    }

    /// Planning failed before anything was enqueued.
    pub(crate) fn mark_error(&mut self, vault_id: &str) -> Notification {
        let pass = self.fresh_pass();
        let state = self
            .vaults
            .entry(vault_id.to_string())
            .or_insert(VaultProgress {
                pass,
                planned: true,
                open: false,
                progress: SyncProgress::default(),
            });
        state.pass = pass;
        state.open = false;
        state.progress.in_progress = 0;
        state.progress.status = SyncStatus::Error;
        self.notification(vault_id)
    }

    /// Close the current pass after its queued work was dropped. Running
    /// operations keep going but no longer count.
    pub(crate) fn retire(&mut self, vault_id: &str) -> Notification {
        let pass = self.fresh_pass();
        let state = self.vaults.get_mut(vault_id)?;
        state.pass = pass;
        state.open = false;
        state.progress.in_progress = 0;
        if state.progress.status != SyncStatus::Completed {
            state.progress.status = SyncStatus::Idle;
        }
        self.notification(vault_id)
    }

    pub(crate) fn is_current(&self, vault_id: &str, pass: u64) -> bool {
        self.vaults.get(vault_id).is_some_and(|s| s.pass == pass)
    }

    pub fn snapshot(&self, vault_id: &str) -> Option<SyncProgress> {
        self.vaults.get(vault_id).map(|s| s.progress)
    }

    pub fn subscribe(&mut self, vault_id: &str, callback: ProgressCallback) {
        self.listeners.insert(vault_id.to_string(), callback);
    }

    pub fn unsubscribe(&mut self, vault_id: &str) {
        self.listeners.remove(vault_id);
    }

    /// Drop counters for the vault. Later transitions from its running
    /// operations no longer match any pass and are ignored.
    pub fn forget(&mut self, vault_id: &str) {
        self.vaults.remove(vault_id);
    }
}
