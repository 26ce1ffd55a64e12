//! Deferred mutations against live render state.
//!
//! Any thread may queue a transaction at any time; worker 0 applies the whole
//! queue in FIFO order at the transaction phase of the next frame. The queue
//! lock is dedicated: it is never held together with the callback lock, so
//! transaction traffic cannot contend with callback iteration.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Opaque handle for cancelling a queued (or continuously re-queued)
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

/// What happens to a transaction after it has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionPolicy {
    /// Applied exactly once, then dropped.
    #[default]
    OneShot,
    /// Re-queued for the next frame after every application; runs each frame
    /// until cancelled.
    Continue,
}

pub struct Transaction<Ctx: ?Sized> {
    id: TransactionId,
    name: &'static str,
    policy: TransactionPolicy,
    /// Silent transactions do not mark the frame as changed.
    silent: bool,
    action: Box<dyn FnMut(&Ctx) + Send>,
}

impl<Ctx: ?Sized> Transaction<Ctx> {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub struct TransactionQueue<Ctx: ?Sized> {
    pending: Mutex<VecDeque<Transaction<Ctx>>>,
    cancelled: Mutex<HashSet<TransactionId>>,
    next_id: AtomicU64,
    verbose: AtomicBool,
}

impl<Ctx: ?Sized> TransactionQueue<Ctx> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            cancelled: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            verbose: AtomicBool::new(false),
        }
    }

    /// Logs every applied transaction at debug level instead of trace.
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    pub fn add(
        &self,
        name: &'static str,
        policy: TransactionPolicy,
        silent: bool,
        action: impl FnMut(&Ctx) + Send + 'static,
    ) -> TransactionId {
        let id = TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().push_back(Transaction {
            id,
            name,
            policy,
            silent,
            action: Box::new(action),
        });
        id
    }

    /// Marks a transaction so it is dropped instead of applied; the only way
    /// to stop a `Continue` transaction.
    pub fn cancel(&self, id: TransactionId) {
        self.cancelled.lock().insert(id);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Applies every transaction queued before this call, in FIFO order, and
    /// returns whether any non-silent transaction ran.
    ///
    /// The queue is swapped out first so that actions which queue further
    /// transactions land in the next frame rather than deadlocking on the
    /// queue lock. `Continue` transactions are re-queued afterwards.
    pub fn apply_all(&self, ctx: &Ctx) -> bool {
        let batch: Vec<Transaction<Ctx>> = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return false;
            }
            pending.drain(..).collect()
        };

        let verbose = self.verbose.load(Ordering::Relaxed);
        let mut changed = false;
        let mut requeue = Vec::new();
        for mut transaction in batch {
            if self.take_cancelled(transaction.id) {
                tracing::trace!(name = transaction.name, "dropping cancelled transaction");
                continue;
            }
            if verbose {
                tracing::debug!(name = transaction.name, "applying transaction");
            } else {
                tracing::trace!(name = transaction.name, "applying transaction");
            }
            (transaction.action)(ctx);
            changed |= !transaction.silent;
            if transaction.policy == TransactionPolicy::Continue {
                requeue.push(transaction);
            }
        }

        if !requeue.is_empty() {
            let mut pending = self.pending.lock();
            for transaction in requeue {
                pending.push_back(transaction);
            }
        }
        changed
    }

    fn take_cancelled(&self, id: TransactionId) -> bool {
        self.cancelled.lock().remove(&id)
    }
}

impl<Ctx: ?Sized> Default for TransactionQueue<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}
