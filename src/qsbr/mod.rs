//! Quiescent-state-based reclamation (component E).
//!
//! The concurrent tree never frees a node the instant it's unlinked: a
//! reader elsewhere may still hold an optimistic read critical section open
//! on it. Instead, unlinked nodes are handed to [`retire`], which defers the
//! actual deallocation until a global epoch has advanced far enough that
//! every thread registered with this module has passed through at least one
//! call to [`quiescent_state`] since the node was retired — at that point no
//! thread could possibly still be mid-traversal through it.
//!
//! A thread must [`register_this_thread`] before calling [`retire`] or
//! [`quiescent_state`], and should [`unregister_this_thread`] before exiting
//! if it might otherwise leave pending garbage stranded; any garbage still
//! queued at that point is handed to a shared orphan list so a surviving
//! thread's future [`quiescent_state`] calls can still reclaim it.

use std::{
    cell::RefCell,
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use once_cell::sync::Lazy;

#[cfg(feature = "stats")]
use crate::stats::QsbrStats;

/// Number of global epoch advances that must occur after a node is retired
/// before it is safe to actually free it. Two is the minimum that
/// guarantees every reader's read critical section, however it straddles
/// epoch boundaries, has fully completed.
const GRACE_EPOCHS: u64 = 2;

/// A thunk that frees one retired node. Raw node pointers aren't `Send`, but
/// a `Retired` thunk is only ever invoked once, by whichever thread pops it
/// off the queue that owns it, so no two threads ever touch the same one.
struct Retired {
    epoch: u64,
    drop_fn: Box<dyn FnOnce()>,
}

// SAFETY: see the note on `Retired` above: exclusive, single-invocation
// ownership transfers cleanly across the thread boundary that enqueues vs.
// the thread that eventually dequeues and runs it.
unsafe impl Send for Retired {}

struct ThreadState {
    /// The global epoch this thread last reported observing. A sentinel of
    /// `u64::MAX` (set by [`pause`]) marks the thread as not participating,
    /// so its absence never stalls epoch advancement.
    local_epoch: AtomicU64,
    garbage: Mutex<VecDeque<Retired>>,
}

struct Registry {
    global_epoch: AtomicU64,
    threads: Mutex<Vec<Arc<ThreadState>>>,
    orphaned_garbage: Mutex<VecDeque<Retired>>,
    #[cfg(feature = "stats")]
    stats: QsbrStats,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    global_epoch: AtomicU64::new(0),
    threads: Mutex::new(Vec::new()),
    orphaned_garbage: Mutex::new(VecDeque::new()),
    #[cfg(feature = "stats")]
    stats: QsbrStats::default(),
});

thread_local! {
    static LOCAL: RefCell<Option<Arc<ThreadState>>> = const { RefCell::new(None) };
}

/// Register the calling thread as a participant. Idempotent.
pub fn register_this_thread() {
    LOCAL.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            let state = Arc::new(ThreadState {
                local_epoch: AtomicU64::new(REGISTRY.global_epoch.load(Ordering::Acquire)),
                garbage: Mutex::new(VecDeque::new()),
            });
            REGISTRY.threads.lock().unwrap().push(Arc::clone(&state));
            *slot = Some(state);
        }
    });
}

/// Unregister the calling thread, handing any of its still-pending garbage
/// to the shared orphan list for a surviving thread to reclaim later.
pub fn unregister_this_thread() {
    LOCAL.with(|cell| {
        let Some(state) = cell.borrow_mut().take() else {
            return;
        };
        REGISTRY
            .threads
            .lock()
            .unwrap()
            .retain(|t| !Arc::ptr_eq(t, &state));
        let mut pending = state.garbage.lock().unwrap();
        if !pending.is_empty() {
            #[cfg(feature = "stats")]
            REGISTRY.stats.orphan_adoption_count.fetch_add(1, Ordering::Relaxed);
            REGISTRY
                .orphaned_garbage
                .lock()
                .unwrap()
                .extend(pending.drain(..));
        }
    });
}

/// Report that the calling thread currently holds no references into the
/// structure, advance the global epoch if every participant agrees, and
/// reclaim whatever garbage has become safe to free.
///
/// Call this between operations, not while a lock or read critical section
/// is held — this is the thread's promise that it isn't.
pub fn quiescent_state() {
    LOCAL.with(|cell| {
        let borrow = cell.borrow();
        let Some(state) = borrow.as_ref() else {
            return;
        };
        state
            .local_epoch
            .store(REGISTRY.global_epoch.load(Ordering::Acquire), Ordering::Release);
        try_advance_global_epoch();
        reclaim_eligible(state);
    });
}

/// Mark the calling thread as not participating (e.g. before a blocking
/// syscall), so its absence never stalls other threads' reclamation. Pair
/// with [`resume`], or use the RAII [`QuiescentGuard`].
pub fn pause() {
    LOCAL.with(|cell| {
        if let Some(state) = cell.borrow().as_ref() {
            state.local_epoch.store(u64::MAX, Ordering::Release);
        }
    });
}

/// Resume participation after [`pause`]; equivalent to [`quiescent_state`].
pub fn resume() {
    quiescent_state();
}

/// RAII wrapper for the span of one public tree operation: reports
/// quiescence on drop so participation is automatic and callers never have
/// to remember to do it themselves.
///
/// `crate::concurrent::ConcurrentTreeMap` opens one of these at the top of
/// every public method, registering the calling thread first if it hasn't
/// been already. By the time the guard drops, the operation has returned
/// whatever it needed from the tree, so reporting quiescence here is sound:
/// the calling thread provably holds no more references into the structure.
pub struct OperationGuard(());

/// Begin a scope covering one public tree operation on the calling thread,
/// registering it with QSBR first if necessary.
pub fn begin_operation() -> OperationGuard {
    register_this_thread();
    OperationGuard(())
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        quiescent_state();
    }
}

/// RAII wrapper around [`pause`]/[`resume`] for a scope in which the calling
/// thread is known not to touch the structure.
pub struct QuiescentGuard(());

impl QuiescentGuard {
    /// Pause participation for the lifetime of the returned guard.
    pub fn new() -> Self {
        pause();
        QuiescentGuard(())
    }
}

impl Default for QuiescentGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for QuiescentGuard {
    fn drop(&mut self) {
        resume();
    }
}

/// Defer `drop_fn` until it is provably safe to run. Registers against the
/// calling thread's queue if registered, or the
/// shared orphan list otherwise.
pub fn retire(drop_fn: impl FnOnce() + 'static) {
    let epoch = REGISTRY.global_epoch.load(Ordering::Acquire);
    let item = Retired {
        epoch,
        drop_fn: Box::new(drop_fn),
    };
    #[cfg(feature = "stats")]
    REGISTRY.stats.retire_count.fetch_add(1, Ordering::Relaxed);

    LOCAL.with(|cell| {
        let borrow = cell.borrow();
        match borrow.as_ref() {
            Some(state) => {
                let mut queue = state.garbage.lock().unwrap();
                queue.push_back(item);
                #[cfg(feature = "stats")]
                REGISTRY.stats.observe_queue_len(queue.len() as u64);
            },
            None => {
                REGISTRY.orphaned_garbage.lock().unwrap().push_back(item);
            },
        }
    });
}

fn try_advance_global_epoch() {
    let threads = REGISTRY.threads.lock().unwrap();
    let current = REGISTRY.global_epoch.load(Ordering::Acquire);
    let all_caught_up = threads
        .iter()
        .all(|t| t.local_epoch.load(Ordering::Acquire) >= current);
    if all_caught_up
        && REGISTRY
            .global_epoch
            .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    {
        #[cfg(feature = "stats")]
        REGISTRY.stats.epoch_change_count.fetch_add(1, Ordering::Relaxed);
    }
}

fn reclaim_eligible(state: &ThreadState) {
    let global = REGISTRY.global_epoch.load(Ordering::Acquire);
    drain_safe(&mut state.garbage.lock().unwrap(), global);
    // Opportunistically help drain the shared orphan list too, so garbage
    // from threads that have already unregistered doesn't linger forever.
    if let Ok(mut orphaned) = REGISTRY.orphaned_garbage.try_lock() {
        drain_safe(&mut orphaned, global);
    }
}

fn drain_safe(queue: &mut VecDeque<Retired>, global_epoch: u64) {
    while let Some(front) = queue.front() {
        if global_epoch.saturating_sub(front.epoch) >= GRACE_EPOCHS {
            let item = queue.pop_front().expect("front just observed");
            (item.drop_fn)();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn retire_without_registration_goes_to_orphan_list() {
        // Exercise the no-participant path directly; doesn't touch the
        // shared registry's thread list.
        let freed = Arc::new(AtomicUsize::new(0));
        let freed_clone = Arc::clone(&freed);
        unregister_this_thread(); // ensure this test thread isn't registered
        retire(move || {
            freed_clone.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(freed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn register_quiesce_retire_eventually_frees() {
        register_this_thread();
        let freed = Arc::new(AtomicUsize::new(0));
        let freed_clone = Arc::clone(&freed);
        retire(move || {
            freed_clone.fetch_add(1, Ordering::Relaxed);
        });
        // Two quiescent reports are enough to advance the epoch twice when
        // this is the only participant.
        quiescent_state();
        quiescent_state();
        quiescent_state();
        assert_eq!(freed.load(Ordering::Relaxed), 1);
        unregister_this_thread();
    }

    #[test]
    fn pause_excludes_thread_from_epoch_gating() {
        register_this_thread();
        let guard = QuiescentGuard::new();
        // A paused thread must not block a concurrent reclamation pass run
        // by some other simulated participant; nothing to assert beyond
        // "this doesn't deadlock or panic".
        drop(guard);
        unregister_this_thread();
    }
}
