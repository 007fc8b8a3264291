//! Optimistic Lock Coupling (OLC): the per-node version-tagged lock that the
//! concurrent tree variant couples across parent/child during descent.
//!
//! Every node header (leaf and inner alike) embeds one
//! [`OptimisticLock`]. The single-threaded variant never touches it beyond
//! construction; the concurrent variant (`crate::concurrent`) is built
//! entirely on top of the three operations here: begin a read critical
//! section, validate it, and acquire/release a write guard.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicU64, Ordering};

// Under `cfg(loom)` (the model-checked build driven by `tests/loom_olc.rs`),
// swap the real atomic for loom's instrumented one so loom can explore
// interleavings of the version word's loads/CAS/stores. Ordinary builds
// (including `cargo test`) never set this cfg and take the std path above.
#[cfg(loom)]
use loom::sync::atomic::{AtomicU64, Ordering};

const OBSOLETE_BIT: u64 = 1;
const LOCKED_BIT: u64 = 1 << 1;
const VERSION_SHIFT: u32 = 2;
const VERSION_INCREMENT: u64 = 1 << VERSION_SHIFT;

/// Internal-only signal that an optimistic read or write attempt lost a
/// race and the calling operation must restart from its top-level retry
/// loop. Never escapes the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restart;

/// One node's version word: `{version: 62 bits, locked: 1 bit, obsolete: 1
/// bit}`, packed into a single `AtomicU64` so acquiring or releasing the
/// lock and bumping the version happen as one atomic step.
#[derive(Debug)]
pub struct OptimisticLock {
    word: AtomicU64,
}

impl Default for OptimisticLock {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimisticLock {
    /// Construct a fresh, unlocked lock at version 0.
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        OptimisticLock {
            word: AtomicU64::new(0),
        }
    }

    /// Construct a fresh, unlocked lock at version 0.
    ///
    /// Loom's instrumented atomics aren't `const`-constructible, so the
    /// model-checked build gets a plain `fn` here instead of the `const fn`
    /// every ordinary build uses.
    #[cfg(loom)]
    pub fn new() -> Self {
        OptimisticLock {
            word: AtomicU64::new(0),
        }
    }

    /// Begin a read critical section: read the current version, failing if
    /// the node is currently locked by a writer. Does not fail on
    /// `obsolete` alone — a reader may still read an obsolete node's
    /// content as long as nobody holds the write lock, but `check()` at the
    /// end of the RCS will catch obsolescence.
    pub fn read_lock(&self) -> Result<ReadGuard<'_>, Restart> {
        let version = self.word.load(Ordering::Acquire);
        if version & LOCKED_BIT != 0 {
            return Err(Restart);
        }
        Ok(ReadGuard {
            lock: self,
            version,
        })
    }

    /// Acquire the write lock via a single compare-and-swap on the version
    /// word, starting from a previously observed version (normally the
    /// version an RCS was opened with, so the upgrade fails if anything
    /// changed in between).
    pub fn upgrade(&self, read: ReadGuard<'_>) -> Result<WriteGuard<'_>, Restart> {
        let version = read.version;
        if version & LOCKED_BIT != 0 {
            return Err(Restart);
        }
        self.word
            .compare_exchange(
                version,
                version | LOCKED_BIT,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .map(|_| WriteGuard {
                lock: self,
                release: Release::Normal,
            })
            .map_err(|_| Restart)
    }

    /// Acquire the write lock directly, spinning on the CAS until either it
    /// succeeds or the node is observed obsolete (in which case the caller
    /// must restart — the node they were trying to lock no longer exists in
    /// the tree).
    pub fn write_lock(&self) -> Result<WriteGuard<'_>, Restart> {
        loop {
            let version = self.word.load(Ordering::Acquire);
            if version & OBSOLETE_BIT != 0 {
                return Err(Restart);
            }
            if version & LOCKED_BIT != 0 {
                std::hint::spin_loop();
                continue;
            }
            if self
                .word
                .compare_exchange_weak(
                    version,
                    version | LOCKED_BIT,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Ok(WriteGuard {
                    lock: self,
                    release: Release::Normal,
                });
            }
            std::hint::spin_loop();
        }
    }

    /// Current version word, used only by tests and stack-restart logic in
    /// the concurrent iterator, which needs to cache the version observed
    /// when a stack entry was pushed.
    pub fn current_version(&self) -> u64 {
        self.word.load(Ordering::Acquire)
    }

    /// True if the obsolete bit is set in the current version word.
    pub fn is_obsolete(&self) -> bool {
        self.word.load(Ordering::Acquire) & OBSOLETE_BIT != 0
    }
}

/// A read critical section: the reader trusts data read from the node for
/// as long as `check()` has not yet been called, or has been called and
/// returned `Ok`.
#[derive(Debug, Clone, Copy)]
pub struct ReadGuard<'a> {
    lock: &'a OptimisticLock,
    version: u64,
}

impl<'a> ReadGuard<'a> {
    /// Validate that the version has not changed and the node has not been
    /// marked obsolete since this RCS began. On success the caller may trust
    /// everything it read from the node during the RCS; on failure it must
    /// restart.
    pub fn check(&self) -> Result<(), Restart> {
        let current = self.lock.word.load(Ordering::Acquire);
        if current != self.version {
            Err(Restart)
        } else {
            Ok(())
        }
    }

    /// The version observed when this RCS began, used to seed a cached
    /// version tag on an iterator stack entry.
    pub fn version_tag(&self) -> u64 {
        self.version
    }
}

enum Release {
    Normal,
    Obsolete,
}

/// Exclusive access to a node, acquired via [`OptimisticLock::write_lock`]
/// or [`OptimisticLock::upgrade`]. Dropping it releases the lock: normally
/// by bumping the version and clearing the locked bit, or — if
/// [`WriteGuard::unlock_obsolete`] was called — by setting the obsolete bit
/// so that no future reader can validate against this node again.
pub struct WriteGuard<'a> {
    lock: &'a OptimisticLock,
    release: Release,
}

impl<'a> WriteGuard<'a> {
    /// Mark this node obsolete instead of bumping its version on release.
    /// Used when a structural modification has logically removed this node
    /// from the tree (its storage is retained only until QSBR proves no
    /// reader still observes it).
    pub fn unlock_obsolete(mut self) {
        self.release = Release::Obsolete;
        drop(self);
    }
}

impl<'a> Drop for WriteGuard<'a> {
    fn drop(&mut self) {
        let current = self.lock.word.load(Ordering::Relaxed);
        let next = match self.release {
            Release::Normal => (current & !LOCKED_BIT).wrapping_add(VERSION_INCREMENT),
            Release::Obsolete => (current & !LOCKED_BIT) | OBSOLETE_BIT,
        };
        self.lock.word.store(next, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_then_check_succeeds_without_writers() {
        let lock = OptimisticLock::new();
        let read = lock.read_lock().unwrap();
        assert!(read.check().is_ok());
    }

    #[test]
    fn write_lock_blocks_concurrent_read_validation() {
        let lock = OptimisticLock::new();
        let read = lock.read_lock().unwrap();
        let write = lock.write_lock().unwrap();
        // A read started before the write bumps the version still observes
        // the pre-write version, and must fail to validate once the writer
        // releases (version changed).
        drop(write);
        assert!(read.check().is_err());
    }

    #[test]
    fn read_lock_fails_while_locked() {
        let lock = OptimisticLock::new();
        let _write = lock.write_lock().unwrap();
        assert!(matches!(lock.read_lock(), Err(Restart)));
    }

    #[test]
    fn obsolete_marks_future_reads_invalid() {
        let lock = OptimisticLock::new();
        let read_before = lock.read_lock().unwrap();
        let write = lock.write_lock().unwrap();
        write.unlock_obsolete();
        assert!(read_before.check().is_err());
        assert!(lock.is_obsolete());
    }

    #[test]
    fn version_increments_on_normal_release() {
        let lock = OptimisticLock::new();
        let v0 = lock.current_version();
        drop(lock.write_lock().unwrap());
        let v1 = lock.current_version();
        assert_ne!(v0, v1);
    }
}
