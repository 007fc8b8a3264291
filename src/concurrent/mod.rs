//! The concurrent tree variant (components C/D): optimistic lock coupling
//! over the same node engine the single-threaded [`crate::collections`]
//! variant uses, with unlinked nodes handed to [`crate::qsbr`] instead of
//! being freed inline.
//!
//! Every public operation opens a [`crate::qsbr::OperationGuard`] and loops
//! an internal `try_*` method that may fail with [`Restart`] if it raced a
//! concurrent writer; on `Restart` the whole operation, including any
//! partially-consumed key/value the caller handed in, starts over from the
//! root. No lock is ever held across that retry boundary.

mod iterator;

use std::{
    marker::PhantomData,
    sync::atomic::{AtomicUsize, Ordering},
};

use crossbeam_utils::CachePadded;

use crate::{
    bytes::AsBytes,
    error::{InsertError, ValueTooLarge, MAX_VALUE_LEN},
    lock::Restart,
    nodes::{
        header::Header,
        representation::{
            dispatch_grow as _unused_grow, dispatch_is_full, dispatch_lock, dispatch_lookup_child,
            dispatch_ltrim_prefix, dispatch_prepend_prefix, dispatch_remove_child,
            dispatch_sole_child, dispatch_write_child, match_prefix, ConcreteNodePtr, InnerNode,
            NodePtr, OpaqueNodePtr,
        },
        header::NodeType,
        InnerNode4, LeafNode,
    },
    qsbr,
};

pub use iterator::ConcurrentIter;

// `dispatch_grow`/`dispatch_shrink` deallocate the old node inline, which is
// unsound here (a reader may still hold an open read critical section on
// it); `concurrent_grow`/`concurrent_shrink` below retire it through QSBR
// instead, so the free-function import above is intentionally unused and
// only kept to make that contrast explicit in review.
#[allow(unused_imports)]
use crate::nodes::representation::dispatch_shrink as _unused_shrink;

/// The root of the tree: a tagged-pointer slot plus the version lock that
/// guards replacing it, since installing or replacing the root is itself a
/// structural modification that must be lock-coupled like any other parent
/// slot.
///
/// Every operation touches the root first, so `ptr` and `lock` are each
/// cache-line padded to keep the contention on this one slot from bouncing
/// an otherwise-unrelated neighbor out of the reader threads' caches.
struct RootSlot<K, V, const PREFIX_LEN: usize> {
    ptr: CachePadded<AtomicUsize>,
    lock: CachePadded<crate::lock::OptimisticLock>,
    marker: PhantomData<(K, V)>,
}

impl<K, V, const PREFIX_LEN: usize> RootSlot<K, V, PREFIX_LEN> {
    fn new() -> Self {
        RootSlot {
            ptr: CachePadded::new(AtomicUsize::new(0)),
            lock: CachePadded::new(crate::lock::OptimisticLock::new()),
            marker: PhantomData,
        }
    }

    /// The current root pointer, without any validation. Callers must pair
    /// this with a `read_lock`/`check` on `self.lock` around whatever they
    /// do with the result.
    fn current(&self) -> Option<OpaqueNodePtr<K, V, PREFIX_LEN>> {
        let raw = self.ptr.load(Ordering::Acquire);
        (raw != 0).then(|| unsafe { OpaqueNodePtr::from_raw(raw) })
    }
}

/// A reference to whatever slot currently points at the node being visited:
/// either the tree's root, or a `(parent, key_byte)` pair inside an inner
/// node. Unifies the "replace this pointer" and "lock this pointer's owner"
/// operations so descent code doesn't need to special-case the root.
enum ParentRef<'a, K, V, const PREFIX_LEN: usize> {
    Root(&'a RootSlot<K, V, PREFIX_LEN>),
    Child(OpaqueNodePtr<K, V, PREFIX_LEN>, u8),
}

impl<'a, K: AsBytes, V, const PREFIX_LEN: usize> ParentRef<'a, K, V, PREFIX_LEN> {
    fn lock(&self) -> &crate::lock::OptimisticLock {
        match self {
            ParentRef::Root(root) => &root.lock,
            ParentRef::Child(node, _) => unsafe { dispatch_lock(*node) },
        }
    }

    /// Overwrite the slot to point at `new`. Caller must already hold this
    /// slot's owner write-locked.
    fn replace(&self, new: OpaqueNodePtr<K, V, PREFIX_LEN>) {
        match self {
            ParentRef::Root(root) => root.ptr.store(new.to_raw(), Ordering::Release),
            ParentRef::Child(node, byte) => unsafe { dispatch_write_child(*node, *byte, new) },
        }
    }

    /// Clear the slot (the subtree beneath it is gone).
    fn clear(&self) {
        match self {
            ParentRef::Root(root) => root.ptr.store(0, Ordering::Release),
            ParentRef::Child(node, byte) => {
                unsafe { dispatch_remove_child(*node, *byte) };
            },
        }
    }
}

/// A concurrent, ordered map from keys to values, backed by the same
/// adaptive radix tree engine as [`crate::collections::RawTreeMap`], safe
/// for any number of readers and writers to call into simultaneously.
///
/// Every operation is built on optimistic lock coupling ([`crate::lock`]):
/// readers never block writers and vice versa except for the brief moment a
/// structural change holds a node's write lock. Nodes unlinked by a
/// structural change are not freed immediately — they're handed to
/// [`crate::qsbr`], which defers the actual deallocation until no reader
/// could still be examining them.
///
/// `K`/`V` must be `'static`: QSBR may keep a retired node (and the key or
/// value it carries) alive for an unbounded time after it's logically
/// removed, until every thread has passed through a quiescent point.
pub struct ConcurrentTreeMap<K, V, const PREFIX_LEN: usize> {
    root: RootSlot<K, V, PREFIX_LEN>,
    len: AtomicUsize,
}

// SAFETY: the tree's internal pointers are never exposed or dereferenced
// without going through the OLC protocol below, which synchronizes all
// access the same way a `Mutex<T>` would.
unsafe impl<K: Send, V: Send, const PREFIX_LEN: usize> Send for ConcurrentTreeMap<K, V, PREFIX_LEN> {}
unsafe impl<K: Send + Sync, V: Send + Sync, const PREFIX_LEN: usize> Sync
    for ConcurrentTreeMap<K, V, PREFIX_LEN>
{
}

impl<K, V, const PREFIX_LEN: usize> Default for ConcurrentTreeMap<K, V, PREFIX_LEN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const PREFIX_LEN: usize> ConcurrentTreeMap<K, V, PREFIX_LEN> {
    /// An empty map.
    pub fn new() -> Self {
        ConcurrentTreeMap {
            root: RootSlot::new(),
            len: AtomicUsize::new(0),
        }
    }

    /// The number of entries stored, as of some moment during the call.
    ///
    /// Under concurrent mutation this is a snapshot, not a guarantee that a
    /// subsequent `get` will agree with it.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// True if the map held no entries at some moment during the call.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: AsBytes + 'static, V: 'static, const PREFIX_LEN: usize> ConcurrentTreeMap<K, V, PREFIX_LEN> {
    /// True if `key` has an entry.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        let _op = qsbr::begin_operation();
        loop {
            match self.try_contains_key(key) {
                Ok(found) => return found,
                Err(Restart) => continue,
            }
        }
    }

    /// Insert `value` under `key`, returning the value it replaced, if any.
    ///
    /// Unlike [`Self::get`]/[`Self::remove`], this never needs `V: Clone`:
    /// an overwrite hands back the previous value directly via `mem::replace`
    /// rather than deferring its reclamation, since a plain value swap never
    /// unlinks a node another thread might still be reading through.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let _op = qsbr::begin_operation();
        let mut key = key;
        let mut value = value;
        loop {
            match self.try_insert(key, value) {
                Ok(old) => return old,
                Err((k, v)) => {
                    key = k;
                    value = v;
                },
            }
        }
    }

    /// Insert `value` under `key` after checking it against the tree's
    /// maximum encodable value length. See
    /// [`crate::collections::RawTreeMap::checked_insert`] for why this
    /// needs its own `V: AsBytes` bound rather than living on the main
    /// `insert`.
    pub fn checked_insert(&self, key: K, value: V) -> Result<Option<V>, InsertError>
    where
        V: AsBytes,
    {
        let len = value.as_bytes().len();
        if len > MAX_VALUE_LEN {
            return Err(ValueTooLarge { len }.into());
        }
        Ok(self.insert(key, value))
    }

    /// Remove every entry left. Requires the caller to otherwise know no
    /// other thread is still concurrently accessing the map (this is a
    /// coarse "empty it out and start over" operation, not safe to race
    /// against `get`/`insert`/`remove` the way those are safe against each
    /// other.
    pub fn clear(&self) {
        let _op = qsbr::begin_operation();
        loop {
            match self.try_clear() {
                Ok(()) => return,
                Err(Restart) => continue,
            }
        }
    }

    /// A cursor over every entry in ascending key order.
    pub fn iter(&self) -> ConcurrentIter<'_, K, V, PREFIX_LEN> {
        ConcurrentIter::new(self)
    }

    /// Visit entries in key order (ascending if `forward`, descending
    /// otherwise), stopping as soon as `f` returns `true`.
    ///
    /// `f` sees a consistent snapshot of each individual entry it's called
    /// with, but not of the scan as a whole: a concurrent writer may insert
    /// or remove entries on either side of the cursor while this runs.
    pub fn scan(&self, mut f: impl FnMut(&[u8], &V) -> bool, forward: bool) {
        let mut iter = self.iter();
        if forward {
            iter.first();
        } else {
            iter.last();
        }
        while iter.valid() {
            let key = iter.current_key().expect("iterator positioned on an entry");
            let value = iter.current_value().expect("iterator positioned on an entry");
            if f(key, value) {
                break;
            }
            if forward {
                iter.next();
            } else {
                iter.prev();
            }
        }
    }

    /// Visit entries from `key` onward (ascending) or backward from `key`
    /// (descending), stopping as soon as `f` returns `true`.
    pub fn scan_from(&self, key: &[u8], mut f: impl FnMut(&[u8], &V) -> bool, forward: bool) {
        let mut iter = self.iter();
        iter.seek(key, forward);
        while iter.valid() {
            let k = iter.current_key().expect("iterator positioned on an entry");
            let value = iter.current_value().expect("iterator positioned on an entry");
            if f(k, value) {
                break;
            }
            if forward {
                iter.next();
            } else {
                iter.prev();
            }
        }
    }

    /// Visit entries in the half-open range `[from, to)` if `from < to`, or
    /// `(to, from]` in descending order otherwise, stopping as soon as `f`
    /// returns `true`.
    pub fn scan_range(&self, from: &[u8], to: &[u8], mut f: impl FnMut(&[u8], &V) -> bool) {
        let forward = from < to;
        let mut iter = self.iter();
        iter.seek(from, forward);
        while iter.valid() {
            let k = iter.current_key().expect("iterator positioned on an entry");
            if forward && k >= to {
                break;
            }
            if !forward && k <= to {
                break;
            }
            let value = iter.current_value().expect("iterator positioned on an entry");
            if f(k, value) {
                break;
            }
            if forward {
                iter.next();
            } else {
                iter.prev();
            }
        }
    }

    fn try_contains_key(&self, key: &[u8]) -> Result<bool, Restart> {
        let root_read = self.root.lock.read_lock()?;
        let Some(root_ptr) = self.root.current() else {
            root_read.check()?;
            return Ok(false);
        };
        root_read.check()?;

        let mut current = root_ptr;
        let mut current_guard = unsafe { dispatch_lock(current) }.read_lock()?;
        let mut depth = 0usize;

        loop {
            match current.to_node_ptr() {
                ConcreteNodePtr::LeafNode(leaf_ptr) => {
                    let matches = unsafe { leaf_ptr.as_ref() }.matches_full_key(key);
                    current_guard.check()?;
                    return Ok(matches);
                },
                _ => {
                    let header = unsafe { current.header() }.expect("inner node has a header");
                    let prefix_len = header.prefix_len();
                    if depth + prefix_len > key.len() {
                        current_guard.check()?;
                        return Ok(false);
                    }
                    let matched = if header.prefix_overflows() {
                        let rep_key = locked_representative_key(current)?;
                        match_prefix(header, &key[depth..], &rep_key, depth)
                    } else {
                        match_prefix(header, &key[depth..], &[], depth)
                    };
                    if matched != prefix_len {
                        current_guard.check()?;
                        return Ok(false);
                    }
                    let next_depth = depth + prefix_len;
                    if next_depth >= key.len() {
                        current_guard.check()?;
                        return Ok(false);
                    }
                    let key_byte = key[next_depth];
                    let Some(child) = (unsafe { dispatch_lookup_child(current, key_byte) }) else {
                        current_guard.check()?;
                        return Ok(false);
                    };
                    let child_guard = unsafe { dispatch_lock(child) }.read_lock()?;
                    current_guard.check()?;
                    current = child;
                    current_guard = child_guard;
                    depth = next_depth + 1;
                },
            }
        }
    }

    fn try_insert(&self, key: K, value: V) -> Result<Option<V>, (K, V)> {
        let key_bytes = key.as_bytes().to_vec();

        let Ok(root_read) = self.root.lock.read_lock() else {
            return Err((key, value));
        };
        let root_ptr = self.root.current();

        let Some(root_current) = root_ptr else {
            let Ok(write) = self.root.lock.upgrade(root_read) else {
                return Err((key, value));
            };
            if self.root.ptr.load(Ordering::Acquire) != 0 {
                return Err((key, value));
            }
            let leaf = NodePtr::allocate(LeafNode::new(key, value)).to_opaque();
            self.root.ptr.store(leaf.to_raw(), Ordering::Release);
            drop(write);
            self.len.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        if root_read.check().is_err() {
            return Err((key, value));
        }

        if let ConcreteNodePtr::LeafNode(leaf_ptr) = root_current.to_node_ptr() {
            let Ok(leaf_read) = unsafe { leaf_ptr.as_ref() }.lock().read_lock() else {
                return Err((key, value));
            };
            if root_read.check().is_err() {
                return Err((key, value));
            }
            if unsafe { leaf_ptr.as_ref() }.matches_full_key(&key_bytes) {
                let Ok(leaf_write) = unsafe { leaf_ptr.as_ref() }.lock().upgrade(leaf_read) else {
                    return Err((key, value));
                };
                let old = std::mem::replace(unsafe { leaf_ptr.as_mut() }.value_mut(), value);
                drop(leaf_write);
                return Ok(Some(old));
            }
            let Ok(root_write) = self.root.lock.upgrade(root_read) else {
                return Err((key, value));
            };
            if self.root.ptr.load(Ordering::Acquire) != root_current.to_raw() {
                return Err((key, value));
            }
            if leaf_read.check().is_err() {
                return Err((key, value));
            }
            let new_root = unsafe { split_leaf(root_current, leaf_ptr, 0, &key_bytes, key, value) };
            self.root.ptr.store(new_root.to_raw(), Ordering::Release);
            drop(root_write);
            self.len.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let mut parent = ParentRef::Root(&self.root);
        let mut parent_guard = root_read;
        let mut current = root_current;
        let Ok(mut current_guard) = (unsafe { dispatch_lock(current) }.read_lock()) else {
            return Err((key, value));
        };
        if parent_guard.check().is_err() {
            return Err((key, value));
        }
        let mut depth = 0usize;

        loop {
            let header = unsafe { current.header() }.expect("inner node has a header");
            let prefix_len = header.prefix_len();

            let full_prefix: Vec<u8> = if header.prefix_overflows() {
                match locked_representative_key(current) {
                    Ok(k) => k[depth..depth + prefix_len].to_vec(),
                    Err(Restart) => return Err((key, value)),
                }
            } else {
                header.read_capped_prefix().to_vec()
            };

            let remaining_key = &key_bytes[depth..];
            let matched = full_prefix
                .iter()
                .zip(remaining_key)
                .take_while(|(a, b)| a == b)
                .count();

            if matched < prefix_len {
                let Ok(parent_write) = parent.lock().upgrade(parent_guard) else {
                    return Err((key, value));
                };
                let Ok(node_write) = (unsafe { dispatch_lock(current) }.upgrade(current_guard))
                else {
                    return Err((key, value));
                };

                let shared = &full_prefix[..matched];
                let mut new_inner = InnerNode4::from_header(Header::with_prefix(shared, matched));
                let old_divergent_byte = full_prefix[matched];
                let new_divergent_byte = remaining_key[matched];
                let remainder = &full_prefix[matched + 1..];
                unsafe { dispatch_ltrim_prefix(current, matched + 1, remainder) };

                let new_leaf = NodePtr::allocate(LeafNode::new(key, value)).to_opaque();
                new_inner.write_child(old_divergent_byte, current);
                new_inner.write_child(new_divergent_byte, new_leaf);
                let new_inner_ptr = NodePtr::allocate(new_inner).to_opaque();

                parent.replace(new_inner_ptr);
                drop(node_write);
                drop(parent_write);
                self.len.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }

            let next_depth = depth + prefix_len;
            if next_depth >= key_bytes.len() {
                return Err((key, value));
            }
            let key_byte = key_bytes[next_depth];

            match unsafe { dispatch_lookup_child(current, key_byte) } {
                Some(child) => match child.to_node_ptr() {
                    ConcreteNodePtr::LeafNode(leaf_ptr) => {
                        let Ok(leaf_read) = unsafe { leaf_ptr.as_ref() }.lock().read_lock() else {
                            return Err((key, value));
                        };
                        if current_guard.check().is_err() {
                            return Err((key, value));
                        }
                        if unsafe { leaf_ptr.as_ref() }.matches_full_key(&key_bytes) {
                            let Ok(leaf_write) =
                                unsafe { leaf_ptr.as_ref() }.lock().upgrade(leaf_read)
                            else {
                                return Err((key, value));
                            };
                            let old =
                                std::mem::replace(unsafe { leaf_ptr.as_mut() }.value_mut(), value);
                            drop(leaf_write);
                            return Ok(Some(old));
                        }
                        let Ok(node_write) =
                            (unsafe { dispatch_lock(current) }.upgrade(current_guard))
                        else {
                            return Err((key, value));
                        };
                        if leaf_read.check().is_err() {
                            return Err((key, value));
                        }
                        let new_child = unsafe {
                            split_leaf(child, leaf_ptr, next_depth + 1, &key_bytes, key, value)
                        };
                        unsafe { dispatch_write_child(current, key_byte, new_child) };
                        drop(node_write);
                        self.len.fetch_add(1, Ordering::Relaxed);
                        return Ok(None);
                    },
                    _ => {
                        let Ok(child_guard) = (unsafe { dispatch_lock(child) }.read_lock()) else {
                            return Err((key, value));
                        };
                        if current_guard.check().is_err() {
                            return Err((key, value));
                        }
                        parent = ParentRef::Child(current, key_byte);
                        parent_guard = current_guard;
                        current = child;
                        current_guard = child_guard;
                        depth = next_depth + 1;
                    },
                },
                None => {
                    if unsafe { dispatch_is_full(current) } {
                        let Ok(parent_write) = parent.lock().upgrade(parent_guard) else {
                            return Err((key, value));
                        };
                        let Ok(node_write) =
                            (unsafe { dispatch_lock(current) }.upgrade(current_guard))
                        else {
                            return Err((key, value));
                        };
                        let grown = unsafe { concurrent_grow(current) };
                        let new_leaf = NodePtr::allocate(LeafNode::new(key, value)).to_opaque();
                        unsafe { dispatch_write_child(grown, key_byte, new_leaf) };
                        parent.replace(grown);
                        node_write.unlock_obsolete();
                        drop(parent_write);
                    } else {
                        let Ok(node_write) =
                            (unsafe { dispatch_lock(current) }.upgrade(current_guard))
                        else {
                            return Err((key, value));
                        };
                        let new_leaf = NodePtr::allocate(LeafNode::new(key, value)).to_opaque();
                        unsafe { dispatch_write_child(current, key_byte, new_leaf) };
                        drop(node_write);
                    }
                    self.len.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                },
            }
        }
    }

    fn try_clear(&self) -> Result<(), Restart> {
        let read = self.root.lock.read_lock()?;
        let raw = self.root.ptr.load(Ordering::Acquire);
        let write = self.root.lock.upgrade(read)?;
        self.root.ptr.store(0, Ordering::Release);
        drop(write);
        if raw != 0 {
            let root = unsafe { OpaqueNodePtr::<K, V, PREFIX_LEN>::from_raw(raw) };
            unsafe { retire_subtree(root) };
        }
        self.len.store(0, Ordering::Relaxed);
        Ok(())
    }
}

impl<K: AsBytes + 'static, V: Clone + 'static, const PREFIX_LEN: usize>
    ConcurrentTreeMap<K, V, PREFIX_LEN>
{
    /// Look up the value stored under `key`.
    ///
    /// Returns an owned clone rather than a borrow: a reference into the
    /// tree cannot outlive the validation that proves it's still attached,
    /// which happens inside this call, not after it returns.
    pub fn get(&self, key: &[u8]) -> Option<V> {
        let _op = qsbr::begin_operation();
        loop {
            match self.try_get(key) {
                Ok(v) => return v,
                Err(Restart) => continue,
            }
        }
    }

    /// Remove the entry for `key`, returning its value.
    ///
    /// Requires `V: Clone` for the same reason [`Self::get`] does: the
    /// removed leaf is not freed until QSBR proves no reader still holds an
    /// open read critical section on it, so the value handed back here is a
    /// clone taken before that deferred drop, not a move out of storage
    /// about to be reclaimed.
    pub fn remove(&self, key: &[u8]) -> Option<V> {
        let _op = qsbr::begin_operation();
        loop {
            match self.try_remove(key) {
                Ok(removed) => {
                    if removed.is_some() {
                        self.len.fetch_sub(1, Ordering::Relaxed);
                    }
                    return removed;
                },
                Err(Restart) => continue,
            }
        }
    }

    fn try_get(&self, key: &[u8]) -> Result<Option<V>, Restart> {
        let root_read = self.root.lock.read_lock()?;
        let Some(root_ptr) = self.root.current() else {
            root_read.check()?;
            return Ok(None);
        };
        root_read.check()?;

        let mut current = root_ptr;
        let mut current_guard = unsafe { dispatch_lock(current) }.read_lock()?;
        let mut depth = 0usize;

        loop {
            match current.to_node_ptr() {
                ConcreteNodePtr::LeafNode(leaf_ptr) => {
                    let matches = unsafe { leaf_ptr.as_ref() }.matches_full_key(key);
                    let value = matches.then(|| unsafe { leaf_ptr.as_ref() }.value_ref().clone());
                    current_guard.check()?;
                    return Ok(value);
                },
                _ => {
                    let header = unsafe { current.header() }.expect("inner node has a header");
                    let prefix_len = header.prefix_len();
                    if depth + prefix_len > key.len() {
                        current_guard.check()?;
                        return Ok(None);
                    }
                    let matched = if header.prefix_overflows() {
                        let rep_key = locked_representative_key(current)?;
                        match_prefix(header, &key[depth..], &rep_key, depth)
                    } else {
                        match_prefix(header, &key[depth..], &[], depth)
                    };
                    if matched != prefix_len {
                        current_guard.check()?;
                        return Ok(None);
                    }
                    let next_depth = depth + prefix_len;
                    if next_depth >= key.len() {
                        current_guard.check()?;
                        return Ok(None);
                    }
                    let key_byte = key[next_depth];
                    let Some(child) = (unsafe { dispatch_lookup_child(current, key_byte) }) else {
                        current_guard.check()?;
                        return Ok(None);
                    };
                    let child_guard = unsafe { dispatch_lock(child) }.read_lock()?;
                    current_guard.check()?;
                    current = child;
                    current_guard = child_guard;
                    depth = next_depth + 1;
                },
            }
        }
    }

    fn try_remove(&self, key: &[u8]) -> Result<Option<V>, Restart> {
        let root_read = self.root.lock.read_lock()?;
        let Some(root_current) = self.root.current() else {
            root_read.check()?;
            return Ok(None);
        };

        if let ConcreteNodePtr::LeafNode(leaf_ptr) = root_current.to_node_ptr() {
            let leaf_read = unsafe { leaf_ptr.as_ref() }.lock().read_lock()?;
            root_read.check()?;
            if !unsafe { leaf_ptr.as_ref() }.matches_full_key(key) {
                leaf_read.check()?;
                return Ok(None);
            }
            let root_write = self.root.lock.upgrade(root_read)?;
            if self.root.ptr.load(Ordering::Acquire) != root_current.to_raw() {
                return Err(Restart);
            }
            let value = unsafe { leaf_ptr.as_ref() }.value_ref().clone();
            self.root.ptr.store(0, Ordering::Release);
            drop(root_write);
            qsbr::retire(move || drop(unsafe { leaf_ptr.deallocate() }));
            return Ok(Some(value));
        }

        root_read.check()?;

        let mut parent = ParentRef::Root(&self.root);
        let mut parent_guard = root_read;
        let mut current = root_current;
        let mut current_guard = unsafe { dispatch_lock(current) }.read_lock()?;
        parent_guard.check()?;
        let mut depth = 0usize;

        loop {
            let header = unsafe { current.header() }.expect("inner node has a header");
            let prefix_len = header.prefix_len();

            let full_prefix: Vec<u8> = if header.prefix_overflows() {
                locked_representative_key(current)?[depth..depth + prefix_len].to_vec()
            } else {
                header.read_capped_prefix().to_vec()
            };

            if depth + prefix_len > key.len() || key[depth..depth + prefix_len] != full_prefix[..] {
                current_guard.check()?;
                return Ok(None);
            }
            let next_depth = depth + prefix_len;
            if next_depth >= key.len() {
                current_guard.check()?;
                return Ok(None);
            }
            let key_byte = key[next_depth];

            let Some(child) = (unsafe { dispatch_lookup_child(current, key_byte) }) else {
                current_guard.check()?;
                return Ok(None);
            };

            match child.to_node_ptr() {
                ConcreteNodePtr::LeafNode(leaf_ptr) => {
                    let leaf_read = unsafe { leaf_ptr.as_ref() }.lock().read_lock()?;
                    current_guard.check()?;
                    if !unsafe { leaf_ptr.as_ref() }.matches_full_key(key) {
                        leaf_read.check()?;
                        return Ok(None);
                    }

                    let current_count = header.num_children();
                    let node_type = current.node_type();

                    if node_type == NodeType::Node4 && current_count == 2 {
                        // Collapsing this Inner4: its own slot at the
                        // grandparent is being overwritten, so the
                        // grandparent, this node, and the surviving child
                        // (if it's an inner node whose prefix we extend) all
                        // need their write locks: this is the widest-reaching
                        // case of write coupling for a structural change.
                        let parent_write = parent.lock().upgrade(parent_guard)?;
                        let node_write = unsafe { dispatch_lock(current) }.upgrade(current_guard)?;
                        if leaf_read.check().is_err() {
                            return Err(Restart);
                        }

                        let value = unsafe { leaf_ptr.as_ref() }.value_ref().clone();
                        unsafe { dispatch_remove_child(current, key_byte) };
                        let (sole_byte, sole_child) = unsafe { dispatch_sole_child(current) };
                        let node_prefix = header.read_capped_prefix().to_vec();

                        let replacement = match sole_child.to_node_ptr() {
                            ConcreteNodePtr::LeafNode(_) => sole_child,
                            _ => {
                                let Ok(survivor_write) =
                                    (unsafe { dispatch_lock(sole_child) }.write_lock())
                                else {
                                    return Err(Restart);
                                };
                                let child_header = unsafe { sole_child.header() }
                                    .expect("inner node has a header");
                                let child_prefix_len = child_header.prefix_len();
                                let child_prefix: Vec<u8> = if child_header.prefix_overflows() {
                                    locked_representative_key(sole_child)?
                                        [next_depth + 1..next_depth + 1 + child_prefix_len]
                                        .to_vec()
                                } else {
                                    child_header.read_capped_prefix().to_vec()
                                };
                                let mut combined = node_prefix;
                                combined.push(sole_byte);
                                combined.extend_from_slice(&child_prefix);
                                unsafe {
                                    dispatch_prepend_prefix(
                                        sole_child,
                                        combined.len() - child_prefix_len,
                                        &combined,
                                    )
                                };
                                drop(survivor_write);
                                sole_child
                            },
                        };

                        parent.replace(replacement);
                        node_write.unlock_obsolete();
                        drop(parent_write);
                        qsbr::retire(move || drop(unsafe { leaf_ptr.deallocate() }));
                        return Ok(Some(value));
                    }

                    let predicted_remaining = current_count - 1;
                    if node_type.should_shrink(predicted_remaining) {
                        let parent_write = parent.lock().upgrade(parent_guard)?;
                        let node_write = unsafe { dispatch_lock(current) }.upgrade(current_guard)?;
                        if leaf_read.check().is_err() {
                            return Err(Restart);
                        }
                        let value = unsafe { leaf_ptr.as_ref() }.value_ref().clone();
                        unsafe { dispatch_remove_child(current, key_byte) };
                        let shrunk = unsafe { concurrent_shrink(current) };
                        parent.replace(shrunk);
                        node_write.unlock_obsolete();
                        drop(parent_write);
                        qsbr::retire(move || drop(unsafe { leaf_ptr.deallocate() }));
                        return Ok(Some(value));
                    }

                    let node_write = unsafe { dispatch_lock(current) }.upgrade(current_guard)?;
                    if leaf_read.check().is_err() {
                        return Err(Restart);
                    }
                    let value = unsafe { leaf_ptr.as_ref() }.value_ref().clone();
                    unsafe { dispatch_remove_child(current, key_byte) };
                    drop(node_write);
                    qsbr::retire(move || drop(unsafe { leaf_ptr.deallocate() }));
                    return Ok(Some(value));
                },
                _ => {
                    let child_guard = unsafe { dispatch_lock(child) }.read_lock()?;
                    current_guard.check()?;
                    parent = ParentRef::Child(current, key_byte);
                    parent_guard = current_guard;
                    current = child;
                    current_guard = child_guard;
                    depth = next_depth + 1;
                },
            }
        }
    }
}

/// Materialize the divergence point between an existing leaf and a new
/// key/value being inserted under it, mirroring
/// `nodes::operations::insert::insert_into`'s leaf-split case exactly, but
/// returning the new subtree instead of writing it back through `&mut`
/// (there is no exclusive `&mut` here — only whichever locks the caller
/// already holds over `old_node`'s slot).
unsafe fn split_leaf<K: AsBytes, V, const PREFIX_LEN: usize>(
    old_node: OpaqueNodePtr<K, V, PREFIX_LEN>,
    old_leaf: NodePtr<PREFIX_LEN, LeafNode<K, V>>,
    depth: usize,
    key_bytes: &[u8],
    key: K,
    value: V,
) -> OpaqueNodePtr<K, V, PREFIX_LEN> {
    let old_key_bytes = unsafe { old_leaf.as_ref() }.key_ref().as_bytes().to_vec();
    let common = old_key_bytes[depth..]
        .iter()
        .zip(&key_bytes[depth..])
        .take_while(|(a, b)| a == b)
        .count();

    let shared_prefix = &old_key_bytes[depth..depth + common];
    let mut new_inner = InnerNode4::from_header(Header::with_prefix(shared_prefix, common));

    let old_divergent_byte = old_key_bytes[depth + common];
    let new_divergent_byte = key_bytes[depth + common];

    let new_leaf = NodePtr::allocate(LeafNode::new(key, value)).to_opaque();
    new_inner.write_child(old_divergent_byte, old_node);
    new_inner.write_child(new_divergent_byte, new_leaf);

    #[cfg(feature = "stats")]
    crate::stats::NodeStats::bump(&crate::stats::NODE_STATS.prefix_split_count);
    log::trace!(target: "radix_art::concurrent", "split leaf at depth {}", depth + common);

    NodePtr::allocate(new_inner).to_opaque()
}

/// Promote an over-full inner node to the next larger capacity class,
/// retiring the original through QSBR rather than freeing it inline (unlike
/// [`crate::nodes::representation::dispatch_grow`], which is only safe for
/// the single-threaded variant's exclusive access).
///
/// # Safety
/// `ptr` must point to a full, non-`Node256` inner node that the caller
/// holds write-locked, with its slot about to be overwritten so no other
/// path can reach it through the tree again.
unsafe fn concurrent_grow<K: AsBytes + 'static, V: 'static, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> OpaqueNodePtr<K, V, PREFIX_LEN> {
    let from = ptr.node_type();
    let grown = match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => {
            let grown = unsafe { p.as_ref() }.grow();
            qsbr::retire(move || {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(from);
                drop(unsafe { p.deallocate() })
            });
            NodePtr::allocate(grown).to_opaque()
        },
        ConcreteNodePtr::Node16(p) => {
            let grown = unsafe { p.as_ref() }.grow();
            qsbr::retire(move || {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(from);
                drop(unsafe { p.deallocate() })
            });
            NodePtr::allocate(grown).to_opaque()
        },
        ConcreteNodePtr::Node48(p) => {
            let grown = unsafe { p.as_ref() }.grow();
            qsbr::retire(move || {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(from);
                drop(unsafe { p.deallocate() })
            });
            NodePtr::allocate(grown).to_opaque()
        },
        ConcreteNodePtr::Node256(_) => unreachable!("Node256 never grows"),
        ConcreteNodePtr::LeafNode(_) => unreachable!("a leaf never grows"),
    };
    #[cfg(feature = "stats")]
    crate::stats::NodeStats::bump(&crate::stats::NODE_STATS.grow_count);
    log::trace!(target: "radix_art::concurrent", "grew {from:?} -> {:?}", grown.node_type());
    grown
}

/// Demote an under-full inner node to the next smaller capacity class,
/// retiring the original through QSBR. See [`concurrent_grow`] for why this
/// can't just call `dispatch_shrink`.
///
/// # Safety
/// Same obligations as [`concurrent_grow`], for the shrink direction.
unsafe fn concurrent_shrink<K: AsBytes + 'static, V: 'static, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> OpaqueNodePtr<K, V, PREFIX_LEN> {
    let from = ptr.node_type();
    let shrunk = match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(_) => unreachable!("Node4 never shrinks"),
        ConcreteNodePtr::Node16(p) => {
            let shrunk = unsafe { p.as_ref() }.shrink();
            qsbr::retire(move || {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(from);
                drop(unsafe { p.deallocate() })
            });
            NodePtr::allocate(shrunk).to_opaque()
        },
        ConcreteNodePtr::Node48(p) => {
            let shrunk = unsafe { p.as_ref() }.shrink();
            qsbr::retire(move || {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(from);
                drop(unsafe { p.deallocate() })
            });
            NodePtr::allocate(shrunk).to_opaque()
        },
        ConcreteNodePtr::Node256(p) => {
            let shrunk = unsafe { p.as_ref() }.shrink();
            qsbr::retire(move || {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(from);
                drop(unsafe { p.deallocate() })
            });
            NodePtr::allocate(shrunk).to_opaque()
        },
        ConcreteNodePtr::LeafNode(_) => unreachable!("a leaf never shrinks"),
    };
    #[cfg(feature = "stats")]
    crate::stats::NodeStats::bump(&crate::stats::NODE_STATS.shrink_count);
    log::trace!(target: "radix_art::concurrent", "shrank {from:?} -> {:?}", shrunk.node_type());
    shrunk
}

/// Recursively retire every node reachable from `node`.
///
/// # Safety
/// `node`'s slot must already be unreachable from the tree (the caller has
/// already overwritten whatever pointed at it).
unsafe fn retire_subtree<K: AsBytes + 'static, V: 'static, const PREFIX_LEN: usize>(
    node: OpaqueNodePtr<K, V, PREFIX_LEN>,
) {
    match node.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => {
            for (_, child) in unsafe { p.as_ref() }.iter() {
                unsafe { retire_subtree(child) };
            }
            qsbr::retire(move || {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(crate::nodes::header::NodeType::Node4);
                drop(unsafe { p.deallocate() })
            });
        },
        ConcreteNodePtr::Node16(p) => {
            for (_, child) in unsafe { p.as_ref() }.iter() {
                unsafe { retire_subtree(child) };
            }
            qsbr::retire(move || {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(crate::nodes::header::NodeType::Node16);
                drop(unsafe { p.deallocate() })
            });
        },
        ConcreteNodePtr::Node48(p) => {
            for (_, child) in unsafe { p.as_ref() }.iter() {
                unsafe { retire_subtree(child) };
            }
            qsbr::retire(move || {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(crate::nodes::header::NodeType::Node48);
                drop(unsafe { p.deallocate() })
            });
        },
        ConcreteNodePtr::Node256(p) => {
            for (_, child) in unsafe { p.as_ref() }.iter() {
                unsafe { retire_subtree(child) };
            }
            qsbr::retire(move || {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(crate::nodes::header::NodeType::Node256);
                drop(unsafe { p.deallocate() })
            });
        },
        ConcreteNodePtr::LeafNode(p) => {
            qsbr::retire(move || {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(crate::nodes::header::NodeType::Leaf);
                drop(unsafe { p.deallocate() })
            });
        },
    }
}

/// Resolve a representative full key for a node whose logical prefix
/// overflows its inline cap, via its own independent lock-coupled descent —
/// never the single-threaded `leftmost_leaf` helper, which performs no
/// synchronization at all and would be a data race under concurrent
/// mutation.
pub(crate) fn locked_representative_key<K: AsBytes, V, const PREFIX_LEN: usize>(
    start: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> Result<Vec<u8>, Restart> {
    let mut current = start;
    let mut current_guard = unsafe { dispatch_lock(current) }.read_lock()?;
    loop {
        match current.to_node_ptr() {
            ConcreteNodePtr::LeafNode(leaf_ptr) => {
                let key = unsafe { leaf_ptr.as_ref() }.key_ref().as_bytes().to_vec();
                current_guard.check()?;
                return Ok(key);
            },
            _ => {
                let (_, child) =
                    unsafe { crate::nodes::operations::iterator::dispatch_min(current) };
                let child_guard = unsafe { dispatch_lock(child) }.read_lock()?;
                current_guard.check()?;
                current = child;
                current_guard = child_guard;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_round_trip() {
        let map: ConcurrentTreeMap<Box<[u8]>, u32, 8> = ConcurrentTreeMap::new();
        assert!(map.is_empty());
        assert_eq!(map.insert(Box::from(*b"hello"), 1), None);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(b"hello"), Some(1));
        assert!(map.contains_key(b"hello"));
        assert_eq!(map.insert(Box::from(*b"hello"), 2), Some(1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove(b"hello"), Some(2));
        assert!(map.is_empty());
        assert_eq!(map.get(b"hello"), None);
        assert!(!map.contains_key(b"hello"));
    }

    #[test]
    fn insert_splits_and_both_keys_survive() {
        let map: ConcurrentTreeMap<Box<[u8]>, u32, 8> = ConcurrentTreeMap::new();
        assert_eq!(map.insert(Box::from(*b"aaaa"), 1), None);
        assert_eq!(map.insert(Box::from(*b"aaab"), 2), None);
        assert_eq!(map.get(b"aaaa"), Some(1));
        assert_eq!(map.get(b"aaab"), Some(2));
    }

    #[test]
    fn insert_grows_and_shrinks_back() {
        let map: ConcurrentTreeMap<Box<[u8]>, u32, 8> = ConcurrentTreeMap::new();
        for byte in 0u8..40 {
            assert_eq!(map.insert(Box::from([byte]), u32::from(byte)), None);
        }
        for byte in 0u8..40 {
            assert_eq!(map.get(&[byte]), Some(u32::from(byte)), "missing key {byte}");
        }
        for byte in 0u8..35 {
            assert_eq!(map.remove(&[byte]), Some(u32::from(byte)));
        }
        for byte in 35u8..40 {
            assert_eq!(map.get(&[byte]), Some(u32::from(byte)));
        }
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn remove_collapses_inner4_to_sole_leaf() {
        let map: ConcurrentTreeMap<Box<[u8]>, u32, 8> = ConcurrentTreeMap::new();
        map.insert(Box::from(*b"aaaa"), 1);
        map.insert(Box::from(*b"aaab"), 2);
        assert_eq!(map.remove(b"aaab"), Some(2));
        assert_eq!(map.get(b"aaaa"), Some(1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn clear_empties_a_grown_tree() {
        let map: ConcurrentTreeMap<Box<[u8]>, u8, 8> = ConcurrentTreeMap::new();
        for byte in 0u8..40 {
            map.insert(Box::from([byte]), byte);
        }
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.get(&[0]), None);
    }

    #[test]
    fn checked_insert_accepts_a_normal_sized_value() {
        let map: ConcurrentTreeMap<Box<[u8]>, Box<[u8]>, 8> = ConcurrentTreeMap::new();
        assert!(map.checked_insert(Box::from(*b"k"), Box::from(*b"small")).is_ok());
        assert!(map.contains_key(b"k"));
    }

    #[test]
    fn scan_visits_entries_in_order() {
        let map: ConcurrentTreeMap<Box<[u8]>, u8, 8> = ConcurrentTreeMap::new();
        for byte in [5u8, 1, 9, 3] {
            map.insert(Box::from([byte]), byte);
        }
        let mut seen = Vec::new();
        map.scan(
            |k, v| {
                seen.push((k.to_vec(), *v));
                false
            },
            true,
        );
        assert_eq!(
            seen,
            vec![(vec![1], 1), (vec![3], 3), (vec![5], 5), (vec![9], 9)]
        );
    }

    #[test]
    fn scan_range_is_half_open_forward() {
        let map: ConcurrentTreeMap<Box<[u8]>, u8, 8> = ConcurrentTreeMap::new();
        for byte in 0u8..10 {
            map.insert(Box::from([byte]), byte);
        }
        let mut seen = Vec::new();
        map.scan_range(&[2], &[5], |k, _| {
            seen.push(k.to_vec());
            false
        });
        assert_eq!(seen, vec![vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn remove_missing_key_is_noop() {
        let map: ConcurrentTreeMap<Box<[u8]>, u32, 8> = ConcurrentTreeMap::new();
        map.insert(Box::from(*b"hello"), 1);
        assert_eq!(map.remove(b"world"), None);
        assert_eq!(map.get(b"hello"), Some(1));
    }
}
