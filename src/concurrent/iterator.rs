//! A lock-coupled cursor over the concurrent tree.
//!
//! Unlike [`crate::nodes::operations::iterator::RawIter`], which assumes
//! every node it touches is live and never mutated underneath it, this
//! cursor must cope with a concurrent writer restructuring the path it has
//! already descended. Each stack entry therefore caches the version tag
//! observed on its node at push time. Before trusting a cached
//! entry to walk further, its tag is revalidated; a mismatch means some
//! structural change happened below the cursor's current position, and the
//! whole step restarts via [`RawIter::seek`]-equivalent re-descent from the
//! root, keyed on the last leaf the cursor was positioned on.
//!
//! A leaf's own key/value are trusted unconditionally once reached: leaves
//! are never mutated in place by a structural change (only unlinked and
//! retired through [`crate::qsbr`]), and this cursor holds one
//! [`qsbr::OperationGuard`] open for its entire lifetime, so any leaf it has
//! ever pushed stays allocated for as long as the cursor exists.

use std::cmp::Ordering;

use crate::{
    bytes::AsBytes,
    concurrent::{locked_representative_key, ConcurrentTreeMap},
    lock::Restart,
    nodes::{
        operations::iterator::{
            dispatch_child_after, dispatch_child_before, dispatch_gte_child, dispatch_lte_child,
            dispatch_max, dispatch_min,
        },
        representation::{dispatch_lock, dispatch_lookup_child, ConcreteNodePtr, NodePtr, OpaqueNodePtr},
        LeafNode,
    },
    qsbr,
};

/// One entry on the descent stack. `version` is the node's version tag as
/// of the moment this entry was pushed, `None` for the leaf entry at the
/// bottom of the stack (leaves need no revalidation, see the module docs).
struct Frame<K, V, const PREFIX_LEN: usize> {
    node: OpaqueNodePtr<K, V, PREFIX_LEN>,
    child_key: u8,
    version: Option<u64>,
}

/// A cursor over a [`ConcurrentTreeMap`]'s entries in ascending key order.
///
/// Holds one [`qsbr::OperationGuard`] for its entire lifetime rather than
/// one per step: a scan is a single logical operation, and reporting
/// quiescence between individual `next()` calls would let a retired leaf
/// the cursor is still holding a reference into be freed out from under it.
pub struct ConcurrentIter<'a, K, V, const PREFIX_LEN: usize> {
    tree: &'a ConcurrentTreeMap<K, V, PREFIX_LEN>,
    stack: Vec<Frame<K, V, PREFIX_LEN>>,
    _op: qsbr::OperationGuard,
}

impl<'a, K: AsBytes + 'static, V: 'static, const PREFIX_LEN: usize>
    ConcurrentIter<'a, K, V, PREFIX_LEN>
{
    pub(crate) fn new(tree: &'a ConcurrentTreeMap<K, V, PREFIX_LEN>) -> Self {
        ConcurrentIter {
            tree,
            stack: Vec::new(),
            _op: qsbr::begin_operation(),
        }
    }

    /// True if the cursor is positioned on an entry.
    pub fn valid(&self) -> bool {
        self.stack.last().is_some()
    }

    /// The key bytes of the entry the cursor is positioned on.
    pub fn current_key(&self) -> Option<&[u8]> {
        Some(unsafe { self.leaf_at_top()?.as_ref() }.key_ref().as_bytes())
    }

    /// The value of the entry the cursor is positioned on.
    pub fn current_value(&self) -> Option<&V> {
        Some(unsafe { self.leaf_at_top()?.as_ref() }.value_ref())
    }

    fn leaf_at_top(&self) -> Option<NodePtr<PREFIX_LEN, LeafNode<K, V>>> {
        match self.stack.last()?.node.to_node_ptr() {
            ConcreteNodePtr::LeafNode(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Move to the smallest entry.
    pub fn first(&mut self) {
        loop {
            match self.try_first() {
                Ok(()) => return,
                Err(Restart) => continue,
            }
        }
    }

    /// Move to the largest entry.
    pub fn last(&mut self) {
        loop {
            match self.try_last() {
                Ok(()) => return,
                Err(Restart) => continue,
            }
        }
    }

    /// Position the cursor at `key`, or at the nearest valid entry in the
    /// given direction if no exact match exists. Returns `true` on an exact
    /// match.
    pub fn seek(&mut self, key: &[u8], forward: bool) -> bool {
        loop {
            match self.try_seek(key, forward) {
                Ok(found) => return found,
                Err(Restart) => continue,
            }
        }
    }

    /// Advance to the next-larger entry.
    pub fn next(&mut self) {
        self.step(true);
    }

    /// Move to the next-smaller entry.
    pub fn prev(&mut self) {
        self.step(false);
    }

    /// Shared implementation of [`Self::next`]/[`Self::prev`]: try the cheap
    /// in-place stack walk first; if a
    /// cached version tag no longer matches, fall back to re-seeking from
    /// the last key the cursor was known to sit on, then take one more step
    /// only if that re-seek landed exactly back on it.
    fn step(&mut self, forward: bool) {
        let Some(cached_key) = self.current_key().map(<[u8]>::to_vec) else {
            return;
        };
        loop {
            match self.try_step(forward) {
                Ok(()) => return,
                Err(Restart) => {
                    let exact = self.seek(&cached_key, forward);
                    if !exact {
                        // `seek` already landed on the nearest valid entry
                        // in the requested direction.
                        return;
                    }
                    // Back on the same key; still owe the caller one step.
                },
            }
        }
    }

    fn try_step(&mut self, forward: bool) -> Result<(), Restart> {
        self.stack.pop(); // discard the leaf frame, never revalidated
        while let Some(frame) = self.stack.pop() {
            let cached = frame.version.expect("inner-node frame always has a version");
            let lock = unsafe { dispatch_lock(frame.node) };
            if lock.current_version() != cached {
                return Err(Restart);
            }
            let next = if forward {
                unsafe { dispatch_child_after(frame.node, frame.child_key) }
            } else {
                unsafe { dispatch_child_before(frame.node, frame.child_key) }
            };
            if lock.current_version() != cached {
                return Err(Restart);
            }
            match next {
                Some((byte, child)) => {
                    self.stack.push(Frame {
                        node: frame.node,
                        child_key: byte,
                        version: Some(cached),
                    });
                    self.descend(child, forward)?;
                    return Ok(());
                },
                None => continue,
            }
        }
        Ok(())
    }

    fn try_first(&mut self) -> Result<(), Restart> {
        self.stack.clear();
        let root_read = self.tree.root.lock.read_lock()?;
        let Some(root) = self.tree.root.current() else {
            root_read.check()?;
            return Ok(());
        };
        root_read.check()?;
        self.descend(root, true)
    }

    fn try_last(&mut self) -> Result<(), Restart> {
        self.stack.clear();
        let root_read = self.tree.root.lock.read_lock()?;
        let Some(root) = self.tree.root.current() else {
            root_read.check()?;
            return Ok(());
        };
        root_read.check()?;
        self.descend(root, false)
    }

    /// Push frames from `node` down to a leaf, taking the min child at every
    /// level if `forward`, the max child otherwise.
    fn descend(&mut self, mut node: OpaqueNodePtr<K, V, PREFIX_LEN>, forward: bool) -> Result<(), Restart> {
        loop {
            match node.to_node_ptr() {
                ConcreteNodePtr::LeafNode(_) => {
                    self.stack.push(Frame {
                        node,
                        child_key: 0,
                        version: None,
                    });
                    return Ok(());
                },
                _ => {
                    let guard = unsafe { dispatch_lock(node) }.read_lock()?;
                    let (byte, child) = if forward {
                        unsafe { dispatch_min(node) }
                    } else {
                        unsafe { dispatch_max(node) }
                    };
                    guard.check()?;
                    self.stack.push(Frame {
                        node,
                        child_key: byte,
                        version: Some(guard.version_tag()),
                    });
                    node = child;
                },
            }
        }
    }

    fn try_seek(&mut self, key: &[u8], forward: bool) -> Result<bool, Restart> {
        self.stack.clear();
        let root_read = self.tree.root.lock.read_lock()?;
        let Some(root) = self.tree.root.current() else {
            root_read.check()?;
            return Ok(false);
        };
        root_read.check()?;

        let mut current = root;
        let mut depth = 0usize;

        loop {
            match current.to_node_ptr() {
                ConcreteNodePtr::LeafNode(_) => {
                    self.stack.push(Frame {
                        node: current,
                        child_key: 0,
                        version: None,
                    });
                    let leaf_key = self.current_key().expect("just pushed a leaf").to_vec();
                    return Ok(match leaf_key.as_slice().cmp(key) {
                        Ordering::Equal => true,
                        Ordering::Greater if forward => false,
                        Ordering::Less if !forward => false,
                        _ => {
                            self.step(forward);
                            false
                        },
                    });
                },
                _ => {
                    let guard = unsafe { dispatch_lock(current) }.read_lock()?;
                    let header = unsafe { current.header() }.expect("inner node has a header");
                    let prefix_len = header.prefix_len();

                    let full_prefix: Vec<u8> = if header.prefix_overflows() {
                        let rep_key = locked_representative_key(current)?;
                        guard.check()?;
                        rep_key[depth..depth + prefix_len].to_vec()
                    } else {
                        let captured = header.read_capped_prefix().to_vec();
                        guard.check()?;
                        captured
                    };

                    let remaining = if depth < key.len() { &key[depth..] } else { &[][..] };
                    let matched = full_prefix
                        .iter()
                        .zip(remaining)
                        .take_while(|(a, b)| a == b)
                        .count();

                    if matched < prefix_len {
                        let cmp = if matched < remaining.len() {
                            full_prefix[matched].cmp(&remaining[matched])
                        } else {
                            Ordering::Greater
                        };
                        match (cmp, forward) {
                            (Ordering::Less, true) => {
                                self.descend(current, false)?;
                                self.step(true);
                            },
                            (Ordering::Less, false) => {
                                self.descend(current, false)?;
                            },
                            (Ordering::Greater, true) => {
                                self.descend(current, true)?;
                            },
                            (Ordering::Greater, false) => {
                                self.descend(current, true)?;
                                self.step(false);
                            },
                            (Ordering::Equal, _) => unreachable!("divergence cannot compare equal"),
                        }
                        return Ok(false);
                    }

                    depth += prefix_len;
                    if depth >= key.len() {
                        self.descend(current, true)?;
                        if !forward {
                            self.step(false);
                        }
                        return Ok(false);
                    }

                    let key_byte = key[depth];
                    let child = unsafe { dispatch_lookup_child(current, key_byte) };
                    guard.check()?;
                    match child {
                        Some(child) => {
                            self.stack.push(Frame {
                                node: current,
                                child_key: key_byte,
                                version: Some(guard.version_tag()),
                            });
                            current = child;
                            depth += 1;
                        },
                        None => {
                            let candidate = if forward {
                                unsafe { dispatch_gte_child(current, key_byte) }
                            } else {
                                unsafe { dispatch_lte_child(current, key_byte) }
                            };
                            guard.check()?;
                            match candidate {
                                Some((byte, child)) => {
                                    self.stack.push(Frame {
                                        node: current,
                                        child_key: byte,
                                        version: Some(guard.version_tag()),
                                    });
                                    self.descend(child, forward)?;
                                },
                                None => {
                                    self.stack.push(Frame {
                                        node: current,
                                        child_key: key_byte,
                                        version: Some(guard.version_tag()),
                                    });
                                    self.step(forward);
                                },
                            }
                            return Ok(false);
                        },
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::ConcurrentTreeMap;

    fn sample() -> ConcurrentTreeMap<Box<[u8]>, u32, 8> {
        let map = ConcurrentTreeMap::new();
        for byte in [5u8, 1, 9, 3, 7] {
            map.insert(Box::from([byte]), u32::from(byte));
        }
        map
    }

    #[test]
    fn forward_iteration_is_sorted() {
        let map = sample();
        let mut iter = map.iter();
        iter.first();
        let mut out = Vec::new();
        while iter.valid() {
            out.push(iter.current_key().unwrap().to_vec());
            iter.next();
        }
        assert_eq!(out, vec![vec![1], vec![3], vec![5], vec![7], vec![9]]);
    }

    #[test]
    fn backward_iteration_matches_reverse_forward() {
        let map = sample();
        let mut iter = map.iter();
        iter.last();
        let mut out = Vec::new();
        while iter.valid() {
            out.push(iter.current_key().unwrap().to_vec());
            iter.prev();
        }
        assert_eq!(out, vec![vec![9], vec![7], vec![5], vec![3], vec![1]]);
    }

    #[test]
    fn seek_exact_and_missing() {
        let map = sample();
        let mut iter = map.iter();
        assert!(iter.seek(&[5], true));
        assert_eq!(iter.current_key(), Some(&[5u8][..]));

        let mut iter = map.iter();
        assert!(!iter.seek(&[2], true));
        assert_eq!(iter.current_key(), Some(&[3u8][..]));
    }

    #[test]
    fn empty_tree_iterator_is_never_valid() {
        let map: ConcurrentTreeMap<Box<[u8]>, u32, 8> = ConcurrentTreeMap::new();
        let mut iter = map.iter();
        iter.first();
        assert!(!iter.valid());
        iter.last();
        assert!(!iter.valid());
    }

    #[test]
    fn iterator_survives_concurrent_growth_of_unrelated_subtree() {
        let map = sample();
        let mut iter = map.iter();
        assert!(iter.seek(&[5], true));
        for byte in 10u8..40 {
            map.insert(Box::from([byte]), u32::from(byte));
        }
        iter.next();
        assert_eq!(iter.current_key(), Some(&[7u8][..]));
    }
}
