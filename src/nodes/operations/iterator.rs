//! Ordered traversal: a root-to-leaf stack supporting `first` / `last` /
//! `next` / `prev` / `seek`.
//!
//! Each leaf stores its full key, so `current_key()` is a direct borrow of
//! the leaf's key rather than a buffer rebuilt from the descent path.

use std::cmp::Ordering;

use crate::{
    bytes::AsBytes,
    nodes::{
        representation::{
            dispatch_lookup_child, leftmost_leaf, ConcreteNodePtr, InnerNode, NodePtr,
            OpaqueNodePtr,
        },
        LeafNode,
    },
};

/// One entry on the descent stack: the node reached, and (for inner-node
/// entries) the key byte of the child currently being visited.
struct Frame<K, V, const PREFIX_LEN: usize> {
    node: OpaqueNodePtr<K, V, PREFIX_LEN>,
    child_key: u8,
}

/// A cursor over the tree's entries in ascending key order, supporting
/// bidirectional traversal and seeking.
pub struct RawIter<K, V, const PREFIX_LEN: usize> {
    root: Option<OpaqueNodePtr<K, V, PREFIX_LEN>>,
    stack: Vec<Frame<K, V, PREFIX_LEN>>,
}

impl<K: AsBytes, V, const PREFIX_LEN: usize> RawIter<K, V, PREFIX_LEN> {
    /// A cursor over `root`, initially positioned before the first entry.
    pub fn new(root: Option<OpaqueNodePtr<K, V, PREFIX_LEN>>) -> Self {
        RawIter {
            root,
            stack: Vec::new(),
        }
    }

    /// True if the cursor is positioned on an entry.
    pub fn valid(&self) -> bool {
        self.stack.last().is_some()
    }

    /// The key bytes of the entry the cursor is positioned on.
    ///
    /// # Safety
    /// The stack top's node must still be live.
    pub unsafe fn current_key(&self) -> Option<&[u8]> {
        let leaf = self.leaf_at_top()?;
        Some(unsafe { leaf.as_ref() }.key_ref().as_bytes())
    }

    /// The value of the entry the cursor is positioned on.
    ///
    /// # Safety
    /// The stack top's node must still be live.
    pub unsafe fn current_value(&self) -> Option<&V> {
        let leaf = self.leaf_at_top()?;
        Some(unsafe { leaf.as_ref() }.value_ref())
    }

    /// The value of the entry the cursor is positioned on, mutably.
    ///
    /// # Safety
    /// The stack top's node must still be live, and the caller must hold
    /// exclusive access to it.
    pub unsafe fn current_value_mut(&mut self) -> Option<&mut V> {
        let leaf = self.leaf_at_top()?;
        Some(unsafe { leaf.as_mut() }.value_mut())
    }

    fn leaf_at_top(&self) -> Option<NodePtr<PREFIX_LEN, LeafNode<K, V>>> {
        match self.stack.last()?.node.to_node_ptr() {
            ConcreteNodePtr::LeafNode(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Move to the smallest entry.
    ///
    /// # Safety
    /// Every node in the tree must be live.
    pub unsafe fn first(&mut self) {
        self.stack.clear();
        if let Some(root) = self.root {
            unsafe { self.descend_leftmost(root) };
        }
    }

    /// Move to the largest entry.
    ///
    /// # Safety
    /// Every node in the tree must be live.
    pub unsafe fn last(&mut self) {
        self.stack.clear();
        if let Some(root) = self.root {
            unsafe { self.descend_rightmost(root) };
        }
    }

    unsafe fn descend_leftmost(&mut self, mut node: OpaqueNodePtr<K, V, PREFIX_LEN>) {
        loop {
            match node.to_node_ptr() {
                ConcreteNodePtr::LeafNode(_) => {
                    self.stack.push(Frame { node, child_key: 0 });
                    return;
                },
                _ => {
                    let (byte, child) = unsafe { dispatch_min(node) };
                    self.stack.push(Frame {
                        node,
                        child_key: byte,
                    });
                    node = child;
                },
            }
        }
    }

    unsafe fn descend_rightmost(&mut self, mut node: OpaqueNodePtr<K, V, PREFIX_LEN>) {
        loop {
            match node.to_node_ptr() {
                ConcreteNodePtr::LeafNode(_) => {
                    self.stack.push(Frame { node, child_key: 0 });
                    return;
                },
                _ => {
                    let (byte, child) = unsafe { dispatch_max(node) };
                    self.stack.push(Frame {
                        node,
                        child_key: byte,
                    });
                    node = child;
                },
            }
        }
    }

    /// Advance to the next-larger entry.
    ///
    /// # Safety
    /// Every node in the tree must be live.
    pub unsafe fn next(&mut self) {
        self.stack.pop(); // discard the leaf we were on
        while let Some(frame) = self.stack.pop() {
            match unsafe { dispatch_child_after(frame.node, frame.child_key) } {
                Some((byte, child)) => {
                    self.stack.push(Frame {
                        node: frame.node,
                        child_key: byte,
                    });
                    unsafe { self.descend_leftmost(child) };
                    return;
                },
                None => continue,
            }
        }
    }

    /// Move to the next-smaller entry.
    ///
    /// # Safety
    /// Every node in the tree must be live.
    pub unsafe fn prev(&mut self) {
        self.stack.pop();
        while let Some(frame) = self.stack.pop() {
            match unsafe { dispatch_child_before(frame.node, frame.child_key) } {
                Some((byte, child)) => {
                    self.stack.push(Frame {
                        node: frame.node,
                        child_key: byte,
                    });
                    unsafe { self.descend_rightmost(child) };
                    return;
                },
                None => continue,
            }
        }
    }

    /// Position the cursor at `key`, or at the nearest valid entry in the
    /// given direction if no exact match exists. Returns `true` on an exact
    /// match.
    ///
    /// # Safety
    /// Every node in the tree must be live.
    pub unsafe fn seek(&mut self, key: &[u8], forward: bool) -> bool {
        self.stack.clear();
        let Some(root) = self.root else {
            return false;
        };

        let mut current = root;
        let mut depth = 0usize;

        loop {
            match current.to_node_ptr() {
                ConcreteNodePtr::LeafNode(_) => {
                    self.stack.push(Frame {
                        node: current,
                        child_key: 0,
                    });
                    let leaf_bytes = unsafe { self.current_key() }.expect("just pushed a leaf");
                    return match leaf_bytes.cmp(key) {
                        Ordering::Equal => true,
                        Ordering::Greater if forward => false,
                        Ordering::Less if !forward => false,
                        _ => {
                            if forward {
                                unsafe { self.next() };
                            } else {
                                unsafe { self.prev() };
                            }
                            false
                        },
                    };
                },
                _ => {
                    let header =
                        unsafe { current.header() }.expect("inner node always has a header");
                    let prefix_len = header.prefix_len();

                    let full_prefix: Vec<u8> = if header.prefix_overflows() {
                        let leaf = unsafe { leftmost_leaf(current) };
                        let leaf_key = unsafe { leaf.as_ref() }.key_ref().as_bytes().to_vec();
                        leaf_key[depth..depth + prefix_len].to_vec()
                    } else {
                        header.read_capped_prefix().to_vec()
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
                        // The whole subtree sorts uniformly above or below
                        // `key` (their shared path diverges at this prefix
                        // byte), so pick the extreme descendant and step
                        // once more only if that leaves us on the wrong
                        // side of `key`.
                        match (cmp, forward) {
                            (Ordering::Less, true) => {
                                unsafe { self.descend_rightmost(current) };
                                unsafe { self.next() };
                            },
                            (Ordering::Less, false) => {
                                unsafe { self.descend_rightmost(current) };
                            },
                            (Ordering::Greater, true) => {
                                unsafe { self.descend_leftmost(current) };
                            },
                            (Ordering::Greater, false) => {
                                unsafe { self.descend_leftmost(current) };
                                unsafe { self.prev() };
                            },
                            (Ordering::Equal, _) => unreachable!("divergence cannot compare equal"),
                        }
                        return false;
                    }

                    depth += prefix_len;
                    if depth >= key.len() {
                        if forward {
                            unsafe { self.descend_leftmost(current) };
                        } else {
                            unsafe { self.descend_leftmost(current) };
                            unsafe { self.prev() };
                        }
                        return false;
                    }

                    let key_byte = key[depth];
                    match unsafe { dispatch_lookup_child(current, key_byte) } {
                        Some(child) => {
                            self.stack.push(Frame {
                                node: current,
                                child_key: key_byte,
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
                            match candidate {
                                Some((byte, child)) => {
                                    self.stack.push(Frame {
                                        node: current,
                                        child_key: byte,
                                    });
                                    if forward {
                                        unsafe { self.descend_leftmost(child) };
                                    } else {
                                        unsafe { self.descend_rightmost(child) };
                                    }
                                },
                                None => {
                                    // No sibling at this level in the requested
                                    // direction; unwind to an ancestor that has
                                    // one, reusing the next()/prev() stepping
                                    // logic by pushing this frame first.
                                    self.stack.push(Frame {
                                        node: current,
                                        child_key: key_byte,
                                    });
                                    if forward {
                                        unsafe { self.next() };
                                    } else {
                                        unsafe { self.prev() };
                                    }
                                },
                            }
                            return false;
                        },
                    }
                },
            }
        }
    }
}

pub(crate) unsafe fn dispatch_min<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> (u8, OpaqueNodePtr<K, V, PREFIX_LEN>) {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_ref() }.min(),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_ref() }.min(),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_ref() }.min(),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_ref() }.min(),
        ConcreteNodePtr::LeafNode(_) => unreachable!("a leaf has no children"),
    }
}

pub(crate) unsafe fn dispatch_max<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> (u8, OpaqueNodePtr<K, V, PREFIX_LEN>) {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_ref() }.max(),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_ref() }.max(),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_ref() }.max(),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_ref() }.max(),
        ConcreteNodePtr::LeafNode(_) => unreachable!("a leaf has no children"),
    }
}

pub(crate) unsafe fn dispatch_child_after<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
    key_fragment: u8,
) -> Option<(u8, OpaqueNodePtr<K, V, PREFIX_LEN>)> {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_ref() }.child_after(key_fragment),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_ref() }.child_after(key_fragment),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_ref() }.child_after(key_fragment),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_ref() }.child_after(key_fragment),
        ConcreteNodePtr::LeafNode(_) => None,
    }
}

pub(crate) unsafe fn dispatch_child_before<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
    key_fragment: u8,
) -> Option<(u8, OpaqueNodePtr<K, V, PREFIX_LEN>)> {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_ref() }.child_before(key_fragment),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_ref() }.child_before(key_fragment),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_ref() }.child_before(key_fragment),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_ref() }.child_before(key_fragment),
        ConcreteNodePtr::LeafNode(_) => None,
    }
}

pub(crate) unsafe fn dispatch_gte_child<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
    key_fragment: u8,
) -> Option<(u8, OpaqueNodePtr<K, V, PREFIX_LEN>)> {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_ref() }.gte_child(key_fragment),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_ref() }.gte_child(key_fragment),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_ref() }.gte_child(key_fragment),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_ref() }.gte_child(key_fragment),
        ConcreteNodePtr::LeafNode(_) => None,
    }
}

pub(crate) unsafe fn dispatch_lte_child<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
    key_fragment: u8,
) -> Option<(u8, OpaqueNodePtr<K, V, PREFIX_LEN>)> {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_ref() }.lte_child(key_fragment),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_ref() }.lte_child(key_fragment),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_ref() }.lte_child(key_fragment),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_ref() }.lte_child(key_fragment),
        ConcreteNodePtr::LeafNode(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::operations::insert::insert;

    fn collect_forward(root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>>) -> Vec<Vec<u8>> {
        let mut iter = RawIter::new(root);
        let mut out = Vec::new();
        unsafe { iter.first() };
        while iter.valid() {
            out.push(unsafe { iter.current_key() }.unwrap().to_vec());
            unsafe { iter.next() };
        }
        out
    }

    #[test]
    fn first_last_on_empty_tree() {
        let mut iter = RawIter::<Box<[u8]>, u32, 8>::new(None);
        unsafe { iter.first() };
        assert!(!iter.valid());
        unsafe { iter.last() };
        assert!(!iter.valid());
    }

    #[test]
    fn forward_iteration_is_sorted() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        for byte in [5u8, 1, 9, 3, 7] {
            unsafe { insert(&mut root, Box::from([byte]), u32::from(byte)) };
        }
        let keys = collect_forward(root);
        assert_eq!(keys, vec![vec![1], vec![3], vec![5], vec![7], vec![9]]);
    }

    #[test]
    fn backward_iteration_matches_reverse_forward() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        for byte in [5u8, 1, 9, 3, 7] {
            unsafe { insert(&mut root, Box::from([byte]), u32::from(byte)) };
        }
        let mut iter = RawIter::new(root);
        unsafe { iter.last() };
        let mut out = Vec::new();
        while iter.valid() {
            out.push(unsafe { iter.current_key() }.unwrap().to_vec());
            unsafe { iter.prev() };
        }
        assert_eq!(out, vec![vec![9], vec![7], vec![5], vec![3], vec![1]]);
    }

    #[test]
    fn seek_exact_match() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        for byte in [5u8, 1, 9, 3, 7] {
            unsafe { insert(&mut root, Box::from([byte]), u32::from(byte)) };
        }
        let mut iter = RawIter::new(root);
        assert!(unsafe { iter.seek(&[5], true) });
        assert_eq!(unsafe { iter.current_key() }, Some(&[5u8][..]));
    }

    #[test]
    fn seek_missing_key_forward_lands_on_successor() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        for byte in [1u8, 3, 5] {
            unsafe { insert(&mut root, Box::from([byte]), u32::from(byte)) };
        }
        let mut iter = RawIter::new(root);
        assert!(!unsafe { iter.seek(&[2], true) });
        assert_eq!(unsafe { iter.current_key() }, Some(&[3u8][..]));
    }
}
