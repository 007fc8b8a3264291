//! Deletion, including shrink and `Inner4` collapse.

use crate::{
    bytes::AsBytes,
    nodes::{
        header::NodeType,
        representation::{
            dispatch_lookup_child, dispatch_num_children, dispatch_prepend_prefix,
            dispatch_remove_child, dispatch_shrink, dispatch_sole_child, dispatch_write_child,
            leftmost_leaf, ConcreteNodePtr, OpaqueNodePtr,
        },
        LeafNode,
    },
};

/// Remove the entry for `key` from the subtree rooted at `*root`, if
/// present, returning its value.
///
/// # Safety
/// The caller must hold exclusive access to every node reachable from
/// `*root` for the duration of the call.
pub unsafe fn delete<K, V, const PREFIX_LEN: usize>(
    root: &mut Option<OpaqueNodePtr<K, V, PREFIX_LEN>>,
    key: &[u8],
) -> Option<V>
where
    K: AsBytes,
{
    let existing = root.take()?;
    match existing.to_node_ptr() {
        ConcreteNodePtr::LeafNode(leaf_ptr) => {
            if unsafe { leaf_ptr.as_ref() }.matches_full_key(key) {
                #[cfg(feature = "stats")]
                crate::stats::NODE_STATS.record_free(NodeType::Leaf);
                let (_, value) = unsafe { leaf_ptr.deallocate() }.into_entry();
                Some(value)
            } else {
                *root = Some(existing);
                None
            }
        },
        _ => {
            let (new_subtree, removed) = unsafe { delete_from(existing, key, 0) };
            *root = new_subtree;
            removed
        },
    }
}

/// `node` is always an inner node. Returns the (possibly shrunk, grown-down,
/// or collapsed) pointer that should replace `node` at its current
/// position, plus the removed value, if `key` was found beneath it.
unsafe fn delete_from<K, V, const PREFIX_LEN: usize>(
    node: OpaqueNodePtr<K, V, PREFIX_LEN>,
    key: &[u8],
    depth: usize,
) -> (Option<OpaqueNodePtr<K, V, PREFIX_LEN>>, Option<V>)
where
    K: AsBytes,
{
    let header = unsafe { node.header() }.expect("inner node always has a header");
    let prefix_len = header.prefix_len();

    let full_prefix: Vec<u8> = if header.prefix_overflows() {
        let leaf = unsafe { leftmost_leaf(node) };
        let leaf_key = unsafe { leaf.as_ref() }.key_ref().as_bytes().to_vec();
        leaf_key[depth..depth + prefix_len].to_vec()
    } else {
        header.read_capped_prefix().to_vec()
    };

    if depth + prefix_len > key.len() || key[depth..depth + prefix_len] != full_prefix[..] {
        return (Some(node), None);
    }

    let depth = depth + prefix_len;
    if depth >= key.len() {
        return (Some(node), None);
    }
    let key_byte = key[depth];

    let Some(child) = (unsafe { dispatch_lookup_child(node, key_byte) }) else {
        return (Some(node), None);
    };

    match child.to_node_ptr() {
        ConcreteNodePtr::LeafNode(leaf_ptr) => {
            if !unsafe { leaf_ptr.as_ref() }.matches_full_key(key) {
                return (Some(node), None);
            }

            let removed_ptr = unsafe { dispatch_remove_child(node, key_byte) }
                .expect("child just looked up must still be there to remove");
            let removed_leaf = removed_ptr
                .cast::<LeafNode<K, V>>()
                .expect("removed child was the leaf just matched");
            #[cfg(feature = "stats")]
            crate::stats::NODE_STATS.record_free(NodeType::Leaf);
            let (_, value) = unsafe { removed_leaf.deallocate() }.into_entry();

            let node_type = node.node_type();
            let remaining = unsafe { dispatch_num_children(node) };

            if node_type == NodeType::Node4 && remaining == 1 {
                let (sole_byte, sole_child) = unsafe { dispatch_sole_child(node) };
                let node_prefix = unsafe { node.header() }
                    .expect("still valid")
                    .read_capped_prefix()
                    .to_vec();

                let replacement = match sole_child.to_node_ptr() {
                    ConcreteNodePtr::LeafNode(_) => sole_child,
                    _ => {
                        let child_header =
                            unsafe { sole_child.header() }.expect("inner node has a header");
                        let child_prefix_len = child_header.prefix_len();
                        let child_prefix: Vec<u8> = if child_header.prefix_overflows() {
                            let leaf = unsafe { leftmost_leaf(sole_child) };
                            let leaf_key = unsafe { leaf.as_ref() }.key_ref().as_bytes().to_vec();
                            // The sole child's logical depth is this node's depth plus one
                            // descent byte past the (now-collapsing) node's own prefix.
                            let child_depth = depth + 1;
                            leaf_key[child_depth..child_depth + child_prefix_len].to_vec()
                        } else {
                            child_header.read_capped_prefix().to_vec()
                        };

                        let mut combined = node_prefix;
                        combined.push(sole_byte);
                        combined.extend_from_slice(&child_prefix);
                        unsafe {
                            dispatch_prepend_prefix(sole_child, combined.len() - child_prefix_len, &combined)
                        };
                        sole_child
                    },
                };

                match node.to_node_ptr() {
                    ConcreteNodePtr::Node4(p) => {
                        #[cfg(feature = "stats")]
                        crate::stats::NODE_STATS.record_free(NodeType::Node4);
                        unsafe { p.deallocate() };
                    },
                    _ => unreachable!("only a Node4 is ever collapsed"),
                }
                log::trace!(target: "radix_art::nodes", "collapsed Node4 into its sole child");

                (Some(replacement), Some(value))
            } else if node_type.should_shrink(remaining) {
                let node = unsafe { dispatch_shrink(node) };
                (Some(node), Some(value))
            } else {
                (Some(node), Some(value))
            }
        },
        _ => {
            let (new_child, removed_value) = unsafe { delete_from(child, key, depth + 1) };
            let replacement = new_child.expect("an inner node's subtree is never fully emptied");
            unsafe { dispatch_write_child(node, key_byte, replacement) };
            (Some(node), removed_value)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::operations::{insert::insert, lookup::lookup};

    #[test]
    fn delete_missing_key_is_noop() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        unsafe { insert(&mut root, Box::from(*b"hello"), 1) };
        let removed = unsafe { delete(&mut root, b"world") };
        assert!(removed.is_none());
        assert!(unsafe { lookup(root.unwrap(), b"hello") }.is_some());
    }

    #[test]
    fn delete_sole_leaf_empties_tree() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        unsafe { insert(&mut root, Box::from(*b"hello"), 1) };
        let removed = unsafe { delete(&mut root, b"hello") };
        assert_eq!(removed, Some(1));
        assert!(root.is_none());
    }

    #[test]
    fn delete_collapses_inner4_to_sole_leaf() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        unsafe { insert(&mut root, Box::from(*b"aaaa"), 1) };
        unsafe { insert(&mut root, Box::from(*b"aaab"), 2) };
        let removed = unsafe { delete(&mut root, b"aaab") };
        assert_eq!(removed, Some(2));
        assert!(unsafe { lookup(root.unwrap(), b"aaaa") }.is_some());
        assert!(matches!(root.unwrap().to_node_ptr(), ConcreteNodePtr::LeafNode(_)));
    }

    #[test]
    fn delete_shrinks_oversized_node() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        for byte in 0u8..20 {
            unsafe { insert(&mut root, Box::from([byte]), u32::from(byte)) };
        }
        for byte in 0u8..15 {
            unsafe { delete(&mut root, &[byte]) };
        }
        for byte in 15u8..20 {
            assert!(unsafe { lookup(root.unwrap(), &[byte]) }.is_some());
        }
    }
}
