//! Insertion, including the key-prefix split case.

use crate::{
    bytes::AsBytes,
    nodes::{
        header::Header,
        representation::{
            dispatch_grow, dispatch_is_full, dispatch_ltrim_prefix, dispatch_lookup_child,
            dispatch_write_child, leftmost_leaf, ConcreteNodePtr, InnerNode, NodePtr, OpaqueNodePtr,
        },
        InnerNode4, LeafNode,
    },
};

/// Insert `key`/`value` into the subtree rooted at `*root`, creating the
/// root if the tree was empty.
///
/// Returns the value previously stored under an equal key, if any.
///
/// # Safety
/// The caller must hold exclusive access to every node reachable from
/// `*root` for the duration of the call (the single-threaded collection
/// holds this by construction; the concurrent variant never calls this
/// function directly — see `crate::concurrent`).
pub unsafe fn insert<K, V, const PREFIX_LEN: usize>(
    root: &mut Option<OpaqueNodePtr<K, V, PREFIX_LEN>>,
    key: K,
    value: V,
) -> Option<V>
where
    K: AsBytes,
{
    let key_bytes = key.as_bytes().to_vec();
    match root.take() {
        None => {
            *root = Some(NodePtr::allocate(LeafNode::new(key, value)).to_opaque());
            None
        },
        Some(existing) => {
            let (new_subtree, old_value) =
                unsafe { insert_into(existing, &key_bytes, 0, key, value) };
            *root = Some(new_subtree);
            old_value
        },
    }
}

/// Insert into the subtree rooted at `node`, returning the (possibly new,
/// e.g. grown or split) pointer that should replace `node` at its current
/// position, plus the previous value if the key was already present.
unsafe fn insert_into<K, V, const PREFIX_LEN: usize>(
    node: OpaqueNodePtr<K, V, PREFIX_LEN>,
    key_bytes: &[u8],
    depth: usize,
    key: K,
    value: V,
) -> (OpaqueNodePtr<K, V, PREFIX_LEN>, Option<V>)
where
    K: AsBytes,
{
    match node.to_node_ptr() {
        ConcreteNodePtr::LeafNode(leaf_ptr) => {
            if unsafe { leaf_ptr.as_ref() }.matches_full_key(key_bytes) {
                let old = std::mem::replace(unsafe { leaf_ptr.as_mut() }.value_mut(), value);
                return (node, Some(old));
            }

            // Split: materialize a new Inner4 at the longest common prefix
            // of the two full keys, from the current depth onward.
            let old_key_bytes = unsafe { leaf_ptr.as_ref() }.key_ref().as_bytes().to_vec();
            let common = old_key_bytes[depth..]
                .iter()
                .zip(&key_bytes[depth..])
                .take_while(|(a, b)| a == b)
                .count();

            debug_assert!(
                depth + common < old_key_bytes.len() && depth + common < key_bytes.len(),
                "one key is a byte-prefix of the other, which this representation cannot \
                 distinguish from an exact match"
            );

            let shared_prefix = &old_key_bytes[depth..depth + common];
            let mut new_inner = InnerNode4::from_header(Header::with_prefix(shared_prefix, common));

            let old_divergent_byte = old_key_bytes[depth + common];
            let new_divergent_byte = key_bytes[depth + common];

            let new_leaf = NodePtr::allocate(LeafNode::new(key, value)).to_opaque();
            new_inner.write_child(old_divergent_byte, node);
            new_inner.write_child(new_divergent_byte, new_leaf);

            #[cfg(feature = "stats")]
            crate::stats::NodeStats::bump(&crate::stats::NODE_STATS.prefix_split_count);
            log::trace!(target: "radix_art::nodes", "split leaf at depth {}", depth + common);

            (NodePtr::allocate(new_inner).to_opaque(), None)
        },
        _ => {
            let header = unsafe { node.header() }.expect("inner node always has a header");
            let prefix_len = header.prefix_len();

            // Copied into an owned buffer (rather than borrowed from the
            // header) so that passing slices of it back into
            // `dispatch_ltrim_prefix` below can never alias the header's own
            // prefix storage while that call overwrites it.
            let full_prefix: Vec<u8> = if header.prefix_overflows() {
                let leaf = unsafe { leftmost_leaf(node) };
                let leaf_key = unsafe { leaf.as_ref() }.key_ref().as_bytes().to_vec();
                leaf_key[depth..depth + prefix_len].to_vec()
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
                // Divergence inside the prefix: split this node's prefix.
                let shared = &full_prefix[..matched];
                let mut new_inner = InnerNode4::from_header(Header::with_prefix(shared, matched));

                let old_divergent_byte = full_prefix[matched];
                debug_assert!(
                    depth + matched < key_bytes.len(),
                    "key is a byte-prefix of this node's prefix, which this representation \
                     cannot distinguish from an exact match"
                );
                let new_divergent_byte = remaining_key[matched];

                let remainder = &full_prefix[matched + 1..];
                unsafe { dispatch_ltrim_prefix(node, matched + 1, remainder) };

                let new_leaf = NodePtr::allocate(LeafNode::new(key, value)).to_opaque();
                new_inner.write_child(old_divergent_byte, node);
                new_inner.write_child(new_divergent_byte, new_leaf);

                #[cfg(feature = "stats")]
                crate::stats::NodeStats::bump(&crate::stats::NODE_STATS.prefix_split_count);
                log::trace!(target: "radix_art::nodes", "split node prefix at depth {}", depth + matched);

                return (NodePtr::allocate(new_inner).to_opaque(), None);
            }

            let depth = depth + prefix_len;
            assert!(
                depth < key_bytes.len(),
                "key is exhausted exactly at an inner node, which this representation cannot \
                 distinguish from an exact match"
            );
            let key_byte = key_bytes[depth];

            match unsafe { dispatch_lookup_child(node, key_byte) } {
                Some(child) => {
                    let (new_child, old_value) =
                        unsafe { insert_into(child, key_bytes, depth + 1, key, value) };
                    unsafe { dispatch_write_child(node, key_byte, new_child) };
                    (node, old_value)
                },
                None => {
                    let node = if unsafe { dispatch_is_full(node) } {
                        unsafe { dispatch_grow(node) }
                    } else {
                        node
                    };
                    let new_leaf = NodePtr::allocate(LeafNode::new(key, value)).to_opaque();
                    unsafe { dispatch_write_child(node, key_byte, new_leaf) };
                    (node, None)
                },
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_into_empty_tree_creates_root() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        let old = unsafe { insert(&mut root, Box::from(*b"hello"), 1) };
        assert!(old.is_none());
        assert!(root.is_some());
    }

    #[test]
    fn insert_overwrites_equal_key() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        unsafe { insert(&mut root, Box::from(*b"hello"), 1) };
        let old = unsafe { insert(&mut root, Box::from(*b"hello"), 2) };
        assert_eq!(old, Some(1));
    }

    #[test]
    fn insert_splits_leaf_on_divergence() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        unsafe { insert(&mut root, Box::from(*b"aaaa"), 1) };
        unsafe { insert(&mut root, Box::from(*b"aaab"), 2) };
        let found_a = unsafe { crate::nodes::operations::lookup::lookup(root.unwrap(), b"aaaa") };
        let found_b = unsafe { crate::nodes::operations::lookup::lookup(root.unwrap(), b"aaab") };
        assert!(found_a.is_some());
        assert!(found_b.is_some());
    }

    #[test]
    fn insert_grows_node_past_capacity() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        for byte in 0u8..40 {
            unsafe { insert(&mut root, Box::from([byte]), u32::from(byte)) };
        }
        for byte in 0u8..40 {
            let found = unsafe { crate::nodes::operations::lookup::lookup(root.unwrap(), &[byte]) };
            assert!(found.is_some(), "missing key {byte}");
        }
    }
}
