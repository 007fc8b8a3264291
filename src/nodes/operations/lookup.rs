//! Point lookup.

use crate::{
    bytes::AsBytes,
    nodes::representation::{
        dispatch_lookup_child, leftmost_leaf, match_prefix, ConcreteNodePtr, NodePtr,
        OpaqueNodePtr,
    },
    nodes::LeafNode,
};

/// Walk from `root` to the leaf matching `key`, if one exists.
///
/// # Safety
/// Every node reachable from `root` must be live for the duration of the
/// call (single-threaded callers hold this trivially; the concurrent
/// variant re-derives its own OLC-protected version in `crate::concurrent`).
pub unsafe fn lookup<K: AsBytes, V, const PREFIX_LEN: usize>(
    root: OpaqueNodePtr<K, V, PREFIX_LEN>,
    key: &[u8],
) -> Option<NodePtr<PREFIX_LEN, LeafNode<K, V>>> {
    let mut current = root;
    let mut depth = 0usize;

    loop {
        match current.to_node_ptr() {
            ConcreteNodePtr::LeafNode(leaf) => {
                return if unsafe { leaf.as_ref() }.matches_full_key(key) {
                    Some(leaf)
                } else {
                    None
                };
            },
            _ => {
                let header = unsafe { current.header() }.expect("inner node always has a header");
                let prefix_len = header.prefix_len();
                if prefix_len > 0 {
                    if depth + prefix_len > key.len() {
                        return None;
                    }
                    let matched = if header.prefix_overflows() {
                        let leaf = unsafe { leftmost_leaf(current) };
                        let leaf_key = unsafe { leaf.as_ref() }.key_ref().as_bytes();
                        match_prefix(header, &key[depth..], leaf_key, depth)
                    } else {
                        match_prefix(header, &key[depth..], &[], depth)
                    };
                    if matched != prefix_len {
                        return None;
                    }
                    depth += prefix_len;
                }

                if depth >= key.len() {
                    return None;
                }
                let key_byte = key[depth];
                current = unsafe { dispatch_lookup_child(current, key_byte) }?;
                depth += 1;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::operations::insert::insert;

    #[test]
    fn lookup_on_bare_leaf_root() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        unsafe { insert(&mut root, Box::from(*b"abc"), 7) };
        assert_eq!(
            unsafe { lookup(root.unwrap(), b"abc") }.map(|l| *unsafe { l.as_ref() }.value_ref()),
            Some(7)
        );
        assert!(unsafe { lookup::<Box<[u8]>, u32, 8>(root.unwrap(), b"abd") }.is_none());
    }

    #[test]
    fn lookup_absent_key_shorter_than_prefix_does_not_panic() {
        let mut root: Option<OpaqueNodePtr<Box<[u8]>, u32, 8>> = None;
        unsafe { insert(&mut root, Box::from(*b"aaaa"), 1) };
        unsafe { insert(&mut root, Box::from(*b"aaab"), 2) };
        assert!(unsafe { lookup::<Box<[u8]>, u32, 8>(root.unwrap(), b"a") }.is_none());
        assert!(unsafe { lookup::<Box<[u8]>, u32, 8>(root.unwrap(), b"") }.is_none());
    }
}
