//! Inner node holding 17-48 children, found through a 256-entry byte-index
//! table into a 48-slot child array.

use std::{cmp::Ordering, iter::FusedIterator, mem};

use crate::{
    bytes::AsBytes,
    nodes::{
        header::{Header, NodeType, RestrictedNodeIndex},
        representation::{private::Sealed, InnerNode, Node},
        InnerNode16, InnerNode256, OpaqueNodePtr,
    },
    rust_nightly_apis::{assume, maybe_uninit_slice_assume_init_ref, maybe_uninit_uninit_array},
};
use std::mem::MaybeUninit;

/// Node with 17-48 children.
pub struct InnerNode48<K, V, const PREFIX_LEN: usize> {
    /// The common node header.
    pub header: Header<PREFIX_LEN>,
    /// Maps a key byte (the array index) to a slot index in
    /// `child_pointers`, or the `EMPTY` sentinel.
    pub child_indices: [RestrictedNodeIndex<48>; 256],
    /// Child pointers; valid at index `i` whenever some entry in
    /// `child_indices` points to `i`.
    pub child_pointers: [MaybeUninit<OpaqueNodePtr<K, V, PREFIX_LEN>>; 48],
}

impl<K, V, const PREFIX_LEN: usize> InnerNode48<K, V, PREFIX_LEN> {
    fn initialized_child_pointers(&self) -> &[OpaqueNodePtr<K, V, PREFIX_LEN>] {
        unsafe {
            assume!(self.header.num_children() <= self.child_pointers.len());
            maybe_uninit_slice_assume_init_ref(&self.child_pointers[..self.header.num_children()])
        }
    }
}

impl<K: AsBytes, V, const PREFIX_LEN: usize> Sealed for InnerNode48<K, V, PREFIX_LEN> {}

impl<K: AsBytes, V, const PREFIX_LEN: usize> Node<PREFIX_LEN> for InnerNode48<K, V, PREFIX_LEN> {
    const TYPE: NodeType = NodeType::Node48;
    type Key = K;
    type Value = V;
}

impl<K: AsBytes, V, const PREFIX_LEN: usize> InnerNode<PREFIX_LEN>
    for InnerNode48<K, V, PREFIX_LEN>
{
    type GrownNode = InnerNode256<K, V, PREFIX_LEN>;
    type ShrunkNode = InnerNode16<K, V, PREFIX_LEN>;
    type Iter<'a> = InnerNode48Iter<'a, K, V, PREFIX_LEN> where Self: 'a;

    fn header(&self) -> &Header<PREFIX_LEN> {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header<PREFIX_LEN> {
        &mut self.header
    }

    fn from_header(header: Header<PREFIX_LEN>) -> Self {
        InnerNode48 {
            header,
            child_indices: [RestrictedNodeIndex::<48>::EMPTY; 256],
            child_pointers: maybe_uninit_uninit_array(),
        }
    }

    fn lookup_child(&self, key_fragment: u8) -> Option<OpaqueNodePtr<K, V, PREFIX_LEN>> {
        let index = self.child_indices[usize::from(key_fragment)];
        if index.is_empty() {
            return None;
        }
        Some(self.initialized_child_pointers()[usize::from(index)])
    }

    fn write_child(&mut self, key_fragment: u8, child: OpaqueNodePtr<K, V, PREFIX_LEN>) {
        let key_fragment_idx = usize::from(key_fragment);
        let child_index = if self.child_indices[key_fragment_idx].is_empty() {
            let child_index = self.header.num_children();
            debug_assert!(child_index < self.child_pointers.len(), "node is full");
            self.child_indices[key_fragment_idx] =
                RestrictedNodeIndex::try_from(child_index).expect("node is full");
            self.header.inc_num_children();
            child_index
        } else {
            usize::from(self.child_indices[key_fragment_idx])
        };
        self.child_pointers[child_index].write(child);
    }

    fn remove_child(&mut self, key_fragment: u8) -> Option<OpaqueNodePtr<K, V, PREFIX_LEN>> {
        let restricted_index = self.child_indices[usize::from(key_fragment)];
        if restricted_index.is_empty() {
            return None;
        }

        let child_ptr = mem::replace(
            &mut self.child_pointers[usize::from(restricted_index)],
            MaybeUninit::uninit(),
        );

        self.child_pointers.copy_within(
            (usize::from(restricted_index) + 1)..self.header.num_children(),
            usize::from(restricted_index),
        );

        for other in &mut self.child_indices {
            if matches!(restricted_index.partial_cmp(other), Some(Ordering::Less)) {
                *other = RestrictedNodeIndex::try_from(usize::from(*other) - 1)
                    .expect("index shift stays in range");
            }
        }

        self.child_indices[usize::from(key_fragment)] = RestrictedNodeIndex::EMPTY;
        self.header.dec_num_children();
        Some(unsafe { child_ptr.assume_init() })
    }

    fn grow(&self) -> Self::GrownNode {
        let mut grown = InnerNode256::from_header(self.header.clone());
        for (key_fragment, child) in self.iter() {
            grown.write_child(key_fragment, child);
        }
        grown
    }

    fn shrink(&self) -> Self::ShrunkNode {
        debug_assert!(
            self.header.num_children() <= 16,
            "cannot shrink Inner48 with more than 16 children"
        );
        let mut shrunk = InnerNode16::from_header(self.header.clone());
        for (key_fragment, child) in self.iter() {
            shrunk.write_child(key_fragment, child);
        }
        shrunk
    }

    fn iter(&self) -> Self::Iter<'_> {
        InnerNode48Iter {
            child_indices: self.child_indices.iter().enumerate(),
            child_pointers: self.initialized_child_pointers(),
        }
    }
}

/// Iterator over an [`InnerNode48`]'s children, in ascending key-byte order
/// (the 256-entry `child_indices` table is itself ordered by key byte).
pub struct InnerNode48Iter<'a, K, V, const PREFIX_LEN: usize> {
    child_indices: std::iter::Enumerate<std::slice::Iter<'a, RestrictedNodeIndex<48>>>,
    child_pointers: &'a [OpaqueNodePtr<K, V, PREFIX_LEN>],
}

impl<'a, K, V, const PREFIX_LEN: usize> Iterator for InnerNode48Iter<'a, K, V, PREFIX_LEN> {
    type Item = (u8, OpaqueNodePtr<K, V, PREFIX_LEN>);

    fn next(&mut self) -> Option<Self::Item> {
        for (key, idx) in self.child_indices.by_ref() {
            if idx.is_empty() {
                continue;
            }
            return Some((key as u8, self.child_pointers[usize::from(*idx)]));
        }
        None
    }
}

impl<'a, K, V, const PREFIX_LEN: usize> DoubleEndedIterator for InnerNode48Iter<'a, K, V, PREFIX_LEN> {
    fn next_back(&mut self) -> Option<Self::Item> {
        while let Some((key, idx)) = self.child_indices.next_back() {
            if idx.is_empty() {
                continue;
            }
            return Some((key as u8, self.child_pointers[usize::from(*idx)]));
        }
        None
    }
}

impl<'a, K, V, const PREFIX_LEN: usize> FusedIterator for InnerNode48Iter<'a, K, V, PREFIX_LEN> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{LeafNode, NodePtr};

    fn leaf_ptr(value: u8) -> OpaqueNodePtr<Box<[u8]>, u8, 4> {
        let leaf = LeafNode::new(Box::from([]), value);
        NodePtr::allocate(leaf).to_opaque()
    }

    #[test]
    fn lookup_after_write() {
        let mut node = InnerNode48::<Box<[u8]>, u8, 4>::from_header(Header::empty());
        let p1 = leaf_ptr(1);
        let p2 = leaf_ptr(2);
        node.write_child(3, p1);
        node.write_child(123, p2);
        assert_eq!(node.lookup_child(3), Some(p1));
        assert_eq!(node.lookup_child(123), Some(p2));
        assert!(node.lookup_child(4).is_none());
    }

    #[test]
    fn remove_compacts_indices() {
        let mut node = InnerNode48::<Box<[u8]>, u8, 4>::from_header(Header::empty());
        node.write_child(3, leaf_ptr(1));
        node.write_child(123, leaf_ptr(2));
        node.write_child(1, leaf_ptr(3));
        assert!(node.remove_child(3).is_some());
        assert!(node.lookup_child(3).is_none());
        assert!(node.lookup_child(123).is_some());
        assert!(node.lookup_child(1).is_some());
        assert_eq!(node.header.num_children(), 2);
    }

    #[test]
    fn grow_preserves_children() {
        let mut node = InnerNode48::<Box<[u8]>, u8, 4>::from_header(Header::empty());
        node.write_child(3, leaf_ptr(1));
        node.write_child(123, leaf_ptr(2));
        let grown = node.grow();
        assert!(grown.lookup_child(3).is_some());
        assert!(grown.lookup_child(123).is_some());
    }
}
