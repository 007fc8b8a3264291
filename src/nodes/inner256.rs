//! The largest inner node: a direct 256-entry array indexed by key byte,
//! with no further fan-out possible.

use std::iter::{Enumerate, FilterMap, FusedIterator};

use crate::{
    bytes::AsBytes,
    nodes::{
        header::{Header, NodeType},
        representation::{private::Sealed, InnerNode, Node},
        InnerNode48, OpaqueNodePtr,
    },
};

type ChildSlot<K, V, const PREFIX_LEN: usize> = Option<OpaqueNodePtr<K, V, PREFIX_LEN>>;

/// Node with 49-256 children, one direct slot per possible key byte.
pub struct InnerNode256<K, V, const PREFIX_LEN: usize> {
    /// The common node header.
    pub header: Header<PREFIX_LEN>,
    /// `child_pointers[byte]` is the child for key byte `byte`, if any.
    pub child_pointers: [ChildSlot<K, V, PREFIX_LEN>; 256],
}

impl<K: AsBytes, V, const PREFIX_LEN: usize> Sealed for InnerNode256<K, V, PREFIX_LEN> {}

impl<K: AsBytes, V, const PREFIX_LEN: usize> Node<PREFIX_LEN> for InnerNode256<K, V, PREFIX_LEN> {
    const TYPE: NodeType = NodeType::Node256;
    type Key = K;
    type Value = V;
}

impl<K: AsBytes, V, const PREFIX_LEN: usize> InnerNode<PREFIX_LEN>
    for InnerNode256<K, V, PREFIX_LEN>
{
    // Node256 is already the largest capacity class; growing it is never
    // reachable (`is_full` saturates at 256), but the trait requires a
    // concrete associated type, so it names itself.
    type GrownNode = InnerNode256<K, V, PREFIX_LEN>;
    type ShrunkNode = InnerNode48<K, V, PREFIX_LEN>;
    type Iter<'a> = InnerNode256Iter<'a, K, V, PREFIX_LEN> where Self: 'a;

    fn header(&self) -> &Header<PREFIX_LEN> {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header<PREFIX_LEN> {
        &mut self.header
    }

    fn from_header(header: Header<PREFIX_LEN>) -> Self {
        InnerNode256 {
            header,
            child_pointers: [None; 256],
        }
    }

    fn lookup_child(&self, key_fragment: u8) -> Option<OpaqueNodePtr<K, V, PREFIX_LEN>> {
        self.child_pointers[usize::from(key_fragment)]
    }

    fn write_child(&mut self, key_fragment: u8, child: OpaqueNodePtr<K, V, PREFIX_LEN>) {
        let slot = &mut self.child_pointers[usize::from(key_fragment)];
        if slot.is_none() {
            self.header.inc_num_children();
        }
        *slot = Some(child);
    }

    fn remove_child(&mut self, key_fragment: u8) -> Option<OpaqueNodePtr<K, V, PREFIX_LEN>> {
        let removed = self.child_pointers[usize::from(key_fragment)].take();
        if removed.is_some() {
            self.header.dec_num_children();
        }
        removed
    }

    fn grow(&self) -> Self::GrownNode {
        unreachable!("Inner256 is the largest node kind and never grows")
    }

    fn shrink(&self) -> Self::ShrunkNode {
        debug_assert!(
            self.header.num_children() <= 48,
            "cannot shrink Inner256 with more than 48 children"
        );
        let mut shrunk = InnerNode48::from_header(self.header.clone());
        for (key_fragment, child) in self.iter() {
            shrunk.write_child(key_fragment, child);
        }
        shrunk
    }

    fn iter(&self) -> Self::Iter<'_> {
        self.child_pointers
            .iter()
            .enumerate()
            .filter_map(|(key, slot)| slot.map(|child| (key as u8, child)))
    }
}

/// Iterator over an [`InnerNode256`]'s children, in ascending key-byte
/// order.
pub type InnerNode256Iter<'a, K, V, const PREFIX_LEN: usize> = FilterMap<
    Enumerate<std::slice::Iter<'a, ChildSlot<K, V, PREFIX_LEN>>>,
    fn((usize, &'a ChildSlot<K, V, PREFIX_LEN>)) -> Option<(u8, OpaqueNodePtr<K, V, PREFIX_LEN>)>,
>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{LeafNode, NodePtr};

    fn leaf_ptr(value: u8) -> OpaqueNodePtr<Box<[u8]>, u8, 4> {
        let leaf = LeafNode::new(Box::from([]), value);
        NodePtr::allocate(leaf).to_opaque()
    }

    #[test]
    fn direct_index_lookup() {
        let mut node = InnerNode256::<Box<[u8]>, u8, 4>::from_header(Header::empty());
        let p1 = leaf_ptr(1);
        node.write_child(200, p1);
        assert_eq!(node.lookup_child(200), Some(p1));
        assert!(node.lookup_child(201).is_none());
        assert_eq!(node.header.num_children(), 1);
    }

    #[test]
    fn remove_clears_slot() {
        let mut node = InnerNode256::<Box<[u8]>, u8, 4>::from_header(Header::empty());
        node.write_child(7, leaf_ptr(1));
        assert!(node.remove_child(7).is_some());
        assert!(node.lookup_child(7).is_none());
        assert_eq!(node.header.num_children(), 0);
    }

    #[test]
    fn shrink_to_inner48() {
        let mut node = InnerNode256::<Box<[u8]>, u8, 4>::from_header(Header::empty());
        node.write_child(7, leaf_ptr(1));
        node.write_child(9, leaf_ptr(2));
        let shrunk = node.shrink();
        assert!(shrunk.lookup_child(7).is_some());
        assert!(shrunk.lookup_child(9).is_some());
    }
}
