//! Node representation and single-threaded tree algorithms.
//!
//! A `header`/`representation` split carries the node engine (four
//! inner-node capacity classes plus a leaf, sharing one pointer
//! representation), and `operations` carries the free-function tree
//! algorithms (lookup/insert/delete/iteration) built on top of it. Both the
//! single-threaded collection and the concurrent, OLC-layered one share this
//! same node engine.

mod header;
mod inner16;
mod inner256;
mod inner4;
mod inner48;
mod leaf;
pub mod operations;
pub(crate) mod representation;

pub use header::{Header, NodeType, RestrictedNodeIndex, TryFromByteError};
pub use inner16::{InnerNode16, InnerNode16Iter};
pub use inner256::{InnerNode256, InnerNode256Iter};
pub use inner4::{InnerNode4, InnerNode4Iter};
pub use inner48::{InnerNode48, InnerNode48Iter};
pub use leaf::LeafNode;
pub use representation::{
    dispatch_grow, dispatch_is_full, dispatch_lock, dispatch_lookup_child, dispatch_ltrim_prefix,
    dispatch_num_children, dispatch_prepend_prefix, dispatch_remove_child, dispatch_shrink,
    dispatch_sole_child, dispatch_write_child, leftmost_leaf, match_prefix, resolve_prefix,
    ConcreteNodePtr, InnerNode, Node, NodePtr, OpaqueNodePtr,
};
