//! Node pointers and the `Node`/`InnerNode` traits shared by every inner
//! node kind.

use std::{
    fmt,
    hash::Hash,
    marker::PhantomData,
    mem::ManuallyDrop,
    ptr::{self, NonNull},
};

use crate::{
    bytes::AsBytes,
    lock::OptimisticLock,
    nodes::{
        header::{Header, NodeType},
        InnerNode16, InnerNode256, InnerNode4, InnerNode48, LeafNode,
    },
    tagged_pointer::TaggedPointer,
};

/// A placeholder type with enough alignment to guarantee the tag bits in
/// [`OpaqueNodePtr`] are always zero before tagging.
#[repr(align(8))]
struct OpaqueValue;

/// An opaque, type-erased pointer to any node kind. The low tag bits
/// identify the concrete kind without dereferencing it.
#[repr(transparent)]
pub struct OpaqueNodePtr<K, V, const PREFIX_LEN: usize>(
    TaggedPointer<OpaqueValue, 3>,
    PhantomData<(K, V)>,
);

impl<K, V, const PREFIX_LEN: usize> Copy for OpaqueNodePtr<K, V, PREFIX_LEN> {}
impl<K, V, const PREFIX_LEN: usize> Clone for OpaqueNodePtr<K, V, PREFIX_LEN> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K, V, const PREFIX_LEN: usize> PartialEq for OpaqueNodePtr<K, V, PREFIX_LEN> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<K, V, const PREFIX_LEN: usize> Eq for OpaqueNodePtr<K, V, PREFIX_LEN> {}
impl<K, V, const PREFIX_LEN: usize> Hash for OpaqueNodePtr<K, V, PREFIX_LEN> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}
impl<K, V, const PREFIX_LEN: usize> fmt::Debug for OpaqueNodePtr<K, V, PREFIX_LEN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OpaqueNodePtr").field(&self.0).finish()
    }
}

impl<K, V, const PREFIX_LEN: usize> OpaqueNodePtr<K, V, PREFIX_LEN> {
    /// Construct an opaque pointer from a concretely-typed node pointer.
    pub fn new<N>(pointer: NonNull<N>) -> Self
    where
        N: Node<PREFIX_LEN, Value = V>,
    {
        let mut tagged = TaggedPointer::new(pointer).cast::<OpaqueValue>();
        tagged.set_data(N::TYPE as usize);
        #[cfg(feature = "stats")]
        crate::stats::NODE_STATS.record_alloc(N::TYPE);
        OpaqueNodePtr(tagged, PhantomData)
    }

    /// True if the pointed-to node is of kind `N`.
    pub fn is<N: Node<PREFIX_LEN>>(&self) -> bool {
        self.0.to_data() == usize::from(N::TYPE as u8)
    }

    /// Narrow to a concretely-typed pointer if the runtime kind matches `N`.
    pub fn cast<N: Node<PREFIX_LEN>>(self) -> Option<NodePtr<PREFIX_LEN, N>> {
        self.is::<N>().then(|| NodePtr(self.0.cast::<N>().to_ptr() as *mut N))
            .map(|p| unsafe { NodePtr::new(p) })
    }

    /// Runtime node-kind tag.
    pub fn node_type(self) -> NodeType {
        NodeType::from_u8(self.0.to_data() as u8)
    }

    /// Dispatch to a concrete, typed pointer inside an enum, one arm per
    /// node kind.
    pub fn to_node_ptr(self) -> ConcreteNodePtr<K, V, PREFIX_LEN> {
        match self.node_type() {
            NodeType::Node4 => ConcreteNodePtr::Node4(unsafe {
                NodePtr::new(self.0.cast::<InnerNode4<K, V, PREFIX_LEN>>().to_ptr())
            }),
            NodeType::Node16 => ConcreteNodePtr::Node16(unsafe {
                NodePtr::new(self.0.cast::<InnerNode16<K, V, PREFIX_LEN>>().to_ptr())
            }),
            NodeType::Node48 => ConcreteNodePtr::Node48(unsafe {
                NodePtr::new(self.0.cast::<InnerNode48<K, V, PREFIX_LEN>>().to_ptr())
            }),
            NodeType::Node256 => ConcreteNodePtr::Node256(unsafe {
                NodePtr::new(self.0.cast::<InnerNode256<K, V, PREFIX_LEN>>().to_ptr())
            }),
            NodeType::Leaf => ConcreteNodePtr::LeafNode(unsafe {
                NodePtr::new(self.0.cast::<LeafNode<K, V>>().to_ptr())
            }),
        }
    }

    /// The raw tagged address, for publishing through an `AtomicUsize` root
    /// slot (see `crate::concurrent`).
    pub fn to_raw(self) -> usize {
        self.0.to_raw()
    }

    /// Reconstruct from a raw tagged address previously produced by
    /// [`Self::to_raw`].
    ///
    /// # Safety
    /// `raw` must be non-zero and have been produced by `to_raw` on a node
    /// pointer of this same `K`/`V`/`PREFIX_LEN` that is still live.
    pub unsafe fn from_raw(raw: usize) -> Self {
        OpaqueNodePtr(unsafe { TaggedPointer::from_raw(raw) }, PhantomData)
    }

    /// Borrow this node's header, if it has one (leaves don't).
    ///
    /// # Safety
    /// Caller must uphold the aliasing rules for the returned lifetime: no
    /// other live reference may mutate the header concurrently.
    pub unsafe fn header<'h>(self) -> Option<&'h Header<PREFIX_LEN>> {
        match self.to_node_ptr() {
            ConcreteNodePtr::Node4(p) => Some(unsafe { &p.as_ref().header }),
            ConcreteNodePtr::Node16(p) => Some(unsafe { &p.as_ref().header }),
            ConcreteNodePtr::Node48(p) => Some(unsafe { &p.as_ref().header }),
            ConcreteNodePtr::Node256(p) => Some(unsafe { &p.as_ref().header }),
            ConcreteNodePtr::LeafNode(_) => None,
        }
    }
}

/// Dispatch of an [`OpaqueNodePtr`] into one concretely-typed pointer per
/// node kind.
pub enum ConcreteNodePtr<K, V, const PREFIX_LEN: usize> {
    /// 2-4 children.
    Node4(NodePtr<PREFIX_LEN, InnerNode4<K, V, PREFIX_LEN>>),
    /// 5-16 children.
    Node16(NodePtr<PREFIX_LEN, InnerNode16<K, V, PREFIX_LEN>>),
    /// 17-48 children.
    Node48(NodePtr<PREFIX_LEN, InnerNode48<K, V, PREFIX_LEN>>),
    /// 49-256 children.
    Node256(NodePtr<PREFIX_LEN, InnerNode256<K, V, PREFIX_LEN>>),
    /// A single key/value pair.
    LeafNode(NodePtr<PREFIX_LEN, LeafNode<K, V>>),
}

/// A non-null pointer to a concrete node type `N`.
#[repr(transparent)]
pub struct NodePtr<const PREFIX_LEN: usize, N>(NonNull<N>);

impl<const PREFIX_LEN: usize, N> NodePtr<PREFIX_LEN, N> {
    /// Wrap a raw, non-null, well-aligned pointer.
    ///
    /// # Safety
    /// `ptr` must be non-null, aligned, and valid for reads/writes of `N`.
    pub unsafe fn new(ptr: *mut N) -> Self {
        unsafe { NodePtr(NonNull::new_unchecked(ptr)) }
    }

    /// Heap-allocate `node` and return a pointer to it.
    pub fn allocate(node: N) -> Self {
        unsafe { NodePtr::new(Box::into_raw(Box::new(node))) }
    }

    /// Deallocate a node created by [`Self::allocate`].
    ///
    /// # Safety
    /// May only be called once per allocation.
    pub unsafe fn deallocate(self) -> N {
        unsafe { *Box::from_raw(self.0.as_ptr()) }
    }

    /// Borrow the pointee.
    ///
    /// # Safety
    /// No concurrent mutation through another pointer for the returned
    /// lifetime.
    pub unsafe fn as_ref<'a>(self) -> &'a N {
        unsafe { self.0.as_ref() }
    }

    /// Mutably borrow the pointee.
    ///
    /// # Safety
    /// No concurrent access through another pointer for the returned
    /// lifetime.
    pub unsafe fn as_mut<'a>(mut self) -> &'a mut N {
        unsafe { self.0.as_mut() }
    }

    /// Raw pointer to the pointee.
    pub fn to_ptr(self) -> *mut N {
        self.0.as_ptr()
    }

    /// Read the node out without moving it (leaves the backing memory
    /// unchanged); used when transplanting a node's fields into a grown or
    /// shrunk replacement before deallocating the original slot.
    pub fn read(self) -> ManuallyDrop<N> {
        ManuallyDrop::new(unsafe { ptr::read(self.0.as_ptr()) })
    }
}

impl<const PREFIX_LEN: usize, N> Clone for NodePtr<PREFIX_LEN, N> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<const PREFIX_LEN: usize, N> Copy for NodePtr<PREFIX_LEN, N> {}
impl<const PREFIX_LEN: usize, N> PartialEq for NodePtr<PREFIX_LEN, N> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<const PREFIX_LEN: usize, N> Eq for NodePtr<PREFIX_LEN, N> {}
impl<const PREFIX_LEN: usize, N> fmt::Debug for NodePtr<PREFIX_LEN, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodePtr").field(&self.0.as_ptr()).finish()
    }
}

impl<const PREFIX_LEN: usize, N: Node<PREFIX_LEN>> NodePtr<PREFIX_LEN, N> {
    /// Erase the concrete type.
    pub fn to_opaque(self) -> OpaqueNodePtr<N::Key, N::Value, PREFIX_LEN> {
        OpaqueNodePtr::new(self.0)
    }
}

pub(crate) mod private {
    pub trait Sealed {}
}

/// A node that carries a runtime type tag matching one of [`NodeType`].
pub trait Node<const PREFIX_LEN: usize>: private::Sealed {
    /// Runtime tag for this concrete type.
    const TYPE: NodeType;
    /// The key type stored in leaves below this node.
    type Key: AsBytes;
    /// The value type stored in leaves below this node.
    type Value;
}

/// Operations common to all four inner-node capacity classes.
pub trait InnerNode<const PREFIX_LEN: usize>: Node<PREFIX_LEN> {
    /// The next larger capacity class.
    type GrownNode: InnerNode<PREFIX_LEN, Key = Self::Key, Value = Self::Value>;
    /// The next smaller capacity class.
    type ShrunkNode: InnerNode<PREFIX_LEN, Key = Self::Key, Value = Self::Value>;
    /// Iterator over `(key_byte, child)` pairs in ascending key-byte order.
    type Iter<'a>: DoubleEndedIterator<Item = (u8, OpaqueNodePtr<Self::Key, Self::Value, PREFIX_LEN>)>
    where
        Self: 'a;

    /// Shared header access.
    fn header(&self) -> &Header<PREFIX_LEN>;
    /// Exclusive header access.
    fn header_mut(&mut self) -> &mut Header<PREFIX_LEN>;
    /// Construct an empty node carrying the given header (prefix already
    /// set, zero children).
    fn from_header(header: Header<PREFIX_LEN>) -> Self;

    /// True if this node has no room for another child.
    fn is_full(&self) -> bool {
        self.header().num_children() >= Self::TYPE.upper_capacity()
    }

    /// Find the child for `key_fragment`.
    fn lookup_child(&self, key_fragment: u8) -> Option<OpaqueNodePtr<Self::Key, Self::Value, PREFIX_LEN>>;

    /// Write (insert or overwrite) the child at `key_fragment`.
    ///
    /// # Panics
    /// Panics if the node is full and `key_fragment` is not already present.
    fn write_child(&mut self, key_fragment: u8, child: OpaqueNodePtr<Self::Key, Self::Value, PREFIX_LEN>);

    /// Remove the child at `key_fragment`, if present.
    fn remove_child(&mut self, key_fragment: u8) -> Option<OpaqueNodePtr<Self::Key, Self::Value, PREFIX_LEN>>;

    /// Promote to the next larger capacity class, preserving all children
    /// and the prefix.
    fn grow(&self) -> Self::GrownNode;

    /// Demote to the next smaller capacity class.
    ///
    /// # Panics
    /// Panics if this node currently holds more children than the smaller
    /// class can hold.
    fn shrink(&self) -> Self::ShrunkNode;

    /// Iterate all `(key_byte, child)` pairs in ascending order.
    fn iter(&self) -> Self::Iter<'_>;

    /// The child with the smallest key byte.
    fn min(&self) -> (u8, OpaqueNodePtr<Self::Key, Self::Value, PREFIX_LEN>) {
        self.iter().next().expect("inner node always has at least one child")
    }

    /// The child with the largest key byte.
    fn max(&self) -> (u8, OpaqueNodePtr<Self::Key, Self::Value, PREFIX_LEN>) {
        self.iter().next_back().expect("inner node always has at least one child")
    }

    /// The smallest-keyed child with a key byte strictly greater than
    /// `key_fragment`.
    fn child_after(&self, key_fragment: u8) -> Option<(u8, OpaqueNodePtr<Self::Key, Self::Value, PREFIX_LEN>)> {
        self.iter().find(|(k, _)| *k > key_fragment)
    }

    /// The largest-keyed child with a key byte strictly less than
    /// `key_fragment`.
    fn child_before(&self, key_fragment: u8) -> Option<(u8, OpaqueNodePtr<Self::Key, Self::Value, PREFIX_LEN>)> {
        self.iter().rev().find(|(k, _)| *k < key_fragment)
    }

    /// The smallest-keyed child with a key byte greater than or equal to
    /// `key_fragment`.
    fn gte_child(&self, key_fragment: u8) -> Option<(u8, OpaqueNodePtr<Self::Key, Self::Value, PREFIX_LEN>)> {
        self.iter().find(|(k, _)| *k >= key_fragment)
    }

    /// The largest-keyed child with a key byte less than or equal to
    /// `key_fragment`.
    fn lte_child(&self, key_fragment: u8) -> Option<(u8, OpaqueNodePtr<Self::Key, Self::Value, PREFIX_LEN>)> {
        self.iter().rev().find(|(k, _)| *k <= key_fragment)
    }
}

/// Resolve a node header's full logical prefix bytes, reading past the
/// inline cap from a representative leaf's key when the prefix overflows
/// `PREFIX_LEN` (the chosen policy for the overflowing-prefix case:
/// reconstruct on demand from a leaf rather than truncate or refuse to
/// collapse).
///
/// `leaf_key` must be the full key of any leaf reachable below the node that
/// owns `header`; `depth` is the byte offset into that key at which the
/// node's prefix begins.
pub fn resolve_prefix<'a, const PREFIX_LEN: usize>(
    header: &'a Header<PREFIX_LEN>,
    leaf_key: &'a [u8],
    depth: usize,
) -> &'a [u8] {
    if header.prefix_overflows() {
        &leaf_key[depth..depth + header.prefix_len()]
    } else {
        header.read_capped_prefix()
    }
}

/// Dispatch `lookup_child` to whichever concrete inner-node kind `ptr`
/// actually is. Returns `None` immediately for a leaf (a leaf has no
/// children).
///
/// # Safety
/// `ptr` must point to a live, fully-initialized node.
pub unsafe fn dispatch_lookup_child<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
    key_fragment: u8,
) -> Option<OpaqueNodePtr<K, V, PREFIX_LEN>> {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_ref() }.lookup_child(key_fragment),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_ref() }.lookup_child(key_fragment),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_ref() }.lookup_child(key_fragment),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_ref() }.lookup_child(key_fragment),
        ConcreteNodePtr::LeafNode(_) => None,
    }
}

/// True if the pointed-to inner node has no room for another child. Leaves
/// report `false` (the question doesn't arise for them).
///
/// # Safety
/// `ptr` must point to a live, fully-initialized node.
pub unsafe fn dispatch_is_full<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> bool {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_ref() }.is_full(),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_ref() }.is_full(),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_ref() }.is_full(),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_ref() }.is_full(),
        ConcreteNodePtr::LeafNode(_) => false,
    }
}

/// Write (insert or overwrite) a child into whichever concrete inner-node
/// kind `ptr` is.
///
/// # Safety
/// `ptr` must point to a live, exclusively-held, non-full inner node.
pub unsafe fn dispatch_write_child<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
    key_fragment: u8,
    child: OpaqueNodePtr<K, V, PREFIX_LEN>,
) {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_mut() }.write_child(key_fragment, child),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_mut() }.write_child(key_fragment, child),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_mut() }.write_child(key_fragment, child),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_mut() }.write_child(key_fragment, child),
        ConcreteNodePtr::LeafNode(_) => unreachable!("a leaf has no children to write"),
    }
}

/// Remove a child from whichever concrete inner-node kind `ptr` is.
///
/// # Safety
/// `ptr` must point to a live, exclusively-held inner node.
pub unsafe fn dispatch_remove_child<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
    key_fragment: u8,
) -> Option<OpaqueNodePtr<K, V, PREFIX_LEN>> {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_mut() }.remove_child(key_fragment),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_mut() }.remove_child(key_fragment),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_mut() }.remove_child(key_fragment),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_mut() }.remove_child(key_fragment),
        ConcreteNodePtr::LeafNode(_) => unreachable!("a leaf has no children to remove"),
    }
}

/// Allocate a grown replacement for an over-full inner node, copy all of
/// its children across, and deallocate the original.
///
/// # Safety
/// `ptr` must point to a live, exclusively-held, full, non-`Node256` inner
/// node with no other live references to it.
pub unsafe fn dispatch_grow<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> OpaqueNodePtr<K, V, PREFIX_LEN> {
    let from = ptr.node_type();
    let grown = match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => {
            let grown = unsafe { p.as_ref() }.grow();
            unsafe { p.deallocate() };
            NodePtr::allocate(grown).to_opaque()
        },
        ConcreteNodePtr::Node16(p) => {
            let grown = unsafe { p.as_ref() }.grow();
            unsafe { p.deallocate() };
            NodePtr::allocate(grown).to_opaque()
        },
        ConcreteNodePtr::Node48(p) => {
            let grown = unsafe { p.as_ref() }.grow();
            unsafe { p.deallocate() };
            NodePtr::allocate(grown).to_opaque()
        },
        ConcreteNodePtr::Node256(_) => unreachable!("Node256 never grows"),
        ConcreteNodePtr::LeafNode(_) => unreachable!("a leaf never grows"),
    };
    #[cfg(feature = "stats")]
    crate::stats::NODE_STATS.record_free(from);
    #[cfg(feature = "stats")]
    crate::stats::NodeStats::bump(&crate::stats::NODE_STATS.grow_count);
    log::trace!(target: "radix_art::nodes", "grew {from:?} -> {:?}", grown.node_type());
    grown
}

/// Allocate a shrunk replacement for an under-full inner node, copy all of
/// its children across, and deallocate the original.
///
/// # Safety
/// `ptr` must point to a live, exclusively-held inner node whose child
/// count fits the next-smaller capacity class, with no other live
/// references to it.
pub unsafe fn dispatch_shrink<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> OpaqueNodePtr<K, V, PREFIX_LEN> {
    let from = ptr.node_type();
    let shrunk = match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(_) => unreachable!("Node4 never shrinks"),
        ConcreteNodePtr::Node16(p) => {
            let shrunk = unsafe { p.as_ref() }.shrink();
            unsafe { p.deallocate() };
            NodePtr::allocate(shrunk).to_opaque()
        },
        ConcreteNodePtr::Node48(p) => {
            let shrunk = unsafe { p.as_ref() }.shrink();
            unsafe { p.deallocate() };
            NodePtr::allocate(shrunk).to_opaque()
        },
        ConcreteNodePtr::Node256(p) => {
            let shrunk = unsafe { p.as_ref() }.shrink();
            unsafe { p.deallocate() };
            NodePtr::allocate(shrunk).to_opaque()
        },
        ConcreteNodePtr::LeafNode(_) => unreachable!("a leaf never shrinks"),
    };
    #[cfg(feature = "stats")]
    crate::stats::NODE_STATS.record_free(from);
    #[cfg(feature = "stats")]
    crate::stats::NodeStats::bump(&crate::stats::NODE_STATS.shrink_count);
    log::trace!(target: "radix_art::nodes", "shrank {from:?} -> {:?}", shrunk.node_type());
    shrunk
}

/// Number of children of whichever concrete inner-node kind `ptr` is, or 0
/// for a leaf.
///
/// # Safety
/// `ptr` must point to a live node.
pub unsafe fn dispatch_num_children<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> usize {
    unsafe { ptr.header() }.map_or(0, Header::num_children)
}

/// The single child of a `Node4` holding exactly one child, used when
/// collapsing it into its child during delete. Returns the `(key_byte,
/// child)` pair.
///
/// # Safety
/// `ptr` must point to a live `Node4` with exactly one child.
pub unsafe fn dispatch_sole_child<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> (u8, OpaqueNodePtr<K, V, PREFIX_LEN>) {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_ref() }
            .iter()
            .next()
            .expect("Node4 being collapsed must have exactly one child"),
        _ => unreachable!("only a Node4 is ever collapsed"),
    }
}

/// Find the leftmost leaf reachable below `ptr`, used to obtain a
/// representative key for prefix-overflow resolution and for iterator
/// initialization.
///
/// # Safety
/// `ptr` must point to a live node, and every node on the leftmost path
/// below it must also be live.
pub unsafe fn leftmost_leaf<K: AsBytes, V, const PREFIX_LEN: usize>(
    mut ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> NodePtr<PREFIX_LEN, LeafNode<K, V>> {
    loop {
        match ptr.to_node_ptr() {
            ConcreteNodePtr::Node4(p) => ptr = unsafe { p.as_ref() }.min().1,
            ConcreteNodePtr::Node16(p) => ptr = unsafe { p.as_ref() }.min().1,
            ConcreteNodePtr::Node48(p) => ptr = unsafe { p.as_ref() }.min().1,
            ConcreteNodePtr::Node256(p) => ptr = unsafe { p.as_ref() }.min().1,
            ConcreteNodePtr::LeafNode(p) => return p,
        }
    }
}

/// Truncate the logical prefix of whichever concrete inner-node kind `ptr`
/// is, dropping `num_bytes` from the front (the bytes a descent step or a
/// prefix split consumed). `full_prefix_after` is the
/// already-resolved logical prefix that remains once those bytes are gone.
///
/// # Safety
/// `ptr` must point to a live, exclusively-held inner node.
pub unsafe fn dispatch_ltrim_prefix<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
    num_bytes: usize,
    full_prefix_after: &[u8],
) {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_mut() }
            .header_mut()
            .ltrim_prefix(num_bytes, full_prefix_after),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_mut() }
            .header_mut()
            .ltrim_prefix(num_bytes, full_prefix_after),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_mut() }
            .header_mut()
            .ltrim_prefix(num_bytes, full_prefix_after),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_mut() }
            .header_mut()
            .ltrim_prefix(num_bytes, full_prefix_after),
        ConcreteNodePtr::LeafNode(_) => unreachable!("a leaf has no prefix to trim"),
    }
}

/// Prepend bytes to the logical prefix of whichever concrete inner-node
/// kind `ptr` is, used when collapsing a `Node4` into its sole child.
///
/// # Safety
/// `ptr` must point to a live, exclusively-held inner node.
pub unsafe fn dispatch_prepend_prefix<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
    new_bytes_len: usize,
    full_prefix: &[u8],
) {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_mut() }
            .header_mut()
            .prepend_prefix(new_bytes_len, full_prefix),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_mut() }
            .header_mut()
            .prepend_prefix(new_bytes_len, full_prefix),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_mut() }
            .header_mut()
            .prepend_prefix(new_bytes_len, full_prefix),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_mut() }
            .header_mut()
            .prepend_prefix(new_bytes_len, full_prefix),
        ConcreteNodePtr::LeafNode(_) => unreachable!("a leaf has no prefix to prepend to"),
    }
}

/// Borrow whichever concrete node kind `ptr` is, as its embedded
/// [`OptimisticLock`] — leaves and inner nodes alike each embed one, for
/// uniformity. The sole caller of this today is `crate::concurrent`, which needs a
/// uniform way to read/write-lock whatever node a tagged pointer currently
/// refers to without first knowing its kind.
///
/// # Safety
/// `ptr` must point to a live node.
pub unsafe fn dispatch_lock<'a, K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) -> &'a OptimisticLock {
    match ptr.to_node_ptr() {
        ConcreteNodePtr::Node4(p) => unsafe { p.as_ref() }.header.lock(),
        ConcreteNodePtr::Node16(p) => unsafe { p.as_ref() }.header.lock(),
        ConcreteNodePtr::Node48(p) => unsafe { p.as_ref() }.header.lock(),
        ConcreteNodePtr::Node256(p) => unsafe { p.as_ref() }.header.lock(),
        ConcreteNodePtr::LeafNode(p) => unsafe { p.as_ref() }.lock(),
    }
}

/// Record that the node `ptr` points to is about to be permanently freed, for
/// the `stats` feature's live node-kind counters. Callers that free a node
/// without going through [`dispatch_grow`]/[`dispatch_shrink`] (which already
/// record their own old-node frees) must call this first.
///
/// # Safety
/// `ptr` must point to a currently-live node; this call itself does not free
/// anything.
#[cfg(feature = "stats")]
pub(crate) unsafe fn dispatch_record_free<K: AsBytes, V, const PREFIX_LEN: usize>(
    ptr: OpaqueNodePtr<K, V, PREFIX_LEN>,
) {
    crate::stats::NODE_STATS.record_free(ptr.node_type());
}

/// Count how many leading bytes of `remaining_key` match this node's
/// logical prefix, consulting a representative leaf for the overflow tail
/// if needed (see [`resolve_prefix`]).
pub fn match_prefix<const PREFIX_LEN: usize>(
    header: &Header<PREFIX_LEN>,
    remaining_key: &[u8],
    leaf_key: &[u8],
    depth: usize,
) -> usize {
    let full_prefix = resolve_prefix(header, leaf_key, depth);
    full_prefix
        .iter()
        .zip(remaining_key)
        .take_while(|(a, b)| a == b)
        .count()
}
