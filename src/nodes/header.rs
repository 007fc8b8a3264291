//! The header shared by every inner node kind: child count, key-prefix
//! storage, and the OLC version word that makes the node engine usable by
//! both the single-threaded and concurrent tree variants.

use std::{cmp::Ordering, error::Error, fmt, ops::Range};

use crate::lock::OptimisticLock;

/// The runtime tag identifying an inner node's capacity class, or a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    /// Between 1 and 4 children (spec calls the minimum 2 in the steady
    /// state; a freshly split node may transiently hold 1 before its second
    /// child is attached).
    Node4 = 0b000,
    /// Between 5 and 16 children.
    Node16 = 0b001,
    /// Between 17 and 48 children.
    Node48 = 0b010,
    /// Between 49 and 256 children.
    Node256 = 0b011,
    /// A single key/value pair.
    Leaf = 0b100,
}

impl NodeType {
    /// Reinterpret a tag byte as a `NodeType`. Only ever called on tag bits
    /// written by [`crate::nodes::OpaqueNodePtr::new`].
    pub(crate) const fn from_u8(src: u8) -> NodeType {
        match src {
            0b000 => NodeType::Node4,
            0b001 => NodeType::Node16,
            0b010 => NodeType::Node48,
            0b011 => NodeType::Node256,
            _ => NodeType::Leaf,
        }
    }

    /// Upper bound on child count for this node kind.
    pub const fn upper_capacity(self) -> usize {
        match self {
            NodeType::Node4 => 4,
            NodeType::Node16 => 16,
            NodeType::Node48 => 48,
            NodeType::Node256 => 256,
            NodeType::Leaf => 0,
        }
    }

    /// `[min, capacity]` range of children this node kind accepts in steady
    /// state.
    pub const fn capacity_range(self) -> Range<usize> {
        match self {
            NodeType::Node4 => Range { start: 2, end: 5 },
            NodeType::Node16 => Range { start: 5, end: 17 },
            NodeType::Node48 => Range { start: 17, end: 49 },
            NodeType::Node256 => Range { start: 49, end: 257 },
            NodeType::Leaf => Range { start: 0, end: 0 },
        }
    }

    /// Whether a node of this kind with `num_children` remaining should
    /// demote to the next smaller kind.
    pub fn should_shrink(self, num_children: usize) -> bool {
        match self {
            NodeType::Node4 => false,
            NodeType::Node16 => num_children < 5,
            NodeType::Node48 => num_children < 17,
            NodeType::Node256 => num_children < 49,
            NodeType::Leaf => panic!("cannot shrink a leaf"),
        }
    }
}

/// The common header embedded in every inner node, parameterized by how
/// many prefix bytes are stored inline.
///
/// `prefix_len` is the *logical* number of prefix bytes; it may exceed
/// `PREFIX_LEN`, in which case only the first `PREFIX_LEN` bytes are stored
/// here and the remainder must be read from a representative leaf beneath
/// this node (see `DESIGN.md`'s resolution of the prefix-overflow open
/// question).
pub struct Header<const PREFIX_LEN: usize> {
    lock: OptimisticLock,
    num_children: u16,
    prefix_len: u32,
    prefix: [u8; PREFIX_LEN],
}

impl<const PREFIX_LEN: usize> fmt::Debug for Header<PREFIX_LEN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("num_children", &self.num_children)
            .field("prefix_len", &self.prefix_len)
            .field("prefix", &self.read_capped_prefix())
            .finish()
    }
}

impl<const PREFIX_LEN: usize> Clone for Header<PREFIX_LEN> {
    fn clone(&self) -> Self {
        Header {
            lock: OptimisticLock::new(),
            num_children: self.num_children,
            prefix_len: self.prefix_len,
            prefix: self.prefix,
        }
    }
}

impl<const PREFIX_LEN: usize> Default for Header<PREFIX_LEN> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const PREFIX_LEN: usize> Header<PREFIX_LEN> {
    /// Create a new, empty header with no children and no prefix.
    pub fn empty() -> Self {
        Header {
            lock: OptimisticLock::new(),
            num_children: 0,
            prefix_len: 0,
            prefix: [0; PREFIX_LEN],
        }
    }

    /// Build a header carrying the given prefix bytes (capped at
    /// `PREFIX_LEN`; `prefix_len` still records the true length).
    pub fn with_prefix(prefix_bytes: &[u8], true_len: usize) -> Self {
        let mut prefix = [0u8; PREFIX_LEN];
        let capped = prefix_bytes.len().min(PREFIX_LEN);
        prefix[..capped].copy_from_slice(&prefix_bytes[..capped]);
        Header {
            lock: OptimisticLock::new(),
            num_children: 0,
            prefix_len: true_len as u32,
            prefix,
        }
    }

    /// The OLC version word for this node.
    pub fn lock(&self) -> &OptimisticLock {
        &self.lock
    }

    /// Current child count.
    pub fn num_children(&self) -> usize {
        usize::from(self.num_children)
    }

    /// Increment the child count by one.
    pub fn inc_num_children(&mut self) {
        self.num_children += 1;
    }

    /// Decrement the child count by one.
    pub fn dec_num_children(&mut self) {
        self.num_children -= 1;
    }

    /// Logical prefix length, which may exceed `PREFIX_LEN`.
    pub fn prefix_len(&self) -> usize {
        self.prefix_len as usize
    }

    /// True if the logical prefix is longer than what's stored inline, i.e.
    /// reading the full prefix requires a representative leaf.
    pub fn prefix_overflows(&self) -> bool {
        self.prefix_len() > PREFIX_LEN
    }

    /// The inline-stored prefix bytes (at most `PREFIX_LEN`; may be fewer
    /// than `prefix_len()` if the prefix overflows).
    pub fn read_capped_prefix(&self) -> &[u8] {
        &self.prefix[..self.prefix_len().min(PREFIX_LEN)]
    }

    /// Replace the stored prefix wholesale (used after grow/shrink, which
    /// preserve the prefix as-is).
    pub fn set_prefix(&mut self, prefix_bytes: &[u8], true_len: usize) {
        let capped = prefix_bytes.len().min(PREFIX_LEN);
        self.prefix = [0u8; PREFIX_LEN];
        self.prefix[..capped].copy_from_slice(&prefix_bytes[..capped]);
        self.prefix_len = true_len as u32;
    }

    /// Remove `num_bytes` from the front of the logical prefix (the bytes a
    /// descent step consumed on its way past this node), re-deriving the
    /// now-shorter
    /// capped array from `full_prefix` (the logical prefix bytes, already
    /// resolved past any overflow by the caller — see
    /// [`super::representation::resolve_prefix`]).
    pub fn ltrim_prefix(&mut self, num_bytes: usize, full_prefix_after: &[u8]) {
        assert!(
            num_bytes <= self.prefix_len(),
            "cannot trim more than the prefix length"
        );
        self.prefix_len -= num_bytes as u32;
        self.set_prefix(full_prefix_after, self.prefix_len());
    }

    /// Prepend bytes to the logical prefix (used when collapsing an
    /// `Inner4` into its sole surviving child on delete). `full_prefix` is
    /// the complete, already-combined logical
    /// prefix (`new_bytes || old logical prefix`), resolved by the caller.
    pub fn prepend_prefix(&mut self, new_bytes_len: usize, full_prefix: &[u8]) {
        self.set_prefix(full_prefix, self.prefix_len() + new_bytes_len);
    }
}

/// An index into a fixed-capacity child array, restricted to `0..LIMIT`,
/// with `LIMIT` itself reserved as the "empty slot" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct RestrictedNodeIndex<const LIMIT: u8>(u8);

impl<const LIMIT: u8> RestrictedNodeIndex<LIMIT> {
    /// The sentinel value meaning "no child at this key byte".
    pub const EMPTY: Self = RestrictedNodeIndex(LIMIT);

    /// True if this is the empty sentinel.
    pub fn is_empty(self) -> bool {
        self == Self::EMPTY
    }
}

impl<const LIMIT: u8> From<RestrictedNodeIndex<LIMIT>> for u8 {
    fn from(src: RestrictedNodeIndex<LIMIT>) -> Self {
        src.0
    }
}

impl<const LIMIT: u8> From<RestrictedNodeIndex<LIMIT>> for usize {
    fn from(src: RestrictedNodeIndex<LIMIT>) -> Self {
        usize::from(src.0)
    }
}

impl<const LIMIT: u8> TryFrom<usize> for RestrictedNodeIndex<LIMIT> {
    type Error = TryFromByteError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        if value < usize::from(LIMIT) {
            Ok(RestrictedNodeIndex(value as u8))
        } else {
            Err(TryFromByteError(LIMIT, value))
        }
    }
}

impl<const LIMIT: u8> PartialOrd for RestrictedNodeIndex<LIMIT> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.0 == LIMIT || other.0 == LIMIT {
            None
        } else {
            Some(self.0.cmp(&other.0))
        }
    }
}

/// Error constructing a [`RestrictedNodeIndex`] out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryFromByteError(u8, usize);

impl fmt::Display for TryFromByteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input value [{}] is greater than the allowed maximum [{}] for RestrictedNodeIndex",
            self.1, self.0
        )
    }
}

impl Error for TryFromByteError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_round_trips_under_cap() {
        let header = Header::<7>::with_prefix(&[1, 2, 3], 3);
        assert_eq!(header.read_capped_prefix(), &[1, 2, 3]);
        assert_eq!(header.prefix_len(), 3);
        assert!(!header.prefix_overflows());
    }

    #[test]
    fn overflowing_prefix_is_detected() {
        let header = Header::<4>::with_prefix(&[1, 2, 3, 4], 6);
        assert!(header.prefix_overflows());
        assert_eq!(header.read_capped_prefix(), &[1, 2, 3, 4]);
    }
}
