//! Error types surfaced by the tree's public API.
//!
//! "Already present" and "not found" outcomes are not modeled as errors at
//! all — they're returned as `bool`/`Option`; only a failure that aborts an
//! operation without making any structural change is represented here.

use thiserror::Error;

/// The maximum number of bytes a value may occupy.
pub const MAX_VALUE_LEN: usize = u32::MAX as usize;

/// A value was too large to store.
///
/// Values are capped at `2^32 - 1` bytes. Returned instead of performing any
/// structural modification.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("value of length {len} exceeds the maximum of {MAX_VALUE_LEN} bytes")]
pub struct ValueTooLarge {
    /// The length of the rejected value, in bytes.
    pub len: usize,
}

/// Failure modes for `insert`.
///
/// There is no `OutOfMemory` variant: a failed allocation for a grown or
/// split node aborts the process through the global allocator's handler
/// rather than unwinding, so there is no path back to a caller on which to
/// report it.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// The value exceeds the maximum length the tree can store.
    #[error(transparent)]
    ValueTooLarge(#[from] ValueTooLarge),
}
