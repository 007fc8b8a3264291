#![cfg_attr(
    feature = "nightly",
    feature(maybe_uninit_uninit_array, maybe_uninit_slice, maybe_uninit_array_assume_init, portable_simd)
)]
#![cfg_attr(feature = "nightly", allow(incomplete_features))]
#![deny(
    missing_docs,
    clippy::missing_safety_doc,
    unsafe_op_in_unsafe_fn,
    deprecated_in_future
)]
#![allow(clippy::type_complexity)]

//! Adaptive radix tree (ART) index.
//!
//! This crate provides two variants over the same node representation:
//!
//!  - [`collections::RawTreeMap`] (aliased as [`TreeMap`]): a single-threaded
//!    ordered map.
//!  - [`concurrent::ConcurrentTreeMap`]: a concurrent variant built on
//!    optimistic lock coupling ([`lock`]) with quiescent-state-based
//!    reclamation ([`qsbr`]).
//!
//! # References
//!
//!  - Leis, V., Kemper, A., & Neumann, T. (2013). The adaptive radix tree:
//!    ARTful indexing for main-memory databases. ICDE 2013.

mod bytes;
pub mod error;
pub mod lock;
pub mod nodes;
pub mod tagged_pointer;

mod rust_nightly_apis;

pub mod collections;
pub mod concurrent;
pub mod qsbr;

#[cfg(feature = "stats")]
pub mod stats;

#[doc(hidden)]
pub mod tests_common;

pub use bytes::AsBytes;
pub use collections::RawTreeMap;
pub use error::{InsertError, ValueTooLarge};

/// Default number of bytes stored inline for key-prefix compression.
///
/// See the data model notes in the crate root documentation: a node's prefix
/// is capped at this many bytes; logical prefixes longer than this are
/// resolved by re-reading overflow bytes from a representative leaf.
pub const DEFAULT_PREFIX_LEN: usize = 7;

/// Standard single-threaded ART map, with the default 7-byte inline prefix.
pub type TreeMap<K, V> = RawTreeMap<K, V, DEFAULT_PREFIX_LEN>;

/// Standard concurrent ART map, with the default 7-byte inline prefix.
pub type ConcurrentTreeMap<K, V> = concurrent::ConcurrentTreeMap<K, V, DEFAULT_PREFIX_LEN>;
