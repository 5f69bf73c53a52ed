//! Error types.
//!
//! Client-visible failures of a request are reported as
//! [`Response`](crate::command::Response) variants, never as Rust errors. The
//! types here cover the places where a `Result` is the natural shape:
//! configuration validation, allocation inside the store, and hash index
//! insertion.

use thiserror::Error;

/// Rejected engine configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The chunk growth factor must be a finite number greater than one.
    #[error("growth factor {0} must be finite and greater than 1.0")]
    InvalidFactor(f64),

    /// The smallest chunk cannot hold even a one byte key.
    #[error("chunk size {chunk_size} is below the minimum of {min} bytes")]
    ChunkSizeTooSmall {
        /// Configured minimum chunk size.
        chunk_size: usize,
        /// Smallest admissible chunk size.
        min: usize,
    },

    /// `max_chunk_size` is smaller than `chunk_size`.
    #[error("max chunk size {max_chunk_size} is smaller than chunk size {chunk_size}")]
    InvalidChunkRange {
        /// Configured minimum chunk size.
        chunk_size: usize,
        /// Configured maximum chunk size.
        max_chunk_size: usize,
    },

    /// A chunk would not fit in a single slab.
    #[error("chunk size {chunk_size} does not fit in a slab of {slab_size} bytes")]
    ChunkExceedsSlab {
        /// Offending chunk size.
        chunk_size: usize,
        /// Configured slab size.
        slab_size: usize,
    },

    /// The memory budget cannot hold a single slab.
    #[error("memory budget of {max_bytes} bytes cannot hold one slab of {slab_size} bytes")]
    BudgetTooSmall {
        /// Configured memory budget.
        max_bytes: usize,
        /// Configured slab size.
        slab_size: usize,
    },

    /// Hash table power outside the supported range.
    #[error("hash power {power} exceeds the maximum of {max}")]
    InvalidHashPower {
        /// Configured power.
        power: u8,
        /// Largest supported power.
        max: u8,
    },

    /// The slab profile contains no chunk sizes.
    #[error("slab profile is empty")]
    EmptyProfile,

    /// Slab profile sizes must be strictly increasing.
    #[error("slab profile is not strictly increasing at position {position}")]
    UnsortedProfile {
        /// Index of the first out-of-order entry.
        position: usize,
    },

    /// More chunk sizes than available class ids.
    #[error("slab profile has {len} classes, at most {max} are supported")]
    ProfileTooLong {
        /// Number of configured sizes.
        len: usize,
        /// Largest number of classes.
        max: usize,
    },

    /// A network setting that must be positive is zero.
    #[error("network setting `{0}` must be greater than zero")]
    InvalidNetworkSetting(&'static str),
}

/// Failure to obtain a chunk for a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The item is larger than the largest size class.
    #[error("item of {size} bytes exceeds the largest chunk size of {max} bytes")]
    Oversize {
        /// Total item size, header included.
        size: usize,
        /// Largest chunk size.
        max: usize,
    },

    /// No free chunk, no budget for a new slab, and eviction freed nothing.
    #[error("out of memory in slab class {class}")]
    OutOfMemory {
        /// Class the allocation was attempted in.
        class: u8,
    },
}

/// Inserting an item whose key is already indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("duplicate key in hash index")]
pub struct DuplicateKey;

/// Malformed client input, rejected before any state is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Zero length key.
    #[error("key is empty")]
    EmptyKey,

    /// Key longer than [`KEY_MAX_LEN`](crate::item::KEY_MAX_LEN).
    #[error("key is longer than 250 bytes")]
    KeyTooLong,

    /// Key contains whitespace or control bytes.
    #[error("key contains whitespace or control characters")]
    InvalidKey,

    /// CAS tokens are never zero.
    #[error("cas token must be non-zero")]
    InvalidCas,

    /// INCR or DECR on a value that is not a decimal 64-bit integer.
    #[error("cannot increment or decrement non-numeric value")]
    NonNumeric,
}
