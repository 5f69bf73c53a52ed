//! Item Records
//!
//! An item is the unit of storage: a key, a value and the metadata the engine
//! needs to index, expire and evict it. Items live in fixed-size chunks carved
//! out of slabs. The chunk bytes hold the key followed by the value; the
//! metadata sits in a per-slab side table indexed by the chunk number, so
//! every reference to an item is an [`ItemId`] rather than a pointer.
//!
//! Every chunk is charged [`ITEM_HDR_SIZE`] bytes for its metadata. The slab
//! stores only `chunk_size - ITEM_HDR_SIZE` payload bytes per chunk and the
//! side table entry must fit in the difference, so a slab never holds more
//! than `slab_size` bytes of payload and metadata together.
//!
//! # Sizing
//!
//! The size class of an item is chosen from its total size:
//!
//! ```text
//! ntotal = ITEM_HDR_SIZE + nkey + nsuffix + nbyte
//! nsuffix = len(" <flags> <nbyte>")
//! ```
//!
//! The header accounts for the fixed metadata (CAS, expiry, flags, lengths,
//! hash chain and recency links).
//! The suffix reserves room for the ASCII rendering the protocol layer writes
//! in front of the value, so a chunk is large enough to serve the response
//! without another allocation.

use core::fmt;
use core::mem;
use core::num::NonZeroU32;

use crate::error::ClientError;
use crate::list::Link;

/// Longest key accepted, in bytes.
pub const KEY_MAX_LEN: usize = 250;

/// Fixed per-item overhead charged against a chunk.
pub const ITEM_HDR_SIZE: usize = 56;

const _: () = assert!(mem::size_of::<ItemMeta>() <= ITEM_HDR_SIZE);

/// Reference to an item: slab number and chunk number within that slab.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    slab: u32,
    // chunk + 1, so `Option<ItemId>` needs no extra tag
    chunk: NonZeroU32,
}

impl ItemId {
    #[inline]
    pub(crate) const fn new(slab: u32, chunk: u32) -> Self {
        match NonZeroU32::new(chunk.wrapping_add(1)) {
            Some(chunk) => Self { slab, chunk },
            None => panic!("chunk index out of range"),
        }
    }

    /// Slab holding the item.
    #[inline]
    pub fn slab(self) -> u32 {
        self.slab
    }

    /// Chunk index within the slab.
    #[inline]
    pub fn chunk(self) -> u32 {
        self.chunk.get() - 1
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({}:{})", self.slab, self.chunk())
    }
}

/// Where a chunk is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ChunkState {
    /// On its class freelist.
    #[default]
    Free,
    /// Handed out but not reachable from the hash index.
    Allocated,
    /// Reachable from the hash index and on the class recency list.
    Linked,
}

/// Metadata of the item stored in one chunk.
#[derive(Debug, Clone, Default)]
pub(crate) struct ItemMeta {
    pub(crate) state: ChunkState,
    pub(crate) refcount: u32,
    pub(crate) nkey: u8,
    pub(crate) nbyte: u32,
    pub(crate) flags: u32,
    /// Absolute unix seconds, 0 for never.
    pub(crate) exptime: u32,
    pub(crate) cas: u64,
    /// Low 32 bits of the key hash, enough for 2^32 buckets.
    pub(crate) hash: u32,
    /// Next item in the same hash bucket.
    pub(crate) hnext: Option<ItemId>,
    /// Position in the class recency list.
    pub(crate) lru: Link,
}

impl ItemMeta {
    #[inline]
    pub(crate) fn is_linked(&self) -> bool {
        self.state == ChunkState::Linked
    }

    #[inline]
    pub(crate) fn is_expired(&self, now: u32) -> bool {
        self.exptime != 0 && self.exptime <= now
    }

    #[inline]
    pub(crate) fn ntotal(&self) -> usize {
        item_ntotal(self.nkey as usize, self.nbyte as usize, self.flags)
    }
}

/// Borrowed view of a stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemView<'a> {
    /// Key bytes.
    pub key: &'a [u8],
    /// Value bytes.
    pub value: &'a [u8],
    /// Opaque client flags.
    pub flags: u32,
    /// Absolute expiry in unix seconds, 0 for never.
    pub exptime: u32,
    /// Current CAS token.
    pub cas: u64,
}

#[inline]
fn decimal_digits(mut n: u64) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Length of the `" <flags> <nbyte>"` suffix.
#[inline]
pub fn suffix_len(flags: u32, nbyte: usize) -> usize {
    2 + decimal_digits(u64::from(flags)) + decimal_digits(nbyte as u64)
}

/// Total chunk space an item needs.
#[inline]
pub fn item_ntotal(nkey: usize, nbyte: usize, flags: u32) -> usize {
    ITEM_HDR_SIZE + nkey + suffix_len(flags, nbyte) + nbyte
}

/// Smallest chunk able to hold any item at all.
pub const fn min_chunk_size() -> usize {
    // one byte key, empty value, " 0 0"
    ITEM_HDR_SIZE + 1 + 4
}

pub(crate) fn validate_key(key: &[u8]) -> Result<(), ClientError> {
    if key.is_empty() {
        return Err(ClientError::EmptyKey);
    }
    if key.len() > KEY_MAX_LEN {
        return Err(ClientError::KeyTooLong);
    }
    if key.iter().any(|&b| b <= b' ' || b == 0x7f) {
        return Err(ClientError::InvalidKey);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_len() {
        assert_eq!(suffix_len(0, 0), 4);
        assert_eq!(suffix_len(0, 10), 5);
        assert_eq!(suffix_len(12345, 100), 10);
        assert_eq!(suffix_len(u32::MAX, 9), 13);
    }

    #[test]
    fn test_item_ntotal() {
        // 56 header + 5 key + " 0 10" + 10 value
        assert_eq!(item_ntotal(5, 10, 0), 76);
        assert_eq!(item_ntotal(1, 0, 0), min_chunk_size());
    }

    #[test]
    fn test_validate_key() {
        assert_eq!(validate_key(b"user:42"), Ok(()));
        assert_eq!(validate_key(b""), Err(ClientError::EmptyKey));
        assert_eq!(validate_key(&[b'k'; 251]), Err(ClientError::KeyTooLong));
        assert_eq!(validate_key(&[b'k'; 250]), Ok(()));
        assert_eq!(validate_key(b"has space"), Err(ClientError::InvalidKey));
        assert_eq!(validate_key(b"tab\tkey"), Err(ClientError::InvalidKey));
        assert_eq!(validate_key(b"line\r\n"), Err(ClientError::InvalidKey));
    }

    #[test]
    fn test_expiry() {
        let meta = ItemMeta {
            exptime: 100,
            ..Default::default()
        };
        assert!(!meta.is_expired(99));
        assert!(meta.is_expired(100));
        assert!(meta.is_expired(101));

        let never = ItemMeta::default();
        assert!(!never.is_expired(u32::MAX));
    }

    #[test]
    fn test_item_id_debug() {
        let id = ItemId::new(3, 17);
        assert_eq!(id.slab(), 3);
        assert_eq!(id.chunk(), 17);
        assert_eq!(format!("{id:?}"), "ItemId(3:17)");
        assert_eq!(ItemId::new(0, 0).chunk(), 0);
    }

    #[test]
    fn test_metadata_fits_in_header() {
        assert_eq!(mem::size_of::<Option<ItemId>>(), mem::size_of::<ItemId>());
        assert!(mem::size_of::<ItemMeta>() <= ITEM_HDR_SIZE);
    }
}
