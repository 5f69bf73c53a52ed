//! Size-Class Table
//!
//! Slabs are dedicated to a single chunk size. The set of chunk sizes is a
//! geometric progression fixed at startup:
//!
//! ```text
//! class[1] = chunk_size
//! class[i] = max(class[i-1] + 1, round(class[i-1] * factor))
//! ```
//!
//! The progression stops before exceeding `max_chunk_size` or after
//! [`SLABCLASS_MAX_ID`] classes. If it stops short of `max_chunk_size` and a
//! class id is still free, one last class of exactly `max_chunk_size` is
//! appended so the largest admitted item always has a home.
//!
//! From 48 bytes with factor 1.25 up to 1 MiB the table starts
//! `48, 60, 75, 94, 118, 148, 185, 231, ...`.
//!
//! An explicit slab profile replaces the progression entirely: its sizes
//! become classes `1..=n` verbatim.

use core::fmt;

/// Id reserved for "no class".
pub const SLABCLASS_INVALID_ID: u8 = 0;
/// Smallest valid class id.
pub const SLABCLASS_MIN_ID: u8 = 1;
/// Largest valid class id.
pub const SLABCLASS_MAX_ID: u8 = u8::MAX - 1;

/// Ordered chunk sizes, indexed by class id.
#[derive(Clone, PartialEq, Eq)]
pub struct SizeClassTable {
    // sizes[0] is the invalid class and always 0
    sizes: Vec<usize>,
}

impl SizeClassTable {
    /// Builds the geometric progression.
    ///
    /// Inputs are assumed validated: `factor > 1.0` and
    /// `chunk_size <= max_chunk_size`.
    pub fn geometric(chunk_size: usize, factor: f64, max_chunk_size: usize) -> Self {
        let max_classes = SLABCLASS_MAX_ID as usize;
        let mut sizes = Vec::with_capacity(64);
        sizes.push(0);

        let mut size = chunk_size;
        while sizes.len() <= max_classes && size <= max_chunk_size {
            sizes.push(size);
            let next = (size as f64 * factor).round() as usize;
            size = next.max(size + 1);
        }

        let last = sizes.last().copied().unwrap_or(0);
        if last < max_chunk_size && sizes.len() <= max_classes {
            sizes.push(max_chunk_size);
        }

        Self { sizes }
    }

    /// Builds a table from an explicit, strictly increasing list of sizes.
    pub fn from_profile(profile: &[usize]) -> Self {
        let mut sizes = Vec::with_capacity(profile.len() + 1);
        sizes.push(0);
        sizes.extend_from_slice(profile);
        Self { sizes }
    }

    /// Returns the smallest class whose chunks hold `size` bytes.
    pub fn class_for_size(&self, size: usize) -> Option<u8> {
        let classes = &self.sizes[1..];
        let idx = classes.partition_point(|&chunk| chunk < size);
        (idx < classes.len()).then(|| (idx + 1) as u8)
    }

    /// Chunk size of `id`, `None` for the invalid id or ids past the end.
    pub fn chunk_size(&self, id: u8) -> Option<usize> {
        if id == SLABCLASS_INVALID_ID {
            return None;
        }
        self.sizes.get(id as usize).copied()
    }

    /// Id of the largest class.
    pub fn last_id(&self) -> u8 {
        (self.sizes.len() - 1) as u8
    }

    /// Number of valid classes.
    pub fn len(&self) -> usize {
        self.sizes.len() - 1
    }

    /// True if the table has no valid class.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest chunk size.
    pub fn max_chunk_size(&self) -> usize {
        self.sizes.last().copied().unwrap_or(0)
    }

    /// Iterates `(class id, chunk size)` in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, usize)> + '_ {
        self.sizes
            .iter()
            .enumerate()
            .skip(1)
            .map(|(id, &size)| (id as u8, size))
    }
}

impl fmt::Debug for SizeClassTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizeClassTable")
            .field("classes", &self.len())
            .field("min", &self.chunk_size(SLABCLASS_MIN_ID))
            .field("max", &self.max_chunk_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: usize = 1024 * 1024;

    #[test]
    fn test_seed_progression() {
        let table = SizeClassTable::geometric(48, 1.25, MIB);
        let head: Vec<usize> = table.iter().take(12).map(|(_, size)| size).collect();
        assert_eq!(
            head,
            vec![48, 60, 75, 94, 118, 148, 185, 231, 289, 361, 451, 564]
        );
        assert_eq!(table.max_chunk_size(), MIB);
        assert_eq!(table.chunk_size(table.last_id()), Some(MIB));
    }

    #[test]
    fn test_deterministic() {
        let a = SizeClassTable::geometric(48, 1.25, MIB);
        let b = SizeClassTable::geometric(48, 1.25, MIB);
        assert_eq!(a, b);
    }

    #[test]
    fn test_strictly_increasing_with_small_factor() {
        let table = SizeClassTable::geometric(48, 1.01, MIB);
        let sizes: Vec<usize> = table.iter().map(|(_, size)| size).collect();
        assert_eq!(sizes[0], 48);
        // round(48 * 1.01) == 48, so the +1 floor kicks in
        assert_eq!(sizes[1], 49);
        assert!(sizes.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(table.len(), SLABCLASS_MAX_ID as usize);
        assert_eq!(table.last_id(), SLABCLASS_MAX_ID);
    }

    #[test]
    fn test_exact_fit_does_not_append() {
        // 64, 128, 256, 512, 1024
        let table = SizeClassTable::geometric(64, 2.0, 1024);
        assert_eq!(table.len(), 5);
        assert_eq!(table.max_chunk_size(), 1024);

        // 64, 128, 256, 512 then the 1000 cap
        let capped = SizeClassTable::geometric(64, 2.0, 1000);
        assert_eq!(capped.len(), 5);
        assert_eq!(capped.chunk_size(5), Some(1000));
    }

    #[test]
    fn test_class_for_size() {
        let table = SizeClassTable::geometric(48, 1.25, MIB);
        assert_eq!(table.class_for_size(0), Some(1));
        assert_eq!(table.class_for_size(48), Some(1));
        assert_eq!(table.class_for_size(49), Some(2));
        assert_eq!(table.class_for_size(60), Some(2));
        assert_eq!(table.class_for_size(61), Some(3));
        assert_eq!(table.class_for_size(MIB), Some(table.last_id()));
        assert_eq!(table.class_for_size(MIB + 1), None);
    }

    #[test]
    fn test_profile() {
        let table = SizeClassTable::from_profile(&[100, 1000, 10_000]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.chunk_size(SLABCLASS_INVALID_ID), None);
        assert_eq!(table.chunk_size(1), Some(100));
        assert_eq!(table.chunk_size(3), Some(10_000));
        assert_eq!(table.chunk_size(4), None);
        assert_eq!(table.class_for_size(101), Some(2));
        assert_eq!(table.class_for_size(10_001), None);
    }
}
