//! Engine Configuration
//!
//! All settings are fixed at startup. Configuration structs have public fields
//! and a [`Default`] matching the classic memcached defaults, so the usual way
//! to build one is struct update syntax:
//!
//! ```
//! use slabcache::config::EngineConfig;
//! use slabcache::EvictionPolicy;
//!
//! let config = EngineConfig {
//!     max_bytes: 16 * 1024 * 1024,
//!     eviction: EvictionPolicy::RandomSlab,
//!     eviction_seed: Some(7),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Sizing Guidelines
//!
//! Memory is handed out one slab at a time, so `max_bytes` is rounded down to
//! a whole number of slabs:
//!
//! ```text
//! usable slabs = max_bytes / slab_size
//! chunks per slab = slab_size / chunk_size(class)
//! ```
//!
//! A slab once assigned to a class stays there unless a slab-level eviction
//! policy reassigns it. With [`EvictionPolicy::Lru`] or
//! [`EvictionPolicy::None`] an early burst of one item size can therefore
//! claim the whole budget; pick a slab-level policy when the size mix shifts
//! over time.
//!
//! | Setting | Default | Meaning |
//! |---------|---------|---------|
//! | `factor` | 1.25 | Chunk size growth factor |
//! | `chunk_size` | 96 | Smallest chunk |
//! | `max_chunk_size` | 1 MiB | Largest chunk |
//! | `slab_size` | 1 MiB | Slab size |
//! | `max_bytes` | 64 MiB | Memory budget |
//! | `hash_power` | 0 | Hash table power, 0 autotunes |
//! | `eviction` | `Lru` | Reclamation policy |

use core::fmt;

use crate::error::ConfigError;
use crate::eviction::EvictionPolicy;
use crate::hashtable::HASH_MAX_POWER;
use crate::item::min_chunk_size;
use crate::size_class::{SizeClassTable, SLABCLASS_MAX_ID};

/// Default slab size, 1 MiB.
pub const DEFAULT_SLAB_SIZE: usize = 1024 * 1024;
/// Default memory budget, 64 MiB.
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;
/// Default smallest chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 96;
/// Default growth factor.
pub const DEFAULT_FACTOR: f64 = 1.25;

/// Settings owned by the network layer.
///
/// The engine never opens a socket. These values are validated and echoed in
/// `stats settings` so a front end can be configured from the same place.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// TCP port to listen on.
    pub port: u16,
    /// Maximum simultaneous connections.
    pub max_conns: u32,
    /// Listen backlog.
    pub backlog: u32,
    /// Requests served per connection before yielding to others.
    pub reqs_per_event: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 11211,
            max_conns: 1024,
            backlog: 1024,
            reqs_per_event: 20,
        }
    }
}

impl fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("port", &self.port)
            .field("max_conns", &self.max_conns)
            .field("backlog", &self.backlog)
            .field("reqs_per_event", &self.reqs_per_event)
            .finish()
    }
}

/// Configuration for a [`Store`](crate::Store).
///
/// # Fields
///
/// - `factor`: growth factor between consecutive chunk sizes, must exceed 1.0.
/// - `chunk_size` / `max_chunk_size`: smallest and largest chunk.
/// - `slab_size`: bytes per slab; no chunk may exceed it.
/// - `max_bytes`: memory budget; must hold at least one slab.
/// - `hash_power`: log2 of the bucket count, 0 starts at 2^16 and grows.
/// - `eviction`: what to do when memory runs out.
/// - `profile`: explicit chunk sizes overriding the geometric progression.
/// - `eviction_seed`: seed for [`EvictionPolicy::RandomSlab`]; `None` seeds
///   from the OS.
/// - `network`: settings the engine only validates and reports.
#[derive(Clone, PartialEq)]
pub struct EngineConfig {
    /// Chunk size growth factor.
    pub factor: f64,
    /// Smallest chunk size in bytes.
    pub chunk_size: usize,
    /// Largest chunk size in bytes.
    pub max_chunk_size: usize,
    /// Slab size in bytes.
    pub slab_size: usize,
    /// Memory budget in bytes.
    pub max_bytes: usize,
    /// Hash table power, 0 to autotune.
    pub hash_power: u8,
    /// Eviction policy.
    pub eviction: EvictionPolicy,
    /// Explicit chunk sizes.
    pub profile: Option<Vec<usize>>,
    /// Seed for random slab selection.
    pub eviction_seed: Option<u64>,
    /// Network layer settings.
    pub network: NetworkConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            factor: DEFAULT_FACTOR,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: DEFAULT_SLAB_SIZE,
            slab_size: DEFAULT_SLAB_SIZE,
            max_bytes: DEFAULT_MAX_BYTES,
            hash_power: 0,
            eviction: EvictionPolicy::Lru,
            profile: None,
            eviction_seed: None,
            network: NetworkConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Checks every setting, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.factor.is_finite() || self.factor <= 1.0 {
            return Err(ConfigError::InvalidFactor(self.factor));
        }
        if self.chunk_size < min_chunk_size() {
            return Err(ConfigError::ChunkSizeTooSmall {
                chunk_size: self.chunk_size,
                min: min_chunk_size(),
            });
        }
        if self.max_chunk_size < self.chunk_size {
            return Err(ConfigError::InvalidChunkRange {
                chunk_size: self.chunk_size,
                max_chunk_size: self.max_chunk_size,
            });
        }
        if self.max_chunk_size > self.slab_size {
            return Err(ConfigError::ChunkExceedsSlab {
                chunk_size: self.max_chunk_size,
                slab_size: self.slab_size,
            });
        }
        if self.max_bytes < self.slab_size {
            return Err(ConfigError::BudgetTooSmall {
                max_bytes: self.max_bytes,
                slab_size: self.slab_size,
            });
        }
        if self.hash_power > HASH_MAX_POWER {
            return Err(ConfigError::InvalidHashPower {
                power: self.hash_power,
                max: HASH_MAX_POWER,
            });
        }
        if let Some(profile) = &self.profile {
            self.validate_profile(profile)?;
        }
        if self.network.max_conns == 0 {
            return Err(ConfigError::InvalidNetworkSetting("max_conns"));
        }
        if self.network.reqs_per_event == 0 {
            return Err(ConfigError::InvalidNetworkSetting("reqs_per_event"));
        }
        Ok(())
    }

    fn validate_profile(&self, profile: &[usize]) -> Result<(), ConfigError> {
        let (&first, &last) = match (profile.first(), profile.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(ConfigError::EmptyProfile),
        };
        if profile.len() > SLABCLASS_MAX_ID as usize {
            return Err(ConfigError::ProfileTooLong {
                len: profile.len(),
                max: SLABCLASS_MAX_ID as usize,
            });
        }
        if let Some(position) = profile.windows(2).position(|w| w[0] >= w[1]) {
            return Err(ConfigError::UnsortedProfile {
                position: position + 1,
            });
        }
        if first < min_chunk_size() {
            return Err(ConfigError::ChunkSizeTooSmall {
                chunk_size: first,
                min: min_chunk_size(),
            });
        }
        if last > self.slab_size {
            return Err(ConfigError::ChunkExceedsSlab {
                chunk_size: last,
                slab_size: self.slab_size,
            });
        }
        Ok(())
    }

    /// Size classes this configuration produces.
    pub fn size_classes(&self) -> SizeClassTable {
        match &self.profile {
            Some(profile) => SizeClassTable::from_profile(profile),
            None => SizeClassTable::geometric(self.chunk_size, self.factor, self.max_chunk_size),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("factor", &self.factor)
            .field("chunk_size", &self.chunk_size)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("slab_size", &self.slab_size)
            .field("max_bytes", &self.max_bytes)
            .field("hash_power", &self.hash_power)
            .field("eviction", &self.eviction)
            .field("profile", &self.profile.as_ref().map(Vec::len))
            .field("eviction_seed", &self.eviction_seed)
            .field("network", &self.network)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        let classes = config.size_classes();
        assert_eq!(classes.chunk_size(1), Some(DEFAULT_CHUNK_SIZE));
        assert_eq!(classes.max_chunk_size(), DEFAULT_SLAB_SIZE);
    }

    #[test]
    fn test_rejects_bad_factor() {
        for factor in [1.0, 0.5, f64::NAN, f64::INFINITY] {
            let config = EngineConfig {
                factor,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidFactor(_))
            ));
        }
    }

    #[test]
    fn test_rejects_bad_sizes() {
        let config = EngineConfig {
            chunk_size: 8,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ChunkSizeTooSmall { chunk_size: 8, .. })
        ));

        let config = EngineConfig {
            chunk_size: 4096,
            max_chunk_size: 1024,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunkRange { .. })
        ));

        let config = EngineConfig {
            max_chunk_size: 2 * DEFAULT_SLAB_SIZE,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ChunkExceedsSlab { .. })
        ));

        let config = EngineConfig {
            max_bytes: DEFAULT_SLAB_SIZE - 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BudgetTooSmall { .. })
        ));

        let config = EngineConfig {
            hash_power: HASH_MAX_POWER + 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHashPower { .. })
        ));
    }

    #[test]
    fn test_profile_validation() {
        let with_profile = |profile: Vec<usize>| EngineConfig {
            profile: Some(profile),
            ..Default::default()
        };

        assert_eq!(with_profile(vec![64, 256, 4096]).validate(), Ok(()));
        assert_eq!(
            with_profile(vec![]).validate(),
            Err(ConfigError::EmptyProfile)
        );
        assert_eq!(
            with_profile(vec![64, 256, 256]).validate(),
            Err(ConfigError::UnsortedProfile { position: 2 })
        );
        assert!(matches!(
            with_profile(vec![64, 2 * DEFAULT_SLAB_SIZE]).validate(),
            Err(ConfigError::ChunkExceedsSlab { .. })
        ));
        let too_long: Vec<usize> = (0..300).map(|i| 64 + i).collect();
        assert!(matches!(
            with_profile(too_long).validate(),
            Err(ConfigError::ProfileTooLong { len: 300, .. })
        ));

        let classes = with_profile(vec![64, 256, 4096]).size_classes();
        assert_eq!(classes.len(), 3);
        assert_eq!(classes.class_for_size(100), Some(2));
    }

    #[test]
    fn test_rejects_zero_network_settings() {
        let config = EngineConfig {
            network: NetworkConfig {
                reqs_per_event: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidNetworkSetting("reqs_per_event"))
        );
    }
}
