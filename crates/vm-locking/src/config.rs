use crate::error::ConfigError;
use crate::shareable::CHUNK_SIZE;
use crate::word::ADDRESS_SPACE_END;
use std::time::Duration;

/// Default administrative lock size for range-scoped writers: one reservation granule.
pub const DEFAULT_WRITER_GRANULE: u32 = 128;
/// Largest power of two that fits the lock word's size field.
pub const MAX_WRITER_GRANULE: u32 = 1 << 28;

#[derive(Debug, Clone)]
pub struct AddressSpaceConfig {
    /// Size of the emulated address space in bytes. Sizes the shareable table.
    pub address_space_size: u64,
    /// Maximum number of accessor slots (passive readers plus bare range-lock users).
    pub max_accessors: usize,
    /// Size (power of two) of the range locked by `WriterLock::new(space, addr)` with `addr != 0`.
    pub writer_granule: u32,
    /// Slow-path validation rounds spent spinning before parking on the event condvar.
    pub spin_limit: u32,
    /// Upper bound on a single park in the slow path or while draining.
    pub park_timeout: Duration,
    /// How long a writer may wait on accessors before a stall warning is logged.
    pub stall_warning: Duration,
}

impl Default for AddressSpaceConfig {
    fn default() -> Self {
        Self {
            address_space_size: ADDRESS_SPACE_END,
            max_accessors: 128,
            writer_granule: DEFAULT_WRITER_GRANULE,
            spin_limit: 64,
            park_timeout: Duration::from_micros(100),
            stall_warning: Duration::from_secs(1),
        }
    }
}

impl AddressSpaceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_accessors == 0 {
            return Err(ConfigError::NoAccessors);
        }
        let size = self.address_space_size;
        if size > ADDRESS_SPACE_END {
            return Err(ConfigError::SizeTooLarge { size });
        }
        if size == 0 || size % CHUNK_SIZE != 0 {
            return Err(ConfigError::SizeNotChunkAligned { size });
        }
        if !self.writer_granule.is_power_of_two() {
            return Err(ConfigError::GranuleNotPowerOfTwo {
                granule: self.writer_granule,
            });
        }
        if self.writer_granule > MAX_WRITER_GRANULE {
            return Err(ConfigError::GranuleTooLarge {
                granule: self.writer_granule,
            });
        }
        Ok(())
    }

    pub(crate) fn chunk_count(&self) -> usize {
        (self.address_space_size / CHUNK_SIZE) as usize
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AddressSpaceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.chunk_count(), 0x10000);
    }

    #[test]
    fn rejects_bad_values() {
        let config = AddressSpaceConfig {
            max_accessors: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoAccessors));

        let config = AddressSpaceConfig {
            address_space_size: CHUNK_SIZE + 1,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::SizeNotChunkAligned {
                size: CHUNK_SIZE + 1
            })
        );

        let config = AddressSpaceConfig {
            address_space_size: ADDRESS_SPACE_END * 2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SizeTooLarge { .. })
        ));

        let config = AddressSpaceConfig {
            writer_granule: 96,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::GranuleNotPowerOfTwo { granule: 96 })
        );

        let config = AddressSpaceConfig {
            writer_granule: 1 << 30,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::GranuleTooLarge { granule: 1 << 30 })
        );
    }
}
