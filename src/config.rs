//! Cache configuration.

/// What to do when the block store cannot produce an object the lexicon knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadFailurePolicy {
    /// Abort: a known key must always be loadable.
    #[default]
    Fatal,
    /// Hand a `CacheError::LoadFailed` back to the caller so it can retry.
    Report,
}

/// Byte order of the objects held by the block store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskByteOrder {
    #[default]
    Native,
    Little,
    Big,
}

impl DiskByteOrder {
    /// Whether records must be byte swapped between disk and memory.
    pub fn needs_swap(self) -> bool {
        match self {
            DiskByteOrder::Native => false,
            DiskByteOrder::Little => cfg!(target_endian = "big"),
            DiskByteOrder::Big => cfg!(target_endian = "little"),
        }
    }
}

/// Object cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Budget, in payload cost units, that admission tries to stay under.
    pub memory_limit: usize,
    /// Write-backs between bulk flushes of the block store.
    pub flush_batch: usize,
    /// Below this many known entries an unsatisfiable budget is doubled
    /// instead of aborting.
    pub starvation_floor: usize,
    /// First growth step of the entry pool; each growth doubles it.
    pub pool_block: usize,
    pub load_failure: LoadFailurePolicy,
    pub disk_byte_order: DiskByteOrder,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            memory_limit: 2048,
            flush_batch: 128,
            starvation_floor: 10,
            pool_block: 256,
            load_failure: LoadFailurePolicy::Fatal,
            disk_byte_order: DiskByteOrder::Native,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_decision() {
        assert!(!DiskByteOrder::Native.needs_swap());
        assert_ne!(
            DiskByteOrder::Little.needs_swap(),
            DiskByteOrder::Big.needs_swap()
        );
        if cfg!(target_endian = "little") {
            assert!(DiskByteOrder::Big.needs_swap());
        }
    }
}
