use crate::lexicon::Key;
use anyhow::Result;
use std::collections::HashMap;

pub trait BlockStore: Send {
    /// Bytes last stored under `key`, or `None` if it was never stored.
    fn load_object(&mut self, key: Key) -> Result<Option<Vec<u8>>>;

    /// Stores `data` under `key`. Unless `wait` is set the write may stay
    /// buffered until the next [`BlockStore::flush`].
    fn store_object(&mut self, key: Key, data: &[u8], wait: bool) -> Result<()>;

    fn delete_object(&mut self, key: Key) -> Result<()>;

    /// Pushes accumulated writes down to durable storage.
    fn flush(&mut self) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub loads: u64,
    pub stores: u64,
    pub deletes: u64,
    pub flushes: u64,
}

#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    objects: HashMap<Key, Vec<u8>>,
    pending: HashMap<Key, Option<Vec<u8>>>,
    stats: StoreStats,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// Number of writes and deletes waiting for a flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, key: Key) -> bool {
        match self.pending.get(&key) {
            Some(pending) => pending.is_some(),
            None => self.objects.contains_key(&key),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    fn load_object(&mut self, key: Key) -> Result<Option<Vec<u8>>> {
        self.stats.loads += 1;
        Ok(match self.pending.get(&key) {
            Some(pending) => pending.clone(),
            None => self.objects.get(&key).cloned(),
        })
    }

    fn store_object(&mut self, key: Key, data: &[u8], wait: bool) -> Result<()> {
        self.stats.stores += 1;
        self.pending.insert(key, Some(data.to_vec()));
        if wait {
            self.flush()?;
        }
        Ok(())
    }

    fn delete_object(&mut self, key: Key) -> Result<()> {
        self.stats.deletes += 1;
        self.pending.insert(key, None);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.stats.flushes += 1;
        for (key, data) in self.pending.drain() {
            match data {
                Some(data) => {
                    self.objects.insert(key, data);
                }
                None => {
                    self.objects.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_writes() -> Result<()> {
        let mut store = MemoryBlockStore::new();
        let key = Key::new(1, 1);

        assert_eq!(store.load_object(key)?, None);

        store.store_object(key, b"abc", false)?;
        assert_eq!(store.pending(), 1);
        assert!(store.is_empty());
        // Buffered writes are already visible to loads.
        assert_eq!(store.load_object(key)?, Some(b"abc".to_vec()));

        store.flush()?;
        assert_eq!(store.pending(), 0);
        assert_eq!(store.len(), 1);

        Ok(())
    }

    #[test]
    fn test_wait_flushes() -> Result<()> {
        let mut store = MemoryBlockStore::new();
        store.store_object(Key::new(1, 1), b"x", true)?;
        assert_eq!(store.pending(), 0);
        assert_eq!(store.stats().flushes, 1);
        Ok(())
    }

    #[test]
    fn test_delete() -> Result<()> {
        let mut store = MemoryBlockStore::new();
        let key = Key::new(1, 1);
        store.store_object(key, b"x", true)?;

        store.delete_object(key)?;
        assert!(!store.contains(key));
        assert_eq!(store.load_object(key)?, None);

        store.flush()?;
        assert!(store.is_empty());
        Ok(())
    }
}
