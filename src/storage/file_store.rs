//! Objects stored as page chains in a single file.
//!
//! Every page starts with a 16 byte little-endian header:
//!
//! ```text
//! +-----------+-----------+-----------+-----------+----------------------+
//! | key (u32) | next (u32)| used (u32)| kind (u32)| body (PAGE_SIZE - 16) |
//! +-----------+-----------+-----------+-----------+----------------------+
//! ```
//!
//! `kind` marks a page as free, as the head of an object, or as a chain
//! continuation. The key directory is rebuilt from the head pages on open.

use crate::lexicon::Key;
use crate::storage::block_store::{BlockStore, StoreStats};
use crate::storage::disk::{PageId, PageManager, PAGE_SIZE};
use anyhow::{Result, bail};
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const HEADER_SIZE: usize = 16;
const BODY_SIZE: usize = PAGE_SIZE - HEADER_SIZE;
const NO_PAGE: u32 = u32::MAX;

const KEY_OFFSET: usize = 0;
const NEXT_OFFSET: usize = 4;
const USED_OFFSET: usize = 8;
const KIND_OFFSET: usize = 12;

const KIND_FREE: u32 = 0;
const KIND_HEAD: u32 = 1;
const KIND_CHAIN: u32 = 2;

type PageBuf = Box<[u8; PAGE_SIZE]>;

struct PageHeader {
    key: Key,
    next: Option<PageId>,
    used: usize,
    kind: u32,
}

impl PageHeader {
    fn read(page: &[u8; PAGE_SIZE]) -> Self {
        let next = LittleEndian::read_u32(&page[NEXT_OFFSET..]);
        Self {
            key: Key(LittleEndian::read_u32(&page[KEY_OFFSET..])),
            next: (next != NO_PAGE).then_some(PageId(next)),
            used: LittleEndian::read_u32(&page[USED_OFFSET..]) as usize,
            kind: LittleEndian::read_u32(&page[KIND_OFFSET..]),
        }
    }

    fn write(&self, page: &mut [u8; PAGE_SIZE]) {
        LittleEndian::write_u32(&mut page[KEY_OFFSET..], self.key.0);
        LittleEndian::write_u32(
            &mut page[NEXT_OFFSET..],
            self.next.map_or(NO_PAGE, |p| p.0),
        );
        LittleEndian::write_u32(&mut page[USED_OFFSET..], self.used as u32);
        LittleEndian::write_u32(&mut page[KIND_OFFSET..], self.kind);
    }
}

pub struct FileBlockStore {
    pages: PageManager,
    directory: HashMap<Key, PageId>,
    free_pages: Vec<PageId>,
    pending: BTreeMap<PageId, PageBuf>,
    stats: StoreStats,
}

impl FileBlockStore {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::with_pages(PageManager::create(path)?))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let mut store = Self::with_pages(PageManager::open(path)?);

        let mut page = Box::new([0u8; PAGE_SIZE]);
        for i in 0..store.pages.num_pages()? {
            let page_id = PageId(i);
            store.pages.read_page(page_id, &mut page[..])?;
            let header = PageHeader::read(&page);
            match header.kind {
                KIND_HEAD => {
                    store.directory.insert(header.key, page_id);
                }
                KIND_FREE => store.free_pages.push(page_id),
                _ => {}
            }
        }
        // Hand out low pages first.
        store.free_pages.reverse();

        debug!(
            "Opened block store with {} objects and {} free pages",
            store.directory.len(),
            store.free_pages.len()
        );
        Ok(store)
    }

    fn with_pages(pages: PageManager) -> Self {
        Self {
            pages,
            directory: HashMap::new(),
            free_pages: Vec::new(),
            pending: BTreeMap::new(),
            stats: StoreStats::default(),
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    pub fn object_count(&self) -> usize {
        self.directory.len()
    }

    pub fn num_pages(&self) -> Result<u32> {
        self.pages.num_pages()
    }

    fn read(&mut self, page_id: PageId) -> Result<PageBuf> {
        if let Some(page) = self.pending.get(&page_id) {
            return Ok(page.clone());
        }
        let mut page = Box::new([0u8; PAGE_SIZE]);
        self.pages.read_page(page_id, &mut page[..])?;
        Ok(page)
    }

    fn allocate(&mut self) -> Result<PageId> {
        match self.free_pages.pop() {
            Some(page_id) => Ok(page_id),
            None => self.pages.allocate_page(),
        }
    }

    fn chain(&mut self, key: Key, head: PageId) -> Result<Vec<(PageId, PageBuf)>> {
        let mut chain = Vec::new();
        let mut cursor = Some(head);
        while let Some(page_id) = cursor {
            let page = self.read(page_id)?;
            let header = PageHeader::read(&page);
            if header.key != key || header.kind == KIND_FREE {
                bail!(
                    "Page {} in the chain of object {} belongs to {}",
                    page_id.0,
                    key,
                    header.key
                );
            }
            cursor = header.next;
            chain.push((page_id, page));
        }
        Ok(chain)
    }

    fn release_chain(&mut self, key: Key, head: PageId) -> Result<()> {
        for (page_id, _) in self.chain(key, head)? {
            self.pending.insert(page_id, Box::new([0u8; PAGE_SIZE]));
            self.free_pages.push(page_id);
        }
        Ok(())
    }
}

impl BlockStore for FileBlockStore {
    fn load_object(&mut self, key: Key) -> Result<Option<Vec<u8>>> {
        self.stats.loads += 1;
        let Some(&head) = self.directory.get(&key) else {
            return Ok(None);
        };

        let mut data = Vec::new();
        for (_, page) in self.chain(key, head)? {
            let used = PageHeader::read(&page).used;
            if used > BODY_SIZE {
                bail!("Corrupt page header in object {}: {} bytes used", key, used);
            }
            data.extend_from_slice(&page[HEADER_SIZE..HEADER_SIZE + used]);
        }
        Ok(Some(data))
    }

    fn store_object(&mut self, key: Key, data: &[u8], wait: bool) -> Result<()> {
        self.stats.stores += 1;

        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(BODY_SIZE).collect()
        };
        let page_ids = (0..chunks.len())
            .map(|_| self.allocate())
            .collect::<Result<Vec<_>>>()?;

        for (i, chunk) in chunks.iter().enumerate() {
            let mut page = Box::new([0u8; PAGE_SIZE]);
            PageHeader {
                key,
                next: page_ids.get(i + 1).copied(),
                used: chunk.len(),
                kind: if i == 0 { KIND_HEAD } else { KIND_CHAIN },
            }
            .write(&mut page);
            page[HEADER_SIZE..HEADER_SIZE + chunk.len()].copy_from_slice(chunk);
            self.pending.insert(page_ids[i], page);
        }

        if let Some(old_head) = self.directory.insert(key, page_ids[0]) {
            self.release_chain(key, old_head)?;
        }

        if wait {
            self.flush()?;
        }
        Ok(())
    }

    fn delete_object(&mut self, key: Key) -> Result<()> {
        self.stats.deletes += 1;
        if let Some(head) = self.directory.remove(&key) {
            self.release_chain(key, head)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.stats.flushes += 1;
        if self.pending.is_empty() {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.pending);
        debug!("Flushing {} pages", pending.len());
        for (page_id, page) in &pending {
            self.pages.write_page(*page_id, &page[..])?;
        }
        self.pages.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_small_object() -> Result<()> {
        let dir = tempdir()?;
        let mut store = FileBlockStore::create(&dir.path().join("objects.db"))?;
        let key = Key::new(1, 1);

        assert_eq!(store.load_object(key)?, None);
        store.store_object(key, b"hello", false)?;
        assert_eq!(store.load_object(key)?, Some(b"hello".to_vec()));

        store.flush()?;
        assert_eq!(store.load_object(key)?, Some(b"hello".to_vec()));
        assert_eq!(store.num_pages()?, 1);

        Ok(())
    }

    #[test]
    fn test_multi_page_object_survives_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("objects.db");
        let key = Key::new(2, 7);
        let data: Vec<u8> = (0..3 * BODY_SIZE + 100).map(|i| (i % 251) as u8).collect();

        {
            let mut store = FileBlockStore::create(&path)?;
            store.store_object(key, &data, true)?;
            store.store_object(Key::new(2, 8), b"", true)?;
            assert_eq!(store.num_pages()?, 5);
        }

        let mut store = FileBlockStore::open(&path)?;
        assert_eq!(store.object_count(), 2);
        assert_eq!(store.load_object(key)?, Some(data));
        assert_eq!(store.load_object(Key::new(2, 8))?, Some(Vec::new()));

        Ok(())
    }

    #[test]
    fn test_overwrite_recycles_pages() -> Result<()> {
        let dir = tempdir()?;
        let mut store = FileBlockStore::create(&dir.path().join("objects.db"))?;
        let key = Key::new(1, 1);

        store.store_object(key, &vec![1u8; 2 * BODY_SIZE], true)?;
        assert_eq!(store.num_pages()?, 2);

        store.store_object(key, b"short", true)?;
        assert_eq!(store.load_object(key)?, Some(b"short".to_vec()));

        // The two freed pages are reused before the file grows again.
        store.store_object(Key::new(1, 2), &vec![2u8; 2 * BODY_SIZE], true)?;
        assert_eq!(store.num_pages()?, 3);
        assert_eq!(store.load_object(key)?, Some(b"short".to_vec()));

        Ok(())
    }

    #[test]
    fn test_delete_and_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("objects.db");
        let key = Key::new(3, 3);

        {
            let mut store = FileBlockStore::create(&path)?;
            store.store_object(key, b"doomed", true)?;
            store.delete_object(key)?;
            assert_eq!(store.load_object(key)?, None);
            store.flush()?;
        }

        let store = FileBlockStore::open(&path)?;
        assert_eq!(store.object_count(), 0);
        assert_eq!(store.free_pages.len(), 1);

        Ok(())
    }
}
