use anyhow::{ensure, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

/// Raw page I/O over a single file. Writes are not durable until [`sync`].
///
/// [`sync`]: PageManager::sync
pub struct PageManager {
    file: File,
}

impl PageManager {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;

        Ok(Self { file })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open file: {:?}", path))?;

        Ok(Self { file })
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        Self::check_len(buf.len())?;
        ensure!(page_id.0 < self.num_pages()?, "Page {} does not exist", page_id.0);

        self.seek_to(page_id)?;
        self.file.read_exact(buf).context("Failed to read page")
    }

    /// Writes a page, growing the file if it lies past the end.
    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        Self::check_len(data.len())?;
        if page_id.0 >= self.num_pages()? {
            self.file
                .set_len(Self::page_offset(PageId(page_id.0 + 1)))
                .context("Failed to extend file")?;
        }

        self.seek_to(page_id)?;
        self.file.write_all(data).context("Failed to write page")
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all().context("Failed to sync")
    }

    pub fn num_pages(&self) -> Result<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as u32)
    }

    /// Extends the file by one zeroed page.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = PageId(self.num_pages()?);
        self.file
            .set_len(Self::page_offset(PageId(page_id.0 + 1)))
            .context("Failed to extend file")?;
        Ok(page_id)
    }

    fn seek_to(&mut self, page_id: PageId) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(Self::page_offset(page_id)))
            .context("Failed to seek")?;
        Ok(())
    }

    fn check_len(len: usize) -> Result<()> {
        ensure!(len == PAGE_SIZE, "Page buffers are {} bytes, got {}", PAGE_SIZE, len);
        Ok(())
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_sync_and_reopen() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("objects.db");

        {
            let mut pm = PageManager::create(&file_path)?;
            let mut buf = vec![0u8; PAGE_SIZE];
            buf[0] = 42;
            buf[PAGE_SIZE - 1] = 24;
            pm.write_page(PageId(0), &buf)?;
            pm.sync()?;
        }

        let mut pm = PageManager::open(&file_path)?;
        let mut buf = vec![0u8; PAGE_SIZE];
        pm.read_page(PageId(0), &mut buf)?;
        assert_eq!(buf[0], 42);
        assert_eq!(buf[PAGE_SIZE - 1], 24);

        Ok(())
    }

    #[test]
    fn test_file_growth() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("objects.db"))?;
        assert_eq!(pm.num_pages()?, 0);

        pm.write_page(PageId(5), &vec![5u8; PAGE_SIZE])?;
        assert_eq!(pm.num_pages()?, 6);

        let mut buf = vec![1u8; PAGE_SIZE];
        pm.read_page(PageId(3), &mut buf)?;
        assert!(buf.iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn test_allocate_page() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("objects.db"))?;

        assert_eq!(pm.allocate_page()?, PageId(0));
        assert_eq!(pm.allocate_page()?, PageId(1));
        assert_eq!(pm.num_pages()?, 2);

        Ok(())
    }

    #[test]
    fn test_invalid_access() -> Result<()> {
        let dir = tempdir()?;
        let mut pm = PageManager::create(&dir.path().join("objects.db"))?;

        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(pm.read_page(PageId(10), &mut buf).is_err());

        let mut small = vec![0u8; 100];
        assert!(pm.read_page(PageId(0), &mut small).is_err());
        assert!(pm.write_page(PageId(0), &small).is_err());

        assert!(PageManager::open(&dir.path().join("missing.db")).is_err());

        Ok(())
    }
}
