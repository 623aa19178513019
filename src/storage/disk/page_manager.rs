use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;

/// Raw fixed-size page I/O over one file. Page `n` lives at `n * PAGE_SIZE`.
pub struct PageManager {
    file: File,
    sync_writes: bool,
}

impl PageManager {
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file,
            sync_writes: true,
        })
    }

    /// Opens an existing file, creating it empty if it does not exist yet.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file,
            sync_writes: true,
        })
    }

    /// Controls whether every page write is followed by an fsync.
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        if offset + PAGE_SIZE as u64 > file_size {
            return Err(StorageError::PageNotFound(page_id));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;

        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        // Extend file if necessary
        if offset >= file_size {
            self.file.set_len(offset + PAGE_SIZE as u64)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        if self.sync_writes {
            self.file.sync_all()?;
        }

        Ok(())
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as u32)
    }

    /// Appends one zeroed page and returns its page number.
    pub fn allocate_page(&mut self) -> StorageResult<u32> {
        let current_pages = self.num_pages()?;
        let new_size = (current_pages as u64 + 1) * PAGE_SIZE as u64;
        self.file.set_len(new_size)?;
        if self.sync_writes {
            self.file.sync_all()?;
        }
        Ok(current_pages)
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.page_no as u64 * PAGE_SIZE as u64
    }
}
