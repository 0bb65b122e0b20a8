//! Page storage abstraction standing in for the external B-tree / buffer
//! manager. This engine does not implement a buffer pool, page latching, or
//! an on-disk B-tree; [`PageStore`] is the narrow allocation/read/write
//! contract those collaborators would provide, generalized from the
//! teacher's file-backed `Tablespace` reader into a read-write, allocating
//! store with both an in-memory and a file-backed implementation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::innodb::checksum;
use crate::innodb::constants::FIL_NULL;
use crate::EngineError;

/// Narrow page allocation/read/write contract. Implementations own exactly
/// one tablespace's worth of fixed-size pages; they do not know about undo
/// semantics, only page numbers and bytes.
pub trait PageStore: Send {
    /// Fixed page size for every page in this store.
    fn page_size(&self) -> u32;

    /// Number of pages currently allocated (including freed-but-not-reused
    /// slots tracked by the implementation).
    fn page_count(&self) -> u32;

    /// Read a page by number. Errors with `Corruption` if out of range.
    fn read_page(&mut self, page_no: u32) -> Result<Vec<u8>, EngineError>;

    /// Overwrite a page in place.
    fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<(), EngineError>;

    /// Allocate a fresh, zeroed page and return its number. Returns
    /// `OutOfFileSpace` if the store has a fixed capacity and is full.
    fn allocate_page(&mut self) -> Result<u32, EngineError>;

    /// Return a page to the free pool. The caller is responsible for having
    /// erased any sensitive content first.
    fn free_page(&mut self, page_no: u32) -> Result<(), EngineError>;
}

/// In-memory page store. Used by tests and by an engine run with no backing
/// file (ephemeral / in-memory mode).
pub struct InMemoryPageStore {
    page_size: u32,
    pages: Vec<Vec<u8>>,
    free_list: Vec<u32>,
}

impl InMemoryPageStore {
    /// Create an empty store with the given fixed page size.
    pub fn new(page_size: u32) -> Self {
        InMemoryPageStore {
            page_size,
            pages: Vec::new(),
            free_list: Vec::new(),
        }
    }
}

impl PageStore for InMemoryPageStore {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn read_page(&mut self, page_no: u32) -> Result<Vec<u8>, EngineError> {
        self.pages
            .get(page_no as usize)
            .cloned()
            .ok_or_else(|| EngineError::Corruption(format!("page {page_no} out of range")))
    }

    fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<(), EngineError> {
        let page = self
            .pages
            .get_mut(page_no as usize)
            .ok_or_else(|| EngineError::Corruption(format!("page {page_no} out of range")))?;
        page.copy_from_slice(data);
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<u32, EngineError> {
        if let Some(page_no) = self.free_list.pop() {
            self.pages[page_no as usize] = vec![0u8; self.page_size as usize];
            return Ok(page_no);
        }
        let page_no = self.pages.len() as u32;
        self.pages.push(vec![0u8; self.page_size as usize]);
        Ok(page_no)
    }

    fn free_page(&mut self, page_no: u32) -> Result<(), EngineError> {
        if page_no as usize >= self.pages.len() {
            return Err(EngineError::Corruption(format!(
                "page {page_no} out of range"
            )));
        }
        self.free_list.push(page_no);
        Ok(())
    }
}

/// File-backed page store, generalizing the teacher's `Tablespace` reader
/// into a read-write, growable file of fixed-size pages.
pub struct FilePageStore {
    file: File,
    page_size: u32,
    page_count: u32,
    free_list: Vec<u32>,
}

impl FilePageStore {
    /// Create a new (or truncate an existing) backing file with no pages.
    pub fn create<P: AsRef<Path>>(path: P, page_size: u32) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| EngineError::Io(format!("cannot create {}: {e}", path.display())))?;
        Ok(FilePageStore {
            file,
            page_size,
            page_count: 0,
            free_list: Vec::new(),
        })
    }

    /// Open an existing backing file, inferring the page count from its
    /// length. Used on restart / crash-recovery to reopen a store.
    pub fn open<P: AsRef<Path>>(path: P, page_size: u32) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| EngineError::Io(format!("cannot open {}: {e}", path.display())))?;
        let len = file
            .metadata()
            .map_err(|e| EngineError::Io(format!("cannot stat {}: {e}", path.display())))?
            .len();
        let page_count = (len / page_size as u64) as u32;
        Ok(FilePageStore {
            file,
            page_size,
            page_count,
            free_list: Vec::new(),
        })
    }

    fn offset(&self, page_no: u32) -> u64 {
        page_no as u64 * self.page_size as u64
    }
}

impl PageStore for FilePageStore {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn read_page(&mut self, page_no: u32) -> Result<Vec<u8>, EngineError> {
        if page_no >= self.page_count {
            return Err(EngineError::Corruption(format!(
                "page {page_no} out of range ({} pages)",
                self.page_count
            )));
        }
        let mut buf = vec![0u8; self.page_size as usize];
        self.file
            .seek(SeekFrom::Start(self.offset(page_no)))
            .map_err(|e| EngineError::Io(format!("seek to page {page_no}: {e}")))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|e| EngineError::Io(format!("read page {page_no}: {e}")))?;
        if buf.iter().any(|&b| b != 0) && !checksum::validate_checksum(&buf) {
            return Err(EngineError::Corruption(format!(
                "page {page_no} failed checksum validation"
            )));
        }
        Ok(buf)
    }

    fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<(), EngineError> {
        if page_no >= self.page_count {
            return Err(EngineError::Corruption(format!(
                "page {page_no} out of range ({} pages)",
                self.page_count
            )));
        }
        let mut stamped = data.to_vec();
        checksum::stamp_checksum(&mut stamped);
        self.file
            .seek(SeekFrom::Start(self.offset(page_no)))
            .map_err(|e| EngineError::Io(format!("seek to page {page_no}: {e}")))?;
        self.file
            .write_all(&stamped)
            .map_err(|e| EngineError::Io(format!("write page {page_no}: {e}")))?;
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<u32, EngineError> {
        if let Some(page_no) = self.free_list.pop() {
            self.write_page(page_no, &vec![0u8; self.page_size as usize])?;
            return Ok(page_no);
        }
        let page_no = self.page_count;
        self.file
            .seek(SeekFrom::Start(self.offset(page_no)))
            .map_err(|e| EngineError::Io(format!("seek to new page {page_no}: {e}")))?;
        self.file
            .write_all(&vec![0u8; self.page_size as usize])
            .map_err(|e| EngineError::Io(format!("extend store for page {page_no}: {e}")))?;
        self.page_count += 1;
        Ok(page_no)
    }

    fn free_page(&mut self, page_no: u32) -> Result<(), EngineError> {
        if page_no >= self.page_count {
            return Err(EngineError::Corruption(format!(
                "page {page_no} out of range"
            )));
        }
        self.free_list.push(page_no);
        Ok(())
    }
}

/// Sentinel meaning "no page", matching FIL_NULL's role for page-list links.
pub const NO_PAGE: u32 = FIL_NULL;
