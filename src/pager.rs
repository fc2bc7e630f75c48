//! Manages the pages of one database file under a transaction.
//!
//! The pager presents the file as an array of fixed-size pages with a
//! write-through cache, and guarantees that either all page writes of a
//! transaction reach the file or none do.  The guarantee comes from the
//! rollback journal and a strict durability order:
//! pre-images to the journal -> fsync(journal) -> new images to the main
//! file -> fsync(main) -> remove journal -> fsync(directory).  The moment
//! of commit is the removal of the journal: a journal present at open
//! time means an incomplete transaction must be rolled back.
//!
//! Page images move in and out of the pager by value; callers reconstitute
//! typed nodes from the images on demand and hand back whole replacement
//! images.  That keeps every page addressable by number alone, with no
//! owning references between pages.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};

use crate::dbheader::Meta;
use crate::errors::{Error, Result};
use crate::journal::{self, Journal};
use crate::locking::{LockManager, LockState};

/// Page numbers are 0-based: a page's number is its file offset divided by
/// the page size.  Page 0 is the meta page.
pub type PageNum = u32;

pub const PAGE_SIZE: usize = 4096;

// One-byte page type header, first byte of every page after the meta page.
// A freshly allocated page is zeroed, so zero must mean FREE.
pub const PT_FREE: u8 = 0x00;
pub const PT_TABLE_INTERIOR: u8 = 0x02;
pub const PT_TABLE_LEAF: u8 = 0x03;
pub const PT_INDEX_INTERIOR: u8 = 0x04;
pub const PT_INDEX_LEAF: u8 = 0x05;
pub const PT_OVERFLOW: u8 = 0x06;

// Offset of the next-page pointer inside a FREE page.
const FREE_NEXT_OFFSET: usize = 1;

// Caps the file at 4GB.  Nothing structural; just a sanity bound so a
// corrupt page count cannot drive allocation into the weeds.
const MAX_PAGE_NUM: PageNum = 1 << 20;

pub struct Pager {
    db_path: PathBuf,
    file: RefCell<File>,
    lock: RefCell<LockManager>,
    cache: RefCell<HashMap<PageNum, Vec<u8>>>,
    dirty: RefCell<BTreeSet<PageNum>>,
    journaled: RefCell<HashSet<PageNum>>,
    journal: RefCell<Option<Journal>>,
    meta: RefCell<Meta>,
    // Set once commit has started overwriting the main file; tells
    // rollback whether pre-images must be replayed into the file.
    main_file_touched: RefCell<bool>,
}

impl Pager {
    /// Opens a database file, creating and initializing it if it does not
    /// exist, and rolling back any incomplete transaction left behind by a
    /// crash.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Pager> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if file.metadata()?.len() == 0 {
            Self::init_db(&mut file)?;
            journal::sync_parent_dir(path)?;
        }
        let mut lock = LockManager::open(path, busy_timeout)?;
        Self::recover_if_needed(path, &mut file, &mut lock)?;

        let meta = Self::read_meta_from(&mut file)?;
        Ok(Pager {
            db_path: path.to_path_buf(),
            file: RefCell::new(file),
            lock: RefCell::new(lock),
            cache: RefCell::new(HashMap::new()),
            dirty: RefCell::new(BTreeSet::new()),
            journaled: RefCell::new(HashSet::new()),
            journal: RefCell::new(None),
            meta: RefCell::new(meta),
            main_file_touched: RefCell::new(false),
        })
    }

    /// Lays out a fresh database: meta page plus an empty catalog root.
    fn init_db(file: &mut File) -> Result<()> {
        let meta = Meta {
            page_count: 2,
            freelist_head: 0,
            catalog_root: 1,
            schema_counter: 0,
        };
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&meta.encode())?;
        // Page 1: the catalog root, an empty table leaf (type byte, zero
        // cell count).
        let mut root = vec![0_u8; PAGE_SIZE];
        root[0] = PT_TABLE_LEAF;
        file.write_all(&root)?;
        file.sync_all()?;
        Ok(())
    }

    fn read_meta_from(file: &mut File) -> Result<Meta> {
        let mut page = vec![0_u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut page)
            .map_err(|_| Error::corrupt("database file shorter than one page"))?;
        Meta::decode(&page)
    }

    /// If a valid journal exists, replays its pre-images under an
    /// exclusive lock and truncates the file back to its original size,
    /// before any other operation is accepted.
    fn recover_if_needed(db_path: &Path, file: &mut File, lock: &mut LockManager) -> Result<()> {
        if journal::read_for_recovery(db_path)?.is_none() {
            return Ok(());
        }
        lock.acquire_exclusive_for_recovery()?;
        // Another process may have completed recovery while we waited.
        let recovered = match journal::read_for_recovery(db_path)? {
            Some(r) => r,
            None => {
                lock.release()?;
                return Ok(());
            }
        };
        log::warn!(
            "journal found at open; rolling back {} page(s)",
            recovered.records.len()
        );
        for (pn, image) in &recovered.records {
            if *pn >= recovered.orig_page_count {
                continue;
            }
            file.seek(SeekFrom::Start(*pn as u64 * PAGE_SIZE as u64))?;
            file.write_all(image)?;
        }
        file.set_len(recovered.orig_page_count as u64 * PAGE_SIZE as u64)?;
        file.sync_all()?;
        std::fs::remove_file(journal::journal_path(db_path))?;
        journal::sync_parent_dir(db_path)?;
        lock.release()?;
        Ok(())
    }

    pub fn set_busy_timeout(&self, busy_timeout: Duration) {
        self.lock.borrow_mut().set_busy_timeout(busy_timeout);
    }

    // ----- meta accessors -----

    pub fn schema_counter(&self) -> u32 {
        self.meta.borrow().schema_counter
    }

    pub fn catalog_root(&self) -> PageNum {
        self.meta.borrow().catalog_root
    }

    pub fn page_count(&self) -> PageNum {
        self.meta.borrow().page_count
    }

    pub fn freelist_head(&self) -> PageNum {
        self.meta.borrow().freelist_head
    }

    // ----- transaction lifecycle -----

    pub fn in_write_txn(&self) -> bool {
        self.journal.borrow().is_some()
    }

    /// Acquires SHARED and refreshes the view of the file.  The page cache
    /// is per connection and another process may have committed since we
    /// last held a lock, so the cache is dropped and the meta page
    /// re-read.  No-op when a transaction is already holding locks.
    pub fn begin_read(&self) -> Result<()> {
        if self.lock.borrow().state() >= LockState::Shared {
            return Ok(());
        }
        self.lock.borrow_mut().acquire_shared()?;
        self.cache.borrow_mut().clear();
        let meta = Self::read_meta_from(&mut self.file.borrow_mut())?;
        *self.meta.borrow_mut() = meta;
        Ok(())
    }

    /// Releases the SHARED lock after a read-only statement.  Does nothing
    /// while a write transaction is open.
    pub fn end_read(&self) -> Result<()> {
        if !self.in_write_txn() {
            self.lock.borrow_mut().release()?;
        }
        Ok(())
    }

    /// Upgrades to RESERVED and opens the journal.  Called before the
    /// first page is dirtied; requires SHARED.
    pub fn begin_write(&self) -> Result<()> {
        if self.in_write_txn() {
            return Ok(());
        }
        if self.lock.borrow().state() < LockState::Shared {
            return Err(Error::internal("begin_write without SHARED"));
        }
        self.lock.borrow_mut().acquire_reserved()?;
        let jrnl = Journal::create(&self.db_path, self.page_count())?;
        *self.journal.borrow_mut() = Some(jrnl);
        self.journaled.borrow_mut().clear();
        *self.main_file_touched.borrow_mut() = false;
        Ok(())
    }

    /// Flushes the transaction: journal to disk, then the new page images,
    /// then removes the journal.  On success all locks are released.
    /// A `BUSY` here leaves the transaction intact for retry.
    pub fn commit(&self) -> Result<()> {
        if !self.in_write_txn() {
            // Read-only transaction: nothing to flush.
            self.lock.borrow_mut().release()?;
            return Ok(());
        }
        if let Some(jrnl) = self.journal.borrow_mut().as_mut() {
            jrnl.sync()?;
        }
        self.lock.borrow_mut().acquire_exclusive()?;
        *self.main_file_touched.borrow_mut() = true;
        {
            let mut file = self.file.borrow_mut();
            let cache = self.cache.borrow();
            for pn in self.dirty.borrow().iter() {
                let image = cache
                    .get(pn)
                    .ok_or_else(|| Error::internal("dirty page missing from cache"))?;
                file.seek(SeekFrom::Start(*pn as u64 * PAGE_SIZE as u64))?;
                file.write_all(image)?;
            }
            file.sync_all()?;
        }
        let jrnl = self.journal.borrow_mut().take();
        if let Some(jrnl) = jrnl {
            jrnl.delete()?;
        }
        self.dirty.borrow_mut().clear();
        self.journaled.borrow_mut().clear();
        *self.main_file_touched.borrow_mut() = false;
        self.lock.borrow_mut().release()?;
        log::debug!("commit complete, page count {}", self.page_count());
        Ok(())
    }

    /// Undoes the open transaction.  If commit had begun overwriting the
    /// main file, the journal's pre-images are replayed and the file is
    /// truncated back to its original page count.
    pub fn rollback(&self) -> Result<()> {
        if !self.in_write_txn() {
            self.cache.borrow_mut().clear();
            self.lock.borrow_mut().release()?;
            return Ok(());
        }
        if *self.main_file_touched.borrow() {
            let (records, orig) = {
                let mut jref = self.journal.borrow_mut();
                let jrnl = jref.as_mut().expect("checked in_write_txn");
                (jrnl.read_records()?, jrnl.orig_page_count())
            };
            let mut file = self.file.borrow_mut();
            for (pn, image) in &records {
                if *pn >= orig {
                    continue;
                }
                file.seek(SeekFrom::Start(*pn as u64 * PAGE_SIZE as u64))?;
                file.write_all(image)?;
            }
            file.set_len(orig as u64 * PAGE_SIZE as u64)?;
            file.sync_all()?;
        }
        let jrnl = self.journal.borrow_mut().take();
        if let Some(jrnl) = jrnl {
            jrnl.delete()?;
        }
        self.dirty.borrow_mut().clear();
        self.journaled.borrow_mut().clear();
        self.cache.borrow_mut().clear();
        *self.main_file_touched.borrow_mut() = false;
        let meta = Self::read_meta_from(&mut self.file.borrow_mut())?;
        *self.meta.borrow_mut() = meta;
        self.lock.borrow_mut().release()?;
        log::debug!("rollback complete");
        Ok(())
    }

    // ----- page access -----

    /// Returns a copy of the page image.
    pub fn get_page(&self, pn: PageNum) -> Result<Vec<u8>> {
        if pn >= self.page_count() {
            return Err(Error::corrupt(format!(
                "page {} out of range (page count {})",
                pn,
                self.page_count()
            )));
        }
        if let Some(image) = self.cache.borrow().get(&pn) {
            return Ok(image.clone());
        }
        let mut image = vec![0_u8; PAGE_SIZE];
        {
            let mut file = self.file.borrow_mut();
            file.seek(SeekFrom::Start(pn as u64 * PAGE_SIZE as u64))?;
            file.read_exact(&mut image)
                .map_err(|_| Error::corrupt(format!("page {} beyond end of file", pn)))?;
        }
        self.cache.borrow_mut().insert(pn, image.clone());
        Ok(image)
    }

    /// Replaces the page image within the open write transaction.  The
    /// first write of each pre-existing page appends its pre-image to the
    /// journal before the cache is touched.
    pub fn write_page(&self, pn: PageNum, image: Vec<u8>) -> Result<()> {
        debug_assert_eq!(image.len(), PAGE_SIZE);
        if !self.in_write_txn() {
            return Err(Error::internal("page write outside a write transaction"));
        }
        if pn >= self.page_count() {
            return Err(Error::internal(format!("write to unallocated page {}", pn)));
        }
        let needs_journal = {
            let jref = self.journal.borrow();
            let jrnl = jref.as_ref().expect("checked in_write_txn");
            pn < jrnl.orig_page_count() && !self.journaled.borrow().contains(&pn)
        };
        if needs_journal {
            let pre = self.get_page(pn)?;
            self.journal
                .borrow_mut()
                .as_mut()
                .expect("checked in_write_txn")
                .append(pn, &pre)?;
            self.journaled.borrow_mut().insert(pn);
        }
        self.cache.borrow_mut().insert(pn, image);
        self.dirty.borrow_mut().insert(pn);
        Ok(())
    }

    /// Allocates a page: pops the free-list head or extends the file.
    /// The returned page is zeroed.
    pub fn allocate(&self) -> Result<PageNum> {
        if !self.in_write_txn() {
            return Err(Error::internal("allocate outside a write transaction"));
        }
        let head = self.freelist_head();
        let pn = if head != 0 {
            let page = self.get_page(head)?;
            if page[0] != PT_FREE {
                return Err(Error::corrupt(format!(
                    "free-list page {} has type 0x{:02x}",
                    head, page[0]
                )));
            }
            let next = LittleEndian::read_u32(&page[FREE_NEXT_OFFSET..FREE_NEXT_OFFSET + 4]);
            self.write_page(head, vec![0_u8; PAGE_SIZE])?;
            self.meta.borrow_mut().freelist_head = next;
            head
        } else {
            let pn = self.page_count();
            if pn >= MAX_PAGE_NUM {
                return Err(Error::internal("database page limit reached"));
            }
            self.meta.borrow_mut().page_count = pn + 1;
            self.write_page(pn, vec![0_u8; PAGE_SIZE])?;
            pn
        };
        self.write_meta()?;
        Ok(pn)
    }

    /// Returns a page to the free list.
    pub fn free(&self, pn: PageNum) -> Result<()> {
        if pn == 0 || pn == self.catalog_root() {
            return Err(Error::internal(format!("refusing to free page {}", pn)));
        }
        let mut image = vec![0_u8; PAGE_SIZE];
        image[0] = PT_FREE;
        LittleEndian::write_u32(
            &mut image[FREE_NEXT_OFFSET..FREE_NEXT_OFFSET + 4],
            self.freelist_head(),
        );
        self.write_page(pn, image)?;
        self.meta.borrow_mut().freelist_head = pn;
        self.write_meta()
    }

    /// Bumps the schema-change counter; part of every DDL statement.
    pub fn bump_schema_counter(&self) -> Result<()> {
        self.meta.borrow_mut().schema_counter += 1;
        self.write_meta()
    }

    fn write_meta(&self) -> Result<()> {
        let image = self.meta.borrow().encode();
        self.write_page(0, image)
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        // A transaction that is never committed is rolled back when its
        // connection goes away.
        if self.in_write_txn() {
            if let Err(e) = self.rollback() {
                log::warn!("rollback on drop failed: {}", e);
            }
        }
    }
}
