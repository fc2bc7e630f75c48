//! The rollback journal: pre-images of pages dirtied by the current
//! transaction, kept in a sibling file `<db>-journal`.
//!
//! Header (little-endian): magic `PYSQLITE-JNL-01\0`, page size u32,
//! original page count u32.  Body: a sequence of records
//! `(page_no u32, page_image PAGE_SIZE bytes, crc32c u32)`, the checksum
//! taken over page number and image together.
//!
//! The presence of a valid journal at open time means an incomplete
//! transaction touched the main file; replaying the pre-images and
//! truncating back to the original page count restores the last committed
//! state.  A torn record at the tail is ignored: pre-images are only acted
//! on after the journal was fsynced, so a torn tail belongs to a
//! transaction that never began overwriting the main file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use crate::errors::{Error, Result};
use crate::pager::{PageNum, PAGE_SIZE};

pub const JOURNAL_MAGIC: &[u8; 16] = b"PYSQLITE-JNL-01\0";
const HEADER_SIZE: usize = 24;
const RECORD_SIZE: usize = 4 + PAGE_SIZE + 4;

pub fn journal_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_owned();
    os.push("-journal");
    PathBuf::from(os)
}

/// Syncs the directory containing `path`, making a file creation or
/// removal durable.
pub fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

fn record_checksum(page_no: PageNum, image: &[u8]) -> u32 {
    let crc = crc32c::crc32c(&page_no.to_le_bytes());
    crc32c::crc32c_append(crc, image)
}

/// An open journal being written by a live transaction.
pub struct Journal {
    file: File,
    path: PathBuf,
    orig_page_count: PageNum,
}

impl Journal {
    /// Opens (truncating) the journal and writes its header.  The header
    /// is not synced here; `sync` is called before any new image goes to
    /// the main file.
    pub fn create(db_path: &Path, orig_page_count: PageNum) -> Result<Journal> {
        let path = journal_path(db_path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut header = [0_u8; HEADER_SIZE];
        header[0..16].copy_from_slice(JOURNAL_MAGIC);
        LittleEndian::write_u32(&mut header[16..20], PAGE_SIZE as u32);
        LittleEndian::write_u32(&mut header[20..24], orig_page_count);
        file.write_all(&header)?;
        Ok(Journal {
            file,
            path,
            orig_page_count,
        })
    }

    pub fn orig_page_count(&self) -> PageNum {
        self.orig_page_count
    }

    /// Appends one pre-image record.
    pub fn append(&mut self, page_no: PageNum, image: &[u8]) -> Result<()> {
        debug_assert_eq!(image.len(), PAGE_SIZE);
        self.file.write_all(&page_no.to_le_bytes())?;
        self.file.write_all(image)?;
        self.file
            .write_all(&record_checksum(page_no, image).to_le_bytes())?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Re-reads this journal's own records, for in-process rollback.
    pub fn read_records(&mut self) -> Result<Vec<(PageNum, Vec<u8>)>> {
        self.file.seek(SeekFrom::Start(0))?;
        let parsed = parse(&mut self.file)?
            .ok_or_else(|| Error::internal("open journal lost its header"))?;
        Ok(parsed.records)
    }

    /// Deletes the journal file.  This is the moment of commit.
    pub fn delete(self) -> Result<()> {
        drop(self.file);
        std::fs::remove_file(&self.path)?;
        sync_parent_dir(&self.path)?;
        Ok(())
    }
}

/// A journal recovered from disk at open time.
pub struct RecoveredJournal {
    pub orig_page_count: PageNum,
    pub records: Vec<(PageNum, Vec<u8>)>,
}

/// Reads the journal next to `db_path` if one exists.
///
/// Returns `Ok(None)` when there is nothing to roll back: no journal, or a
/// journal so short its header never reached the disk.  A journal with a
/// wrong magic or page size is `CORRUPT`; rolling forward without it
/// could expose a half-written main file.
pub fn read_for_recovery(db_path: &Path) -> Result<Option<RecoveredJournal>> {
    let path = journal_path(db_path);
    let mut file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    parse(&mut file)
}

fn parse(file: &mut File) -> Result<Option<RecoveredJournal>> {
    let len = file.metadata()?.len();
    if len < HEADER_SIZE as u64 {
        return Ok(None);
    }
    let mut header = [0_u8; HEADER_SIZE];
    file.read_exact(&mut header)?;
    if &header[0..16] != JOURNAL_MAGIC {
        return Err(Error::corrupt(format!(
            "bad journal magic: {}",
            hex::encode(&header[0..16])
        )));
    }
    let page_size = LittleEndian::read_u32(&header[16..20]);
    if page_size as usize != PAGE_SIZE {
        return Err(Error::corrupt(format!(
            "journal page size {} does not match",
            page_size
        )));
    }
    let orig_page_count = LittleEndian::read_u32(&header[20..24]);
    let n_whole = (len as usize - HEADER_SIZE) / RECORD_SIZE;
    let mut records = Vec::with_capacity(n_whole);
    for _ in 0..n_whole {
        let page_no = file.read_u32::<LittleEndian>()?;
        let mut image = vec![0_u8; PAGE_SIZE];
        file.read_exact(&mut image)?;
        let stored = file.read_u32::<LittleEndian>()?;
        if stored != record_checksum(page_no, &image) {
            // Torn tail; everything before it is intact and sufficient.
            break;
        }
        records.push((page_no, image));
    }
    Ok(Some(RecoveredJournal {
        orig_page_count,
        records,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("j.db");
        std::fs::write(&db, b"").unwrap();
        (dir, db)
    }

    #[test]
    fn test_journal_roundtrip() {
        let (_dir, db) = scratch();
        let mut j = Journal::create(&db, 3).unwrap();
        let img_a = vec![0xaa_u8; PAGE_SIZE];
        let img_b = vec![0xbb_u8; PAGE_SIZE];
        j.append(1, &img_a).unwrap();
        j.append(2, &img_b).unwrap();
        j.sync().unwrap();
        drop(j);

        let rec = read_for_recovery(&db).unwrap().unwrap();
        assert_eq!(rec.orig_page_count, 3);
        assert_eq!(rec.records.len(), 2);
        assert_eq!(rec.records[0], (1, img_a));
        assert_eq!(rec.records[1], (2, img_b));
    }

    #[test]
    fn test_missing_journal_is_none() {
        let (_dir, db) = scratch();
        assert!(read_for_recovery(&db).unwrap().is_none());
    }

    #[test]
    fn test_headerless_journal_is_none() {
        let (_dir, db) = scratch();
        std::fs::write(journal_path(&db), b"PYS").unwrap();
        assert!(read_for_recovery(&db).unwrap().is_none());
    }

    #[test]
    fn test_torn_tail_dropped() {
        let (_dir, db) = scratch();
        let mut j = Journal::create(&db, 2).unwrap();
        let img = vec![0x11_u8; PAGE_SIZE];
        j.append(1, &img).unwrap();
        j.sync().unwrap();
        drop(j);
        // Corrupt the checksum of the (only) record.
        let path = journal_path(&db);
        let mut bytes = std::fs::read(&path).unwrap();
        let n = bytes.len();
        bytes[n - 1] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let rec = read_for_recovery(&db).unwrap().unwrap();
        assert_eq!(rec.records.len(), 0);
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let (_dir, db) = scratch();
        let j = Journal::create(&db, 2).unwrap();
        drop(j);
        let path = journal_path(&db);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'Z';
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            read_for_recovery(&db),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_delete_removes_file() {
        let (_dir, db) = scratch();
        let j = Journal::create(&db, 2).unwrap();
        assert!(journal_path(&db).exists());
        j.delete().unwrap();
        assert!(!journal_path(&db).exists());
    }
}
