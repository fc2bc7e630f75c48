//! Advisory file locking for one open database.
//!
//! Three user-visible states transition linearly:
//! UNLOCKED -> SHARED -> RESERVED -> EXCLUSIVE.  SHARED and EXCLUSIVE are
//! OS locks on the database file itself; RESERVED is an exclusive OS lock
//! on the sibling `<db>-lock` file, so that taking it does not disturb
//! concurrent readers.  Only one RESERVED holder can exist, and locks are
//! always acquired in the fixed order above, which is what makes deadlock
//! impossible.
//!
//! Acquisition failures are retried with jittered backoff up to a deadline
//! and then surface as `BUSY`; the caller decides whether to retry.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use rand::Rng;

use crate::errors::{Error, Result};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

const BACKOFF_BASE: Duration = Duration::from_millis(1);
const BACKOFF_CAP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockState {
    Unlocked,
    Shared,
    Reserved,
    Exclusive,
}

pub struct LockManager {
    // Dedicated handle for OS locks on the database file.  Kept separate
    // from the pager's I/O handle so the two cannot interfere: on every
    // platform fs2 supports, locks belong to the open file handle.
    db_handle: File,
    reserved_handle: File,
    state: LockState,
    busy_timeout: Duration,
}

fn reserved_lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_owned();
    os.push("-lock");
    PathBuf::from(os)
}

/// Retries `attempt` with jittered exponential backoff until `deadline`.
fn retry_until<F: FnMut() -> std::io::Result<()>>(
    deadline: Instant,
    what: &str,
    mut attempt: F,
) -> Result<()> {
    let mut tries: u32 = 0;
    loop {
        match attempt() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    log::debug!("lock timeout acquiring {}", what);
                    return Err(Error::Busy);
                }
                let backoff = BACKOFF_BASE
                    .saturating_mul(1 << tries.min(6))
                    .min(BACKOFF_CAP);
                let jitter = Duration::from_micros(rand::thread_rng().gen_range(0..500));
                std::thread::sleep(backoff + jitter);
                tries += 1;
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

impl LockManager {
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<LockManager> {
        let db_handle = OpenOptions::new().read(true).open(db_path)?;
        let reserved_handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(reserved_lock_path(db_path))?;
        Ok(LockManager {
            db_handle,
            reserved_handle,
            state: LockState::Unlocked,
            busy_timeout,
        })
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn set_busy_timeout(&mut self, busy_timeout: Duration) {
        self.busy_timeout = busy_timeout;
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.busy_timeout
    }

    /// UNLOCKED -> SHARED.  Required before any read.
    pub fn acquire_shared(&mut self) -> Result<()> {
        if self.state >= LockState::Shared {
            return Ok(());
        }
        // Trait calls are fully qualified: recent libstd grew inherent
        // `File` locking methods with different signatures.
        retry_until(self.deadline(), "SHARED", || {
            fs2::FileExt::try_lock_shared(&self.db_handle)
        })?;
        self.state = LockState::Shared;
        Ok(())
    }

    /// SHARED -> RESERVED.  Required before the first dirty page.
    pub fn acquire_reserved(&mut self) -> Result<()> {
        match self.state {
            LockState::Shared => {}
            LockState::Reserved | LockState::Exclusive => return Ok(()),
            LockState::Unlocked => {
                return Err(Error::internal("RESERVED requested without SHARED"));
            }
        }
        retry_until(self.deadline(), "RESERVED", || {
            fs2::FileExt::try_lock_exclusive(&self.reserved_handle)
        })?;
        self.state = LockState::Reserved;
        Ok(())
    }

    /// RESERVED -> EXCLUSIVE.  Required before writing to the main file.
    /// Blocks out new and existing readers; existing SHARED holders are
    /// waited for up to the deadline.
    pub fn acquire_exclusive(&mut self) -> Result<()> {
        match self.state {
            LockState::Reserved => {}
            LockState::Exclusive => return Ok(()),
            _ => return Err(Error::internal("EXCLUSIVE requested without RESERVED")),
        }
        // Upgrade of our own shared lock: a failed try leaves the shared
        // lock in place, so a BUSY here keeps the transaction intact.
        retry_until(self.deadline(), "EXCLUSIVE", || {
            fs2::FileExt::try_lock_exclusive(&self.db_handle)
        })?;
        self.state = LockState::Exclusive;
        Ok(())
    }

    /// Takes the write path straight from UNLOCKED, for crash recovery at
    /// open time.  Same fixed acquisition order as a normal writer.
    pub fn acquire_exclusive_for_recovery(&mut self) -> Result<()> {
        self.acquire_shared()?;
        self.acquire_reserved()?;
        self.acquire_exclusive()
    }

    /// Any state -> UNLOCKED.
    pub fn release(&mut self) -> Result<()> {
        if self.state >= LockState::Reserved {
            fs2::FileExt::unlock(&self.reserved_handle)?;
        }
        if self.state >= LockState::Shared {
            fs2::FileExt::unlock(&self.db_handle)?;
        }
        self.state = LockState::Unlocked;
        Ok(())
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock_test.db");
        File::create(&path).unwrap().write_all(b"x").unwrap();
        (dir, path)
    }

    fn quick() -> Duration {
        Duration::from_millis(50)
    }

    #[test]
    fn test_lock_ladder() {
        let (_dir, path) = scratch_db();
        let mut lm = LockManager::open(&path, quick()).unwrap();
        assert_eq!(lm.state(), LockState::Unlocked);
        lm.acquire_shared().unwrap();
        lm.acquire_reserved().unwrap();
        lm.acquire_exclusive().unwrap();
        assert_eq!(lm.state(), LockState::Exclusive);
        lm.release().unwrap();
        assert_eq!(lm.state(), LockState::Unlocked);
    }

    #[test]
    fn test_reserved_out_of_order_is_internal_error() {
        let (_dir, path) = scratch_db();
        let mut lm = LockManager::open(&path, quick()).unwrap();
        assert!(matches!(lm.acquire_reserved(), Err(Error::Internal(_))));
    }

    #[test]
    fn test_two_readers_share() {
        let (_dir, path) = scratch_db();
        let mut a = LockManager::open(&path, quick()).unwrap();
        let mut b = LockManager::open(&path, quick()).unwrap();
        a.acquire_shared().unwrap();
        b.acquire_shared().unwrap();
    }

    #[test]
    fn test_single_reserved_holder() {
        let (_dir, path) = scratch_db();
        let mut a = LockManager::open(&path, quick()).unwrap();
        let mut b = LockManager::open(&path, quick()).unwrap();
        a.acquire_shared().unwrap();
        a.acquire_reserved().unwrap();
        b.acquire_shared().unwrap();
        assert!(matches!(b.acquire_reserved(), Err(Error::Busy)));
        a.release().unwrap();
        b.acquire_reserved().unwrap();
    }

    #[test]
    fn test_reader_blocks_exclusive() {
        let (_dir, path) = scratch_db();
        let mut writer = LockManager::open(&path, quick()).unwrap();
        let mut reader = LockManager::open(&path, quick()).unwrap();
        reader.acquire_shared().unwrap();
        writer.acquire_shared().unwrap();
        writer.acquire_reserved().unwrap();
        assert!(matches!(writer.acquire_exclusive(), Err(Error::Busy)));
        reader.release().unwrap();
        writer.acquire_exclusive().unwrap();
    }
}
