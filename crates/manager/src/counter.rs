//! The persisted transfer counter.
//!
//! Transfer ids must be unique at the initiator across process restarts, so
//! the counter persists every allocation before handing the value out. The
//! counter is a process-wide resource: opened when the manager is built,
//! flushed when it stops.

use std::fs;
use std::io;
use std::path::PathBuf;

use parking_lot::Mutex;

use conduit_primitives::TransferId;

/// A monotonically increasing counter persisted to a file.
pub struct TransferCounter {
    path: PathBuf,
    next: Mutex<u64>,
}

impl TransferCounter {
    /// Open the counter, resuming from the persisted value if present.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let next = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            raw.trim().parse::<u64>().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("corrupt transfer counter {}: {e}", path.display()),
                )
            })?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            0
        };
        Ok(Self {
            path,
            next: Mutex::new(next),
        })
    }

    /// Allocate the next transfer id.
    ///
    /// The new counter value hits disk before the id is returned, so a
    /// crash can skip ids but never reuse one.
    pub fn next(&self) -> io::Result<TransferId> {
        let mut next = self.next.lock();
        let value = *next + 1;
        self.persist(value)?;
        *next = value;
        Ok(TransferId(value))
    }

    /// The last allocated value, without allocating.
    pub fn peek(&self) -> u64 {
        *self.next.lock()
    }

    /// Flush the counter. Allocation already persists eagerly, so this only
    /// exists to pair with `open` in the manager lifecycle.
    pub fn close(&self) -> io::Result<()> {
        self.persist(*self.next.lock())
    }

    fn persist(&self, value: u64) -> io::Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, value.to_string())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
