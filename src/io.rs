use crate::memory::PAGE_SIZE;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Abstraction over the swap device: slot-addressed page I/O plus slot
/// bookkeeping. Implementations must be internally thread-safe; the pager
/// calls them without any object lock held.
pub trait SwapBackend: Send + Sync {
    /// Synchronously read one page from a slot.
    fn read_page(&self, slot: u64, dst: &mut [u8]) -> io::Result<()>;

    /// Synchronously write one page to a slot. Used by pageout paths.
    fn write_page(&self, slot: u64, src: &[u8]) -> io::Result<()>;

    /// Return `count` consecutive slots starting at `slot` to the slot
    /// allocator.
    fn free_slots(&self, slot: u64, count: u64);

    /// Mark `count` consecutive slots as bad at device level so they are
    /// never handed out again.
    fn mark_bad(&self, slot: u64, count: u64);
}

/// Synchronous file-backed swap device using pread/pwrite.
pub struct SyncFileSwap {
    file: File,
    bad: Mutex<HashSet<u64>>,
}

impl SyncFileSwap {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Arc<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Arc::new(Self {
            file,
            bad: Mutex::new(HashSet::new()),
        }))
    }
}

impl SwapBackend for SyncFileSwap {
    fn read_page(&self, slot: u64, dst: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(dst.len(), PAGE_SIZE);
        if self.bad.lock().unwrap().contains(&slot) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("slot {slot} is marked bad"),
            ));
        }
        let offset = slot * PAGE_SIZE as u64;
        let mut done = 0;
        while done < dst.len() {
            let n = self.file.read_at(&mut dst[done..], offset + done as u64)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read"));
            }
            done += n;
        }
        Ok(())
    }

    fn write_page(&self, slot: u64, src: &[u8]) -> io::Result<()> {
        debug_assert_eq!(src.len(), PAGE_SIZE);
        let offset = slot * PAGE_SIZE as u64;
        let mut done = 0;
        while done < src.len() {
            let n = self.file.write_at(&src[done..], offset + done as u64)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "short write"));
            }
            done += n;
        }
        Ok(())
    }

    fn free_slots(&self, _slot: u64, _count: u64) {
        // A plain file has no slot allocator to return space to.
    }

    fn mark_bad(&self, slot: u64, count: u64) {
        let mut bad = self.bad.lock().unwrap();
        for s in slot..slot + count {
            bad.insert(s);
        }
    }
}
