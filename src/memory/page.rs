use super::PAGE_SIZE;
use std::fmt;
use std::sync::{Condvar, Mutex};

/// Page flag bits stored in the per-page flag word.
pub mod flags {
    /// The page is owned by an in-progress operation (fault resolution,
    /// teardown). Other threads must wait for the bit to clear.
    pub const BUSY: u16 = 1 << 0;
    /// Someone is blocked waiting for BUSY to clear; the releaser must wake.
    pub const WANTED: u16 = 1 << 1;
    /// The page was freshly allocated and its contents are undefined until
    /// zero-filled or read from swap.
    pub const FAKE: u16 = 1 << 2;
}

struct PageMeta {
    flags: u16,
    wire_count: u32,
    loan_count: u32,
}

/// A tracked page: one page of content plus the flag word driving the
/// busy/wanted protocol.
///
/// Flag transitions are serialized by the owning object's lock; the page's
/// own mutex exists so a waiter can block on the condvar after the object
/// lock has been dropped.
pub struct Page {
    index: u64,
    meta: Mutex<PageMeta>,
    cond: Condvar,
    data: Mutex<Box<[u8]>>,
}

impl Page {
    pub fn new(index: u64) -> Self {
        Self {
            index,
            meta: Mutex::new(PageMeta {
                flags: 0,
                wire_count: 0,
                loan_count: 0,
            }),
            cond: Condvar::new(),
            data: Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
        }
    }

    /// Page index within the owning object.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn is_busy(&self) -> bool {
        self.meta.lock().unwrap().flags & flags::BUSY != 0
    }

    pub fn is_fake(&self) -> bool {
        self.meta.lock().unwrap().flags & flags::FAKE != 0
    }

    /// Claim the busy token. Callers hold the owning object's lock and have
    /// already observed the page as not busy.
    pub fn set_busy(&self) {
        let mut meta = self.meta.lock().unwrap();
        debug_assert!(meta.flags & flags::BUSY == 0, "page {} already busy", self.index);
        meta.flags |= flags::BUSY;
    }

    pub fn set_fake(&self) {
        self.meta.lock().unwrap().flags |= flags::FAKE;
    }

    /// Clear FAKE once the page holds defined content.
    pub fn clear_fake(&self) {
        self.meta.lock().unwrap().flags &= !flags::FAKE;
    }

    /// Release the busy token and wake any waiters.
    pub fn unbusy(&self) {
        let mut meta = self.meta.lock().unwrap();
        meta.flags &= !(flags::BUSY | flags::WANTED);
        self.cond.notify_all();
    }

    /// Block until the page is no longer busy. The caller must have dropped
    /// the owning object's lock and must re-validate residency afterwards.
    pub fn wait_not_busy(&self) {
        let mut meta = self.meta.lock().unwrap();
        while meta.flags & flags::BUSY != 0 {
            meta.flags |= flags::WANTED;
            meta = self.cond.wait(meta).unwrap();
        }
    }

    pub fn wire(&self) {
        self.meta.lock().unwrap().wire_count += 1;
    }

    pub fn unwire(&self) {
        let mut meta = self.meta.lock().unwrap();
        debug_assert!(meta.wire_count > 0);
        meta.wire_count -= 1;
    }

    pub fn is_wired(&self) -> bool {
        self.meta.lock().unwrap().wire_count > 0
    }

    pub fn loan(&self) {
        self.meta.lock().unwrap().loan_count += 1;
    }

    pub fn unloan(&self) {
        let mut meta = self.meta.lock().unwrap();
        debug_assert!(meta.loan_count > 0);
        meta.loan_count -= 1;
    }

    pub fn is_loaned(&self) -> bool {
        self.meta.lock().unwrap().loan_count > 0
    }

    /// Zero the page contents.
    pub fn zero(&self) {
        self.data.lock().unwrap().fill(0);
    }

    /// Read access to the page contents.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock().unwrap())
    }

    /// Write access to the page contents. The caller owns the busy token.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.lock().unwrap())
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.meta.lock().unwrap();
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("flags", &format_args!("{:#x}", meta.flags))
            .field("wire_count", &meta.wire_count)
            .field("loan_count", &meta.loan_count)
            .finish_non_exhaustive()
    }
}
