use crate::error::Result;
use crate::memory::Page;
use crate::swap_index::{slot, SwapSlotIndex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Object flag bits.
pub mod flags {
    /// The object may never have a non-zero swap slot recorded. Attempting
    /// to record one is a fatal caller bug.
    pub const NOSWAP: u32 = 1 << 0;
    /// The distinguished kernel object: permanent reference count, never
    /// registered, never freed.
    pub const KERNEL: u32 = 1 << 1;
}

/// State behind the object lock.
pub(crate) struct ObjectInner {
    pub ref_count: u32,
    /// Resident pages, ordered by page index. Doubles as the traversal
    /// structure for bulk flush.
    pub resident: BTreeMap<u64, Arc<Page>>,
    /// Swap-slot index. `None` only for the kernel object while it is still
    /// permanently no-swap.
    pub index: Option<SwapSlotIndex>,
}

/// An anonymous memory object: demand-zero, swap-backed, reference counted.
///
/// All residency and slot state is serialized by the object lock. The flag
/// word sits outside it because `NOSWAP` is checked on the slot fast path
/// and only ever cleared once, at boot, by the kernel-swap-enable
/// transition.
pub struct AnonObject {
    page_count: u64,
    flags: AtomicU32,
    /// System-wide "pages only in swap" counter, shared with the owning
    /// pager. Credited and debited at the slot/residency transition points
    /// below so it always equals the number of valid slots whose page is
    /// not resident.
    swap_only: Arc<AtomicU64>,
    pub(crate) inner: Mutex<ObjectInner>,
}

impl AnonObject {
    pub(crate) fn new(
        page_count: u64,
        obj_flags: u32,
        index: Option<SwapSlotIndex>,
        swap_only: Arc<AtomicU64>,
    ) -> Self {
        Self {
            page_count,
            flags: AtomicU32::new(obj_flags),
            swap_only,
            inner: Mutex::new(ObjectInner {
                ref_count: 1,
                resident: BTreeMap::new(),
                index,
            }),
        }
    }

    /// Total addressable pages. Immutable after creation.
    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    pub fn is_kernel(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & flags::KERNEL != 0
    }

    pub fn is_noswap(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & flags::NOSWAP != 0
    }

    pub(crate) fn clear_noswap(&self) {
        self.flags.fetch_and(!flags::NOSWAP, Ordering::Relaxed);
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ObjectInner> {
        self.inner.lock().unwrap()
    }

    /// Current resident page count.
    pub fn resident_count(&self) -> usize {
        self.lock().resident.len()
    }

    /// Current reference count.
    pub fn ref_count(&self) -> u32 {
        self.lock().ref_count
    }

    /// Look up the swap slot backing a page index. No-swap objects always
    /// report `slot::NONE`.
    pub fn find_slot(&self, index: u64) -> u64 {
        if self.is_noswap() {
            return slot::NONE;
        }
        self.find_slot_locked(&self.lock(), index)
    }

    pub(crate) fn find_slot_locked(&self, inner: &ObjectInner, index: u64) -> u64 {
        assert!(index < self.page_count, "page index {index} out of range");
        if self.is_noswap() {
            return slot::NONE;
        }
        match &inner.index {
            Some(map) => map.find(index),
            None => unreachable!("swap-capable object without a slot index"),
        }
    }

    /// Record the swap slot backing a page index, returning the prior value.
    ///
    /// Panics if the object is no-swap and `value` is non-zero; recording a
    /// slot on such an object would silently break the no-swap guarantee, so
    /// it aborts instead. Setting zero on a no-swap object is a no-op.
    pub fn set_slot(&self, index: u64, value: u64) -> Result<u64> {
        self.set_slot_locked(&mut self.lock(), index, value)
    }

    pub(crate) fn set_slot_locked(
        &self,
        inner: &mut ObjectInner,
        index: u64,
        value: u64,
    ) -> Result<u64> {
        assert!(index < self.page_count, "page index {index} out of range");
        if self.is_noswap() {
            if value == slot::NONE {
                return Ok(slot::NONE);
            }
            panic!("set_slot: non-zero slot {value} on no-swap object");
        }
        let resident = inner.resident.contains_key(&index);
        let old = match &mut inner.index {
            Some(map) => map.set(index, value)?,
            None => unreachable!("swap-capable object without a slot index"),
        };
        // a valid slot for a non-resident page is the sole copy of that page
        if !resident {
            match (slot::is_valid(old), slot::is_valid(value)) {
                (false, true) => self.credit_swap_only(1),
                (true, false) => self.debit_swap_only(1),
                _ => {}
            }
        }
        Ok(old)
    }

    /// Track a page as resident. The counterpart counter debit applies when
    /// the index already carries a valid slot for it.
    pub(crate) fn insert_resident_locked(
        &self,
        inner: &mut ObjectInner,
        index: u64,
        page: Arc<Page>,
    ) {
        let prev = inner.resident.insert(index, page);
        debug_assert!(prev.is_none(), "page {index} already resident");
        if slot::is_valid(self.find_slot_locked(inner, index)) {
            self.debit_swap_only(1);
        }
    }

    /// Stop tracking a resident page. A valid slot left behind becomes the
    /// page's sole copy and is credited to the counter.
    pub(crate) fn remove_resident_locked(
        &self,
        inner: &mut ObjectInner,
        index: u64,
    ) -> Option<Arc<Page>> {
        let page = inner.resident.remove(&index)?;
        if slot::is_valid(self.find_slot_locked(inner, index)) {
            self.credit_swap_only(1);
        }
        Some(page)
    }

    pub(crate) fn credit_swap_only(&self, n: u64) {
        self.swap_only.fetch_add(n, Ordering::SeqCst);
    }

    pub(crate) fn debit_swap_only(&self, n: u64) {
        let prev = self.swap_only.fetch_sub(n, Ordering::SeqCst);
        assert!(prev >= n, "pages-only-in-swap counter underflow");
    }
}
