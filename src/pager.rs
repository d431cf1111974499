use crate::config::Config;
use crate::error::{PagerError, Result};
use crate::io::{SwapBackend, SyncFileSwap};
use crate::memory::{MmuOps, NoMmu, Page, PageAllocator, SystemPageAllocator, PAGE_SHIFT, PAGE_SIZE};
use crate::object::{flags as obj_flags, AnonObject, ObjectInner};
use crate::swap_index::{slot, SwapSlotIndex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Fetch flag bits for `get_pages`.
pub mod fetch {
    /// Fast pass: the caller holds fast-path locks and must not block.
    pub const LOCKED: u32 = 1 << 0;
    /// Every wanted slot must be resolved, not just the centroid.
    pub const ALLPAGES: u32 = 1 << 1;
}

/// Flush flag bits for `put_pages`.
pub mod flush {
    /// Operate on the whole object, ignoring the byte range.
    pub const ALL: u32 = 1 << 0;
    /// Move resident pages in range to the reclaimable queue.
    pub const DEACTIVATE: u32 = 1 << 1;
    /// Free resident pages in range along with their swap slots.
    pub const FREE: u32 = 1 << 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advice {
    Normal,
    Sequential,
    Random,
}

/// One entry of the in/out page array passed to `get_pages`.
pub enum PageSlot {
    /// The caller wants this page resolved.
    Wanted,
    /// The caller already holds this page or does not need it; skip.
    DontCare,
    /// Resolved; the page is busy and the caller owns the busy token.
    Resolved(Arc<Page>),
}

impl PageSlot {
    pub fn page(&self) -> Option<&Arc<Page>> {
        match self {
            PageSlot::Resolved(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_wanted(&self) -> bool {
        matches!(self, PageSlot::Wanted)
    }
}

#[derive(Default, Clone, Debug)]
pub struct StatsSnapshot {
    pub faults: u64,
    pub zero_fills: u64,
    pub swap_ins: u64,
    pub swap_errors: u64,
    pub registered: u64,
    pub swap_only: u64,
}

/// The anonymous-memory backing store: object lifecycle, demand paging, and
/// the global registry supporting the swap-off sweep.
pub struct AnonPager {
    pub config: Config,
    swap: Arc<dyn SwapBackend>,
    alloc: Arc<dyn PageAllocator>,
    mmu: Arc<dyn MmuOps>,
    /// All live objects except the kernel object. Mutated only under its own
    /// lock, which is never held across per-object I/O.
    registry: Mutex<Vec<Arc<AnonObject>>>,
    kernel: OnceLock<Arc<AnonObject>>,
    /// Pages whose only copy lives in swap: valid slots with no resident
    /// page. Shared with every object, which adjusts it at each slot and
    /// residency transition. Never allowed to underflow.
    swap_only: Arc<AtomicU64>,
    faults: AtomicU64,
    zero_fills: AtomicU64,
    swap_ins: AtomicU64,
    swap_errors: AtomicU64,
}

impl AnonPager {
    /// Build a pager over the default file swap backend and heap allocator.
    pub fn new(config: Config) -> std::io::Result<Self> {
        let swap = SyncFileSwap::open(&config.swap_path)?;
        Ok(Self::with_parts(
            config,
            swap,
            Arc::new(SystemPageAllocator),
            Arc::new(NoMmu),
        ))
    }

    /// Build a pager over explicit collaborators.
    pub fn with_parts(
        config: Config,
        swap: Arc<dyn SwapBackend>,
        alloc: Arc<dyn PageAllocator>,
        mmu: Arc<dyn MmuOps>,
    ) -> Self {
        Self {
            config,
            swap,
            alloc,
            mmu,
            registry: Mutex::new(Vec::new()),
            kernel: OnceLock::new(),
            swap_only: Arc::new(AtomicU64::new(0)),
            faults: AtomicU64::new(0),
            zero_fills: AtomicU64::new(0),
            swap_ins: AtomicU64::new(0),
            swap_errors: AtomicU64::new(0),
        }
    }

    /// Create a normal anonymous object of `page_count` pages with one
    /// reference, and register it for the swap-off sweep.
    pub fn create_object(&self, page_count: u64) -> Result<Arc<AnonObject>> {
        assert!(page_count > 0, "object must have at least one page");
        let index = SwapSlotIndex::new(page_count, &self.config)?;
        let obj = Arc::new(AnonObject::new(
            page_count,
            0,
            Some(index),
            self.swap_only.clone(),
        ));
        self.registry.lock().unwrap().push(obj.clone());
        Ok(obj)
    }

    /// The distinguished kernel object: permanently referenced, initially
    /// no-swap, never registered. Created on first call; later calls return
    /// the same object and ignore `page_count`.
    pub fn kernel_object(&self, page_count: u64) -> Arc<AnonObject> {
        self.kernel
            .get_or_init(|| {
                Arc::new(AnonObject::new(
                    page_count,
                    obj_flags::KERNEL | obj_flags::NOSWAP,
                    None,
                    self.swap_only.clone(),
                ))
            })
            .clone()
    }

    /// Flip the kernel object out of no-swap, allocating its slot index.
    ///
    /// This runs during early bring-up with no ability to block, so the
    /// allocation is non-blocking and failure is fatal.
    pub fn kernel_enable_swap(&self) {
        let obj = match self.kernel.get() {
            Some(o) => o.clone(),
            None => panic!("kernel_enable_swap before kernel_object"),
        };
        if !obj.is_noswap() {
            return;
        }
        match SwapSlotIndex::new(obj.page_count(), &self.config) {
            Ok(map) => {
                obj.lock().index = Some(map);
                obj.clear_noswap();
            }
            Err(e) => {
                log::error!("kernel_enable_swap: swap index allocation failed: {e}");
                panic!("kernel_enable_swap: swap index allocation failed");
            }
        }
    }

    /// Add a reference. No-op for the kernel object.
    pub fn reference(&self, obj: &Arc<AnonObject>) {
        if obj.is_kernel() {
            return;
        }
        let mut inner = obj.lock();
        self.reference_locked(&mut inner);
    }

    pub(crate) fn reference_locked(&self, inner: &mut ObjectInner) {
        debug_assert!(inner.ref_count > 0, "reference on a dead object");
        inner.ref_count += 1;
    }

    /// Drop a reference; the last one tears the object down. No-op for the
    /// kernel object. Cannot fail, but may block waiting out busy pages.
    pub fn detach(&self, obj: &Arc<AnonObject>) {
        if obj.is_kernel() {
            return;
        }
        let inner = obj.lock();
        self.detach_locked(obj, inner);
    }

    /// `detach` with the object lock already held. The guard is consumed:
    /// teardown must run without it.
    pub(crate) fn detach_locked(
        &self,
        obj: &Arc<AnonObject>,
        mut inner: MutexGuard<'_, ObjectInner>,
    ) {
        debug_assert!(inner.ref_count > 0, "detach on a dead object");
        inner.ref_count -= 1;
        if inner.ref_count > 0 {
            return;
        }
        drop(inner);
        // Unlist first: once off the registry the object is unreachable for
        // new references and teardown cannot race a sweep.
        self.registry
            .lock()
            .unwrap()
            .retain(|o| !Arc::ptr_eq(o, obj));
        self.free_object(obj);
    }

    /// Final teardown: free every resident page and every surviving swap
    /// slot, then let the object storage go.
    fn free_object(&self, obj: &Arc<AnonObject>) {
        log::debug!(
            "freeing object: {} pages, {} resident",
            obj.page_count(),
            obj.resident_count()
        );
        let mut inner = obj.lock();
        loop {
            let entry = inner
                .resident
                .iter()
                .next()
                .map(|(k, v)| (*k, v.clone()));
            let (index, page) = match entry {
                Some(e) => e,
                None => break,
            };
            self.mmu.remove_all(&page);
            if page.is_busy() {
                drop(inner);
                page.wait_not_busy();
                // the resident list may have mutated while we slept
                inner = obj.lock();
                continue;
            }
            self.clear_slot_locked(obj, &mut inner, index);
            obj.remove_resident_locked(&mut inner, index);
            self.alloc.free(page);
        }
        let index_map = inner.index.take();
        drop(inner);
        if let Some(map) = index_map {
            let mut freed = 0u64;
            map.for_each_slot(|_, s| {
                if s != slot::BAD {
                    self.swap.free_slots(s, 1);
                    freed += 1;
                }
            });
            // every surviving valid slot backed a non-resident page
            if freed > 0 {
                obj.debit_swap_only(freed);
            }
        }
    }

    /// Release the swap slot backing `index`, if any. Used by callers that
    /// free a page directly and must also release its backing store.
    pub fn drop_swap_slot(&self, obj: &Arc<AnonObject>, index: u64) {
        let mut inner = obj.lock();
        self.clear_slot_locked(obj, &mut inner, index);
    }

    /// Clear a slot and return it to the slot allocator unless poisoned.
    /// Returns the prior value.
    fn clear_slot_locked(&self, obj: &AnonObject, inner: &mut ObjectInner, index: u64) -> u64 {
        // clearing never allocates a cluster entry, so this cannot fail
        let old = obj
            .set_slot_locked(inner, index, slot::NONE)
            .unwrap_or(slot::NONE);
        if slot::is_valid(old) {
            self.swap.free_slots(old, 1);
        }
        old
    }

    /// Resolve pages for a fault, starting at page-aligned byte `offset`.
    ///
    /// `slots` is in/out: `Wanted` entries are resolved, `DontCare` entries
    /// skipped, pre-`Resolved` entries left alone. Every page resolved here
    /// is returned busy; unbusying is the caller's responsibility.
    pub fn get_pages(
        &self,
        obj: &Arc<AnonObject>,
        offset: u64,
        slots: &mut [PageSlot],
        centeridx: usize,
        access: Access,
        advice: Advice,
        fetch_flags: u32,
    ) -> Result<()> {
        assert_eq!(
            offset & (PAGE_SIZE as u64 - 1),
            0,
            "offset must be page aligned"
        );
        assert!(centeridx < slots.len());
        let base = offset >> PAGE_SHIFT;
        assert!(
            base + slots.len() as u64 <= obj.page_count(),
            "fault range beyond object"
        );
        log::trace!(
            "get_pages: base={base} n={} center={centeridx} {access:?} {advice:?} flags={fetch_flags:#x}",
            slots.len()
        );
        if fetch_flags & fetch::LOCKED != 0 {
            return self.get_pages_locked(obj, base, slots, centeridx, fetch_flags);
        }
        self.faults.fetch_add(1, Ordering::Relaxed);
        for (li, entry) in slots.iter_mut().enumerate() {
            if !entry.is_wanted() {
                continue;
            }
            let page = self.fetch_page(obj, base + li as u64)?;
            *entry = PageSlot::Resolved(page);
        }
        Ok(())
    }

    /// Fast pass: resolve whatever is possible without blocking. Resident
    /// non-busy pages are claimed; absent pages with no swap slot are
    /// zero-filled on the spot. Everything else stays `Wanted`.
    fn get_pages_locked(
        &self,
        obj: &Arc<AnonObject>,
        base: u64,
        slots: &mut [PageSlot],
        centeridx: usize,
        fetch_flags: u32,
    ) -> Result<()> {
        let mut inner = obj.lock();
        for (li, entry) in slots.iter_mut().enumerate() {
            if !entry.is_wanted() {
                continue;
            }
            let index = base + li as u64;
            if let Some(page) = inner.resident.get(&index) {
                if !page.is_busy() {
                    page.set_busy();
                    *entry = PageSlot::Resolved(page.clone());
                }
            } else if obj.find_slot_locked(&inner, index) == slot::NONE {
                // pure demand-zero path; a failed allocation just leaves the
                // slot for the full pass
                if let Some(page) = self.alloc.alloc(index, true) {
                    page.set_busy();
                    obj.insert_resident_locked(&mut inner, index, page.clone());
                    self.zero_fills.fetch_add(1, Ordering::Relaxed);
                    *entry = PageSlot::Resolved(page);
                }
            }
        }
        drop(inner);
        let satisfied = if fetch_flags & fetch::ALLPAGES != 0 {
            slots.iter().all(|s| !s.is_wanted())
        } else {
            !slots[centeridx].is_wanted()
        };
        if satisfied {
            Ok(())
        } else {
            Err(PagerError::WouldBlock)
        }
    }

    /// Fully resolve one page, blocking as needed. Returns the page busy.
    fn fetch_page(&self, obj: &Arc<AnonObject>, index: u64) -> Result<Arc<Page>> {
        loop {
            let mut inner = obj.lock();
            if let Some(page) = inner.resident.get(&index).cloned() {
                if page.is_busy() {
                    drop(inner);
                    page.wait_not_busy();
                    // the object may have changed while we slept; re-lookup
                    continue;
                }
                page.set_busy();
                return Ok(page);
            }
            let page = match self.alloc.alloc(index, false) {
                Some(p) => p,
                None => {
                    drop(inner);
                    self.alloc.wait_for_memory("anonget");
                    continue;
                }
            };
            let slot_no = obj.find_slot_locked(&inner, index);
            if slot_no == slot::BAD {
                // poisoned by an earlier failed read; do not retry the I/O
                drop(inner);
                self.alloc.free(page);
                return Err(PagerError::BadSlot);
            }
            page.set_busy();
            page.set_fake();
            obj.insert_resident_locked(&mut inner, index, page.clone());
            if slot_no == slot::NONE {
                drop(inner);
                page.zero();
                page.clear_fake();
                self.zero_fills.fetch_add(1, Ordering::Relaxed);
                return Ok(page);
            }
            // swap I/O blocks; the object lock must not be held across it
            drop(inner);
            let res = page.with_data_mut(|d| self.swap.read_page(slot_no, d));
            match res {
                Ok(()) => {
                    page.clear_fake();
                    self.swap_ins.fetch_add(1, Ordering::Relaxed);
                    return Ok(page);
                }
                Err(e) => {
                    let mut inner = obj.lock();
                    // Poison the slot so it is never retried, unless someone
                    // released it while the lock was dropped for the read. A
                    // live slot has a live cluster entry, so the overwrite
                    // cannot allocate and cannot fail.
                    let poisoned = obj.find_slot_locked(&inner, index) == slot_no;
                    if poisoned {
                        let _ = obj.set_slot_locked(&mut inner, index, slot::BAD);
                    }
                    obj.remove_resident_locked(&mut inner, index);
                    drop(inner);
                    if poisoned {
                        self.swap.mark_bad(slot_no, 1);
                    }
                    page.unbusy();
                    self.alloc.free(page);
                    self.swap_errors.fetch_add(1, Ordering::Relaxed);
                    return Err(PagerError::SwapRead(e));
                }
            }
        }
    }

    /// Deactivate or free every resident page in the byte range
    /// `[start, stop)`, or the whole object with `flush::ALL`.
    ///
    /// This path cannot fail; the write-back "clean" case is the pageout
    /// daemon's job and a no-op here.
    pub fn put_pages(&self, obj: &Arc<AnonObject>, start: u64, stop: u64, flush_flags: u32) {
        if flush_flags & (flush::DEACTIVATE | flush::FREE) == 0 {
            return;
        }
        let whole = flush_flags & flush::ALL != 0;
        let (lo, hi) = if whole {
            (0, obj.page_count())
        } else {
            assert!(start <= stop, "bad flush range");
            assert_eq!(
                start & (PAGE_SIZE as u64 - 1),
                0,
                "flush start must be page aligned"
            );
            let lo = start >> PAGE_SHIFT;
            let hi = ((stop + PAGE_SIZE as u64 - 1) >> PAGE_SHIFT).min(obj.page_count());
            (lo, hi)
        };
        let mut inner = obj.lock();
        'restart: loop {
            // freeing pages under a second referencer would corrupt its view
            let free_mode = flush_flags & flush::FREE != 0 && inner.ref_count <= 1;
            let range_pages = hi.saturating_sub(lo);
            let by_list = whole
                || inner.resident.len() as u64
                    <= range_pages.saturating_mul(self.config.flush_penalty);
            let targets: Vec<u64> = if by_list {
                inner
                    .resident
                    .keys()
                    .copied()
                    .filter(|&i| i >= lo && i < hi)
                    .collect()
            } else {
                (lo..hi).filter(|i| inner.resident.contains_key(i)).collect()
            };
            for index in targets {
                let page = match inner.resident.get(&index) {
                    Some(p) => p.clone(),
                    None => continue,
                };
                if page.is_wired() || page.is_loaned() {
                    continue;
                }
                if free_mode {
                    self.mmu.remove_all(&page);
                    if page.is_busy() {
                        drop(inner);
                        page.wait_not_busy();
                        inner = obj.lock();
                        continue 'restart;
                    }
                    self.clear_slot_locked(obj, &mut inner, index);
                    obj.remove_resident_locked(&mut inner, index);
                    self.alloc.free(page);
                } else {
                    self.mmu.clear_reference(&page);
                    self.alloc.deactivate(&page);
                }
            }
            break;
        }
    }

    /// Page in every registered object's pages backed by a slot in
    /// `[lo, hi)`, freeing the slots. Supports taking a swap device offline.
    /// Returns true if the sweep aborted on an error.
    pub fn pagein_swap_range(&self, lo: u64, hi: u64) -> bool {
        // Snapshot under the registry lock, bumping each ref so teardown
        // cannot race us, then work object by object without it.
        let snapshot: Vec<Arc<AnonObject>> = {
            let reg = self.registry.lock().unwrap();
            for obj in reg.iter() {
                self.reference_locked(&mut obj.lock());
            }
            reg.clone()
        };
        let mut aborted = false;
        for obj in &snapshot {
            if !aborted && self.pagein_object(obj, lo, hi) {
                aborted = true;
            }
            self.detach(obj);
        }
        aborted
    }

    /// Page in every slot of one object within `[lo, hi)`. Returns true on
    /// abort. The scan restarts from the index after every pagein since the
    /// object lock is dropped during I/O.
    fn pagein_object(&self, obj: &Arc<AnonObject>, lo: u64, hi: u64) -> bool {
        loop {
            let index = {
                let inner = obj.lock();
                match inner.index.as_ref().and_then(|m| m.first_slot_in(lo, hi)) {
                    None => return false,
                    Some((idx, _)) => idx,
                }
            };
            if let Err(e) = self.pagein_page(obj, index) {
                log::debug!("swap-off pagein failed at page {index}: {e}");
                return true;
            }
        }
    }

    /// Fault one page in synchronously and release its swap slot.
    fn pagein_page(&self, obj: &Arc<AnonObject>, index: u64) -> Result<()> {
        let page = self.fetch_page(obj, index)?;
        {
            let mut inner = obj.lock();
            self.clear_slot_locked(obj, &mut inner, index);
        }
        page.unbusy();
        self.alloc.activate(&page);
        Ok(())
    }

    /// Write a resident page out to `slot_no`, record the slot, and unlink
    /// the page. The pageout-side counterpart of `fetch_page`; the slot
    /// itself comes from the external slot allocator.
    pub fn pageout_page(&self, obj: &Arc<AnonObject>, index: u64, slot_no: u64) -> Result<()> {
        assert!(slot::is_valid(slot_no), "pageout needs a real slot");
        loop {
            let inner = obj.lock();
            let page = match inner.resident.get(&index).cloned() {
                Some(p) => p,
                None => return Ok(()),
            };
            if page.is_busy() {
                drop(inner);
                page.wait_not_busy();
                continue;
            }
            page.set_busy();
            drop(inner);
            let res = page.with_data(|d| self.swap.write_page(slot_no, d));
            let mut inner = obj.lock();
            return match res {
                Ok(()) => {
                    let old = match obj.set_slot_locked(&mut inner, index, slot_no) {
                        Ok(o) => o,
                        Err(e) => {
                            drop(inner);
                            page.unbusy();
                            return Err(e);
                        }
                    };
                    if slot::is_valid(old) {
                        self.swap.free_slots(old, 1);
                    }
                    self.mmu.remove_all(&page);
                    // unlinking credits the counter: the slot is now the
                    // page's only copy
                    obj.remove_resident_locked(&mut inner, index);
                    drop(inner);
                    page.unbusy();
                    self.alloc.free(page);
                    Ok(())
                }
                Err(e) => {
                    drop(inner);
                    page.unbusy();
                    Err(PagerError::SwapWrite(e))
                }
            };
        }
    }

    /// Pages whose only copy is in swap.
    pub fn pages_only_in_swap(&self) -> u64 {
        self.swap_only.load(Ordering::SeqCst)
    }

    /// Number of registered (non-kernel, live) objects.
    pub fn registered(&self) -> usize {
        self.registry.lock().unwrap().len()
    }

    /// Whether an object is currently on the registry.
    pub fn is_registered(&self, obj: &Arc<AnonObject>) -> bool {
        self.registry
            .lock()
            .unwrap()
            .iter()
            .any(|o| Arc::ptr_eq(o, obj))
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            faults: self.faults.load(Ordering::Relaxed),
            zero_fills: self.zero_fills.load(Ordering::Relaxed),
            swap_ins: self.swap_ins.load(Ordering::Relaxed),
            swap_errors: self.swap_errors.load(Ordering::Relaxed),
            registered: self.registered() as u64,
            swap_only: self.pages_only_in_swap(),
        }
    }
}
