use super::page::Page;
use std::sync::Arc;

/// Abstraction over the physical page allocator and page queues.
///
/// Implementations must be internally thread-safe; the pager calls them both
/// with and without an object lock held.
pub trait PageAllocator: Send + Sync {
    /// Allocate a page at the given object index. `zero` requests
    /// pre-zeroed contents. Returns `None` under memory pressure; the
    /// caller blocks on `wait_for_memory` and retries.
    fn alloc(&self, index: u64, zero: bool) -> Option<Arc<Page>>;

    /// Return a page to the allocator.
    fn free(&self, page: Arc<Page>);

    /// Move a page to the active queue. Default: no page queues.
    fn activate(&self, _page: &Arc<Page>) {}

    /// Move a page to the inactive/reclaimable queue. Default: no page queues.
    fn deactivate(&self, _page: &Arc<Page>) {}

    /// Block until the allocator believes more memory may be available.
    /// Callers always retry the allocation afterwards.
    fn wait_for_memory(&self, _reason: &str) {
        std::thread::yield_now();
    }
}

/// Heap-backed allocator; never fails and has no page queues.
pub struct SystemPageAllocator;

impl PageAllocator for SystemPageAllocator {
    fn alloc(&self, index: u64, _zero: bool) -> Option<Arc<Page>> {
        // Fresh heap pages are always zeroed.
        Some(Arc::new(Page::new(index)))
    }

    fn free(&self, page: Arc<Page>) {
        drop(page);
    }
}
