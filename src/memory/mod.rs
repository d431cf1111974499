pub mod alloc;
pub mod mmu;
pub mod page;

pub use alloc::{PageAllocator, SystemPageAllocator};
pub use mmu::{MmuOps, NoMmu};
pub use page::Page;

/// Page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Log2 of the page size, for byte-offset to page-index conversion.
pub const PAGE_SHIFT: u32 = 12;
