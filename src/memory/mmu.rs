use super::page::Page;

/// Hardware page-table hooks consumed by flush and teardown.
pub trait MmuOps: Send + Sync {
    /// Strip all hardware mappings of the page before it is freed or
    /// repurposed.
    fn remove_all(&self, _page: &Page) {}

    /// Clear hardware reference tracking so the pagedaemon sees the page as
    /// unreferenced.
    fn clear_reference(&self, _page: &Page) {}
}

/// No hardware mappings to maintain.
pub struct NoMmu;

impl MmuOps for NoMmu {}
