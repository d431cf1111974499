use std::fmt;
use std::io;

/// Errors surfaced by pager operations.
///
/// Transient conditions (busy pages, low memory) are retried internally and
/// never appear here; `WouldBlock` is the one documented control-flow signal
/// of the locked fast path, not a failure.
#[derive(Debug)]
pub enum PagerError {
    /// The locked fast pass could not resolve a needed page without blocking.
    /// The caller should drop its fast-path locks and retry in full mode.
    WouldBlock,
    /// Index storage (a swap-hash cluster entry) could not be allocated.
    OutOfMemory,
    /// Reading a swap slot failed. The slot has been poisoned and will not
    /// be retried.
    SwapRead(io::Error),
    /// Writing a page to a swap slot failed. The page stays resident and
    /// no slot is recorded.
    SwapWrite(io::Error),
    /// The page is backed by a slot that was poisoned by an earlier failed
    /// read. No I/O was attempted.
    BadSlot,
}

impl fmt::Display for PagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagerError::WouldBlock => write!(f, "page not resolvable without blocking"),
            PagerError::OutOfMemory => write!(f, "swap index allocation failed"),
            PagerError::SwapRead(e) => write!(f, "swap read failed: {e}"),
            PagerError::SwapWrite(e) => write!(f, "swap write failed: {e}"),
            PagerError::BadSlot => write!(f, "swap slot is marked bad"),
        }
    }
}

impl std::error::Error for PagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PagerError::SwapRead(e) | PagerError::SwapWrite(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PagerError>;
