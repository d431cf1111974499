pub mod config;
pub mod error;
pub mod io;
pub mod memory;
pub mod object;
pub mod pager;
pub mod swap_index;

pub use error::{PagerError, Result};
