pub mod page_manager;

pub use page_manager::{PageId, PageManager, PAGE_SIZE};
