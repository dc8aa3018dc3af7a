//! Block store layer for vibecache.
//!
//! The object cache flushes into and loads from a [`BlockStore`], which maps
//! object keys to opaque byte strings:
//!
//! - **MemoryBlockStore**: a map in memory, for tests and scratch databases
//! - **FileBlockStore**: objects kept as page chains in a single file
//! - **PageManager**: fixed-size (4KB) page I/O underneath the file store

pub mod block_store;
pub mod disk;
pub mod file_store;

pub use block_store::{BlockStore, MemoryBlockStore};
pub use disk::{PageId, PageManager, PAGE_SIZE};
pub use file_store::FileBlockStore;
