//! Strata - the storage kernel of a disk-oriented RDBMS
//!
//! This crate turns a fixed pool of memory frames and a disk-resident page
//! file into a transactionally-usable, ordered key/value index. It is built
//! from four tightly coupled components, leaves first:
//!
//! - **Extendible hash table** (`container`): the in-memory page table
//!   mapping resident page IDs to frame IDs, with directory doubling and
//!   bucket splitting
//! - **LRU-K replacer** (`buffer`): eviction policy preferring frames with
//!   fewer than K recorded accesses, LRU among the rest
//! - **Buffer pool manager** (`buffer`): owns the frames, fetches and
//!   evicts pages, tracks pins and dirty flags, flushes to disk
//! - **B+Tree index** (`index`): ordered key/value map over buffer-pool
//!   pages with point lookup, sorted scan, insert, and delete
//!
//! Disk access lives in `storage::disk` (a page-file manager plus a worker
//! thread scheduler) and the on-page binary formats in `storage::page`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::buffer::BufferPoolManager;
//! use strata::common::{PageId, RecordId, SlotId};
//! use strata::index::BPlusTree;
//! use strata::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(100, 2, disk_manager));
//!
//! let mut index = BPlusTree::new("orders_pk", Arc::clone(&bpm), 128, 128);
//! index.insert(42, RecordId::new(PageId::new(7), SlotId::new(0))).unwrap();
//! assert!(index.get(42).unwrap().is_some());
//!
//! for entry in index.begin().unwrap() {
//!     let (key, rid) = entry.unwrap();
//!     println!("{} -> {:?}", key, rid);
//! }
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{FrameId, PageId, RecordId, Result, SlotId, StrataError};
