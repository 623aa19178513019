//! Access layer: tuples and the heap files that store them.
//!
//! [`HeapFile`] is the storage file behind every table. It reads and writes
//! whole pages for the buffer pool and recovery, and places or removes
//! tuples by fetching pages through the buffer pool so that every page it
//! touches is locked on behalf of the calling transaction.

pub mod heap;
pub mod tuple;

pub use heap::HeapFile;
pub use tuple::{Tuple, TupleId};
