//! Per-block record files.
//!
//! Every block owns one append-only file of length-prefixed MessagePack
//! frames. [`Target`] is the handle the scheduler uses (exists, load, write,
//! remove); [`StreamingCache`] batches rows yielded by streaming blocks
//! before appending them to the file.

pub mod cache;
pub mod frame;
pub mod reader;
pub mod record_set;
pub mod target;
pub mod writer;

pub use cache::StreamingCache;
pub use record_set::RecordSet;
pub use target::{Target, TargetStatus};
