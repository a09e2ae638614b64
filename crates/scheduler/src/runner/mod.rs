//! Block scheduler -- owns the registry and drives a run.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructors, registration, loading and accessors
//! - `selection`: name lookup, requested-set selection, overwrite/delete/clean
//! - `dispatch`: `execute`, the bounded worker loop, at-end and notification

mod core;
mod dispatch;
mod selection;

pub use self::core::Scheduler;
