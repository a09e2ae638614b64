//! End-of-run notifications.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable notification channels
//! - A Telegram notifier implementation
//! - Minijinja rendering of the run summary message
//! - A dispatcher that delivers notifications off the main thread

pub mod dispatcher;
pub mod telegram;
pub mod templating;
pub mod traits;

pub use dispatcher::Dispatcher;
pub use templating::{format_duration, RunReport};
pub use traits::{Notification, Notifier, NotifyError};
