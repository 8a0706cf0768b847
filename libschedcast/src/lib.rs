//! Schedcast - scheduled multi-platform publishing engine
//!
//! Accepts content for future delivery to websites and social platforms,
//! claims it when due, publishes it through a per-platform adapter with
//! classified retries, and keeps an append-only log of every attempt.

pub mod audit;
pub mod config;
pub mod connections;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod logging;
pub mod notify;
pub mod platforms;
pub mod retry;
pub mod scheduling;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{PublishError, Result, SchedcastError};
pub use service::SchedcastService;
pub use types::{ContentSnapshot, Platform, PostStatus, ScheduledPost};
