//! The single-flight feed coordinator and the listener that keeps it fresh.

mod coordinator;
mod error;
mod listener;

pub use coordinator::{FeedDeps, RefreshHandle, RefreshOutcome, TodayFeedService};
pub use error::RefreshError;
