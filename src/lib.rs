//! Single-flight cache for a remote news feed filtered by publisher preferences.
//!
//! The [`TodayFeedService`] fetches the feed and the publisher list together,
//! keeps only items from enabled publishers, caches the resulting
//! [`TodayFeed`] in memory and in SQLite, and guarantees that at most one
//! network refresh runs at a time no matter how many callers ask for data.
//!
//! - [`feed`] - wire types, HTTP fetch, presentation transform
//! - [`publishers`] - publisher metadata, filtering, remote provider
//! - [`storage`] - SQLite store and the versioned feed record
//! - [`today`] - the coordinator and its publisher-change listener
//! - [`config`] - `config.toml` loading

pub mod config;
pub mod feed;
pub mod publishers;
pub mod storage;
pub mod today;
pub mod util;

pub use feed::TodayFeed;
pub use today::{FeedDeps, RefreshError, TodayFeedService};
