//! The remote feed: wire types, the network fetch, and the presentation transform.
//!
//! - [`fetcher`] - single-attempt HTTP GET of the JSON feed
//! - [`transform`] - raw items + enabled publishers into a [`TodayFeed`]

mod fetcher;
mod transform;
mod types;

pub(crate) use fetcher::get_json;
pub use fetcher::{FeedSource, FetchError, HttpFeedSource, DEFAULT_MAX_FEED_SIZE};
pub use transform::{DefaultTransformer, FeedTransformer, TransformError, DEFAULT_MAX_ARTICLES};
pub use types::{FeedItem, RemoteData, TodayFeed};
