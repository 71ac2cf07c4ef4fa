//! Publisher metadata and the preferences that decide which sources show up.
//!
//! - [`filter`] - derives the enabled subset of a publisher map
//! - [`remote`] - HTTP-backed provider with user overrides and change notifications

mod filter;
mod remote;
mod types;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use filter::enabled_only;
pub use remote::RemotePublishers;
pub use types::{EnabledPublisherMap, Publisher, PublisherMap};

/// Source of publisher metadata for the feed coordinator.
#[async_trait]
pub trait PublisherProvider: Send + Sync {
    /// Return the known publishers, fetching them first if needed.
    ///
    /// `None` means no publisher data could be obtained.
    async fn get_or_fetch(&self) -> Option<PublisherMap>;

    /// Receive a message every time the publishers or their preferences change.
    fn subscribe(&self) -> broadcast::Receiver<PublisherMap>;
}
