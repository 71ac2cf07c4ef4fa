use thiserror::Error;

use crate::feed::{FetchError, TransformError};

/// Why a refresh attempt settled without producing a new feed.
///
/// Waiters share one outcome, so it reaches them as `Arc<RefreshError>`.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Transport failure or non-2xx response from the feed endpoint
    #[error("Failed to fetch feed from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: FetchError,
    },
    /// The publisher provider returned nothing to filter against
    #[error("No publishers available to filter the feed")]
    PublishersUnavailable,
    #[error("Failed to transform feed: {0}")]
    TransformFailed(#[from] TransformError),
    /// A refresh was started while another one was still recorded as running
    #[error("Refresh requested while refresh #{running} is still in flight")]
    ProtocolViolation { running: u64 },
    #[error("Refresh panicked: {0}")]
    Panicked(String),
    /// The refresh task went away without reporting an outcome
    #[error("Refresh ended without reporting an outcome")]
    Abandoned,
}
