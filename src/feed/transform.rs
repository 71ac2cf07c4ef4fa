use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashSet;
use thiserror::Error;

use super::types::{FeedItem, RemoteData, TodayFeed};
use crate::publishers::EnabledPublisherMap;

/// Default cap on the number of non-featured articles kept.
pub const DEFAULT_MAX_ARTICLES: usize = 200;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Invalid feed data: {0}")]
    Invalid(String),
}

/// Turns raw feed items plus the enabled publishers into a presentation feed.
///
/// `Ok(None)` means "nothing worth presenting": the coordinator keeps
/// whatever it already had.
#[async_trait]
pub trait FeedTransformer: Send + Sync {
    async fn transform(
        &self,
        items: RemoteData,
        enabled: &EnabledPublisherMap,
    ) -> Result<Option<TodayFeed>, TransformError>;
}

/// Filters, de-duplicates and orders items, then promotes one to featured.
#[derive(Debug, Clone)]
pub struct DefaultTransformer {
    max_articles: usize,
}

impl Default for DefaultTransformer {
    fn default() -> Self {
        Self {
            max_articles: DEFAULT_MAX_ARTICLES,
        }
    }
}

impl DefaultTransformer {
    pub fn new(max_articles: usize) -> Self {
        Self { max_articles }
    }

    fn build(&self, items: RemoteData, enabled: &EnabledPublisherMap) -> TodayFeed {
        let total = items.len();
        let mut seen = HashSet::with_capacity(total);
        let mut kept: Vec<FeedItem> = items
            .into_iter()
            .filter(|item| !item.id.trim().is_empty())
            .filter(|item| enabled.contains_key(&item.publisher))
            .filter(|item| seen.insert(item.id.clone()))
            .collect();

        // Stable: ties keep server order
        kept.sort_by(newest_first);

        let featured_at = kept
            .iter()
            .position(|item| item.is_article() && item.img.is_some())
            .or(if kept.is_empty() { None } else { Some(0) });
        let featured = featured_at.map(|i| kept.remove(i));

        kept.truncate(self.max_articles);

        let publishers: HashSet<&str> = featured
            .iter()
            .chain(kept.iter())
            .map(|item| item.publisher.as_str())
            .collect();
        let publisher_count = publishers.len();
        let hash = content_hash(featured.iter().chain(kept.iter()));

        tracing::debug!(
            received = total,
            kept = kept.len() + usize::from(featured.is_some()),
            publishers = publisher_count,
            "Transformed feed"
        );

        TodayFeed {
            hash,
            featured,
            articles: kept,
            publisher_count,
            generated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl FeedTransformer for DefaultTransformer {
    async fn transform(
        &self,
        items: RemoteData,
        enabled: &EnabledPublisherMap,
    ) -> Result<Option<TodayFeed>, TransformError> {
        Ok(Some(self.build(items, enabled)))
    }
}

/// Newest first; undated items last; higher score breaks ties.
fn newest_first(a: &FeedItem, b: &FeedItem) -> Ordering {
    b.publish_time
        .cmp(&a.publish_time)
        .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
}

fn content_hash<'a>(items: impl Iterator<Item = &'a FeedItem>) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.id.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
