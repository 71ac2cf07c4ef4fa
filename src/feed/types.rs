use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_content_type() -> String {
    "article".to_string()
}

/// One record of the remote feed.
///
/// Only `id` and `publisher` are required; unknown fields are ignored so the
/// remote schema can grow without breaking older clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    #[serde(alias = "publisher_id")]
    pub publisher: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl FeedItem {
    pub fn is_article(&self) -> bool {
        self.content_type == "article"
    }
}

/// Body of the remote feed response, in server order.
pub type RemoteData = Vec<FeedItem>;

/// Presentation-ready feed produced by a [`FeedTransformer`](super::FeedTransformer).
///
/// Served to callers as `Arc<TodayFeed>` and replaced wholesale on every
/// successful refresh, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodayFeed {
    /// Hex SHA-256 over the kept item ids, in presentation order
    pub hash: String,
    pub featured: Option<FeedItem>,
    pub articles: Vec<FeedItem>,
    /// Number of distinct publishers contributing at least one item
    pub publisher_count: usize,
    pub generated_at: DateTime<Utc>,
}

impl TodayFeed {
    /// Total items, including the featured one.
    pub fn item_count(&self) -> usize {
        self.articles.len() + usize::from(self.featured.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_item_parses() {
        let item: FeedItem = serde_json::from_str(r#"{"id":"a1","publisher":"p1"}"#).unwrap();
        assert_eq!(item.id, "a1");
        assert_eq!(item.publisher, "p1");
        assert_eq!(item.content_type, "article");
        assert!(item.is_article());
        assert!(item.title.is_none());
        assert!(item.publish_time.is_none());
    }

    #[test]
    fn test_publisher_id_alias() {
        let item: FeedItem =
            serde_json::from_str(r#"{"id":"a1","publisher_id":"p1"}"#).unwrap();
        assert_eq!(item.publisher, "p1");
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let item: FeedItem = serde_json::from_str(
            r#"{"id":"a1","publisher":"p1","url_hash":"abc","padded_img":"x","score":3.5,
                "publish_time":"2024-01-01T10:00:00Z","content_type":"product"}"#,
        )
        .unwrap();
        assert_eq!(item.score, Some(3.5));
        assert!(!item.is_article());
        assert_eq!(
            item.publish_time.map(|t| t.to_rfc3339()),
            Some("2024-01-01T10:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_missing_publisher_rejected() {
        let result: Result<FeedItem, _> = serde_json::from_str(r#"{"id":"a1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_item_count() {
        let item = FeedItem {
            id: "a1".into(),
            publisher: "p1".into(),
            title: None,
            url: None,
            img: None,
            category: None,
            publish_time: None,
            score: None,
            content_type: default_content_type(),
        };
        let feed = TodayFeed {
            hash: String::new(),
            featured: Some(item.clone()),
            articles: vec![item.clone(), item],
            publisher_count: 1,
            generated_at: Utc::now(),
        };
        assert_eq!(feed.item_count(), 3);
        assert!(!feed.is_empty());
    }
}
