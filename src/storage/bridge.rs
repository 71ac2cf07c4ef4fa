//! Typed, version-checked persistence of the presentation feed.
//!
//! The durable store only sees an opaque JSON blob under [`STORAGE_KEY`].
//! A record is trusted only when its `storageSchemaVersion` matches
//! [`STORAGE_SCHEMA_VERSION`]; anything else reads back as "nothing cached".
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::kv::KeyValueStore;
use crate::feed::TodayFeed;

/// Key under which the feed record lives in the durable store.
pub const STORAGE_KEY: &str = "today";

/// Bump whenever the serialized shape of [`TodayFeed`] changes.
pub const STORAGE_SCHEMA_VERSION: u32 = 1;

/// On-disk envelope around the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    #[serde(rename = "storageSchemaVersion")]
    pub storage_schema_version: u32,
    pub feed: TodayFeed,
}

/// Loose view used for validation: a missing or wrongly typed version must
/// not fail the parse of an otherwise readable blob.
#[derive(Deserialize)]
struct RecordHeader {
    #[serde(rename = "storageSchemaVersion")]
    storage_schema_version: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct StorageBridge {
    store: Arc<dyn KeyValueStore>,
}

impl StorageBridge {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read the persisted feed, if one exists and is schema-compatible.
    ///
    /// Never fails: read errors, malformed JSON, version mismatches and
    /// missing fields are all reported as `None` (and logged).
    pub async fn load(&self) -> Option<TodayFeed> {
        let raw = match self.store.get(STORAGE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(key = STORAGE_KEY, "No persisted feed");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = STORAGE_KEY, error = %e, "Failed to read persisted feed");
                return None;
            }
        };

        decode_record(&raw)
    }

    /// Persist `feed`, replacing any prior record.
    ///
    /// Errors are logged and swallowed; callers never observe them.
    pub async fn save(&self, feed: &TodayFeed) {
        if let Err(e) = self.try_save(feed).await {
            tracing::warn!(key = STORAGE_KEY, error = %e, "Failed to persist feed");
        }
    }

    /// Fire-and-forget [`save`](Self::save) on the current runtime.
    ///
    /// The write starts only after `previous` has finished, so chained saves
    /// land in the order they were scheduled and an older snapshot can never
    /// overwrite a newer one. Awaiting the returned handle awaits the chain.
    pub fn save_detached(
        &self,
        feed: Arc<TodayFeed>,
        previous: Option<JoinHandle<()>>,
    ) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    tracing::warn!(error = %e, "Previous feed save task failed");
                }
            }
            bridge.save(&feed).await
        })
    }

    async fn try_save(&self, feed: &TodayFeed) -> Result<()> {
        let record = PersistedRecord {
            storage_schema_version: STORAGE_SCHEMA_VERSION,
            feed: feed.clone(),
        };
        let raw = serde_json::to_string(&record).context("Failed to serialize feed record")?;
        self.store
            .set(STORAGE_KEY, &raw)
            .await
            .context("Failed to write feed record")?;
        tracing::debug!(key = STORAGE_KEY, bytes = raw.len(), hash = %feed.hash, "Persisted feed");
        Ok(())
    }
}

fn decode_record(raw: &str) -> Option<TodayFeed> {
    let header: RecordHeader = match serde_json::from_str(raw) {
        Ok(header) => header,
        Err(e) => {
            tracing::warn!(error = %e, "Persisted feed is not a JSON object, ignoring");
            return None;
        }
    };

    let version = header
        .storage_schema_version
        .as_ref()
        .and_then(serde_json::Value::as_u64);
    if version != Some(u64::from(STORAGE_SCHEMA_VERSION)) {
        tracing::info!(
            found = ?header.storage_schema_version,
            expected = STORAGE_SCHEMA_VERSION,
            "Persisted feed has an unsupported schema version, ignoring"
        );
        return None;
    }

    match serde_json::from_str::<PersistedRecord>(raw) {
        Ok(record) => Some(record.feed),
        Err(e) => {
            tracing::warn!(error = %e, "Persisted feed record is malformed, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedItem;
    use crate::storage::Database;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn sample_feed() -> TodayFeed {
        TodayFeed {
            hash: "abc123".to_string(),
            featured: Some(FeedItem {
                id: "a1".into(),
                publisher: "p1".into(),
                title: Some("Headline".into()),
                url: Some("https://example.com/a1".into()),
                img: None,
                category: Some("Top News".into()),
                publish_time: Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()),
                score: Some(4.0),
                content_type: "article".into(),
            }),
            articles: Vec::new(),
            publisher_count: 1,
            generated_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    async fn test_bridge() -> (Database, StorageBridge) {
        let db = Database::open(":memory:").await.unwrap();
        let bridge = StorageBridge::new(Arc::new(db.clone()));
        (db, bridge)
    }

    #[tokio::test]
    async fn test_load_empty_store() {
        let (_db, bridge) = test_bridge().await;
        assert_eq!(bridge.load().await, None);
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let (_db, bridge) = test_bridge().await;
        let feed = sample_feed();
        bridge.save(&feed).await;
        assert_eq!(bridge.load().await, Some(feed));
    }

    #[tokio::test]
    async fn test_save_twice_is_idempotent() {
        let (_db, bridge) = test_bridge().await;
        let feed = sample_feed();
        bridge.save(&feed).await;
        bridge.save(&feed).await;
        assert_eq!(bridge.load().await, Some(feed));
    }

    #[tokio::test]
    async fn test_saved_record_carries_schema_version() {
        let (db, bridge) = test_bridge().await;
        bridge.save(&sample_feed()).await;

        let raw = db.get(STORAGE_KEY).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["storageSchemaVersion"], 1);
        assert_eq!(value["feed"]["hash"], "abc123");
    }

    #[tokio::test]
    async fn test_version_mismatch_is_absent() {
        let (db, bridge) = test_bridge().await;
        let mut value = serde_json::to_value(PersistedRecord {
            storage_schema_version: STORAGE_SCHEMA_VERSION,
            feed: sample_feed(),
        })
        .unwrap();
        value["storageSchemaVersion"] = serde_json::json!(2);
        db.set(STORAGE_KEY, &value.to_string()).await.unwrap();

        assert_eq!(bridge.load().await, None);
    }

    #[tokio::test]
    async fn test_missing_version_is_absent() {
        let (db, bridge) = test_bridge().await;
        let value = serde_json::json!({ "feed": sample_feed() });
        db.set(STORAGE_KEY, &value.to_string()).await.unwrap();

        assert_eq!(bridge.load().await, None);
    }

    #[tokio::test]
    async fn test_string_version_is_absent() {
        let (db, bridge) = test_bridge().await;
        let value = serde_json::json!({ "storageSchemaVersion": "1", "feed": sample_feed() });
        db.set(STORAGE_KEY, &value.to_string()).await.unwrap();

        assert_eq!(bridge.load().await, None);
    }

    #[tokio::test]
    async fn test_missing_feed_is_absent() {
        let (db, bridge) = test_bridge().await;
        db.set(STORAGE_KEY, r#"{"storageSchemaVersion":1}"#)
            .await
            .unwrap();

        assert_eq!(bridge.load().await, None);
    }

    #[tokio::test]
    async fn test_garbage_is_absent() {
        let (db, bridge) = test_bridge().await;
        db.set(STORAGE_KEY, "not json at all").await.unwrap();
        assert_eq!(bridge.load().await, None);

        db.set(STORAGE_KEY, "[1,2,3]").await.unwrap();
        assert_eq!(bridge.load().await, None);
    }

    #[tokio::test]
    async fn test_save_detached_completes() {
        let (_db, bridge) = test_bridge().await;
        let feed = Arc::new(sample_feed());
        bridge.save_detached(Arc::clone(&feed), None).await.unwrap();
        assert_eq!(bridge.load().await.as_ref(), Some(&*feed));
    }

    /// Store whose first write stalls, so an unordered second write would win.
    struct SlowFirstWrite {
        db: Database,
        writes: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for SlowFirstWrite {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.db.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            let n = self
                .writes
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            self.db.set(key, value).await
        }
    }

    #[tokio::test]
    async fn test_chained_saves_keep_latest_snapshot() {
        let db = Database::open(":memory:").await.unwrap();
        let bridge = StorageBridge::new(Arc::new(SlowFirstWrite {
            db: db.clone(),
            writes: std::sync::atomic::AtomicUsize::new(0),
        }));

        let older = Arc::new(sample_feed());
        let newer = Arc::new(TodayFeed {
            hash: "def456".to_string(),
            ..sample_feed()
        });

        let first = bridge.save_detached(older, None);
        let second = bridge.save_detached(Arc::clone(&newer), Some(first));
        second.await.unwrap();

        assert_eq!(bridge.load().await.as_ref(), Some(&*newer));
    }
}
