use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

use super::types::{Publisher, PublisherMap};
use super::PublisherProvider;
use crate::feed::{get_json, FetchError};
use crate::storage::Database;

/// Capacity of the change channel; slow subscribers see `Lagged` beyond this.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Publisher list sizes are small; anything larger is almost certainly wrong.
const MAX_PUBLISHERS_SIZE: usize = 2 * 1024 * 1024;

/// Publisher provider backed by a remote JSON list and local user overrides.
///
/// The server list is fetched once and cached; overrides stored in the
/// database are layered on top on every read so a preference change is
/// visible immediately.
pub struct RemotePublishers {
    client: reqwest::Client,
    url: String,
    db: Option<Database>,
    timeout: Option<Duration>,
    /// Server list as last fetched, without overrides
    cache: Mutex<Option<PublisherMap>>,
    changes: broadcast::Sender<PublisherMap>,
}

impl RemotePublishers {
    pub fn new(client: reqwest::Client, url: impl Into<String>, db: Option<Database>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            client,
            url: url.into(),
            db,
            timeout: None,
            cache: Mutex::new(None),
            changes,
        }
    }

    /// Bound each publisher list request by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Re-fetch the server list and notify subscribers on success.
    ///
    /// On failure the previous list stays cached and nobody is notified.
    pub async fn update(&self) -> Option<PublisherMap> {
        let fresh = {
            let mut cache = self.cache.lock().await;
            let fresh = self.fetch().await.ok()?;
            *cache = Some(fresh.clone());
            fresh
        };

        let map = self.with_overrides(fresh).await;
        self.notify(&map);
        Some(map)
    }

    /// Record the user's choice for one publisher and notify subscribers.
    ///
    /// `None` clears the override so the server default applies again.
    pub async fn set_user_enabled(&self, publisher_id: &str, enabled: Option<bool>) -> Result<()> {
        let db = self
            .db
            .as_ref()
            .context("No preference store configured for publisher overrides")?;
        db.set_publisher_override(publisher_id, enabled)
            .await
            .with_context(|| format!("Failed to store override for publisher '{publisher_id}'"))?;
        tracing::info!(publisher = %publisher_id, enabled = ?enabled, "Publisher preference changed");

        if let Some(map) = self.get_or_fetch().await {
            self.notify(&map);
        }
        Ok(())
    }

    async fn fetch(&self) -> Result<PublisherMap, FetchError> {
        let list: Vec<Publisher> =
            match get_json(&self.client, &self.url, MAX_PUBLISHERS_SIZE, self.timeout).await {
                Ok(list) => list,
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "Failed to fetch publishers");
                    return Err(e);
                }
            };

        let map: PublisherMap = list
            .into_iter()
            .map(|p| (p.publisher_id.clone(), p))
            .collect();
        tracing::debug!(url = %self.url, publishers = map.len(), "Fetched publishers");
        Ok(map)
    }

    async fn with_overrides(&self, mut map: PublisherMap) -> PublisherMap {
        let Some(db) = &self.db else {
            return map;
        };

        match db.publisher_overrides().await {
            Ok(overrides) => {
                for (id, enabled) in overrides {
                    if let Some(publisher) = map.get_mut(&id) {
                        publisher.user_enabled = Some(enabled);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load publisher overrides, using server defaults");
            }
        }
        map
    }

    fn notify(&self, map: &PublisherMap) {
        match self.changes.send(map.clone()) {
            Ok(receivers) => tracing::debug!(receivers, "Notified publisher change"),
            Err(_) => tracing::debug!("Publisher change with no subscribers"),
        }
    }
}

#[async_trait]
impl PublisherProvider for RemotePublishers {
    async fn get_or_fetch(&self) -> Option<PublisherMap> {
        let server = {
            let mut cache = self.cache.lock().await;
            match cache.as_ref() {
                Some(map) => map.clone(),
                None => {
                    let fresh = self.fetch().await.ok()?;
                    *cache = Some(fresh.clone());
                    fresh
                }
            }
        };

        Some(self.with_overrides(server).await)
    }

    fn subscribe(&self) -> broadcast::Receiver<PublisherMap> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PUBLISHERS: &str = r#"[
        {"publisher_id":"p1","publisher_name":"One","category":"Top News","enabled":true},
        {"publisher_id":"p2","publisher_name":"Two","category":"Tech","enabled":false}
    ]"#;

    async fn mount_publishers(server: &MockServer, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/publishers.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PUBLISHERS))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn provider(server: &MockServer, db: Option<Database>) -> RemotePublishers {
        RemotePublishers::new(
            reqwest::Client::new(),
            format!("{}/publishers.json", server.uri()),
            db,
        )
    }

    #[tokio::test]
    async fn test_get_or_fetch_fetches_once() {
        let server = MockServer::start().await;
        mount_publishers(&server, 1).await;
        let publishers = provider(&server, None);

        let first = publishers.get_or_fetch().await.unwrap();
        let second = publishers.get_or_fetch().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(first["p1"].enabled);
        assert!(!first["p2"].enabled);
    }

    #[tokio::test]
    async fn test_fetch_failure_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let publishers = provider(&server, None);
        assert!(publishers.get_or_fetch().await.is_none());
    }

    #[tokio::test]
    async fn test_overrides_layered_on_server_list() {
        let server = MockServer::start().await;
        mount_publishers(&server, 1).await;
        let db = Database::open(":memory:").await.unwrap();
        db.set_publisher_override("p2", Some(true)).await.unwrap();
        db.set_publisher_override("unknown", Some(false)).await.unwrap();

        let publishers = provider(&server, Some(db));
        let map = publishers.get_or_fetch().await.unwrap();
        assert_eq!(map["p2"].user_enabled, Some(true));
        assert!(map["p2"].is_content_allowed());
        assert_eq!(map["p1"].user_enabled, None);
        assert!(!map.contains_key("unknown"));
    }

    #[tokio::test]
    async fn test_set_user_enabled_notifies() {
        let server = MockServer::start().await;
        mount_publishers(&server, 1).await;
        let db = Database::open(":memory:").await.unwrap();
        let publishers = provider(&server, Some(db));
        let mut rx = publishers.subscribe();

        publishers.set_user_enabled("p1", Some(false)).await.unwrap();

        let changed = rx.recv().await.unwrap();
        assert_eq!(changed["p1"].user_enabled, Some(false));
        assert!(!changed["p1"].is_content_allowed());
    }

    #[tokio::test]
    async fn test_set_user_enabled_without_db_fails() {
        let server = MockServer::start().await;
        let publishers = provider(&server, None);
        assert!(publishers.set_user_enabled("p1", Some(true)).await.is_err());
    }

    #[tokio::test]
    async fn test_update_refetches_and_notifies() {
        let server = MockServer::start().await;
        mount_publishers(&server, 2).await;
        let publishers = provider(&server, None);
        let mut rx = publishers.subscribe();

        publishers.get_or_fetch().await.unwrap();
        let updated = publishers.update().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), updated);
    }
}
