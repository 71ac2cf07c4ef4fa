use anyhow::Result;
use async_trait::async_trait;

use super::schema::Database;

/// Async get/set of opaque string blobs that survive process restarts.
///
/// Only these two operations are relied upon; no multi-key transactions.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace any prior value stored under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[async_trait]
impl KeyValueStore for Database {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let db = test_db().await;
        assert_eq!(db.get("today").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let db = test_db().await;
        db.set("today", "{}").await.unwrap();
        assert_eq!(db.get("today").await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_set_replaces_prior_value() {
        let db = test_db().await;
        db.set("today", "first").await.unwrap();
        db.set("today", "second").await.unwrap();
        assert_eq!(db.get("today").await.unwrap().as_deref(), Some("second"));

        let rows: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv_store")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(rows.0, 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let db = test_db().await;
        db.set("today", "a").await.unwrap();
        db.set("other", "b").await.unwrap();
        assert_eq!(db.get("today").await.unwrap().as_deref(), Some("a"));
        assert_eq!(db.get("other").await.unwrap().as_deref(), Some("b"));
    }
}
