use anyhow::Result;
use std::collections::HashMap;

use super::schema::Database;

/// Key prefix for per-publisher user overrides: `publisher.<id>.enabled`.
const PUBLISHER_PREFIX: &str = "publisher.";
const ENABLED_SUFFIX: &str = ".enabled";

fn override_key(publisher_id: &str) -> String {
    format!("{PUBLISHER_PREFIX}{publisher_id}{ENABLED_SUFFIX}")
}

impl Database {
    // ========================================================================
    // Publisher Override Operations
    // ========================================================================

    /// Load every stored publisher override as `publisher_id -> enabled`.
    ///
    /// Values other than `"true"`/`"false"` are skipped with a warning.
    pub async fn publisher_overrides(&self) -> Result<HashMap<String, bool>> {
        let pattern = format!("{}%{}", PUBLISHER_PREFIX, ENABLED_SUFFIX);
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM user_preferences WHERE key LIKE ? ORDER BY key")
                .bind(&pattern)
                .fetch_all(&self.pool)
                .await?;

        let mut overrides = HashMap::with_capacity(rows.len());
        for (key, value) in rows {
            let Some(id) = key
                .strip_prefix(PUBLISHER_PREFIX)
                .and_then(|rest| rest.strip_suffix(ENABLED_SUFFIX))
            else {
                continue;
            };
            match value.as_str() {
                "true" => {
                    overrides.insert(id.to_string(), true);
                }
                "false" => {
                    overrides.insert(id.to_string(), false);
                }
                other => {
                    tracing::warn!(key = %key, value = %other, "Ignoring malformed publisher override");
                }
            }
        }

        Ok(overrides)
    }

    /// Store (UPSERT) or clear the user's override for one publisher.
    ///
    /// `None` removes the override so the publisher default applies again.
    pub async fn set_publisher_override(
        &self,
        publisher_id: &str,
        enabled: Option<bool>,
    ) -> Result<()> {
        let key = override_key(publisher_id);
        match enabled {
            Some(enabled) => {
                sqlx::query(
                    r#"
                    INSERT INTO user_preferences (key, value, updated_at)
                    VALUES (?, ?, datetime('now'))
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
                )
                .bind(&key)
                .bind(if enabled { "true" } else { "false" })
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM user_preferences WHERE key = ?")
                    .bind(&key)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }
}
