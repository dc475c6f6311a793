use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::db::{
    connection::Database,
    helpers::{now_ms, ttl_to_ms},
};

/// Live-value predicate shared by every read: rows past their expiry are
/// invisible even before the purge task deletes them.
const LIVE: &str = "(expires_at_ms IS NULL OR expires_at_ms > ?2)";

impl Database {
    pub async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    &format!("SELECT value FROM kv_entries WHERE key = ?1 AND {LIVE}"),
                    params![key, now_ms()],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .context("failed to read key")?;
            Ok(value)
        })
        .await
    }

    /// Writes `value` under `key`, replacing any previous value and expiry.
    pub async fn kv_put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let key = key.to_string();
        let ttl_ms = ttl.map(ttl_to_ms).transpose()?;
        self.execute(move |conn| {
            let expires_at_ms = ttl_ms.map(|ms| now_ms().saturating_add(ms));
            conn.execute(
                "INSERT INTO kv_entries (key, value, expires_at_ms, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     expires_at_ms = excluded.expires_at_ms,
                     updated_at = excluded.updated_at",
                params![key, value, expires_at_ms, Utc::now().to_rfc3339()],
            )
            .context("failed to write key")?;
            Ok(())
        })
        .await
    }

    /// Inserts a non-expiring value only if no live value exists. Returns
    /// `false` when the key is already taken.
    pub async fn kv_insert_new(&self, key: &str, value: String) -> Result<bool> {
        let key = key.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "INSERT INTO kv_entries (key, value, expires_at_ms, updated_at)
                     VALUES (?1, ?3, NULL, ?4)
                     ON CONFLICT(key) DO UPDATE SET
                         value = excluded.value,
                         expires_at_ms = NULL,
                         updated_at = excluded.updated_at
                     WHERE kv_entries.expires_at_ms IS NOT NULL
                       AND kv_entries.expires_at_ms <= ?2",
                    params![key, now_ms(), value, Utc::now().to_rfc3339()],
                )
                .context("failed to insert key")?;
            Ok(changed == 1)
        })
        .await
    }

    /// Atomic read-modify-write of one key.
    ///
    /// `mutate` sees the live value (if any) and returns the value to store
    /// (`None` leaves the row untouched) plus a result for the caller. The read
    /// and the write share one `IMMEDIATE` transaction. An existing expiry is
    /// kept; a freshly created value never expires.
    pub async fn kv_update<F, R>(&self, key: &str, mutate: F) -> Result<R>
    where
        F: FnOnce(Option<&str>) -> Result<(Option<String>, R)> + Send + 'static,
        R: Send + 'static,
    {
        let key = key.to_string();
        self.execute(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("failed to open update transaction")?;

            let current: Option<String> = tx
                .query_row(
                    &format!("SELECT value FROM kv_entries WHERE key = ?1 AND {LIVE}"),
                    params![key, now_ms()],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to read key for update")?;

            let existed = current.is_some();
            let (next, outcome) = mutate(current.as_deref())?;

            if let Some(value) = next {
                let updated_at = Utc::now().to_rfc3339();
                if existed {
                    tx.execute(
                        "UPDATE kv_entries SET value = ?1, updated_at = ?2 WHERE key = ?3",
                        params![value, updated_at, key],
                    )
                    .context("failed to update key")?;
                } else {
                    tx.execute(
                        "INSERT INTO kv_entries (key, value, expires_at_ms, updated_at)
                         VALUES (?1, ?2, NULL, ?3)
                         ON CONFLICT(key) DO UPDATE SET
                             value = excluded.value,
                             expires_at_ms = NULL,
                             updated_at = excluded.updated_at",
                        params![key, value, updated_at],
                    )
                    .context("failed to insert key")?;
                }
            }

            tx.commit().context("failed to commit update")?;
            Ok(outcome)
        })
        .await
    }

    /// Every live `(key, value)` pair whose key starts with `prefix`, in key
    /// order. Linear in the number of stored keys.
    pub async fn kv_scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let prefix = prefix.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT key, value FROM kv_entries
                 WHERE substr(key, 1, length(?1)) = ?1 AND {LIVE}
                 ORDER BY key"
            ))?;

            let mut rows = stmt.query(params![prefix, now_ms()])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push((row.get::<_, String>(0)?, row.get::<_, String>(1)?));
            }
            Ok(entries)
        })
        .await
    }

    /// Deletes rows whose expiry has passed. Returns the number removed.
    pub async fn kv_purge_expired(&self) -> Result<usize> {
        self.execute(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM kv_entries
                     WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?1",
                    params![now_ms()],
                )
                .context("failed to purge expired keys")?;
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let db = Database::in_memory().unwrap();
        db.kv_put("a", "1".into(), None).await.unwrap();
        assert_eq!(db.kv_get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(db.kv_get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_values_are_invisible_then_purged() {
        let db = Database::in_memory().unwrap();
        db.kv_put("tmp", "x".into(), Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(db.kv_get("tmp").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(db.kv_get("tmp").await.unwrap().is_none());
        assert_eq!(db.kv_purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn insert_new_refuses_live_key() {
        let db = Database::in_memory().unwrap();
        assert!(db.kv_insert_new("k", "first".into()).await.unwrap());
        assert!(!db.kv_insert_new("k", "second".into()).await.unwrap());
        assert_eq!(db.kv_get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn insert_new_reclaims_expired_key() {
        let db = Database::in_memory().unwrap();
        db.kv_put("k", "old".into(), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(db.kv_insert_new("k", "new".into()).await.unwrap());
        assert_eq!(db.kv_get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_writes() {
        let db = Database::in_memory().unwrap();
        db.kv_put("counter", "0".into(), None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.kv_update("counter", |current| {
                    let n: u64 = current.unwrap_or("0").parse()?;
                    Ok((Some((n + 1).to_string()), ()))
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(db.kv_get("counter").await.unwrap().as_deref(), Some("50"));
    }

    #[tokio::test]
    async fn update_returning_none_leaves_value() {
        let db = Database::in_memory().unwrap();
        db.kv_put("k", "v".into(), None).await.unwrap();
        let seen = db
            .kv_update("k", |current| Ok((None, current.map(str::to_string))))
            .await
            .unwrap();
        assert_eq!(seen.as_deref(), Some("v"));
        assert_eq!(db.kv_get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn scan_matches_prefix_only() {
        let db = Database::in_memory().unwrap();
        db.kv_put("session:1", "a".into(), None).await.unwrap();
        db.kv_put("session:2", "b".into(), None).await.unwrap();
        db.kv_put("other:1", "c".into(), None).await.unwrap();

        let keys: Vec<String> = db
            .kv_scan_prefix("session:")
            .await
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["session:1", "session:2"]);
    }
}
