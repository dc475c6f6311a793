//! Typed access to the key/value database for session and activity records.
//!
//! Key schema:
//! - `session:<id>` holds the JSON session record and never expires.
//! - `session:<id>:activity` holds the latest activity snapshot with its own
//!   expiry, independent of the session record.

use std::time::Duration;

use anyhow::Context;
use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    db::Database,
    error::FocusError,
    models::{ActivityRecord, Session, SessionFilter},
};

const SESSION_PREFIX: &str = "session:";
const ACTIVITY_SUFFIX: &str = ":activity";

pub fn session_key(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

pub fn activity_key(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}{ACTIVITY_SUFFIX}")
}

/// True for `session:<id>` keys, false for derived keys such as the activity
/// snapshot.
fn is_session_record_key(key: &str) -> bool {
    key.strip_prefix(SESSION_PREFIX)
        .map_or(false, |rest| !rest.is_empty() && !rest.contains(':'))
}

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_session(&self, session: &Session) -> Result<String, FocusError> {
        let raw = serde_json::to_string(session)?;
        let inserted = self.db.kv_insert_new(&session_key(&session.id), raw).await?;
        if !inserted {
            return Err(FocusError::Store(format!(
                "session id {} is already in use",
                session.id
            )));
        }
        Ok(session.id.clone())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, FocusError> {
        if !is_session_record_key(&session_key(session_id)) {
            return Ok(None);
        }
        match self.db.kv_get(&session_key(session_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Applies `mutator` to the stored session inside one atomic transaction.
    /// The record is rewritten only when the mutator changed it.
    pub async fn update_session<F, T>(&self, session_id: &str, mutator: F) -> Result<T, FocusError>
    where
        F: FnOnce(&mut Session) -> T + Send + 'static,
        T: Send + 'static,
    {
        // Ids with a `:` would address a derived key, never a session record.
        if !is_session_record_key(&session_key(session_id)) {
            return Err(FocusError::NotFound(session_id.to_string()));
        }
        let outcome = self
            .db
            .kv_update(&session_key(session_id), move |current| {
                let Some(raw) = current else {
                    return Ok((None, None));
                };
                let mut session: Session =
                    serde_json::from_str(raw).context("corrupt session record")?;
                let before = session.clone();
                let result = mutator(&mut session);
                let next = if session != before {
                    Some(serde_json::to_string(&session)?)
                } else {
                    None
                };
                Ok((next, Some(result)))
            })
            .await?;

        outcome.ok_or_else(|| FocusError::NotFound(session_id.to_string()))
    }

    pub async fn put_activity(
        &self,
        session_id: &str,
        record: &ActivityRecord,
        ttl: Duration,
    ) -> Result<(), FocusError> {
        let raw = serde_json::to_string(record)?;
        self.db
            .kv_put(&activity_key(session_id), raw, Some(ttl))
            .await?;
        Ok(())
    }

    /// Latest snapshot, or `None` once its validity window has passed.
    pub async fn get_activity(&self, session_id: &str) -> Result<Option<ActivityRecord>, FocusError> {
        match self.db.kv_get(&activity_key(session_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Scans the whole session namespace; not meant for hot paths. Newest
    /// sessions first.
    pub async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, FocusError> {
        let entries = self.db.kv_scan_prefix(SESSION_PREFIX).await?;

        let mut sessions = Vec::new();
        for (key, raw) in entries {
            if !is_session_record_key(&key) {
                continue;
            }
            match serde_json::from_str::<Session>(&raw) {
                Ok(session) if filter.matches(&session) => sessions.push(session),
                Ok(_) => {}
                Err(err) => warn!("Skipping unreadable record {key}: {err}"),
            }
        }

        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    pub async fn purge_expired(&self) -> Result<usize, FocusError> {
        Ok(self.db.kv_purge_expired().await?)
    }
}

/// Periodically deletes expired snapshots so the table does not grow with
/// every stream ever opened.
pub fn spawn_purge_task(
    store: SessionStore,
    every: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(removed) => debug!("Purged {removed} expired keys"),
                        Err(err) => warn!("Expired key purge failed: {err}"),
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    })
}
