use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::FocusError,
    models::{Session, SessionFilter, SessionReport, SessionStatus},
    store::SessionStore,
};

use super::report::build_report;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    pub session_id: String,
    pub user_id: String,
    pub duration_minutes: u32,
    pub start_time: DateTime<Utc>,
    pub status: SessionStatus,
}

/// Active → Completed state machine over stored session records.
///
/// Ending a session that is already completed is idempotent: the stored report
/// is returned unchanged and the end time is never rewritten.
#[derive(Clone)]
pub struct SessionLifecycle {
    store: SessionStore,
}

impl SessionLifecycle {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub async fn start(&self, user_id: &str, duration_minutes: u32) -> Result<SessionStarted, FocusError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(FocusError::InvalidInput("userId must not be empty".into()));
        }
        if duration_minutes == 0 {
            return Err(FocusError::InvalidInput(
                "durationMinutes must be greater than zero".into(),
            ));
        }

        let session = Session::new(
            Uuid::new_v4().to_string(),
            user_id.to_string(),
            duration_minutes,
            Utc::now(),
        );
        let session_id = self.store.create_session(&session).await?;
        info!("Started session {session_id} for user {user_id} ({duration_minutes} min)");

        Ok(SessionStarted {
            session_id,
            user_id: session.user_id,
            duration_minutes,
            start_time: session.start_time,
            status: session.status,
        })
    }

    pub async fn end(&self, session_id: &str) -> Result<SessionReport, FocusError> {
        let ended_at = Utc::now();
        let (report, newly_completed) = self
            .store
            .update_session(session_id, move |session| {
                if let Some(existing) = session.report.clone() {
                    return (existing, false);
                }
                let report = build_report(session, ended_at);
                session.complete(ended_at, report.clone());
                (report, true)
            })
            .await?;

        if newly_completed {
            info!(
                "Completed session {session_id}: focus {}s, distraction {}s",
                report.focus_time, report.distraction_time
            );
        } else {
            info!("Session {session_id} was already completed; returning stored report");
        }
        Ok(report)
    }

    pub async fn get(&self, session_id: &str) -> Result<Session, FocusError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| FocusError::NotFound(session_id.to_string()))
    }

    pub async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, FocusError> {
        self.store.list_sessions(filter).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{db::Database, models::ActivityLabel};

    fn lifecycle() -> (SessionLifecycle, SessionStore) {
        let store = SessionStore::new(Database::in_memory().unwrap());
        (SessionLifecycle::new(store.clone()), store)
    }

    #[tokio::test]
    async fn start_creates_active_session() {
        let (lifecycle, _) = lifecycle();
        let started = lifecycle.start("u1", 30).await.unwrap();
        assert_eq!(started.status, SessionStatus::Active);

        let session = lifecycle.get(&started.session_id).await.unwrap();
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.duration_minutes, 30);
        assert_eq!(session.start_time, started.start_time);
        assert!(session.is_consistent());
    }

    #[tokio::test]
    async fn start_rejects_bad_input() {
        let (lifecycle, _) = lifecycle();
        assert!(matches!(
            lifecycle.start("  ", 30).await,
            Err(FocusError::InvalidInput(_))
        ));
        assert!(matches!(
            lifecycle.start("u1", 0).await,
            Err(FocusError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn ids_are_unique_for_identical_input() {
        let (lifecycle, _) = lifecycle();
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            ids.insert(lifecycle.start("u1", 30).await.unwrap().session_id);
        }
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn end_unknown_session_is_not_found() {
        let (lifecycle, _) = lifecycle();
        assert!(matches!(
            lifecycle.end("does-not-exist").await,
            Err(FocusError::NotFound(_))
        ));
        assert!(matches!(
            lifecycle.get("does-not-exist").await,
            Err(FocusError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn end_completes_and_embeds_report() {
        let (lifecycle, store) = lifecycle();
        let id = lifecycle.start("u1", 30).await.unwrap().session_id;
        store
            .update_session(&id, |s| {
                s.credit(ActivityLabel::Focused, 3_000, Utc::now());
                s.credit(ActivityLabel::Absent, 2_000, Utc::now());
            })
            .await
            .unwrap();

        let report = lifecycle.end(&id).await.unwrap();
        assert_eq!(report.focus_time, 3);
        assert_eq!(report.distraction_time, 2);

        let session = lifecycle.get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.end_time.is_some());
        assert_eq!(session.report.as_ref(), Some(&report));
        assert!(session.is_consistent());
    }

    #[tokio::test]
    async fn repeated_end_returns_stored_report() {
        let (lifecycle, _) = lifecycle();
        let id = lifecycle.start("u1", 30).await.unwrap().session_id;

        let first = lifecycle.end(&id).await.unwrap();
        let end_time = lifecycle.get(&id).await.unwrap().end_time;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = lifecycle.end(&id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(lifecycle.get(&id).await.unwrap().end_time, end_time);
    }

    #[tokio::test]
    async fn concurrent_end_generates_one_report() {
        let (lifecycle, _) = lifecycle();
        let id = lifecycle.start("u1", 30).await.unwrap().session_id;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let lifecycle = lifecycle.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { lifecycle.end(&id).await }));
        }

        let mut reports = Vec::new();
        for handle in handles {
            reports.push(handle.await.unwrap().unwrap());
        }

        let stored = lifecycle.get(&id).await.unwrap();
        let stored_report = stored.report.unwrap();
        assert!(reports.iter().all(|r| *r == stored_report));
        assert_eq!(stored.end_time, Some(stored_report.generated_at));
    }

    #[tokio::test]
    async fn list_filters_by_user() {
        let (lifecycle, _) = lifecycle();
        lifecycle.start("u1", 30).await.unwrap();
        lifecycle.start("u1", 45).await.unwrap();
        lifecycle.start("u2", 30).await.unwrap();

        assert_eq!(lifecycle.list(&SessionFilter::default()).await.unwrap().len(), 3);
        assert_eq!(
            lifecycle.list(&SessionFilter::for_user("u1")).await.unwrap().len(),
            2
        );
    }
}
