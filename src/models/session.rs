use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::activity::ActivityLabel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

/// Final per-session aggregate, embedded in the session record on completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    /// Whole seconds.
    pub focus_time: u64,
    /// Whole seconds.
    pub distraction_time: u64,
    pub activity_breakdown: BTreeMap<ActivityLabel, u64>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub duration_minutes: u32,
    pub start_time: DateTime<Utc>,
    pub status: SessionStatus,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub focus_ms: u64,
    #[serde(default)]
    pub distraction_ms: u64,
    #[serde(default)]
    pub activity_ms: BTreeMap<ActivityLabel, u64>,
    pub report: Option<SessionReport>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: String, user_id: String, duration_minutes: u32, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            duration_minutes,
            start_time,
            status: SessionStatus::Active,
            end_time: None,
            focus_ms: 0,
            distraction_ms: 0,
            activity_ms: BTreeMap::new(),
            report: None,
            updated_at: start_time,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// End time and report are present exactly when the session is completed.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            SessionStatus::Active => self.end_time.is_none() && self.report.is_none(),
            SessionStatus::Completed => self.end_time.is_some() && self.report.is_some(),
        }
    }

    /// Adds one measurement interval to the running counters.
    pub fn credit(&mut self, label: ActivityLabel, elapsed_ms: u64, at: DateTime<Utc>) {
        if label.is_focus() {
            self.focus_ms = self.focus_ms.saturating_add(elapsed_ms);
        } else if label.is_distraction() {
            self.distraction_ms = self.distraction_ms.saturating_add(elapsed_ms);
        }
        let slot = self.activity_ms.entry(label).or_insert(0);
        *slot = slot.saturating_add(elapsed_ms);
        self.updated_at = at;
    }

    pub fn complete(&mut self, end_time: DateTime<Utc>, report: SessionReport) {
        self.status = SessionStatus::Completed;
        self.end_time = Some(end_time);
        self.report = Some(report);
        self.updated_at = end_time;
    }
}

/// Row shape for session listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub user_id: String,
    pub duration_minutes: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub focus_time: u64,
    pub distraction_time: u64,
}

impl From<Session> for SessionSummary {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id,
            duration_minutes: session.duration_minutes,
            start_time: session.start_time,
            end_time: session.end_time,
            status: session.status,
            focus_time: session.focus_ms / 1000,
            distraction_time: session.distraction_ms / 1000,
        }
    }
}

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFilter {
    pub user_id: Option<String>,
    pub status: Option<SessionStatus>,
}

impl SessionFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            status: None,
        }
    }

    pub fn matches(&self, session: &Session) -> bool {
        let user_ok = self
            .user_id
            .as_deref()
            .map_or(true, |user| session.user_id == user);
        let status_ok = self.status.map_or(true, |status| session.status == status);
        user_ok && status_ok
    }
}
