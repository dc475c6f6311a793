use chrono::{DateTime, Utc};

use crate::models::{Session, SessionReport};

fn whole_seconds(ms: u64) -> u64 {
    ms / 1000
}

/// Builds the final report from the counters accumulated on the session.
pub fn build_report(session: &Session, generated_at: DateTime<Utc>) -> SessionReport {
    SessionReport {
        session_id: session.id.clone(),
        focus_time: whole_seconds(session.focus_ms),
        distraction_time: whole_seconds(session.distraction_ms),
        activity_breakdown: session
            .activity_ms
            .iter()
            .map(|(label, ms)| (*label, whole_seconds(*ms)))
            .collect(),
        generated_at,
    }
}
