//! crates/snore_core/src/calendar.rs
//!
//! Date-bucketed views over a user's sessions. Nothing here is persisted; every
//! view is rebuilt from the session rows on demand.

use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{DaySummary, Session, SessionStatus};
use crate::ports::{PortResult, SessionStore};

#[derive(Clone)]
pub struct CalendarAggregator {
    store: Arc<dyn SessionStore>,
}

impl CalendarAggregator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Every session of the caller attributed to `date`, open ones included, newest
    /// first.
    pub async fn list_by_date(&self, caller_id: Uuid, date: NaiveDate) -> PortResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .store
            .list_sessions_for_user(caller_id)
            .await?
            .into_iter()
            .filter(|s| s.bucket_date() == date)
            .collect();
        sessions.sort_by(newest_first);
        Ok(sessions)
    }

    /// Per-day snore totals of finalized sessions in `[from, to]`. Days without a
    /// finalized session are left out.
    pub async fn summary(
        &self,
        caller_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> PortResult<Vec<DaySummary>> {
        let sessions = self.store.list_sessions_for_user(caller_id).await?;
        Ok(summarize(&sessions, from, to))
    }
}

/// Orders by the session's end (or start) descending, sessions with neither last,
/// then by id for a stable result.
fn newest_first(a: &Session, b: &Session) -> Ordering {
    let key = |s: &Session| s.ended_at.or(s.started_at);
    match (key(a), key(b)) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.id.cmp(&a.id))
}

fn summarize(sessions: &[Session], from: NaiveDate, to: NaiveDate) -> Vec<DaySummary> {
    let mut daily: BTreeMap<NaiveDate, (u64, u64)> = BTreeMap::new();
    for session in sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Finalized)
    {
        let date = session.bucket_date();
        if date < from || date > to {
            continue;
        }
        let entry = daily.entry(date).or_default();
        entry.0 += u64::from(session.snore_count);
        entry.1 += u64::from(session.snore_total_sec);
    }

    daily
        .into_iter()
        .map(|(date, (count, total_sec))| DaySummary {
            date,
            snore: count > 0,
            count,
            total_sec,
        })
        .collect()
}
