//! crates/snore_core/src/engine.rs
//!
//! The session lifecycle: creation, clip accumulation while open, the one-way
//! finalize transition that freezes the nightly report, and owner-scoped deletion.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::advice::build_advice;
use crate::domain::{
    AudioFormat, Clip, ClipBounds, FinalizeOverrides, NewClip, Session, SessionSnapshot,
    SessionStatus, SleepQuality, COUNTER_LIMIT,
};
use crate::ports::{BlobStore, FinalizeOutcome, PortError, PortResult, SessionStore};

const MAX_FINALIZE_ATTEMPTS: usize = 5;

/// An uploaded audio file as declared by the client.
#[derive(Debug, Clone)]
pub struct ClipUpload {
    pub file_name: String,
    pub data: Bytes,
}

#[derive(Clone)]
pub struct SessionEngine {
    store: Arc<dyn SessionStore>,
    blobs: Arc<dyn BlobStore>,
}

impl SessionEngine {
    pub fn new(store: Arc<dyn SessionStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    pub async fn create_session(
        &self,
        user_id: Uuid,
        started_at: Option<DateTime<Utc>>,
    ) -> PortResult<Session> {
        let session = self
            .store
            .create_session(Session::open(user_id, started_at))
            .await?;
        info!(session_id = %session.id, %user_id, "Session opened");
        Ok(session)
    }

    /// Stores the clip audio and records the clip against an open session.
    pub async fn append_clip(
        &self,
        session_id: Uuid,
        caller_id: Uuid,
        bounds: ClipBounds,
        upload: ClipUpload,
    ) -> PortResult<Clip> {
        let session = self.owned_session(session_id, caller_id).await?;
        if !session.is_open() {
            return Err(PortError::InvalidState("session already finalized".to_string()));
        }
        let format = AudioFormat::from_file_name(&upload.file_name)?;
        let confidence = bounds.validate()?;
        let duration_sec = bounds.duration_sec();

        // Each clip gets its own blob, so the write needs no coordination.
        let blob_ref = self.blobs.store_blob(upload.data, format).await?;

        let new_clip = NewClip {
            session_id,
            blob_ref: blob_ref.clone(),
            start_sec: bounds.start_sec,
            end_sec: bounds.end_sec,
            duration_sec,
            confidence,
        };
        match self.store.append_clip(new_clip).await {
            Ok(clip) => {
                info!(%session_id, clip_id = %clip.id, duration_sec, "Clip recorded");
                Ok(clip)
            }
            Err(e) => {
                self.discard_blob(&blob_ref).await;
                Err(e)
            }
        }
    }

    /// Freezes the nightly report. Succeeds once per session; later calls fail
    /// with `InvalidState`.
    pub async fn finalize(
        &self,
        session_id: Uuid,
        caller_id: Uuid,
        overrides: FinalizeOverrides,
    ) -> PortResult<SessionSnapshot> {
        validate_overrides(&overrides)?;

        for attempt in 1..=MAX_FINALIZE_ATTEMPTS {
            let current = self.owned_session(session_id, caller_id).await?;
            if !current.is_open() {
                return Err(PortError::InvalidState("already finalized".to_string()));
            }
            let report = compute_report(&current, &overrides);

            match self.store.finalize_session(&current, &report).await? {
                FinalizeOutcome::Applied(session) => {
                    info!(
                        %session_id,
                        snore_count = session.snore_count,
                        quality = session.sleep_quality.map(|q| q.as_str()).unwrap_or("unknown"),
                        "Session finalized"
                    );
                    let clips = self.store.list_clips(session_id).await?;
                    return Ok(SessionSnapshot { session, clips });
                }
                FinalizeOutcome::Conflict => {
                    warn!(%session_id, attempt, "Session changed during finalize, retrying");
                }
            }
        }

        Err(PortError::Conflict(format!(
            "session {} kept changing during finalize",
            session_id
        )))
    }

    pub async fn get_session(&self, session_id: Uuid, caller_id: Uuid) -> PortResult<SessionSnapshot> {
        let session = self.owned_session(session_id, caller_id).await?;
        let clips = self.store.list_clips(session_id).await?;
        Ok(SessionSnapshot { session, clips })
    }

    /// Deletes the session, its clips and their audio. Missing audio is tolerated.
    pub async fn delete_session(&self, session_id: Uuid, caller_id: Uuid) -> PortResult<()> {
        self.owned_session(session_id, caller_id).await?;

        let clips = self.store.list_clips(session_id).await?;
        for clip in &clips {
            self.discard_blob(&clip.blob_ref).await;
        }
        let removed = self.store.delete_session(session_id).await?;

        // Clips committed after the listing above are only known once their rows are gone.
        let late: Vec<&String> = removed
            .iter()
            .filter(|blob_ref| !clips.iter().any(|c| &c.blob_ref == *blob_ref))
            .collect();
        for blob_ref in &late {
            self.discard_blob(blob_ref).await;
        }

        info!(%session_id, clips = removed.len(), late = late.len(), "Session deleted");
        Ok(())
    }

    pub async fn delete_clip(
        &self,
        session_id: Uuid,
        clip_id: Uuid,
        caller_id: Uuid,
    ) -> PortResult<()> {
        self.owned_session(session_id, caller_id).await?;

        let clip = match self.store.get_clip(clip_id).await {
            Ok(clip) if clip.session_id == session_id => clip,
            Ok(_) | Err(PortError::NotFound(_)) => {
                return Err(PortError::NotFound("clip not found".to_string()))
            }
            Err(e) => return Err(e),
        };

        self.discard_blob(&clip.blob_ref).await;
        self.store.delete_clip(clip_id).await?;

        info!(%session_id, %clip_id, "Clip deleted");
        Ok(())
    }

    /// Loads a session on behalf of `caller_id`. Absence and foreign ownership are
    /// reported identically.
    async fn owned_session(&self, session_id: Uuid, caller_id: Uuid) -> PortResult<Session> {
        match self.store.get_session(session_id).await {
            Ok(session) if session.user_id == caller_id => Ok(session),
            Ok(_) | Err(PortError::NotFound(_)) => {
                Err(PortError::NotFound("session not found".to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn discard_blob(&self, blob_ref: &str) {
        if let Err(e) = self.blobs.delete_blob(blob_ref).await {
            warn!(blob_ref, error = %e, "Failed to delete clip audio");
        }
    }
}

fn validate_overrides(overrides: &FinalizeOverrides) -> PortResult<()> {
    let counters = [overrides.snore_count, overrides.snore_total_sec];
    if counters.into_iter().flatten().any(|v| v > COUNTER_LIMIT) {
        return Err(PortError::InvalidFormat(format!(
            "snore_count and snore_total_sec must not exceed {}",
            COUNTER_LIMIT
        )));
    }
    if let Some(hours) = overrides.sleep_duration {
        if !hours.is_finite() || hours < 0.0 {
            return Err(PortError::InvalidFormat(
                "sleep_duration must be a non-negative number of hours".to_string(),
            ));
        }
    }
    Ok(())
}

/// Applies the overrides to an open session and derives every report field the
/// caller left unset. The returned session is finalized.
pub fn compute_report(session: &Session, overrides: &FinalizeOverrides) -> Session {
    let mut report = session.clone();

    if let Some(started_at) = overrides.started_at {
        report.started_at = Some(started_at);
    }
    if let Some(ended_at) = overrides.ended_at {
        report.ended_at = Some(ended_at);
    }
    if let Some(count) = overrides.snore_count {
        report.snore_count = count;
    }
    if let Some(total) = overrides.snore_total_sec {
        report.snore_total_sec = total;
    }
    report.has_snore = report.snore_count > 0;

    report.sleep_duration = overrides
        .sleep_duration
        .or_else(|| derive_sleep_hours(report.started_at, report.ended_at));

    report.sleep_quality = overrides.sleep_quality.or_else(|| {
        SleepQuality::assess(report.snore_count, report.snore_total_sec, report.sleep_duration)
    });

    report.advice = match overrides.advice.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Some(text.to_string()),
        _ => Some(build_advice(report.snore_count, report.snore_total_sec)),
    };

    report.status = SessionStatus::Finalized;
    report
}

/// Hours between the two timestamps, rounded to one decimal. Needs both ends and a
/// non-negative span.
fn derive_sleep_hours(
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
) -> Option<f64> {
    let (start, end) = (started_at?, ended_at?);
    let seconds = (end - start).num_milliseconds() as f64 / 1000.0;
    if seconds < 0.0 {
        return None;
    }
    Some(round_to_tenth(seconds / 3600.0))
}

/// Rounds to one decimal from the exact binary value, ties to even: 1.25 becomes
/// 1.2 and 0.15 (stored just below) becomes 0.1.
fn round_to_tenth(value: f64) -> f64 {
    format!("{:.1}", value).parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_timestamp;
    use crate::memory::{MemoryBlobStore, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct Harness {
        engine: SessionEngine,
        store: MemoryStore,
        blobs: MemoryBlobStore,
    }

    fn harness() -> Harness {
        let store = MemoryStore::new();
        let blobs = MemoryBlobStore::new();
        let engine = SessionEngine::new(Arc::new(store.clone()), Arc::new(blobs.clone()));
        Harness { engine, store, blobs }
    }

    fn wav() -> ClipUpload {
        ClipUpload {
            file_name: "clip.wav".to_string(),
            data: Bytes::from_static(b"RIFF....WAVE"),
        }
    }

    fn bounds(start_sec: f64, end_sec: f64) -> ClipBounds {
        ClipBounds { start_sec, end_sec, confidence: Some(90) }
    }

    #[tokio::test]
    async fn new_session_is_open_and_empty() {
        let h = harness();
        let user = Uuid::new_v4();
        let session = h.engine.create_session(user, None).await.unwrap();

        assert_eq!(session.status, SessionStatus::Open);
        assert_eq!(session.user_id, user);
        assert_eq!(session.snore_count, 0);
        assert!(!session.has_snore);
        assert!(session.ended_at.is_none());
        assert!(session.sleep_quality.is_none());
        assert!(session.advice.is_none());
    }

    #[tokio::test]
    async fn appending_clips_accumulates() {
        let h = harness();
        let user = Uuid::new_v4();
        let session = h.engine.create_session(user, None).await.unwrap();

        let clip = h
            .engine
            .append_clip(session.id, user, bounds(0.0, 5.4), wav())
            .await
            .unwrap();
        assert_eq!(clip.duration_sec, 6);
        assert_eq!(clip.confidence, Some(90));
        assert!(h.blobs.contains(&clip.blob_ref));

        h.engine
            .append_clip(session.id, user, bounds(100.0, 102.0), wav())
            .await
            .unwrap();

        let snapshot = h.engine.get_session(session.id, user).await.unwrap();
        assert_eq!(snapshot.session.snore_count, 2);
        assert_eq!(snapshot.session.snore_total_sec, 8);
        assert!(snapshot.session.has_snore);
        assert_eq!(snapshot.clips.len(), 2);
        assert!(snapshot.clips[0].start_sec < snapshot.clips[1].start_sec);
    }

    #[tokio::test]
    async fn foreign_session_looks_missing() {
        let h = harness();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let session = h.engine.create_session(owner, None).await.unwrap();

        let err = h
            .engine
            .append_clip(session.id, stranger, bounds(0.0, 1.0), wav())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));

        let missing = h
            .engine
            .append_clip(Uuid::new_v4(), stranger, bounds(0.0, 1.0), wav())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), missing.to_string());

        assert!(matches!(
            h.engine.get_session(session.id, stranger).await,
            Err(PortError::NotFound(_))
        ));
        assert!(matches!(
            h.engine.delete_session(session.id, stranger).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_audio_is_rejected_without_side_effects() {
        let h = harness();
        let user = Uuid::new_v4();
        let session = h.engine.create_session(user, None).await.unwrap();
        let upload = ClipUpload {
            file_name: "clip.ogg".to_string(),
            data: Bytes::from_static(b"OggS"),
        };

        let err = h
            .engine
            .append_clip(session.id, user, bounds(0.0, 1.0), upload)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidFormat(_)));
        assert!(h.blobs.is_empty());
        assert_eq!(h.store.get_session(session.id).await.unwrap().snore_count, 0);
    }

    #[tokio::test]
    async fn finalized_session_rejects_clips() {
        let h = harness();
        let user = Uuid::new_v4();
        let session = h.engine.create_session(user, None).await.unwrap();
        h.engine
            .finalize(session.id, user, FinalizeOverrides::default())
            .await
            .unwrap();

        let err = h
            .engine
            .append_clip(session.id, user, bounds(0.0, 1.0), wav())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidState(_)));
        assert!(h.blobs.is_empty());
    }

    #[tokio::test]
    async fn finalize_is_terminal() {
        let h = harness();
        let user = Uuid::new_v4();
        let session = h.engine.create_session(user, None).await.unwrap();
        h.engine
            .append_clip(session.id, user, bounds(0.0, 3.0), wav())
            .await
            .unwrap();

        let first = h
            .engine
            .finalize(session.id, user, FinalizeOverrides::default())
            .await
            .unwrap();
        assert_eq!(first.session.status, SessionStatus::Finalized);

        let before = h.engine.get_session(session.id, user).await.unwrap();
        let overrides = FinalizeOverrides {
            snore_count: Some(42),
            advice: Some("ignored".to_string()),
            ..Default::default()
        };
        let err = h.engine.finalize(session.id, user, overrides).await.unwrap_err();
        assert!(matches!(err, PortError::InvalidState(_)));

        let after = h.engine.get_session(session.id, user).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(first, after);
    }

    #[tokio::test]
    async fn quiet_night_is_excellent_regardless_of_timestamps() {
        let h = harness();
        let user = Uuid::new_v4();
        let session = h.engine.create_session(user, None).await.unwrap();

        let snapshot = h
            .engine
            .finalize(session.id, user, FinalizeOverrides::default())
            .await
            .unwrap();
        let s = snapshot.session;
        assert_eq!(s.sleep_quality, Some(SleepQuality::Excellent));
        assert_eq!(s.sleep_duration, None);
        assert!(!s.has_snore);
        assert_eq!(s.advice.as_deref(), Some(build_advice(0, 0).as_str()));
    }

    #[tokio::test]
    async fn sleep_duration_is_derived_from_timestamps() {
        let h = harness();
        let user = Uuid::new_v4();
        let started = parse_timestamp("2024-01-01T22:00:00").unwrap();
        let session = h.engine.create_session(user, Some(started)).await.unwrap();

        let overrides = FinalizeOverrides {
            ended_at: Some(parse_timestamp("2024-01-02T06:00:00").unwrap()),
            ..Default::default()
        };
        let snapshot = h.engine.finalize(session.id, user, overrides).await.unwrap();
        assert_eq!(snapshot.session.sleep_duration, Some(8.0));
    }

    #[tokio::test]
    async fn finalize_with_snoring_grades_the_night() {
        let h = harness();
        let user = Uuid::new_v4();
        let session = h.engine.create_session(user, None).await.unwrap();
        for i in 0..3 {
            let start = f64::from(i) * 60.0;
            h.engine
                .append_clip(session.id, user, bounds(start, start + 14.5), wav())
                .await
                .unwrap();
        }

        let overrides = FinalizeOverrides {
            started_at: Some(parse_timestamp("2024-01-01T23:00:00").unwrap()),
            ended_at: Some(parse_timestamp("2024-01-02T07:00:00").unwrap()),
            ..Default::default()
        };
        let s = h.engine.finalize(session.id, user, overrides).await.unwrap().session;

        assert_eq!(s.snore_count, 3);
        assert_eq!(s.snore_total_sec, 45);
        assert!(s.has_snore);
        assert_eq!(s.sleep_duration, Some(8.0));
        assert_eq!(s.sleep_quality, Some(SleepQuality::Good));
        let advice = s.advice.unwrap();
        assert!(advice.contains('3') && advice.contains("45"));
    }

    #[tokio::test]
    async fn explicit_overrides_win() {
        let h = harness();
        let user = Uuid::new_v4();
        let session = h.engine.create_session(user, None).await.unwrap();
        h.engine
            .append_clip(session.id, user, bounds(0.0, 10.0), wav())
            .await
            .unwrap();

        let overrides = FinalizeOverrides {
            snore_count: Some(0),
            snore_total_sec: Some(0),
            sleep_duration: Some(7.5),
            sleep_quality: Some(SleepQuality::Fair),
            advice: Some("Keep it up".to_string()),
            ..Default::default()
        };
        let s = h.engine.finalize(session.id, user, overrides).await.unwrap().session;

        assert_eq!(s.snore_count, 0);
        assert!(!s.has_snore);
        assert_eq!(s.sleep_duration, Some(7.5));
        assert_eq!(s.sleep_quality, Some(SleepQuality::Fair));
        assert_eq!(s.advice.as_deref(), Some("Keep it up"));
    }

    #[tokio::test]
    async fn snoring_without_duration_has_no_quality() {
        let h = harness();
        let user = Uuid::new_v4();
        let started = parse_timestamp("2024-01-01T22:00:00").unwrap();
        let session = h.engine.create_session(user, Some(started)).await.unwrap();
        h.engine
            .append_clip(session.id, user, bounds(0.0, 4.0), wav())
            .await
            .unwrap();

        // Only one of the two timestamps is known.
        let s = h
            .engine
            .finalize(session.id, user, FinalizeOverrides::default())
            .await
            .unwrap()
            .session;
        assert_eq!(s.sleep_duration, None);
        assert_eq!(s.sleep_quality, None);
        assert!(s.has_snore);
    }

    #[tokio::test]
    async fn negative_duration_override_is_invalid() {
        let h = harness();
        let user = Uuid::new_v4();
        let session = h.engine.create_session(user, None).await.unwrap();
        let overrides = FinalizeOverrides {
            sleep_duration: Some(-1.0),
            ..Default::default()
        };
        let err = h.engine.finalize(session.id, user, overrides).await.unwrap_err();
        assert!(matches!(err, PortError::InvalidFormat(_)));
        assert!(h.store.get_session(session.id).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn delete_session_removes_clips_and_audio() {
        let h = harness();
        let user = Uuid::new_v4();
        let session = h.engine.create_session(user, None).await.unwrap();
        let a = h
            .engine
            .append_clip(session.id, user, bounds(0.0, 1.0), wav())
            .await
            .unwrap();
        let b = h
            .engine
            .append_clip(session.id, user, bounds(5.0, 6.0), wav())
            .await
            .unwrap();

        // One blob is already gone from the backing store.
        h.blobs.delete_blob(&a.blob_ref).await.unwrap();

        h.engine.delete_session(session.id, user).await.unwrap();

        assert!(!h.blobs.contains(&b.blob_ref));
        assert!(h.store.list_clips(session.id).await.unwrap().is_empty());
        assert!(matches!(
            h.engine.get_session(session.id, user).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_clip_checks_membership() {
        let h = harness();
        let user = Uuid::new_v4();
        let first = h.engine.create_session(user, None).await.unwrap();
        let second = h.engine.create_session(user, None).await.unwrap();
        let clip = h
            .engine
            .append_clip(first.id, user, bounds(0.0, 1.0), wav())
            .await
            .unwrap();

        let err = h.engine.delete_clip(second.id, clip.id, user).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
        let err = h
            .engine
            .delete_clip(first.id, Uuid::new_v4(), user)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));

        h.engine.delete_clip(first.id, clip.id, user).await.unwrap();
        assert!(!h.blobs.contains(&clip.blob_ref));
        let snapshot = h.engine.get_session(first.id, user).await.unwrap();
        assert!(snapshot.clips.is_empty());
    }

    #[tokio::test]
    async fn concurrent_uploads_are_not_lost() {
        let h = harness();
        let user = Uuid::new_v4();
        let session_id = h.engine.create_session(user, None).await.unwrap().id;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let engine = h.engine.clone();
            let start = f64::from(i) * 10.0;
            tasks.push(tokio::spawn(async move {
                engine
                    .append_clip(session_id, user, bounds(start, start + 2.0), wav())
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let s = h.store.get_session(session_id).await.unwrap();
        assert_eq!(s.snore_count, 16);
        assert_eq!(s.snore_total_sec, 32);
    }

    #[test]
    fn report_rounds_duration_to_one_decimal() {
        let mut session = Session::open(Uuid::new_v4(), None);
        session.started_at = Some(parse_timestamp("2024-01-01T22:00:00").unwrap());
        let overrides = FinalizeOverrides {
            ended_at: Some(parse_timestamp("2024-01-02T05:20:00").unwrap()),
            ..Default::default()
        };
        let report = compute_report(&session, &overrides);
        assert_eq!(report.sleep_duration, Some(7.3));
        assert_eq!(report.status, SessionStatus::Finalized);
    }

    #[test]
    fn reversed_timestamps_give_no_duration() {
        let start = parse_timestamp("2024-01-02T06:00:00").ok();
        let end = parse_timestamp("2024-01-01T22:00:00").ok();
        assert_eq!(derive_sleep_hours(start, end), None);
        assert_eq!(derive_sleep_hours(start, None), None);
    }

    #[test]
    fn duration_rounding_ties_to_even() {
        let hours = |end: &str| {
            derive_sleep_hours(parse_timestamp("2024-01-01T22:00:00").ok(), parse_timestamp(end).ok())
        };
        assert_eq!(hours("2024-01-01T23:15:00"), Some(1.2));
        assert_eq!(hours("2024-01-01T22:09:00"), Some(0.1));
        assert_eq!(hours("2024-01-02T05:33:00"), Some(7.5));
        assert_eq!(hours("2024-01-01T23:45:00"), Some(1.8));
        assert_eq!(hours("2024-01-02T06:00:00"), Some(8.0));
    }

    #[tokio::test]
    async fn oversized_counter_overrides_are_invalid() {
        let h = harness();
        let user = Uuid::new_v4();
        let session = h.engine.create_session(user, None).await.unwrap();
        let overrides = FinalizeOverrides {
            snore_total_sec: Some(COUNTER_LIMIT + 1),
            ..Default::default()
        };
        let err = h.engine.finalize(session.id, user, overrides).await.unwrap_err();
        assert!(matches!(err, PortError::InvalidFormat(_)));
        assert!(h.store.get_session(session.id).await.unwrap().is_open());
    }

    //=====================================================================================
    // Interleaved writers
    //=====================================================================================

    /// What another request does to the session while the engine is mid-operation.
    #[derive(Clone, Copy, PartialEq)]
    enum Interference {
        /// A clip upload commits just before the session rows are deleted.
        UploadBeforeDelete,
        /// A clip upload commits just before the first finalize write.
        UploadBeforeFirstFinalize,
        /// Another finalize wins just before this one writes.
        FinalizedElsewhere,
        /// Every finalize write loses.
        AlwaysConflict,
    }

    struct InterferingStore {
        inner: MemoryStore,
        blobs: MemoryBlobStore,
        mode: Interference,
        finalize_calls: AtomicUsize,
    }

    impl InterferingStore {
        async fn upload_elsewhere(&self, session_id: Uuid) -> PortResult<Clip> {
            let blob_ref = self
                .blobs
                .store_blob(Bytes::from_static(b"late"), AudioFormat::Wav)
                .await?;
            self.inner
                .append_clip(NewClip {
                    session_id,
                    blob_ref,
                    start_sec: 500.0,
                    end_sec: 503.0,
                    duration_sec: 3,
                    confidence: None,
                })
                .await
        }
    }

    #[async_trait]
    impl SessionStore for InterferingStore {
        async fn create_session(&self, session: Session) -> PortResult<Session> {
            self.inner.create_session(session).await
        }

        async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
            self.inner.get_session(session_id).await
        }

        async fn list_sessions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Session>> {
            self.inner.list_sessions_for_user(user_id).await
        }

        async fn append_clip(&self, clip: NewClip) -> PortResult<Clip> {
            self.inner.append_clip(clip).await
        }

        async fn finalize_session(
            &self,
            expected: &Session,
            finalized: &Session,
        ) -> PortResult<FinalizeOutcome> {
            let call = self.finalize_calls.fetch_add(1, AtomicOrdering::SeqCst);
            match self.mode {
                Interference::AlwaysConflict => return Ok(FinalizeOutcome::Conflict),
                Interference::UploadBeforeFirstFinalize if call == 0 => {
                    self.upload_elsewhere(expected.id).await?;
                }
                Interference::FinalizedElsewhere if call == 0 => {
                    let rival = compute_report(expected, &FinalizeOverrides::default());
                    self.inner.finalize_session(expected, &rival).await?;
                }
                _ => {}
            }
            self.inner.finalize_session(expected, finalized).await
        }

        async fn list_clips(&self, session_id: Uuid) -> PortResult<Vec<Clip>> {
            self.inner.list_clips(session_id).await
        }

        async fn get_clip(&self, clip_id: Uuid) -> PortResult<Clip> {
            self.inner.get_clip(clip_id).await
        }

        async fn delete_clip(&self, clip_id: Uuid) -> PortResult<()> {
            self.inner.delete_clip(clip_id).await
        }

        async fn delete_session(&self, session_id: Uuid) -> PortResult<Vec<String>> {
            if self.mode == Interference::UploadBeforeDelete {
                self.upload_elsewhere(session_id).await?;
            }
            self.inner.delete_session(session_id).await
        }
    }

    fn interfering(mode: Interference) -> (SessionEngine, Arc<InterferingStore>, MemoryBlobStore) {
        let blobs = MemoryBlobStore::new();
        let store = Arc::new(InterferingStore {
            inner: MemoryStore::new(),
            blobs: blobs.clone(),
            mode,
            finalize_calls: AtomicUsize::new(0),
        });
        let engine = SessionEngine::new(store.clone(), Arc::new(blobs.clone()));
        (engine, store, blobs)
    }

    #[tokio::test]
    async fn delete_session_discards_audio_of_late_uploads() {
        let (engine, store, blobs) = interfering(Interference::UploadBeforeDelete);
        let user = Uuid::new_v4();
        let session = engine.create_session(user, None).await.unwrap();
        engine
            .append_clip(session.id, user, bounds(0.0, 1.0), wav())
            .await
            .unwrap();

        engine.delete_session(session.id, user).await.unwrap();

        assert!(blobs.is_empty());
        assert!(store.inner.list_clips(session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalize_retries_after_a_racing_upload() {
        let (engine, store, _) = interfering(Interference::UploadBeforeFirstFinalize);
        let user = Uuid::new_v4();
        let session = engine.create_session(user, None).await.unwrap();
        engine
            .append_clip(session.id, user, bounds(0.0, 2.0), wav())
            .await
            .unwrap();

        let snapshot = engine
            .finalize(session.id, user, FinalizeOverrides::default())
            .await
            .unwrap();

        assert_eq!(store.finalize_calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(snapshot.session.snore_count, 2);
        assert_eq!(snapshot.session.snore_total_sec, 5);
        assert_eq!(snapshot.clips.len(), 2);
        assert!(snapshot.session.advice.unwrap().starts_with("2 snore events, 5s"));
    }

    #[tokio::test]
    async fn finalize_losing_to_another_finalize_is_invalid_state() {
        let (engine, store, _) = interfering(Interference::FinalizedElsewhere);
        let user = Uuid::new_v4();
        let session = engine.create_session(user, None).await.unwrap();
        let overrides = FinalizeOverrides {
            advice: Some("mine".to_string()),
            ..Default::default()
        };

        let err = engine.finalize(session.id, user, overrides).await.unwrap_err();
        assert!(matches!(err, PortError::InvalidState(_)));
        assert_eq!(store.finalize_calls.load(AtomicOrdering::SeqCst), 1);

        let stored = store.inner.get_session(session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Finalized);
        assert_ne!(stored.advice.as_deref(), Some("mine"));
    }

    #[tokio::test]
    async fn finalize_gives_up_after_repeated_conflicts() {
        let (engine, store, _) = interfering(Interference::AlwaysConflict);
        let user = Uuid::new_v4();
        let session = engine.create_session(user, None).await.unwrap();

        let err = engine
            .finalize(session.id, user, FinalizeOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
        assert_eq!(
            store.finalize_calls.load(AtomicOrdering::SeqCst),
            MAX_FINALIZE_ATTEMPTS
        );
        assert!(store.inner.get_session(session.id).await.unwrap().is_open());
    }
}
