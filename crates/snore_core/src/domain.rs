//! crates/snore_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use crate::ports::{PortError, PortResult};
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Session Status & Sleep Quality
//=========================================================================================

/// Lifecycle state of a sleep session. The only legal transition is `Open -> Finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Open,
    Finalized,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Finalized => "finalized",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(SessionStatus::Open),
            "finalized" => Ok(SessionStatus::Finalized),
            other => Err(PortError::Unexpected(format!(
                "Unknown session status '{}'",
                other
            ))),
        }
    }
}

/// Categorical grade of a night, derived from how much of it was spent snoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepQuality {
    Excellent,
    Good,
    Fair,
    Caution,
    Poor,
}

impl SleepQuality {
    pub const ALL: [SleepQuality; 5] = [
        SleepQuality::Excellent,
        SleepQuality::Good,
        SleepQuality::Fair,
        SleepQuality::Caution,
        SleepQuality::Poor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SleepQuality::Excellent => "excellent",
            SleepQuality::Good => "good",
            SleepQuality::Fair => "fair",
            SleepQuality::Caution => "caution",
            SleepQuality::Poor => "poor",
        }
    }

    /// Grades a night from its snore totals and its length in hours.
    ///
    /// A night without snoring is always `Excellent`. Otherwise the grade depends on
    /// the share of the night spent snoring, which needs a positive sleep duration;
    /// without one there is not enough information and `None` is returned.
    pub fn assess(snore_count: u32, snore_total_sec: u32, sleep_duration: Option<f64>) -> Option<Self> {
        if snore_count == 0 {
            return Some(SleepQuality::Excellent);
        }
        let hours = sleep_duration.filter(|h| *h > 0.0)?;
        let ratio = f64::from(snore_total_sec) / (hours * 3600.0);

        let quality = if ratio < 0.01 {
            SleepQuality::Good
        } else if ratio < 0.03 {
            SleepQuality::Fair
        } else if ratio < 0.06 {
            SleepQuality::Caution
        } else {
            SleepQuality::Poor
        };
        Some(quality)
    }
}

impl fmt::Display for SleepQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SleepQuality {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SleepQuality::ALL
            .into_iter()
            .find(|q| q.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PortError::InvalidFormat(format!("Unknown sleep quality '{}'", s)))
    }
}

//=========================================================================================
// Sessions & Clips
//=========================================================================================

/// Upper bound for `snore_count` and `snore_total_sec`; the widest value every
/// storage backend can hold.
pub const COUNTER_LIMIT: u32 = i32::MAX as u32;

/// One tracked sleep period, from creation until its nightly report is frozen.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub has_snore: bool,
    pub snore_count: u32,
    pub snore_total_sec: u32,
    /// Hours, rounded to one decimal.
    pub sleep_duration: Option<f64>,
    pub sleep_quality: Option<SleepQuality>,
    pub advice: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A fresh, open session with zeroed aggregates.
    pub fn open(user_id: Uuid, started_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: SessionStatus::Open,
            started_at,
            ended_at: None,
            has_snore: false,
            snore_count: 0,
            snore_total_sec: 0,
            sleep_duration: None,
            sleep_quality: None,
            advice: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    /// The calendar date this session is attributed to: the end of the night when
    /// known, otherwise its start, otherwise the moment it was created.
    pub fn bucket_date(&self) -> NaiveDate {
        self.ended_at
            .or(self.started_at)
            .unwrap_or(self.created_at)
            .date_naive()
    }
}

/// One detected snore event inside a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub id: Uuid,
    pub session_id: Uuid,
    pub blob_ref: String,
    pub start_sec: f64,
    pub end_sec: f64,
    pub duration_sec: u32,
    pub confidence: Option<u8>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied boundaries of a detected snore event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipBounds {
    pub start_sec: f64,
    pub end_sec: f64,
    pub confidence: Option<i64>,
}

impl ClipBounds {
    /// Checks the bounds and returns the confidence narrowed to its stored width.
    pub fn validate(&self) -> PortResult<Option<u8>> {
        if !self.start_sec.is_finite() || !self.end_sec.is_finite() {
            return Err(PortError::InvalidFormat(
                "start_sec and end_sec must be finite numbers".to_string(),
            ));
        }
        if self.start_sec < 0.0 {
            return Err(PortError::InvalidFormat("start_sec must be >= 0".to_string()));
        }
        if self.end_sec <= self.start_sec {
            return Err(PortError::InvalidFormat(
                "end_sec must be greater than start_sec".to_string(),
            ));
        }
        match self.confidence {
            None => Ok(None),
            Some(c) if (0..=100).contains(&c) => Ok(Some(c as u8)),
            Some(c) => Err(PortError::InvalidFormat(format!(
                "confidence must be within 0..=100, got {}",
                c
            ))),
        }
    }

    /// Whole seconds covered by the clip, rounded up, never less than one.
    pub fn duration_sec(&self) -> u32 {
        let span = (self.end_sec - self.start_sec).ceil();
        if span >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            (span as u32).max(1)
        }
    }
}

/// A clip about to be persisted, after its blob has been written.
#[derive(Debug, Clone)]
pub struct NewClip {
    pub session_id: Uuid,
    pub blob_ref: String,
    pub start_sec: f64,
    pub end_sec: f64,
    pub duration_sec: u32,
    pub confidence: Option<u8>,
}

/// Audio containers accepted for clip uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    M4a,
    Mp3,
}

impl AudioFormat {
    /// Resolves the format from the declared file name's suffix, case-insensitively.
    pub fn from_file_name(file_name: &str) -> PortResult<Self> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "m4a" => Ok(AudioFormat::M4a),
            "mp3" => Ok(AudioFormat::Mp3),
            _ => Err(PortError::InvalidFormat(format!(
                "Unsupported audio format: '{}'",
                file_name
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::M4a => "m4a",
            AudioFormat::Mp3 => "mp3",
        }
    }
}

/// Values a client may pin when finalizing; anything left `None` is derived.
#[derive(Debug, Clone, Default)]
pub struct FinalizeOverrides {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub snore_count: Option<u32>,
    pub snore_total_sec: Option<u32>,
    pub sleep_duration: Option<f64>,
    pub sleep_quality: Option<SleepQuality>,
    pub advice: Option<String>,
}

/// A session together with its clips, ordered by position in the recording.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session: Session,
    pub clips: Vec<Clip>,
}

/// Aggregated snoring for one calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub snore: bool,
    pub count: u64,
    pub total_sec: u64,
}

//=========================================================================================
// Users & Credentials
//=========================================================================================

// Represents a user - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
}

// Only used internally for login - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

/// A freshly issued access/refresh credential pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}
