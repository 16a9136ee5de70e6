//! crates/snore_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases, file
//! systems or token formats.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::domain::{AudioFormat, Clip, NewClip, Session, TokenPair, User, UserCredentials};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, disk).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The item is absent, or it exists but belongs to someone else.
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Result of a guarded finalize write.
#[derive(Debug)]
pub enum FinalizeOutcome {
    /// The session was still open with the expected counters and is now finalized.
    Applied(Session),
    /// The row changed since it was read; nothing was written.
    Conflict,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Persistence for sessions and their clips.
///
/// `append_clip` and `finalize_session` are the only mutators of a session row and
/// must be atomic at the storage layer.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: Session) -> PortResult<Session>;

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session>;

    async fn list_sessions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Session>>;

    /// Inserts the clip and bumps the owning session's counters in one unit.
    /// Fails with `InvalidState` when the session is no longer open or when either
    /// counter would pass `COUNTER_LIMIT`.
    async fn append_clip(&self, clip: NewClip) -> PortResult<Clip>;

    /// Writes `finalized` only if the stored row is still open and still carries the
    /// counters of `expected`.
    async fn finalize_session(
        &self,
        expected: &Session,
        finalized: &Session,
    ) -> PortResult<FinalizeOutcome>;

    /// Clips of a session ordered by their position in the recording.
    async fn list_clips(&self, session_id: Uuid) -> PortResult<Vec<Clip>>;

    async fn get_clip(&self, clip_id: Uuid) -> PortResult<Clip>;

    async fn delete_clip(&self, clip_id: Uuid) -> PortResult<()>;

    /// Removes the session and every clip row it owns in one unit, returning the
    /// blob references of the clip rows that were actually removed.
    async fn delete_session(&self, session_id: Uuid) -> PortResult<Vec<String>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` when the email is already registered.
    async fn create_user(&self, email: &str, hashed_password: &str) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;
}

/// Write-once storage for raw clip audio.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persists the bytes and returns an opaque reference to them.
    async fn store_blob(&self, data: Bytes, format: AudioFormat) -> PortResult<String>;

    /// Removes the blob. A missing blob is not an error.
    async fn delete_blob(&self, blob_ref: &str) -> PortResult<()>;
}

/// Issues and verifies bearer credentials.
pub trait IdentityProvider: Send + Sync {
    fn issue_tokens(&self, user_id: Uuid) -> PortResult<TokenPair>;

    /// Returns the subject of a valid access token.
    fn verify_access(&self, token: &str) -> PortResult<Uuid>;

    /// Returns the subject of a valid refresh token.
    fn verify_refresh(&self, token: &str) -> PortResult<Uuid>;
}

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> PortResult<String>;

    fn verify(&self, password: &str, hashed: &str) -> PortResult<bool>;
}
