//! crates/snore_core/src/memory.rs
//!
//! In-process implementations of the storage ports. They honour the same guards as
//! the database adapter (open-only appends, compare-and-set finalize) and back the
//! test suites of both crates.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::{
    AudioFormat, Clip, NewClip, Session, SessionStatus, User, UserCredentials, COUNTER_LIMIT,
};
use crate::ports::{
    BlobStore, FinalizeOutcome, PortError, PortResult, SessionStore, UserStore,
};

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, Session>,
    clips: HashMap<Uuid, Clip>,
    users: HashMap<Uuid, UserCredentials>,
}

/// Sessions, clips and users held behind a single lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> PortResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| PortError::Unexpected("memory store lock poisoned".to_string()))
    }
}

fn session_not_found(session_id: Uuid) -> PortError {
    PortError::NotFound(format!("Session {} not found", session_id))
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: Session) -> PortResult<Session> {
        let mut tables = self.lock()?;
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        self.lock()?
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| session_not_found(session_id))
    }

    async fn list_sessions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Session>> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn append_clip(&self, clip: NewClip) -> PortResult<Clip> {
        let mut tables = self.lock()?;
        let session = tables
            .sessions
            .get_mut(&clip.session_id)
            .ok_or_else(|| session_not_found(clip.session_id))?;
        if session.status != SessionStatus::Open {
            return Err(PortError::InvalidState("session already finalized".to_string()));
        }
        let count = session.snore_count.checked_add(1).filter(|c| *c <= COUNTER_LIMIT);
        let total = session
            .snore_total_sec
            .checked_add(clip.duration_sec)
            .filter(|t| *t <= COUNTER_LIMIT);
        let (Some(count), Some(total)) = (count, total) else {
            return Err(PortError::InvalidState("session snore totals are full".to_string()));
        };
        session.snore_count = count;
        session.snore_total_sec = total;
        session.has_snore = true;

        let stored = Clip {
            id: Uuid::new_v4(),
            session_id: clip.session_id,
            blob_ref: clip.blob_ref,
            start_sec: clip.start_sec,
            end_sec: clip.end_sec,
            duration_sec: clip.duration_sec,
            confidence: clip.confidence,
            created_at: Utc::now(),
        };
        tables.clips.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn finalize_session(
        &self,
        expected: &Session,
        finalized: &Session,
    ) -> PortResult<FinalizeOutcome> {
        let mut tables = self.lock()?;
        let current = tables
            .sessions
            .get_mut(&expected.id)
            .ok_or_else(|| session_not_found(expected.id))?;
        let unchanged = current.status == SessionStatus::Open
            && current.snore_count == expected.snore_count
            && current.snore_total_sec == expected.snore_total_sec;
        if !unchanged {
            return Ok(FinalizeOutcome::Conflict);
        }
        *current = finalized.clone();
        Ok(FinalizeOutcome::Applied(current.clone()))
    }

    async fn list_clips(&self, session_id: Uuid) -> PortResult<Vec<Clip>> {
        let mut clips: Vec<Clip> = self
            .lock()?
            .clips
            .values()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect();
        clips.sort_by(|a, b| {
            a.start_sec
                .total_cmp(&b.start_sec)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(clips)
    }

    async fn get_clip(&self, clip_id: Uuid) -> PortResult<Clip> {
        self.lock()?
            .clips
            .get(&clip_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Clip {} not found", clip_id)))
    }

    async fn delete_clip(&self, clip_id: Uuid) -> PortResult<()> {
        self.lock()?.clips.remove(&clip_id);
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> PortResult<Vec<String>> {
        let mut tables = self.lock()?;
        let mut removed = Vec::new();
        tables.clips.retain(|_, c| {
            if c.session_id == session_id {
                removed.push(c.blob_ref.clone());
                false
            } else {
                true
            }
        });
        tables.sessions.remove(&session_id);
        Ok(removed)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, email: &str, hashed_password: &str) -> PortResult<User> {
        let mut tables = self.lock()?;
        if tables.users.values().any(|u| u.email == email) {
            return Err(PortError::Conflict("Email already registered".to_string()));
        }
        let creds = UserCredentials {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            hashed_password: hashed_password.to_string(),
        };
        tables.users.insert(creds.user_id, creds.clone());
        Ok(User {
            user_id: creds.user_id,
            email: creds.email,
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.lock()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        self.lock()?
            .users
            .get(&user_id)
            .map(|u| User {
                user_id: u.user_id,
                email: u.email.clone(),
            })
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }
}

/// Blob store keeping audio bytes in a map keyed by `mem://` references.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> PortResult<MutexGuard<'_, HashMap<String, Bytes>>> {
        self.blobs
            .lock()
            .map_err(|_| PortError::Unexpected("blob store lock poisoned".to_string()))
    }

    pub fn contains(&self, blob_ref: &str) -> bool {
        self.lock().map(|b| b.contains_key(blob_ref)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store_blob(&self, data: Bytes, format: AudioFormat) -> PortResult<String> {
        let blob_ref = format!("mem://clip_{}.{}", Uuid::new_v4(), format.extension());
        self.lock()?.insert(blob_ref.clone(), data);
        Ok(blob_ref)
    }

    async fn delete_blob(&self, blob_ref: &str) -> PortResult<()> {
        self.lock()?.remove(blob_ref);
        Ok(())
    }
}
