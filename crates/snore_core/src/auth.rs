//! crates/snore_core/src/auth.rs
//!
//! Account registration, login and bearer-credential checks, expressed over the
//! `UserStore`, `PasswordHasher` and `IdentityProvider` ports.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{TokenPair, User};
use crate::ports::{IdentityProvider, PasswordHasher, PortError, PortResult, UserStore};

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
    identity: Arc<dyn IdentityProvider>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHasher>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            users,
            hasher,
            identity,
        }
    }

    pub async fn register(&self, email: &str, password: &str) -> PortResult<User> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(PortError::InvalidFormat("password must not be empty".to_string()));
        }
        let hashed = self.hasher.hash(password)?;
        let user = self.users.create_user(&email, &hashed).await?;
        info!(user_id = %user.user_id, "User registered");
        Ok(user)
    }

    /// Unknown email and wrong password are both reported as `Unauthorized`.
    pub async fn login(&self, email: &str, password: &str) -> PortResult<TokenPair> {
        let email = normalize_email(email).map_err(|_| PortError::Unauthorized)?;
        let creds = match self.users.get_user_by_email(&email).await {
            Ok(creds) => creds,
            Err(PortError::NotFound(_)) => return Err(PortError::Unauthorized),
            Err(e) => return Err(e),
        };
        if !self.hasher.verify(password, &creds.hashed_password)? {
            warn!(user_id = %creds.user_id, "Rejected login with wrong password");
            return Err(PortError::Unauthorized);
        }
        self.identity.issue_tokens(creds.user_id)
    }

    pub async fn refresh(&self, refresh_token: &str) -> PortResult<TokenPair> {
        let user_id = self.identity.verify_refresh(refresh_token)?;
        self.ensure_known(user_id).await?;
        self.identity.issue_tokens(user_id)
    }

    /// Resolves a bearer access token to the id of an existing user.
    pub async fn authenticate(&self, access_token: &str) -> PortResult<Uuid> {
        let user_id = self.identity.verify_access(access_token)?;
        self.ensure_known(user_id).await?;
        Ok(user_id)
    }

    async fn ensure_known(&self, user_id: Uuid) -> PortResult<()> {
        match self.users.get_user(user_id).await {
            Ok(_) => Ok(()),
            Err(PortError::NotFound(_)) => Err(PortError::Unauthorized),
            Err(e) => Err(e),
        }
    }
}

fn normalize_email(raw: &str) -> PortResult<String> {
    let email = raw.trim().to_ascii_lowercase();
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
        .unwrap_or(false);
    if !valid {
        return Err(PortError::InvalidFormat(format!("invalid email '{}'", raw)));
    }
    Ok(email)
}
