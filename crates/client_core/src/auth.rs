use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::Role,
    protocol::{AuthTokenResponse, AuthUser, Profile},
};
use storage::{Storage, StoredSession};
use tracing::{debug, info, warn};

use crate::{
    backend::ChatBackend,
    error::{AuthError, BackendError},
    rest::RestBackend,
};

pub type Result<T> = std::result::Result<T, AuthError>;

/// The signed-in user and the tokens authorizing backend calls.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub profile: Profile,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn to_stored(&self) -> StoredSession {
        StoredSession {
            user_id: self.profile.id,
            email: self.profile.email.clone(),
            name: self.profile.name.clone(),
            role: self.profile.role,
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
        }
    }

    fn from_stored(stored: StoredSession) -> Self {
        Self {
            profile: Profile {
                id: stored.user_id,
                role: stored.role,
                name: stored.name,
                email: stored.email,
                avatar_url: None,
                is_master: None,
            },
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            expires_at: stored.expires_at,
        }
    }
}

pub struct AuthService {
    backend: Arc<RestBackend>,
    storage: Storage,
}

impl AuthService {
    pub fn new(backend: Arc<RestBackend>, storage: Storage) -> Self {
        Self { backend, storage }
    }

    /// Password sign-in. An unknown account is registered as a new student.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let email = email.trim().to_ascii_lowercase();

        let grant = match self.backend.sign_in_with_password(&email, password).await {
            Ok(grant) => grant,
            Err(err) if err.is_rejection() => {
                debug!(email = %email, "sign-in rejected, trying sign-up: {err}");
                self.sign_up(&email, password).await?
            }
            Err(err) => return Err(err.into()),
        };

        let access_token = grant
            .access_token
            .clone()
            .ok_or(AuthError::ConfirmationRequired)?;
        let user = grant
            .auth_user()
            .ok_or_else(|| BackendError::Decode("token grant carried no user".into()))?;

        self.backend.set_access_token(Some(access_token.clone())).await;
        let profile = self.ensure_profile(&user, &email).await?;

        let session = AuthSession {
            profile,
            access_token,
            refresh_token: grant.refresh_token.clone(),
            expires_at: expires_at(&grant, Utc::now()),
        };
        self.storage.save_session(&session.to_stored()).await?;
        info!(user_id = %session.profile.id, role = ?session.profile.role, "signed in");
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthTokenResponse> {
        match self
            .backend
            .sign_up(email, password, &default_display_name(email))
            .await
        {
            Ok(grant) => {
                if grant.access_token.is_none() {
                    info!(email = %email, "account created; email confirmation pending");
                }
                Ok(grant)
            }
            Err(err) if err.is_rejection() => {
                debug!(email = %email, "sign-up rejected: {err}");
                Err(AuthError::InvalidCredentials)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Fetches the user's profile, creating a student profile when there is none.
    async fn ensure_profile(&self, user: &AuthUser, email: &str) -> Result<Profile> {
        if let Some(profile) = self.backend.fetch_profile(user.id).await? {
            return Ok(profile);
        }

        let profile = Profile {
            id: user.id,
            role: Role::Student,
            name: default_display_name(email),
            email: user.email.clone().unwrap_or_else(|| email.to_string()),
            avatar_url: None,
            is_master: Some(false),
        };
        self.sync_profile(&profile).await;
        Ok(profile)
    }

    /// Best-effort profile upsert; a failure is logged, never returned.
    pub async fn sync_profile(&self, profile: &Profile) {
        if let Err(err) = self.backend.upsert_profile(profile).await {
            warn!(user_id = %profile.id, "profile sync failed: {err}");
        }
    }

    /// Loads the persisted session and authorizes the backend with it.
    pub async fn restore(&self) -> Result<Option<AuthSession>> {
        let Some(stored) = self.storage.load_session().await? else {
            return Ok(None);
        };
        let session = AuthSession::from_stored(stored);
        if session.is_expired(Utc::now()) {
            self.storage.clear_session().await?;
            return Err(AuthError::SessionExpired);
        }
        self.backend
            .set_access_token(Some(session.access_token.clone()))
            .await;
        Ok(Some(session))
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.storage.clear_session().await?;
        self.backend.set_access_token(None).await;
        info!("signed out");
        Ok(())
    }
}

pub fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).trim().to_string()
}

fn expires_at(grant: &AuthTokenResponse, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    grant
        .expires_in
        .filter(|secs| *secs > 0)
        .map(|secs| now + Duration::seconds(secs))
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
