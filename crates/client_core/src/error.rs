use std::time::Duration;

use shared::{
    domain::{ClientId, MessageId, MessageKind},
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend rejected request: {0}")]
    Api(#[from] ApiError),
    #[error("malformed backend payload: {0}")]
    Decode(String),
    #[error("realtime feed error: {0}")]
    Realtime(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// The insert referenced a row (usually the sender's profile) that does not exist yet.
    pub fn is_referential(&self) -> bool {
        match self {
            BackendError::Api(err) => err.is_foreign_key_violation(),
            _ => false,
        }
    }

    /// The backend understood the request and refused it, e.g. bad credentials.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BackendError::Api(err) if matches!(
                err.code,
                ErrorCode::Validation | ErrorCode::Unauthorized | ErrorCode::Forbidden
            )
        )
    }

    /// A row with the same unique key (e.g. `client_id`) is already stored.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, BackendError::Api(err) if err.is_unique_violation())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::Api(err) if err.code == ErrorCode::NotFound)
    }

    pub fn is_missing_relation(&self) -> bool {
        matches!(self, BackendError::Api(err) if err.code == ErrorCode::MissingRelation)
    }
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation is closed")]
    Closed,
    #[error("message has neither text nor attachments")]
    EmptyDraft,
    #[error("no message with client id {0} in this conversation")]
    UnknownClientId(ClientId),
    #[error("no message with id {0} in this conversation")]
    UnknownMessageId(MessageId),
    #[error("message {0} is not in a failed state")]
    NotRetryable(ClientId),
    #[error("a send for message {0} is already in flight")]
    InFlight(ClientId),
    #[error("only a coach may review photos")]
    ReviewNotAllowed,
    #[error("{0:?} messages cannot carry a photo")]
    NotAPhotoKind(MessageKind),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Media(#[from] MediaError),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("image processing task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account created; confirm the email address before signing in")]
    ConfirmationRequired,
    #[error("session expired; sign in again")]
    SessionExpired,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("local session store failed: {0}")]
    LocalStore(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("only students keep an activity log")]
    NotAStudent,
    #[error("message {0} was not delivered; nothing was logged")]
    NotDelivered(ClientId),
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error("local activity log failed: {0}")]
    LocalStore(#[from] anyhow::Error),
}
