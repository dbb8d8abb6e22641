//! Client-side core for the coach/student chat: session handling, the per-conversation
//! message store and its reconciler, the send pipeline, realtime sync and the coach
//! directory.

pub mod activity;
pub mod auth;
pub mod backend;
pub mod config;
pub mod conversation;
pub mod directory;
pub mod error;
pub mod media;
pub mod realtime;
pub mod reconciler;
pub mod rest;
pub mod store;
pub mod types;
pub mod view;

pub use activity::CheckInOutcome;
pub use auth::{AuthService, AuthSession};
pub use backend::{BackendResult, ChatBackend, Subscription};
pub use config::{load_settings, ClientSettings};
pub use conversation::{resolve_conversation, Conversation, ConversationEvent, SendReport};
pub use directory::{CoachDirectory, StudentSummary};
pub use error::{
    ActivityError, AuthError, BackendError, ConversationError, DirectoryError, MediaError,
};
pub use reconciler::{Batch, ReconcileOutcome};
pub use rest::RestBackend;
pub use store::MessageStore;
pub use types::{ChatMessage, ConversationScope, DeliveryState, MessageDraft, MessageKey};
pub use view::DayGroup;

#[cfg(test)]
#[path = "tests/fake_backend.rs"]
pub(crate) mod fake_backend;

#[cfg(test)]
#[path = "tests/mock_backend.rs"]
pub(crate) mod mock_backend;
