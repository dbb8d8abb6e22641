use std::{
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::Stream;
use shared::{
    domain::{ConversationKey, MessageId, ReviewStatus, UserId},
    protocol::{ChangeEvent, MessageRow, NewMessageRow, Profile, StoredObject},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::BackendError;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Everything the message core needs from the hosted backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Looks up the `chats` row for a student. `Ok(None)` when there is none.
    async fn find_conversation(&self, student_id: UserId) -> BackendResult<Option<ConversationKey>>;

    /// Messages of one conversation, oldest first, at most `limit` rows.
    async fn fetch_messages(
        &self,
        conversation: &ConversationKey,
        limit: u32,
    ) -> BackendResult<Vec<MessageRow>>;

    /// Persists a message. Inserting a `client_id` that is already stored returns the
    /// stored row, so a retried send never creates a second row.
    async fn insert_message(&self, row: &NewMessageRow) -> BackendResult<MessageRow>;

    async fn update_review_status(&self, id: MessageId, status: ReviewStatus)
        -> BackendResult<()>;

    async fn delete_message(&self, id: MessageId) -> BackendResult<()>;

    async fn upsert_profile(&self, profile: &Profile) -> BackendResult<()>;

    /// Opens a live feed of changes for one conversation.
    async fn subscribe(&self, conversation: &ConversationKey) -> BackendResult<Subscription>;

    async fn upload_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BackendResult<StoredObject>;
}

/// Live change feed. Dropping or closing it unsubscribes.
pub struct Subscription {
    events: ReceiverStream<ChangeEvent>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<ChangeEvent>, task: JoinHandle<()>) -> Self {
        Self {
            events: ReceiverStream::new(events),
            task: Some(task),
        }
    }

    /// A feed with no background task, e.g. one driven directly by a test.
    pub fn from_receiver(events: mpsc::Receiver<ChangeEvent>) -> Self {
        Self {
            events: ReceiverStream::new(events),
            task: None,
        }
    }

    pub fn close(&mut self) {
        self.events.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
