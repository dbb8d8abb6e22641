//! One open conversation: the message store, the send pipeline and the realtime feed.
//!
//! Every store mutation happens under `inner` and goes through the reconciler, so
//! fetch results, realtime events and send acknowledgements can interleave freely.
//! Once closed, late results from requests still in flight are dropped.

use std::{
    collections::HashSet,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use chrono::Utc;
use futures::StreamExt;
use shared::{
    domain::{ClientId, ConversationKey, MessageId, MessageKind, ReviewStatus, Role, UserId},
    protocol::{ChangeEvent, MessageRow, NewMessageRow, Profile, MESSAGE_FETCH_LIMIT},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    backend::{BackendResult, ChatBackend},
    error::{BackendError, ConversationError, MediaError},
    media,
    reconciler::{self, Batch, ReconcileOutcome},
    store::MessageStore,
    types::{ChatMessage, ConversationScope, DeliveryState, MessageDraft},
    view,
};

pub type Result<T> = std::result::Result<T, ConversationError>;

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    /// The store changed; take a new snapshot.
    Updated,
    SendFailed { client_id: ClientId, error: String },
    /// Non-fatal problem worth showing, e.g. the initial fetch failed.
    Notice(String),
    RealtimeClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub client_id: ClientId,
    pub delivery_state: DeliveryState,
}

struct ConversationState {
    store: MessageStore,
    inflight: HashSet<ClientId>,
    realtime_task: Option<JoinHandle<()>>,
}

pub struct Conversation {
    backend: Arc<dyn ChatBackend>,
    identity: Profile,
    scope: ConversationScope,
    inner: Mutex<ConversationState>,
    closed: AtomicBool,
    events: broadcast::Sender<ConversationEvent>,
    request_timeout: Duration,
}

/// The `chats` row for a student if there is one, the student's own id otherwise.
pub async fn resolve_conversation(backend: &dyn ChatBackend, student_id: UserId) -> ConversationKey {
    match backend.find_conversation(student_id).await {
        Ok(Some(key)) => key,
        Ok(None) => {
            debug!(student_id = %student_id, "no chat row; using student id as conversation key");
            ConversationKey::for_student(student_id)
        }
        Err(err) => {
            if err.is_missing_relation() {
                debug!("chats table missing; using student id as conversation key");
            } else {
                warn!(student_id = %student_id, "chat lookup failed, using student id: {err}");
            }
            ConversationKey::for_student(student_id)
        }
    }
}

impl Conversation {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        identity: Profile,
        scope: ConversationScope,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            backend,
            identity,
            scope,
            inner: Mutex::new(ConversationState {
                store: MessageStore::new(),
                inflight: HashSet::new(),
                realtime_task: None,
            }),
            closed: AtomicBool::new(false),
            events,
            request_timeout,
        })
    }

    /// Resolves the scope, loads history and starts the realtime feed. A student
    /// always lands in their own conversation; `student_id` picks one for a coach.
    /// Load and subscribe failures are published as notices, not returned.
    pub async fn open(
        backend: Arc<dyn ChatBackend>,
        identity: Profile,
        student_id: UserId,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let student_id = match identity.role {
            Role::Student => identity.id,
            Role::Coach => student_id,
        };
        let key = resolve_conversation(backend.as_ref(), student_id).await;
        let conversation = Self::new(
            backend,
            identity,
            ConversationScope { key, student_id },
            request_timeout,
        );

        if let Err(err) = conversation.load().await {
            warn!(conversation = %conversation.scope.key, "initial load failed: {err}");
            conversation.notify(ConversationEvent::Notice(format!(
                "could not load messages: {err}"
            )));
        }
        if let Err(err) = conversation.start_realtime().await {
            warn!(conversation = %conversation.scope.key, "realtime subscribe failed: {err}");
            conversation.notify(ConversationEvent::Notice(format!(
                "live updates unavailable: {err}"
            )));
        }
        conversation
    }

    pub fn scope(&self) -> &ConversationScope {
        &self.scope
    }

    pub fn identity(&self) -> &Profile {
        &self.identity
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.store.snapshot()
    }

    pub async fn message_by_client_id(&self, client_id: ClientId) -> Option<ChatMessage> {
        self.inner
            .lock()
            .await
            .store
            .get_by_client_id(client_id)
            .cloned()
    }

    /// Fetches the latest page and merges it. Returns how many rows were fetched.
    pub async fn load(&self) -> Result<usize> {
        self.ensure_open()?;
        let rows = self
            .with_timeout(
                self.backend
                    .fetch_messages(&self.scope.key, MESSAGE_FETCH_LIMIT),
            )
            .await?;
        let fetched = rows.len();
        let messages = self.rows_in_scope(rows);
        self.apply(Batch::Upsert(messages)).await;
        debug!(conversation = %self.scope.key, fetched, "loaded messages");
        Ok(fetched)
    }

    pub async fn start_realtime(self: &Arc<Self>) -> Result<()> {
        self.ensure_open()?;
        let mut subscription = self
            .with_timeout(self.backend.subscribe(&self.scope.key))
            .await?;

        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let Some(conversation) = weak.upgrade() else {
                    break;
                };
                conversation.handle_change(event).await;
            }
            if let Some(conversation) = weak.upgrade() {
                if !conversation.is_closed() {
                    conversation.notify(ConversationEvent::RealtimeClosed);
                }
            }
        });

        let mut inner = self.inner.lock().await;
        if self.is_closed() {
            task.abort();
            return Err(ConversationError::Closed);
        }
        if let Some(previous) = inner.realtime_task.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Folds one realtime change into the store. Rows for other conversations are ignored.
    pub async fn handle_change(&self, event: ChangeEvent) -> Option<ReconcileOutcome> {
        let batch = match event {
            ChangeEvent::Insert(row) => Batch::Upsert(self.rows_in_scope(vec![row])),
            ChangeEvent::Update(row) => Batch::Update(self.rows_in_scope(vec![row])),
            ChangeEvent::Delete { id } => Batch::Delete(vec![id]),
        };
        self.apply(batch).await
    }

    /// Shows `draft` immediately as `sending`, then persists it.
    pub async fn send(&self, draft: MessageDraft) -> Result<SendReport> {
        self.ensure_open()?;
        if draft.is_empty() {
            return Err(ConversationError::EmptyDraft);
        }

        let client_id = ClientId::new();
        let optimistic =
            ChatMessage::optimistic(client_id, &self.scope, &self.identity, &draft, Utc::now());
        {
            let mut inner = self.inner.lock().await;
            if self.is_closed() {
                return Err(ConversationError::Closed);
            }
            reconciler::apply(&mut inner.store, &Batch::Upsert(vec![optimistic]));
            inner.inflight.insert(client_id);
        }
        self.notify(ConversationEvent::Updated);
        debug!(conversation = %self.scope.key, client_id = %client_id, kind = draft.kind.as_str(), "sending message");

        Ok(self.persist(client_id, &draft).await)
    }

    /// Re-sends a failed entry under the same client id.
    pub async fn retry(&self, client_id: ClientId) -> Result<SendReport> {
        self.ensure_open()?;
        let draft = {
            let mut inner = self.inner.lock().await;
            let entry = inner
                .store
                .get_by_client_id(client_id)
                .cloned()
                .ok_or(ConversationError::UnknownClientId(client_id))?;
            if inner.inflight.contains(&client_id) {
                return Err(ConversationError::InFlight(client_id));
            }
            if entry.delivery_state != DeliveryState::Failed {
                return Err(ConversationError::NotRetryable(client_id));
            }

            let draft = entry.draft();
            let mut resending = entry;
            resending.delivery_state = DeliveryState::Sending;
            reconciler::apply(&mut inner.store, &Batch::Upsert(vec![resending]));
            inner.inflight.insert(client_id);
            draft
        };
        self.notify(ConversationEvent::Updated);
        info!(conversation = %self.scope.key, client_id = %client_id, "retrying failed send");

        Ok(self.persist(client_id, &draft).await)
    }

    /// Drops a local-only entry. Returns `false` if the entry had already been confirmed.
    pub async fn discard(&self, client_id: ClientId) -> Result<bool> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;
        if inner.inflight.contains(&client_id) {
            return Err(ConversationError::InFlight(client_id));
        }
        if inner.store.get_by_client_id(client_id).is_none() {
            return Err(ConversationError::UnknownClientId(client_id));
        }
        let outcome = reconciler::apply(&mut inner.store, &Batch::Discard(vec![client_id]));
        drop(inner);

        if outcome.changed() {
            self.notify(ConversationEvent::Updated);
        }
        Ok(outcome.removed > 0)
    }

    pub async fn update_review_status(&self, id: MessageId, status: ReviewStatus) -> Result<()> {
        self.ensure_open()?;
        {
            let inner = self.inner.lock().await;
            let target = inner
                .store
                .get_by_id(id)
                .ok_or(ConversationError::UnknownMessageId(id))?;
            if !view::can_review(self.identity.role, target) {
                return Err(ConversationError::ReviewNotAllowed);
            }
        }

        self.with_timeout(self.backend.update_review_status(id, status))
            .await?;

        // Re-read the entry: a realtime update may have changed it while the request was out.
        let outcome = {
            let mut inner = self.inner.lock().await;
            match inner.store.get_by_id(id).cloned() {
                Some(mut current) if !self.is_closed() => {
                    current.review_status = Some(status);
                    Some(reconciler::apply(&mut inner.store, &Batch::Update(vec![current])))
                }
                _ => None,
            }
        };
        if outcome.is_some_and(|outcome| outcome.changed()) {
            self.notify(ConversationEvent::Updated);
        }
        info!(conversation = %self.scope.key, id = %id, status = status.as_str(), "review status updated");
        Ok(())
    }

    pub async fn delete_message(&self, id: MessageId) -> Result<()> {
        self.ensure_open()?;
        match self.with_timeout(self.backend.delete_message(id)).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(id = %id, "message already gone on the backend");
            }
            Err(err) => return Err(err.into()),
        }
        self.apply(Batch::Delete(vec![id])).await;
        Ok(())
    }

    /// Compresses and uploads a photo, then sends it. Nothing is shown until the
    /// upload has succeeded.
    pub async fn send_photo(&self, kind: MessageKind, bytes: Vec<u8>) -> Result<SendReport> {
        self.ensure_open()?;
        if !kind.is_photo() {
            return Err(ConversationError::NotAPhotoKind(kind));
        }

        let compressed = tokio::task::spawn_blocking(move || media::compress_image(&bytes))
            .await
            .map_err(|err| MediaError::Task(err.to_string()))??;
        let path = media::object_path(&self.scope.key, kind, Utc::now());
        let stored = self
            .with_timeout(
                self.backend
                    .upload_object(&path, compressed, media::JPEG_CONTENT_TYPE),
            )
            .await?;
        debug!(conversation = %self.scope.key, path = %path, size_bytes = stored.size_bytes, "photo uploaded");

        self.send(MessageDraft::photo(kind, stored.public_url)).await
    }

    /// Stops the realtime feed and drops any later results.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.realtime_task.take() {
            task.abort();
        }
        inner.inflight.clear();
        debug!(conversation = %self.scope.key, "conversation closed");
    }

    async fn persist(&self, client_id: ClientId, draft: &MessageDraft) -> SendReport {
        let row = draft.to_row(&self.scope, &self.identity, client_id);
        let (batch, delivery_state) = match self.insert_with_repair(&row).await {
            Ok(stored) => {
                let mut confirmed = ChatMessage::from_row(stored);
                confirmed.client_id = Some(client_id);
                info!(conversation = %self.scope.key, client_id = %client_id, id = ?confirmed.id, "message sent");
                (Batch::Upsert(vec![confirmed]), DeliveryState::Sent)
            }
            Err(err) => {
                warn!(conversation = %self.scope.key, client_id = %client_id, "send failed: {err}");
                self.notify(ConversationEvent::SendFailed {
                    client_id,
                    error: err.to_string(),
                });
                (Batch::MarkFailed(vec![client_id]), DeliveryState::Failed)
            }
        };

        let mut inner = self.inner.lock().await;
        inner.inflight.remove(&client_id);
        if self.is_closed() {
            debug!(client_id = %client_id, "conversation closed; dropping send result");
        } else if reconciler::apply(&mut inner.store, &batch).changed() {
            drop(inner);
            self.notify(ConversationEvent::Updated);
        }
        SendReport {
            client_id,
            delivery_state,
        }
    }

    /// One insert; on a referential failure, one profile upsert and one more insert.
    /// The request timeout bounds the whole sequence, not each step.
    async fn insert_with_repair(&self, row: &NewMessageRow) -> BackendResult<MessageRow> {
        self.with_timeout(async {
            match self.backend.insert_message(row).await {
                Err(err) if err.is_referential() => {
                    info!(
                        conversation = %self.scope.key,
                        client_id = %row.client_id,
                        "insert hit a missing reference; upserting sender profile"
                    );
                    self.backend.upsert_profile(&self.identity).await?;
                    self.backend.insert_message(row).await
                }
                other => other,
            }
        })
        .await
    }

    async fn apply(&self, batch: Batch) -> Option<ReconcileOutcome> {
        let mut inner = self.inner.lock().await;
        if self.is_closed() {
            debug!(batch = batch.label(), "conversation closed; dropping batch");
            return None;
        }
        let outcome = reconciler::apply(&mut inner.store, &batch);
        drop(inner);
        if outcome.changed() {
            self.notify(ConversationEvent::Updated);
        }
        Some(outcome)
    }

    fn rows_in_scope(&self, rows: Vec<MessageRow>) -> Vec<ChatMessage> {
        rows.into_iter()
            .filter(|row| {
                let in_scope = row.chat_id == self.scope.key;
                if !in_scope {
                    debug!(id = %row.id, chat_id = %row.chat_id, "ignoring row from another conversation");
                }
                in_scope
            })
            .map(ChatMessage::from_row)
            .collect()
    }

    async fn with_timeout<T>(&self, request: impl Future<Output = BackendResult<T>>) -> BackendResult<T> {
        tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| BackendError::Timeout(self.request_timeout))?
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ConversationError::Closed)
        } else {
            Ok(())
        }
    }

    fn notify(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        if let Some(task) = self.inner.get_mut().realtime_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
