use chrono::{DateTime, NaiveDate, Utc};
use shared::{
    domain::{ClientId, ConversationKey, MessageId, MessageKind, ReviewStatus, Role, UserId},
    protocol::{MessageRow, NewMessageRow, Profile},
};

/// Local delivery state of a message. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    Sending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: Option<MessageId>,
    pub client_id: Option<ClientId>,
    pub conversation_key: ConversationKey,
    pub sender_id: Option<UserId>,
    pub sender_role: Role,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub attachment_refs: Vec<String>,
    pub review_status: Option<ReviewStatus>,
    pub created_at: Option<DateTime<Utc>>,
    pub local_created_at: DateTime<Utc>,
    pub delivery_state: DeliveryState,
}

impl ChatMessage {
    /// Maps a persisted row into a confirmed message.
    ///
    /// Older rows carry a photo URL in `content` and no `attachments`; those are
    /// normalized so the URL ends up in `attachment_refs`.
    pub fn from_row(row: MessageRow) -> Self {
        let mut attachment_refs = row.attachments.unwrap_or_default();
        attachment_refs.retain(|reference| !reference.trim().is_empty());
        let mut body = row.content.filter(|content| !content.trim().is_empty());

        if attachment_refs.is_empty() && row.kind.is_photo() {
            if let Some(content) = body.as_deref() {
                if looks_like_url(content) {
                    attachment_refs.push(content.to_string());
                    body = None;
                }
            }
        } else if body.as_deref() == attachment_refs.first().map(String::as_str) {
            body = None;
        }

        Self {
            id: Some(row.id),
            client_id: row.client_id,
            conversation_key: row.chat_id,
            sender_id: row.sender_id,
            sender_role: row.sender_role,
            kind: row.kind,
            body,
            attachment_refs,
            review_status: row.status,
            created_at: Some(row.created_at),
            local_created_at: row.created_at,
            delivery_state: DeliveryState::Sent,
        }
    }

    pub fn optimistic(
        client_id: ClientId,
        scope: &ConversationScope,
        sender: &Profile,
        draft: &MessageDraft,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            client_id: Some(client_id),
            conversation_key: scope.key.clone(),
            sender_id: Some(sender.id),
            sender_role: sender.role,
            kind: draft.kind,
            body: draft.body.clone(),
            attachment_refs: draft.attachment_refs.clone(),
            review_status: draft.review_status,
            created_at: None,
            local_created_at: now,
            delivery_state: DeliveryState::Sending,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.id.is_some() && self.delivery_state == DeliveryState::Sent
    }

    /// Timestamp used for ordering: the server's when known, the local one otherwise.
    pub fn sort_at(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or(self.local_created_at)
    }

    pub fn day(&self) -> NaiveDate {
        self.sort_at().date_naive()
    }

    pub fn key(&self) -> Option<MessageKey> {
        self.client_id
            .map(MessageKey::Client)
            .or_else(|| self.id.map(MessageKey::Server))
    }

    pub fn draft(&self) -> MessageDraft {
        MessageDraft {
            kind: self.kind,
            body: self.body.clone(),
            attachment_refs: self.attachment_refs.clone(),
            review_status: self.review_status,
        }
    }
}

/// Merge key: the client id when the message has one, the server id otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Client(ClientId),
    Server(MessageId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub kind: MessageKind,
    pub body: Option<String>,
    pub attachment_refs: Vec<String>,
    pub review_status: Option<ReviewStatus>,
}

impl MessageDraft {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            body: Some(body.into()),
            attachment_refs: Vec::new(),
            review_status: None,
        }
    }

    pub fn feedback(body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Feedback,
            body: Some(body.into()),
            attachment_refs: Vec::new(),
            review_status: Some(ReviewStatus::Pending),
        }
    }

    pub fn photo(kind: MessageKind, reference: impl Into<String>) -> Self {
        Self {
            kind,
            body: None,
            attachment_refs: vec![reference.into()],
            review_status: Some(ReviewStatus::Pending),
        }
    }

    pub fn training_checkin(note: Option<String>) -> Self {
        Self {
            kind: MessageKind::TrainingCheckin,
            body: Some(note.unwrap_or_else(|| "Treino Concluído".to_string())),
            attachment_refs: Vec::new(),
            review_status: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.body.as_deref().map_or(true, |body| body.trim().is_empty())
            && self.attachment_refs.is_empty()
    }

    /// Builds the insert payload. `content` carries the text, or the first attachment
    /// for photo-only messages so older readers still see the image.
    pub fn to_row(
        &self,
        scope: &ConversationScope,
        sender: &Profile,
        client_id: ClientId,
    ) -> NewMessageRow {
        let content = self
            .body
            .clone()
            .filter(|body| !body.trim().is_empty())
            .or_else(|| self.attachment_refs.first().cloned())
            .unwrap_or_default();
        NewMessageRow {
            chat_id: scope.key.clone(),
            student_id: scope.student_id,
            sender_id: sender.id,
            sender_role: sender.role,
            client_id,
            kind: self.kind,
            content,
            attachments: self.attachment_refs.clone(),
            status: self.review_status,
        }
    }
}

/// The conversation a view is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationScope {
    pub key: ConversationKey,
    pub student_id: UserId,
}

fn looks_like_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("https://") || value.starts_with("http://") || value.starts_with("blob:")
}
