use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ClientId, ConversationKey, MessageId, MessageKind, ReviewStatus, Role, UserId};

/// Default and maximum page size for message fetches.
pub const MESSAGE_FETCH_LIMIT: u32 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub role: Role,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_master: Option<bool>,
}

/// A persisted `messages` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub chat_id: ConversationKey,
    #[serde(default)]
    pub student_id: Option<UserId>,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(with = "sender_role")]
    pub sender_role: Role,
    #[serde(default)]
    pub client_id: Option<ClientId>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<ReviewStatus>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for `messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessageRow {
    pub chat_id: ConversationKey,
    pub student_id: UserId,
    pub sender_id: UserId,
    #[serde(with = "sender_role")]
    pub sender_role: Role,
    pub client_id: ClientId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReviewStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewStatusPatch {
    pub status: ReviewStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRow {
    pub id: String,
}

/// A change delivered by the realtime feed for the subscribed conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(MessageRow),
    Update(MessageRow),
    Delete { id: MessageId },
}

/// Phoenix channel frame used by the realtime websocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresChangesPayload {
    pub data: PostgresChange,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresChange {
    #[serde(rename = "type", alias = "eventType")]
    pub change_type: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageUploadResponse {
    #[serde(rename = "Key", alias = "key")]
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub public_url: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordCredentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

/// Token grant response. Sign-up may omit the token fields when email
/// confirmation is required, and then returns the user at the top level.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthTokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub user: Option<AuthUser>,
    #[serde(default)]
    pub id: Option<UserId>,
    #[serde(default)]
    pub email: Option<String>,
}

impl AuthTokenResponse {
    pub fn auth_user(&self) -> Option<AuthUser> {
        self.user.clone().or_else(|| {
            self.id.map(|id| AuthUser {
                id,
                email: self.email.clone(),
            })
        })
    }
}

mod sender_role {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::domain::Role;

    pub fn serialize<S>(role: &Role, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(role.as_sender_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Role, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Role::from_sender_str(&raw)
            .ok_or_else(|| de::Error::custom(format!("unknown sender_role: {raw}")))
    }
}
