//! `ChatBackend` over the hosted platform's HTTP surface: PostgREST tables under
//! `/rest/v1`, password auth under `/auth/v1`, and object storage under `/storage/v1`.

use async_trait::async_trait;
use reqwest::{header, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    domain::{ClientId, ConversationKey, MessageId, ReviewStatus, UserId},
    error::ApiError,
    protocol::{
        AuthTokenResponse, ChatRow, MessageRow, NewMessageRow, Profile, ReviewStatusPatch,
        StorageUploadResponse, StoredObject, MESSAGE_FETCH_LIMIT,
    },
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{
    backend::{BackendResult, ChatBackend, Subscription},
    config::ClientSettings,
    error::BackendError,
    realtime,
};

pub struct RestBackend {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    media_bucket: String,
    access_token: RwLock<Option<String>>,
}

impl RestBackend {
    pub fn new(settings: &ClientSettings) -> BackendResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self::with_client(
            http,
            &settings.backend_url,
            &settings.anon_key,
            &settings.media_bucket,
        ))
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: &str,
        anon_key: &str,
        media_bucket: &str,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            media_bucket: media_bucket.to_string(),
            access_token: RwLock::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = token;
    }

    pub async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    pub fn public_object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.media_bucket,
            path.trim_start_matches('/')
        )
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .access_token
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.anon_key.clone());
        request
            .header("apikey", &self.anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
    }

    async fn execute(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = self.authorize(request).await.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let err = ApiError::from_response(status.as_u16(), &body);
        debug!(status = status.as_u16(), code = ?err.code, "backend request rejected");
        Err(err.into())
    }

    /// `GET /rest/v1/{table}` decoded into `T`.
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> BackendResult<Vec<T>> {
        let response = self
            .execute(self.http.get(self.table_url(table)).query(query))
            .await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|err| BackendError::Decode(format!("{table}: {err}")))
    }

    /// Inserts one row and returns the stored representation.
    pub async fn insert_returning<B, T>(&self, table: &str, body: &B) -> BackendResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(
                self.http
                    .post(self.table_url(table))
                    .header("Prefer", "return=representation")
                    .json(body),
            )
            .await?;
        let mut rows = response
            .json::<Vec<T>>()
            .await
            .map_err(|err| BackendError::Decode(format!("{table}: {err}")))?;
        if rows.is_empty() {
            return Err(BackendError::Decode(format!("{table}: insert returned no rows")));
        }
        Ok(rows.swap_remove(0))
    }

    pub async fn delete_where(&self, table: &str, query: &[(&str, String)]) -> BackendResult<()> {
        self.execute(self.http.delete(self.table_url(table)).query(query))
            .await?;
        Ok(())
    }

    async fn auth_token(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &Value,
    ) -> BackendResult<AuthTokenResponse> {
        let url = format!("{}/auth/v1/{path}", self.base_url);
        let response = self
            .execute(self.http.post(url).query(query).json(body))
            .await?;
        response
            .json::<AuthTokenResponse>()
            .await
            .map_err(|err| BackendError::Decode(format!("auth/{path}: {err}")))
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> BackendResult<AuthTokenResponse> {
        self.auth_token(
            "token",
            &[("grant_type", "password")],
            &serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> BackendResult<AuthTokenResponse> {
        self.auth_token(
            "signup",
            &[],
            &serde_json::json!({
                "email": email,
                "password": password,
                "data": { "name": display_name },
            }),
        )
        .await
    }

    /// Cheap round trip used to report whether the backend is reachable.
    pub async fn health_check(&self) -> BackendResult<()> {
        let _: Vec<Value> = self
            .select(
                "profiles",
                &[("select", "id".to_string()), ("limit", "1".to_string())],
            )
            .await?;
        Ok(())
    }

    async fn stored_message(&self, client_id: ClientId) -> BackendResult<MessageRow> {
        let mut rows: Vec<MessageRow> = self
            .select(
                "messages",
                &[
                    ("select", "*".to_string()),
                    ("client_id", format!("eq.{client_id}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        rows.pop().ok_or_else(|| {
            BackendError::Decode(format!("messages: no stored row for client id {client_id}"))
        })
    }

    pub async fn fetch_profile(&self, user_id: UserId) -> BackendResult<Option<Profile>> {
        let mut rows: Vec<Profile> = self
            .select(
                "profiles",
                &[
                    ("select", "*".to_string()),
                    ("id", format!("eq.{user_id}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.pop())
    }
}

#[async_trait]
impl ChatBackend for RestBackend {
    async fn find_conversation(&self, student_id: UserId) -> BackendResult<Option<ConversationKey>> {
        let rows: Vec<ChatRow> = self
            .select(
                "chats",
                &[
                    ("select", "id".to_string()),
                    ("student_id", format!("eq.{student_id}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().map(|row| ConversationKey(row.id)))
    }

    async fn fetch_messages(
        &self,
        conversation: &ConversationKey,
        limit: u32,
    ) -> BackendResult<Vec<MessageRow>> {
        let limit = limit.clamp(1, MESSAGE_FETCH_LIMIT);
        let raw: Vec<Value> = self
            .select(
                "messages",
                &[
                    ("select", "*".to_string()),
                    ("chat_id", format!("eq.{conversation}")),
                    ("order", "created_at.asc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let mut rows = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<MessageRow>(value) {
                Ok(row) => rows.push(row),
                Err(err) => warn!(conversation = %conversation, "dropping malformed message row: {err}"),
            }
        }
        Ok(rows)
    }

    /// Idempotent per `client_id`: a repeat of an insert the backend already stored
    /// returns the stored row instead of creating a second one.
    async fn insert_message(&self, row: &NewMessageRow) -> BackendResult<MessageRow> {
        let inserted = self
            .execute(
                self.http
                    .post(self.table_url("messages"))
                    .query(&[("on_conflict", "client_id")])
                    .header("Prefer", "resolution=ignore-duplicates,return=representation")
                    .json(row),
            )
            .await;
        let response = match inserted {
            Ok(response) => response,
            Err(err) if err.is_duplicate() => {
                debug!(client_id = %row.client_id, "insert conflicted on client id; loading stored row");
                return self.stored_message(row.client_id).await;
            }
            Err(err) => return Err(err),
        };

        let mut rows = response
            .json::<Vec<MessageRow>>()
            .await
            .map_err(|err| BackendError::Decode(format!("messages: {err}")))?;
        match rows.pop() {
            Some(stored) => Ok(stored),
            None => {
                debug!(client_id = %row.client_id, "duplicate insert ignored; loading stored row");
                self.stored_message(row.client_id).await
            }
        }
    }

    async fn update_review_status(
        &self,
        id: MessageId,
        status: ReviewStatus,
    ) -> BackendResult<()> {
        self.execute(
            self.http
                .patch(self.table_url("messages"))
                .query(&[("id", format!("eq.{id}"))])
                .json(&ReviewStatusPatch { status }),
        )
        .await?;
        Ok(())
    }

    async fn delete_message(&self, id: MessageId) -> BackendResult<()> {
        self.delete_where("messages", &[("id", format!("eq.{id}"))])
            .await
    }

    async fn upsert_profile(&self, profile: &Profile) -> BackendResult<()> {
        self.execute(
            self.http
                .post(self.table_url("profiles"))
                .query(&[("on_conflict", "id")])
                .header("Prefer", "resolution=merge-duplicates")
                .json(profile),
        )
        .await?;
        Ok(())
    }

    async fn subscribe(&self, conversation: &ConversationKey) -> BackendResult<Subscription> {
        let token = self.access_token().await;
        realtime::subscribe(&self.base_url, &self.anon_key, token.as_deref(), conversation).await
    }

    async fn upload_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BackendResult<StoredObject> {
        let path = path.trim_start_matches('/');
        let size_bytes = bytes.len() as u64;
        let url = format!(
            "{}/storage/v1/object/{}/{path}",
            self.base_url, self.media_bucket
        );
        let response = self
            .execute(
                self.http
                    .post(url)
                    .header(header::CONTENT_TYPE, content_type)
                    .header("x-upsert", "false")
                    .body(bytes),
            )
            .await?;
        let uploaded = response
            .json::<StorageUploadResponse>()
            .await
            .map_err(|err| BackendError::Decode(format!("storage upload: {err}")))?;
        debug!(key = %uploaded.key, size_bytes, "uploaded object");
        Ok(StoredObject {
            public_url: self.public_object_url(path),
            size_bytes,
        })
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
