use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Postgres error code for a foreign key violation.
pub const PG_FOREIGN_KEY_VIOLATION: &str = "23503";
/// Postgres error code for a unique constraint violation.
pub const PG_UNIQUE_VIOLATION: &str = "23505";
/// Postgres error code for an undefined table.
pub const PG_UNDEFINED_TABLE: &str = "42P01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    ForeignKey,
    MissingRelation,
    RateLimited,
    Internal,
}

/// Error body as returned by the hosted REST, auth and storage endpoints.
/// The three surfaces disagree on field names, hence the aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?} (status {status}): {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg_code: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, status: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
            pg_code: None,
        }
    }

    /// Builds an error from a non-success response. Unparseable bodies are kept verbatim
    /// as the message.
    pub fn from_response(status: u16, raw_body: &str) -> Self {
        let body = serde_json::from_str::<ErrorBody>(raw_body).unwrap_or_default();
        let pg_code = body.code.as_ref().and_then(|value| match value {
            serde_json::Value::String(code) => Some(code.clone()),
            serde_json::Value::Number(code) => Some(code.to_string()),
            _ => None,
        });
        let message = body
            .message
            .clone()
            .or_else(|| body.error_description.clone())
            .or_else(|| body.error.clone())
            .or_else(|| body.details.clone())
            .unwrap_or_else(|| raw_body.trim().to_string());

        let lower = message.to_ascii_lowercase();
        let code = if pg_code.as_deref() == Some(PG_FOREIGN_KEY_VIOLATION)
            || lower.contains("foreign key")
        {
            ErrorCode::ForeignKey
        } else if pg_code.as_deref() == Some(PG_UNDEFINED_TABLE) {
            ErrorCode::MissingRelation
        } else {
            match status {
                400 | 422 => ErrorCode::Validation,
                401 => ErrorCode::Unauthorized,
                403 => ErrorCode::Forbidden,
                404 => ErrorCode::NotFound,
                409 => ErrorCode::Conflict,
                429 => ErrorCode::RateLimited,
                _ => ErrorCode::Internal,
            }
        };

        Self {
            code,
            status,
            message,
            pg_code,
        }
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        self.code == ErrorCode::ForeignKey
    }

    pub fn is_unique_violation(&self) -> bool {
        self.pg_code.as_deref() == Some(PG_UNIQUE_VIOLATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_postgres_foreign_key_code() {
        let err = ApiError::from_response(
            409,
            r#"{"code":"23503","message":"insert or update on table \"messages\" violates constraint","details":null,"hint":null}"#,
        );
        assert!(err.is_foreign_key_violation());
        assert_eq!(err.pg_code.as_deref(), Some("23503"));
    }

    #[test]
    fn classifies_foreign_key_by_message_text() {
        let err = ApiError::from_response(400, r#"{"message":"violates foreign key constraint"}"#);
        assert_eq!(err.code, ErrorCode::ForeignKey);
    }

    #[test]
    fn unique_violation_is_a_conflict() {
        let err = ApiError::from_response(
            409,
            r#"{"code":"23505","message":"duplicate key value violates unique constraint \"messages_client_id_key\""}"#,
        );
        assert_eq!(err.code, ErrorCode::Conflict);
        assert!(err.is_unique_violation());
        assert!(!err.is_foreign_key_violation());
    }

    #[test]
    fn keeps_plain_text_bodies() {
        let err = ApiError::from_response(502, "bad gateway\n");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "bad gateway");
    }

    #[test]
    fn maps_missing_table_code() {
        let err = ApiError::from_response(
            404,
            r#"{"code":"42P01","message":"relation \"public.chats\" does not exist"}"#,
        );
        assert_eq!(err.code, ErrorCode::MissingRelation);
    }

    #[test]
    fn reads_auth_error_description() {
        let err = ApiError::from_response(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.message, "Invalid login credentials");
    }
}
