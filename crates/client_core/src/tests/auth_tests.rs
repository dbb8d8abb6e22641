use axum::http::Method;
use serde_json::json;

use super::*;
use crate::mock_backend::{spawn_mock_backend, MockState};

async fn service_for(state: &MockState) -> (AuthService, Arc<RestBackend>, Storage) {
    let base_url = spawn_mock_backend(state.clone())
        .await
        .expect("spawn mock backend");
    let backend = Arc::new(RestBackend::with_client(
        reqwest::Client::new(),
        &base_url,
        "anon-key",
        "uploads",
    ));
    let storage = Storage::new("sqlite::memory:").await.expect("storage");
    (
        AuthService::new(Arc::clone(&backend), storage.clone()),
        backend,
        storage,
    )
}

#[tokio::test]
async fn sign_in_uses_existing_profile_and_persists_session() {
    let state = MockState::new();
    let user_id = state.add_user("coach@example.com", "2404").await;
    state
        .seed(
            "profiles",
            json!({
                "id": user_id,
                "role": "COACH",
                "name": "Coach Garcia",
                "email": "coach@example.com",
                "is_master": true
            }),
        )
        .await;
    let (auth, backend, storage) = service_for(&state).await;

    let session = auth
        .sign_in("  Coach@Example.com ", "2404")
        .await
        .expect("sign in");

    assert_eq!(session.profile.role, Role::Coach);
    assert_eq!(session.profile.name, "Coach Garcia");
    assert_eq!(session.access_token, format!("token-{user_id}"));
    assert!(session.expires_at.is_some());
    assert_eq!(backend.access_token().await, Some(session.access_token.clone()));
    let stored = storage.load_session().await.expect("load").expect("stored");
    assert_eq!(stored.user_id, session.profile.id);
    assert_eq!(stored.role, Role::Coach);
}

#[tokio::test]
async fn unknown_account_is_registered_as_student() {
    let state = MockState::new();
    let (auth, _, _) = service_for(&state).await;

    let session = auth
        .sign_in("nova.aluna@example.com", "segredo")
        .await
        .expect("sign up path");

    assert_eq!(session.profile.role, Role::Student);
    assert_eq!(session.profile.name, "nova.aluna");
    assert_eq!(state.requests_to(Method::POST, "/auth/v1/signup").await.len(), 1);
    let profiles = state.rows("profiles").await;
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0]["role"], "ALUNO");
    assert_eq!(profiles[0]["email"], "nova.aluna@example.com");
}

#[tokio::test]
async fn wrong_password_for_existing_account_is_invalid_credentials() {
    let state = MockState::new();
    state.add_user("ivanete@example.com", "certa").await;
    let (auth, backend, storage) = service_for(&state).await;

    let err = auth
        .sign_in("ivanete@example.com", "errada")
        .await
        .expect_err("invalid");

    assert!(matches!(err, AuthError::InvalidCredentials));
    assert!(backend.access_token().await.is_none());
    assert!(storage.load_session().await.expect("load").is_none());
}

#[tokio::test]
async fn sign_up_without_session_requires_confirmation() {
    let mut state = MockState::new();
    state.signup_returns_session = false;
    let (auth, _, storage) = service_for(&state).await;

    let err = auth
        .sign_in("pendente@example.com", "segredo")
        .await
        .expect_err("confirmation");

    assert!(matches!(err, AuthError::ConfirmationRequired));
    assert!(storage.load_session().await.expect("load").is_none());
}

#[tokio::test]
async fn restore_and_sign_out_round_trip() {
    let state = MockState::new();
    state.add_user("ivanete@example.com", "certa").await;
    let (auth, backend, storage) = service_for(&state).await;
    let session = auth
        .sign_in("ivanete@example.com", "certa")
        .await
        .expect("sign in");
    backend.set_access_token(None).await;

    let restored = auth.restore().await.expect("restore").expect("session");
    assert_eq!(restored.profile.id, session.profile.id);
    assert_eq!(backend.access_token().await, Some(session.access_token));

    auth.sign_out().await.expect("sign out");
    assert!(backend.access_token().await.is_none());
    assert!(storage.load_session().await.expect("load").is_none());
    assert!(auth.restore().await.expect("restore").is_none());
}

#[tokio::test]
async fn expired_session_is_cleared_on_restore() {
    let state = MockState::new();
    let (auth, _, storage) = service_for(&state).await;
    storage
        .save_session(&StoredSession {
            user_id: shared::domain::UserId::new(),
            email: "old@example.com".into(),
            name: "old".into(),
            role: Role::Student,
            access_token: "stale".into(),
            refresh_token: None,
            expires_at: Some(Utc::now() - Duration::minutes(5)),
        })
        .await
        .expect("save");

    let err = auth.restore().await.expect_err("expired");

    assert!(matches!(err, AuthError::SessionExpired));
    assert!(storage.load_session().await.expect("load").is_none());
}

#[test]
fn display_name_is_email_local_part() {
    assert_eq!(default_display_name("maria.silva@example.com"), "maria.silva");
    assert_eq!(default_display_name("no-at-sign"), "no-at-sign");
}
