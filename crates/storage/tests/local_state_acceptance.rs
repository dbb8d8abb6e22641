use chrono::Utc;
use shared::domain::{Role, UserId};
use storage::{Storage, StoredSession};

#[tokio::test]
async fn session_and_activity_log_survive_reopen() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("focuscoach.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));
    let student = UserId::new();

    {
        let storage = Storage::new(&database_url).await.expect("db");
        storage
            .save_session(&StoredSession {
                user_id: student,
                email: "aluno@example.com".into(),
                name: "aluno".into(),
                role: Role::Student,
                access_token: "token".into(),
                refresh_token: None,
                expires_at: None,
            })
            .await
            .expect("save session");
        storage
            .record_training_checkin(student, Utc::now())
            .await
            .expect("check-in")
            .expect("first check-in of the day");
    }

    let reopened = Storage::new(&database_url).await.expect("reopen");
    let session = reopened
        .load_session()
        .await
        .expect("load")
        .expect("session persisted");
    assert_eq!(session.user_id, student);
    assert!(reopened
        .record_training_checkin(student, Utc::now())
        .await
        .expect("second check-in")
        .is_none());
}
