use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use uuid::Uuid;

use shared::domain::{ActivityKind, DocumentKind, ReviewStatus, Role, UserId};

/// Local persistence for the signed-in device: the active session, the student's
/// activity log and their plan documents.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub student_id: UserId,
    pub kind: ActivityKind,
    pub recorded_at: DateTime<Utc>,
    pub image_ref: Option<String>,
    pub notes: Option<String>,
    pub label: Option<String>,
    pub status: Option<ReviewStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: Uuid,
    pub student_id: UserId,
    pub kind: DocumentKind,
    pub name: String,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database sees its own empty database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn save_session(&self, session: &StoredSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO session (slot, user_id, email, name, role, access_token, refresh_token, expires_at)
             VALUES (1, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(slot) DO UPDATE SET
                user_id = excluded.user_id,
                email = excluded.email,
                name = excluded.name,
                role = excluded.role,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at",
        )
        .bind(session.user_id.0.to_string())
        .bind(&session.email)
        .bind(&session.name)
        .bind(session.role.as_profile_str())
        .bind(&session.access_token)
        .bind(session.refresh_token.as_deref())
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .context("failed to persist session")?;
        Ok(())
    }

    pub async fn load_session(&self) -> Result<Option<StoredSession>> {
        let row = sqlx::query(
            "SELECT user_id, email, name, role, access_token, refresh_token, expires_at
             FROM session WHERE slot = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<StoredSession> {
            Ok(StoredSession {
                user_id: parse_user_id(&r.get::<String, _>(0))?,
                email: r.get(1),
                name: r.get(2),
                role: parse_role(&r.get::<String, _>(3))?,
                access_token: r.get(4),
                refresh_token: r.get(5),
                expires_at: r.get(6),
            })
        })
        .transpose()
    }

    pub async fn clear_session(&self) -> Result<()> {
        sqlx::query("DELETE FROM session")
            .execute(&self.pool)
            .await
            .context("failed to clear session")?;
        Ok(())
    }

    /// Records a training check-in. Only one check-in per student per calendar day is
    /// kept; a repeat on the same day returns `None`.
    pub async fn record_training_checkin(
        &self,
        student_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<ActivityRecord>> {
        let record = ActivityRecord {
            id: Uuid::new_v4(),
            student_id,
            kind: ActivityKind::Training,
            recorded_at: at,
            image_ref: None,
            notes: None,
            label: Some("Treino Concluído".to_string()),
            status: None,
        };
        let result = sqlx::query(
            "INSERT OR IGNORE INTO activities (id, student_id, kind, day, recorded_at, image_ref, notes, label, status)
             VALUES (?, ?, ?, ?, ?, NULL, NULL, ?, NULL)",
        )
        .bind(record.id.to_string())
        .bind(student_id.0.to_string())
        .bind(ActivityKind::Training.as_str())
        .bind(day_key(at.date_naive()))
        .bind(at)
        .bind(record.label.as_deref())
        .execute(&self.pool)
        .await
        .context("failed to record training check-in")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(record))
    }

    pub async fn record_meal(
        &self,
        student_id: UserId,
        image_ref: &str,
        at: DateTime<Utc>,
    ) -> Result<ActivityRecord> {
        let mut tx = self.pool.begin().await?;
        let previous: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM activities WHERE student_id = ? AND kind = ?")
                .bind(student_id.0.to_string())
                .bind(ActivityKind::Meal.as_str())
                .fetch_one(&mut *tx)
                .await?;

        let record = ActivityRecord {
            id: Uuid::new_v4(),
            student_id,
            kind: ActivityKind::Meal,
            recorded_at: at,
            image_ref: Some(image_ref.to_string()),
            notes: None,
            label: Some(format!("Refeição {}", previous + 1)),
            status: Some(ReviewStatus::Pending),
        };
        sqlx::query(
            "INSERT INTO activities (id, student_id, kind, day, recorded_at, image_ref, notes, label, status)
             VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(student_id.0.to_string())
        .bind(ActivityKind::Meal.as_str())
        .bind(day_key(at.date_naive()))
        .bind(at)
        .bind(image_ref)
        .bind(record.label.as_deref())
        .bind(ReviewStatus::Pending.as_str())
        .execute(&mut *tx)
        .await
        .context("failed to record meal")?;
        tx.commit().await?;
        Ok(record)
    }

    /// Drops one activity entry, e.g. a check-in whose message never reached the
    /// coach. Returns false when there was nothing to remove.
    pub async fn remove_activity(&self, activity_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM activities WHERE id = ?")
            .bind(activity_id.to_string())
            .execute(&self.pool)
            .await
            .context("failed to remove activity")?;
        Ok(result.rows_affected() > 0)
    }

    /// Newest first.
    pub async fn list_activities(&self, student_id: UserId) -> Result<Vec<ActivityRecord>> {
        let rows = sqlx::query(
            "SELECT id, student_id, kind, recorded_at, image_ref, notes, label, status
             FROM activities
             WHERE student_id = ?
             ORDER BY recorded_at DESC",
        )
        .bind(student_id.0.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(activity_from_row).collect()
    }

    pub async fn has_trained_on(&self, student_id: UserId, day: NaiveDate) -> Result<bool> {
        Ok(self
            .count_activities_on(student_id, ActivityKind::Training, day)
            .await?
            > 0)
    }

    pub async fn meals_on(&self, student_id: UserId, day: NaiveDate) -> Result<i64> {
        self.count_activities_on(student_id, ActivityKind::Meal, day)
            .await
    }

    async fn count_activities_on(
        &self,
        student_id: UserId,
        kind: ActivityKind,
        day: NaiveDate,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM activities WHERE student_id = ? AND kind = ? AND day = ?",
        )
        .bind(student_id.0.to_string())
        .bind(kind.as_str())
        .bind(day_key(day))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn upsert_document(&self, document: &StoredDocument) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents (id, student_id, kind, name, url, uploaded_at, confirmed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                url = excluded.url,
                uploaded_at = excluded.uploaded_at",
        )
        .bind(document.id.to_string())
        .bind(document.student_id.0.to_string())
        .bind(document.kind.as_str())
        .bind(&document.name)
        .bind(&document.url)
        .bind(document.uploaded_at)
        .bind(document.confirmed_at)
        .execute(&self.pool)
        .await
        .context("failed to upsert document")?;
        Ok(())
    }

    /// Returns false when the document does not exist.
    pub async fn confirm_document(&self, document_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE documents SET confirmed_at = ? WHERE id = ?")
            .bind(at)
            .bind(document_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_documents(&self, student_id: UserId) -> Result<Vec<StoredDocument>> {
        let rows = sqlx::query(
            "SELECT id, student_id, kind, name, url, uploaded_at, confirmed_at
             FROM documents
             WHERE student_id = ?
             ORDER BY uploaded_at DESC",
        )
        .bind(student_id.0.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<StoredDocument> {
                Ok(StoredDocument {
                    id: parse_uuid(&r.get::<String, _>(0))?,
                    student_id: parse_user_id(&r.get::<String, _>(1))?,
                    kind: parse_document_kind(&r.get::<String, _>(2))?,
                    name: r.get(3),
                    url: r.get(4),
                    uploaded_at: r.get(5),
                    confirmed_at: r.get(6),
                })
            })
            .collect()
    }
}

fn activity_from_row(r: &SqliteRow) -> Result<ActivityRecord> {
    let kind = match r.get::<String, _>(2).as_str() {
        "training" => ActivityKind::Training,
        "meal" => ActivityKind::Meal,
        other => return Err(anyhow!("unknown activity kind in local store: {other}")),
    };
    let status = r
        .get::<Option<String>, _>(7)
        .map(|raw| ReviewStatus::from_str(&raw).map_err(|e| anyhow!(e)))
        .transpose()?;
    Ok(ActivityRecord {
        id: parse_uuid(&r.get::<String, _>(0))?,
        student_id: parse_user_id(&r.get::<String, _>(1))?,
        kind,
        recorded_at: r.get(3),
        image_ref: r.get(4),
        notes: r.get(5),
        label: r.get(6),
        status,
    })
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid uuid in local store: {raw}"))
}

fn parse_user_id(raw: &str) -> Result<UserId> {
    parse_uuid(raw).map(UserId)
}

fn parse_role(raw: &str) -> Result<Role> {
    match raw {
        "COACH" => Ok(Role::Coach),
        "ALUNO" => Ok(Role::Student),
        other => Err(anyhow!("unknown role in local store: {other}")),
    }
}

fn parse_document_kind(raw: &str) -> Result<DocumentKind> {
    match raw {
        "workout" => Ok(DocumentKind::Workout),
        "meal_plan" => Ok(DocumentKind::MealPlan),
        other => Err(anyhow!("unknown document kind in local store: {other}")),
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
