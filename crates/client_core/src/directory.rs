//! Coach-side student management.

use std::sync::Arc;

use shared::{
    domain::{MessageKind, Role, UserId},
    protocol::{MessageRow, Profile},
};
use tracing::info;

use crate::{error::DirectoryError, rest::RestBackend, types::ChatMessage};

pub type Result<T> = std::result::Result<T, DirectoryError>;

pub const RECENT_MEALS: u32 = 3;

/// Latest activity of one student, newest first where there are several.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentSummary {
    pub last_training: Option<ChatMessage>,
    pub recent_meals: Vec<ChatMessage>,
    pub last_feedback: Option<ChatMessage>,
}

pub struct CoachDirectory {
    backend: Arc<RestBackend>,
}

impl CoachDirectory {
    pub fn new(backend: Arc<RestBackend>) -> Self {
        Self { backend }
    }

    pub async fn list_students(&self) -> Result<Vec<Profile>> {
        let students = self
            .backend
            .select(
                "profiles",
                &[
                    ("select", "*".to_string()),
                    ("role", format!("eq.{}", Role::Student.as_profile_str())),
                    ("order", "name.asc".to_string()),
                ],
            )
            .await?;
        Ok(students)
    }

    pub async fn student_summary(&self, student_id: UserId) -> Result<StudentSummary> {
        let (training, meals, feedback) = futures::try_join!(
            self.latest(student_id, MessageKind::TrainingCheckin, 1),
            self.latest(student_id, MessageKind::MealPhoto, RECENT_MEALS),
            self.latest(student_id, MessageKind::Feedback, 1),
        )?;
        Ok(StudentSummary {
            last_training: training.into_iter().next(),
            recent_meals: meals,
            last_feedback: feedback.into_iter().next(),
        })
    }

    pub async fn create_student(&self, name: &str, email: &str) -> Result<Profile> {
        let name = name.trim();
        let email = email.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(DirectoryError::InvalidInput("student name is required".into()));
        }
        if !email.contains('@') {
            return Err(DirectoryError::InvalidInput(format!(
                "'{email}' is not an email address"
            )));
        }

        let profile = Profile {
            id: UserId::new(),
            role: Role::Student,
            name: name.to_string(),
            email,
            avatar_url: None,
            is_master: Some(false),
        };
        let created: Profile = self.backend.insert_returning("profiles", &profile).await?;
        info!(student_id = %created.id, "student created");
        Ok(created)
    }

    /// Removes the student's messages, then the profile itself.
    pub async fn delete_student(&self, student_id: UserId) -> Result<()> {
        self.backend
            .delete_where("messages", &[("student_id", format!("eq.{student_id}"))])
            .await?;
        self.backend
            .delete_where("profiles", &[("id", format!("eq.{student_id}"))])
            .await?;
        info!(student_id = %student_id, "student deleted");
        Ok(())
    }

    async fn latest(
        &self,
        student_id: UserId,
        kind: MessageKind,
        limit: u32,
    ) -> Result<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = self
            .backend
            .select(
                "messages",
                &[
                    ("select", "*".to_string()),
                    ("student_id", format!("eq.{student_id}")),
                    ("type", format!("eq.{}", kind.as_str())),
                    ("order", "created_at.desc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(ChatMessage::from_row).collect())
    }
}

#[cfg(test)]
#[path = "tests/directory_tests.rs"]
mod tests;
