//! Student check-ins and meal logging: posted to the conversation and mirrored in
//! the local activity log.

use chrono::Utc;
use shared::domain::{MessageKind, Role, UserId};
use storage::{ActivityRecord, Storage};
use tracing::{info, warn};

use crate::{
    conversation::{Conversation, SendReport},
    error::ActivityError,
    types::{DeliveryState, MessageDraft},
};

pub type Result<T> = std::result::Result<T, ActivityError>;

#[derive(Debug, Clone, PartialEq)]
pub enum CheckInOutcome {
    Recorded {
        record: ActivityRecord,
        report: SendReport,
    },
    /// Already checked in today; nothing was sent.
    AlreadyCheckedIn,
}

/// Claims today's check-in locally, then posts it. If the message does not reach
/// the backend the local entry is rolled back so the student can check in again.
pub async fn check_in(
    conversation: &Conversation,
    storage: &Storage,
    note: Option<String>,
) -> Result<CheckInOutcome> {
    let student_id = student_id(conversation)?;
    let Some(record) = storage.record_training_checkin(student_id, Utc::now()).await? else {
        info!(student_id = %student_id, "training already checked in today");
        return Ok(CheckInOutcome::AlreadyCheckedIn);
    };

    let sent = conversation.send(MessageDraft::training_checkin(note)).await;
    let report = match sent {
        Ok(report) if report.delivery_state == DeliveryState::Sent => report,
        Ok(report) => {
            release(storage, &record).await;
            return Err(ActivityError::NotDelivered(report.client_id));
        }
        Err(err) => {
            release(storage, &record).await;
            return Err(err.into());
        }
    };
    Ok(CheckInOutcome::Recorded { record, report })
}

/// Sends the meal photo and, once delivered, logs it locally as the next "Refeição N".
pub async fn log_meal(
    conversation: &Conversation,
    storage: &Storage,
    photo: Vec<u8>,
) -> Result<(ActivityRecord, SendReport)> {
    let student_id = student_id(conversation)?;
    let report = conversation
        .send_photo(MessageKind::MealPhoto, photo)
        .await?;
    if report.delivery_state != DeliveryState::Sent {
        return Err(ActivityError::NotDelivered(report.client_id));
    }
    let image_ref = conversation
        .message_by_client_id(report.client_id)
        .await
        .and_then(|message| message.attachment_refs.first().cloned())
        .unwrap_or_default();
    let record = storage.record_meal(student_id, &image_ref, Utc::now()).await?;
    info!(student_id = %student_id, label = ?record.label, "meal logged");
    Ok((record, report))
}

async fn release(storage: &Storage, record: &ActivityRecord) {
    match storage.remove_activity(record.id).await {
        Ok(_) => info!(student_id = %record.student_id, "check-in not delivered; released today's slot"),
        Err(err) => warn!(student_id = %record.student_id, "failed to roll back check-in: {err:#}"),
    }
}

fn student_id(conversation: &Conversation) -> Result<UserId> {
    let identity = conversation.identity();
    if identity.role != Role::Student {
        return Err(ActivityError::NotAStudent);
    }
    Ok(identity.id)
}

#[cfg(test)]
#[path = "tests/activity_tests.rs"]
mod tests;
