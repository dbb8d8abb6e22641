use chrono::NaiveDate;
use shared::domain::Role;

use crate::types::ChatMessage;

#[derive(Debug, Clone, PartialEq)]
pub struct DayGroup {
    pub day: NaiveDate,
    pub messages: Vec<ChatMessage>,
}

impl DayGroup {
    pub fn label(&self) -> String {
        self.day.format("%Y-%m-%d").to_string()
    }
}

/// Splits an ordered snapshot into calendar days, keeping order within each day.
pub fn group_by_day(messages: &[ChatMessage]) -> Vec<DayGroup> {
    let mut groups: Vec<DayGroup> = Vec::new();
    for message in messages {
        let day = message.day();
        match groups.last_mut() {
            Some(group) if group.day == day => group.messages.push(message.clone()),
            _ => groups.push(DayGroup {
                day,
                messages: vec![message.clone()],
            }),
        }
    }
    groups
}

/// Only a coach reviews, and only a student's meal or body photo.
pub fn can_review(viewer: Role, message: &ChatMessage) -> bool {
    viewer == Role::Coach && message.sender_role == Role::Student && message.kind.is_photo()
}
