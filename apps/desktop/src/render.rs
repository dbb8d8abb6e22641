use client_core::{ChatMessage, DayGroup, DeliveryState, StudentSummary};
use shared::{domain::Role, protocol::Profile};
use storage::{ActivityRecord, StoredDocument};

pub fn message_line(message: &ChatMessage) -> String {
    let who = match message.sender_role {
        Role::Coach => "coach",
        Role::Student => "aluno",
    };
    let mut line = format!(
        "{} {who:<5} [{}]",
        message.sort_at().format("%H:%M"),
        message.kind.as_str()
    );
    if let Some(body) = &message.body {
        line.push(' ');
        line.push_str(body);
    }
    for reference in &message.attachment_refs {
        line.push_str(&format!(" <{reference}>"));
    }
    if let Some(status) = message.review_status {
        line.push_str(&format!(" ({})", status.as_str()));
    }
    match message.delivery_state {
        DeliveryState::Sent => {}
        DeliveryState::Sending => line.push_str(" …"),
        DeliveryState::Failed => line.push_str(" [failed]"),
    }
    match message.id {
        Some(id) => line.push_str(&format!(" #{id}")),
        None => {
            if let Some(client_id) = message.client_id {
                line.push_str(&format!(" ~{client_id}"));
            }
        }
    }
    line
}

pub fn print_days(groups: &[DayGroup]) {
    if groups.is_empty() {
        println!("(no messages)");
    }
    for group in groups {
        println!("── {} ──", group.label());
        for message in &group.messages {
            println!("  {}", message_line(message));
        }
    }
}

pub fn print_profiles(profiles: &[Profile]) {
    if profiles.is_empty() {
        println!("(no students)");
    }
    for profile in profiles {
        println!("{}  {:<24} {}", profile.id, profile.name, profile.email);
    }
}

pub fn print_summary(summary: &StudentSummary) {
    match &summary.last_training {
        Some(message) => println!("last training:  {}", message_line(message)),
        None => println!("last training:  -"),
    }
    if summary.recent_meals.is_empty() {
        println!("recent meals:   -");
    }
    for message in &summary.recent_meals {
        println!("recent meal:    {}", message_line(message));
    }
    match &summary.last_feedback {
        Some(message) => println!("last feedback:  {}", message_line(message)),
        None => println!("last feedback:  -"),
    }
}

pub fn activity_line(record: &ActivityRecord) -> String {
    let mut line = format!(
        "{} {:<8} {}",
        record.recorded_at.format("%Y-%m-%d %H:%M"),
        record.kind.as_str(),
        record.label.as_deref().unwrap_or("-")
    );
    if let Some(status) = record.status {
        line.push_str(&format!(" ({})", status.as_str()));
    }
    if let Some(image_ref) = &record.image_ref {
        line.push_str(&format!(" <{image_ref}>"));
    }
    line
}

pub fn document_line(document: &StoredDocument) -> String {
    let confirmed = match document.confirmed_at {
        Some(at) => format!("confirmed {}", at.format("%Y-%m-%d")),
        None => "not confirmed".to_string(),
    };
    format!(
        "{} {:<9} {} <{}> {confirmed}",
        document.id,
        document.kind.as_str(),
        document.name,
        document.url
    )
}
