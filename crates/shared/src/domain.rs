use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! uuid_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(MessageId);

uuid_newtype!(UserId);
uuid_newtype!(ClientId);

/// Identifies one coach/student conversation. Either the id of a `chats` row or,
/// when no such row exists, the student's own id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(pub String);

impl ConversationKey {
    pub fn for_student(student_id: UserId) -> Self {
        Self(student_id.0.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Profile role. Stored in `profiles.role` as `COACH`/`ALUNO`, and in
/// `messages.sender_role` as `coach`/`student`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "COACH", alias = "coach")]
    Coach,
    #[serde(rename = "ALUNO", alias = "STUDENT", alias = "student")]
    Student,
}

impl Role {
    pub fn as_profile_str(self) -> &'static str {
        match self {
            Role::Coach => "COACH",
            Role::Student => "ALUNO",
        }
    }

    pub fn as_sender_str(self) -> &'static str {
        match self {
            Role::Coach => "coach",
            Role::Student => "student",
        }
    }

    pub fn from_sender_str(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "coach" => Some(Role::Coach),
            "student" | "aluno" => Some(Role::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "meal")]
    MealPhoto,
    #[serde(rename = "body")]
    BodyPhoto,
    #[serde(rename = "training")]
    TrainingCheckin,
    #[serde(rename = "feedback")]
    Feedback,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::MealPhoto => "meal",
            MessageKind::BodyPhoto => "body",
            MessageKind::TrainingCheckin => "training",
            MessageKind::Feedback => "feedback",
        }
    }

    pub fn is_photo(self) -> bool {
        matches!(self, MessageKind::MealPhoto | MessageKind::BodyPhoto)
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(MessageKind::Text),
            "meal" => Ok(MessageKind::MealPhoto),
            "body" => Ok(MessageKind::BodyPhoto),
            "training" => Ok(MessageKind::TrainingCheckin),
            "feedback" => Ok(MessageKind::Feedback),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewStatus {
    #[serde(rename = "PENDENTE")]
    Pending,
    #[serde(rename = "OK")]
    Approved,
    #[serde(rename = "AJUSTAR")]
    NeedsAdjustment,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "PENDENTE",
            ReviewStatus::Approved => "OK",
            ReviewStatus::NeedsAdjustment => "AJUSTAR",
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDENTE" | "PENDING" => Ok(ReviewStatus::Pending),
            "OK" | "APPROVED" => Ok(ReviewStatus::Approved),
            "AJUSTAR" | "NEEDS-ADJUSTMENT" | "NEEDS_ADJUSTMENT" => {
                Ok(ReviewStatus::NeedsAdjustment)
            }
            other => Err(format!("unknown review status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Training,
    Meal,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Training => "training",
            ActivityKind::Meal => "meal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Workout,
    MealPlan,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Workout => "workout",
            DocumentKind::MealPlan => "meal_plan",
        }
    }
}
