//! Per-account notification ledger entries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Actor id used for moderation notices.
pub const MODERATION_ACTOR_ID: &str = "EDURESOLVE";
const MODERATION_ACTOR_NAME: &str = "Team EduResolve";
const MODERATION_CATEGORY: &str = "Message Deleted: Due to violation of the terms of EduResolve";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub actor_id: String,
    pub actor_name: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub count: i32,
}

impl Notification {
    #[must_use]
    pub fn from_event(event: &NotificationEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: event.actor_id.clone(),
            actor_name: event.actor_name.clone(),
            category: event.category.clone(),
            created_at: Utc::now(),
            count: 1,
        }
    }

    /// Fold a repeat event from the same actor into this entry.
    pub fn coalesce(&mut self, event: &NotificationEvent) {
        self.count = self.count.saturating_add(1);
        self.actor_name.clone_from(&event.actor_name);
        self.category.clone_from(&event.category);
        self.created_at = Utc::now();
    }
}

/// Something that happened to an account, keyed by the actor that caused it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationEvent {
    pub actor_id: String,
    pub actor_name: String,
    pub category: String,
}

impl NotificationEvent {
    #[must_use]
    pub fn new(actor_id: impl Into<String>, actor_name: impl Into<String>, category: &str) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_name: actor_name.into(),
            category: category.to_string(),
        }
    }

    #[must_use]
    pub fn reply(sender_id: Uuid, sender_name: &str) -> Self {
        Self::new(sender_id.to_string(), sender_name, "Reply")
    }

    #[must_use]
    pub fn assignment(teacher_id: Uuid, teacher_name: &str) -> Self {
        Self::new(teacher_id.to_string(), teacher_name, "Assignment")
    }

    #[must_use]
    pub fn submission(student_id: Uuid, student_name: &str) -> Self {
        Self::new(student_id.to_string(), student_name, "Assignment Submit")
    }

    #[must_use]
    pub fn moderation() -> Self {
        Self::new(
            MODERATION_ACTOR_ID,
            MODERATION_ACTOR_NAME,
            MODERATION_CATEGORY,
        )
    }
}
