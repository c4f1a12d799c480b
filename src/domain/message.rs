//! Message threads, replies and the vote/report sets attached to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use super::account::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    Student,
    Teacher,
    Mentor,
}

impl SenderKind {
    #[must_use]
    pub const fn from_role(role: Role) -> Option<Self> {
        match role {
            Role::Student => Some(Self::Student),
            Role::Teacher => Some(Self::Teacher),
            Role::Mentor => Some(Self::Mentor),
            Role::LocalAdmin | Role::GlobalAdmin => None,
        }
    }

    #[must_use]
    pub const fn role(self) -> Role {
        match self {
            Self::Student => Role::Student,
            Self::Teacher => Role::Teacher,
            Self::Mentor => Role::Mentor,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Mentor => "mentor",
        }
    }

    /// Staff replies are listed ahead of student replies.
    #[must_use]
    pub const fn is_staff(self) -> bool {
        matches!(self, Self::Teacher | Self::Mentor)
    }
}

impl FromStr for SenderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "student" => Ok(Self::Student),
            "teacher" => Ok(Self::Teacher),
            "mentor" => Ok(Self::Mentor),
            other => Err(format!("unknown sender kind: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_kind: SenderKind,
    pub sender_name: String,
    pub sender_gender: Option<String>,
    pub body: String,
    pub image_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageThread {
    pub id: String,
    pub author_id: Uuid,
    pub author_name: String,
    pub author_gender: Option<String>,
    pub body: String,
    pub image_key: Option<String>,
    pub tags: Vec<String>,
    pub school: String,
    pub created_at: DateTime<Utc>,
    pub replies: Vec<Reply>,
    pub upvoters: Vec<Uuid>,
    pub downvoters: Vec<Uuid>,
    #[serde(skip)]
    pub reporters: Vec<Uuid>,
}

impl MessageThread {
    /// Toggle `voter` in the `direction` set and drop it from the opposite one.
    ///
    /// Returns the new size of the `direction` set.
    pub fn toggle_vote(&mut self, voter: Uuid, direction: VoteDirection) -> usize {
        let (target, opposite) = match direction {
            VoteDirection::Up => (&mut self.upvoters, &mut self.downvoters),
            VoteDirection::Down => (&mut self.downvoters, &mut self.upvoters),
        };

        if let Some(position) = target.iter().position(|id| *id == voter) {
            target.remove(position);
        } else {
            target.push(voter);
        }
        opposite.retain(|id| *id != voter);

        target.len()
    }

    /// Record a report; returns `false` when `reporter` already reported.
    pub fn add_reporter(&mut self, reporter: Uuid) -> bool {
        if self.reporters.contains(&reporter) {
            return false;
        }
        self.reporters.push(reporter);
        true
    }
}

/// Teacher and mentor replies first, then student replies, each by ascending time.
pub fn order_replies(replies: &mut [Reply]) {
    replies.sort_by_key(|reply| (!reply.sender_kind.is_staff(), reply.created_at));
}
