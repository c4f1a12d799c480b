//! Account kinds, their role-specific profiles and the verification states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

/// The five account kinds.
///
/// JSON uses the singular camelCase form (`localAdmin`); route segments use the
/// plural kebab-case form (`local-admins`), accepted through serde aliases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    #[serde(alias = "students")]
    Student,
    #[serde(alias = "teachers")]
    Teacher,
    #[serde(alias = "mentors")]
    Mentor,
    #[serde(alias = "local-admins")]
    LocalAdmin,
    #[serde(alias = "global-admins")]
    GlobalAdmin,
}

impl Role {
    pub const ALL: [Self; 5] = [
        Self::Student,
        Self::Teacher,
        Self::Mentor,
        Self::LocalAdmin,
        Self::GlobalAdmin,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Mentor => "mentor",
            Self::LocalAdmin => "localAdmin",
            Self::GlobalAdmin => "globalAdmin",
        }
    }

    /// Human readable label used in response messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Student => "Student",
            Self::Teacher => "Teacher",
            Self::Mentor => "Mentor",
            Self::LocalAdmin => "Local Admin",
            Self::GlobalAdmin => "Global Admin",
        }
    }

    /// Roles that must be approved before login is allowed.
    #[must_use]
    pub const fn requires_verification(self) -> bool {
        matches!(self, Self::Teacher | Self::Mentor | Self::LocalAdmin)
    }

    /// The role allowed to verify or reject accounts of this role.
    #[must_use]
    pub const fn reviewer(self) -> Option<Self> {
        match self {
            Self::Teacher => Some(Self::LocalAdmin),
            Self::Mentor | Self::LocalAdmin => Some(Self::GlobalAdmin),
            Self::Student | Self::GlobalAdmin => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "student" | "students" => Ok(Self::Student),
            "teacher" | "teachers" => Ok(Self::Teacher),
            "mentor" | "mentors" => Ok(Self::Mentor),
            "localAdmin" | "local-admins" => Ok(Self::LocalAdmin),
            "globalAdmin" | "global-admins" => Ok(Self::GlobalAdmin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }

    /// Message returned when an account already sits in this state.
    #[must_use]
    pub const fn already_message(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Verified => "Already Verified",
            Self::Rejected => "Already Rejected",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown verification status: {other}")),
        }
    }
}

/// Role-specific fields layered on top of the common account base.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum Profile {
    Student {
        grade: String,
        school: String,
    },
    #[serde(rename_all = "camelCase")]
    Teacher {
        institution: String,
        subject_expertise: Vec<String>,
        qualification: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Mentor {
        institution: Option<String>,
        qualification: String,
        subject_expertise: Vec<String>,
        resume_link: String,
    },
    LocalAdmin {
        institution: String,
        designation: String,
        address: Option<String>,
    },
    GlobalAdmin,
}

impl Profile {
    #[must_use]
    pub const fn role(&self) -> Role {
        match self {
            Self::Student { .. } => Role::Student,
            Self::Teacher { .. } => Role::Teacher,
            Self::Mentor { .. } => Role::Mentor,
            Self::LocalAdmin { .. } => Role::LocalAdmin,
            Self::GlobalAdmin => Role::GlobalAdmin,
        }
    }

    /// School for students, institution for staff.
    #[must_use]
    pub fn institution(&self) -> Option<&str> {
        match self {
            Self::Student { school, .. } => Some(school),
            Self::Teacher { institution, .. } | Self::LocalAdmin { institution, .. } => {
                Some(institution)
            }
            Self::Mentor { institution, .. } => institution.as_deref(),
            Self::GlobalAdmin => None,
        }
    }

    #[must_use]
    pub fn grade(&self) -> Option<&str> {
        match self {
            Self::Student { grade, .. } => Some(grade),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub phone_number: String,
    pub name: String,
    pub email: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub password_hash: String,
    pub verification: Option<VerificationStatus>,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

impl Account {
    #[must_use]
    pub const fn role(&self) -> Role {
        self.profile.role()
    }

    /// Login is allowed for unverified roles and for verified accounts only.
    #[must_use]
    pub fn login_block(&self) -> Option<VerificationStatus> {
        match self.verification {
            Some(VerificationStatus::Verified) | None => None,
            Some(status) => Some(status),
        }
    }
}

/// Partial update applied by the edit-details operation.
///
/// Fields that do not exist on the target profile are ignored; callers decide
/// which fields a role may send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub school: Option<String>,
    pub grade: Option<String>,
    pub institution: Option<String>,
    pub qualification: Option<String>,
    pub subject_expertise: Option<Vec<String>>,
    pub resume_link: Option<String>,
    pub designation: Option<String>,
    pub address: Option<String>,
}

impl AccountUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, account: &mut Account) {
        if let Some(name) = &self.name {
            account.name.clone_from(name);
        }
        if let Some(age) = self.age {
            account.age = Some(age);
        }
        if let Some(gender) = &self.gender {
            account.gender = Some(gender.clone());
        }

        match &mut account.profile {
            Profile::Student { grade, school } => {
                set(school, self.school.as_ref());
                set(grade, self.grade.as_ref());
            }
            Profile::Teacher {
                institution,
                subject_expertise,
                qualification,
            } => {
                set(institution, self.institution.as_ref());
                set(subject_expertise, self.subject_expertise.as_ref());
                set_optional(qualification, self.qualification.as_ref());
            }
            Profile::Mentor {
                institution,
                qualification,
                subject_expertise,
                resume_link,
            } => {
                set_optional(institution, self.institution.as_ref());
                set(qualification, self.qualification.as_ref());
                set(subject_expertise, self.subject_expertise.as_ref());
                set(resume_link, self.resume_link.as_ref());
            }
            Profile::LocalAdmin {
                designation,
                address,
                ..
            } => {
                set(designation, self.designation.as_ref());
                set_optional(address, self.address.as_ref());
            }
            Profile::GlobalAdmin => {}
        }
    }
}

fn set<T: Clone>(target: &mut T, value: Option<&T>) {
    if let Some(value) = value {
        target.clone_from(value);
    }
}

fn set_optional<T: Clone>(target: &mut Option<T>, value: Option<&T>) {
    if let Some(value) = value {
        *target = Some(value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> Account {
        Account {
            id: Uuid::new_v4(),
            phone_number: "1234567890".to_string(),
            name: "Asha".to_string(),
            email: None,
            age: Some(15),
            gender: Some("female".to_string()),
            password_hash: "hash".to_string(),
            verification: None,
            profile: Profile::Student {
                grade: "10".to_string(),
                school: "ABC".to_string(),
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn role_parses_path_segments_and_json_names() {
        assert_eq!("local-admins".parse::<Role>(), Ok(Role::LocalAdmin));
        assert_eq!("localAdmin".parse::<Role>(), Ok(Role::LocalAdmin));
        assert!("admins".parse::<Role>().is_err());

        let from_json: Result<Role, _> = serde_json::from_str("\"global-admins\"");
        assert_eq!(from_json.ok(), Some(Role::GlobalAdmin));
        assert_eq!(
            serde_json::to_string(&Role::LocalAdmin).ok().as_deref(),
            Some("\"localAdmin\"")
        );
    }

    #[test]
    fn reviewers_follow_authority_chain() {
        assert_eq!(Role::Teacher.reviewer(), Some(Role::LocalAdmin));
        assert_eq!(Role::Mentor.reviewer(), Some(Role::GlobalAdmin));
        assert_eq!(Role::LocalAdmin.reviewer(), Some(Role::GlobalAdmin));
        assert_eq!(Role::Student.reviewer(), None);
        assert!(!Role::GlobalAdmin.requires_verification());
    }

    #[test]
    fn profile_json_carries_role_tag() {
        let profile = Profile::Mentor {
            institution: None,
            qualification: "PhD".to_string(),
            subject_expertise: vec!["math".to_string()],
            resume_link: "https://cv.example".to_string(),
        };
        let value = serde_json::to_value(&profile).unwrap_or_default();
        assert_eq!(value["role"], "mentor");
        assert_eq!(value["resumeLink"], "https://cv.example");

        let back: Result<Profile, _> = serde_json::from_value(value);
        assert_eq!(back.ok(), Some(profile));
    }

    #[test]
    fn update_only_touches_fields_present_on_profile() {
        let mut account = student();
        let update = AccountUpdate {
            grade: Some("11".to_string()),
            designation: Some("ignored".to_string()),
            ..AccountUpdate::default()
        };
        update.apply(&mut account);

        assert_eq!(account.profile.grade(), Some("11"));
        assert_eq!(account.profile.institution(), Some("ABC"));
        assert_eq!(account.name, "Asha");
    }

    #[test]
    fn login_block_reports_unverified_state() {
        let mut account = student();
        assert_eq!(account.login_block(), None);

        account.verification = Some(VerificationStatus::Pending);
        assert_eq!(account.login_block(), Some(VerificationStatus::Pending));

        account.verification = Some(VerificationStatus::Verified);
        assert_eq!(account.login_block(), None);
    }
}
