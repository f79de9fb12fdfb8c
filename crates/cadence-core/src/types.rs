//! Identifiers and workspace roles.

use serde::{Deserialize, Serialize};

pub type AppletId = i64;
pub type ActivityId = i64;
pub type FlowId = i64;
pub type EventId = i64;
/// Users and respondents share one id space.
pub type UserId = i64;

/// Role a user holds on an applet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Owner,
    Manager,
    Coordinator,
    Editor,
    Reviewer,
    Respondent,
}

impl Role {
    /// Roles allowed to create, change and read applet schedules.
    pub const SCHEDULE_MANAGERS: [Role; 4] =
        [Role::SuperAdmin, Role::Owner, Role::Manager, Role::Coordinator];

    pub fn can_manage_schedule(&self) -> bool {
        Self::SCHEDULE_MANAGERS.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Owner => "owner",
            Role::Manager => "manager",
            Role::Coordinator => "coordinator",
            Role::Editor => "editor",
            Role::Reviewer => "reviewer",
            Role::Respondent => "respondent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "super_admin" => Some(Role::SuperAdmin),
            "owner" => Some(Role::Owner),
            "manager" => Some(Role::Manager),
            "coordinator" => Some(Role::Coordinator),
            "editor" => Some(Role::Editor),
            "reviewer" => Some(Role::Reviewer),
            "respondent" => Some(Role::Respondent),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip_str() {
        for role in [Role::SuperAdmin, Role::Owner, Role::Respondent, Role::Reviewer] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("janitor"), None);
    }

    #[test]
    fn test_schedule_managers() {
        assert!(Role::Owner.can_manage_schedule());
        assert!(Role::Coordinator.can_manage_schedule());
        assert!(!Role::Editor.can_manage_schedule());
        assert!(!Role::Respondent.can_manage_schedule());
    }
}
