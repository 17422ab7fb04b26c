use std::fmt;

use serde::{Deserialize, Serialize};

/// Subject id of the sandbox principal handed out on driver-facing routes
/// when verification fails.
pub const DEMO_SUBJECT: &str = "demo-driver";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Dispatcher,
    Support,
    Driver,
}

impl Role {
    /// Roles whose routes must fail closed.
    pub const PRIVILEGED: [Role; 3] = [Role::Admin, Role::Dispatcher, Role::Support];

    /// Case-insensitive parse; `None` for anything unrecognised.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "dispatcher" => Some(Role::Dispatcher),
            "support" => Some(Role::Support),
            "driver" => Some(Role::Driver),
            _ => None,
        }
    }

    pub fn is_privileged(self) -> bool {
        Role::PRIVILEGED.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Dispatcher => "dispatcher",
            Role::Support => "support",
            Role::Driver => "driver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity attached to one request. Built fresh per request.
///
/// Invariants: `role == Driver` implies `driver_id` is set, and
/// `role == Admin` implies `admin_id` is set. Use the constructors in
/// `verifier` rather than building one by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub subject_id: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// True only for the sandbox principal.
    pub demo: bool,
}

impl Principal {
    /// The fixed sandbox identity.
    pub fn demo() -> Self {
        Principal {
            subject_id: DEMO_SUBJECT.to_string(),
            role: Role::Driver,
            driver_id: Some(DEMO_SUBJECT.to_string()),
            admin_id: None,
            is_admin: false,
            phone: None,
            username: Some("Demo Driver".to_string()),
            demo: true,
        }
    }

    /// Actor label used in audit records.
    pub fn actor(&self) -> String {
        format!("{}:{}", self.role, self.subject_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse(" Driver "), Some(Role::Driver));
        assert_eq!(Role::parse("courier"), None);
    }

    #[test]
    fn demo_principal_satisfies_driver_invariant() {
        let p = Principal::demo();
        assert_eq!(p.role, Role::Driver);
        assert_eq!(p.driver_id.as_deref(), Some(DEMO_SUBJECT));
        assert!(p.demo);
        assert!(!p.is_admin);
    }

    #[test]
    fn only_staff_roles_are_privileged() {
        assert!(Role::Support.is_privileged());
        assert!(!Role::Driver.is_privileged());
    }
}
