//! Explicit per-route access metadata.

use std::collections::HashMap;

use crate::principal::Role;

/// Access requirements of one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Skip verification entirely.
    pub public: bool,
    /// `None` means any verified principal.
    pub required_roles: Option<Vec<Role>>,
}

impl RoutePolicy {
    pub fn public() -> Self {
        RoutePolicy {
            public: true,
            required_roles: None,
        }
    }

    /// Any verified principal, no role restriction.
    pub fn authenticated() -> Self {
        RoutePolicy {
            public: false,
            required_roles: None,
        }
    }

    pub fn roles(roles: &[Role]) -> Self {
        RoutePolicy {
            public: false,
            required_roles: Some(roles.to_vec()),
        }
    }

    /// A route is privileged when its role set touches a staff role. Such
    /// routes never receive the sandbox principal.
    pub fn is_privileged(&self) -> bool {
        self.required_roles
            .as_ref()
            .is_some_and(|roles| roles.iter().any(|r| r.is_privileged()))
    }

    pub fn admits(&self, role: Role) -> bool {
        self.required_roles
            .as_ref()
            .map_or(true, |roles| roles.contains(&role))
    }
}

/// `(METHOD, path pattern) -> RoutePolicy`. Path patterns are the router's
/// own patterns, e.g. `/track/{delivery_id}`.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    entries: HashMap<(String, String), RoutePolicy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, method: &str, path: &str, policy: RoutePolicy) {
        self.entries
            .insert((method.to_ascii_uppercase(), path.to_string()), policy);
    }

    pub fn with(mut self, method: &str, path: &str, policy: RoutePolicy) -> Self {
        self.insert(method, path, policy);
        self
    }

    pub fn lookup(&self, method: &str, path: &str) -> Option<&RoutePolicy> {
        self.entries
            .get(&(method.to_ascii_uppercase(), path.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
