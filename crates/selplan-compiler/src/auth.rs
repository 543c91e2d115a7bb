//! Per-field keep/prune predicate consulted during expansion.

use crate::schema::FieldDef;
use std::collections::HashSet;

pub trait FieldAuthorizer: Send + Sync {
    fn is_authorized(&self, field: &FieldDef) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl FieldAuthorizer for AllowAll {
    fn is_authorized(&self, _field: &FieldDef) -> bool {
        true
    }
}

/// Grants fields with no required roles, or fields sharing a role with the caller.
#[derive(Debug, Clone, Default)]
pub struct RoleAuthorizer {
    roles: HashSet<String>,
}

impl RoleAuthorizer {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

impl FieldAuthorizer for RoleAuthorizer {
    fn is_authorized(&self, field: &FieldDef) -> bool {
        field.roles.is_empty() || field.roles.iter().any(|role| self.roles.contains(role))
    }
}
