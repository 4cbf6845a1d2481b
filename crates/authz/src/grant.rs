//! Permission grants and the resolved per-role grant sets.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    condition::Condition,
    error::AuthzError,
    pattern::Pattern,
    principal::{Principal, Resource},
    role::{ROLE_COUNT, Role},
};

/// Allows roles matching `role` to perform actions matching `action` on
/// resources matching `resource`, optionally only when `condition` holds.
///
/// Deserializes from the same shape it is written in configuration:
///
/// ```yaml
/// role: member
/// resource: "document:*"
/// action: "document:read"
/// condition: "resource.orgId == principal.orgId"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// Roles the grant is written for. Higher-ranked roles inherit it.
    pub role: Pattern,
    /// Resources the grant covers.
    pub resource: Pattern,
    /// Actions the grant covers.
    pub action: Pattern,
    /// Attribute predicate that must hold for the grant to apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl PermissionGrant {
    /// Parses an unconditional grant.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidPattern`] for any malformed pattern.
    pub fn new(role: &str, resource: &str, action: &str) -> Result<Self, AuthzError> {
        Ok(Self {
            role: Pattern::parse(role)?,
            resource: Pattern::parse(resource)?,
            action: Pattern::parse(action)?,
            condition: None,
        })
    }

    /// Attaches a condition.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidCondition`] if `condition` does not parse.
    pub fn with_condition(mut self, condition: &str) -> Result<Self, AuthzError> {
        self.condition = Some(Condition::parse(condition)?);
        Ok(self)
    }

    /// `true` if the resource and action patterns match.
    #[must_use]
    pub fn covers(&self, resource: &str, action: &str) -> bool {
        self.resource.matches(resource) && self.action.matches(action)
    }

    /// `true` if the grant has no condition or its condition holds.
    #[must_use]
    pub fn applies_to(&self, principal: &Principal, resource: &Resource) -> bool {
        self.condition.as_ref().is_none_or(|c| c.evaluate(principal, resource))
    }

    /// `true` if the grant carries a condition.
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

/// An immutable, validated grant set with each role's effective grants
/// resolved up front.
#[derive(Debug, Clone, Default)]
pub struct GrantSet {
    grants: Vec<Arc<PermissionGrant>>,
    by_role: [Vec<Arc<PermissionGrant>>; ROLE_COUNT],
}

impl GrantSet {
    /// Resolves each role's effective grants: its own plus those of every
    /// lower-ranked role.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::UnknownRole`] for a grant whose role pattern
    /// matches no role in the hierarchy.
    pub fn new(grants: Vec<PermissionGrant>) -> Result<Self, AuthzError> {
        let grants: Vec<Arc<PermissionGrant>> = grants.into_iter().map(Arc::new).collect();
        for grant in &grants {
            if !Role::ALL.iter().any(|r| grant.role.matches(r.as_str())) {
                return Err(AuthzError::UnknownRole(grant.role.to_string()));
            }
        }

        let mut by_role: [Vec<Arc<PermissionGrant>>; ROLE_COUNT] = Default::default();
        for role in Role::ALL {
            by_role[role.index()] = grants
                .iter()
                .filter(|g| role.inherited().any(|r| g.role.matches(r.as_str())))
                .cloned()
                .collect();
        }
        Ok(Self { grants, by_role })
    }

    /// Every grant, in definition order.
    #[must_use]
    pub fn grants(&self) -> &[Arc<PermissionGrant>] {
        &self.grants
    }

    /// Grants that apply to `role` directly or through inheritance.
    #[must_use]
    pub fn effective(&self, role: Role) -> &[Arc<PermissionGrant>] {
        &self.by_role[role.index()]
    }

    /// Number of grants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// `true` if there are no grants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// `true` if both sets hold the same grants in the same order.
    #[must_use]
    pub fn same_grants(&self, other: &GrantSet) -> bool {
        self.grants.len() == other.grants.len()
            && self.grants.iter().zip(&other.grants).all(|(a, b)| a == b)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn grant(role: &str, resource: &str, action: &str) -> PermissionGrant {
        PermissionGrant::new(role, resource, action).unwrap()
    }

    #[test]
    fn higher_roles_inherit_lower_grants() {
        let set = GrantSet::new(vec![
            grant("viewer", "document:*", "document:read"),
            grant("member", "document:*", "document:write"),
            grant("owner", "org:*", "org:*"),
        ])
        .unwrap();

        assert_eq!(set.effective(Role::Viewer).len(), 1);
        assert_eq!(set.effective(Role::Member).len(), 2);
        assert_eq!(set.effective(Role::Admin).len(), 2);
        assert_eq!(set.effective(Role::Owner).len(), 3);
        assert_eq!(set.effective(Role::SuperAdmin).len(), 3);
    }

    #[test]
    fn role_wildcard_reaches_every_role() {
        let set = GrantSet::new(vec![grant("*", "health", "health:read")]).unwrap();
        for role in Role::ALL {
            assert_eq!(set.effective(role).len(), 1, "{role}");
        }
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = GrantSet::new(vec![grant("auditor", "log:*", "log:read")]).unwrap_err();
        assert!(matches!(err, AuthzError::UnknownRole(role) if role == "auditor"));
    }

    #[test]
    fn conditional_grant_applies_only_when_condition_holds() {
        let g = grant("member", "document:*", "document:read")
            .with_condition("resource.orgId == principal.orgId")
            .unwrap();
        let alice = Principal::builder().subject("alice").role(Role::Member).org_id("acme").build();

        assert!(g.is_conditional());
        assert!(g.applies_to(&alice, &Resource::new("document:1").with_attribute("orgId", "acme")));
        assert!(!g.applies_to(&alice, &Resource::new("document:1")));
    }

    #[test]
    fn deserializes_from_yaml() {
        let yaml = r#"
- role: member
  resource: "document:*"
  action: "document:read"
  condition: "resource.orgId == principal.orgId"
- role: admin
  resource: "org:*"
  action: "org:*"
"#;
        let grants: Vec<PermissionGrant> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(grants.len(), 2);
        assert!(grants[0].is_conditional());
        assert!(grants[1].covers("org:acme", "org:write"));

        let bad = "- role: member\n  resource: \"doc::x\"\n  action: read\n";
        assert!(serde_yaml::from_str::<Vec<PermissionGrant>>(bad).is_err());
    }

    #[test]
    fn same_grants_compares_content() {
        let a = GrantSet::new(vec![grant("viewer", "a", "read")]).unwrap();
        let b = GrantSet::new(vec![grant("viewer", "a", "read")]).unwrap();
        let c = GrantSet::new(vec![grant("viewer", "b", "read")]).unwrap();
        assert!(a.same_grants(&b));
        assert!(!a.same_grants(&c));
    }
}
