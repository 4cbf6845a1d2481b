//! Attribute predicates attached to grants.
//!
//! Grammar: `<operand> == <operand>` or `<operand> != <operand>`, where an
//! operand is `principal.<attr>`, `resource.<attr>`, or a quoted literal
//! (`'acme'` or `"acme"`). A condition that refers to a missing attribute
//! is unsatisfied, whichever operator it uses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::AuthzError,
    principal::{Principal, Resource},
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Principal(String),
    Resource(String),
    Literal(String),
}

impl Operand {
    fn parse(raw: &str, condition: &str) -> Result<Self, AuthzError> {
        let raw = raw.trim();
        for quote in ['\'', '"'] {
            if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
                return Ok(Operand::Literal(raw[1..raw.len() - 1].to_owned()));
            }
        }
        if let Some(attr) = raw.strip_prefix("principal.") {
            return Ok(Operand::Principal(attribute_name(attr, condition)?));
        }
        if let Some(attr) = raw.strip_prefix("resource.") {
            return Ok(Operand::Resource(attribute_name(attr, condition)?));
        }
        Err(AuthzError::invalid_condition(
            condition,
            format!("'{raw}' is not principal.<attr>, resource.<attr>, or a quoted literal"),
        ))
    }

    fn resolve<'a>(&'a self, principal: &'a Principal, resource: &'a Resource) -> Option<&'a str> {
        match self {
            Operand::Principal(name) => principal.attribute(name),
            Operand::Resource(name) => resource.attribute(name),
            Operand::Literal(value) => Some(value.as_str()),
        }
    }
}

fn attribute_name(attr: &str, condition: &str) -> Result<String, AuthzError> {
    if attr.is_empty() || !attr.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AuthzError::invalid_condition(
            condition,
            format!("invalid attribute name '{attr}'"),
        ));
    }
    Ok(attr.to_owned())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
}

/// A compiled grant condition.
///
/// # Examples
///
/// ```
/// use trustcore_authz::{Condition, Principal, Resource, Role};
///
/// let same_org = Condition::parse("resource.orgId == principal.orgId").unwrap();
/// let alice = Principal::builder().subject("alice").role(Role::Member).org_id("acme").build();
///
/// assert!(same_org.evaluate(&alice, &Resource::new("doc:1").with_attribute("orgId", "acme")));
/// assert!(!same_org.evaluate(&alice, &Resource::new("doc:2").with_attribute("orgId", "globex")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    raw: String,
    lhs: Operand,
    op: Operator,
    rhs: Operand,
}

impl Condition {
    /// Parses a condition expression.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidCondition`] unless the expression has
    /// exactly one `==` or `!=` between two valid operands.
    pub fn parse(raw: &str) -> Result<Self, AuthzError> {
        let eq = raw.matches("==").count();
        let ne = raw.matches("!=").count();
        let (op, token) = match (eq, ne) {
            (1, 0) => (Operator::Eq, "=="),
            (0, 1) => (Operator::Ne, "!="),
            _ => {
                return Err(AuthzError::invalid_condition(
                    raw,
                    "expected exactly one '==' or '!='",
                ));
            },
        };
        let Some((lhs, rhs)) = raw.split_once(token) else {
            return Err(AuthzError::invalid_condition(raw, "missing operator"));
        };
        Ok(Self {
            raw: raw.to_owned(),
            lhs: Operand::parse(lhs, raw)?,
            op,
            rhs: Operand::parse(rhs, raw)?,
        })
    }

    /// The expression as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Evaluates against a principal and resource. Missing attributes make
    /// the condition false.
    #[must_use]
    pub fn evaluate(&self, principal: &Principal, resource: &Resource) -> bool {
        let (Some(lhs), Some(rhs)) =
            (self.lhs.resolve(principal, resource), self.rhs.resolve(principal, resource))
        else {
            return false;
        };
        match self.op {
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for Condition {
    type Error = AuthzError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.raw
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::role::Role;

    fn alice() -> Principal {
        Principal::builder().subject("alice").role(Role::Member).org_id("acme").build()
    }

    #[rstest]
    #[case("resource.orgId == principal.orgId", "acme", true)]
    #[case("resource.orgId == principal.orgId", "globex", false)]
    #[case("resource.orgId != principal.orgId", "globex", true)]
    #[case("resource.orgId == 'acme'", "acme", true)]
    #[case("\"acme\" == resource.orgId", "acme", true)]
    #[case("resource.orgId!='acme'", "acme", false)]
    fn evaluates(#[case] expr: &str, #[case] resource_org: &str, #[case] expected: bool) {
        let resource = Resource::new("doc:1").with_attribute("orgId", resource_org);
        assert_eq!(Condition::parse(expr).unwrap().evaluate(&alice(), &resource), expected);
    }

    #[test]
    fn missing_attribute_is_unsatisfied_for_both_operators() {
        let resource = Resource::new("doc:1");
        for expr in ["resource.orgId == principal.orgId", "resource.orgId != principal.orgId"] {
            assert!(!Condition::parse(expr).unwrap().evaluate(&alice(), &resource), "{expr}");
        }
    }

    #[test]
    fn principal_owner_check() {
        let cond = Condition::parse("resource.owner == principal.subject").unwrap();
        let mine = Resource::new("doc:1").with_attribute("owner", "alice");
        let theirs = Resource::new("doc:2").with_attribute("owner", "bob");
        assert!(cond.evaluate(&alice(), &mine));
        assert!(!cond.evaluate(&alice(), &theirs));
    }

    #[rstest]
    #[case("resource.orgId")]
    #[case("resource.orgId = principal.orgId")]
    #[case("resource.orgId == principal.orgId == 'x'")]
    #[case("resource.orgId == principal.orgId != 'x'")]
    #[case("orgId == 'acme'")]
    #[case("resource. == 'acme'")]
    #[case("resource.org-id == 'acme'")]
    #[case("session.id == 'x'")]
    fn malformed_conditions_are_rejected(#[case] expr: &str) {
        assert!(matches!(Condition::parse(expr), Err(AuthzError::InvalidCondition { .. })));
    }
}
