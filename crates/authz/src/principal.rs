//! The two sides of a check: who is asking and what they are asking about.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::role::Role;

/// An authenticated caller.
///
/// Built from a verified token by the caller; the engine does not look at
/// tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct Principal {
    /// Stable user id.
    #[builder(into)]
    pub subject: String,
    /// Role within the organization.
    pub role: Role,
    /// Organization the principal acts for, if any.
    #[builder(into)]
    pub org_id: Option<String>,
    /// Extra attributes for grant conditions.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Principal {
    /// Looks up an attribute for a condition. `subject`, `role`, and `orgId`
    /// (or `org_id`) resolve to the built-in fields; anything else comes from
    /// [`attributes`](Self::attributes).
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match name {
            "subject" | "id" => Some(&self.subject),
            "role" => Some(self.role.as_str()),
            "orgId" | "org_id" => self.org_id.as_deref(),
            other => self.attributes.get(other).map(String::as_str),
        }
    }
}

/// The object of a check.
///
/// # Examples
///
/// ```
/// use trustcore_authz::Resource;
///
/// let doc = Resource::new("document:42").with_attribute("orgId", "acme");
/// assert_eq!(doc.attribute("orgId"), Some("acme"));
/// assert_eq!(doc.attribute("id"), Some("document:42"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
}

impl Resource {
    /// A resource with no attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), attributes: BTreeMap::new() }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// The `:`-separated resource id matched against grant patterns.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Looks up an attribute for a condition. `id` resolves to the resource
    /// id.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match name {
            "id" => Some(&self.id),
            other => self.attributes.get(other).map(String::as_str),
        }
    }
}

impl From<&str> for Resource {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_builtins_and_extras() {
        let principal = Principal::builder()
            .subject("user-1")
            .role(Role::Admin)
            .org_id("acme")
            .attributes(BTreeMap::from([("team".to_owned(), "red".to_owned())]))
            .build();

        assert_eq!(principal.attribute("subject"), Some("user-1"));
        assert_eq!(principal.attribute("role"), Some("admin"));
        assert_eq!(principal.attribute("orgId"), Some("acme"));
        assert_eq!(principal.attribute("org_id"), Some("acme"));
        assert_eq!(principal.attribute("team"), Some("red"));
        assert_eq!(principal.attribute("missing"), None);
    }

    #[test]
    fn principal_without_org() {
        let principal = Principal::builder().subject("u").role(Role::Viewer).build();
        assert_eq!(principal.attribute("orgId"), None);
    }

    #[test]
    fn resource_from_str() {
        let resource = Resource::from("billing:invoice:7");
        assert_eq!(resource.id(), "billing:invoice:7");
        assert_eq!(resource.attribute("orgId"), None);
    }
}
