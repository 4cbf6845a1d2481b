//! The fixed role hierarchy.
//!
//! `super_admin(4) > owner(3) > admin(2) > member(1) > viewer(0)`. A role
//! holds every grant of every role ranked below it.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AuthzError;

/// A role in the hierarchy, ordered by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access.
    Viewer,
    /// Regular organization member.
    Member,
    /// Organization administrator.
    Admin,
    /// Organization owner.
    Owner,
    /// Platform-wide administrator.
    SuperAdmin,
}

/// Number of roles in the hierarchy.
pub const ROLE_COUNT: usize = 5;

impl Role {
    /// Every role, lowest rank first.
    pub const ALL: [Role; ROLE_COUNT] =
        [Role::Viewer, Role::Member, Role::Admin, Role::Owner, Role::SuperAdmin];

    /// Numeric rank; higher is more privileged.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Role::Viewer => 0,
            Role::Member => 1,
            Role::Admin => 2,
            Role::Owner => 3,
            Role::SuperAdmin => 4,
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Owner => "owner",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// This role and every role ranked below it.
    pub fn inherited(self) -> impl Iterator<Item = Role> {
        Self::ALL.into_iter().filter(move |r| r.rank() <= self.rank())
    }

    pub(crate) const fn index(self) -> usize {
        self.rank() as usize
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AuthzError::UnknownRole(s.to_owned()))
    }
}
