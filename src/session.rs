//! Per-run session identity.
//!
//! Each session draws a numeric identifier and derives the container name and
//! git branch name from it. The identifier space is small; a collision with a
//! concurrent session surfaces as a duplicate-name error when the container
//! is created.

use std::fmt;

use rand::Rng;

use crate::constants::{SESSION_ID_SPACE, SESSION_PREFIX};

/// Immutable identity of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdentity {
    id: u32,
}

impl SessionIdentity {
    /// Draws a fresh identity from a uniform distribution over
    /// `0..SESSION_ID_SPACE`.
    pub fn generate() -> Self {
        Self {
            id: rand::thread_rng().gen_range(0..SESSION_ID_SPACE),
        }
    }

    /// Container name: `workcell-<id>`.
    #[must_use]
    pub fn container_name(&self) -> String {
        format!("{SESSION_PREFIX}-{}", self.id)
    }

    /// Branch name created in the snapshot: `workcell/<id>`.
    #[must_use]
    pub fn branch_name(&self) -> String {
        format!("{SESSION_PREFIX}/{}", self.id)
    }

    #[cfg(test)]
    pub(crate) fn with_id(id: u32) -> Self {
        Self { id }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.container_name())
    }
}
