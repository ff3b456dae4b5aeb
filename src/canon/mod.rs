//! Process-wide immutable registry: which apps and UI roles count as canonical,
//! plus the survivability table. Built once at startup from config and shared
//! behind an `Arc`; nothing here mutates after construction.

mod existence;

pub use existence::{EXISTENCE_TABLE, ExistenceVerdict, derive_verdict};

use crate::command::canonical::{self, HashDomain};
use crate::config::CanonConfig;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canon {
    allowed_apps: BTreeSet<String>,
    interactive_roles: BTreeSet<String>,
    blocked_roles: BTreeSet<String>,
}

impl Canon {
    pub fn from_config(config: &CanonConfig) -> Self {
        Self {
            allowed_apps: config.allowed_apps.iter().cloned().collect(),
            interactive_roles: config.interactive_roles.iter().cloned().collect(),
            blocked_roles: config.blocked_roles.iter().cloned().collect(),
        }
    }

    pub fn is_allowed_app(&self, app: &str) -> bool {
        self.allowed_apps.contains(app)
    }

    pub fn is_interactive_role(&self, role: &str) -> bool {
        self.interactive_roles.contains(role)
    }

    pub fn is_blocked_role(&self, role: &str) -> bool {
        self.blocked_roles.contains(role)
    }

    /// Content hash of the registry. Stamped into sealed commands so a replay
    /// against a different canon shows up as a seal divergence.
    pub fn fingerprint(&self) -> String {
        canonical::hash_value(
            HashDomain::Canon,
            &serde_json::json!({
                "allowed_apps": self.allowed_apps,
                "interactive_roles": self.interactive_roles,
                "blocked_roles": self.blocked_roles,
            }),
        )
    }
}

impl Default for Canon {
    fn default() -> Self {
        Self::from_config(&CanonConfig::default())
    }
}
