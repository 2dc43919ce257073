//! Privilege domains, and the table mapping roles onto them.

use crate::error::{Error, Result};
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cryptographic domain. Each domain gets its own master secret, so a role
/// key leaked from a low-privilege domain can't be walked up into a higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Domain {
    /// Pseudonym derivation
    #[serde(rename = "user_pseudonyms_v1")]
    UserPseudonyms,
    /// A user correlating their own personas
    #[serde(rename = "user_self_correlation_v1")]
    UserCorrelation,
    /// Subforum moderators and owners
    #[serde(rename = "moderator_correlation_v1")]
    ModeratorCorrelation,
    /// Platform admins and trust & safety
    #[serde(rename = "admin_correlation_v1")]
    AdminCorrelation,
    /// Legal requests
    #[serde(rename = "legal_correlation_v1")]
    LegalCorrelation,
}

impl Domain {
    /// Every domain a complete key set must hold a master for.
    pub const ALL: [Domain; 5] = [
        Domain::UserPseudonyms,
        Domain::UserCorrelation,
        Domain::ModeratorCorrelation,
        Domain::AdminCorrelation,
        Domain::LegalCorrelation,
    ];

    /// The versioned domain name. This is also the key file stem on disk.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserPseudonyms => "user_pseudonyms_v1",
            Self::UserCorrelation => "user_self_correlation_v1",
            Self::ModeratorCorrelation => "moderator_correlation_v1",
            Self::AdminCorrelation => "admin_correlation_v1",
            Self::LegalCorrelation => "legal_correlation_v1",
        }
    }

    /// The short label used as the key of the manifest's `domains` map.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UserPseudonyms => "user_pseudonyms",
            Self::UserCorrelation => "user_correlation",
            Self::ModeratorCorrelation => "mod_correlation",
            Self::AdminCorrelation => "admin_correlation",
            Self::LegalCorrelation => "legal_correlation",
        }
    }

    /// Look a domain up by its versioned name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.name() == name)
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Maps role names onto the domain whose master derives that role's keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDomains(BTreeMap<String, Domain>);

impl RoleDomains {
    /// Start from the default table and layer the given overrides on top.
    pub fn with_overrides(overrides: &BTreeMap<String, Domain>) -> Self {
        let mut table = Self::default();
        for (role, domain) in overrides {
            table.0.insert(role.clone(), *domain);
        }
        table
    }

    /// Find the domain for a role. Roles we don't know about get nothing.
    pub fn domain_for(&self, role: &str) -> Result<Domain> {
        self.0.get(role).copied().ok_or_else(|| Error::AuthorizationDenied {
            role: role.to_string(),
            operation: String::from("role key derivation"),
        })
    }

    /// All roles that derive from the given domain
    pub fn roles_in(&self, domain: Domain) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, d)| **d == domain)
            .map(|(role, _)| role.as_str())
            .collect()
    }
}

impl Default for RoleDomains {
    fn default() -> Self {
        let table = [
            ("user", Domain::UserCorrelation),
            ("moderator", Domain::ModeratorCorrelation),
            ("subforum_owner", Domain::ModeratorCorrelation),
            ("site_admin", Domain::AdminCorrelation),
            ("platform_admin", Domain::AdminCorrelation),
            ("trust_safety", Domain::AdminCorrelation),
            ("legal_team", Domain::LegalCorrelation),
        ];
        Self(table.into_iter().map(|(role, domain)| (role.to_string(), domain)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_names_roundtrip() {
        for domain in Domain::ALL {
            assert_eq!(Domain::from_name(domain.name()), Some(domain));
        }
        assert_eq!(Domain::from_name("root_of_all_evil_v1"), None);
        assert_eq!(serde_json::to_string(&Domain::ModeratorCorrelation).unwrap(), "\"moderator_correlation_v1\"");
    }

    #[test]
    fn default_role_table() {
        let roles = RoleDomains::default();
        assert_eq!(roles.domain_for("moderator").unwrap(), Domain::ModeratorCorrelation);
        assert_eq!(roles.domain_for("subforum_owner").unwrap(), Domain::ModeratorCorrelation);
        assert_eq!(roles.domain_for("site_admin").unwrap(), Domain::AdminCorrelation);
        assert_eq!(roles.domain_for("trust_safety").unwrap(), Domain::AdminCorrelation);
        assert_eq!(roles.domain_for("legal_team").unwrap(), Domain::LegalCorrelation);
        assert_eq!(roles.domain_for("user").unwrap(), Domain::UserCorrelation);
        assert!(matches!(roles.domain_for("janitor"), Err(Error::AuthorizationDenied { .. })));
        assert_eq!(roles.roles_in(Domain::AdminCorrelation), vec!["platform_admin", "site_admin", "trust_safety"]);
    }

    #[test]
    fn overrides_layer_on_defaults() {
        let mut overrides = BTreeMap::new();
        overrides.insert(String::from("janitor"), Domain::ModeratorCorrelation);
        overrides.insert(String::from("trust_safety"), Domain::LegalCorrelation);
        let roles = RoleDomains::with_overrides(&overrides);
        assert_eq!(roles.domain_for("janitor").unwrap(), Domain::ModeratorCorrelation);
        assert_eq!(roles.domain_for("trust_safety").unwrap(), Domain::LegalCorrelation);
        assert_eq!(roles.domain_for("moderator").unwrap(), Domain::ModeratorCorrelation);
    }
}
