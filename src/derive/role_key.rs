//! Role keys are deterministic, time-bounded keys for one role and scope. They
//! are the HMAC (keyed with the role's domain master) of the grant they were
//! issued for, so anyone holding the master can re-derive them at will and
//! nobody else can produce one.

use crate::{
    crypto::base::{Hmac, HmacKey},
    error::{Error, Result},
    keystore::{KeySet, RoleDomains},
    util::{ser::hex_decode_array, Timestamp},
};
use chrono::Duration;
use serde_derive::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// What a role key is good for: a role, a scope, and an expiration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, getset::Getters, getset::CopyGetters)]
pub struct KeyGrant {
    #[getset(get = "pub")]
    role: String,
    #[getset(get = "pub")]
    scope: String,
    #[getset(get_copy = "pub")]
    expires_at: Timestamp,
}

impl KeyGrant {
    /// Create a grant. Roles and scopes are joined with `:` when keys are
    /// derived, so neither may contain one.
    pub fn new(role: &str, scope: &str, expires_at: Timestamp) -> Result<Self> {
        for (what, val) in [("role", role), ("scope", scope)] {
            if val.is_empty() || val.contains(':') {
                Err(Error::Validation(format!("{} must be non-empty and must not contain ':'", what)))?;
            }
        }
        Ok(Self {
            role: role.to_string(),
            scope: scope.to_string(),
            expires_at,
        })
    }

    /// `role:scope:expiry`, the message the HMAC is computed over.
    pub fn message(&self) -> String {
        format!("{}:{}:{}", self.role, self.scope, self.expires_at.unix())
    }

    /// Whether this grant covers the given role and scope.
    pub fn covers(&self, role: &str, scope: &str) -> bool {
        self.role == role && self.scope == scope
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// When a role key should stop working.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    At(Timestamp),
    Within(Duration),
}

impl Expiry {
    pub fn resolve(&self, now: Timestamp) -> Result<Timestamp> {
        match self {
            Self::At(ts) => Ok(*ts),
            Self::Within(window) => now.offset(*window),
        }
    }
}

/// A role key, bound to its grant and to the key version it came from.
#[derive(Debug, Clone, getset::Getters, getset::CopyGetters)]
pub struct RoleKey {
    #[getset(get = "pub")]
    grant: KeyGrant,
    #[getset(get_copy = "pub")]
    key_version: u32,
    key: Hmac,
}

impl RoleKey {
    /// Rebuild a role key a caller is presenting to us.
    pub fn from_bytes(grant: KeyGrant, key_version: u32, bytes: [u8; 32]) -> Self {
        Self {
            grant,
            key_version,
            key: Hmac::from_bytes(bytes),
        }
    }

    /// Like [`RoleKey::from_bytes`], from the hex form written to artifact files.
    pub fn from_hex(grant: KeyGrant, key_version: u32, hexed: &str) -> Result<Self> {
        Ok(Self::from_bytes(grant, key_version, hex_decode_array(hexed)?))
    }

    /// The raw key. Handle with care.
    pub fn expose_secret(&self) -> &[u8; 32] {
        self.key.expose_secret()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.expose_secret())
    }
}

impl PartialEq for RoleKey {
    fn eq(&self, other: &Self) -> bool {
        // the key comparison is the one that has to be constant time
        let keys_match: bool = self.key.ct_eq(&other.key).into();
        keys_match && self.grant == other.grant && self.key_version == other.key_version
    }
}

impl Eq for RoleKey {}

/// Why a presented role key was turned away. Callers log these separately but
/// report both the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRejection {
    /// The key doesn't match its grant (wrong bytes, grant, or key version)
    Mismatch,
    /// The key is fine but its grant has run out
    Expired,
}

/// Derives and checks role keys against one key set.
pub struct RoleKeyDeriver<'a> {
    keys: &'a KeySet,
    roles: &'a RoleDomains,
}

impl<'a> RoleKeyDeriver<'a> {
    pub fn new(keys: &'a KeySet, roles: &'a RoleDomains) -> Self {
        Self { keys, roles }
    }

    /// Derive the key for a role and scope that expires at `expires_at`.
    pub fn derive_role_key(&self, role: &str, scope: &str, expires_at: Timestamp) -> Result<RoleKey> {
        self.derive_for_grant(&KeyGrant::new(role, scope, expires_at)?)
    }

    /// Derive a key that is good from now until `window` from now.
    pub fn derive_time_bounded_key(&self, role: &str, scope: &str, window: Duration) -> Result<RoleKey> {
        self.derive_role_key(role, scope, Timestamp::now().offset(window)?)
    }

    /// Derive the key for an existing grant.
    pub fn derive_for_grant(&self, grant: &KeyGrant) -> Result<RoleKey> {
        let domain = self.roles.domain_for(grant.role())?;
        let master = self.keys.master(domain)?;
        let hmac_key = HmacKey::new_blake3_from_slice(master.secret().expose_secret());
        let key = Hmac::new(&hmac_key, grant.message().as_bytes())?;
        Ok(RoleKey {
            grant: grant.clone(),
            key_version: self.keys.version(),
            key,
        })
    }

    /// Check a presented key against a grant as of `now`.
    pub fn check_role_key_at(&self, candidate: &RoleKey, grant: &KeyGrant, now: Timestamp) -> std::result::Result<(), KeyRejection> {
        let expected = self.derive_for_grant(grant).map_err(|_| KeyRejection::Mismatch)?;
        if candidate != &expected {
            return Err(KeyRejection::Mismatch);
        }
        if grant.is_expired_at(now) {
            return Err(KeyRejection::Expired);
        }
        Ok(())
    }

    /// True if `candidate` is the key for `grant` and the grant hasn't expired
    /// as of `now`.
    pub fn validate_role_key_at(&self, candidate: &RoleKey, grant: &KeyGrant, now: Timestamp) -> bool {
        self.check_role_key_at(candidate, grant, now).is_ok()
    }

    /// [`RoleKeyDeriver::validate_role_key_at`] as of right now.
    pub fn validate_role_key(&self, candidate: &RoleKey, grant: &KeyGrant) -> bool {
        self.validate_role_key_at(candidate, grant, Timestamp::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::Domain;
    use crate::util::test;

    fn expiry() -> Timestamp {
        Timestamp::from_unix(1_767_225_599)
    }

    #[test]
    fn role_key_deterministic() {
        let keys = test::keyset(1);
        let roles = RoleDomains::default();
        let deriver = RoleKeyDeriver::new(&keys, &roles);
        let k1 = deriver.derive_role_key("moderator", "subforum_correlation", expiry()).unwrap();
        let k2 = deriver.derive_role_key("moderator", "subforum_correlation", expiry()).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.key_version(), 1);
        assert_eq!(k1.grant().message(), "moderator:subforum_correlation:1767225599");

        let other_time = deriver.derive_role_key("moderator", "subforum_correlation", expiry().offset(Duration::seconds(1)).unwrap()).unwrap();
        assert_ne!(k1.expose_secret(), other_time.expose_secret());
        let other_scope = deriver.derive_role_key("moderator", "other_scope", expiry()).unwrap();
        assert_ne!(k1.expose_secret(), other_scope.expose_secret());
    }

    #[test]
    fn role_key_matches_formula() {
        let keys = test::keyset(1);
        let roles = RoleDomains::default();
        let key = RoleKeyDeriver::new(&keys, &roles).derive_role_key("legal_team", "legal_correlation", expiry()).unwrap();
        let master = keys.master(Domain::LegalCorrelation).unwrap().secret().expose_secret();
        let expected = Hmac::new(&HmacKey::new_blake3_from_slice(master), b"legal_team:legal_correlation:1767225599").unwrap();
        assert_eq!(key.expose_secret(), expected.expose_secret());
    }

    #[test]
    fn role_keys_are_domain_separated() {
        let keys = test::keyset(1);
        let roles = RoleDomains::default();
        let deriver = RoleKeyDeriver::new(&keys, &roles);
        // same role string shape, different domains
        let moderator = deriver.derive_role_key("moderator", "correlation", expiry()).unwrap();
        let admin = deriver.derive_role_key("site_admin", "correlation", expiry()).unwrap();
        assert_ne!(moderator.expose_secret(), admin.expose_secret());

        // same domain, different role
        let admin2 = deriver.derive_role_key("platform_admin", "correlation", expiry()).unwrap();
        assert_ne!(admin.expose_secret(), admin2.expose_secret());
    }

    #[test]
    fn role_key_bad_inputs() {
        let keys = test::keyset(1);
        let roles = RoleDomains::default();
        let deriver = RoleKeyDeriver::new(&keys, &roles);
        assert!(matches!(deriver.derive_role_key("janitor", "mop", expiry()), Err(Error::AuthorizationDenied { .. })));
        assert!(matches!(deriver.derive_role_key("moderator:x", "scope", expiry()), Err(Error::Validation(_))));
        assert!(matches!(deriver.derive_role_key("moderator", "a:b", expiry()), Err(Error::Validation(_))));
        assert!(matches!(deriver.derive_role_key("moderator", "", expiry()), Err(Error::Validation(_))));
    }

    #[test]
    fn validate_role_key() {
        let keys = test::keyset(1);
        let roles = RoleDomains::default();
        let deriver = RoleKeyDeriver::new(&keys, &roles);
        let key = deriver.derive_role_key("site_admin", "full_correlation", expiry()).unwrap();
        let grant = key.grant().clone();
        let before = expiry().offset(Duration::hours(-1)).unwrap();

        assert!(deriver.validate_role_key_at(&key, &grant, before));
        assert_eq!(deriver.check_role_key_at(&key, &grant, expiry()), Err(KeyRejection::Expired));
        assert_eq!(deriver.check_role_key_at(&key, &grant, expiry().offset(Duration::days(1)).unwrap()), Err(KeyRejection::Expired));

        // flip a bit
        let mut bytes = *key.expose_secret();
        bytes[0] ^= 1;
        let forged = RoleKey::from_bytes(grant.clone(), 1, bytes);
        assert_eq!(deriver.check_role_key_at(&forged, &grant, before), Err(KeyRejection::Mismatch));

        // right bytes, presented for a different grant
        let other_grant = KeyGrant::new("site_admin", "other_scope", expiry()).unwrap();
        assert_eq!(deriver.check_role_key_at(&key, &other_grant, before), Err(KeyRejection::Mismatch));

        // the same key from another key version
        let keys2 = test::keyset(2);
        let deriver2 = RoleKeyDeriver::new(&keys2, &roles);
        assert!(!deriver2.validate_role_key_at(&key, &grant, before));

        let from_hex = RoleKey::from_hex(grant.clone(), 1, &key.to_hex()).unwrap();
        assert!(deriver.validate_role_key_at(&from_hex, &grant, before));
    }

    #[test]
    fn time_bounded_key_is_live() {
        let keys = test::keyset(1);
        let roles = RoleDomains::default();
        let deriver = RoleKeyDeriver::new(&keys, &roles);
        let key = deriver.derive_time_bounded_key("moderator", "subforum_correlation", Duration::hours(1)).unwrap();
        assert!(deriver.validate_role_key(&key, key.grant()));
        assert_eq!(Expiry::Within(Duration::hours(2)).resolve(expiry()).unwrap(), expiry().offset(Duration::hours(2)).unwrap());
        assert_eq!(Expiry::At(expiry()).resolve(Timestamp::now()).unwrap(), expiry());
    }

    #[test]
    fn role_key_does_not_print() {
        let keys = test::keyset(1);
        let roles = RoleDomains::default();
        let key = RoleKeyDeriver::new(&keys, &roles).derive_role_key("moderator", "x", expiry()).unwrap();
        assert!(!format!("{:?}", key).contains(&key.to_hex()));
    }
}
