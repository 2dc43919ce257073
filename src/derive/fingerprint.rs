use crate::{
    crypto::base::Hash,
    error::{Error, Result},
    keystore::KeySet,
};
use serde_derive::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Bytes of hash kept for a fingerprint.
pub const FINGERPRINT_LEN: usize = 16;

/// A stable, salted hash of a real identity. Every pseudonym owned by the same
/// identity shares one of these, which is what makes correlation possible.
///
/// Fingerprints are sensitive (anyone holding the salt can test guesses
/// against one) so they don't print and never leave the crate's boundary.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        if value.is_empty() || value.contains(':') {
            Err(Error::Validation(String::from("malformed fingerprint")))?;
        }
        Ok(Self(value))
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint(<redacted>)")
    }
}

/// `hex(H(identity || salt)[..16])`. The salt is static per key set and carried
/// across rotations.
pub struct FingerprintDeriver<'a> {
    salt: &'a str,
}

impl<'a> FingerprintDeriver<'a> {
    pub fn new(keys: &'a KeySet) -> Self {
        Self { salt: keys.salt() }
    }

    pub fn derive_fingerprint(&self, identity: &str) -> Result<Fingerprint> {
        if identity.is_empty() {
            Err(Error::Validation(String::from("identity must not be empty")))?;
        }
        let hash = Hash::new_blake3_parts(&[identity.as_bytes(), self.salt.as_bytes()]);
        Ok(Fingerprint(hash.truncated_hex(FINGERPRINT_LEN)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test;

    #[test]
    fn fingerprint_deterministic_and_salted() {
        let keys = test::keyset(1);
        let deriver = FingerprintDeriver::new(&keys);
        let fp1 = deriver.derive_fingerprint("alice@example.com").unwrap();
        let fp2 = deriver.derive_fingerprint("alice@example.com").unwrap();
        let fp3 = deriver.derive_fingerprint("bob@example.com").unwrap();
        assert_eq!(fp1, fp2);
        assert_ne!(fp1, fp3);
        assert_eq!(fp1.as_str().len(), 32);

        let expected = hex::encode(&blake3::hash(b"alice@example.comfingerprint_salt_v1").as_bytes()[..16]);
        assert_eq!(fp1.as_str(), expected);
    }

    #[test]
    fn fingerprint_survives_rotation() {
        // same salt, different masters: fingerprints must not move
        let fp1 = FingerprintDeriver::new(&test::keyset(1)).derive_fingerprint("alice@example.com").unwrap();
        let fp2 = FingerprintDeriver::new(&test::keyset(2)).derive_fingerprint("alice@example.com").unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn fingerprint_empty_identity() {
        let keys = test::keyset(1);
        let res = FingerprintDeriver::new(&keys).derive_fingerprint("");
        assert!(matches!(res, Err(Error::Validation(_))));
    }

    #[test]
    fn fingerprint_does_not_print() {
        let keys = test::keyset(1);
        let fp = FingerprintDeriver::new(&keys).derive_fingerprint("alice@example.com").unwrap();
        assert_eq!(format!("{:?}", fp), "Fingerprint(<redacted>)");
    }
}
