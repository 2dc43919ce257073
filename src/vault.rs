//! The identity vault seals `(fingerprint, pseudonym)` pairs under keys derived
//! from role keys, and opens them again for whoever can re-derive that role
//! key.
//!
//! A sealed mapping is `nonce || ciphertext || tag`, xchacha20poly1305 with a
//! key stretched out of the role key with HKDF. The plaintext is
//! `fingerprint:pseudonym`.

use crate::{
    crypto::base::{stretch_key, Sealed, SecretKey},
    derive::{Fingerprint, FingerprintDeriver, KeyGrant, Pseudonym, PseudonymScheme, RoleKey},
    error::{Error, Result},
    keystore::KeySet,
    util::{ser::BinaryVec, Timestamp},
};
use rand::{CryptoRng, RngCore};
use serde_derive::{Deserialize, Serialize};
use std::convert::TryFrom;
use zeroize::Zeroize;

/// HKDF info for turning a role key into a mapping encryption key.
pub const MAPPING_KEY_INFO: &[u8] = b"hashpost/mapping-key/v1";

/// One sealed copy of a mapping, openable by holders of `grant`'s role key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct MappingEnvelope {
    grant: KeyGrant,
    ciphertext: BinaryVec,
}

/// A stored identity mapping. The fingerprint is kept in the clear as an index
/// so related pseudonyms can be found; the sealed envelopes are the only way
/// to prove the pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::CopyGetters)]
pub struct IdentityMappingRecord {
    #[getset(get = "pub")]
    pseudonym_id: Pseudonym,
    #[getset(get = "pub")]
    fingerprint: Fingerprint,
    #[getset(get = "pub")]
    envelopes: Vec<MappingEnvelope>,
    #[getset(get_copy = "pub")]
    key_version: u32,
    #[getset(get_copy = "pub")]
    scheme: PseudonymScheme,
    #[getset(get_copy = "pub")]
    created_at: Timestamp,
}

impl IdentityMappingRecord {
    /// Find the envelope sealed for a role and scope.
    pub fn envelope_for(&self, role: &str, scope: &str) -> Option<&MappingEnvelope> {
        self.envelopes.iter().find(|e| e.grant.covers(role, scope))
    }
}

fn mapping_key(role_key: &RoleKey) -> Result<SecretKey> {
    let mut keybytes = [0u8; 32];
    stretch_key(role_key.expose_secret(), &mut keybytes, Some(MAPPING_KEY_INFO), None)?;
    let key = SecretKey::new_xchacha20poly1305_from_bytes(keybytes);
    keybytes.zeroize();
    key
}

/// Seals and opens identity mappings.
pub struct IdentityVault<'a> {
    fingerprints: FingerprintDeriver<'a>,
}

impl<'a> IdentityVault<'a> {
    pub fn new(keys: &'a KeySet) -> Self {
        Self {
            fingerprints: FingerprintDeriver::new(keys),
        }
    }

    fn seal<R: RngCore + CryptoRng>(rng: &mut R, fingerprint: &Fingerprint, pseudonym: &Pseudonym, role_key: &RoleKey) -> Result<Vec<u8>> {
        let mut plaintext = format!("{}:{}", fingerprint.as_str(), pseudonym.as_str()).into_bytes();
        let sealed = mapping_key(role_key).and_then(|key| key.seal(rng, &plaintext));
        plaintext.zeroize();
        Ok(sealed?.to_bytes())
    }

    /// Encrypt the mapping between an identity and a pseudonym under a role
    /// key. Each call uses a fresh nonce, so the same inputs never produce the
    /// same blob twice.
    pub fn encrypt_mapping<R: RngCore + CryptoRng>(&self, rng: &mut R, identity: &str, pseudonym: &Pseudonym, role_key: &RoleKey) -> Result<Vec<u8>> {
        let fingerprint = self.fingerprints.derive_fingerprint(identity)?;
        Self::seal(rng, &fingerprint, pseudonym, role_key)
    }

    /// Build a full mapping record with one envelope per role key given.
    pub fn seal_record<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        identity: &str,
        pseudonym: &Pseudonym,
        scheme: PseudonymScheme,
        role_keys: &[RoleKey],
        created_at: Timestamp,
    ) -> Result<IdentityMappingRecord> {
        let fingerprint = self.fingerprints.derive_fingerprint(identity)?;
        let key_version = match role_keys.first() {
            Some(key) => key.key_version(),
            None => Err(Error::Validation(String::from("a mapping needs at least one role key")))?,
        };
        if role_keys.iter().any(|k| k.key_version() != key_version) {
            Err(Error::Validation(String::from("role keys span multiple key versions")))?;
        }
        let envelopes = role_keys
            .iter()
            .map(|key| -> Result<MappingEnvelope> {
                Ok(MappingEnvelope {
                    grant: key.grant().clone(),
                    ciphertext: BinaryVec::new(Self::seal(rng, &fingerprint, pseudonym, key)?),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(IdentityMappingRecord {
            pseudonym_id: pseudonym.clone(),
            fingerprint,
            envelopes,
            key_version,
            scheme,
            created_at,
        })
    }

    /// Open a sealed mapping.
    ///
    /// A blob too short to be a mapping is a validation error. Anything that
    /// goes wrong inside the AEAD (wrong key, tampering, truncation) is an
    /// [`Error::AuthenticationFailure`], with no hint as to which.
    pub fn decrypt_mapping(blob: &[u8], role_key: &RoleKey) -> Result<(Fingerprint, Pseudonym)> {
        let sealed = Sealed::from_bytes(blob)?;
        let mut plaintext = mapping_key(role_key)?.open(&sealed)?;
        let parsed = parse_plaintext(&plaintext);
        plaintext.zeroize();
        parsed
    }
}

fn parse_plaintext(plaintext: &[u8]) -> Result<(Fingerprint, Pseudonym)> {
    let malformed = || Error::Validation(String::from("malformed mapping plaintext"));
    let text = std::str::from_utf8(plaintext).map_err(|_| malformed())?;
    let mut parts = text.split(':');
    let (fingerprint, pseudonym) = match (parts.next(), parts.next(), parts.next()) {
        (Some(fp), Some(ps), None) if !fp.is_empty() && !ps.is_empty() => (fp, ps),
        _ => Err(malformed())?,
    };
    let fingerprint = Fingerprint::try_from(fingerprint.to_string()).map_err(|_| malformed())?;
    let pseudonym = Pseudonym::try_from(pseudonym.to_string()).map_err(|_| malformed())?;
    Ok((fingerprint, pseudonym))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::base::{NONCE_LEN, TAG_LEN},
        derive::RoleKeyDeriver,
        keystore::RoleDomains,
        util::test,
    };
    use std::str::FromStr;

    fn role_key(keys: &KeySet, role: &str, scope: &str) -> RoleKey {
        let roles = RoleDomains::default();
        RoleKeyDeriver::new(keys, &roles)
            .derive_role_key(role, scope, Timestamp::from_unix(1_900_000_000))
            .unwrap()
    }

    fn pseudonym() -> Pseudonym {
        Pseudonym::from_str("0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn mapping_roundtrip() {
        let mut rng = test::rng();
        let keys = test::keyset(1);
        let vault = IdentityVault::new(&keys);
        let key = role_key(&keys, "site_admin", "full_correlation");
        let blob = vault.encrypt_mapping(&mut rng, "alice@example.com", &pseudonym(), &key).unwrap();
        assert_eq!(blob.len(), NONCE_LEN + 32 + 1 + 32 + TAG_LEN);

        let (fingerprint, opened) = IdentityVault::decrypt_mapping(&blob, &key).unwrap();
        assert_eq!(opened, pseudonym());
        assert_eq!(fingerprint, FingerprintDeriver::new(&keys).derive_fingerprint("alice@example.com").unwrap());
    }

    #[test]
    fn mapping_nonces_are_fresh() {
        let mut rng = test::rng();
        let keys = test::keyset(1);
        let vault = IdentityVault::new(&keys);
        let key = role_key(&keys, "site_admin", "full_correlation");
        let blob1 = vault.encrypt_mapping(&mut rng, "alice@example.com", &pseudonym(), &key).unwrap();
        let blob2 = vault.encrypt_mapping(&mut rng, "alice@example.com", &pseudonym(), &key).unwrap();
        assert_ne!(blob1, blob2);
        assert_ne!(&blob1[..NONCE_LEN], &blob2[..NONCE_LEN]);
    }

    #[test]
    fn mapping_wrong_key_or_tamper() {
        let mut rng = test::rng();
        let keys = test::keyset(1);
        let vault = IdentityVault::new(&keys);
        let key = role_key(&keys, "site_admin", "full_correlation");
        let wrong = role_key(&keys, "moderator", "subforum_correlation");
        let blob = vault.encrypt_mapping(&mut rng, "alice@example.com", &pseudonym(), &key).unwrap();

        assert_eq!(IdentityVault::decrypt_mapping(&blob, &wrong).err(), Some(Error::AuthenticationFailure));

        // every single bit flip, nonce included
        for bit in 0..blob.len() * 8 {
            let mut tampered = blob.clone();
            tampered[bit / 8] ^= 1 << (bit % 8);
            assert_eq!(IdentityVault::decrypt_mapping(&tampered, &key).err(), Some(Error::AuthenticationFailure), "bit {}", bit);
        }
        // lopping off part of the tag
        assert_eq!(IdentityVault::decrypt_mapping(&blob[..blob.len() - 1], &key).err(), Some(Error::AuthenticationFailure));
    }

    #[test]
    fn mapping_too_short() {
        let keys = test::keyset(1);
        let key = role_key(&keys, "site_admin", "full_correlation");
        assert!(matches!(IdentityVault::decrypt_mapping(&[0u8; NONCE_LEN + TAG_LEN - 1], &key), Err(Error::Validation(_))));
        assert!(matches!(IdentityVault::decrypt_mapping(&[], &key), Err(Error::Validation(_))));
    }

    #[test]
    fn mapping_bad_plaintext() {
        let mut rng = test::rng();
        let keys = test::keyset(1);
        let key = role_key(&keys, "site_admin", "full_correlation");
        let secret = mapping_key(&key).unwrap();
        for bad in [&b"no separator here"[..], b"a:b:c", b":pseudonym", b"fingerprint:", b"\xff\xfe:abc"] {
            let blob = secret.seal(&mut rng, bad).unwrap().to_bytes();
            assert!(matches!(IdentityVault::decrypt_mapping(&blob, &key), Err(Error::Validation(_))), "{:?}", bad);
        }
    }

    #[test]
    fn seal_record_per_grant() {
        let mut rng = test::rng();
        let keys = test::keyset(1);
        let vault = IdentityVault::new(&keys);
        let mod_key = role_key(&keys, "moderator", "subforum_correlation");
        let admin_key = role_key(&keys, "site_admin", "full_correlation");
        let record = vault
            .seal_record(
                &mut rng,
                "alice@example.com",
                &pseudonym(),
                PseudonymScheme::PersonaSecret,
                &[mod_key.clone(), admin_key.clone()],
                Timestamp::now(),
            )
            .unwrap();
        assert_eq!(record.envelopes().len(), 2);
        assert_eq!(record.key_version(), 1);

        let env = record.envelope_for("moderator", "subforum_correlation").unwrap();
        assert!(IdentityVault::decrypt_mapping(env.ciphertext(), &mod_key).is_ok());
        // tiers can't open each other's envelopes
        assert_eq!(IdentityVault::decrypt_mapping(env.ciphertext(), &admin_key).err(), Some(Error::AuthenticationFailure));
        assert!(record.envelope_for("legal_team", "legal_correlation").is_none());

        let res = vault.seal_record(&mut rng, "alice@example.com", &pseudonym(), PseudonymScheme::PersonaSecret, &[], Timestamp::now());
        assert!(matches!(res, Err(Error::Validation(_))));
    }

    #[test]
    fn record_serializes() {
        let mut rng = test::rng();
        let keys = test::keyset(1);
        let vault = IdentityVault::new(&keys);
        let key = role_key(&keys, "legal_team", "legal_correlation");
        let record = vault
            .seal_record(&mut rng, "alice@example.com", &pseudonym(), PseudonymScheme::UserIdContextual, &[key], Timestamp::now())
            .unwrap();
        let json = crate::util::ser::to_json_line(&record).unwrap();
        assert!(!json.contains("alice"));
        let back: IdentityMappingRecord = crate::util::ser::from_json(json.as_bytes()).unwrap();
        assert_eq!(back, record);
    }
}
