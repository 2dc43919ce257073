//! Master secrets and the versioned sets that hold one per domain.

use crate::{
    error::{Error, Result},
    keystore::domain::Domain,
    util::{ser::BinarySecretVec, Timestamp},
};
use rand::{CryptoRng, RngCore};
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use zeroize::Zeroize;

/// Shortest master secret we accept, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// How a master secret is encoded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEncoding {
    /// Lowercase hex, optionally followed by whitespace
    Hex,
    /// The raw bytes
    Raw,
}

/// A long-lived secret for one domain at one key version.
#[derive(Debug, Clone, getset::Getters, getset::CopyGetters)]
pub struct MasterSecret {
    #[getset(get_copy = "pub")]
    domain: Domain,
    #[getset(get_copy = "pub")]
    version: u32,
    #[getset(get = "pub(crate)")]
    secret: BinarySecretVec,
}

impl MasterSecret {
    /// Wrap existing secret bytes. Anything under 256 bits is refused.
    pub fn new(domain: Domain, version: u32, mut secret: Vec<u8>) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            secret.zeroize();
            return Err(Error::KeystoreSecretTooShort);
        }
        Ok(Self {
            domain,
            version,
            secret: BinarySecretVec::new(secret),
        })
    }

    /// Generate a fresh random 256-bit master secret.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R, domain: Domain, version: u32) -> Self {
        let mut bytes = vec![0u8; MIN_SECRET_LEN];
        rng.fill_bytes(&mut bytes);
        Self {
            domain,
            version,
            secret: BinarySecretVec::new(bytes),
        }
    }

    /// Read a master secret from a file in the given encoding.
    pub fn load_file<P: AsRef<Path>>(path: P, domain: Domain, version: u32, encoding: KeyEncoding) -> Result<Self> {
        let mut contents = fs::read(path.as_ref())?;
        let bytes = match encoding {
            KeyEncoding::Raw => contents.clone(),
            KeyEncoding::Hex => {
                let decoded = std::str::from_utf8(&contents)
                    .map_err(|_| Error::Validation(String::from("hex key file is not utf8")))
                    .and_then(|text| Ok(hex::decode(text.trim())?));
                match decoded {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        contents.zeroize();
                        return Err(e);
                    }
                }
            }
        };
        contents.zeroize();
        Self::new(domain, version, bytes)
    }

    /// Write this secret out, readable by the owner only.
    pub fn save_file<P: AsRef<Path>>(&self, path: P, encoding: KeyEncoding) -> Result<()> {
        let mut contents = match encoding {
            KeyEncoding::Raw => self.secret.expose_secret().to_vec(),
            KeyEncoding::Hex => {
                let mut hexed = hex::encode(self.secret.expose_secret()).into_bytes();
                hexed.push(b'\n');
                hexed
            }
        };
        let res = crate::keystore::files::write_private(path.as_ref(), &contents);
        contents.zeroize();
        res
    }
}

/// Describes a key set on disk. Holds no secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub key_version: u32,
    pub salt: String,
    /// Short label -> versioned domain name
    pub domains: BTreeMap<String, String>,
    pub generated_at: Timestamp,
}

/// One master secret per domain, all at the same key version, plus the
/// fingerprint salt that goes with them.
#[derive(Debug, Clone, getset::Getters, getset::CopyGetters)]
pub struct KeySet {
    #[getset(get_copy = "pub")]
    version: u32,
    #[getset(get = "pub")]
    salt: String,
    #[getset(get_copy = "pub")]
    generated_at: Timestamp,
    masters: BTreeMap<Domain, MasterSecret>,
}

impl KeySet {
    /// Build a key set from existing secrets. Every domain must be present and
    /// every secret must carry the set's version.
    pub fn from_masters<I>(version: u32, salt: &str, generated_at: Timestamp, masters: I) -> Result<Self>
    where
        I: IntoIterator<Item = MasterSecret>,
    {
        if salt.is_empty() {
            Err(Error::Validation(String::from("fingerprint salt must not be empty")))?;
        }
        let mut by_domain = BTreeMap::new();
        for master in masters {
            if master.version() != version {
                Err(Error::Validation(format!(
                    "master for {} has version {} in a version {} key set",
                    master.domain(),
                    master.version(),
                    version
                )))?;
            }
            by_domain.insert(master.domain(), master);
        }
        for domain in Domain::ALL {
            if !by_domain.contains_key(&domain) {
                Err(Error::KeystoreDomainMissing(domain.name().to_string()))?;
            }
        }
        Ok(Self {
            version,
            salt: salt.to_string(),
            generated_at,
            masters: by_domain,
        })
    }

    /// Generate a complete fresh key set.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R, version: u32, salt: &str) -> Result<Self> {
        let masters = Domain::ALL
            .iter()
            .map(|domain| MasterSecret::generate(rng, *domain, version))
            .collect::<Vec<_>>();
        Self::from_masters(version, salt, Timestamp::now(), masters)
    }

    /// Grab the master for a domain.
    pub fn master(&self, domain: Domain) -> Result<&MasterSecret> {
        self.masters
            .get(&domain)
            .ok_or_else(|| Error::KeystoreDomainMissing(domain.name().to_string()))
    }

    /// Iterate the masters in domain order
    pub fn masters(&self) -> impl Iterator<Item = &MasterSecret> {
        self.masters.values()
    }

    pub fn manifest(&self) -> Manifest {
        Manifest {
            key_version: self.version,
            salt: self.salt.clone(),
            domains: self
                .masters
                .keys()
                .map(|d| (d.label().to_string(), d.name().to_string()))
                .collect(),
            generated_at: self.generated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test;

    #[test]
    fn master_secret_too_short() {
        let res = MasterSecret::new(Domain::AdminCorrelation, 1, vec![1u8; 31]);
        assert_eq!(res.err(), Some(Error::KeystoreSecretTooShort));
        let ok = MasterSecret::new(Domain::AdminCorrelation, 1, vec![1u8; 64]).unwrap();
        assert_eq!(ok.secret().len(), 64);
        assert!(!format!("{:?}", ok).contains("1, 1, 1"));
    }

    #[test]
    fn master_secret_file_encodings() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = test::rng();
        let master = MasterSecret::generate(&mut rng, Domain::LegalCorrelation, 3);

        let hex_path = dir.path().join("legal.hex");
        master.save_file(&hex_path, KeyEncoding::Hex).unwrap();
        let contents = fs::read_to_string(&hex_path).unwrap();
        assert_eq!(contents.trim(), hex::encode(master.secret().expose_secret()));
        let loaded = MasterSecret::load_file(&hex_path, Domain::LegalCorrelation, 3, KeyEncoding::Hex).unwrap();
        assert_eq!(loaded.secret().expose_secret(), master.secret().expose_secret());

        let raw_path = dir.path().join("legal.raw");
        master.save_file(&raw_path, KeyEncoding::Raw).unwrap();
        assert_eq!(fs::read(&raw_path).unwrap().len(), MIN_SECRET_LEN);
        let loaded = MasterSecret::load_file(&raw_path, Domain::LegalCorrelation, 3, KeyEncoding::Raw).unwrap();
        assert_eq!(loaded.secret().expose_secret(), master.secret().expose_secret());

        // a raw file read as hex is junk
        assert!(MasterSecret::load_file(&raw_path, Domain::LegalCorrelation, 3, KeyEncoding::Hex).is_err());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&hex_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn keyset_requires_every_domain() {
        let mut rng = test::rng();
        let masters = Domain::ALL
            .iter()
            .filter(|d| **d != Domain::LegalCorrelation)
            .map(|d| MasterSecret::generate(&mut rng, *d, 1))
            .collect::<Vec<_>>();
        let res = KeySet::from_masters(1, "fingerprint_salt_v1", Timestamp::now(), masters);
        assert_eq!(res.err(), Some(Error::KeystoreDomainMissing(String::from("legal_correlation_v1"))));
    }

    #[test]
    fn keyset_rejects_mixed_versions() {
        let mut rng = test::rng();
        let masters = Domain::ALL
            .iter()
            .enumerate()
            .map(|(i, d)| MasterSecret::generate(&mut rng, *d, if i == 0 { 2 } else { 1 }))
            .collect::<Vec<_>>();
        let res = KeySet::from_masters(1, "fingerprint_salt_v1", Timestamp::now(), masters);
        assert!(matches!(res, Err(Error::Validation(_))));
    }

    #[test]
    fn keyset_generate_and_manifest() {
        let mut rng = test::rng();
        let keys = KeySet::generate(&mut rng, 4, "pepper").unwrap();
        assert_eq!(keys.version(), 4);
        assert_eq!(keys.masters().count(), 5);
        let admin = keys.master(Domain::AdminCorrelation).unwrap();
        let legal = keys.master(Domain::LegalCorrelation).unwrap();
        assert_ne!(admin.secret().expose_secret(), legal.secret().expose_secret());

        let manifest = keys.manifest();
        assert_eq!(manifest.key_version, 4);
        assert_eq!(manifest.salt, "pepper");
        assert_eq!(manifest.domains.get("mod_correlation").map(|x| x.as_str()), Some("moderator_correlation_v1"));
        assert_eq!(manifest.domains.len(), 5);
    }
}
