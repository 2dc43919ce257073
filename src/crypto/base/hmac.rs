use crate::{
    error::{Error, Result},
    util::ser::{BinarySecret, BinarySecretVec},
};
use hmac::{Mac, SimpleHmac};
use subtle::{Choice, ConstantTimeEq};

/// A key for deriving an HMAC. Domain master secrets are used directly as HMAC
/// keys, so this accepts any length.
#[derive(Debug, Clone)]
pub enum HmacKey {
    /// Blake3 HMAC key
    Blake3(BinarySecretVec),
}

impl HmacKey {
    /// Create a new blake3 HMAC key from a byte slice
    pub fn new_blake3_from_slice(keybytes: &[u8]) -> Self {
        Self::Blake3(BinarySecretVec::new(keybytes.to_vec()))
    }
}

/// An HMAC. The output of this doubles as key material (role keys are HMACs
/// over their grant), so it is treated as a secret: zeroed on drop, redacted
/// from debug output, and only ever compared in constant time.
#[derive(Debug, Clone)]
pub enum Hmac {
    /// Blake3 HMAC. Blake3 doesn't strictly need the HMAC construction, but
    /// using it keeps the door open for hash functions that do.
    Blake3(BinarySecret<32>),
}

impl Hmac {
    /// Create a new HMAC from a key and a set of data.
    pub fn new(hmac_key: &HmacKey, data: &[u8]) -> Result<Self> {
        match hmac_key {
            HmacKey::Blake3(hmac_key) => {
                let mut hmac = SimpleHmac::<blake3::Hasher>::new_from_slice(hmac_key.expose_secret()).map_err(|_| Error::CryptoBadKey)?;
                hmac.update(data);
                let result = hmac.finalize();
                let gen_arr = result.into_bytes();
                let arr: [u8; 32] = gen_arr.as_slice().try_into().map_err(|_| Error::BadLength)?;
                Ok(Hmac::Blake3(BinarySecret::new(arr)))
            }
        }
    }

    /// Build an HMAC value from raw bytes (for instance, a key presented by a
    /// caller that we want to check).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hmac::Blake3(BinarySecret::new(bytes))
    }

    /// Grab the raw bytes. Handle with care.
    pub fn expose_secret(&self) -> &[u8; 32] {
        match self {
            Hmac::Blake3(bytes) => bytes.expose_secret(),
        }
    }
}

impl ConstantTimeEq for Hmac {
    fn ct_eq(&self, other: &Self) -> Choice {
        match (self, other) {
            (Hmac::Blake3(bytes1), Hmac::Blake3(bytes2)) => bytes1.expose_secret().ct_eq(bytes2.expose_secret()),
        }
    }
}

impl PartialEq for Hmac {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).unwrap_u8() == 1
    }
}

impl Eq for Hmac {}
