use crate::{
    error::{Error, Result},
    util::ser::{Binary, BinarySecret, BinaryVec},
};
use chacha20poly1305::aead::{Aead, KeyInit};
use rand::{CryptoRng, RngCore};
use serde_derive::{Deserialize, Serialize};
use std::ops::Deref;

/// Length of an xchacha20poly1305 nonce
pub const NONCE_LEN: usize = 24;
/// Length of a poly1305 tag
pub const TAG_LEN: usize = 16;

/// An encrypted object that can be opened with the right key.
///
/// On the wire (and in storage) this is the nonce followed by the ciphertext,
/// see [`Sealed::to_bytes`] and [`Sealed::from_bytes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct Sealed {
    /// Our heroic nonce
    nonce: SecretKeyNonce,
    /// The ciphertext (including the auth tag)
    ciphertext: BinaryVec,
}

impl Sealed {
    fn new(nonce: SecretKeyNonce, ciphertext: Vec<u8>) -> Self {
        Self {
            nonce,
            ciphertext: BinaryVec::from(ciphertext),
        }
    }

    /// Serialize as `nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let nonce = match &self.nonce {
            SecretKeyNonce::XChaCha20Poly1305(bin) => bin.deref(),
        };
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(self.ciphertext.as_slice());
        out
    }

    /// Split a `nonce || ciphertext` blob. Anything too short to hold a nonce
    /// and a tag is rejected before we ever try to decrypt it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            Err(Error::Validation(String::from("ciphertext too short")))?;
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce_bytes.try_into().map_err(|_| Error::BadLength)?;
        Ok(Self::new(SecretKeyNonce::XChaCha20Poly1305(Binary::new(nonce)), ciphertext.to_vec()))
    }
}

/// A symmetric encryption key nonce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SecretKeyNonce {
    XChaCha20Poly1305(Binary<NONCE_LEN>),
}

/// A symmetric encryption key
#[derive(Debug, Clone)]
pub enum SecretKey {
    XChaCha20Poly1305(BinarySecret<32>),
}

impl SecretKey {
    /// Create a new random xchacha20poly1305 key
    pub fn new_xchacha20poly1305<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        let mut randbuf = [0u8; 32];
        rng.fill_bytes(&mut randbuf);
        Ok(Self::XChaCha20Poly1305(BinarySecret::new(randbuf)))
    }

    /// Create a SecretKey from a byte array
    pub fn new_xchacha20poly1305_from_bytes(secret_bytes: [u8; 32]) -> Result<Self> {
        Ok(Self::XChaCha20Poly1305(BinarySecret::new(secret_bytes)))
    }

    /// Create a nonce for use with this secret key
    pub fn gen_nonce<R: RngCore + CryptoRng>(&self, rng: &mut R) -> SecretKeyNonce {
        match self {
            SecretKey::XChaCha20Poly1305(_) => {
                let mut randbuf = [0u8; NONCE_LEN];
                rng.fill_bytes(&mut randbuf);
                SecretKeyNonce::XChaCha20Poly1305(Binary::new(randbuf))
            }
        }
    }

    /// Encrypt a value with this key and a fresh random nonce
    pub fn seal<R: RngCore + CryptoRng>(&self, rng: &mut R, data: &[u8]) -> Result<Sealed> {
        let nonce = self.gen_nonce(rng);
        match (self, &nonce) {
            (SecretKey::XChaCha20Poly1305(ref key), SecretKeyNonce::XChaCha20Poly1305(ref nonce_bin)) => {
                let cipher = chacha20poly1305::XChaCha20Poly1305::new(key.expose_secret().into());
                let enc = cipher
                    .encrypt(chacha20poly1305::XNonce::from_slice(nonce_bin.as_slice()), data)
                    .map_err(|_| Error::CryptoSealFailed)?;
                Ok(Sealed::new(nonce, enc))
            }
        }
    }

    /// Decrypt a value with this key. Every failure (wrong key, flipped bit,
    /// truncated tag) comes back as the same error.
    pub fn open(&self, sealed: &Sealed) -> Result<Vec<u8>> {
        match (self, sealed.nonce()) {
            (SecretKey::XChaCha20Poly1305(ref key), SecretKeyNonce::XChaCha20Poly1305(ref nonce)) => {
                let cipher = chacha20poly1305::XChaCha20Poly1305::new(key.expose_secret().into());
                cipher
                    .decrypt(chacha20poly1305::XNonce::from_slice(nonce.as_slice()), sealed.ciphertext().as_slice())
                    .map_err(|_| Error::AuthenticationFailure)
            }
        }
    }
}
