//! The crypto base wraps the handful of algorithms this crate leans on: blake3
//! for hashing and HMAC, HKDF for stretching keys, and xchacha20poly1305 for
//! authenticated encryption.
//!
//! The idea here is that specific algorithms are wrapped in descriptive
//! interfaces that allow high-level use of the encapsulated cryptographic
//! algorithms without needing to know the details of those algorithms.

use crate::error::{Error, Result};
use rand::{rngs::OsRng, RngCore, SeedableRng};

mod hash;
mod hmac;
mod secret_key;

pub use hash::*;
pub use hmac::*;
pub use secret_key::*;

/// A convenience function that returns a ChaCha20 CSRNG seeded with OS random bytes. Use this if
/// you want a nice, strong random number generator, you don't want to wire one up yourself, and
/// your platform provides good entropy.
///
/// This can be used as an input to any function here that accepts `&mut rng`. Otherwise, you can
/// bring your own RNG that implements [`RngCore`].
pub fn rng_chacha20() -> rand_chacha::ChaCha20Rng {
    let mut seed_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut seed_bytes);
    rand_chacha::ChaCha20Rng::from_seed(seed_bytes)
}

/// Given the bytes from a secret key, derive some other key of N length in a secure manner.
pub fn stretch_key<const N: usize>(input: &[u8], output: &mut [u8; N], info: Option<&[u8]>, salt: Option<&[u8]>) -> Result<()> {
    let hkdf = hkdf::SimpleHkdf::<blake3::Hasher>::new(salt, input);
    hkdf.expand(info.unwrap_or(b"hashpost/hkdf"), output)
        .map_err(|_| Error::CryptoHKDFFailed)?;
    Ok(())
}
