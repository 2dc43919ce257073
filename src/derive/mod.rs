//! Pure derivations over a key set: pseudonyms from user secrets, fingerprints
//! from identities, and role keys from grants.
//!
//! Derivers borrow a [`KeySet`][crate::keystore::KeySet] snapshot and never
//! touch shared state, so they can be created per call and used from any
//! thread.

pub mod fingerprint;
pub mod pseudonym;
pub mod role_key;

pub use fingerprint::{Fingerprint, FingerprintDeriver};
pub use pseudonym::{Pseudonym, PseudonymDeriver, PseudonymInput, PseudonymScheme};
pub use role_key::{Expiry, KeyGrant, KeyRejection, RoleKey, RoleKeyDeriver};
