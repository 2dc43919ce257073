//! The crypto module contains the cryptographic primitives used for deriving
//! pseudonyms, fingerprints and role keys, and for sealing identity mappings.

pub mod base;
