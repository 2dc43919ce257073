//! The keystore holds every domain master secret, versioned, and hands out
//! consistent snapshots of them.
//!
//! Everything else in the crate is a pure function of what's in here, so this
//! is the thing to protect. Nothing in this module logs secret material.

pub mod domain;
pub mod files;
pub mod master;
pub mod store;

pub use domain::{Domain, RoleDomains};
pub use files::{format_window, parse_window, write_role_key_artifacts};
pub use master::{KeyEncoding, KeySet, Manifest, MasterSecret};
pub use store::{KeyRing, MasterKeyStore, RetiredKeySet};
