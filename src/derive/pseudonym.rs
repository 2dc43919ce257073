//! Pseudonyms: the public, per-persona handles everything else hangs off of.

use crate::{
    crypto::base::Hash,
    error::{Error, Result},
    keystore::{Domain, KeySet},
};
use serde_derive::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::str::FromStr;

/// Bytes of hash kept for a pseudonym (rendered as 32 hex chars).
pub const PSEUDONYM_LEN: usize = 16;
const MAX_PSEUDONYM_CHARS: usize = 128;

/// A public pseudonym ID.
///
/// Pseudonyms we derive are always 32 lowercase hex characters. Ones that
/// come in from outside only have to be short, non-empty, and free of
/// anything but ascii letters, digits, `-` and `_`, since the vault uses `:`
/// as a separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pseudonym(String);

impl Pseudonym {
    fn from_hash(hash: Hash) -> Self {
        Self(hash.truncated_hex(PSEUDONYM_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Pseudonym {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        let ok = !value.is_empty()
            && value.len() <= MAX_PSEUDONYM_CHARS
            && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if ok {
            Ok(Self(value))
        } else {
            Err(Error::Validation(String::from("malformed pseudonym")))
        }
    }
}

impl From<Pseudonym> for String {
    fn from(pseudonym: Pseudonym) -> Self {
        pseudonym.0
    }
}

impl FromStr for Pseudonym {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s.to_string())
    }
}

impl std::fmt::Display for Pseudonym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Records which recipe produced a pseudonym, so it can be re-derived later
/// for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PseudonymScheme {
    /// `H(persona secret || master)`
    PersonaSecret,
    /// `H(user id || master)`
    UserIdLegacy,
    /// `H(user id || master || H(context || salt))`
    UserIdContextual,
}

impl PseudonymScheme {
    /// The user id scheme for a version number. Anything we don't recognize is
    /// treated as the legacy version.
    pub fn for_user_id_version(version: u32) -> Self {
        match version {
            2 => Self::UserIdContextual,
            _ => Self::UserIdLegacy,
        }
    }
}

/// The user-held input a pseudonym is derived from.
#[derive(Clone, Copy)]
pub enum PseudonymInput<'a> {
    /// A secret only the persona's owner knows
    PersonaSecret(&'a [u8]),
    /// An internal user id, plus a context string (ignored by version 1)
    UserId { user_id: i64, context: &'a str, version: u32 },
}

impl<'a> PseudonymInput<'a> {
    pub fn scheme(&self) -> PseudonymScheme {
        match self {
            Self::PersonaSecret(_) => PseudonymScheme::PersonaSecret,
            Self::UserId { version, .. } => PseudonymScheme::for_user_id_version(*version),
        }
    }
}

impl<'a> std::fmt::Debug for PseudonymInput<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PersonaSecret(_) => write!(f, "PersonaSecret(<redacted>)"),
            Self::UserId { version, .. } => write!(f, "UserId {{ version: {}, .. }}", version),
        }
    }
}

/// Derives pseudonyms from the user pseudonym domain master of one key set.
pub struct PseudonymDeriver<'a> {
    keys: &'a KeySet,
}

impl<'a> PseudonymDeriver<'a> {
    pub fn new(keys: &'a KeySet) -> Self {
        Self { keys }
    }

    fn master(&self) -> Result<&'a [u8]> {
        Ok(self.keys.master(Domain::UserPseudonyms)?.secret().expose_secret())
    }

    /// `hex(H(secret || master)[..16])`
    pub fn derive_pseudonym(&self, secret: &[u8]) -> Result<Pseudonym> {
        if secret.is_empty() {
            Err(Error::Validation(String::from("persona secret must not be empty")))?;
        }
        Ok(Pseudonym::from_hash(Hash::new_blake3_parts(&[secret, self.master()?])))
    }

    /// Derive from a user id. Version 2 mixes in a hash of the context and the
    /// fingerprint salt; every other version ignores the context.
    pub fn derive_enhanced_pseudonym(&self, user_id: i64, context: &str, version: u32) -> Result<Pseudonym> {
        let id = user_id.to_string();
        let master = self.master()?;
        let hash = match PseudonymScheme::for_user_id_version(version) {
            PseudonymScheme::UserIdContextual => {
                let context_hash = Hash::new_blake3_parts(&[context.as_bytes(), self.keys.salt().as_bytes()]);
                Hash::new_blake3_parts(&[id.as_bytes(), master, context_hash.as_bytes()])
            }
            _ => Hash::new_blake3_parts(&[id.as_bytes(), master]),
        };
        Ok(Pseudonym::from_hash(hash))
    }

    /// Derive from whatever input the caller holds.
    pub fn derive(&self, input: &PseudonymInput) -> Result<Pseudonym> {
        match input {
            PseudonymInput::PersonaSecret(secret) => self.derive_pseudonym(secret),
            PseudonymInput::UserId { user_id, context, version } => self.derive_enhanced_pseudonym(*user_id, context, *version),
        }
    }

    /// Re-derive under a stored scheme. For user id inputs the scheme picks the
    /// recipe and the input's own version is ignored.
    pub fn derive_for(&self, scheme: PseudonymScheme, input: &PseudonymInput) -> Result<Pseudonym> {
        match (scheme, input) {
            (PseudonymScheme::PersonaSecret, PseudonymInput::PersonaSecret(secret)) => self.derive_pseudonym(secret),
            (PseudonymScheme::UserIdLegacy, PseudonymInput::UserId { user_id, context, .. }) => self.derive_enhanced_pseudonym(*user_id, context, 1),
            (PseudonymScheme::UserIdContextual, PseudonymInput::UserId { user_id, context, .. }) => self.derive_enhanced_pseudonym(*user_id, context, 2),
            _ => Err(Error::Validation(String::from("input does not match the pseudonym scheme"))),
        }
    }
}
