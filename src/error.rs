//! The main error enum for the project lives here, and documents the various
//! conditions that can arise while deriving keys, sealing mappings, and running
//! correlations.
//!
//! Note that none of the messages here carry an identity, a fingerprint, or any
//! key material. Errors travel to the outer API layer, and that layer is not
//! allowed to see those values.

use thiserror::Error;

/// This is our error enum. It contains an entry for any part of the system in
/// which an expectation is not met or a problem occurs.
#[derive(Error, Debug)]
pub enum Error {
    /// The role or scope is not allowed to perform the requested operation, or
    /// the target mapping was never sealed for the requested tier.
    #[error("role {role} is not authorized for {operation}")]
    AuthorizationDenied {
        role: String,
        operation: String,
    },

    /// A role key was wrong, expired, or the ciphertext it was used on has been
    /// tampered with. These are deliberately lumped together.
    #[error("invalid or expired credentials for this operation")]
    AuthenticationFailure,

    /// Writing an audit record failed. Whatever operation triggered the write
    /// must not surface a result.
    #[error("failed to write audit record: {0}")]
    AuditWriteFailure(String),

    /// Bad key handed to a cryptographic function.
    #[error("key is invalid")]
    CryptoBadKey,

    /// HKDF expansion failed
    #[error("hkdf failure")]
    CryptoHKDFFailed,

    /// Failed to seal an object.
    #[error("failed to seal an object")]
    CryptoSealFailed,

    /// A byte slice had the wrong length for what we wanted to do with it.
    #[error("bad length")]
    BadLength,

    /// An error while decoding base64.
    #[error("deserialization error")]
    DeserializeBase64(#[from] base64::DecodeError),

    /// An error while decoding hex.
    #[error("hex decoding error")]
    DeserializeHex(#[from] hex::FromHexError),

    /// An IO error
    #[error("io error {0:?}")]
    IoError(#[from] std::io::Error),

    /// A key version was requested that was never loaded.
    #[error("key version {0} is unknown")]
    KeyVersionUnknown(u32),

    /// A key version exists but its grace period has run out.
    #[error("key version {0} has been retired")]
    KeyVersionRetired(u32),

    /// A key set is missing the master for a domain.
    #[error("no master secret for domain {0}")]
    KeystoreDomainMissing(String),

    /// The key store lock was poisoned by a panicking writer.
    #[error("key store lock poisoned")]
    KeystoreLockPoisoned,

    /// Rotation must move to a strictly newer key version.
    #[error("cannot rotate from key version {current} to {requested}")]
    KeystoreRotationOutOfOrder {
        current: u32,
        requested: u32,
    },

    /// Master secrets must be at least 256 bits.
    #[error("master secret must be at least 32 bytes")]
    KeystoreSecretTooShort,

    /// No mapping (or other requested object) exists.
    #[error("not found")]
    NotFound,

    /// An error while engaging in json (de)serialization.
    #[error("json serialization error")]
    SerializeJson(#[from] serde_json::Error),

    /// An error while engaging in yaml (de)serialization.
    #[error("yaml serialization error")]
    SerializeYaml(#[from] serde_yaml::Error),

    /// The backing store failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Input was malformed (short ciphertext, bad role name, etc).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl Error {
    /// Returns true for the errors a caller must present as "invalid or expired
    /// credentials" without further detail.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailure | Self::KeyVersionRetired(_) | Self::KeyVersionUnknown(_))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        // std::io::Error and friends are not comparable, so we compare the
        // debug output instead. good enough for tests.
        format!("{:?}", self) == format!("{:?}", other)
    }
}

/// Wraps `std::result::Result` around our `Error` enum
pub type Result<T> = std::result::Result<T, Error>;
