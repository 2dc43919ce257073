//! Utilities. OBVIOUSLY.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde_derive::{Deserialize, Serialize};
use std::ops::Deref;
use std::str::FromStr;

pub mod ser;

/// Defines a uuid-backed object ID with string conversions.
macro_rules! object_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde_derive::Serialize, serde_derive::Deserialize)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new random ID
            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl std::ops::Deref for $name {
            type Target = uuid::Uuid;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::Error;
            fn from_str(id_str: &str) -> std::result::Result<Self, Self::Err> {
                let id = uuid::Uuid::parse_str(id_str)
                    .map_err(|_| crate::error::Error::Validation(format!("malformed {}", stringify!($name))))?;
                Ok(Self(id))
            }
        }
    }
}

/// A library-local representation of a time.
///
/// Wrapping the chrono type gives us one place to decide how times serialize
/// (rfc3339 for humans, nanoseconds otherwise) and one place to change if the
/// underlying datetime crate ever needs to. Anything that converts into a
/// `DateTime<Utc>` converts into a `Timestamp`, and you can always get the
/// underlying value back via deref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(#[serde(with = "crate::util::ser::timestamp")] DateTime<Utc>);

impl Timestamp {
    /// Create a new Timestamp from the current date/time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create a timestamp from unix seconds. Out-of-range values clamp to the
    /// unix epoch.
    pub fn from_unix(secs: i64) -> Self {
        Self(DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default())
    }

    /// Unix seconds
    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }

    /// Shift this timestamp forward (or backward, with a negative duration).
    /// Landing outside the representable range is a validation error.
    pub fn offset(&self, duration: Duration) -> Result<Self> {
        self.0
            .checked_add_signed(duration)
            .map(Self)
            .ok_or_else(|| Error::Validation(String::from("time offset out of range")))
    }
}

impl Deref for Timestamp {
    type Target = DateTime<Utc>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(date: DateTime<Utc>) -> Self {
        Self(date)
    }
}

impl FromStr for Timestamp {
    type Err = chrono::format::ParseError;
    fn from_str(s: &str) -> std::result::Result<Timestamp, Self::Err> {
        let datetime: DateTime<Utc> = s.parse()?;
        Ok(Timestamp(datetime))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
