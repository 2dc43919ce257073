//! Helpful serialization tools.
//!
//! Binary values (ciphertexts, digests) are written as url-safe base64 when the
//! target format is human readable (json, yaml) and as raw bytes otherwise.
//! Secrets get their own containers that zero themselves on drop and refuse to
//! print their contents.

use crate::error::{Error, Result};
use base64::Engine;
use serde::{de::DeserializeOwned, Deserializer, Serialize, Serializer};
use std::ops::Deref;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Convert bytes to base64
pub fn base64_encode<T: AsRef<[u8]>>(bytes: T) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes.as_ref())
}

/// Convert base64 to bytes
pub fn base64_decode<T: AsRef<[u8]>>(bytes: T) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(bytes.as_ref())?)
}

/// Serialize an object to pretty json
pub(crate) fn to_json<T: Serialize>(obj: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(obj)?)
}

/// Serialize an object to a single json line (no newlines)
pub(crate) fn to_json_line<T: Serialize>(obj: &T) -> Result<String> {
    Ok(serde_json::to_string(obj)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn from_yaml<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_yaml::from_slice(bytes)?)
}

pub(crate) fn to_yaml<T: Serialize>(obj: &T) -> Result<String> {
    Ok(serde_yaml::to_string(obj)?)
}

fn serialize_binary<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serializer.serialize_str(&base64_encode(bytes))
    } else {
        serializer.serialize_bytes(bytes)
    }
}

struct BinaryVisitor;

impl<'de> serde::de::Visitor<'de> for BinaryVisitor {
    type Value = Vec<u8>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("base64 string or byte array")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
        base64_decode(v).map_err(E::custom)
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> std::result::Result<Self::Value, E> {
        Ok(v.to_vec())
    }

    fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> std::result::Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(byte) = seq.next_element::<u8>()? {
            out.push(byte);
        }
        Ok(out)
    }
}

fn deserialize_binary<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    if deserializer.is_human_readable() {
        deserializer.deserialize_str(BinaryVisitor)
    } else {
        deserializer.deserialize_bytes(BinaryVisitor)
    }
}

/// A fixed-length container for public binary data (digests, nonces).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary<const N: usize>([u8; N]);

impl<const N: usize> Binary<N> {
    pub fn new(data: [u8; N]) -> Self {
        Self(data)
    }
}

impl<const N: usize> Deref for Binary<N> {
    type Target = [u8; N];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const N: usize> Serialize for Binary<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serialize_binary(&self.0[..], serializer)
    }
}

impl<'de, const N: usize> serde::Deserialize<'de> for Binary<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let vec = deserialize_binary(deserializer)?;
        let arr: [u8; N] = vec
            .try_into()
            .map_err(|_| serde::de::Error::custom(String::from("bad slice length")))?;
        Ok(Self(arr))
    }
}

/// A variable-length container for public binary data (ciphertexts).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BinaryVec(Vec<u8>);

impl BinaryVec {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for BinaryVec {
    type Target = Vec<u8>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<u8>> for BinaryVec {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl Serialize for BinaryVec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serialize_binary(&self.0[..], serializer)
    }
}

impl<'de> serde::Deserialize<'de> for BinaryVec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Self(deserialize_binary(deserializer)?))
    }
}

/// A fixed-length secret. Zeroed on drop, never printed, never serialized.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BinarySecret<const N: usize>([u8; N]);

impl<const N: usize> BinarySecret<N> {
    pub fn new(data: [u8; N]) -> Self {
        Self(data)
    }

    pub fn expose_secret(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> Clone for BinarySecret<N> {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl<const N: usize> std::fmt::Debug for BinarySecret<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BinarySecret<{}>(<redacted>)", N)
    }
}

/// A variable-length secret (master secrets can be longer than 32 bytes).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct BinarySecretVec(Vec<u8>);

impl BinarySecretVec {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn expose_secret(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Debug for BinarySecretVec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BinarySecretVec[{}](<redacted>)", self.0.len())
    }
}

/// Decode a hex string that must be exactly `N` bytes long.
pub fn hex_decode_array<const N: usize>(string: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(string.trim())?;
    bytes.try_into().map_err(|_| Error::BadLength)
}

pub(crate) mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            ts.serialize(serializer)
        } else {
            chrono::serde::ts_nanoseconds::serialize(ts, serializer)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            DateTime::<Utc>::deserialize(deserializer)
        } else {
            chrono::serde::ts_nanoseconds::deserialize(deserializer)
        }
    }
}
