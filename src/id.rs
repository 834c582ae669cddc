//! Execution Identifiers
//!
//! Every execution record is addressed by a 24-character lowercase
//! hexadecimal token. Identifiers are validated at the boundary, before
//! any store access, and generated by the stores on insert.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of an encoded identifier.
pub const EXECUTION_ID_LEN: usize = 24;

/// Per-process random bytes mixed into every generated identifier.
static PROCESS_UNIQUE: Lazy<[u8; 5]> = Lazy::new(rand::random);

/// Counter for identifiers generated within the same second.
static COUNTER: Lazy<AtomicU32> = Lazy::new(|| AtomicU32::new(rand::random::<u32>() & 0x00ff_ffff));

/// Returned when a token is not 24 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("execution id must be a 24 character hexadecimal string with lowercase letters, got '{0}'")]
pub struct InvalidIdFormat(pub String);

/// A validated execution identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Validates a token and wraps it.
    ///
    /// # Example
    ///
    /// ```
    /// use runbook_engine::ExecutionId;
    ///
    /// assert!(ExecutionId::parse("663a8c84bbe4cf949c6e51e4").is_ok());
    /// assert!(ExecutionId::parse("663A8C84BBE4CF949C6E51E4").is_err());
    /// ```
    pub fn parse(token: &str) -> Result<Self, InvalidIdFormat> {
        if is_valid(token) {
            Ok(Self(token.to_string()))
        } else {
            Err(InvalidIdFormat(token.to_string()))
        }
    }

    /// Generates a fresh identifier.
    ///
    /// Layout: 4 bytes of Unix seconds (big endian), 5 per-process random
    /// bytes, 3 bytes of a wrapping counter.
    pub fn generate() -> Self {
        let seconds = Utc::now().timestamp() as u32;
        let count = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);

        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid(token: &str) -> bool {
    token.len() == EXECUTION_ID_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ExecutionId {
    type Err = InvalidIdFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ExecutionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for ExecutionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ExecutionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Self::parse(&token).map_err(serde::de::Error::custom)
    }
}
