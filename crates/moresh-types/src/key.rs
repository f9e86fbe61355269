//! Connection identifiers.
//!
//! A [`ConnectionKey`] is a self-chosen secret that a peer registers with the
//! relay. Keys are not issued by the server and are unique only by convention.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of characters in a usable connection key.
pub const MIN_KEY_LEN: usize = 8;

/// Length of keys produced by [`ConnectionKey::generate`].
const GENERATED_KEY_LEN: usize = 8;

/// Rejected connection key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("Keys must be at least {min} characters (got {len})")]
    TooShort { len: usize, min: usize },
}

/// A validated connection identifier (at least [`MIN_KEY_LEN`] characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConnectionKey(String);

impl ConnectionKey {
    /// Validate a user-supplied key.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let len = raw.chars().count();
        if len < MIN_KEY_LEN {
            return Err(KeyError::TooShort {
                len,
                min: MIN_KEY_LEN,
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Generate a random lowercase base-36 key.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let key: String = (0..GENERATED_KEY_LEN)
            .map(|_| {
                let digit = rng.gen_range(0..36u32);
                char::from_digit(digit, 36).unwrap_or('0')
            })
            .collect();
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display: `abcd...wxyz`.
    pub fn short(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let head: String = chars.iter().take(4).collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        format!("{head}...{tail}")
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ConnectionKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ConnectionKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConnectionKey> for String {
    fn from(key: ConnectionKey) -> Self {
        key.0
    }
}

impl AsRef<str> for ConnectionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
