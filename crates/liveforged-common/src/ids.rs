//! Stream identifier newtype.
//!
//! Stream names come straight from publishers, so they are validated once at
//! the edge. A [`StreamId`] can only be obtained through [`StreamId::parse`]
//! (or its `FromStr`/`Deserialize` impls), which makes it safe to join onto
//! the output root without further checks.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Maximum accepted identifier length, in bytes.
pub const MAX_STREAM_ID_LEN: usize = 128;

/// Validated, ingest-assigned name of one logical stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Validate a raw identifier.
    ///
    /// Accepts 1 to [`MAX_STREAM_ID_LEN`] characters from `[A-Za-z0-9_.-]`,
    /// without a leading dot. Everything else is a [`Error::Validation`].
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::validation("identifier is empty"));
        }
        if raw.len() > MAX_STREAM_ID_LEN {
            return Err(Error::validation(format!(
                "identifier exceeds {} bytes",
                MAX_STREAM_ID_LEN
            )));
        }
        if raw.starts_with('.') {
            return Err(Error::validation(format!(
                "identifier {:?} starts with a dot",
                raw
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(Error::validation(format!(
                "identifier {:?} contains forbidden character {:?}",
                raw, bad
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for StreamId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
