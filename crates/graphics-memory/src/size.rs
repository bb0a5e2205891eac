// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Human-readable byte sizes for configuration and the CLI.
//!
//! A [`ByteSize`] is a plain byte count that parses from and prints to the
//! `"256M"` / `"32 MB"` notation used in configuration files.

use crate::MemoryError;
use std::fmt;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// A byte count with binary-suffix parsing.
///
/// # Parsing
/// - `"256M"` or `"256MB"` → 256 × 1024² bytes
/// - `"1G"` or `"1GB"` → 1 × 1024³ bytes
/// - `"64K"` or `"64KB"` → 64 × 1024 bytes
/// - `"1048576"` → raw byte count
///
/// # Examples
/// ```
/// use graphics_memory::ByteSize;
///
/// let s = ByteSize::parse("256M").unwrap();
/// assert_eq!(s.as_bytes(), 256 * 1024 * 1024);
/// assert_eq!(s.to_string(), "256 MB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "ByteSizeRepr", into = "String")]
pub struct ByteSize {
    bytes: usize,
}

impl ByteSize {
    /// Creates a size from a byte count.
    pub const fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    /// Creates a size from kibibytes.
    pub const fn from_kb(kb: usize) -> Self {
        Self { bytes: kb * KIB }
    }

    /// Creates a size from mebibytes.
    pub const fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MIB }
    }

    /// Creates a size from gibibytes.
    pub const fn from_gb(gb: usize) -> Self {
        Self { bytes: gb * GIB }
    }

    /// Returns the size in bytes.
    pub const fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Returns the size in mebibytes (truncated).
    pub const fn as_mb(&self) -> usize {
        self.bytes / MIB
    }

    /// Parses a human-readable size string. Case-insensitive; zero is rejected.
    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        let s = s.trim();
        let invalid = || MemoryError::InvalidByteSize(s.to_string());
        if s.is_empty() {
            return Err(invalid());
        }

        let upper = s.to_uppercase();
        let (num_str, multiplier) = if upper.ends_with("GB") {
            (&s[..s.len() - 2], GIB)
        } else if upper.ends_with('G') {
            (&s[..s.len() - 1], GIB)
        } else if upper.ends_with("MB") {
            (&s[..s.len() - 2], MIB)
        } else if upper.ends_with('M') {
            (&s[..s.len() - 1], MIB)
        } else if upper.ends_with("KB") {
            (&s[..s.len() - 2], KIB)
        } else if upper.ends_with('K') {
            (&s[..s.len() - 1], KIB)
        } else if upper.ends_with('B') {
            (&s[..s.len() - 1], 1)
        } else {
            (s, 1)
        };

        let value: usize = num_str.trim().parse().map_err(|_| invalid())?;
        let bytes = value.checked_mul(multiplier).ok_or_else(invalid)?;
        if bytes == 0 {
            return Err(invalid());
        }

        Ok(Self { bytes })
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.bytes;
        if b >= GIB && b % GIB == 0 {
            write!(f, "{} GB", b / GIB)
        } else if b >= MIB && b % MIB == 0 {
            write!(f, "{} MB", b / MIB)
        } else if b >= KIB && b % KIB == 0 {
            write!(f, "{} KB", b / KIB)
        } else {
            write!(f, "{b} B")
        }
    }
}

impl std::str::FromStr for ByteSize {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<ByteSize> for String {
    fn from(size: ByteSize) -> Self {
        size.to_string()
    }
}

/// Accepts either `32M`-style strings or bare integers in config files.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum ByteSizeRepr {
    Bytes(usize),
    Text(String),
}

impl TryFrom<ByteSizeRepr> for ByteSize {
    type Error = MemoryError;

    fn try_from(repr: ByteSizeRepr) -> Result<Self, Self::Error> {
        match repr {
            ByteSizeRepr::Bytes(bytes) => Ok(Self::from_bytes(bytes)),
            ByteSizeRepr::Text(text) => Self::parse(&text),
        }
    }
}
