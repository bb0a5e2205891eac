// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Manager configuration loaded from TOML, the environment, or built in code.
//!
//! # TOML Format
//! ```toml
//! externally_synchronized = false
//! minimum_allocator_count = 0
//! maximum_allocator_count = 16
//! minimum_allocator_byte_length = "32M"
//! maximum_shared_allocator_byte_length = "256M"
//! maximum_byte_length = "2G"
//! default_alignment = 256
//! allow_allocator_growth = false
//! ```
//!
//! Every key is optional; omitted keys take the defaults of
//! [`ManagerConfig::default`].
//!
//! # Environment
//! [`ManagerConfig::from_env`] reads the same settings from
//! `GRAPHICS_MEMORY_*` variables, e.g. `GRAPHICS_MEMORY_MAXIMUM_ALLOCATOR_COUNT=4`.

use crate::{ByteSize, MemoryError};
use std::path::Path;

/// Prefix of every environment variable read by [`ManagerConfig::from_env`].
pub const ENV_PREFIX: &str = "GRAPHICS_MEMORY_";

/// Bounds and switches for one [`GraphicsMemoryManager`](crate::GraphicsMemoryManager).
///
/// Read once when the manager is created; the manager never consults the
/// environment on its own.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// The caller guarantees non-concurrent access; no internal lock is taken.
    pub externally_synchronized: bool,
    /// Shared allocators kept alive even when empty.
    pub minimum_allocator_count: usize,
    /// Hard cap on live allocators, shared and dedicated. `None` is unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_allocator_count: Option<usize>,
    /// Smallest shared allocator the manager will create.
    pub minimum_allocator_byte_length: ByteSize,
    /// Largest shared allocator; bigger requests get a dedicated allocator.
    pub maximum_shared_allocator_byte_length: ByteSize,
    /// Soft cap on the pool, lifted per call by `EXCEED_BUDGET`. `None` is unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_byte_length: Option<ByteSize>,
    /// Alignment used when a request asks for zero. Must be a power of two.
    pub default_alignment: usize,
    /// Let full shared allocators grow in place before a new one is created.
    pub allow_allocator_growth: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            externally_synchronized: false,
            minimum_allocator_count: 0,
            maximum_allocator_count: None,
            minimum_allocator_byte_length: ByteSize::from_mb(32),
            maximum_shared_allocator_byte_length: ByteSize::from_mb(256),
            maximum_byte_length: None,
            default_alignment: 256,
            allow_allocator_growth: false,
        }
    }
}

impl ManagerConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, MemoryError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MemoryError::InvalidConfig(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, MemoryError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| MemoryError::InvalidConfig(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, MemoryError> {
        toml::to_string_pretty(self)
            .map_err(|e| MemoryError::InvalidConfig(format!("TOML serialise error: {e}")))
    }

    /// Defaults overridden by `GRAPHICS_MEMORY_*` environment variables.
    pub fn from_env() -> Result<Self, MemoryError> {
        Self::default().with_vars(std::env::vars())
    }

    /// Applies `GRAPHICS_MEMORY_*` overrides from `vars`, ignoring other keys.
    pub fn with_vars<I, K, V>(mut self, vars: I) -> Result<Self, MemoryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "EXTERNALLY_SYNCHRONIZED" => self.externally_synchronized = parse_bool(name, value)?,
                "MINIMUM_ALLOCATOR_COUNT" => self.minimum_allocator_count = parse_count(name, value)?,
                "MAXIMUM_ALLOCATOR_COUNT" => self.maximum_allocator_count = parse_limit(name, value, parse_count)?,
                "MINIMUM_ALLOCATOR_SIZE" => self.minimum_allocator_byte_length = ByteSize::parse(value)?,
                "MAXIMUM_SHARED_ALLOCATOR_SIZE" => {
                    self.maximum_shared_allocator_byte_length = ByteSize::parse(value)?
                }
                "MAXIMUM_SIZE" => self.maximum_byte_length = parse_limit(name, value, |_, v| ByteSize::parse(v))?,
                "DEFAULT_ALIGNMENT" => self.default_alignment = parse_count(name, value)?,
                "ALLOW_ALLOCATOR_GROWTH" => self.allow_allocator_growth = parse_bool(name, value)?,
                other => tracing::warn!("ignoring unknown setting {ENV_PREFIX}{other}"),
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Rejects contradictory bounds.
    pub fn validate(&self) -> Result<(), MemoryError> {
        let invalid = |msg: String| Err(MemoryError::InvalidConfig(msg));

        if !self.default_alignment.is_power_of_two() {
            return invalid(format!(
                "default_alignment {} is not a power of two",
                self.default_alignment
            ));
        }
        if self.minimum_allocator_byte_length.as_bytes() == 0 {
            return invalid("minimum_allocator_byte_length must be nonzero".into());
        }
        if self.minimum_allocator_byte_length > self.maximum_shared_allocator_byte_length {
            return invalid(format!(
                "minimum_allocator_byte_length ({}) exceeds maximum_shared_allocator_byte_length ({})",
                self.minimum_allocator_byte_length, self.maximum_shared_allocator_byte_length
            ));
        }
        if let Some(max) = self.maximum_allocator_count {
            if max == 0 {
                return invalid("maximum_allocator_count must be at least 1".into());
            }
            if self.minimum_allocator_count > max {
                return invalid(format!(
                    "minimum_allocator_count ({}) exceeds maximum_allocator_count ({max})",
                    self.minimum_allocator_count
                ));
            }
        }
        if let Some(max) = self.maximum_byte_length {
            let floor = self
                .minimum_allocator_count
                .saturating_mul(self.minimum_allocator_byte_length.as_bytes());
            if floor > max.as_bytes() {
                return invalid(format!(
                    "{} minimum allocators of {} exceed maximum_byte_length ({max})",
                    self.minimum_allocator_count, self.minimum_allocator_byte_length
                ));
            }
        }
        Ok(())
    }

    /// Size of a new shared allocator for a request of `byte_length` bytes.
    ///
    /// The smallest power of two that holds the request, raised to the
    /// configured minimum and capped at the configured maximum. Monotonic in
    /// `byte_length`.
    pub fn shared_allocator_byte_length(&self, byte_length: usize) -> usize {
        let min = self.minimum_allocator_byte_length.as_bytes();
        let max = self.maximum_shared_allocator_byte_length.as_bytes();
        byte_length
            .checked_next_power_of_two()
            .unwrap_or(max)
            .max(min)
            .min(max)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, MemoryError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MemoryError::InvalidConfig(format!(
            "{ENV_PREFIX}{name}: expected a boolean, got '{value}'"
        ))),
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize, MemoryError> {
    value.parse().map_err(|_| {
        MemoryError::InvalidConfig(format!("{ENV_PREFIX}{name}: expected an integer, got '{value}'"))
    })
}

/// `unbounded` or an empty value clears the limit.
fn parse_limit<T>(
    name: &str,
    value: &str,
    parse: impl Fn(&str, &str) -> Result<T, MemoryError>,
) -> Result<Option<T>, MemoryError> {
    if value.is_empty() || value.eq_ignore_ascii_case("unbounded") {
        return Ok(None);
    }
    parse(name, value).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: usize = 1024 * 1024;

    #[test]
    fn test_defaults() {
        let c = ManagerConfig::default();
        assert!(!c.externally_synchronized);
        assert_eq!(c.minimum_allocator_count, 0);
        assert_eq!(c.maximum_allocator_count, None);
        assert_eq!(c.minimum_allocator_byte_length.as_mb(), 32);
        assert_eq!(c.maximum_shared_allocator_byte_length.as_mb(), 256);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
externally_synchronized = true
maximum_allocator_count = 4
minimum_allocator_byte_length = "1M"
maximum_byte_length = 67108864
"#;
        let c = ManagerConfig::from_toml(toml).unwrap();
        assert!(c.externally_synchronized);
        assert_eq!(c.maximum_allocator_count, Some(4));
        assert_eq!(c.minimum_allocator_byte_length, ByteSize::from_mb(1));
        assert_eq!(c.maximum_byte_length, Some(ByteSize::from_mb(64)));
        assert_eq!(c.default_alignment, 256);
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = ManagerConfig {
            maximum_allocator_count: Some(8),
            ..Default::default()
        };
        let toml = c.to_toml().unwrap();
        assert!(toml.contains("256 MB"));
        assert_eq!(ManagerConfig::from_toml(&toml).unwrap(), c);
    }

    #[test]
    fn test_rejects_contradictions() {
        assert!(ManagerConfig::from_toml("minimum_allocator_count = 3\nmaximum_allocator_count = 2").is_err());
        assert!(ManagerConfig::from_toml("default_alignment = 48").is_err());
        assert!(ManagerConfig::from_toml("maximum_allocator_count = 0").is_err());
        assert!(ManagerConfig::from_toml(
            "minimum_allocator_byte_length = \"512M\"\nmaximum_shared_allocator_byte_length = \"256M\""
        )
        .is_err());
        assert!(ManagerConfig::from_toml("minimum_allocator_count = 4\nmaximum_byte_length = \"64M\"").is_err());
        assert!(matches!(
            ManagerConfig::from_toml("not toml at all ="),
            Err(MemoryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_with_vars() {
        let vars = [
            ("GRAPHICS_MEMORY_EXTERNALLY_SYNCHRONIZED", "true"),
            ("GRAPHICS_MEMORY_MAXIMUM_ALLOCATOR_COUNT", "1"),
            ("GRAPHICS_MEMORY_MINIMUM_ALLOCATOR_SIZE", "1M"),
            ("GRAPHICS_MEMORY_MAXIMUM_SIZE", "unbounded"),
            ("PATH", "/usr/bin"),
        ];
        let c = ManagerConfig::default().with_vars(vars).unwrap();
        assert!(c.externally_synchronized);
        assert_eq!(c.maximum_allocator_count, Some(1));
        assert_eq!(c.minimum_allocator_byte_length.as_bytes(), MIB);
        assert_eq!(c.maximum_byte_length, None);
    }

    #[test]
    fn test_with_vars_rejects_garbage() {
        let bad_bool = [("GRAPHICS_MEMORY_EXTERNALLY_SYNCHRONIZED", "maybe")];
        assert!(ManagerConfig::default().with_vars(bad_bool).is_err());

        let bad_count = [("GRAPHICS_MEMORY_MINIMUM_ALLOCATOR_COUNT", "-1")];
        assert!(ManagerConfig::default().with_vars(bad_count).is_err());
    }

    #[test]
    fn test_shared_allocator_sizing() {
        let c = ManagerConfig {
            minimum_allocator_byte_length: ByteSize::from_mb(1),
            maximum_shared_allocator_byte_length: ByteSize::from_mb(8),
            ..Default::default()
        };
        assert_eq!(c.shared_allocator_byte_length(1), MIB);
        assert_eq!(c.shared_allocator_byte_length(512 * 1024), MIB);
        assert_eq!(c.shared_allocator_byte_length(MIB + 1), 2 * MIB);
        assert_eq!(c.shared_allocator_byte_length(3 * MIB), 4 * MIB);
        assert_eq!(c.shared_allocator_byte_length(8 * MIB), 8 * MIB);
        assert_eq!(c.shared_allocator_byte_length(usize::MAX), 8 * MIB);

        let mut previous = 0;
        for length in (1..64).map(|i| i * 300 * 1024) {
            let size = c.shared_allocator_byte_length(length);
            assert!(size >= previous);
            previous = size;
        }
    }
}
