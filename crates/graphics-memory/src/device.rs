// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Identity of the device a manager serves.

use std::fmt;

/// Adapter/device identity passed to allocator factories and used to name
/// allocators in diagnostics. The manager never talks to the device itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DeviceContext {
    pub adapter_name: String,
    pub device_name: String,
}

impl DeviceContext {
    pub fn new(adapter_name: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            device_name: device_name.into(),
        }
    }

    /// A context for host-side simulation and tests.
    pub fn host() -> Self {
        Self::new("host", "simulated")
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.adapter_name, self.device_name)
    }
}
