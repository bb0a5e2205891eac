// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-call allocation options and per-allocator creation options.
//!
//! [`AllocationOptions::validate`] is the single validation boundary: the
//! manager calls it before touching any allocator, and the trusted
//! allocation path assumes it has already passed.

use crate::{AllocatorId, MemoryError, MemoryRegion};
use std::fmt;
use std::sync::Arc;

bitflags::bitflags! {
    /// Placement policy for a single allocation.
    ///
    /// `DEDICATED_MEMORY_ALLOCATOR` and `EXISTING_MEMORY_ALLOCATOR` are
    /// mutually exclusive. Bits outside this set are rejected.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AllocationFlags: u32 {
        /// Give the allocation a private allocator sized exactly to it.
        const DEDICATED_MEMORY_ALLOCATOR = 1 << 0;
        /// Never create or grow an allocator for this allocation.
        const EXISTING_MEMORY_ALLOCATOR = 1 << 1;
        /// Allow the pool to grow past its configured byte budget.
        const EXCEED_BUDGET = 1 << 2;
    }
}

/// What to allocate: length, alignment and placement flags.
///
/// # Example
/// ```
/// use graphics_memory::{AllocationFlags, AllocationOptions};
///
/// let options = AllocationOptions::new(64 * 1024)
///     .with_alignment(4096)
///     .with_flags(AllocationFlags::DEDICATED_MEMORY_ALLOCATOR);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AllocationOptions {
    /// Zero means "use the manager's default alignment".
    pub byte_alignment: usize,
    pub byte_length: usize,
    pub flags: AllocationFlags,
}

impl AllocationOptions {
    /// Options for `byte_length` bytes at default alignment with no flags.
    pub fn new(byte_length: usize) -> Self {
        Self {
            byte_alignment: 0,
            byte_length,
            flags: AllocationFlags::empty(),
        }
    }

    pub fn with_alignment(mut self, byte_alignment: usize) -> Self {
        self.byte_alignment = byte_alignment;
        self
    }

    pub fn with_flags(mut self, flags: AllocationFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Checks alignment, length and flags without side effects.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.byte_alignment != 0 && !self.byte_alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment(self.byte_alignment));
        }
        if self.byte_length == 0 {
            return Err(MemoryError::ZeroLengthAllocation);
        }

        let undefined = self.flags.bits() & !AllocationFlags::all().bits();
        if undefined != 0 {
            return Err(MemoryError::UndefinedFlags(undefined));
        }
        if self.flags.contains(
            AllocationFlags::DEDICATED_MEMORY_ALLOCATOR | AllocationFlags::EXISTING_MEMORY_ALLOCATOR,
        ) {
            return Err(MemoryError::ConflictingFlags);
        }

        Ok(())
    }

    /// Substitutes `default_alignment` when no alignment was requested.
    pub(crate) fn resolved(mut self, default_alignment: usize) -> Self {
        if self.byte_alignment == 0 {
            self.byte_alignment = default_alignment;
        }
        self
    }

    pub fn is_dedicated(&self) -> bool {
        self.flags.contains(AllocationFlags::DEDICATED_MEMORY_ALLOCATOR)
    }

    pub fn is_existing_only(&self) -> bool {
        self.flags.contains(AllocationFlags::EXISTING_MEMORY_ALLOCATOR)
    }

    pub fn may_exceed_budget(&self) -> bool {
        self.flags.contains(AllocationFlags::EXCEED_BUDGET)
    }
}

/// Invoked by an allocator every time one of its regions is freed.
pub type FreeCallback = Arc<dyn Fn(&MemoryRegion) + Send + Sync>;

/// Everything a factory needs to build one allocator.
#[derive(Clone)]
pub struct AllocatorCreateOptions {
    /// Identity the allocator must stamp on every region it hands out.
    pub id: AllocatorId,
    pub byte_length: usize,
    /// Dedicated allocators serve exactly one region.
    pub is_dedicated: bool,
    /// Lets the manager track freed bytes without the allocator knowing about it.
    pub on_free: Option<FreeCallback>,
}

impl AllocatorCreateOptions {
    /// Options for a shared allocator with no free callback.
    pub fn shared(byte_length: usize) -> Self {
        Self {
            id: AllocatorId::next(),
            byte_length,
            is_dedicated: false,
            on_free: None,
        }
    }

    /// Options for a dedicated allocator with no free callback.
    pub fn dedicated(byte_length: usize) -> Self {
        Self {
            is_dedicated: true,
            ..Self::shared(byte_length)
        }
    }

    pub fn with_on_free(mut self, on_free: FreeCallback) -> Self {
        self.on_free = Some(on_free);
        self
    }
}

impl fmt::Debug for AllocatorCreateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorCreateOptions")
            .field("id", &self.id)
            .field("byte_length", &self.byte_length)
            .field("is_dedicated", &self.is_dedicated)
            .field("has_on_free", &self.on_free.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_options() {
        assert!(AllocationOptions::new(1).validate().is_ok());
        assert!(AllocationOptions::new(1024).with_alignment(0).validate().is_ok());
        assert!(AllocationOptions::new(1024).with_alignment(1).validate().is_ok());
        assert!(AllocationOptions::new(1024).with_alignment(65536).validate().is_ok());
        assert!(AllocationOptions::new(1024)
            .with_flags(AllocationFlags::EXCEED_BUDGET | AllocationFlags::EXISTING_MEMORY_ALLOCATOR)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_non_power_of_two_alignment() {
        for alignment in [3, 6, 100, 257] {
            let result = AllocationOptions::new(1024).with_alignment(alignment).validate();
            assert!(matches!(result, Err(MemoryError::InvalidAlignment(a)) if a == alignment));
        }
    }

    #[test]
    fn test_zero_length() {
        let result = AllocationOptions::new(0).validate();
        assert!(matches!(result, Err(MemoryError::ZeroLengthAllocation)));
    }

    #[test]
    fn test_conflicting_flags() {
        let options = AllocationOptions::new(64).with_flags(
            AllocationFlags::DEDICATED_MEMORY_ALLOCATOR | AllocationFlags::EXISTING_MEMORY_ALLOCATOR,
        );
        assert!(matches!(options.validate(), Err(MemoryError::ConflictingFlags)));
    }

    #[test]
    fn test_undefined_flags() {
        let options = AllocationOptions::new(64).with_flags(AllocationFlags::from_bits_retain(1 << 7));
        assert!(matches!(options.validate(), Err(MemoryError::UndefinedFlags(0x80))));
    }

    #[test]
    fn test_resolved_alignment() {
        assert_eq!(AllocationOptions::new(8).resolved(256).byte_alignment, 256);
        assert_eq!(AllocationOptions::new(8).with_alignment(16).resolved(256).byte_alignment, 16);
    }

    #[test]
    fn test_create_options_debug_hides_callback() {
        let options = AllocatorCreateOptions::dedicated(4096).with_on_free(Arc::new(|_| {}));
        assert!(options.is_dedicated);
        let debug = format!("{options:?}");
        assert!(debug.contains("has_on_free: true"));
    }
}
