// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Definitions relating to the x86-64 architecture and the fixed platform
//! constants of the user-mode execution harness.

use bitfield_struct::bitfield;

/// Lowest guest virtual address of the `KUSER_SHARED_DATA` page.
pub const KUSD_MIN: u64 = 0xFFFF_F780_0000_0000;

/// Fixed user-mode alias of `KUSER_SHARED_DATA`, mapped into every process.
pub const KUSD_USERMODE: u64 = 0x7FFE_0000;

/// Guest virtual address of the window through which the top-level paging
/// structure is read.
pub const PAGE_MAP_WINDOW: u64 = 0xFFFF_CFE7_F3F9_F000;

/// Guest addresses translate through a non-canonical all-ones sentinel when
/// the harness has already poisoned the pointer; translation fails without
/// diagnostics.
pub const ADDRESS_SENTINEL: u64 = u64::MAX;

#[bitfield(u64, default = false)]
#[derive(PartialEq)]
pub struct RFlags {
    // FLAGS
    pub carry: bool,
    _reserved0: bool,
    pub parity: bool,
    _reserved1: bool,
    pub adjust: bool,
    _reserved2: bool,
    pub zero: bool,
    pub sign: bool,
    pub trap: bool,
    pub interrupt_enable: bool,
    pub direction: bool,
    pub overflow: bool,
    #[bits(2)]
    pub io_privilege_level: u8,
    pub nested_task: bool,
    pub mode: bool,

    // EFLAGS
    pub resume: bool,
    pub virtual_8086_mode: bool,
    pub alignment_check: bool,
    pub virtual_interrupt: bool,
    pub virtual_interrupt_pending: bool,
    pub cpuid_allowed: bool,
    #[bits(10)]
    _reserved3: u16,

    // RFLAGS
    _reserved4: u32,
}

impl Default for RFlags {
    fn default() -> Self {
        Self(2)
    }
}

impl core::ops::BitAnd<RFlags> for RFlags {
    type Output = RFlags;

    fn bitand(self, rhs: RFlags) -> Self::Output {
        RFlags(self.0 & rhs.0)
    }
}
