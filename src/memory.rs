// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Guest-to-host address translation for emulated memory references.

/// Supplies synthetic host backing for well-known guest globals (e.g.
/// exported kernel data that has no natural host mapping). Consulted before
/// the general virtual-to-host map.
pub trait DataProvider {
    /// Returns the host virtual address backing `gva`, if this provider
    /// synthesizes it.
    fn find_data(&mut self, gva: u64) -> Option<usize>;
}

/// Host environment hook for pointer diagnostics.
pub trait Environment {
    /// Called with a guest address that resolved to no known mapping, before
    /// the access is failed back to the caller.
    fn check_ptr(&mut self, gva: u64);
}

/// A contiguous guest-virtual range translated to host-visible backing.
#[derive(Debug, Clone, Copy)]
struct Mapping {
    guest_base: u64,
    len: u64,
    host_base: usize,
}

/// First-match map from guest virtual ranges to host virtual addresses.
///
/// Ranges must not overlap; lookups resolve to the first registered range
/// containing the address.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    mappings: Vec<Mapping>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a contiguous translation of `len` bytes from `guest_base`
    /// onto `host_base`.
    ///
    /// The host range is dereferenced by later emulation calls; validity is
    /// part of those calls' safety contract.
    pub fn add_mapping(&mut self, guest_base: u64, len: u64, host_base: usize) {
        self.mappings.push(Mapping {
            guest_base,
            len,
            host_base,
        });
    }

    /// Translates a guest address to the host address within a registered
    /// range, if any.
    pub fn get_host(&self, gva: u64) -> Option<usize> {
        self.mappings.iter().find_map(|m| {
            let offset = gva.checked_sub(m.guest_base)?;
            (offset < m.len).then(|| m.host_base + offset as usize)
        })
    }
}

/// Reads a little-endian value of `len` bytes (1, 2, 4, or 8) from a
/// translated host address.
///
/// # Safety
///
/// `hva` must be valid for reads of `len` bytes.
pub(crate) unsafe fn load_le(hva: usize, len: usize) -> u64 {
    debug_assert!(matches!(len, 1 | 2 | 4 | 8));
    let mut buf = [0u8; 8];
    // SAFETY: the caller guarantees `hva` is readable for `len` bytes.
    unsafe { std::ptr::copy_nonoverlapping(hva as *const u8, buf.as_mut_ptr(), len) };
    u64::from_le_bytes(buf)
}

/// Stores the low `len` bytes (1, 2, 4, or 8) of `value` little-endian to a
/// translated host address.
///
/// # Safety
///
/// `hva` must be valid for writes of `len` bytes.
pub(crate) unsafe fn store_le(hva: usize, len: usize, value: u64) {
    debug_assert!(matches!(len, 1 | 2 | 4 | 8));
    // SAFETY: the caller guarantees `hva` is writable for `len` bytes.
    unsafe { std::ptr::copy_nonoverlapping(value.to_le_bytes().as_ptr(), hva as *mut u8, len) };
}
