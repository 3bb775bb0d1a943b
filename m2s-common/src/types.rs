// SPDX-FileCopyrightText: 2025 m2s contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use bitflags::bitflags;

/// Virtual address in a simulated guest (32-bit).
pub type GuestAddr = u32;

/// Address in the shared simulated physical space.
///
/// Wider than [`GuestAddr`] so that many virtual spaces can be packed into it
/// without ever wrapping.
pub type PhysAddr = u64;

/// Page shift (log2 of PAGE_SIZE).
pub const LOG_PAGE_SIZE: u32 = 12;

/// Page size (4 KiB).
pub const PAGE_SIZE: u32 = 1 << LOG_PAGE_SIZE;

/// Page size as usize for buffer math.
pub const PAGE_SIZE_USIZE: usize = PAGE_SIZE as usize;

/// Page size as u64 for address math that must not overflow.
pub const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

/// Mask selecting the offset within a page.
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;

/// Size of the 32-bit guest address space in bytes.
pub const GUEST_SPACE_SIZE: u64 = 1 << 32;

/// Page-aligned base of the page containing `addr`.
#[inline]
pub const fn page_tag(addr: GuestAddr) -> GuestAddr {
    addr & !PAGE_MASK
}

/// Offset of `addr` within its page.
#[inline]
pub const fn page_offset(addr: GuestAddr) -> usize {
    (addr & PAGE_MASK) as usize
}

/// Align a value up to the given power-of-two alignment.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

/// Align a value down to the given power-of-two alignment.
#[inline]
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

/// Check if a value is page-aligned.
#[inline]
pub const fn is_page_aligned(value: u64) -> bool {
    value & (PAGE_SIZE_U64 - 1) == 0
}

bitflags! {
    /// Page permissions and access kinds.
    ///
    /// The same set is used to grant rights to a page (OR) and to describe
    /// the kind of a request (tested with `contains`). `MODIFIED` is never
    /// requested; it is set on a page by the first write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Access: u32 {
        const READ     = 1;
        const WRITE    = 2;
        const EXECUTE  = 4;
        const INIT     = 8;
        const MODIFIED = 16;

        const READ_WRITE         = Self::READ.bits() | Self::WRITE.bits();
        const READ_EXECUTE       = Self::READ.bits() | Self::EXECUTE.bits();
        const READ_WRITE_EXECUTE = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
        /// Everything a page synthesized in unsafe mode is given.
        const ALL                = Self::READ_WRITE_EXECUTE.bits() | Self::INIT.bits();
        const NONE               = 0;
    }
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = if self.contains(Self::READ) { 'r' } else { '-' };
        let w = if self.contains(Self::WRITE) { 'w' } else { '-' };
        let x = if self.contains(Self::EXECUTE) { 'x' } else { '-' };
        let i = if self.contains(Self::INIT) { 'i' } else { '-' };
        let m = if self.contains(Self::MODIFIED) { 'm' } else { '-' };
        write!(f, "{r}{w}{x}{i}{m}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, PAGE_SIZE_U64), 0);
        assert_eq!(align_up(1, PAGE_SIZE_U64), PAGE_SIZE_U64);
        assert_eq!(align_up(PAGE_SIZE_U64, PAGE_SIZE_U64), PAGE_SIZE_U64);
        assert_eq!(align_up(0xFFFF_FFFF, PAGE_SIZE_U64), GUEST_SPACE_SIZE);
        assert_eq!(align_up(13, 8), 16);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(0, PAGE_SIZE_U64), 0);
        assert_eq!(align_down(1, PAGE_SIZE_U64), 0);
        assert_eq!(
            align_down(PAGE_SIZE_U64 + 1, PAGE_SIZE_U64),
            PAGE_SIZE_U64
        );
    }

    #[test]
    fn test_page_tag_and_offset() {
        assert_eq!(page_tag(0x1234_5678), 0x1234_5000);
        assert_eq!(page_offset(0x1234_5678), 0x678);
        assert_eq!(page_tag(0xFFFF_FFFF), 0xFFFF_F000);
    }

    #[test]
    fn test_is_page_aligned() {
        assert!(is_page_aligned(0));
        assert!(is_page_aligned(PAGE_SIZE_U64 * 100));
        assert!(!is_page_aligned(PAGE_SIZE_U64 + 1));
    }

    #[test]
    fn test_access_algebra() {
        let granted = Access::READ | Access::WRITE;
        assert!(granted.contains(Access::READ));
        assert!(!granted.contains(Access::EXECUTE));
        assert!(Access::ALL.contains(Access::INIT));
        assert!(!Access::ALL.contains(Access::MODIFIED));
        assert_eq!(Access::READ.bits(), 1);
        assert_eq!(Access::MODIFIED.bits(), 16);
    }

    #[test]
    fn test_access_display() {
        assert_eq!(Access::READ_WRITE.to_string(), "rw---");
        assert_eq!((Access::ALL | Access::MODIFIED).to_string(), "rwxim");
        assert_eq!(Access::NONE.to_string(), "-----");
    }
}
