// SPDX-FileCopyrightText: 2025 m2s contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Guest heap allocator (`malloc`/`free`) on top of an [`AddressSpace`].
//!
//! Requests up to one page are carved out of sub-page holes. Pages for them
//! are taken from the address space upward from the manager's base address,
//! and a page is unmapped again as soon as every chunk in it has been freed.
//! Larger requests get a dedicated run of whole pages, searched downward
//! from just below the base.
//!
//! Chunk records live in one address-ordered map. Holes are additionally
//! indexed by `(size, address)` so a fit search walks them smallest-first.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use m2s_common::{
    align_up, page_tag, Access, GuestAddr, MemoryConfig, MemoryFault, MemoryResult, PAGE_SIZE,
    PAGE_SIZE_U64,
};

use crate::address_space::AddressSpace;

/// Address space shared between a [`Manager`] and the rest of the simulated
/// context that owns it.
///
/// The lock is not reentrant. A guard held across [`Manager::allocate`] or
/// [`Manager::free`] makes the manager panic instead of blocking.
pub type SharedAddressSpace = Arc<Mutex<AddressSpace>>;

/// A contiguous region tracked by the manager: either a pointer handed out
/// by [`Manager::allocate`] or a hole available for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub address: GuestAddr,
    pub size: u32,
    pub allocated: bool,
}

impl Chunk {
    /// One past the last byte, widened so the top page does not overflow.
    #[inline]
    pub fn end(&self) -> u64 {
        self.address as u64 + self.size as u64
    }

    #[inline]
    pub fn contains(&self, addr: GuestAddr) -> bool {
        addr >= self.address && (addr as u64) < self.end()
    }
}

/// Heap allocator for guest code.
///
/// The manager locks its address space only while it maps or unmaps pages.
/// It expects the lock to be free at that point and panics otherwise.
#[derive(Debug)]
pub struct Manager {
    memory: SharedAddressSpace,

    /// Small pages are searched upward from here, large runs end just below.
    base: GuestAddr,

    /// Every chunk, keyed by address. Chunks never overlap.
    chunks: BTreeMap<GuestAddr, Chunk>,

    /// Holes ordered by `(size, address)`.
    holes: BTreeSet<(u32, GuestAddr)>,
}

impl Manager {
    /// Create a manager using the heap base from `config`.
    pub fn new(memory: SharedAddressSpace, config: &MemoryConfig) -> Self {
        Self::with_base(memory, config.manager_base)
    }

    /// Create a manager with an explicit base address.
    ///
    /// # Panics
    ///
    /// If `base` is zero or not page-aligned.
    pub fn with_base(memory: SharedAddressSpace, base: GuestAddr) -> Self {
        assert!(
            base != 0 && base % PAGE_SIZE == 0,
            "manager base {base:#X} must be a non-zero page-aligned address"
        );
        Self {
            memory,
            base,
            chunks: BTreeMap::new(),
            holes: BTreeSet::new(),
        }
    }

    pub fn memory(&self) -> &SharedAddressSpace {
        &self.memory
    }

    pub fn base(&self) -> GuestAddr {
        self.base
    }

    // -- Allocation -----------------------------------------------------------

    /// Allocate `size` bytes aligned to `alignment` and return the address.
    ///
    /// A zero-byte request is treated as a one-byte request so that every
    /// pointer is distinct.
    ///
    /// # Panics
    ///
    /// If `alignment` is not a power of two no larger than the page size.
    pub fn allocate(&mut self, size: u32, alignment: u32) -> MemoryResult<GuestAddr> {
        assert!(
            alignment.is_power_of_two() && alignment <= PAGE_SIZE,
            "allocate: alignment {alignment} must be a power of two <= {PAGE_SIZE}"
        );
        let size = size.max(1);

        if size > PAGE_SIZE {
            return self.allocate_large(size);
        }

        let fit = self
            .holes
            .range((size, 0)..)
            .find(|&&(hole_size, hole_addr)| can_hole_contain(hole_addr, hole_size, size, alignment))
            .map(|&(_, hole_addr)| hole_addr);

        let hole_addr = match fit {
            Some(addr) => addr,
            None => self.new_page()?,
        };

        let address = self.allocate_in_hole(hole_addr, size, alignment);
        log::debug!(
            "Manager::allocate size={:#X} align={} -> {:#010X}",
            size,
            alignment,
            address
        );
        Ok(address)
    }

    /// Release the pointer at `addr`.
    ///
    /// Fails with [`MemoryFault::InvalidFree`] if `addr` is not the start of a
    /// live pointer. The manager's state is left untouched in that case.
    pub fn free(&mut self, addr: GuestAddr) -> MemoryResult<()> {
        let chunk = match self.chunks.get(&addr) {
            Some(chunk) if chunk.allocated => *chunk,
            _ => return Err(MemoryFault::InvalidFree { addr }),
        };
        self.chunks.remove(&addr);

        if chunk.size > PAGE_SIZE {
            self.lock_memory().unmap(chunk.address, chunk.size);
            log::debug!(
                "Manager::free large {:#010X} ({} pages)",
                addr,
                chunk.size / PAGE_SIZE
            );
            return Ok(());
        }

        self.insert_hole(chunk.address, chunk.size);
        let hole = self.merge_holes(chunk.address);

        // A page that is one big hole goes back to the address space.
        if hole.size == PAGE_SIZE {
            self.remove_hole(hole.address);
            self.lock_memory().unmap(hole.address, PAGE_SIZE);
            log::debug!("Manager::free {:#010X}, page {:#010X} reclaimed", addr, hole.address);
        } else {
            log::debug!("Manager::free {:#010X}", addr);
        }
        Ok(())
    }

    /// Whether `addr` falls inside a live pointer.
    pub fn is_valid_address(&self, addr: GuestAddr) -> bool {
        self.chunks
            .range(..=addr)
            .next_back()
            .is_some_and(|(_, chunk)| chunk.allocated && chunk.contains(addr))
    }

    // -- Diagnostics ----------------------------------------------------------

    /// Bytes handed out in live pointers.
    pub fn allocated_bytes(&self) -> u64 {
        self.chunks
            .values()
            .filter(|chunk| chunk.allocated)
            .map(|chunk| chunk.size as u64)
            .sum()
    }

    /// Bytes sitting in holes.
    pub fn free_bytes(&self) -> u64 {
        self.holes.iter().map(|&(size, _)| size as u64).sum()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn hole_count(&self) -> usize {
        self.holes.len()
    }

    /// Every chunk in address order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    // -- Internal helpers -----------------------------------------------------

    fn lock_memory(&self) -> MutexGuard<'_, AddressSpace> {
        self.memory
            .try_lock()
            .unwrap_or_else(|| panic!("Manager: address space is already locked by the caller"))
    }

    fn allocate_large(&mut self, size: u32) -> MemoryResult<GuestAddr> {
        let rounded = align_up(size as u64, PAGE_SIZE_U64);
        let out_of_memory = MemoryFault::OutOfMemory { size: rounded };
        if rounded > u32::MAX as u64 {
            return Err(out_of_memory);
        }
        let rounded = rounded as u32;

        let mut memory = self.lock_memory();
        let address = memory
            .map_space_down(self.base - PAGE_SIZE, rounded)
            .ok_or(out_of_memory)?;
        memory.map(address, rounded, Access::READ_WRITE_EXECUTE);
        drop(memory);

        self.chunks.insert(
            address,
            Chunk {
                address,
                size: rounded,
                allocated: true,
            },
        );
        log::debug!(
            "Manager::allocate large size={:#X} -> {:#010X} ({} pages)",
            size,
            address,
            rounded / PAGE_SIZE
        );
        Ok(address)
    }

    /// Map a fresh page and register it as a single hole.
    fn new_page(&mut self) -> MemoryResult<GuestAddr> {
        let mut memory = self.lock_memory();
        let address = memory
            .map_space(self.base, PAGE_SIZE)
            .ok_or(MemoryFault::OutOfMemory { size: PAGE_SIZE_U64 })?;
        memory.map(address, PAGE_SIZE, Access::READ_WRITE_EXECUTE);
        drop(memory);

        self.insert_hole(address, PAGE_SIZE);
        log::trace!("Manager: new page {:#010X}", address);
        Ok(address)
    }

    /// Carve an aligned pointer out of the hole at `hole_addr`. What is left
    /// before and after it stays as holes.
    fn allocate_in_hole(&mut self, hole_addr: GuestAddr, size: u32, alignment: u32) -> GuestAddr {
        let hole = self.remove_hole(hole_addr);
        let address = align_up(hole.address as u64, alignment as u64) as GuestAddr;
        let gap = address - hole.address;
        let remaining = hole.size - gap - size;

        self.insert_hole(hole.address, gap);
        if remaining > 0 {
            self.insert_hole(address + size, remaining);
        }
        self.chunks.insert(
            address,
            Chunk {
                address,
                size,
                allocated: true,
            },
        );
        address
    }

    /// Merge the hole at `addr` with its free neighbours in the same page and
    /// return the resulting hole.
    fn merge_holes(&mut self, addr: GuestAddr) -> Chunk {
        let mut hole = self.chunks[&addr];
        let page = page_tag(hole.address);

        let next = self
            .chunks
            .range((Excluded(hole.address), Unbounded))
            .next()
            .map(|(_, chunk)| *chunk);
        if let Some(next) = next {
            if !next.allocated && page_tag(next.address) == page && next.address as u64 == hole.end()
            {
                self.remove_hole(hole.address);
                self.remove_hole(next.address);
                hole.size += next.size;
                self.insert_hole(hole.address, hole.size);
            }
        }

        let prev = self
            .chunks
            .range(..hole.address)
            .next_back()
            .map(|(_, chunk)| *chunk);
        if let Some(prev) = prev {
            if !prev.allocated && page_tag(prev.address) == page && prev.end() == hole.address as u64
            {
                self.remove_hole(prev.address);
                self.remove_hole(hole.address);
                hole = Chunk {
                    address: prev.address,
                    size: prev.size + hole.size,
                    allocated: false,
                };
                self.insert_hole(hole.address, hole.size);
            }
        }

        hole
    }

    fn insert_hole(&mut self, address: GuestAddr, size: u32) {
        if size == 0 {
            return;
        }
        self.chunks.insert(
            address,
            Chunk {
                address,
                size,
                allocated: false,
            },
        );
        self.holes.insert((size, address));
    }

    fn remove_hole(&mut self, address: GuestAddr) -> Chunk {
        let chunk = self.chunks.remove(&address);
        match chunk {
            Some(chunk) if !chunk.allocated => {
                self.holes.remove(&(chunk.size, chunk.address));
                chunk
            }
            _ => panic!("remove_hole: no hole at {address:#010X}"),
        }
    }
}

impl std::fmt::Display for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Manager base={:#010X} chunks={} holes={} allocated={:#X} free={:#X}",
            self.base,
            self.chunks.len(),
            self.holes.len(),
            self.allocated_bytes(),
            self.free_bytes()
        )?;
        for chunk in self.chunks.values() {
            writeln!(
                f,
                "  [{:#010X}..{:#010X}) {:#7X} {}",
                chunk.address,
                chunk.end(),
                chunk.size,
                if chunk.allocated { "pointer" } else { "hole" }
            )?;
        }
        Ok(())
    }
}

/// Whether a hole at `hole_addr` of `hole_size` bytes can hold `size` bytes
/// once its base is rounded up to `alignment`.
fn can_hole_contain(hole_addr: GuestAddr, hole_size: u32, size: u32, alignment: u32) -> bool {
    let gap = align_up(hole_addr as u64, alignment as u64) - hole_addr as u64;
    gap + size as u64 <= hole_size as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BASE: GuestAddr = 0xB000_0000;

    fn make_manager() -> Manager {
        let memory = Arc::new(Mutex::new(AddressSpace::with_safe_mode(true)));
        Manager::with_base(memory, BASE)
    }

    /// Chunks tile their pages, never overlap, and no two holes in one page
    /// are adjacent.
    fn check_invariants(manager: &Manager) {
        let chunks: Vec<Chunk> = manager.chunks().copied().collect();
        for pair in chunks.windows(2) {
            assert!(pair[0].end() <= pair[1].address as u64, "overlap: {pair:?}");
            if !pair[0].allocated
                && !pair[1].allocated
                && page_tag(pair[0].address) == page_tag(pair[1].address)
            {
                panic!("unmerged holes: {pair:?}");
            }
        }
        for chunk in &chunks {
            assert!(chunk.size > 0);
            if !chunk.allocated {
                assert!(manager.holes.contains(&(chunk.size, chunk.address)));
            }
        }
        assert_eq!(
            manager.holes.len(),
            chunks.iter().filter(|chunk| !chunk.allocated).count()
        );
    }

    #[test]
    fn test_can_hole_contain() {
        assert!(can_hole_contain(0x1000, 16, 16, 1));
        assert!(!can_hole_contain(0x1001, 16, 16, 8));
        assert!(can_hole_contain(0x1001, 23, 16, 8));
        assert!(!can_hole_contain(0x1000, 8, 16, 1));
    }

    #[test]
    fn test_two_small_allocations() {
        let mut manager = make_manager();
        let p1 = manager.allocate(16, 1).unwrap();
        let p2 = manager.allocate(16, 1).unwrap();

        assert_ne!(p1, p2);
        assert!(p1.abs_diff(p2) >= 16);
        assert_eq!(page_tag(p1), BASE);
        assert!(manager.memory().lock().is_mapped(BASE));
        check_invariants(&manager);
    }

    #[test]
    fn test_freed_hole_is_reused() {
        let mut manager = make_manager();
        let p1 = manager.allocate(16, 1).unwrap();
        let p2 = manager.allocate(16, 1).unwrap();
        manager.free(p1).unwrap();

        let p3 = manager.allocate(16, 1).unwrap();
        assert!(p3 as u64 + 16 <= p2 as u64 || p3 as u64 >= p2 as u64 + 16);
        assert_eq!(p3, p1);
        check_invariants(&manager);
    }

    #[test]
    fn test_page_reclaimed_after_last_free() {
        let mut manager = make_manager();
        let pointers: Vec<GuestAddr> = (0..8).map(|_| manager.allocate(512, 1).unwrap()).collect();
        assert!(pointers.iter().all(|&p| page_tag(p) == BASE));
        assert_eq!(manager.hole_count(), 0);

        // Free out of order so both merge directions are exercised.
        for &p in pointers.iter().rev().step_by(2) {
            manager.free(p).unwrap();
            check_invariants(&manager);
        }
        for &p in pointers.iter().step_by(2) {
            manager.free(p).unwrap();
            check_invariants(&manager);
        }

        assert_eq!(manager.chunk_count(), 0);
        for addr in (BASE..BASE + PAGE_SIZE).step_by(64) {
            assert!(!manager.is_valid_address(addr));
        }

        let memory = manager.memory().lock();
        assert!(!memory.is_mapped(BASE));
        let mut out = [0u8; 1];
        assert!(matches!(
            memory.read(BASE, &mut out),
            Err(MemoryFault::SegmentationFault { .. })
        ));
    }

    #[test]
    fn test_alignment() {
        let mut manager = make_manager();
        manager.allocate(3, 1).unwrap();
        for alignment in [2, 4, 8, 16, 64, 256, 1024, PAGE_SIZE] {
            let p = manager.allocate(5, alignment).unwrap();
            assert_eq!(p % alignment, 0, "alignment {alignment}");
        }
        check_invariants(&manager);
    }

    #[test]
    fn test_alignment_gap_becomes_hole() {
        let mut manager = make_manager();
        let p1 = manager.allocate(1, 1).unwrap();
        let p2 = manager.allocate(8, 64).unwrap();

        assert_eq!(p1, BASE);
        assert_eq!(p2, BASE + 64);
        // [BASE+1, BASE+64) and [BASE+72, page end)
        assert_eq!(manager.hole_count(), 2);
        assert_eq!(manager.free_bytes(), (PAGE_SIZE - 1 - 8) as u64);

        // The gap is reused by a request that fits in it.
        let p3 = manager.allocate(32, 1).unwrap();
        assert_eq!(p3, BASE + 1);
        check_invariants(&manager);
    }

    #[test]
    #[should_panic(expected = "alignment")]
    fn test_alignment_above_page_panics() {
        let mut manager = make_manager();
        let _ = manager.allocate(8, PAGE_SIZE * 2);
    }

    #[test]
    fn test_full_page_allocation() {
        let mut manager = make_manager();
        let p = manager.allocate(PAGE_SIZE, 1).unwrap();
        assert_eq!(p, BASE);
        assert_eq!(manager.hole_count(), 0);

        let q = manager.allocate(1, 1).unwrap();
        assert_eq!(q, BASE + PAGE_SIZE);

        manager.free(p).unwrap();
        assert!(!manager.memory().lock().is_mapped(BASE));
        assert!(manager.memory().lock().is_mapped(BASE + PAGE_SIZE));
    }

    #[test]
    fn test_large_allocation() {
        let mut manager = make_manager();
        let p = manager.allocate(PAGE_SIZE * 2 + 1, 1).unwrap();

        assert_eq!(p, BASE - 3 * PAGE_SIZE);
        assert!(manager.is_valid_address(p));
        assert!(manager.is_valid_address(BASE - 1));
        assert!(!manager.is_valid_address(BASE));
        {
            let mut memory = manager.memory().lock();
            memory.write(p, &[1, 2, 3]).unwrap();
            assert!(memory.is_mapped(BASE - PAGE_SIZE));
        }

        let q = manager.allocate(PAGE_SIZE * 4, 1).unwrap();
        assert_eq!(q, BASE - 7 * PAGE_SIZE);

        manager.free(p).unwrap();
        let memory = manager.memory().lock();
        for page in 0..3 {
            assert!(!memory.is_mapped(p + page * PAGE_SIZE));
        }
        assert!(memory.is_mapped(q));
    }

    #[test]
    fn test_large_allocation_out_of_memory() {
        let memory = Arc::new(Mutex::new(AddressSpace::with_safe_mode(true)));
        let mut manager = Manager::with_base(memory, 4 * PAGE_SIZE);

        // Pages 1..4 are free, page 0 is never used.
        assert!(manager.allocate(PAGE_SIZE * 3, 1).is_ok());
        assert!(matches!(
            manager.allocate(PAGE_SIZE * 2, 1),
            Err(MemoryFault::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_small_pages_skip_foreign_mappings() {
        let mut manager = make_manager();
        manager
            .memory()
            .lock()
            .map(BASE, PAGE_SIZE, Access::READ);

        let p = manager.allocate(8, 1).unwrap();
        assert_eq!(page_tag(p), BASE + PAGE_SIZE);
    }

    #[test]
    fn test_invalid_free() {
        let mut manager = make_manager();
        let p = manager.allocate(32, 1).unwrap();

        assert!(matches!(
            manager.free(p + 1),
            Err(MemoryFault::InvalidFree { .. })
        ));
        assert!(matches!(
            manager.free(0x1234),
            Err(MemoryFault::InvalidFree { addr: 0x1234 })
        ));

        manager.free(p).unwrap();
        assert!(matches!(
            manager.free(p),
            Err(MemoryFault::InvalidFree { .. })
        ));

        // Nothing was corrupted.
        let q = manager.allocate(32, 1).unwrap();
        assert_eq!(q, p);
        check_invariants(&manager);
    }

    #[test]
    fn test_free_hole_address_is_invalid() {
        let mut manager = make_manager();
        let p = manager.allocate(32, 1).unwrap();
        let hole = p + 32;
        assert!(!manager.is_valid_address(hole));
        assert!(matches!(
            manager.free(hole),
            Err(MemoryFault::InvalidFree { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "already locked")]
    fn test_allocate_with_space_locked_panics() {
        let mut manager = make_manager();
        let memory = Arc::clone(manager.memory());
        let _guard = memory.lock();
        let _ = manager.allocate(16, 1);
    }

    #[test]
    fn test_display_lists_chunks() {
        let mut manager = make_manager();
        manager.allocate(16, 1).unwrap();
        let dump = manager.to_string();
        assert!(dump.contains("pointer"));
        assert!(dump.contains("hole"));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Allocate { size: u32, align_shift: u32 },
        Free { index: usize },
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (1u32..=3 * PAGE_SIZE, 0u32..=12)
                .prop_map(|(size, align_shift)| Op::Allocate { size, align_shift }),
            2 => any::<usize>().prop_map(|index| Op::Free { index }),
        ]
    }

    proptest! {
        #[test]
        fn prop_live_pointers_never_overlap(ops in proptest::collection::vec(arb_op(), 1..64)) {
            let mut manager = make_manager();
            let mut live: Vec<(GuestAddr, u32)> = Vec::new();

            for op in ops {
                match op {
                    Op::Allocate { size, align_shift } => {
                        let alignment = 1u32 << align_shift;
                        let p = manager.allocate(size, alignment).unwrap();
                        prop_assert_eq!(p % alignment, 0);
                        live.push((p, size));
                    }
                    Op::Free { index } => {
                        if !live.is_empty() {
                            let (p, _) = live.swap_remove(index % live.len());
                            manager.free(p).unwrap();
                        }
                    }
                }

                let mut sorted = live.clone();
                sorted.sort_unstable();
                for pair in sorted.windows(2) {
                    prop_assert!(pair[0].0 as u64 + pair[0].1 as u64 <= pair[1].0 as u64);
                }
                for &(p, size) in &live {
                    prop_assert!(manager.is_valid_address(p));
                    prop_assert!(manager.is_valid_address(p + size - 1));
                }
                check_invariants(&manager);
            }
        }

        #[test]
        fn prop_allocate_free_restores_free_bytes(
            sizes in proptest::collection::vec(1u32..=PAGE_SIZE, 0..16),
            size in 1u32..=2 * PAGE_SIZE,
            align_shift in 0u32..=12,
        ) {
            let mut manager = make_manager();
            for s in sizes {
                manager.allocate(s, 1).unwrap();
            }
            let before = manager.free_bytes();
            let pages_before = manager.memory().lock().page_count();

            let p = manager.allocate(size, 1 << align_shift).unwrap();
            manager.free(p).unwrap();

            prop_assert_eq!(manager.free_bytes(), before);
            prop_assert_eq!(manager.memory().lock().page_count(), pages_before);
        }
    }
}
