// SPDX-FileCopyrightText: 2025 m2s contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Virtual-to-physical address registry.
//!
//! Several independent virtual address spaces (one per simulated context)
//! share one simulated physical space. A physical page is handed out the
//! first time a virtual page is translated and keeps its tag for the whole
//! lifetime of the [`Mmu`]. Nothing is ever reclaimed, so memory use grows
//! with the number of distinct pages touched across all spaces.
//!
//! The MMU only tracks the correspondence between addresses; data lives in
//! the callers' own stores.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use m2s_common::{
    page_offset, page_tag, GuestAddr, MemoryConfig, MemoryFault, MemoryResult, PhysAddr,
    PAGE_SIZE_U64,
};

// ---------------------------------------------------------------------------
// Handles and records
// ---------------------------------------------------------------------------

/// Source of per-instance ids so handles can be checked against their owner.
static NEXT_MMU_ID: AtomicU32 = AtomicU32::new(0);

/// Handle to a virtual space registered with an [`Mmu`].
///
/// Only valid with the MMU that created it; any other MMU panics on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceId {
    mmu: u32,
    index: usize,
}

impl SpaceId {
    #[inline]
    pub fn index(self) -> usize {
        self.index
    }
}

/// Kind of access counted by [`Mmu::access_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuAccess {
    Read,
    Write,
    Execute,
}

/// A named virtual address space.
#[derive(Debug)]
struct Space {
    name: String,
    /// Virtual tag -> index into `Mmu::pages`.
    pages: HashMap<GuestAddr, usize>,
}

/// One virtual-to-physical page correspondence.
#[derive(Debug, Clone)]
pub struct MmuPage {
    pub space: SpaceId,
    pub virtual_tag: GuestAddr,
    pub physical_tag: PhysAddr,
    pub num_read_accesses: u64,
    pub num_write_accesses: u64,
    pub num_execute_accesses: u64,
}

impl MmuPage {
    pub fn num_accesses(&self) -> u64 {
        self.num_read_accesses + self.num_write_accesses + self.num_execute_accesses
    }
}

// ---------------------------------------------------------------------------
// Mmu
// ---------------------------------------------------------------------------

/// Memory-management unit shared by all simulated contexts.
#[derive(Debug)]
pub struct Mmu {
    /// Stamped into every [`SpaceId`] this MMU hands out.
    id: u32,

    spaces: Vec<Space>,

    /// Every page ever assigned, in assignment order.
    pages: Vec<MmuPage>,

    /// Physical tag -> index into `pages`.
    physical_pages: HashMap<PhysAddr, usize>,

    /// Tag of the next physical page to hand out.
    top_physical_address: PhysAddr,

    /// Where [`dump_report`](Self::dump_report) writes to.
    report_path: Option<PathBuf>,
}

impl Default for Mmu {
    fn default() -> Self {
        Self {
            id: NEXT_MMU_ID.fetch_add(1, Ordering::Relaxed),
            spaces: Vec::new(),
            pages: Vec::new(),
            physical_pages: HashMap::new(),
            top_physical_address: 0,
            report_path: None,
        }
    }
}

impl Mmu {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            report_path: config.mmu_report.clone(),
            ..Self::default()
        }
    }

    /// Register a new, empty virtual space.
    pub fn new_space(&mut self, name: impl Into<String>) -> SpaceId {
        let id = SpaceId {
            mmu: self.id,
            index: self.spaces.len(),
        };
        let name = name.into();
        log::debug!("Mmu: new space {} '{}'", id.index, name);
        self.spaces.push(Space {
            name,
            pages: HashMap::new(),
        });
        id
    }

    /// Name given to `space` at creation.
    pub fn space_name(&self, space: SpaceId) -> &str {
        &self.space(space).name
    }

    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }

    /// Number of physical pages assigned so far.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn top_physical_address(&self) -> PhysAddr {
        self.top_physical_address
    }

    /// Physical address backing `virtual_address` in `space`, assigning a
    /// fresh physical page on the first touch of its virtual page.
    ///
    /// # Panics
    ///
    /// If `space` was not created by this MMU.
    pub fn translate_virtual_address(
        &mut self,
        space: SpaceId,
        virtual_address: GuestAddr,
    ) -> PhysAddr {
        let tag = page_tag(virtual_address);
        let offset = page_offset(virtual_address) as PhysAddr;

        if let Some(&index) = self.space(space).pages.get(&tag) {
            return self.pages[index].physical_tag + offset;
        }

        let physical_tag = self.top_physical_address;
        self.top_physical_address += PAGE_SIZE_U64;

        let index = self.pages.len();
        self.pages.push(MmuPage {
            space,
            virtual_tag: tag,
            physical_tag,
            num_read_accesses: 0,
            num_write_accesses: 0,
            num_execute_accesses: 0,
        });
        self.physical_pages.insert(physical_tag, index);
        self.spaces[space.index].pages.insert(tag, index);

        log::trace!(
            "Mmu: space '{}' page {:#010X} -> physical {:#X}",
            self.spaces[space.index].name,
            tag,
            physical_tag
        );
        physical_tag + offset
    }

    /// Space and virtual address that `physical_address` was assigned to,
    /// or `None` if no translation ever produced it.
    pub fn translate_physical_address(
        &self,
        physical_address: PhysAddr,
    ) -> Option<(SpaceId, GuestAddr)> {
        let page = self.page(physical_address)?;
        let offset = (physical_address - page.physical_tag) as GuestAddr;
        Some((page.space, page.virtual_tag + offset))
    }

    pub fn is_valid_physical_address(&self, physical_address: PhysAddr) -> bool {
        self.physical_pages
            .contains_key(&physical_page_tag(physical_address))
    }

    /// Page record for the physical page containing `physical_address`.
    pub fn page(&self, physical_address: PhysAddr) -> Option<&MmuPage> {
        self.physical_pages
            .get(&physical_page_tag(physical_address))
            .map(|&index| &self.pages[index])
    }

    /// All assigned pages in the order they were assigned.
    pub fn pages(&self) -> impl Iterator<Item = &MmuPage> {
        self.pages.iter()
    }

    /// Count one access of `kind` to the physical page containing
    /// `physical_address`.
    pub fn access_page(&mut self, physical_address: PhysAddr, kind: MmuAccess) -> MemoryResult<()> {
        let index = *self
            .physical_pages
            .get(&physical_page_tag(physical_address))
            .ok_or(MemoryFault::SegmentationFault {
                addr: physical_address,
            })?;

        let page = &mut self.pages[index];
        match kind {
            MmuAccess::Read => page.num_read_accesses += 1,
            MmuAccess::Write => page.num_write_accesses += 1,
            MmuAccess::Execute => page.num_execute_accesses += 1,
        }
        Ok(())
    }

    // -- Report ---------------------------------------------------------------

    /// Write a per-page access report.
    pub fn write_report<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let reads: u64 = self.pages.iter().map(|p| p.num_read_accesses).sum();
        let writes: u64 = self.pages.iter().map(|p| p.num_write_accesses).sum();
        let executes: u64 = self.pages.iter().map(|p| p.num_execute_accesses).sum();

        writeln!(out, "[ MMU ]")?;
        writeln!(out, "Spaces = {}", self.spaces.len())?;
        writeln!(out, "Pages = {}", self.pages.len())?;
        writeln!(out, "MemoryUsed = {}", self.top_physical_address)?;
        writeln!(out, "Accesses = {}", reads + writes + executes)?;
        writeln!(out, "Reads = {reads}")?;
        writeln!(out, "Writes = {writes}")?;
        writeln!(out, "Executes = {executes}")?;
        writeln!(out)?;

        writeln!(
            out,
            "{:<16} {:<12} {:<12} {:>12} {:>12} {:>12} {:>12}",
            "Space", "Virtual", "Physical", "Accesses", "Reads", "Writes", "Executes"
        )?;

        let mut pages: Vec<&MmuPage> = self.pages.iter().collect();
        pages.sort_by(|a, b| {
            b.num_accesses()
                .cmp(&a.num_accesses())
                .then(a.physical_tag.cmp(&b.physical_tag))
        });
        for page in pages {
            writeln!(
                out,
                "{:<16} {:<#12x} {:<#12x} {:>12} {:>12} {:>12} {:>12}",
                self.spaces[page.space.index].name,
                page.virtual_tag,
                page.physical_tag,
                page.num_accesses(),
                page.num_read_accesses,
                page.num_write_accesses,
                page.num_execute_accesses
            )?;
        }
        Ok(())
    }

    /// Write the report to the file configured with `MmuReport`.
    ///
    /// Returns `Ok(false)` when no report file is configured.
    pub fn dump_report(&self) -> MemoryResult<bool> {
        let Some(path) = &self.report_path else {
            return Ok(false);
        };
        let io_err = |source| MemoryFault::Io {
            path: path.clone(),
            source,
        };

        let file = File::create(path).map_err(io_err)?;
        let mut out = BufWriter::new(file);
        self.write_report(&mut out).map_err(io_err)?;
        out.flush().map_err(io_err)?;

        log::info!("MMU report written to {}", path.display());
        Ok(true)
    }

    fn space(&self, space: SpaceId) -> &Space {
        if space.mmu != self.id {
            panic!(
                "Mmu: unknown space {} (created by another MMU)",
                space.index
            );
        }
        self.spaces
            .get(space.index)
            .unwrap_or_else(|| panic!("Mmu: unknown space {}", space.index))
    }
}

#[inline]
fn physical_page_tag(physical_address: PhysAddr) -> PhysAddr {
    physical_address & !(PAGE_SIZE_U64 - 1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
