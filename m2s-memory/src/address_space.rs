// SPDX-FileCopyrightText: 2025 m2s contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sparse, page-lazy guest address space.
//!
//! Covers the full 32-bit guest space with 4 KiB pages that are created on
//! demand and kept in a hash map keyed by page tag. A page's data buffer is
//! allocated only when the page is first written; until then it reads as
//! zeros. Permission checks are enforced only in safe mode.

use std::cell::Cell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use m2s_common::{
    align_up, is_page_aligned, page_offset, page_tag, Access, GuestAddr, MemoryConfig,
    MemoryFault, MemoryResult, GUEST_SPACE_SIZE, PAGE_SIZE, PAGE_SIZE_U64, PAGE_SIZE_USIZE,
};

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// One 4 KiB page of guest memory.
#[derive(Clone)]
pub struct Page {
    tag: GuestAddr,
    permission: Access,
    /// Backing bytes, absent until the first write or buffer request.
    data: Option<Box<[u8]>>,
}

impl Page {
    fn new(tag: GuestAddr, permission: Access) -> Self {
        Self {
            tag,
            permission,
            data: None,
        }
    }

    /// Page-aligned base address.
    #[inline]
    pub fn tag(&self) -> GuestAddr {
        self.tag
    }

    /// Current permission set, including the `MODIFIED` mark.
    #[inline]
    pub fn permission(&self) -> Access {
        self.permission
    }

    /// Whether the page has ever been given a data buffer.
    #[inline]
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Page contents, or `None` if the page still reads as all zeros.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.data
            .get_or_insert_with(|| vec![0u8; PAGE_SIZE_USIZE].into_boxed_slice())
    }

    fn check(&self, safe: bool, addr: GuestAddr, kind: Access) -> MemoryResult<()> {
        if safe && !self.permission.contains(kind) {
            return Err(MemoryFault::PermissionDenied {
                addr,
                required: kind,
                actual: self.permission,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("tag", &format_args!("{:#010X}", self.tag))
            .field("permission", &format_args!("{}", self.permission))
            .field("has_data", &self.has_data())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Mapped-space accounting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct MappedSpace {
    current: u64,
    peak: u64,
}

impl MappedSpace {
    fn page_created(&mut self) {
        self.current += PAGE_SIZE_U64;
        self.peak = self.peak.max(self.current);
    }

    fn page_destroyed(&mut self) {
        self.current -= PAGE_SIZE_U64;
    }
}

// ---------------------------------------------------------------------------
// AddressSpace
// ---------------------------------------------------------------------------

/// A guest virtual address space.
///
/// Not `Clone`: a copy for a new context is made with [`fork`](Self::fork),
/// which takes its safe-mode flag from configuration.
pub struct AddressSpace {
    /// Pages keyed by tag. At most one page per tag.
    pages: HashMap<GuestAddr, Page>,

    /// Fault on missing pages and permission mismatches instead of
    /// synthesizing pages.
    safe: bool,

    /// Current program break of the guest heap.
    heap_break: GuestAddr,

    /// Start address of the most recent read/write/init/execute request.
    last_address: Cell<GuestAddr>,

    mapped: MappedSpace,
}

impl AddressSpace {
    /// Create an empty address space using the safe-mode setting of `config`.
    pub fn new(config: &MemoryConfig) -> Self {
        Self::with_safe_mode(config.safe_mode)
    }

    /// Create an empty address space with an explicit safe-mode flag.
    pub fn with_safe_mode(safe: bool) -> Self {
        Self {
            pages: HashMap::new(),
            safe,
            heap_break: 0,
            last_address: Cell::new(0),
            mapped: MappedSpace::default(),
        }
    }

    /// Deep copy of every page and the heap break for a new context.
    ///
    /// The copy's safe-mode flag comes from `config`, not from `self`. Its
    /// access history starts empty and its peak mapped space starts at the
    /// space it inherits.
    pub fn fork(&self, config: &MemoryConfig) -> Self {
        let current = self.pages.len() as u64 * PAGE_SIZE_U64;
        log::debug!(
            "AddressSpace::fork ({} pages, safe={})",
            self.pages.len(),
            config.safe_mode
        );
        Self {
            pages: self.pages.clone(),
            safe: config.safe_mode,
            heap_break: self.heap_break,
            last_address: Cell::new(0),
            mapped: MappedSpace {
                current,
                peak: current,
            },
        }
    }

    // -- Mode and bookkeeping -------------------------------------------------

    #[inline]
    pub fn safe(&self) -> bool {
        self.safe
    }

    pub fn set_safe(&mut self, safe: bool) {
        self.safe = safe;
    }

    #[inline]
    pub fn heap_break(&self) -> GuestAddr {
        self.heap_break
    }

    pub fn set_heap_break(&mut self, heap_break: GuestAddr) {
        self.heap_break = heap_break;
    }

    /// Raise the heap break to `heap_break` if it is above the current one.
    pub fn grow_heap_break(&mut self, heap_break: GuestAddr) {
        self.heap_break = self.heap_break.max(heap_break);
    }

    /// Start address of the most recent access request.
    pub fn last_address(&self) -> GuestAddr {
        self.last_address.get()
    }

    /// Bytes currently covered by pages.
    pub fn mapped_space(&self) -> u64 {
        self.mapped.current
    }

    /// Highest value `mapped_space` has reached.
    pub fn max_mapped_space(&self) -> u64 {
        self.mapped.peak
    }

    /// Drop every page.
    pub fn clear(&mut self) {
        log::debug!("AddressSpace::clear ({} pages)", self.pages.len());
        self.pages.clear();
        self.mapped.current = 0;
    }

    // -- Page queries ---------------------------------------------------------

    /// The page containing `addr`, if mapped.
    pub fn page(&self, addr: GuestAddr) -> Option<&Page> {
        self.pages.get(&page_tag(addr))
    }

    /// The mapped page with the lowest tag strictly above the page containing
    /// `addr`. Useful to walk consecutive mapped ranges.
    pub fn page_next(&self, addr: GuestAddr) -> Option<&Page> {
        let next_tag = page_tag(addr).checked_add(PAGE_SIZE)?;
        if let Some(page) = self.pages.get(&next_tag) {
            return Some(page);
        }
        self.pages
            .values()
            .filter(|page| page.tag > next_tag)
            .min_by_key(|page| page.tag)
    }

    #[inline]
    pub fn is_mapped(&self, addr: GuestAddr) -> bool {
        self.pages.contains_key(&page_tag(addr))
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// All mapped pages, in no particular order.
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    // -- Mapping operations ---------------------------------------------------

    /// Make sure every page overlapping `[addr, addr + size)` exists and OR
    /// `perm` into its permissions. Neither bound needs to be aligned.
    pub fn map(&mut self, addr: GuestAddr, size: u32, perm: Access) {
        let mut created = 0usize;
        for tag in page_tags(addr, size) {
            let page = match self.pages.entry(tag) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    self.mapped.page_created();
                    created += 1;
                    e.insert(Page::new(tag, perm))
                }
            };
            page.permission |= perm;
        }

        log::debug!(
            "AddressSpace::map [{:#010X}..{:#010X}) perm={} new_pages={}",
            addr,
            addr as u64 + size as u64,
            perm,
            created,
        );
    }

    /// Destroy every page in `[addr, addr + size)`. Pages that were never
    /// mapped are skipped.
    ///
    /// # Panics
    ///
    /// If `addr` or `size` is not page-aligned.
    pub fn unmap(&mut self, addr: GuestAddr, size: u32) {
        assert!(
            is_page_aligned(addr as u64) && is_page_aligned(size as u64),
            "unmap: range [{addr:#X}, +{size:#X}) is not page-aligned"
        );

        for tag in page_tags(addr, size) {
            if self.pages.remove(&tag).is_some() {
                self.mapped.page_destroyed();
            }
        }

        log::debug!(
            "AddressSpace::unmap [{:#010X}..{:#010X})",
            addr,
            addr as u64 + size as u64,
        );
    }

    /// Replace the permissions of every mapped page in `[addr, addr + size)`.
    ///
    /// # Panics
    ///
    /// If `addr` or `size` is not page-aligned.
    pub fn protect(&mut self, addr: GuestAddr, size: u32, perm: Access) {
        assert!(
            is_page_aligned(addr as u64) && is_page_aligned(size as u64),
            "protect: range [{addr:#X}, +{size:#X}) is not page-aligned"
        );

        for tag in page_tags(addr, size) {
            if let Some(page) = self.pages.get_mut(&tag) {
                page.permission = perm;
            }
        }

        log::debug!(
            "AddressSpace::protect [{:#010X}..{:#010X}) perm={}",
            addr,
            addr as u64 + size as u64,
            perm,
        );
    }

    /// Find `size` bytes of unmapped, page-aligned space starting at `addr`
    /// and searching toward higher addresses.
    ///
    /// Returns `None` when the top of the guest space is reached first.
    pub fn map_space(&self, addr: GuestAddr, size: u32) -> Option<GuestAddr> {
        assert_page_range("map_space", addr, size);

        let size = size as u64;
        let mut start = addr as u64;
        let mut end = start;
        loop {
            if end >= GUEST_SPACE_SIZE {
                return None;
            }
            if self.pages.contains_key(&(end as GuestAddr)) {
                end += PAGE_SIZE_U64;
                start = end;
                continue;
            }
            if end - start + PAGE_SIZE_U64 == size {
                return Some(start as GuestAddr);
            }
            end += PAGE_SIZE_U64;
        }
    }

    /// Find `size` bytes of unmapped, page-aligned space whose highest page
    /// is at or below `addr`, searching toward lower addresses.
    ///
    /// Page zero is never handed out; `None` is returned when the search
    /// reaches it.
    pub fn map_space_down(&self, addr: GuestAddr, size: u32) -> Option<GuestAddr> {
        assert_page_range("map_space_down", addr, size);

        let size = size as u64;
        let mut start = addr as u64;
        let mut end = start;
        loop {
            if start == 0 {
                return None;
            }
            if self.pages.contains_key(&(start as GuestAddr)) {
                start -= PAGE_SIZE_U64;
                end = start;
                continue;
            }
            if end - start + PAGE_SIZE_U64 == size {
                return Some(start as GuestAddr);
            }
            start -= PAGE_SIZE_U64;
        }
    }

    /// Move the program break to `new_break`, mapping or unmapping the pages
    /// in between, and return the resulting break.
    ///
    /// A break of zero only queries the current value. Growth fails with
    /// [`MemoryFault::OutOfMemory`] if any page in the way is already mapped.
    pub fn set_program_break(&mut self, new_break: GuestAddr) -> MemoryResult<GuestAddr> {
        let old_break = self.heap_break;
        if new_break == 0 || new_break == old_break {
            return Ok(old_break);
        }

        let new_aligned = align_up(new_break as u64, PAGE_SIZE_U64);
        let old_aligned = align_up(old_break as u64, PAGE_SIZE_U64);

        if new_break > old_break {
            let size = new_aligned - old_aligned;
            if size > 0 {
                let base = old_aligned as GuestAddr;
                if self.map_space(base, size as u32) != Some(base) {
                    return Err(MemoryFault::OutOfMemory { size });
                }
                self.map(base, size as u32, Access::READ_WRITE);
            }
            log::debug!("heap grows {} bytes", new_break - old_break);
        } else {
            let size = old_aligned - new_aligned;
            if size > 0 {
                self.unmap(new_aligned as GuestAddr, size as u32);
            }
            log::debug!("heap shrinks {} bytes", old_break - new_break);
        }

        self.heap_break = new_break;
        Ok(new_break)
    }

    // -- Data access ----------------------------------------------------------

    /// Read `buf.len()` bytes at `addr`.
    pub fn read(&self, addr: GuestAddr, buf: &mut [u8]) -> MemoryResult<()> {
        self.load_bytes(addr, buf, Access::READ)
    }

    /// Fetch `buf.len()` bytes of code at `addr`.
    pub fn execute(&self, addr: GuestAddr, buf: &mut [u8]) -> MemoryResult<()> {
        self.load_bytes(addr, buf, Access::EXECUTE)
    }

    /// Write `data` at `addr`, marking the touched pages as modified.
    pub fn write(&mut self, addr: GuestAddr, data: &[u8]) -> MemoryResult<()> {
        self.store_bytes(addr, data, Access::WRITE)
    }

    /// Initialize memory at `addr` with `data` (program loading). Requires
    /// `INIT` rather than `WRITE` and leaves the modified mark alone.
    pub fn init(&mut self, addr: GuestAddr, data: &[u8]) -> MemoryResult<()> {
        self.store_bytes(addr, data, Access::INIT)
    }

    /// Perform an access of the given kind. `READ` and `EXECUTE` fill `buf`;
    /// `WRITE` and `INIT` copy `buf` into memory.
    ///
    /// # Panics
    ///
    /// If `kind` is not exactly one of those four.
    pub fn access(&mut self, addr: GuestAddr, buf: &mut [u8], kind: Access) -> MemoryResult<()> {
        if kind == Access::READ || kind == Access::EXECUTE {
            self.load_bytes(addr, buf, kind)
        } else if kind == Access::WRITE || kind == Access::INIT {
            self.store_bytes(addr, buf, kind)
        } else {
            panic!("access: invalid access kind {kind}");
        }
    }

    /// Write zeros to `[addr, addr + size)`.
    pub fn zero(&mut self, addr: GuestAddr, size: u32) -> MemoryResult<()> {
        const ZEROS: [u8; PAGE_SIZE_USIZE] = [0; PAGE_SIZE_USIZE];

        let mut remaining = size as usize;
        let mut current = addr;
        while remaining > 0 {
            let chunk = remaining.min(PAGE_SIZE_USIZE - page_offset(current));
            self.store_bytes(current, &ZEROS[..chunk], Access::WRITE)?;
            current = current.wrapping_add(chunk as u32);
            remaining -= chunk;
        }
        Ok(())
    }

    /// Write `s` followed by a NUL terminator.
    pub fn write_string(&mut self, addr: GuestAddr, s: &str) -> MemoryResult<()> {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.write(addr, &bytes)
    }

    /// Read a NUL-terminated string of at most `max_len` bytes. Invalid UTF-8
    /// is replaced rather than rejected.
    pub fn read_string(&self, addr: GuestAddr, max_len: usize) -> MemoryResult<String> {
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        let mut current = addr;
        while bytes.len() < max_len {
            self.read(current, &mut byte)?;
            if byte[0] == 0 {
                break;
            }
            bytes.push(byte[0]);
            current = current.wrapping_add(1);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Copy `size` bytes from `src` to `dest` one page at a time.
    ///
    /// # Panics
    ///
    /// If any argument is not page-aligned, if the ranges overlap, or if a
    /// page in either range is not mapped.
    pub fn copy(&mut self, dest: GuestAddr, src: GuestAddr, size: u32) {
        assert!(
            is_page_aligned(dest as u64) && is_page_aligned(src as u64) && is_page_aligned(size as u64),
            "copy: dest={dest:#X} src={src:#X} size={size:#X} must be page-aligned"
        );
        let (dest64, src64, size64) = (dest as u64, src as u64, size as u64);
        if (src64 < dest64 && src64 + size64 > dest64) || (dest64 < src64 && dest64 + size64 > src64)
        {
            panic!("copy: cannot copy overlapping regions");
        }

        let mut scratch = [0u8; PAGE_SIZE_USIZE];
        for offset in (0..size64).step_by(PAGE_SIZE_USIZE) {
            let src_tag = (src64 + offset) as GuestAddr;
            let dest_tag = (dest64 + offset) as GuestAddr;

            let src_has_data = match self.pages.get(&src_tag) {
                Some(page) => match page.data() {
                    Some(data) => {
                        scratch.copy_from_slice(data);
                        true
                    }
                    None => false,
                },
                None => panic!("copy: source page {src_tag:#X} is not mapped"),
            };

            let Some(dest_page) = self.pages.get_mut(&dest_tag) else {
                panic!("copy: destination page {dest_tag:#X} is not mapped");
            };
            if src_has_data {
                dest_page.data_mut().copy_from_slice(&scratch);
            } else if let Some(data) = dest_page.data.as_mut() {
                data.fill(0);
            }
        }

        log::debug!(
            "AddressSpace::copy {:#010X} -> {:#010X} ({:#X} bytes)",
            src,
            dest,
            size
        );
    }

    /// Direct access to the backing bytes of `[addr, addr + size)`.
    ///
    /// Returns `Ok(None)` when the range crosses a page boundary or the page
    /// is not mapped; callers then fall back to [`read`](Self::read) and
    /// [`write`](Self::write). The page's buffer is allocated if needed.
    pub fn buffer(
        &mut self,
        addr: GuestAddr,
        size: usize,
        kind: Access,
    ) -> MemoryResult<Option<&mut [u8]>> {
        let offset = page_offset(addr);
        if offset + size > PAGE_SIZE_USIZE {
            return Ok(None);
        }

        let safe = self.safe;
        let Some(page) = self.pages.get_mut(&page_tag(addr)) else {
            return Ok(None);
        };
        page.check(safe, addr, kind)?;

        Ok(Some(&mut page.data_mut()[offset..offset + size]))
    }

    // -- Save / load ----------------------------------------------------------

    /// Dump the bytes of `[start, end)` to a flat file. Unmapped pages are
    /// written as zeros.
    pub fn save(&mut self, path: &Path, start: GuestAddr, end: GuestAddr) -> MemoryResult<()> {
        let io_err = |source| MemoryFault::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;

        let safe = std::mem::replace(&mut self.safe, false);
        let result = self.save_range(BufWriter::new(file), start, end);
        self.safe = safe;

        result.map_err(io_err)?;
        log::debug!(
            "AddressSpace::save [{:#010X}..{:#010X}) to {}",
            start,
            end,
            path.display()
        );
        Ok(())
    }

    /// Load the contents of a flat file into memory starting at `start`,
    /// creating pages as needed.
    pub fn load(&mut self, path: &Path, start: GuestAddr) -> MemoryResult<()> {
        let io_err = |source| MemoryFault::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;

        let safe = std::mem::replace(&mut self.safe, false);
        let result = self.load_range(BufReader::new(file), start);
        self.safe = safe;

        let loaded = result.map_err(io_err)?;
        log::debug!(
            "AddressSpace::load {} bytes at {:#010X} from {}",
            loaded,
            start,
            path.display()
        );
        Ok(())
    }

    fn save_range<W: Write>(&self, mut out: W, start: GuestAddr, end: GuestAddr) -> std::io::Result<()> {
        let mut buf = [0u8; PAGE_SIZE_USIZE];
        let mut current = start;
        while current < end {
            let size = PAGE_SIZE.min(end - current) as usize;
            // Unsafe mode: reads never fault.
            if let Err(e) = self.read(current, &mut buf[..size]) {
                return Err(std::io::Error::other(e.to_string()));
            }
            out.write_all(&buf[..size])?;
            current += size as u32;
        }
        out.flush()
    }

    fn load_range<R: Read>(&mut self, mut input: R, start: GuestAddr) -> std::io::Result<u64> {
        let mut buf = [0u8; PAGE_SIZE_USIZE];
        let mut current = start;
        let mut total = 0u64;
        loop {
            let count = input.read(&mut buf)?;
            if count == 0 {
                break;
            }
            if let Err(e) = self.write(current, &buf[..count]) {
                return Err(std::io::Error::other(e.to_string()));
            }
            current = current.wrapping_add(count as u32);
            total += count as u64;
        }
        Ok(total)
    }

    // -- Internal helpers -----------------------------------------------------

    fn load_bytes(&self, addr: GuestAddr, buf: &mut [u8], kind: Access) -> MemoryResult<()> {
        self.last_address.set(addr);

        let mut done = 0;
        let mut current = addr;
        while done < buf.len() {
            let chunk = (buf.len() - done).min(PAGE_SIZE_USIZE - page_offset(current));
            self.load_page(current, &mut buf[done..done + chunk], kind)?;
            done += chunk;
            current = current.wrapping_add(chunk as u32);
        }
        Ok(())
    }

    fn store_bytes(&mut self, addr: GuestAddr, data: &[u8], kind: Access) -> MemoryResult<()> {
        self.last_address.set(addr);

        let mut done = 0;
        let mut current = addr;
        while done < data.len() {
            let chunk = (data.len() - done).min(PAGE_SIZE_USIZE - page_offset(current));
            self.store_page(current, &data[done..done + chunk], kind)?;
            done += chunk;
            current = current.wrapping_add(chunk as u32);
        }
        Ok(())
    }

    /// Read access that stays within the page containing `addr`.
    fn load_page(&self, addr: GuestAddr, buf: &mut [u8], kind: Access) -> MemoryResult<()> {
        let offset = page_offset(addr);
        debug_assert!(offset + buf.len() <= PAGE_SIZE_USIZE);

        let Some(page) = self.pages.get(&page_tag(addr)) else {
            if self.safe {
                return Err(MemoryFault::segfault(addr));
            }
            buf.fill(0);
            return Ok(());
        };
        page.check(self.safe, addr, kind)?;

        match page.data() {
            Some(data) => buf.copy_from_slice(&data[offset..offset + buf.len()]),
            None => buf.fill(0),
        }
        Ok(())
    }

    /// Write access that stays within the page containing `addr`.
    fn store_page(&mut self, addr: GuestAddr, data: &[u8], kind: Access) -> MemoryResult<()> {
        let offset = page_offset(addr);
        debug_assert!(offset + data.len() <= PAGE_SIZE_USIZE);

        let tag = page_tag(addr);
        let safe = self.safe;
        let page = match self.pages.entry(tag) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                if safe {
                    return Err(MemoryFault::segfault(addr));
                }
                log::trace!("AddressSpace: creating page {:#010X} on {:?} access", tag, kind);
                self.mapped.page_created();
                e.insert(Page::new(tag, Access::ALL))
            }
        };
        page.check(safe, addr, kind)?;

        if kind == Access::WRITE {
            page.permission |= Access::MODIFIED;
        }
        page.data_mut()[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pages", &self.pages.len())
            .field("safe", &self.safe)
            .field("heap_break", &format_args!("{:#010X}", self.heap_break))
            .field("mapped_space", &self.mapped.current)
            .finish()
    }
}

/// Tags of every page overlapping `[addr, addr + size)`, clipped to the
/// guest space.
fn page_tags(addr: GuestAddr, size: u32) -> impl Iterator<Item = GuestAddr> {
    let start = page_tag(addr) as u64;
    let end = if size == 0 {
        start
    } else {
        (addr as u64 + size as u64).min(GUEST_SPACE_SIZE)
    };
    (start..end)
        .step_by(PAGE_SIZE_USIZE)
        .map(|tag| tag as GuestAddr)
}

fn assert_page_range(op: &str, addr: GuestAddr, size: u32) {
    assert!(
        is_page_aligned(addr as u64) && is_page_aligned(size as u64) && size > 0,
        "{op}: addr={addr:#X} size={size:#X} must be page-aligned and non-empty"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
