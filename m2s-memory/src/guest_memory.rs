// SPDX-FileCopyrightText: 2025 m2s contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Guest memory access trait for instruction decoders and execution engines.
//!
//! Consumers depend on this trait instead of [`AddressSpace`] so they can be
//! driven by test doubles. Multi-byte values are little-endian.

use byteorder::{ByteOrder, LittleEndian};
use m2s_common::{GuestAddr, MemoryResult};

use crate::address_space::AddressSpace;

pub trait GuestMemory {
    fn read_bytes(&self, addr: GuestAddr, buf: &mut [u8]) -> MemoryResult<()>;
    fn write_bytes(&mut self, addr: GuestAddr, data: &[u8]) -> MemoryResult<()>;
    /// Instruction fetch; checked against `EXECUTE` instead of `READ`.
    fn fetch_bytes(&self, addr: GuestAddr, buf: &mut [u8]) -> MemoryResult<()>;

    fn read_u8(&self, addr: GuestAddr) -> MemoryResult<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&self, addr: GuestAddr) -> MemoryResult<u16> {
        let mut buf = [0u8; 2];
        self.read_bytes(addr, &mut buf)?;
        Ok(LittleEndian::read_u16(&buf))
    }

    fn read_u32(&self, addr: GuestAddr) -> MemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    fn read_u64(&self, addr: GuestAddr) -> MemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    fn fetch_u32(&self, addr: GuestAddr) -> MemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.fetch_bytes(addr, &mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    fn write_u8(&mut self, addr: GuestAddr, val: u8) -> MemoryResult<()> {
        self.write_bytes(addr, &[val])
    }

    fn write_u16(&mut self, addr: GuestAddr, val: u16) -> MemoryResult<()> {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, val);
        self.write_bytes(addr, &buf)
    }

    fn write_u32(&mut self, addr: GuestAddr, val: u32) -> MemoryResult<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, val);
        self.write_bytes(addr, &buf)
    }

    fn write_u64(&mut self, addr: GuestAddr, val: u64) -> MemoryResult<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, val);
        self.write_bytes(addr, &buf)
    }
}

impl GuestMemory for AddressSpace {
    fn read_bytes(&self, addr: GuestAddr, buf: &mut [u8]) -> MemoryResult<()> {
        self.read(addr, buf)
    }

    fn write_bytes(&mut self, addr: GuestAddr, data: &[u8]) -> MemoryResult<()> {
        self.write(addr, data)
    }

    fn fetch_bytes(&self, addr: GuestAddr, buf: &mut [u8]) -> MemoryResult<()> {
        self.execute(addr, buf)
    }
}
