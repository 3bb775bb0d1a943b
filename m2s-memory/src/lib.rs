// SPDX-FileCopyrightText: 2025 m2s contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod address_space;
pub mod guest_memory;
pub mod manager;

pub use address_space::{AddressSpace, Page};
pub use guest_memory::GuestMemory;
pub use manager::{Chunk, Manager, SharedAddressSpace};
