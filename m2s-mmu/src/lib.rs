// SPDX-FileCopyrightText: 2025 m2s contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod mmu;

pub use mmu::{Mmu, MmuAccess, MmuPage, SpaceId};
