// SPDX-FileCopyrightText: 2025 m2s contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod error;
pub mod settings;
pub mod types;

pub use error::{MemoryFault, MemoryResult};
pub use settings::MemoryConfig;
pub use types::*;
