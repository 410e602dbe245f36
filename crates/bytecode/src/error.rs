// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::opcode::Opcode;
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BytecodeError {
    #[error("invalid version string: {0:?}")]
    InvalidVersion(String),
    #[error("unsupported version: {0}")]
    UnsupportedVersion(Version),
    #[error("unknown opcode {opcode} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: u32 },
    #[error("truncated instruction at offset {offset}")]
    Truncated { offset: u32 },
    #[error("{table} index {index} out of range at offset {offset}")]
    IndexOutOfRange {
        table: &'static str,
        index: u32,
        offset: u32,
    },
    #[error("opcode {opcode} does not exist in version {version}")]
    NotInVersion { opcode: Opcode, version: Version },
}
