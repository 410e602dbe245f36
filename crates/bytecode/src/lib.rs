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

//! Version-aware model of CPython code objects: opcode tables folded along the version chain,
//! instruction encoding for both the legacy and wordcode layouts, disassembly, and the
//! instruction-level comparison used to verify decompiled output.

mod code;
mod compare;
mod constant;
mod disasm;
pub mod encoding;
mod error;
pub mod opcode;
mod version;

pub use crate::code::{
    CO_GENERATOR, CO_NESTED, CO_NEWLOCALS, CO_NOFREE, CO_OPTIMIZED, CO_VARARGS, CO_VARKEYWORDS,
    CodeObject,
};
pub use crate::compare::{RoundTripMismatch, compare_code};
pub use crate::constant::{Constant, float_repr, quote_bytes, quote_str};
pub use crate::disasm::{ArgValue, Instruction, disassemble};
pub use crate::error::BytecodeError;
pub use crate::opcode::{ArgKind, CompareOp, Opcode, OpcodePatch, OpcodeTable};
pub use crate::version::{Encoding, Version};
