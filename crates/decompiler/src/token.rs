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

use std::fmt::{Display, Formatter};

use unpyc_bytecode::{ArgValue, Constant, Opcode};

use crate::scanner::OpVariant;

/// Kinds the parser treats as unconditional transfers when checking jump containment.
pub const JUMP_FORWARD: &str = "JUMP_FORWARD";
pub const JUMP_BACK: &str = "JUMP_BACK";
/// A forward jump to where control would fall through anyway: the end of an `if` without an
/// `else` before 3.6.
pub const JUMP_FORWARD_NEXT: &str = "JUMP_FORWARD_NEXT";
pub const COME_FROM: &str = "COME_FROM";

/// One grammar terminal produced by the scanner.
///
/// `kind` is what the grammar sees: usually the opcode name, but relabeled for constants
/// (`LOAD_STR`, `LOAD_CODE`, ...), backward jumps (`JUMP_BACK`), jump targets (`COME_FROM`)
/// and arity-bearing opcodes (`CALL_FUNCTION_2`, `BUILD_MAP_0`, ...).
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: String,
    /// The instruction this token came from; `None` for synthetic tokens.
    pub opcode: Option<Opcode>,
    pub number: Option<u8>,
    pub arg: Option<u32>,
    pub value: ArgValue,
    pub repr: String,
    /// Byte offset as text; synthetic `COME_FROM`s are `"<target>_<n>"`.
    pub offset: String,
    pub byte_offset: u32,
    pub line: Option<u32>,
    pub is_jump_target: bool,
    pub synthetic: bool,
    /// Token index of the jump target, for jumps.
    pub target: Option<usize>,
    pub variant: Option<OpVariant>,
}

impl Token {
    pub fn come_from(target_offset: u32, n: usize, source_offset: u32) -> Self {
        Token {
            kind: COME_FROM.to_string(),
            opcode: None,
            number: None,
            arg: None,
            value: ArgValue::Jump(source_offset),
            repr: format!("from {source_offset}"),
            offset: format!("{target_offset}_{n}"),
            byte_offset: target_offset,
            line: None,
            is_jump_target: false,
            synthetic: true,
            target: None,
            variant: None,
        }
    }

    pub fn is_unconditional_jump(&self) -> bool {
        matches!(self.kind.as_str(), JUMP_FORWARD | JUMP_BACK | JUMP_FORWARD_NEXT)
    }

    /// The name for name-carrying instructions (`LOAD_NAME`, `STORE_FAST`, `LOAD_DEREF`, ...).
    pub fn name(&self) -> Option<&str> {
        match &self.value {
            ArgValue::Name(n) | ArgValue::Local(n) | ArgValue::Free(n) => Some(n),
            _ => None,
        }
    }

    pub fn constant(&self) -> Option<&Constant> {
        match &self.value {
            ArgValue::Const(c) => Some(c),
            _ => None,
        }
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let marker = if self.is_jump_target { ">>" } else { "  " };
        write!(f, "{marker} {:>8} {:<28}", self.offset, self.kind)?;
        if let Some(arg) = self.arg {
            write!(f, " {arg:>5}")?;
        }
        if !self.repr.is_empty() {
            write!(f, " ({})", self.repr)?;
        }
        if let Some(target) = self.target {
            write!(f, " -> #{target}")?;
        }
        Ok(())
    }
}
