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

//! Jump labels and the symbolic instructions that refer to them.

use unpyc_bytecode::Opcode;

/// A unique identifier for a jump position, also its index in the unit's label vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub usize);

/// What a label resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JumpLabel {
    pub id: Label,
    /// Index of the instruction the label marks, once committed.
    pub position: Option<usize>,
}

/// One instruction before assembly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instr {
    pub op: Opcode,
    pub arg: u32,
    /// A label id while generating code, the target's instruction index afterwards.
    pub target: Option<usize>,
    pub line: usize,
}

impl Instr {
    pub fn new(op: Opcode, arg: u32, line: usize) -> Self {
        Self {
            op,
            arg,
            target: None,
            line,
        }
    }

    pub fn jumps_on_true(&self) -> bool {
        matches!(self.op, Opcode::PopJumpIfTrue | Opcode::JumpIfTrueOrPop)
    }

    pub fn is_relative_jump(&self) -> bool {
        matches!(
            self.op,
            Opcode::JumpForward | Opcode::ForIter | Opcode::SetupLoop
        )
    }
}
