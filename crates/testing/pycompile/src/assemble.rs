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

//! Lay instructions out as `co_code` and build the line number table.

use unpyc_bytecode::encoding::{encode_into, encoded_size};
use unpyc_bytecode::opcode::HAVE_ARGUMENT;
use unpyc_bytecode::{BytecodeError, OpcodeTable, Version};

use crate::error::CompileError;
use crate::labels::Instr;

/// The code bytes and `co_lnotab` of one code object.
pub struct Assembled {
    pub code: Vec<u8>,
    pub lnotab: Vec<u8>,
}

pub fn assemble(ops: &[Instr], first_line: usize, version: Version) -> Result<Assembled, CompileError> {
    let table = OpcodeTable::for_version(version)?;
    let encoding = version.encoding();
    let numbers = ops
        .iter()
        .map(|i| {
            table.number(i.op).ok_or(BytecodeError::NotInVersion {
                opcode: i.op,
                version,
            })
        })
        .collect::<Result<Vec<u8>, _>>()?;

    // Jump arguments depend on offsets, and offsets on argument sizes: iterate to a fixpoint.
    let mut args: Vec<u32> = ops.iter().map(|i| i.arg).collect();
    let mut offsets = vec![0u32; ops.len() + 1];
    loop {
        for (i, number) in numbers.iter().enumerate() {
            offsets[i + 1] = offsets[i] + encoded_size(*number, Some(args[i]), encoding);
        }
        let mut changed = false;
        for (i, instr) in ops.iter().enumerate() {
            let Some(target) = instr.target else {
                continue;
            };
            let target_offset = offsets[target.min(ops.len())];
            let arg = if instr.is_relative_jump() {
                target_offset.saturating_sub(offsets[i + 1])
            } else {
                target_offset
            };
            if arg != args[i] {
                args[i] = arg;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut code = Vec::with_capacity(offsets[ops.len()] as usize);
    for (number, arg) in numbers.iter().zip(&args) {
        let arg = (*number >= HAVE_ARGUMENT).then_some(*arg);
        encode_into(&mut code, *number, arg, encoding);
    }

    Ok(Assembled {
        code,
        lnotab: line_table(ops, &offsets, first_line, version),
    })
}

/// `co_lnotab`: (offset increment, line increment) pairs at each change of line. Line increments
/// are signed from 3.6 on; earlier versions only ever record lines moving forward.
fn line_table(ops: &[Instr], offsets: &[u32], first_line: usize, version: Version) -> Vec<u8> {
    let mut lnotab = vec![];
    let mut last_line = first_line as i64;
    let mut last_offset = 0u32;
    for (instr, offset) in ops.iter().zip(offsets) {
        let line = instr.line as i64;
        let forward_only = version < Version::V3_6;
        if line == last_line || (forward_only && line < last_line) {
            continue;
        }
        let mut d_offset = offset - last_offset;
        let mut d_line = line - last_line;
        while d_offset > 255 {
            lnotab.extend_from_slice(&[255, 0]);
            d_offset -= 255;
        }
        while d_line > 127 {
            lnotab.extend_from_slice(&[d_offset as u8, 127]);
            d_offset = 0;
            d_line -= 127;
        }
        while d_line < -128 {
            lnotab.extend_from_slice(&[d_offset as u8, -128i8 as u8]);
            d_offset = 0;
            d_line += 128;
        }
        lnotab.extend_from_slice(&[d_offset as u8, d_line as i8 as u8]);
        last_line = line;
        last_offset = *offset;
    }
    lnotab
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use unpyc_bytecode::Opcode;

    fn jump(op: Opcode, target: usize, line: usize) -> Instr {
        Instr {
            target: Some(target),
            ..Instr::new(op, 0, line)
        }
    }

    #[test]
    fn wordcode_jumps_resolve() {
        let ops = vec![
            Instr::new(Opcode::LoadName, 0, 1),
            jump(Opcode::PopJumpIfFalse, 3, 1),
            Instr::new(Opcode::LoadName, 1, 2),
            Instr::new(Opcode::ReturnValue, 0, 2),
        ];
        let assembled = assemble(&ops, 1, Version::V3_6).unwrap();
        assert_eq!(assembled.code, vec![101, 0, 114, 6, 101, 1, 83, 0]);
        assert_eq!(assembled.lnotab, vec![4, 1]);
    }

    #[test]
    fn legacy_relative_jump_counts_from_the_next_instruction() {
        let ops = vec![
            jump(Opcode::JumpForward, 2, 1),
            Instr::new(Opcode::PopTop, 0, 1),
            Instr::new(Opcode::ReturnValue, 0, 1),
        ];
        let assembled = assemble(&ops, 1, Version::V3_4).unwrap();
        assert_eq!(assembled.code, vec![110, 1, 0, 1, 83]);
    }

    #[test]
    fn large_line_gaps_are_split() {
        let ops = vec![
            Instr::new(Opcode::LoadName, 0, 1),
            Instr::new(Opcode::PopTop, 0, 300),
        ];
        let assembled = assemble(&ops, 1, Version::V3_7).unwrap();
        assert_eq!(assembled.lnotab, vec![2, 127, 0, 127, 0, 45]);
    }

    #[test]
    fn missing_opcode_is_reported() {
        let ops = vec![Instr::new(Opcode::LoadMethod, 0, 1)];
        assert!(matches!(
            assemble(&ops, 1, Version::V3_6),
            Err(CompileError::Bytecode(BytecodeError::NotInVersion { .. }))
        ));
    }
}
