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

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use crate::code::CodeObject;
use crate::constant::Constant;
use crate::encoding::{RawInstruction, decode, unit_size};
use crate::error::BytecodeError;
use crate::opcode::{ArgKind, CompareOp, Opcode, OpcodeTable};
use crate::version::Version;

/// The resolved meaning of an instruction's argument.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgValue {
    None,
    Const(Constant),
    Name(String),
    Local(String),
    Free(String),
    Compare(CompareOp),
    /// Absolute byte offset of the jump target.
    Jump(u32),
    Raw(u32),
}

/// One disassembled instruction, in the shape `dis.get_instructions` reports.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub number: u8,
    pub arg: Option<u32>,
    pub argval: ArgValue,
    pub argrepr: String,
    pub offset: u32,
    pub starts_line: Option<u32>,
    pub is_jump_target: bool,
}

impl Instruction {
    pub fn jump_target(&self) -> Option<u32> {
        match self.argval {
            ArgValue::Jump(target) => Some(target),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.opcode.name()
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let marker = if self.is_jump_target { ">>" } else { "  " };
        write!(f, "{marker} {:>4} {:<28}", self.offset, self.name())?;
        if let Some(arg) = self.arg {
            write!(f, " {arg:>5}")?;
            if !self.argrepr.is_empty() {
                write!(f, " ({})", self.argrepr)?;
            }
        }
        Ok(())
    }
}

fn index<'a, T>(
    table: &'a [T],
    name: &'static str,
    arg: u32,
    offset: u32,
) -> Result<&'a T, BytecodeError> {
    table
        .get(arg as usize)
        .ok_or(BytecodeError::IndexOutOfRange {
            table: name,
            index: arg,
            offset,
        })
}

fn resolve(
    code: &CodeObject,
    opcode: Opcode,
    raw: &RawInstruction,
    version: Version,
) -> Result<(ArgValue, String), BytecodeError> {
    let Some(arg) = raw.arg else {
        return Ok((ArgValue::None, String::new()));
    };
    let offset = raw.offset;
    let resolved = match opcode.arg_kind() {
        ArgKind::None => (ArgValue::None, String::new()),
        ArgKind::Const => {
            let c = index(&code.consts, "consts", arg, offset)?;
            (ArgValue::Const(c.clone()), c.to_string())
        }
        ArgKind::Name => {
            let n = index(&code.names, "names", arg, offset)?;
            (ArgValue::Name(n.clone()), n.clone())
        }
        ArgKind::Local => {
            let n = index(&code.varnames, "varnames", arg, offset)?;
            (ArgValue::Local(n.clone()), n.clone())
        }
        ArgKind::Free => {
            let n = code
                .cell_or_free(arg as usize)
                .ok_or(BytecodeError::IndexOutOfRange {
                    table: "cell and free vars",
                    index: arg,
                    offset,
                })?;
            (ArgValue::Free(n.to_string()), n.to_string())
        }
        ArgKind::Compare => match CompareOp::from_arg(arg) {
            Some(op) => (ArgValue::Compare(op), op.to_string()),
            None => (ArgValue::Raw(arg), String::new()),
        },
        ArgKind::JumpRelative => {
            let target = offset + unit_size(raw.number, version.encoding()) + arg;
            (ArgValue::Jump(target), format!("to {target}"))
        }
        ArgKind::JumpAbsolute => (ArgValue::Jump(arg), String::new()),
        ArgKind::Raw => (ArgValue::Raw(arg), String::new()),
    };
    Ok(resolved)
}

/// Disassemble a single code object (not its nested ones) against `table`.
pub fn disassemble(
    code: &CodeObject,
    version: Version,
    table: &OpcodeTable,
) -> Result<Vec<Instruction>, BytecodeError> {
    let raw = decode(&code.code, version.encoding())?;
    let line_starts = code.line_starts();
    let mut out = Vec::with_capacity(raw.len());
    for r in &raw {
        let opcode = table.opcode(r.number).ok_or(BytecodeError::UnknownOpcode {
            opcode: r.number,
            offset: r.offset,
        })?;
        let (argval, argrepr) = resolve(code, opcode, r, version)?;
        let starts_line = line_starts
            .iter()
            .find(|(o, _)| *o == r.offset)
            .map(|(_, line)| *line);
        out.push(Instruction {
            opcode,
            number: r.number,
            arg: r.arg,
            argval,
            argrepr,
            offset: r.offset,
            starts_line,
            is_jump_target: false,
        });
    }
    let targets: BTreeSet<u32> = out.iter().filter_map(Instruction::jump_target).collect();
    for i in out.iter_mut() {
        i.is_jump_target = targets.contains(&i.offset);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode_into;
    use pretty_assertions::assert_eq;

    fn assemble(version: Version, ops: &[(Opcode, Option<u32>)]) -> Vec<u8> {
        let table = OpcodeTable::for_version(version).unwrap();
        let mut bytes = vec![];
        for (op, arg) in ops {
            encode_into(&mut bytes, table.number(*op).unwrap(), *arg, version.encoding());
        }
        bytes
    }

    #[test]
    fn resolves_arguments_and_targets() {
        let version = Version::V3_6;
        let code = CodeObject {
            name: "<module>".into(),
            first_line: 1,
            consts: vec![Constant::Int(1), Constant::None],
            names: vec!["x".into()],
            code: assemble(
                version,
                &[
                    (Opcode::LoadName, Some(0)),
                    (Opcode::PopJumpIfFalse, Some(8)),
                    (Opcode::LoadConst, Some(0)),
                    (Opcode::StoreName, Some(0)),
                    (Opcode::LoadConst, Some(1)),
                    (Opcode::ReturnValue, None),
                ],
            ),
            lnotab: vec![8, 1],
            ..Default::default()
        };
        let table = OpcodeTable::for_version(version).unwrap();
        let instrs = disassemble(&code, version, &table).unwrap();
        assert_eq!(instrs.len(), 6);
        assert_eq!(instrs[0].argval, ArgValue::Name("x".into()));
        assert_eq!(instrs[1].jump_target(), Some(8));
        assert!(instrs[4].is_jump_target);
        assert_eq!(instrs[2].argrepr, "1");
        assert_eq!(instrs[0].starts_line, Some(1));
        assert_eq!(instrs[4].starts_line, Some(2));
    }

    #[test]
    fn relative_jumps_in_legacy_encoding() {
        let version = Version::V3_4;
        let code = CodeObject {
            code: assemble(
                version,
                &[
                    (Opcode::JumpForward, Some(1)),
                    (Opcode::PopTop, None),
                    (Opcode::ReturnValue, None),
                ],
            ),
            ..Default::default()
        };
        let table = OpcodeTable::for_version(version).unwrap();
        let instrs = disassemble(&code, version, &table).unwrap();
        assert_eq!(instrs[0].argval, ArgValue::Jump(4));
        assert_eq!(instrs[0].argrepr, "to 4");
        assert!(instrs[2].is_jump_target);
    }

    #[test]
    fn unknown_opcode_fails() {
        let version = Version::V3_5;
        let table = OpcodeTable::for_version(version).unwrap();
        let code = CodeObject {
            code: vec![54],
            ..Default::default()
        };
        assert_eq!(
            disassemble(&code, version, &table),
            Err(BytecodeError::UnknownOpcode {
                opcode: 54,
                offset: 0
            })
        );
    }
}
