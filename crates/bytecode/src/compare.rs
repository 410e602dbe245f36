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

//! Instruction-level equivalence of two code objects, ignoring line-number metadata.

use tracing::trace;

use crate::code::CodeObject;
use crate::constant::Constant;
use crate::disasm::{ArgValue, Instruction, disassemble};
use crate::opcode::OpcodeTable;
use crate::version::Version;

/// The first point at which a recompiled code object diverges from the original.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("mismatch in {location} at instruction {index}: {reason}")]
pub struct RoundTripMismatch {
    /// Dotted path of the code object, e.g. `<module>.f.<lambda>`.
    pub location: String,
    pub index: usize,
    pub reason: String,
    /// Listing of the original code object.
    pub expected: Vec<String>,
    /// Listing of the recompiled code object.
    pub actual: Vec<String>,
}

fn listing(instrs: &[Instruction]) -> Vec<String> {
    instrs.iter().map(|i| i.to_string()).collect()
}

/// Compare two code objects instruction by instruction. Opcode name and number, argument,
/// resolved value and display form, offset and jump-target flag must agree; line numbers are
/// ignored. Code object constants are compared by recursing into them, never by their display
/// form.
pub fn compare_code(
    original: &CodeObject,
    recompiled: &CodeObject,
    version: Version,
    table: &OpcodeTable,
) -> Result<(), RoundTripMismatch> {
    compare_at(&original.name, original, recompiled, version, table)
}

fn compare_at(
    location: &str,
    original: &CodeObject,
    recompiled: &CodeObject,
    version: Version,
    table: &OpcodeTable,
) -> Result<(), RoundTripMismatch> {
    let mismatch = |index: usize, reason: String, expected: Vec<String>, actual: Vec<String>| {
        RoundTripMismatch {
            location: location.to_string(),
            index,
            reason,
            expected,
            actual,
        }
    };
    let left = disassemble(original, version, table).map_err(|e| {
        mismatch(
            0,
            format!("original does not disassemble: {e}"),
            vec![],
            vec![],
        )
    })?;
    let right = disassemble(recompiled, version, table).map_err(|e| {
        mismatch(
            0,
            format!("recompiled does not disassemble: {e}"),
            listing(&left),
            vec![],
        )
    })?;

    trace!(location, instructions = left.len(), "comparing code objects");
    for (index, (a, b)) in left.iter().zip(right.iter()).enumerate() {
        let fail = |reason: String| mismatch(index, reason, listing(&left), listing(&right));
        if a.opcode != b.opcode || a.number != b.number {
            return Err(fail(format!("opcode {} != {}", a.name(), b.name())));
        }
        if a.arg != b.arg {
            return Err(fail(format!("argument {:?} != {:?}", a.arg, b.arg)));
        }
        if a.offset != b.offset {
            return Err(fail(format!("offset {} != {}", a.offset, b.offset)));
        }
        if a.is_jump_target != b.is_jump_target {
            return Err(fail("jump target flag differs".to_string()));
        }
        match (&a.argval, &b.argval) {
            (ArgValue::Const(Constant::Code(x)), ArgValue::Const(Constant::Code(y))) => {
                let nested = format!("{location}.{}", x.name);
                if x.name != y.name {
                    return Err(fail(format!("code object {} != {}", x.name, y.name)));
                }
                compare_at(&nested, x, y, version, table)?;
            }
            (x, y) if x != y => {
                return Err(fail(format!("value {} != {}", a.argrepr, b.argrepr)));
            }
            _ => {
                if a.argrepr != b.argrepr {
                    return Err(fail(format!("display {} != {}", a.argrepr, b.argrepr)));
                }
            }
        }
    }
    if left.len() != right.len() {
        let index = left.len().min(right.len());
        return Err(mismatch(
            index,
            format!("{} instructions != {}", left.len(), right.len()),
            listing(&left),
            listing(&right),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::encoding::encode_into;
    use crate::opcode::Opcode;

    fn code(name: &str, consts: Vec<Constant>, ops: &[(Opcode, Option<u32>)]) -> CodeObject {
        let table = OpcodeTable::for_version(Version::V3_6).unwrap();
        let mut bytes = vec![];
        for (op, arg) in ops {
            encode_into(&mut bytes, table.number(*op).unwrap(), *arg, Version::V3_6.encoding());
        }
        CodeObject {
            name: name.into(),
            consts,
            code: bytes,
            ..Default::default()
        }
    }

    fn ret_const(name: &str, c: Constant) -> CodeObject {
        code(
            name,
            vec![c],
            &[(Opcode::LoadConst, Some(0)), (Opcode::ReturnValue, None)],
        )
    }

    #[test]
    fn equal_ignoring_lines() {
        let table = OpcodeTable::for_version(Version::V3_6).unwrap();
        let a = ret_const("<module>", Constant::None);
        let mut b = a.clone();
        b.first_line = 10;
        b.lnotab = vec![2, 3];
        assert!(compare_code(&a, &b, Version::V3_6, &table).is_ok());
    }

    #[test]
    fn nested_difference_is_located() {
        let table = OpcodeTable::for_version(Version::V3_6).unwrap();
        let outer = |inner: CodeObject| {
            code(
                "<module>",
                vec![Constant::Code(Arc::new(inner))],
                &[(Opcode::LoadConst, Some(0)), (Opcode::ReturnValue, None)],
            )
        };
        let mut f1 = ret_const("f", Constant::Int(1));
        f1.first_line = 1;
        let mut f2 = ret_const("f", Constant::Int(2));
        f2.first_line = 7;
        let err = compare_code(&outer(f1.clone()), &outer(f2), Version::V3_6, &table).unwrap_err();
        assert_eq!(err.location, "<module>.f");
        assert_eq!(err.index, 0);

        let mut f3 = f1.clone();
        f3.first_line = 42;
        assert!(compare_code(&outer(f1), &outer(f3), Version::V3_6, &table).is_ok());
    }

    #[test]
    fn length_difference() {
        let table = OpcodeTable::for_version(Version::V3_6).unwrap();
        let a = ret_const("<module>", Constant::None);
        let b = code(
            "<module>",
            vec![Constant::None],
            &[
                (Opcode::LoadConst, Some(0)),
                (Opcode::PopTop, None),
                (Opcode::LoadConst, Some(0)),
                (Opcode::ReturnValue, None),
            ],
        );
        let err = compare_code(&a, &b, Version::V3_6, &table).unwrap_err();
        assert_eq!(err.index, 1);
    }
}
