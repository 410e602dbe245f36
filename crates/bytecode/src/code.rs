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

use std::sync::Arc;

use crate::constant::Constant;

pub const CO_OPTIMIZED: u32 = 0x0001;
pub const CO_NEWLOCALS: u32 = 0x0002;
pub const CO_VARARGS: u32 = 0x0004;
pub const CO_VARKEYWORDS: u32 = 0x0008;
pub const CO_NESTED: u32 = 0x0010;
pub const CO_GENERATOR: u32 = 0x0020;
pub const CO_NOFREE: u32 = 0x0040;

/// An unmarshalled code object: one function, class body, lambda, comprehension or module.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CodeObject {
    pub name: String,
    pub filename: String,
    pub first_line: u32,
    pub argcount: u32,
    pub kwonlyargcount: u32,
    pub flags: u32,
    pub code: Vec<u8>,
    pub consts: Vec<Constant>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    /// Pairs of (bytecode increment, line increment), as in `co_lnotab`.
    pub lnotab: Vec<u8>,
}

impl CodeObject {
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn nlocals(&self) -> usize {
        self.varnames.len()
    }

    /// The name a `*_DEREF` / `LOAD_CLOSURE` argument refers to: cells first, then free
    /// variables.
    pub fn cell_or_free(&self, index: usize) -> Option<&str> {
        if index < self.cellvars.len() {
            Some(&self.cellvars[index])
        } else {
            self.freevars
                .get(index - self.cellvars.len())
                .map(String::as_str)
        }
    }

    pub fn is_free(&self, name: &str) -> bool {
        self.freevars.iter().any(|f| f == name)
    }

    /// Every code object nested directly in this one's constants, in table order.
    pub fn nested(&self) -> impl Iterator<Item = (usize, &Arc<CodeObject>)> {
        self.consts
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_code().map(|code| (i, code)))
    }

    /// Decode `co_lnotab` into (offset, line) pairs, one per offset where a new line starts.
    pub fn line_starts(&self) -> Vec<(u32, u32)> {
        let mut starts = vec![];
        let mut offset = 0u32;
        let mut line = self.first_line as i64;
        let mut last_line = None;
        for pair in self.lnotab.chunks_exact(2) {
            let (byte_incr, line_incr) = (pair[0], pair[1]);
            if byte_incr != 0 {
                if last_line != Some(line) {
                    starts.push((offset, line as u32));
                    last_line = Some(line);
                }
                offset += byte_incr as u32;
            }
            // Signed from 3.6 on.
            line += line_incr as i8 as i64;
        }
        if last_line != Some(line) {
            starts.push((offset, line as u32));
        }
        starts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn line_table_decodes() {
        let code = CodeObject {
            first_line: 1,
            lnotab: vec![4, 1, 6, 2],
            code: vec![0; 14],
            ..Default::default()
        };
        assert_eq!(code.line_starts(), vec![(0, 1), (4, 2), (10, 4)]);
    }

    #[test]
    fn cells_precede_free_variables() {
        let code = CodeObject {
            cellvars: vec!["a".into()],
            freevars: vec!["b".into()],
            ..Default::default()
        };
        assert_eq!(code.cell_or_free(0), Some("a"));
        assert_eq!(code.cell_or_free(1), Some("b"));
        assert_eq!(code.cell_or_free(2), None);
    }
}
