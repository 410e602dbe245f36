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

//! Compiles a subset of Python source to code objects laid out the way CPython 3.4 to 3.7 lays
//! them out, down to constant folding and peephole rewrites, so that decompiled text can be
//! checked by compiling it back and comparing instructions.

#[macro_use]
extern crate pest_derive;

mod assemble;
pub mod ast;
mod codegen;
mod error;
mod fold;
mod labels;
mod literal;
pub mod parser;
mod peephole;
mod symtable;

use tracing::trace;
use unpyc_bytecode::{CodeObject, Version};

pub use crate::codegen::FILENAME;
pub use crate::error::CompileError;
pub use crate::parser::parse_module;

/// Which top-level compilation CPython would perform.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum Mode {
    /// A module, as `compile(source, filename, "exec")`.
    #[default]
    Exec,
    /// One interactive statement: expression statements echo their value with `PRINT_EXPR`.
    Single,
}

pub fn compile(source: &str, version: Version, mode: Mode) -> Result<CodeObject, CompileError> {
    let mut module = parse_module(source, version)?;
    // 3.7 folds on the syntax tree; earlier versions only in the peephole pass.
    if version >= Version::V3_7 {
        fold::fold_module(&mut module, version);
    }
    let symbols = symtable::SymbolTable::build(&module)?;
    trace!(%version, statements = module.body.len(), "compiling module");
    codegen::compile_module(&module, &symbols, version, mode)
}
