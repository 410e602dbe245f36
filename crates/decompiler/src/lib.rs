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

//! A grammar-driven decompiler for CPython 3.4 to 3.7 bytecode.
//!
//! A code object is scanned into grammar tokens, the grammar of its version is extended with
//! rules sized to the arities the scan met, an Earley parser derives the token stream, and the
//! parse tree is lowered to a syntax tree and printed as source.

pub mod ast;
mod builder;
pub mod dialect;
mod engine;
mod error;
pub mod grammar;
mod options;
pub mod parser;
mod precedence;
mod roundtrip;
pub mod scanner;
mod token;
pub mod unparse;

pub use crate::builder::Lowered;
pub use crate::dialect::{Dialect, Feature, dialect_for};
pub use crate::engine::{Decompiler, decompile, start_symbol};
pub use crate::error::{CodeLocation, DecompileError, ParseError};
pub use crate::options::{CompileMode, DecompileOptions};
pub use crate::roundtrip::{RoundTripError, verify_round_trip};
pub use crate::token::Token;
pub use crate::unparse::unparse;
pub use unpyc_bytecode::{CodeObject, Version};
