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

use unpyc_bytecode::{BytecodeError, Version};

use crate::grammar::GrammarError;

/// Where in the nesting of code objects a failure happened: the dotted path of code object
/// names from the module down (`<module>.f.<lambda>`) plus the first line of the innermost one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeLocation {
    pub path: String,
    pub first_line: u32,
}

impl CodeLocation {
    pub fn root(name: &str, first_line: u32) -> Self {
        Self {
            path: name.to_string(),
            first_line,
        }
    }

    pub fn nested(&self, name: &str, first_line: u32) -> Self {
        Self {
            path: format!("{}.{name}", self.path),
            first_line,
        }
    }
}

impl Display for CodeLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (line {})", self.path, self.first_line)
    }
}

/// The parser ran out of ways to continue.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unexpected {found} at token {position}{}; expected one of: {}", offset_suffix(.offset), .expected.join(", "))]
pub struct ParseError {
    /// Index of the offending token, or the token count when input ended early.
    pub position: usize,
    /// Kind of the offending token, or `end of input`.
    pub found: String,
    /// Byte offset (or `COME_FROM` offset label) of the offending token.
    pub offset: Option<String>,
    /// Terminals that would have been accepted at `position`, sorted.
    pub expected: Vec<String>,
}

fn offset_suffix(offset: &Option<String>) -> String {
    match offset {
        Some(offset) => format!(" (offset {offset})"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecompileError {
    #[error("{location}: unsupported opcode {opcode} at offset {offset}")]
    UnsupportedOpcode {
        location: CodeLocation,
        opcode: String,
        offset: u32,
    },
    #[error("{location}: unsupported use of {opcode} (argument {arg}) at offset {offset}")]
    UnsupportedVariant {
        location: CodeLocation,
        opcode: String,
        arg: u32,
        offset: u32,
    },
    #[error("{location}: {source}")]
    Bytecode {
        location: CodeLocation,
        source: BytecodeError,
    },
    #[error("{location}: {kind} already synthesized as {existing}, cannot also be {new}")]
    SynthesisCollision {
        location: CodeLocation,
        kind: String,
        existing: String,
        new: String,
    },
    #[error("{location}: parse error: {error}")]
    Parse {
        location: CodeLocation,
        error: ParseError,
    },
    #[error("{location}: cannot rebuild {symbol}: {message}")]
    Build {
        location: CodeLocation,
        symbol: String,
        message: String,
    },
    #[error("grammar error: {0}")]
    Grammar(#[from] GrammarError),
    #[error("no dialect for version {0}")]
    UnsupportedVersion(Version),
}

impl DecompileError {
    /// The code object the failure belongs to, when it belongs to one.
    pub fn location(&self) -> Option<&CodeLocation> {
        match self {
            DecompileError::UnsupportedOpcode { location, .. }
            | DecompileError::UnsupportedVariant { location, .. }
            | DecompileError::Bytecode { location, .. }
            | DecompileError::SynthesisCollision { location, .. }
            | DecompileError::Parse { location, .. }
            | DecompileError::Build { location, .. } => Some(location),
            DecompileError::Grammar(_) | DecompileError::UnsupportedVersion(_) => None,
        }
    }
}
