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

use unpyc_bytecode::BytecodeError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("Failure to parse string @ line {line}: {message}")]
    StringLexError { line: usize, message: String },
    #[error("Failure to parse program @ {line}/{column}: {message}")]
    ParseError {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("Unsupported construct @ line {line}: {construct}")]
    Unsupported { line: usize, construct: String },
    #[error("Invalid l-value for assignment @ line {line}")]
    InvalidAssignment { line: usize },
    #[error("{message} @ line {line}")]
    Scope { line: usize, message: String },
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

impl CompileError {
    pub(crate) fn unsupported(line: usize, construct: impl Into<String>) -> Self {
        CompileError::Unsupported {
            line,
            construct: construct.into(),
        }
    }

    pub(crate) fn scope(line: usize, message: impl Into<String>) -> Self {
        CompileError::Scope {
            line,
            message: message.into(),
        }
    }
}
