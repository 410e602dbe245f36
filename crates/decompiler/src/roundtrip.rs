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

//! Verification that decompiled text compiles back to the same instructions.

use std::fmt::Display;

use tracing::{debug, warn};
use unpyc_bytecode::{CodeObject, RoundTripMismatch, Version, compare_code};

use crate::engine::Decompiler;
use crate::error::DecompileError;
use crate::options::DecompileOptions;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoundTripError {
    #[error(transparent)]
    Decompile(#[from] DecompileError),
    #[error("decompiled text does not compile: {message}")]
    Recompile { message: String, text: String },
    #[error("{mismatch}")]
    Mismatch {
        mismatch: RoundTripMismatch,
        text: String,
    },
}

impl RoundTripError {
    /// The decompiled text, when decompiling got that far.
    pub fn source_text(&self) -> Option<&str> {
        match self {
            RoundTripError::Decompile(_) => None,
            RoundTripError::Recompile { text, .. } | RoundTripError::Mismatch { text, .. } => {
                Some(text)
            }
        }
    }
}

/// Decompile `code`, compile the text back with `recompile` and compare the two instruction
/// streams, nested code objects included and line numbers ignored. Returns the text on a match.
pub fn verify_round_trip<F, E>(
    code: &CodeObject,
    version: Version,
    options: &DecompileOptions,
    recompile: F,
) -> Result<String, RoundTripError>
where
    F: FnOnce(&str) -> Result<CodeObject, E>,
    E: Display,
{
    let decompiler = Decompiler::new(version, options.clone())?;
    let text = decompiler.decompile(code)?;
    let recompiled = match recompile(&text) {
        Ok(recompiled) => recompiled,
        Err(e) => {
            return Err(RoundTripError::Recompile {
                message: e.to_string(),
                text,
            });
        }
    };
    if let Err(mismatch) = compare_code(code, &recompiled, version, &decompiler.dialect().opcodes)
    {
        warn!(%version, location = %mismatch.location, index = mismatch.index, "round trip mismatch");
        return Err(RoundTripError::Mismatch {
            mismatch,
            text,
        });
    }
    debug!(%version, "round trip verified");
    Ok(text)
}
