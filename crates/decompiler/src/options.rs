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

use serde::{Deserialize, Serialize};
use strum::Display;

/// How the code object was compiled: as a module, or as one interactive statement whose
/// expression value is echoed with `PRINT_EXPR`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CompileMode {
    #[default]
    Exec,
    Single,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct DecompileOptions {
    pub mode: CompileMode,
    /// Log the token listing of every code object at debug level.
    pub show_asm: bool,
    /// Log every rule synthesized for a parse session at debug level.
    pub show_grammar: bool,
    /// Log every parse tree at debug level.
    pub show_tree: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            mode: CompileMode::Exec,
            show_asm: false,
            show_grammar: false,
            show_tree: false,
        }
    }
}

impl DecompileOptions {
    pub fn single() -> Self {
        Self {
            mode: CompileMode::Single,
            ..Self::default()
        }
    }
}
