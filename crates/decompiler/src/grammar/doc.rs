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

//! The textual rule format used by dialect deltas.
//!
//! One production per line, `lhs ::= sym sym ...`. An empty right-hand side is an epsilon
//! production. `#` starts a comment that runs to the end of the line.

use crate::grammar::{GrammarError, RuleSignature, is_terminal_name};

pub fn parse_doc(doc: &str) -> Result<Vec<RuleSignature>, GrammarError> {
    let mut rules = vec![];
    for (n, raw) in doc.lines().enumerate() {
        let line = match raw.find('#') {
            Some(i) => &raw[..i],
            None => raw,
        }
        .trim();
        if line.is_empty() {
            continue;
        }
        let malformed = |message: &str| GrammarError::Malformed {
            line: n + 1,
            text: raw.trim().to_string(),
            message: message.to_string(),
        };
        let Some((lhs, rhs)) = line.split_once("::=") else {
            return Err(malformed("missing '::='"));
        };
        let lhs = lhs.trim();
        if lhs.is_empty() || lhs.split_whitespace().count() != 1 {
            return Err(malformed("left-hand side must be a single symbol"));
        }
        if is_terminal_name(lhs) {
            return Err(malformed("left-hand side must be a nonterminal"));
        }
        let rhs = rhs.split_whitespace().map(str::to_string).collect();
        rules.push(RuleSignature::new(lhs, rhs));
    }
    Ok(rules)
}
