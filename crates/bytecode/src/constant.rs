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

use std::fmt::{Display, Formatter, Write};
use std::sync::Arc;

use itertools::Itertools;

use crate::code::CodeObject;

/// A value from a code object's `co_consts` table.
#[derive(Clone, Debug)]
pub enum Constant {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Constant>),
    Code(Arc<CodeObject>),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::None, Constant::None) | (Constant::Ellipsis, Constant::Ellipsis) => true,
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Int(a), Constant::Int(b)) => a == b,
            // Bitwise, so that 0.0 and -0.0 stay distinct table entries.
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Str(a), Constant::Str(b)) => a == b,
            (Constant::Bytes(a), Constant::Bytes(b)) => a == b,
            (Constant::Tuple(a), Constant::Tuple(b)) => a == b,
            (Constant::Code(a), Constant::Code(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Constant {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<&Arc<CodeObject>> {
        match self {
            Constant::Code(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Constant]> {
        match self {
            Constant::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// True when the literal form starts with a minus sign.
    pub fn is_negative_number(&self) -> bool {
        match self {
            Constant::Int(i) => *i < 0,
            Constant::Float(f) => f.is_sign_negative(),
            _ => false,
        }
    }
}

/// Renders the constant the way `repr()` would, which doubles as valid source text for every
/// kind except code objects.
impl Display for Constant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::None => f.write_str("None"),
            Constant::Ellipsis => f.write_str("Ellipsis"),
            Constant::Bool(true) => f.write_str("True"),
            Constant::Bool(false) => f.write_str("False"),
            Constant::Int(i) => write!(f, "{i}"),
            Constant::Float(v) => f.write_str(&float_repr(*v)),
            Constant::Str(s) => f.write_str(&quote_str(s)),
            Constant::Bytes(b) => f.write_str(&quote_bytes(b)),
            Constant::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            Constant::Tuple(items) => write!(f, "({})", items.iter().join(", ")),
            Constant::Code(code) => write!(
                f,
                "<code object {}, file \"{}\", line {}>",
                code.name, code.filename, code.first_line
            ),
        }
    }
}

pub fn float_repr(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{v:?}")
    }
}

/// Quote a string with the same quote selection `repr()` uses: single quotes unless the text
/// contains a single quote and no double quote.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn quote_bytes(b: &[u8]) -> String {
    let quote = if b.contains(&b'\'') && !b.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    let mut out = String::with_capacity(b.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &c in b {
        match c {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c as char);
            }
            0x20..=0x7e => out.push(c as char),
            c => {
                let _ = write!(out, "\\x{c:02x}");
            }
        }
    }
    out.push(quote as char);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Constant::Str("abc".into()), "'abc'"; "plain string")]
    #[test_case(Constant::Str("it's".into()), "\"it's\""; "switches quotes")]
    #[test_case(Constant::Str("a'b\"c".into()), "'a\\'b\"c'"; "escapes quote")]
    #[test_case(Constant::Str("x\ny".into()), "'x\\ny'"; "newline")]
    #[test_case(Constant::Bytes(vec![0, b'a']), "b'\\x00a'"; "bytes")]
    #[test_case(Constant::Tuple(vec![Constant::Int(1)]), "(1,)"; "singleton tuple")]
    #[test_case(Constant::Tuple(vec![]), "()"; "empty tuple")]
    #[test_case(Constant::Float(1.0), "1.0"; "float keeps point")]
    #[test_case(Constant::Float(f64::INFINITY), "inf"; "infinity")]
    fn repr(constant: Constant, expected: &str) {
        assert_eq!(constant.to_string(), expected);
    }

    #[test]
    fn signed_zero_is_distinct() {
        assert_ne!(Constant::Float(0.0), Constant::Float(-0.0));
        assert_ne!(Constant::Int(1), Constant::Bool(true));
        assert_ne!(Constant::Int(1), Constant::Float(1.0));
    }
}
