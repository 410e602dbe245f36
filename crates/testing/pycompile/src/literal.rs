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

//! Decoding of string literal bodies once the grammar has split off prefix and quotes.

use crate::error::CompileError;

/// A string literal's value by prefix: text, bytes, or an f-string body left for the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Bytes(Vec<u8>),
    Formatted { body: String, raw: bool },
}

pub fn decode_literal(prefix: &str, body: &str, line: usize) -> Result<Literal, CompileError> {
    let prefix = prefix.to_ascii_lowercase();
    let raw = prefix.contains('r');
    if prefix.contains('f') {
        return Ok(Literal::Formatted {
            body: body.to_string(),
            raw,
        });
    }
    if prefix.contains('b') {
        let values = if raw {
            body.chars().map(|c| c as u32).collect()
        } else {
            decode_escapes(body, true, line)?
        };
        return values
            .into_iter()
            .map(|v| u8::try_from(v).ok().filter(|_| v < 0x80 || !raw))
            .collect::<Option<Vec<u8>>>()
            .map(Literal::Bytes)
            .ok_or_else(|| CompileError::StringLexError {
                line,
                message: "bytes can only contain ASCII literal characters".to_string(),
            });
    }
    if raw {
        return Ok(Literal::Str(body.to_string()));
    }
    unescape_str(body, line).map(Literal::Str)
}

/// Decode the backslash escapes of a non-raw string body.
pub fn unescape_str(body: &str, line: usize) -> Result<String, CompileError> {
    decode_escapes(body, false, line)?
        .into_iter()
        .map(|v| {
            char::from_u32(v).ok_or_else(|| CompileError::StringLexError {
                line,
                message: format!("invalid code point {v:#x}"),
            })
        })
        .collect()
}

/// Code points (or byte values) of a string body. In bytes, literal characters must be ASCII
/// and `\u`, `\U` and `\N` are not escapes.
fn decode_escapes(body: &str, bytes: bool, line: usize) -> Result<Vec<u32>, CompileError> {
    let lex_error = |message: String| CompileError::StringLexError { line, message };
    let mut out = vec![];
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            if bytes && !c.is_ascii() {
                return Err(lex_error(
                    "bytes can only contain ASCII literal characters".to_string(),
                ));
            }
            out.push(c as u32);
            continue;
        }
        let Some(escape) = chars.next() else {
            out.push('\\' as u32);
            break;
        };
        match escape {
            '\n' => {}
            '\\' | '\'' | '"' => out.push(escape as u32),
            'a' => out.push(0x07),
            'b' => out.push(0x08),
            'f' => out.push(0x0c),
            'n' => out.push(0x0a),
            'r' => out.push(0x0d),
            't' => out.push(0x09),
            'v' => out.push(0x0b),
            '0'..='7' => {
                let mut value = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(value);
            }
            'x' | 'u' | 'U' if escape == 'x' || !bytes => {
                let width = match escape {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                let value = (digits.len() == width)
                    .then(|| u32::from_str_radix(&digits, 16).ok())
                    .flatten()
                    .ok_or_else(|| lex_error(format!("truncated \\{escape} escape")))?;
                out.push(value);
            }
            'N' if !bytes => {
                return Err(CompileError::unsupported(line, "\\N{...} escape"));
            }
            other => {
                out.push('\\' as u32);
                out.push(other as u32);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;

    #[test_case("", r"a\nb", "a\nb")]
    #[test_case("", "it's", "it's")]
    #[test_case("", r"\x41\101é", "AAé")]
    #[test_case("", r"\q", "\\q")]
    #[test_case("r", r"\n", "\\n")]
    #[test_case("U", "x", "x")]
    #[test_case("", "a\\\nb", "ab")]
    #[test_case("", r"a\'b", "a'b")]
    fn test_strings(prefix: &str, body: &str, expected: &str) {
        assert_eq!(
            decode_literal(prefix, body, 1),
            Ok(Literal::Str(expected.to_string()))
        );
    }

    #[test]
    fn test_bytes() {
        assert_eq!(
            decode_literal("b", r"\x00a\xff", 1),
            Ok(Literal::Bytes(vec![0, b'a', 0xff]))
        );
        assert_eq!(
            decode_literal("Rb", r"\x", 1),
            Ok(Literal::Bytes(b"\\x".to_vec()))
        );
        assert_eq!(
            decode_literal("b", "é", 4),
            Err(CompileError::StringLexError {
                line: 4,
                message: "bytes can only contain ASCII literal characters".to_string()
            })
        );
    }

    #[test]
    fn test_fstring_body_is_kept() {
        assert_eq!(
            decode_literal("rf", r"{x!r:>{w}}\n", 1),
            Ok(Literal::Formatted {
                body: r"{x!r:>{w}}\n".to_string(),
                raw: true
            })
        );
    }

    #[test]
    fn test_escape_errors() {
        assert!(matches!(
            unescape_str(r"\x4", 2),
            Err(CompileError::StringLexError { line: 2, .. })
        ));
        assert!(matches!(
            unescape_str(r"\N{DASH}", 2),
            Err(CompileError::Unsupported { line: 2, .. })
        ));
    }
}
