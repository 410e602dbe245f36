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

//! Byte-level instruction layout for both encodings, including `EXTENDED_ARG` prefixes.

use crate::error::BytecodeError;
use crate::opcode::HAVE_ARGUMENT;
use crate::version::Encoding;

/// `EXTENDED_ARG` has the same number in every supported version.
pub const EXTENDED_ARG: u8 = 144;

/// One instruction as laid out in `co_code`. `EXTENDED_ARG` prefixes are reported as
/// instructions of their own; the instruction that follows carries the combined argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawInstruction {
    pub offset: u32,
    pub number: u8,
    pub arg: Option<u32>,
    /// Offset of the instruction that follows this one.
    pub next_offset: u32,
}

pub fn decode(code: &[u8], encoding: Encoding) -> Result<Vec<RawInstruction>, BytecodeError> {
    let mut out = vec![];
    let mut extended: u32 = 0;
    let mut i = 0usize;
    while i < code.len() {
        let offset = i as u32;
        let number = code[i];
        let (arg, next) = match encoding {
            Encoding::Legacy => {
                if number >= HAVE_ARGUMENT {
                    if i + 2 >= code.len() {
                        return Err(BytecodeError::Truncated { offset });
                    }
                    let raw = code[i + 1] as u32 | (code[i + 2] as u32) << 8;
                    (Some(raw | extended), i + 3)
                } else {
                    (None, i + 1)
                }
            }
            Encoding::Wordcode => {
                if i + 1 >= code.len() {
                    return Err(BytecodeError::Truncated { offset });
                }
                let raw = code[i + 1] as u32 | extended;
                ((number >= HAVE_ARGUMENT).then_some(raw), i + 2)
            }
        };
        extended = match (number, arg) {
            (EXTENDED_ARG, Some(arg)) => match encoding {
                Encoding::Legacy => arg << 16,
                Encoding::Wordcode => arg << 8,
            },
            _ => 0,
        };
        out.push(RawInstruction {
            offset,
            number,
            arg,
            next_offset: next as u32,
        });
        i = next;
    }
    Ok(out)
}

/// Size in bytes of an instruction with this argument, prefixes included.
pub fn encoded_size(number: u8, arg: Option<u32>, encoding: Encoding) -> u32 {
    match encoding {
        Encoding::Legacy => match arg {
            _ if number < HAVE_ARGUMENT => 1,
            Some(a) if a > 0xffff => 6,
            _ => 3,
        },
        Encoding::Wordcode => {
            let arg = arg.unwrap_or(0);
            let prefixes = match arg {
                0..=0xff => 0,
                0x100..=0xffff => 1,
                0x1_0000..=0xff_ffff => 2,
                _ => 3,
            };
            2 * (1 + prefixes)
        }
    }
}

/// Size of the instruction proper, without its `EXTENDED_ARG` prefixes.
pub fn unit_size(number: u8, encoding: Encoding) -> u32 {
    match encoding {
        Encoding::Legacy if number < HAVE_ARGUMENT => 1,
        Encoding::Legacy => 3,
        Encoding::Wordcode => 2,
    }
}

pub fn encode_into(out: &mut Vec<u8>, number: u8, arg: Option<u32>, encoding: Encoding) {
    match encoding {
        Encoding::Legacy => {
            if number < HAVE_ARGUMENT {
                out.push(number);
                return;
            }
            let arg = arg.unwrap_or(0);
            if arg > 0xffff {
                let high = arg >> 16;
                out.extend_from_slice(&[EXTENDED_ARG, high as u8, (high >> 8) as u8]);
            }
            out.extend_from_slice(&[number, arg as u8, (arg >> 8) as u8]);
        }
        Encoding::Wordcode => {
            let arg = arg.unwrap_or(0);
            let prefixes = (encoded_size(number, Some(arg), encoding) / 2 - 1) as usize;
            for shift in (1..=prefixes).rev() {
                out.extend_from_slice(&[EXTENDED_ARG, (arg >> (8 * shift)) as u8]);
            }
            out.extend_from_slice(&[number, arg as u8]);
        }
    }
}
