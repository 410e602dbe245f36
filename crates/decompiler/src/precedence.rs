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

/// Python operator precedence for unparsing.
/// Higher numbers = higher precedence (more tightly binding)
use crate::ast::{BinaryOp, Expr, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Precedence {
    Lambda = 1,   // lambda (lowest precedence)
    IfExp = 2,    // x if c else y
    Or = 3,       // or
    And = 4,      // and
    Not = 5,      // not x
    Compare = 6,  // < <= == != > >= in is
    BitOr = 7,    // |
    BitXor = 8,   // ^
    BitAnd = 9,   // &
    Shift = 10,   // << >>
    Arith = 11,   // + -
    Term = 12,    // * @ / // %
    Factor = 13,  // +x -x ~x
    Power = 14,   // **
    Primary = 15, // atoms, attribute access, subscripts, calls
}

impl Precedence {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

pub fn binary_precedence(op: BinaryOp) -> Precedence {
    match op {
        BinaryOp::BitOr => Precedence::BitOr,
        BinaryOp::BitXor => Precedence::BitXor,
        BinaryOp::BitAnd => Precedence::BitAnd,
        BinaryOp::LShift | BinaryOp::RShift => Precedence::Shift,
        BinaryOp::Add | BinaryOp::Sub => Precedence::Arith,
        BinaryOp::Mul
        | BinaryOp::MatMul
        | BinaryOp::TrueDiv
        | BinaryOp::FloorDiv
        | BinaryOp::Mod => Precedence::Term,
        BinaryOp::Pow => Precedence::Power,
    }
}

/// Get the precedence for an expression
pub fn get_precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Lambda { .. } => Precedence::Lambda.as_u8(),
        Expr::IfExp { .. } => Precedence::IfExp.as_u8(),
        Expr::Or(_, _) => Precedence::Or.as_u8(),
        Expr::And(_, _) => Precedence::And.as_u8(),
        Expr::Unary(UnaryOp::Not, _) => Precedence::Not.as_u8(),
        Expr::Compare(..) => Precedence::Compare.as_u8(),
        Expr::Binary(op, _, _) => binary_precedence(*op).as_u8(),
        Expr::Unary(_, _) => Precedence::Factor.as_u8(),
        // A negative literal reads as a unary minus.
        Expr::Constant(c) if c.is_negative_number() => Precedence::Factor.as_u8(),
        Expr::Name(_)
        | Expr::Constant(_)
        | Expr::Attribute(..)
        | Expr::Subscript(..)
        | Expr::Slice(..)
        | Expr::Call { .. }
        | Expr::Tuple(_)
        | Expr::List(_)
        | Expr::Set(_)
        | Expr::Dict(_)
        | Expr::ListComp { .. }
        | Expr::JoinedStr(_)
        | Expr::FormattedValue { .. } => Precedence::Primary.as_u8(),
    }
}
