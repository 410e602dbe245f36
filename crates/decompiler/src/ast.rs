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

//! The Python syntax tree the builder lowers parse trees into and the unparser renders.

use std::fmt::Display;

use unpyc_bytecode::{CompareOp, Constant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Pow,
    Mul,
    MatMul,
    Mod,
    Add,
    Sub,
    FloorDiv,
    TrueDiv,
    LShift,
    RShift,
    BitAnd,
    BitXor,
    BitOr,
}

impl BinaryOp {
    /// The operator of a `BINARY_*` or `INPLACE_*` token kind.
    pub fn from_kind(kind: &str) -> Option<Self> {
        let op = kind
            .strip_prefix("BINARY_")
            .or_else(|| kind.strip_prefix("INPLACE_"))?;
        Some(match op {
            "POWER" => Self::Pow,
            "MULTIPLY" => Self::Mul,
            "MATRIX_MULTIPLY" => Self::MatMul,
            "MODULO" => Self::Mod,
            "ADD" => Self::Add,
            "SUBTRACT" => Self::Sub,
            "FLOOR_DIVIDE" => Self::FloorDiv,
            "TRUE_DIVIDE" => Self::TrueDiv,
            "LSHIFT" => Self::LShift,
            "RSHIFT" => Self::RShift,
            "AND" => Self::BitAnd,
            "XOR" => Self::BitXor,
            "OR" => Self::BitOr,
            _ => return None,
        })
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pow => write!(f, "**"),
            Self::Mul => write!(f, "*"),
            Self::MatMul => write!(f, "@"),
            Self::Mod => write!(f, "%"),
            Self::Add => write!(f, "+"),
            Self::Sub => write!(f, "-"),
            Self::FloorDiv => write!(f, "//"),
            Self::TrueDiv => write!(f, "/"),
            Self::LShift => write!(f, "<<"),
            Self::RShift => write!(f, ">>"),
            Self::BitAnd => write!(f, "&"),
            Self::BitXor => write!(f, "^"),
            Self::BitOr => write!(f, "|"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Pos,
    Neg,
    Invert,
    Not,
}

impl UnaryOp {
    pub fn from_kind(kind: &str) -> Option<Self> {
        Some(match kind {
            "UNARY_POSITIVE" => Self::Pos,
            "UNARY_NEGATIVE" => Self::Neg,
            "UNARY_INVERT" => Self::Invert,
            "UNARY_NOT" => Self::Not,
            _ => return None,
        })
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pos => write!(f, "+"),
            Self::Neg => write!(f, "-"),
            Self::Invert => write!(f, "~"),
            Self::Not => write!(f, "not "),
        }
    }
}

/// `!s`, `!r` and `!a` in a replacement field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Str,
    Repr,
    Ascii,
}

impl Conversion {
    /// From the low two bits of a `FORMAT_VALUE` argument.
    pub fn from_arg(arg: u32) -> Option<Self> {
        match arg & 3 {
            1 => Some(Self::Str),
            2 => Some(Self::Repr),
            3 => Some(Self::Ascii),
            _ => None,
        }
    }
}

impl Display for Conversion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str => write!(f, "!s"),
            Self::Repr => write!(f, "!r"),
            Self::Ascii => write!(f, "!a"),
        }
    }
}

/// A call argument, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Positional(Expr),
    Star(Expr),
    Keyword(String, Expr),
    DoubleStar(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
}

impl Param {
    pub fn named(name: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            annotation: None,
            default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    pub args: Vec<Param>,
    pub vararg: Option<Param>,
    pub kwonly: Vec<Param>,
    pub kwarg: Option<Param>,
}

impl Params {
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
            && self.vararg.is_none()
            && self.kwonly.is_empty()
            && self.kwarg.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name(String),
    Constant(Constant),
    Attribute(Box<Expr>, String),
    Subscript(Box<Expr>, Box<Expr>),
    /// `lower:upper:step`; only meaningful as a subscript.
    Slice(Option<Box<Expr>>, Option<Box<Expr>>, Option<Box<Expr>>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Arg>,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Lambda {
        params: Box<Params>,
        body: Box<Expr>,
    },
    ListComp {
        element: Box<Expr>,
        target: Box<Expr>,
        iter: Box<Expr>,
        condition: Option<Box<Expr>>,
    },
    /// An f-string: literal `Constant::Str` parts and `FormattedValue`s.
    JoinedStr(Vec<Expr>),
    FormattedValue {
        value: Box<Expr>,
        conversion: Option<Conversion>,
        spec: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn str(s: &str) -> Self {
        Expr::Constant(Constant::Str(s.to_string()))
    }

    pub fn name(n: &str) -> Self {
        Expr::Name(n.to_string())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Expr::Constant(Constant::None))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::Constant(c) => c.as_str(),
            _ => None,
        }
    }

    pub fn not(self) -> Self {
        Expr::Unary(UnaryOp::Not, Box::new(self))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub node: StmtNode,
    /// Line of the first instruction the statement was rebuilt from, when known.
    pub line: Option<u32>,
}

impl Stmt {
    pub fn new(node: StmtNode, line: Option<u32>) -> Self {
        Stmt { node, line }
    }
}

impl From<StmtNode> for Stmt {
    fn from(node: StmtNode) -> Self {
        Stmt::new(node, None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtNode {
    Expr(Expr),
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinaryOp,
        value: Expr,
    },
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    Pass,
    Break,
    Return(Option<Expr>),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    FunctionDef {
        name: String,
        /// Outermost first.
        decorators: Vec<Expr>,
        params: Params,
        returns: Option<Expr>,
        body: Vec<Stmt>,
    },
    ClassDef {
        name: String,
        decorators: Vec<Expr>,
        bases: Vec<Expr>,
        body: Vec<Stmt>,
    },
    Import(Vec<Alias>),
    ImportFrom {
        module: String,
        names: Vec<Alias>,
        level: u32,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
}
