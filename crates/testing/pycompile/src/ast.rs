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

//! The syntax tree the parser produces. Function-like nodes carry the id of the scope they open,
//! which keys the symbol table.

use unpyc_bytecode::{CompareOp, Constant};

pub type ScopeId = usize;

/// The module's scope id; nested scopes are numbered from 1 in parse order.
pub const MODULE_SCOPE: ScopeId = 0;

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
    pub fn from_token(op: &str) -> Option<Self> {
        Some(match op {
            "**" => Self::Pow,
            "*" => Self::Mul,
            "@" => Self::MatMul,
            "%" => Self::Mod,
            "+" => Self::Add,
            "-" => Self::Sub,
            "//" => Self::FloorDiv,
            "/" => Self::TrueDiv,
            "<<" => Self::LShift,
            ">>" => Self::RShift,
            "&" => Self::BitAnd,
            "^" => Self::BitXor,
            "|" => Self::BitOr,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Pos,
    Neg,
    Invert,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// `None` for `**mapping`.
    pub arg: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    pub args: Vec<String>,
    /// Defaults of the trailing positional parameters.
    pub defaults: Vec<Expr>,
    pub vararg: Option<String>,
    pub kwonly: Vec<String>,
    /// One entry per keyword-only parameter.
    pub kw_defaults: Vec<Option<Expr>>,
    pub kwarg: Option<String>,
    /// Annotated parameters in evaluation order: positional, `*args`, keyword-only, `**kwargs`,
    /// then `return`.
    pub annotations: Vec<(String, Expr)>,
}

impl Arguments {
    /// Parameter names in `co_varnames` order.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.args
            .iter()
            .chain(&self.kwonly)
            .chain(&self.vararg)
            .chain(&self.kwarg)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name(String),
    Constant(Constant),
    Attribute(Box<Expr>, String),
    Subscript(Box<Expr>, Box<Expr>),
    Slice(Option<Box<Expr>>, Option<Box<Expr>>, Option<Box<Expr>>),
    BinOp(BinaryOp, Box<Expr>, Box<Expr>),
    UnaryOp(UnaryOp, Box<Expr>),
    BoolOp(BoolOp, Vec<Expr>),
    /// Chains of more than one comparison are rejected by code generation.
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        /// Positional arguments; `Starred` for `*iterable`.
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Starred(Box<Expr>),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    /// A `None` key is a `**mapping` entry.
    Dict(Vec<(Option<Expr>, Expr)>),
    Lambda {
        args: Box<Arguments>,
        body: Box<Expr>,
        scope: ScopeId,
    },
    ListComp {
        elt: Box<Expr>,
        target: Box<Expr>,
        iter: Box<Expr>,
        ifs: Vec<Expr>,
        scope: ScopeId,
    },
    JoinedStr(Vec<Expr>),
    FormattedValue {
        value: Box<Expr>,
        conversion: Option<char>,
        spec: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Expr::Constant(c) => Some(c),
            _ => None,
        }
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
    pub line: usize,
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
        /// An unparenthesized name target.
        simple: bool,
    },
    Pass,
    Break,
    Continue,
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
        args: Box<Arguments>,
        body: Vec<Stmt>,
        /// Outermost first, as written.
        decorators: Vec<Expr>,
        scope: ScopeId,
    },
    ClassDef {
        name: String,
        bases: Vec<Expr>,
        body: Vec<Stmt>,
        decorators: Vec<Expr>,
        scope: ScopeId,
    },
    Import(Vec<Alias>),
    ImportFrom {
        module: Option<String>,
        names: Vec<Alias>,
        level: u32,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

/// The docstring of a body, when its first statement is a string literal.
pub fn docstring(body: &[Stmt]) -> Option<&str> {
    match body.first().map(|s| &s.node) {
        Some(StmtNode::Expr(Expr::Constant(Constant::Str(s)))) => Some(s),
        _ => None,
    }
}

/// Whether a body contains an annotated assignment outside nested scopes.
pub fn has_annotations(body: &[Stmt]) -> bool {
    body.iter().any(|s| match &s.node {
        StmtNode::AnnAssign { .. } => true,
        StmtNode::If { body, orelse, .. }
        | StmtNode::While { body, orelse, .. }
        | StmtNode::For { body, orelse, .. } => has_annotations(body) || has_annotations(orelse),
        _ => false,
    })
}
