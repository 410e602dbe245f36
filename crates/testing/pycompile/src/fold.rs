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

//! Constant folding. Before 3.7 the peephole pass folds operators applied to loaded constants;
//! 3.7 folds the syntax tree before code generation. Both share the arithmetic here.

use unpyc_bytecode::{CompareOp, Constant, Version};

use crate::ast::{Arguments, BinaryOp, Expr, Module, Stmt, StmtNode, UnaryOp};

/// Largest sequence the peephole pass keeps as a folded constant.
const LEGACY_MAX_SIZE: usize = 20;
const MAX_STR_SIZE: usize = 4096;
const MAX_COLLECTION_SIZE: usize = 256;

pub fn truthy(c: &Constant) -> bool {
    match c {
        Constant::None => false,
        Constant::Ellipsis | Constant::Code(_) => true,
        Constant::Bool(b) => *b,
        Constant::Int(i) => *i != 0,
        Constant::Float(f) => *f != 0.0,
        Constant::Str(s) => !s.is_empty(),
        Constant::Bytes(b) => !b.is_empty(),
        Constant::Tuple(t) => !t.is_empty(),
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn num(c: &Constant) -> Option<Num> {
    match c {
        Constant::Bool(b) => Some(Num::Int(*b as i64)),
        Constant::Int(i) => Some(Num::Int(*i)),
        Constant::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

impl Num {
    fn float(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

/// Fold a unary operator. Before 3.7 negation is only folded for truthy operands, so that
/// `-0` and `-0.0` keep their own code.
pub fn unary(op: UnaryOp, operand: &Constant, version: Version) -> Option<Constant> {
    if op == UnaryOp::Not {
        return match operand {
            Constant::Code(_) => None,
            c => Some(Constant::Bool(!truthy(c))),
        };
    }
    if op == UnaryOp::Neg && version < Version::V3_7 && !truthy(operand) {
        return None;
    }
    match (op, num(operand)?) {
        (UnaryOp::Neg, Num::Int(i)) => i.checked_neg().map(Constant::Int),
        (UnaryOp::Neg, Num::Float(f)) => Some(Constant::Float(-f)),
        (UnaryOp::Pos, Num::Int(i)) => Some(Constant::Int(i)),
        (UnaryOp::Pos, Num::Float(f)) => Some(Constant::Float(f)),
        (UnaryOp::Invert, Num::Int(i)) => Some(Constant::Int(!i)),
        _ => None,
    }
}

/// Fold a binary operator, or `None` when the operation raises, has no constant result, or
/// produces a sequence past the size limit of the version.
pub fn binary(op: BinaryOp, left: &Constant, right: &Constant, version: Version) -> Option<Constant> {
    let folded = match (op, left, right) {
        (BinaryOp::Add, Constant::Str(a), Constant::Str(b)) => Constant::Str(format!("{a}{b}")),
        (BinaryOp::Add, Constant::Bytes(a), Constant::Bytes(b)) => {
            Constant::Bytes([a.as_slice(), b.as_slice()].concat())
        }
        (BinaryOp::Add, Constant::Tuple(a), Constant::Tuple(b)) => {
            Constant::Tuple(a.iter().chain(b).cloned().collect())
        }
        (BinaryOp::Mul, seq @ (Constant::Str(_) | Constant::Bytes(_) | Constant::Tuple(_)), n)
        | (BinaryOp::Mul, n, seq @ (Constant::Str(_) | Constant::Bytes(_) | Constant::Tuple(_))) => {
            let Some(Num::Int(n)) = num(n) else {
                return None;
            };
            repeat(seq, n, version)?
        }
        (BinaryOp::BitAnd, Constant::Bool(a), Constant::Bool(b)) => Constant::Bool(a & b),
        (BinaryOp::BitOr, Constant::Bool(a), Constant::Bool(b)) => Constant::Bool(a | b),
        (BinaryOp::BitXor, Constant::Bool(a), Constant::Bool(b)) => Constant::Bool(a ^ b),
        _ => arithmetic(op, num(left)?, num(right)?)?,
    };
    if version < Version::V3_7 && sequence_len(&folded).is_some_and(|n| n > LEGACY_MAX_SIZE) {
        return None;
    }
    Some(folded)
}

fn sequence_len(c: &Constant) -> Option<usize> {
    match c {
        Constant::Str(s) => Some(s.chars().count()),
        Constant::Bytes(b) => Some(b.len()),
        Constant::Tuple(t) => Some(t.len()),
        _ => None,
    }
}

fn repeat(seq: &Constant, n: i64, version: Version) -> Option<Constant> {
    let n = usize::try_from(n).unwrap_or(0);
    let len = sequence_len(seq)?;
    if version >= Version::V3_7 {
        let limit = match seq {
            Constant::Tuple(_) => MAX_COLLECTION_SIZE,
            _ => MAX_STR_SIZE,
        };
        if len > 0 && n > limit / len {
            return None;
        }
    } else if len.checked_mul(n)? > LEGACY_MAX_SIZE {
        return None;
    }
    Some(match seq {
        Constant::Str(s) => Constant::Str(s.repeat(n)),
        Constant::Bytes(b) => Constant::Bytes(b.repeat(n)),
        Constant::Tuple(t) => {
            Constant::Tuple(std::iter::repeat_n(t.iter(), n).flatten().cloned().collect())
        }
        _ => return None,
    })
}

fn arithmetic(op: BinaryOp, left: Num, right: Num) -> Option<Constant> {
    match (left, right) {
        (Num::Int(a), Num::Int(b)) => int_arithmetic(op, a, b),
        (a, b) => float_arithmetic(op, a.float(), b.float()).map(Constant::Float),
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Option<Constant> {
    let value = match op {
        BinaryOp::Add => a.checked_add(b)?,
        BinaryOp::Sub => a.checked_sub(b)?,
        BinaryOp::Mul => a.checked_mul(b)?,
        BinaryOp::FloorDiv => {
            if b == 0 {
                return None;
            }
            let q = a.checked_div(b)?;
            if a % b != 0 && (a < 0) != (b < 0) { q - 1 } else { q }
        }
        BinaryOp::Mod => {
            if b == 0 {
                return None;
            }
            let m = a.checked_rem(b)?;
            if m != 0 && (m < 0) != (b < 0) { m + b } else { m }
        }
        BinaryOp::TrueDiv => {
            return float_arithmetic(op, a as f64, b as f64).map(Constant::Float);
        }
        BinaryOp::Pow if b < 0 => {
            return float_arithmetic(op, a as f64, b as f64).map(Constant::Float);
        }
        BinaryOp::Pow => a.checked_pow(u32::try_from(b).ok()?)?,
        BinaryOp::LShift => {
            if b < 0 {
                return None;
            }
            if a == 0 {
                0
            } else {
                let shifted = a.checked_shl(u32::try_from(b).ok()?)?;
                if shifted >> b != a {
                    return None;
                }
                shifted
            }
        }
        BinaryOp::RShift => {
            if b < 0 {
                return None;
            }
            a >> b.min(63)
        }
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::MatMul => return None,
    };
    Some(Constant::Int(value))
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::TrueDiv => {
            if b == 0.0 {
                return None;
            }
            a / b
        }
        BinaryOp::FloorDiv => float_divmod(a, b)?.0,
        BinaryOp::Mod => float_divmod(a, b)?.1,
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return None;
            }
            if a < 0.0 && b.fract() != 0.0 {
                return None;
            }
            let value = a.powf(b);
            if !value.is_finite() && a.is_finite() && b.is_finite() {
                return None;
            }
            value
        }
        _ => return None,
    };
    Some(value)
}

/// Floor division and modulo of floats, with the sign rules of Python.
fn float_divmod(a: f64, b: f64) -> Option<(f64, f64)> {
    if b == 0.0 {
        return None;
    }
    let mut m = a % b;
    let mut div = (a - m) / b;
    if m != 0.0 {
        if (b < 0.0) != (m < 0.0) {
            m += b;
            div -= 1.0;
        }
    } else {
        m = 0.0_f64.copysign(b);
    }
    let floordiv = if div != 0.0 {
        let f = div.floor();
        if div - f > 0.5 { f + 1.0 } else { f }
    } else {
        0.0_f64.copysign(a / b)
    };
    Some((floordiv, m))
}

/// Fold a module's syntax tree in place, bottom up.
pub fn fold_module(module: &mut Module, version: Version) {
    let folder = Folder { version };
    folder.stmts(&mut module.body);
}

struct Folder {
    version: Version,
}

impl Folder {
    fn stmts(&self, body: &mut [Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&self, stmt: &mut Stmt) {
        match &mut stmt.node {
            StmtNode::Expr(e) => self.expr(e),
            StmtNode::Assign { targets, value } => {
                targets.iter_mut().for_each(|t| self.expr(t));
                self.expr(value);
            }
            StmtNode::AugAssign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            StmtNode::AnnAssign {
                target,
                annotation,
                value,
                ..
            } => {
                self.expr(target);
                self.expr(annotation);
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            StmtNode::Return(Some(e)) => self.expr(e),
            StmtNode::If { test, body, orelse } | StmtNode::While { test, body, orelse } => {
                self.expr(test);
                self.stmts(body);
                self.stmts(orelse);
            }
            StmtNode::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.expr(target);
                self.expr(iter);
                self.iter(iter);
                self.stmts(body);
                self.stmts(orelse);
            }
            StmtNode::FunctionDef {
                args,
                body,
                decorators,
                ..
            } => {
                decorators.iter_mut().for_each(|d| self.expr(d));
                self.arguments(args);
                self.stmts(body);
            }
            StmtNode::ClassDef {
                bases,
                body,
                decorators,
                ..
            } => {
                decorators.iter_mut().for_each(|d| self.expr(d));
                bases.iter_mut().for_each(|b| self.expr(b));
                self.stmts(body);
            }
            StmtNode::Return(None)
            | StmtNode::Pass
            | StmtNode::Break
            | StmtNode::Continue
            | StmtNode::Import(_)
            | StmtNode::ImportFrom { .. }
            | StmtNode::Global(_)
            | StmtNode::Nonlocal(_) => {}
        }
    }

    fn arguments(&self, args: &mut Arguments) {
        args.defaults.iter_mut().for_each(|d| self.expr(d));
        args.kw_defaults.iter_mut().flatten().for_each(|d| self.expr(d));
        args.annotations.iter_mut().for_each(|(_, a)| self.expr(a));
    }

    fn opt(&self, e: &mut Option<Box<Expr>>) {
        if let Some(e) = e {
            self.expr(e);
        }
    }

    fn expr(&self, expr: &mut Expr) {
        match expr {
            Expr::Name(_) | Expr::Constant(_) => {}
            Expr::Attribute(value, _) | Expr::Starred(value) => self.expr(value),
            Expr::Subscript(value, index) => {
                self.expr(value);
                self.expr(index);
            }
            Expr::Slice(lower, upper, step) => {
                self.opt(lower);
                self.opt(upper);
                self.opt(step);
            }
            Expr::BinOp(_, left, right) => {
                self.expr(left);
                self.expr(right);
            }
            Expr::UnaryOp(_, operand) => self.expr(operand),
            Expr::BoolOp(_, values)
            | Expr::Tuple(values)
            | Expr::List(values)
            | Expr::Set(values)
            | Expr::JoinedStr(values) => values.iter_mut().for_each(|v| self.expr(v)),
            Expr::Compare(left, comparators) => {
                self.expr(left);
                comparators.iter_mut().for_each(|(_, c)| self.expr(c));
            }
            Expr::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                self.expr(func);
                args.iter_mut().for_each(|a| self.expr(a));
                keywords.iter_mut().for_each(|k| self.expr(&mut k.value));
            }
            Expr::Dict(entries) => {
                for (key, value) in entries {
                    if let Some(key) = key {
                        self.expr(key);
                    }
                    self.expr(value);
                }
            }
            Expr::Lambda { args, body, .. } => {
                self.arguments(args);
                self.expr(body);
            }
            Expr::ListComp {
                elt,
                target,
                iter,
                ifs,
                ..
            } => {
                self.expr(elt);
                self.expr(target);
                self.expr(iter);
                self.iter(iter);
                ifs.iter_mut().for_each(|i| self.expr(i));
            }
            Expr::FormattedValue { value, spec, .. } => {
                self.expr(value);
                self.opt(spec);
            }
        }
        if let Some(folded) = self.fold(expr) {
            *expr = folded;
        }
    }

    /// The replacement for a node whose children are already folded.
    fn fold(&self, expr: &mut Expr) -> Option<Expr> {
        match expr {
            Expr::Name(name) if name == "__debug__" => Some(Expr::Constant(Constant::Bool(true))),
            Expr::UnaryOp(op, operand) => match operand.as_mut() {
                Expr::Constant(c) => unary(*op, c, self.version).map(Expr::Constant),
                Expr::Compare(left, comparators)
                    if *op == UnaryOp::Not && comparators.len() == 1 =>
                {
                    let negated = match comparators[0].0 {
                        CompareOp::Is => CompareOp::IsNot,
                        CompareOp::IsNot => CompareOp::Is,
                        CompareOp::In => CompareOp::NotIn,
                        CompareOp::NotIn => CompareOp::In,
                        _ => return None,
                    };
                    let (_, right) = comparators.pop()?;
                    let left = std::mem::replace(left.as_mut(), Expr::Constant(Constant::None));
                    Some(Expr::Compare(Box::new(left), vec![(negated, right)]))
                }
                _ => None,
            },
            Expr::BinOp(op, left, right) => {
                let (Expr::Constant(l), Expr::Constant(r)) = (left.as_ref(), right.as_ref()) else {
                    return None;
                };
                binary(*op, l, r, self.version).map(Expr::Constant)
            }
            Expr::Tuple(elts) => constant_tuple(elts).map(Expr::Constant),
            Expr::Compare(_, comparators) => {
                if let Some((CompareOp::In | CompareOp::NotIn, last)) = comparators.last_mut() {
                    self.iter(last);
                }
                None
            }
            _ => None,
        }
    }

    /// A list that is only iterated over or tested for membership becomes a tuple.
    fn iter(&self, expr: &mut Expr) {
        if let Expr::List(elts) = expr
            && !elts.iter().any(|e| matches!(e, Expr::Starred(_)))
        {
            let elts = std::mem::take(elts);
            *expr = match constant_tuple(&elts) {
                Some(c) => Expr::Constant(c),
                None => Expr::Tuple(elts),
            };
        }
    }
}

fn constant_tuple(elts: &[Expr]) -> Option<Constant> {
    elts.iter()
        .map(|e| e.as_constant().cloned())
        .collect::<Option<Vec<_>>>()
        .map(Constant::Tuple)
}
