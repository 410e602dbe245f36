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

//! Lowering of parse trees into the syntax tree.
//!
//! Each nonterminal of the grammar maps to one construct. Code objects are lowered innermost
//! first, so a `def`, `class`, lambda or comprehension finds its body already rebuilt in the
//! `nested` map under the constant index its parent loads it from.

use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::Itertools;
use tracing::trace;
use unpyc_bytecode::{ArgValue, CO_VARARGS, CO_VARKEYWORDS, CodeObject, CompareOp, Constant};

use crate::ast::{
    Alias, Arg, BinaryOp, Conversion, Expr, Param, Params, Stmt, StmtNode, UnaryOp,
};
use crate::error::DecompileError;
use crate::parser::{NodeId, ParseTree};
use crate::scanner::{CodeRole, OpVariant, ScannedCode};
use crate::token::Token;

/// A rebuilt code object, shaped by its role.
#[derive(Debug, Clone, PartialEq)]
pub enum Lowered {
    /// Module, function or class body.
    Stmts(Vec<Stmt>),
    /// The expression a lambda returns.
    Lambda(Expr),
    /// The inside of a list comprehension; the iterable belongs to the caller.
    Comprehension {
        element: Expr,
        target: Expr,
        condition: Option<Expr>,
    },
}

/// Rebuild `scanned` from its parse tree.
pub fn build(
    scanned: &ScannedCode,
    tree: &ParseTree,
    nested: &BTreeMap<usize, Lowered>,
) -> Result<Lowered, DecompileError> {
    Builder {
        scanned,
        tree,
        nested,
    }
    .build()
}

struct Builder<'a> {
    scanned: &'a ScannedCode,
    tree: &'a ParseTree,
    nested: &'a BTreeMap<usize, Lowered>,
}

/// Operands and code object of a `MAKE_FUNCTION`.
struct FunctionParts {
    index: usize,
    code: Arc<CodeObject>,
    defaults: Vec<Expr>,
    kwdefaults: Vec<(String, Expr)>,
    /// By parameter name; the return annotation is keyed `return`.
    annotations: Vec<(String, Expr)>,
}

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Whether `s` can be written as a keyword argument name.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
        && !KEYWORDS.contains(&s)
}

/// Turn a lambda's statement form back into one expression. The optimizer rewrites the jump
/// past the else branch of a conditional expression into a second `RETURN_VALUE`, so the body
/// reads as `if test: return a` followed by `return b`.
pub fn fold_returns(stmts: &[Stmt]) -> Option<Expr> {
    match stmts {
        [
            Stmt {
                node: StmtNode::Return(Some(e)),
                ..
            },
        ] => Some(e.clone()),
        [
            Stmt {
                node: StmtNode::If { test, body, orelse },
                ..
            },
            rest @ ..,
        ] => {
            let orelse = match (orelse.is_empty(), rest.is_empty()) {
                (true, false) => fold_returns(rest)?,
                (false, true) => fold_returns(orelse)?,
                _ => return None,
            };
            Some(Expr::IfExp {
                test: Box::new(test.clone()),
                body: Box::new(fold_returns(body)?),
                orelse: Box::new(orelse),
            })
        }
        _ => None,
    }
}

fn ends_with_return(stmts: &[Stmt]) -> bool {
    match stmts.last().map(|s| &s.node) {
        Some(StmtNode::Return(_)) => true,
        Some(StmtNode::If { body, orelse, .. }) => {
            !orelse.is_empty() && ends_with_return(body) && ends_with_return(orelse)
        }
        _ => false,
    }
}

/// An implicit `return None` is only emitted when the end of the body is reachable. When
/// everything before it returns, the statements after the last returning `if` were its
/// `else` branch: the jump past that branch was dropped as unreachable.
pub fn restore_final_else(body: &mut Vec<Stmt>) {
    if !ends_with_return(body) {
        return;
    }
    let found = body.iter().rposition(|s| {
        matches!(&s.node, StmtNode::If { body, orelse, .. } if orelse.is_empty() && ends_with_return(body))
    });
    let Some(at) = found else {
        return;
    };
    if at + 1 == body.len() {
        return;
    }
    let rest: Vec<Stmt> = body.drain(at + 1..).collect();
    if let StmtNode::If { orelse, .. } = &mut body[at].node {
        *orelse = rest;
    }
}

/// Parameters of a function, read from its code object's argument layout. Every annotation
/// must name a parameter; the return annotation is not passed here.
pub fn params_from_code(
    code: &CodeObject,
    defaults: Vec<Expr>,
    kwdefaults: Vec<(String, Expr)>,
    annotations: Vec<(String, Expr)>,
) -> Option<Params> {
    let argc = code.argcount as usize;
    let kwc = code.kwonlyargcount as usize;
    let names = &code.varnames;
    if names.len() < argc + kwc || defaults.len() > argc {
        return None;
    }
    let mut annotations: BTreeMap<String, Expr> = annotations.into_iter().collect();
    let mut param = |name: &String, default: Option<Expr>| Param {
        name: name.clone(),
        annotation: annotations.remove(name),
        default,
    };
    let first_default = argc - defaults.len();
    let mut defaults = defaults.into_iter();
    let args = names[..argc]
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let default = if i >= first_default {
                defaults.next()
            } else {
                None
            };
            param(name, default)
        })
        .collect();
    let mut kwdefaults: BTreeMap<String, Expr> = kwdefaults.into_iter().collect();
    let kwonly = names[argc..argc + kwc]
        .iter()
        .map(|name| param(name, kwdefaults.remove(name)))
        .collect();
    let mut next = argc + kwc;
    let mut take = |flag: u32| -> Option<Option<Param>> {
        if !code.has_flag(flag) {
            return Some(None);
        }
        let name = names.get(next)?;
        next += 1;
        Some(Some(param(name, None)))
    };
    let vararg = take(CO_VARARGS)?;
    let kwarg = take(CO_VARKEYWORDS)?;
    if !annotations.is_empty() {
        return None;
    }
    Some(Params {
        args,
        vararg,
        kwonly,
        kwarg,
    })
}

/// `x: T = v` compiles to the assignment followed by the bare annotation. A pair written on one
/// line is joined back into the annotated assignment.
pub fn join_annotations(stmts: &mut Vec<Stmt>) {
    let mut i = 1;
    while i < stmts.len() {
        let joined = match (&stmts[i - 1], &stmts[i]) {
            (
                Stmt {
                    node: StmtNode::Assign { targets, value },
                    line: Some(line),
                },
                Stmt {
                    node:
                        StmtNode::AnnAssign {
                            target: target @ Expr::Name(_),
                            annotation,
                            value: None,
                        },
                    line: Some(annotated),
                },
            ) if line == annotated && targets.as_slice() == std::slice::from_ref(target) => {
                Some(Stmt::new(
                    StmtNode::AnnAssign {
                        target: target.clone(),
                        annotation: annotation.clone(),
                        value: Some(value.clone()),
                    },
                    Some(*line),
                ))
            }
            _ => None,
        };
        match joined {
            Some(stmt) => {
                stmts[i - 1] = stmt;
                stmts.remove(i);
            }
            None => i += 1,
        }
    }
}

fn assigns_to<'s>(node: &'s StmtNode, name: &str) -> Option<&'s Expr> {
    match node {
        StmtNode::Assign { targets, value } if targets.len() == 1 => match &targets[0] {
            Expr::Name(n) if n == name => Some(value),
            _ => None,
        },
        _ => None,
    }
}

impl<'a> Builder<'a> {
    fn build(&self) -> Result<Lowered, DecompileError> {
        let root = self.tree.root();
        trace!(location = %self.scanned.location, role = %self.scanned.role, "building");
        match self.scanned.role {
            CodeRole::Module => {
                let stmts = match self.tree.name(root) {
                    "single" => self.single(root)?,
                    _ => self.stmts(self.nth(root, 0)?)?,
                };
                Ok(Lowered::Stmts(self.finish(stmts)))
            }
            CodeRole::Function | CodeRole::Class => {
                Ok(Lowered::Stmts(self.finish(self.stmts(root)?)))
            }
            CodeRole::Lambda => {
                let stmts = self.stmts(root)?;
                fold_returns(&stmts)
                    .map(Lowered::Lambda)
                    .ok_or_else(|| self.err(root, "lambda body is not one expression"))
            }
            CodeRole::ListComp => self.comprehension(root),
        }
    }

    fn err(&self, id: NodeId, message: impl Into<String>) -> DecompileError {
        DecompileError::Build {
            location: self.scanned.location.clone(),
            symbol: self.tree.name(id).to_string(),
            message: message.into(),
        }
    }

    fn nth(&self, id: NodeId, i: usize) -> Result<NodeId, DecompileError> {
        self.tree
            .children(id)
            .get(i)
            .copied()
            .ok_or_else(|| self.err(id, format!("missing child {i}")))
    }

    fn token(&self, id: NodeId) -> Result<&'a Token, DecompileError> {
        self.tree
            .token(id)
            .and_then(|t| self.scanned.tokens.get(t))
            .ok_or_else(|| self.err(id, "expected a token"))
    }

    fn name_of(&self, id: NodeId) -> Result<String, DecompileError> {
        self.token(id)?
            .name()
            .map(str::to_string)
            .ok_or_else(|| self.err(id, "token carries no name"))
    }

    fn constant_of(&self, id: NodeId) -> Result<&'a Constant, DecompileError> {
        self.token(id)?
            .constant()
            .ok_or_else(|| self.err(id, "token carries no constant"))
    }

    fn str_of(&self, id: NodeId) -> Result<String, DecompileError> {
        self.constant_of(id)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.err(id, "expected a string constant"))
    }

    fn expr_at(&self, id: NodeId, i: usize) -> Result<Expr, DecompileError> {
        self.expr(self.nth(id, i)?)
    }

    fn store_at(&self, id: NodeId, i: usize) -> Result<Expr, DecompileError> {
        self.store(self.nth(id, i)?)
    }

    fn stmts_at(&self, id: NodeId, i: usize) -> Result<Vec<Stmt>, DecompileError> {
        self.stmts(self.nth(id, i)?)
    }

    fn first_line(&self, id: NodeId) -> Option<u32> {
        let span = self.tree.node(id).span.clone();
        self.scanned.tokens[span].iter().find_map(|t| t.line)
    }

    // Bodies

    fn single(&self, root: NodeId) -> Result<Vec<Stmt>, DecompileError> {
        match self.tree.children(root) {
            [stmt, _] => Ok(vec![self.stmt(*stmt)?]),
            _ => Ok(vec![]),
        }
    }

    fn stmts(&self, id: NodeId) -> Result<Vec<Stmt>, DecompileError> {
        let mut out = vec![];
        self.collect_stmts(id, &mut out)?;
        join_annotations(&mut out);
        Ok(out)
    }

    fn collect_stmts(&self, id: NodeId, out: &mut Vec<Stmt>) -> Result<(), DecompileError> {
        match self.tree.name(id) {
            "stmts" | "stmts_opt" | "returns" => {
                for c in self.tree.children(id) {
                    self.collect_stmts(*c, out)?;
                }
            }
            "stmt" | "last_return" => out.push(self.stmt(id)?),
            other => return Err(self.err(id, format!("{other} in a statement list"))),
        }
        Ok(())
    }

    /// Strip what the compiler adds around a body and restore what it moved out of it.
    fn finish(&self, mut body: Vec<Stmt>) -> Vec<Stmt> {
        let code = &self.scanned.code;
        let role = self.scanned.role;
        if body
            .last()
            .is_some_and(|s| matches!(&s.node, StmtNode::Return(Some(e)) if e.is_none()))
        {
            body.pop();
            if role == CodeRole::Function {
                restore_final_else(&mut body);
            }
        }
        if role == CodeRole::Class {
            if body
                .first()
                .and_then(|s| assigns_to(&s.node, "__module__"))
                .is_some_and(|v| *v == Expr::name("__name__"))
            {
                body.remove(0);
            }
            if body
                .first()
                .and_then(|s| assigns_to(&s.node, "__qualname__"))
                .is_some_and(|v| v.as_str().is_some())
            {
                body.remove(0);
            }
        }

        let mut docstring = false;
        match role {
            CodeRole::Module | CodeRole::Class => {
                if let Some(first) = body.first_mut()
                    && let Some(doc) = assigns_to(&first.node, "__doc__")
                    && doc.as_str().is_some()
                {
                    first.node = StmtNode::Expr(doc.clone());
                    docstring = true;
                }
            }
            CodeRole::Function => {
                if let Some(doc) = code.consts.first().and_then(Constant::as_str) {
                    body.insert(0, Stmt::new(StmtNode::Expr(Expr::str(doc)), None));
                    docstring = true;
                }
            }
            CodeRole::Lambda | CodeRole::ListComp => {}
        }

        let stored = |kind: &str| {
            self.scanned
                .tokens
                .iter()
                .filter(|t| t.kind == kind)
                .filter_map(|t| t.name())
                .unique()
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        let mut decls = vec![];
        let globals = stored("STORE_GLOBAL");
        if !globals.is_empty() {
            decls.push(Stmt::from(StmtNode::Global(globals)));
        }
        let nonlocals: Vec<String> = stored("STORE_DEREF")
            .into_iter()
            .filter(|n| code.is_free(n))
            .collect();
        if !nonlocals.is_empty() {
            decls.push(Stmt::from(StmtNode::Nonlocal(nonlocals)));
        }
        let at = usize::from(docstring);
        for (i, decl) in decls.into_iter().enumerate() {
            body.insert(at + i, decl);
        }
        body
    }

    fn comprehension(&self, root: NodeId) -> Result<Lowered, DecompileError> {
        let target = self.store_at(root, 3)?;
        let fifth = self.nth(root, 4)?;
        let (condition, element) = if self.tree.name(fifth) == "testexpr" {
            (Some(self.cond(fifth)?), self.expr_at(root, 5)?)
        } else {
            (None, self.expr(fifth)?)
        };
        Ok(Lowered::Comprehension {
            element,
            target,
            condition,
        })
    }

    fn nested_body(&self, id: NodeId, index: usize) -> Result<&'a Lowered, DecompileError> {
        self.nested
            .get(&index)
            .ok_or_else(|| self.err(id, format!("no code object at constant {index}")))
    }

    // Statements

    fn stmt(&self, id: NodeId) -> Result<Stmt, DecompileError> {
        let s = self.nth(id, 0)?;
        let node = match self.tree.name(s) {
            "expr_stmt" | "print_expr" => StmtNode::Expr(self.expr_at(s, 0)?),
            "assign" => StmtNode::Assign {
                targets: vec![self.store_at(s, 1)?],
                value: self.expr_at(s, 0)?,
            },
            "assign_multi" => {
                let mut targets = vec![];
                self.dup_stores(self.nth(s, 1)?, &mut targets)?;
                targets.push(self.store_at(s, 2)?);
                StmtNode::Assign {
                    targets,
                    value: self.expr_at(s, 0)?,
                }
            }
            "assign_swap2" => StmtNode::Assign {
                targets: vec![Expr::Tuple(vec![self.store_at(s, 3)?, self.store_at(s, 4)?])],
                value: Expr::Tuple(vec![self.expr_at(s, 0)?, self.expr_at(s, 1)?]),
            },
            "assign_swap3" => StmtNode::Assign {
                targets: vec![Expr::Tuple(vec![
                    self.store_at(s, 5)?,
                    self.store_at(s, 6)?,
                    self.store_at(s, 7)?,
                ])],
                value: Expr::Tuple(vec![
                    self.expr_at(s, 0)?,
                    self.expr_at(s, 1)?,
                    self.expr_at(s, 2)?,
                ]),
            },
            "aug_assign" => StmtNode::AugAssign {
                target: self.store_at(s, 3)?,
                op: self.binary_op(self.nth(s, 2)?)?,
                value: self.expr_at(s, 1)?,
            },
            "aug_assign_attr" => StmtNode::AugAssign {
                target: Expr::Attribute(Box::new(self.expr_at(s, 0)?), self.name_of(self.nth(s, 2)?)?),
                op: self.binary_op(self.nth(s, 4)?)?,
                value: self.expr_at(s, 3)?,
            },
            "aug_assign_subscr" => StmtNode::AugAssign {
                target: Expr::Subscript(Box::new(self.expr_at(s, 0)?), Box::new(self.expr_at(s, 1)?)),
                op: self.binary_op(self.nth(s, 5)?)?,
                value: self.expr_at(s, 4)?,
            },
            "return" => StmtNode::Return(Some(self.expr_at(s, 0)?)),
            "break" => StmtNode::Break,
            "ifstmt" => StmtNode::If {
                test: self.cond(self.nth(s, 0)?)?,
                body: self.stmts_at(s, 1)?,
                orelse: vec![],
            },
            "ifelsestmt" => StmtNode::If {
                test: self.cond(self.nth(s, 0)?)?,
                body: self.stmts_at(s, 1)?,
                orelse: self.stmts_at(s, 4)?,
            },
            "while" => StmtNode::While {
                test: self.cond(self.nth(s, 1)?)?,
                body: self.stmts_at(s, 2)?,
                orelse: vec![],
            },
            "while_else" => StmtNode::While {
                test: self.cond(self.nth(s, 1)?)?,
                body: self.stmts_at(s, 2)?,
                orelse: self.stmts_at(s, 6)?,
            },
            "while_true" => StmtNode::While {
                test: Expr::Constant(Constant::Bool(true)),
                body: self.stmts_at(s, 1)?,
                orelse: vec![],
            },
            "for" => StmtNode::For {
                target: self.store_at(s, 4)?,
                iter: self.expr_at(s, 1)?,
                body: self.stmts_at(s, 5)?,
                orelse: vec![],
            },
            "for_else" => StmtNode::For {
                target: self.store_at(s, 4)?,
                iter: self.expr_at(s, 1)?,
                body: self.stmts_at(s, 5)?,
                orelse: self.stmts_at(s, 9)?,
            },
            "funcdef" => self.funcdef(s)?,
            "classdef" => self.classdef(s)?,
            "import" => self.import(s)?,
            "import_as_dotted" => {
                let module = self.name_of(self.nth(s, 2)?)?;
                let asname = self.store_name(self.nth(s, 4)?)?;
                StmtNode::Import(vec![Alias {
                    name: module,
                    asname: Some(asname),
                }])
            }
            "import_from" => {
                let mut names = vec![];
                self.import_names(self.nth(s, 3)?, &mut names)?;
                StmtNode::ImportFrom {
                    module: self.name_of(self.nth(s, 2)?)?,
                    names,
                    level: self.import_level(s)?,
                }
            }
            "import_star" => StmtNode::ImportFrom {
                module: self.name_of(self.nth(s, 2)?)?,
                names: vec![Alias {
                    name: "*".to_string(),
                    asname: None,
                }],
                level: self.import_level(s)?,
            },
            "ann_assign" => StmtNode::AnnAssign {
                target: self.store_at(s, 1)?,
                annotation: self.expr_at(s, 2)?,
                value: Some(self.expr_at(s, 0)?),
            },
            "ann_decl" => {
                let target = match self.tree.children(s).len() {
                    2 => self.name_of(self.nth(s, 1)?)?,
                    _ => self.str_of(self.nth(s, 2)?)?,
                };
                StmtNode::AnnAssign {
                    target: Expr::Name(target),
                    annotation: self.expr_at(s, 0)?,
                    value: None,
                }
            }
            other => return Err(self.err(s, format!("no statement form for {other}"))),
        };
        Ok(Stmt::new(node, self.first_line(id)))
    }

    fn dup_stores(&self, id: NodeId, out: &mut Vec<Expr>) -> Result<(), DecompileError> {
        for c in self.tree.children(id) {
            match self.tree.name(*c) {
                "dup_stores" => self.dup_stores(*c, out)?,
                "store" => out.push(self.store(*c)?),
                _ => {}
            }
        }
        Ok(())
    }

    fn store(&self, id: NodeId) -> Result<Expr, DecompileError> {
        match *self.tree.children(id) {
            [only] if self.tree.name(only) == "unpack" => {
                let targets = self.tree.children(only)[1..]
                    .iter()
                    .map(|c| self.store(*c))
                    .collect::<Result<_, _>>()?;
                Ok(Expr::Tuple(targets))
            }
            [only] => Ok(Expr::Name(self.name_of(only)?)),
            [obj, attr] => Ok(Expr::Attribute(
                Box::new(self.expr(obj)?),
                self.name_of(attr)?,
            )),
            [obj, index, _] => Ok(Expr::Subscript(
                Box::new(self.expr(obj)?),
                Box::new(self.expr(index)?),
            )),
            _ => Err(self.err(id, "unrecognized store")),
        }
    }

    fn store_name(&self, id: NodeId) -> Result<String, DecompileError> {
        match self.store(id)? {
            Expr::Name(n) => Ok(n),
            _ => Err(self.err(id, "expected a plain name")),
        }
    }

    /// The entries of a dict built from constant string keys.
    fn named_entries(&self, id: NodeId, what: &str) -> Result<Vec<(String, Expr)>, DecompileError> {
        let Expr::Dict(pairs) = self.expr(id)? else {
            return Err(self.err(id, format!("{what} are not a dict")));
        };
        pairs
            .into_iter()
            .map(|(k, v)| match k.as_str() {
                Some(name) => Ok((name.to_string(), v)),
                None => Err(self.err(id, format!("{what} are not keyed by name"))),
            })
            .collect()
    }

    fn function_parts(&self, id: NodeId) -> Result<FunctionParts, DecompileError> {
        let mut code = None;
        let mut defaults = vec![];
        let mut kwdefaults = vec![];
        let mut annotations = vec![];
        let mut annotation_values = vec![];
        for c in self.tree.children(id) {
            let c = *c;
            match self.tree.name(c) {
                "pos_default" => defaults.push(self.expr(c)?),
                "kw_default" => kwdefaults.push((self.str_of(self.nth(c, 0)?)?, self.expr_at(c, 1)?)),
                "annotation" => annotation_values.push(self.expr(c)?),
                "defaults_tuple" => {
                    defaults = match self.expr(c)? {
                        Expr::Tuple(items) => items,
                        Expr::Constant(Constant::Tuple(items)) => {
                            items.into_iter().map(Expr::Constant).collect()
                        }
                        _ => return Err(self.err(c, "defaults are not a tuple")),
                    }
                }
                "kwdefaults_map" => kwdefaults = self.named_entries(c, "keyword defaults")?,
                "annotations_map" => annotations = self.named_entries(c, "annotations")?,
                "LOAD_ANNOTATION_NAMES" => {
                    let names = self
                        .constant_of(c)?
                        .as_tuple()
                        .ok_or_else(|| self.err(c, "annotation names are not a tuple"))?;
                    if names.len() != annotation_values.len() {
                        return Err(self.err(c, "annotation names do not match their values"));
                    }
                    annotations = names
                        .iter()
                        .map(|n| n.as_str().map(str::to_string))
                        .zip(annotation_values.drain(..))
                        .map(|(name, value)| {
                            name.map(|n| (n, value))
                                .ok_or_else(|| self.err(c, "annotation name is not a string"))
                        })
                        .collect::<Result<_, _>>()?;
                }
                "LOAD_CODE" | "LOAD_LAMBDA" | "LOAD_LISTCOMP" => {
                    let token = self.token(c)?;
                    let index = token.arg.unwrap_or_default() as usize;
                    let object = self
                        .constant_of(c)?
                        .as_code()
                        .ok_or_else(|| self.err(c, "expected a code object"))?;
                    code = Some((index, object.clone()));
                }
                _ => {}
            }
        }
        let (index, code) = code.ok_or_else(|| self.err(id, "no code object loaded"))?;
        Ok(FunctionParts {
            index,
            code,
            defaults,
            kwdefaults,
            annotations,
        })
    }

    /// Parameters and return annotation.
    fn params(
        &self,
        id: NodeId,
        parts: FunctionParts,
    ) -> Result<(Params, Option<Expr>), DecompileError> {
        let (returns, annotations): (Vec<_>, Vec<_>) = parts
            .annotations
            .into_iter()
            .partition(|(name, _)| name == "return");
        let params = params_from_code(&parts.code, parts.defaults, parts.kwdefaults, annotations)
            .ok_or_else(|| self.err(id, "arguments do not fit the code object"))?;
        Ok((params, returns.into_iter().next().map(|(_, e)| e)))
    }

    /// Decorator expressions, outermost first, and the definition they wrap.
    fn decorated(&self, id: NodeId, wrapper: &str) -> Result<(Vec<Expr>, NodeId), DecompileError> {
        let mut decorators = vec![];
        let mut id = id;
        while self.tree.name(id) == wrapper {
            decorators.push(self.expr_at(id, 0)?);
            id = self.nth(id, 1)?;
        }
        Ok((decorators, id))
    }

    fn funcdef(&self, s: NodeId) -> Result<StmtNode, DecompileError> {
        let (decorators, mkfunc) = self.decorated(self.nth(s, 0)?, "decorated_def")?;
        let parts = self.function_parts(mkfunc)?;
        let Lowered::Stmts(body) = self.nested_body(mkfunc, parts.index)? else {
            return Err(self.err(mkfunc, "function body is not a statement list"));
        };
        let body = body.clone();
        let (params, returns) = self.params(mkfunc, parts)?;
        Ok(StmtNode::FunctionDef {
            name: self.store_name(self.nth(s, 1)?)?,
            decorators,
            params,
            returns,
            body,
        })
    }

    fn classdef(&self, s: NodeId) -> Result<StmtNode, DecompileError> {
        let (decorators, build) = self.decorated(self.nth(s, 0)?, "decorated_class")?;
        let mkfunc = self.nth(build, 1)?;
        let parts = self.function_parts(mkfunc)?;
        let Lowered::Stmts(body) = self.nested_body(mkfunc, parts.index)? else {
            return Err(self.err(mkfunc, "class body is not a statement list"));
        };
        let bases = self
            .tree
            .children(build)
            .iter()
            .filter(|c| self.tree.name(**c) == "pos_arg")
            .map(|c| self.expr(*c))
            .collect::<Result<_, _>>()?;
        Ok(StmtNode::ClassDef {
            name: self.str_of(self.nth(build, 2)?)?,
            decorators,
            bases,
            body: body.clone(),
        })
    }

    fn import(&self, s: NodeId) -> Result<StmtNode, DecompileError> {
        let module = self.name_of(self.nth(s, 2)?)?;
        let bound = self.store_name(self.nth(s, 3)?)?;
        let top = module.split('.').next().unwrap_or_default();
        let asname = (bound != top).then_some(bound);
        Ok(StmtNode::Import(vec![Alias {
            name: module,
            asname,
        }]))
    }

    fn import_level(&self, s: NodeId) -> Result<u32, DecompileError> {
        let level = self.nth(s, 0)?;
        match self.constant_of(level)? {
            Constant::Int(n) => u32::try_from(*n).map_err(|_| self.err(level, "negative level")),
            _ => Err(self.err(level, "import level is not an integer")),
        }
    }

    fn import_names(&self, id: NodeId, out: &mut Vec<Alias>) -> Result<(), DecompileError> {
        for c in self.tree.children(id) {
            match self.tree.name(*c) {
                "import_names" => self.import_names(*c, out)?,
                "import_name" => {
                    let name = self.name_of(self.nth(*c, 0)?)?;
                    let bound = self.store_name(self.nth(*c, 1)?)?;
                    let asname = (bound != name).then_some(bound);
                    out.push(Alias { name, asname });
                }
                _ => {}
            }
        }
        Ok(())
    }

    // Tests

    /// The condition a jump test stands for: `testfalse` branches away when its condition is
    /// false, `testtrue` branches into the body when its condition is true.
    fn cond(&self, id: NodeId) -> Result<Expr, DecompileError> {
        let kids = self.tree.children(id);
        let name = self.tree.name(id);
        match (name, kids) {
            ("testexpr", [inner]) => self.cond(*inner),
            ("testfalse", [a, b]) if self.tree.name(*a) == "testfalse" => Ok(Expr::And(
                Box::new(self.cond(*a)?),
                Box::new(self.cond(*b)?),
            )),
            ("testfalse", [a, b, _]) => Ok(Expr::Or(
                Box::new(self.cond(*a)?),
                Box::new(self.cond(*b)?),
            )),
            ("testfalse" | "testtrue", [e, jump]) => {
                let e = self.expr(*e)?;
                let if_true = self.token(*jump)?.kind == "POP_JUMP_IF_TRUE";
                let negate = if name == "testfalse" { if_true } else { !if_true };
                Ok(if negate { e.not() } else { e })
            }
            _ => Err(self.err(id, "unrecognized test")),
        }
    }

    // Expressions

    fn binary_op(&self, id: NodeId) -> Result<BinaryOp, DecompileError> {
        let op = self.nth(id, 0)?;
        BinaryOp::from_kind(&self.token(op)?.kind)
            .ok_or_else(|| self.err(id, "unknown binary operator"))
    }

    fn expr(&self, id: NodeId) -> Result<Expr, DecompileError> {
        match self.tree.name(id) {
            "expr" => {}
            "pos_arg" | "star_arg" | "dstar_arg" | "pos_default" | "closure" | "kw_value"
            | "defaults_tuple" | "kwdefaults_map" | "annotation" | "annotations_map" => {
                return self.expr_at(id, 0);
            }
            other => return Err(self.err(id, format!("{other} is not an expression"))),
        }
        let e = self.nth(id, 0)?;
        if self.tree.token(e).is_some() {
            let token = self.token(e)?;
            return match token.value {
                ArgValue::Const(ref c) => Ok(Expr::Constant(c.clone())),
                _ => Ok(Expr::Name(self.name_of(e)?)),
            };
        }
        let boxed = |i: usize| self.expr_at(e, i).map(Box::new);
        let expr = match self.tree.name(e) {
            "attribute" => Expr::Attribute(boxed(0)?, self.name_of(self.nth(e, 1)?)?),
            "subscript" => Expr::Subscript(boxed(0)?, boxed(1)?),
            "binary_expr" => Expr::Binary(self.binary_op(self.nth(e, 2)?)?, boxed(0)?, boxed(1)?),
            "unary_expr" => {
                let op_node = self.nth(e, 1)?;
                let op = self.nth(op_node, 0)?;
                let op = UnaryOp::from_kind(&self.token(op)?.kind)
                    .ok_or_else(|| self.err(op_node, "unknown unary operator"))?;
                Expr::Unary(op, boxed(0)?)
            }
            "compare" => {
                let op = self.nth(e, 2)?;
                match self.token(op)?.value {
                    ArgValue::Compare(c) if c != CompareOp::ExceptionMatch => Expr::Compare(c, boxed(0)?, boxed(1)?),
                    _ => return Err(self.err(op, "unsupported comparison")),
                }
            }
            "and" => Expr::And(boxed(0)?, boxed(2)?),
            "or" => Expr::Or(boxed(0)?, boxed(2)?),
            "and_or" => Expr::Or(Box::new(Expr::And(boxed(0)?, boxed(2)?)), boxed(5)?),
            "or_and" => Expr::And(Box::new(Expr::Or(boxed(0)?, boxed(2)?)), boxed(5)?),
            "ifexp" => Expr::IfExp {
                test: Box::new(self.cond(self.nth(e, 0)?)?),
                body: boxed(1)?,
                orelse: boxed(4)?,
            },
            "call" => self.call(e)?,
            "tuple" => Expr::Tuple(self.operands(e)?),
            "list" => Expr::List(self.operands(e)?),
            "set" => Expr::Set(self.operands(e)?),
            "dict" => self.dict(e)?,
            "slice" => {
                let part = |x: Expr| (!x.is_none()).then(|| Box::new(x));
                let mut parts = self.operands(e)?.into_iter();
                let lower = parts.next().and_then(part);
                let upper = parts.next().and_then(part);
                let step = parts.next().and_then(part);
                Expr::Slice(lower, upper, step)
            }
            "lambda" => {
                let parts = self.function_parts(e)?;
                let Lowered::Lambda(body) = self.nested_body(e, parts.index)? else {
                    return Err(self.err(e, "lambda body is not an expression"));
                };
                let body = Box::new(body.clone());
                Expr::Lambda {
                    params: Box::new(self.params(e, parts)?.0),
                    body,
                }
            }
            "listcomp" => {
                let parts = self.function_parts(e)?;
                let Lowered::Comprehension {
                    element,
                    target,
                    condition,
                } = self.nested_body(e, parts.index)?
                else {
                    return Err(self.err(e, "not a comprehension body"));
                };
                let iter = self
                    .tree
                    .children(e)
                    .iter()
                    .find(|c| self.tree.name(**c) == "expr")
                    .ok_or_else(|| self.err(e, "no iterable"))?;
                Expr::ListComp {
                    element: Box::new(element.clone()),
                    target: Box::new(target.clone()),
                    iter: Box::new(self.expr(*iter)?),
                    condition: condition.clone().map(Box::new),
                }
            }
            "formatted_value" => self.formatted_value(e)?,
            "joined_str" => {
                let kids = self.tree.children(e);
                let parts = kids[..kids.len().saturating_sub(1)]
                    .iter()
                    .map(|p| {
                        let inner = self.nth(*p, 0)?;
                        match self.tree.name(inner) {
                            "formatted_value" => self.formatted_value(inner),
                            _ => Ok(Expr::Constant(self.constant_of(inner)?.clone())),
                        }
                    })
                    .collect::<Result<_, _>>()?;
                Expr::JoinedStr(parts)
            }
            other => return Err(self.err(e, format!("no expression form for {other}"))),
        };
        Ok(expr)
    }

    /// The `expr` operands in front of a closing arity-bearing token.
    fn operands(&self, id: NodeId) -> Result<Vec<Expr>, DecompileError> {
        self.tree
            .children(id)
            .iter()
            .filter(|c| self.tree.name(**c) == "expr")
            .map(|c| self.expr(*c))
            .collect()
    }

    fn formatted_value(&self, id: NodeId) -> Result<Expr, DecompileError> {
        let kids = self.tree.children(id);
        let format = self.token(*kids.last().ok_or_else(|| self.err(id, "empty"))?)?;
        let conversion = Conversion::from_arg(format.arg.unwrap_or_default());
        let spec = match kids.len() {
            3 => Some(Box::new(self.expr_at(id, 1)?)),
            _ => None,
        };
        Ok(Expr::FormattedValue {
            value: Box::new(self.expr_at(id, 0)?),
            conversion,
            spec,
        })
    }

    fn dict(&self, id: NodeId) -> Result<Expr, DecompileError> {
        let mut pairs = vec![];
        let mut values = vec![];
        for c in self.tree.children(id) {
            let c = *c;
            match self.tree.name(c) {
                // Pushed value first, then key.
                "dict_entry" => pairs.push((self.expr_at(c, 1)?, self.expr_at(c, 0)?)),
                "dict_pair" => pairs.push((self.expr_at(c, 0)?, self.expr_at(c, 1)?)),
                "expr" => values.push(self.expr(c)?),
                "LOAD_CONST_KEYS" => {
                    let keys = self
                        .constant_of(c)?
                        .as_tuple()
                        .ok_or_else(|| self.err(c, "keys are not a tuple"))?;
                    if keys.len() != values.len() {
                        return Err(self.err(id, "key count does not match values"));
                    }
                    pairs.extend(
                        keys.iter()
                            .cloned()
                            .map(Expr::Constant)
                            .zip(values.drain(..)),
                    );
                }
                _ => {}
            }
        }
        Ok(Expr::Dict(pairs))
    }

    fn call(&self, id: NodeId) -> Result<Expr, DecompileError> {
        let kids = self.tree.children(id);
        let last = *kids.last().ok_or_else(|| self.err(id, "empty call"))?;
        let variant = self
            .token(last)?
            .variant
            .ok_or_else(|| self.err(last, "call without arity"))?;
        let mut func = self.expr_at(id, 0)?;
        let mut positional = vec![];
        let mut star = None;
        let mut keywords = vec![];
        let mut dstar = None;
        let operands = &kids[1..kids.len() - 1];
        match variant {
            OpVariant::Call { .. } | OpVariant::KeywordCall { .. } | OpVariant::MethodCall { .. } => {
                let mut kw_values = vec![];
                for c in operands {
                    let c = *c;
                    match self.tree.name(c) {
                        "pos_arg" => positional.push(Arg::Positional(self.expr(c)?)),
                        "star_arg" => star = Some(Arg::Star(self.expr(c)?)),
                        "kwarg" => keywords.push(Arg::Keyword(
                            self.str_of(self.nth(c, 0)?)?,
                            self.expr_at(c, 1)?,
                        )),
                        "dstar_arg" => dstar = Some(Arg::DoubleStar(self.expr(c)?)),
                        "kw_value" => kw_values.push(self.expr(c)?),
                        "LOAD_KWNAMES" => {
                            let names = self
                                .constant_of(c)?
                                .as_tuple()
                                .ok_or_else(|| self.err(c, "keyword names are not a tuple"))?;
                            if names.len() != kw_values.len() {
                                return Err(self.err(id, "keyword count does not match names"));
                            }
                            for (name, value) in names.iter().zip(kw_values.drain(..)) {
                                let name = name
                                    .as_str()
                                    .ok_or_else(|| self.err(c, "keyword name is not a string"))?;
                                keywords.push(Arg::Keyword(name.to_string(), value));
                            }
                        }
                        "LOAD_METHOD" => func = Expr::Attribute(Box::new(func), self.name_of(c)?),
                        other => return Err(self.err(c, format!("unexpected {other} in a call"))),
                    }
                }
            }
            OpVariant::ExtendedCall { dstar: has_kwargs } => {
                for c in operands {
                    match self.tree.name(*c) {
                        "ex_args" => positional = self.spread_positional(*c, has_kwargs)?,
                        "ex_kwargs" => keywords = self.spread_keywords(*c)?,
                        other => return Err(self.err(*c, format!("unexpected {other} in a call"))),
                    }
                }
            }
            other => return Err(self.err(last, format!("{other} is not a call"))),
        }
        let args = positional
            .into_iter()
            .chain(star)
            .chain(keywords)
            .chain(dstar)
            .collect();
        Ok(Expr::Call {
            func: Box::new(func),
            args,
        })
    }

    /// Operand expressions of an optional `*_UNPACK_WITH_CALL` wrapper.
    fn unpack_parts(&self, id: NodeId) -> Result<Vec<Expr>, DecompileError> {
        let inner = self.nth(id, 0)?;
        match self.tree.name(inner) {
            "tuple_unpack_call" | "map_unpack_call" => self.operands(inner),
            _ => Ok(vec![self.expr(inner)?]),
        }
    }

    /// Positional arguments of `CALL_FUNCTION_EX`. Tuple displays are runs of plain
    /// arguments; anything else was starred.
    fn spread_positional(&self, id: NodeId, has_kwargs: bool) -> Result<Vec<Arg>, DecompileError> {
        let parts = self.unpack_parts(id)?;
        let starred = |e: &Expr| !matches!(e, Expr::Tuple(_) | Expr::Constant(Constant::Tuple(_)));
        let any_starred = parts.iter().any(starred);
        let count = parts.len();
        let mut args = vec![];
        for (i, part) in parts.into_iter().enumerate() {
            // Without a starred part or keywords the call would not be extended, so the
            // last tuple was written starred.
            let force_star = !any_starred && !has_kwargs && i + 1 == count;
            match part {
                e if force_star => args.push(Arg::Star(e)),
                Expr::Tuple(items) => args.extend(items.into_iter().map(Arg::Positional)),
                Expr::Constant(Constant::Tuple(items)) => args.extend(
                    items
                        .into_iter()
                        .map(|c| Arg::Positional(Expr::Constant(c))),
                ),
                e => args.push(Arg::Star(e)),
            }
        }
        Ok(args)
    }

    /// Keyword arguments of `CALL_FUNCTION_EX`. Dict displays keyed by identifiers are runs of
    /// plain keywords; anything else was double-starred.
    fn spread_keywords(&self, id: NodeId) -> Result<Vec<Arg>, DecompileError> {
        let mut args = vec![];
        for part in self.unpack_parts(id)? {
            match part {
                Expr::Dict(pairs)
                    if pairs
                        .iter()
                        .all(|(k, _)| k.as_str().is_some_and(is_identifier)) =>
                {
                    for (k, v) in pairs {
                        if let Some(name) = k.as_str() {
                            args.push(Arg::Keyword(name.to_string(), v));
                        }
                    }
                }
                e => args.push(Arg::DoubleStar(e)),
            }
        }
        Ok(args)
    }
}
