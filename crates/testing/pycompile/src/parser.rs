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

//! Python source to syntax tree: the pest grammar in `python.pest` recognizes the text, and a
//! `TreeTransformer` walks its pairs into `ast` nodes, checking what the grammar leaves open.

use std::cell::Cell;
use std::collections::VecDeque;

use ahash::AHashSet;
use itertools::Itertools;
pub use pest::Parser as PestParser;
use pest::error::LineColLocation;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use unpyc_bytecode::{CompareOp, Constant, Version};

use crate::ast::{
    Alias, Arguments, BinaryOp, BoolOp, Expr, Keyword, MODULE_SCOPE, Module, ScopeId, Stmt,
    StmtNode, UnaryOp,
};
use crate::error::CompileError;
use crate::literal::{Literal, decode_literal, unescape_str};
use crate::parser::python::{PythonParser, Rule};

pub mod python {
    #[derive(Parser)]
    #[grammar = "src/python.pest"]
    pub struct PythonParser;
}

pub fn parse_module(source: &str, version: Version) -> Result<Module, CompileError> {
    let source = source.replace("\r\n", "\n");
    let pairs = PythonParser::parse(Rule::program, &source).map_err(|e| syntax_error(e, 0))?;
    TreeTransformer::new(version).transform_program(pairs)
}

fn syntax_error(e: pest::error::Error<Rule>, line_offset: usize) -> CompileError {
    let (line, column) = match e.line_col {
        LineColLocation::Pos(lc) => lc,
        LineColLocation::Span(begin, _) => begin,
    };
    CompileError::ParseError {
        line: line + line_offset,
        column,
        message: e.variant.message().to_string(),
    }
}

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.line_col().0
}

fn syntax_at((line, column): (usize, usize), message: impl Into<String>) -> CompileError {
    CompileError::ParseError {
        line,
        column,
        message: message.into(),
    }
}

fn syntax(pair: &Pair<Rule>, message: impl Into<String>) -> CompileError {
    syntax_at(pair.line_col(), message)
}

fn unexpected(pair: &Pair<Rule>) -> CompileError {
    syntax(pair, format!("unexpected {:?}", pair.as_rule()))
}

/// The children of one pair, without end-of-input markers.
struct Children<'i> {
    pairs: VecDeque<Pair<'i, Rule>>,
    position: (usize, usize),
}

impl<'i> Children<'i> {
    fn of(pair: Pair<'i, Rule>) -> Self {
        let position = pair.line_col();
        let pairs = pair
            .into_inner()
            .filter(|p| p.as_rule() != Rule::EOI)
            .collect();
        Self { pairs, position }
    }

    /// The next child, which the grammar guarantees.
    fn child(&mut self) -> Result<Pair<'i, Rule>, CompileError> {
        self.pairs
            .pop_front()
            .ok_or_else(|| syntax_at(self.position, "incomplete syntax tree"))
    }

    fn next_if(&mut self, rule: Rule) -> Option<Pair<'i, Rule>> {
        if self.pairs.front().is_some_and(|p| p.as_rule() == rule) {
            return self.pairs.pop_front();
        }
        None
    }
}

impl<'i> Iterator for Children<'i> {
    type Item = Pair<'i, Rule>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pairs.pop_front()
    }
}

fn check_target(target: &Expr, line: usize) -> Result<(), CompileError> {
    match target {
        Expr::Name(_) | Expr::Attribute(..) | Expr::Subscript(..) => Ok(()),
        Expr::Tuple(elts) | Expr::List(elts) => elts.iter().try_for_each(|e| match e {
            Expr::Starred(inner) => check_target(inner, line),
            e => check_target(e, line),
        }),
        _ => Err(CompileError::InvalidAssignment { line }),
    }
}

fn is_single_target(target: &Expr) -> bool {
    matches!(
        target,
        Expr::Name(_) | Expr::Attribute(..) | Expr::Subscript(..)
    )
}

fn dotted_text(pair: Pair<Rule>) -> String {
    pair.into_inner().map(|p| p.as_str()).join(".")
}

fn alias(pair: Pair<Rule>) -> Result<Alias, CompileError> {
    let rule = pair.as_rule();
    let mut parts = Children::of(pair);
    let name = parts.child()?;
    let name = match rule {
        Rule::dotted_as_name => dotted_text(name),
        _ => name.as_str().to_string(),
    };
    Ok(Alias {
        name,
        asname: parts.next().map(|p| p.as_str().to_string()),
    })
}

fn push_literal(parts: &mut Vec<Expr>, s: String) {
    if s.is_empty() {
        return;
    }
    if let Some(Expr::Constant(Constant::Str(last))) = parts.last_mut() {
        last.push_str(&s);
        return;
    }
    parts.push(Expr::Constant(Constant::Str(s)));
}

pub struct TreeTransformer {
    version: Version,
    /// A nested scope is numbered once its body has been built, so inner scopes come first.
    next_scope: Cell<ScopeId>,
}

impl TreeTransformer {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            next_scope: Cell::new(MODULE_SCOPE + 1),
        }
    }

    fn new_scope(&self) -> ScopeId {
        let id = self.next_scope.get();
        self.next_scope.set(id + 1);
        id
    }

    pub fn transform_program(&self, pairs: Pairs<Rule>) -> Result<Module, CompileError> {
        let mut body = vec![];
        for pair in pairs {
            if pair.as_rule() == Rule::program {
                body = self.parse_statements(pair.into_inner())?;
            }
        }
        Ok(Module { body })
    }

    fn parse_statements(&self, pairs: Pairs<Rule>) -> Result<Vec<Stmt>, CompileError> {
        let mut body = vec![];
        for pair in pairs {
            match pair.as_rule() {
                Rule::EOI => {}
                Rule::simple_line => {
                    for small in pair.into_inner().filter(|p| p.as_rule() != Rule::EOI) {
                        body.push(self.parse_small_statement(small)?);
                    }
                }
                _ => body.push(self.parse_compound_statement(pair)?),
            }
        }
        Ok(body)
    }

    fn parse_block(&self, pair: Pair<Rule>) -> Result<Vec<Stmt>, CompileError> {
        self.parse_statements(pair.into_inner())
    }

    fn parse_compound_statement(&self, pair: Pair<Rule>) -> Result<Stmt, CompileError> {
        let line = line_of(&pair);
        let rule = pair.as_rule();
        if matches!(rule, Rule::funcdef | Rule::classdef) {
            return self.parse_definition(pair, vec![], line);
        }
        let mut parts = Children::of(pair);
        let node = match rule {
            Rule::if_stmt => {
                let test = self.parse_expression(parts.child()?)?;
                let body = self.parse_block(parts.child()?)?;
                let orelse = self.parse_if_tail(parts)?;
                StmtNode::If { test, body, orelse }
            }
            Rule::while_stmt => {
                let test = self.parse_expression(parts.child()?)?;
                let body = self.parse_block(parts.child()?)?;
                let orelse = self.parse_else(parts)?;
                StmtNode::While { test, body, orelse }
            }
            Rule::for_stmt => {
                let target = self.parse_expression(parts.child()?)?;
                check_target(&target, line)?;
                let iter = self.parse_expression(parts.child()?)?;
                let body = self.parse_block(parts.child()?)?;
                let orelse = self.parse_else(parts)?;
                StmtNode::For {
                    target,
                    iter,
                    body,
                    orelse,
                }
            }
            Rule::decorated => {
                let mut decorators = vec![];
                while let Some(decorator) = parts.next_if(Rule::decorator) {
                    decorators.push(self.parse_decorator(decorator)?);
                }
                return self.parse_definition(parts.child()?, decorators, line);
            }
            Rule::unsupported_block => {
                let keyword = parts.child()?.as_str();
                return Err(CompileError::unsupported(
                    line,
                    format!("'{keyword}' statement"),
                ));
            }
            _ => return Err(syntax_at(parts.position, format!("unexpected {rule:?}"))),
        };
        Ok(Stmt { node, line })
    }

    fn parse_else(&self, mut parts: Children) -> Result<Vec<Stmt>, CompileError> {
        match parts.next_if(Rule::else_clause) {
            Some(clause) => self.parse_block(Children::of(clause).child()?),
            None => Ok(vec![]),
        }
    }

    /// The `elif` and `else` clauses of an `if`, nested the way `orelse` nests them.
    fn parse_if_tail(&self, parts: Children) -> Result<Vec<Stmt>, CompileError> {
        let mut elifs = vec![];
        let mut orelse = vec![];
        for clause in parts {
            match clause.as_rule() {
                Rule::elif_clause => {
                    let line = line_of(&clause);
                    let mut pieces = Children::of(clause);
                    let test = self.parse_expression(pieces.child()?)?;
                    let body = self.parse_block(pieces.child()?)?;
                    elifs.push((line, test, body));
                }
                Rule::else_clause => orelse = self.parse_block(Children::of(clause).child()?)?,
                _ => return Err(unexpected(&clause)),
            }
        }
        for (line, test, body) in elifs.into_iter().rev() {
            orelse = vec![Stmt {
                node: StmtNode::If { test, body, orelse },
                line,
            }];
        }
        Ok(orelse)
    }

    fn parse_decorator(&self, pair: Pair<Rule>) -> Result<Expr, CompileError> {
        let mut parts = Children::of(Children::of(pair).child()?);
        let mut names = parts.child()?.into_inner();
        let first = names
            .next()
            .ok_or_else(|| syntax_at(parts.position, "expected a decorator name"))?;
        let mut decorator = Expr::Name(first.as_str().to_string());
        for name in names {
            decorator = Expr::Attribute(Box::new(decorator), name.as_str().to_string());
        }
        if let Some(call) = parts.next_if(Rule::call) {
            let (args, keywords) = self.parse_call(call)?;
            decorator = Expr::Call {
                func: Box::new(decorator),
                args,
                keywords,
            };
        }
        Ok(decorator)
    }

    fn parse_definition(
        &self,
        pair: Pair<Rule>,
        decorators: Vec<Expr>,
        line: usize,
    ) -> Result<Stmt, CompileError> {
        let rule = pair.as_rule();
        let mut parts = Children::of(pair);
        let name = parts.child()?.as_str().to_string();
        let node = match rule {
            Rule::funcdef => {
                let parameters = parts.child()?;
                let position = parameters.line_col();
                let mut args = self.parse_arguments(parameters.into_inner(), position)?;
                if let Some(returns) = parts.next_if(Rule::return_annotation) {
                    let annotation = self.parse_only_child(returns)?;
                    args.annotations.push(("return".to_string(), annotation));
                }
                let body = self.parse_block(parts.child()?)?;
                StmtNode::FunctionDef {
                    name,
                    args: Box::new(args),
                    body,
                    decorators,
                    scope: self.new_scope(),
                }
            }
            Rule::classdef => {
                let bases = match parts.next_if(Rule::call) {
                    Some(call) => {
                        let call_line = line_of(&call);
                        let (args, keywords) = self.parse_call(call)?;
                        if !keywords.is_empty() {
                            return Err(CompileError::unsupported(
                                call_line,
                                "class keyword arguments",
                            ));
                        }
                        if args.iter().any(|a| matches!(a, Expr::Starred(_))) {
                            return Err(CompileError::unsupported(
                                call_line,
                                "starred class bases",
                            ));
                        }
                        args
                    }
                    None => vec![],
                };
                let body = self.parse_block(parts.child()?)?;
                StmtNode::ClassDef {
                    name,
                    bases,
                    body,
                    decorators,
                    scope: self.new_scope(),
                }
            }
            _ => return Err(syntax_at(parts.position, format!("unexpected {rule:?}"))),
        };
        Ok(Stmt { node, line })
    }

    /// The parameters of a `def` or `lambda`; `position` is where the list starts.
    fn parse_arguments<'i>(
        &self,
        params: impl Iterator<Item = Pair<'i, Rule>>,
        position: (usize, usize),
    ) -> Result<Arguments, CompileError> {
        let mut args = Arguments::default();
        let mut star_seen = false;
        for param in params {
            if args.kwarg.is_some() {
                return Err(syntax(&param, "arguments cannot follow var-keyword argument"));
            }
            let here = param.line_col();
            let rule = param.as_rule();
            if matches!(
                rule,
                Rule::bare_star | Rule::varargs_param | Rule::lambda_varargs
            ) {
                if star_seen {
                    return Err(syntax_at(here, "duplicate '*' in parameters"));
                }
                star_seen = true;
                if rule == Rule::bare_star {
                    continue;
                }
            }
            let mut parts = Children::of(param);
            let name = parts.child()?.as_str().to_string();
            if let Some(annotation) = parts.next_if(Rule::annotation) {
                let annotation = self.parse_only_child(annotation)?;
                args.annotations.push((name.clone(), annotation));
            }
            let default = parts
                .next_if(Rule::default)
                .map(|d| self.parse_only_child(d))
                .transpose()?;
            match rule {
                Rule::varargs_param | Rule::lambda_varargs => args.vararg = Some(name),
                Rule::kwargs_param | Rule::lambda_kwargs => args.kwarg = Some(name),
                _ if star_seen => {
                    args.kwonly.push(name);
                    args.kw_defaults.push(default);
                }
                _ => {
                    args.args.push(name);
                    match default {
                        Some(d) => args.defaults.push(d),
                        None if !args.defaults.is_empty() => {
                            return Err(syntax_at(
                                here,
                                "non-default argument follows default argument",
                            ));
                        }
                        None => {}
                    }
                }
            }
        }
        if star_seen && args.vararg.is_none() && args.kwonly.is_empty() {
            return Err(syntax_at(position, "named arguments must follow bare *"));
        }
        let mut seen = AHashSet::new();
        if let Some(dup) = args.names().find(|n| !seen.insert(n.as_str())) {
            return Err(syntax_at(
                position,
                format!("duplicate argument '{dup}' in function definition"),
            ));
        }
        Ok(args)
    }

    fn parse_small_statement(&self, pair: Pair<Rule>) -> Result<Stmt, CompileError> {
        let line = line_of(&pair);
        let node = match pair.as_rule() {
            Rule::pass_stmt => StmtNode::Pass,
            Rule::break_stmt => StmtNode::Break,
            Rule::continue_stmt => StmtNode::Continue,
            Rule::return_stmt => StmtNode::Return(
                Children::of(pair)
                    .next()
                    .map(|value| self.parse_expression(value))
                    .transpose()?,
            ),
            Rule::global_stmt => {
                StmtNode::Global(pair.into_inner().map(|p| p.as_str().to_string()).collect())
            }
            Rule::nonlocal_stmt => {
                StmtNode::Nonlocal(pair.into_inner().map(|p| p.as_str().to_string()).collect())
            }
            Rule::import_name => {
                StmtNode::Import(pair.into_inner().map(alias).collect::<Result<_, _>>()?)
            }
            Rule::import_from => self.parse_import_from(pair)?,
            Rule::unsupported_stmt => {
                let keyword = Children::of(pair).child()?.as_str();
                return Err(CompileError::unsupported(
                    line,
                    format!("'{keyword}' statement"),
                ));
            }
            Rule::expr_stmt => self.parse_expr_statement(pair)?,
            _ => return Err(unexpected(&pair)),
        };
        Ok(Stmt { node, line })
    }

    fn parse_import_from(&self, pair: Pair<Rule>) -> Result<StmtNode, CompileError> {
        let position = pair.line_col();
        let mut parts = Children::of(pair);
        let level = parts.child()?.as_str().len();
        let module = parts.next_if(Rule::dotted_name).map(dotted_text);
        if module.is_none() && level == 0 {
            return Err(syntax_at(position, "expected a module name"));
        }
        let names = if parts.next_if(Rule::import_star).is_some() {
            vec![Alias {
                name: "*".to_string(),
                asname: None,
            }]
        } else {
            parts.map(alias).collect::<Result<_, _>>()?
        };
        Ok(StmtNode::ImportFrom {
            module,
            names,
            level: level as u32,
        })
    }

    fn parse_expr_statement(&self, pair: Pair<Rule>) -> Result<StmtNode, CompileError> {
        let line = line_of(&pair);
        let mut parts = Children::of(pair);
        let first = parts.child()?;
        let parenthesized = first.as_str().starts_with('(');
        let first = self.parse_expression(first)?;

        if let Some(annassign) = parts.next_if(Rule::annassign) {
            if self.version < Version::V3_6 {
                return Err(syntax(&annassign, "variable annotations need Python 3.6"));
            }
            if !is_single_target(&first) {
                return Err(CompileError::InvalidAssignment { line });
            }
            let simple = matches!(first, Expr::Name(_)) && !parenthesized;
            let mut pieces = Children::of(annassign);
            let annotation = self.parse_expression(pieces.child()?)?;
            let value = pieces
                .next()
                .map(|v| self.parse_expression(v))
                .transpose()?;
            return Ok(StmtNode::AnnAssign {
                target: first,
                annotation,
                value,
                simple,
            });
        }

        if let Some(augassign) = parts.next_if(Rule::augassign) {
            let mut pieces = Children::of(augassign);
            let augop = pieces.child()?;
            let op = augop
                .as_str()
                .strip_suffix('=')
                .and_then(BinaryOp::from_token)
                .ok_or_else(|| unexpected(&augop))?;
            if op == BinaryOp::MatMul && self.version < Version::V3_5 {
                return Err(syntax(&augop, "'@=' needs Python 3.5"));
            }
            if !is_single_target(&first) {
                return Err(CompileError::InvalidAssignment { line });
            }
            let value = self.parse_expression(pieces.child()?)?;
            return Ok(StmtNode::AugAssign {
                target: first,
                op,
                value,
            });
        }

        let mut exprs = vec![first];
        for assignment in parts {
            exprs.push(self.parse_only_child(assignment)?);
        }
        let Some(value) = exprs.pop() else {
            return Err(CompileError::ParseError {
                line,
                column: 0,
                message: "expected an expression".to_string(),
            });
        };
        if exprs.is_empty() {
            return Ok(StmtNode::Expr(value));
        }
        for target in &exprs {
            check_target(target, line)?;
        }
        Ok(StmtNode::Assign {
            targets: exprs,
            value,
        })
    }

    fn parse_only_child(&self, pair: Pair<Rule>) -> Result<Expr, CompileError> {
        self.parse_expression(Children::of(pair).child()?)
    }

    fn parse_expression(&self, pair: Pair<Rule>) -> Result<Expr, CompileError> {
        match pair.as_rule() {
            Rule::test => {
                let mut parts = Children::of(pair);
                let body = self.parse_expression(parts.child()?)?;
                let Some(test) = parts.next() else {
                    return Ok(body);
                };
                let test = self.parse_expression(test)?;
                let orelse = self.parse_expression(parts.child()?)?;
                Ok(Expr::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                })
            }
            Rule::or_test => self.parse_bool_op(pair, BoolOp::Or),
            Rule::and_test => self.parse_bool_op(pair, BoolOp::And),
            Rule::not_test => {
                let mut parts = Children::of(pair);
                let first = parts.child()?;
                if first.as_rule() != Rule::not_op {
                    return self.parse_expression(first);
                }
                let operand = self.parse_expression(parts.child()?)?;
                Ok(Expr::UnaryOp(UnaryOp::Not, Box::new(operand)))
            }
            Rule::comparison => self.parse_comparison(pair),
            Rule::expr => self.parse_expr(pair.into_inner()),
            Rule::star_expr => Ok(Expr::Starred(Box::new(self.parse_only_child(pair)?))),
            Rule::lambdef => self.parse_lambda(pair),
            Rule::testlist
            | Rule::testlist_star_expr
            | Rule::target_list
            | Rule::star_items
            | Rule::subscript_list => self.parse_sequence(pair),
            Rule::index => self.parse_index(pair),
            Rule::yield_expr => Err(CompileError::unsupported(
                line_of(&pair),
                "yield expression",
            )),
            _ => self.parse_atom(pair),
        }
    }

    fn parse_bool_op(&self, pair: Pair<Rule>, op: BoolOp) -> Result<Expr, CompileError> {
        let mut values: Vec<Expr> = pair
            .into_inner()
            .map(|p| self.parse_expression(p))
            .collect::<Result<_, _>>()?;
        if values.len() == 1 {
            if let Some(value) = values.pop() {
                return Ok(value);
            }
        }
        Ok(Expr::BoolOp(op, values))
    }

    fn parse_comparison(&self, pair: Pair<Rule>) -> Result<Expr, CompileError> {
        let mut parts = Children::of(pair);
        let left = self.parse_expression(parts.child()?)?;
        let mut ops = vec![];
        while let Some(op) = parts.next() {
            let words = op.as_str().split_whitespace().collect::<Vec<_>>();
            let op = match words.as_slice() {
                ["<"] => CompareOp::Lt,
                ["<="] => CompareOp::Le,
                ["=="] => CompareOp::Eq,
                ["!="] => CompareOp::Ne,
                [">"] => CompareOp::Gt,
                [">="] => CompareOp::Ge,
                ["in"] => CompareOp::In,
                ["not", "in"] => CompareOp::NotIn,
                ["is"] => CompareOp::Is,
                ["is", "not"] => CompareOp::IsNot,
                _ => return Err(unexpected(&op)),
            };
            ops.push((op, self.parse_expression(parts.child()?)?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare(Box::new(left), ops))
    }

    /// Arithmetic and bitwise operators, lowest binding first.
    fn parse_expr(&self, pairs: Pairs<Rule>) -> Result<Expr, CompileError> {
        let pratt = PrattParser::new()
            .op(Op::infix(Rule::bit_or, Assoc::Left))
            .op(Op::infix(Rule::bit_xor, Assoc::Left))
            .op(Op::infix(Rule::bit_and, Assoc::Left))
            .op(Op::infix(Rule::lshift, Assoc::Left) | Op::infix(Rule::rshift, Assoc::Left))
            .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
            .op(Op::infix(Rule::mul, Assoc::Left)
                | Op::infix(Rule::matmul, Assoc::Left)
                | Op::infix(Rule::div, Assoc::Left)
                | Op::infix(Rule::floordiv, Assoc::Left)
                | Op::infix(Rule::modulo, Assoc::Left))
            .op(Op::prefix(Rule::neg) | Op::prefix(Rule::pos) | Op::prefix(Rule::invert))
            .op(Op::infix(Rule::pow, Assoc::Right));

        pratt
            .map_primary(|primary| match primary.as_rule() {
                Rule::atom_expr => self.parse_atom_expr(primary),
                Rule::await_expr => Err(CompileError::unsupported(
                    line_of(&primary),
                    "await expression",
                )),
                _ => Err(unexpected(&primary)),
            })
            .map_prefix(|op, rhs| {
                let op = match op.as_rule() {
                    Rule::neg => UnaryOp::Neg,
                    Rule::pos => UnaryOp::Pos,
                    Rule::invert => UnaryOp::Invert,
                    _ => return Err(unexpected(&op)),
                };
                Ok(Expr::UnaryOp(op, Box::new(rhs?)))
            })
            .map_infix(|lhs, op, rhs| {
                if op.as_rule() == Rule::matmul && self.version < Version::V3_5 {
                    return Err(syntax(&op, "'@' needs Python 3.5"));
                }
                let binop = BinaryOp::from_token(op.as_str()).ok_or_else(|| unexpected(&op))?;
                Ok(Expr::BinOp(binop, Box::new(lhs?), Box::new(rhs?)))
            })
            .parse(pairs)
    }

    fn parse_atom_expr(&self, pair: Pair<Rule>) -> Result<Expr, CompileError> {
        let mut parts = Children::of(pair);
        let mut expr = self.parse_atom(parts.child()?)?;
        for trailer in parts {
            expr = match trailer.as_rule() {
                Rule::call => {
                    let (args, keywords) = self.parse_call(trailer)?;
                    Expr::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    }
                }
                Rule::subscription => {
                    Expr::Subscript(Box::new(expr), Box::new(self.parse_only_child(trailer)?))
                }
                Rule::attribute => {
                    let name = Children::of(trailer).child()?.as_str().to_string();
                    Expr::Attribute(Box::new(expr), name)
                }
                _ => return Err(unexpected(&trailer)),
            };
        }
        Ok(expr)
    }

    /// Arguments of a call, checked the way the targeted version's grammar checks them.
    fn parse_call(&self, pair: Pair<Rule>) -> Result<(Vec<Expr>, Vec<Keyword>), CompileError> {
        let mut args = vec![];
        let mut keywords: Vec<Keyword> = vec![];
        let Some(arglist) = Children::of(pair).next() else {
            return Ok((args, keywords));
        };
        let legacy = self.version < Version::V3_5;
        let mut star_seen = false;
        for argument in arglist.into_inner() {
            let here = argument.line_col();
            let dstar_seen = keywords.iter().any(|k| k.arg.is_none());
            match argument.as_rule() {
                Rule::kwargs_arg => {
                    if legacy && dstar_seen {
                        return Err(syntax_at(here, "only one ** argument is allowed"));
                    }
                    keywords.push(Keyword {
                        arg: None,
                        value: self.parse_only_child(argument)?,
                    });
                }
                Rule::star_arg => {
                    if dstar_seen {
                        return Err(syntax_at(
                            here,
                            "iterable argument unpacking follows keyword argument unpacking",
                        ));
                    }
                    if legacy && star_seen {
                        return Err(syntax_at(here, "only one * argument is allowed"));
                    }
                    star_seen = true;
                    args.push(Expr::Starred(Box::new(self.parse_only_child(argument)?)));
                }
                Rule::keyword_arg => {
                    if legacy && dstar_seen {
                        return Err(syntax_at(here, "keyword argument follows ** argument"));
                    }
                    let mut parts = Children::of(argument);
                    let name = parts.child()?.as_str().to_string();
                    if keywords.iter().any(|k| k.arg.as_deref() == Some(name.as_str())) {
                        return Err(syntax_at(here, format!("keyword argument repeated: {name}")));
                    }
                    keywords.push(Keyword {
                        arg: Some(name),
                        value: self.parse_expression(parts.child()?)?,
                    });
                }
                Rule::positional_arg => {
                    let mut parts = Children::of(argument);
                    let value = parts.child()?;
                    if parts.next_if(Rule::comp_for).is_some() {
                        return Err(CompileError::unsupported(here.0, "generator expression"));
                    }
                    if !keywords.is_empty() {
                        return Err(syntax_at(here, "positional argument follows keyword argument"));
                    }
                    if legacy && star_seen {
                        return Err(syntax_at(here, "only named arguments may follow *expression"));
                    }
                    args.push(self.parse_expression(value)?);
                }
                _ => return Err(unexpected(&argument)),
            }
        }
        Ok((args, keywords))
    }

    fn parse_lambda(&self, pair: Pair<Rule>) -> Result<Expr, CompileError> {
        let position = pair.line_col();
        let mut params = pair.into_inner().collect::<Vec<_>>();
        let body = params
            .pop()
            .ok_or_else(|| syntax_at(position, "expected a lambda body"))?;
        let args = self.parse_arguments(params.into_iter(), position)?;
        let body = self.parse_expression(body)?;
        Ok(Expr::Lambda {
            args: Box::new(args),
            body: Box::new(body),
            scope: self.new_scope(),
        })
    }

    /// Comma-separated items; a trailing comma or more than one item makes a tuple.
    fn parse_sequence(&self, pair: Pair<Rule>) -> Result<Expr, CompileError> {
        let (mut items, trailing_comma) = self.parse_items(pair)?;
        if items.len() == 1 && !trailing_comma {
            if let Some(item) = items.pop() {
                return Ok(item);
            }
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_items(&self, pair: Pair<Rule>) -> Result<(Vec<Expr>, bool), CompileError> {
        let mut items = vec![];
        let mut trailing_comma = false;
        for item in pair.into_inner() {
            match item.as_rule() {
                Rule::trailing_comma => trailing_comma = true,
                _ => items.push(self.parse_expression(item)?),
            }
        }
        Ok((items, trailing_comma))
    }

    fn parse_index(&self, pair: Pair<Rule>) -> Result<Expr, CompileError> {
        let position = pair.line_col();
        let mut parts = Children::of(pair);
        let first = parts.child()?;
        let (lower, tail) = if first.as_rule() == Rule::slice_tail {
            (None, Some(first))
        } else {
            (Some(self.parse_expression(first)?), parts.next())
        };
        let Some(tail) = tail else {
            return lower.ok_or_else(|| syntax_at(position, "expected a subscript"));
        };
        let mut upper = None;
        let mut step = None;
        for bound in tail.into_inner() {
            match bound.as_rule() {
                Rule::slice_upper => upper = Some(Box::new(self.parse_only_child(bound)?)),
                Rule::slice_step => step = Some(Box::new(self.parse_only_child(bound)?)),
                _ => return Err(unexpected(&bound)),
            }
        }
        Ok(Expr::Slice(lower.map(Box::new), upper, step))
    }

    fn parse_comprehension(
        &self,
        pair: Pair<Rule>,
    ) -> Result<(Expr, Expr, Vec<Expr>), CompileError> {
        let line = line_of(&pair);
        let mut parts = Children::of(pair);
        let target = self.parse_expression(parts.child()?)?;
        check_target(&target, line)?;
        let iter = self.parse_expression(parts.child()?)?;
        let ifs = parts
            .map(|c| self.parse_only_child(c))
            .collect::<Result<_, _>>()?;
        Ok((target, iter, ifs))
    }

    fn parse_atom(&self, pair: Pair<Rule>) -> Result<Expr, CompileError> {
        let line = line_of(&pair);
        match pair.as_rule() {
            Rule::identifier => Ok(Expr::Name(pair.as_str().to_string())),
            Rule::none_lit => Ok(Expr::Constant(Constant::None)),
            Rule::true_lit => Ok(Expr::Constant(Constant::Bool(true))),
            Rule::false_lit => Ok(Expr::Constant(Constant::Bool(false))),
            Rule::ellipsis => Ok(Expr::Constant(Constant::Ellipsis)),
            Rule::decimal_integer => self.parse_integer(&pair, 10),
            Rule::hex_integer => self.parse_integer(&pair, 16),
            Rule::octal_integer => self.parse_integer(&pair, 8),
            Rule::binary_integer => self.parse_integer(&pair, 2),
            Rule::float => {
                let text = pair.as_str().replace('_', "");
                text.parse::<f64>()
                    .map(|f| Expr::Constant(Constant::Float(f)))
                    .map_err(|_| syntax(&pair, format!("invalid float literal {text:?}")))
            }
            Rule::imaginary => Err(CompileError::unsupported(line, "imaginary literal")),
            Rule::strings => self.parse_strings(pair),
            Rule::unterminated_string => Err(CompileError::StringLexError {
                line,
                message: "unterminated string literal".to_string(),
            }),
            Rule::paren => {
                let mut parts = Children::of(pair);
                let Some(inner) = parts.next() else {
                    return Ok(Expr::Tuple(vec![]));
                };
                if parts.next_if(Rule::comp_for).is_some() {
                    return Err(CompileError::unsupported(line, "generator expression"));
                }
                self.parse_expression(inner)
            }
            Rule::list => {
                let mut parts = Children::of(pair);
                let Some(items) = parts.next() else {
                    return Ok(Expr::List(vec![]));
                };
                let mut loops = parts.collect::<Vec<_>>();
                if loops.len() > 1 {
                    return Err(CompileError::unsupported(
                        line,
                        "comprehension with several loops",
                    ));
                }
                let position = items.line_col();
                let (mut elts, trailing_comma) = self.parse_items(items)?;
                let Some(comprehension) = loops.pop() else {
                    return Ok(Expr::List(elts));
                };
                let elt = match elts.pop() {
                    Some(elt) if elts.is_empty() && !trailing_comma => elt,
                    _ => return Err(syntax_at(position, "invalid list comprehension")),
                };
                let (target, iter, ifs) = self.parse_comprehension(comprehension)?;
                Ok(Expr::ListComp {
                    elt: Box::new(elt),
                    target: Box::new(target),
                    iter: Box::new(iter),
                    ifs,
                    scope: self.new_scope(),
                })
            }
            Rule::braces => {
                let mut parts = Children::of(pair);
                let Some(items) = parts.next() else {
                    return Ok(Expr::Dict(vec![]));
                };
                let comprehension = parts.next_if(Rule::comp_for).is_some();
                if items.as_rule() != Rule::dict_items {
                    if comprehension {
                        return Err(CompileError::unsupported(line, "set comprehension"));
                    }
                    return Ok(Expr::Set(self.parse_items(items)?.0));
                }
                if comprehension {
                    return Err(CompileError::unsupported(line, "dict comprehension"));
                }
                let mut entries = vec![];
                for item in items.into_inner() {
                    let rule = item.as_rule();
                    let mut pieces = Children::of(item);
                    let first = self.parse_expression(pieces.child()?)?;
                    entries.push(match rule {
                        Rule::dict_unpack => (None, first),
                        _ => (Some(first), self.parse_expression(pieces.child()?)?),
                    });
                }
                Ok(Expr::Dict(entries))
            }
            _ => Err(unexpected(&pair)),
        }
    }

    fn parse_integer(&self, pair: &Pair<Rule>, radix: u32) -> Result<Expr, CompileError> {
        let text = pair.as_str();
        let digits = if radix == 10 { text } else { &text[2..] };
        i64::from_str_radix(&digits.replace('_', ""), radix)
            .map(|i| Expr::Constant(Constant::Int(i)))
            .map_err(|_| CompileError::unsupported(line_of(pair), "integer literal out of range"))
    }

    /// Adjacent string literals, concatenated. Any f-string among them makes a `JoinedStr`.
    fn parse_strings(&self, pair: Pair<Rule>) -> Result<Expr, CompileError> {
        let position = pair.line_col();
        let mut bytes: Option<Vec<u8>> = None;
        let mut parts: Vec<Expr> = vec![];
        let mut formatted = false;
        let mut text_seen = false;
        for string in pair.into_inner() {
            let line = line_of(&string);
            let mut pieces = Children::of(string);
            let prefix = pieces.child()?.as_str();
            let body = pieces.child()?.as_str();
            match decode_literal(prefix, body, line)? {
                Literal::Bytes(b) => bytes.get_or_insert_with(Vec::new).extend(b),
                Literal::Str(s) => {
                    text_seen = true;
                    push_literal(&mut parts, s);
                }
                Literal::Formatted { body, raw } => {
                    if self.version < Version::V3_6 {
                        return Err(syntax_at(position, "f-strings need Python 3.6"));
                    }
                    text_seen = true;
                    formatted = true;
                    let chars: Vec<char> = body.chars().collect();
                    let mut i = 0;
                    for part in self.fstring_parts(&chars, &mut i, raw, false, line)? {
                        match part {
                            Expr::Constant(Constant::Str(s)) => push_literal(&mut parts, s),
                            other => parts.push(other),
                        }
                    }
                }
            }
        }
        match bytes {
            Some(_) if text_seen => Err(syntax_at(
                position,
                "cannot mix bytes and nonbytes literals",
            )),
            Some(b) => Ok(Expr::Constant(Constant::Bytes(b))),
            None if formatted
                && parts
                    .iter()
                    .any(|p| matches!(p, Expr::FormattedValue { .. })) =>
            {
                Ok(Expr::JoinedStr(parts))
            }
            None => Ok(Expr::Constant(Constant::Str(
                parts
                    .into_iter()
                    .filter_map(|p| match p {
                        Expr::Constant(Constant::Str(s)) => Some(s),
                        _ => None,
                    })
                    .collect(),
            ))),
        }
    }

    /// Literal text and replacement fields of an f-string body from `*i`. A format spec stops at
    /// its closing `}`, which is left for the caller.
    fn fstring_parts(
        &self,
        chars: &[char],
        i: &mut usize,
        raw: bool,
        in_spec: bool,
        line: usize,
    ) -> Result<Vec<Expr>, CompileError> {
        let mut parts = vec![];
        let mut literal = String::new();
        let flush = |literal: &mut String, parts: &mut Vec<Expr>| -> Result<(), CompileError> {
            if literal.is_empty() {
                return Ok(());
            }
            let text = if raw {
                std::mem::take(literal)
            } else {
                unescape_str(&std::mem::take(literal), line)?
            };
            push_literal(parts, text);
            Ok(())
        };
        while let Some(&c) = chars.get(*i) {
            match c {
                '{' if chars.get(*i + 1) == Some(&'{') && !in_spec => {
                    literal.push('{');
                    *i += 2;
                }
                '}' if in_spec => break,
                '}' if chars.get(*i + 1) == Some(&'}') => {
                    literal.push('}');
                    *i += 2;
                }
                '}' => return Err(fstring_error(line, "single '}' is not allowed")),
                '{' => {
                    flush(&mut literal, &mut parts)?;
                    *i += 1;
                    parts.push(self.fstring_field(chars, i, raw, line)?);
                }
                c => {
                    literal.push(c);
                    *i += 1;
                }
            }
        }
        flush(&mut literal, &mut parts)?;
        Ok(parts)
    }

    /// One replacement field after its `{`, through the closing `}`.
    fn fstring_field(
        &self,
        chars: &[char],
        i: &mut usize,
        raw: bool,
        line: usize,
    ) -> Result<Expr, CompileError> {
        let start = *i;
        let mut depth = 0usize;
        let mut quote = None;
        while let Some(&c) = chars.get(*i) {
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                }
                *i += 1;
                continue;
            }
            match c {
                '\\' => {
                    return Err(fstring_error(
                        line,
                        "expression part cannot include a backslash",
                    ));
                }
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' if depth > 0 => depth -= 1,
                '}' | ':' if depth == 0 => break,
                '!' if depth == 0 && chars.get(*i + 1) != Some(&'=') => break,
                _ => {}
            }
            *i += 1;
        }
        let text: String = chars[start..(*i).min(chars.len())].iter().collect();
        if text.trim().is_empty() {
            return Err(fstring_error(line, "empty expression not allowed"));
        }
        let value = self.parse_fstring_expression(&text, line)?;

        let mut conversion = None;
        if chars.get(*i) == Some(&'!') {
            conversion = match chars.get(*i + 1) {
                Some(c @ ('s' | 'r' | 'a')) => Some(*c),
                _ => return Err(fstring_error(line, "invalid conversion character")),
            };
            *i += 2;
        }
        let mut spec = None;
        if chars.get(*i) == Some(&':') {
            *i += 1;
            let parts = self.fstring_parts(chars, i, raw, true, line)?;
            if !parts.is_empty() {
                spec = Some(Box::new(Expr::JoinedStr(parts)));
            }
        }
        if chars.get(*i) != Some(&'}') {
            return Err(fstring_error(line, "expecting '}'"));
        }
        *i += 1;
        Ok(Expr::FormattedValue {
            value: Box::new(value),
            conversion,
            spec,
        })
    }

    fn parse_fstring_expression(&self, text: &str, line: usize) -> Result<Expr, CompileError> {
        let field = PythonParser::parse(Rule::fstring_field, text)
            .map_err(|e| syntax_error(e, line - 1))?
            .next()
            .ok_or_else(|| fstring_error(line, "invalid expression"))?;
        self.parse_only_child(field)
    }
}

fn fstring_error(line: usize, message: &str) -> CompileError {
    CompileError::ParseError {
        line,
        column: 0,
        message: format!("f-string: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use unindent::unindent;

    use super::*;

    fn parse(source: &str) -> Vec<StmtNode> {
        parse_module(source, Version::V3_7)
            .unwrap()
            .body
            .into_iter()
            .map(|s| s.node)
            .collect()
    }

    fn expr(source: &str) -> Expr {
        match parse(source).remove(0) {
            StmtNode::Expr(e) => e,
            other => panic!("not an expression statement: {other:?}"),
        }
    }

    fn name(n: &str) -> Expr {
        Expr::Name(n.to_string())
    }

    fn int(i: i64) -> Expr {
        Expr::Constant(Constant::Int(i))
    }

    fn str_(s: &str) -> Expr {
        Expr::Constant(Constant::Str(s.to_string()))
    }

    fn bin(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        Expr::BinOp(op, Box::new(l), Box::new(r))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            expr("a + b * c ** -d"),
            bin(
                BinaryOp::Add,
                name("a"),
                bin(
                    BinaryOp::Mul,
                    name("b"),
                    bin(
                        BinaryOp::Pow,
                        name("c"),
                        Expr::UnaryOp(UnaryOp::Neg, Box::new(name("d")))
                    )
                )
            )
        );
        assert_eq!(
            expr("a - b - c"),
            bin(BinaryOp::Sub, bin(BinaryOp::Sub, name("a"), name("b")), name("c"))
        );
        assert_eq!(
            expr("-a ** 2"),
            Expr::UnaryOp(
                UnaryOp::Neg,
                Box::new(bin(BinaryOp::Pow, name("a"), int(2)))
            )
        );
        assert_eq!(
            expr("a ** b ** c"),
            bin(BinaryOp::Pow, name("a"), bin(BinaryOp::Pow, name("b"), name("c")))
        );
        assert_eq!(
            expr("a | b ^ c & d << e"),
            bin(
                BinaryOp::BitOr,
                name("a"),
                bin(
                    BinaryOp::BitXor,
                    name("b"),
                    bin(
                        BinaryOp::BitAnd,
                        name("c"),
                        bin(BinaryOp::LShift, name("d"), name("e"))
                    )
                )
            )
        );
    }

    #[test]
    fn test_matmul_needs_3_5() {
        assert!(parse_module("a @ b", Version::V3_4).is_err());
        assert!(parse_module("a @= b", Version::V3_4).is_err());
        assert_eq!(expr("a @ b"), bin(BinaryOp::MatMul, name("a"), name("b")));
    }

    #[test]
    fn test_boolean_operators_are_flat() {
        assert_eq!(
            expr("a or b or not c and d"),
            Expr::BoolOp(
                BoolOp::Or,
                vec![
                    name("a"),
                    name("b"),
                    Expr::BoolOp(
                        BoolOp::And,
                        vec![Expr::UnaryOp(UnaryOp::Not, Box::new(name("c"))), name("d")]
                    )
                ]
            )
        );
    }

    #[test_case("a not in b", CompareOp::NotIn)]
    #[test_case("a is not b", CompareOp::IsNot)]
    #[test_case("a is b", CompareOp::Is)]
    #[test_case("a <= b", CompareOp::Le)]
    #[test_case("a in b", CompareOp::In)]
    fn test_comparisons(source: &str, op: CompareOp) {
        assert_eq!(
            expr(source),
            Expr::Compare(Box::new(name("a")), vec![(op, name("b"))])
        );
    }

    #[test]
    fn test_keyword_prefixes_are_names() {
        assert_eq!(
            parse("iffy = nothing or island"),
            vec![StmtNode::Assign {
                targets: vec![name("iffy")],
                value: Expr::BoolOp(BoolOp::Or, vec![name("nothing"), name("island")])
            }]
        );
    }

    #[test]
    fn test_conditional_expression() {
        assert_eq!(
            expr("a if b else c"),
            Expr::IfExp {
                test: Box::new(name("b")),
                body: Box::new(name("a")),
                orelse: Box::new(name("c")),
            }
        );
    }

    #[test]
    fn test_call_arguments() {
        assert_eq!(
            expr("f(a, *b, c=1, **d)"),
            Expr::Call {
                func: Box::new(name("f")),
                args: vec![name("a"), Expr::Starred(Box::new(name("b")))],
                keywords: vec![
                    Keyword {
                        arg: Some("c".to_string()),
                        value: int(1)
                    },
                    Keyword {
                        arg: None,
                        value: name("d")
                    },
                ],
            }
        );
        assert_eq!(
            expr("f(a == b)"),
            Expr::Call {
                func: Box::new(name("f")),
                args: vec![Expr::Compare(
                    Box::new(name("a")),
                    vec![(CompareOp::Eq, name("b"))]
                )],
                keywords: vec![],
            }
        );
    }

    #[test]
    fn test_legacy_call_restrictions() {
        assert!(parse_module("f(*a, b)", Version::V3_4).is_err());
        assert!(parse_module("f(*a, b)", Version::V3_5).is_ok());
        assert!(parse_module("f(**a, **b)", Version::V3_4).is_err());
        assert!(parse_module("f(a=1, b)", Version::V3_7).is_err());
        assert!(parse_module("f(a=1, a=2)", Version::V3_7).is_err());
    }

    #[test]
    fn test_slices() {
        assert_eq!(
            expr("x[1:]"),
            Expr::Subscript(
                Box::new(name("x")),
                Box::new(Expr::Slice(Some(Box::new(int(1))), None, None))
            )
        );
        assert_eq!(
            expr("x[::2]"),
            Expr::Subscript(
                Box::new(name("x")),
                Box::new(Expr::Slice(None, None, Some(Box::new(int(2)))))
            )
        );
        assert_eq!(
            expr("x[i, j]"),
            Expr::Subscript(
                Box::new(name("x")),
                Box::new(Expr::Tuple(vec![name("i"), name("j")]))
            )
        );
    }

    #[test]
    fn test_displays() {
        assert_eq!(expr("()"), Expr::Tuple(vec![]));
        assert_eq!(expr("(1,)"), Expr::Tuple(vec![int(1)]));
        assert_eq!(expr("(1)"), int(1));
        assert_eq!(expr("{}"), Expr::Dict(vec![]));
        assert_eq!(expr("{1}"), Expr::Set(vec![int(1)]));
        assert_eq!(
            expr("{'a': 1, **m}"),
            Expr::Dict(vec![(Some(str_("a")), int(1)), (None, name("m"))])
        );
        assert_eq!(expr("[1, 2,]"), Expr::List(vec![int(1), int(2)]));
    }

    #[test_case("0", 0)]
    #[test_case("1_000", 1000)]
    #[test_case("0x1F", 31)]
    #[test_case("0o17", 15)]
    #[test_case("0b101", 5)]
    fn test_integers(source: &str, value: i64) {
        assert_eq!(expr(source), int(value));
    }

    #[test_case("1.5", 1.5)]
    #[test_case(".5", 0.5)]
    #[test_case("2.", 2.0)]
    #[test_case("1e16", 1e16)]
    #[test_case("1E-3", 0.001)]
    fn test_floats(source: &str, value: f64) {
        assert_eq!(expr(source), Expr::Constant(Constant::Float(value)));
    }

    #[test_case("1j")]
    #[test_case("99999999999999999999")]
    fn test_number_errors(source: &str) {
        assert!(matches!(
            parse_module(source, Version::V3_7),
            Err(CompileError::Unsupported { line: 1, .. })
        ));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(expr("'a' 'b'"), str_("ab"));
        assert_eq!(expr("'''a\n'b'\n''' \"\\x41\""), str_("a\n'b'\nA"));
        assert_eq!(
            expr("b'a' b'b'"),
            Expr::Constant(Constant::Bytes(b"ab".to_vec()))
        );
        assert!(parse_module("'a' b'b'", Version::V3_7).is_err());
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(
            parse_module("x = 1\nx = 'abc\n", Version::V3_7),
            Err(CompileError::StringLexError {
                line: 2,
                message: "unterminated string literal".to_string()
            })
        );
    }

    #[test]
    fn test_fstrings() {
        assert_eq!(
            expr("f'a{x!r:>{w}}b{{'"),
            Expr::JoinedStr(vec![
                str_("a"),
                Expr::FormattedValue {
                    value: Box::new(name("x")),
                    conversion: Some('r'),
                    spec: Some(Box::new(Expr::JoinedStr(vec![
                        str_(">"),
                        Expr::FormattedValue {
                            value: Box::new(name("w")),
                            conversion: None,
                            spec: None
                        }
                    ]))),
                },
                str_("b{"),
            ])
        );
        assert!(parse_module("f'{x}'", Version::V3_5).is_err());
        assert!(parse_module("f'}'", Version::V3_6).is_err());
        assert!(parse_module("f'{}'", Version::V3_6).is_err());
    }

    #[test]
    fn test_assignment_forms() {
        assert_eq!(
            parse("a = b = 1"),
            vec![StmtNode::Assign {
                targets: vec![name("a"), name("b")],
                value: int(1)
            }]
        );
        assert_eq!(
            parse("x.y += 2"),
            vec![StmtNode::AugAssign {
                target: Expr::Attribute(Box::new(name("x")), "y".to_string()),
                op: BinaryOp::Add,
                value: int(2)
            }]
        );
        assert_eq!(
            parse("x **= 2"),
            vec![StmtNode::AugAssign {
                target: name("x"),
                op: BinaryOp::Pow,
                value: int(2)
            }]
        );
        assert_eq!(
            parse("(x): int"),
            vec![StmtNode::AnnAssign {
                target: name("x"),
                annotation: name("int"),
                value: None,
                simple: false
            }]
        );
        assert!(parse_module("x: int", Version::V3_5).is_err());
        assert!(matches!(
            parse_module("f() = 1", Version::V3_7),
            Err(CompileError::InvalidAssignment { line: 1 })
        ));
    }

    #[test]
    fn test_compound_statements() {
        let source = unindent(
            "
            if a:
                pass
            elif b:
                x = 1
            else:
                break
            ",
        );
        let StmtNode::If { orelse, .. } = &parse(&source)[0] else {
            panic!("not an if");
        };
        assert!(matches!(&orelse[0].node, StmtNode::If { orelse, .. } if orelse.len() == 1));
    }

    #[test]
    fn test_layout() {
        let source = unindent(
            "
            # leading comment
            if a:  # trailing comment

                if b:
                    x = 1; y = 2;
              # misplaced comment
                z = f(1,
                      2)
            w = \\
                3
            while c: c -= 1
            ",
        );
        let module = parse_module(&source, Version::V3_7).unwrap();
        let lines = module.body.iter().map(|s| s.line).collect::<Vec<_>>();
        assert_eq!(lines, vec![2, 9, 11]);
        let StmtNode::If { body, .. } = &module.body[0].node else {
            panic!("not an if");
        };
        assert_eq!(body.len(), 2);
        let StmtNode::If { body: inner, .. } = &body[0].node else {
            panic!("not a nested if");
        };
        assert_eq!(inner.iter().map(|s| s.line).collect::<Vec<_>>(), vec![5, 5]);
    }

    #[test]
    fn test_bad_indentation() {
        assert!(matches!(
            parse_module("if a:\n    x = 1\n  y = 2\n", Version::V3_7),
            Err(CompileError::ParseError { line: 3, .. })
        ));
        assert!(matches!(
            parse_module("x = 1\n    y = 2\n", Version::V3_7),
            Err(CompileError::ParseError { line: 2, .. })
        ));
        assert!(matches!(
            parse_module("if a:\nx = 1\n", Version::V3_7),
            Err(CompileError::ParseError { line: 2, .. })
        ));
    }

    #[test]
    fn test_function_parameters() {
        let StmtNode::FunctionDef { args, scope, .. } =
            &parse("def f(a, b=1, *c, d, e=2, **g): pass")[0]
        else {
            panic!("not a def");
        };
        assert_eq!(args.args, vec!["a", "b"]);
        assert_eq!(args.defaults, vec![int(1)]);
        assert_eq!(args.vararg.as_deref(), Some("c"));
        assert_eq!(args.kwonly, vec!["d", "e"]);
        assert_eq!(args.kw_defaults, vec![None, Some(int(2))]);
        assert_eq!(args.kwarg.as_deref(), Some("g"));
        assert_eq!(*scope, 1);
        assert_eq!(
            args.names().cloned().collect::<Vec<_>>(),
            vec!["a", "b", "d", "e", "c", "g"]
        );
    }

    #[test_case("def f(a=1, b): pass"; "non-default after default")]
    #[test_case("def f(*, **k): pass"; "bare star without names")]
    #[test_case("def f(*a, *b): pass"; "two stars")]
    #[test_case("def f(a, a): pass"; "duplicate")]
    #[test_case("def f(**k, a): pass"; "after kwargs")]
    fn test_bad_parameters(source: &str) {
        assert!(matches!(
            parse_module(source, Version::V3_7),
            Err(CompileError::ParseError { .. })
        ));
    }

    #[test]
    fn test_annotations() {
        let StmtNode::FunctionDef { args, .. } =
            &parse("def f(self, a: int = 3, *b: str, c: 'x', **d: e.f) -> bool: pass")[0]
        else {
            panic!("not a def");
        };
        let annotated = args
            .annotations
            .iter()
            .map(|(n, a)| (n.as_str(), a.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            annotated,
            vec![
                ("a", name("int")),
                ("b", name("str")),
                ("c", str_("x")),
                ("d", Expr::Attribute(Box::new(name("e")), "f".to_string())),
                ("return", name("bool")),
            ]
        );
        assert_eq!(args.defaults, vec![int(3)]);
    }

    #[test]
    fn test_decorators() {
        let source = unindent(
            "
            x = 1
            @classmethod
            @a.b(1, key=2)

            def f(cls): pass
            @dataclass
            class C: pass
            ",
        );
        let module = parse_module(&source, Version::V3_4).unwrap();
        assert_eq!(
            module.body.iter().map(|s| s.line).collect::<Vec<_>>(),
            vec![1, 2, 6]
        );
        let StmtNode::FunctionDef { decorators, .. } = &module.body[1].node else {
            panic!("not a def");
        };
        assert_eq!(
            decorators,
            &vec![
                name("classmethod"),
                Expr::Call {
                    func: Box::new(Expr::Attribute(Box::new(name("a")), "b".to_string())),
                    args: vec![int(1)],
                    keywords: vec![Keyword {
                        arg: Some("key".to_string()),
                        value: int(2)
                    }],
                },
            ]
        );
        let StmtNode::ClassDef { decorators, .. } = &module.body[2].node else {
            panic!("not a class");
        };
        assert_eq!(decorators, &vec![name("dataclass")]);
    }

    #[test]
    fn test_imports() {
        assert_eq!(
            parse("from ..a.b import (c as d,\n    e,)"),
            vec![StmtNode::ImportFrom {
                module: Some("a.b".to_string()),
                names: vec![
                    Alias {
                        name: "c".to_string(),
                        asname: Some("d".to_string())
                    },
                    Alias {
                        name: "e".to_string(),
                        asname: None
                    }
                ],
                level: 2
            }]
        );
        assert_eq!(
            parse("import a.b as c"),
            vec![StmtNode::Import(vec![Alias {
                name: "a.b".to_string(),
                asname: Some("c".to_string())
            }])]
        );
        assert_eq!(
            parse("from . import *"),
            vec![StmtNode::ImportFrom {
                module: None,
                names: vec![Alias {
                    name: "*".to_string(),
                    asname: None
                }],
                level: 1
            }]
        );
    }

    #[test_case("try:\n    pass\nexcept:\n    pass\n")]
    #[test_case("with a:\n    pass\n")]
    #[test_case("(x for x in y)")]
    #[test_case("f(x for x in y)")]
    #[test_case("{x for x in y}")]
    #[test_case("{x: 1 for x in y}")]
    #[test_case("[x for x in y for z in x]")]
    #[test_case("x = yield y")]
    #[test_case("x = await y")]
    #[test_case("del x")]
    fn test_unsupported(source: &str) {
        assert!(matches!(
            parse_module(source, Version::V3_7),
            Err(CompileError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_listcomp_scope() {
        let Expr::ListComp { ifs, scope, .. } = expr("[x for x in y if x if not x]") else {
            panic!("not a listcomp");
        };
        assert_eq!(ifs.len(), 2);
        assert_eq!(scope, 1);
    }

    #[test]
    fn test_scopes_number_inner_first() {
        let source = unindent(
            "
            def outer(a=lambda: 0):
                def inner(): pass
            ",
        );
        let StmtNode::FunctionDef { body, scope, args, .. } = &parse(&source)[0] else {
            panic!("not a def");
        };
        assert!(matches!(&args.defaults[0], Expr::Lambda { scope: 1, .. }));
        assert!(matches!(&body[0].node, StmtNode::FunctionDef { scope: 2, .. }));
        assert_eq!(*scope, 3);
    }
}
