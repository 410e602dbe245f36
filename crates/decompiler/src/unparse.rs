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

//! Rendering of the Python syntax tree as source text.

use itertools::Itertools;
use unpyc_bytecode::{Constant, float_repr, quote_bytes, quote_str};

use crate::ast::{Alias, Arg, BinaryOp, Expr, Param, Params, Stmt, StmtNode};
use crate::precedence::{Precedence, get_precedence};

const INDENT_LEVEL: usize = 4;

impl Expr {
    /// Returns the precedence of the operator. The higher the return value the higher the precedent.
    fn precedence(&self) -> u8 {
        get_precedence(self)
    }
}

/// Source text of a constant. Infinities have no literal of their own and are written as an
/// overflowing float.
pub fn to_literal(c: &Constant) -> String {
    match c {
        Constant::Ellipsis => "...".to_string(),
        Constant::Float(v) if v.is_infinite() => {
            if *v > 0.0 { "1e999" } else { "-1e999" }.to_string()
        }
        Constant::Float(v) => float_repr(*v),
        Constant::Str(s) => quote_str(s),
        Constant::Bytes(b) => quote_bytes(b),
        Constant::Tuple(items) if items.len() == 1 => format!("({},)", to_literal(&items[0])),
        Constant::Tuple(items) => format!("({})", items.iter().map(to_literal).join(", ")),
        other => other.to_string(),
    }
}

fn paren_if(cond: bool, text: String) -> String {
    if cond { format!("({text})") } else { text }
}

pub fn unparse_expr(current_expr: &Expr) -> String {
    let prec = current_expr.precedence();
    let brace_if_lower =
        |expr: &Expr| -> String { paren_if(expr.precedence() < prec, unparse_expr(expr)) };
    let brace_if_lower_eq =
        |expr: &Expr| -> String { paren_if(expr.precedence() <= prec, unparse_expr(expr)) };

    match current_expr {
        Expr::Name(n) => n.clone(),
        Expr::Constant(c) => to_literal(c),
        Expr::Attribute(value, attr) => {
            // `1.real` would lex as a float.
            let numeric = matches!(
                value.as_ref(),
                Expr::Constant(Constant::Int(_) | Constant::Float(_))
            );
            let base = paren_if(
                numeric || value.precedence() < prec,
                unparse_expr(value),
            );
            format!("{base}.{attr}")
        }
        Expr::Subscript(value, index) => {
            format!("{}[{}]", brace_if_lower(value), unparse_index(index))
        }
        Expr::Slice(..) => unparse_index(current_expr),
        Expr::Binary(BinaryOp::Pow, left, right) => format!(
            "{} ** {}",
            brace_if_lower_eq(left),
            paren_if(
                right.precedence() < Precedence::Factor.as_u8(),
                unparse_expr(right)
            )
        ),
        Expr::Binary(op, left, right) => format!(
            "{} {} {}",
            brace_if_lower(left),
            op,
            brace_if_lower_eq(right)
        ),
        Expr::Unary(op, operand) => format!("{op}{}", brace_if_lower(operand)),
        Expr::Compare(op, left, right) => format!(
            "{} {} {}",
            brace_if_lower_eq(left),
            op,
            brace_if_lower_eq(right)
        ),
        Expr::And(left, right) => {
            format!("{} and {}", brace_if_lower(left), brace_if_lower(right))
        }
        Expr::Or(left, right) => format!("{} or {}", brace_if_lower(left), brace_if_lower(right)),
        Expr::IfExp { test, body, orelse } => format!(
            "{} if {} else {}",
            brace_if_lower_eq(body),
            brace_if_lower_eq(test),
            brace_if_lower(orelse)
        ),
        Expr::Call { func, args } => {
            format!("{}({})", brace_if_lower(func), unparse_args(args))
        }
        Expr::Tuple(items) if items.len() == 1 => format!("({},)", unparse_expr(&items[0])),
        Expr::Tuple(items) => format!("({})", items.iter().map(unparse_expr).join(", ")),
        Expr::List(items) => format!("[{}]", items.iter().map(unparse_expr).join(", ")),
        Expr::Set(items) => format!("{{{}}}", items.iter().map(unparse_expr).join(", ")),
        Expr::Dict(pairs) => format!(
            "{{{}}}",
            pairs
                .iter()
                .map(|(k, v)| format!("{}: {}", unparse_expr(k), unparse_expr(v)))
                .join(", ")
        ),
        Expr::Lambda { params, body } => {
            if params.is_empty() {
                format!("lambda: {}", unparse_expr(body))
            } else {
                format!("lambda {}: {}", unparse_params(params), unparse_expr(body))
            }
        }
        Expr::ListComp {
            element,
            target,
            iter,
            condition,
        } => {
            let nocond = |e: &Expr| {
                paren_if(
                    e.precedence() <= Precedence::IfExp.as_u8(),
                    unparse_expr(e),
                )
            };
            let mut text = format!(
                "[{} for {} in {}",
                unparse_expr(element),
                unparse_target(target),
                nocond(iter)
            );
            if let Some(condition) = condition {
                text.push_str(" if ");
                text.push_str(&nocond(condition));
            }
            text.push(']');
            text
        }
        Expr::JoinedStr(parts) => unparse_fstring(parts),
        Expr::FormattedValue { .. } => unparse_fstring(std::slice::from_ref(current_expr)),
    }
}

/// A subscript index: slices in colon form and tuples without their parentheses.
fn unparse_index(index: &Expr) -> String {
    let part = |e: &Option<Box<Expr>>| e.as_deref().map(unparse_expr).unwrap_or_default();
    match index {
        Expr::Slice(lower, upper, step) => match step {
            Some(_) => format!("{}:{}:{}", part(lower), part(upper), part(step)),
            None => format!("{}:{}", part(lower), part(upper)),
        },
        Expr::Tuple(items) if items.len() == 1 => format!("{},", unparse_index(&items[0])),
        Expr::Tuple(items) if !items.is_empty() => items.iter().map(unparse_index).join(", "),
        other => unparse_expr(other),
    }
}

/// Assignment and loop targets: a bare tuple needs no parentheses.
fn unparse_target(target: &Expr) -> String {
    match target {
        Expr::Tuple(items) if items.len() > 1 => items.iter().map(unparse_expr).join(", "),
        other => unparse_expr(other),
    }
}

fn unparse_args(args: &[Arg]) -> String {
    args.iter()
        .map(|arg| match arg {
            Arg::Positional(e) => unparse_expr(e),
            Arg::Star(e) => format!("*{}", unparse_expr(e)),
            Arg::Keyword(name, e) => format!("{name}={}", unparse_expr(e)),
            Arg::DoubleStar(e) => format!("**{}", unparse_expr(e)),
        })
        .join(", ")
}

fn unparse_param(p: &Param) -> String {
    match (&p.annotation, &p.default) {
        (Some(ann), Some(default)) => {
            format!("{}: {} = {}", p.name, unparse_expr(ann), unparse_expr(default))
        }
        (Some(ann), None) => format!("{}: {}", p.name, unparse_expr(ann)),
        (None, Some(default)) => format!("{}={}", p.name, unparse_expr(default)),
        (None, None) => p.name.clone(),
    }
}

pub fn unparse_params(params: &Params) -> String {
    let mut parts: Vec<String> = params.args.iter().map(unparse_param).collect();
    match &params.vararg {
        Some(p) => parts.push(format!("*{}", unparse_param(p))),
        None if !params.kwonly.is_empty() => parts.push("*".to_string()),
        None => {}
    }
    parts.extend(params.kwonly.iter().map(unparse_param));
    if let Some(p) = &params.kwarg {
        parts.push(format!("**{}", unparse_param(p)));
    }
    parts.join(", ")
}

/// Literal text of an f-string, braces doubled and `quote` escaped.
fn escape_fstring_text(s: &str, quote: &str) -> String {
    let quoted = quote_str(s);
    // Reuse the repr escaping, then adapt it to the chosen delimiter.
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let repr_quote = &quoted[..1];
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let next = chars.next().unwrap_or_default();
                if next.to_string() == repr_quote && !quote.starts_with(next) {
                    out.push(next);
                } else {
                    out.push('\\');
                    out.push(next);
                }
            }
            '{' => out.push_str("{{"),
            '}' => out.push_str("}}"),
            c if quote.starts_with(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// The body of an f-string (or of a nested format spec), without quotes.
fn fstring_body(parts: &[Expr], quote: &str) -> String {
    let mut out = String::new();
    for part in parts {
        match part {
            Expr::Constant(Constant::Str(s)) => out.push_str(&escape_fstring_text(s, quote)),
            Expr::FormattedValue {
                value,
                conversion,
                spec,
            } => {
                let mut text = match value.as_ref() {
                    // A top-level colon would start the format spec.
                    e @ Expr::Lambda { .. } => format!("({})", unparse_expr(e)),
                    e => unparse_expr(e),
                };
                if text.starts_with('{') {
                    text.insert(0, ' ');
                }
                out.push('{');
                out.push_str(&text);
                if let Some(conversion) = conversion {
                    out.push_str(&conversion.to_string());
                }
                if let Some(spec) = spec {
                    out.push(':');
                    match spec.as_ref() {
                        Expr::JoinedStr(parts) => out.push_str(&fstring_body(parts, quote)),
                        Expr::Constant(Constant::Str(s)) => {
                            out.push_str(&escape_fstring_text(s, quote))
                        }
                        other => out.push_str(&fstring_body(std::slice::from_ref(other), quote)),
                    }
                }
                out.push('}');
            }
            other => {
                out.push('{');
                out.push_str(&unparse_expr(other));
                out.push('}');
            }
        }
    }
    out
}

fn expression_texts(parts: &[Expr], out: &mut Vec<String>) {
    for part in parts {
        if let Expr::FormattedValue { value, spec, .. } = part {
            out.push(unparse_expr(value));
            if let Some(Expr::JoinedStr(inner)) = spec.as_deref() {
                expression_texts(inner, out);
            }
        }
    }
}

/// Replacement fields cannot reuse the enclosing quote, so the delimiter is picked to avoid
/// every quote character the embedded expressions use.
fn unparse_fstring(parts: &[Expr]) -> String {
    let mut texts = vec![];
    expression_texts(parts, &mut texts);
    let uses = |q: char| texts.iter().any(|t| t.contains(q));
    let quote = match (uses('\''), uses('"')) {
        (false, _) => "'",
        (true, false) => "\"",
        (true, true) => "'''",
    };
    format!("f{quote}{}{quote}", fstring_body(parts, quote))
}

fn unparse_alias(alias: &Alias) -> String {
    match &alias.asname {
        Some(asname) => format!("{} as {asname}", alias.name),
        None => alias.name.clone(),
    }
}

fn unparse_body(stmts: &[Stmt], indent: usize) -> Vec<String> {
    if stmts.is_empty() {
        vec![format!("{}pass", " ".repeat(indent))]
    } else {
        unparse_stmts(stmts, indent)
    }
}

fn decorator_lines(decorators: &[Expr], indent_frag: &str) -> Vec<String> {
    decorators
        .iter()
        .map(|d| format!("{indent_frag}@{}", unparse_expr(d)))
        .collect()
}

fn unparse_stmt(stmt: &Stmt, indent: usize) -> Vec<String> {
    let indent_frag = " ".repeat(indent);
    let line = |text: String| vec![format!("{indent_frag}{text}")];
    match &stmt.node {
        StmtNode::Expr(e) => line(unparse_expr(e)),
        StmtNode::Assign { targets, value } => line(format!(
            "{} = {}",
            targets.iter().map(unparse_target).join(" = "),
            unparse_expr(value)
        )),
        StmtNode::AugAssign { target, op, value } => line(format!(
            "{} {op}= {}",
            unparse_expr(target),
            unparse_expr(value)
        )),
        StmtNode::AnnAssign {
            target,
            annotation,
            value,
        } => {
            let mut text = format!("{}: {}", unparse_expr(target), unparse_expr(annotation));
            if let Some(value) = value {
                text.push_str(" = ");
                text.push_str(&unparse_expr(value));
            }
            line(text)
        }
        StmtNode::Pass => line("pass".to_string()),
        StmtNode::Break => line("break".to_string()),
        StmtNode::Return(None) => line("return".to_string()),
        StmtNode::Return(Some(e)) if e.is_none() => line("return".to_string()),
        StmtNode::Return(Some(e)) => line(format!("return {}", unparse_expr(e))),
        StmtNode::If { test, body, orelse } => {
            let mut stmt_lines = line(format!("if {}:", unparse_expr(test)));
            stmt_lines.append(&mut unparse_body(body, indent + INDENT_LEVEL));
            let mut orelse = orelse;
            loop {
                match orelse.as_slice() {
                    [] => break,
                    [
                        Stmt {
                            node:
                                StmtNode::If {
                                    test,
                                    body,
                                    orelse: next,
                                },
                            ..
                        },
                    ] => {
                        stmt_lines.push(format!("{indent_frag}elif {}:", unparse_expr(test)));
                        stmt_lines.append(&mut unparse_body(body, indent + INDENT_LEVEL));
                        orelse = next;
                    }
                    stmts => {
                        stmt_lines.push(format!("{indent_frag}else:"));
                        stmt_lines.append(&mut unparse_body(stmts, indent + INDENT_LEVEL));
                        break;
                    }
                }
            }
            stmt_lines
        }
        StmtNode::While { test, body, orelse } => {
            let mut stmt_lines = line(format!("while {}:", unparse_expr(test)));
            stmt_lines.append(&mut unparse_body(body, indent + INDENT_LEVEL));
            if !orelse.is_empty() {
                stmt_lines.push(format!("{indent_frag}else:"));
                stmt_lines.append(&mut unparse_stmts(orelse, indent + INDENT_LEVEL));
            }
            stmt_lines
        }
        StmtNode::For {
            target,
            iter,
            body,
            orelse,
        } => {
            let mut stmt_lines = line(format!(
                "for {} in {}:",
                unparse_target(target),
                unparse_expr(iter)
            ));
            stmt_lines.append(&mut unparse_body(body, indent + INDENT_LEVEL));
            if !orelse.is_empty() {
                stmt_lines.push(format!("{indent_frag}else:"));
                stmt_lines.append(&mut unparse_stmts(orelse, indent + INDENT_LEVEL));
            }
            stmt_lines
        }
        StmtNode::FunctionDef {
            name,
            decorators,
            params,
            returns,
            body,
        } => {
            let mut stmt_lines = decorator_lines(decorators, &indent_frag);
            let header = match returns {
                Some(returns) => format!(
                    "def {name}({}) -> {}:",
                    unparse_params(params),
                    unparse_expr(returns)
                ),
                None => format!("def {name}({}):", unparse_params(params)),
            };
            stmt_lines.append(&mut line(header));
            stmt_lines.append(&mut unparse_body(body, indent + INDENT_LEVEL));
            stmt_lines
        }
        StmtNode::ClassDef {
            name,
            decorators,
            bases,
            body,
        } => {
            let header = if bases.is_empty() {
                format!("class {name}:")
            } else {
                format!("class {name}({}):", bases.iter().map(unparse_expr).join(", "))
            };
            let mut stmt_lines = decorator_lines(decorators, &indent_frag);
            stmt_lines.append(&mut line(header));
            stmt_lines.append(&mut unparse_body(body, indent + INDENT_LEVEL));
            stmt_lines
        }
        StmtNode::Import(names) => line(format!(
            "import {}",
            names.iter().map(unparse_alias).join(", ")
        )),
        StmtNode::ImportFrom {
            module,
            names,
            level,
        } => line(format!(
            "from {}{module} import {}",
            ".".repeat(*level as usize),
            names.iter().map(unparse_alias).join(", ")
        )),
        StmtNode::Global(names) => line(format!("global {}", names.join(", "))),
        StmtNode::Nonlocal(names) => line(format!("nonlocal {}", names.join(", "))),
    }
}

pub fn unparse_stmts(stms: &[Stmt], indent: usize) -> Vec<String> {
    let mut results = vec![];
    for stmt in stms {
        results.append(&mut unparse_stmt(stmt, indent));
    }
    results
}

/// Render a module body: one statement per line, newline terminated.
pub fn unparse(stmts: &[Stmt]) -> String {
    let mut text = unparse_stmts(stmts, 0).join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use unindent::unindent;
    use unpyc_bytecode::CompareOp;

    use super::*;
    use crate::ast::{Conversion, UnaryOp};

    fn n(name: &str) -> Expr {
        Expr::name(name)
    }

    fn int(i: i64) -> Expr {
        Expr::Constant(Constant::Int(i))
    }

    fn bin(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        Expr::Binary(op, Box::new(l), Box::new(r))
    }

    fn stmt(node: StmtNode) -> Stmt {
        Stmt::from(node)
    }

    #[test_case(bin(BinaryOp::Mul, bin(BinaryOp::Add, n("a"), n("b")), n("c")), "(a + b) * c"; "lower left operand")]
    #[test_case(bin(BinaryOp::Sub, n("a"), bin(BinaryOp::Sub, n("b"), n("c"))), "a - (b - c)"; "left associative")]
    #[test_case(bin(BinaryOp::Sub, bin(BinaryOp::Sub, n("a"), n("b")), n("c")), "a - b - c"; "left chain")]
    #[test_case(bin(BinaryOp::Pow, n("a"), bin(BinaryOp::Pow, n("b"), n("c"))), "a ** b ** c"; "power right associative")]
    #[test_case(bin(BinaryOp::Pow, bin(BinaryOp::Pow, n("a"), n("b")), n("c")), "(a ** b) ** c"; "power left nested")]
    #[test_case(bin(BinaryOp::Pow, int(-1), n("x")), "(-1) ** x"; "negative literal base")]
    #[test_case(bin(BinaryOp::Pow, n("x"), Expr::Unary(UnaryOp::Neg, Box::new(n("y")))), "x ** -y"; "unary exponent")]
    #[test_case(Expr::Unary(UnaryOp::Neg, Box::new(bin(BinaryOp::Pow, n("a"), n("b")))), "-a ** b"; "minus binds looser than power")]
    #[test_case(Expr::Compare(CompareOp::Lt, Box::new(Expr::Compare(CompareOp::Lt, Box::new(n("a")), Box::new(n("b")))), Box::new(n("c"))), "(a < b) < c"; "comparisons do not chain")]
    #[test_case(Expr::Compare(CompareOp::Eq, Box::new(n("a")), Box::new(n("b"))).not(), "not a == b"; "not over comparison")]
    #[test_case(Expr::And(Box::new(Expr::Or(Box::new(n("a")), Box::new(n("b")))), Box::new(n("c"))), "(a or b) and c"; "or inside and")]
    #[test_case(Expr::Or(Box::new(Expr::And(Box::new(n("a")), Box::new(n("b")))), Box::new(n("c"))), "a and b or c"; "and inside or")]
    #[test_case(Expr::Attribute(Box::new(int(1)), "real".into()), "(1).real"; "int attribute")]
    #[test_case(Expr::Tuple(vec![n("a")]), "(a,)"; "singleton tuple")]
    #[test_case(Expr::Constant(Constant::Float(f64::NEG_INFINITY)), "-1e999"; "negative infinity")]
    #[test_case(Expr::Constant(Constant::Tuple(vec![Constant::Ellipsis, Constant::Float(f64::INFINITY)])), "(..., 1e999)"; "constant tuple")]
    #[test_case(Expr::Subscript(Box::new(n("a")), Box::new(Expr::Slice(None, Some(Box::new(int(2))), None))), "a[:2]"; "slice")]
    #[test_case(Expr::Subscript(Box::new(n("a")), Box::new(Expr::Tuple(vec![Expr::Slice(None, None, Some(Box::new(int(2)))), int(0)]))), "a[::2, 0]"; "extended slice")]
    #[test_case(Expr::IfExp { test: Box::new(n("c")), body: Box::new(Expr::Lambda { params: Box::default(), body: Box::new(n("x")) }), orelse: Box::new(n("y")) }, "(lambda: x) if c else y"; "lambda in conditional")]
    fn test_expression_text(expr: Expr, expected: &str) {
        assert_eq!(unparse_expr(&expr), expected);
    }

    #[test]
    fn test_call_arguments_in_source_order() {
        let call = Expr::Call {
            func: Box::new(n("func")),
            args: vec![
                Arg::Positional(n("arg0")),
                Arg::Star(n("args")),
                Arg::Keyword("name0".into(), n("value0")),
                Arg::DoubleStar(n("kwargs")),
            ],
        };
        assert_eq!(
            unparse_expr(&call),
            "func(arg0, *args, name0=value0, **kwargs)"
        );
    }

    #[test]
    fn test_fstrings() {
        let fv = |value: Expr, conversion, spec: Option<Expr>| Expr::FormattedValue {
            value: Box::new(value),
            conversion,
            spec: spec.map(Box::new),
        };
        let joined = Expr::JoinedStr(vec![
            Expr::str("a{b} "),
            fv(n("x"), Some(Conversion::Repr), None),
            Expr::str(" "),
            fv(n("y"), None, Some(Expr::str(">10"))),
        ]);
        assert_eq!(unparse_expr(&joined), "f'a{{b}} {x!r} {y:>10}'");

        let quoted = Expr::JoinedStr(vec![fv(
            Expr::Subscript(Box::new(n("d")), Box::new(Expr::str("k"))),
            None,
            None,
        )]);
        assert_eq!(unparse_expr(&quoted), "f\"{d['k']}\"");

        let nested_spec = fv(
            n("v"),
            None,
            Some(Expr::JoinedStr(vec![fv(n("width"), None, None)])),
        );
        assert_eq!(unparse_expr(&nested_spec), "f'{v:{width}}'");

        let dict = fv(Expr::Dict(vec![(int(1), int(2))]), None, None);
        assert_eq!(unparse_expr(&dict), "f'{ {1: 2}}'");
    }

    #[test]
    fn test_statements() {
        let body = vec![
            stmt(StmtNode::FunctionDef {
                name: "f".into(),
                decorators: vec![],
                params: Params {
                    args: vec![
                        Param::named("a"),
                        Param {
                            default: Some(int(1)),
                            ..Param::named("b")
                        },
                    ],
                    vararg: None,
                    kwonly: vec![Param {
                        default: Some(Expr::str("x")),
                        ..Param::named("k")
                    }],
                    kwarg: Some(Param::named("kw")),
                },
                returns: None,
                body: vec![
                    stmt(StmtNode::Expr(Expr::str("doc"))),
                    stmt(StmtNode::Global(vec!["g".into()])),
                    stmt(StmtNode::If {
                        test: n("a"),
                        body: vec![stmt(StmtNode::Return(Some(n("b"))))],
                        orelse: vec![stmt(StmtNode::If {
                            test: n("b"),
                            body: vec![],
                            orelse: vec![stmt(StmtNode::Return(Some(Expr::Constant(
                                Constant::None,
                            ))))],
                        })],
                    }),
                ],
            }),
            stmt(StmtNode::ClassDef {
                name: "C".into(),
                decorators: vec![],
                bases: vec![],
                body: vec![],
            }),
            stmt(StmtNode::For {
                target: Expr::Tuple(vec![n("i"), n("j")]),
                iter: n("pairs"),
                body: vec![stmt(StmtNode::Break)],
                orelse: vec![stmt(StmtNode::AugAssign {
                    target: n("x"),
                    op: BinaryOp::Add,
                    value: int(1),
                })],
            }),
            stmt(StmtNode::ImportFrom {
                module: "pkg".into(),
                names: vec![Alias {
                    name: "a".into(),
                    asname: Some("b".into()),
                }],
                level: 1,
            }),
        ];
        let expected = unindent(
            "
            def f(a, b=1, *, k='x', **kw):
                'doc'
                global g
                if a:
                    return b
                elif b:
                    pass
                else:
                    return
            class C:
                pass
            for i, j in pairs:
                break
            else:
                x += 1
            from .pkg import a as b
            ",
        );
        assert_eq!(unparse(&body).trim_end(), expected.trim_end());
    }

    #[test]
    fn test_decorators_and_annotations() {
        let method = stmt(StmtNode::FunctionDef {
            name: "__init__".into(),
            decorators: vec![Expr::Call {
                func: Box::new(Expr::Attribute(Box::new(n("a")), "b".into())),
                args: vec![Arg::Positional(int(1))],
            }],
            params: Params {
                args: vec![
                    Param::named("self"),
                    Param {
                        annotation: Some(n("int")),
                        default: Some(int(3)),
                        ..Param::named("A")
                    },
                ],
                vararg: Some(Param {
                    annotation: Some(Expr::str("x")),
                    ..Param::named("rest")
                }),
                kwonly: vec![],
                kwarg: None,
            },
            returns: Some(n("str")),
            body: vec![],
        });
        let body = vec![stmt(StmtNode::ClassDef {
            name: "C".into(),
            decorators: vec![n("d"), n("e")],
            bases: vec![],
            body: vec![method],
        })];
        let expected = unindent(
            "
            @d
            @e
            class C:
                @a.b(1)
                def __init__(self, A: int = 3, *rest: 'x') -> str:
                    pass
            ",
        );
        assert_eq!(unparse(&body).trim_end(), expected.trim_end());
    }
}
