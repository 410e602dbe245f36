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

use std::fmt::Write;
use std::ops::Range;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use itertools::Itertools;

use super::{Chart, Item};
use crate::grammar::{CompiledGrammar, SymbolId, SymbolTable};
use crate::token::Token;

pub type NodeId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Index of the token this leaf stands for.
    Terminal(usize),
    /// Index (and priority) of the rule this node was reduced by.
    Nonterminal(usize),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub symbol: SymbolId,
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
    /// Token range covered.
    pub span: Range<usize>,
}

/// One derivation of the token stream, stored as an arena.
#[derive(Clone, Debug)]
pub struct ParseTree {
    nodes: Vec<Node>,
    root: NodeId,
    symbols: Arc<SymbolTable>,
}

impl ParseTree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn name(&self, id: NodeId) -> &str {
        self.symbols.name(self.nodes[id].symbol)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn token(&self, id: NodeId) -> Option<usize> {
        match self.nodes[id].kind {
            NodeKind::Terminal(t) => Some(t),
            NodeKind::Nonterminal(_) => None,
        }
    }

    pub fn rule(&self, id: NodeId) -> Option<usize> {
        match self.nodes[id].kind {
            NodeKind::Terminal(_) => None,
            NodeKind::Nonterminal(r) => Some(r),
        }
    }

    /// Compact single-line form: `(lhs child ...)`, terminals by kind, empty nonterminals bare.
    pub fn sexpr(&self) -> String {
        let mut out = String::new();
        self.sexpr_into(self.root, &mut out);
        out
    }

    fn sexpr_into(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id];
        if node.children.is_empty() {
            out.push_str(self.name(id));
            return;
        }
        out.push('(');
        out.push_str(self.name(id));
        for c in &node.children {
            out.push(' ');
            self.sexpr_into(*c, out);
        }
        out.push(')');
    }

    /// Indented listing, one node per line, terminals with their offset and argument.
    pub fn dump(&self, tokens: &[Token]) -> String {
        let mut out = String::new();
        self.dump_into(self.root, 0, tokens, &mut out);
        out
    }

    fn dump_into(&self, id: NodeId, depth: usize, tokens: &[Token], out: &mut String) {
        let indent = "  ".repeat(depth);
        match self.nodes[id].kind {
            NodeKind::Terminal(t) => {
                let token = &tokens[t];
                let _ = writeln!(
                    out,
                    "{indent}{:<24} {:>8}  {}",
                    token.kind, token.offset, token.repr
                );
            }
            NodeKind::Nonterminal(_) => {
                let _ = writeln!(out, "{indent}{}", self.name(id));
                for c in &self.nodes[id].children {
                    self.dump_into(*c, depth + 1, tokens, out);
                }
            }
        }
    }
}

/// The innermost recognized span the extractor could not split into children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct Unsplit {
    pub symbol: SymbolId,
    pub start: usize,
    pub end: usize,
    pub depth: usize,
}

/// Walks the chart top-down. For each nonterminal span the highest-priority completed rule that
/// can be split is taken; splits are searched right to left, giving each rightmost child the
/// longest span that still leaves a derivable prefix.
struct Extractor<'a> {
    g: &'a CompiledGrammar,
    chart: &'a Chart,
    symbols: &'a [Option<SymbolId>],
    nodes: Vec<Node>,
    memo: AHashMap<(SymbolId, usize, usize), NodeId>,
    active: AHashSet<(SymbolId, usize, usize)>,
    depth: usize,
    deepest: Option<Unsplit>,
}

pub(super) fn extract(
    g: &CompiledGrammar,
    chart: &Chart,
    symbols: &[Option<SymbolId>],
    start: SymbolId,
) -> Result<ParseTree, Unsplit> {
    let mut x = Extractor {
        g,
        chart,
        symbols,
        nodes: vec![],
        memo: AHashMap::new(),
        active: AHashSet::new(),
        depth: 0,
        deepest: None,
    };
    let Some(root) = x.derive(start, 0, symbols.len()) else {
        return Err(x.deepest.unwrap_or(Unsplit {
            symbol: start,
            start: 0,
            end: symbols.len(),
            depth: 0,
        }));
    };
    Ok(ParseTree {
        nodes: x.nodes,
        root,
        symbols: g.symbols().clone(),
    })
}

impl Extractor<'_> {
    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn derive(&mut self, symbol: SymbolId, start: usize, end: usize) -> Option<NodeId> {
        if self.g.is_terminal(symbol) {
            if end != start + 1 || self.symbols[start] != Some(symbol) {
                return None;
            }
            return Some(self.push(Node {
                symbol,
                kind: NodeKind::Terminal(start),
                children: vec![],
                span: start..end,
            }));
        }
        let key = (symbol, start, end);
        if let Some(id) = self.memo.get(&key) {
            return Some(*id);
        }
        // A span that is already being derived further up cannot be its own descendant.
        if !self.active.insert(key) {
            return None;
        }
        let mut rules = self.chart.sets[end]
            .completed
            .get(&(symbol, start))
            .cloned()
            .unwrap_or_default();
        rules.sort_unstable_by(|a, b| b.cmp(a));
        let recognized = !rules.is_empty();

        let mut found = None;
        for rule in rules {
            let mut children = vec![];
            let arity = self.g.rule(rule).rhs.len();
            if self.split(rule, arity, start, end, &mut children) {
                children.reverse();
                found = Some(self.push(Node {
                    symbol,
                    kind: NodeKind::Nonterminal(rule),
                    children,
                    span: start..end,
                }));
                break;
            }
        }
        self.depth -= 1;
        self.active.remove(&key);
        match found {
            Some(id) => {
                self.memo.insert(key, id);
            }
            None if recognized => self.note_unsplit(symbol, start, end),
            None => {}
        }
        found
    }

    fn note_unsplit(&mut self, symbol: SymbolId, start: usize, end: usize) {
        let unsplit = Unsplit {
            symbol,
            start,
            end,
            depth: self.depth,
        };
        if self.deepest.is_none_or(|d| unsplit.depth >= d.depth) {
            self.deepest = Some(unsplit);
        }
    }

    /// Cover the first `count` symbols of `rule` over `start..end`, pushing children in reverse.
    fn split(
        &mut self,
        rule: usize,
        count: usize,
        start: usize,
        end: usize,
        out: &mut Vec<NodeId>,
    ) -> bool {
        if count == 0 {
            return start == end;
        }
        let symbol = self.g.rule(rule).rhs[count - 1];
        let candidates: Vec<usize> = if self.g.is_terminal(symbol) {
            (end > start).then(|| end - 1).into_iter().collect()
        } else {
            self.chart.sets[end]
                .origins
                .get(&symbol)
                .map(|o| o.iter().copied().filter(|p| *p >= start).sorted().collect())
                .unwrap_or_default()
        };
        for p in candidates {
            let prefix = if count == 1 {
                p == start
            } else {
                self.chart.sets[p].seen.contains(&Item {
                    rule,
                    dot: count - 1,
                    origin: start,
                })
            };
            if !prefix {
                continue;
            }
            let Some(child) = self.derive(symbol, p, end) else {
                continue;
            };
            let mark = out.len();
            out.push(child);
            if self.split(rule, count - 1, start, p, out) {
                return true;
            }
            out.truncate(mark);
        }
        false
    }
}
