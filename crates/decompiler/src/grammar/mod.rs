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

//! Grammars as insertion-ordered rule sets.
//!
//! A rule's priority is its position in the set: later rules win ambiguities. Overriding a
//! rule moves it to the end, so a delta's override outranks everything before it, and rules
//! synthesized for one parse session outrank every static rule.

mod doc;
pub mod synthesize;

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use ahash::AHashMap;
use indexmap::IndexSet;
use tracing::trace;

pub use doc::parse_doc;

pub type SymbolId = u32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    #[error("line {line}: {message}: {text:?}")]
    Malformed {
        line: usize,
        text: String,
        message: String,
    },
    #[error("unknown start symbol {0}")]
    UnknownStart(String),
}

/// Terminals are the token kinds: all upper-case names.
pub fn is_terminal_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// A production's identity: left-hand side and right-hand side shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleSignature {
    pub lhs: String,
    pub rhs: Vec<String>,
}

impl RuleSignature {
    pub fn new(lhs: &str, rhs: Vec<String>) -> Self {
        Self {
            lhs: lhs.to_string(),
            rhs,
        }
    }

    pub fn is_epsilon(&self) -> bool {
        self.rhs.is_empty()
    }
}

impl Display for RuleSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ::=", self.lhs)?;
        for s in &self.rhs {
            write!(f, " {s}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Grammar {
    rules: IndexSet<RuleSignature>,
    checked: BTreeSet<String>,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule unless one with the same signature exists. Returns whether it was added.
    pub fn add_rule(&mut self, rule: RuleSignature) -> bool {
        if self.rules.contains(&rule) {
            return false;
        }
        trace!(rule = %rule, "adding rule");
        self.rules.insert(rule)
    }

    /// Add a rule, or move an existing one to the highest priority.
    pub fn override_rule(&mut self, rule: RuleSignature) {
        self.rules.shift_remove(&rule);
        self.rules.insert(rule);
    }

    pub fn remove_rule(&mut self, rule: &RuleSignature) -> bool {
        self.rules.shift_remove(rule)
    }

    /// Add every rule of a rule document with [`Grammar::add_rule`]; returns how many were new.
    pub fn add_doc(&mut self, doc: &str) -> Result<usize, GrammarError> {
        let rules = parse_doc(doc)?;
        Ok(rules.into_iter().filter(|r| self.add_rule(r.clone())).count())
    }

    pub fn contains(&self, rule: &RuleSignature) -> bool {
        self.rules.contains(rule)
    }

    /// Rules in priority order, lowest first.
    pub fn rules(&self) -> impl Iterator<Item = &RuleSignature> {
        self.rules.iter()
    }

    pub fn priority(&self, rule: &RuleSignature) -> Option<usize> {
        self.rules.get_index_of(rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Mark a nonterminal whose spans must keep their jumps contained.
    pub fn set_checked(&mut self, symbol: &str) {
        self.checked.insert(symbol.to_string());
    }

    pub fn unset_checked(&mut self, symbol: &str) {
        self.checked.remove(symbol);
    }

    pub fn checked(&self) -> impl Iterator<Item = &str> {
        self.checked.iter().map(String::as_str)
    }

    /// Resolve symbols to ids and precompute what the parser needs.
    pub fn compile(&self) -> CompiledGrammar {
        let mut symbols = SymbolTable::default();
        let mut rules = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let lhs = symbols.intern(&rule.lhs);
            let rhs = rule.rhs.iter().map(|s| symbols.intern(s)).collect();
            rules.push(CompiledRule { lhs, rhs });
        }
        for c in &self.checked {
            symbols.intern(c);
        }
        let n = symbols.len();
        let mut by_lhs = vec![vec![]; n];
        for (i, r) in rules.iter().enumerate() {
            by_lhs[r.lhs as usize].push(i);
        }
        let terminal: Vec<bool> = (0..n as SymbolId)
            .map(|s| is_terminal_name(symbols.name(s)))
            .collect();
        let mut checked = vec![false; n];
        for c in &self.checked {
            if let Some(id) = symbols.lookup(c) {
                checked[id as usize] = true;
            }
        }

        let mut nullable = vec![false; n];
        loop {
            let mut changed = false;
            for r in &rules {
                if !nullable[r.lhs as usize] && r.rhs.iter().all(|s| nullable[*s as usize]) {
                    nullable[r.lhs as usize] = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        CompiledGrammar {
            rules,
            by_lhs,
            nullable,
            terminal,
            checked,
            symbols: Arc::new(symbols),
        }
    }
}

impl Display for Grammar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, r) in self.rules.iter().enumerate() {
            writeln!(f, "{i:>5} {r}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    names: Vec<Arc<str>>,
    ids: AHashMap<Arc<str>, SymbolId>,
}

impl SymbolTable {
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.names.len() as SymbolId;
        let name: Arc<str> = Arc::from(name);
        self.names.push(name.clone());
        self.ids.insert(name, id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, id: SymbolId) -> &str {
        &self.names[id as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledRule {
    pub lhs: SymbolId,
    pub rhs: Vec<SymbolId>,
}

/// A grammar frozen for parsing. Rule indices are priorities.
#[derive(Clone, Debug)]
pub struct CompiledGrammar {
    rules: Vec<CompiledRule>,
    by_lhs: Vec<Vec<usize>>,
    nullable: Vec<bool>,
    terminal: Vec<bool>,
    checked: Vec<bool>,
    symbols: Arc<SymbolTable>,
}

impl CompiledGrammar {
    pub fn rule(&self, index: usize) -> &CompiledRule {
        &self.rules[index]
    }

    pub fn rules_for(&self, symbol: SymbolId) -> &[usize] {
        self.by_lhs
            .get(symbol as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_nullable(&self, symbol: SymbolId) -> bool {
        self.nullable[symbol as usize]
    }

    pub fn is_terminal(&self, symbol: SymbolId) -> bool {
        self.terminal[symbol as usize]
    }

    pub fn is_checked(&self, symbol: SymbolId) -> bool {
        self.checked[symbol as usize]
    }

    pub fn symbol(&self, name: &str) -> Option<SymbolId> {
        self.symbols.lookup(name)
    }

    pub fn name(&self, symbol: SymbolId) -> &str {
        self.symbols.name(symbol)
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn rule_text(&self, index: usize) -> String {
        let r = &self.rules[index];
        let mut text = format!("{} ::=", self.name(r.lhs));
        for s in &r.rhs {
            text.push(' ');
            text.push_str(self.name(*s));
        }
        text
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sig(text: &str) -> RuleSignature {
        parse_doc(text).unwrap().remove(0)
    }

    #[test]
    fn test_terminal_names() {
        assert!(is_terminal_name("LOAD_CONST"));
        assert!(is_terminal_name("CALL_FUNCTION_2"));
        assert!(!is_terminal_name("expr"));
        assert!(!is_terminal_name("_X"));
        assert!(!is_terminal_name("LOAD_const"));
    }

    #[test]
    fn test_add_rule_dedups() {
        let mut g = Grammar::new();
        assert!(g.add_rule(sig("expr ::= LOAD_NAME")));
        assert!(!g.add_rule(sig("expr ::= LOAD_NAME")));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_override_moves_to_highest_priority() {
        let mut g = Grammar::new();
        g.add_doc("a ::= X\nb ::= Y\nc ::= Z").unwrap();
        assert_eq!(g.priority(&sig("a ::= X")), Some(0));
        g.override_rule(sig("a ::= X"));
        assert_eq!(g.priority(&sig("a ::= X")), Some(2));
        assert_eq!(g.priority(&sig("b ::= Y")), Some(0));
    }

    #[test]
    fn test_remove_rule() {
        let mut g = Grammar::new();
        g.add_doc("a ::= X\na ::= Y").unwrap();
        assert!(g.remove_rule(&sig("a ::= X")));
        assert!(!g.remove_rule(&sig("a ::= X")));
        assert_eq!(g.rules().map(|r| r.to_string()).collect::<Vec<_>>(), vec!["a ::= Y"]);
    }

    #[test]
    fn test_compile_nullable() {
        let mut g = Grammar::new();
        g.add_doc(
            "
            opt ::=
            opt ::= X
            pair ::= opt opt
            seq ::= pair Y
            ",
        )
        .unwrap();
        let c = g.compile();
        let id = |n: &str| c.symbol(n).unwrap();
        assert!(c.is_nullable(id("opt")));
        assert!(c.is_nullable(id("pair")));
        assert!(!c.is_nullable(id("seq")));
        assert!(c.is_terminal(id("X")));
        assert_eq!(c.rules_for(id("opt")).len(), 2);
        assert_eq!(c.rule_text(3), "seq ::= pair Y");
    }

    #[test]
    fn test_checked_symbols_compile() {
        let mut g = Grammar::new();
        g.add_doc("stmt ::= X").unwrap();
        g.set_checked("stmt");
        let c = g.compile();
        assert!(c.is_checked(c.symbol("stmt").unwrap()));
        assert!(!c.is_checked(c.symbol("X").unwrap()));
    }
}
