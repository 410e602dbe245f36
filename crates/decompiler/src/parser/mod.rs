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

//! Earley recognition over scanner tokens, and extraction of one parse tree from the chart.
//!
//! Nullable nonterminals are handled with the Aycock-Horspool predictor: predicting a nullable
//! symbol also advances over it. Completions of checked nonterminals are filtered by jump
//! containment before they enter the chart, so the tree extractor never has to undo a choice.

mod tree;

use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use tracing::{debug, trace};

use crate::error::ParseError;
use crate::grammar::{CompiledGrammar, GrammarError, SymbolId};
use crate::token::Token;

use tree::Unsplit;

pub use tree::{Node, NodeId, NodeKind, ParseTree};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct Item {
    rule: usize,
    dot: usize,
    origin: usize,
}

#[derive(Default)]
struct ChartSet {
    items: Vec<Item>,
    seen: AHashSet<Item>,
    /// Items whose next symbol is the key nonterminal.
    waiting: AHashMap<SymbolId, Vec<Item>>,
    /// Rules completed here, by left-hand side and origin.
    completed: AHashMap<(SymbolId, usize), Vec<usize>>,
    /// Origins at which each nonterminal completed here, in completion order.
    origins: AHashMap<SymbolId, Vec<usize>>,
}

impl ChartSet {
    fn add(&mut self, item: Item) {
        if self.seen.insert(item) {
            self.items.push(item);
        }
    }
}

/// A filled chart: one set per position, `tokens.len() + 1` in all.
struct Chart {
    sets: Vec<ChartSet>,
}

pub struct Parser<'g> {
    grammar: &'g CompiledGrammar,
    start: SymbolId,
}

/// The token span check applied to checked nonterminals: every jump inside `start..end` must
/// land in `start..=end` or on the target of an unconditional jump right after the span.
struct JumpIndex<'t> {
    tokens: &'t [Token],
    jumps: Vec<usize>,
}

impl<'t> JumpIndex<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        let jumps = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.target.is_some())
            .map(|(i, _)| i)
            .collect();
        Self { tokens, jumps }
    }

    fn contained(&self, start: usize, end: usize) -> bool {
        let follow = self
            .tokens
            .get(end)
            .filter(|t| t.is_unconditional_jump())
            .and_then(|t| t.target);
        let first = self.jumps.partition_point(|j| *j < start);
        self.jumps[first..]
            .iter()
            .take_while(|j| **j < end)
            .all(|j| match self.tokens[*j].target {
                Some(t) => (start..=end).contains(&t) || Some(t) == follow,
                None => true,
            })
    }
}

impl<'g> Parser<'g> {
    pub fn new(grammar: &'g CompiledGrammar, start: &str) -> Result<Self, GrammarError> {
        let start = grammar
            .symbol(start)
            .filter(|s| !grammar.rules_for(*s).is_empty())
            .ok_or_else(|| GrammarError::UnknownStart(start.to_string()))?;
        Ok(Self { grammar, start })
    }

    /// Parse `tokens` into a tree rooted at the start symbol covering every token.
    pub fn parse(&self, tokens: &[Token]) -> Result<ParseTree, ParseError> {
        let symbols: Vec<Option<SymbolId>> = tokens
            .iter()
            .map(|t| self.grammar.symbol(&t.kind))
            .collect();
        let chart = self.recognize(tokens, &symbols)?;
        tree::extract(self.grammar, &chart, &symbols, self.start).map_err(|unsplit| {
            let error = self.unsplit_error(tokens, unsplit);
            debug!(%error, end = unsplit.end, "no tree for a recognized span");
            error
        })
    }

    /// The tokens were recognized, but no tree could be cut for `unsplit`.
    fn unsplit_error(&self, tokens: &[Token], unsplit: Unsplit) -> ParseError {
        let token = tokens.get(unsplit.start);
        ParseError {
            position: unsplit.start,
            found: token.map_or_else(|| "end of input".to_string(), |t| t.kind.clone()),
            offset: token.map(|t| t.offset.clone()),
            expected: vec![self.grammar.name(unsplit.symbol).to_string()],
        }
    }

    fn recognize(
        &self,
        tokens: &[Token],
        symbols: &[Option<SymbolId>],
    ) -> Result<Chart, ParseError> {
        let g = self.grammar;
        let n = tokens.len();
        let jumps = JumpIndex::new(tokens);
        let mut sets: Vec<ChartSet> = (0..=n).map(|_| ChartSet::default()).collect();
        for rule in g.rules_for(self.start) {
            sets[0].add(Item {
                rule: *rule,
                dot: 0,
                origin: 0,
            });
        }

        for i in 0..=n {
            let mut j = 0;
            while j < sets[i].items.len() {
                let item = sets[i].items[j];
                j += 1;
                let rule = g.rule(item.rule);
                if let Some(&next) = rule.rhs.get(item.dot) {
                    let advanced = Item {
                        dot: item.dot + 1,
                        ..item
                    };
                    if g.is_terminal(next) {
                        if i < n && symbols[i] == Some(next) {
                            sets[i + 1].add(advanced);
                        }
                        continue;
                    }
                    sets[i].waiting.entry(next).or_default().push(item);
                    for r in g.rules_for(next) {
                        sets[i].add(Item {
                            rule: *r,
                            dot: 0,
                            origin: i,
                        });
                    }
                    if g.is_nullable(next) {
                        sets[i].add(advanced);
                    }
                    continue;
                }

                let lhs = rule.lhs;
                if g.is_checked(lhs) && !jumps.contained(item.origin, i) {
                    trace!(rule = %g.rule_text(item.rule), start = item.origin, end = i, "rejected by jump check");
                    continue;
                }
                let set = &mut sets[i];
                let rules = set.completed.entry((lhs, item.origin)).or_default();
                if rules.is_empty() {
                    set.origins.entry(lhs).or_default().push(item.origin);
                }
                rules.push(item.rule);
                let waiting = sets[item.origin]
                    .waiting
                    .get(&lhs)
                    .cloned()
                    .unwrap_or_default();
                for w in waiting {
                    sets[i].add(Item {
                        dot: w.dot + 1,
                        ..w
                    });
                }
            }

            if i < n && sets[i + 1].items.is_empty() {
                let error = ParseError {
                    position: i,
                    found: tokens[i].kind.clone(),
                    offset: Some(tokens[i].offset.clone()),
                    expected: expected_terminals(g, &sets[i]),
                };
                debug!(%error, "parse failed");
                return Err(error);
            }
        }

        if !sets[n].completed.contains_key(&(self.start, 0)) {
            let error = ParseError {
                position: n,
                found: "end of input".to_string(),
                offset: None,
                expected: expected_terminals(g, &sets[n]),
            };
            debug!(%error, "parse failed");
            return Err(error);
        }
        Ok(Chart { sets })
    }
}

fn expected_terminals(g: &CompiledGrammar, set: &ChartSet) -> Vec<String> {
    set.items
        .iter()
        .filter_map(|item| g.rule(item.rule).rhs.get(item.dot).copied())
        .filter(|s| g.is_terminal(*s))
        .map(|s| g.name(s).to_string())
        .sorted()
        .dedup()
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use unpyc_bytecode::ArgValue;

    use super::*;
    use crate::grammar::Grammar;

    fn tok(kind: &str) -> Token {
        Token {
            kind: kind.to_string(),
            opcode: None,
            number: None,
            arg: None,
            value: ArgValue::None,
            repr: String::new(),
            offset: String::new(),
            byte_offset: 0,
            line: None,
            is_jump_target: false,
            synthetic: false,
            target: None,
            variant: None,
        }
    }

    fn toks(kinds: &str) -> Vec<Token> {
        kinds.split_whitespace().map(tok).collect()
    }

    fn grammar(doc: &str) -> CompiledGrammar {
        let mut g = Grammar::new();
        g.add_doc(doc).unwrap();
        g.compile()
    }

    #[test]
    fn test_parses_left_recursion() {
        let g = grammar(
            "
            stmts ::= stmt
            stmts ::= stmts stmt
            stmt ::= expr POP_TOP
            expr ::= LOAD_NAME
            expr ::= expr expr BINARY_ADD
            ",
        );
        let tokens = toks("LOAD_NAME LOAD_NAME BINARY_ADD POP_TOP LOAD_NAME POP_TOP");
        let tree = Parser::new(&g, "stmts").unwrap().parse(&tokens).unwrap();
        assert_eq!(
            tree.sexpr(),
            "(stmts (stmts (stmt (expr (expr LOAD_NAME) (expr LOAD_NAME) BINARY_ADD) POP_TOP)) \
             (stmt (expr LOAD_NAME) POP_TOP))"
        );
    }

    #[test]
    fn test_nullable_symbols() {
        let g = grammar(
            "
            block ::= OPEN opt opt CLOSE
            opt ::=
            opt ::= X
            ",
        );
        let p = Parser::new(&g, "block").unwrap();
        assert!(p.parse(&toks("OPEN CLOSE")).is_ok());
        assert!(p.parse(&toks("OPEN X CLOSE")).is_ok());
        assert!(p.parse(&toks("OPEN X X CLOSE")).is_ok());
        assert!(p.parse(&toks("OPEN X X X CLOSE")).is_err());
    }

    #[test]
    fn test_error_reports_position_and_expected() {
        let g = grammar(
            "
            stmt ::= expr POP_TOP
            expr ::= LOAD_NAME
            expr ::= LOAD_CONST
            ",
        );
        let p = Parser::new(&g, "stmt").unwrap();
        let err = p.parse(&toks("LOAD_NAME RETURN_VALUE")).unwrap_err();
        assert_eq!(err.position, 1);
        assert_eq!(err.found, "RETURN_VALUE");
        assert_eq!(err.expected, vec!["POP_TOP".to_string()]);

        let err = p.parse(&toks("LOAD_NAME")).unwrap_err();
        assert_eq!(err.position, 1);
        assert_eq!(err.found, "end of input");

        let err = p.parse(&toks("STORE_NAME")).unwrap_err();
        assert_eq!(err.position, 0);
        assert_eq!(err.expected, vec!["LOAD_CONST".to_string(), "LOAD_NAME".to_string()]);
    }

    #[test]
    fn test_unsplit_span_is_reported_where_it_starts() {
        let g = grammar(
            "
            stmts ::= stmt
            stmts ::= stmts stmt
            stmt ::= expr POP_TOP
            expr ::= LOAD_NAME
            ",
        );
        let p = Parser::new(&g, "stmts").unwrap();
        let mut tokens = toks("LOAD_NAME POP_TOP LOAD_NAME POP_TOP");
        tokens[2].offset = "4".to_string();
        let unsplit = Unsplit {
            symbol: g.symbol("stmt").unwrap(),
            start: 2,
            end: 4,
            depth: 2,
        };
        let err = p.unsplit_error(&tokens, unsplit);
        assert_eq!(err.position, 2);
        assert_eq!(err.found, "LOAD_NAME");
        assert_eq!(err.offset.as_deref(), Some("4"));
        assert_eq!(err.expected, vec!["stmt".to_string()]);
    }

    #[test]
    fn test_unknown_start() {
        let g = grammar("a ::= X");
        assert!(matches!(
            Parser::new(&g, "module"),
            Err(GrammarError::UnknownStart(_))
        ));
    }

    #[test]
    fn test_higher_priority_rule_wins() {
        let g = grammar(
            "
            top ::= x
            x ::= a
            x ::= b
            a ::= T
            b ::= T
            ",
        );
        let tree = Parser::new(&g, "top").unwrap().parse(&toks("T")).unwrap();
        assert_eq!(tree.sexpr(), "(top (x (b T)))");
    }

    #[test]
    fn test_rightmost_child_takes_longest_span() {
        let g = grammar(
            "
            top ::= l r
            l ::=
            l ::= X
            r ::= X
            r ::= X X
            ",
        );
        let tree = Parser::new(&g, "top").unwrap().parse(&toks("X X")).unwrap();
        assert_eq!(tree.sexpr(), "(top l (r X X))");
    }

    #[test]
    fn test_jump_check_rejects_escaping_spans() {
        let g = {
            let mut g = Grammar::new();
            g.add_doc(
                "
                top ::= stmt stmt
                top ::= stmt
                stmt ::= J X
                stmt ::= J X X
                stmt ::= X
                ",
            )
            .unwrap();
            g.set_checked("stmt");
            g.compile()
        };
        // The jump at 0 targets token 3, so a statement starting there must reach the end.
        let mut tokens = toks("J X X");
        tokens[0].target = Some(3);
        let tree = Parser::new(&g, "top").unwrap().parse(&tokens).unwrap();
        assert_eq!(tree.sexpr(), "(top (stmt J X X))");

        tokens[0].target = Some(2);
        let tree = Parser::new(&g, "top").unwrap().parse(&tokens).unwrap();
        assert_eq!(tree.sexpr(), "(top (stmt J X X))");

        // Escaping past the span is only accepted when the jump after it goes the same way.
        let mut tokens = toks("J X JUMP_FORWARD");
        tokens[0].target = Some(5);
        tokens[2].target = Some(5);
        let g2 = {
            let mut g = Grammar::new();
            g.add_doc("top ::= stmt JUMP_FORWARD\nstmt ::= J X").unwrap();
            g.set_checked("stmt");
            g.compile()
        };
        assert!(Parser::new(&g2, "top").unwrap().parse(&tokens).is_ok());
        tokens[2].target = Some(4);
        assert!(Parser::new(&g2, "top").unwrap().parse(&tokens).is_err());
    }

    #[test]
    fn test_deterministic_trees() {
        let g = grammar(
            "
            s ::= s s
            s ::= X
            ",
        );
        let p = Parser::new(&g, "s").unwrap();
        let tokens = toks("X X X X");
        let first = p.parse(&tokens).unwrap().sexpr();
        for _ in 0..5 {
            assert_eq!(p.parse(&tokens).unwrap().sexpr(), first);
        }
    }
}
