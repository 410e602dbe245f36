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

//! Properties of the version chain and of the grammars it folds.

use pretty_assertions::assert_eq;
use unpyc_decompiler::dialect::{delta_for, dialect_for};
use unpyc_decompiler::grammar::Grammar;
use unpyc_decompiler::grammar::synthesize::synthesize;
use unpyc_decompiler::scanner::CodeRole;
use unpyc_decompiler::{DecompileOptions, Decompiler, Version};
use unpyc_pycompile::{Mode, compile};

#[test]
fn test_each_grammar_extends_its_parent() {
    for pair in Version::SUPPORTED.windows(2) {
        let (older, newer) = (pair[0], pair[1]);
        let older_grammar = &dialect_for(older).unwrap().grammar;
        let newer_grammar = &dialect_for(newer).unwrap().grammar;
        let mut removed = Grammar::new();
        removed.add_doc(delta_for(newer).unwrap().removed).unwrap();
        for rule in older_grammar.rules() {
            assert!(
                newer_grammar.contains(rule) || removed.contains(rule),
                "{newer} lost {} ::= {} without removing it",
                rule.lhs,
                rule.rhs.join(" ")
            );
        }
    }
}

#[test]
fn test_session_grammar_leaves_dialect_alone() {
    let version = Version::V3_6;
    let before = dialect_for(version).unwrap().grammar.len();
    let code = compile("f(a, b=1)\nx = [y for y in z]\n", version, Mode::Exec).unwrap();
    let decompiler = Decompiler::new(version, DecompileOptions::default()).unwrap();
    let scanned = decompiler.scan(&code).unwrap();
    let session = decompiler.session_grammar(&scanned);
    assert!(session.len() > before);
    assert_eq!(dialect_for(version).unwrap().grammar.len(), before);
}

#[test]
fn test_synthesizing_twice_adds_nothing() {
    let version = Version::V3_5;
    let code = compile("f(a, *b)\nf(c, *d)\ng(**e)\n", version, Mode::Exec).unwrap();
    let decompiler = Decompiler::new(version, DecompileOptions::default()).unwrap();
    let scanned = decompiler.scan(&code).unwrap();
    assert_eq!(scanned.role, CodeRole::Module);

    let features = &decompiler.dialect().features;
    let mut grammar = decompiler.dialect().grammar.clone();
    let added = synthesize(&mut grammar, &scanned.customize, features);
    assert!(added > 0);
    let once: Vec<String> = grammar.rules().map(|r| r.to_string()).collect();

    assert_eq!(synthesize(&mut grammar, &scanned.customize, features), 0);
    let twice: Vec<String> = grammar.rules().map(|r| r.to_string()).collect();
    assert_eq!(once, twice);
}

#[test]
fn test_session_grammar_is_deterministic() {
    let version = Version::V3_6;
    let code = compile("f(a, *b, k=c)\ng(**e)\n", version, Mode::Exec).unwrap();
    let decompiler = Decompiler::new(version, DecompileOptions::default()).unwrap();
    let scanned = decompiler.scan(&code).unwrap();
    let first = decompiler.session_grammar(&scanned);
    let second = decompiler.session_grammar(&scanned);
    assert_eq!(
        first.rules().collect::<Vec<_>>(),
        second.rules().collect::<Vec<_>>()
    );
}
