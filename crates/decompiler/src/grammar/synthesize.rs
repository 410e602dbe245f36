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

//! Per-session rule synthesis for arity-bearing instructions.
//!
//! The scanner records each distinct arity it meets in the customize map; here each entry
//! becomes the handful of productions that parse exactly that arity. Rules go through
//! [`Grammar::add_rule`], so meeting the same shape twice adds nothing.

use std::collections::BTreeSet;

use itertools::repeat_n;
use tracing::trace;

use crate::dialect::Feature;
use crate::grammar::{Grammar, RuleSignature};
use crate::scanner::{CollectionKind, CustomizeMap, OpVariant, arity_kind};

#[derive(Default)]
struct Rhs(Vec<String>);

impl Rhs {
    fn sym(mut self, s: &str) -> Self {
        self.0.push(s.to_string());
        self
    }

    fn many(mut self, s: &str, n: u32) -> Self {
        self.0.extend(repeat_n(s.to_string(), n as usize));
        self
    }

    fn opt(self, s: &str, present: bool) -> Self {
        if present { self.sym(s) } else { self }
    }

    fn rule(self, lhs: &str) -> RuleSignature {
        RuleSignature::new(lhs, self.0)
    }
}

/// The productions parsing `kind` with arity `variant`.
pub fn productions(
    kind: &str,
    variant: &OpVariant,
    features: &BTreeSet<Feature>,
) -> Vec<RuleSignature> {
    match *variant {
        OpVariant::Call {
            positional,
            keywords,
            star,
            dstar,
        } => {
            let rhs = Rhs::default().sym("expr").many("pos_arg", positional);
            let rhs = if features.contains(&Feature::KeywordsBeforeStar) {
                rhs.many("kwarg", keywords).opt("star_arg", star)
            } else {
                rhs.opt("star_arg", star).many("kwarg", keywords)
            };
            vec![rhs.opt("dstar_arg", dstar).sym(kind).rule("call")]
        }
        OpVariant::KeywordCall {
            positional,
            keywords,
        } => vec![
            Rhs::default()
                .sym("expr")
                .many("pos_arg", positional)
                .many("kw_value", keywords)
                .sym("LOAD_KWNAMES")
                .sym(kind)
                .rule("call"),
        ],
        OpVariant::ExtendedCall { dstar } => vec![
            Rhs::default()
                .sym("expr")
                .sym("ex_args")
                .opt("ex_kwargs", dstar)
                .sym(kind)
                .rule("call"),
        ],
        OpVariant::MethodCall { positional } => vec![
            Rhs::default()
                .sym("expr")
                .sym("LOAD_METHOD")
                .many("pos_arg", positional)
                .sym(kind)
                .rule("call"),
        ],
        OpVariant::Collection { kind: c, count } => {
            let lhs = match c {
                CollectionKind::Tuple => "tuple",
                CollectionKind::List => "list",
                CollectionKind::Set => "set",
            };
            vec![Rhs::default().many("expr", count).sym(kind).rule(lhs)]
        }
        OpVariant::Map {
            count,
            store_map: true,
        } => vec![Rhs::default().sym(kind).many("dict_entry", count).rule("dict")],
        OpVariant::Map {
            count,
            store_map: false,
        } => vec![Rhs::default().many("dict_pair", count).sym(kind).rule("dict")],
        OpVariant::ConstKeyMap { count } => vec![
            Rhs::default()
                .many("expr", count)
                .sym("LOAD_CONST_KEYS")
                .sym(kind)
                .rule("dict"),
        ],
        OpVariant::UnpackWithCall { mapping, count } => {
            let lhs = if mapping {
                "map_unpack_call"
            } else {
                "tuple_unpack_call"
            };
            vec![Rhs::default().many("expr", count).sym(kind).rule(lhs)]
        }
        OpVariant::Unpack { count } => {
            vec![Rhs::default().sym(kind).many("store", count).rule("unpack")]
        }
        OpVariant::Slice { count } => {
            vec![Rhs::default().many("expr", count).sym(kind).rule("slice")]
        }
        OpVariant::StringBuild { count } => vec![
            Rhs::default()
                .many("fstring_part", count)
                .sym(kind)
                .rule("joined_str"),
        ],
        OpVariant::MakeFunction {
            defaults,
            kwdefaults,
            annotations,
            closure,
        } => {
            let operands = if features.contains(&Feature::KeywordDefaultsFirst) {
                Rhs::default()
                    .many("kw_default", kwdefaults)
                    .many("pos_default", defaults)
            } else {
                Rhs::default()
                    .many("pos_default", defaults)
                    .many("kw_default", kwdefaults)
            };
            let operands = operands
                .many("annotation", annotations)
                .opt("LOAD_ANNOTATION_NAMES", annotations > 0)
                .opt("closure", closure);
            function_rules(
                kind,
                operands.0,
                defaults > 0 || kwdefaults > 0,
                annotations > 0,
            )
        }
        OpVariant::MakeFunctionFlags {
            defaults,
            kwdefaults,
            annotations,
            closure,
        } => {
            let operands = Rhs::default()
                .opt("defaults_tuple", defaults)
                .opt("kwdefaults_map", kwdefaults)
                .opt("annotations_map", annotations)
                .opt("closure", closure);
            function_rules(kind, operands.0, defaults || kwdefaults, annotations)
        }
        OpVariant::BuildClass { bases } => vec![
            Rhs::default()
                .sym("LOAD_BUILD_CLASS")
                .sym("mkfunc")
                .sym("LOAD_STR")
                .many("pos_arg", bases)
                .sym(&arity_kind("CALL_FUNCTION", &[bases + 2]))
                .rule("build_class"),
        ],
        OpVariant::AnnotationStore => vec![
            Rhs::default()
                .sym("expr")
                .sym("store")
                .sym("expr")
                .sym(kind)
                .rule("ann_assign"),
            Rhs::default().sym("expr").sym(kind).rule("ann_decl"),
        ],
    }
}

/// A `def`, a lambda unless annotated and, with no operands at all, a list comprehension
/// built by the same `MAKE_FUNCTION` kind.
fn function_rules(
    kind: &str,
    operands: Vec<String>,
    defaults: bool,
    annotated: bool,
) -> Vec<RuleSignature> {
    let with = |load: &str| {
        let mut rhs = operands.clone();
        rhs.extend([load.to_string(), "LOAD_STR".to_string(), kind.to_string()]);
        rhs
    };
    let mut rules = vec![RuleSignature::new("mkfunc", with("LOAD_CODE"))];
    if !annotated {
        rules.push(RuleSignature::new("lambda", with("LOAD_LAMBDA")));
    }
    if !defaults && !annotated {
        let mut rhs = with("LOAD_LISTCOMP");
        rhs.extend(
            ["expr", "GET_ITER", "CALL_FUNCTION_1"]
                .iter()
                .map(|s| s.to_string()),
        );
        rules.push(RuleSignature::new("listcomp", rhs));
    }
    rules
}

/// Extend `grammar` with the productions for every entry of `customize`, in the map's order.
/// Returns how many rules were new.
pub fn synthesize(
    grammar: &mut Grammar,
    customize: &CustomizeMap,
    features: &BTreeSet<Feature>,
) -> usize {
    let mut added = 0;
    for (kind, variant) in customize.iter() {
        for rule in productions(kind, variant, features) {
            if grammar.add_rule(rule) {
                added += 1;
            }
        }
        trace!(kind, %variant, "synthesized");
    }
    added
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn text(rules: Vec<RuleSignature>) -> Vec<String> {
        rules.iter().map(|r| r.to_string()).collect()
    }

    fn features(fs: &[Feature]) -> BTreeSet<Feature> {
        fs.iter().copied().collect()
    }

    #[test]
    fn test_call_order_follows_version() {
        let v = OpVariant::Call {
            positional: 1,
            keywords: 1,
            star: true,
            dstar: true,
        };
        assert_eq!(
            text(productions(
                "CALL_FUNCTION_VAR_KW_1_1",
                &v,
                &features(&[Feature::KeywordsBeforeStar])
            )),
            vec![
                "call ::= expr pos_arg kwarg star_arg dstar_arg CALL_FUNCTION_VAR_KW_1_1"
            ]
        );
        assert_eq!(
            text(productions("CALL_FUNCTION_VAR_KW_1_1", &v, &features(&[]))),
            vec![
                "call ::= expr pos_arg star_arg kwarg dstar_arg CALL_FUNCTION_VAR_KW_1_1"
            ]
        );
    }

    #[test]
    fn test_zero_arity_rules_have_no_epsilon_parts() {
        let v = OpVariant::Call {
            positional: 0,
            keywords: 0,
            star: false,
            dstar: false,
        };
        assert_eq!(
            text(productions("CALL_FUNCTION_0", &v, &features(&[]))),
            vec!["call ::= expr CALL_FUNCTION_0"]
        );
        let v = OpVariant::Collection {
            kind: CollectionKind::Tuple,
            count: 0,
        };
        assert_eq!(
            text(productions("BUILD_TUPLE_0", &v, &features(&[]))),
            vec!["tuple ::= BUILD_TUPLE_0"]
        );
    }

    #[test]
    fn test_keyword_call_pairs_names_tuple() {
        let v = OpVariant::KeywordCall {
            positional: 1,
            keywords: 2,
        };
        assert_eq!(
            text(productions("CALL_FUNCTION_KW_1_2", &v, &features(&[]))),
            vec!["call ::= expr pos_arg kw_value kw_value LOAD_KWNAMES CALL_FUNCTION_KW_1_2"]
        );
    }

    #[test]
    fn test_make_function_legacy_operand_order() {
        let v = OpVariant::MakeFunction {
            defaults: 1,
            kwdefaults: 1,
            annotations: 0,
            closure: true,
        };
        let rules = text(productions(
            "MAKE_CLOSURE_257",
            &v,
            &features(&[Feature::KeywordDefaultsFirst]),
        ));
        assert_eq!(
            rules,
            vec![
                "mkfunc ::= kw_default pos_default closure LOAD_CODE LOAD_STR MAKE_CLOSURE_257",
                "lambda ::= kw_default pos_default closure LOAD_LAMBDA LOAD_STR MAKE_CLOSURE_257",
            ]
        );
    }

    #[test]
    fn test_plain_function_also_builds_listcomps() {
        let v = OpVariant::MakeFunctionFlags {
            defaults: false,
            kwdefaults: false,
            annotations: false,
            closure: false,
        };
        let rules = text(productions("MAKE_FUNCTION_0", &v, &features(&[])));
        assert_eq!(rules.len(), 3);
        assert_eq!(
            rules[2],
            "listcomp ::= LOAD_LISTCOMP LOAD_STR MAKE_FUNCTION_0 expr GET_ITER CALL_FUNCTION_1"
        );
    }

    #[test]
    fn test_legacy_annotations_precede_their_names() {
        let v = OpVariant::MakeFunction {
            defaults: 1,
            kwdefaults: 0,
            annotations: 2,
            closure: false,
        };
        assert_eq!(
            text(productions("MAKE_FUNCTION_196609", &v, &features(&[]))),
            vec![
                "mkfunc ::= pos_default annotation annotation LOAD_ANNOTATION_NAMES LOAD_CODE \
                 LOAD_STR MAKE_FUNCTION_196609"
            ]
        );
    }

    #[test]
    fn test_annotated_function_flags() {
        let v = OpVariant::MakeFunctionFlags {
            defaults: true,
            kwdefaults: false,
            annotations: true,
            closure: true,
        };
        assert_eq!(
            text(productions("MAKE_FUNCTION_13", &v, &features(&[]))),
            vec![
                "mkfunc ::= defaults_tuple annotations_map closure LOAD_CODE LOAD_STR \
                 MAKE_FUNCTION_13"
            ]
        );
    }

    #[test]
    fn test_build_class_arity() {
        let rules = text(productions(
            "LOAD_BUILD_CLASS/CALL_FUNCTION_3",
            &OpVariant::BuildClass { bases: 1 },
            &features(&[]),
        ));
        assert_eq!(
            rules,
            vec!["build_class ::= LOAD_BUILD_CLASS mkfunc LOAD_STR pos_arg CALL_FUNCTION_3"]
        );
    }

    #[test]
    fn test_synthesize_is_idempotent() {
        let mut customize = CustomizeMap::new();
        customize
            .register(
                "BUILD_LIST_2",
                OpVariant::Collection {
                    kind: CollectionKind::List,
                    count: 2,
                },
            )
            .unwrap();
        customize
            .register("UNPACK_SEQUENCE_2", OpVariant::Unpack { count: 2 })
            .unwrap();
        let mut grammar = Grammar::new();
        let fs = features(&[]);
        assert_eq!(synthesize(&mut grammar, &customize, &fs), 2);
        let before = grammar.len();
        assert_eq!(synthesize(&mut grammar, &customize, &fs), 0);
        assert_eq!(grammar.len(), before);
    }
}
