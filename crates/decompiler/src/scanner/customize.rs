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

use std::fmt::{Display, Formatter};

use indexmap::IndexMap;
use strum::Display as StrumDisplay;

/// Which display an arity-bearing `BUILD_*` instruction builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum CollectionKind {
    Tuple,
    List,
    Set,
}

/// The decoded arity of an instruction whose grammar shape depends on its argument.
///
/// Each variant corresponds to one synthesis family; the synthesizer matches on it
/// exhaustively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpVariant {
    /// `CALL_FUNCTION[_VAR][_KW]` before 3.6, and plain `CALL_FUNCTION` from 3.6 on.
    Call {
        positional: u32,
        keywords: u32,
        star: bool,
        dstar: bool,
    },
    /// 3.6+ `CALL_FUNCTION_KW`; the names arrive as one constant tuple.
    KeywordCall { positional: u32, keywords: u32 },
    /// 3.6+ `CALL_FUNCTION_EX`.
    ExtendedCall { dstar: bool },
    MethodCall { positional: u32 },
    Collection { kind: CollectionKind, count: u32 },
    /// `BUILD_MAP`; before 3.5 each entry is followed by `STORE_MAP`.
    Map { count: u32, store_map: bool },
    ConstKeyMap { count: u32 },
    /// `BUILD_TUPLE_UNPACK_WITH_CALL` or, with `mapping`, `BUILD_MAP_UNPACK_WITH_CALL`.
    UnpackWithCall { mapping: bool, count: u32 },
    Unpack { count: u32 },
    Slice { count: u32 },
    StringBuild { count: u32 },
    /// `MAKE_FUNCTION`/`MAKE_CLOSURE` before 3.6: counts of default operands, and of
    /// annotation values ahead of their names tuple.
    MakeFunction {
        defaults: u32,
        kwdefaults: u32,
        annotations: u32,
        closure: bool,
    },
    /// 3.6+ `MAKE_FUNCTION` with its flag byte.
    MakeFunctionFlags {
        defaults: bool,
        kwdefaults: bool,
        annotations: bool,
        closure: bool,
    },
    /// A call that may close a `LOAD_BUILD_CLASS` sequence with `bases` base classes.
    BuildClass { bases: u32 },
    AnnotationStore,
}

impl Display for OpVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OpVariant::Call {
                positional,
                keywords,
                star,
                dstar,
            } => write!(
                f,
                "call({positional} positional, {keywords} keyword, star={star}, dstar={dstar})"
            ),
            OpVariant::KeywordCall {
                positional,
                keywords,
            } => write!(f, "keyword call({positional} positional, {keywords} keyword)"),
            OpVariant::ExtendedCall { dstar } => write!(f, "extended call(dstar={dstar})"),
            OpVariant::MethodCall { positional } => write!(f, "method call({positional})"),
            OpVariant::Collection { kind, count } => write!(f, "{kind}({count})"),
            OpVariant::Map { count, store_map } => {
                write!(f, "map({count}, store_map={store_map})")
            }
            OpVariant::ConstKeyMap { count } => write!(f, "const key map({count})"),
            OpVariant::UnpackWithCall { mapping, count } => {
                write!(f, "unpack with call({count}, mapping={mapping})")
            }
            OpVariant::Unpack { count } => write!(f, "unpack({count})"),
            OpVariant::Slice { count } => write!(f, "slice({count})"),
            OpVariant::StringBuild { count } => write!(f, "string({count})"),
            OpVariant::MakeFunction {
                defaults,
                kwdefaults,
                annotations,
                closure,
            } => write!(
                f,
                "make function({defaults} defaults, {kwdefaults} kwdefaults, \
                 {annotations} annotations, closure={closure})"
            ),
            OpVariant::MakeFunctionFlags {
                defaults,
                kwdefaults,
                annotations,
                closure,
            } => write!(
                f,
                "make function(defaults={defaults}, kwdefaults={kwdefaults}, \
                 annotations={annotations}, closure={closure})"
            ),
            OpVariant::BuildClass { bases } => write!(f, "build class({bases} bases)"),
            OpVariant::AnnotationStore => write!(f, "annotation store"),
        }
    }
}

/// The grammar kind for an arity-bearing opcode: the opcode name suffixed with its arities.
pub fn arity_kind(name: &str, arities: &[u32]) -> String {
    let mut kind = name.to_string();
    for a in arities {
        kind.push('_');
        kind.push_str(&a.to_string());
    }
    kind
}

/// Distinct arity-bearing variants seen in one code object, keyed by grammar kind, in the
/// order they were first seen.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomizeMap {
    entries: IndexMap<String, OpVariant>,
}

impl CustomizeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `variant` under `kind`. Seeing the same pair again is a no-op; a different variant
    /// under a kind already taken returns the one registered first.
    pub fn register(&mut self, kind: &str, variant: OpVariant) -> Result<bool, OpVariant> {
        match self.entries.get(kind) {
            Some(existing) if *existing == variant => Ok(false),
            Some(existing) => Err(*existing),
            None => {
                self.entries.insert(kind.to_string(), variant);
                Ok(true)
            }
        }
    }

    pub fn get(&self, kind: &str) -> Option<&OpVariant> {
        self.entries.get(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OpVariant)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut map = CustomizeMap::new();
        let v = OpVariant::Collection {
            kind: CollectionKind::Tuple,
            count: 2,
        };
        assert_eq!(map.register("BUILD_TUPLE_2", v), Ok(true));
        assert_eq!(map.register("BUILD_TUPLE_2", v), Ok(false));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_register_collision_reports_existing() {
        let mut map = CustomizeMap::new();
        let first = OpVariant::Unpack { count: 2 };
        map.register("X_2", first).unwrap();
        assert_eq!(map.register("X_2", OpVariant::Slice { count: 2 }), Err(first));
    }

    #[test]
    fn test_insertion_order_kept() {
        let mut map = CustomizeMap::new();
        map.register("B_1", OpVariant::Unpack { count: 1 }).unwrap();
        map.register("A_3", OpVariant::Unpack { count: 3 }).unwrap();
        let kinds: Vec<_> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec!["B_1", "A_3"]);
    }

    #[test]
    fn test_arity_kind() {
        assert_eq!(arity_kind("CALL_FUNCTION", &[2]), "CALL_FUNCTION_2");
        assert_eq!(arity_kind("CALL_FUNCTION_KW", &[1, 2]), "CALL_FUNCTION_KW_1_2");
        assert_eq!(arity_kind("CALL_FUNCTION_EX", &[]), "CALL_FUNCTION_EX");
    }
}
