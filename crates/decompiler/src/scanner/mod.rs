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

//! Turns one code object's instructions into grammar terminals.
//!
//! Besides renaming opcodes into the kinds the grammar speaks about, the scanner inserts a
//! `COME_FROM` in front of every instruction that a forward jump lands on, resolves jump
//! targets to token indices, records the arity of every variable-arity instruction in the
//! customize map, and scans nested code objects recursively.

mod customize;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use strum::Display;
use tracing::trace;
use unpyc_bytecode::{
    ArgValue, BytecodeError, CodeObject, Constant, Instruction, Opcode, disassemble,
};

use crate::dialect::{Dialect, Feature};
use crate::error::{CodeLocation, DecompileError};
use crate::token::{JUMP_BACK, JUMP_FORWARD, JUMP_FORWARD_NEXT, Token};

pub use customize::{CollectionKind, CustomizeMap, OpVariant, arity_kind};

/// What a code object is for, decided from how its parent loads it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CodeRole {
    Module,
    Function,
    Class,
    Lambda,
    ListComp,
}

/// A scanned code object and, keyed by constant index, the code objects it creates.
#[derive(Clone, Debug)]
pub struct ScannedCode {
    pub location: CodeLocation,
    pub code: Arc<CodeObject>,
    pub role: CodeRole,
    pub tokens: Vec<Token>,
    pub customize: CustomizeMap,
    pub nested: BTreeMap<usize, ScannedCode>,
}

impl ScannedCode {
    /// The token listing, one token per line.
    pub fn listing(&self) -> String {
        self.tokens
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{i:>4} {t}\n"))
            .collect()
    }
}

pub struct Scanner<'a> {
    dialect: &'a Dialect,
}

/// Per-code-object scanning state.
struct Scan<'a> {
    dialect: &'a Dialect,
    location: &'a CodeLocation,
    tokens: Vec<Token>,
    customize: CustomizeMap,
    /// Positional counts of plain calls, candidates for closing a class build.
    plain_calls: Vec<u32>,
    builds_classes: bool,
    /// Constant index and role of every code object loaded.
    loads: Vec<(usize, CodeRole)>,
    /// Offsets of forward jumps that only skip other jumps to the same place.
    fall_through: BTreeSet<u32>,
}

impl<'a> Scanner<'a> {
    pub fn new(dialect: &'a Dialect) -> Self {
        Self { dialect }
    }

    pub fn scan(
        &self,
        code: &Arc<CodeObject>,
        role: CodeRole,
        location: CodeLocation,
    ) -> Result<ScannedCode, DecompileError> {
        let instructions = disassemble(code, self.dialect.version, &self.dialect.opcodes)
            .map_err(|e| match e {
                BytecodeError::UnknownOpcode { opcode, offset } => {
                    DecompileError::UnsupportedOpcode {
                        location: location.clone(),
                        opcode: format!("#{opcode}"),
                        offset,
                    }
                }
                source => DecompileError::Bytecode {
                    location: location.clone(),
                    source,
                },
            })?;

        let mut scan = Scan {
            dialect: self.dialect,
            location: &location,
            tokens: Vec::with_capacity(instructions.len() * 5 / 4),
            customize: CustomizeMap::new(),
            plain_calls: vec![],
            builds_classes: false,
            loads: vec![],
            fall_through: BTreeSet::new(),
        };
        scan.run(&instructions)?;
        let Scan {
            tokens,
            mut customize,
            plain_calls,
            builds_classes,
            loads,
            ..
        } = scan;

        if builds_classes {
            for positional in plain_calls.into_iter().filter(|p| *p >= 2) {
                let call = arity_kind("CALL_FUNCTION", &[positional]);
                let key = format!("LOAD_BUILD_CLASS/{call}");
                register(
                    &mut customize,
                    &location,
                    &key,
                    OpVariant::BuildClass {
                        bases: positional - 2,
                    },
                )?;
            }
        }
        trace!(%location, tokens = tokens.len(), variants = customize.len(), "scanned");

        let mut nested = BTreeMap::new();
        for (index, child_role) in loads {
            if nested.contains_key(&index) {
                continue;
            }
            let Some(child) = code.consts.get(index).and_then(Constant::as_code) else {
                continue;
            };
            let child_location = location.nested(&child.name, child.first_line);
            nested.insert(index, self.scan(child, child_role, child_location)?);
        }

        Ok(ScannedCode {
            location,
            code: code.clone(),
            role,
            tokens,
            customize,
            nested,
        })
    }
}

fn register(
    customize: &mut CustomizeMap,
    location: &CodeLocation,
    kind: &str,
    variant: OpVariant,
) -> Result<(), DecompileError> {
    customize
        .register(kind, variant)
        .map(|_| ())
        .map_err(|existing| DecompileError::SynthesisCollision {
            location: location.clone(),
            kind: kind.to_string(),
            existing: existing.to_string(),
            new: variant.to_string(),
        })
}

fn is_dropped(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::Nop | Opcode::ExtendedArg)
}

fn is_goto(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::JumpForward | Opcode::JumpAbsolute)
}

/// Unconditional forward jumps that land where control would arrive anyway: nothing but other
/// jumps to the same target lies between the jump and its target.
fn fall_through_jumps(instructions: &[Instruction]) -> BTreeSet<u32> {
    instructions
        .iter()
        .enumerate()
        .filter(|(_, inst)| is_goto(inst.opcode))
        .filter_map(|(n, inst)| {
            let target = inst.jump_target().filter(|t| *t > inst.offset)?;
            instructions[n + 1..]
                .iter()
                .take_while(|i| i.offset < target)
                .all(|i| {
                    is_dropped(i.opcode)
                        || (is_goto(i.opcode) && i.jump_target() == Some(target))
                })
                .then_some(inst.offset)
        })
        .collect()
}

impl Scan<'_> {
    fn run(&mut self, instructions: &[Instruction]) -> Result<(), DecompileError> {
        if self.dialect.has(Feature::JumpPastMissingElse) {
            self.fall_through = fall_through_jumps(instructions);
        }
        let mut incoming: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for i in instructions {
            if let Some(target) = i.jump_target()
                && target > i.offset
            {
                incoming.entry(target).or_default().push(i.offset);
            }
        }

        let mut first_token_at: BTreeMap<u32, usize> = BTreeMap::new();
        let mut jump_offsets: Vec<(usize, u32)> = vec![];
        let mut line = None;
        for (n, inst) in instructions.iter().enumerate() {
            first_token_at.insert(inst.offset, self.tokens.len());
            if let Some(sources) = incoming.get(&inst.offset) {
                for (k, source) in sources.iter().enumerate() {
                    self.tokens.push(Token::come_from(inst.offset, k, *source));
                }
            }
            line = inst.starts_line.or(line);
            if is_dropped(inst.opcode)
                || (inst.opcode == Opcode::SetupAnnotations
                    && self.dialect.has(Feature::DropSetupAnnotations))
            {
                continue;
            }
            let next = instructions[n + 1..]
                .iter()
                .find(|i| !is_dropped(i.opcode))
                .map(|i| i.opcode);
            let (kind, variant) = self.classify(inst, next)?;
            if let Some(variant) = variant {
                register(&mut self.customize, self.location, &kind, variant)?;
            }
            if let Some(target) = inst.jump_target() {
                jump_offsets.push((self.tokens.len(), target));
            }
            self.tokens.push(Token {
                kind,
                opcode: Some(inst.opcode),
                number: Some(inst.number),
                arg: inst.arg,
                value: inst.argval.clone(),
                repr: inst.argrepr.clone(),
                offset: inst.offset.to_string(),
                byte_offset: inst.offset,
                line,
                is_jump_target: inst.is_jump_target,
                synthetic: false,
                target: None,
                variant,
            });
        }

        let end = self.tokens.len();
        for (index, target) in jump_offsets {
            let resolved = first_token_at
                .range(target..)
                .next()
                .map(|(_, t)| *t)
                .unwrap_or(end);
            self.tokens[index].target = Some(resolved);
        }
        Ok(())
    }

    fn unsupported(&self, inst: &Instruction) -> DecompileError {
        DecompileError::UnsupportedVariant {
            location: self.location.clone(),
            opcode: inst.name().to_string(),
            arg: inst.arg.unwrap_or_default(),
            offset: inst.offset,
        }
    }

    /// Before 3.6 the names of a function's annotations are a constant tuple loaded after
    /// their values, below the code object and any closure tuple. Relabel it so the grammar
    /// can tell it from an ordinary constant.
    fn label_annotation_names(&mut self, closure: bool, names: u32) -> bool {
        let mut at = self.tokens.len().checked_sub(3);
        if closure {
            at = at.and_then(|at| match self.tokens[at].variant {
                Some(OpVariant::Collection {
                    kind: CollectionKind::Tuple,
                    count,
                }) => at.checked_sub(count as usize + 1),
                _ => None,
            });
        }
        let Some(token) = at.map(|at| &mut self.tokens[at]) else {
            return false;
        };
        let fits = token.opcode == Some(Opcode::LoadConst)
            && token
                .constant()
                .and_then(Constant::as_tuple)
                .is_some_and(|t| t.len() == names as usize);
        if fits {
            token.kind = "LOAD_ANNOTATION_NAMES".to_string();
        }
        fits
    }

    /// The grammar kind of `inst`, and its arity when it has one.
    fn classify(
        &mut self,
        inst: &Instruction,
        next: Option<Opcode>,
    ) -> Result<(String, Option<OpVariant>), DecompileError> {
        let arg = inst.arg.unwrap_or_default();
        let name = inst.name();
        let keyword_tuples = self.dialect.has(Feature::KeywordNameTuple);
        let plain = |kind: &str| Ok((kind.to_string(), None));
        let with = |kind: String, variant: OpVariant| Ok((kind, Some(variant)));

        match inst.opcode {
            Opcode::LoadConst => match inst.argval.clone() {
                ArgValue::Const(Constant::Code(code)) => {
                    let (kind, role) = match code.name.as_str() {
                        "<lambda>" => ("LOAD_LAMBDA", CodeRole::Lambda),
                        "<listcomp>" => ("LOAD_LISTCOMP", CodeRole::ListComp),
                        "<genexpr>" | "<setcomp>" | "<dictcomp>" => {
                            return Err(self.unsupported(inst));
                        }
                        _ if self.tokens.last().is_some_and(|t| t.kind == "LOAD_BUILD_CLASS") => {
                            ("LOAD_CODE", CodeRole::Class)
                        }
                        _ => ("LOAD_CODE", CodeRole::Function),
                    };
                    self.loads.push((arg as usize, role));
                    plain(kind)
                }
                ArgValue::Const(Constant::Str(_)) => plain("LOAD_STR"),
                ArgValue::Const(Constant::Tuple(_))
                    if keyword_tuples && next == Some(Opcode::CallFunctionKw) =>
                {
                    plain("LOAD_KWNAMES")
                }
                ArgValue::Const(Constant::Tuple(_))
                    if next == Some(Opcode::BuildConstKeyMap) =>
                {
                    plain("LOAD_CONST_KEYS")
                }
                _ => plain(name),
            },
            Opcode::LoadName
                if self.dialect.has(Feature::AnnotationsMapping)
                    && inst.argval == ArgValue::Name("__annotations__".into()) =>
            {
                plain("LOAD_ANNOTATIONS")
            }
            Opcode::JumpForward | Opcode::JumpAbsolute
                if self.fall_through.contains(&inst.offset) =>
            {
                plain(JUMP_FORWARD_NEXT)
            }
            Opcode::JumpAbsolute => match inst.jump_target() {
                Some(target) if target <= inst.offset => plain(JUMP_BACK),
                _ => plain(JUMP_FORWARD),
            },
            Opcode::FormatValue if arg & 4 != 0 => plain("FORMAT_VALUE_ATTR"),
            Opcode::CallFunction
            | Opcode::CallFunctionVar
            | Opcode::CallFunctionVarKw
            | Opcode::CallFunctionKw
                if !keyword_tuples =>
            {
                let (positional, keywords) = (arg & 0xff, (arg >> 8) & 0xff);
                let star = matches!(
                    inst.opcode,
                    Opcode::CallFunctionVar | Opcode::CallFunctionVarKw
                );
                let dstar = matches!(
                    inst.opcode,
                    Opcode::CallFunctionKw | Opcode::CallFunctionVarKw
                );
                if !star && !dstar && keywords == 0 {
                    self.plain_calls.push(positional);
                }
                let kind = if keywords == 0 {
                    arity_kind(name, &[positional])
                } else {
                    arity_kind(name, &[positional, keywords])
                };
                with(
                    kind,
                    OpVariant::Call {
                        positional,
                        keywords,
                        star,
                        dstar,
                    },
                )
            }
            Opcode::CallFunction => {
                self.plain_calls.push(arg);
                with(
                    arity_kind(name, &[arg]),
                    OpVariant::Call {
                        positional: arg,
                        keywords: 0,
                        star: false,
                        dstar: false,
                    },
                )
            }
            Opcode::CallFunctionKw => {
                let keywords = match self.tokens.last() {
                    Some(t) if t.kind == "LOAD_KWNAMES" => t
                        .constant()
                        .and_then(Constant::as_tuple)
                        .map(|names| names.len() as u32),
                    _ => None,
                };
                match keywords {
                    Some(keywords) if keywords >= 1 && keywords <= arg => {
                        let positional = arg - keywords;
                        with(
                            arity_kind(name, &[positional, keywords]),
                            OpVariant::KeywordCall {
                                positional,
                                keywords,
                            },
                        )
                    }
                    _ => Err(self.unsupported(inst)),
                }
            }
            Opcode::CallFunctionEx => {
                let dstar = arg & 1 != 0;
                let kind = if dstar { "CALL_FUNCTION_EX_KW" } else { name };
                with(kind.to_string(), OpVariant::ExtendedCall { dstar })
            }
            Opcode::CallMethod => with(
                arity_kind(name, &[arg]),
                OpVariant::MethodCall { positional: arg },
            ),
            Opcode::BuildTuple | Opcode::BuildList | Opcode::BuildSet => {
                let kind = match inst.opcode {
                    Opcode::BuildTuple => CollectionKind::Tuple,
                    Opcode::BuildList => CollectionKind::List,
                    _ => CollectionKind::Set,
                };
                with(
                    arity_kind(name, &[arg]),
                    OpVariant::Collection { kind, count: arg },
                )
            }
            Opcode::BuildMap => with(
                arity_kind(name, &[arg]),
                OpVariant::Map {
                    count: arg,
                    store_map: self.dialect.has(Feature::StoreMapDicts),
                },
            ),
            Opcode::BuildConstKeyMap => with(
                arity_kind(name, &[arg]),
                OpVariant::ConstKeyMap { count: arg },
            ),
            Opcode::BuildTupleUnpackWithCall => with(
                arity_kind(name, &[arg]),
                OpVariant::UnpackWithCall {
                    mapping: false,
                    count: arg,
                },
            ),
            Opcode::BuildMapUnpackWithCall if keyword_tuples => with(
                arity_kind(name, &[arg]),
                OpVariant::UnpackWithCall {
                    mapping: true,
                    count: arg,
                },
            ),
            Opcode::BuildMapUnpackWithCall => Err(self.unsupported(inst)),
            Opcode::UnpackSequence => with(
                arity_kind(name, &[arg]),
                OpVariant::Unpack { count: arg },
            ),
            Opcode::BuildSlice => with(
                arity_kind(name, &[arg]),
                OpVariant::Slice { count: arg },
            ),
            Opcode::BuildString => with(
                arity_kind(name, &[arg]),
                OpVariant::StringBuild { count: arg },
            ),
            Opcode::MakeFunction if self.dialect.has(Feature::FunctionFlags) => {
                if arg & !0x0f != 0 {
                    return Err(self.unsupported(inst));
                }
                with(
                    arity_kind(name, &[arg]),
                    OpVariant::MakeFunctionFlags {
                        defaults: arg & 0x01 != 0,
                        kwdefaults: arg & 0x02 != 0,
                        annotations: arg & 0x04 != 0,
                        closure: arg & 0x08 != 0,
                    },
                )
            }
            Opcode::MakeFunction | Opcode::MakeClosure => {
                let closure = inst.opcode == Opcode::MakeClosure;
                let annotations = match arg >> 16 {
                    0 => 0,
                    n if self.label_annotation_names(closure, n - 1) => n - 1,
                    _ => return Err(self.unsupported(inst)),
                };
                with(
                    arity_kind(name, &[arg]),
                    OpVariant::MakeFunction {
                        defaults: arg & 0xff,
                        kwdefaults: (arg >> 8) & 0xff,
                        annotations,
                        closure,
                    },
                )
            }
            Opcode::StoreAnnotation => with(name.to_string(), OpVariant::AnnotationStore),
            Opcode::LoadBuildClass => {
                self.builds_classes = true;
                plain(name)
            }
            _ => plain(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use unpyc_bytecode::encoding::encode_into;
    use unpyc_bytecode::{CO_NOFREE, Version};

    use super::*;
    use crate::dialect::dialect_for;

    fn code(
        version: Version,
        consts: Vec<Constant>,
        names: &[&str],
        ops: &[(Opcode, Option<u32>)],
    ) -> Arc<CodeObject> {
        let dialect = dialect_for(version).unwrap();
        let mut bytes = vec![];
        for (op, arg) in ops {
            encode_into(
                &mut bytes,
                dialect.opcodes.number(*op).unwrap(),
                *arg,
                version.encoding(),
            );
        }
        Arc::new(CodeObject {
            name: "<module>".into(),
            filename: "<test>".into(),
            first_line: 1,
            flags: CO_NOFREE,
            code: bytes,
            consts,
            names: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        })
    }

    fn scan(version: Version, code: &Arc<CodeObject>) -> Result<ScannedCode, DecompileError> {
        let dialect = dialect_for(version).unwrap();
        Scanner::new(&dialect).scan(code, CodeRole::Module, CodeLocation::root("<module>", 1))
    }

    fn kinds(scanned: &ScannedCode) -> Vec<&str> {
        scanned.tokens.iter().map(|t| t.kind.as_str()).collect()
    }

    #[test]
    fn test_straight_line_kinds() {
        let c = code(
            Version::V3_6,
            vec![Constant::Str("s".into()), Constant::None],
            &["x"],
            &[
                (Opcode::LoadConst, Some(0)),
                (Opcode::StoreName, Some(0)),
                (Opcode::LoadConst, Some(1)),
                (Opcode::ReturnValue, None),
            ],
        );
        let s = scan(Version::V3_6, &c).unwrap();
        assert_eq!(
            kinds(&s),
            vec!["LOAD_STR", "STORE_NAME", "LOAD_CONST", "RETURN_VALUE"]
        );
        assert_eq!(s.tokens[1].name(), Some("x"));
        assert!(s.customize.is_empty());
    }

    #[test]
    fn test_forward_jump_gets_come_from() {
        // if a: b
        let c = code(
            Version::V3_6,
            vec![Constant::None],
            &["a", "b"],
            &[
                (Opcode::LoadName, Some(0)),
                (Opcode::PopJumpIfFalse, Some(8)),
                (Opcode::LoadName, Some(1)),
                (Opcode::PopTop, None),
                (Opcode::LoadConst, Some(0)),
                (Opcode::ReturnValue, None),
            ],
        );
        let s = scan(Version::V3_6, &c).unwrap();
        assert_eq!(
            kinds(&s),
            vec![
                "LOAD_NAME",
                "POP_JUMP_IF_FALSE",
                "LOAD_NAME",
                "POP_TOP",
                "COME_FROM",
                "LOAD_CONST",
                "RETURN_VALUE"
            ]
        );
        assert_eq!(s.tokens[1].target, Some(4));
        assert_eq!(s.tokens[4].offset, "8_0");
        assert!(s.tokens[4].synthetic);
        assert!(s.tokens[5].is_jump_target);
    }

    #[test]
    fn test_backward_absolute_jump_is_jump_back() {
        // while x: pass
        let c = code(
            Version::V3_6,
            vec![Constant::None],
            &["x"],
            &[
                (Opcode::SetupLoop, Some(8)),
                (Opcode::LoadName, Some(0)),
                (Opcode::PopJumpIfFalse, Some(8)),
                (Opcode::JumpAbsolute, Some(2)),
                (Opcode::PopBlock, None),
                (Opcode::LoadConst, Some(0)),
                (Opcode::ReturnValue, None),
            ],
        );
        let s = scan(Version::V3_6, &c).unwrap();
        assert_eq!(
            kinds(&s),
            vec![
                "SETUP_LOOP",
                "LOAD_NAME",
                "POP_JUMP_IF_FALSE",
                "JUMP_BACK",
                "COME_FROM",
                "POP_BLOCK",
                "COME_FROM",
                "LOAD_CONST",
                "RETURN_VALUE"
            ]
        );
        assert_eq!(s.tokens[3].target, Some(1));
        assert_eq!(s.tokens[0].target, Some(6));
    }

    #[test]
    fn test_jump_over_missing_else() {
        // if a: b, as 3.4 lays it out.
        let c = code(
            Version::V3_4,
            vec![Constant::None],
            &["a", "b"],
            &[
                (Opcode::LoadName, Some(0)),
                (Opcode::PopJumpIfFalse, Some(13)),
                (Opcode::LoadName, Some(1)),
                (Opcode::PopTop, None),
                (Opcode::JumpForward, Some(0)),
                (Opcode::LoadConst, Some(0)),
                (Opcode::ReturnValue, None),
            ],
        );
        let s = scan(Version::V3_4, &c).unwrap();
        assert_eq!(
            kinds(&s),
            vec![
                "LOAD_NAME",
                "POP_JUMP_IF_FALSE",
                "LOAD_NAME",
                "POP_TOP",
                "JUMP_FORWARD_NEXT",
                "COME_FROM",
                "COME_FROM",
                "LOAD_CONST",
                "RETURN_VALUE"
            ]
        );
        assert!(s.tokens[4].is_unconditional_jump());
        assert_eq!(s.tokens[4].target, Some(5));
    }

    #[test]
    fn test_jump_over_else_branch_keeps_its_kind() {
        // if a: b
        // else: c
        let c = code(
            Version::V3_4,
            vec![Constant::None],
            &["a", "b", "c"],
            &[
                (Opcode::LoadName, Some(0)),
                (Opcode::PopJumpIfFalse, Some(13)),
                (Opcode::LoadName, Some(1)),
                (Opcode::PopTop, None),
                (Opcode::JumpForward, Some(4)),
                (Opcode::LoadName, Some(2)),
                (Opcode::PopTop, None),
                (Opcode::LoadConst, Some(0)),
                (Opcode::ReturnValue, None),
            ],
        );
        let s = scan(Version::V3_4, &c).unwrap();
        assert_eq!(s.tokens[4].kind, "JUMP_FORWARD");
    }

    #[test]
    fn test_threaded_jumps_over_nested_missing_else() {
        // if a:
        //     if b: c
        // The inner jump was threaded through the outer one.
        let c = code(
            Version::V3_4,
            vec![Constant::None],
            &["a", "b"],
            &[
                (Opcode::LoadName, Some(0)),
                (Opcode::PopJumpIfFalse, Some(16)),
                (Opcode::LoadName, Some(1)),
                (Opcode::PopTop, None),
                (Opcode::JumpAbsolute, Some(16)),
                (Opcode::JumpForward, Some(0)),
                (Opcode::LoadConst, Some(0)),
                (Opcode::ReturnValue, None),
            ],
        );
        let s = scan(Version::V3_4, &c).unwrap();
        assert_eq!(s.tokens[4].kind, "JUMP_FORWARD_NEXT");
        assert_eq!(s.tokens[5].kind, "JUMP_FORWARD_NEXT");
    }

    #[test]
    fn test_keyword_call_uses_names_tuple() {
        // f(a, k=b)
        let c = code(
            Version::V3_6,
            vec![Constant::Tuple(vec![Constant::Str("k".into())]), Constant::None],
            &["f", "a", "b"],
            &[
                (Opcode::LoadName, Some(0)),
                (Opcode::LoadName, Some(1)),
                (Opcode::LoadName, Some(2)),
                (Opcode::LoadConst, Some(0)),
                (Opcode::CallFunctionKw, Some(2)),
                (Opcode::PopTop, None),
                (Opcode::LoadConst, Some(1)),
                (Opcode::ReturnValue, None),
            ],
        );
        let s = scan(Version::V3_6, &c).unwrap();
        assert_eq!(s.tokens[3].kind, "LOAD_KWNAMES");
        assert_eq!(s.tokens[4].kind, "CALL_FUNCTION_KW_1_1");
        assert_eq!(
            s.customize.get("CALL_FUNCTION_KW_1_1"),
            Some(&OpVariant::KeywordCall {
                positional: 1,
                keywords: 1
            })
        );
    }

    #[test]
    fn test_legacy_call_arity_kinds() {
        // f(a, k=b) in 3.4: positional 1, one keyword pair.
        let c = code(
            Version::V3_4,
            vec![Constant::Str("k".into()), Constant::None],
            &["f", "a", "b"],
            &[
                (Opcode::LoadName, Some(0)),
                (Opcode::LoadName, Some(1)),
                (Opcode::LoadConst, Some(0)),
                (Opcode::LoadName, Some(2)),
                (Opcode::CallFunction, Some(0x101)),
                (Opcode::PopTop, None),
                (Opcode::LoadConst, Some(1)),
                (Opcode::ReturnValue, None),
            ],
        );
        let s = scan(Version::V3_4, &c).unwrap();
        assert_eq!(s.tokens[4].kind, "CALL_FUNCTION_1_1");
        assert_eq!(s.tokens[2].kind, "LOAD_STR");
    }

    #[test]
    fn test_unknown_opcode_fails_with_location() {
        let mut c = (*code(Version::V3_6, vec![], &[], &[])).clone();
        c.code = vec![0, 0];
        let err = scan(Version::V3_6, &Arc::new(c)).unwrap_err();
        match err {
            DecompileError::UnsupportedOpcode {
                location, offset, ..
            } => {
                assert_eq!(location.path, "<module>");
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn annotated(version: Version, names: Constant, arg: u32) -> Arc<CodeObject> {
        let func = CodeObject {
            name: "f".into(),
            ..Default::default()
        };
        code(
            version,
            vec![names, Constant::Code(Arc::new(func)), Constant::Str("f".into())],
            &["int", "f"],
            &[
                (Opcode::LoadName, Some(0)),
                (Opcode::LoadConst, Some(0)),
                (Opcode::LoadConst, Some(1)),
                (Opcode::LoadConst, Some(2)),
                (Opcode::MakeFunction, Some(arg)),
                (Opcode::StoreName, Some(1)),
            ],
        )
    }

    #[test]
    fn test_legacy_annotation_names_are_relabeled() {
        let names = Constant::Tuple(vec![Constant::Str("a".into())]);
        let s = scan(Version::V3_4, &annotated(Version::V3_4, names, 2 << 16)).unwrap();
        assert_eq!(
            kinds(&s),
            vec![
                "LOAD_NAME",
                "LOAD_ANNOTATION_NAMES",
                "LOAD_CODE",
                "LOAD_STR",
                "MAKE_FUNCTION_131072",
                "STORE_NAME"
            ]
        );
        assert_eq!(
            s.customize.get("MAKE_FUNCTION_131072"),
            Some(&OpVariant::MakeFunction {
                defaults: 0,
                kwdefaults: 0,
                annotations: 1,
                closure: false,
            })
        );
    }

    #[test]
    fn test_annotation_count_must_match_names() {
        let names = Constant::Tuple(vec![Constant::Str("a".into())]);
        assert!(matches!(
            scan(Version::V3_5, &annotated(Version::V3_5, names, 3 << 16)),
            Err(DecompileError::UnsupportedVariant { .. })
        ));
        assert!(matches!(
            scan(Version::V3_5, &annotated(Version::V3_5, Constant::None, 2 << 16)),
            Err(DecompileError::UnsupportedVariant { .. })
        ));
    }

    #[test]
    fn test_function_flags() {
        let keys = Constant::Tuple(vec![Constant::Str("a".into())]);
        let s = scan(Version::V3_6, &annotated(Version::V3_6, keys.clone(), 4)).unwrap();
        assert_eq!(
            s.customize.get("MAKE_FUNCTION_4"),
            Some(&OpVariant::MakeFunctionFlags {
                defaults: false,
                kwdefaults: false,
                annotations: true,
                closure: false,
            })
        );
        assert!(matches!(
            scan(Version::V3_6, &annotated(Version::V3_6, keys, 0x10)),
            Err(DecompileError::UnsupportedVariant { .. })
        ));
    }

    #[test]
    fn test_setup_annotations_dropped() {
        let c = code(
            Version::V3_6,
            vec![Constant::None],
            &[],
            &[
                (Opcode::SetupAnnotations, None),
                (Opcode::LoadConst, Some(0)),
                (Opcode::ReturnValue, None),
            ],
        );
        let s = scan(Version::V3_6, &c).unwrap();
        assert_eq!(kinds(&s), vec!["LOAD_CONST", "RETURN_VALUE"]);
    }

    #[test]
    fn test_nested_code_is_scanned_with_role() {
        let body = code(
            Version::V3_6,
            vec![Constant::None],
            &[],
            &[(Opcode::LoadConst, Some(0)), (Opcode::ReturnValue, None)],
        );
        let mut lambda = (*body).clone();
        lambda.name = "<lambda>".into();
        let c = code(
            Version::V3_6,
            vec![
                Constant::Code(Arc::new(lambda)),
                Constant::Str("<lambda>".into()),
                Constant::None,
            ],
            &["f"],
            &[
                (Opcode::LoadConst, Some(0)),
                (Opcode::LoadConst, Some(1)),
                (Opcode::MakeFunction, Some(0)),
                (Opcode::StoreName, Some(0)),
                (Opcode::LoadConst, Some(2)),
                (Opcode::ReturnValue, None),
            ],
        );
        let s = scan(Version::V3_6, &c).unwrap();
        assert_eq!(s.tokens[0].kind, "LOAD_LAMBDA");
        assert_eq!(s.tokens[2].kind, "MAKE_FUNCTION_0");
        let nested = &s.nested[&0];
        assert_eq!(nested.role, CodeRole::Lambda);
        assert_eq!(nested.location.path, "<module>.<lambda>");
    }
}
