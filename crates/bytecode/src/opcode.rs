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

use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::error::BytecodeError;
use crate::version::Version;

/// Opcodes at or above this number carry an argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// Every opcode name known to any supported version. Numbers are not part of the name: they
/// live in the per-version [`OpcodeTable`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    EnumCount,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    PopTop,
    RotTwo,
    RotThree,
    DupTop,
    DupTopTwo,
    Nop,
    UnaryPositive,
    UnaryNegative,
    UnaryNot,
    UnaryInvert,
    BinaryMatrixMultiply,
    InplaceMatrixMultiply,
    BinaryPower,
    BinaryMultiply,
    BinaryModulo,
    BinaryAdd,
    BinarySubtract,
    BinarySubscr,
    BinaryFloorDivide,
    BinaryTrueDivide,
    InplaceFloorDivide,
    InplaceTrueDivide,
    GetAiter,
    GetAnext,
    BeforeAsyncWith,
    StoreMap,
    InplaceAdd,
    InplaceSubtract,
    InplaceMultiply,
    InplaceModulo,
    StoreSubscr,
    DeleteSubscr,
    BinaryLshift,
    BinaryRshift,
    BinaryAnd,
    BinaryXor,
    BinaryOr,
    InplacePower,
    GetIter,
    GetYieldFromIter,
    PrintExpr,
    LoadBuildClass,
    YieldFrom,
    GetAwaitable,
    InplaceLshift,
    InplaceRshift,
    InplaceAnd,
    InplaceXor,
    InplaceOr,
    BreakLoop,
    WithCleanup,
    WithCleanupStart,
    WithCleanupFinish,
    ReturnValue,
    ImportStar,
    SetupAnnotations,
    YieldValue,
    PopBlock,
    EndFinally,
    PopExcept,
    StoreName,
    DeleteName,
    UnpackSequence,
    ForIter,
    UnpackEx,
    StoreAttr,
    DeleteAttr,
    StoreGlobal,
    DeleteGlobal,
    LoadConst,
    LoadName,
    BuildTuple,
    BuildList,
    BuildSet,
    BuildMap,
    LoadAttr,
    CompareOp,
    ImportName,
    ImportFrom,
    JumpForward,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    JumpAbsolute,
    PopJumpIfFalse,
    PopJumpIfTrue,
    LoadGlobal,
    ContinueLoop,
    SetupLoop,
    SetupExcept,
    SetupFinally,
    LoadFast,
    StoreFast,
    DeleteFast,
    StoreAnnotation,
    RaiseVarargs,
    CallFunction,
    MakeFunction,
    BuildSlice,
    MakeClosure,
    LoadClosure,
    LoadDeref,
    StoreDeref,
    DeleteDeref,
    CallFunctionVar,
    CallFunctionKw,
    CallFunctionVarKw,
    CallFunctionEx,
    SetupWith,
    ExtendedArg,
    ListAppend,
    SetAdd,
    MapAdd,
    LoadClassderef,
    BuildListUnpack,
    BuildMapUnpack,
    BuildMapUnpackWithCall,
    BuildTupleUnpack,
    BuildSetUnpack,
    SetupAsyncWith,
    FormatValue,
    BuildConstKeyMap,
    BuildString,
    BuildTupleUnpackWithCall,
    LoadMethod,
    CallMethod,
}

/// How an opcode's argument is to be interpreted. Stable across 3.4-3.7.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    None,
    Const,
    Name,
    Local,
    Free,
    Compare,
    JumpRelative,
    JumpAbsolute,
    Raw,
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn arg_kind(&self) -> ArgKind {
        use Opcode::*;
        match self {
            LoadConst => ArgKind::Const,
            StoreName | DeleteName | StoreAttr | DeleteAttr | StoreGlobal | DeleteGlobal
            | LoadName | LoadAttr | ImportName | ImportFrom | LoadGlobal | StoreAnnotation
            | LoadMethod => ArgKind::Name,
            LoadFast | StoreFast | DeleteFast => ArgKind::Local,
            LoadClosure | LoadDeref | StoreDeref | DeleteDeref | LoadClassderef => ArgKind::Free,
            Opcode::CompareOp => ArgKind::Compare,
            ForIter | JumpForward | SetupLoop | SetupExcept | SetupFinally | SetupWith
            | SetupAsyncWith => ArgKind::JumpRelative,
            JumpIfFalseOrPop | JumpIfTrueOrPop | JumpAbsolute | PopJumpIfFalse | PopJumpIfTrue
            | ContinueLoop => ArgKind::JumpAbsolute,
            _ => ArgKind::Raw,
        }
    }

    pub fn is_jump(&self) -> bool {
        matches!(
            self.arg_kind(),
            ArgKind::JumpRelative | ArgKind::JumpAbsolute
        )
    }

    pub fn is_unconditional_jump(&self) -> bool {
        matches!(
            self,
            Opcode::JumpForward | Opcode::JumpAbsolute | Opcode::ContinueLoop
        )
    }

    pub fn is_conditional_jump(&self) -> bool {
        matches!(
            self,
            Opcode::PopJumpIfFalse
                | Opcode::PopJumpIfTrue
                | Opcode::JumpIfFalseOrPop
                | Opcode::JumpIfTrueOrPop
        )
    }
}

/// The comparison performed by `COMPARE_OP`, indexed by its argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
pub enum CompareOp {
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Le,
    #[strum(to_string = "==")]
    Eq,
    #[strum(to_string = "!=")]
    Ne,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = ">=")]
    Ge,
    #[strum(to_string = "in")]
    In,
    #[strum(to_string = "not in")]
    NotIn,
    #[strum(to_string = "is")]
    Is,
    #[strum(to_string = "is not")]
    IsNot,
    #[strum(to_string = "exception match")]
    ExceptionMatch,
}

impl CompareOp {
    pub fn from_arg(arg: u32) -> Option<Self> {
        CompareOp::iter().nth(arg as usize)
    }

    pub fn arg(&self) -> u32 {
        CompareOp::iter().position(|c| c == *self).unwrap_or_default() as u32
    }
}

/// The changes one version makes to the opcode numbering of the version before it.
#[derive(Debug)]
pub struct OpcodePatch {
    pub version: Version,
    pub removed: &'static [Opcode],
    pub added: &'static [(Opcode, u8)],
}

use Opcode::*;

const BASE_3_4: &[(Opcode, u8)] = &[
    (PopTop, 1),
    (RotTwo, 2),
    (RotThree, 3),
    (DupTop, 4),
    (DupTopTwo, 5),
    (Nop, 9),
    (UnaryPositive, 10),
    (UnaryNegative, 11),
    (UnaryNot, 12),
    (UnaryInvert, 15),
    (BinaryPower, 19),
    (BinaryMultiply, 20),
    (BinaryModulo, 22),
    (BinaryAdd, 23),
    (BinarySubtract, 24),
    (BinarySubscr, 25),
    (BinaryFloorDivide, 26),
    (BinaryTrueDivide, 27),
    (InplaceFloorDivide, 28),
    (InplaceTrueDivide, 29),
    (StoreMap, 54),
    (InplaceAdd, 55),
    (InplaceSubtract, 56),
    (InplaceMultiply, 57),
    (InplaceModulo, 59),
    (StoreSubscr, 60),
    (DeleteSubscr, 61),
    (BinaryLshift, 62),
    (BinaryRshift, 63),
    (BinaryAnd, 64),
    (BinaryXor, 65),
    (BinaryOr, 66),
    (InplacePower, 67),
    (GetIter, 68),
    (PrintExpr, 70),
    (LoadBuildClass, 71),
    (YieldFrom, 72),
    (InplaceLshift, 75),
    (InplaceRshift, 76),
    (InplaceAnd, 77),
    (InplaceXor, 78),
    (InplaceOr, 79),
    (BreakLoop, 80),
    (WithCleanup, 81),
    (ReturnValue, 83),
    (ImportStar, 84),
    (YieldValue, 86),
    (PopBlock, 87),
    (EndFinally, 88),
    (PopExcept, 89),
    (StoreName, 90),
    (DeleteName, 91),
    (UnpackSequence, 92),
    (ForIter, 93),
    (UnpackEx, 94),
    (StoreAttr, 95),
    (DeleteAttr, 96),
    (StoreGlobal, 97),
    (DeleteGlobal, 98),
    (LoadConst, 100),
    (LoadName, 101),
    (BuildTuple, 102),
    (BuildList, 103),
    (BuildSet, 104),
    (BuildMap, 105),
    (LoadAttr, 106),
    (Opcode::CompareOp, 107),
    (ImportName, 108),
    (ImportFrom, 109),
    (JumpForward, 110),
    (JumpIfFalseOrPop, 111),
    (JumpIfTrueOrPop, 112),
    (JumpAbsolute, 113),
    (PopJumpIfFalse, 114),
    (PopJumpIfTrue, 115),
    (LoadGlobal, 116),
    (ContinueLoop, 119),
    (SetupLoop, 120),
    (SetupExcept, 121),
    (SetupFinally, 122),
    (LoadFast, 124),
    (StoreFast, 125),
    (DeleteFast, 126),
    (RaiseVarargs, 130),
    (CallFunction, 131),
    (MakeFunction, 132),
    (BuildSlice, 133),
    (MakeClosure, 134),
    (LoadClosure, 135),
    (LoadDeref, 136),
    (StoreDeref, 137),
    (DeleteDeref, 138),
    (CallFunctionVar, 140),
    (CallFunctionKw, 141),
    (CallFunctionVarKw, 142),
    (SetupWith, 143),
    (ExtendedArg, 144),
    (ListAppend, 145),
    (SetAdd, 146),
    (MapAdd, 147),
    (LoadClassderef, 148),
];

/// Opcode numbering for every supported version, as a chain of deltas from 3.4.
pub static OPCODE_PATCHES: [OpcodePatch; 4] = [
    OpcodePatch {
        version: Version::V3_4,
        removed: &[],
        added: BASE_3_4,
    },
    OpcodePatch {
        version: Version::V3_5,
        removed: &[StoreMap, WithCleanup],
        added: &[
            (BinaryMatrixMultiply, 16),
            (InplaceMatrixMultiply, 17),
            (GetAiter, 50),
            (GetAnext, 51),
            (BeforeAsyncWith, 52),
            (GetYieldFromIter, 69),
            (GetAwaitable, 73),
            (WithCleanupStart, 81),
            (WithCleanupFinish, 82),
            (BuildListUnpack, 149),
            (BuildMapUnpack, 150),
            (BuildMapUnpackWithCall, 151),
            (BuildTupleUnpack, 152),
            (BuildSetUnpack, 153),
            (SetupAsyncWith, 154),
        ],
    },
    OpcodePatch {
        version: Version::V3_6,
        removed: &[MakeClosure, CallFunctionVar, CallFunctionVarKw],
        added: &[
            (SetupAnnotations, 85),
            (StoreAnnotation, 127),
            (CallFunctionEx, 142),
            (FormatValue, 155),
            (BuildConstKeyMap, 156),
            (BuildString, 157),
            (BuildTupleUnpackWithCall, 158),
        ],
    },
    OpcodePatch {
        version: Version::V3_7,
        removed: &[StoreAnnotation],
        added: &[(LoadMethod, 160), (CallMethod, 161)],
    },
];

/// The patch introduced by `version` itself, not folded with its ancestors.
pub fn patch_for(version: Version) -> Option<&'static OpcodePatch> {
    OPCODE_PATCHES.iter().find(|p| p.version == version)
}

/// Bidirectional opcode number mapping for one version.
#[derive(Clone, Debug)]
pub struct OpcodeTable {
    by_number: [Option<Opcode>; 256],
    numbers: [Option<u8>; Opcode::COUNT],
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self {
            by_number: [None; 256],
            numbers: [None; Opcode::COUNT],
        }
    }
}

impl OpcodeTable {
    /// Resolve the table for `version` by folding every patch from the chain root up.
    pub fn for_version(version: Version) -> Result<Self, BytecodeError> {
        let mut table = OpcodeTable::default();
        for v in version.lineage()? {
            if let Some(patch) = patch_for(v) {
                table.apply(patch);
            }
        }
        Ok(table)
    }

    pub fn apply(&mut self, patch: &OpcodePatch) {
        for op in patch.removed {
            if let Some(number) = self.numbers[*op as usize].take() {
                self.by_number[number as usize] = None;
            }
        }
        for (op, number) in patch.added {
            if let Some(displaced) = self.by_number[*number as usize] {
                self.numbers[displaced as usize] = None;
            }
            self.by_number[*number as usize] = Some(*op);
            self.numbers[*op as usize] = Some(*number);
        }
    }

    pub fn opcode(&self, number: u8) -> Option<Opcode> {
        self.by_number[number as usize]
    }

    pub fn number(&self, opcode: Opcode) -> Option<u8> {
        self.numbers[opcode as usize]
    }

    pub fn contains(&self, opcode: Opcode) -> bool {
        self.number(opcode).is_some()
    }

    pub fn opcodes(&self) -> impl Iterator<Item = (Opcode, u8)> + '_ {
        Opcode::iter().filter_map(|op| self.number(op).map(|n| (op, n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn names_are_screaming_snake_case() {
        assert_eq!(Opcode::LoadClassderef.name(), "LOAD_CLASSDEREF");
        assert_eq!(Opcode::CallFunctionVarKw.to_string(), "CALL_FUNCTION_VAR_KW");
        assert_eq!(
            "BUILD_TUPLE_UNPACK_WITH_CALL".parse::<Opcode>().unwrap(),
            Opcode::BuildTupleUnpackWithCall
        );
    }

    #[test_case(Version::V3_4, 142, Some(Opcode::CallFunctionVarKw); "var kw in 3.4")]
    #[test_case(Version::V3_5, 142, Some(Opcode::CallFunctionVarKw); "var kw in 3.5")]
    #[test_case(Version::V3_6, 142, Some(Opcode::CallFunctionEx); "ex in 3.6")]
    #[test_case(Version::V3_4, 54, Some(Opcode::StoreMap); "store map in 3.4")]
    #[test_case(Version::V3_5, 54, None; "store map gone in 3.5")]
    #[test_case(Version::V3_6, 127, Some(Opcode::StoreAnnotation); "annotation in 3.6")]
    #[test_case(Version::V3_7, 127, None; "annotation gone in 3.7")]
    #[test_case(Version::V3_7, 160, Some(Opcode::LoadMethod); "load method in 3.7")]
    fn table_folding(version: Version, number: u8, expected: Option<Opcode>) {
        let table = OpcodeTable::for_version(version).unwrap();
        assert_eq!(table.opcode(number), expected);
        if let Some(op) = expected {
            assert_eq!(table.number(op), Some(number));
        }
    }

    #[test]
    fn displaced_opcode_loses_its_number() {
        let table = OpcodeTable::for_version(Version::V3_6).unwrap();
        assert!(!table.contains(Opcode::CallFunctionVarKw));
        assert!(!table.contains(Opcode::MakeClosure));
        assert!(table.contains(Opcode::MakeFunction));
    }

    #[test]
    fn compare_op_round_trips() {
        for (i, op) in CompareOp::iter().enumerate() {
            assert_eq!(CompareOp::from_arg(i as u32), Some(op));
            assert_eq!(op.arg(), i as u32);
        }
        assert_eq!(CompareOp::IsNot.to_string(), "is not");
    }
}
