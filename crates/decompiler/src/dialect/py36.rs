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

use unpyc_bytecode::Version;

use crate::dialect::{DialectDelta, Feature};

/// 3.6: wordcode, `if` bodies that simply fall through, f-strings, keyword names as one constant tuple, `CALL_FUNCTION_EX`,
/// `MAKE_FUNCTION` flags and variable annotations.
pub static DELTA: DialectDelta = DialectDelta {
    version: Version::V3_6,
    rules: "
        ifstmt ::= testexpr stmts_opt come_froms_opt

        expr ::= formatted_value
        expr ::= joined_str
        formatted_value ::= expr FORMAT_VALUE
        formatted_value ::= expr expr FORMAT_VALUE_ATTR
        fstring_part ::= LOAD_STR
        fstring_part ::= formatted_value

        kw_value ::= expr
        ex_args ::= expr
        ex_args ::= tuple_unpack_call
        ex_kwargs ::= expr
        ex_kwargs ::= map_unpack_call

        defaults_tuple ::= expr
        kwdefaults_map ::= expr
        annotations_map ::= expr

        stmt ::= ann_assign
        stmt ::= ann_decl
    ",
    removed: "
        pos_default ::= expr
        kw_default ::= LOAD_STR expr
        annotation ::= expr
    ",
    checked: &[],
    features_added: &[
        Feature::KeywordNameTuple,
        Feature::FunctionFlags,
        Feature::DropSetupAnnotations,
    ],
    features_removed: &[Feature::JumpPastMissingElse],
};
