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

/// 3.5: matrix multiplication, dict displays as `BUILD_MAP n` over key/value pairs, and the
/// starred argument moves in front of the keyword pairs.
pub static DELTA: DialectDelta = DialectDelta {
    version: Version::V3_5,
    rules: "
        binary_op ::= BINARY_MATRIX_MULTIPLY
        inplace_op ::= INPLACE_MATRIX_MULTIPLY
        dict_pair ::= expr expr
    ",
    removed: "
        dict_entry ::= expr expr STORE_MAP
    ",
    checked: &[],
    features_added: &[],
    features_removed: &[
        Feature::KeywordsBeforeStar,
        Feature::KeywordDefaultsFirst,
        Feature::StoreMapDicts,
    ],
};
