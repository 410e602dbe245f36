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

/// 3.7: method calls, annotations stored straight into `__annotations__`, and `import a.b as c`
/// walks the submodules with `IMPORT_FROM`.
pub static DELTA: DialectDelta = DialectDelta {
    version: Version::V3_7,
    rules: "
        ann_decl ::= expr LOAD_ANNOTATIONS LOAD_STR STORE_SUBSCR
        ann_assign ::= expr store expr LOAD_ANNOTATIONS LOAD_STR STORE_SUBSCR

        import_as_dotted ::= LOAD_CONST LOAD_CONST IMPORT_NAME import_from_attrs store
        import_from_attrs ::= import_from_attr
        import_from_attrs ::= import_from_attrs import_from_attr
        import_from_attr ::= IMPORT_FROM ROT_TWO POP_TOP
    ",
    removed: "
        import_as_dotted ::= LOAD_CONST LOAD_CONST IMPORT_NAME import_attrs store
        import_attrs ::= LOAD_ATTR
        import_attrs ::= import_attrs LOAD_ATTR
    ",
    checked: &[],
    features_added: &[Feature::AnnotationsMapping],
    features_removed: &[],
};
