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

//! The 3.4 grammar: the root of the dialect chain.

use unpyc_bytecode::Version;

use crate::dialect::{DialectDelta, Feature};

pub static DELTA: DialectDelta = DialectDelta {
    version: Version::V3_4,
    rules: GRAMMAR,
    removed: "",
    checked: &["stmt", "and", "or", "and_or", "or_and", "ifexp"],
    features_added: &[
        Feature::KeywordsBeforeStar,
        Feature::KeywordDefaultsFirst,
        Feature::StoreMapDicts,
        Feature::JumpPastMissingElse,
    ],
    features_removed: &[],
};

const GRAMMAR: &str = "
# Start symbols.
module ::= stmts
single ::= stmt return
single ::= return
listcomp_body ::= BUILD_LIST_0 LOAD_FAST FOR_ITER store expr LIST_APPEND JUMP_BACK COME_FROM RETURN_VALUE
listcomp_body ::= BUILD_LIST_0 LOAD_FAST FOR_ITER store testexpr expr LIST_APPEND JUMP_BACK COME_FROM RETURN_VALUE

stmts ::= stmt
stmts ::= stmts stmt
stmts_opt ::= stmts
stmts_opt ::=
come_froms ::= COME_FROM
come_froms ::= come_froms COME_FROM
come_froms_opt ::= come_froms
come_froms_opt ::=

stmt ::= expr_stmt
stmt ::= print_expr
stmt ::= assign
stmt ::= assign_multi
stmt ::= assign_swap2
stmt ::= assign_swap3
stmt ::= aug_assign
stmt ::= aug_assign_attr
stmt ::= aug_assign_subscr
stmt ::= return
stmt ::= break
stmt ::= ifstmt
stmt ::= ifelsestmt
stmt ::= while
stmt ::= while_else
stmt ::= while_true
stmt ::= for
stmt ::= for_else
stmt ::= funcdef
stmt ::= classdef
stmt ::= import
stmt ::= import_as_dotted
stmt ::= import_from
stmt ::= import_star

expr_stmt ::= expr POP_TOP
print_expr ::= expr PRINT_EXPR
assign ::= expr store
assign_multi ::= expr dup_stores store
dup_stores ::= DUP_TOP store
dup_stores ::= dup_stores DUP_TOP store
assign_swap2 ::= expr expr ROT_TWO store store
assign_swap3 ::= expr expr expr ROT_THREE ROT_TWO store store store
aug_assign ::= expr expr inplace_op store
aug_assign_attr ::= expr DUP_TOP LOAD_ATTR expr inplace_op ROT_TWO STORE_ATTR
aug_assign_subscr ::= expr expr DUP_TOP_TWO BINARY_SUBSCR expr inplace_op ROT_THREE STORE_SUBSCR
return ::= expr RETURN_VALUE
break ::= BREAK_LOOP

store ::= STORE_NAME
store ::= STORE_FAST
store ::= STORE_GLOBAL
store ::= STORE_DEREF
store ::= expr STORE_ATTR
store ::= expr expr STORE_SUBSCR
store ::= unpack

# Conditionals. A test jumps to the else branch when false; in an `or` the
# left side jumps straight into the body when true. Without an else branch the
# body still ends in a jump to the next statement, unless it returns.
ifstmt ::= testexpr stmts_opt JUMP_FORWARD_NEXT come_froms_opt
ifstmt ::= testexpr returns come_froms_opt
ifstmt ::= testexpr stmts_opt JUMP_BACK
returns ::= stmts_opt last_return
last_return ::= return
ifelsestmt ::= testexpr stmts_opt JUMP_FORWARD come_froms stmts_opt come_froms_opt
ifelsestmt ::= testexpr stmts_opt JUMP_BACK come_froms stmts_opt
testexpr ::= testfalse
testfalse ::= expr POP_JUMP_IF_FALSE
testfalse ::= expr POP_JUMP_IF_TRUE
testfalse ::= testfalse testfalse
testfalse ::= testtrue testfalse COME_FROM
testtrue ::= expr POP_JUMP_IF_TRUE
testtrue ::= expr POP_JUMP_IF_FALSE

# Loops. The final COME_FROM of SETUP_LOOP disappears when the optimizer
# threads it through a following jump.
while ::= SETUP_LOOP testexpr stmts_opt JUMP_BACK come_froms POP_BLOCK come_froms_opt
while_else ::= SETUP_LOOP testexpr stmts_opt JUMP_BACK come_froms POP_BLOCK stmts come_froms_opt
while_true ::= SETUP_LOOP stmts_opt JUMP_BACK POP_BLOCK come_froms_opt
for ::= SETUP_LOOP expr GET_ITER FOR_ITER store stmts_opt JUMP_BACK COME_FROM POP_BLOCK come_froms_opt
for_else ::= SETUP_LOOP expr GET_ITER FOR_ITER store stmts_opt JUMP_BACK COME_FROM POP_BLOCK stmts come_froms_opt

# Decorators are loaded before the definition and applied innermost first.
funcdef ::= mkfunc store
funcdef ::= decorated_def store
decorated_def ::= expr mkfunc CALL_FUNCTION_1
decorated_def ::= expr decorated_def CALL_FUNCTION_1
classdef ::= build_class store
classdef ::= decorated_class store
decorated_class ::= expr build_class CALL_FUNCTION_1
decorated_class ::= expr decorated_class CALL_FUNCTION_1

import ::= LOAD_CONST LOAD_CONST IMPORT_NAME store
import_as_dotted ::= LOAD_CONST LOAD_CONST IMPORT_NAME import_attrs store
import_attrs ::= LOAD_ATTR
import_attrs ::= import_attrs LOAD_ATTR
import_from ::= LOAD_CONST LOAD_CONST IMPORT_NAME import_names POP_TOP
import_names ::= import_name
import_names ::= import_names import_name
import_name ::= IMPORT_FROM store
import_star ::= LOAD_CONST LOAD_CONST IMPORT_NAME IMPORT_STAR

expr ::= LOAD_NAME
expr ::= LOAD_FAST
expr ::= LOAD_GLOBAL
expr ::= LOAD_DEREF
expr ::= LOAD_CLASSDEREF
expr ::= LOAD_CLOSURE
expr ::= LOAD_CONST
expr ::= LOAD_STR
expr ::= attribute
expr ::= subscript
expr ::= binary_expr
expr ::= unary_expr
expr ::= compare
expr ::= and
expr ::= or
expr ::= and_or
expr ::= or_and
expr ::= ifexp
expr ::= call
expr ::= tuple
expr ::= list
expr ::= set
expr ::= dict
expr ::= slice
expr ::= lambda
expr ::= listcomp

attribute ::= expr LOAD_ATTR
subscript ::= expr expr BINARY_SUBSCR
binary_expr ::= expr expr binary_op
unary_expr ::= expr unary_op
compare ::= expr expr COMPARE_OP
and ::= expr JUMP_IF_FALSE_OR_POP expr COME_FROM
or ::= expr JUMP_IF_TRUE_OR_POP expr COME_FROM
and_or ::= expr POP_JUMP_IF_FALSE expr JUMP_IF_TRUE_OR_POP COME_FROM expr COME_FROM
or_and ::= expr POP_JUMP_IF_TRUE expr JUMP_IF_FALSE_OR_POP COME_FROM expr COME_FROM
ifexp ::= testfalse expr JUMP_FORWARD come_froms expr COME_FROM

binary_op ::= BINARY_POWER
binary_op ::= BINARY_MULTIPLY
binary_op ::= BINARY_MODULO
binary_op ::= BINARY_ADD
binary_op ::= BINARY_SUBTRACT
binary_op ::= BINARY_FLOOR_DIVIDE
binary_op ::= BINARY_TRUE_DIVIDE
binary_op ::= BINARY_LSHIFT
binary_op ::= BINARY_RSHIFT
binary_op ::= BINARY_AND
binary_op ::= BINARY_XOR
binary_op ::= BINARY_OR
inplace_op ::= INPLACE_POWER
inplace_op ::= INPLACE_MULTIPLY
inplace_op ::= INPLACE_MODULO
inplace_op ::= INPLACE_ADD
inplace_op ::= INPLACE_SUBTRACT
inplace_op ::= INPLACE_FLOOR_DIVIDE
inplace_op ::= INPLACE_TRUE_DIVIDE
inplace_op ::= INPLACE_LSHIFT
inplace_op ::= INPLACE_RSHIFT
inplace_op ::= INPLACE_AND
inplace_op ::= INPLACE_XOR
inplace_op ::= INPLACE_OR
unary_op ::= UNARY_POSITIVE
unary_op ::= UNARY_NEGATIVE
unary_op ::= UNARY_INVERT
unary_op ::= UNARY_NOT

# Operand slots of synthesized call, function and dict rules.
pos_arg ::= expr
kwarg ::= LOAD_STR expr
star_arg ::= expr
dstar_arg ::= expr
pos_default ::= expr
kw_default ::= LOAD_STR expr
annotation ::= expr
closure ::= expr
dict_entry ::= expr expr STORE_MAP
";
