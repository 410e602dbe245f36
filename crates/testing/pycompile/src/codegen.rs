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

//! Code generation: walk the syntax tree and emit the instruction sequences CPython's compiler
//! emits for each construct, one code unit per module, class, function, lambda or comprehension.

use std::mem;
use std::sync::Arc;

use indexmap::IndexSet;
use itertools::Itertools;
use tracing::debug;
use unpyc_bytecode::{
    CO_NESTED, CO_NEWLOCALS, CO_NOFREE, CO_OPTIMIZED, CO_VARARGS, CO_VARKEYWORDS, CodeObject,
    Constant, Opcode, Version,
};

use crate::Mode;
use crate::assemble::assemble;
use crate::ast::{
    Alias, Arguments, BinaryOp, BoolOp, Expr, Keyword, MODULE_SCOPE, Module, ScopeId, Stmt,
    StmtNode, UnaryOp, docstring, has_annotations,
};
use crate::error::CompileError;
use crate::fold;
use crate::labels::{Instr, JumpLabel, Label};
use crate::peephole;
use crate::symtable::{Block, NameScope, SymbolTable, mangle};

/// `co_filename` of everything this crate compiles.
pub const FILENAME: &str = "<unpyc>";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UnitKind {
    Module,
    Class,
    Function,
    Lambda,
    Comprehension,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    Load,
    Store,
}

struct Loop {
    /// Where `continue` jumps to.
    start: Label,
}

/// The code object under construction.
struct Unit {
    kind: UnitKind,
    scope: ScopeId,
    name: String,
    qualname: String,
    first_line: usize,
    line: usize,
    ops: Vec<Instr>,
    jumps: Vec<JumpLabel>,
    consts: Vec<Constant>,
    names: IndexSet<String>,
    varnames: IndexSet<String>,
    cellvars: Vec<String>,
    freevars: Vec<String>,
    argcount: u32,
    kwonlyargcount: u32,
    flags: u32,
    loops: Vec<Loop>,
    /// The current block ends in `RETURN_VALUE`.
    returns: bool,
    private: Option<String>,
}

impl Unit {
    fn new(kind: UnitKind, scope: ScopeId, name: &str, qualname: String, line: usize, block: &Block) -> Self {
        let mut flags = 0;
        if matches!(
            kind,
            UnitKind::Function | UnitKind::Lambda | UnitKind::Comprehension
        ) {
            flags |= CO_OPTIMIZED | CO_NEWLOCALS;
            if block.nested {
                flags |= CO_NESTED;
            }
        }
        Self {
            kind,
            scope,
            name: name.to_string(),
            qualname,
            first_line: line,
            line,
            ops: vec![],
            jumps: vec![],
            consts: vec![],
            names: IndexSet::new(),
            varnames: IndexSet::new(),
            cellvars: block.cellvars(),
            freevars: block.freevars(),
            argcount: 0,
            kwonlyargcount: 0,
            flags,
            loops: vec![],
            returns: false,
            private: block.private.clone(),
        }
    }

    fn add_const(&mut self, value: Constant) -> u32 {
        let pos = self.consts.iter().position(|c| *c == value);
        pos.unwrap_or_else(|| {
            self.consts.push(value);
            self.consts.len() - 1
        }) as u32
    }

    fn add_name(&mut self, name: &str) -> u32 {
        self.names.insert_full(name.to_string()).0 as u32
    }

    fn mangle(&self, name: &str) -> String {
        mangle(self.private.as_deref(), name)
    }

    /// Resolve labels, optimize, and assemble.
    fn into_code(mut self, version: Version) -> Result<CodeObject, CompileError> {
        let positions: Vec<Option<usize>> = self.jumps.iter().map(|j| j.position).collect();
        for op in self.ops.iter_mut() {
            if let Some(label) = op.target {
                let line = op.line;
                let position = positions.get(label).copied().flatten();
                op.target = Some(position.ok_or_else(|| {
                    CompileError::unsupported(line, "jump to an uncommitted label")
                })?);
            }
        }
        let first_line = match self.kind {
            UnitKind::Module => self.ops.first().map_or(1, |op| op.line),
            _ => self.first_line,
        };
        peephole::optimize(&mut self.ops, &mut self.consts, version);
        let assembled = assemble(&self.ops, first_line, version)?;
        debug!(
            name = %self.qualname,
            instructions = self.ops.len(),
            bytes = assembled.code.len(),
            "assembled code object"
        );
        let mut flags = self.flags;
        if self.cellvars.is_empty() && self.freevars.is_empty() {
            flags |= CO_NOFREE;
        }
        Ok(CodeObject {
            name: self.name,
            filename: FILENAME.to_string(),
            first_line: first_line as u32,
            argcount: self.argcount,
            kwonlyargcount: self.kwonlyargcount,
            flags,
            code: assembled.code,
            consts: self.consts,
            names: self.names.into_iter().collect(),
            varnames: self.varnames.into_iter().collect(),
            freevars: self.freevars,
            cellvars: self.cellvars,
            lnotab: assembled.lnotab,
        })
    }
}

pub struct CodegenState<'a> {
    version: Version,
    mode: Mode,
    symbols: &'a SymbolTable,
    unit: Unit,
    /// Enclosing units, innermost last.
    parents: Vec<Unit>,
}

impl<'a> CodegenState<'a> {
    fn block(&self, scope: ScopeId) -> Result<&'a Block, CompileError> {
        let symbols: &'a SymbolTable = self.symbols;
        symbols
            .block(scope)
            .ok_or_else(|| CompileError::scope(self.unit.line, format!("no symbols for scope {scope}")))
    }

    // Create an anonymous jump label, committed later, and return its unique ID.
    fn make_jump_label(&mut self) -> Label {
        let id = Label(self.unit.jumps.len());
        self.unit.jumps.push(JumpLabel { id, position: None });
        id
    }

    // Pin a jump label to the current position, which starts a new basic block.
    fn commit_jump_label(&mut self, id: Label) {
        let position = self.unit.ops.len();
        if let Some(jump) = self.unit.jumps.get_mut(id.0) {
            jump.position = Some(position);
        }
        self.unit.returns = false;
    }

    fn emit(&mut self, op: Opcode, arg: u32) {
        self.unit.ops.push(Instr::new(op, arg, self.unit.line));
        if op == Opcode::ReturnValue {
            self.unit.returns = true;
        }
    }

    fn emit_jump(&mut self, op: Opcode, label: Label) {
        self.unit.ops.push(Instr {
            target: Some(label.0),
            ..Instr::new(op, 0, self.unit.line)
        });
    }

    fn load_const(&mut self, value: Constant) {
        let index = self.unit.add_const(value);
        self.emit(Opcode::LoadConst, index);
    }

    fn emit_name(&mut self, op: Opcode, name: &str) {
        let mangled = self.unit.mangle(name);
        let index = self.unit.add_name(&mangled);
        self.emit(op, index);
    }

    fn enter_unit(&mut self, kind: UnitKind, scope: ScopeId, name: &str) -> Result<(), CompileError> {
        let block = self.block(scope)?;
        let qualname = self.qualname(kind, name)?;
        let unit = Unit::new(kind, scope, name, qualname, self.unit.line, block);
        let parent = mem::replace(&mut self.unit, unit);
        self.parents.push(parent);
        Ok(())
    }

    fn exit_unit(&mut self) -> Result<(Arc<CodeObject>, String), CompileError> {
        if !self.unit.returns {
            self.load_const(Constant::None);
            self.emit(Opcode::ReturnValue, 0);
        }
        let parent = self
            .parents
            .pop()
            .ok_or_else(|| CompileError::scope(self.unit.line, "no enclosing code unit"))?;
        let unit = mem::replace(&mut self.unit, parent);
        let qualname = unit.qualname.clone();
        Ok((Arc::new(unit.into_code(self.version)?), qualname))
    }

    /// `__qualname__` of a unit about to be entered from the current one.
    fn qualname(&self, kind: UnitKind, name: &str) -> Result<String, CompileError> {
        let parent = &self.unit;
        if parent.kind == UnitKind::Module {
            return Ok(name.to_string());
        }
        if matches!(kind, UnitKind::Function | UnitKind::Class) {
            let block = self.block(parent.scope)?;
            if block.scope_of(&parent.mangle(name)) == Some(NameScope::GlobalExplicit) {
                return Ok(name.to_string());
            }
        }
        Ok(match parent.kind {
            UnitKind::Function | UnitKind::Lambda => {
                format!("{}.<locals>.{name}", parent.qualname)
            }
            _ => format!("{}.{name}", parent.qualname),
        })
    }

    /// Index of a cell or free variable in the `LOAD_DEREF` numbering.
    fn deref_index(&self, name: &str) -> Result<u32, CompileError> {
        let unit = &self.unit;
        if let Some(i) = unit.cellvars.iter().position(|c| c == name) {
            return Ok(i as u32);
        }
        unit.freevars
            .iter()
            .position(|f| f == name)
            .map(|i| (unit.cellvars.len() + i) as u32)
            .ok_or_else(|| CompileError::scope(unit.line, format!("no cell for '{name}'")))
    }

    fn name_op(&mut self, name: &str, access: Access) -> Result<(), CompileError> {
        let mangled = self.unit.mangle(name);
        let block = self.block(self.unit.scope)?;
        let function = matches!(
            self.unit.kind,
            UnitKind::Function | UnitKind::Lambda | UnitKind::Comprehension
        );
        let (op, arg) = match block.scope_of(&mangled) {
            Some(NameScope::Free | NameScope::Cell) => {
                let op = match access {
                    Access::Load if self.unit.kind == UnitKind::Class => Opcode::LoadClassderef,
                    Access::Load => Opcode::LoadDeref,
                    Access::Store => Opcode::StoreDeref,
                };
                (op, self.deref_index(&mangled)?)
            }
            Some(NameScope::Local) if function => {
                let op = match access {
                    Access::Load => Opcode::LoadFast,
                    Access::Store => Opcode::StoreFast,
                };
                (op, self.unit.varnames.insert_full(mangled).0 as u32)
            }
            Some(NameScope::GlobalExplicit) => self.global_op(&mangled, access),
            Some(NameScope::GlobalImplicit) if function => self.global_op(&mangled, access),
            _ => {
                let op = match access {
                    Access::Load => Opcode::LoadName,
                    Access::Store => Opcode::StoreName,
                };
                (op, self.unit.add_name(&mangled))
            }
        };
        self.emit(op, arg);
        Ok(())
    }

    fn global_op(&mut self, name: &str, access: Access) -> (Opcode, u32) {
        let op = match access {
            Access::Load => Opcode::LoadGlobal,
            Access::Store => Opcode::StoreGlobal,
        };
        (op, self.unit.add_name(name))
    }

    fn stmts(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        body.iter().try_for_each(|s| self.visit_stmt(s))
    }

    /// A module or class body: annotations dictionary, docstring, then the statements.
    fn body(&mut self, body: &[Stmt], docstrings: bool) -> Result<(), CompileError> {
        if self.unit.kind == UnitKind::Module
            && let Some(first) = body.first()
        {
            self.unit.line = first.line;
        }
        if self.version >= Version::V3_6 && has_annotations(body) {
            self.emit(Opcode::SetupAnnotations, 0);
        }
        let mut rest = body;
        if docstrings && let Some(doc) = docstring(body) {
            self.unit.line = body[0].line;
            self.load_const(Constant::Str(doc.to_string()));
            self.name_op("__doc__", Access::Store)?;
            rest = &body[1..];
        }
        self.stmts(rest)
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.unit.line = stmt.line;
        let line = stmt.line;
        match &stmt.node {
            StmtNode::Expr(e) => self.expr_stmt(e)?,
            StmtNode::Assign { targets, value } => {
                self.visit_expr(value)?;
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        self.emit(Opcode::DupTop, 0);
                    }
                    self.store_target(target)?;
                }
            }
            StmtNode::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtNode::AnnAssign {
                target,
                annotation,
                value,
                simple,
            } => self.ann_assign(target, annotation, value.as_ref(), *simple)?,
            StmtNode::Pass | StmtNode::Global(_) | StmtNode::Nonlocal(_) => {}
            StmtNode::Break => {
                if self.unit.loops.is_empty() {
                    return Err(CompileError::scope(line, "'break' outside loop"));
                }
                self.emit(Opcode::BreakLoop, 0);
            }
            StmtNode::Continue => {
                let Some(start) = self.unit.loops.last().map(|l| l.start) else {
                    return Err(CompileError::scope(line, "'continue' not properly in loop"));
                };
                self.emit_jump(Opcode::JumpAbsolute, start);
            }
            StmtNode::Return(value) => {
                if !matches!(self.unit.kind, UnitKind::Function) {
                    return Err(CompileError::scope(line, "'return' outside function"));
                }
                match value {
                    Some(v) => self.visit_expr(v)?,
                    None => self.load_const(Constant::None),
                }
                self.emit(Opcode::ReturnValue, 0);
            }
            StmtNode::If { test, body, orelse } => self.if_stmt(test, body, orelse)?,
            StmtNode::While { test, body, orelse } => self.while_stmt(test, body, orelse)?,
            StmtNode::For {
                target,
                iter,
                body,
                orelse,
            } => self.for_stmt(target, iter, body, orelse)?,
            StmtNode::FunctionDef {
                name,
                args,
                body,
                decorators,
                scope,
            } => {
                self.decorators(decorators)?;
                let flags = self.defaults(args)? | self.annotations(args)?;
                let (code, qualname) = self.function(name, args, body, *scope)?;
                self.make_closure(code, flags, &qualname)?;
                self.apply_decorators(decorators);
                self.name_op(name, Access::Store)?;
            }
            StmtNode::ClassDef {
                name,
                bases,
                body,
                decorators,
                scope,
            } => {
                self.decorators(decorators)?;
                let (code, _) = self.class(name, body, *scope)?;
                self.emit(Opcode::LoadBuildClass, 0);
                self.make_closure(code, 0, name)?;
                self.load_const(Constant::Str(name.clone()));
                self.call_helper(2, bases, &[])?;
                self.apply_decorators(decorators);
                self.name_op(name, Access::Store)?;
            }
            StmtNode::Import(names) => self.import(names)?,
            StmtNode::ImportFrom {
                module,
                names,
                level,
            } => self.import_from(module.as_deref(), names, *level)?,
        }
        Ok(())
    }

    fn expr_stmt(&mut self, e: &Expr) -> Result<(), CompileError> {
        if self.mode == Mode::Single && self.unit.kind == UnitKind::Module {
            self.visit_expr(e)?;
            self.emit(Opcode::PrintExpr, 0);
            return Ok(());
        }
        if let Expr::Constant(c) = e {
            let dropped = match self.version {
                v if v < Version::V3_6 => {
                    matches!(c, Constant::Int(_) | Constant::Float(_) | Constant::Str(_))
                }
                Version::V3_6 => !matches!(c, Constant::Tuple(_) | Constant::Code(_)),
                _ => true,
            };
            if dropped {
                return Ok(());
            }
        }
        self.visit_expr(e)?;
        self.emit(Opcode::PopTop, 0);
        Ok(())
    }

    fn store_target(&mut self, target: &Expr) -> Result<(), CompileError> {
        match target {
            Expr::Name(name) => self.name_op(name, Access::Store)?,
            Expr::Attribute(value, attr) => {
                self.visit_expr(value)?;
                self.emit_name(Opcode::StoreAttr, attr);
            }
            Expr::Subscript(value, index) => {
                self.visit_expr(value)?;
                self.visit_expr(index)?;
                self.emit(Opcode::StoreSubscr, 0);
            }
            Expr::Tuple(elts) | Expr::List(elts) => {
                if elts.iter().any(|e| matches!(e, Expr::Starred(_))) {
                    return Err(CompileError::unsupported(
                        self.unit.line,
                        "starred assignment target",
                    ));
                }
                self.emit(Opcode::UnpackSequence, elts.len() as u32);
                for e in elts {
                    self.store_target(e)?;
                }
            }
            _ => {
                return Err(CompileError::InvalidAssignment {
                    line: self.unit.line,
                });
            }
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Expr, op: BinaryOp, value: &Expr) -> Result<(), CompileError> {
        let inplace = binary_opcode(op, true);
        match target {
            Expr::Name(name) => {
                self.name_op(name, Access::Load)?;
                self.visit_expr(value)?;
                self.emit(inplace, 0);
                self.name_op(name, Access::Store)
            }
            Expr::Attribute(obj, attr) => {
                self.visit_expr(obj)?;
                self.emit(Opcode::DupTop, 0);
                self.emit_name(Opcode::LoadAttr, attr);
                self.visit_expr(value)?;
                self.emit(inplace, 0);
                self.emit(Opcode::RotTwo, 0);
                self.emit_name(Opcode::StoreAttr, attr);
                Ok(())
            }
            Expr::Subscript(obj, index) => {
                self.visit_expr(obj)?;
                self.visit_expr(index)?;
                self.emit(Opcode::DupTopTwo, 0);
                self.emit(Opcode::BinarySubscr, 0);
                self.visit_expr(value)?;
                self.emit(inplace, 0);
                self.emit(Opcode::RotThree, 0);
                self.emit(Opcode::StoreSubscr, 0);
                Ok(())
            }
            _ => Err(CompileError::InvalidAssignment {
                line: self.unit.line,
            }),
        }
    }

    fn ann_assign(
        &mut self,
        target: &Expr,
        annotation: &Expr,
        value: Option<&Expr>,
        simple: bool,
    ) -> Result<(), CompileError> {
        let Expr::Name(name) = target else {
            return Err(CompileError::unsupported(
                self.unit.line,
                "annotated attribute or subscript",
            ));
        };
        if let Some(value) = value {
            self.visit_expr(value)?;
            self.store_target(target)?;
        }
        if !matches!(self.unit.kind, UnitKind::Module | UnitKind::Class) {
            return Ok(());
        }
        self.visit_expr(annotation)?;
        if !simple {
            self.emit(Opcode::PopTop, 0);
        } else if self.version >= Version::V3_7 {
            let mangled = self.unit.mangle(name);
            let index = self.unit.add_name("__annotations__");
            self.emit(Opcode::LoadName, index);
            self.load_const(Constant::Str(mangled));
            self.emit(Opcode::StoreSubscr, 0);
        } else {
            self.emit_name(Opcode::StoreAnnotation, name);
        }
        Ok(())
    }

    /// Truth value of a test known at compile time.
    fn constant_truth(&self, e: &Expr) -> Option<bool> {
        match e {
            Expr::Constant(c) if self.version >= Version::V3_7 => Some(fold::truthy(c)),
            Expr::Constant(
                c @ (Constant::Int(_) | Constant::Float(_) | Constant::Str(_) | Constant::Ellipsis),
            ) => Some(fold::truthy(c)),
            Expr::Name(name) if name == "__debug__" => Some(true),
            _ => None,
        }
    }

    fn if_stmt(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> Result<(), CompileError> {
        let end = self.make_jump_label();
        match self.constant_truth(test) {
            Some(false) => self.stmts(orelse)?,
            Some(true) => self.stmts(body)?,
            None => {
                let next = if orelse.is_empty() {
                    end
                } else {
                    self.make_jump_label()
                };
                self.jump_if(test, next, false)?;
                self.stmts(body)?;
                if self.version < Version::V3_6 || !orelse.is_empty() {
                    self.emit_jump(Opcode::JumpForward, end);
                }
                if !orelse.is_empty() {
                    self.commit_jump_label(next);
                    self.stmts(orelse)?;
                }
            }
        }
        self.commit_jump_label(end);
        Ok(())
    }

    fn while_stmt(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> Result<(), CompileError> {
        let truth = self.constant_truth(test);
        if truth == Some(false) {
            return self.stmts(orelse);
        }
        let start = self.make_jump_label();
        let end = self.make_jump_label();
        let anchor = truth.is_none().then(|| self.make_jump_label());
        self.emit_jump(Opcode::SetupLoop, end);
        self.commit_jump_label(start);
        self.unit.loops.push(Loop { start });
        if let Some(anchor) = anchor {
            self.jump_if(test, anchor, false)?;
        }
        self.stmts(body)?;
        self.emit_jump(Opcode::JumpAbsolute, start);
        if let Some(anchor) = anchor {
            self.commit_jump_label(anchor);
        }
        self.emit(Opcode::PopBlock, 0);
        self.unit.loops.pop();
        self.stmts(orelse)?;
        self.commit_jump_label(end);
        Ok(())
    }

    fn for_stmt(
        &mut self,
        target: &Expr,
        iter: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
    ) -> Result<(), CompileError> {
        let start = self.make_jump_label();
        let cleanup = self.make_jump_label();
        let end = self.make_jump_label();
        self.emit_jump(Opcode::SetupLoop, end);
        self.unit.loops.push(Loop { start });
        self.visit_expr(iter)?;
        self.emit(Opcode::GetIter, 0);
        self.commit_jump_label(start);
        self.emit_jump(Opcode::ForIter, cleanup);
        self.store_target(target)?;
        self.stmts(body)?;
        self.emit_jump(Opcode::JumpAbsolute, start);
        self.commit_jump_label(cleanup);
        self.emit(Opcode::PopBlock, 0);
        self.unit.loops.pop();
        self.stmts(orelse)?;
        self.commit_jump_label(end);
        Ok(())
    }

    /// Jump to `label` when `e` evaluates to `cond`. From 3.7 on, `not`, `and`, `or` and
    /// conditional expressions are compiled into the jumps themselves.
    fn jump_if(&mut self, e: &Expr, label: Label, cond: bool) -> Result<(), CompileError> {
        if self.version >= Version::V3_7 {
            match e {
                Expr::UnaryOp(UnaryOp::Not, operand) => return self.jump_if(operand, label, !cond),
                Expr::BoolOp(op, values) => {
                    if let Some((last, rest)) = values.split_last() {
                        let inner = *op == BoolOp::Or;
                        let next = if inner != cond {
                            self.make_jump_label()
                        } else {
                            label
                        };
                        for v in rest {
                            self.jump_if(v, next, inner)?;
                        }
                        self.jump_if(last, label, cond)?;
                        if next != label {
                            self.commit_jump_label(next);
                        }
                        return Ok(());
                    }
                }
                Expr::IfExp { test, body, orelse } => {
                    let end = self.make_jump_label();
                    let next = self.make_jump_label();
                    self.jump_if(test, next, false)?;
                    self.jump_if(body, label, cond)?;
                    self.emit_jump(Opcode::JumpForward, end);
                    self.commit_jump_label(next);
                    self.jump_if(orelse, label, cond)?;
                    self.commit_jump_label(end);
                    return Ok(());
                }
                _ => {}
            }
        }
        self.visit_expr(e)?;
        let op = if cond {
            Opcode::PopJumpIfTrue
        } else {
            Opcode::PopJumpIfFalse
        };
        self.emit_jump(op, label);
        Ok(())
    }

    fn import(&mut self, names: &[Alias]) -> Result<(), CompileError> {
        for alias in names {
            self.load_const(Constant::Int(0));
            self.load_const(Constant::None);
            self.emit_name(Opcode::ImportName, &alias.name);
            let Some(asname) = &alias.asname else {
                let first = alias.name.split('.').next().unwrap_or(&alias.name);
                self.name_op(first, Access::Store)?;
                continue;
            };
            for attr in alias.name.split('.').skip(1) {
                if self.version >= Version::V3_7 {
                    self.emit_name(Opcode::ImportFrom, attr);
                    self.emit(Opcode::RotTwo, 0);
                    self.emit(Opcode::PopTop, 0);
                } else {
                    let index = self.unit.add_name(attr);
                    self.emit(Opcode::LoadAttr, index);
                }
            }
            self.name_op(asname, Access::Store)?;
        }
        Ok(())
    }

    fn import_from(&mut self, module: Option<&str>, names: &[Alias], level: u32) -> Result<(), CompileError> {
        let fromlist = names
            .iter()
            .map(|a| Constant::Str(a.name.clone()))
            .collect_vec();
        self.load_const(Constant::Int(level as i64));
        self.load_const(Constant::Tuple(fromlist));
        self.emit_name(Opcode::ImportName, module.unwrap_or(""));
        if names.first().is_some_and(|a| a.name == "*") {
            if self.unit.kind != UnitKind::Module {
                return Err(CompileError::scope(
                    self.unit.line,
                    "import * only allowed at module level",
                ));
            }
            self.emit(Opcode::ImportStar, 0);
            return Ok(());
        }
        for alias in names {
            self.emit_name(Opcode::ImportFrom, &alias.name);
            self.name_op(alias.asname.as_ref().unwrap_or(&alias.name), Access::Store)?;
        }
        self.emit(Opcode::PopTop, 0);
        Ok(())
    }

    /// Emit parameter defaults and return the `MAKE_FUNCTION` argument they imply.
    fn defaults(&mut self, args: &Arguments) -> Result<u32, CompileError> {
        let kw_defaults = args
            .kwonly
            .iter()
            .zip(&args.kw_defaults)
            .filter_map(|(name, default)| default.as_ref().map(|d| (self.unit.mangle(name), d)))
            .collect_vec();
        if self.version >= Version::V3_6 {
            let mut flags = 0;
            if !args.defaults.is_empty() {
                for d in &args.defaults {
                    self.visit_expr(d)?;
                }
                self.emit(Opcode::BuildTuple, args.defaults.len() as u32);
                flags |= 0x01;
            }
            if !kw_defaults.is_empty() {
                for (_, d) in &kw_defaults {
                    self.visit_expr(d)?;
                }
                let keys = kw_defaults
                    .iter()
                    .map(|(name, _)| Constant::Str(name.clone()))
                    .collect();
                self.load_const(Constant::Tuple(keys));
                self.emit(Opcode::BuildConstKeyMap, kw_defaults.len() as u32);
                flags |= 0x02;
            }
            return Ok(flags);
        }
        if self.version == Version::V3_5 {
            for d in &args.defaults {
                self.visit_expr(d)?;
            }
        }
        for (name, d) in &kw_defaults {
            self.load_const(Constant::Str(name.clone()));
            self.visit_expr(d)?;
        }
        if self.version == Version::V3_4 {
            for d in &args.defaults {
                self.visit_expr(d)?;
            }
        }
        Ok(args.defaults.len() as u32 | (kw_defaults.len() as u32) << 8)
    }

    /// Emit parameter annotations and return the `MAKE_FUNCTION` bits they add: a flag from 3.6,
    /// before that the number of values plus the names tuple, in the high half.
    fn annotations(&mut self, args: &Arguments) -> Result<u32, CompileError> {
        if args.annotations.is_empty() {
            return Ok(0);
        }
        for (_, annotation) in &args.annotations {
            self.visit_expr(annotation)?;
        }
        let names = args
            .annotations
            .iter()
            .map(|(name, _)| Constant::Str(self.unit.mangle(name)))
            .collect();
        self.load_const(Constant::Tuple(names));
        let count = args.annotations.len() as u32;
        if self.version >= Version::V3_6 {
            self.emit(Opcode::BuildConstKeyMap, count);
            return Ok(0x04);
        }
        Ok((count + 1) << 16)
    }

    fn decorators(&mut self, decorators: &[Expr]) -> Result<(), CompileError> {
        decorators.iter().try_for_each(|d| self.visit_expr(d))
    }

    /// Call the decorators left on the stack, innermost first.
    fn apply_decorators(&mut self, decorators: &[Expr]) {
        for _ in decorators {
            self.emit(Opcode::CallFunction, 1);
        }
    }

    fn parameters(&mut self, args: &Arguments) {
        for name in args.names() {
            let mangled = self.unit.mangle(name);
            self.unit.varnames.insert(mangled);
        }
        self.unit.argcount = args.args.len() as u32;
        self.unit.kwonlyargcount = args.kwonly.len() as u32;
        if args.vararg.is_some() {
            self.unit.flags |= CO_VARARGS;
        }
        if args.kwarg.is_some() {
            self.unit.flags |= CO_VARKEYWORDS;
        }
    }

    fn function(
        &mut self,
        name: &str,
        args: &Arguments,
        body: &[Stmt],
        scope: ScopeId,
    ) -> Result<(Arc<CodeObject>, String), CompileError> {
        self.enter_unit(UnitKind::Function, scope, name)?;
        let doc = docstring(body);
        self.unit
            .add_const(doc.map_or(Constant::None, |d| Constant::Str(d.to_string())));
        self.parameters(args);
        let skip = doc.is_some() as usize;
        self.stmts(&body[skip..])?;
        self.exit_unit()
    }

    fn class(&mut self, name: &str, body: &[Stmt], scope: ScopeId) -> Result<(Arc<CodeObject>, String), CompileError> {
        self.enter_unit(UnitKind::Class, scope, name)?;
        self.name_op("__name__", Access::Load)?;
        self.name_op("__module__", Access::Store)?;
        let qualname = self.unit.qualname.clone();
        self.load_const(Constant::Str(qualname));
        self.name_op("__qualname__", Access::Store)?;
        self.body(body, true)?;
        self.load_const(Constant::None);
        self.emit(Opcode::ReturnValue, 0);
        self.exit_unit()
    }

    /// Load the cells a nested code object closes over, then make the function.
    fn make_closure(&mut self, code: Arc<CodeObject>, flags: u32, qualname: &str) -> Result<(), CompileError> {
        let free = code.freevars.clone();
        if !free.is_empty() {
            let block = self.block(self.unit.scope)?;
            for name in &free {
                let index = match block.scope_of(name) {
                    Some(NameScope::Cell) => self.unit.cellvars.iter().position(|c| c == name),
                    _ => self
                        .unit
                        .freevars
                        .iter()
                        .position(|f| f == name)
                        .map(|i| self.unit.cellvars.len() + i),
                };
                let index = index.ok_or_else(|| {
                    CompileError::scope(self.unit.line, format!("no closure cell for '{name}'"))
                })?;
                self.emit(Opcode::LoadClosure, index as u32);
            }
            self.emit(Opcode::BuildTuple, free.len() as u32);
        }
        self.load_const(Constant::Code(code));
        self.load_const(Constant::Str(qualname.to_string()));
        match (free.is_empty(), self.version < Version::V3_6) {
            (false, true) => self.emit(Opcode::MakeClosure, flags),
            (false, false) => self.emit(Opcode::MakeFunction, flags | 0x08),
            (true, _) => self.emit(Opcode::MakeFunction, flags),
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let line = self.unit.line;
        match expr {
            Expr::Name(name) => self.name_op(name, Access::Load)?,
            Expr::Constant(c) => self.load_const(c.clone()),
            Expr::Attribute(value, attr) => {
                self.visit_expr(value)?;
                self.emit_name(Opcode::LoadAttr, attr);
            }
            Expr::Subscript(value, index) => {
                self.visit_expr(value)?;
                self.visit_expr(index)?;
                self.emit(Opcode::BinarySubscr, 0);
            }
            Expr::Slice(lower, upper, step) => {
                for bound in [lower, upper] {
                    match bound {
                        Some(b) => self.visit_expr(b)?,
                        None => self.load_const(Constant::None),
                    }
                }
                match step {
                    Some(step) => {
                        self.visit_expr(step)?;
                        self.emit(Opcode::BuildSlice, 3);
                    }
                    None => self.emit(Opcode::BuildSlice, 2),
                }
            }
            Expr::BinOp(op, left, right) => {
                self.visit_expr(left)?;
                self.visit_expr(right)?;
                self.emit(binary_opcode(*op, false), 0);
            }
            Expr::UnaryOp(op, operand) => {
                self.visit_expr(operand)?;
                let op = match op {
                    UnaryOp::Pos => Opcode::UnaryPositive,
                    UnaryOp::Neg => Opcode::UnaryNegative,
                    UnaryOp::Invert => Opcode::UnaryInvert,
                    UnaryOp::Not => Opcode::UnaryNot,
                };
                self.emit(op, 0);
            }
            Expr::BoolOp(op, values) => {
                let jump = match op {
                    BoolOp::And => Opcode::JumpIfFalseOrPop,
                    BoolOp::Or => Opcode::JumpIfTrueOrPop,
                };
                let end = self.make_jump_label();
                if let Some((last, rest)) = values.split_last() {
                    for v in rest {
                        self.visit_expr(v)?;
                        self.emit_jump(jump, end);
                    }
                    self.visit_expr(last)?;
                }
                self.commit_jump_label(end);
            }
            Expr::Compare(left, comparators) => {
                let [(op, right)] = comparators.as_slice() else {
                    return Err(CompileError::unsupported(line, "chained comparison"));
                };
                self.visit_expr(left)?;
                self.visit_expr(right)?;
                self.emit(Opcode::CompareOp, op.arg());
            }
            Expr::IfExp { test, body, orelse } => {
                let end = self.make_jump_label();
                let next = self.make_jump_label();
                self.jump_if(test, next, false)?;
                self.visit_expr(body)?;
                self.emit_jump(Opcode::JumpForward, end);
                self.commit_jump_label(next);
                self.visit_expr(orelse)?;
                self.commit_jump_label(end);
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => self.call(func, args, keywords)?,
            Expr::Starred(_) => {
                return Err(CompileError::unsupported(line, "starred expression"));
            }
            Expr::Tuple(elts) => self.sequence(elts, Opcode::BuildTuple)?,
            Expr::List(elts) => self.sequence(elts, Opcode::BuildList)?,
            Expr::Set(elts) => self.sequence(elts, Opcode::BuildSet)?,
            Expr::Dict(entries) => self.dict(entries)?,
            Expr::Lambda { args, body, scope } => {
                let flags = self.defaults(args)?;
                self.enter_unit(UnitKind::Lambda, *scope, "<lambda>")?;
                self.unit.add_const(Constant::None);
                self.parameters(args);
                self.visit_expr(body)?;
                self.emit(Opcode::ReturnValue, 0);
                let (code, qualname) = self.exit_unit()?;
                self.make_closure(code, flags, &qualname)?;
            }
            Expr::ListComp {
                elt,
                target,
                iter,
                ifs,
                scope,
            } => self.list_comprehension(elt, target, iter, ifs, *scope)?,
            Expr::JoinedStr(values) => {
                for v in values {
                    self.visit_expr(v)?;
                }
                if values.len() != 1 {
                    self.emit(Opcode::BuildString, values.len() as u32);
                }
            }
            Expr::FormattedValue {
                value,
                conversion,
                spec,
            } => {
                self.visit_expr(value)?;
                let mut arg = match conversion {
                    Some('s') => 1,
                    Some('r') => 2,
                    Some('a') => 3,
                    _ => 0,
                };
                if let Some(spec) = spec {
                    self.visit_expr(spec)?;
                    arg |= 4;
                }
                self.emit(Opcode::FormatValue, arg);
            }
        }
        Ok(())
    }

    fn sequence(&mut self, elts: &[Expr], build: Opcode) -> Result<(), CompileError> {
        if elts.iter().any(|e| matches!(e, Expr::Starred(_))) {
            return Err(CompileError::unsupported(self.unit.line, "starred display element"));
        }
        for e in elts {
            self.visit_expr(e)?;
        }
        self.emit(build, elts.len() as u32);
        Ok(())
    }

    fn dict(&mut self, entries: &[(Option<Expr>, Expr)]) -> Result<(), CompileError> {
        let pairs = entries
            .iter()
            .map(|(k, v)| k.as_ref().map(|k| (k, v)))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CompileError::unsupported(self.unit.line, "dictionary unpacking"))?;
        let n = pairs.len() as u32;
        if self.version == Version::V3_4 {
            self.emit(Opcode::BuildMap, n.min(0xffff));
            for (key, value) in pairs {
                self.visit_expr(value)?;
                self.visit_expr(key)?;
                self.emit(Opcode::StoreMap, 0);
            }
            return Ok(());
        }
        let constant_keys = pairs
            .iter()
            .map(|(k, _)| k.as_constant().cloned())
            .collect::<Option<Vec<_>>>();
        if self.version >= Version::V3_6
            && n > 1
            && let Some(keys) = constant_keys
        {
            for (_, value) in &pairs {
                self.visit_expr(value)?;
            }
            self.load_const(Constant::Tuple(keys));
            self.emit(Opcode::BuildConstKeyMap, n);
            return Ok(());
        }
        for (key, value) in pairs {
            self.visit_expr(key)?;
            self.visit_expr(value)?;
        }
        self.emit(Opcode::BuildMap, n);
        Ok(())
    }

    fn list_comprehension(
        &mut self,
        elt: &Expr,
        target: &Expr,
        iter: &Expr,
        ifs: &[Expr],
        scope: ScopeId,
    ) -> Result<(), CompileError> {
        self.enter_unit(UnitKind::Comprehension, scope, "<listcomp>")?;
        self.unit.varnames.insert(".0".to_string());
        self.unit.argcount = 1;
        let start = self.make_jump_label();
        let if_cleanup = self.make_jump_label();
        let anchor = self.make_jump_label();
        self.emit(Opcode::BuildList, 0);
        self.emit(Opcode::LoadFast, 0);
        self.commit_jump_label(start);
        self.emit_jump(Opcode::ForIter, anchor);
        self.store_target(target)?;
        for cond in ifs {
            self.jump_if(cond, if_cleanup, false)?;
        }
        self.visit_expr(elt)?;
        self.emit(Opcode::ListAppend, 2);
        self.commit_jump_label(if_cleanup);
        self.emit_jump(Opcode::JumpAbsolute, start);
        self.commit_jump_label(anchor);
        self.emit(Opcode::ReturnValue, 0);
        let (code, qualname) = self.exit_unit()?;

        self.make_closure(code, 0, &qualname)?;
        self.visit_expr(iter)?;
        self.emit(Opcode::GetIter, 0);
        self.emit(Opcode::CallFunction, 1);
        Ok(())
    }

    fn call(&mut self, func: &Expr, args: &[Expr], keywords: &[Keyword]) -> Result<(), CompileError> {
        if self.version >= Version::V3_7
            && let Expr::Attribute(obj, attr) = func
            && keywords.is_empty()
            && !args.iter().any(|a| matches!(a, Expr::Starred(_)))
        {
            self.visit_expr(obj)?;
            self.emit_name(Opcode::LoadMethod, attr);
            for a in args {
                self.visit_expr(a)?;
            }
            self.emit(Opcode::CallMethod, args.len() as u32);
            return Ok(());
        }
        self.visit_expr(func)?;
        self.call_helper(0, args, keywords)
    }

    /// The arguments and call instruction, with `pushed` positional values already on the stack.
    fn call_helper(&mut self, pushed: u32, args: &[Expr], keywords: &[Keyword]) -> Result<(), CompileError> {
        if self.version >= Version::V3_6 {
            self.call_helper_ex(pushed, args, keywords)
        } else {
            self.call_helper_legacy(pushed, args, keywords)
        }
    }

    /// Before 3.6: one optional `*` and `**` each, encoded in the opcode.
    fn call_helper_legacy(&mut self, pushed: u32, args: &[Expr], keywords: &[Keyword]) -> Result<(), CompileError> {
        let line = self.unit.line;
        let mut positional = pushed;
        let mut star = None;
        for arg in args {
            match arg {
                Expr::Starred(inner) if star.is_none() => star = Some(inner.as_ref()),
                Expr::Starred(_) => {
                    return Err(CompileError::unsupported(line, "several starred arguments"));
                }
                _ if star.is_some() => {
                    return Err(CompileError::unsupported(
                        line,
                        "positional argument after a starred argument",
                    ));
                }
                other => {
                    self.visit_expr(other)?;
                    positional += 1;
                }
            }
        }
        let mut double_star = None;
        let mut named = vec![];
        for kw in keywords {
            match &kw.arg {
                None if double_star.is_none() => double_star = Some(&kw.value),
                None => return Err(CompileError::unsupported(line, "several ** arguments")),
                Some(_) if double_star.is_some() => {
                    return Err(CompileError::unsupported(line, "keyword argument after **"));
                }
                Some(name) => named.push((name, &kw.value)),
            }
        }
        if self.version >= Version::V3_5
            && let Some(star) = star
        {
            self.visit_expr(star)?;
        }
        for (name, value) in &named {
            self.load_const(Constant::Str(name.to_string()));
            self.visit_expr(value)?;
        }
        if self.version < Version::V3_5
            && let Some(star) = star
        {
            self.visit_expr(star)?;
        }
        if let Some(double_star) = double_star {
            self.visit_expr(double_star)?;
        }
        let op = match (star.is_some(), double_star.is_some()) {
            (false, false) => Opcode::CallFunction,
            (true, false) => Opcode::CallFunctionVar,
            (false, true) => Opcode::CallFunctionKw,
            (true, true) => Opcode::CallFunctionVarKw,
        };
        self.emit(op, positional | (named.len() as u32) << 8);
        Ok(())
    }

    /// From 3.6 on: keyword names travel in a constant tuple, and unpacking goes through
    /// `CALL_FUNCTION_EX` with the positional and keyword arguments packed up.
    fn call_helper_ex(&mut self, pushed: u32, args: &[Expr], keywords: &[Keyword]) -> Result<(), CompileError> {
        let must_unpack = keywords.iter().any(|k| k.arg.is_none());
        let mut seen = pushed;
        let mut packed = 0;
        for arg in args {
            if let Expr::Starred(inner) = arg {
                if seen > 0 {
                    self.emit(Opcode::BuildTuple, seen);
                    seen = 0;
                    packed += 1;
                }
                self.visit_expr(inner)?;
                packed += 1;
            } else {
                self.visit_expr(arg)?;
                seen += 1;
            }
        }
        if packed == 0 && !must_unpack {
            if keywords.is_empty() {
                self.emit(Opcode::CallFunction, seen);
                return Ok(());
            }
            for kw in keywords {
                self.visit_expr(&kw.value)?;
            }
            let names = keywords
                .iter()
                .map(|k| Constant::Str(k.arg.clone().unwrap_or_default()))
                .collect();
            self.load_const(Constant::Tuple(names));
            self.emit(Opcode::CallFunctionKw, seen + keywords.len() as u32);
            return Ok(());
        }

        if seen > 0 {
            self.emit(Opcode::BuildTuple, seen);
            packed += 1;
        }
        if packed > 1 {
            self.emit(Opcode::BuildTupleUnpackWithCall, packed);
        } else if packed == 0 {
            self.emit(Opcode::BuildTuple, 0);
        }
        let mut maps = 0;
        let mut start = 0;
        for (i, kw) in keywords.iter().enumerate() {
            if kw.arg.is_none() {
                if i > start {
                    self.keyword_map(&keywords[start..i])?;
                    maps += 1;
                }
                self.visit_expr(&kw.value)?;
                maps += 1;
                start = i + 1;
            }
        }
        if keywords.len() > start {
            self.keyword_map(&keywords[start..])?;
            maps += 1;
        }
        if maps > 1 {
            self.emit(Opcode::BuildMapUnpackWithCall, maps);
        }
        self.emit(Opcode::CallFunctionEx, (maps > 0) as u32);
        Ok(())
    }

    /// A run of named arguments packed into one dictionary.
    fn keyword_map(&mut self, keywords: &[Keyword]) -> Result<(), CompileError> {
        let name = |k: &Keyword| Constant::Str(k.arg.clone().unwrap_or_default());
        if keywords.len() > 1 {
            for kw in keywords {
                self.visit_expr(&kw.value)?;
            }
            self.load_const(Constant::Tuple(keywords.iter().map(name).collect()));
            self.emit(Opcode::BuildConstKeyMap, keywords.len() as u32);
        } else {
            for kw in keywords {
                self.load_const(name(kw));
                self.visit_expr(&kw.value)?;
            }
            self.emit(Opcode::BuildMap, keywords.len() as u32);
        }
        Ok(())
    }
}

fn binary_opcode(op: BinaryOp, inplace: bool) -> Opcode {
    match (op, inplace) {
        (BinaryOp::Pow, false) => Opcode::BinaryPower,
        (BinaryOp::Mul, false) => Opcode::BinaryMultiply,
        (BinaryOp::MatMul, false) => Opcode::BinaryMatrixMultiply,
        (BinaryOp::Mod, false) => Opcode::BinaryModulo,
        (BinaryOp::Add, false) => Opcode::BinaryAdd,
        (BinaryOp::Sub, false) => Opcode::BinarySubtract,
        (BinaryOp::FloorDiv, false) => Opcode::BinaryFloorDivide,
        (BinaryOp::TrueDiv, false) => Opcode::BinaryTrueDivide,
        (BinaryOp::LShift, false) => Opcode::BinaryLshift,
        (BinaryOp::RShift, false) => Opcode::BinaryRshift,
        (BinaryOp::BitAnd, false) => Opcode::BinaryAnd,
        (BinaryOp::BitXor, false) => Opcode::BinaryXor,
        (BinaryOp::BitOr, false) => Opcode::BinaryOr,
        (BinaryOp::Pow, true) => Opcode::InplacePower,
        (BinaryOp::Mul, true) => Opcode::InplaceMultiply,
        (BinaryOp::MatMul, true) => Opcode::InplaceMatrixMultiply,
        (BinaryOp::Mod, true) => Opcode::InplaceModulo,
        (BinaryOp::Add, true) => Opcode::InplaceAdd,
        (BinaryOp::Sub, true) => Opcode::InplaceSubtract,
        (BinaryOp::FloorDiv, true) => Opcode::InplaceFloorDivide,
        (BinaryOp::TrueDiv, true) => Opcode::InplaceTrueDivide,
        (BinaryOp::LShift, true) => Opcode::InplaceLshift,
        (BinaryOp::RShift, true) => Opcode::InplaceRshift,
        (BinaryOp::BitAnd, true) => Opcode::InplaceAnd,
        (BinaryOp::BitXor, true) => Opcode::InplaceXor,
        (BinaryOp::BitOr, true) => Opcode::InplaceOr,
    }
}

/// Generate the module code object for an already folded and resolved syntax tree.
pub fn compile_module(
    module: &Module,
    symbols: &SymbolTable,
    version: Version,
    mode: Mode,
) -> Result<CodeObject, CompileError> {
    let block = symbols
        .block(MODULE_SCOPE)
        .ok_or_else(|| CompileError::scope(1, "no module scope"))?;
    let unit = Unit::new(
        UnitKind::Module,
        MODULE_SCOPE,
        "<module>",
        "<module>".to_string(),
        1,
        block,
    );
    let mut state = CodegenState {
        version,
        mode,
        symbols,
        unit,
        parents: vec![],
    };
    state.body(&module.body, mode == Mode::Exec)?;
    if !state.unit.returns {
        state.load_const(Constant::None);
        state.emit(Opcode::ReturnValue, 0);
    }
    state.unit.into_code(version)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use unindent::unindent;
    use unpyc_bytecode::{OpcodeTable, disassemble};

    use super::*;
    use crate::compile;

    fn module(source: &str, version: Version) -> CodeObject {
        compile(&unindent(source), version, Mode::Exec).unwrap()
    }

    fn opcodes(code: &CodeObject, version: Version) -> Vec<&'static str> {
        let table = OpcodeTable::for_version(version).unwrap();
        disassemble(code, version, &table)
            .unwrap()
            .iter()
            .map(|i| i.name())
            .collect()
    }

    fn nested(code: &CodeObject, index: usize) -> Arc<CodeObject> {
        code.consts
            .iter()
            .filter_map(|c| c.as_code())
            .nth(index)
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_simple_assignment() {
        let code = module("x = 1", Version::V3_7);
        assert_eq!(
            opcodes(&code, Version::V3_7),
            vec!["LOAD_CONST", "STORE_NAME", "LOAD_CONST", "RETURN_VALUE"]
        );
        assert_eq!(code.names, vec!["x".to_string()]);
        assert_eq!(code.consts, vec![Constant::Int(1), Constant::None]);
        assert_eq!(code.flags, CO_NOFREE);
    }

    #[test_case(Version::V3_4, true; "legacy jumps past a missing else")]
    #[test_case(Version::V3_6, false; "no jump without an else")]
    fn test_if_without_else(version: Version, jumps: bool) {
        let code = module(
            "
            if a:
                b = 1
            c = 2
            ",
            version,
        );
        let mut expected = vec!["LOAD_NAME", "POP_JUMP_IF_FALSE", "LOAD_CONST", "STORE_NAME"];
        if jumps {
            expected.push("JUMP_FORWARD");
        }
        expected.extend(["LOAD_CONST", "STORE_NAME", "LOAD_CONST", "RETURN_VALUE"]);
        assert_eq!(opcodes(&code, version), expected);
    }

    #[test]
    fn test_while_true_drops_the_test() {
        let code = module(
            "
            while True:
                f()
            ",
            Version::V3_5,
        );
        assert_eq!(
            opcodes(&code, Version::V3_5),
            vec![
                "SETUP_LOOP",
                "LOAD_NAME",
                "CALL_FUNCTION",
                "POP_TOP",
                "JUMP_ABSOLUTE",
                "POP_BLOCK",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
    }

    #[test]
    fn test_method_call() {
        let code = module("o.m(1)", Version::V3_7);
        assert_eq!(
            opcodes(&code, Version::V3_7),
            vec![
                "LOAD_NAME",
                "LOAD_METHOD",
                "LOAD_CONST",
                "CALL_METHOD",
                "POP_TOP",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
    }

    #[test]
    fn test_keyword_call_names_tuple() {
        let code = module("f(a, b=1)", Version::V3_6);
        assert_eq!(
            opcodes(&code, Version::V3_6),
            vec![
                "LOAD_NAME",
                "LOAD_NAME",
                "LOAD_CONST",
                "LOAD_CONST",
                "CALL_FUNCTION_KW",
                "POP_TOP",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
        assert!(
            code.consts
                .contains(&Constant::Tuple(vec![Constant::Str("b".into())]))
        );
    }

    #[test]
    fn test_legacy_star_call_order() {
        let version = Version::V3_4;
        let code = module("f(a, *b, c=1)", version);
        assert_eq!(
            opcodes(&code, version),
            vec![
                "LOAD_NAME",
                "LOAD_NAME",
                "LOAD_CONST",
                "LOAD_CONST",
                "LOAD_NAME",
                "CALL_FUNCTION_VAR",
                "POP_TOP",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
        let table = OpcodeTable::for_version(version).unwrap();
        let call = disassemble(&code, version, &table).unwrap()[5].clone();
        assert_eq!(call.arg, Some(1 | 1 << 8));
    }

    #[test]
    fn test_star_call_ex() {
        let code = module("f(a, *b, **c)", Version::V3_6);
        assert_eq!(
            opcodes(&code, Version::V3_6),
            vec![
                "LOAD_NAME",
                "LOAD_NAME",
                "BUILD_TUPLE",
                "LOAD_NAME",
                "BUILD_TUPLE_UNPACK_WITH_CALL",
                "LOAD_NAME",
                "CALL_FUNCTION_EX",
                "POP_TOP",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
    }

    #[test]
    fn test_swap_uses_rotation() {
        let code = module("a, b = b, a", Version::V3_4);
        assert_eq!(
            opcodes(&code, Version::V3_4),
            vec![
                "LOAD_NAME",
                "LOAD_NAME",
                "ROT_TWO",
                "STORE_NAME",
                "STORE_NAME",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
    }

    #[test]
    fn test_closure() {
        let version = Version::V3_6;
        let code = module(
            "
            def outer(a):
                def inner():
                    return a
                return inner
            ",
            version,
        );
        let outer = nested(&code, 0);
        assert_eq!(
            opcodes(&outer, version),
            vec![
                "LOAD_CLOSURE",
                "BUILD_TUPLE",
                "LOAD_CONST",
                "LOAD_CONST",
                "MAKE_FUNCTION",
                "STORE_FAST",
                "LOAD_FAST",
                "RETURN_VALUE",
            ]
        );
        assert_eq!(outer.cellvars, vec!["a".to_string()]);
        assert_eq!(outer.varnames, vec!["a".to_string(), "inner".to_string()]);
        assert_eq!(outer.flags, CO_OPTIMIZED | CO_NEWLOCALS);
        assert!(
            outer
                .consts
                .contains(&Constant::Str("outer.<locals>.inner".into()))
        );

        let inner = nested(&outer, 0);
        assert_eq!(opcodes(&inner, version), vec!["LOAD_DEREF", "RETURN_VALUE"]);
        assert_eq!(inner.freevars, vec!["a".to_string()]);
        assert_eq!(inner.flags, CO_OPTIMIZED | CO_NEWLOCALS | CO_NESTED);
    }

    #[test]
    fn test_class_prelude() {
        let version = Version::V3_7;
        let code = module(
            "
            class A(B):
                x = 1
            ",
            version,
        );
        assert_eq!(
            opcodes(&code, version),
            vec![
                "LOAD_BUILD_CLASS",
                "LOAD_CONST",
                "LOAD_CONST",
                "MAKE_FUNCTION",
                "LOAD_CONST",
                "LOAD_NAME",
                "CALL_FUNCTION",
                "STORE_NAME",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
        let body = nested(&code, 0);
        assert_eq!(
            opcodes(&body, version),
            vec![
                "LOAD_NAME",
                "STORE_NAME",
                "LOAD_CONST",
                "STORE_NAME",
                "LOAD_CONST",
                "STORE_NAME",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
        assert_eq!(body.names, vec!["__name__", "__module__", "__qualname__", "x"]);
    }

    #[test]
    fn test_list_comprehension() {
        let version = Version::V3_5;
        let code = module("[x for x in y if x]", version);
        let body = nested(&code, 0);
        assert_eq!(body.name, "<listcomp>");
        assert_eq!(
            opcodes(&body, version),
            vec![
                "BUILD_LIST",
                "LOAD_FAST",
                "FOR_ITER",
                "STORE_FAST",
                "LOAD_FAST",
                "POP_JUMP_IF_FALSE",
                "LOAD_FAST",
                "LIST_APPEND",
                "JUMP_ABSOLUTE",
                "RETURN_VALUE",
            ]
        );
        let table = OpcodeTable::for_version(version).unwrap();
        let test = disassemble(&body, version, &table).unwrap()[5].clone();
        assert_eq!(test.jump_target(), Some(6));
    }

    #[test]
    fn test_defaults_by_version() {
        let source = "def f(a=1, *, b=2): pass";
        let legacy = module(source, Version::V3_4);
        assert_eq!(
            opcodes(&legacy, Version::V3_4),
            vec![
                "LOAD_CONST",
                "LOAD_CONST",
                "LOAD_CONST",
                "LOAD_CONST",
                "LOAD_CONST",
                "MAKE_FUNCTION",
                "STORE_NAME",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
        assert_eq!(legacy.consts[0], Constant::Str("b".into()));

        let modern = module(source, Version::V3_6);
        assert_eq!(
            opcodes(&modern, Version::V3_6),
            vec![
                "LOAD_CONST",
                "LOAD_CONST",
                "LOAD_CONST",
                "BUILD_CONST_KEY_MAP",
                "LOAD_CONST",
                "LOAD_CONST",
                "MAKE_FUNCTION",
                "STORE_NAME",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
    }

    #[test_case(Version::V3_4, 1 | 3 << 16; "names tuple 3.4")]
    #[test_case(Version::V3_5, 1 | 3 << 16; "names tuple 3.5")]
    #[test_case(Version::V3_6, 0x05; "annotations flag 3.6")]
    #[test_case(Version::V3_7, 0x05; "annotations flag 3.7")]
    fn test_parameter_annotations(version: Version, make_function: u32) {
        let code = module("def f(a: int = 3) -> str: pass", version);
        let table = OpcodeTable::for_version(version).unwrap();
        let instructions = disassemble(&code, version, &table).unwrap();
        let make = instructions
            .iter()
            .position(|i| i.name() == "MAKE_FUNCTION")
            .unwrap();
        assert_eq!(instructions[make].arg, Some(make_function));
        let loaded = instructions[..make]
            .iter()
            .filter(|i| i.name() == "LOAD_NAME")
            .map(|i| i.argrepr.as_str())
            .collect::<Vec<_>>();
        assert_eq!(loaded, vec!["int", "str"]);
        let names = Constant::Tuple(vec![
            Constant::Str("a".into()),
            Constant::Str("return".into()),
        ]);
        assert!(code.consts.contains(&names), "{:?}", code.consts);
    }

    #[test]
    fn test_decorators() {
        let code = module(
            "
            @a
            @b.c(1)
            def f(): pass
            @d
            class C: pass
            ",
            Version::V3_6,
        );
        assert_eq!(
            opcodes(&code, Version::V3_6),
            vec![
                "LOAD_NAME",
                "LOAD_NAME",
                "LOAD_ATTR",
                "LOAD_CONST",
                "CALL_FUNCTION",
                "LOAD_CONST",
                "LOAD_CONST",
                "MAKE_FUNCTION",
                "CALL_FUNCTION",
                "CALL_FUNCTION",
                "STORE_NAME",
                "LOAD_NAME",
                "LOAD_BUILD_CLASS",
                "LOAD_CONST",
                "LOAD_CONST",
                "MAKE_FUNCTION",
                "LOAD_CONST",
                "CALL_FUNCTION",
                "CALL_FUNCTION",
                "STORE_NAME",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
        assert_eq!(nested(&code, 0).first_line, 1);
        assert_eq!(nested(&code, 1).first_line, 4);
    }

    #[test]
    fn test_folding_by_version() {
        let legacy = module("x = 2 * 3", Version::V3_5);
        assert_eq!(
            legacy.consts,
            vec![Constant::Int(2), Constant::Int(3), Constant::None, Constant::Int(6)]
        );
        let modern = module("x = 2 * 3", Version::V3_7);
        assert_eq!(modern.consts, vec![Constant::Int(6), Constant::None]);
    }

    #[test]
    fn test_module_docstring() {
        let code = module(
            "
            '''doc'''
            x = 1
            ",
            Version::V3_6,
        );
        assert_eq!(code.consts[0], Constant::Str("doc".into()));
        assert_eq!(code.names, vec!["__doc__", "x"]);
    }

    #[test_case(Version::V3_6, vec!["SETUP_ANNOTATIONS", "LOAD_CONST", "STORE_NAME", "LOAD_NAME", "STORE_ANNOTATION", "LOAD_CONST", "RETURN_VALUE"]; "store annotation")]
    #[test_case(Version::V3_7, vec!["SETUP_ANNOTATIONS", "LOAD_CONST", "STORE_NAME", "LOAD_NAME", "LOAD_NAME", "LOAD_CONST", "STORE_SUBSCR", "LOAD_CONST", "RETURN_VALUE"]; "annotations mapping")]
    fn test_annotated_assignment(version: Version, expected: Vec<&str>) {
        let code = module("x: int = 1", version);
        assert_eq!(opcodes(&code, version), expected);
    }

    #[test]
    fn test_single_mode_prints() {
        let code = compile("1 + a\n", Version::V3_6, Mode::Single).unwrap();
        assert_eq!(
            opcodes(&code, Version::V3_6),
            vec![
                "LOAD_CONST",
                "LOAD_NAME",
                "BINARY_ADD",
                "PRINT_EXPR",
                "LOAD_CONST",
                "RETURN_VALUE",
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let code = compile("\n\nx = 1\ny = 2\n", Version::V3_6, Mode::Exec).unwrap();
        assert_eq!(code.first_line, 3);
        assert_eq!(code.lnotab, vec![4, 1]);
    }

    #[test_case("break"; "break outside loop")]
    #[test_case("continue"; "continue outside loop")]
    #[test_case("return 1"; "return outside function")]
    #[test_case("def f():\n    from m import *"; "import star in function")]
    fn test_scope_errors(source: &str) {
        assert!(matches!(
            compile(source, Version::V3_7, Mode::Exec),
            Err(CompileError::Scope { .. })
        ));
    }

    #[test_case("a < b < c"; "chained comparison")]
    #[test_case("a, *b = c"; "starred target")]
    #[test_case("x = {**a}"; "dictionary unpacking")]
    fn test_unsupported(source: &str) {
        assert!(matches!(
            compile(source, Version::V3_7, Mode::Exec),
            Err(CompileError::Unsupported { .. })
        ));
    }
}
