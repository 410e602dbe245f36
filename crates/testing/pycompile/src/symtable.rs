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

//! Name resolution: which names each scope binds, and whether a use is local, global, a cell
//! shared with nested functions, or free from an enclosing function.

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use tracing::trace;

use crate::ast::{Arguments, Expr, MODULE_SCOPE, Module, ScopeId, Stmt, StmtNode};
use crate::error::CompileError;

pub const DEF_GLOBAL: u32 = 1;
pub const DEF_LOCAL: u32 = 2;
pub const DEF_PARAM: u32 = 4;
pub const DEF_NONLOCAL: u32 = 8;
pub const USE: u32 = 0x10;
/// A class binds the name and a method also uses it free.
pub const DEF_FREE_CLASS: u32 = 0x40;
pub const DEF_IMPORT: u32 = 0x80;

const DEF_BOUND: u32 = DEF_LOCAL | DEF_PARAM | DEF_IMPORT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Module,
    Class,
    Function,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameScope {
    Local,
    GlobalExplicit,
    GlobalImplicit,
    Free,
    Cell,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub kind: BlockKind,
    pub name: String,
    /// Flags per name, in first-seen order.
    pub symbols: IndexMap<String, u32>,
    pub children: Vec<ScopeId>,
    /// Inside a function, at any depth.
    pub nested: bool,
    /// The class whose private names get mangled here.
    pub private: Option<String>,
    scopes: AHashMap<String, NameScope>,
}

impl Block {
    fn new(kind: BlockKind, name: &str, nested: bool, private: Option<String>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            symbols: IndexMap::new(),
            children: vec![],
            nested,
            private,
            scopes: AHashMap::new(),
        }
    }

    /// Resolution of a name; `None` for names the body never mentions.
    pub fn scope_of(&self, name: &str) -> Option<NameScope> {
        self.scopes.get(name).copied()
    }

    pub fn flags(&self, name: &str) -> u32 {
        self.symbols.get(name).copied().unwrap_or(0)
    }

    /// `co_freevars`: free names plus class-bound names methods see through the class cell.
    pub fn freevars(&self) -> Vec<String> {
        self.sorted(|name, scope| {
            scope == NameScope::Free || self.flags(name) & DEF_FREE_CLASS != 0
        })
    }

    pub fn cellvars(&self) -> Vec<String> {
        self.sorted(|_, scope| scope == NameScope::Cell)
    }

    fn sorted(&self, keep: impl Fn(&str, NameScope) -> bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .scopes
            .iter()
            .filter(|(name, scope)| keep(name, **scope))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

/// `__spam` inside class `Ham` is stored as `_Ham__spam`.
pub fn mangle(private: Option<&str>, name: &str) -> String {
    let Some(class) = private else {
        return name.to_string();
    };
    if !name.starts_with("__") || name.ends_with("__") || name.contains('.') {
        return name.to_string();
    }
    let class = class.trim_start_matches('_');
    if class.is_empty() {
        return name.to_string();
    }
    format!("_{class}{name}")
}

#[derive(Clone, Debug)]
pub struct SymbolTable {
    blocks: AHashMap<ScopeId, Block>,
}

impl SymbolTable {
    pub fn build(module: &Module) -> Result<Self, CompileError> {
        let mut builder = Builder {
            blocks: AHashMap::new(),
            stack: vec![],
            line: 1,
        };
        builder.enter(MODULE_SCOPE, BlockKind::Module, "top");
        builder.stmts(&module.body)?;
        builder.exit();
        let mut table = SymbolTable {
            blocks: builder.blocks,
        };
        table.analyze(MODULE_SCOPE, &AHashSet::new(), &AHashSet::new())?;
        Ok(table)
    }

    pub fn block(&self, id: ScopeId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    /// Resolve the names of a block and, recursively, its children. Returns the names free in
    /// the block or in any block nested in it.
    fn analyze(
        &mut self,
        id: ScopeId,
        bound: &AHashSet<String>,
        global: &AHashSet<String>,
    ) -> Result<AHashSet<String>, CompileError> {
        let Some(block) = self.blocks.get(&id) else {
            return Ok(AHashSet::new());
        };
        let kind = block.kind;
        let children = block.children.clone();
        let symbols: Vec<(String, u32)> =
            block.symbols.iter().map(|(n, f)| (n.clone(), *f)).collect();

        let mut scopes = AHashMap::new();
        let mut local = AHashSet::new();
        let mut free = AHashSet::new();
        let mut global = global.clone();
        for (name, flags) in &symbols {
            let scope = if flags & DEF_GLOBAL != 0 {
                global.insert(name.clone());
                NameScope::GlobalExplicit
            } else if flags & DEF_NONLOCAL != 0 {
                if !bound.contains(name) {
                    return Err(CompileError::scope(
                        0,
                        format!("no binding for nonlocal '{name}' found"),
                    ));
                }
                free.insert(name.clone());
                NameScope::Free
            } else if flags & DEF_BOUND != 0 {
                local.insert(name.clone());
                global.remove(name);
                NameScope::Local
            } else if bound.contains(name) {
                free.insert(name.clone());
                NameScope::Free
            } else {
                NameScope::GlobalImplicit
            };
            scopes.insert(name.clone(), scope);
        }

        // Class bodies bind nothing their methods can see.
        let child_bound = match kind {
            BlockKind::Function => bound.union(&local).cloned().collect(),
            _ => bound.clone(),
        };
        let mut child_free = AHashSet::new();
        for child in children {
            child_free.extend(self.analyze(child, &child_bound, &global)?);
        }
        if kind == BlockKind::Function {
            for name in &local {
                if child_free.remove(name) {
                    scopes.insert(name.clone(), NameScope::Cell);
                }
            }
        }

        let Some(block) = self.blocks.get_mut(&id) else {
            return Ok(free);
        };
        for name in child_free {
            match block.symbols.get_mut(&name) {
                Some(flags) => {
                    if kind == BlockKind::Class && *flags & (DEF_BOUND | DEF_GLOBAL) != 0 {
                        *flags |= DEF_FREE_CLASS;
                    }
                }
                // Passes through this block on its way to a nested one.
                None if bound.contains(&name) => {
                    scopes.insert(name.clone(), NameScope::Free);
                }
                None => {}
            }
            free.insert(name);
        }
        trace!(block = %block.name, ?scopes, "resolved names");
        block.scopes = scopes;
        Ok(free)
    }
}

struct Builder {
    blocks: AHashMap<ScopeId, Block>,
    stack: Vec<ScopeId>,
    line: usize,
}

impl Builder {
    fn current(&mut self) -> Option<&mut Block> {
        let id = *self.stack.last()?;
        self.blocks.get_mut(&id)
    }

    fn enter(&mut self, id: ScopeId, kind: BlockKind, name: &str) {
        let (nested, private) = match self.stack.last().and_then(|p| self.blocks.get(p)) {
            Some(parent) => (
                parent.nested || parent.kind == BlockKind::Function,
                parent.private.clone(),
            ),
            None => (false, None),
        };
        let private = if kind == BlockKind::Class {
            Some(name.to_string())
        } else {
            private
        };
        if let Some(parent) = self.current() {
            parent.children.push(id);
        }
        self.blocks.insert(id, Block::new(kind, name, nested, private));
        self.stack.push(id);
    }

    fn exit(&mut self) {
        self.stack.pop();
    }

    fn add_def(&mut self, name: &str, flag: u32) -> Result<(), CompileError> {
        let line = self.line;
        let Some(block) = self.current() else {
            return Ok(());
        };
        let name = mangle(block.private.as_deref(), name);
        let flags = block.symbols.entry(name.clone()).or_insert(0);
        if flag & (DEF_GLOBAL | DEF_NONLOCAL) != 0 && *flags & (DEF_PARAM) != 0 {
            return Err(CompileError::scope(
                line,
                format!("name '{name}' is parameter and global or nonlocal"),
            ));
        }
        if flag == DEF_NONLOCAL && block.kind == BlockKind::Module {
            return Err(CompileError::scope(
                line,
                "nonlocal declaration not allowed at module level",
            ));
        }
        *flags |= flag;
        Ok(())
    }

    fn params(&mut self, args: &Arguments) -> Result<(), CompileError> {
        for name in args.names() {
            self.add_def(name, DEF_PARAM)?;
        }
        Ok(())
    }

    fn stmts(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        body.iter().try_for_each(|s| self.stmt(s))
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.line = stmt.line;
        match &stmt.node {
            StmtNode::Expr(e) => self.expr(e),
            StmtNode::Assign { targets, value } => {
                self.expr(value)?;
                targets.iter().try_for_each(|t| self.store(t))
            }
            StmtNode::AugAssign { target, value, .. } => {
                self.store(target)?;
                self.expr(value)
            }
            StmtNode::AnnAssign {
                target,
                annotation,
                value,
                ..
            } => {
                self.store(target)?;
                self.expr(annotation)?;
                value.iter().try_for_each(|v| self.expr(v))
            }
            StmtNode::Pass | StmtNode::Break | StmtNode::Continue => Ok(()),
            StmtNode::Return(value) => value.iter().try_for_each(|v| self.expr(v)),
            StmtNode::If { test, body, orelse } | StmtNode::While { test, body, orelse } => {
                self.expr(test)?;
                self.stmts(body)?;
                self.stmts(orelse)
            }
            StmtNode::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.store(target)?;
                self.expr(iter)?;
                self.stmts(body)?;
                self.stmts(orelse)
            }
            StmtNode::FunctionDef {
                name,
                args,
                body,
                decorators,
                scope,
            } => {
                self.add_def(name, DEF_LOCAL)?;
                self.signature(args)?;
                decorators.iter().try_for_each(|d| self.expr(d))?;
                self.enter(*scope, BlockKind::Function, name);
                self.params(args)?;
                self.stmts(body)?;
                self.exit();
                Ok(())
            }
            StmtNode::ClassDef {
                name,
                bases,
                body,
                decorators,
                scope,
            } => {
                self.add_def(name, DEF_LOCAL)?;
                bases.iter().try_for_each(|b| self.expr(b))?;
                decorators.iter().try_for_each(|d| self.expr(d))?;
                self.enter(*scope, BlockKind::Class, name);
                self.stmts(body)?;
                self.exit();
                Ok(())
            }
            StmtNode::Import(names) => names.iter().try_for_each(|alias| {
                let stored = match &alias.asname {
                    Some(asname) => asname.as_str(),
                    None => alias.name.split('.').next().unwrap_or(&alias.name),
                };
                self.add_def(stored, DEF_IMPORT)
            }),
            StmtNode::ImportFrom { names, .. } => names
                .iter()
                .filter(|alias| alias.name != "*")
                .try_for_each(|alias| {
                    self.add_def(alias.asname.as_deref().unwrap_or(&alias.name), DEF_IMPORT)
                }),
            StmtNode::Global(names) => names.iter().try_for_each(|n| self.add_def(n, DEF_GLOBAL)),
            StmtNode::Nonlocal(names) => {
                names.iter().try_for_each(|n| self.add_def(n, DEF_NONLOCAL))
            }
        }
    }

    /// Defaults and annotations, which the enclosing scope evaluates.
    fn signature(&mut self, args: &Arguments) -> Result<(), CompileError> {
        args.defaults.iter().try_for_each(|d| self.expr(d))?;
        args.kw_defaults.iter().flatten().try_for_each(|d| self.expr(d))?;
        args.annotations.iter().try_for_each(|(_, a)| self.expr(a))
    }

    fn store(&mut self, target: &Expr) -> Result<(), CompileError> {
        match target {
            Expr::Name(n) => self.add_def(n, DEF_LOCAL),
            Expr::Tuple(elts) | Expr::List(elts) => elts.iter().try_for_each(|e| self.store(e)),
            Expr::Starred(inner) => self.store(inner),
            other => self.expr(other),
        }
    }

    fn expr(&mut self, e: &Expr) -> Result<(), CompileError> {
        match e {
            Expr::Name(n) => {
                let in_method = self
                    .current()
                    .is_some_and(|b| b.kind == BlockKind::Function && b.private.is_some());
                if in_method && (n == "super" || n == "__class__") {
                    return Err(CompileError::unsupported(
                        self.line,
                        "implicit __class__ cell",
                    ));
                }
                self.add_def(n, USE)
            }
            Expr::Constant(_) => Ok(()),
            Expr::Attribute(value, _) => self.expr(value),
            Expr::Subscript(value, index) => {
                self.expr(value)?;
                self.expr(index)
            }
            Expr::Slice(lower, upper, step) => [lower, upper, step]
                .into_iter()
                .flatten()
                .try_for_each(|e| self.expr(e)),
            Expr::BinOp(_, l, r) => {
                self.expr(l)?;
                self.expr(r)
            }
            Expr::UnaryOp(_, operand) | Expr::Starred(operand) => self.expr(operand),
            Expr::BoolOp(_, values)
            | Expr::Tuple(values)
            | Expr::List(values)
            | Expr::Set(values)
            | Expr::JoinedStr(values) => values.iter().try_for_each(|v| self.expr(v)),
            Expr::Compare(left, rest) => {
                self.expr(left)?;
                rest.iter().try_for_each(|(_, e)| self.expr(e))
            }
            Expr::IfExp { test, body, orelse } => {
                self.expr(test)?;
                self.expr(body)?;
                self.expr(orelse)
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                self.expr(func)?;
                args.iter().try_for_each(|a| self.expr(a))?;
                keywords.iter().try_for_each(|k| self.expr(&k.value))
            }
            Expr::Dict(entries) => entries.iter().try_for_each(|(k, v)| {
                k.iter().try_for_each(|k| self.expr(k))?;
                self.expr(v)
            }),
            Expr::Lambda { args, body, scope } => {
                self.signature(args)?;
                self.enter(*scope, BlockKind::Function, "lambda");
                self.params(args)?;
                self.expr(body)?;
                self.exit();
                Ok(())
            }
            Expr::ListComp {
                elt,
                target,
                iter,
                ifs,
                scope,
            } => {
                // The outermost iterable is evaluated where the comprehension appears.
                self.expr(iter)?;
                self.enter(*scope, BlockKind::Function, "listcomp");
                self.add_def(".0", DEF_PARAM)?;
                self.store(target)?;
                ifs.iter().try_for_each(|i| self.expr(i))?;
                self.expr(elt)?;
                self.exit();
                Ok(())
            }
            Expr::FormattedValue { value, spec, .. } => {
                self.expr(value)?;
                spec.iter().try_for_each(|s| self.expr(s))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use unindent::unindent;
    use unpyc_bytecode::Version;

    use super::*;
    use crate::parser::parse_module;

    fn table(source: &str) -> SymbolTable {
        SymbolTable::build(&parse_module(&unindent(source), Version::V3_7).unwrap()).unwrap()
    }

    #[test]
    fn test_module_names_are_implicit_globals_or_locals() {
        let t = table("x = y");
        let m = t.block(MODULE_SCOPE).unwrap();
        assert_eq!(m.scope_of("x"), Some(NameScope::Local));
        assert_eq!(m.scope_of("y"), Some(NameScope::GlobalImplicit));
        assert_eq!(m.scope_of("z"), None);
    }

    #[test]
    fn test_closure_cells_and_free_names() {
        let t = table(
            "
            def outer(a):
                b = 1
                def inner():
                    return a + b + c
                return inner
            ",
        );
        let outer = t.block(2).unwrap();
        let inner = t.block(1).unwrap();
        assert_eq!(outer.cellvars(), vec!["a", "b"]);
        assert!(outer.freevars().is_empty());
        assert_eq!(inner.freevars(), vec!["a", "b"]);
        assert_eq!(inner.scope_of("c"), Some(NameScope::GlobalImplicit));
        assert!(inner.nested);
        assert!(!outer.nested);
    }

    #[test]
    fn test_free_names_pass_through_intermediate_functions() {
        let t = table(
            "
            def a():
                x = 1
                def b():
                    def c():
                        return x
                    return c
                return b
            ",
        );
        assert_eq!(t.block(3).unwrap().cellvars(), vec!["x"]);
        assert_eq!(t.block(2).unwrap().freevars(), vec!["x"]);
        assert_eq!(t.block(1).unwrap().freevars(), vec!["x"]);
    }

    #[test]
    fn test_class_bindings_are_invisible_to_methods() {
        let t = table(
            "
            class C:
                x = 1
                def m(self):
                    return x
            ",
        );
        assert_eq!(
            t.block(1).unwrap().scope_of("x"),
            Some(NameScope::GlobalImplicit)
        );
        assert_eq!(t.block(2).unwrap().kind, BlockKind::Class);
    }

    #[test]
    fn test_class_free_names_through_a_function() {
        let t = table(
            "
            def f():
                x = 1
                class C:
                    y = x
                    def m(self):
                        return x
                return C
            ",
        );
        let class = t.block(2).unwrap();
        assert_eq!(class.scope_of("x"), Some(NameScope::Free));
        assert_eq!(class.freevars(), vec!["x"]);
        assert_eq!(t.block(3).unwrap().cellvars(), vec!["x"]);
    }

    #[test]
    fn test_global_and_nonlocal() {
        let t = table(
            "
            def f():
                v = 0
                def g():
                    global x
                    nonlocal v
                    x = v = 1
                return g
            ",
        );
        let g = t.block(1).unwrap();
        assert_eq!(g.scope_of("x"), Some(NameScope::GlobalExplicit));
        assert_eq!(g.scope_of("v"), Some(NameScope::Free));
        assert_eq!(t.block(2).unwrap().cellvars(), vec!["v"]);
    }

    #[test]
    fn test_nonlocal_without_binding_fails() {
        let module = parse_module("def f():\n    nonlocal q\n", Version::V3_7).unwrap();
        assert!(matches!(
            SymbolTable::build(&module),
            Err(CompileError::Scope { .. })
        ));
    }

    #[test]
    fn test_listcomp_parameter() {
        let t = table("r = [a for a in b if a]");
        let comp = t.block(1).unwrap();
        assert_eq!(comp.scope_of(".0"), Some(NameScope::Local));
        assert_eq!(comp.scope_of("a"), Some(NameScope::Local));
        assert_eq!(comp.scope_of("b"), None);
        assert_eq!(
            t.block(MODULE_SCOPE).unwrap().scope_of("b"),
            Some(NameScope::GlobalImplicit)
        );
    }

    #[test]
    fn test_mangling() {
        assert_eq!(mangle(Some("Ham"), "__spam"), "_Ham__spam");
        assert_eq!(mangle(Some("_Ham"), "__spam"), "_Ham__spam");
        assert_eq!(mangle(Some("Ham"), "__init__"), "__init__");
        assert_eq!(mangle(Some("__"), "__spam"), "__spam");
        assert_eq!(mangle(None, "__spam"), "__spam");
    }
}
