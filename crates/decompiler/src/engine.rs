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

//! The decompiling pipeline: scan, synthesize, parse, build and unparse, recursing through
//! nested code objects innermost first.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};
use unpyc_bytecode::{CodeObject, Version};

use crate::ast::Stmt;
use crate::builder::{Lowered, build};
use crate::dialect::{Dialect, dialect_for};
use crate::error::{CodeLocation, DecompileError};
use crate::grammar::Grammar;
use crate::grammar::synthesize::synthesize;
use crate::options::{CompileMode, DecompileOptions};
use crate::parser::Parser;
use crate::scanner::{CodeRole, ScannedCode, Scanner};
use crate::unparse::unparse;

/// The nonterminal a code object's token stream must derive.
pub fn start_symbol(role: CodeRole, mode: CompileMode) -> &'static str {
    match (role, mode) {
        (CodeRole::Module, CompileMode::Exec) => "module",
        (CodeRole::Module, CompileMode::Single) => "single",
        (CodeRole::Function | CodeRole::Class | CodeRole::Lambda, _) => "stmts",
        (CodeRole::ListComp, _) => "listcomp_body",
    }
}

/// Decompiles code objects of one version. Holds only the shared dialect, so one instance
/// serves any number of code objects.
#[derive(Debug, Clone)]
pub struct Decompiler {
    dialect: Arc<Dialect>,
    options: DecompileOptions,
}

impl Decompiler {
    pub fn new(version: Version, options: DecompileOptions) -> Result<Self, DecompileError> {
        Ok(Self {
            dialect: dialect_for(version)?,
            options,
        })
    }

    pub fn version(&self) -> Version {
        self.dialect.version
    }

    pub fn dialect(&self) -> &Arc<Dialect> {
        &self.dialect
    }

    pub fn options(&self) -> &DecompileOptions {
        &self.options
    }

    /// Scan `code` as a top-level module and, recursively, every code object it creates.
    pub fn scan(&self, code: &CodeObject) -> Result<ScannedCode, DecompileError> {
        let code = Arc::new(code.clone());
        let location = CodeLocation::root(&code.name, code.first_line);
        Scanner::new(&self.dialect).scan(&code, CodeRole::Module, location)
    }

    /// The dialect grammar extended with the rules `scanned` needs. The shared dialect is
    /// never touched.
    pub fn session_grammar(&self, scanned: &ScannedCode) -> Grammar {
        let mut grammar = self.dialect.grammar.clone();
        let added = synthesize(&mut grammar, &scanned.customize, &self.dialect.features);
        if self.options.show_grammar {
            let synthesized: Vec<String> = grammar
                .rules()
                .skip(grammar.len() - added)
                .map(|r| r.to_string())
                .collect();
            debug!(location = %scanned.location, "synthesized rules:\n{}", synthesized.join("\n"));
        } else {
            trace!(location = %scanned.location, added, "synthesized rules");
        }
        grammar
    }

    fn lower(&self, scanned: &ScannedCode) -> Result<Lowered, DecompileError> {
        let mut nested = BTreeMap::new();
        for (index, child) in &scanned.nested {
            trace!(location = %child.location, role = %child.role, "lowering nested code");
            nested.insert(*index, self.lower(child)?);
        }

        if self.options.show_asm {
            debug!(location = %scanned.location, "tokens:\n{}", scanned.listing());
        }
        let compiled = self.session_grammar(scanned).compile();
        let parser = Parser::new(&compiled, start_symbol(scanned.role, self.options.mode))?;
        let tree = parser.parse(&scanned.tokens).map_err(|error| {
            warn!(location = %scanned.location, %error, "parse failed");
            DecompileError::Parse {
                location: scanned.location.clone(),
                error,
            }
        })?;
        if self.options.show_tree {
            debug!(location = %scanned.location, "parse tree:\n{}", tree.dump(&scanned.tokens));
        }
        build(scanned, &tree, &nested)
    }

    /// The syntax tree of a module.
    pub fn decompile_to_ast(&self, code: &CodeObject) -> Result<Vec<Stmt>, DecompileError> {
        let scanned = self.scan(code)?;
        match self.lower(&scanned)? {
            Lowered::Stmts(stmts) => Ok(stmts),
            _ => Err(DecompileError::Build {
                location: scanned.location,
                symbol: "module".to_string(),
                message: "module did not lower to statements".to_string(),
            }),
        }
    }

    /// Source text for a module. Either the whole module decompiles or nothing is returned.
    pub fn decompile(&self, code: &CodeObject) -> Result<String, DecompileError> {
        let stmts = self.decompile_to_ast(code)?;
        debug!(version = %self.version(), statements = stmts.len(), "decompiled");
        Ok(unparse(&stmts))
    }
}

/// Decompile `code` as compiled by CPython `version`.
pub fn decompile(
    code: &CodeObject,
    version: Version,
    options: DecompileOptions,
) -> Result<String, DecompileError> {
    Decompiler::new(version, options)?.decompile(code)
}
