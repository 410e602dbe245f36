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

//! Version dialects: the base grammar folded with one delta per release along the version
//! chain, together with the opcode table and the scanner features of that release.

mod base;
mod py35;
mod py36;
mod py37;

use std::collections::BTreeSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use strum::Display;
use tracing::debug;
use unpyc_bytecode::opcode::patch_for;
use unpyc_bytecode::{OpcodeTable, Version};

use crate::error::DecompileError;
use crate::grammar::{Grammar, parse_doc};

/// Scanner and synthesizer behaviour that changes between releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Feature {
    /// Call operands are pushed as positional, keyword pairs, `*args`, `**kwargs`.
    KeywordsBeforeStar,
    /// `MAKE_FUNCTION` finds keyword-only default pairs below the positional defaults.
    KeywordDefaultsFirst,
    /// Dict displays are `BUILD_MAP n` followed by one `STORE_MAP` per entry.
    StoreMapDicts,
    /// An `if` without `else` still ends its body with a jump over the missing branch.
    JumpPastMissingElse,
    /// `CALL_FUNCTION_KW` takes its keyword names as one constant tuple.
    KeywordNameTuple,
    /// `MAKE_FUNCTION` takes a flag byte instead of operand counts.
    FunctionFlags,
    DropSetupAnnotations,
    /// Annotations are stored with `STORE_SUBSCR` into `__annotations__`.
    AnnotationsMapping,
}

/// What one release changes relative to its parent.
#[derive(Debug)]
pub struct DialectDelta {
    pub version: Version,
    /// Rules added, or moved to the top priority when already present.
    pub rules: &'static str,
    pub removed: &'static str,
    /// Nonterminals whose spans are checked for jump containment.
    pub checked: &'static [&'static str],
    pub features_added: &'static [Feature],
    pub features_removed: &'static [Feature],
}

static DELTAS: [&DialectDelta; 4] = [&base::DELTA, &py35::DELTA, &py36::DELTA, &py37::DELTA];

pub fn delta_for(version: Version) -> Option<&'static DialectDelta> {
    DELTAS.iter().find(|d| d.version == version).copied()
}

/// A fully resolved release: immutable once built and shared between sessions.
#[derive(Debug)]
pub struct Dialect {
    pub version: Version,
    /// Versions folded into this dialect, root first.
    pub lineage: Vec<Version>,
    pub grammar: Grammar,
    pub opcodes: OpcodeTable,
    pub features: BTreeSet<Feature>,
}

impl Dialect {
    /// Fold every delta from the chain root up to `version`.
    pub fn resolve(version: Version) -> Result<Self, DecompileError> {
        let lineage = version
            .lineage()
            .map_err(|_| DecompileError::UnsupportedVersion(version))?;
        let mut grammar = Grammar::new();
        let mut features = BTreeSet::new();
        let mut opcodes = OpcodeTable::default();
        for v in &lineage {
            let delta = delta_for(*v).ok_or(DecompileError::UnsupportedVersion(*v))?;
            apply_delta(&mut grammar, &mut features, delta)?;
            if let Some(patch) = patch_for(*v) {
                opcodes.apply(patch);
            }
        }
        debug!(%version, rules = grammar.len(), ?features, "resolved dialect");
        Ok(Dialect {
            version,
            lineage,
            grammar,
            opcodes,
            features,
        })
    }

    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

fn apply_delta(
    grammar: &mut Grammar,
    features: &mut BTreeSet<Feature>,
    delta: &DialectDelta,
) -> Result<(), DecompileError> {
    for rule in parse_doc(delta.removed)? {
        grammar.remove_rule(&rule);
    }
    for rule in parse_doc(delta.rules)? {
        grammar.override_rule(rule);
    }
    for symbol in delta.checked {
        grammar.set_checked(symbol);
    }
    for f in delta.features_removed {
        features.remove(f);
    }
    features.extend(delta.features_added.iter().copied());
    Ok(())
}

lazy_static! {
    static ref DIALECTS: Vec<(Version, Result<Arc<Dialect>, DecompileError>)> = Version::SUPPORTED
        .iter()
        .map(|v| (*v, Dialect::resolve(*v).map(Arc::new)))
        .collect();
}

/// The shared dialect for `version`.
pub fn dialect_for(version: Version) -> Result<Arc<Dialect>, DecompileError> {
    DIALECTS
        .iter()
        .find(|(v, _)| *v == version)
        .map(|(_, d)| d.clone())
        .unwrap_or(Err(DecompileError::UnsupportedVersion(version)))
}
