pub mod condition;
pub mod engine;
pub mod errors;
pub mod loader;
pub mod pattern;
pub mod ruleset;
pub mod store;
pub mod types;

use std::collections::HashMap;

use self::condition::Expr;
use self::pattern::{DocumentPath, PathPattern};
use self::types::Operation;

/// Fully compiled policy state, loaded from KDL rule files.
/// Immutable after construction — configuration changes require a service reload.
#[derive(Debug)]
pub struct PolicyState {
    rulesets: Vec<CompiledRuleSet>,
}

/// One rule-set bound to a path pattern, with its per-operation clauses
/// parsed into predicate trees at load time.
#[derive(Debug)]
pub struct CompiledRuleSet {
    pub pattern: PathPattern,
    pub(crate) clauses: ClauseTable,
}

#[derive(Debug, Default)]
pub(crate) struct ClauseTable {
    pub(crate) read: Option<Expr>,
    pub(crate) create: Option<Expr>,
    pub(crate) update: Option<Expr>,
    pub(crate) delete: Option<Expr>,
    pub(crate) write: Option<Expr>,
}

impl ClauseTable {
    pub(crate) fn slot(&mut self, op: ruleset::ClauseOp) -> &mut Option<Expr> {
        match op {
            ruleset::ClauseOp::Op(Operation::Read) => &mut self.read,
            ruleset::ClauseOp::Op(Operation::Create) => &mut self.create,
            ruleset::ClauseOp::Op(Operation::Update) => &mut self.update,
            ruleset::ClauseOp::Op(Operation::Delete) => &mut self.delete,
            ruleset::ClauseOp::Write => &mut self.write,
        }
    }

    pub(crate) fn len(&self) -> usize {
        [&self.read, &self.create, &self.update, &self.delete, &self.write]
            .into_iter()
            .filter(|c| c.is_some())
            .count()
    }
}

impl CompiledRuleSet {
    /// Select the clause governing an operation: the operation-specific
    /// clause, else the combined `write` clause for mutating operations.
    pub fn clause_for(&self, op: Operation) -> Option<&Expr> {
        let specific = match op {
            Operation::Read => self.clauses.read.as_ref(),
            Operation::Create => self.clauses.create.as_ref(),
            Operation::Update => self.clauses.update.as_ref(),
            Operation::Delete => self.clauses.delete.as_ref(),
        };
        specific.or_else(|| {
            if op.is_mutating() {
                self.clauses.write.as_ref()
            } else {
                None
            }
        })
    }
}

impl PolicyState {
    pub(crate) fn new(rulesets: Vec<CompiledRuleSet>) -> Self {
        Self { rulesets }
    }

    /// Find the most specific rule-set matching the path, with its wildcard
    /// bindings. Ambiguous configurations are rejected at load time, so at
    /// most one best match exists here.
    pub fn match_path(
        &self,
        path: &DocumentPath,
    ) -> Option<(&CompiledRuleSet, HashMap<String, String>)> {
        self.rulesets
            .iter()
            .filter_map(|rs| rs.pattern.match_path(path).map(|bindings| (rs, bindings)))
            .min_by_key(|(rs, _)| rs.pattern.specificity_key())
    }

    pub fn ruleset_count(&self) -> usize {
        self.rulesets.len()
    }

    pub fn clause_count(&self) -> usize {
        self.rulesets.iter().map(|rs| rs.clauses.len()).sum()
    }
}
