use std::path::Path;

use crate::policy::condition;
use crate::policy::errors::PolicyError;
use crate::policy::pattern::PathPattern;
use crate::policy::ruleset::{parse_kdl_document, RuleSetDef};
use crate::policy::{ClauseTable, CompiledRuleSet, PolicyState};

/// Load all `.kdl` rule files from the given directory and compile them
/// into a single immutable `PolicyState`.
pub fn load_policies(dir: &Path) -> Result<PolicyState, PolicyError> {
    if !dir.is_dir() {
        return Err(PolicyError::InvalidRule(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut defs = Vec::new();
    let mut file_count = 0;

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| PolicyError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        defs.extend(parse_kdl_document(&contents)?);
        file_count += 1;
    }

    let state = compile_rulesets(defs)?;

    tracing::info!(
        files = file_count,
        rulesets = state.ruleset_count(),
        clauses = state.clause_count(),
        "Loaded access policies"
    );

    Ok(state)
}

/// Compile parsed rule-set definitions: parse every pattern and condition,
/// reject duplicate clauses, and reject ambiguous pattern pairs. All
/// configuration defects surface here, never per request.
pub fn compile_rulesets(defs: Vec<RuleSetDef>) -> Result<PolicyState, PolicyError> {
    let mut rulesets = Vec::new();

    for def in defs {
        let pattern = PathPattern::parse(&def.pattern)?;
        let mut clauses = ClauseTable::default();
        for (op, raw_expr) in &def.clauses {
            let expr = condition::parse_condition(raw_expr).map_err(|e| {
                PolicyError::InvalidCondition(format!(
                    "in ruleset `{}`, clause `{}`: {e}",
                    def.pattern,
                    op.as_str()
                ))
            })?;
            let slot = clauses.slot(*op);
            if slot.is_some() {
                return Err(PolicyError::DuplicateClause {
                    pattern: def.pattern.clone(),
                    operation: op.as_str().to_string(),
                });
            }
            *slot = Some(expr);
        }
        rulesets.push(CompiledRuleSet { pattern, clauses });
    }

    check_ambiguity(&rulesets)?;

    Ok(PolicyState::new(rulesets))
}

/// Two patterns that can match the same path must differ in specificity so
/// the most-specific-wins rule always produces a unique winner.
fn check_ambiguity(rulesets: &[CompiledRuleSet]) -> Result<(), PolicyError> {
    for (i, a) in rulesets.iter().enumerate() {
        for b in &rulesets[i + 1..] {
            if a.pattern.overlaps(&b.pattern)
                && a.pattern.specificity_key() == b.pattern.specificity_key()
            {
                return Err(PolicyError::AmbiguousRule(
                    a.pattern.raw().to_string(),
                    b.pattern.raw().to_string(),
                ));
            }
        }
    }
    Ok(())
}
