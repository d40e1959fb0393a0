use kdl::KdlDocument;

use crate::policy::errors::PolicyError;
use crate::policy::types::Operation;

/// Operation selector on an `allow` clause: a specific operation, or the
/// combined `write` standing for all mutating operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseOp {
    Op(Operation),
    Write,
}

impl ClauseOp {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "read" => Some(ClauseOp::Op(Operation::Read)),
            "create" => Some(ClauseOp::Op(Operation::Create)),
            "update" => Some(ClauseOp::Op(Operation::Update)),
            "delete" => Some(ClauseOp::Op(Operation::Delete)),
            "write" => Some(ClauseOp::Write),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClauseOp::Op(op) => op.as_str(),
            ClauseOp::Write => "write",
        }
    }
}

/// One `ruleset` node as written in a policy file: a raw path pattern and
/// raw clause expressions, not yet compiled.
#[derive(Debug, Clone)]
pub struct RuleSetDef {
    pub pattern: String,
    pub clauses: Vec<(ClauseOp, String)>,
}

/// Parse a KDL document string into rule-set definitions.
///
/// ```kdl
/// ruleset "reports/{reportId}" {
///     allow "read" r#"actor != null && resource.reporterId == actor"#
///     allow "create" r#"actor != null && request.resource.reporterId == actor"#
/// }
/// ```
pub fn parse_kdl_document(source: &str) -> Result<Vec<RuleSetDef>, PolicyError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| PolicyError::KdlParse(e.to_string()))?;

    let mut rulesets = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "ruleset" => {
                let pattern = first_string_arg(node).ok_or_else(|| {
                    PolicyError::InvalidRule(
                        "ruleset node requires a path pattern argument (e.g. ruleset \"users/{userId}\")"
                            .into(),
                    )
                })?;

                let mut clauses = Vec::new();
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "allow" => {
                                let args = string_args(child);
                                let [op_name, expr] = args.as_slice() else {
                                    return Err(PolicyError::InvalidRule(format!(
                                        "allow clause in ruleset `{pattern}` requires an operation and a condition (e.g. allow \"read\" \"actor != null\")"
                                    )));
                                };
                                let op = ClauseOp::parse(op_name).ok_or_else(|| {
                                    PolicyError::InvalidRule(format!(
                                        "unknown operation `{op_name}` in ruleset `{pattern}` (expected read, create, update, delete, or write)"
                                    ))
                                })?;
                                clauses.push((op, expr.clone()));
                            }
                            other => {
                                return Err(PolicyError::InvalidRule(format!(
                                    "unexpected child `{other}` in ruleset `{pattern}` (expected `allow`)"
                                )));
                            }
                        }
                    }
                }

                rulesets.push(RuleSetDef { pattern, clauses });
            }
            other => {
                // Ignore comments and unknown top-level nodes with a warning
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(rulesets)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract all positional string arguments from a KDL node, in order.
fn string_args(node: &kdl::KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ruleset() {
        let kdl = r##"
ruleset "reports/{reportId}" {
    allow "read" "actor != null && resource.reporterId == actor"
    allow "create" "actor != null && request.resource.reporterId == actor"
}
"##;
        let rulesets = parse_kdl_document(kdl).unwrap();
        assert_eq!(rulesets.len(), 1);
        let rs = &rulesets[0];
        assert_eq!(rs.pattern, "reports/{reportId}");
        assert_eq!(rs.clauses.len(), 2);
        assert_eq!(rs.clauses[0].0, ClauseOp::Op(Operation::Read));
        assert_eq!(
            rs.clauses[0].1,
            "actor != null && resource.reporterId == actor"
        );
        assert_eq!(rs.clauses[1].0, ClauseOp::Op(Operation::Create));
    }

    #[test]
    fn test_parse_combined_write_clause() {
        let kdl = r##"
ruleset "rate_limits/{userId}" {
    allow "read" "actor != null && actor == path.userId"
    allow "write" "actor != null && actor == path.userId"
}
"##;
        let rulesets = parse_kdl_document(kdl).unwrap();
        assert_eq!(rulesets[0].clauses[1].0, ClauseOp::Write);
    }

    #[test]
    fn test_parse_raw_string_condition() {
        let kdl = r####"
ruleset "users/{userId}" {
    allow "read" r#"hasAny(resource, "codinome", "anonAvatar")"#
}
"####;
        let rulesets = parse_kdl_document(kdl).unwrap();
        assert_eq!(
            rulesets[0].clauses[0].1,
            r#"hasAny(resource, "codinome", "anonAvatar")"#
        );
    }

    #[test]
    fn test_parse_missing_pattern() {
        let err = parse_kdl_document("ruleset").unwrap_err();
        assert!(matches!(err, PolicyError::InvalidRule(_)));
    }

    #[test]
    fn test_parse_missing_condition() {
        let kdl = r##"
ruleset "reports/{reportId}" {
    allow "read"
}
"##;
        let err = parse_kdl_document(kdl).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidRule(_)));
    }

    #[test]
    fn test_parse_unknown_operation() {
        let kdl = r##"
ruleset "reports/{reportId}" {
    allow "list" "actor != null"
}
"##;
        let err = parse_kdl_document(kdl).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidRule(_)));
    }

    #[test]
    fn test_parse_unexpected_child() {
        let kdl = r##"
ruleset "reports/{reportId}" {
    deny "read" "true"
}
"##;
        let err = parse_kdl_document(kdl).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidRule(_)));
    }

    #[test]
    fn test_parse_bad_kdl() {
        let err = parse_kdl_document("ruleset \"x{").unwrap_err();
        assert!(matches!(err, PolicyError::KdlParse(_)));
    }
}
