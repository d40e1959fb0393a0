use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PolicyError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(gatehouse::policy::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(gatehouse::policy::kdl_parse),
        help("Check your KDL file syntax — see https://kdl.dev for the specification")
    )]
    KdlParse(String),

    #[error("Invalid rule: {0}")]
    #[diagnostic(
        code(gatehouse::policy::invalid_rule),
        help("Each ruleset node takes a path pattern and `allow \"<operation>\" \"<condition>\"` children")
    )]
    InvalidRule(String),

    #[error("Invalid path pattern: {0}")]
    #[diagnostic(
        code(gatehouse::policy::invalid_pattern),
        help("Patterns are slash-separated segments; a wildcard segment is written {{name}} (e.g. users/{{userId}})")
    )]
    InvalidPattern(String),

    #[error("Invalid condition expression: {0}")]
    #[diagnostic(
        code(gatehouse::policy::invalid_condition),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !. Paths use dot notation (e.g. resource.senderId); built-ins: hasAny, isMinor, hasCompletedOnboarding, isProfileUnlocked")
    )]
    InvalidCondition(String),

    #[error("Duplicate `{operation}` clause in ruleset `{pattern}`")]
    #[diagnostic(
        code(gatehouse::policy::duplicate_clause),
        help("A ruleset may carry at most one clause per operation (read, create, update, delete, write)")
    )]
    DuplicateClause { pattern: String, operation: String },

    #[error("Ambiguous rulesets: `{0}` and `{1}` match the same paths with equal specificity")]
    #[diagnostic(
        code(gatehouse::policy::ambiguous_rule),
        help("Overlapping patterns must differ in wildcard count or literal prefix so one match always wins")
    )]
    AmbiguousRule(String, String),

    #[error("Invalid document path `{0}`")]
    #[diagnostic(
        code(gatehouse::policy::invalid_path),
        help("Document paths are non-empty slash-separated segments with no braces (e.g. users/abc)")
    )]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(gatehouse::policy::io))]
    Io(#[from] std::io::Error),
}

/// Failure raised by the injected document store. The evaluator maps these to
/// deny decisions, never to allows and never past its own boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("Document store unavailable: {0}")]
    #[diagnostic(code(gatehouse::store::unavailable))]
    Unavailable(String),

    #[error("Malformed document at `{path}`: {message}")]
    #[diagnostic(code(gatehouse::store::malformed))]
    Malformed { path: String, message: String },
}

impl IntoResponse for PolicyError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            PolicyError::InvalidPath(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
