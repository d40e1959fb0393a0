use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document's state: field name -> value.
pub type Snapshot = serde_json::Map<String, Value>;

/// The operation category a request falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Mutating operations fall back to a combined `write` clause when no
    /// operation-specific clause is configured.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Operation::Read)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One access request, as supplied by the hosting API layer.
///
/// `resource` is the existing document (absent on create); `proposed` is the
/// document state the request wants to write (absent on read and delete).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Authenticated actor id, or `None` for unauthenticated requests.
    pub actor: Option<String>,
    pub operation: Operation,
    /// Slash-separated document path, e.g. `users/abc` or
    /// `users/abc/connections/xyz`.
    pub path: String,
    #[serde(default)]
    pub resource: Option<Snapshot>,
    #[serde(default)]
    pub proposed: Option<Snapshot>,
}

/// The evaluator's verdict. `reason` always names the cause; denies are never
/// silently merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allow: bool,
    pub reason: Reason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Reason {
    Allowed,
    NoMatchingRule,
    NoClauseForOperation,
    PredicateFalse,
    LookupTimeout,
    LookupError,
}

impl Decision {
    pub fn allowed() -> Self {
        Self {
            allow: true,
            reason: Reason::Allowed,
        }
    }

    pub fn denied(reason: Reason) -> Self {
        debug_assert!(reason != Reason::Allowed);
        Self {
            allow: false,
            reason,
        }
    }
}
