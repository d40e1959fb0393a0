use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::policy::condition::{self, EvalContext, EvalFailure};
use crate::policy::errors::PolicyError;
use crate::policy::pattern::DocumentPath;
use crate::policy::store::DocumentStore;
use crate::policy::types::{AccessRequest, Decision, Reason};
use crate::policy::PolicyState;

/// The policy evaluator: an immutable rule table plus the injected lookup
/// collaborator. Evaluation holds no mutable state, so one evaluator serves
/// any number of concurrent requests.
pub struct Evaluator {
    state: PolicyState,
    store: Arc<dyn DocumentStore>,
    lookup_timeout: Duration,
}

impl Evaluator {
    pub fn new(
        state: PolicyState,
        store: Arc<dyn DocumentStore>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            state,
            store,
            lookup_timeout,
        }
    }

    pub fn state(&self) -> &PolicyState {
        &self.state
    }

    /// Decide whether the request is allowed.
    ///
    /// Only a malformed path raises; every policy miss and every lookup
    /// failure resolves to a deny with its reason reported.
    pub async fn evaluate(&self, req: &AccessRequest) -> Result<Decision, PolicyError> {
        let path = DocumentPath::parse(&req.path)?;

        let Some((ruleset, bindings)) = self.state.match_path(&path) else {
            return Ok(Decision::denied(Reason::NoMatchingRule));
        };

        let Some(clause) = ruleset.clause_for(req.operation) else {
            return Ok(Decision::denied(Reason::NoClauseForOperation));
        };

        let ctx = EvalContext {
            data: build_context(req, &bindings),
            store: &*self.store,
            lookup_timeout: self.lookup_timeout,
        };

        match condition::evaluate(clause, &ctx).await {
            Ok(true) => Ok(Decision::allowed()),
            Ok(false) => Ok(Decision::denied(Reason::PredicateFalse)),
            Err(EvalFailure::Timeout) => {
                tracing::warn!(path = %path, "document lookup timed out during evaluation");
                Ok(Decision::denied(Reason::LookupTimeout))
            }
            Err(EvalFailure::Store(e)) => {
                tracing::warn!(path = %path, error = %e, "document lookup failed during evaluation");
                Ok(Decision::denied(Reason::LookupError))
            }
        }
    }
}

/// Assemble the JSON the predicate paths resolve against: the actor, the
/// wildcard bindings, and the two snapshots. Absent snapshots become null so
/// field access on them resolves to null rather than erroring.
fn build_context(req: &AccessRequest, bindings: &HashMap<String, String>) -> Value {
    json!({
        "actor": req.actor,
        "path": bindings,
        "resource": req.resource,
        "request": { "resource": req.proposed },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::errors::StoreError;
    use crate::policy::loader::compile_rulesets;
    use crate::policy::ruleset::{ClauseOp, RuleSetDef};
    use crate::policy::store::MemoryStore;
    use crate::policy::types::{Operation, Snapshot};
    use async_trait::async_trait;
    use serde_json::json;

    fn def(pattern: &str, clauses: &[(ClauseOp, &str)]) -> RuleSetDef {
        RuleSetDef {
            pattern: pattern.into(),
            clauses: clauses
                .iter()
                .map(|(op, expr)| (*op, expr.to_string()))
                .collect(),
        }
    }

    fn make_evaluator(defs: Vec<RuleSetDef>, store: MemoryStore) -> Evaluator {
        Evaluator::new(
            compile_rulesets(defs).unwrap(),
            Arc::new(store),
            Duration::from_millis(100),
        )
    }

    fn request(actor: Option<&str>, op: Operation, path: &str) -> AccessRequest {
        AccessRequest {
            actor: actor.map(|s| s.to_string()),
            operation: op,
            path: path.to_string(),
            resource: None,
            proposed: None,
        }
    }

    fn snapshot(value: serde_json::Value) -> Snapshot {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_invalid_path_raises() {
        let eval = make_evaluator(
            vec![def("users/{userId}", &[(ClauseOp::Op(Operation::Read), "true")])],
            MemoryStore::new(),
        );
        let err = eval
            .evaluate(&request(Some("alice"), Operation::Read, "users//abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_no_matching_rule_denies() {
        let eval = make_evaluator(
            vec![def("users/{userId}", &[(ClauseOp::Op(Operation::Read), "true")])],
            MemoryStore::new(),
        );
        let d = eval
            .evaluate(&request(Some("alice"), Operation::Read, "unknown/abc"))
            .await
            .unwrap();
        assert_eq!(d, Decision::denied(Reason::NoMatchingRule));
    }

    #[tokio::test]
    async fn test_no_clause_for_operation_denies() {
        let eval = make_evaluator(
            vec![def(
                "shop_items/{itemId}",
                &[(ClauseOp::Op(Operation::Read), "actor != null")],
            )],
            MemoryStore::new(),
        );
        let d = eval
            .evaluate(&request(Some("alice"), Operation::Delete, "shop_items/sword"))
            .await
            .unwrap();
        assert_eq!(d, Decision::denied(Reason::NoClauseForOperation));
    }

    #[tokio::test]
    async fn test_write_clause_covers_mutating_operations_only() {
        let eval = make_evaluator(
            vec![def(
                "rate_limits/{userId}",
                &[(ClauseOp::Write, "actor != null && actor == path.userId")],
            )],
            MemoryStore::new(),
        );

        for op in [Operation::Create, Operation::Update, Operation::Delete] {
            let d = eval
                .evaluate(&request(Some("alice"), op, "rate_limits/alice"))
                .await
                .unwrap();
            assert!(d.allow, "write clause should cover {op}");
        }

        // A read does not fall back to the write clause
        let d = eval
            .evaluate(&request(Some("alice"), Operation::Read, "rate_limits/alice"))
            .await
            .unwrap();
        assert_eq!(d, Decision::denied(Reason::NoClauseForOperation));
    }

    #[tokio::test]
    async fn test_specific_clause_wins_over_write() {
        let eval = make_evaluator(
            vec![def(
                "connection_invites/{id}",
                &[
                    (ClauseOp::Op(Operation::Delete), "false"),
                    (ClauseOp::Write, "true"),
                ],
            )],
            MemoryStore::new(),
        );
        let d = eval
            .evaluate(&request(Some("alice"), Operation::Delete, "connection_invites/i1"))
            .await
            .unwrap();
        assert_eq!(d, Decision::denied(Reason::PredicateFalse));
        let d = eval
            .evaluate(&request(Some("alice"), Operation::Update, "connection_invites/i1"))
            .await
            .unwrap();
        assert!(d.allow);
    }

    #[tokio::test]
    async fn test_nested_rule_selected_over_top_level() {
        let eval = make_evaluator(
            vec![
                def("users/{userId}", &[(ClauseOp::Op(Operation::Read), "false")]),
                def(
                    "users/{userId}/connections/{connectionId}",
                    &[(
                        ClauseOp::Op(Operation::Read),
                        "actor != null && actor == path.userId",
                    )],
                ),
            ],
            MemoryStore::new(),
        );
        let d = eval
            .evaluate(&request(Some("abc"), Operation::Read, "users/abc/connections/xyz"))
            .await
            .unwrap();
        assert!(d.allow, "nested rule should match and bind userId=abc");
    }

    #[tokio::test]
    async fn test_predicate_sees_snapshots() {
        let eval = make_evaluator(
            vec![def(
                "connections/{id}",
                &[(
                    ClauseOp::Op(Operation::Read),
                    "actor != null && (resource.user1 == actor || resource.user2 == actor)",
                )],
            )],
            MemoryStore::new(),
        );

        let mut req = request(Some("bob"), Operation::Read, "connections/c1");
        req.resource = Some(snapshot(json!({ "user1": "alice", "user2": "bob" })));
        assert!(eval.evaluate(&req).await.unwrap().allow);

        let mut req = request(Some("carol"), Operation::Read, "connections/c1");
        req.resource = Some(snapshot(json!({ "user1": "alice", "user2": "bob" })));
        assert_eq!(
            eval.evaluate(&req).await.unwrap(),
            Decision::denied(Reason::PredicateFalse)
        );
    }

    struct FailingStore;

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn get(&self, _path: &str) -> Result<Option<Snapshot>, StoreError> {
            Err(StoreError::Unavailable("store offline".into()))
        }
    }

    #[tokio::test]
    async fn test_lookup_error_denies_with_reason() {
        let eval = Evaluator::new(
            compile_rulesets(vec![def(
                "age_restricted_interactions/{id}",
                &[(ClauseOp::Op(Operation::Read), "actor != null && isMinor(actor)")],
            )])
            .unwrap(),
            Arc::new(FailingStore),
            Duration::from_millis(100),
        );
        let d = eval
            .evaluate(&request(Some("alice"), Operation::Read, "age_restricted_interactions/x"))
            .await
            .unwrap();
        assert_eq!(d, Decision::denied(Reason::LookupError));
    }

    struct StalledStore;

    #[async_trait]
    impl DocumentStore for StalledStore {
        async fn get(&self, _path: &str) -> Result<Option<Snapshot>, StoreError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_timeout_denies_with_reason() {
        let eval = Evaluator::new(
            compile_rulesets(vec![def(
                "age_restricted_interactions/{id}",
                &[(ClauseOp::Op(Operation::Read), "actor != null && isMinor(actor)")],
            )])
            .unwrap(),
            Arc::new(StalledStore),
            Duration::from_millis(50),
        );
        let d = eval
            .evaluate(&request(Some("alice"), Operation::Read, "age_restricted_interactions/x"))
            .await
            .unwrap();
        assert_eq!(d, Decision::denied(Reason::LookupTimeout));
    }

    #[tokio::test]
    async fn test_evaluation_is_idempotent() {
        let mut store = MemoryStore::new();
        store.insert(
            "users/kid",
            snapshot(json!({ "isMinor": true, "onboardingCompleted": true })),
        );
        let eval = make_evaluator(
            vec![def(
                "age_restricted_interactions/{id}",
                &[(
                    ClauseOp::Op(Operation::Read),
                    "actor != null && isMinor(actor) && hasCompletedOnboarding(actor)",
                )],
            )],
            store,
        );
        let req = request(Some("kid"), Operation::Read, "age_restricted_interactions/x");
        let first = eval.evaluate(&req).await.unwrap();
        let second = eval.evaluate(&req).await.unwrap();
        assert_eq!(first, second);
        assert!(first.allow);
    }
}
