//! Integration tests for the affiliate registration saga.

use std::sync::Arc;

use common::SagaId;
use saga::affiliate_registration::{
    COMPENSATE_CREATE_AFFILIATE, COMPENSATE_CREATE_CONTENT, SAGA_TYPE, STEP_CREATE_AFFILIATE,
    STEP_CREATE_COLLABORATION, STEP_CREATE_CONTENT, STEP_REGISTER_METRICS,
};
use saga::{
    GatewayError, InMemoryServiceGateway, SagaOrchestrator, SagaOutcome, SagaRegistry,
    ServiceEndpoints,
};
use saga_log::{
    InMemorySagaLogStore, SAGA_COMPENSATION_STARTED, SAGA_COMPLETED_FINAL, SagaLogStore,
    SagaStatus, SagaTransaction, StepStatus,
};
use serde_json::json;

type TestOrchestrator = SagaOrchestrator<InMemorySagaLogStore, InMemoryServiceGateway>;

struct TestHarness {
    orchestrator: TestOrchestrator,
    log: InMemorySagaLogStore,
    gateway: InMemoryServiceGateway,
}

impl TestHarness {
    fn new() -> Self {
        let log = InMemorySagaLogStore::new();
        let gateway = InMemoryServiceGateway::new();
        gateway.respond_with("/contents", json!({"id": "content-1"}));
        gateway.respond_with("/affiliates", json!({"id": "affiliate-1"}));
        gateway.respond_with("/collaborations", json!({"id": "collaboration-1"}));
        gateway.respond_with("/metrics/register", json!({"registered": true}));

        let registry = Arc::new(SagaRegistry::standard(&ServiceEndpoints::default()));
        let orchestrator = SagaOrchestrator::new(log.clone(), gateway.clone(), registry);

        Self {
            orchestrator,
            log,
            gateway,
        }
    }

    async fn run_registration(&self) -> (SagaId, SagaOutcome) {
        let saga = self
            .orchestrator
            .start(
                SAGA_TYPE,
                &json!({
                    "affiliate_name": "Luca",
                    "affiliate_email": "luca@example.com",
                }),
            )
            .await
            .unwrap();
        let outcome = self.orchestrator.execute(saga.id).await.unwrap();
        (saga.id, outcome)
    }

    async fn saga(&self, saga_id: SagaId) -> SagaTransaction {
        self.log.get(saga_id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_happy_path_completes_all_steps() {
    let h = TestHarness::new();

    let (saga_id, outcome) = h.run_registration().await;
    assert_eq!(outcome, SagaOutcome::Completed);

    // Verify the saga log: every step plus the terminal entry
    let saga = h.saga(saga_id).await;
    assert_eq!(saga.status, SagaStatus::Completed);
    assert_eq!(saga.saga_type, SAGA_TYPE);
    let names: Vec<_> = saga.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            STEP_CREATE_CONTENT,
            STEP_CREATE_AFFILIATE,
            STEP_CREATE_COLLABORATION,
            STEP_REGISTER_METRICS,
            SAGA_COMPLETED_FINAL,
        ]
    );
    assert!(saga.steps.iter().all(|s| s.status == StepStatus::Completed));

    // Verify context was accumulated into the final snapshot
    let final_entry = saga.step(SAGA_COMPLETED_FINAL).unwrap();
    assert_eq!(final_entry.payload["content_id"], json!("content-1"));
    assert_eq!(final_entry.payload["affiliate_id"], json!("affiliate-1"));
    assert_eq!(
        final_entry.payload["collaboration_id"],
        json!("collaboration-1")
    );

    // No compensation calls were made
    assert_eq!(h.gateway.calls_to("deactivate"), 0);
    assert_eq!(h.gateway.calls().len(), 4);
}

#[tokio::test]
async fn test_collaboration_failure_compensates_earlier_steps_in_reverse() {
    let h = TestHarness::new();
    h.gateway.fail_with(
        "/collaborations",
        GatewayError::HttpStatus {
            status: 500,
            url: "http://localhost:8003/collaborations".to_string(),
            body: "internal error".to_string(),
        },
    );

    let (saga_id, outcome) = h.run_registration().await;
    assert_eq!(
        outcome,
        SagaOutcome::Failed {
            failed_step: STEP_CREATE_COLLABORATION
        }
    );

    let saga = h.saga(saga_id).await;
    assert_eq!(saga.status, SagaStatus::Failed);

    // Forward steps stay in execution order, last one failed
    let forward: Vec<_> = saga
        .steps
        .iter()
        .filter(|s| !s.is_compensation_entry() && s.name != SAGA_COMPENSATION_STARTED)
        .map(|s| (s.name.as_str(), s.status))
        .collect();
    assert_eq!(
        forward,
        vec![
            (STEP_CREATE_CONTENT, StepStatus::Completed),
            (STEP_CREATE_AFFILIATE, StepStatus::Completed),
            (STEP_CREATE_COLLABORATION, StepStatus::Failed),
        ]
    );

    // Compensation entries follow in strictly reverse step order
    let compensations: Vec<_> = saga
        .steps
        .iter()
        .filter(|s| s.is_compensation_entry())
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(
        compensations,
        vec![COMPENSATE_CREATE_AFFILIATE, COMPENSATE_CREATE_CONTENT]
    );

    // The metric registration step never ran
    assert_eq!(h.gateway.calls_to("/metrics/register"), 0);
}

#[tokio::test]
async fn test_first_step_failure_needs_no_compensation() {
    let h = TestHarness::new();
    h.gateway.fail_with(
        "/contents",
        GatewayError::Timeout {
            url: "http://localhost:8002/contents".to_string(),
        },
    );

    let (saga_id, outcome) = h.run_registration().await;
    assert_eq!(
        outcome,
        SagaOutcome::Failed {
            failed_step: STEP_CREATE_CONTENT
        }
    );

    let saga = h.saga(saga_id).await;
    assert_eq!(saga.status, SagaStatus::Failed);
    assert!(saga.steps.iter().all(|s| !s.is_compensation_entry()));
    assert_eq!(h.gateway.calls().len(), 1);
}

#[tokio::test]
async fn test_metric_failure_does_not_fail_the_saga() {
    let h = TestHarness::new();
    h.gateway.fail_with(
        "/metrics/register",
        GatewayError::HttpStatus {
            status: 503,
            url: "http://localhost:8004/metrics/register".to_string(),
            body: "unavailable".to_string(),
        },
    );

    let (saga_id, outcome) = h.run_registration().await;
    assert_eq!(
        outcome,
        SagaOutcome::CompletedWithWarnings {
            degraded_steps: vec![STEP_REGISTER_METRICS]
        }
    );

    let saga = h.saga(saga_id).await;
    assert_eq!(saga.status, SagaStatus::Completed);
    assert_eq!(
        saga.step(STEP_REGISTER_METRICS).unwrap().status,
        StepStatus::Failed
    );
    assert!(saga.has_step(SAGA_COMPLETED_FINAL));
    assert_eq!(h.gateway.calls_to("deactivate"), 0);
}

#[tokio::test]
async fn test_compensation_failure_is_recorded_but_unwind_continues() {
    let h = TestHarness::new();
    h.gateway.fail_with(
        "/collaborations",
        GatewayError::Transport {
            url: "http://localhost:8003/collaborations".to_string(),
            cause: "connection reset by peer".to_string(),
        },
    );
    h.gateway.fail_with(
        "deactivate",
        GatewayError::Timeout {
            url: "http://localhost:8001/affiliates/affiliate-1/deactivate".to_string(),
        },
    );

    let (saga_id, _) = h.run_registration().await;

    let saga = h.saga(saga_id).await;
    assert_eq!(saga.status, SagaStatus::Failed);
    assert_eq!(
        saga.step(COMPENSATE_CREATE_AFFILIATE).unwrap().status,
        StepStatus::Failed
    );
    assert_eq!(
        saga.step(COMPENSATE_CREATE_CONTENT).unwrap().status,
        StepStatus::Completed
    );
    // The content delete still went out after the affiliate undo failed
    assert_eq!(h.gateway.calls_to("/contents/content-1"), 1);
}

#[tokio::test]
async fn test_multiple_independent_sagas() {
    let h = TestHarness::new();

    let (saga_id_1, outcome_1) = h.run_registration().await;

    // Second registration fails at the affiliate service
    h.gateway.fail_with(
        "8001/affiliates",
        GatewayError::HttpStatus {
            status: 422,
            url: "http://localhost:8001/affiliates".to_string(),
            body: "email already registered".to_string(),
        },
    );
    let (saga_id_2, outcome_2) = h.run_registration().await;

    assert_ne!(saga_id_1, saga_id_2);
    assert_eq!(outcome_1, SagaOutcome::Completed);
    assert_eq!(
        outcome_2,
        SagaOutcome::Failed {
            failed_step: STEP_CREATE_AFFILIATE
        }
    );

    let saga_1 = h.saga(saga_id_1).await;
    let saga_2 = h.saga(saga_id_2).await;
    assert_eq!(saga_1.status, SagaStatus::Completed);
    assert_eq!(saga_2.status, SagaStatus::Failed);

    // The second saga compensated only its own content
    assert_eq!(h.gateway.calls_to("/contents/content-1"), 1);
}

#[tokio::test]
async fn test_force_compensate_after_partial_execution() {
    let h = TestHarness::new();
    let saga = h
        .orchestrator
        .start(
            SAGA_TYPE,
            &json!({
                "affiliate_name": "Luca",
                "affiliate_email": "luca@example.com",
            }),
        )
        .await
        .unwrap();

    // Simulate an orchestrator crash after two steps
    use saga_log::SagaStep;
    h.log
        .append_step(
            saga.id,
            SagaStep::completed(STEP_CREATE_CONTENT, json!({"id": "content-1"}))
                .with_compensation_data(json!({"content_id": "content-1"})),
        )
        .await
        .unwrap();
    h.log
        .append_step(
            saga.id,
            SagaStep::completed(STEP_CREATE_AFFILIATE, json!({"id": "affiliate-1"}))
                .with_compensation_data(json!({"affiliate_id": "affiliate-1"})),
        )
        .await
        .unwrap();

    let applied = h.orchestrator.force_compensate(saga.id).await.unwrap();
    assert_eq!(
        applied,
        vec![COMPENSATE_CREATE_AFFILIATE, COMPENSATE_CREATE_CONTENT]
    );

    // Repeating the request finds nothing left to do
    let applied_again = h.orchestrator.force_compensate(saga.id).await.unwrap();
    assert!(applied_again.is_empty());
    assert_eq!(h.gateway.calls_to("deactivate"), 1);

    let saga = h.saga(saga.id).await;
    assert_eq!(saga.status, SagaStatus::Failed);
}

#[tokio::test]
async fn test_force_compensate_refuses_a_completed_saga() {
    let h = TestHarness::new();
    let (saga_id, _) = h.run_registration().await;

    let result = h.orchestrator.force_compensate(saga_id).await;
    assert!(matches!(
        result,
        Err(saga::SagaError::InvalidState {
            status: SagaStatus::Completed,
            ..
        })
    ));

    let saga = h.saga(saga_id).await;
    assert_eq!(saga.status, SagaStatus::Completed);
    assert_eq!(h.gateway.calls_to("deactivate"), 0);
}

#[tokio::test]
async fn test_status_is_always_derivable_from_the_log() {
    let h = TestHarness::new();
    h.gateway.fail_with(
        "/collaborations",
        GatewayError::Transport {
            url: "http://localhost:8003/collaborations".to_string(),
            cause: "connection reset".to_string(),
        },
    );

    let (saga_id, _) = h.run_registration().await;
    let saga = h.saga(saga_id).await;

    // The stored status and a fresh fold over the steps agree
    assert_eq!(saga_log::derive_status(&saga.steps), saga.status);
}
