//! Saga orchestrator.
//!
//! Runs a saga's steps in order against remote services, appending every
//! outcome to the durable log. When a critical step fails, the completed
//! steps are compensated in reverse order, best effort. The log is the only
//! state the orchestrator keeps; status is always derived from it.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value, json};

use common::{CorrelationId, SagaId};
use saga_log::{
    SAGA_COMPENSATION_STARTED, SAGA_COMPLETED_FINAL, SagaLogStore, SagaStatus, SagaStep,
    SagaTransaction, StepStatus,
};

use crate::definition::{CompensationDefinition, SagaContext, SagaDefinition};
use crate::error::{Result, SagaError};
use crate::gateway::ServiceGateway;
use crate::registry::SagaRegistry;

/// How an execution run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    Completed,
    /// Completed, but one or more non-critical steps failed along the way.
    CompletedWithWarnings { degraded_steps: Vec<&'static str> },
    /// A critical step failed and the saga was compensated.
    Failed { failed_step: &'static str },
}

/// Coordinates saga execution across remote services.
///
/// Holds the saga log store, the service gateway, and the immutable registry
/// of saga definitions. One orchestrator serves every saga type.
pub struct SagaOrchestrator<S, G>
where
    S: SagaLogStore,
    G: ServiceGateway,
{
    log: S,
    gateway: G,
    registry: Arc<SagaRegistry>,
}

impl<S, G> SagaOrchestrator<S, G>
where
    S: SagaLogStore,
    G: ServiceGateway,
{
    pub fn new(log: S, gateway: G, registry: Arc<SagaRegistry>) -> Self {
        Self {
            log,
            gateway,
            registry,
        }
    }

    pub fn registry(&self) -> &SagaRegistry {
        &self.registry
    }

    /// Validates the input and creates the saga's log record.
    ///
    /// Steps do not run here; callers follow up with [`execute`](Self::execute),
    /// usually on a spawned task so the start request can return immediately.
    #[tracing::instrument(skip(self, input))]
    pub async fn start(&self, saga_type: &str, input: &Value) -> Result<SagaTransaction> {
        let definition = self
            .registry
            .get(saga_type)
            .ok_or_else(|| SagaError::UnknownSagaType(saga_type.to_string()))?;
        definition.validate_input(input)?;

        let saga_id = SagaId::new();
        let correlation_id = CorrelationId::new();
        let mut metadata = Map::new();
        metadata.insert("input".to_string(), input.clone());

        let saga = self
            .log
            .start(saga_id, definition.saga_type, correlation_id, metadata)
            .await?;

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(%saga_id, saga_type, "saga started");
        Ok(saga)
    }

    /// Runs every step of a freshly started saga.
    ///
    /// On a critical failure the failed step is logged, completed steps are
    /// compensated in reverse order, and the outcome is `Failed`. Non-critical
    /// failures are logged and skipped. A saga whose log already has entries
    /// is refused, so one saga never executes twice.
    #[tracing::instrument(skip(self), fields(saga_id = %saga_id))]
    pub async fn execute(&self, saga_id: SagaId) -> Result<SagaOutcome> {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();

        let saga = self.require(saga_id).await?;
        let definition = self.definition_for(&saga)?;
        if !saga.steps.is_empty() {
            return Err(SagaError::InvalidState {
                saga_id,
                status: saga.status,
            });
        }

        let input = saga
            .metadata
            .get("input")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let mut context = SagaContext::from_input(&input);
        let mut degraded: Vec<&'static str> = Vec::new();

        for step in &definition.steps {
            tracing::info!(step = step.name, "executing saga step");

            let failure = match step.build_request(&context) {
                Some(request) => {
                    match self
                        .gateway
                        .call(request.method, &request.url, request.body.as_ref())
                        .await
                    {
                        Ok(response) => {
                            let outputs = step.extract_output(&response);
                            let mut entry = SagaStep::completed(step.name, response);
                            if step.compensation.is_some() {
                                entry =
                                    entry.with_compensation_data(Value::Object(outputs.clone()));
                            }
                            self.log.append_step(saga_id, entry).await?;
                            context.merge(&outputs);
                            None
                        }
                        Err(e) => Some(e.to_string()),
                    }
                }
                None => Some(format!("missing context values for step {}", step.name)),
            };

            let Some(error) = failure else { continue };
            self.log
                .append_step(saga_id, SagaStep::failed(step.name, error.clone()))
                .await?;

            if step.critical {
                tracing::warn!(step = step.name, error = %error, "critical saga step failed, compensating");
                metrics::counter!("saga_failed_total").increment(1);
                self.unwind(saga_id, definition, step.name, &error).await?;
                metrics::histogram!("saga_duration_seconds")
                    .record(saga_start.elapsed().as_secs_f64());
                return Ok(SagaOutcome::Failed {
                    failed_step: step.name,
                });
            }

            tracing::warn!(step = step.name, error = %error, "non-critical saga step failed, continuing");
            degraded.push(step.name);
        }

        self.log
            .append_step(
                saga_id,
                SagaStep::completed(SAGA_COMPLETED_FINAL, Value::Object(context.values().clone())),
            )
            .await?;

        metrics::counter!("saga_completed_total").increment(1);
        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        tracing::info!("saga completed");

        if degraded.is_empty() {
            Ok(SagaOutcome::Completed)
        } else {
            Ok(SagaOutcome::CompletedWithWarnings {
                degraded_steps: degraded,
            })
        }
    }

    /// Manually unwinds a saga that is stuck or was partially executed.
    ///
    /// Completed sagas are refused. Compensations that already have a logged
    /// outcome are never repeated, so calling this twice is harmless. Returns
    /// the names of the compensations that ran.
    #[tracing::instrument(skip(self), fields(saga_id = %saga_id))]
    pub async fn force_compensate(&self, saga_id: SagaId) -> Result<Vec<String>> {
        let saga = self.require(saga_id).await?;
        if saga.status == SagaStatus::Completed {
            return Err(SagaError::InvalidState {
                saga_id,
                status: saga.status,
            });
        }
        let definition = self.definition_for(&saga)?;

        let (pending, context) = Self::pending_compensations(&saga, definition);
        if pending.is_empty() {
            tracing::info!("nothing left to compensate");
            return Ok(Vec::new());
        }

        if !saga.has_step(SAGA_COMPENSATION_STARTED) {
            self.log
                .append_step(
                    saga_id,
                    SagaStep::compensation_started(json!({"reason": "manual compensation"})),
                )
                .await?;
        }

        metrics::counter!("saga_forced_compensations_total").increment(1);
        let mut applied = Vec::with_capacity(pending.len());
        for compensation in pending {
            self.run_compensation(saga_id, compensation, &context)
                .await?;
            applied.push(compensation.name.to_string());
        }
        Ok(applied)
    }

    /// Compensates everything completed so far, newest step first.
    #[tracing::instrument(skip(self, definition, error))]
    async fn unwind(
        &self,
        saga_id: SagaId,
        definition: &SagaDefinition,
        failed_step: &str,
        error: &str,
    ) -> Result<()> {
        let saga = self.require(saga_id).await?;
        if !saga.has_step(SAGA_COMPENSATION_STARTED) {
            self.log
                .append_step(
                    saga_id,
                    SagaStep::compensation_started(json!({
                        "failed_step": failed_step,
                        "error": error,
                    })),
                )
                .await?;
        }

        let (pending, context) = Self::pending_compensations(&saga, definition);
        for compensation in pending {
            self.run_compensation(saga_id, compensation, &context)
                .await?;
        }
        Ok(())
    }

    /// One compensation call. Its outcome is appended to the log whether the
    /// call works or not; a failed compensation never stops the unwind.
    async fn run_compensation(
        &self,
        saga_id: SagaId,
        compensation: &CompensationDefinition,
        context: &SagaContext,
    ) -> Result<()> {
        metrics::counter!("saga_compensations_total").increment(1);

        let entry = match compensation.build_request(context) {
            Some(request) => {
                match self
                    .gateway
                    .call(request.method, &request.url, request.body.as_ref())
                    .await
                {
                    Ok(response) => {
                        tracing::info!(compensation = compensation.name, "compensation applied");
                        SagaStep::completed(compensation.name, response)
                    }
                    Err(e) => {
                        tracing::warn!(compensation = compensation.name, error = %e, "compensation failed");
                        SagaStep::failed(compensation.name, e.to_string())
                    }
                }
            }
            None => {
                tracing::warn!(
                    compensation = compensation.name,
                    "compensation skipped, identifiers never recorded"
                );
                SagaStep::failed(compensation.name, "missing identifiers for compensation")
            }
        };

        self.log.append_step(saga_id, entry).await?;
        Ok(())
    }

    /// Compensations owed but not yet logged, newest first, plus the context
    /// rebuilt from the saga's input and the recorded compensation data.
    fn pending_compensations<'a>(
        saga: &SagaTransaction,
        definition: &'a SagaDefinition,
    ) -> (Vec<&'a CompensationDefinition>, SagaContext) {
        let input = saga
            .metadata
            .get("input")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let mut context = SagaContext::from_input(&input);

        let mut pending = Vec::new();
        for step in &definition.steps {
            let Some(compensation) = &step.compensation else {
                continue;
            };
            let Some(logged) = saga.step(step.name) else {
                continue;
            };
            if logged.status != StepStatus::Completed {
                continue;
            }
            if let Some(Value::Object(data)) = &logged.compensation_data {
                context.merge(data);
            }
            if !saga.has_step(compensation.name) {
                pending.push(compensation);
            }
        }
        pending.reverse();
        (pending, context)
    }

    async fn require(&self, saga_id: SagaId) -> Result<SagaTransaction> {
        self.log
            .get(saga_id)
            .await?
            .ok_or(SagaError::NotFound(saga_id))
    }

    fn definition_for(&self, saga: &SagaTransaction) -> Result<&SagaDefinition> {
        self.registry
            .get(&saga.saga_type)
            .ok_or_else(|| SagaError::UnknownSagaType(saga.saga_type.clone()))
    }
}
