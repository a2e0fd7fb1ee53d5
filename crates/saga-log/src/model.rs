use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{CorrelationId, SagaId};
use serde::{Deserialize, Serialize};

/// Name of the terminal entry appended once every step of a saga has run.
/// Status derivation treats its presence as overall success.
pub const SAGA_COMPLETED_FINAL: &str = "saga_completed_final";

/// Name of the marker entry appended when a saga begins unwinding.
pub const SAGA_COMPENSATION_STARTED: &str = "saga_compensation_started";

/// Prefix shared by every compensation entry in a saga log.
pub const COMPENSATE_PREFIX: &str = "compensate_";

/// Overall status of a saga, always derived from its step log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    Started,
    StepCompleted,
    Compensating,
    Completed,
    Failed,
}

impl SagaStatus {
    /// Returns true if the saga can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }

    /// Returns the status as a string slice.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "STARTED",
            SagaStatus::StepCompleted => "STEP_COMPLETED",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
        }
    }

    /// Parses the wire representation back into a status.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STARTED" => Some(SagaStatus::Started),
            "STEP_COMPLETED" => Some(SagaStatus::StepCompleted),
            "COMPENSATING" => Some(SagaStatus::Compensating),
            "COMPLETED" => Some(SagaStatus::Completed),
            "FAILED" => Some(SagaStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single logged step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Completed,
    Failed,
    Compensating,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Compensating => "COMPENSATING",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable entry in a saga's log.
///
/// Steps are only ever appended; a saga's history is its log. Forward steps
/// that own a compensating action carry the data that action will need in
/// `compensation_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    pub name: String,
    pub status: StepStatus,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub error_message: Option<String>,
    pub compensation_data: Option<serde_json::Value>,
}

impl SagaStep {
    /// A step that finished successfully, with the response it produced.
    pub fn completed(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Completed,
            payload,
            timestamp: Utc::now(),
            error_message: None,
            compensation_data: None,
        }
    }

    /// A step that failed, with the error that stopped it.
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Failed,
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
            error_message: Some(error.into()),
            compensation_data: None,
        }
    }

    /// The marker entry recorded when a saga starts unwinding.
    pub fn compensation_started(payload: serde_json::Value) -> Self {
        Self {
            name: SAGA_COMPENSATION_STARTED.to_string(),
            status: StepStatus::Compensating,
            payload,
            timestamp: Utc::now(),
            error_message: None,
            compensation_data: None,
        }
    }

    /// Attaches the data a later compensation of this step will need.
    pub fn with_compensation_data(mut self, data: serde_json::Value) -> Self {
        self.compensation_data = Some(data);
        self
    }

    /// True for entries recording a compensation outcome.
    pub fn is_compensation_entry(&self) -> bool {
        self.name.starts_with(COMPENSATE_PREFIX)
    }
}

/// Derives a saga's status by folding its step log.
///
/// The log is the single source of truth; the stored status column is only a
/// cache of this function's result, recomputed inside the same transaction as
/// every append.
///
/// Rules, in order:
/// 1. a completed `saga_completed_final` entry means the saga succeeded;
/// 2. once unwinding has started (any `COMPENSATING` entry), the saga is
///    `FAILED` when every owed compensation has a logged outcome, otherwise
///    still `COMPENSATING`;
/// 3. a failed step with no unwind marker yet also reads as `COMPENSATING`;
/// 4. otherwise the saga is `STARTED` (no steps) or `STEP_COMPLETED`.
pub fn derive_status(steps: &[SagaStep]) -> SagaStatus {
    if steps
        .iter()
        .any(|s| s.name == SAGA_COMPLETED_FINAL && s.status == StepStatus::Completed)
    {
        return SagaStatus::Completed;
    }

    if steps.iter().any(|s| s.status == StepStatus::Compensating) {
        let owed = steps
            .iter()
            .filter(|s| !s.is_compensation_entry() && s.compensation_data.is_some())
            .count();
        let done = steps.iter().filter(|s| s.is_compensation_entry()).count();
        return if done >= owed {
            SagaStatus::Failed
        } else {
            SagaStatus::Compensating
        };
    }

    if steps
        .iter()
        .any(|s| s.status == StepStatus::Failed && !s.is_compensation_entry())
    {
        return SagaStatus::Compensating;
    }

    if steps.is_empty() {
        SagaStatus::Started
    } else {
        SagaStatus::StepCompleted
    }
}

/// Durable record of one saga: identity, log, and derived status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaTransaction {
    pub id: SagaId,
    pub saga_type: String,
    pub status: SagaStatus,
    pub steps: Vec<SagaStep>,
    pub correlation_id: CorrelationId,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaTransaction {
    /// Creates a fresh saga record with an empty log.
    pub fn new(
        id: SagaId,
        saga_type: impl Into<String>,
        correlation_id: CorrelationId,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            saga_type: saga_type.into(),
            status: SagaStatus::Started,
            steps: Vec::new(),
            correlation_id,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Looks up a step by name.
    pub fn step(&self, name: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// True if the log already contains a step with this name.
    pub fn has_step(&self, name: &str) -> bool {
        self.step(name).is_some()
    }

    /// Forward steps that completed, in execution order.
    pub fn completed_steps(&self) -> Vec<&SagaStep> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed && !s.is_compensation_entry())
            .collect()
    }
}

/// Filters for listing sagas. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SagaFilter {
    pub saga_type: Option<String>,
    pub status: Option<SagaStatus>,
    pub limit: Option<usize>,
}

impl SagaFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saga_type(mut self, saga_type: impl Into<String>) -> Self {
        self.saga_type = Some(saga_type.into());
        self
    }

    pub fn status(mut self, status: SagaStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Aggregate counts over the whole saga log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStatistics {
    pub total: i64,
    pub by_status: HashMap<String, i64>,
    pub by_type: HashMap<String, i64>,
}
