//! Saga orchestration for multi-service transactions.
//!
//! This crate runs declaratively defined sagas: ordered steps calling remote
//! services over HTTP, with compensating actions applied in reverse order
//! when a critical step fails. Every step outcome is appended to the durable
//! saga log, which stays the single source of truth for saga status.
//!
//! The affiliate registration saga follows these steps:
//! 1. Create base content
//! 2. Create the affiliate record
//! 3. Create the collaboration linking the two
//! 4. Register monitoring metrics (best effort)

pub mod affiliate_registration;
pub mod definition;
pub mod error;
pub mod gateway;
pub mod health;
pub mod orchestrator;
pub mod registry;

pub use definition::{SagaContext, SagaDefinition, StepDefinition, StepRequest};
pub use error::SagaError;
pub use gateway::{
    GatewayError, HttpMethod, HttpServiceGateway, InMemoryServiceGateway, ServiceGateway,
    ServiceGatewayExt,
};
pub use health::{ServiceHealth, check_services};
pub use orchestrator::{SagaOrchestrator, SagaOutcome};
pub use registry::{SagaRegistry, ServiceEndpoints};
