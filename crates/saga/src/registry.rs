//! Saga type registry.

use std::collections::HashMap;

use crate::affiliate_registration;
use crate::definition::SagaDefinition;

/// Base URLs of the remote services saga steps call.
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    pub content_url: String,
    pub affiliate_url: String,
    pub collaboration_url: String,
    pub monitoring_url: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            content_url: "http://localhost:8002".to_string(),
            affiliate_url: "http://localhost:8001".to_string(),
            collaboration_url: "http://localhost:8003".to_string(),
            monitoring_url: "http://localhost:8004".to_string(),
        }
    }
}

/// Immutable table of saga definitions, built once at startup.
pub struct SagaRegistry {
    definitions: HashMap<&'static str, SagaDefinition>,
}

impl SagaRegistry {
    /// Registry with every saga type this service orchestrates.
    pub fn standard(endpoints: &ServiceEndpoints) -> Self {
        Self::from_definitions(vec![affiliate_registration::definition(endpoints)])
    }

    /// Registry over an explicit set of definitions.
    pub fn from_definitions(definitions: Vec<SagaDefinition>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|d| (d.saga_type, d))
                .collect(),
        }
    }

    pub fn get(&self, saga_type: &str) -> Option<&SagaDefinition> {
        self.definitions.get(saga_type)
    }

    pub fn saga_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.definitions.keys().copied().collect();
        types.sort_unstable();
        types
    }
}
