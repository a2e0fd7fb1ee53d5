//! Declarative saga definitions.
//!
//! A saga is an ordered list of named steps. Each step knows how to build its
//! outbound request from the accumulated context, which response fields to
//! fold back into that context, and optionally how to undo itself.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::error::SagaError;
use crate::gateway::HttpMethod;

/// One outbound request built by a step or a compensation.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
}

impl StepRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            body: Some(body),
        }
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Delete,
            url: url.into(),
            body: None,
        }
    }
}

/// Key/value state threaded through a saga's steps.
///
/// Seeded from the start request's payload; each completed step merges its
/// extracted outputs in, so later steps and compensations can reference the
/// identifiers earlier steps produced.
#[derive(Debug, Clone, Default)]
pub struct SagaContext {
    values: Map<String, Value>,
}

impl SagaContext {
    /// Builds a context from the saga's input payload.
    ///
    /// Non-object payloads yield an empty context.
    pub fn from_input(input: &Value) -> Self {
        match input.as_object() {
            Some(map) => Self {
                values: map.clone(),
            },
            None => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn merge(&mut self, outputs: &Map<String, Value>) {
        for (key, value) in outputs {
            self.values.insert(key.clone(), value.clone());
        }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

type RequestBuilder = Arc<dyn Fn(&SagaContext) -> Option<StepRequest> + Send + Sync>;
type OutputExtractor = Arc<dyn Fn(&Value) -> Map<String, Value> + Send + Sync>;

/// How to undo a completed step.
///
/// The builder returns `None` when the context is missing the identifiers the
/// undo call needs; the orchestrator logs that as a failed compensation.
pub struct CompensationDefinition {
    pub name: &'static str,
    build: RequestBuilder,
}

impl CompensationDefinition {
    pub fn build_request(&self, context: &SagaContext) -> Option<StepRequest> {
        (self.build)(context)
    }
}

/// One forward step of a saga.
pub struct StepDefinition {
    pub name: &'static str,
    /// Non-critical steps log their failure and let the saga continue.
    pub critical: bool,
    build: RequestBuilder,
    extract: Option<OutputExtractor>,
    pub compensation: Option<CompensationDefinition>,
}

impl StepDefinition {
    /// Creates a critical step with no output extraction and no compensation.
    pub fn new(
        name: &'static str,
        build: impl Fn(&SagaContext) -> Option<StepRequest> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            critical: true,
            build: Arc::new(build),
            extract: None,
            compensation: None,
        }
    }

    /// Marks the step as non-critical: a failure is logged but does not
    /// trigger compensation.
    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    /// Sets the extractor that folds response fields into the context.
    pub fn extract(
        mut self,
        extract: impl Fn(&Value) -> Map<String, Value> + Send + Sync + 'static,
    ) -> Self {
        self.extract = Some(Arc::new(extract));
        self
    }

    /// Attaches a compensation to the step.
    pub fn compensate(
        mut self,
        name: &'static str,
        build: impl Fn(&SagaContext) -> Option<StepRequest> + Send + Sync + 'static,
    ) -> Self {
        self.compensation = Some(CompensationDefinition {
            name,
            build: Arc::new(build),
        });
        self
    }

    pub fn build_request(&self, context: &SagaContext) -> Option<StepRequest> {
        (self.build)(context)
    }

    pub fn extract_output(&self, response: &Value) -> Map<String, Value> {
        match &self.extract {
            Some(extract) => extract(response),
            None => Map::new(),
        }
    }
}

/// Extractor that copies response fields into the context under new names.
///
/// Each mapping is `(context_key, response_keys)`; the first response key
/// present wins. Missing keys are skipped, not errors.
pub fn extract_ids(
    mappings: &'static [(&'static str, &'static [&'static str])],
) -> impl Fn(&Value) -> Map<String, Value> + Send + Sync + 'static {
    move |response| {
        let mut outputs = Map::new();
        if let Some(object) = response.as_object() {
            for (context_key, response_keys) in mappings {
                for response_key in *response_keys {
                    if let Some(value) = object.get(*response_key) {
                        outputs.insert((*context_key).to_string(), value.clone());
                        break;
                    }
                }
            }
        }
        outputs
    }
}

/// A complete saga: its type name, input contract, and ordered steps.
pub struct SagaDefinition {
    pub saga_type: &'static str,
    pub required_fields: &'static [&'static str],
    pub steps: Vec<StepDefinition>,
}

impl SagaDefinition {
    pub fn new(
        saga_type: &'static str,
        required_fields: &'static [&'static str],
        steps: Vec<StepDefinition>,
    ) -> Self {
        Self {
            saga_type,
            required_fields,
            steps,
        }
    }

    /// Rejects payloads that are not objects or lack a required field.
    pub fn validate_input(&self, input: &Value) -> Result<(), SagaError> {
        let object = input
            .as_object()
            .ok_or_else(|| SagaError::MissingField(self.required_fields_hint()))?;
        for field in self.required_fields {
            match object.get(*field) {
                Some(Value::Null) | None => {
                    return Err(SagaError::MissingField((*field).to_string()));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn step_by_name(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    fn required_fields_hint(&self) -> String {
        self.required_fields.join(", ")
    }
}

impl std::fmt::Debug for SagaDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("saga_type", &self.saga_type)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builds a step request body by picking context values into a JSON object.
pub fn body_from_context(context: &SagaContext, keys: &[&str]) -> Value {
    let mut body = Map::new();
    for key in keys {
        if let Some(value) = context.get(key) {
            body.insert((*key).to_string(), value.clone());
        }
    }
    json!(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_definition() -> SagaDefinition {
        SagaDefinition::new(
            "TestSaga",
            &["name"],
            vec![
                StepDefinition::new("create_thing", |ctx| {
                    let name = ctx.get_str("name")?;
                    Some(StepRequest::post(
                        "http://thing/things",
                        json!({"name": name}),
                    ))
                })
                .extract(extract_ids(&[("thing_id", &["id", "thing_id"])]))
                .compensate("compensate_create_thing", |ctx| {
                    let id = ctx.get_str("thing_id")?;
                    Some(StepRequest::delete(format!("http://thing/things/{id}")))
                }),
                StepDefinition::new("notify", |_| {
                    Some(StepRequest::post("http://notify/notifications", json!({})))
                })
                .non_critical(),
            ],
        )
    }

    #[test]
    fn validate_input_accepts_complete_payloads() {
        let definition = sample_definition();
        assert!(definition.validate_input(&json!({"name": "a"})).is_ok());
    }

    #[test]
    fn validate_input_rejects_missing_and_null_fields() {
        let definition = sample_definition();
        assert!(matches!(
            definition.validate_input(&json!({})),
            Err(SagaError::MissingField(field)) if field == "name"
        ));
        assert!(matches!(
            definition.validate_input(&json!({"name": null})),
            Err(SagaError::MissingField(_))
        ));
        assert!(matches!(
            definition.validate_input(&json!([1, 2])),
            Err(SagaError::MissingField(_))
        ));
    }

    #[test]
    fn step_builds_request_from_context() {
        let definition = sample_definition();
        let context = SagaContext::from_input(&json!({"name": "acme"}));

        let request = definition.steps[0].build_request(&context).unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url, "http://thing/things");
        assert_eq!(request.body, Some(json!({"name": "acme"})));
    }

    #[test]
    fn step_build_returns_none_when_context_is_missing_inputs() {
        let definition = sample_definition();
        let context = SagaContext::default();
        assert!(definition.steps[0].build_request(&context).is_none());
    }

    #[test]
    fn extractor_takes_first_matching_response_key() {
        let extract = extract_ids(&[("thing_id", &["id", "thing_id"])]);

        let outputs = extract(&json!({"thing_id": "t-2"}));
        assert_eq!(outputs.get("thing_id"), Some(&json!("t-2")));

        let outputs = extract(&json!({"id": "t-1", "thing_id": "t-2"}));
        assert_eq!(outputs.get("thing_id"), Some(&json!("t-1")));

        let outputs = extract(&json!("not an object"));
        assert!(outputs.is_empty());
    }

    #[test]
    fn context_merge_overwrites_existing_keys() {
        let mut context = SagaContext::from_input(&json!({"name": "a", "kept": true}));
        let mut outputs = Map::new();
        outputs.insert("name".to_string(), json!("b"));
        context.merge(&outputs);

        assert_eq!(context.get_str("name"), Some("b"));
        assert_eq!(context.get("kept"), Some(&json!(true)));
    }

    #[test]
    fn compensation_request_uses_extracted_identifier() {
        let definition = sample_definition();
        let mut context = SagaContext::default();
        context.insert("thing_id", json!("t-9"));

        let compensation = definition.steps[0].compensation.as_ref().unwrap();
        let request = compensation.build_request(&context).unwrap();
        assert_eq!(request.url, "http://thing/things/t-9");
        assert_eq!(request.method, HttpMethod::Delete);
    }

    #[test]
    fn body_from_context_skips_absent_keys() {
        let context = SagaContext::from_input(&json!({"a": 1}));
        assert_eq!(body_from_context(&context, &["a", "b"]), json!({"a": 1}));
    }
}
