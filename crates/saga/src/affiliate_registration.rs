//! The affiliate registration saga.
//!
//! Provisions a new affiliate across four services: base content, the
//! affiliate record itself, the collaboration linking the two, and metric
//! registration with monitoring. Metric registration is best-effort.

use serde_json::json;

use crate::definition::{SagaDefinition, StepDefinition, StepRequest, extract_ids};
use crate::registry::ServiceEndpoints;

pub const SAGA_TYPE: &str = "CompleteAffiliateRegistration";

pub const STEP_CREATE_CONTENT: &str = "create_base_content";
pub const STEP_CREATE_AFFILIATE: &str = "create_affiliate";
pub const STEP_CREATE_COLLABORATION: &str = "create_collaboration";
pub const STEP_REGISTER_METRICS: &str = "register_metrics";

pub const COMPENSATE_CREATE_CONTENT: &str = "compensate_create_content";
pub const COMPENSATE_CREATE_AFFILIATE: &str = "compensate_create_affiliate";

const DEFAULT_COMMISSION_RATE: f64 = 0.1;

/// Builds the registration saga against the given service endpoints.
pub fn definition(endpoints: &ServiceEndpoints) -> SagaDefinition {
    let content_url = endpoints.content_url.clone();
    let content_url_undo = endpoints.content_url.clone();
    let affiliate_url = endpoints.affiliate_url.clone();
    let affiliate_url_undo = endpoints.affiliate_url.clone();
    let collaboration_url = endpoints.collaboration_url.clone();
    let monitoring_url = endpoints.monitoring_url.clone();

    SagaDefinition::new(
        SAGA_TYPE,
        &["affiliate_name", "affiliate_email"],
        vec![
            StepDefinition::new(STEP_CREATE_CONTENT, move |ctx| {
                let name = ctx.get_str("affiliate_name")?;
                Some(StepRequest::post(
                    format!("{content_url}/contents"),
                    json!({
                        "name": format!("Base content - {name}"),
                        "kind": "AFFILIATE_PROFILE",
                        "description": format!("Landing content for affiliate {name}"),
                    }),
                ))
            })
            .extract(extract_ids(&[("content_id", &["id", "content_id"])]))
            .compensate(COMPENSATE_CREATE_CONTENT, move |ctx| {
                let content_id = ctx.get_str("content_id")?;
                Some(StepRequest::delete(format!(
                    "{content_url_undo}/contents/{content_id}"
                )))
            }),
            StepDefinition::new(STEP_CREATE_AFFILIATE, move |ctx| {
                let name = ctx.get_str("affiliate_name")?;
                let email = ctx.get_str("affiliate_email")?;
                let commission_rate = ctx
                    .get("commission_rate")
                    .cloned()
                    .unwrap_or_else(|| json!(DEFAULT_COMMISSION_RATE));
                Some(StepRequest::post(
                    format!("{affiliate_url}/affiliates"),
                    json!({
                        "name": name,
                        "email": email,
                        "commission_rate": commission_rate,
                    }),
                ))
            })
            .extract(extract_ids(&[("affiliate_id", &["id", "affiliate_id"])]))
            .compensate(COMPENSATE_CREATE_AFFILIATE, move |ctx| {
                let affiliate_id = ctx.get_str("affiliate_id")?;
                Some(StepRequest::post(
                    format!("{affiliate_url_undo}/affiliates/{affiliate_id}/deactivate"),
                    json!({"reason": "registration rolled back"}),
                ))
            }),
            // Linking record only; deleting the affiliate and content is
            // enough to undo it, so there is no compensation here.
            StepDefinition::new(STEP_CREATE_COLLABORATION, move |ctx| {
                let affiliate_id = ctx.get_str("affiliate_id")?;
                let content_id = ctx.get_str("content_id")?;
                Some(StepRequest::post(
                    format!("{collaboration_url}/collaborations"),
                    json!({
                        "affiliate_id": affiliate_id,
                        "content_id": content_id,
                        "kind": "AFFILIATE_ONBOARDING",
                    }),
                ))
            })
            .extract(extract_ids(&[(
                "collaboration_id",
                &["id", "collaboration_id"],
            )])),
            StepDefinition::new(STEP_REGISTER_METRICS, move |ctx| {
                let affiliate_id = ctx.get_str("affiliate_id")?;
                Some(StepRequest::post(
                    format!("{monitoring_url}/metrics/register"),
                    json!({
                        "affiliate_id": affiliate_id,
                        "collaboration_id": ctx.get("collaboration_id"),
                        "source": "affiliate_registration",
                    }),
                ))
            })
            .non_critical(),
        ],
    )
}
