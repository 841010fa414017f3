//! PlanResourceChange.
//!
//! Planning runs as a linear pipeline over one `(config, prior state,
//! proposed new state)` triple and stops at the first stage that reports an
//! error:
//!
//! 1. Absent values become null values of the resource schema, and objects
//!    gain a null entry for every attribute and block they leave out.
//! 2. The planned state starts as a copy of the proposed new state, with
//!    attribute defaults written where the configuration is null.
//! 3. Computed attributes without configuration or default become unknown,
//!    unless the plan is null (destroy) or equal to the prior state.
//! 4. Attribute plan modifiers run, unless the plan is null.
//! 5. The resource ModifyPlan capability runs, also for null plans.
//! 6. A destroy plan that became non-null is rejected.
//! 7. RequiresReplace paths are sorted and deduplicated.
//!
//! Private state is threaded through every stage. When nothing changed it,
//! the prior private bytes are returned as they came in.

use tracing::{debug, instrument, trace};

use super::{check_deferred, decode_private, log_outcome, thread_private, Server};
use crate::data::{Config, Plan, State};
use crate::diag::Diagnostics;
use crate::error::FrameworkError;
use crate::logging::{KEY_ATTRIBUTE_PATH, KEY_RESOURCE_TYPE};
use crate::path::{normalize_paths, AttributePath};
use crate::plan_modifier::{schema_modify_plan, SchemaPlanRequest, SchemaPlanResponse};
use crate::private_state::PrivateState;
use crate::resource::{ModifyPlanRequest, ModifyPlanResponse, Resource, ResourceCapabilities};
use crate::schema::{Schema, SchemaNode};
use crate::types::{ClientCapabilities, Deferred};
use crate::value::Value;
use crate::walk::{fill_absent, transform, WalkOrder};

/// Input of [`Server::plan_resource_change`].
#[derive(Debug, Clone, Default)]
pub struct PlanResourceChangeRequest {
    /// The resource type.
    pub type_name: String,
    /// State before the change; absent or null on create.
    pub prior_state: Option<Value>,
    /// The orchestrator's proposal; absent or null on destroy.
    pub proposed_new_state: Option<Value>,
    /// The resource configuration.
    pub config: Option<Value>,
    /// Private state stored with the prior state.
    pub prior_private: Vec<u8>,
    /// Provider meta data from the configuration.
    pub provider_meta: Option<Value>,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`Server::plan_resource_change`].
#[derive(Debug, Clone, Default)]
pub struct PlanResourceChangeResponse {
    /// The planned state.
    pub planned_state: Value,
    /// Paths whose change requires replacement, sorted and deduplicated.
    pub requires_replace: Vec<AttributePath>,
    /// Private state to hand to ApplyResourceChange.
    pub planned_private: Vec<u8>,
    /// Diagnostics collected by every stage.
    pub diagnostics: Diagnostics,
    /// Set when planning was postponed.
    pub deferred: Option<Deferred>,
}

/// Everything a plan carries between stages.
struct Planned {
    plan: Plan,
    requires_replace: Vec<AttributePath>,
    private: PrivateState,
    deferred: Option<Deferred>,
}

struct PlanInputs<'a> {
    resource: &'a dyn Resource,
    capabilities: ResourceCapabilities,
    config: Config,
    prior_state: State,
    proposed: Plan,
    provider_meta: Config,
    client_capabilities: ClientCapabilities,
}

/// Write attribute defaults into `plan` wherever the configuration is null.
pub fn apply_attribute_defaults(config: &Config, plan: &Plan) -> Result<Value, FrameworkError> {
    let raw = fill_absent(&plan.schema, &plan.raw)?;
    transform(&plan.schema, &raw, WalkOrder::TopDown, |path, node, value| {
        let default = match node {
            Ok(SchemaNode::Attribute(attr)) => attr.default.as_ref(),
            _ => None,
        };
        let Some(default) = default else {
            return Ok(value);
        };

        match config.raw.at_path(path) {
            Ok(config_value) if !config_value.is_null() => Ok(value),
            Ok(_) | Err(FrameworkError::InvalidStep { .. }) => {
                trace!({ KEY_ATTRIBUTE_PATH } = %path, "setting attribute default value in the plan");
                Ok(default.clone())
            },
            Err(err) => Err(err),
        }
    })
}

/// Replace computed positions whose configuration is null with unknown.
///
/// Walks `plan` top-down against its schema. Non-computed attributes,
/// attributes with a default, attributes with a configured value, blocks,
/// and positions without a schema of their own are left untouched. The root
/// is never replaced.
/// Attributes missing from `plan` are treated as null.
pub fn mark_computed_nils_as_unknown(config: &Config, plan: &Plan) -> Result<Value, FrameworkError> {
    let raw = fill_absent(&plan.schema, &plan.raw)?;
    transform(&plan.schema, &raw, WalkOrder::TopDown, |path, node, value| {
        if path.is_empty() {
            return Ok(value);
        }

        let configured = match config.raw.at_path(path) {
            Ok(config_value) => !config_value.is_null(),
            Err(FrameworkError::InvalidStep { .. }) => false,
            Err(err) => return Err(err),
        };
        if configured {
            return Ok(value);
        }

        match node {
            Ok(SchemaNode::Attribute(attr)) if attr.flags.computed && attr.default.is_none() => {
                trace!({ KEY_ATTRIBUTE_PATH } = %path, "marking computed attribute that is null in the config as unknown");
                Ok(Value::Unknown)
            },
            Ok(_) => Ok(value),
            Err(err) if err.is_schemaless_position() => Ok(value),
            Err(err) => Err(err),
        }
    })
}

/// An absent value as null, with every object filled out to its schema.
fn normalize(schema: &Schema, value: Option<Value>, diags: &mut Diagnostics) -> Option<Value> {
    match fill_absent(schema, &value.unwrap_or_default()) {
        Ok(value) => Some(value),
        Err(err) => {
            diags.push(err.into_framework_diagnostic("Error normalizing plan request values"));
            None
        },
    }
}

impl Server {
    /// Plan a create, update or destroy of a managed resource.
    #[instrument(skip(self, req, resp), name = "rpc.plan_resource_change")]
    pub async fn plan_resource_change(
        &self,
        req: Option<PlanResourceChangeRequest>,
        resp: &mut PlanResourceChangeResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_RESOURCE_TYPE } = %req.type_name, "PlanResourceChange called");

        let (resolved, diags) = self.resolve_resource(&req.type_name).await;
        resp.diagnostics.append(diags);
        let Some((entry, schema)) = resolved else { return };

        let resource = self.instantiate_resource(&entry, &mut resp.diagnostics).await;
        if resp.diagnostics.has_error() {
            return;
        }

        let prior_private = decode_private(&req.prior_private, &mut resp.diagnostics);
        if resp.diagnostics.has_error() {
            return;
        }

        let (Some(config), Some(prior_state), Some(proposed)) = (
            normalize(&schema, req.config, &mut resp.diagnostics),
            normalize(&schema, req.prior_state, &mut resp.diagnostics),
            normalize(&schema, req.proposed_new_state, &mut resp.diagnostics),
        ) else {
            return;
        };

        let inputs = PlanInputs {
            resource: resource.as_ref(),
            capabilities: entry.capabilities,
            config: Config::new(config, schema.clone()),
            prior_state: State::new(prior_state, schema.clone()),
            proposed: Plan::new(proposed, schema),
            provider_meta: self.provider_meta(req.provider_meta),
            client_capabilities: req.client_capabilities,
        };

        let mut planned = Planned {
            plan: inputs.proposed.clone(),
            requires_replace: Vec::new(),
            private: prior_private.clone(),
            deferred: None,
        };
        self.plan_stages(&inputs, &mut planned, &mut resp.diagnostics).await;

        resp.planned_state = planned.plan.raw;
        resp.requires_replace = planned.requires_replace;
        resp.deferred = planned.deferred;
        resp.planned_private =
            thread_private(req.prior_private, &prior_private, &planned.private, &mut resp.diagnostics);

        log_outcome("PlanResourceChange", &resp.diagnostics);
    }

    async fn plan_stages(&self, inputs: &PlanInputs<'_>, planned: &mut Planned, diags: &mut Diagnostics) {
        if !planned.plan.is_null() {
            match apply_attribute_defaults(&inputs.config, &planned.plan) {
                Ok(raw) => planned.plan.raw = raw,
                Err(err) => {
                    diags.push(err.into_framework_diagnostic("Error applying attribute default values"));
                    return;
                },
            }
        }

        if !planned.plan.is_null() && planned.plan.raw != inputs.prior_state.raw {
            debug!("Marking Computed attributes with null configuration values as unknown in the plan");
            match mark_computed_nils_as_unknown(&inputs.config, &planned.plan) {
                Ok(raw) => planned.plan.raw = raw,
                Err(err) => {
                    diags.add_error(
                        "Error modifying plan",
                        format!(
                            "There was an unexpected error updating the plan. \
                             This is always a problem with the provider. \
                             Please report the following to the provider developer:\n\n{}",
                            err
                        ),
                    );
                    return;
                },
            }
        }

        if let Some(deferred) = self.provider_deferred(&inputs.client_capabilities).await {
            planned.deferred = Some(deferred);
            return;
        }

        if !planned.plan.is_null() {
            let schema_req = SchemaPlanRequest {
                config: inputs.config.clone(),
                plan: planned.plan.clone(),
                state: inputs.prior_state.clone(),
                provider_meta: inputs.provider_meta.clone(),
                private: planned.private.provider.clone(),
            };
            let mut schema_resp = SchemaPlanResponse::from_request(&schema_req);

            debug!("Calling provider defined attribute plan modifiers");
            schema_modify_plan(&inputs.proposed.schema, &schema_req, &mut schema_resp);
            debug!("Called provider defined attribute plan modifiers");

            diags.append(schema_resp.diagnostics);
            planned.plan = schema_resp.plan;
            planned.requires_replace = schema_resp.requires_replace;
            planned.private.provider = schema_resp.private;
            if diags.has_error() {
                return;
            }
        }

        if inputs.capabilities.modify_plan {
            if let Some(modifier) = inputs.resource.as_modify_plan() {
                let modify_req = ModifyPlanRequest {
                    config: inputs.config.clone(),
                    plan: planned.plan.clone(),
                    state: inputs.prior_state.clone(),
                    provider_meta: inputs.provider_meta.clone(),
                    private: planned.private.provider.clone(),
                    client_capabilities: inputs.client_capabilities,
                };
                let mut modify_resp = ModifyPlanResponse {
                    plan: planned.plan.clone(),
                    requires_replace: std::mem::take(&mut planned.requires_replace),
                    private: planned.private.provider.clone(),
                    diagnostics: Diagnostics::new(),
                    deferred: None,
                };

                debug!("Calling provider defined Resource ModifyPlan");
                modifier.modify_plan(modify_req, &mut modify_resp).await;
                debug!("Called provider defined Resource ModifyPlan");

                diags.append(modify_resp.diagnostics);
                planned.plan = modify_resp.plan;
                planned.requires_replace = modify_resp.requires_replace;
                planned.private.provider = modify_resp.private;

                check_deferred(modify_resp.deferred.as_ref(), &inputs.client_capabilities, "Resource", diags);
                planned.deferred = modify_resp.deferred;
                if diags.has_error() {
                    return;
                }
            }
        }

        if inputs.proposed.is_null() && !planned.plan.is_null() {
            diags.add_error(
                "Unexpected Planned Resource State on Destroy",
                "The provider unexpectedly returned resource state data when the resource was planned for destruction. \
                 This is always an issue with the provider and should be reported to the provider developers.\n\n\
                 Ensure all resource plan modifiers do not attempt to change resource plan data from being a null value \
                 if the request plan is a null value.",
            );
            return;
        }

        planned.requires_replace = normalize_paths(std::mem::take(&mut planned.requires_replace));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, NestedBlock, NestingMode, Schema};
    use crate::server::fixtures::*;
    use crate::types::DeferredReason;
    use serde_json::json;

    fn plan_request(type_name: &str, prior: serde_json::Value, proposed: serde_json::Value, config: serde_json::Value) -> PlanResourceChangeRequest {
        PlanResourceChangeRequest {
            type_name: type_name.to_string(),
            prior_state: Some(Value::from(prior)),
            proposed_new_state: Some(Value::from(proposed)),
            config: Some(Value::from(config)),
            ..Default::default()
        }
    }

    async fn plan(server: &Server, req: PlanResourceChangeRequest) -> PlanResourceChangeResponse {
        let mut resp = PlanResourceChangeResponse::default();
        server.plan_resource_change(Some(req), &mut resp).await;
        resp
    }

    fn marking_schema() -> Arc<Schema> {
        Arc::new(
            Schema::v0()
                .with_attribute("name", Attribute::required_string())
                .with_attribute("id", Attribute::computed_string())
                .with_attribute("size", Attribute::optional_computed_string())
                .with_attribute("tags", Attribute::new(AttributeType::Dynamic, AttributeFlags::optional()))
                .with_attribute(
                    "disks",
                    Attribute::nested(
                        NestingMode::List,
                        [("serial".to_string(), Attribute::computed_string())].into(),
                        AttributeFlags::optional(),
                    ),
                )
                .with_block(
                    "network",
                    NestedBlock::list(
                        Block::new()
                            .with_attribute("subnet", Attribute::required_string())
                            .with_attribute("address", Attribute::computed_string()),
                    ),
                ),
        )
    }

    #[test]
    fn test_mark_computed_nils_as_unknown() {
        let schema = marking_schema();
        let config = Config::new(
            Value::from(json!({
                "name": "web",
                "id": null,
                "size": "large",
                "tags": {"id": null},
                "disks": [{"serial": null}],
                "network": [{"subnet": "a", "address": null}]
            })),
            schema.clone(),
        );
        let plan = Plan::new(
            Value::from(json!({
                "name": "web",
                "id": "old",
                "size": "large",
                "tags": {"id": null},
                "disks": [{"serial": "s-1"}],
                "network": [{"subnet": "a", "address": null}]
            })),
            schema.clone(),
        );

        let marked = mark_computed_nils_as_unknown(&config, &plan).unwrap();
        let get = |path: AttributePath| marked.at_path(&path).unwrap().clone();

        assert_eq!(get(AttributePath::root("id")), Value::Unknown);
        assert_eq!(get(AttributePath::root("name")), Value::from("web"));
        assert_eq!(get(AttributePath::root("size")), Value::from("large"));
        assert_eq!(get(AttributePath::root("tags").attribute("id")), Value::Null);
        assert_eq!(get(AttributePath::root("disks").index(0).attribute("serial")), Value::Unknown);
        assert_eq!(get(AttributePath::root("network").index(0).attribute("address")), Value::Unknown);
        assert_eq!(get(AttributePath::root("network").index(0).attribute("subnet")), Value::from("a"));

        // Running the transform on its own output changes nothing.
        let again = mark_computed_nils_as_unknown(&config, &Plan::new(marked.clone(), schema)).unwrap();
        assert_eq!(again, marked);
    }

    #[test]
    fn test_mark_computed_nils_shape_mismatch() {
        let schema = marking_schema();
        let config = Config::null(schema.clone());
        let plan = Plan::new(Value::from(json!({"network": "not-a-list"})), schema);
        assert!(matches!(
            mark_computed_nils_as_unknown(&config, &plan),
            Err(FrameworkError::ShapeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_plan_create_marks_computed_unknown() {
        let server = Server::new(TestProvider::default());
        let resp = plan(
            &server,
            plan_request(
                "test_server",
                json!(null),
                json!({"name": "x", "id": null, "size": null}),
                json!({"name": "x", "id": null, "size": null}),
            ),
        )
        .await;

        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(resp.planned_state.get("name"), Some(&Value::from("x")));
        assert_eq!(resp.planned_state.get("id"), Some(&Value::Unknown));
        assert!(resp.requires_replace.is_empty());
    }

    #[tokio::test]
    async fn test_plan_update_discards_prior_computed_value() {
        let server = Server::new(TestProvider::default());
        let resp = plan(
            &server,
            plan_request(
                "test_server",
                json!({"name": "old", "id": "v", "size": "small"}),
                json!({"name": "new", "id": "v", "size": "small"}),
                json!({"name": "new", "id": null, "size": "small"}),
            ),
        )
        .await;

        assert!(!resp.diagnostics.has_error());
        assert_eq!(resp.planned_state.get("name"), Some(&Value::from("new")));
        assert_eq!(resp.planned_state.get("id"), Some(&Value::Unknown));
        assert_eq!(resp.requires_replace, vec![AttributePath::root("name")]);
    }

    #[tokio::test]
    async fn test_plan_unchanged_skips_marking() {
        let server = Server::new(TestProvider::default());
        let state = json!({"name": "same", "id": "v", "size": "small"});
        let resp = plan(
            &server,
            plan_request("test_server", state.clone(), state.clone(), json!({"name": "same", "id": null, "size": "small"})),
        )
        .await;

        assert!(resp.diagnostics.is_empty());
        assert_eq!(
            resp.planned_state,
            Value::from(json!({"name": "same", "id": "v", "size": "small", "weight": null}))
        );
    }

    #[tokio::test]
    async fn test_plan_sparse_proposal_marks_missing_computed_unknown() {
        let server = Server::new(TestProvider::default());
        let resp = plan(&server, plan_request("test_server", json!(null), json!({"name": "x"}), json!({"name": "x"}))).await;

        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(
            resp.planned_state,
            Value::from(json!({"name": "x", "id": UNKNOWN, "size": UNKNOWN, "weight": UNKNOWN}))
        );
    }

    #[tokio::test]
    async fn test_plan_sparse_prior_state_matches_explicit_nulls() {
        let server = Server::new(TestProvider::default());
        let resp = plan(
            &server,
            plan_request(
                "test_server",
                json!({"name": "same", "id": "v"}),
                json!({"name": "same", "id": "v", "size": null, "weight": null}),
                json!({"name": "same"}),
            ),
        )
        .await;

        assert!(resp.diagnostics.is_empty());
        assert_eq!(
            resp.planned_state,
            Value::from(json!({"name": "same", "id": "v", "size": null, "weight": null}))
        );
    }

    #[test]
    fn test_mark_computed_nils_fills_sparse_plan() {
        let schema = marking_schema();
        let config = Config::new(Value::from(json!({"name": "web"})), schema.clone());
        let plan = Plan::new(Value::from(json!({"name": "web", "network": [{"subnet": "a"}]})), schema);

        let marked = mark_computed_nils_as_unknown(&config, &plan).unwrap();

        assert_eq!(marked.get("id"), Some(&Value::Unknown));
        assert_eq!(marked.get("size"), Some(&Value::Unknown));
        assert_eq!(marked.get("disks"), Some(&Value::Null));
        assert_eq!(
            marked.at_path(&AttributePath::root("network").index(0).attribute("address")).unwrap(),
            &Value::Unknown
        );
    }

    fn defaults_schema() -> Arc<Schema> {
        Arc::new(
            Schema::v0()
                .with_attribute("name", Attribute::required_string())
                .with_attribute("id", Attribute::computed_string())
                .with_attribute("tier", Attribute::optional_computed_string().with_default("standard"))
                .with_block(
                    "network",
                    NestedBlock::list(
                        Block::new()
                            .with_attribute("subnet", Attribute::required_string())
                            .with_attribute("mtu", Attribute::new(AttributeType::Int64, AttributeFlags::optional_computed()).with_default(1500_i64)),
                    ),
                ),
        )
    }

    #[test]
    fn test_apply_attribute_defaults() {
        let schema = defaults_schema();
        let config = Config::new(
            Value::from(json!({"name": "web", "network": [{"subnet": "a"}, {"subnet": "b", "mtu": 9000}]})),
            schema.clone(),
        );
        let plan = Plan::new(
            Value::from(json!({"name": "web", "network": [{"subnet": "a", "mtu": null}, {"subnet": "b", "mtu": 9000}]})),
            schema,
        );

        let defaulted = apply_attribute_defaults(&config, &plan).unwrap();

        assert_eq!(defaulted.get("tier"), Some(&Value::from("standard")));
        assert_eq!(defaulted.get("id"), Some(&Value::Null));
        assert_eq!(
            defaulted.at_path(&AttributePath::root("network").index(0).attribute("mtu")).unwrap(),
            &Value::from(1500_i64)
        );
        assert_eq!(
            defaulted.at_path(&AttributePath::root("network").index(1).attribute("mtu")).unwrap(),
            &Value::from(9000_i64)
        );
    }

    #[test]
    fn test_apply_attribute_defaults_keeps_configured_value() {
        let schema = defaults_schema();
        let config = Config::new(Value::from(json!({"name": "web", "tier": "premium"})), schema.clone());
        let plan = Plan::new(Value::from(json!({"name": "web", "tier": "premium"})), schema);

        let defaulted = apply_attribute_defaults(&config, &plan).unwrap();
        assert_eq!(defaulted.get("tier"), Some(&Value::from("premium")));
    }

    #[test]
    fn test_mark_computed_nils_skips_defaulted_attributes() {
        let schema = defaults_schema();
        let config = Config::new(Value::from(json!({"name": "web"})), schema.clone());
        let plan = Plan::new(Value::from(json!({"name": "web"})), schema.clone());

        let defaulted = apply_attribute_defaults(&config, &plan).unwrap();
        let marked = mark_computed_nils_as_unknown(&config, &Plan::new(defaulted, schema)).unwrap();

        assert_eq!(marked.get("tier"), Some(&Value::from("standard")));
        assert_eq!(marked.get("id"), Some(&Value::Unknown));
    }

    #[tokio::test]
    async fn test_plan_absent_values_match_explicit_nulls() {
        let server = Server::new(TestProvider::default());

        let mut absent = PlanResourceChangeResponse::default();
        server
            .plan_resource_change(
                Some(PlanResourceChangeRequest {
                    type_name: "test_server".to_string(),
                    ..Default::default()
                }),
                &mut absent,
            )
            .await;

        let explicit = plan(&server, plan_request("test_server", json!(null), json!(null), json!(null))).await;

        assert_eq!(absent.planned_state, explicit.planned_state);
        assert_eq!(absent.planned_state, Value::Null);
        assert_eq!(absent.diagnostics, explicit.diagnostics);
        assert_eq!(absent.requires_replace, explicit.requires_replace);
        assert_eq!(absent.planned_private, explicit.planned_private);
    }

    #[tokio::test]
    async fn test_plan_destroy_stays_null() {
        let server = Server::new(TestProvider::default());
        let resp = plan(
            &server,
            plan_request("test_server", json!({"name": "x", "id": "v", "size": "s"}), json!(null), json!(null)),
        )
        .await;

        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.planned_state, Value::Null);
    }

    #[tokio::test]
    async fn test_plan_destroy_rejects_non_null_plan() {
        let server = Server::new(TestProvider::default());
        let resp = plan(
            &server,
            plan_request(
                "test_widget",
                json!({"label": "x", "count": 1, "serial": "s"}),
                json!(null),
                json!(null),
            ),
        )
        .await;

        assert_eq!(resp.diagnostics.error_count(), 1);
        assert_eq!(
            resp.diagnostics.iter().next().unwrap().summary,
            "Unexpected Planned Resource State on Destroy"
        );
        assert_eq!(resp.planned_state, Value::from(json!({"label": "resurrected"})));
    }

    #[tokio::test]
    async fn test_plan_modify_plan_requires_replace_normalized() {
        let server = Server::new(TestProvider::default());
        let resp = plan(
            &server,
            plan_request(
                "test_widget",
                json!({"label": "a", "count": 1, "serial": "s"}),
                json!({"label": "b", "count": 2, "serial": "s"}),
                json!({"label": "b", "count": 2, "serial": null}),
            ),
        )
        .await;

        assert!(!resp.diagnostics.has_error(), "{:?}", resp.diagnostics);
        // The widget modifier reports [label, count, count].
        assert_eq!(
            resp.requires_replace,
            vec![AttributePath::root("count"), AttributePath::root("label")]
        );
        assert_eq!(resp.planned_state.get("serial"), Some(&Value::Unknown));
    }

    #[tokio::test]
    async fn test_plan_private_state_bytes_preserved() {
        let server = Server::new(TestProvider::default());
        let prior_private = br#"{"token":"ImFiYyI="}"#.to_vec();

        let mut req = plan_request(
            "test_server",
            json!({"name": "x", "id": "v", "size": "s"}),
            json!({"name": "x", "id": "v", "size": "m"}),
            json!({"name": "x", "id": null, "size": "m"}),
        );
        req.prior_private = prior_private.clone();
        let resp = plan(&server, req).await;

        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.planned_private, prior_private);
    }

    #[tokio::test]
    async fn test_plan_private_state_set_by_modifier() {
        let server = Server::new(TestProvider::default());
        let resp = plan(
            &server,
            plan_request(
                "test_widget",
                json!({"label": "a", "count": 1, "serial": "s"}),
                json!({"label": "a", "count": 1, "serial": "t"}),
                json!({"label": "a", "count": 1, "serial": null}),
            ),
        )
        .await;

        assert!(!resp.diagnostics.has_error());
        let (private, diags) = PrivateState::from_bytes(&resp.planned_private);
        assert!(diags.is_empty());
        assert_eq!(private.provider.get_key("planned").0, b"true".to_vec());
    }

    #[tokio::test]
    async fn test_plan_unknown_type() {
        let server = Server::new(TestProvider::default());
        let resp = plan(&server, plan_request("test_missing", json!(null), json!(null), json!(null))).await;
        assert_eq!(resp.diagnostics.iter().next().unwrap().summary, "Resource Type Not Found");
    }

    #[tokio::test]
    async fn test_plan_provider_deferral() {
        let server = Server::new(TestProvider {
            defer: Some(Deferred::new(DeferredReason::ProviderConfigUnknown)),
            ..Default::default()
        });
        configure(&server, true).await;

        let mut req = plan_request(
            "test_widget",
            json!(null),
            json!({"label": "a", "count": 1, "serial": null}),
            json!({"label": "a", "count": 1, "serial": null}),
        );
        req.client_capabilities.deferral_allowed = true;
        let resp = plan(&server, req).await;

        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.deferred, Some(Deferred::new(DeferredReason::ProviderConfigUnknown)));
        assert_eq!(resp.planned_state.get("serial"), Some(&Value::Unknown));
        assert!(resp.requires_replace.is_empty());
    }

    #[tokio::test]
    async fn test_plan_resource_deferral_requires_capability() {
        let server = Server::new(TestProvider::default());
        let resp = plan(
            &server,
            plan_request(
                "test_widget",
                json!(null),
                json!({"label": "defer", "count": 1, "serial": null}),
                json!({"label": "defer", "count": 1, "serial": null}),
            ),
        )
        .await;

        assert_eq!(
            resp.diagnostics.iter().next().unwrap().summary,
            "Invalid Deferred Resource Response"
        );
    }
}
