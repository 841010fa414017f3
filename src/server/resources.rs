//! Managed resource RPCs other than planning.

use std::sync::Arc;

use tracing::{debug, instrument};

use super::{check_deferred, decode_private, encode_private, log_outcome, thread_private, Server};
use crate::data::{Config, Plan, State};
use crate::diag::Diagnostics;
use crate::error::FrameworkError;
use crate::logging::KEY_RESOURCE_TYPE;
use crate::private_state::{PrivateState, ProviderData};
use crate::registry::{Entry, Registrable};
use crate::resource::{
    CreateRequest, CreateResponse, DeleteRequest, DeleteResponse, ImportStateRequest, ImportStateResponse,
    ReadRequest, ReadResponse, Resource, ResourceFactory, UpdateRequest, UpdateResponse, UpgradeStateRequest,
    UpgradeStateResponse, ValidateConfigRequest, ValidateConfigResponse,
};
use crate::schema::Schema;
use crate::semantic::schema_semantic_equality;
use crate::types::{ClientCapabilities, ConfigureRequest, ConfigureResponse, Deferred};
use crate::validation;
use crate::value::Value;
use crate::walk::{transform, WalkOrder};

// =========================================================================
// Requests & responses
// =========================================================================

/// Input of [`Server::validate_resource_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateResourceConfigRequest {
    /// The resource type.
    pub type_name: String,
    /// The configuration to validate.
    pub config: Option<Value>,
}

/// Output of [`Server::validate_resource_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateResourceConfigResponse {
    /// Validation problems.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::read_resource`].
#[derive(Debug, Clone, Default)]
pub struct ReadResourceRequest {
    /// The resource type.
    pub type_name: String,
    /// The state to refresh.
    pub current_state: Option<Value>,
    /// Private state stored with the current state.
    pub private: Vec<u8>,
    /// Provider meta data from the configuration.
    pub provider_meta: Option<Value>,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`Server::read_resource`].
#[derive(Debug, Clone, Default)]
pub struct ReadResourceResponse {
    /// The refreshed state; null when the remote object is gone.
    pub new_state: Value,
    /// Private state to store with the new state.
    pub private: Vec<u8>,
    /// Diagnostics reported while reading.
    pub diagnostics: Diagnostics,
    /// Set when the read was postponed.
    pub deferred: Option<Deferred>,
}

/// Input of [`Server::apply_resource_change`] and the create, update and
/// delete operations it dispatches to.
#[derive(Debug, Clone, Default)]
pub struct ApplyResourceChangeRequest {
    /// The resource type.
    pub type_name: String,
    /// State before the change; null on create.
    pub prior_state: Option<Value>,
    /// State planned by PlanResourceChange; null on destroy.
    pub planned_state: Option<Value>,
    /// The resource configuration.
    pub config: Option<Value>,
    /// Private state returned by PlanResourceChange.
    pub planned_private: Vec<u8>,
    /// Provider meta data from the configuration.
    pub provider_meta: Option<Value>,
}

/// Output of [`Server::apply_resource_change`].
#[derive(Debug, Clone, Default)]
pub struct ApplyResourceChangeResponse {
    /// The state after the change.
    pub new_state: Value,
    /// Private state to store with the new state.
    pub private: Vec<u8>,
    /// Diagnostics reported while applying.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::upgrade_resource_state`].
#[derive(Debug, Clone, Default)]
pub struct UpgradeResourceStateRequest {
    /// The resource type.
    pub type_name: String,
    /// Schema version the state was stored with.
    pub version: i64,
    /// The stored state.
    pub raw_state: Option<serde_json::Value>,
}

/// Output of [`Server::upgrade_resource_state`].
#[derive(Debug, Clone, Default)]
pub struct UpgradeResourceStateResponse {
    /// The state in the shape of the current schema.
    pub upgraded_state: Value,
    /// Diagnostics reported while upgrading.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::import_resource_state`].
#[derive(Debug, Clone, Default)]
pub struct ImportResourceStateRequest {
    /// The resource type.
    pub type_name: String,
    /// Identifier given by the user.
    pub id: String,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// One object produced by an import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedResource {
    /// The resource type.
    pub type_name: String,
    /// State of the imported object.
    pub state: Value,
    /// Private state to store with it.
    pub private: Vec<u8>,
}

/// Output of [`Server::import_resource_state`].
#[derive(Debug, Clone, Default)]
pub struct ImportResourceStateResponse {
    /// The imported objects. Empty when the import was deferred.
    pub imported_resources: Vec<ImportedResource>,
    /// Diagnostics reported while importing.
    pub diagnostics: Diagnostics,
    /// Set when the import was postponed.
    pub deferred: Option<Deferred>,
}

/// What every apply operation needs before calling the resource.
struct Prepared {
    resource: Box<dyn Resource>,
    schema: Arc<Schema>,
    private: PrivateState,
}

impl Server {
    pub(super) async fn resolve_resource(
        &self,
        type_name: &str,
    ) -> (Option<(Entry<ResourceFactory>, Arc<Schema>)>, Diagnostics) {
        self.resolve(&self.resources, type_name, || self.provider.resources()).await
    }

    /// A fresh resource instance, configured with the provider's resource data.
    pub(super) async fn instantiate_resource(
        &self,
        entry: &Entry<ResourceFactory>,
        diags: &mut Diagnostics,
    ) -> Box<dyn Resource> {
        let provider_data = self.configured.read().await.resource_data.clone();
        let mut resource = entry.factory.instantiate();

        if entry.capabilities.configure {
            if let Some(configurable) = resource.as_configure() {
                let mut resp = ConfigureResponse::default();
                debug!("Calling provider defined Resource Configure");
                configurable.configure(ConfigureRequest { provider_data }, &mut resp);
                debug!("Called provider defined Resource Configure");
                diags.append(resp.diagnostics);
            }
        }

        resource
    }

    async fn prepare_apply(&self, req: &ApplyResourceChangeRequest, diags: &mut Diagnostics) -> Option<Prepared> {
        let (resolved, resolve_diags) = self.resolve_resource(&req.type_name).await;
        diags.append(resolve_diags);
        let (entry, schema) = resolved?;

        let resource = self.instantiate_resource(&entry, diags).await;
        let private = decode_private(&req.planned_private, diags);
        if diags.has_error() {
            return None;
        }

        Some(Prepared {
            resource,
            schema,
            private,
        })
    }

    /// Validate a resource configuration against its schema, then with the
    /// resource's own validation when it has one.
    #[instrument(skip(self, req, resp), name = "rpc.validate_resource_config")]
    pub async fn validate_resource_config(
        &self,
        req: Option<ValidateResourceConfigRequest>,
        resp: &mut ValidateResourceConfigResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_RESOURCE_TYPE } = %req.type_name, "ValidateResourceConfig called");

        let (resolved, diags) = self.resolve_resource(&req.type_name).await;
        resp.diagnostics.append(diags);
        let Some((entry, schema)) = resolved else { return };

        let resource = self.instantiate_resource(&entry, &mut resp.diagnostics).await;
        if resp.diagnostics.has_error() {
            return;
        }

        let Some(raw) = req.config else { return };
        resp.diagnostics.append(validation::validate(&schema, &raw));

        if entry.capabilities.validate_config {
            if let Some(validator) = resource.as_validate_config() {
                let mut validate_resp = ValidateConfigResponse::default();
                debug!("Calling provider defined Resource ValidateConfig");
                validator
                    .validate_config(
                        ValidateConfigRequest {
                            config: Config::new(raw, schema),
                        },
                        &mut validate_resp,
                    )
                    .await;
                debug!("Called provider defined Resource ValidateConfig");
                resp.diagnostics.append(validate_resp.diagnostics);
            }
        }

        log_outcome("ValidateResourceConfig", &resp.diagnostics);
    }

    /// Refresh the state of a managed resource.
    #[instrument(skip(self, req, resp), name = "rpc.read_resource")]
    pub async fn read_resource(&self, req: Option<ReadResourceRequest>, resp: &mut ReadResourceResponse) {
        let Some(req) = req else { return };
        debug!({ KEY_RESOURCE_TYPE } = %req.type_name, "ReadResource called");

        let Some(current) = req.current_state else {
            resp.diagnostics.add_error(
                "Unexpected Read Request",
                "The current state for the read request was missing. \
                 This is always an issue in the Hemmer plugin framework and should be reported to the framework developers.",
            );
            return;
        };

        let (resolved, diags) = self.resolve_resource(&req.type_name).await;
        resp.diagnostics.append(diags);
        let Some((entry, schema)) = resolved else { return };

        let resource = self.instantiate_resource(&entry, &mut resp.diagnostics).await;
        let prior_private = decode_private(&req.private, &mut resp.diagnostics);
        if resp.diagnostics.has_error() {
            return;
        }

        if let Some(deferred) = self.provider_deferred(&req.client_capabilities).await {
            resp.new_state = current;
            resp.private = req.private;
            resp.deferred = Some(deferred);
            return;
        }

        let state = State::new(current.clone(), schema.clone());
        let read_req = ReadRequest {
            state: state.clone(),
            private: prior_private.provider.clone(),
            provider_meta: self.provider_meta(req.provider_meta),
            client_capabilities: req.client_capabilities,
        };
        let mut read_resp = ReadResponse {
            state,
            private: prior_private.provider.clone(),
            diagnostics: Diagnostics::new(),
            deferred: None,
        };

        debug!("Calling provider defined Resource Read");
        resource.read(read_req, &mut read_resp).await;
        debug!("Called provider defined Resource Read");

        resp.diagnostics.append(read_resp.diagnostics);
        check_deferred(read_resp.deferred.as_ref(), &req.client_capabilities, "Resource", &mut resp.diagnostics);
        resp.deferred = read_resp.deferred;
        resp.new_state = read_resp.state.raw;

        let mut private = prior_private.clone();
        private.provider = read_resp.private;
        resp.private = thread_private(req.private, &prior_private, &private, &mut resp.diagnostics);

        if resp.diagnostics.has_error() {
            return;
        }

        apply_semantic_equality(&schema, &current, &mut resp.new_state, &mut resp.diagnostics);
        log_outcome("ReadResource", &resp.diagnostics);
    }

    /// Apply a planned change, dispatching on which of the prior and planned
    /// states are null.
    #[instrument(skip(self, req, resp), name = "rpc.apply_resource_change")]
    pub async fn apply_resource_change(
        &self,
        req: Option<ApplyResourceChangeRequest>,
        resp: &mut ApplyResourceChangeResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_RESOURCE_TYPE } = %req.type_name, "ApplyResourceChange called");

        let prior_null = req.prior_state.as_ref().map_or(true, Value::is_null);
        let planned_null = req.planned_state.as_ref().map_or(true, Value::is_null);

        match (prior_null, planned_null) {
            (true, false) => self.create_resource(Some(req), resp).await,
            (false, false) => self.update_resource(Some(req), resp).await,
            (false, true) => self.delete_resource(Some(req), resp).await,
            (true, true) => resp.diagnostics.add_error(
                "Unhandled Resource Change",
                "Both the prior state and the planned state of the change are null, so it is neither a create, \
                 an update nor a delete. This is always an issue in the Hemmer plugin framework and should be \
                 reported to the framework developers.",
            ),
        }
    }

    /// Create a managed resource.
    #[instrument(skip(self, req, resp), name = "rpc.create_resource")]
    pub async fn create_resource(&self, req: Option<ApplyResourceChangeRequest>, resp: &mut ApplyResourceChangeResponse) {
        let Some(req) = req else { return };
        debug!({ KEY_RESOURCE_TYPE } = %req.type_name, "CreateResource called");

        let Some(Prepared {
            resource,
            schema,
            mut private,
        }) = self.prepare_apply(&req, &mut resp.diagnostics).await
        else {
            return;
        };

        let plan = Plan::new(req.planned_state.unwrap_or_default(), schema.clone());
        let create_req = CreateRequest {
            config: Config::new(req.config.unwrap_or_default(), schema.clone()),
            plan: plan.clone(),
            provider_meta: self.provider_meta(req.provider_meta),
        };
        let mut create_resp = CreateResponse {
            state: State::null(schema.clone()),
            private: private.provider.clone(),
            diagnostics: Diagnostics::new(),
        };

        debug!("Calling provider defined Resource Create");
        resource.create(create_req, &mut create_resp).await;
        debug!("Called provider defined Resource Create");

        resp.diagnostics.append(create_resp.diagnostics);
        resp.new_state = create_resp.state.raw;
        private.provider = create_resp.private;
        resp.private = encode_private(&private, &mut resp.diagnostics);

        if !resp.diagnostics.has_error() && resp.new_state.is_null() {
            resp.diagnostics.add_error(
                "Missing Resource State After Create",
                "The provider unexpectedly returned no resource state after having no errors in the resource creation. \
                 This is always an issue with the provider and should be reported to the provider developers.\n\n\
                 The resource may have been successfully created, but it is not tracked. \
                 Applying the configuration again with no other action may result in duplicate resource errors.",
            );
        }
        if resp.diagnostics.has_error() {
            return;
        }

        apply_semantic_equality(&schema, &plan.raw, &mut resp.new_state, &mut resp.diagnostics);
        log_outcome("CreateResource", &resp.diagnostics);
    }

    /// Update a managed resource in place.
    #[instrument(skip(self, req, resp), name = "rpc.update_resource")]
    pub async fn update_resource(&self, req: Option<ApplyResourceChangeRequest>, resp: &mut ApplyResourceChangeResponse) {
        let Some(req) = req else { return };
        debug!({ KEY_RESOURCE_TYPE } = %req.type_name, "UpdateResource called");

        let Some(Prepared {
            resource,
            schema,
            mut private,
        }) = self.prepare_apply(&req, &mut resp.diagnostics).await
        else {
            return;
        };

        let plan = Plan::new(req.planned_state.unwrap_or_default(), schema.clone());
        let update_req = UpdateRequest {
            config: Config::new(req.config.unwrap_or_default(), schema.clone()),
            plan: plan.clone(),
            state: State::new(req.prior_state.unwrap_or_default(), schema.clone()),
            provider_meta: self.provider_meta(req.provider_meta),
            private: private.provider.clone(),
        };
        let mut update_resp = UpdateResponse {
            state: State::from(plan.clone()),
            private: private.provider.clone(),
            diagnostics: Diagnostics::new(),
        };

        debug!("Calling provider defined Resource Update");
        resource.update(update_req, &mut update_resp).await;
        debug!("Called provider defined Resource Update");

        resp.diagnostics.append(update_resp.diagnostics);
        resp.new_state = update_resp.state.raw;
        private.provider = update_resp.private;
        resp.private = encode_private(&private, &mut resp.diagnostics);

        if !resp.diagnostics.has_error() && resp.new_state.is_null() {
            resp.diagnostics.add_error(
                "Missing Resource State After Update",
                "The provider unexpectedly returned no resource state after having no errors in the resource update. \
                 This is always an issue with the provider and should be reported to the provider developers.",
            );
        }
        if resp.diagnostics.has_error() {
            return;
        }

        apply_semantic_equality(&schema, &plan.raw, &mut resp.new_state, &mut resp.diagnostics);
        log_outcome("UpdateResource", &resp.diagnostics);
    }

    /// Delete a managed resource.
    #[instrument(skip(self, req, resp), name = "rpc.delete_resource")]
    pub async fn delete_resource(&self, req: Option<ApplyResourceChangeRequest>, resp: &mut ApplyResourceChangeResponse) {
        let Some(req) = req else { return };
        debug!({ KEY_RESOURCE_TYPE } = %req.type_name, "DeleteResource called");

        let Some(Prepared {
            resource,
            schema,
            mut private,
        }) = self.prepare_apply(&req, &mut resp.diagnostics).await
        else {
            return;
        };

        let prior_state = State::new(req.prior_state.unwrap_or_default(), schema);
        let delete_req = DeleteRequest {
            state: prior_state.clone(),
            provider_meta: self.provider_meta(req.provider_meta),
            private: private.provider.clone(),
        };
        let mut delete_resp = DeleteResponse {
            state: prior_state,
            private: private.provider.clone(),
            diagnostics: Diagnostics::new(),
        };

        debug!("Calling provider defined Resource Delete");
        resource.delete(delete_req, &mut delete_resp).await;
        debug!("Called provider defined Resource Delete");

        resp.diagnostics.append(delete_resp.diagnostics);
        resp.new_state = if resp.diagnostics.has_error() {
            delete_resp.state.raw
        } else {
            Value::Null
        };
        private.provider = delete_resp.private;
        resp.private = encode_private(&private, &mut resp.diagnostics);

        log_outcome("DeleteResource", &resp.diagnostics);
    }

    /// Upgrade stored state to the current schema version.
    #[instrument(skip(self, req, resp), name = "rpc.upgrade_resource_state")]
    pub async fn upgrade_resource_state(
        &self,
        req: Option<UpgradeResourceStateRequest>,
        resp: &mut UpgradeResourceStateResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_RESOURCE_TYPE } = %req.type_name, version = req.version, "UpgradeResourceState called");

        let Some(raw_state) = req.raw_state else { return };

        let (resolved, diags) = self.resolve_resource(&req.type_name).await;
        resp.diagnostics.append(diags);
        let Some((entry, schema)) = resolved else { return };

        if req.version == schema.version {
            debug!("UpgradeResourceState request version matches current schema version, using framework defined passthrough implementation");
            let state = Value::from(raw_state);
            if let Err(err) = check_shape(&schema, &state) {
                resp.diagnostics.push(unreadable_state(err));
                return;
            }
            resp.upgraded_state = state;
            return;
        }

        let resource = self.instantiate_resource(&entry, &mut resp.diagnostics).await;
        if resp.diagnostics.has_error() {
            return;
        }

        let upgraders = match resource.as_upgrade_state() {
            Some(upgradable) if entry.capabilities.upgrade_state => upgradable.upgrade_state(),
            _ => {
                resp.diagnostics.add_error(
                    "Unable to Upgrade Resource State",
                    format!(
                        "This resource was implemented without an UpgradeState() method, \
                         however Hemmer was expecting an implementation for version {} upgrade.\n\n\
                         This is always an issue with the provider and should be reported to the provider developer.",
                        req.version
                    ),
                );
                return;
            },
        };

        let Some(upgrader) = upgraders.get(&req.version) else {
            resp.diagnostics.add_error(
                "Unable to Upgrade Resource State",
                format!(
                    "This resource was implemented with an UpgradeState() method, \
                     however it is missing an upgrader for version {} that Hemmer was expecting.\n\n\
                     This is always an issue with the provider and should be reported to the provider developer.",
                    req.version
                ),
            );
            return;
        };

        let typed = match &upgrader.prior_schema {
            Some(prior_schema) => {
                let prior = Value::from(raw_state.clone());
                if let Err(err) = check_shape(prior_schema, &prior) {
                    resp.diagnostics.push(unreadable_state(err));
                    return;
                }
                Some(State::new(prior, prior_schema.clone()))
            },
            None => None,
        };

        let upgrade_req = UpgradeStateRequest {
            raw_state,
            state: typed,
        };
        let mut upgrade_resp = UpgradeStateResponse {
            dynamic_value: None,
            state: State::null(schema.clone()),
            diagnostics: Diagnostics::new(),
        };

        debug!(version = req.version, "Calling provider defined Resource UpgradeState");
        upgrader.upgrade(&upgrade_req, &mut upgrade_resp);
        debug!(version = req.version, "Called provider defined Resource UpgradeState");

        resp.diagnostics.append(upgrade_resp.diagnostics);
        if resp.diagnostics.has_error() {
            return;
        }

        if let Some(dynamic_value) = upgrade_resp.dynamic_value {
            let upgraded = Value::from(dynamic_value);
            if let Err(err) = check_shape(&schema, &upgraded) {
                resp.diagnostics.push(err.into_provider_diagnostic("Unable to Upgrade Resource State"));
                return;
            }
            resp.upgraded_state = upgraded;
            log_outcome("UpgradeResourceState", &resp.diagnostics);
            return;
        }

        if upgrade_resp.state.is_null() {
            resp.diagnostics.add_error(
                "Missing Upgraded Resource State",
                format!(
                    "After attempting a resource state upgrade to version {}, the provider did not return any state data. \
                     Preventing the unexpected loss of resource state data. \
                     This is always an issue with the provider and should be reported to the provider developer.",
                    schema.version
                ),
            );
            return;
        }

        resp.upgraded_state = upgrade_resp.state.raw;
        log_outcome("UpgradeResourceState", &resp.diagnostics);
    }

    /// Import an existing remote object by identifier.
    #[instrument(skip(self, req, resp), name = "rpc.import_resource_state")]
    pub async fn import_resource_state(
        &self,
        req: Option<ImportResourceStateRequest>,
        resp: &mut ImportResourceStateResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_RESOURCE_TYPE } = %req.type_name, "ImportResourceState called");

        let (resolved, diags) = self.resolve_resource(&req.type_name).await;
        resp.diagnostics.append(diags);
        let Some((entry, schema)) = resolved else { return };

        let resource = self.instantiate_resource(&entry, &mut resp.diagnostics).await;
        if resp.diagnostics.has_error() {
            return;
        }

        if let Some(deferred) = self.provider_deferred(&req.client_capabilities).await {
            resp.deferred = Some(deferred);
            return;
        }

        let importer = match resource.as_import_state() {
            Some(importer) if entry.capabilities.import_state => importer,
            _ => {
                resp.diagnostics.add_error(
                    "Resource Import Not Implemented",
                    "This resource does not support import. Please contact the provider developer for additional information.",
                );
                return;
            },
        };

        let import_req = ImportStateRequest {
            id: req.id,
            client_capabilities: req.client_capabilities,
        };
        let mut import_resp = ImportStateResponse {
            state: State::null(schema),
            private: ProviderData::new(),
            diagnostics: Diagnostics::new(),
            deferred: None,
        };

        debug!("Calling provider defined Resource ImportState");
        importer.import_state(import_req, &mut import_resp).await;
        debug!("Called provider defined Resource ImportState");

        resp.diagnostics.append(import_resp.diagnostics);
        check_deferred(import_resp.deferred.as_ref(), &req.client_capabilities, "Resource", &mut resp.diagnostics);
        if resp.diagnostics.has_error() {
            return;
        }

        if let Some(deferred) = import_resp.deferred {
            resp.deferred = Some(deferred);
            return;
        }

        if import_resp.state.is_null() {
            resp.diagnostics.add_error(
                "Missing Resource Import State",
                "An unexpected error was encountered when importing the resource. \
                 This is always a problem with the provider. Please give the following information to the provider developer:\n\n\
                 Resource ImportState method returned no State in response. \
                 If import is intentionally not supported, remove the Resource type ImportState method or return an error.",
            );
            return;
        }

        let private = PrivateState {
            provider: import_resp.private,
            ..PrivateState::default()
        };
        let private = encode_private(&private, &mut resp.diagnostics);

        resp.imported_resources = vec![ImportedResource {
            type_name: req.type_name,
            state: import_resp.state.raw,
            private,
        }];
        log_outcome("ImportResourceState", &resp.diagnostics);
    }
}

/// Replace `new_state` with the result of the schema's semantic equality
/// predicates against `prior`, unless they report errors.
pub(super) fn apply_semantic_equality(schema: &Schema, prior: &Value, new_state: &mut Value, diags: &mut Diagnostics) {
    let (normalized, equality_diags) = schema_semantic_equality(schema, prior, new_state);
    let failed = equality_diags.has_error();
    diags.append(equality_diags);
    if !failed {
        *new_state = normalized;
    }
}

fn check_shape(schema: &Schema, value: &Value) -> Result<(), FrameworkError> {
    transform(schema, value, WalkOrder::TopDown, |_, _, value| Ok(value)).map(|_| ())
}

fn unreadable_state(err: FrameworkError) -> crate::diag::Diagnostic {
    crate::diag::Diagnostic::error("Unable to Read Previously Saved State for UpgradeResourceState").with_detail(format!(
        "There was an error reading the saved resource state using the prior resource schema defined for \
         the version of the state. This is always an issue with the provider and should be reported to the \
         provider developer.\n\n{}",
        err
    ))
}
