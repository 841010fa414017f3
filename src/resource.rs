//! Managed resource contract.
//!
//! A provider declares each managed resource type as a factory returning a
//! fresh [`Resource`]. The framework instantiates one resource per RPC,
//! hands it provider configured data when it implements
//! [`ResourceWithConfigure`], and then invokes the operation callback.
//!
//! Optional behavior is exposed through the `as_*` accessors. Each returns
//! `None` by default; an implementation opts in by returning `Some(self)`.
//! The framework inspects the accessors once at registration and records the
//! answers in [`ResourceCapabilities`].
//!
//! # Example
//!
//! ```ignore
//! use hemmer_plugin_framework::resource::*;
//! use hemmer_plugin_framework::schema::{Attribute, Schema};
//! use hemmer_plugin_framework::types::{MetadataRequest, MetadataResponse, SchemaResponse};
//!
//! struct Bucket;
//!
//! #[async_trait::async_trait]
//! impl Resource for Bucket {
//!     fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse) {
//!         resp.type_name = format!("{}_bucket", req.provider_type_name);
//!     }
//!
//!     fn schema(&self, resp: &mut SchemaResponse) {
//!         resp.schema = Schema::v0()
//!             .with_attribute("name", Attribute::required_string().requires_replace())
//!             .with_attribute("id", Attribute::computed_string());
//!     }
//!
//!     async fn create(&self, req: CreateRequest, resp: &mut CreateResponse) {
//!         resp.state = req.plan.into();
//!     }
//!
//!     async fn read(&self, _req: ReadRequest, _resp: &mut ReadResponse) {}
//!
//!     async fn update(&self, req: UpdateRequest, resp: &mut UpdateResponse) {
//!         resp.state = req.plan.into();
//!     }
//!
//!     async fn delete(&self, _req: DeleteRequest, _resp: &mut DeleteResponse) {}
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::data::{Config, Plan, State};
use crate::diag::Diagnostics;
use crate::path::AttributePath;
use crate::private_state::ProviderData;
use crate::schema::Schema;
use crate::types::{
    ClientCapabilities, ConfigureRequest, ConfigureResponse, Deferred, MetadataRequest,
    MetadataResponse, SchemaResponse,
};
use crate::value::Value;

/// Factory producing a fresh resource instance.
pub type ResourceFactory = Arc<dyn Fn() -> Box<dyn Resource> + Send + Sync>;

/// Wrap a constructor into a [`ResourceFactory`].
pub fn factory<T, F>(make: F) -> ResourceFactory
where
    T: Resource + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Arc::new(move || Box::new(make()))
}

// =========================================================================
// Requests & responses
// =========================================================================

/// Input of [`Resource::create`].
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// The resource configuration.
    pub config: Config,
    /// The planned new state.
    pub plan: Plan,
    /// Provider meta data from the configuration.
    pub provider_meta: Config,
}

/// Output of [`Resource::create`].
#[derive(Debug, Clone)]
pub struct CreateResponse {
    /// The new state. Starts null; a successful create must set it.
    pub state: State,
    /// Provider private state to store with the new state.
    pub private: ProviderData,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`Resource::read`].
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// The current state.
    pub state: State,
    /// Provider private state stored with the current state.
    pub private: ProviderData,
    /// Provider meta data from the configuration.
    pub provider_meta: Config,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`Resource::read`].
#[derive(Debug, Clone)]
pub struct ReadResponse {
    /// The refreshed state. Starts as the current state; setting it null
    /// signals that the remote object is gone.
    pub state: State,
    /// Provider private state.
    pub private: ProviderData,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
    /// Set to postpone the read. Only legal when deferral is allowed.
    pub deferred: Option<Deferred>,
}

/// Input of [`Resource::update`].
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// The resource configuration.
    pub config: Config,
    /// The planned new state.
    pub plan: Plan,
    /// The prior state.
    pub state: State,
    /// Provider meta data from the configuration.
    pub provider_meta: Config,
    /// Provider private state from the plan.
    pub private: ProviderData,
}

/// Output of [`Resource::update`].
#[derive(Debug, Clone)]
pub struct UpdateResponse {
    /// The new state. Starts as the planned state; must not be set null.
    pub state: State,
    /// Provider private state.
    pub private: ProviderData,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`Resource::delete`].
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    /// The prior state.
    pub state: State,
    /// Provider meta data from the configuration.
    pub provider_meta: Config,
    /// Provider private state from the plan.
    pub private: ProviderData,
}

/// Output of [`Resource::delete`].
#[derive(Debug, Clone)]
pub struct DeleteResponse {
    /// The resulting state. Starts as the prior state and is nulled once
    /// delete reports no errors.
    pub state: State,
    /// Provider private state.
    pub private: ProviderData,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`ResourceWithModifyPlan::modify_plan`].
#[derive(Debug, Clone)]
pub struct ModifyPlanRequest {
    /// The resource configuration. Null when the resource is being destroyed.
    pub config: Config,
    /// The plan as left by attribute plan modifiers.
    pub plan: Plan,
    /// The prior state. Null when the resource is being created.
    pub state: State,
    /// Provider meta data from the configuration.
    pub provider_meta: Config,
    /// Provider private state.
    pub private: ProviderData,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`ResourceWithModifyPlan::modify_plan`].
#[derive(Debug, Clone)]
pub struct ModifyPlanResponse {
    /// The planned new state.
    pub plan: Plan,
    /// Paths whose change requires replacing the resource.
    pub requires_replace: Vec<AttributePath>,
    /// Provider private state.
    pub private: ProviderData,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
    /// Set to postpone the change. Only legal when deferral is allowed.
    pub deferred: Option<Deferred>,
}

/// Input of [`ResourceWithValidateConfig::validate_config`].
#[derive(Debug, Clone)]
pub struct ValidateConfigRequest {
    /// The configuration to validate.
    pub config: Config,
}

/// Output of [`ResourceWithValidateConfig::validate_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateConfigResponse {
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of a [`StateUpgrader`].
#[derive(Debug, Clone)]
pub struct UpgradeStateRequest {
    /// The stored state as JSON.
    pub raw_state: serde_json::Value,
    /// The stored state decoded with the upgrader's prior schema, when it has one.
    pub state: Option<State>,
}

/// Output of a [`StateUpgrader`].
///
/// An upgrader sets exactly one of `dynamic_value` or `state`.
#[derive(Debug, Clone)]
pub struct UpgradeStateResponse {
    /// The upgraded state as raw JSON in the current schema's shape.
    pub dynamic_value: Option<serde_json::Value>,
    /// The upgraded state. Starts null.
    pub state: State,
    /// Diagnostics reported by the upgrader.
    pub diagnostics: Diagnostics,
}

/// Upgrade function of a [`StateUpgrader`].
pub type UpgradeStateFn = dyn Fn(&UpgradeStateRequest, &mut UpgradeStateResponse) + Send + Sync;

/// Upgrades state stored under one prior schema version.
#[derive(Clone)]
pub struct StateUpgrader {
    /// Schema of the prior version. When set, the request carries a typed [`State`].
    pub prior_schema: Option<Arc<Schema>>,
    upgrade: Arc<UpgradeStateFn>,
}

impl StateUpgrader {
    /// Create an upgrader working on raw JSON.
    pub fn new<F>(upgrade: F) -> Self
    where
        F: Fn(&UpgradeStateRequest, &mut UpgradeStateResponse) + Send + Sync + 'static,
    {
        Self {
            prior_schema: None,
            upgrade: Arc::new(upgrade),
        }
    }

    /// Decode the stored state with `schema` before upgrading.
    pub fn with_prior_schema(mut self, schema: Schema) -> Self {
        self.prior_schema = Some(Arc::new(schema));
        self
    }

    /// Run the upgrade.
    pub fn upgrade(&self, req: &UpgradeStateRequest, resp: &mut UpgradeStateResponse) {
        (self.upgrade)(req, resp)
    }
}

impl fmt::Debug for StateUpgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateUpgrader")
            .field("prior_schema", &self.prior_schema.is_some())
            .finish_non_exhaustive()
    }
}

/// Input of [`ResourceWithImportState::import_state`].
#[derive(Debug, Clone)]
pub struct ImportStateRequest {
    /// Identifier given by the user.
    pub id: String,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`ResourceWithImportState::import_state`].
#[derive(Debug, Clone)]
pub struct ImportStateResponse {
    /// State of the imported object. Starts null; must be set.
    pub state: State,
    /// Provider private state of the imported object.
    pub private: ProviderData,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
    /// Set to postpone the import. Only legal when deferral is allowed.
    pub deferred: Option<Deferred>,
}

// =========================================================================
// Traits
// =========================================================================

/// A managed resource type.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Report the resource type name.
    fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse);

    /// Report the resource schema.
    fn schema(&self, resp: &mut SchemaResponse);

    /// Create the remote object.
    async fn create(&self, req: CreateRequest, resp: &mut CreateResponse);

    /// Refresh the state from the remote object.
    async fn read(&self, req: ReadRequest, resp: &mut ReadResponse);

    /// Update the remote object in place.
    async fn update(&self, req: UpdateRequest, resp: &mut UpdateResponse);

    /// Delete the remote object.
    async fn delete(&self, req: DeleteRequest, resp: &mut DeleteResponse);

    /// Receive provider configured data before any other callback.
    fn as_configure(&mut self) -> Option<&mut dyn ResourceWithConfigure> {
        None
    }

    /// Adjust the whole plan after attribute plan modifiers ran.
    fn as_modify_plan(&self) -> Option<&dyn ResourceWithModifyPlan> {
        None
    }

    /// Validate configuration beyond what the schema expresses.
    fn as_validate_config(&self) -> Option<&dyn ResourceWithValidateConfig> {
        None
    }

    /// Upgrade state written by older schema versions.
    fn as_upgrade_state(&self) -> Option<&dyn ResourceWithUpgradeState> {
        None
    }

    /// Import existing remote objects.
    fn as_import_state(&self) -> Option<&dyn ResourceWithImportState> {
        None
    }
}

/// Receives provider configured data.
pub trait ResourceWithConfigure: Send + Sync {
    /// Store what the resource needs from `req.provider_data`.
    fn configure(&mut self, req: ConfigureRequest, resp: &mut ConfigureResponse);
}

/// Adjusts the whole plan.
#[async_trait]
pub trait ResourceWithModifyPlan: Send + Sync {
    /// Modify `resp.plan`, which starts as `req.plan`.
    async fn modify_plan(&self, req: ModifyPlanRequest, resp: &mut ModifyPlanResponse);
}

/// Validates configuration.
#[async_trait]
pub trait ResourceWithValidateConfig: Send + Sync {
    /// Report problems with `req.config`.
    async fn validate_config(&self, req: ValidateConfigRequest, resp: &mut ValidateConfigResponse);
}

/// Upgrades prior state versions.
pub trait ResourceWithUpgradeState: Send + Sync {
    /// Upgraders keyed by the schema version they upgrade from.
    fn upgrade_state(&self) -> BTreeMap<i64, StateUpgrader>;
}

/// Imports remote objects.
#[async_trait]
pub trait ResourceWithImportState: Send + Sync {
    /// Fill `resp.state` for the object identified by `req.id`.
    async fn import_state(&self, req: ImportStateRequest, resp: &mut ImportStateResponse);
}

/// Optional behavior of a resource type, resolved once at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCapabilities {
    /// Implements [`ResourceWithConfigure`].
    pub configure: bool,
    /// Implements [`ResourceWithModifyPlan`].
    pub modify_plan: bool,
    /// Implements [`ResourceWithValidateConfig`].
    pub validate_config: bool,
    /// Implements [`ResourceWithUpgradeState`].
    pub upgrade_state: bool,
    /// Implements [`ResourceWithImportState`].
    pub import_state: bool,
}

impl ResourceCapabilities {
    /// Inspect the optional behavior of `resource`.
    pub fn of(resource: &mut dyn Resource) -> Self {
        Self {
            configure: resource.as_configure().is_some(),
            modify_plan: resource.as_modify_plan().is_some(),
            validate_config: resource.as_validate_config().is_some(),
            upgrade_state: resource.as_upgrade_state().is_some(),
            import_state: resource.as_import_state().is_some(),
        }
    }
}

/// Write the import identifier into the string attribute at `path`.
///
/// Covers resources whose import identifier is one of their attributes.
pub fn import_state_passthrough_id(
    path: &AttributePath,
    req: &ImportStateRequest,
    resp: &mut ImportStateResponse,
) {
    if let Err(err) = resp.state.set_attribute(path, Value::from(req.id.as_str())) {
        resp.diagnostics.push(
            err.into_provider_diagnostic("Resource Import Passthrough Error")
                .with_path(path.clone()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;

    struct Plain;

    #[async_trait]
    impl Resource for Plain {
        fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse) {
            resp.type_name = format!("{}_plain", req.provider_type_name);
        }

        fn schema(&self, resp: &mut SchemaResponse) {
            resp.schema = Schema::v0().with_attribute("id", Attribute::computed_string());
        }

        async fn create(&self, _req: CreateRequest, _resp: &mut CreateResponse) {}
        async fn read(&self, _req: ReadRequest, _resp: &mut ReadResponse) {}
        async fn update(&self, _req: UpdateRequest, _resp: &mut UpdateResponse) {}
        async fn delete(&self, _req: DeleteRequest, _resp: &mut DeleteResponse) {}
    }

    #[derive(Default)]
    struct Importable {
        configured: bool,
    }

    #[async_trait]
    impl Resource for Importable {
        fn metadata(&self, _req: &MetadataRequest, resp: &mut MetadataResponse) {
            resp.type_name = "test_importable".to_string();
        }

        fn schema(&self, _resp: &mut SchemaResponse) {}

        async fn create(&self, _req: CreateRequest, _resp: &mut CreateResponse) {}
        async fn read(&self, _req: ReadRequest, _resp: &mut ReadResponse) {}
        async fn update(&self, _req: UpdateRequest, _resp: &mut UpdateResponse) {}
        async fn delete(&self, _req: DeleteRequest, _resp: &mut DeleteResponse) {}

        fn as_configure(&mut self) -> Option<&mut dyn ResourceWithConfigure> {
            Some(self)
        }

        fn as_import_state(&self) -> Option<&dyn ResourceWithImportState> {
            Some(self)
        }
    }

    impl ResourceWithConfigure for Importable {
        fn configure(&mut self, _req: ConfigureRequest, _resp: &mut ConfigureResponse) {
            self.configured = true;
        }
    }

    #[async_trait]
    impl ResourceWithImportState for Importable {
        async fn import_state(&self, req: ImportStateRequest, resp: &mut ImportStateResponse) {
            import_state_passthrough_id(&AttributePath::root("id"), &req, resp);
        }
    }

    #[test]
    fn test_capabilities_default_to_none() {
        let mut plain = Plain;
        assert_eq!(ResourceCapabilities::of(&mut plain), ResourceCapabilities::default());

        let mut importable = Importable::default();
        let caps = ResourceCapabilities::of(&mut importable);
        assert!(caps.configure);
        assert!(caps.import_state);
        assert!(!caps.modify_plan);
        assert!(!caps.upgrade_state);
    }

    #[test]
    fn test_configure_through_accessor() {
        let mut resource: Box<dyn Resource> = Box::new(Importable::default());
        let mut resp = ConfigureResponse::default();
        if let Some(configurable) = resource.as_configure() {
            configurable.configure(ConfigureRequest::default(), &mut resp);
        }
        assert!(resp.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_import_state_passthrough_id() {
        let schema = Arc::new(
            Schema::v0()
                .with_attribute("id", Attribute::computed_string())
                .with_attribute("name", Attribute::optional_string()),
        );
        let req = ImportStateRequest {
            id: "bucket-1".to_string(),
            client_capabilities: ClientCapabilities::default(),
        };
        let mut resp = ImportStateResponse {
            state: State::null(schema.clone()),
            private: ProviderData::new(),
            diagnostics: Diagnostics::new(),
            deferred: None,
        };

        Importable::default().import_state(req, &mut resp).await;

        assert!(!resp.diagnostics.has_error());
        assert_eq!(resp.state.raw.get("id"), Some(&Value::from("bucket-1")));
    }

    #[test]
    fn test_import_state_passthrough_id_bad_path() {
        let schema = Arc::new(Schema::v0().with_attribute("id", Attribute::computed_string()));
        let req = ImportStateRequest {
            id: "x".to_string(),
            client_capabilities: ClientCapabilities::default(),
        };
        let mut resp = ImportStateResponse {
            state: State::null(schema),
            private: ProviderData::new(),
            diagnostics: Diagnostics::new(),
            deferred: None,
        };

        import_state_passthrough_id(&AttributePath::root("missing"), &req, &mut resp);

        assert!(resp.diagnostics.has_error());
        assert!(resp.state.is_null());
    }

    #[test]
    fn test_state_upgrader() {
        let upgrader = StateUpgrader::new(|req, resp| {
            resp.dynamic_value = Some(req.raw_state.clone());
        })
        .with_prior_schema(Schema::v0());
        assert!(upgrader.prior_schema.is_some());

        let req = UpgradeStateRequest {
            raw_state: serde_json::json!({"a": 1}),
            state: None,
        };
        let mut resp = UpgradeStateResponse {
            dynamic_value: None,
            state: State::null(Arc::new(Schema::v0())),
            diagnostics: Diagnostics::new(),
        };
        upgrader.upgrade(&req, &mut resp);
        assert_eq!(resp.dynamic_value, Some(serde_json::json!({"a": 1})));
    }
}
