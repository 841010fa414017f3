//! RPC dispatcher.
//!
//! [`Server`] owns a [`Provider`] together with the registries of everything
//! it declares, and exposes one async method per protocol operation. Each
//! method takes an `Option` of its request and fills a response passed by
//! reference; a `None` request leaves the response untouched. Wire encoding
//! is left to the transport: requests carry already decoded [`Value`]s and
//! private state bytes.
//!
//! Every call instantiates a fresh implementation from its factory, hands it
//! the data produced by provider configuration when it implements the
//! configure capability, and then runs the operation.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_plugin_framework::server::{PlanResourceChangeRequest, PlanResourceChangeResponse, Server};
//!
//! let server = Server::new(MyProvider::default());
//!
//! let mut resp = PlanResourceChangeResponse::default();
//! server
//!     .plan_resource_change(
//!         Some(PlanResourceChangeRequest {
//!             type_name: "example_instance".to_string(),
//!             config: Some(config),
//!             proposed_new_state: Some(proposed),
//!             ..Default::default()
//!         }),
//!         &mut resp,
//!     )
//!     .await;
//! ```

mod data_sources;
mod ephemeral_resources;
mod functions;
mod plan;
mod resources;
mod state_stores;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::data::Config;
use crate::datasource::DataSourceFactory;
use crate::diag::Diagnostics;
use crate::ephemeral::EphemeralResourceFactory;
use crate::function::{FunctionDefinition, FunctionFactory};
use crate::logging::KEY_DEFERRED_REASON;
use crate::private_state::PrivateState;
use crate::provider::{self, Provider, ProviderMetadataResponse};
use crate::registry::{Entry, Registrable, Registry};
use crate::resource::ResourceFactory;
use crate::schema::{ProviderSchema, Schema};
use crate::statestore::StateStoreFactory;
use crate::types::{
    ClientCapabilities, Deferred, FunctionMetadata, SchemaResponse, ServerCapabilities, SharedData,
    TypeMetadata,
};
use crate::validation;
use crate::value::Value;

pub use self::data_sources::{
    ReadDataSourceRequest, ReadDataSourceResponse, ValidateDataSourceConfigRequest,
    ValidateDataSourceConfigResponse,
};
pub use self::ephemeral_resources::{
    CloseEphemeralResourceRequest, CloseEphemeralResourceResponse, OpenEphemeralResourceRequest,
    OpenEphemeralResourceResponse, RenewEphemeralResourceRequest, RenewEphemeralResourceResponse,
    ValidateEphemeralResourceConfigRequest, ValidateEphemeralResourceConfigResponse,
};
pub use self::functions::{
    CallFunctionRequest, CallFunctionResponse, GetFunctionsRequest, GetFunctionsResponse,
};
pub use self::plan::{apply_attribute_defaults, mark_computed_nils_as_unknown, PlanResourceChangeRequest, PlanResourceChangeResponse};
pub use self::resources::{
    ApplyResourceChangeRequest, ApplyResourceChangeResponse, ImportResourceStateRequest,
    ImportResourceStateResponse, ImportedResource, ReadResourceRequest, ReadResourceResponse,
    UpgradeResourceStateRequest, UpgradeResourceStateResponse, ValidateResourceConfigRequest,
    ValidateResourceConfigResponse,
};
pub use self::state_stores::{
    ConfigureStateStoreRequest, ConfigureStateStoreResponse, DeleteStateRequest, DeleteStateResponse,
    GetStatesRequest, GetStatesResponse, LockStateRequest, LockStateResponse, ReadStateBytesRequest,
    ReadStateBytesResponse, UnlockStateRequest, UnlockStateResponse, ValidateStateStoreConfigRequest,
    ValidateStateStoreConfigResponse, WriteStateBytesRequest, WriteStateBytesResponse,
};

/// Options for a [`Server`].
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Capabilities advertised by GetMetadata and GetProviderSchema.
    pub capabilities: ServerCapabilities,
    /// Honor a deferral returned by provider configuration for every later
    /// resource, data source and ephemeral resource operation.
    /// Default: true.
    pub provider_deferral: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            capabilities: ServerCapabilities::default(),
            provider_deferral: true,
        }
    }
}

impl ServerOptions {
    /// Create new server options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set whether provider level deferral is honored.
    pub fn with_provider_deferral(mut self, enabled: bool) -> Self {
        self.provider_deferral = enabled;
        self
    }
}

/// Data produced by ConfigureProvider.
#[derive(Default)]
struct Configured {
    data_source_data: Option<SharedData>,
    resource_data: Option<SharedData>,
    ephemeral_resource_data: Option<SharedData>,
    state_store_data: Option<SharedData>,
    deferred: Option<Deferred>,
}

/// Dispatches protocol operations to a provider.
pub struct Server {
    provider: Box<dyn Provider>,
    provider_type_name: String,
    provider_version: String,
    options: ServerOptions,
    provider_schema: RwLock<Option<Arc<Schema>>>,
    meta_schema: Arc<Schema>,
    configured: RwLock<Configured>,
    state_store_data: RwLock<Option<SharedData>>,
    resources: Registry<ResourceFactory>,
    data_sources: Registry<DataSourceFactory>,
    ephemeral_resources: Registry<EphemeralResourceFactory>,
    functions: Registry<FunctionFactory>,
    state_stores: Registry<StateStoreFactory>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("provider_type_name", &self.provider_type_name)
            .field("provider_version", &self.provider_version)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// =========================================================================
// Provider level requests & responses
// =========================================================================

/// Input of [`Server::get_metadata`].
#[derive(Debug, Clone, Default)]
pub struct GetMetadataRequest;

/// Output of [`Server::get_metadata`].
#[derive(Debug, Clone, Default)]
pub struct GetMetadataResponse {
    /// Capabilities of this server.
    pub server_capabilities: ServerCapabilities,
    /// Declared resource types.
    pub resources: Vec<TypeMetadata>,
    /// Declared data source types.
    pub data_sources: Vec<TypeMetadata>,
    /// Declared ephemeral resource types.
    pub ephemeral_resources: Vec<TypeMetadata>,
    /// Declared state store types.
    pub state_stores: Vec<TypeMetadata>,
    /// Declared functions.
    pub functions: Vec<FunctionMetadata>,
    /// Problems found while collecting the declarations.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::get_provider_schema`].
#[derive(Debug, Clone, Default)]
pub struct GetProviderSchemaRequest;

/// Output of [`Server::get_provider_schema`].
#[derive(Debug, Clone, Default)]
pub struct GetProviderSchemaResponse {
    /// Capabilities of this server.
    pub server_capabilities: ServerCapabilities,
    /// Every schema served by the provider.
    pub schema: ProviderSchema,
    /// Definitions of every function.
    pub functions: BTreeMap<String, FunctionDefinition>,
    /// Problems found while building the schemas.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::validate_provider_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateProviderConfigRequest {
    /// The provider configuration.
    pub config: Option<Value>,
}

/// Output of [`Server::validate_provider_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateProviderConfigResponse {
    /// Validation problems.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::configure_provider`].
#[derive(Debug, Clone, Default)]
pub struct ConfigureProviderRequest {
    /// The provider configuration.
    pub config: Option<Value>,
    /// Version of the calling orchestrator.
    pub hemmer_version: String,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`Server::configure_provider`].
#[derive(Debug, Clone, Default)]
pub struct ConfigureProviderResponse {
    /// Diagnostics reported while configuring.
    pub diagnostics: Diagnostics,
}

impl Server {
    /// Create a server with default options.
    pub fn new(provider: impl Provider) -> Self {
        Self::with_options(provider, ServerOptions::default())
    }

    /// Create a server with custom options.
    pub fn with_options(provider: impl Provider, options: ServerOptions) -> Self {
        let mut metadata = ProviderMetadataResponse::default();
        provider.metadata(&mut metadata);
        let meta_schema = Arc::new(provider.meta_schema().unwrap_or_default());

        Self {
            provider: Box::new(provider),
            provider_type_name: metadata.type_name,
            provider_version: metadata.version,
            options,
            provider_schema: RwLock::new(None),
            meta_schema,
            configured: RwLock::new(Configured::default()),
            state_store_data: RwLock::new(None),
            resources: Registry::new(),
            data_sources: Registry::new(),
            ephemeral_resources: Registry::new(),
            functions: Registry::new(),
            state_stores: Registry::new(),
        }
    }

    /// Type name of the provider, the prefix of every type it declares.
    pub fn provider_type_name(&self) -> &str {
        &self.provider_type_name
    }

    /// Version reported by the provider.
    pub fn provider_version(&self) -> &str {
        &self.provider_version
    }

    // =========================================================================
    // Provider RPCs
    // =========================================================================

    /// Report the declared types and functions.
    #[instrument(skip(self, req, resp), name = "rpc.get_metadata")]
    pub async fn get_metadata(&self, req: Option<GetMetadataRequest>, resp: &mut GetMetadataResponse) {
        if req.is_none() {
            return;
        }
        debug!("GetMetadata called");

        resp.server_capabilities = self.options.capabilities;

        let (names, diags) = self.names(&self.resources, || self.provider.resources()).await;
        resp.resources = names.into_iter().map(|type_name| TypeMetadata { type_name }).collect();
        resp.diagnostics.append(diags);

        let (names, diags) = self.names(&self.data_sources, || self.provider.data_sources()).await;
        resp.data_sources = names.into_iter().map(|type_name| TypeMetadata { type_name }).collect();
        resp.diagnostics.append(diags);

        let (names, diags) = self
            .names(&self.ephemeral_resources, || self.provider.ephemeral_resources())
            .await;
        resp.ephemeral_resources = names.into_iter().map(|type_name| TypeMetadata { type_name }).collect();
        resp.diagnostics.append(diags);

        let (names, diags) = self.names(&self.state_stores, || self.provider.state_stores()).await;
        resp.state_stores = names.into_iter().map(|type_name| TypeMetadata { type_name }).collect();
        resp.diagnostics.append(diags);

        let (names, diags) = self.names(&self.functions, || self.provider.functions()).await;
        resp.functions = names.into_iter().map(|name| FunctionMetadata { name }).collect();
        resp.diagnostics.append(diags);

        info!(
            resources = resp.resources.len(),
            data_sources = resp.data_sources.len(),
            ephemeral_resources = resp.ephemeral_resources.len(),
            state_stores = resp.state_stores.len(),
            functions = resp.functions.len(),
            "GetMetadata completed"
        );
    }

    /// Report every schema and function definition.
    #[instrument(skip(self, req, resp), name = "rpc.get_provider_schema")]
    pub async fn get_provider_schema(
        &self,
        req: Option<GetProviderSchemaRequest>,
        resp: &mut GetProviderSchemaResponse,
    ) {
        if req.is_none() {
            return;
        }
        debug!("GetProviderSchema called");

        resp.server_capabilities = self.options.capabilities;

        let (schema, diags) = self.provider_schema().await;
        resp.diagnostics.append(diags);
        if let Some(schema) = schema {
            resp.schema.provider = (*schema).clone();
        }

        if !self.meta_schema.block.attributes.is_empty() || !self.meta_schema.block.blocks.is_empty() {
            resp.schema.provider_meta = Some((*self.meta_schema).clone());
        }

        let (schemas, diags) = self.descriptors(&self.resources, || self.provider.resources()).await;
        resp.schema.resources = unshare(schemas);
        resp.diagnostics.append(diags);

        let (schemas, diags) = self.descriptors(&self.data_sources, || self.provider.data_sources()).await;
        resp.schema.data_sources = unshare(schemas);
        resp.diagnostics.append(diags);

        let (schemas, diags) = self
            .descriptors(&self.ephemeral_resources, || self.provider.ephemeral_resources())
            .await;
        resp.schema.ephemeral_resources = unshare(schemas);
        resp.diagnostics.append(diags);

        let (schemas, diags) = self.descriptors(&self.state_stores, || self.provider.state_stores()).await;
        resp.schema.state_stores = unshare(schemas);
        resp.diagnostics.append(diags);

        let (definitions, diags) = self.descriptors(&self.functions, || self.provider.functions()).await;
        resp.functions = definitions;
        resp.diagnostics.append(diags);

        if resp.diagnostics.has_error() {
            warn!(diagnostics = resp.diagnostics.len(), "GetProviderSchema completed with errors");
        } else {
            info!(
                resources = resp.schema.resources.len(),
                data_sources = resp.schema.data_sources.len(),
                "GetProviderSchema completed"
            );
        }
    }

    /// Validate the provider configuration.
    #[instrument(skip(self, req, resp), name = "rpc.validate_provider_config")]
    pub async fn validate_provider_config(
        &self,
        req: Option<ValidateProviderConfigRequest>,
        resp: &mut ValidateProviderConfigResponse,
    ) {
        let Some(req) = req else { return };
        debug!("ValidateProviderConfig called");

        let (schema, diags) = self.provider_schema().await;
        resp.diagnostics.append(diags);
        let Some(schema) = schema else { return };

        let config = Config::new(req.config.unwrap_or_default(), schema.clone());
        resp.diagnostics.append(validation::validate(&schema, &config.raw));

        if let Some(validator) = self.provider.as_validate_config() {
            let mut validate_resp = provider::ValidateProviderConfigResponse::default();
            debug!("Calling provider defined Provider ValidateConfig");
            validator
                .validate_config(provider::ValidateProviderConfigRequest { config }, &mut validate_resp)
                .await;
            debug!("Called provider defined Provider ValidateConfig");
            resp.diagnostics.append(validate_resp.diagnostics);
        }

        log_outcome("ValidateProviderConfig", &resp.diagnostics);
    }

    /// Configure the provider and keep the data it produces for later calls.
    #[instrument(skip(self, req, resp), name = "rpc.configure_provider")]
    pub async fn configure_provider(
        &self,
        req: Option<ConfigureProviderRequest>,
        resp: &mut ConfigureProviderResponse,
    ) {
        let Some(req) = req else { return };
        debug!(hemmer_version = %req.hemmer_version, "ConfigureProvider called");

        let (schema, diags) = self.provider_schema().await;
        resp.diagnostics.append(diags);
        let Some(schema) = schema else { return };

        let mut configure_resp = provider::ConfigureProviderResponse::default();
        debug!("Calling provider defined Provider Configure");
        self.provider
            .configure(
                provider::ConfigureProviderRequest {
                    config: Config::new(req.config.unwrap_or_default(), schema),
                    hemmer_version: req.hemmer_version,
                    client_capabilities: req.client_capabilities,
                },
                &mut configure_resp,
            )
            .await;
        debug!("Called provider defined Provider Configure");
        resp.diagnostics.append(configure_resp.diagnostics);

        if configure_resp.deferred.is_some() && !req.client_capabilities.deferral_allowed {
            resp.diagnostics.add_error(
                "Invalid Deferred Provider Response",
                "Provider configured a deferred response for all resources and data sources but the \
                 request did not indicate support for deferred actions. \
                 This is always an issue with the provider and should be reported to the provider developers.",
            );
            return;
        }

        *self.configured.write().await = Configured {
            data_source_data: configure_resp.data_source_data,
            resource_data: configure_resp.resource_data,
            ephemeral_resource_data: configure_resp.ephemeral_resource_data,
            state_store_data: configure_resp.state_store_data,
            deferred: configure_resp.deferred,
        };

        log_outcome("ConfigureProvider", &resp.diagnostics);
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    /// The provider configuration schema, built on first use.
    async fn provider_schema(&self) -> (Option<Arc<Schema>>, Diagnostics) {
        if let Some(schema) = self.provider_schema.read().await.as_ref() {
            return (Some(schema.clone()), Diagnostics::new());
        }

        let mut guard = self.provider_schema.write().await;
        if let Some(schema) = guard.as_ref() {
            return (Some(schema.clone()), Diagnostics::new());
        }

        let mut resp = SchemaResponse::default();
        self.provider.schema(&mut resp);
        if resp.diagnostics.has_error() {
            return (None, resp.diagnostics);
        }

        let schema = Arc::new(resp.schema);
        *guard = Some(schema.clone());
        (Some(schema), resp.diagnostics)
    }

    /// Look `name` up in `registry` and build its descriptor.
    ///
    /// Returns `None` whenever the collected diagnostics contain an error,
    /// including errors recorded while building the catalog.
    async fn resolve<T, F>(
        &self,
        registry: &Registry<T>,
        name: &str,
        declare: F,
    ) -> (Option<(Entry<T>, T::Descriptor)>, Diagnostics)
    where
        T: Registrable,
        F: FnOnce() -> Vec<T>,
    {
        let catalog = registry.catalog(&self.provider_type_name, declare).await;
        let (entry, mut diags) = catalog.lookup(name);
        let Some(entry) = entry else {
            return (None, diags);
        };

        let (descriptor, descriptor_diags) = registry.descriptor(name, &entry).await;
        diags.append(descriptor_diags);

        match descriptor {
            Some(descriptor) if !diags.has_error() => (Some((entry, descriptor)), diags),
            _ => (None, diags),
        }
    }

    async fn names<T, F>(&self, registry: &Registry<T>, declare: F) -> (Vec<String>, Diagnostics)
    where
        T: Registrable,
        F: FnOnce() -> Vec<T>,
    {
        let catalog = registry.catalog(&self.provider_type_name, declare).await;
        (catalog.names().map(str::to_string).collect(), catalog.diagnostics.clone())
    }

    async fn descriptors<T, F>(
        &self,
        registry: &Registry<T>,
        declare: F,
    ) -> (BTreeMap<String, T::Descriptor>, Diagnostics)
    where
        T: Registrable,
        F: FnOnce() -> Vec<T>,
    {
        let catalog = registry.catalog(&self.provider_type_name, declare).await;
        let mut diags = catalog.diagnostics.clone();
        let mut descriptors = BTreeMap::new();

        for (name, entry) in &catalog.entries {
            let (descriptor, descriptor_diags) = registry.descriptor(name, entry).await;
            diags.append(descriptor_diags);
            if let Some(descriptor) = descriptor {
                descriptors.insert(name.clone(), descriptor);
            }
        }

        (descriptors, diags)
    }

    /// Provider meta data typed with the provider meta schema.
    fn provider_meta(&self, raw: Option<Value>) -> Config {
        Config::new(raw.unwrap_or_default(), self.meta_schema.clone())
    }

    /// The deferral returned by provider configuration, when it applies to
    /// a request with `client_capabilities`.
    async fn provider_deferred(&self, client_capabilities: &ClientCapabilities) -> Option<Deferred> {
        if !self.options.provider_deferral || !client_capabilities.deferral_allowed {
            return None;
        }
        let deferred = self.configured.read().await.deferred;
        if let Some(deferred) = &deferred {
            debug!(
                { KEY_DEFERRED_REASON } = %deferred.reason,
                "Provider has deferred response configured, automatically returning deferred response"
            );
        }
        deferred
    }
}

/// Report a deferral that the caller did not allow.
fn check_deferred(
    deferred: Option<&Deferred>,
    client_capabilities: &ClientCapabilities,
    kind: &str,
    diags: &mut Diagnostics,
) {
    if deferred.is_some() && !client_capabilities.deferral_allowed {
        diags.add_error(
            format!("Invalid Deferred {} Response", kind),
            format!(
                "{} returned a deferred response but the request did not indicate support for deferred actions. \
                 This is always an issue with the provider and should be reported to the provider developers.",
                kind
            ),
        );
    }
}

fn decode_private(bytes: &[u8], diags: &mut Diagnostics) -> PrivateState {
    let (private, decode_diags) = PrivateState::from_bytes(bytes);
    diags.append(decode_diags);
    private
}

fn encode_private(private: &PrivateState, diags: &mut Diagnostics) -> Vec<u8> {
    let (bytes, encode_diags) = private.to_bytes();
    diags.append(encode_diags);
    bytes
}

/// Encode `private`, or hand back `prior_bytes` untouched when nothing
/// changed since they were decoded into `prior`.
fn thread_private(prior_bytes: Vec<u8>, prior: &PrivateState, private: &PrivateState, diags: &mut Diagnostics) -> Vec<u8> {
    if private == prior {
        prior_bytes
    } else {
        encode_private(private, diags)
    }
}

fn unshare(schemas: BTreeMap<String, Arc<Schema>>) -> BTreeMap<String, Schema> {
    schemas
        .into_iter()
        .map(|(name, schema)| (name, (*schema).clone()))
        .collect()
}

fn log_outcome(operation: &str, diags: &Diagnostics) {
    if diags.has_error() {
        warn!(diagnostics = diags.len(), "{} completed with errors", operation);
    } else {
        info!("{} completed successfully", operation);
    }
}

#[cfg(test)]
pub(crate) mod fixtures;
