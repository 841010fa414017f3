//! Provider contract.
//!
//! [`Provider`] is the entry point a provider binary implements. It names
//! the provider, describes its configuration schema, configures shared
//! clients, and declares the factories of every resource, data source,
//! ephemeral resource, function and state store it offers.

use std::fmt;

use async_trait::async_trait;

use crate::data::Config;
use crate::datasource::DataSourceFactory;
use crate::diag::Diagnostics;
use crate::ephemeral::EphemeralResourceFactory;
use crate::function::FunctionFactory;
use crate::resource::ResourceFactory;
use crate::schema::Schema;
use crate::statestore::StateStoreFactory;
use crate::types::{ClientCapabilities, Deferred, SchemaResponse, SharedData};

/// Output of [`Provider::metadata`].
#[derive(Debug, Clone, Default)]
pub struct ProviderMetadataResponse {
    /// Provider type name, used as prefix of every type name.
    pub type_name: String,
    /// Provider version.
    pub version: String,
}

/// Input of [`ProviderWithValidateConfig::validate_config`].
#[derive(Debug, Clone)]
pub struct ValidateProviderConfigRequest {
    /// The provider configuration.
    pub config: Config,
}

/// Output of [`ProviderWithValidateConfig::validate_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateProviderConfigResponse {
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`Provider::configure`].
#[derive(Debug, Clone)]
pub struct ConfigureProviderRequest {
    /// The provider configuration.
    pub config: Config,
    /// Version of the calling orchestrator.
    pub hemmer_version: String,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`Provider::configure`].
#[derive(Default)]
pub struct ConfigureProviderResponse {
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
    /// Data handed to every data source instance.
    pub data_source_data: Option<SharedData>,
    /// Data handed to every resource instance.
    pub resource_data: Option<SharedData>,
    /// Data handed to every ephemeral resource instance.
    pub ephemeral_resource_data: Option<SharedData>,
    /// Data handed to state store initialization.
    pub state_store_data: Option<SharedData>,
    /// Defer every later resource, data source and ephemeral resource
    /// operation. Only honored when deferral is allowed.
    pub deferred: Option<Deferred>,
}

impl fmt::Debug for ConfigureProviderResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigureProviderResponse")
            .field("diagnostics", &self.diagnostics)
            .field("data_source_data", &self.data_source_data.is_some())
            .field("resource_data", &self.resource_data.is_some())
            .field("ephemeral_resource_data", &self.ephemeral_resource_data.is_some())
            .field("state_store_data", &self.state_store_data.is_some())
            .field("deferred", &self.deferred)
            .finish()
    }
}

/// A provider.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Report the provider type name and version.
    fn metadata(&self, resp: &mut ProviderMetadataResponse);

    /// Report the provider configuration schema.
    fn schema(&self, resp: &mut SchemaResponse);

    /// Configure shared clients from the provider configuration.
    async fn configure(&self, req: ConfigureProviderRequest, resp: &mut ConfigureProviderResponse);

    /// Managed resource types.
    fn resources(&self) -> Vec<ResourceFactory> {
        Vec::new()
    }

    /// Data source types.
    fn data_sources(&self) -> Vec<DataSourceFactory> {
        Vec::new()
    }

    /// Ephemeral resource types.
    fn ephemeral_resources(&self) -> Vec<EphemeralResourceFactory> {
        Vec::new()
    }

    /// Provider defined functions.
    fn functions(&self) -> Vec<FunctionFactory> {
        Vec::new()
    }

    /// State store types.
    fn state_stores(&self) -> Vec<StateStoreFactory> {
        Vec::new()
    }

    /// Schema of provider meta data in resource configuration.
    fn meta_schema(&self) -> Option<Schema> {
        None
    }

    /// Validate configuration beyond what the schema expresses.
    fn as_validate_config(&self) -> Option<&dyn ProviderWithValidateConfig> {
        None
    }
}

/// Validates provider configuration.
#[async_trait]
pub trait ProviderWithValidateConfig: Send + Sync {
    /// Report problems with `req.config`.
    async fn validate_config(
        &self,
        req: ValidateProviderConfigRequest,
        resp: &mut ValidateProviderConfigResponse,
    );
}
