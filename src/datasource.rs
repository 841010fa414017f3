//! Data source contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::data::{Config, State};
use crate::diag::Diagnostics;
use crate::types::{
    ClientCapabilities, ConfigureRequest, ConfigureResponse, Deferred, MetadataRequest,
    MetadataResponse, SchemaResponse,
};

/// Factory producing a fresh data source instance.
pub type DataSourceFactory = Arc<dyn Fn() -> Box<dyn DataSource> + Send + Sync>;

/// Wrap a constructor into a [`DataSourceFactory`].
pub fn factory<T, F>(make: F) -> DataSourceFactory
where
    T: DataSource + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Arc::new(move || Box::new(make()))
}

/// Input of [`DataSource::read`].
#[derive(Debug, Clone)]
pub struct ReadDataSourceRequest {
    /// The data source configuration.
    pub config: Config,
    /// Provider meta data from the configuration.
    pub provider_meta: Config,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`DataSource::read`].
#[derive(Debug, Clone)]
pub struct ReadDataSourceResponse {
    /// The data read. Starts null.
    pub state: State,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
    /// Set to postpone the read. Only legal when deferral is allowed.
    pub deferred: Option<Deferred>,
}

/// Input of [`DataSourceWithValidateConfig::validate_config`].
#[derive(Debug, Clone)]
pub struct ValidateDataSourceConfigRequest {
    /// The configuration to validate.
    pub config: Config,
}

/// Output of [`DataSourceWithValidateConfig::validate_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateDataSourceConfigResponse {
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// A data source type.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Report the data source type name.
    fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse);

    /// Report the data source schema.
    fn schema(&self, resp: &mut SchemaResponse);

    /// Read the data.
    async fn read(&self, req: ReadDataSourceRequest, resp: &mut ReadDataSourceResponse);

    /// Receive provider configured data before reading.
    fn as_configure(&mut self) -> Option<&mut dyn DataSourceWithConfigure> {
        None
    }

    /// Validate configuration beyond what the schema expresses.
    fn as_validate_config(&self) -> Option<&dyn DataSourceWithValidateConfig> {
        None
    }
}

/// Receives provider configured data.
pub trait DataSourceWithConfigure: Send + Sync {
    /// Store what the data source needs from `req.provider_data`.
    fn configure(&mut self, req: ConfigureRequest, resp: &mut ConfigureResponse);
}

/// Validates configuration.
#[async_trait]
pub trait DataSourceWithValidateConfig: Send + Sync {
    /// Report problems with `req.config`.
    async fn validate_config(
        &self,
        req: ValidateDataSourceConfigRequest,
        resp: &mut ValidateDataSourceConfigResponse,
    );
}

/// Optional behavior of a data source type, resolved once at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataSourceCapabilities {
    /// Implements [`DataSourceWithConfigure`].
    pub configure: bool,
    /// Implements [`DataSourceWithValidateConfig`].
    pub validate_config: bool,
}

impl DataSourceCapabilities {
    /// Inspect the optional behavior of `data_source`.
    pub fn of(data_source: &mut dyn DataSource) -> Self {
        Self {
            configure: data_source.as_configure().is_some(),
            validate_config: data_source.as_validate_config().is_some(),
        }
    }
}
