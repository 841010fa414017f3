//! Data source RPCs.

use std::sync::Arc;

use tracing::{debug, instrument};

use super::plan::mark_computed_nils_as_unknown;
use super::resources::apply_semantic_equality;
use super::{check_deferred, log_outcome, Server};
use crate::data::{Config, Plan, State};
use crate::datasource::{self, DataSource, DataSourceFactory};
use crate::diag::Diagnostics;
use crate::logging::KEY_DATA_SOURCE_TYPE;
use crate::registry::{Entry, Registrable};
use crate::schema::Schema;
use crate::types::{ClientCapabilities, ConfigureRequest, ConfigureResponse, Deferred};
use crate::validation;
use crate::value::Value;

/// Input of [`Server::validate_data_source_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateDataSourceConfigRequest {
    /// The data source type.
    pub type_name: String,
    /// The configuration to validate.
    pub config: Option<Value>,
}

/// Output of [`Server::validate_data_source_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateDataSourceConfigResponse {
    /// Validation problems.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::read_data_source`].
#[derive(Debug, Clone, Default)]
pub struct ReadDataSourceRequest {
    /// The data source type.
    pub type_name: String,
    /// The data source configuration.
    pub config: Option<Value>,
    /// Provider meta data from the configuration.
    pub provider_meta: Option<Value>,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`Server::read_data_source`].
#[derive(Debug, Clone, Default)]
pub struct ReadDataSourceResponse {
    /// The data read.
    pub state: Value,
    /// Diagnostics reported while reading.
    pub diagnostics: Diagnostics,
    /// Set when the read was postponed.
    pub deferred: Option<Deferred>,
}

impl Server {
    async fn resolve_data_source(
        &self,
        type_name: &str,
    ) -> (Option<(Entry<DataSourceFactory>, Arc<Schema>)>, Diagnostics) {
        self.resolve(&self.data_sources, type_name, || self.provider.data_sources()).await
    }

    async fn instantiate_data_source(
        &self,
        entry: &Entry<DataSourceFactory>,
        diags: &mut Diagnostics,
    ) -> Box<dyn DataSource> {
        let provider_data = self.configured.read().await.data_source_data.clone();
        let mut data_source = entry.factory.instantiate();

        if entry.capabilities.configure {
            if let Some(configurable) = data_source.as_configure() {
                let mut resp = ConfigureResponse::default();
                debug!("Calling provider defined DataSource Configure");
                configurable.configure(ConfigureRequest { provider_data }, &mut resp);
                debug!("Called provider defined DataSource Configure");
                diags.append(resp.diagnostics);
            }
        }

        data_source
    }

    /// Validate a data source configuration.
    #[instrument(skip(self, req, resp), name = "rpc.validate_data_source_config")]
    pub async fn validate_data_source_config(
        &self,
        req: Option<ValidateDataSourceConfigRequest>,
        resp: &mut ValidateDataSourceConfigResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_DATA_SOURCE_TYPE } = %req.type_name, "ValidateDataSourceConfig called");

        let (resolved, diags) = self.resolve_data_source(&req.type_name).await;
        resp.diagnostics.append(diags);
        let Some((entry, schema)) = resolved else { return };

        let data_source = self.instantiate_data_source(&entry, &mut resp.diagnostics).await;
        if resp.diagnostics.has_error() {
            return;
        }

        let Some(raw) = req.config else { return };
        resp.diagnostics.append(validation::validate(&schema, &raw));

        if entry.capabilities.validate_config {
            if let Some(validator) = data_source.as_validate_config() {
                let mut validate_resp = datasource::ValidateDataSourceConfigResponse::default();
                debug!("Calling provider defined DataSource ValidateConfig");
                validator
                    .validate_config(
                        datasource::ValidateDataSourceConfigRequest {
                            config: Config::new(raw, schema),
                        },
                        &mut validate_resp,
                    )
                    .await;
                debug!("Called provider defined DataSource ValidateConfig");
                resp.diagnostics.append(validate_resp.diagnostics);
            }
        }

        log_outcome("ValidateDataSourceConfig", &resp.diagnostics);
    }

    /// Read a data source.
    #[instrument(skip(self, req, resp), name = "rpc.read_data_source")]
    pub async fn read_data_source(&self, req: Option<ReadDataSourceRequest>, resp: &mut ReadDataSourceResponse) {
        let Some(req) = req else { return };
        debug!({ KEY_DATA_SOURCE_TYPE } = %req.type_name, "ReadDataSource called");

        let (resolved, diags) = self.resolve_data_source(&req.type_name).await;
        resp.diagnostics.append(diags);
        let Some((entry, schema)) = resolved else { return };

        let data_source = self.instantiate_data_source(&entry, &mut resp.diagnostics).await;
        if resp.diagnostics.has_error() {
            return;
        }

        let config = Config::new(req.config.unwrap_or_default(), schema.clone());

        if let Some(deferred) = self.provider_deferred(&req.client_capabilities).await {
            match mark_computed_nils_as_unknown(&config, &Plan::new(config.raw.clone(), schema)) {
                Ok(state) => {
                    resp.state = state;
                    resp.deferred = Some(deferred);
                },
                Err(err) => resp
                    .diagnostics
                    .push(err.into_framework_diagnostic("Error marking computed attributes as unknown")),
            }
            return;
        }

        let read_req = datasource::ReadDataSourceRequest {
            config: config.clone(),
            provider_meta: self.provider_meta(req.provider_meta),
            client_capabilities: req.client_capabilities,
        };
        let mut read_resp = datasource::ReadDataSourceResponse {
            state: State::null(schema.clone()),
            diagnostics: Diagnostics::new(),
            deferred: None,
        };

        debug!("Calling provider defined DataSource Read");
        data_source.read(read_req, &mut read_resp).await;
        debug!("Called provider defined DataSource Read");

        resp.diagnostics.append(read_resp.diagnostics);
        check_deferred(
            read_resp.deferred.as_ref(),
            &req.client_capabilities,
            "Data Source",
            &mut resp.diagnostics,
        );
        resp.deferred = read_resp.deferred;
        resp.state = read_resp.state.raw;

        if resp.diagnostics.has_error() {
            return;
        }

        apply_semantic_equality(&schema, &config.raw, &mut resp.state, &mut resp.diagnostics);
        log_outcome("ReadDataSource", &resp.diagnostics);
    }
}
