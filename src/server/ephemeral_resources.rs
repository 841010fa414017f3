//! Ephemeral resource RPCs.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, instrument};

use super::plan::mark_computed_nils_as_unknown;
use super::{check_deferred, decode_private, encode_private, log_outcome, Server};
use crate::data::{Config, Plan, State};
use crate::diag::Diagnostics;
use crate::ephemeral::{
    CloseRequest, CloseResponse, EphemeralResource, EphemeralResourceFactory, OpenRequest, OpenResponse,
    RenewRequest, RenewResponse, ValidateEphemeralConfigRequest, ValidateEphemeralConfigResponse,
};
use crate::logging::KEY_EPHEMERAL_RESOURCE_TYPE;
use crate::private_state::{PrivateState, ProviderData};
use crate::registry::{Entry, Registrable};
use crate::schema::Schema;
use crate::types::{ClientCapabilities, ConfigureRequest, ConfigureResponse, Deferred};
use crate::validation;
use crate::value::Value;

/// Input of [`Server::validate_ephemeral_resource_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateEphemeralResourceConfigRequest {
    /// The ephemeral resource type.
    pub type_name: String,
    /// The configuration to validate.
    pub config: Option<Value>,
}

/// Output of [`Server::validate_ephemeral_resource_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateEphemeralResourceConfigResponse {
    /// Validation problems.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::open_ephemeral_resource`].
#[derive(Debug, Clone, Default)]
pub struct OpenEphemeralResourceRequest {
    /// The ephemeral resource type.
    pub type_name: String,
    /// The ephemeral resource configuration.
    pub config: Option<Value>,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`Server::open_ephemeral_resource`].
#[derive(Debug, Clone, Default)]
pub struct OpenEphemeralResourceResponse {
    /// The opened value.
    pub result: Value,
    /// Private bytes to pass to Renew and Close.
    pub private: Vec<u8>,
    /// When Renew must be called, if ever.
    pub renew_at: Option<SystemTime>,
    /// Diagnostics reported while opening.
    pub diagnostics: Diagnostics,
    /// Set when the open was postponed.
    pub deferred: Option<Deferred>,
}

/// Input of [`Server::renew_ephemeral_resource`].
#[derive(Debug, Clone, Default)]
pub struct RenewEphemeralResourceRequest {
    /// The ephemeral resource type.
    pub type_name: String,
    /// Private bytes from Open or the previous Renew.
    pub private: Vec<u8>,
}

/// Output of [`Server::renew_ephemeral_resource`].
#[derive(Debug, Clone, Default)]
pub struct RenewEphemeralResourceResponse {
    /// Private bytes for later calls.
    pub private: Vec<u8>,
    /// When Renew must be called again, if ever.
    pub renew_at: Option<SystemTime>,
    /// Diagnostics reported while renewing.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::close_ephemeral_resource`].
#[derive(Debug, Clone, Default)]
pub struct CloseEphemeralResourceRequest {
    /// The ephemeral resource type.
    pub type_name: String,
    /// Private bytes from Open or the last Renew.
    pub private: Vec<u8>,
}

/// Output of [`Server::close_ephemeral_resource`].
#[derive(Debug, Clone, Default)]
pub struct CloseEphemeralResourceResponse {
    /// Diagnostics reported while closing.
    pub diagnostics: Diagnostics,
}

impl Server {
    async fn resolve_ephemeral_resource(
        &self,
        type_name: &str,
    ) -> (Option<(Entry<EphemeralResourceFactory>, Arc<Schema>)>, Diagnostics) {
        self.resolve(&self.ephemeral_resources, type_name, || self.provider.ephemeral_resources())
            .await
    }

    async fn instantiate_ephemeral_resource(
        &self,
        entry: &Entry<EphemeralResourceFactory>,
        diags: &mut Diagnostics,
    ) -> Box<dyn EphemeralResource> {
        let provider_data = self.configured.read().await.ephemeral_resource_data.clone();
        let mut resource = entry.factory.instantiate();

        if entry.capabilities.configure {
            if let Some(configurable) = resource.as_configure() {
                let mut resp = ConfigureResponse::default();
                debug!("Calling provider defined EphemeralResource Configure");
                configurable.configure(ConfigureRequest { provider_data }, &mut resp);
                debug!("Called provider defined EphemeralResource Configure");
                diags.append(resp.diagnostics);
            }
        }

        resource
    }

    /// Validate an ephemeral resource configuration.
    #[instrument(skip(self, req, resp), name = "rpc.validate_ephemeral_resource_config")]
    pub async fn validate_ephemeral_resource_config(
        &self,
        req: Option<ValidateEphemeralResourceConfigRequest>,
        resp: &mut ValidateEphemeralResourceConfigResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_EPHEMERAL_RESOURCE_TYPE } = %req.type_name, "ValidateEphemeralResourceConfig called");

        let (resolved, diags) = self.resolve_ephemeral_resource(&req.type_name).await;
        resp.diagnostics.append(diags);
        let Some((entry, schema)) = resolved else { return };

        let resource = self.instantiate_ephemeral_resource(&entry, &mut resp.diagnostics).await;
        if resp.diagnostics.has_error() {
            return;
        }

        let Some(raw) = req.config else { return };
        resp.diagnostics.append(validation::validate(&schema, &raw));

        if entry.capabilities.validate_config {
            if let Some(validator) = resource.as_validate_config() {
                let mut validate_resp = ValidateEphemeralConfigResponse::default();
                debug!("Calling provider defined EphemeralResource ValidateConfig");
                validator
                    .validate_config(
                        ValidateEphemeralConfigRequest {
                            config: Config::new(raw, schema),
                        },
                        &mut validate_resp,
                    )
                    .await;
                debug!("Called provider defined EphemeralResource ValidateConfig");
                resp.diagnostics.append(validate_resp.diagnostics);
            }
        }

        log_outcome("ValidateEphemeralResourceConfig", &resp.diagnostics);
    }

    /// Open an ephemeral resource.
    #[instrument(skip(self, req, resp), name = "rpc.open_ephemeral_resource")]
    pub async fn open_ephemeral_resource(
        &self,
        req: Option<OpenEphemeralResourceRequest>,
        resp: &mut OpenEphemeralResourceResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_EPHEMERAL_RESOURCE_TYPE } = %req.type_name, "OpenEphemeralResource called");

        let (resolved, diags) = self.resolve_ephemeral_resource(&req.type_name).await;
        resp.diagnostics.append(diags);
        let Some((entry, schema)) = resolved else { return };

        let resource = self.instantiate_ephemeral_resource(&entry, &mut resp.diagnostics).await;
        if resp.diagnostics.has_error() {
            return;
        }

        let config = Config::new(req.config.unwrap_or_default(), schema.clone());

        if let Some(deferred) = self.provider_deferred(&req.client_capabilities).await {
            match mark_computed_nils_as_unknown(&config, &Plan::new(config.raw.clone(), schema)) {
                Ok(result) => {
                    resp.result = result;
                    resp.deferred = Some(deferred);
                },
                Err(err) => resp
                    .diagnostics
                    .push(err.into_framework_diagnostic("Error marking computed attributes as unknown")),
            }
            return;
        }

        let open_req = OpenRequest {
            config,
            client_capabilities: req.client_capabilities,
        };
        let mut open_resp = OpenResponse {
            result: State::null(schema),
            private: ProviderData::new(),
            renew_at: None,
            diagnostics: Diagnostics::new(),
            deferred: None,
        };

        debug!("Calling provider defined EphemeralResource Open");
        resource.open(open_req, &mut open_resp).await;
        debug!("Called provider defined EphemeralResource Open");

        resp.diagnostics.append(open_resp.diagnostics);
        check_deferred(
            open_resp.deferred.as_ref(),
            &req.client_capabilities,
            "Ephemeral Resource",
            &mut resp.diagnostics,
        );
        if resp.diagnostics.has_error() {
            return;
        }

        let private = PrivateState {
            provider: open_resp.private,
            ..PrivateState::default()
        };
        resp.private = encode_private(&private, &mut resp.diagnostics);
        resp.result = open_resp.result.raw;
        resp.renew_at = open_resp.renew_at;
        resp.deferred = open_resp.deferred;

        log_outcome("OpenEphemeralResource", &resp.diagnostics);
    }

    /// Renew an opened ephemeral resource.
    #[instrument(skip(self, req, resp), name = "rpc.renew_ephemeral_resource")]
    pub async fn renew_ephemeral_resource(
        &self,
        req: Option<RenewEphemeralResourceRequest>,
        resp: &mut RenewEphemeralResourceResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_EPHEMERAL_RESOURCE_TYPE } = %req.type_name, "RenewEphemeralResource called");

        let (resolved, diags) = self.resolve_ephemeral_resource(&req.type_name).await;
        resp.diagnostics.append(diags);
        let Some((entry, _)) = resolved else { return };

        let resource = self.instantiate_ephemeral_resource(&entry, &mut resp.diagnostics).await;
        let mut private = decode_private(&req.private, &mut resp.diagnostics);
        if resp.diagnostics.has_error() {
            return;
        }

        let renewer = match resource.as_renew() {
            Some(renewer) if entry.capabilities.renew => renewer,
            _ => {
                resp.diagnostics.add_error(
                    "Ephemeral Resource Renew Not Implemented",
                    "This ephemeral resource does not support renew. \
                     This is always an issue with the provider and should be reported to the provider developers.",
                );
                return;
            },
        };

        let mut renew_resp = RenewResponse {
            private: private.provider.clone(),
            ..RenewResponse::default()
        };

        debug!("Calling provider defined EphemeralResource Renew");
        renewer
            .renew(
                RenewRequest {
                    private: private.provider.clone(),
                },
                &mut renew_resp,
            )
            .await;
        debug!("Called provider defined EphemeralResource Renew");

        resp.diagnostics.append(renew_resp.diagnostics);
        resp.renew_at = renew_resp.renew_at;
        private.provider = renew_resp.private;
        resp.private = encode_private(&private, &mut resp.diagnostics);

        log_outcome("RenewEphemeralResource", &resp.diagnostics);
    }

    /// Close an opened ephemeral resource.
    #[instrument(skip(self, req, resp), name = "rpc.close_ephemeral_resource")]
    pub async fn close_ephemeral_resource(
        &self,
        req: Option<CloseEphemeralResourceRequest>,
        resp: &mut CloseEphemeralResourceResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_EPHEMERAL_RESOURCE_TYPE } = %req.type_name, "CloseEphemeralResource called");

        let (resolved, diags) = self.resolve_ephemeral_resource(&req.type_name).await;
        resp.diagnostics.append(diags);
        let Some((entry, _)) = resolved else { return };

        let resource = self.instantiate_ephemeral_resource(&entry, &mut resp.diagnostics).await;
        let private = decode_private(&req.private, &mut resp.diagnostics);
        if resp.diagnostics.has_error() {
            return;
        }

        let closer = match resource.as_close() {
            Some(closer) if entry.capabilities.close => closer,
            _ => {
                resp.diagnostics.add_error(
                    "Ephemeral Resource Close Not Implemented",
                    "This ephemeral resource does not support close. \
                     This is always an issue with the provider and should be reported to the provider developers.",
                );
                return;
            },
        };

        let mut close_resp = CloseResponse::default();
        debug!("Calling provider defined EphemeralResource Close");
        closer
            .close(
                CloseRequest {
                    private: private.provider,
                },
                &mut close_resp,
            )
            .await;
        debug!("Called provider defined EphemeralResource Close");

        resp.diagnostics.append(close_resp.diagnostics);
        log_outcome("CloseEphemeralResource", &resp.diagnostics);
    }
}
