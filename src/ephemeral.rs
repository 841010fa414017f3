//! Ephemeral resource contract.
//!
//! Ephemeral resources are opened for the duration of one operation and
//! never stored in state. They may need to be renewed while in use and
//! closed afterwards; both are optional capabilities, but the framework
//! reports an error when Renew or Close is requested for a type that does
//! not implement it.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::data::{Config, State};
use crate::diag::Diagnostics;
use crate::private_state::ProviderData;
use crate::types::{
    ClientCapabilities, ConfigureRequest, ConfigureResponse, Deferred, MetadataRequest,
    MetadataResponse, SchemaResponse,
};

/// Factory producing a fresh ephemeral resource instance.
pub type EphemeralResourceFactory = Arc<dyn Fn() -> Box<dyn EphemeralResource> + Send + Sync>;

/// Wrap a constructor into a [`EphemeralResourceFactory`].
pub fn factory<T, F>(make: F) -> EphemeralResourceFactory
where
    T: EphemeralResource + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Arc::new(move || Box::new(make()))
}

/// Input of [`EphemeralResource::open`].
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// The ephemeral resource configuration.
    pub config: Config,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`EphemeralResource::open`].
#[derive(Debug, Clone)]
pub struct OpenResponse {
    /// The opened value. Starts null.
    pub result: State,
    /// Private data passed to later Renew and Close calls.
    pub private: ProviderData,
    /// When the caller must call Renew, if ever.
    pub renew_at: Option<SystemTime>,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
    /// Set to postpone the open. Only legal when deferral is allowed.
    pub deferred: Option<Deferred>,
}

/// Input of [`EphemeralResourceWithRenew::renew`].
#[derive(Debug, Clone)]
pub struct RenewRequest {
    /// Private data from Open or the previous Renew.
    pub private: ProviderData,
}

/// Output of [`EphemeralResourceWithRenew::renew`].
#[derive(Debug, Clone, Default)]
pub struct RenewResponse {
    /// When the caller must call Renew again, if ever.
    pub renew_at: Option<SystemTime>,
    /// Private data for later calls.
    pub private: ProviderData,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`EphemeralResourceWithClose::close`].
#[derive(Debug, Clone)]
pub struct CloseRequest {
    /// Private data from Open or the last Renew.
    pub private: ProviderData,
}

/// Output of [`EphemeralResourceWithClose::close`].
#[derive(Debug, Clone, Default)]
pub struct CloseResponse {
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`EphemeralResourceWithValidateConfig::validate_config`].
#[derive(Debug, Clone)]
pub struct ValidateEphemeralConfigRequest {
    /// The configuration to validate.
    pub config: Config,
}

/// Output of [`EphemeralResourceWithValidateConfig::validate_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateEphemeralConfigResponse {
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// An ephemeral resource type.
#[async_trait]
pub trait EphemeralResource: Send + Sync {
    /// Report the ephemeral resource type name.
    fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse);

    /// Report the ephemeral resource schema.
    fn schema(&self, resp: &mut SchemaResponse);

    /// Open the resource.
    async fn open(&self, req: OpenRequest, resp: &mut OpenResponse);

    /// Receive provider configured data before any other callback.
    fn as_configure(&mut self) -> Option<&mut dyn EphemeralResourceWithConfigure> {
        None
    }

    /// Extend the lifetime of an opened resource.
    fn as_renew(&self) -> Option<&dyn EphemeralResourceWithRenew> {
        None
    }

    /// Release an opened resource.
    fn as_close(&self) -> Option<&dyn EphemeralResourceWithClose> {
        None
    }

    /// Validate configuration beyond what the schema expresses.
    fn as_validate_config(&self) -> Option<&dyn EphemeralResourceWithValidateConfig> {
        None
    }
}

/// Receives provider configured data.
pub trait EphemeralResourceWithConfigure: Send + Sync {
    /// Store what the ephemeral resource needs from `req.provider_data`.
    fn configure(&mut self, req: ConfigureRequest, resp: &mut ConfigureResponse);
}

/// Renews opened resources.
#[async_trait]
pub trait EphemeralResourceWithRenew: Send + Sync {
    /// Renew the resource described by `req.private`.
    async fn renew(&self, req: RenewRequest, resp: &mut RenewResponse);
}

/// Closes opened resources.
#[async_trait]
pub trait EphemeralResourceWithClose: Send + Sync {
    /// Close the resource described by `req.private`.
    async fn close(&self, req: CloseRequest, resp: &mut CloseResponse);
}

/// Validates configuration.
#[async_trait]
pub trait EphemeralResourceWithValidateConfig: Send + Sync {
    /// Report problems with `req.config`.
    async fn validate_config(
        &self,
        req: ValidateEphemeralConfigRequest,
        resp: &mut ValidateEphemeralConfigResponse,
    );
}

/// Optional behavior of an ephemeral resource type, resolved once at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EphemeralResourceCapabilities {
    /// Implements [`EphemeralResourceWithConfigure`].
    pub configure: bool,
    /// Implements [`EphemeralResourceWithRenew`].
    pub renew: bool,
    /// Implements [`EphemeralResourceWithClose`].
    pub close: bool,
    /// Implements [`EphemeralResourceWithValidateConfig`].
    pub validate_config: bool,
}

impl EphemeralResourceCapabilities {
    /// Inspect the optional behavior of `resource`.
    pub fn of(resource: &mut dyn EphemeralResource) -> Self {
        Self {
            configure: resource.as_configure().is_some(),
            renew: resource.as_renew().is_some(),
            close: resource.as_close().is_some(),
            validate_config: resource.as_validate_config().is_some(),
        }
    }
}
