//! State store contract.
//!
//! A state store keeps the orchestrator's state documents. The store is
//! initialized once through ConfigureStateStore; the data it produces is
//! handed to every later store instance through [`StateStoreWithConfigure`].
//! State documents are opaque bytes identified by a state id.

use std::sync::Arc;

use async_trait::async_trait;

use crate::data::Config;
use crate::diag::Diagnostics;
use crate::types::{
    ClientCapabilities, ConfigureRequest, ConfigureResponse, MetadataRequest, MetadataResponse,
    SchemaResponse, SharedData,
};

/// Factory producing a fresh state store instance.
pub type StateStoreFactory = Arc<dyn Fn() -> Box<dyn StateStore> + Send + Sync>;

/// Wrap a constructor into a [`StateStoreFactory`].
pub fn factory<T, F>(make: F) -> StateStoreFactory
where
    T: StateStore + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Arc::new(move || Box::new(make()))
}

/// Input of [`StateStore::initialize`].
#[derive(Clone)]
pub struct InitializeRequest {
    /// The state store configuration.
    pub config: Config,
    /// Data from provider configuration.
    pub provider_data: Option<SharedData>,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

impl std::fmt::Debug for InitializeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializeRequest")
            .field("config", &self.config)
            .field("provider_data", &self.provider_data.is_some())
            .field("client_capabilities", &self.client_capabilities)
            .finish()
    }
}

/// Output of [`StateStore::initialize`].
#[derive(Default)]
pub struct InitializeResponse {
    /// Data handed to later store instances.
    pub state_store_data: Option<SharedData>,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Output of [`StateStore::get_states`].
#[derive(Debug, Clone, Default)]
pub struct GetStatesResponse {
    /// Identifiers of the stored states.
    pub state_ids: Vec<String>,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`StateStore::read`].
#[derive(Debug, Clone)]
pub struct ReadStateRequest {
    /// The state to read.
    pub state_id: String,
}

/// Output of [`StateStore::read`].
#[derive(Debug, Clone, Default)]
pub struct ReadStateResponse {
    /// The stored document, empty when none exists.
    pub state_bytes: Vec<u8>,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`StateStore::write`].
#[derive(Debug, Clone)]
pub struct WriteStateRequest {
    /// The state to write.
    pub state_id: String,
    /// The full document.
    pub state_bytes: Vec<u8>,
}

/// Output of [`StateStore::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteStateResponse {
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`StateStore::lock`].
#[derive(Debug, Clone)]
pub struct LockRequest {
    /// The state to lock.
    pub state_id: String,
    /// The operation taking the lock, for lock info.
    pub operation: String,
}

/// Output of [`StateStore::lock`].
#[derive(Debug, Clone, Default)]
pub struct LockResponse {
    /// Identifier of the acquired lock. Empty when locking is not supported.
    pub lock_id: String,
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`StateStore::unlock`].
#[derive(Debug, Clone)]
pub struct UnlockRequest {
    /// The locked state.
    pub state_id: String,
    /// Identifier returned by the lock call.
    pub lock_id: String,
}

/// Output of [`StateStore::unlock`].
#[derive(Debug, Clone, Default)]
pub struct UnlockResponse {
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`StateStore::delete_state`].
#[derive(Debug, Clone)]
pub struct DeleteStateRequest {
    /// The state to delete.
    pub state_id: String,
}

/// Output of [`StateStore::delete_state`].
#[derive(Debug, Clone, Default)]
pub struct DeleteStateResponse {
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// Input of [`StateStoreWithValidateConfig::validate_config`].
#[derive(Debug, Clone)]
pub struct ValidateStateStoreConfigRequest {
    /// The configuration to validate.
    pub config: Config,
}

/// Output of [`StateStoreWithValidateConfig::validate_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateStateStoreConfigResponse {
    /// Diagnostics reported by the provider.
    pub diagnostics: Diagnostics,
}

/// A state store type.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Report the state store type name.
    fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse);

    /// Report the state store schema.
    fn schema(&self, resp: &mut SchemaResponse);

    /// Set the store up from its configuration.
    async fn initialize(&self, req: InitializeRequest, resp: &mut InitializeResponse);

    /// List stored states.
    async fn get_states(&self, resp: &mut GetStatesResponse);

    /// Read a state document.
    async fn read(&self, req: ReadStateRequest, resp: &mut ReadStateResponse);

    /// Replace a state document.
    async fn write(&self, req: WriteStateRequest, resp: &mut WriteStateResponse);

    /// Lock a state.
    async fn lock(&self, req: LockRequest, resp: &mut LockResponse);

    /// Release a lock.
    async fn unlock(&self, req: UnlockRequest, resp: &mut UnlockResponse);

    /// Delete a state document.
    async fn delete_state(&self, req: DeleteStateRequest, resp: &mut DeleteStateResponse);

    /// Receive the data produced by [`StateStore::initialize`].
    fn as_configure(&mut self) -> Option<&mut dyn StateStoreWithConfigure> {
        None
    }

    /// Validate configuration beyond what the schema expresses.
    fn as_validate_config(&self) -> Option<&dyn StateStoreWithValidateConfig> {
        None
    }
}

/// Receives the data produced by initialization.
pub trait StateStoreWithConfigure: Send + Sync {
    /// Store what the instance needs from `req.provider_data`.
    fn configure(&mut self, req: ConfigureRequest, resp: &mut ConfigureResponse);
}

/// Validates configuration.
#[async_trait]
pub trait StateStoreWithValidateConfig: Send + Sync {
    /// Report problems with `req.config`.
    async fn validate_config(
        &self,
        req: ValidateStateStoreConfigRequest,
        resp: &mut ValidateStateStoreConfigResponse,
    );
}

/// Optional behavior of a state store type, resolved once at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateStoreCapabilities {
    /// Implements [`StateStoreWithConfigure`].
    pub configure: bool,
    /// Implements [`StateStoreWithValidateConfig`].
    pub validate_config: bool,
}

impl StateStoreCapabilities {
    /// Inspect the optional behavior of `store`.
    pub fn of(store: &mut dyn StateStore) -> Self {
        Self {
            configure: store.as_configure().is_some(),
            validate_config: store.as_validate_config().is_some(),
        }
    }
}
