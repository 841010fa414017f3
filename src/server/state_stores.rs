//! State store RPCs.
//!
//! ConfigureStateStore initializes the store once and keeps the data it
//! returns; every later call hands that data to a fresh store instance
//! before running the operation.

use tracing::{debug, instrument};

use super::{log_outcome, Server};
use crate::data::Config;
use crate::diag::Diagnostics;
use crate::logging::KEY_STATE_STORE_TYPE;
use crate::registry::Registrable;
use crate::statestore::{self, StateStore};
use crate::types::{ClientCapabilities, ConfigureRequest, ConfigureResponse};
use crate::validation;
use crate::value::Value;

/// Input of [`Server::validate_state_store_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateStateStoreConfigRequest {
    /// The state store type.
    pub type_name: String,
    /// The configuration to validate.
    pub config: Option<Value>,
}

/// Output of [`Server::validate_state_store_config`].
#[derive(Debug, Clone, Default)]
pub struct ValidateStateStoreConfigResponse {
    /// Validation problems.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::configure_state_store`].
#[derive(Debug, Clone, Default)]
pub struct ConfigureStateStoreRequest {
    /// The state store type.
    pub type_name: String,
    /// The state store configuration.
    pub config: Option<Value>,
    /// Capabilities of the caller.
    pub client_capabilities: ClientCapabilities,
}

/// Output of [`Server::configure_state_store`].
#[derive(Debug, Clone, Default)]
pub struct ConfigureStateStoreResponse {
    /// Diagnostics reported while initializing.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::get_states`].
#[derive(Debug, Clone, Default)]
pub struct GetStatesRequest {
    /// The state store type.
    pub type_name: String,
}

/// Output of [`Server::get_states`].
#[derive(Debug, Clone, Default)]
pub struct GetStatesResponse {
    /// Identifiers of the stored states.
    pub state_ids: Vec<String>,
    /// Diagnostics reported while listing.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::read_state_bytes`].
#[derive(Debug, Clone, Default)]
pub struct ReadStateBytesRequest {
    /// The state store type.
    pub type_name: String,
    /// The state to read.
    pub state_id: String,
}

/// Output of [`Server::read_state_bytes`].
#[derive(Debug, Clone, Default)]
pub struct ReadStateBytesResponse {
    /// The stored document; empty when none exists.
    pub bytes: Vec<u8>,
    /// Diagnostics reported while reading.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::write_state_bytes`].
#[derive(Debug, Clone, Default)]
pub struct WriteStateBytesRequest {
    /// The state store type.
    pub type_name: String,
    /// The state to write.
    pub state_id: String,
    /// The full document.
    pub bytes: Vec<u8>,
}

/// Output of [`Server::write_state_bytes`].
#[derive(Debug, Clone, Default)]
pub struct WriteStateBytesResponse {
    /// Diagnostics reported while writing.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::lock_state`].
#[derive(Debug, Clone, Default)]
pub struct LockStateRequest {
    /// The state store type.
    pub type_name: String,
    /// The state to lock.
    pub state_id: String,
    /// The operation taking the lock.
    pub operation: String,
}

/// Output of [`Server::lock_state`].
#[derive(Debug, Clone, Default)]
pub struct LockStateResponse {
    /// Identifier of the acquired lock; empty when the store does not lock.
    pub lock_id: String,
    /// Diagnostics reported while locking.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::unlock_state`].
#[derive(Debug, Clone, Default)]
pub struct UnlockStateRequest {
    /// The state store type.
    pub type_name: String,
    /// The locked state.
    pub state_id: String,
    /// Identifier returned by LockState.
    pub lock_id: String,
}

/// Output of [`Server::unlock_state`].
#[derive(Debug, Clone, Default)]
pub struct UnlockStateResponse {
    /// Diagnostics reported while unlocking.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::delete_state`].
#[derive(Debug, Clone, Default)]
pub struct DeleteStateRequest {
    /// The state store type.
    pub type_name: String,
    /// The state to delete.
    pub state_id: String,
}

/// Output of [`Server::delete_state`].
#[derive(Debug, Clone, Default)]
pub struct DeleteStateResponse {
    /// Diagnostics reported while deleting.
    pub diagnostics: Diagnostics,
}

impl Server {
    /// A fresh store instance handed the data from initialization.
    async fn state_store(&self, type_name: &str, diags: &mut Diagnostics) -> Option<Box<dyn StateStore>> {
        let (resolved, resolve_diags) = self
            .resolve(&self.state_stores, type_name, || self.provider.state_stores())
            .await;
        diags.append(resolve_diags);
        let (entry, _) = resolved?;

        let provider_data = self.state_store_data.read().await.clone();
        let mut store = entry.factory.instantiate();

        if entry.capabilities.configure {
            if let Some(configurable) = store.as_configure() {
                let mut resp = ConfigureResponse::default();
                debug!("Calling provider defined StateStore Configure");
                configurable.configure(ConfigureRequest { provider_data }, &mut resp);
                debug!("Called provider defined StateStore Configure");
                diags.append(resp.diagnostics);
            }
        }

        if diags.has_error() {
            return None;
        }
        Some(store)
    }

    /// Validate a state store configuration.
    #[instrument(skip(self, req, resp), name = "rpc.validate_state_store_config")]
    pub async fn validate_state_store_config(
        &self,
        req: Option<ValidateStateStoreConfigRequest>,
        resp: &mut ValidateStateStoreConfigResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_STATE_STORE_TYPE } = %req.type_name, "ValidateStateStoreConfig called");

        let (resolved, diags) = self
            .resolve(&self.state_stores, &req.type_name, || self.provider.state_stores())
            .await;
        resp.diagnostics.append(diags);
        let Some((entry, schema)) = resolved else { return };

        let Some(raw) = req.config else { return };
        resp.diagnostics.append(validation::validate(&schema, &raw));

        if entry.capabilities.validate_config {
            let store = entry.factory.instantiate();
            if let Some(validator) = store.as_validate_config() {
                let mut validate_resp = statestore::ValidateStateStoreConfigResponse::default();
                debug!("Calling provider defined StateStore ValidateConfig");
                validator
                    .validate_config(
                        statestore::ValidateStateStoreConfigRequest {
                            config: Config::new(raw, schema),
                        },
                        &mut validate_resp,
                    )
                    .await;
                debug!("Called provider defined StateStore ValidateConfig");
                resp.diagnostics.append(validate_resp.diagnostics);
            }
        }

        log_outcome("ValidateStateStoreConfig", &resp.diagnostics);
    }

    /// Initialize a state store and keep the data it produces.
    #[instrument(skip(self, req, resp), name = "rpc.configure_state_store")]
    pub async fn configure_state_store(
        &self,
        req: Option<ConfigureStateStoreRequest>,
        resp: &mut ConfigureStateStoreResponse,
    ) {
        let Some(req) = req else { return };
        debug!({ KEY_STATE_STORE_TYPE } = %req.type_name, "ConfigureStateStore called");

        let (resolved, diags) = self
            .resolve(&self.state_stores, &req.type_name, || self.provider.state_stores())
            .await;
        resp.diagnostics.append(diags);
        let Some((entry, schema)) = resolved else { return };

        let store = entry.factory.instantiate();
        let provider_data = self.configured.read().await.state_store_data.clone();
        let mut init_resp = statestore::InitializeResponse::default();

        debug!("Calling provider defined StateStore Initialize");
        store
            .initialize(
                statestore::InitializeRequest {
                    config: Config::new(req.config.unwrap_or_default(), schema),
                    provider_data,
                    client_capabilities: req.client_capabilities,
                },
                &mut init_resp,
            )
            .await;
        debug!("Called provider defined StateStore Initialize");

        resp.diagnostics.append(init_resp.diagnostics);
        if resp.diagnostics.has_error() {
            return;
        }

        *self.state_store_data.write().await = init_resp.state_store_data;
        log_outcome("ConfigureStateStore", &resp.diagnostics);
    }

    /// List the stored states.
    #[instrument(skip(self, req, resp), name = "rpc.get_states")]
    pub async fn get_states(&self, req: Option<GetStatesRequest>, resp: &mut GetStatesResponse) {
        let Some(req) = req else { return };
        debug!({ KEY_STATE_STORE_TYPE } = %req.type_name, "GetStates called");

        let Some(store) = self.state_store(&req.type_name, &mut resp.diagnostics).await else { return };

        let mut states_resp = statestore::GetStatesResponse::default();
        store.get_states(&mut states_resp).await;

        resp.state_ids = states_resp.state_ids;
        resp.diagnostics.append(states_resp.diagnostics);
        log_outcome("GetStates", &resp.diagnostics);
    }

    /// Read a state document.
    #[instrument(skip(self, req, resp), name = "rpc.read_state_bytes")]
    pub async fn read_state_bytes(&self, req: Option<ReadStateBytesRequest>, resp: &mut ReadStateBytesResponse) {
        let Some(req) = req else { return };
        debug!({ KEY_STATE_STORE_TYPE } = %req.type_name, state_id = %req.state_id, "ReadStateBytes called");

        let Some(store) = self.state_store(&req.type_name, &mut resp.diagnostics).await else { return };

        let mut read_resp = statestore::ReadStateResponse::default();
        store
            .read(statestore::ReadStateRequest { state_id: req.state_id }, &mut read_resp)
            .await;

        resp.bytes = read_resp.state_bytes;
        resp.diagnostics.append(read_resp.diagnostics);
        log_outcome("ReadStateBytes", &resp.diagnostics);
    }

    /// Replace a state document.
    #[instrument(skip(self, req, resp), name = "rpc.write_state_bytes")]
    pub async fn write_state_bytes(&self, req: Option<WriteStateBytesRequest>, resp: &mut WriteStateBytesResponse) {
        let Some(req) = req else { return };
        debug!(
            { KEY_STATE_STORE_TYPE } = %req.type_name,
            state_id = %req.state_id,
            bytes = req.bytes.len(),
            "WriteStateBytes called"
        );

        let Some(store) = self.state_store(&req.type_name, &mut resp.diagnostics).await else { return };

        let mut write_resp = statestore::WriteStateResponse::default();
        store
            .write(
                statestore::WriteStateRequest {
                    state_id: req.state_id,
                    state_bytes: req.bytes,
                },
                &mut write_resp,
            )
            .await;

        resp.diagnostics.append(write_resp.diagnostics);
        log_outcome("WriteStateBytes", &resp.diagnostics);
    }

    /// Lock a state.
    #[instrument(skip(self, req, resp), name = "rpc.lock_state")]
    pub async fn lock_state(&self, req: Option<LockStateRequest>, resp: &mut LockStateResponse) {
        let Some(req) = req else { return };
        debug!({ KEY_STATE_STORE_TYPE } = %req.type_name, state_id = %req.state_id, "LockState called");

        let Some(store) = self.state_store(&req.type_name, &mut resp.diagnostics).await else { return };

        let mut lock_resp = statestore::LockResponse::default();
        store
            .lock(
                statestore::LockRequest {
                    state_id: req.state_id,
                    operation: req.operation,
                },
                &mut lock_resp,
            )
            .await;

        resp.lock_id = lock_resp.lock_id;
        resp.diagnostics.append(lock_resp.diagnostics);
        log_outcome("LockState", &resp.diagnostics);
    }

    /// Release a lock.
    #[instrument(skip(self, req, resp), name = "rpc.unlock_state")]
    pub async fn unlock_state(&self, req: Option<UnlockStateRequest>, resp: &mut UnlockStateResponse) {
        let Some(req) = req else { return };
        debug!({ KEY_STATE_STORE_TYPE } = %req.type_name, state_id = %req.state_id, "UnlockState called");

        let Some(store) = self.state_store(&req.type_name, &mut resp.diagnostics).await else { return };

        let mut unlock_resp = statestore::UnlockResponse::default();
        store
            .unlock(
                statestore::UnlockRequest {
                    state_id: req.state_id,
                    lock_id: req.lock_id,
                },
                &mut unlock_resp,
            )
            .await;

        resp.diagnostics.append(unlock_resp.diagnostics);
        log_outcome("UnlockState", &resp.diagnostics);
    }

    /// Delete a state document.
    #[instrument(skip(self, req, resp), name = "rpc.delete_state")]
    pub async fn delete_state(&self, req: Option<DeleteStateRequest>, resp: &mut DeleteStateResponse) {
        let Some(req) = req else { return };
        debug!({ KEY_STATE_STORE_TYPE } = %req.type_name, state_id = %req.state_id, "DeleteState called");

        let Some(store) = self.state_store(&req.type_name, &mut resp.diagnostics).await else { return };

        let mut delete_resp = statestore::DeleteStateResponse::default();
        store
            .delete_state(statestore::DeleteStateRequest { state_id: req.state_id }, &mut delete_resp)
            .await;

        resp.diagnostics.append(delete_resp.diagnostics);
        log_outcome("DeleteState", &resp.diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::fixtures::*;
    use serde_json::json;

    const STORE: &str = "test_memory";

    async fn configured_server() -> Server {
        let server = Server::new(TestProvider::default());
        configure(&server, false).await;

        let mut resp = ConfigureStateStoreResponse::default();
        server
            .configure_state_store(
                Some(ConfigureStateStoreRequest {
                    type_name: STORE.to_string(),
                    config: Some(Value::from(json!({"namespace": "ci"}))),
                    ..Default::default()
                }),
                &mut resp,
            )
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        server
    }

    async fn write(server: &Server, state_id: &str, bytes: &[u8]) -> WriteStateBytesResponse {
        let mut resp = WriteStateBytesResponse::default();
        server
            .write_state_bytes(
                Some(WriteStateBytesRequest {
                    type_name: STORE.to_string(),
                    state_id: state_id.to_string(),
                    bytes: bytes.to_vec(),
                }),
                &mut resp,
            )
            .await;
        resp
    }

    async fn read(server: &Server, state_id: &str) -> ReadStateBytesResponse {
        let mut resp = ReadStateBytesResponse::default();
        server
            .read_state_bytes(
                Some(ReadStateBytesRequest {
                    type_name: STORE.to_string(),
                    state_id: state_id.to_string(),
                }),
                &mut resp,
            )
            .await;
        resp
    }

    async fn lock(server: &Server, state_id: &str) -> LockStateResponse {
        let mut resp = LockStateResponse::default();
        server
            .lock_state(
                Some(LockStateRequest {
                    type_name: STORE.to_string(),
                    state_id: state_id.to_string(),
                    operation: "apply".to_string(),
                }),
                &mut resp,
            )
            .await;
        resp
    }

    #[tokio::test]
    async fn test_validate_state_store_config() {
        let server = Server::new(TestProvider::default());
        let mut resp = ValidateStateStoreConfigResponse::default();
        server
            .validate_state_store_config(
                Some(ValidateStateStoreConfigRequest {
                    type_name: STORE.to_string(),
                    config: Some(Value::from(json!({}))),
                }),
                &mut resp,
            )
            .await;

        assert_eq!(
            resp.diagnostics.iter().next().unwrap().summary,
            "Missing Configuration for Required Attribute"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_store_is_rejected() {
        let server = Server::new(TestProvider::default());
        let resp = read(&server, "default").await;
        assert_eq!(resp.diagnostics.iter().next().unwrap().summary, "State Store Not Initialized");
    }

    #[tokio::test]
    async fn test_write_read_list_delete() {
        let server = configured_server().await;

        assert!(write(&server, "default", b"{\"version\":4}").await.diagnostics.is_empty());
        assert!(write(&server, "staging", b"{}").await.diagnostics.is_empty());

        let resp = read(&server, "default").await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.bytes, b"{\"version\":4}".to_vec());

        let mut states = GetStatesResponse::default();
        server
            .get_states(
                Some(GetStatesRequest {
                    type_name: STORE.to_string(),
                }),
                &mut states,
            )
            .await;
        assert_eq!(states.state_ids, vec!["ci/default".to_string(), "ci/staging".to_string()]);

        let mut deleted = DeleteStateResponse::default();
        server
            .delete_state(
                Some(DeleteStateRequest {
                    type_name: STORE.to_string(),
                    state_id: "staging".to_string(),
                }),
                &mut deleted,
            )
            .await;
        assert!(deleted.diagnostics.is_empty());
        assert!(read(&server, "staging").await.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_lock_unlock() {
        let server = configured_server().await;

        let first = lock(&server, "default").await;
        assert!(first.diagnostics.is_empty());
        assert!(!first.lock_id.is_empty());

        let second = lock(&server, "default").await;
        assert_eq!(second.diagnostics.iter().next().unwrap().summary, "State Locked");

        let mut unlocked = UnlockStateResponse::default();
        server
            .unlock_state(
                Some(UnlockStateRequest {
                    type_name: STORE.to_string(),
                    state_id: "default".to_string(),
                    lock_id: first.lock_id,
                }),
                &mut unlocked,
            )
            .await;
        assert!(unlocked.diagnostics.is_empty());

        assert!(lock(&server, "default").await.diagnostics.is_empty());
    }
}
