//! A small provider exercising every server RPC group.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::json;

use super::{ConfigureProviderRequest, ConfigureProviderResponse, Server};
use crate::datasource::{self, DataSource, DataSourceWithConfigure};
use crate::ephemeral::{
    self, EphemeralResource, EphemeralResourceWithConfigure, EphemeralResourceWithRenew, OpenRequest, OpenResponse,
    RenewRequest, RenewResponse,
};
use crate::function::{
    self, DefinitionResponse, FuncError, Function, FunctionDefinition, FunctionMetadataResponse, Parameter, RunRequest,
    RunResponse,
};
use crate::path::AttributePath;
use crate::provider::{self, Provider, ProviderMetadataResponse, ProviderWithValidateConfig};
use crate::resource::{
    self, import_state_passthrough_id, CreateRequest, CreateResponse, DeleteRequest, DeleteResponse,
    ImportStateRequest, ImportStateResponse, ModifyPlanRequest, ModifyPlanResponse, ReadRequest, ReadResponse,
    Resource, ResourceWithConfigure, ResourceWithImportState, ResourceWithModifyPlan, ResourceWithUpgradeState,
    ResourceWithValidateConfig, StateUpgrader, UpdateRequest, UpdateResponse, ValidateConfigRequest,
    ValidateConfigResponse,
};
use crate::schema::{Attribute, AttributeType, Schema};
use crate::semantic::NumericStringEquality;
use crate::statestore::{self, StateStore, StateStoreWithConfigure};
use crate::types::{
    ClientCapabilities, ConfigureRequest, ConfigureResponse, Deferred, DeferredReason, MetadataRequest,
    MetadataResponse, SchemaResponse, SharedData,
};
use crate::value::{Value, UNKNOWN_VALUE_SENTINEL};

/// The unknown value as it appears in JSON test input.
pub(crate) const UNKNOWN: &str = UNKNOWN_VALUE_SENTINEL;

/// Configure `server` with region `eu-west-1`.
pub(crate) async fn configure(server: &Server, deferral_allowed: bool) {
    let mut resp = ConfigureProviderResponse::default();
    server
        .configure_provider(
            Some(ConfigureProviderRequest {
                config: Some(Value::from(json!({"region": "eu-west-1"}))),
                hemmer_version: "1.0.0".to_string(),
                client_capabilities: ClientCapabilities { deferral_allowed },
            }),
            &mut resp,
        )
        .await;
    assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
}

struct Region(String);

fn region_of(data: Option<SharedData>) -> Option<String> {
    data.and_then(|data| data.downcast_ref::<Region>().map(|region| region.0.clone()))
}

fn string_at(value: &Value, name: &str) -> Option<String> {
    value.get(name).and_then(Value::as_str).map(str::to_string)
}

fn one_decimal(value: &Value) -> Value {
    match value.as_str().and_then(|s| s.parse::<f64>().ok()) {
        Some(n) => Value::from(format!("{:.1}", n)),
        None => value.clone(),
    }
}

fn set(value: &mut Value, name: &str, new: Value) {
    if let Value::Map(entries) = value {
        entries.insert(name.to_string(), new);
    }
}

// =========================================================================
// Provider
// =========================================================================

#[derive(Default)]
pub(crate) struct TestProvider {
    pub defer: Option<Deferred>,
    pub duplicate_resource: bool,
}

#[async_trait]
impl Provider for TestProvider {
    fn metadata(&self, resp: &mut ProviderMetadataResponse) {
        resp.type_name = "test".to_string();
        resp.version = "1.2.3".to_string();
    }

    fn schema(&self, resp: &mut SchemaResponse) {
        resp.schema = Schema::v0().with_attribute("region", Attribute::optional_string());
    }

    async fn configure(&self, req: provider::ConfigureProviderRequest, resp: &mut provider::ConfigureProviderResponse) {
        let region = string_at(&req.config.raw, "region").unwrap_or_else(|| "local".to_string());
        let data: SharedData = Arc::new(Region(region));
        resp.resource_data = Some(data.clone());
        resp.data_source_data = Some(data.clone());
        resp.ephemeral_resource_data = Some(data.clone());
        resp.state_store_data = Some(data);
        resp.deferred = self.defer;
    }

    fn resources(&self) -> Vec<resource::ResourceFactory> {
        let mut factories = vec![
            resource::factory(TestServer::default),
            resource::factory(|| TestWidget),
        ];
        if self.duplicate_resource {
            factories.push(resource::factory(TestServer::default));
        }
        factories
    }

    fn data_sources(&self) -> Vec<datasource::DataSourceFactory> {
        vec![datasource::factory(TestLookup::default)]
    }

    fn ephemeral_resources(&self) -> Vec<ephemeral::EphemeralResourceFactory> {
        vec![ephemeral::factory(TestToken::default)]
    }

    fn functions(&self) -> Vec<function::FunctionFactory> {
        vec![function::factory(|| Upper)]
    }

    fn state_stores(&self) -> Vec<statestore::StateStoreFactory> {
        vec![statestore::factory(TestMemory::default)]
    }

    fn as_validate_config(&self) -> Option<&dyn ProviderWithValidateConfig> {
        Some(self)
    }
}

#[async_trait]
impl ProviderWithValidateConfig for TestProvider {
    async fn validate_config(
        &self,
        req: provider::ValidateProviderConfigRequest,
        resp: &mut provider::ValidateProviderConfigResponse,
    ) {
        if string_at(&req.config.raw, "region").as_deref() == Some("moon-1") {
            resp.diagnostics.add_attribute_error(
                AttributePath::root("region"),
                "Unsupported Region",
                "The region moon-1 is not served.",
            );
        }
    }
}

// =========================================================================
// test_server: configure, import, semantic equality
// =========================================================================

#[derive(Default)]
struct TestServer {
    region: Option<String>,
}

impl TestServer {
    fn resolve_unknowns(&self, mut state: Value) -> Value {
        let name = string_at(&state, "name").unwrap_or_default();
        let region = self.region.clone().unwrap_or_else(|| "local".to_string());
        for (attribute, resolved) in [
            ("id", Value::from(format!("{}-{}", region, name))),
            ("size", Value::from("small")),
            ("weight", Value::from("1")),
        ] {
            if state.get(attribute).map_or(false, Value::is_unknown) {
                set(&mut state, attribute, resolved);
            }
        }
        state
    }
}

#[async_trait]
impl Resource for TestServer {
    fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse) {
        resp.type_name = format!("{}_server", req.provider_type_name);
    }

    fn schema(&self, resp: &mut SchemaResponse) {
        resp.schema = Schema::new(1)
            .with_attribute("name", Attribute::required_string().requires_replace())
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("size", Attribute::optional_computed_string())
            .with_attribute(
                "weight",
                Attribute::optional_computed_string().with_semantic_equality(NumericStringEquality),
            );
    }

    async fn create(&self, req: CreateRequest, resp: &mut CreateResponse) {
        if string_at(&req.plan.raw, "name").as_deref() == Some("forget") {
            return;
        }
        resp.state.raw = self.resolve_unknowns(req.plan.raw);
    }

    async fn read(&self, req: ReadRequest, resp: &mut ReadResponse) {
        if string_at(&req.state.raw, "name").as_deref() == Some("gone") {
            resp.state.raw = Value::Null;
            return;
        }
        if let Some(weight) = req.state.raw.get("weight") {
            set(&mut resp.state.raw, "weight", one_decimal(weight));
        }
    }

    async fn update(&self, req: UpdateRequest, resp: &mut UpdateResponse) {
        let mut state = self.resolve_unknowns(req.plan.raw);
        if let Some(weight) = state.get("weight").cloned() {
            set(&mut state, "weight", one_decimal(&weight));
        }
        resp.state.raw = state;
    }

    async fn delete(&self, req: DeleteRequest, resp: &mut DeleteResponse) {
        if string_at(&req.state.raw, "name").as_deref() == Some("stuck") {
            resp.diagnostics.add_error("Delete Failed", "The server refused to shut down.");
        }
    }

    fn as_configure(&mut self) -> Option<&mut dyn ResourceWithConfigure> {
        Some(self)
    }

    fn as_import_state(&self) -> Option<&dyn ResourceWithImportState> {
        Some(self)
    }
}

impl ResourceWithConfigure for TestServer {
    fn configure(&mut self, req: ConfigureRequest, _resp: &mut ConfigureResponse) {
        self.region = region_of(req.provider_data);
    }
}

#[async_trait]
impl ResourceWithImportState for TestServer {
    async fn import_state(&self, req: ImportStateRequest, resp: &mut ImportStateResponse) {
        import_state_passthrough_id(&AttributePath::root("id"), &req, resp);
    }
}

// =========================================================================
// test_widget: modify plan, validate config, upgrade state
// =========================================================================

struct TestWidget;

#[async_trait]
impl Resource for TestWidget {
    fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse) {
        resp.type_name = format!("{}_widget", req.provider_type_name);
    }

    fn schema(&self, resp: &mut SchemaResponse) {
        resp.schema = widget_schema();
    }

    async fn create(&self, req: CreateRequest, resp: &mut CreateResponse) {
        resp.state = req.plan.into();
    }

    async fn read(&self, _req: ReadRequest, _resp: &mut ReadResponse) {}

    async fn update(&self, _req: UpdateRequest, _resp: &mut UpdateResponse) {}

    async fn delete(&self, _req: DeleteRequest, _resp: &mut DeleteResponse) {}

    fn as_modify_plan(&self) -> Option<&dyn ResourceWithModifyPlan> {
        Some(self)
    }

    fn as_validate_config(&self) -> Option<&dyn ResourceWithValidateConfig> {
        Some(self)
    }

    fn as_upgrade_state(&self) -> Option<&dyn ResourceWithUpgradeState> {
        Some(self)
    }
}

fn widget_schema() -> Schema {
    Schema::new(3)
        .with_attribute("label", Attribute::required_string())
        .with_attribute("count", Attribute::optional_int64())
        .with_attribute("serial", Attribute::computed_string())
}

#[async_trait]
impl ResourceWithModifyPlan for TestWidget {
    async fn modify_plan(&self, req: ModifyPlanRequest, resp: &mut ModifyPlanResponse) {
        if req.plan.is_null() {
            resp.plan.raw = Value::from(json!({"label": "resurrected"}));
            return;
        }

        if string_at(&req.plan.raw, "label").as_deref() == Some("defer") {
            resp.deferred = Some(Deferred::new(DeferredReason::ResourceConfigUnknown));
        }

        if req.state.is_null() {
            return;
        }

        if req.plan.raw.get("label") != req.state.raw.get("label") {
            resp.requires_replace.extend([
                AttributePath::root("label"),
                AttributePath::root("count"),
                AttributePath::root("count"),
            ]);
        }

        if req.plan.raw.get("serial") != req.state.raw.get("serial") {
            let diags = resp.private.set_key("planned", b"true");
            resp.diagnostics.append(diags);
        }
    }
}

#[async_trait]
impl ResourceWithValidateConfig for TestWidget {
    async fn validate_config(&self, req: ValidateConfigRequest, resp: &mut ValidateConfigResponse) {
        let path = AttributePath::root("count");
        let count = req.config.get_attribute(&path).ok();
        if count.as_ref().and_then(Value::as_number).and_then(|n| n.as_i64()).map_or(false, |n| n < 0) {
            resp.diagnostics
                .add_attribute_error(path, "Negative Count", "count must not be negative.");
        }
    }
}

impl ResourceWithUpgradeState for TestWidget {
    fn upgrade_state(&self) -> BTreeMap<i64, StateUpgrader> {
        let typed = StateUpgrader::new(|req, resp| {
            let Some(prior) = &req.state else { return };
            let count = string_at(&prior.raw, "count")
                .and_then(|count| count.parse::<i64>().ok())
                .map_or(Value::Null, Value::from);
            resp.state.raw = Value::object([
                ("label", prior.raw.get("label").cloned().unwrap_or_default()),
                ("count", count),
                ("serial", Value::Null),
            ]);
        })
        .with_prior_schema(
            Schema::new(1)
                .with_attribute("label", Attribute::optional_string())
                .with_attribute("count", Attribute::optional_string()),
        );

        let forgetful = StateUpgrader::new(|_req, _resp| {});

        BTreeMap::from([(1, typed), (2, forgetful)])
    }
}

// =========================================================================
// test_lookup: data source
// =========================================================================

#[derive(Default)]
struct TestLookup {
    region: Option<String>,
}

#[async_trait]
impl DataSource for TestLookup {
    fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse) {
        resp.type_name = format!("{}_lookup", req.provider_type_name);
    }

    fn schema(&self, resp: &mut SchemaResponse) {
        resp.schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("value", Attribute::computed_string())
            .with_attribute(
                "amount",
                Attribute::optional_string().with_semantic_equality(NumericStringEquality),
            );
    }

    async fn read(&self, req: datasource::ReadDataSourceRequest, resp: &mut datasource::ReadDataSourceResponse) {
        let name = string_at(&req.config.raw, "name").unwrap_or_default();
        if name == "defer" {
            resp.deferred = Some(Deferred::new(DeferredReason::AbsentPrereq));
            return;
        }

        let region = self.region.clone().unwrap_or_else(|| "local".to_string());
        let mut state = req.config.raw.clone();
        set(&mut state, "value", Value::from(format!("{}@{}", name, region)));
        if let Some(amount) = req.config.raw.get("amount").and_then(Value::as_str) {
            if let Ok(n) = amount.parse::<f64>() {
                set(&mut state, "amount", Value::from(format!("{:.2}", n)));
            }
        }
        resp.state.raw = state;
    }

    fn as_configure(&mut self) -> Option<&mut dyn DataSourceWithConfigure> {
        Some(self)
    }
}

impl DataSourceWithConfigure for TestLookup {
    fn configure(&mut self, req: ConfigureRequest, _resp: &mut ConfigureResponse) {
        self.region = region_of(req.provider_data);
    }
}

// =========================================================================
// test_token: ephemeral resource with renew but no close
// =========================================================================

#[derive(Default)]
struct TestToken {
    region: Option<String>,
}

#[async_trait]
impl EphemeralResource for TestToken {
    fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse) {
        resp.type_name = format!("{}_token", req.provider_type_name);
    }

    fn schema(&self, resp: &mut SchemaResponse) {
        resp.schema = Schema::v0()
            .with_attribute("scope", Attribute::required_string())
            .with_attribute("token", Attribute::computed_string().sensitive());
    }

    async fn open(&self, req: OpenRequest, resp: &mut OpenResponse) {
        let scope = string_at(&req.config.raw, "scope").unwrap_or_default();
        let region = self.region.clone().unwrap_or_else(|| "local".to_string());

        let mut result = req.config.raw.clone();
        set(&mut result, "token", Value::from(format!("{}@{}#0", scope, region)));
        resp.result.raw = result;
        resp.renew_at = Some(SystemTime::now() + Duration::from_secs(60));
        let diags = resp.private.set_key("renewals", b"0");
        resp.diagnostics.append(diags);
    }

    fn as_configure(&mut self) -> Option<&mut dyn EphemeralResourceWithConfigure> {
        Some(self)
    }

    fn as_renew(&self) -> Option<&dyn EphemeralResourceWithRenew> {
        Some(self)
    }
}

impl EphemeralResourceWithConfigure for TestToken {
    fn configure(&mut self, req: ConfigureRequest, _resp: &mut ConfigureResponse) {
        self.region = region_of(req.provider_data);
    }
}

#[async_trait]
impl EphemeralResourceWithRenew for TestToken {
    async fn renew(&self, req: RenewRequest, resp: &mut RenewResponse) {
        let (raw, diags) = req.private.get_key("renewals");
        resp.diagnostics.append(diags);
        let renewals = String::from_utf8_lossy(&raw).parse::<u64>().unwrap_or_default() + 1;
        let diags = resp.private.set_key("renewals", renewals.to_string().as_bytes());
        resp.diagnostics.append(diags);
        resp.renew_at = Some(SystemTime::now() + Duration::from_secs(60));
    }
}

// =========================================================================
// upper: function
// =========================================================================

struct Upper;

#[async_trait]
impl Function for Upper {
    fn metadata(&self, resp: &mut FunctionMetadataResponse) {
        resp.name = "upper".to_string();
    }

    fn definition(&self, resp: &mut DefinitionResponse) {
        resp.definition = FunctionDefinition::new(AttributeType::String)
            .with_summary("Upper case a string")
            .with_parameter(Parameter::new("input", AttributeType::String));
    }

    async fn run(&self, req: RunRequest, resp: &mut RunResponse) {
        match req.arguments.get(0).and_then(Value::as_str) {
            Some("") | None => resp.error = Some(FuncError::argument(0, "input must not be empty")),
            Some(input) => resp.result = Value::from(input.to_uppercase()),
        }
    }
}

// =========================================================================
// test_memory: in-memory state store
// =========================================================================

#[derive(Default)]
struct MemoryBackend {
    namespace: String,
    states: Mutex<BTreeMap<String, Vec<u8>>>,
    locks: Mutex<BTreeMap<String, String>>,
    next_lock: AtomicU64,
}

impl MemoryBackend {
    fn key(&self, state_id: &str) -> String {
        format!("{}/{}", self.namespace, state_id)
    }
}

#[derive(Default)]
struct TestMemory {
    backend: Option<Arc<MemoryBackend>>,
}

impl TestMemory {
    fn backend(&self) -> &MemoryBackend {
        self.backend.as_deref().expect("configured before use")
    }
}

#[async_trait]
impl StateStore for TestMemory {
    fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse) {
        resp.type_name = format!("{}_memory", req.provider_type_name);
    }

    fn schema(&self, resp: &mut SchemaResponse) {
        resp.schema = Schema::v0().with_attribute("namespace", Attribute::required_string());
    }

    async fn initialize(&self, req: statestore::InitializeRequest, resp: &mut statestore::InitializeResponse) {
        let backend = MemoryBackend {
            namespace: string_at(&req.config.raw, "namespace").unwrap_or_default(),
            ..MemoryBackend::default()
        };
        let data: SharedData = Arc::new(backend);
        resp.state_store_data = Some(data);
    }

    async fn get_states(&self, resp: &mut statestore::GetStatesResponse) {
        resp.state_ids = self.backend().states.lock().unwrap().keys().cloned().collect();
    }

    async fn read(&self, req: statestore::ReadStateRequest, resp: &mut statestore::ReadStateResponse) {
        let backend = self.backend();
        let states = backend.states.lock().unwrap();
        resp.state_bytes = states.get(&backend.key(&req.state_id)).cloned().unwrap_or_default();
    }

    async fn write(&self, req: statestore::WriteStateRequest, _resp: &mut statestore::WriteStateResponse) {
        let backend = self.backend();
        backend.states.lock().unwrap().insert(backend.key(&req.state_id), req.state_bytes);
    }

    async fn lock(&self, req: statestore::LockRequest, resp: &mut statestore::LockResponse) {
        let backend = self.backend();
        let mut locks = backend.locks.lock().unwrap();
        let key = backend.key(&req.state_id);
        if locks.contains_key(&key) {
            resp.diagnostics
                .add_error("State Locked", format!("{} is locked by another {}.", req.state_id, req.operation));
            return;
        }
        let lock_id = format!("lock-{}", backend.next_lock.fetch_add(1, Ordering::SeqCst));
        locks.insert(key, lock_id.clone());
        resp.lock_id = lock_id;
    }

    async fn unlock(&self, req: statestore::UnlockRequest, resp: &mut statestore::UnlockResponse) {
        let backend = self.backend();
        let mut locks = backend.locks.lock().unwrap();
        let key = backend.key(&req.state_id);
        if locks.get(&key) != Some(&req.lock_id) {
            resp.diagnostics.add_error("Lock Mismatch", "The lock id does not match the held lock.");
            return;
        }
        locks.remove(&key);
    }

    async fn delete_state(&self, req: statestore::DeleteStateRequest, _resp: &mut statestore::DeleteStateResponse) {
        let backend = self.backend();
        backend.states.lock().unwrap().remove(&backend.key(&req.state_id));
    }

    fn as_configure(&mut self) -> Option<&mut dyn StateStoreWithConfigure> {
        Some(self)
    }
}

impl StateStoreWithConfigure for TestMemory {
    fn configure(&mut self, req: ConfigureRequest, resp: &mut ConfigureResponse) {
        match req.provider_data.and_then(|data| data.downcast::<MemoryBackend>().ok()) {
            Some(backend) => self.backend = Some(backend),
            None => resp.diagnostics.add_error(
                "State Store Not Initialized",
                "ConfigureStateStore must run before the store is used.",
            ),
        }
    }
}
