//! Testing utilities for provider implementations.
//!
//! [`ProviderTester`] drives a provider through a [`Server`] the way the
//! orchestrator would, without any transport in between. Values are passed
//! as JSON and must be complete objects: every attribute of the schema
//! present, null where unset.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_plugin_framework::testing::{assert_no_errors, ProviderTester};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_bucket() {
//!     let tester = ProviderTester::new(MyProvider::default());
//!     tester.configure(json!({"region": "eu-west-1"})).await.unwrap();
//!
//!     let (state, _private) = tester
//!         .lifecycle_create("example_bucket", json!({"name": "logs", "id": null}))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(state.get("name"), Some(&"logs".into()));
//! }
//! ```

use std::fmt;

use crate::diag::{Diagnostic, Diagnostics};
use crate::function::FuncError;
use crate::path::AttributePath;
use crate::provider::Provider;
use crate::server::{
    ApplyResourceChangeRequest, ApplyResourceChangeResponse, CallFunctionRequest, CallFunctionResponse,
    ConfigureProviderRequest, ConfigureProviderResponse, GetMetadataRequest, GetMetadataResponse,
    ImportResourceStateRequest, ImportResourceStateResponse, PlanResourceChangeRequest, PlanResourceChangeResponse,
    ReadDataSourceRequest, ReadDataSourceResponse, ReadResourceRequest, ReadResourceResponse, Server, ServerOptions,
    ValidateProviderConfigRequest, ValidateProviderConfigResponse, ValidateResourceConfigRequest,
    ValidateResourceConfigResponse,
};
use crate::types::ClientCapabilities;
use crate::value::Value;

/// A test harness around a [`Server`].
pub struct ProviderTester {
    server: Server,
    client_capabilities: ClientCapabilities,
}

impl ProviderTester {
    /// Create a tester for `provider` with default server options.
    pub fn new(provider: impl Provider) -> Self {
        Self::with_options(provider, ServerOptions::default())
    }

    /// Create a tester for `provider` with custom server options.
    pub fn with_options(provider: impl Provider, options: ServerOptions) -> Self {
        Self {
            server: Server::with_options(provider, options),
            client_capabilities: ClientCapabilities::default(),
        }
    }

    /// Send requests that allow deferred responses.
    pub fn allow_deferral(mut self) -> Self {
        self.client_capabilities.deferral_allowed = true;
        self
    }

    /// The underlying server.
    pub fn server(&self) -> &Server {
        &self.server
    }

    // =========================================================================
    // Provider
    // =========================================================================

    /// Names of the declared resource types.
    pub async fn resource_types(&self) -> Vec<String> {
        let mut resp = GetMetadataResponse::default();
        self.server.get_metadata(Some(GetMetadataRequest), &mut resp).await;
        resp.resources.into_iter().map(|r| r.type_name).collect()
    }

    /// Validate the provider configuration.
    pub async fn validate_provider_config(&self, config: impl Into<Value>) -> Result<(), TestError> {
        let mut resp = ValidateProviderConfigResponse::default();
        self.server
            .validate_provider_config(
                Some(ValidateProviderConfigRequest {
                    config: Some(config.into()),
                }),
                &mut resp,
            )
            .await;
        check_diagnostics(resp.diagnostics)
    }

    /// Configure the provider.
    pub async fn configure(&self, config: impl Into<Value>) -> Result<(), TestError> {
        let mut resp = ConfigureProviderResponse::default();
        self.server
            .configure_provider(
                Some(ConfigureProviderRequest {
                    config: Some(config.into()),
                    hemmer_version: env!("CARGO_PKG_VERSION").to_string(),
                    client_capabilities: self.client_capabilities,
                }),
                &mut resp,
            )
            .await;
        check_diagnostics(resp.diagnostics)
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(&self, type_name: &str, config: impl Into<Value>) -> Result<(), TestError> {
        let mut resp = ValidateResourceConfigResponse::default();
        self.server
            .validate_resource_config(
                Some(ValidateResourceConfigRequest {
                    type_name: type_name.to_string(),
                    config: Some(config.into()),
                }),
                &mut resp,
            )
            .await;
        check_diagnostics(resp.diagnostics)
    }

    /// Plan a change with explicit inputs.
    pub async fn plan(
        &self,
        type_name: &str,
        prior_state: Value,
        proposed_new_state: Value,
        config: Value,
    ) -> PlanResourceChangeResponse {
        let mut resp = PlanResourceChangeResponse::default();
        self.server
            .plan_resource_change(
                Some(PlanResourceChangeRequest {
                    type_name: type_name.to_string(),
                    prior_state: Some(prior_state),
                    proposed_new_state: Some(proposed_new_state),
                    config: Some(config),
                    client_capabilities: self.client_capabilities,
                    ..Default::default()
                }),
                &mut resp,
            )
            .await;
        resp
    }

    /// Plan creating a resource from `config`.
    pub async fn plan_create(&self, type_name: &str, config: impl Into<Value>) -> PlanResourceChangeResponse {
        let config = config.into();
        self.plan(type_name, Value::Null, config.clone(), config).await
    }

    /// Plan updating `prior_state` to `config`.
    ///
    /// Attributes left null in `config` keep their prior value in the
    /// proposed new state.
    pub async fn plan_update(
        &self,
        type_name: &str,
        prior_state: impl Into<Value>,
        config: impl Into<Value>,
    ) -> PlanResourceChangeResponse {
        let prior_state = prior_state.into();
        let config = config.into();
        let proposed = propose(&prior_state, &config);
        self.plan(type_name, prior_state, proposed, config).await
    }

    /// Plan destroying `prior_state`.
    pub async fn plan_delete(&self, type_name: &str, prior_state: impl Into<Value>) -> PlanResourceChangeResponse {
        self.plan(type_name, prior_state.into(), Value::Null, Value::Null).await
    }

    /// Apply `plan` on top of `prior_state`.
    pub async fn apply(
        &self,
        type_name: &str,
        prior_state: Value,
        plan: &PlanResourceChangeResponse,
        config: Value,
    ) -> ApplyResourceChangeResponse {
        let mut resp = ApplyResourceChangeResponse::default();
        self.server
            .apply_resource_change(
                Some(ApplyResourceChangeRequest {
                    type_name: type_name.to_string(),
                    prior_state: Some(prior_state),
                    planned_state: Some(plan.planned_state.clone()),
                    config: Some(config),
                    planned_private: plan.planned_private.clone(),
                    provider_meta: None,
                }),
                &mut resp,
            )
            .await;
        resp
    }

    /// Refresh `state`.
    pub async fn read(&self, type_name: &str, state: Value, private: Vec<u8>) -> ReadResourceResponse {
        let mut resp = ReadResourceResponse::default();
        self.server
            .read_resource(
                Some(ReadResourceRequest {
                    type_name: type_name.to_string(),
                    current_state: Some(state),
                    private,
                    provider_meta: None,
                    client_capabilities: self.client_capabilities,
                }),
                &mut resp,
            )
            .await;
        resp
    }

    /// Import the remote object identified by `id`.
    pub async fn import(&self, type_name: &str, id: &str) -> ImportResourceStateResponse {
        let mut resp = ImportResourceStateResponse::default();
        self.server
            .import_resource_state(
                Some(ImportResourceStateRequest {
                    type_name: type_name.to_string(),
                    id: id.to_string(),
                    client_capabilities: self.client_capabilities,
                }),
                &mut resp,
            )
            .await;
        resp
    }

    // =========================================================================
    // Data sources & functions
    // =========================================================================

    /// Read a data source.
    pub async fn read_data_source(&self, type_name: &str, config: impl Into<Value>) -> Result<Value, TestError> {
        let mut resp = ReadDataSourceResponse::default();
        self.server
            .read_data_source(
                Some(ReadDataSourceRequest {
                    type_name: type_name.to_string(),
                    config: Some(config.into()),
                    provider_meta: None,
                    client_capabilities: self.client_capabilities,
                }),
                &mut resp,
            )
            .await;
        check_diagnostics(resp.diagnostics)?;
        Ok(resp.state)
    }

    /// Call a function.
    pub async fn call_function(&self, name: &str, arguments: Vec<Value>) -> Result<Value, TestError> {
        let mut resp = CallFunctionResponse::default();
        self.server
            .call_function(
                Some(CallFunctionRequest {
                    name: name.to_string(),
                    arguments,
                }),
                &mut resp,
            )
            .await;
        match resp.error {
            Some(err) => Err(TestError::Function(err)),
            None => Ok(resp.result),
        }
    }

    // =========================================================================
    // Lifecycle helpers
    // =========================================================================

    /// Plan, create and read a resource.
    ///
    /// Returns the state and private bytes after the read.
    pub async fn lifecycle_create(
        &self,
        type_name: &str,
        config: impl Into<Value>,
    ) -> Result<(Value, Vec<u8>), TestError> {
        let config = config.into();

        let plan = self.plan_create(type_name, config.clone()).await;
        check_diagnostics(plan.diagnostics.clone())?;

        let created = self.apply(type_name, Value::Null, &plan, config).await;
        check_diagnostics(created.diagnostics)?;

        let read = self.read(type_name, created.new_state, created.private).await;
        check_diagnostics(read.diagnostics)?;
        Ok((read.new_state, read.private))
    }

    /// Plan, update and read a resource.
    pub async fn lifecycle_update(
        &self,
        type_name: &str,
        prior_state: Value,
        config: impl Into<Value>,
    ) -> Result<(Value, Vec<u8>), TestError> {
        let config = config.into();

        let plan = self.plan_update(type_name, prior_state.clone(), config.clone()).await;
        check_diagnostics(plan.diagnostics.clone())?;

        let updated = self.apply(type_name, prior_state, &plan, config).await;
        check_diagnostics(updated.diagnostics)?;

        let read = self.read(type_name, updated.new_state, updated.private).await;
        check_diagnostics(read.diagnostics)?;
        Ok((read.new_state, read.private))
    }

    /// Plan and apply destroying a resource.
    pub async fn lifecycle_delete(&self, type_name: &str, state: Value) -> Result<(), TestError> {
        let plan = self.plan_delete(type_name, state.clone()).await;
        check_diagnostics(plan.diagnostics.clone())?;

        let deleted = self.apply(type_name, state, &plan, Value::Null).await;
        check_diagnostics(deleted.diagnostics)?;

        if !deleted.new_state.is_null() {
            return Err(TestError::StateAfterDelete(deleted.new_state));
        }
        Ok(())
    }

    /// Create, update and delete a resource.
    ///
    /// Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        type_name: &str,
        initial_config: impl Into<Value>,
        updated_config: impl Into<Value>,
    ) -> Result<Value, TestError> {
        let (created, _) = self.lifecycle_create(type_name, initial_config).await?;
        let (updated, _) = self.lifecycle_update(type_name, created, updated_config).await?;
        self.lifecycle_delete(type_name, updated.clone()).await?;
        Ok(updated)
    }
}

/// The proposed new state for `config`, keeping prior values where the
/// configuration is null.
fn propose(prior: &Value, config: &Value) -> Value {
    match (prior, config) {
        (Value::Map(prior), Value::Map(config)) => Value::Map(
            config
                .iter()
                .map(|(name, value)| {
                    let proposed = match prior.get(name) {
                        Some(prior) if value.is_null() => prior.clone(),
                        _ => value.clone(),
                    };
                    (name.clone(), proposed)
                })
                .collect(),
        ),
        _ => config.clone(),
    }
}

/// Failure of a tester operation.
#[derive(Debug)]
pub enum TestError {
    /// The operation reported error diagnostics.
    Diagnostics(Diagnostics),
    /// A function call failed.
    Function(FuncError),
    /// Delete finished without errors but left state behind.
    StateAfterDelete(Value),
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(path) = &diag.path {
                        write!(f, " (at {})", path)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Function(err) => write!(f, "Function error: {}", err),
            TestError::StateAfterDelete(state) => write!(f, "State remained after delete: {}", state),
        }
    }
}

impl std::error::Error for TestError {}

fn check_diagnostics(diagnostics: Diagnostics) -> Result<(), TestError> {
    if diagnostics.has_error() {
        Err(TestError::Diagnostics(diagnostics))
    } else {
        Ok(())
    }
}

// =========================================================================
// Assertion helpers
// =========================================================================

fn error_summaries(diagnostics: &Diagnostics) -> Vec<&str> {
    diagnostics.errors().map(|d| d.summary.as_str()).collect()
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &Diagnostics) {
    assert!(
        !diagnostics.has_error(),
        "Expected no errors, but got {} error(s): {:?}",
        diagnostics.error_count(),
        error_summaries(diagnostics)
    );
}

/// Assert that diagnostics contain at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &Diagnostics) {
    assert!(diagnostics.has_error(), "Expected at least one error, but got none");
}

/// Assert that an error's summary contains `substring`.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &Diagnostics, substring: &str) {
    let matched = diagnostics
        .errors()
        .any(|d: &Diagnostic| d.summary.contains(substring));
    assert!(
        matched,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        error_summaries(diagnostics)
    );
}

/// Assert the exact RequiresReplace paths of a plan.
///
/// # Panics
///
/// Panics if the paths differ.
pub fn assert_requires_replace(plan: &PlanResourceChangeResponse, expected: &[AttributePath]) {
    assert_eq!(
        plan.requires_replace, expected,
        "Unexpected RequiresReplace paths"
    );
}

/// Assert that `value` holds an unknown value at `path`.
///
/// # Panics
///
/// Panics if the path does not resolve or the value there is known.
pub fn assert_unknown_at(value: &Value, path: &AttributePath) {
    match value.at_path(path) {
        Ok(found) => assert!(found.is_unknown(), "Expected unknown at {}, found {}", path, found),
        Err(err) => panic!("Expected unknown at {}, but the path does not resolve: {}", path, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::fixtures::TestProvider;
    use serde_json::json;

    async fn tester() -> ProviderTester {
        let tester = ProviderTester::new(TestProvider::default());
        tester.configure(json!({"region": "eu-west-1"})).await.unwrap();
        tester
    }

    #[tokio::test]
    async fn test_resource_types() {
        let tester = ProviderTester::new(TestProvider::default());
        assert_eq!(tester.resource_types().await, vec!["test_server", "test_widget"]);
    }

    #[tokio::test]
    async fn test_validate_provider_config_error() {
        let tester = ProviderTester::new(TestProvider::default());
        let err = tester
            .validate_provider_config(json!({"region": "moon-1"}))
            .await
            .unwrap_err();

        let TestError::Diagnostics(diags) = &err else {
            panic!("expected diagnostics, got {}", err);
        };
        assert_error_contains(diags, "Unsupported Region");
        assert!(err.to_string().contains("(at AttributeName(\"region\"))"));
    }

    #[tokio::test]
    async fn test_plan_create_marks_unknown() {
        let tester = tester().await;
        let plan = tester
            .plan_create("test_server", json!({"name": "web", "id": null, "size": null, "weight": null}))
            .await;

        assert_no_errors(&plan.diagnostics);
        assert_unknown_at(&plan.planned_state, &AttributePath::root("id"));
        assert_requires_replace(&plan, &[]);
    }

    #[tokio::test]
    async fn test_plan_update_requires_replace() {
        let tester = tester().await;
        let plan = tester
            .plan_update(
                "test_server",
                json!({"name": "web", "id": "eu-west-1-web", "size": "small", "weight": "1"}),
                json!({"name": "api", "id": null, "size": null, "weight": null}),
            )
            .await;

        assert_no_errors(&plan.diagnostics);
        assert_requires_replace(&plan, &[AttributePath::root("name")]);
        assert_unknown_at(&plan.planned_state, &AttributePath::root("id"));
    }

    #[tokio::test]
    async fn test_lifecycle_create() {
        let tester = tester().await;
        let (state, private) = tester
            .lifecycle_create("test_server", json!({"name": "web", "id": null, "size": null, "weight": null}))
            .await
            .unwrap();

        assert_eq!(
            state,
            Value::from(json!({"name": "web", "id": "eu-west-1-web", "size": "small", "weight": "1"}))
        );
        assert!(private.is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_crud() {
        let tester = tester().await;
        let updated = tester
            .lifecycle_crud(
                "test_server",
                json!({"name": "web", "id": null, "size": null, "weight": null}),
                json!({"name": "web", "id": null, "size": "large", "weight": null}),
            )
            .await
            .unwrap();

        assert_eq!(updated.get("size"), Some(&Value::from("large")));
        assert_eq!(updated.get("id"), Some(&Value::from("eu-west-1-web")));
    }

    #[tokio::test]
    async fn test_lifecycle_delete_failure() {
        let tester = tester().await;
        let err = tester
            .lifecycle_delete(
                "test_server",
                Value::from(json!({"name": "stuck", "id": "x", "size": "small", "weight": "1"})),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TestError::Diagnostics(_)));
        assert!(err.to_string().contains("Delete Failed"));
    }

    #[tokio::test]
    async fn test_read_data_source_and_function() {
        let tester = tester().await;

        let state = tester
            .read_data_source("test_lookup", json!({"name": "db", "value": null, "amount": null}))
            .await
            .unwrap();
        assert_eq!(state.get("value"), Some(&Value::from("db@eu-west-1")));

        let result = tester.call_function("upper", vec![Value::from("abc")]).await.unwrap();
        assert_eq!(result, Value::from("ABC"));

        let err = tester.call_function("upper", vec![Value::Null]).await.unwrap_err();
        assert!(matches!(err, TestError::Function(FuncError { argument: Some(0), .. })));
    }

    #[tokio::test]
    async fn test_import() {
        let tester = tester().await;
        let resp = tester.import("test_server", "srv-1").await;

        assert_no_errors(&resp.diagnostics);
        assert_eq!(resp.imported_resources.len(), 1);
    }

    #[test]
    fn test_tester_from_sync_code() {
        let tester = ProviderTester::new(TestProvider::default());
        tokio_test::block_on(tester.configure(json!({"region": "eu-west-1"}))).unwrap();

        let plan = tokio_test::block_on(tester.plan_create("test_server", json!({"name": "web"})));
        assert_no_errors(&plan.diagnostics);
        assert_unknown_at(&plan.planned_state, &AttributePath::root("id"));
    }

    #[test]
    #[should_panic(expected = "Expected unknown at")]
    fn test_assert_unknown_at_panics_on_known() {
        assert_unknown_at(&Value::from(json!({"id": "x"})), &AttributePath::root("id"));
    }

    #[test]
    fn test_propose_keeps_prior_for_null_config() {
        let prior = Value::from(json!({"name": "a", "id": "x"}));
        let config = Value::from(json!({"name": "b", "id": null}));
        assert_eq!(propose(&prior, &config), Value::from(json!({"name": "b", "id": "x"})));
    }
}
