//! Shared protocol types: capabilities, deferral and metadata.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Capabilities the framework advertises to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Schemas may be fetched per type instead of all at once.
    pub get_provider_schema_optional: bool,
    /// PlanResourceChange is also called for destroy plans.
    pub plan_destroy: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            get_provider_schema_optional: true,
            plan_destroy: true,
        }
    }
}

/// Capabilities the orchestrator declares on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// The response may carry a [`Deferred`] marker.
    pub deferral_allowed: bool,
}

/// Why an operation was deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredReason {
    /// No specific reason.
    #[default]
    Unknown,
    /// The resource configuration contains unknown values.
    ResourceConfigUnknown,
    /// The provider configuration contains unknown values.
    ProviderConfigUnknown,
    /// A prerequisite of the operation does not exist yet.
    AbsentPrereq,
}

impl fmt::Display for DeferredReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeferredReason::Unknown => "Unknown",
            DeferredReason::ResourceConfigUnknown => "ResourceConfigUnknown",
            DeferredReason::ProviderConfigUnknown => "ProviderConfigUnknown",
            DeferredReason::AbsentPrereq => "AbsentPrereq",
        })
    }
}

/// Marks a response as not completed in this pass.
///
/// Only legal when the request's [`ClientCapabilities`] allow deferral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Deferred {
    /// Why the operation was deferred.
    pub reason: DeferredReason,
}

impl Deferred {
    /// Create a deferral with the given reason.
    pub fn new(reason: DeferredReason) -> Self {
        Self { reason }
    }
}

/// Data produced by provider configuration and handed to every resource,
/// data source, ephemeral resource or state store instance.
///
/// Implementations downcast it to their own client type.
pub type SharedData = Arc<dyn Any + Send + Sync>;

/// Input of the metadata callback of resources, data sources, ephemeral
/// resources and state stores.
#[derive(Debug, Clone, Default)]
pub struct MetadataRequest {
    /// Type name of the provider, used as prefix of type names.
    pub provider_type_name: String,
}

/// Output of the metadata callback.
#[derive(Debug, Clone, Default)]
pub struct MetadataResponse {
    /// The full type name, for example `aws_instance`.
    pub type_name: String,
}

/// Output of the schema callback.
#[derive(Debug, Clone, Default)]
pub struct SchemaResponse {
    /// The schema.
    pub schema: crate::schema::Schema,
    /// Diagnostics reported while building the schema.
    pub diagnostics: crate::diag::Diagnostics,
}

/// Input of the configure capability of an implementation instance.
#[derive(Clone, Default)]
pub struct ConfigureRequest {
    /// Data from provider configuration, `None` before the provider is configured.
    pub provider_data: Option<SharedData>,
}

impl fmt::Debug for ConfigureRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigureRequest")
            .field("provider_data", &self.provider_data.is_some())
            .finish()
    }
}

/// Output of the configure capability of an implementation instance.
#[derive(Debug, Clone, Default)]
pub struct ConfigureResponse {
    /// Diagnostics reported while configuring.
    pub diagnostics: crate::diag::Diagnostics,
}

/// Name of a registered type, as returned by GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMetadata {
    /// The type name.
    pub type_name: String,
}

/// Name of a registered function, as returned by GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMetadata {
    /// The function name.
    pub name: String,
}
