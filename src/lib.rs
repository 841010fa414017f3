//! Hemmer Plugin Framework
//!
//! This crate is the provider side of the Hemmer plugin protocol. Provider
//! authors describe their resources, data sources, ephemeral resources,
//! functions and state stores with schemas and small traits; the framework
//! answers every RPC on their behalf.
//!
//! # Overview
//!
//! The framework provides:
//!
//! - **Values and schemas**: [`Value`] with null and unknown markers, and
//!   [`schema::Schema`] describing attributes and nested blocks
//! - **Provider contract**: the [`provider::Provider`] trait plus one trait
//!   per kind of type, with optional capabilities discovered at runtime
//! - **Server**: [`Server`] resolves type names, validates configuration,
//!   plans changes, threads private state and applies semantic equality
//! - **Plan modifiers**: attribute level hooks such as requires-replace and
//!   use-state-for-unknown
//! - **Diagnostics**: [`Diagnostics`] collected from framework and provider
//!   code alike
//! - **Logging**: integration with `tracing` for structured logging
//! - **Testing**: [`testing::ProviderTester`] drives a provider end to end
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_plugin_framework::{
//!     async_trait,
//!     provider::{ConfigureProviderRequest, ConfigureProviderResponse, Provider, ProviderMetadataResponse},
//!     resource::{self, CreateRequest, CreateResponse, DeleteRequest, DeleteResponse, ReadRequest, ReadResponse,
//!                Resource, UpdateRequest, UpdateResponse},
//!     schema::{Attribute, Schema},
//!     types::{MetadataRequest, MetadataResponse, SchemaResponse},
//!     Server,
//! };
//!
//! #[derive(Default)]
//! struct Bucket;
//!
//! #[async_trait]
//! impl Resource for Bucket {
//!     fn metadata(&self, req: &MetadataRequest, resp: &mut MetadataResponse) {
//!         resp.type_name = format!("{}_bucket", req.provider_type_name);
//!     }
//!
//!     fn schema(&self, resp: &mut SchemaResponse) {
//!         resp.schema = Schema::v0()
//!             .with_attribute("name", Attribute::required_string().requires_replace())
//!             .with_attribute("id", Attribute::computed_string());
//!     }
//!
//!     async fn create(&self, req: CreateRequest, resp: &mut CreateResponse) { /* ... */ }
//!     async fn read(&self, req: ReadRequest, resp: &mut ReadResponse) { /* ... */ }
//!     async fn update(&self, req: UpdateRequest, resp: &mut UpdateResponse) { /* ... */ }
//!     async fn delete(&self, req: DeleteRequest, resp: &mut DeleteResponse) { /* ... */ }
//! }
//!
//! struct Example;
//!
//! #[async_trait]
//! impl Provider for Example {
//!     fn metadata(&self, resp: &mut ProviderMetadataResponse) {
//!         resp.type_name = "example".to_string();
//!         resp.version = "0.1.0".to_string();
//!     }
//!
//!     fn schema(&self, _resp: &mut SchemaResponse) {}
//!
//!     async fn configure(&self, _req: ConfigureProviderRequest, _resp: &mut ConfigureProviderResponse) {}
//!
//!     fn resources(&self) -> Vec<resource::ResourceFactory> {
//!         vec![resource::factory(Bucket::default)]
//!     }
//! }
//!
//! let server = Server::new(Example);
//! ```
//!
//! # Operations
//!
//! [`Server`] exposes one method per protocol operation:
//!
//! - **Provider**: GetMetadata, GetProviderSchema, ValidateProviderConfig,
//!   ConfigureProvider
//! - **Resources**: ValidateResourceConfig, UpgradeResourceState,
//!   ReadResource, PlanResourceChange, ApplyResourceChange,
//!   ImportResourceState
//! - **Data sources**: ValidateDataSourceConfig, ReadDataSource
//! - **Ephemeral resources**: ValidateEphemeralResourceConfig,
//!   OpenEphemeralResource, RenewEphemeralResource, CloseEphemeralResource
//! - **Functions**: GetFunctions, CallFunction
//! - **State stores**: ValidateStateStoreConfig, ConfigureStateStore,
//!   GetStates, ReadStateBytes, WriteStateBytes, LockState, UnlockState,
//!   DeleteState
//!
//! Each method takes an optional request and fills a response in place. An
//! absent request leaves the response untouched.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod data;
pub mod datasource;
pub mod diag;
pub mod ephemeral;
pub mod error;
pub mod function;
pub mod logging;
pub mod path;
pub mod plan_modifier;
pub mod private_state;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod schema;
pub mod semantic;
pub mod server;
pub mod statestore;
pub mod testing;
pub mod types;
pub mod validation;
pub mod value;
pub mod walk;

// Re-export main types at crate root
pub use diag::{Diagnostic, DiagnosticSeverity, Diagnostics};
pub use error::FrameworkError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use path::AttributePath;
pub use server::{Server, ServerOptions};
pub use types::{ClientCapabilities, Deferred, DeferredReason, ServerCapabilities};
pub use validation::{is_valid, validate, validate_result};
pub use value::Value;

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;
