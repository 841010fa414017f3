//! Name lookup of provider declared types.
//!
//! A [`Registry`] turns the factories a provider declares into a name keyed
//! catalog. The catalog is built on first use under an exclusive lock and
//! kept for the server's lifetime; building it calls each factory once to
//! read the declared name and the optional capabilities. Entries with an
//! empty or duplicate name are skipped and reported as diagnostics, which
//! are returned again with every later lookup.
//!
//! Schemas (or function definitions) are cached separately: they are only
//! built when an RPC needs them, and the first caller populates the cache.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::trace;

use crate::datasource::{DataSource, DataSourceCapabilities, DataSourceFactory};
use crate::diag::{Diagnostic, Diagnostics};
use crate::ephemeral::{EphemeralResource, EphemeralResourceCapabilities, EphemeralResourceFactory};
use crate::function::{DefinitionResponse, Function, FunctionDefinition, FunctionFactory, FunctionMetadataResponse};
use crate::resource::{Resource, ResourceCapabilities, ResourceFactory};
use crate::schema::Schema;
use crate::statestore::{StateStore, StateStoreCapabilities, StateStoreFactory};
use crate::types::{MetadataRequest, MetadataResponse, SchemaResponse};

/// A factory the registry can catalog.
pub trait Registrable: Clone + Send + Sync + 'static {
    /// The instance the factory produces.
    type Instance;
    /// Optional behavior recorded at registration.
    type Capabilities: Copy + Default + fmt::Debug + Send + Sync;
    /// Cached description: a schema or a function definition.
    type Descriptor: Clone + Send + Sync;

    /// Lower case kind, used in messages.
    const KIND: &'static str;
    /// Title case label, used in diagnostic summaries.
    const LABEL: &'static str;

    /// Create a fresh instance.
    fn instantiate(&self) -> Self::Instance;

    /// Read the declared name and capabilities of a fresh instance.
    fn catalog_entry(&self, provider_type_name: &str) -> (String, Self::Capabilities);

    /// Build the descriptor of a fresh instance.
    fn describe(&self) -> (Self::Descriptor, Diagnostics);
}

fn type_name_of(metadata: impl FnOnce(&MetadataRequest, &mut MetadataResponse), provider_type_name: &str) -> String {
    let req = MetadataRequest {
        provider_type_name: provider_type_name.to_string(),
    };
    let mut resp = MetadataResponse::default();
    metadata(&req, &mut resp);
    resp.type_name
}

fn schema_of(schema: impl FnOnce(&mut SchemaResponse)) -> (Arc<Schema>, Diagnostics) {
    let mut resp = SchemaResponse::default();
    schema(&mut resp);
    (Arc::new(resp.schema), resp.diagnostics)
}

impl Registrable for ResourceFactory {
    type Instance = Box<dyn Resource>;
    type Capabilities = ResourceCapabilities;
    type Descriptor = Arc<Schema>;

    const KIND: &'static str = "resource";
    const LABEL: &'static str = "Resource Type";

    fn instantiate(&self) -> Self::Instance {
        (**self)()
    }

    fn catalog_entry(&self, provider_type_name: &str) -> (String, Self::Capabilities) {
        let mut instance = self.instantiate();
        let name = type_name_of(|req, resp| instance.metadata(req, resp), provider_type_name);
        (name, ResourceCapabilities::of(instance.as_mut()))
    }

    fn describe(&self) -> (Self::Descriptor, Diagnostics) {
        let instance = self.instantiate();
        schema_of(|resp| instance.schema(resp))
    }
}

impl Registrable for DataSourceFactory {
    type Instance = Box<dyn DataSource>;
    type Capabilities = DataSourceCapabilities;
    type Descriptor = Arc<Schema>;

    const KIND: &'static str = "data source";
    const LABEL: &'static str = "Data Source Type";

    fn instantiate(&self) -> Self::Instance {
        (**self)()
    }

    fn catalog_entry(&self, provider_type_name: &str) -> (String, Self::Capabilities) {
        let mut instance = self.instantiate();
        let name = type_name_of(|req, resp| instance.metadata(req, resp), provider_type_name);
        (name, DataSourceCapabilities::of(instance.as_mut()))
    }

    fn describe(&self) -> (Self::Descriptor, Diagnostics) {
        let instance = self.instantiate();
        schema_of(|resp| instance.schema(resp))
    }
}

impl Registrable for EphemeralResourceFactory {
    type Instance = Box<dyn EphemeralResource>;
    type Capabilities = EphemeralResourceCapabilities;
    type Descriptor = Arc<Schema>;

    const KIND: &'static str = "ephemeral resource";
    const LABEL: &'static str = "Ephemeral Resource Type";

    fn instantiate(&self) -> Self::Instance {
        (**self)()
    }

    fn catalog_entry(&self, provider_type_name: &str) -> (String, Self::Capabilities) {
        let mut instance = self.instantiate();
        let name = type_name_of(|req, resp| instance.metadata(req, resp), provider_type_name);
        (name, EphemeralResourceCapabilities::of(instance.as_mut()))
    }

    fn describe(&self) -> (Self::Descriptor, Diagnostics) {
        let instance = self.instantiate();
        schema_of(|resp| instance.schema(resp))
    }
}

impl Registrable for StateStoreFactory {
    type Instance = Box<dyn StateStore>;
    type Capabilities = StateStoreCapabilities;
    type Descriptor = Arc<Schema>;

    const KIND: &'static str = "state store";
    const LABEL: &'static str = "State Store Type";

    fn instantiate(&self) -> Self::Instance {
        (**self)()
    }

    fn catalog_entry(&self, provider_type_name: &str) -> (String, Self::Capabilities) {
        let mut instance = self.instantiate();
        let name = type_name_of(|req, resp| instance.metadata(req, resp), provider_type_name);
        (name, StateStoreCapabilities::of(instance.as_mut()))
    }

    fn describe(&self) -> (Self::Descriptor, Diagnostics) {
        let instance = self.instantiate();
        schema_of(|resp| instance.schema(resp))
    }
}

impl Registrable for FunctionFactory {
    type Instance = Box<dyn Function>;
    type Capabilities = ();
    type Descriptor = FunctionDefinition;

    const KIND: &'static str = "function";
    const LABEL: &'static str = "Function";

    fn instantiate(&self) -> Self::Instance {
        (**self)()
    }

    fn catalog_entry(&self, _provider_type_name: &str) -> (String, Self::Capabilities) {
        let mut resp = FunctionMetadataResponse::default();
        self.instantiate().metadata(&mut resp);
        (resp.name, ())
    }

    fn describe(&self) -> (Self::Descriptor, Diagnostics) {
        let mut resp = DefinitionResponse::default();
        self.instantiate().definition(&mut resp);
        (resp.definition, resp.diagnostics)
    }
}

/// One cataloged factory.
#[derive(Clone)]
pub struct Entry<T: Registrable> {
    /// The factory.
    pub factory: T,
    /// Optional behavior of the instances it produces.
    pub capabilities: T::Capabilities,
}

impl<T: Registrable> fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// The built catalog of a registry.
pub struct Catalog<T: Registrable> {
    /// Entries by name.
    pub entries: BTreeMap<String, Entry<T>>,
    /// Problems found while building the catalog.
    pub diagnostics: Diagnostics,
}

impl<T: Registrable> Catalog<T> {
    fn build(factories: Vec<T>, provider_type_name: &str) -> Self {
        let mut entries = BTreeMap::new();
        let mut diagnostics = Diagnostics::new();

        for (position, factory) in factories.into_iter().enumerate() {
            let (name, capabilities) = factory.catalog_entry(provider_type_name);

            if name.is_empty() {
                diagnostics.add_error(
                    format!("{} Name Missing", T::LABEL),
                    format!(
                        "The {} declared at position {} returned an empty name from its metadata method. \
                         This is always an issue with the provider and should be reported to the provider developers.",
                        T::KIND,
                        position
                    ),
                );
                continue;
            }

            trace!(kind = T::KIND, name = %name, ?capabilities, "Found provider defined type");

            if entries.contains_key(&name) {
                diagnostics.add_error(
                    format!("Duplicate {} Defined", T::LABEL),
                    format!(
                        "The {} name {:?} was returned for multiple {} declarations. \
                         Names must be unique. \
                         This is always an issue with the provider and should be reported to the provider developers.",
                        T::KIND,
                        name,
                        T::KIND
                    ),
                );
                continue;
            }

            entries.insert(name, Entry { factory, capabilities });
        }

        Self { entries, diagnostics }
    }

    /// The entry named `name`.
    ///
    /// The returned diagnostics always include the catalog's own problems.
    pub fn lookup(&self, name: &str) -> (Option<Entry<T>>, Diagnostics) {
        let mut diags = self.diagnostics.clone();
        match self.entries.get(name) {
            Some(entry) => (Some(entry.clone()), diags),
            None => {
                diags.push(not_found::<T>(name));
                (None, diags)
            },
        }
    }

    /// Names of all entries, in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Lazily built catalog plus descriptor cache for one kind of factory.
pub struct Registry<T: Registrable> {
    catalog: RwLock<Option<Arc<Catalog<T>>>>,
    descriptors: RwLock<BTreeMap<String, T::Descriptor>>,
}

impl<T: Registrable> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Registrable> Registry<T> {
    /// An empty, unbuilt registry.
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(None),
            descriptors: RwLock::new(BTreeMap::new()),
        }
    }

    /// The catalog, building it from `declare` on first use.
    ///
    /// `declare` is only called by the caller that builds the catalog.
    pub async fn catalog<F>(&self, provider_type_name: &str, declare: F) -> Arc<Catalog<T>>
    where
        F: FnOnce() -> Vec<T>,
    {
        if let Some(catalog) = self.catalog.read().await.as_ref() {
            return catalog.clone();
        }

        let mut guard = self.catalog.write().await;
        if let Some(catalog) = guard.as_ref() {
            return catalog.clone();
        }

        trace!(kind = T::KIND, "Building provider defined type catalog");
        let catalog = Arc::new(Catalog::build(declare(), provider_type_name));
        *guard = Some(catalog.clone());
        catalog
    }

    /// The descriptor of `name`, building and caching it on first use.
    ///
    /// Descriptors whose construction reports errors are not cached.
    pub async fn descriptor(&self, name: &str, entry: &Entry<T>) -> (Option<T::Descriptor>, Diagnostics) {
        if let Some(descriptor) = self.descriptors.read().await.get(name) {
            return (Some(descriptor.clone()), Diagnostics::new());
        }

        let mut guard = self.descriptors.write().await;
        if let Some(descriptor) = guard.get(name) {
            return (Some(descriptor.clone()), Diagnostics::new());
        }

        trace!(kind = T::KIND, name = %name, "Building provider defined type descriptor");
        let (descriptor, diags) = entry.factory.describe();
        if diags.has_error() {
            return (None, diags);
        }

        guard.insert(name.to_string(), descriptor.clone());
        (Some(descriptor), diags)
    }
}

fn not_found<T: Registrable>(name: &str) -> Diagnostic {
    Diagnostic::error(format!("{} Not Found", T::LABEL)).with_detail(format!(
        "No {} named {:?} was found in the provider.",
        T::LABEL.to_lowercase(),
        name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function;
    use crate::function::{RunRequest, RunResponse};
    use crate::schema::AttributeType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Named(&'static str);

    #[async_trait]
    impl Function for Named {
        fn metadata(&self, resp: &mut FunctionMetadataResponse) {
            resp.name = self.0.to_string();
        }

        fn definition(&self, resp: &mut DefinitionResponse) {
            resp.definition = FunctionDefinition::new(AttributeType::String);
        }

        async fn run(&self, _req: RunRequest, _resp: &mut RunResponse) {}
    }

    #[tokio::test]
    async fn test_catalog_skips_empty_and_duplicate_names() {
        let registry: Registry<FunctionFactory> = Registry::new();
        let catalog = registry
            .catalog("test", || {
                vec![
                    function::factory(|| Named("upper")),
                    function::factory(|| Named("")),
                    function::factory(|| Named("upper")),
                    function::factory(|| Named("lower")),
                ]
            })
            .await;

        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["lower", "upper"]);
        assert_eq!(catalog.diagnostics.error_count(), 2);
        let summaries: Vec<_> = catalog.diagnostics.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, vec!["Function Name Missing", "Duplicate Function Defined"]);

        // Catalog problems accompany every lookup.
        let (entry, diags) = catalog.lookup("upper");
        assert!(entry.is_some());
        assert_eq!(diags.error_count(), 2);
    }

    #[tokio::test]
    async fn test_catalog_built_once() {
        let registry: Registry<FunctionFactory> = Registry::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            registry
                .catalog("test", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    vec![function::factory(|| Named("upper"))]
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_not_found() {
        let registry: Registry<FunctionFactory> = Registry::new();
        let catalog = registry.catalog("test", Vec::new).await;

        let (entry, diags) = catalog.lookup("missing");
        assert!(entry.is_none());
        assert_eq!(diags.error_count(), 1);
        let diag = diags.iter().next().unwrap();
        assert_eq!(diag.summary, "Function Not Found");
        assert_eq!(
            diag.detail.as_deref(),
            Some("No function named \"missing\" was found in the provider.")
        );
    }

    #[tokio::test]
    async fn test_descriptor_cached() {
        let registry: Registry<FunctionFactory> = Registry::new();
        let catalog = registry
            .catalog("test", || vec![function::factory(|| Named("upper"))])
            .await;
        let (entry, _) = catalog.lookup("upper");
        let entry = entry.unwrap();

        let (first, diags) = registry.descriptor("upper", &entry).await;
        assert!(diags.is_empty());
        assert_eq!(first.unwrap().return_type, AttributeType::String);
        assert!(registry.descriptors.read().await.contains_key("upper"));

        let (second, _) = registry.descriptor("upper", &entry).await;
        assert!(second.is_some());
    }
}
