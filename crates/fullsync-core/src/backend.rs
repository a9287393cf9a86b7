//! Collaborator traits.
//!
//! This module defines the abstract interface the run-state machine needs
//! from the outside world. The core never talks to a search backend, a
//! content source or a tenant store directly; it only goes through these
//! traits, so each deployment plugs in its own implementations.
//!
//! ## Implementing a New Backend
//!
//! 1. Implement `Indexable` for each content type you want to sync
//! 2. Expose them through an `IndexableRegistry`
//! 3. Implement `TenantDirectory` (a single-tenant install can use
//!    `SingleTenant`)
//! 4. Hand all three to `SyncManager::new`

use crate::types::{Tenant, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Display labels of an indexable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    /// Singular label (e.g., "Post")
    pub singular: String,

    /// Plural label (e.g., "Posts")
    pub plural: String,
}

impl Labels {
    /// Create labels from singular and plural forms
    pub fn new(singular: impl Into<String>, plural: impl Into<String>) -> Self {
        Labels {
            singular: singular.into(),
            plural: plural.into(),
        }
    }
}

/// Pagination window for a content query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryArgs {
    /// Maximum number of objects to return
    pub per_page: usize,

    /// Number of objects to skip
    pub offset: u64,
}

/// A domain object as enumerated by a content source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentObject {
    /// Identifier used as the backend document id
    pub id: String,

    /// Source data, available to per-object hooks
    #[serde(default)]
    pub data: Value,
}

impl ContentObject {
    /// Create an object with no attached data
    pub fn new(id: impl Into<String>) -> Self {
        ContentObject {
            id: id.into(),
            data: Value::Null,
        }
    }

    /// Attach source data
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// One page of content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Total number of objects the source holds
    pub total: u64,

    /// Objects in this page, in order
    pub objects: Vec<ContentObject>,
}

/// Per-document error returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemError {
    /// Backend error type (e.g., "mapper_parsing_exception")
    #[serde(rename = "type")]
    pub kind: String,

    /// Human-readable reason
    pub reason: String,
}

/// Outcome for one document in a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItem {
    /// Backend document id
    pub id: String,

    /// Set when the backend rejected this document
    pub error: Option<BulkItemError>,
}

impl BulkItem {
    /// A document the backend accepted
    pub fn ok(id: impl Into<String>) -> Self {
        BulkItem {
            id: id.into(),
            error: None,
        }
    }

    /// A document the backend rejected
    pub fn failed(id: impl Into<String>, kind: impl Into<String>, reason: impl Into<String>) -> Self {
        BulkItem {
            id: id.into(),
            error: Some(BulkItemError {
                kind: kind.into(),
                reason: reason.into(),
            }),
        }
    }
}

/// Response of a bulk index request that reached the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse {
    /// True if at least one document was rejected
    pub errors: bool,

    /// Per-document outcomes
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    /// Build a response from items, deriving the `errors` flag
    pub fn from_items(items: Vec<BulkItem>) -> Self {
        let errors = items.iter().any(|item| item.error.is_some());
        BulkResponse { errors, items }
    }

    /// Items carrying an error
    pub fn failed_items(&self) -> Vec<&BulkItem> {
        self.items.iter().filter(|item| item.error.is_some()).collect()
    }
}

/// A named content type with a backend schema.
///
/// Implementations resolve the target tenant from the active tenant context
/// (see `TenantDirectory`), so the same object serves every tenant.
///
/// ## Error Handling
///
/// Fallible operations return `anyhow` errors. The orchestrator reports them
/// as progress events and moves on; it never aborts a run on them.
pub trait Indexable: Send + Sync {
    /// Registered name (e.g., "post")
    fn slug(&self) -> &str;

    /// Display labels
    fn labels(&self) -> &Labels;

    /// Delete the backend index for the active tenant
    fn delete_index(&self) -> anyhow::Result<()>;

    /// Create the backend index with this indexable's schema
    fn put_mapping(&self) -> anyhow::Result<()>;

    /// Fetch one page of content
    fn query(&self, args: &QueryArgs) -> anyhow::Result<QueryResult>;

    /// Write the given objects to the backend
    ///
    /// An `Err` means the whole request failed. Individual rejections are
    /// reported through `BulkResponse::errors`.
    fn bulk_index(&self, ids: &[String]) -> anyhow::Result<BulkResponse>;

    /// Concrete backend index name for the active tenant
    fn index_name(&self) -> String;

    /// Create or replace one alias spanning the given indices
    fn create_alias(&self, indices: &[String]) -> anyhow::Result<()>;
}

/// Lookup of indexables by name.
pub trait IndexableRegistry: Send + Sync {
    /// Names of global (`true`) or per-tenant (`false`) indexables, in
    /// registration order
    fn names(&self, global: bool) -> Vec<String>;

    /// Get an indexable by name
    fn get(&self, name: &str) -> Option<Arc<dyn Indexable>>;
}

/// A simple registry backed by two ordered lists.
#[derive(Default, Clone)]
pub struct StaticRegistry {
    global: Vec<Arc<dyn Indexable>>,
    per_tenant: Vec<Arc<dyn Indexable>>,
}

impl StaticRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a global indexable
    pub fn with_global(mut self, indexable: Arc<dyn Indexable>) -> Self {
        self.global.push(indexable);
        self
    }

    /// Register a per-tenant indexable
    pub fn with_per_tenant(mut self, indexable: Arc<dyn Indexable>) -> Self {
        self.per_tenant.push(indexable);
        self
    }
}

impl IndexableRegistry for StaticRegistry {
    fn names(&self, global: bool) -> Vec<String> {
        let list = if global { &self.global } else { &self.per_tenant };
        list.iter().map(|i| i.slug().to_string()).collect()
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Indexable>> {
        self.per_tenant
            .iter()
            .chain(self.global.iter())
            .find(|i| i.slug() == name)
            .cloned()
    }
}

/// Enumeration of tenants and control of the active tenant context.
///
/// `activate` and `restore` are always paired; use `TenantScope` rather than
/// calling them directly.
pub trait TenantDirectory: Send + Sync {
    /// Whether the deployment runs more than one tenant
    fn is_multi_tenant(&self) -> bool;

    /// All tenants, indexable or not
    fn list_tenants(&self) -> anyhow::Result<Vec<Tenant>>;

    /// The tenant currently in context
    fn current(&self) -> anyhow::Result<Tenant>;

    /// Make the given tenant the active context
    fn activate(&self, id: TenantId) -> anyhow::Result<()>;

    /// Restore the context that was active before the last `activate`
    fn restore(&self);
}

/// Tenant directory of a single-tenant install.
#[derive(Debug, Clone)]
pub struct SingleTenant {
    tenant: Tenant,
}

impl SingleTenant {
    /// Create a directory holding one tenant
    pub fn new(tenant: Tenant) -> Self {
        SingleTenant { tenant }
    }
}

impl TenantDirectory for SingleTenant {
    fn is_multi_tenant(&self) -> bool {
        false
    }

    fn list_tenants(&self) -> anyhow::Result<Vec<Tenant>> {
        Ok(vec![self.tenant.clone()])
    }

    fn current(&self) -> anyhow::Result<Tenant> {
        Ok(self.tenant.clone())
    }

    fn activate(&self, _id: TenantId) -> anyhow::Result<()> {
        Ok(())
    }

    fn restore(&self) {}
}

/// Scoped activation of a tenant context.
///
/// The previous context is restored when the scope is dropped, on every exit
/// path including early returns and unwinding.
#[must_use = "the tenant is restored as soon as the scope is dropped"]
pub struct TenantScope<'a> {
    directory: &'a dyn TenantDirectory,
    tenant: TenantId,
}

impl<'a> TenantScope<'a> {
    /// Activate `tenant` until the returned scope is dropped
    pub fn enter(directory: &'a dyn TenantDirectory, tenant: TenantId) -> anyhow::Result<Self> {
        directory.activate(tenant)?;
        Ok(TenantScope { directory, tenant })
    }
}

impl Drop for TenantScope<'_> {
    fn drop(&mut self) {
        self.directory.restore();
    }
}

impl std::fmt::Debug for TenantScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantScope")
            .field("tenant", &self.tenant)
            .finish()
    }
}

/// Activate `tenant` for the duration of `f` and return its result.
///
/// Activation failures are logged and `f` is not run.
pub fn with_tenant<T>(
    directory: &dyn TenantDirectory,
    tenant: TenantId,
    f: impl FnOnce() -> T,
) -> anyhow::Result<T> {
    let scope = TenantScope::enter(directory, tenant).map_err(|e| {
        warn!(tenant = %tenant, error = %e, "Failed to activate tenant");
        e
    })?;
    let value = f();
    drop(scope);
    Ok(value)
}
