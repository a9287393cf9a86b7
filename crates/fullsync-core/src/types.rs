//! Core data types for fullsync.
//!
//! This module defines the run state and everything it is made of. These
//! types are designed to be:
//!
//! - **Serializable**: The whole run state is checkpointed between steps
//! - **Explicit**: Tenant identity is a typed field, never an ad-hoc key
//! - **Backend-agnostic**: No search backend details leak into these types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Identifier of a tenant (site) in a multi-tenant deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub u64);

impl TenantId {
    /// Create a new tenant ID
    pub fn new(id: u64) -> Self {
        TenantId(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tenant as returned by the tenant directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier
    pub id: TenantId,

    /// Base URL of the tenant
    pub url: String,

    /// Whether this tenant takes part in indexing
    pub indexable: bool,
}

impl Tenant {
    /// Create an indexable tenant
    pub fn new(id: TenantId, url: impl Into<String>) -> Self {
        Tenant {
            id,
            url: url.into(),
            indexable: true,
        }
    }

    /// Set whether the tenant is indexable
    pub fn with_indexable(mut self, indexable: bool) -> Self {
        self.indexable = indexable;
        self
    }

    /// The reference carried by work items targeting this tenant
    pub fn to_ref(&self) -> TenantRef {
        TenantRef {
            id: self.id,
            url: self.url.clone(),
        }
    }
}

/// Tenant identity attached to a work item. Id and URL always travel together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRef {
    /// Tenant identifier
    pub id: TenantId,

    /// Base URL of the tenant
    pub url: String,
}

/// One unit of work in the queue: reindex one indexable, optionally for one
/// tenant.
///
/// `tenant` is `None` exactly for global indexables. Per-tenant items always
/// name their tenant, in single-tenant installs the active one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Registered name of the indexable
    pub indexable: String,

    /// Whether the index is deleted and remapped before population
    pub put_mapping: bool,

    /// Target tenant, if any
    pub tenant: Option<TenantRef>,
}

impl WorkItem {
    /// A work item without tenant identity
    pub fn global(indexable: impl Into<String>, put_mapping: bool) -> Self {
        WorkItem {
            indexable: indexable.into(),
            put_mapping,
            tenant: None,
        }
    }

    /// A work item targeting one tenant
    pub fn for_tenant(indexable: impl Into<String>, put_mapping: bool, tenant: &Tenant) -> Self {
        WorkItem {
            indexable: indexable.into(),
            put_mapping,
            tenant: Some(tenant.to_ref()),
        }
    }

    /// The target tenant's id, if any
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant.as_ref().map(|t| t.id)
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tenant {
            Some(tenant) => write!(f, "{} (site {})", self.indexable, tenant.id),
            None => write!(f, "{}", self.indexable),
        }
    }
}

/// Arguments of a full sync run.
///
/// Stored inside the run state so that every resumed tick sees the options
/// the run was started with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncArgs {
    /// Delete and remap every index before populating it
    pub put_mapping: bool,

    /// Restrict the run to these indexables (None = all registered)
    pub indexables: Option<Vec<String>>,

    /// Free-form options passed through to hooks
    pub extra: BTreeMap<String, Value>,
}

impl SyncArgs {
    /// Arguments for a run that remaps every index
    pub fn with_put_mapping(mut self, put_mapping: bool) -> Self {
        self.put_mapping = put_mapping;
        self
    }

    /// Restrict the run to the given indexables
    pub fn with_indexables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexables = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Attach a pass-through option
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Object counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTotals {
    /// Objects written to the backend
    pub synced: u64,

    /// Objects vetoed by the per-object hook
    pub skipped: u64,

    /// Objects rejected by the backend
    pub failed: u64,

    /// Error events reported
    pub errors: u64,
}

/// The complete, checkpointed state of a run in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Objects already processed for the current item
    pub offset: u64,

    /// True only until the first step of the run has executed
    pub is_first_step: bool,

    /// Remaining work, processed front to back
    pub queue: VecDeque<WorkItem>,

    /// Item being processed; None between items
    pub current: Option<WorkItem>,

    /// Per-tenant indexables still needing an alias, first-seen order
    pub alias_backlog: Vec<String>,

    /// Total object count reported by the last page query
    pub found_items: u64,

    /// Arguments the run was started with
    pub args: SyncArgs,

    /// When the run was started
    pub started_at: DateTime<Utc>,

    /// Counters accumulated so far
    pub totals: SyncTotals,
}

impl RunState {
    /// Create an empty run state for the given arguments
    pub fn new(args: SyncArgs) -> Self {
        RunState {
            offset: 0,
            is_first_step: true,
            queue: VecDeque::new(),
            current: None,
            alias_backlog: Vec::new(),
            found_items: 0,
            args,
            started_at: Utc::now(),
            totals: SyncTotals::default(),
        }
    }

    /// Add an indexable to the alias backlog unless already present
    pub fn push_alias(&mut self, indexable: &str) {
        if !self.alias_backlog.iter().any(|name| name == indexable) {
            self.alias_backlog.push(indexable.to_string());
        }
    }

    /// Whether an item is in progress or waiting in the queue
    pub fn has_work(&self) -> bool {
        self.current.is_some() || !self.queue.is_empty()
    }

    /// Whether the run has nothing left to do
    pub fn is_done(&self) -> bool {
        !self.has_work() && self.alias_backlog.is_empty()
    }
}

/// Summary of a completed run, stored after finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// When the run was started
    pub started_at: DateTime<Utc>,

    /// When the run was finalized
    pub finished_at: DateTime<Utc>,

    /// Counters at completion
    pub totals: SyncTotals,

    /// Arguments the run was started with
    pub args: SyncArgs,
}

impl SyncReport {
    /// Wall-clock duration of the run
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_alias_dedups() {
        let mut state = RunState::new(SyncArgs::default());
        state.push_alias("posts");
        state.push_alias("terms");
        state.push_alias("posts");
        assert_eq!(state.alias_backlog, vec!["posts", "terms"]);
    }

    #[test]
    fn test_work_item_tenant() {
        let tenant = Tenant::new(TenantId::new(5), "https://five.example");
        let item = WorkItem::for_tenant("posts", true, &tenant);
        assert_eq!(item.tenant_id(), Some(TenantId(5)));
        assert_eq!(item.to_string(), "posts (site 5)");

        let item = WorkItem::global("users", false);
        assert_eq!(item.tenant_id(), None);
        assert_eq!(item.to_string(), "users");
    }

    #[test]
    fn test_run_state_done() {
        let mut state = RunState::new(SyncArgs::default());
        assert!(state.is_done());

        state.alias_backlog.push("posts".to_string());
        assert!(!state.has_work());
        assert!(!state.is_done());

        state.alias_backlog.clear();
        state.current = Some(WorkItem::global("users", false));
        assert!(state.has_work());
    }

    #[test]
    fn test_run_state_json_shape() {
        let mut state = RunState::new(SyncArgs::default().with_put_mapping(true));
        state.queue.push_back(WorkItem::for_tenant(
            "posts",
            true,
            &Tenant::new(TenantId(2), "https://two.example"),
        ));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["queue"][0]["tenant"]["id"], 2);
        assert_eq!(json["queue"][0]["tenant"]["url"], "https://two.example");

        let back: RunState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
