//! The run-state machine.
//!
//! `SyncManager` owns the state of the run in progress and advances it one
//! step at a time. Each step finishes with a checkpoint, so a driver may stop
//! between any two steps (end of an HTTP request, end of a scheduled job,
//! process crash) and a later call resumes exactly where the run stopped.
//!
//! ## Run Lifecycle
//!
//! ```text
//! begin ──> process_next_step* ──> process_next_alias* ──> finalize
//!   │            │                        │
//!   │            ├─ dequeue item          └─ one alias per per-tenant
//!   │            ├─ replace mapping          indexable, over indexable tenants
//!   │            └─ index one page
//!   └─ resume checkpoint, or build the queue
//! ```
//!
//! Queue items are processed in order: every per-tenant indexable for every
//! tenant, then every global indexable. Backend failures never abort a run:
//! they are reported as error events and the run moves on.

use crate::backend::{
    with_tenant, Indexable, IndexableRegistry, QueryArgs, TenantDirectory, TenantScope,
};
use crate::checkpoint::{self, CheckpointStore, FEATURE_AUTO_ACTIVATED_KEY, NEEDS_UPGRADE_KEY};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::hooks::{NoopHooks, SyncHooks};
use crate::progress::{ProgressEvent, ProgressSink, ProgressStatus};
use crate::report::format_bulk_failures;
use crate::types::{RunState, SyncArgs, SyncReport, TenantId, WorkItem};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Process-wide handle to the one orchestrator of this process.
///
/// Build it once at startup and hand clones to every driver; the mutex keeps
/// two drivers from advancing the same run concurrently.
pub type SharedSyncManager = Arc<Mutex<SyncManager>>;

/// What a call to `SyncManager::tick` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Advanced the queue by one step
    Step,

    /// Built one alias
    Alias,

    /// Finalized the run
    Finished,

    /// No run in progress
    Idle,
}

/// Resumable full-sync orchestrator.
///
/// ## Example
///
/// ```rust,ignore
/// use fullsync_core::{LoggingProgress, SyncArgs, SyncManager};
///
/// let mut manager = SyncManager::new(registry, tenants, store, &config.sync);
/// let report = manager.run_full_index(SyncArgs::default().with_put_mapping(true), &LoggingProgress)?;
/// ```
pub struct SyncManager {
    /// Indexables by name
    registry: Arc<dyn IndexableRegistry>,

    /// Tenant enumeration and context switching
    tenants: Arc<dyn TenantDirectory>,

    /// Durable storage of the run state
    store: Arc<dyn CheckpointStore>,

    /// Extension points
    hooks: Arc<dyn SyncHooks>,

    /// Default page size
    per_page: usize,

    /// Run in progress, if any
    state: Option<RunState>,
}

impl SyncManager {
    /// Create a manager with no-op hooks. No checkpoint is read until the
    /// first call that needs it.
    pub fn new(
        registry: Arc<dyn IndexableRegistry>,
        tenants: Arc<dyn TenantDirectory>,
        store: Arc<dyn CheckpointStore>,
        config: &SyncConfig,
    ) -> Self {
        SyncManager {
            registry,
            tenants,
            store,
            hooks: Arc::new(NoopHooks),
            per_page: config.per_page.max(1),
            state: None,
        }
    }

    /// Install extension hooks
    pub fn with_hooks(mut self, hooks: Arc<dyn SyncHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Wrap the manager in the shared process-wide handle
    pub fn into_shared(self) -> SharedSyncManager {
        Arc::new(Mutex::new(self))
    }

    /// The run in progress, if any
    pub fn state(&self) -> Option<&RunState> {
        self.state.as_ref()
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.state.is_some()
    }

    /// Whether queue items remain (including the item in progress)
    pub fn has_work(&self) -> bool {
        self.state.as_ref().is_some_and(RunState::has_work)
    }

    /// Whether aliases remain to be built
    pub fn has_alias_work(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| !s.alias_backlog.is_empty())
    }

    /// Load the checkpointed run, if any.
    ///
    /// An unreadable checkpoint is discarded with a warning and `false` is
    /// returned, so the next `begin` builds a fresh run.
    pub fn resume(&mut self) -> Result<bool> {
        if self.state.is_some() {
            return Ok(true);
        }

        match checkpoint::load_run_state(self.store.as_ref()) {
            Ok(Some(state)) => {
                info!(
                    queued = state.queue.len(),
                    current = ?state.current.as_ref().map(|i| i.to_string()),
                    offset = state.offset,
                    "Resuming sync from checkpoint"
                );
                self.state = Some(state);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) if e.requires_rebuild() => {
                warn!(error = %e, "Discarding unreadable checkpoint");
                checkpoint::clear_run_state(self.store.as_ref())?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Resume the checkpointed run or start a new one.
    ///
    /// Returns `true` when an existing run was resumed; its original
    /// arguments stay in effect and `args` is ignored.
    pub fn begin(&mut self, args: SyncArgs) -> Result<bool> {
        if self.resume()? {
            return Ok(true);
        }

        let state = self.build_queue(&args)?;
        checkpoint::save_run_state(self.store.as_ref(), &state)?;
        self.state = Some(state);
        Ok(false)
    }

    /// Build the run state of a new run.
    ///
    /// Per-tenant indexables come first, tenant by tenant, then global
    /// indexables. In multi-tenant deployments every per-tenant indexable is
    /// also queued for an alias.
    #[instrument(skip(self, args), fields(put_mapping = args.put_mapping))]
    pub fn build_queue(&self, args: &SyncArgs) -> Result<RunState> {
        if let Some(wanted) = &args.indexables {
            if let Some(name) = wanted.iter().find(|n| self.registry.get(n).is_none()) {
                return Err(SyncError::UnknownIndexable { name: name.clone() });
            }
        }
        let selected = |name: &String| {
            args.indexables
                .as_ref()
                .map_or(true, |wanted| wanted.contains(name))
        };

        let per_tenant: Vec<String> = self
            .registry
            .names(false)
            .into_iter()
            .filter(selected)
            .collect();
        let global: Vec<String> = self
            .registry
            .names(true)
            .into_iter()
            .filter(selected)
            .collect();

        let mut state = RunState::new(args.clone());

        if self.tenants.is_multi_tenant() {
            let tenants =
                self.tenants
                    .list_tenants()
                    .map_err(|e| SyncError::TenantDirectory {
                        reason: format!("{:#}", e),
                    })?;

            for tenant in tenants.iter().filter(|t| t.indexable) {
                for name in &per_tenant {
                    state
                        .queue
                        .push_back(WorkItem::for_tenant(name.as_str(), args.put_mapping, tenant));
                    state.push_alias(name);
                }
            }
        } else if !per_tenant.is_empty() {
            let tenant = self
                .tenants
                .current()
                .map_err(|e| SyncError::TenantDirectory {
                    reason: format!("{:#}", e),
                })?;

            for name in &per_tenant {
                state
                    .queue
                    .push_back(WorkItem::for_tenant(name.as_str(), args.put_mapping, &tenant));
            }
        }

        for name in &global {
            state
                .queue
                .push_back(WorkItem::global(name.as_str(), args.put_mapping));
        }

        let state = self.hooks.filter_run_state(state, args);

        checkpoint::save_last_sync(self.store.as_ref(), Utc::now())?;
        self.store.delete(NEEDS_UPGRADE_KEY)?;
        self.store.delete(FEATURE_AUTO_ACTIVATED_KEY)?;

        info!(
            items = state.queue.len(),
            aliases = state.alias_backlog.len(),
            "Sync queue built"
        );
        Ok(state)
    }

    /// Drive a whole run: resume or start, process every item and alias,
    /// then finalize.
    pub fn run_full_index(
        &mut self,
        args: SyncArgs,
        sink: &dyn ProgressSink,
    ) -> Result<Option<SyncReport>> {
        if self.begin(args)? {
            info!("Continuing interrupted sync");
        }

        while self.has_work() {
            self.process_next_step(sink)?;
        }
        while self.has_alias_work() {
            self.process_next_alias(sink)?;
        }
        self.finalize(sink)
    }

    /// Perform exactly one unit of work of the checkpointed run.
    ///
    /// This is the entry point for drivers that get one tick per
    /// invocation. It does not start a run; call `begin` for that.
    pub fn tick(&mut self, sink: &dyn ProgressSink) -> Result<Tick> {
        if !self.resume()? {
            return Ok(Tick::Idle);
        }

        if self.has_work() {
            self.process_next_step(sink)?;
            Ok(Tick::Step)
        } else if self.has_alias_work() {
            self.process_next_alias(sink)?;
            Ok(Tick::Alias)
        } else {
            self.finalize(sink)?;
            Ok(Tick::Finished)
        }
    }

    /// Advance the queue by one step.
    ///
    /// Dequeues the next item if none is in progress, then either replaces
    /// its mapping (the whole step) or indexes one page of it. Does nothing
    /// when no work remains.
    #[instrument(skip(self, sink))]
    pub fn process_next_step(&mut self, sink: &dyn ProgressSink) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };

        if state.is_first_step {
            state.is_first_step = false;
            self.hooks.on_sync_start(state);
        }

        let dequeued = state.current.is_none();
        if dequeued {
            let Some(next) = state.queue.pop_front() else {
                return Ok(());
            };
            state.current = Some(next);
            state.offset = 0;
            state.found_items = 0;
        }
        let Some(item) = state.current.clone() else {
            return Ok(());
        };

        let Some(indexable) = self.registry.get(&item.indexable) else {
            self.finish_item();
            return self.report(
                sink,
                ProgressStatus::Error,
                format!("Unknown indexable {}, skipping", item),
            );
        };

        if dequeued {
            let message = match item.tenant_id() {
                Some(id) => format!("Indexing {} on site {}...", indexable.labels().plural, id),
                None => format!("Indexing {}...", indexable.labels().plural),
            };
            self.report(sink, ProgressStatus::Success, message)?;
        }

        let tenants = Arc::clone(&self.tenants);
        let _scope = match item.tenant_id() {
            Some(id) if tenants.is_multi_tenant() => match TenantScope::enter(tenants.as_ref(), id) {
                Ok(scope) => Some(scope),
                Err(e) => {
                    self.finish_item();
                    return self.report(
                        sink,
                        ProgressStatus::Error,
                        format!("Could not switch to site {}: {:#}", id, e),
                    );
                }
            },
            _ => None,
        };

        if item.put_mapping {
            self.replace_mapping(indexable.as_ref(), sink)
        } else {
            self.index_page(indexable.as_ref(), sink)
        }
    }

    /// Delete and recreate the current item's index.
    ///
    /// The item's `put_mapping` flag is cleared first, so a resumed step
    /// never remaps twice.
    fn replace_mapping(&mut self, indexable: &dyn Indexable, sink: &dyn ProgressSink) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        let Some(current) = state.current.as_mut() else {
            return Ok(());
        };
        if !current.put_mapping {
            return Ok(());
        }
        current.put_mapping = false;
        let item = current.clone();

        if self.hooks.skip_mapping_reset(&item, &state.args) {
            info!(item = %item, "Keeping existing index");
            return self.save();
        }

        if let Err(e) = indexable.delete_index() {
            debug!(item = %item, error = %e, "Index deletion failed");
        }

        let result = indexable.put_mapping();
        self.hooks.on_mapping_sent(&item, result.is_ok());

        match result {
            Ok(()) => {
                info!(item = %item, index = %indexable.index_name(), "Mapping sent");
                self.report(sink, ProgressStatus::Success, "Mapping sent")
            }
            Err(e) => {
                warn!(item = %item, error = %e, "Mapping failed");
                self.report(sink, ProgressStatus::Error, "Mapping failed")
            }
        }
    }

    /// Query the next page of the current item and index it.
    fn index_page(&mut self, indexable: &dyn Indexable, sink: &dyn ProgressSink) -> Result<()> {
        let Some(state) = self.state.as_ref() else {
            return Ok(());
        };
        let Some(item) = state.current.clone() else {
            return Ok(());
        };
        let offset = state.offset;
        let per_page = self.hooks.per_page(&item, self.per_page).max(1);
        let labels = indexable.labels().clone();

        self.hooks.before_page(&item, offset, offset == 0);

        let page = match indexable.query(&QueryArgs { per_page, offset }) {
            Ok(page) => page,
            Err(e) => {
                self.finish_item();
                return self.report(
                    sink,
                    ProgressStatus::Error,
                    format!("Failed to query {}: {:#}", labels.plural, e),
                );
            }
        };

        let found = page.total;
        if let Some(state) = self.state.as_mut() {
            state.found_items = found;
        }

        if found == 0 || offset >= found || page.objects.is_empty() {
            info!(item = %item, found, "Finished item");
            self.finish_item();
            return self.save();
        }

        let mut ids = Vec::with_capacity(page.objects.len());
        let mut skipped = 0u64;
        for object in &page.objects {
            if self.hooks.skip_object(&item, object) {
                skipped += 1;
            } else {
                ids.push(object.id.clone());
            }
        }

        let new_offset = offset + page.objects.len() as u64;
        if let Some(state) = self.state.as_mut() {
            state.offset = new_offset;
            state.totals.skipped += skipped;
        }

        if !ids.is_empty() {
            let (synced, failed, error) = match indexable.bulk_index(&ids) {
                Ok(response) if response.errors => {
                    let failed_items = response.failed_items();
                    let failed = failed_items.len() as u64;
                    let text = format_bulk_failures(&labels, &failed_items);
                    ((ids.len() as u64).saturating_sub(failed), failed, Some(text))
                }
                Ok(_) => (ids.len() as u64, 0, None),
                Err(e) => (0, ids.len() as u64, Some(format!("{:#}", e))),
            };

            if let Some(state) = self.state.as_mut() {
                state.totals.synced += synced;
                state.totals.failed += failed;
            }
            if let Some(text) = error {
                warn!(item = %item, failed, "Bulk index reported failures");
                self.report(sink, ProgressStatus::Error, text)?;
            }
        }

        debug!(item = %item, offset = new_offset, found, skipped, "Page indexed");
        self.report(
            sink,
            ProgressStatus::Success,
            format!("Processed {}/{}...", new_offset, found),
        )
    }

    /// Build the alias of the next per-tenant indexable in the backlog.
    ///
    /// The alias spans the index of every indexable tenant. It is not
    /// created when any of those tenants cannot be switched to.
    #[instrument(skip(self, sink))]
    pub fn process_next_alias(&mut self, sink: &dyn ProgressSink) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        if state.alias_backlog.is_empty() {
            return Ok(());
        }
        let name = state.alias_backlog.remove(0);

        let Some(indexable) = self.registry.get(&name) else {
            return self.report(
                sink,
                ProgressStatus::Error,
                format!("Unknown indexable {}, skipping alias", name),
            );
        };
        let plural = indexable.labels().plural.clone();

        let tenants = match self.tenants.list_tenants() {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!(indexable = %name, error = %e, "Failed to list tenants");
                return self.report(
                    sink,
                    ProgressStatus::Error,
                    format!("Network alias creation failed for {}", plural),
                );
            }
        };

        let mut indices = Vec::with_capacity(tenants.len());
        let mut unreachable = Vec::new();
        for tenant in tenants.iter().filter(|t| t.indexable) {
            match with_tenant(self.tenants.as_ref(), tenant.id, || indexable.index_name()) {
                Ok(index) => indices.push(index),
                Err(e) => unreachable.push((tenant.id, e)),
            }
        }

        if !unreachable.is_empty() {
            for (id, e) in unreachable {
                self.report(
                    sink,
                    ProgressStatus::Error,
                    format!("Could not switch to site {}: {:#}", id, e),
                )?;
            }
            warn!(indexable = %name, "Network alias would miss site indices, not created");
            return self.report(
                sink,
                ProgressStatus::Error,
                format!("Network alias creation failed for {}", plural),
            );
        }

        match indexable.create_alias(&indices) {
            Ok(()) => {
                info!(indexable = %name, indices = indices.len(), "Network alias created");
                self.report(
                    sink,
                    ProgressStatus::Success,
                    format!("Network alias created for {}", plural),
                )
            }
            Err(e) => {
                warn!(indexable = %name, error = %e, "Network alias creation failed");
                self.report(
                    sink,
                    ProgressStatus::Error,
                    format!("Network alias creation failed for {}", plural),
                )
            }
        }
    }

    /// Discard the completed run and report completion.
    ///
    /// Returns `None` (and changes nothing) when no run is active or work
    /// remains.
    pub fn finalize(&mut self, sink: &dyn ProgressSink) -> Result<Option<SyncReport>> {
        match &self.state {
            None => return Ok(None),
            Some(state) if !state.is_done() => {
                warn!("Refusing to finalize a sync with work remaining");
                return Ok(None);
            }
            Some(_) => {}
        }
        let Some(state) = self.state.take() else {
            return Ok(None);
        };

        let report = SyncReport {
            started_at: state.started_at,
            finished_at: Utc::now(),
            totals: state.totals,
            args: state.args,
        };
        checkpoint::save_report(self.store.as_ref(), &report)?;
        checkpoint::clear_run_state(self.store.as_ref())?;

        self.hooks.on_sync_complete(&report);

        info!(
            synced = report.totals.synced,
            skipped = report.totals.skipped,
            failed = report.totals.failed,
            errors = report.totals.errors,
            seconds = report.duration().num_seconds(),
            "Sync complete"
        );
        sink.report(&ProgressEvent {
            message: "Sync complete".to_string(),
            status: ProgressStatus::Success,
            state: None,
        });

        Ok(Some(report))
    }

    /// Abandon the run in progress and delete its checkpoint.
    pub fn cancel(&mut self) -> Result<()> {
        if self.state.take().is_some() {
            info!("Sync cancelled");
        }
        checkpoint::clear_run_state(self.store.as_ref())
    }

    /// Whether `indexable` (for `tenant`) is currently being wiped and
    /// rebuilt.
    ///
    /// Looks at the remaining queue, then the item in progress. The first
    /// entry for `indexable` that no longer remaps ends the search. The hook
    /// has the final word, including when no run is active.
    pub fn is_full_reindexing(&self, indexable: &str, tenant: Option<TenantId>) -> bool {
        let Some(state) = &self.state else {
            return self.hooks.is_full_reindexing(indexable, tenant, false);
        };

        let mut reindexing = false;
        for item in state.queue.iter().chain(state.current.iter()) {
            if item.indexable != indexable {
                continue;
            }
            if !item.put_mapping {
                break;
            }
            if item.tenant_id() == tenant {
                reindexing = true;
                break;
            }
        }

        self.hooks.is_full_reindexing(indexable, tenant, reindexing)
    }

    /// Start time of the most recent run
    pub fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        checkpoint::load_last_sync(self.store.as_ref())
    }

    /// Report of the most recent completed run
    pub fn last_sync_report(&self) -> Result<Option<SyncReport>> {
        checkpoint::load_report(self.store.as_ref())
    }

    /// Mark the current item complete
    fn finish_item(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.offset = 0;
            state.current = None;
        }
    }

    /// Checkpoint the run state
    fn save(&self) -> Result<()> {
        match &self.state {
            Some(state) => checkpoint::save_run_state(self.store.as_ref(), state),
            None => Ok(()),
        }
    }

    /// Checkpoint, then forward an event to the sink
    fn report(
        &mut self,
        sink: &dyn ProgressSink,
        status: ProgressStatus,
        message: impl Into<String>,
    ) -> Result<()> {
        if status == ProgressStatus::Error {
            if let Some(state) = self.state.as_mut() {
                state.totals.errors += 1;
            }
        }
        self.save()?;

        sink.report(&ProgressEvent {
            message: message.into(),
            status,
            state: self.state.clone(),
        });
        Ok(())
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("per_page", &self.per_page)
            .field("running", &self.is_running())
            .field("queued", &self.state.as_ref().map(|s| s.queue.len()))
            .finish()
    }
}
