//! Extension points of a sync run.
//!
//! `SyncHooks` lets unrelated code observe or override individual phases
//! without the run-state machine depending on it. Every method has a no-op
//! default: filters return their input unchanged and notifications do
//! nothing. Implement only the methods you need.
//!
//! ## Phases
//!
//! | Phase              | Method                | Kind         |
//! |--------------------|-----------------------|--------------|
//! | Queue built        | `filter_run_state`    | filter       |
//! | First step         | `on_sync_start`       | notification |
//! | Before remap       | `skip_mapping_reset`  | filter       |
//! | After remap        | `on_mapping_sent`     | notification |
//! | Page size          | `per_page`            | filter       |
//! | Before each page   | `before_page`         | notification |
//! | Each object        | `skip_object`         | filter       |
//! | Run complete       | `on_sync_complete`    | notification |
//! | Reindex detection  | `is_full_reindexing`  | filter       |

use crate::backend::ContentObject;
use crate::types::{RunState, SyncArgs, SyncReport, TenantId, WorkItem};

/// Observer and override points invoked by `SyncManager`.
pub trait SyncHooks: Send + Sync {
    /// Replace the freshly built run state before it is first checkpointed
    fn filter_run_state(&self, state: RunState, _args: &SyncArgs) -> RunState {
        state
    }

    /// Called once, on the first step of a run
    fn on_sync_start(&self, _state: &RunState) {}

    /// Return true to keep the existing index for this item (additive sync)
    fn skip_mapping_reset(&self, _item: &WorkItem, _args: &SyncArgs) -> bool {
        false
    }

    /// Called after an index was deleted and remapped
    fn on_mapping_sent(&self, _item: &WorkItem, _success: bool) {}

    /// Number of objects fetched per step
    fn per_page(&self, _item: &WorkItem, default: usize) -> usize {
        default
    }

    /// Called before each page query; `is_start` is set on the first page
    fn before_page(&self, _item: &WorkItem, _offset: u64, _is_start: bool) {}

    /// Return true to leave this object out of the batch
    fn skip_object(&self, _item: &WorkItem, _object: &ContentObject) -> bool {
        false
    }

    /// Called after the run state was discarded
    fn on_sync_complete(&self, _report: &SyncReport) {}

    /// Final say on whether an indexable is being wiped and rebuilt
    ///
    /// `computed` is the answer derived from the run state, or false when no
    /// run is active.
    fn is_full_reindexing(
        &self,
        _indexable: &str,
        _tenant: Option<TenantId>,
        computed: bool,
    ) -> bool {
        computed
    }
}

/// Hooks that change nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SyncHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_defaults() {
        let hooks = NoopHooks;
        let item = WorkItem::global("post", true);
        let args = SyncArgs::default();

        assert!(!hooks.skip_mapping_reset(&item, &args));
        assert_eq!(hooks.per_page(&item, 350), 350);
        assert!(!hooks.skip_object(&item, &ContentObject::new("1")));
        assert!(hooks.is_full_reindexing("post", None, true));
        assert!(!hooks.is_full_reindexing("post", Some(TenantId(1)), false));

        let state = RunState::new(args.clone());
        assert_eq!(hooks.filter_run_state(state.clone(), &args), state);
    }
}
