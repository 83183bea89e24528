//! Query-time access to spatial views.

use crate::bbox::Interval;
use crate::design::{DesignDocument, Signature, compile};
use crate::error::{Result, SpatialError};
use crate::query::{QueryArgs, Stale, query_boxes, validate_args};
use crate::server::{GroupRef, IndexServer};
use crate::state::ViewRuntime;
use serde_json::json;
use smallvec::SmallVec;

/// A view handed out for one query.
///
/// The view's group stays pinned in the server until this is dropped, so an
/// idle sweep will not close it mid-query.
pub struct PinnedView {
    _group: GroupRef,
    group_signature: Signature,
    view: ViewRuntime,
    args: QueryArgs,
    query_signature: String,
}

impl PinnedView {
    pub fn view(&self) -> &ViewRuntime {
        &self.view
    }

    /// Validated arguments, with any `bbox` already folded into `range`.
    pub fn args(&self) -> &QueryArgs {
        &self.args
    }

    pub fn group_signature(&self) -> Signature {
        self.group_signature
    }

    /// Cache key of this result set. Changes whenever the view advances.
    pub fn query_signature(&self) -> &str {
        &self.query_signature
    }

    pub fn update_seq(&self) -> u64 {
        self.view.update_seq
    }

    /// Search boxes to run against the tree, `None` for an unbounded query.
    pub fn query_boxes(&self) -> Option<SmallVec<[Vec<Interval>; 4]>> {
        query_boxes(&self.args)
    }
}

impl std::fmt::Debug for PinnedView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedView")
            .field("group_signature", &self.group_signature)
            .field("view", &self.view.descriptor.view_names)
            .field("update_seq", &self.view.update_seq)
            .field("query_signature", &self.query_signature)
            .finish()
    }
}

impl IndexServer {
    /// Looks up `view_name` in the group defined by `ddoc`.
    ///
    /// Arguments are validated before anything is opened. With
    /// [`Stale::Exact`] the call blocks until the group has indexed the
    /// database's current sequence; [`Stale::Ok`] returns whatever is there,
    /// and [`Stale::UpdateAfter`] does the same and then schedules a refresh.
    pub fn get_view(
        &self,
        ddoc: &DesignDocument,
        view_name: &str,
        args: QueryArgs,
    ) -> Result<PinnedView> {
        let args = validate_args(args)?;
        let definition = compile(self.database().name(), ddoc)?;
        let group = self.resolve(&definition)?;

        let min_seq = match args.stale {
            Stale::Ok | Stale::UpdateAfter => 0,
            Stale::Exact => self.database().update_seq(),
        };
        let state = self.wait_until(&group, min_seq)?;

        if args.stale == Stale::UpdateAfter {
            self.request_update(&group, self.database().update_seq());
        }

        let view = state
            .view(view_name)
            .cloned()
            .ok_or_else(|| SpatialError::ViewNotFound {
                group: ddoc.id.clone(),
                view: view_name.to_string(),
            })?;

        let query_signature = query_signature(&state.signature, &view, &args)?;
        log::trace!(
            "serving {}/{} at seq {} ({})",
            ddoc.id,
            view_name,
            view.update_seq,
            args.stale
        );

        Ok(PinnedView {
            _group: group,
            group_signature: state.signature,
            view,
            args,
            query_signature,
        })
    }
}

/// Fingerprint of a query against one state of one view.
///
/// Covers the group signature, the view's sequence numbers and the query
/// arguments minus their extension data. Returned as lowercase hex.
pub fn query_signature(group: &Signature, view: &ViewRuntime, args: &QueryArgs) -> Result<String> {
    let mut args = args.clone();
    args.extra.clear();

    let encoded = serde_json::to_vec(&json!([
        group.to_hex(),
        view.update_seq,
        view.purge_seq,
        args
    ]))?;
    Ok(Signature::digest(encoded).to_hex())
}
