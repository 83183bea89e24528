//! Conversion between persisted headers and live group state.
//!
//! A [`PersistedHeader`] is the only thing written to disk for a group: the
//! group's sequence numbers, the id lookup store's state, and one
//! [`ViewState`] per index in definition order. It never carries the
//! signature; that is recomputed from the design document.

use crate::config::TreeDefaults;
use crate::design::GroupDefinition;
use crate::error::{Result, SpatialError};
use crate::server::Database;
use crate::state::{IdLookup, IndexGroupState, SpatialTree, TreeConfig, ViewRuntime};
use crate::storage::{HeaderRecord, IndexFile};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persisted state of one index: tree configuration and sequence numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub tree: TreeConfig,
    pub update_seq: u64,
    pub purge_seq: u64,
}

/// Compact on-disk description of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedHeader {
    pub seq: u64,
    pub purge_seq: u64,
    pub id_lookup_state: Option<Bytes>,
    /// Positionally aligned with the definition's descriptors.
    pub view_states: Vec<ViewState>,
}

impl PersistedHeader {
    /// Header of a group that has indexed nothing yet.
    pub fn empty(definition: &GroupDefinition, purge_seq: u64, defaults: &TreeDefaults) -> Self {
        Self {
            seq: 0,
            purge_seq,
            id_lookup_state: None,
            view_states: definition
                .descriptors
                .iter()
                .map(|_| ViewState {
                    tree: TreeConfig::empty(defaults),
                    update_seq: 0,
                    purge_seq: 0,
                })
                .collect(),
        }
    }
}

/// Binds a header to an open file, producing live state for `definition`.
///
/// Each view state is paired with the descriptor at the same position; a
/// header with a different number of views than the definition is rejected.
pub fn materialize(
    header: PersistedHeader,
    file: Arc<IndexFile>,
    definition: &GroupDefinition,
) -> Result<IndexGroupState> {
    if header.view_states.len() != definition.descriptors.len() {
        return Err(SpatialError::InvalidFormat(format!(
            "header of {} has {} view states, definition has {} indexes",
            definition.group_name,
            header.view_states.len(),
            definition.descriptors.len()
        )));
    }

    let views = definition
        .descriptors
        .iter()
        .cloned()
        .zip(header.view_states)
        .map(|(descriptor, state)| ViewRuntime {
            descriptor,
            tree: SpatialTree::open(state.tree, Arc::clone(&file)),
            update_seq: state.update_seq,
            purge_seq: state.purge_seq,
        })
        .collect();

    Ok(IndexGroupState {
        db_name: definition.db_name.clone(),
        group_name: definition.group_name.clone(),
        signature: definition.signature,
        language: definition.language.clone(),
        design_options: definition.design_options.clone(),
        lib: definition.lib.clone(),
        views,
        id_lookup: IdLookup::open(header.id_lookup_state, Arc::clone(&file)),
        file,
        update_seq: header.seq,
        purge_seq: header.purge_seq,
    })
}

/// Projects live state back onto its persisted header.
pub fn dehydrate(state: &IndexGroupState) -> PersistedHeader {
    PersistedHeader {
        seq: state.update_seq,
        purge_seq: state.purge_seq,
        id_lookup_state: state.id_lookup.state().cloned(),
        view_states: state
            .views
            .iter()
            .map(|view| ViewState {
                tree: view.tree.config().clone(),
                update_seq: view.update_seq,
                purge_seq: view.purge_seq,
            })
            .collect(),
    }
}

/// Destroys the group's persisted data and starts it over from empty.
///
/// The file is truncated, tagged with the group's signature, and the state is
/// rebuilt from an empty header.
pub fn reset(
    db: &dyn Database,
    file: Arc<IndexFile>,
    state: &IndexGroupState,
    defaults: &TreeDefaults,
) -> Result<IndexGroupState> {
    reset_definition(db, file, &state.definition(), defaults)
}

pub(crate) fn reset_definition(
    db: &dyn Database,
    file: Arc<IndexFile>,
    definition: &GroupDefinition,
    defaults: &TreeDefaults,
) -> Result<IndexGroupState> {
    file.truncate()?;
    file.write_header(&HeaderRecord {
        signature: definition.signature,
        header: None,
    })?;
    log::debug!(
        "reset index {} of {} in {}",
        definition.signature,
        definition.group_name,
        definition.db_name
    );

    let header = PersistedHeader::empty(definition, db.purge_seq(), defaults);
    materialize(header, file, definition)
}

/// Persists a checkpoint of `state`.
pub fn checkpoint(state: &IndexGroupState) -> Result<()> {
    state.file.write_header(&HeaderRecord {
        signature: state.signature,
        header: Some(dehydrate(state)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{DesignDocument, compile};
    use crate::state::RootPointer;
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    struct FixedDb {
        purge_seq: u64,
    }

    impl Database for FixedDb {
        fn name(&self) -> &str {
            "places"
        }

        fn update_seq(&self) -> u64 {
            100
        }

        fn purge_seq(&self) -> u64 {
            self.purge_seq
        }
    }

    fn definition() -> GroupDefinition {
        let ddoc = DesignDocument::new(
            "_design/geo",
            json!({"spatial": {"a": "S1", "b": "S1", "c": "S2"}}),
        );
        compile("places", &ddoc).unwrap()
    }

    fn open_file() -> (TempDir, Arc<IndexFile>) {
        let dir = tempdir().unwrap();
        let file = Arc::new(IndexFile::open(dir.path().join("g.spatial")).unwrap());
        (dir, file)
    }

    #[test]
    fn test_materialize_empty_header() {
        let (_dir, file) = open_file();
        let def = definition();
        let header = PersistedHeader::empty(&def, 5, &TreeDefaults::default());

        let state = materialize(header, Arc::clone(&file), &def).unwrap();

        assert_eq!(state.update_seq, 0);
        assert_eq!(state.purge_seq, 5);
        assert_eq!(state.views.len(), 2);
        for (view, descriptor) in state.views.iter().zip(&def.descriptors) {
            assert_eq!(&view.descriptor, descriptor);
            assert_eq!(view.update_seq, 0);
            assert_eq!(view.purge_seq, 0);
            assert_eq!(view.tree.root(), None);
            assert_eq!(view.tree.config().min_fill_rate, 0.4);
        }
        assert!(state.id_lookup.state().is_none());
        assert!(state.shares_one_file());
        assert!(Arc::ptr_eq(&state.file, &file));
        assert_eq!(state.definition(), def);
    }

    #[test]
    fn test_dehydrate_materialize_roundtrip() {
        let (_dir, file) = open_file();
        let def = definition();
        let mut state = materialize(
            PersistedHeader::empty(&def, 0, &TreeDefaults::default()),
            Arc::clone(&file),
            &def,
        )
        .unwrap();

        state.update_seq = 17;
        state.purge_seq = 2;
        state.id_lookup.set_state(Some(Bytes::from_static(b"ids")));
        state.views[0].update_seq = 17;
        state.views[0].purge_seq = 2;
        state.views[0].tree.set_root(Some(RootPointer {
            offset: 512,
            size: 9,
        }));
        state.views[1].update_seq = 11;

        let header = dehydrate(&state);
        let restored = materialize(header.clone(), Arc::clone(&file), &def).unwrap();

        assert_eq!(restored.update_seq, 17);
        assert_eq!(restored.purge_seq, 2);
        assert_eq!(restored.id_lookup.state(), Some(&Bytes::from_static(b"ids")));
        for (a, b) in state.views.iter().zip(&restored.views) {
            assert_eq!(a.descriptor, b.descriptor);
            assert_eq!(a.tree.config(), b.tree.config());
            assert_eq!(a.update_seq, b.update_seq);
            assert_eq!(a.purge_seq, b.purge_seq);
        }
        assert_eq!(dehydrate(&restored), header);
    }

    #[test]
    fn test_materialize_rejects_misaligned_header() {
        let (_dir, file) = open_file();
        let def = definition();
        let mut header = PersistedHeader::empty(&def, 0, &TreeDefaults::default());
        header.view_states.pop();

        let err = materialize(header, file, &def).unwrap_err();
        assert!(matches!(err, SpatialError::InvalidFormat(_)));
    }

    #[test]
    fn test_checkpoint_and_reset() {
        let (_dir, file) = open_file();
        let def = definition();
        let db = FixedDb { purge_seq: 4 };

        let mut state =
            reset_definition(&db, Arc::clone(&file), &def, &TreeDefaults::default()).unwrap();
        let placeholder = file.read_header().unwrap().unwrap();
        assert_eq!(placeholder.signature, def.signature);
        assert!(placeholder.header.is_none());
        assert_eq!(state.purge_seq, 4);

        state.update_seq = 30;
        state.views[1].update_seq = 30;
        checkpoint(&state).unwrap();

        let stored = file.read_header().unwrap().unwrap();
        assert_eq!(stored.header.as_ref().unwrap().seq, 30);
        assert_eq!(stored.header.unwrap(), dehydrate(&state));

        let fresh = reset(&db, Arc::clone(&file), &state, &TreeDefaults::default()).unwrap();
        assert_eq!(fresh.update_seq, 0);
        assert!(fresh.views.iter().all(|v| v.update_seq == 0));
        assert_eq!(fresh.signature, state.signature);
        assert!(file.read_header().unwrap().unwrap().header.is_none());
    }
}
