//! Live state of an open spatial index group.
//!
//! An [`IndexGroupState`] owns one [`ViewRuntime`] per index of its group
//! definition. Every tree handle and the id lookup handle share the group's
//! single [`IndexFile`].

use crate::design::{GroupDefinition, IndexDescriptor, Signature};
use crate::storage::IndexFile;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// Location of a tree root inside the index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootPointer {
    pub offset: u64,
    /// Number of entries below the root
    pub size: u64,
}

/// Persisted configuration of a spatial tree. Never its node contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    pub root: Option<RootPointer>,
    pub kp_chunk_threshold: usize,
    pub kv_chunk_threshold: usize,
    pub min_fill_rate: f64,
}

impl TreeConfig {
    /// Configuration of a tree with no root yet.
    pub fn empty(defaults: &crate::config::TreeDefaults) -> Self {
        Self {
            root: None,
            kp_chunk_threshold: defaults.kp_chunk_threshold,
            kv_chunk_threshold: defaults.kv_chunk_threshold,
            min_fill_rate: defaults.min_fill_rate,
        }
    }
}

/// Ordering applied to tree keys. Only raw ascending order exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyCollation {
    #[default]
    Raw,
}

impl KeyCollation {
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyCollation::Raw => a.cmp(b),
        }
    }
}

/// Handle on a spatial tree stored in the group's index file.
#[derive(Debug, Clone)]
pub struct SpatialTree {
    config: TreeConfig,
    collation: KeyCollation,
    file: Arc<IndexFile>,
}

impl SpatialTree {
    pub fn open(config: TreeConfig, file: Arc<IndexFile>) -> Self {
        Self {
            config,
            collation: KeyCollation::Raw,
            file,
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn root(&self) -> Option<RootPointer> {
        self.config.root
    }

    /// Moves the root after the tree engine has written new nodes.
    pub fn set_root(&mut self, root: Option<RootPointer>) {
        self.config.root = root;
    }

    /// Entries below the root, zero for an empty tree.
    pub fn entry_count(&self) -> u64 {
        self.config.root.map_or(0, |root| root.size)
    }

    pub fn collation(&self) -> KeyCollation {
        self.collation
    }

    pub fn file(&self) -> &Arc<IndexFile> {
        &self.file
    }
}

/// Handle on the document id lookup store.
#[derive(Debug, Clone)]
pub struct IdLookup {
    state: Option<Bytes>,
    file: Arc<IndexFile>,
}

impl IdLookup {
    pub fn open(state: Option<Bytes>, file: Arc<IndexFile>) -> Self {
        Self { state, file }
    }

    /// Opaque persisted state of the store, `None` while empty.
    pub fn state(&self) -> Option<&Bytes> {
        self.state.as_ref()
    }

    pub fn set_state(&mut self, state: Option<Bytes>) {
        self.state = state;
    }

    pub fn file(&self) -> &Arc<IndexFile> {
        &self.file
    }
}

/// One index of a group together with its open tree.
#[derive(Debug, Clone)]
pub struct ViewRuntime {
    pub descriptor: IndexDescriptor,
    pub tree: SpatialTree,
    pub update_seq: u64,
    pub purge_seq: u64,
}

impl ViewRuntime {
    pub fn serves(&self, view_name: &str) -> bool {
        self.descriptor.has_view(view_name)
    }
}

/// An index group bound to its open file.
#[derive(Debug, Clone)]
pub struct IndexGroupState {
    pub db_name: String,
    pub group_name: String,
    pub signature: Signature,
    pub language: String,
    pub design_options: Map<String, Value>,
    pub lib: Value,
    pub views: Vec<ViewRuntime>,
    pub file: Arc<IndexFile>,
    pub update_seq: u64,
    pub purge_seq: u64,
    pub id_lookup: IdLookup,
}

impl IndexGroupState {
    /// The definition this state was materialized from.
    pub fn definition(&self) -> GroupDefinition {
        GroupDefinition {
            db_name: self.db_name.clone(),
            group_name: self.group_name.clone(),
            signature: self.signature,
            language: self.language.clone(),
            design_options: self.design_options.clone(),
            lib: self.lib.clone(),
            descriptors: self.views.iter().map(|v| v.descriptor.clone()).collect(),
        }
    }

    /// Finds the index serving `view_name`.
    pub fn view(&self, view_name: &str) -> Option<&ViewRuntime> {
        self.views.iter().find(|v| v.serves(view_name))
    }

    pub fn view_mut(&mut self, view_name: &str) -> Option<&mut ViewRuntime> {
        self.views.iter_mut().find(|v| v.serves(view_name))
    }

    /// True when every handle of the group is bound to the group's file.
    pub fn shares_one_file(&self) -> bool {
        Arc::ptr_eq(self.id_lookup.file(), &self.file)
            && self
                .views
                .iter()
                .all(|v| Arc::ptr_eq(v.tree.file(), &self.file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeDefaults;
    use tempfile::tempdir;

    #[test]
    fn test_raw_collation() {
        let raw = KeyCollation::Raw;
        assert_eq!(raw.compare(b"a", b"b"), Ordering::Less);
        assert_eq!(raw.compare(b"b", b"a"), Ordering::Greater);
        assert_eq!(raw.compare(b"ab", b"ab"), Ordering::Equal);
        assert_eq!(raw.compare(b"a", b"ab"), Ordering::Less);
    }

    #[test]
    fn test_tree_root_updates() {
        let dir = tempdir().unwrap();
        let file = Arc::new(IndexFile::open(dir.path().join("t.spatial")).unwrap());

        let mut tree = SpatialTree::open(TreeConfig::empty(&TreeDefaults::default()), file);
        assert_eq!(tree.root(), None);
        assert_eq!(tree.entry_count(), 0);
        assert_eq!(tree.collation(), KeyCollation::Raw);

        tree.set_root(Some(RootPointer {
            offset: 4096,
            size: 12,
        }));
        assert_eq!(tree.entry_count(), 12);
        assert_eq!(tree.config().kp_chunk_threshold, 7168);
    }
}
