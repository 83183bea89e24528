//! Builder for index servers.
//!
//! Collects the index root directory, configuration and collaborators, then
//! validates everything before handing out an [`IndexServer`].

use crate::config::{Config, TreeDefaults};
use crate::error::{Result, SpatialError};
use crate::server::{Database, IndexServer, Updater};
use std::path::PathBuf;
use std::sync::Arc;

/// Builder for an [`IndexServer`].
#[derive(Default)]
pub struct IndexServerBuilder {
    root_dir: Option<PathBuf>,
    config: Config,
    database: Option<Arc<dyn Database>>,
    updater: Option<Arc<dyn Updater>>,
}

impl IndexServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory index files are kept under. Created on build if missing.
    pub fn root_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.root_dir = Some(path.into());
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Tree settings used for groups created from scratch.
    pub fn tree_defaults(mut self, tree: TreeDefaults) -> Self {
        self.config = self.config.with_tree(tree);
        self
    }

    pub fn database(mut self, db: Arc<dyn Database>) -> Self {
        self.database = Some(db);
        self
    }

    pub fn updater(mut self, updater: Arc<dyn Updater>) -> Self {
        self.updater = Some(updater);
        self
    }

    /// Validates the configuration and creates the root directory.
    pub fn build(self) -> Result<IndexServer> {
        self.config.validate().map_err(SpatialError::InvalidConfig)?;

        let root_dir = self
            .root_dir
            .ok_or_else(|| SpatialError::InvalidConfig("root directory not set".to_string()))?;
        let database = self
            .database
            .ok_or_else(|| SpatialError::InvalidConfig("database not set".to_string()))?;
        let updater = self
            .updater
            .ok_or_else(|| SpatialError::InvalidConfig("updater not set".to_string()))?;

        std::fs::create_dir_all(&root_dir)?;
        log::debug!(
            "index server for {} rooted at {}",
            database.name(),
            root_dir.display()
        );

        Ok(IndexServer::new(root_dir, self.config, database, updater))
    }
}

impl std::fmt::Debug for IndexServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexServerBuilder")
            .field("root_dir", &self.root_dir)
            .field("config", &self.config)
            .field("database", &self.database.as_ref().map(|db| db.name().to_string()))
            .field("updater", &self.updater.is_some())
            .finish()
    }
}
