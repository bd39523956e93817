//! Atomic publication of model snapshots

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use relcat_common::Result;
use tracing::{info, warn};

use crate::model::Model;

/// Holds the current model snapshot for concurrent readers.
///
/// Readers clone the `Arc` and keep a consistent view for as long as they
/// hold it. A refresh replaces the snapshot only after the new model has
/// been built completely.
pub struct CatalogCell {
    current: RwLock<Arc<Model>>,
    version: RwLock<u64>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

impl CatalogCell {
    pub fn new(model: Model) -> Self {
        Self {
            current: RwLock::new(Arc::new(model)),
            version: RwLock::new(1),
            last_refresh: RwLock::new(Some(Utc::now())),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Model> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> u64 {
        *self.version.read()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read()
    }

    /// Replace the snapshot with `model`.
    pub fn publish(&self, model: Model) -> Arc<Model> {
        let model = Arc::new(model);
        {
            let mut current = self.current.write();
            let mut version = self.version.write();
            *current = Arc::clone(&model);
            *version += 1;
        }
        *self.last_refresh.write() = Some(Utc::now());
        model
    }

    /// Build a new model and publish it. On error the old snapshot stays.
    pub fn refresh<F>(&self, build: F) -> Result<Arc<Model>>
    where
        F: FnOnce() -> Result<Model>,
    {
        match build() {
            Ok(model) => {
                let published = self.publish(model);
                info!(version = self.version(), "published catalog model");
                Ok(published)
            }
            Err(e) => {
                warn!(error = %e, "model refresh failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    /// Apply `change` to a copy of the current model and publish the copy.
    pub fn update<F, T>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut Model) -> Result<T>,
    {
        let mut current = self.current.write();
        let mut next = Model::clone(&current);
        let out = change(&mut next)?;
        *current = Arc::new(next);
        *self.version.write() += 1;
        drop(current);
        *self.last_refresh.write() = Some(Utc::now());
        Ok(out)
    }
}
