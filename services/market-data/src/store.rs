//! Depth snapshot storage
//!
//! Level-2 and full projector snapshots are stored per instrument under
//! fixed key prefixes, latest-wins. Any blob store works underneath.

use std::sync::Arc;
use std::time::Duration;

use matching_engine::StoreError;
use persistence::BlobStore;

use crate::depth::{DepthFullSnapshot, Level2Snapshot};

const LEVEL2_KEY_PREFIX: &str = "order_book_level2_snapshot_";
const FULL_KEY_PREFIX: &str = "order_book_full_snapshot_";
const DEPTH_SNAPSHOT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Storage for projector snapshots.
pub trait DepthSnapshotStore: Send + Sync {
    fn store_level2(&self, snapshot: &Level2Snapshot) -> Result<(), StoreError>;
    fn store_full(&self, snapshot: &DepthFullSnapshot) -> Result<(), StoreError>;
    fn get_last_level2(&self, product_id: &str) -> Result<Option<Level2Snapshot>, StoreError>;
    fn get_last_full(&self, product_id: &str) -> Result<Option<DepthFullSnapshot>, StoreError>;
}

fn storage_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// [`DepthSnapshotStore`] over a key/value blob store.
pub struct BlobDepthStore {
    store: Arc<dyn BlobStore>,
}

impl BlobDepthStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    fn put<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let blob = serde_json::to_vec(value).map_err(storage_err)?;
        self.store
            .put(key, &blob, DEPTH_SNAPSHOT_TTL)
            .map_err(storage_err)
    }

    fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).map_err(storage_err)? {
            Some(blob) => Ok(Some(serde_json::from_slice(&blob).map_err(storage_err)?)),
            None => Ok(None),
        }
    }
}

impl DepthSnapshotStore for BlobDepthStore {
    fn store_level2(&self, snapshot: &Level2Snapshot) -> Result<(), StoreError> {
        self.put(
            &format!("{}{}", LEVEL2_KEY_PREFIX, snapshot.product_id),
            snapshot,
        )
    }

    fn store_full(&self, snapshot: &DepthFullSnapshot) -> Result<(), StoreError> {
        self.put(
            &format!("{}{}", FULL_KEY_PREFIX, snapshot.product_id),
            snapshot,
        )
    }

    fn get_last_level2(&self, product_id: &str) -> Result<Option<Level2Snapshot>, StoreError> {
        self.get(&format!("{}{}", LEVEL2_KEY_PREFIX, product_id))
    }

    fn get_last_full(&self, product_id: &str) -> Result<Option<DepthFullSnapshot>, StoreError> {
        self.get(&format!("{}{}", FULL_KEY_PREFIX, product_id))
    }
}
