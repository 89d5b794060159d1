//! Per-job context assembly.

use super::registry::MutexRegistry;
use super::types::{JobError, JobParameters};
use crate::archive::ArchivePool;
use crate::cache::{ResourceType, TileStore};
use crate::style::{StyleDocument, StyleError};
use crate::tms::{find_tile_matrix_set, TileMatrixSet};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Resolved collaborators of one job.
#[derive(Debug)]
pub struct JobContext {
    pub store: TileStore,
    pub tms: TileMatrixSet,
    /// Style adjusted for `tms`
    pub style: StyleDocument,
    /// Serializes archive access when several tiles of a shared archive are
    /// in flight
    pub mutex: Option<Arc<Mutex<()>>>,
}

impl JobContext {
    /// Hold the job's archive lock, if it has one.
    pub async fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.mutex {
            Some(mutex) => Some(mutex.lock().await),
            None => None,
        }
    }
}

/// Resolve the store, tiling matrix set and style of a job.
///
/// A lock from `registry` is attached only when more than one tile may be in
/// flight and the store writes archives; loose tile files need none.
pub async fn build_context(
    params: &JobParameters,
    pool: Arc<ArchivePool>,
    registry: &MutexRegistry,
) -> Result<JobContext, JobError> {
    params.validate()?;

    let tms = find_tile_matrix_set(&params.tms)
        .ok_or_else(|| JobError::UnsupportedTilingMatrix(params.tms.clone()))?;

    let store = TileStore::open(&params.storage, &params.api, &params.tileset, pool).await?;

    let style_path = params.storage.style_path();
    let data = store
        .read(ResourceType::Style, style_path)
        .await?
        .ok_or_else(|| StyleError::Missing(style_path.to_string()))?;
    let style = StyleDocument::from_slice(&data, style_path)?.adjusted_for(&tms);

    let mutex = if params.concurrency > 1 && !store.is_tile_granular() {
        let key = MutexRegistry::key(store.root(), &style.id, &params.tileset, tms.name);
        Some(registry.lock_for(&key))
    } else {
        None
    };

    debug!(
        tms = %tms,
        style = %style.id,
        storage = %store.storage_kind(),
        locked = mutex.is_some(),
        "Built job context"
    );

    Ok(JobContext {
        store,
        tms,
        style,
        mutex,
    })
}
