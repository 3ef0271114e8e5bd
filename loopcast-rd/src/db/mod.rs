//! Rotation state store
//!
//! Durable key/value settings, the recently played ring, the downloaded file
//! registry and the playlist queue, all in the SQLite database created by
//! `loopcast_common::db::init_database`.
//!
//! Every write goes through [`RotationState`]'s single writer lock so
//! read-modify-write sequences (counters, ring trimming, queue pops) never
//! interleave. Reads use the pool directly.

pub mod downloads;
pub mod history;
pub mod queue;
pub mod settings;

pub use settings::StateValue;

use crate::error::Error;
use sqlx::{Pool, Sqlite};
use tokio::sync::{Mutex, MutexGuard};

/// Maximum lock wait for a single write before it is reported as failed
pub(crate) const WRITE_LOCK_WAIT_MS: u64 = 2000;

/// Owned handle to the rotation state database
pub struct RotationState {
    pool: Pool<Sqlite>,
    writer: Mutex<()>,
}

impl RotationState {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            writer: Mutex::new(()),
        }
    }

    /// Read access to the pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Acquire the single-writer lock
    pub(crate) async fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }
}

/// Map a write failure to `Error::Persistence`, keeping the operation name
pub(crate) fn persistence_error(operation: &'static str) -> impl Fn(sqlx::Error) -> Error {
    move |e| Error::Persistence(format!("{}: {}", operation, e))
}
