use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::{GradeFilter, StudentGrade};

mod sqlite;

pub use sqlite::SqliteGradePersistence;

pub type PersistResult<T> = Result<T, PersistError>;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl PersistError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

impl From<rusqlite::Error> for PersistError {
    fn from(e: rusqlite::Error) -> Self {
        PersistError::Backend(e.to_string())
    }
}

/// What a live subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The full current set of records matching the filter.
    Snapshot(Vec<StudentGrade>),
    /// A refresh failed; the subscription stays open.
    Error(String),
}

/// Handle to a live query. Dropping it stops the background task.
pub struct GradeSubscription {
    rx: mpsc::UnboundedReceiver<SyncEvent>,
    task: Option<JoinHandle<()>>,
}

impl GradeSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<SyncEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Waits for the next event; `None` once the producer has gone away.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.rx.recv().await
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for GradeSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub trait Clock: Send + Sync {
    /// Unix epoch milliseconds.
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
pub trait GradePersistence: Send + Sync {
    /// Records matching the filter, ordered by student name.
    async fn list_grades(&self, filter: &GradeFilter) -> PersistResult<Vec<StudentGrade>>;

    /// Pushes the matching set once immediately and again whenever it changes.
    async fn subscribe_grades(&self, filter: &GradeFilter) -> PersistResult<GradeSubscription>;

    /// Upserts every record or none of them.
    ///
    /// Blank ids get the stable id for their key. A row that already exists
    /// under that id keeps its stored `created_at`; new rows get the one the
    /// record carries, or now for a blank id. `created_by` is set to
    /// `saved_by` and `updated_at` to now on all of them.
    async fn save_batch(&self, records: Vec<StudentGrade>, saved_by: &str) -> PersistResult<()>;

    async fn delete_grade(&self, id: &str) -> PersistResult<()>;
}
