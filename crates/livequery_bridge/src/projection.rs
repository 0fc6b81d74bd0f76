//! Task projection and write helpers.
//!
//! [`TaskProjection`] is the bridge's illustrative consumer: it observes
//! the task collection through an [`ObservationBridge`] and republishes
//! typed task lists on a replay-latest channel. [`TaskStore`] carries the
//! matching write statements. Together they demonstrate that the bridge
//! works for arbitrary query/decode pairs, not just the sync flag.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use livequery_engine::{Query, StoreEngine};

use crate::bridge::ObservationBridge;
use crate::error::BridgeResult;

/// Collection the task consumer reads and writes.
pub const TASKS_COLLECTION: &str = "tasks";

/// One task document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Whether the task is completed.
    #[serde(default)]
    pub done: bool,
    /// Soft-delete marker; deleted tasks stay in the store but are
    /// filtered out of projections.
    #[serde(default)]
    pub deleted: bool,
}

impl Task {
    /// Creates a new, not-done task with a generated id.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            done: false,
            deleted: false,
        }
    }
}

fn subscribe_query() -> Query {
    Query::new(format!("SELECT * FROM {TASKS_COLLECTION}"))
}

fn observe_query() -> Query {
    Query::new(format!(
        "SELECT * FROM {TASKS_COLLECTION} WHERE NOT deleted ORDER BY _id"
    ))
}

/// Republishes the live task list on a replay-latest channel.
///
/// Subscribes the whole collection and observes the non-deleted rows in
/// id order. Late subscribers to [`tasks`](Self::tasks) immediately see
/// the most recent list.
pub struct TaskProjection {
    tasks_rx: watch::Receiver<Vec<Task>>,
    shutdown_tx: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl TaskProjection {
    /// Opens the task stream and spawns the republishing worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<E: StoreEngine + 'static>(bridge: &ObservationBridge<E>) -> BridgeResult<Self> {
        let mut stream = bridge.subscribe_scoped::<Task>(&subscribe_query(), &observe_query())?;
        let (tasks_tx, tasks_rx) = watch::channel(Vec::new());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    next = stream.next() => match next {
                        Some(snapshot) => {
                            tasks_tx.send_replace(snapshot.items);
                        }
                        None => break,
                    },
                }
            }
            if let Err(error) = stream.close() {
                warn!(%error, "failed to release task stream");
            }
        });

        Ok(Self {
            tasks_rx,
            shutdown_tx,
            worker: Some(worker),
        })
    }

    /// Replay-latest channel of the current task list.
    pub fn tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.tasks_rx.clone()
    }

    /// Stops the worker and releases the underlying registrations.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl Drop for TaskProjection {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

/// Well-known first-run tasks, seeded idempotently.
const STARTER_TASKS: [(&str, &str); 4] = [
    ("50191411-4c46-4940-8b72-5f8017a04fa7", "Buy groceries"),
    ("6da283da-8cfe-4526-a6fa-d385089364e5", "Clean the kitchen"),
    ("5303ddf8-0e72-4feb-9e82-4b007e5797f0", "Schedule dentist appointment"),
    ("38411f1b-6b49-4346-90c3-0b16ce97e174", "Pay bills"),
];

/// Write helpers for the task collection.
pub struct TaskStore<E: StoreEngine> {
    engine: Arc<E>,
}

impl<E: StoreEngine> TaskStore<E> {
    /// Creates a store over an engine.
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    /// Inserts a new task and returns it.
    pub fn create(&self, title: impl Into<String>) -> BridgeResult<Task> {
        let task = Task::new(title);
        let doc = serde_json::to_value(&task)?;
        self.engine.execute(
            &Query::new(format!("INSERT INTO {TASKS_COLLECTION} DOCUMENTS (:task)"))
                .with_param("task", doc),
        )?;
        Ok(task)
    }

    /// Sets a task's done flag.
    pub fn set_done(&self, id: &str, done: bool) -> BridgeResult<()> {
        self.engine.execute(
            &Query::new(format!(
                "UPDATE {TASKS_COLLECTION} SET done = :done WHERE _id = :id"
            ))
            .with_param("done", done)
            .with_param("id", id),
        )?;
        Ok(())
    }

    /// Flips a task's done flag.
    ///
    /// Reads the current value first; returns the new value, or `None` if
    /// no task with that id exists.
    pub fn toggle_done(&self, id: &str) -> BridgeResult<Option<bool>> {
        let rows = self.engine.execute(
            &Query::new(format!("SELECT * FROM {TASKS_COLLECTION} WHERE _id = :id"))
                .with_param("id", id),
        )?;
        let current = match rows.rows().first() {
            Some(row) => row.get("done").and_then(|v| v.as_bool()).unwrap_or(false),
            None => return Ok(None),
        };
        self.set_done(id, !current)?;
        Ok(Some(!current))
    }

    /// Marks a task deleted without removing its document.
    pub fn soft_delete(&self, id: &str) -> BridgeResult<()> {
        self.engine.execute(
            &Query::new(format!(
                "UPDATE {TASKS_COLLECTION} SET deleted = :deleted WHERE _id = :id"
            ))
            .with_param("deleted", true)
            .with_param("id", id),
        )?;
        Ok(())
    }

    /// Seeds the well-known starter tasks.
    ///
    /// Uses `INITIAL` inserts: an existing document with the same id wins
    /// untouched, so re-running on a store that already has (or has
    /// modified) the starters changes nothing.
    pub fn seed_initial(&self) -> BridgeResult<()> {
        for (id, title) in STARTER_TASKS {
            let task = Task {
                id: id.to_string(),
                title: title.to_string(),
                done: false,
                deleted: false,
            };
            let doc = serde_json::to_value(&task)?;
            self.engine.execute(
                &Query::new(format!(
                    "INSERT INTO {TASKS_COLLECTION} INITIAL DOCUMENTS (:task)"
                ))
                .with_param("task", doc),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livequery_engine::MemoryEngine;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn wait_for_list(
        rx: &mut watch::Receiver<Vec<Task>>,
        predicate: impl FnMut(&Vec<Task>) -> bool,
    ) -> Vec<Task> {
        timeout(Duration::from_secs(2), rx.wait_for(predicate))
            .await
            .expect("projection did not converge")
            .expect("projection worker gone")
            .clone()
    }

    #[test]
    fn seed_initial_is_idempotent() {
        let engine = Arc::new(MemoryEngine::new());
        let store = TaskStore::new(Arc::clone(&engine));

        store.seed_initial().unwrap();
        store.set_done(STARTER_TASKS[0].0, true).unwrap();
        store.seed_initial().unwrap();

        let rows = engine
            .execute(&Query::new("SELECT * FROM tasks"))
            .unwrap();
        assert_eq!(rows.len(), 4);

        // The modification survives re-seeding.
        let rows = engine
            .execute(
                &Query::new("SELECT * FROM tasks WHERE _id = :id")
                    .with_param("id", STARTER_TASKS[0].0),
            )
            .unwrap();
        assert_eq!(rows.rows()[0]["done"], serde_json::json!(true));
    }

    #[test]
    fn toggle_done_round_trips_and_handles_missing_tasks() {
        let engine = Arc::new(MemoryEngine::new());
        let store = TaskStore::new(Arc::clone(&engine));
        let task = store.create("Water the plants").unwrap();

        assert_eq!(store.toggle_done(&task.id).unwrap(), Some(true));
        assert_eq!(store.toggle_done(&task.id).unwrap(), Some(false));
        assert_eq!(store.toggle_done("no-such-task").unwrap(), None);
    }

    #[tokio::test]
    async fn projection_tracks_creates_and_soft_deletes() {
        let engine = Arc::new(MemoryEngine::new());
        let bridge = ObservationBridge::new(Arc::clone(&engine));
        let store = TaskStore::new(Arc::clone(&engine));

        let projection = TaskProjection::start(&bridge).unwrap();
        let mut tasks = projection.tasks();

        let created = store.create("Walk the dog").unwrap();
        let list = wait_for_list(&mut tasks, |list| list.len() == 1).await;
        assert_eq!(list[0].title, "Walk the dog");

        store.soft_delete(&created.id).unwrap();
        wait_for_list(&mut tasks, |list| list.is_empty()).await;

        // The document is hidden, not gone.
        let rows = engine
            .execute(&Query::new("SELECT * FROM tasks"))
            .unwrap();
        assert_eq!(rows.len(), 1);

        projection.shutdown().await;
        assert_eq!(engine.observer_count(), 0);
        assert_eq!(engine.subscription_count(), 0);
    }

    #[tokio::test]
    async fn late_subscribers_see_the_latest_list() {
        let engine = Arc::new(MemoryEngine::new());
        let bridge = ObservationBridge::new(Arc::clone(&engine));
        let store = TaskStore::new(Arc::clone(&engine));
        let projection = TaskProjection::start(&bridge).unwrap();

        store.create("Read a book").unwrap();
        let mut early = projection.tasks();
        wait_for_list(&mut early, |list| list.len() == 1).await;

        // A receiver obtained after the delivery already holds the value.
        let late = projection.tasks();
        assert_eq!(late.borrow().len(), 1);
    }
}
