use chrono::{DateTime, Duration, Utc};
use shared::RegionOfInterest;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(String),
}

/// Inputs of one search request, as received from the creation endpoint.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub query_image: Vec<u8>,
    pub target_image: Vec<u8>,
    pub query_text: String,
    pub region_of_interest: RegionOfInterest,
    pub detection_threshold: f32,
    pub similarity_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub query_image: Vec<u8>,
    pub target_image: Vec<u8>,
    pub query_text: String,
    pub region_of_interest: RegionOfInterest,
    pub detection_threshold: f32,
    /// Accepted and carried along, never applied by the pipeline.
    pub similarity_threshold: f32,
    pub created_at: DateTime<Utc>,
}

impl Task {
    fn from_inputs(id: Uuid, inputs: NewTask) -> Self {
        Self {
            id,
            query_image: inputs.query_image,
            target_image: inputs.target_image,
            query_text: inputs.query_text,
            region_of_interest: inputs.region_of_interest,
            detection_threshold: inputs.detection_threshold,
            similarity_threshold: inputs.similarity_threshold,
            created_at: Utc::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        ttl.is_some_and(|ttl| now - self.created_at > ttl)
    }
}

/// Holds tasks between creation and their single stream.
///
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<Mutex<HashMap<Uuid, Task>>>,
    ttl: Option<Duration>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks older than `ttl` can no longer be taken and are dropped by
    /// [`TaskStore::sweep_expired`].
    pub fn with_ttl(ttl: std::time::Duration) -> Self {
        Self {
            tasks: Arc::default(),
            ttl: Duration::from_std(ttl).ok(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, Task>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create(&self, inputs: NewTask) -> Uuid {
        let mut tasks = self.entries();
        let mut id = Uuid::new_v4();
        while tasks.contains_key(&id) {
            id = Uuid::new_v4();
        }
        tasks.insert(id, Task::from_inputs(id, inputs));
        log::info!("TASK {}: Created and stored ({} pending)", id, tasks.len());
        id
    }

    /// Removes and returns the task. A second call for the same id fails.
    pub fn take(&self, task_id: &str) -> Result<Task, StoreError> {
        let not_found = || StoreError::NotFound(task_id.to_string());
        let id = Uuid::parse_str(task_id).map_err(|_| not_found())?;
        let task = self.entries().remove(&id).ok_or_else(not_found)?;
        if task.is_expired(self.ttl, Utc::now()) {
            log::warn!("TASK {}: Expired before it was streamed", id);
            return Err(not_found());
        }
        Ok(task)
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let mut tasks = self.entries();
        let before = tasks.len();
        tasks.retain(|_, task| !task.is_expired(self.ttl, now));
        before - tasks.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, task_id: &str) -> bool {
        Uuid::parse_str(task_id).is_ok_and(|id| self.entries().contains_key(&id))
    }
}
