//! Periodic scheduler
//!
//! The engine core depends only on the [`Scheduler`] contract: handlers use
//! it to poll external sources (queues, instance state) on a fixed
//! interval. [`TokioScheduler`] is the tokio-backed implementation; each
//! job is an interval task and callbacks run on the blocking pool so a
//! slow poll cannot stall the runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};

/// Callback invoked on a fixed interval from a background task
pub type JobCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle identifying a scheduled job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    id: Uuid,
    name: String,
}

impl JobHandle {
    /// The job's descriptive name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Contract for registering fixed-interval background callbacks
pub trait Scheduler: Send + Sync {
    /// Invoke `callback` every `period` until unscheduled
    fn schedule(
        &self,
        name: &str,
        callback: JobCallback,
        period: Duration,
    ) -> EngineResult<JobHandle>;

    /// Cancel a scheduled job
    fn unschedule(&self, handle: &JobHandle);
}

/// Tokio-backed [`Scheduler`]
pub struct TokioScheduler {
    jobs: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl TokioScheduler {
    /// Create a scheduler with no jobs
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Cancel every scheduled job
    pub fn stop_all(&self) {
        let mut jobs = self.jobs.lock().expect("job lock poisoned");
        for (_, task) in jobs.drain() {
            task.abort();
        }
        info!("all scheduled jobs stopped");
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(
        &self,
        name: &str,
        callback: JobCallback,
        period: Duration,
    ) -> EngineResult<JobHandle> {
        let runtime = Handle::try_current()
            .map_err(|err| EngineError::Scheduler(format!("no tokio runtime: {err}")))?;

        info!(job = name, period_secs = period.as_secs(), "schedule");
        let job_name = name.to_string();
        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately; consume it so the first
            // callback fires one full period after scheduling.
            interval.tick().await;
            loop {
                interval.tick().await;
                debug!(job = %job_name, "running scheduled job");
                let callback = callback.clone();
                let _ = tokio::task::spawn_blocking(move || callback()).await;
            }
        });

        let handle = JobHandle {
            id: Uuid::now_v7(),
            name: name.to_string(),
        };
        self.jobs
            .lock()
            .expect("job lock poisoned")
            .insert(handle.id, task);
        Ok(handle)
    }

    fn unschedule(&self, handle: &JobHandle) {
        if let Some(task) = self
            .jobs
            .lock()
            .expect("job lock poisoned")
            .remove(&handle.id)
        {
            task.abort();
            info!(job = handle.name(), "unscheduled");
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}
