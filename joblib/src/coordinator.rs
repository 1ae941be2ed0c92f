use crate::broadcaster::Subscription;
use crate::config::SupervisorConfig;
use crate::error::{JobError, Result};
use crate::job::{Job, JobSnapshot, JobSpec};
use crate::types::{OutputBlob, SubscriberId};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

type JobTable = HashMap<String, Arc<Job>>;

/// Name-keyed registry of live jobs.
///
/// Cloning is cheap and every clone sees the same jobs. The table lock only
/// covers lookup/insert/remove and is never held while waiting on a job, so one
/// job's slow subscriber cannot hold up registry operations on another.
#[derive(Clone, Default)]
pub struct JobCoordinator {
    jobs: Arc<Mutex<JobTable>>,
    config: SupervisorConfig,
}

impl JobCoordinator {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            jobs: Arc::default(),
            config,
        }
    }

    /// Register and start a job. Duplicate names are rejected before anything is spawned.
    pub fn create(&self, spec: JobSpec) -> Result<Arc<Job>> {
        spec.validate()?;
        let job = {
            let mut jobs = self.lock_jobs();
            if jobs.contains_key(&spec.name) {
                return Err(JobError::AlreadyExists(spec.name));
            }
            let job = Job::new(spec, self.config);
            jobs.insert(job.name().to_string(), job.clone());
            job
        };
        info!(job = %job.name(), "job created");
        Self::start(job)
    }

    // A delete can slip in between registering and running and kill the job
    // while it is still `Ready`. The create itself went through, so report the
    // job as it now stands instead of failing it.
    fn start(job: Arc<Job>) -> Result<Arc<Job>> {
        match job.run() {
            Ok(()) => Ok(job),
            Err(JobError::AlreadyStarted(_)) => {
                debug!(job = %job.name(), status = %job.status(), "job stopped before it could run");
                Ok(job)
            }
            Err(err) => Err(err),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<Job>> {
        self.lock_jobs()
            .get(name)
            .cloned()
            .ok_or_else(|| JobError::NotFound(name.to_string()))
    }

    pub async fn snapshot(&self, name: &str) -> Result<JobSnapshot> {
        let job = self.get(name)?;
        Ok(job.snapshot().await)
    }

    /// Snapshots of every job, ordered by name.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<_> = self.lock_jobs().values().cloned().collect();
        jobs.sort_by(|a, b| a.name().cmp(b.name()));
        let mut snapshots = Vec::with_capacity(jobs.len());
        for job in jobs {
            snapshots.push(job.snapshot().await);
        }
        snapshots
    }

    pub async fn output(&self, name: &str) -> Result<OutputBlob> {
        let job = self.get(name)?;
        Ok(job.output().await)
    }

    pub async fn subscribe(&self, name: &str, id: impl Into<SubscriberId>) -> Result<Subscription> {
        let job = self.get(name)?;
        job.subscribe(id).await
    }

    pub async fn subscribe_from_start(
        &self,
        name: &str,
        id: impl Into<SubscriberId>,
    ) -> Result<Subscription> {
        let job = self.get(name)?;
        job.subscribe_from_start(id).await
    }

    pub async fn unsubscribe(&self, name: &str, id: &str) -> Result<()> {
        let job = self.get(name)?;
        job.unsubscribe(id).await;
        Ok(())
    }

    /// Move a job to `Terminated`. Killing a job that is not running is not an error.
    pub async fn kill(&self, name: &str) -> Result<()> {
        let job = self.get(name)?;
        job.kill().await;
        Ok(())
    }

    /// Forget a job, killing it first if it is still running.
    ///
    /// Returns once the process has been reaped and its subscribers closed.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let job = self
            .lock_jobs()
            .remove(name)
            .ok_or_else(|| JobError::NotFound(name.to_string()))?;
        info!(job = %name, "deleting job");
        job.kill().await;
        job.wait().await;
        job.broadcaster().close_all().await;
        Ok(())
    }

    /// Delete every job. Used when the server shuts down.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.lock_jobs().keys().cloned().collect();
        for name in names {
            // a concurrent delete may have beaten us to it
            let _ = self.delete(&name).await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_jobs().is_empty()
    }

    fn lock_jobs(&self) -> MutexGuard<'_, JobTable> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
