use crate::broadcaster::{Broadcaster, Subscription};
use crate::config::SupervisorConfig;
use crate::error::{JobError, Result};
use crate::status::{check_transition, JobStatus};
use crate::types::{Args, JobName, OutputBlob, Program, SubscriberId};
use crate::worker;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

/// What the caller asked to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSpec {
    pub name: JobName,
    pub cmd: Program,
    pub args: Args,
    pub timeout: Duration,
}

impl JobSpec {
    pub fn new(
        name: impl Into<JobName>,
        cmd: impl Into<Program>,
        args: impl Into<Args>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            args: args.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(JobError::InvalidSpec("name is required".into()));
        }
        if self.cmd.trim().is_empty() {
            return Err(JobError::InvalidSpec("cmd is required".into()));
        }
        if self.timeout.is_zero() {
            return Err(JobError::InvalidSpec("timeout must be greater than zero".into()));
        }
        Ok(())
    }

    /// Argument vector passed to the process.
    pub fn argv(&self) -> Vec<&str> {
        self.args.split_whitespace().collect()
    }
}

/// How the completion watcher saw the process end.
#[derive(Debug)]
pub(crate) enum Outcome {
    Exited,
    Failed(String),
    TimedOut,
    Killed,
}

struct JobState {
    status: JobStatus,
    start_time: Option<SystemTime>,
    started: Option<Instant>,
    stop_time: Option<SystemTime>,
    duration: Option<Duration>,
    error: Option<String>,
    kill_tx: Option<oneshot::Sender<()>>,
}

/// Point-in-time view of a job.
#[derive(Clone, Debug)]
pub struct JobSnapshot {
    pub name: JobName,
    pub cmd: Program,
    pub args: Args,
    pub timeout: Duration,
    pub status: JobStatus,
    pub start_time: Option<SystemTime>,
    pub stop_time: Option<SystemTime>,
    /// Final run time once stopped, time elapsed so far while running.
    pub duration: Option<Duration>,
    pub error: Option<String>,
    pub output: OutputBlob,
}

/// One supervised invocation of an external command.
///
/// Status and timing live behind a plain mutex that is never held across an
/// await. Output goes through the job's own [`Broadcaster`].
pub struct Job {
    spec: JobSpec,
    config: SupervisorConfig,
    state: Mutex<JobState>,
    broadcaster: Broadcaster,
    status_tx: watch::Sender<JobStatus>,
    done_tx: watch::Sender<bool>,
}

impl Job {
    pub fn new(spec: JobSpec, config: SupervisorConfig) -> Arc<Self> {
        let broadcaster = Broadcaster::new(spec.name.clone(), config.broadcast);
        let (status_tx, _) = watch::channel(JobStatus::Ready);
        let (done_tx, _) = watch::channel(false);
        Arc::new(Self {
            spec,
            config,
            state: Mutex::new(JobState {
                status: JobStatus::Ready,
                start_time: None,
                started: None,
                stop_time: None,
                duration: None,
                error: None,
                kill_tx: None,
            }),
            broadcaster,
            status_tx,
            done_tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub(crate) fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Launch the process and return without waiting for it.
    ///
    /// Only valid once, from `Ready`. A command that cannot be started still
    /// counts as run: the job goes on to `Failed` with the launch error.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let (kill_tx, kill_rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            if state.status != JobStatus::Ready {
                return Err(JobError::AlreadyStarted(self.spec.name.clone()));
            }
            self.transition(&mut state, JobStatus::Running);
            state.start_time = Some(SystemTime::now());
            state.started = Some(Instant::now());
            state.kill_tx = Some(kill_tx);
        }
        info!(
            job = %self.spec.name,
            cmd = %self.spec.cmd,
            args = %self.spec.args,
            timeout_secs = self.spec.timeout.as_secs(),
            "running job"
        );
        worker::launch(self.clone(), kill_rx);
        Ok(())
    }

    /// Force the job into `Terminated`.
    ///
    /// A running process is signalled and reaped by the completion watcher. A job
    /// that never ran is closed out here. Killing a finished job does nothing.
    pub async fn kill(&self) {
        let never_started = {
            let mut state = self.lock_state();
            match state.status {
                JobStatus::Running => {
                    self.transition(&mut state, JobStatus::Terminated);
                    if let Some(kill_tx) = state.kill_tx.take() {
                        // the watcher may already be finishing; nobody listening is fine
                        let _ = kill_tx.send(());
                    }
                    false
                }
                JobStatus::Ready => {
                    self.transition(&mut state, JobStatus::Terminated);
                    true
                }
                _ => return,
            }
        };
        info!(job = %self.spec.name, "job killed");
        if never_started {
            self.broadcaster.close_all().await;
            self.done_tx.send_replace(true);
        }
    }

    pub fn status(&self) -> JobStatus {
        self.lock_state().status
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }

    /// Wait until the job is completely finished: terminal status decided,
    /// broadcaster closed and the process reaped.
    pub async fn wait(&self) -> JobStatus {
        let mut done = self.done_tx.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = done.wait_for(|finished| *finished).await;
        self.status()
    }

    pub fn is_finished(&self) -> bool {
        *self.done_tx.borrow()
    }

    pub async fn snapshot(&self) -> JobSnapshot {
        let (status, start_time, stop_time, duration, error) = {
            let state = self.lock_state();
            let duration = state
                .duration
                .or_else(|| state.started.map(|started| started.elapsed()));
            (
                state.status,
                state.start_time,
                state.stop_time,
                duration,
                state.error.clone(),
            )
        };
        JobSnapshot {
            name: self.spec.name.clone(),
            cmd: self.spec.cmd.clone(),
            args: self.spec.args.clone(),
            timeout: self.spec.timeout,
            status,
            start_time,
            stop_time,
            duration,
            error,
            output: self.broadcaster.output().await,
        }
    }

    pub async fn output(&self) -> OutputBlob {
        self.broadcaster.output().await
    }

    pub async fn subscribe(&self, id: impl Into<SubscriberId>) -> Result<Subscription> {
        self.broadcaster.subscribe(id).await
    }

    pub async fn subscribe_from_start(&self, id: impl Into<SubscriberId>) -> Result<Subscription> {
        self.broadcaster.subscribe_from_start(id).await
    }

    pub async fn unsubscribe(&self, id: &str) -> bool {
        self.broadcaster.unsubscribe(id).await
    }

    /// Record the moment the process stopped. The first call wins.
    pub(crate) fn mark_stopped(&self) {
        let mut state = self.lock_state();
        if state.stop_time.is_none() {
            state.stop_time = Some(SystemTime::now());
            state.duration = state.started.map(|started| started.elapsed());
        }
        state.kill_tx = None;
    }

    /// Called once by the completion watcher.
    ///
    /// Closes the broadcaster and only then settles the status. Timing comes
    /// from `mark_stopped`, taken when the process ended rather than after its
    /// output drained. A concurrent kill has already set `Terminated` and that wins.
    pub(crate) async fn finish(&self, outcome: Outcome) {
        self.mark_stopped();

        self.broadcaster.close_all().await;

        let (status, duration) = {
            let mut state = self.lock_state();
            if state.status == JobStatus::Running {
                let (next, error) = match outcome {
                    Outcome::Exited => (JobStatus::Success, None),
                    Outcome::Failed(message) => (JobStatus::Failed, Some(message)),
                    Outcome::TimedOut => (
                        JobStatus::Timeout,
                        Some(format!(
                            "timed out after {}s",
                            self.spec.timeout.as_secs()
                        )),
                    ),
                    // kill() always moves the status first
                    Outcome::Killed => (JobStatus::Terminated, None),
                };
                self.transition(&mut state, next);
                state.error = error;
            }
            (state.status, state.duration.unwrap_or_default())
        };

        info!(
            job = %self.spec.name,
            status = %status,
            duration_ms = duration.as_millis() as u64,
            "job finished"
        );
        self.done_tx.send_replace(true);
    }

    fn transition(&self, state: &mut JobState, to: JobStatus) {
        match check_transition(state.status, to) {
            Ok(()) => {
                state.status = to;
                self.status_tx.send_replace(to);
            }
            Err(err) => {
                warn!(job = %self.spec.name, error = %err, "rejected status change");
                debug_assert!(false, "{}", err);
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        // state is plain data; a panic elsewhere cannot leave it half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.spec.name)
            .field("cmd", &self.spec.cmd)
            .field("status", &self.status())
            .finish()
    }
}
