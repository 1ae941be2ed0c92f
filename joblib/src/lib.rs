//! Process supervision with live output fan-out.
//!
//! A [`JobCoordinator`] owns a name-keyed set of [`Job`]s. Each job runs one
//! external command, records its combined stdout/stderr and forwards every
//! chunk to the subscribers of its [`Broadcaster`] as it is produced.

pub mod broadcaster;
pub mod config;
mod coordinator;
pub mod error;
mod job;
mod output;
pub mod status;
pub mod types;
mod worker;

pub use broadcaster::{Broadcaster, EndReason, Subscription};
pub use config::{BroadcastConfig, OverflowPolicy, SupervisorConfig};
pub use coordinator::JobCoordinator;
pub use error::{JobError, Result};
pub use job::{Job, JobSnapshot, JobSpec};
pub use output::OutputLog;
pub use status::JobStatus;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic() {
        let coordinator = JobCoordinator::default();
        let echo_str = "hello world!";
        let job = coordinator
            .create(JobSpec::new("basic", "echo", format!("-n {}", echo_str), 5))
            .expect("job start err");
        let mut output = coordinator
            .subscribe_from_start("basic", "test")
            .await
            .expect("failed to grab stdout/stderr for job");
        let mut output_bytes = vec![];
        while let Some(blob) = output.recv().await {
            output_bytes.extend(blob);
        }
        assert_eq!(String::from_utf8_lossy(&output_bytes), echo_str);
        assert_eq!(output.end_reason(), Some(EndReason::Closed));
        assert_eq!(job.wait().await, JobStatus::Success);
    }
}
