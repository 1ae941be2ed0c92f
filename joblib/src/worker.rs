//! Process launch and the completion watcher.

use crate::broadcaster::Broadcaster;
use crate::job::{Job, Outcome};

use bytes::BytesMut;
use futures::future::join_all;
use std::{process::ExitStatus, process::Stdio, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    select,
    sync::oneshot,
    task::JoinHandle,
};
use tracing::{debug, warn};

const READ_CHUNK: usize = 4096;

/// Spawn the job's process and its completion watcher.
///
/// A process that cannot be spawned is still finished asynchronously, so the
/// caller observes `Running` before `Failed` either way.
pub(crate) fn launch(job: Arc<Job>, kill_rx: oneshot::Receiver<()>) {
    let spec = job.spec();
    let mut command = Command::new(&spec.cmd);
    command
        .args(spec.argv())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match command.spawn() {
        Ok(child) => {
            debug!(job = %spec.name, pid = ?child.id(), "process started");
            tokio::spawn(watch(job, child, kill_rx));
        }
        Err(err) => {
            let message = format!("failed to start '{}': {}", spec.cmd, err);
            warn!(job = %spec.name, error = %message, "launch failed");
            tokio::spawn(async move { job.finish(Outcome::Failed(message)).await });
        }
    }
}

async fn watch(job: Arc<Job>, mut child: Child, kill_rx: oneshot::Receiver<()>) {
    // grab stdout and stderr and pipe both into the broadcaster
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(pipe(job.broadcaster().clone(), stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(pipe(job.broadcaster().clone(), stderr));
    }

    let mut kill_rx = kill_rx;
    let outcome = select! {
        exit = child.wait() => match exit {
            Ok(status) => exit_outcome(status),
            Err(err) => Outcome::Failed(format!("waiting for process: {}", err)),
        },
        _ = tokio::time::sleep(job.spec().timeout) => {
            debug!(job = %job.name(), "deadline reached, killing process");
            reap(&mut child).await;
            Outcome::TimedOut
        }
        // a dropped sender disables this branch
        Ok(()) = &mut kill_rx => {
            debug!(job = %job.name(), "kill requested");
            reap(&mut child).await;
            Outcome::Killed
        }
    };
    job.mark_stopped();

    // let the readers hit EOF so every byte is delivered before the broadcaster closes
    let grace = job.config().drain_grace;
    if tokio::time::timeout(grace, join_all(readers.iter_mut()))
        .await
        .is_err()
    {
        warn!(job = %job.name(), ?grace, "output still open after exit, abandoning it");
        for reader in &readers {
            reader.abort();
        }
    }

    job.finish(outcome).await;
}

/// Kill and wait for the child. It may have exited on its own already.
async fn reap(child: &mut Child) {
    if let Err(err) = child.kill().await {
        debug!(error = %err, "kill failed, process already gone");
    }
}

fn exit_outcome(status: ExitStatus) -> Outcome {
    if status.success() {
        return Outcome::Exited;
    }
    if let Some(code) = status.code() {
        return Outcome::Failed(format!("exit status {}", code));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Outcome::Failed(format!("terminated by signal {}", signal));
        }
    }
    Outcome::Failed(status.to_string())
}

/// Copy a pipe into the broadcaster chunk by chunk until EOF.
fn pipe<R>(broadcaster: Broadcaster, mut reader: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        loop {
            buf.reserve(READ_CHUNK);
            match reader.read_buf(&mut buf).await {
                Ok(n) if n > 0 => {
                    // move the bytes out of buf and into a chunk
                    broadcaster.write(buf.split().freeze()).await;
                }
                Ok(_) => break,
                Err(err) => {
                    debug!(error = %err, "output pipe read failed");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use crate::job::JobSpec;
    use crate::status::JobStatus;
    use std::time::Duration;

    #[tokio::test]
    async fn backgrounded_children_cannot_wedge_completion() {
        // the shell exits at once but leaves a sleeper holding stdout open
        let config = SupervisorConfig {
            drain_grace: Duration::from_millis(200),
            ..SupervisorConfig::default()
        };
        let job = Job::new(
            JobSpec::new("orphan", "sh", "-c sleep${IFS}5&", 10),
            config,
        );
        job.run().unwrap();

        let status = tokio::time::timeout(Duration::from_secs(3), job.wait())
            .await
            .expect("completion watcher wedged on an open pipe");
        assert_eq!(status, JobStatus::Success);
    }

    #[tokio::test]
    async fn timeout_duration_excludes_the_output_drain() {
        // killing the shell leaves its sleep child holding the pipes until the grace expires
        let config = SupervisorConfig {
            drain_grace: Duration::from_secs(2),
            ..SupervisorConfig::default()
        };
        let job = Job::new(
            JobSpec::new("drain", "sh", "-c sleep${IFS}30;true", 1),
            config,
        );
        job.run().unwrap();

        let status = tokio::time::timeout(Duration::from_secs(10), job.wait())
            .await
            .expect("job did not finish");
        assert_eq!(status, JobStatus::Timeout);

        let snapshot = job.snapshot().await;
        let duration = snapshot.duration.unwrap();
        assert!(duration >= Duration::from_secs(1), "{:?}", duration);
        assert!(duration < Duration::from_millis(1800), "{:?}", duration);
        let stopped = snapshot.stop_time.unwrap();
        let started = snapshot.start_time.unwrap();
        assert!(stopped.duration_since(started).unwrap() < Duration::from_millis(1800));
    }

    #[cfg(unix)]
    #[test]
    fn signals_are_reported() {
        use std::os::unix::process::ExitStatusExt;
        match exit_outcome(ExitStatus::from_raw(9)) {
            Outcome::Failed(message) => assert_eq!(message, "terminated by signal 9"),
            other => panic!("unexpected outcome {:?}", other),
        }
        match exit_outcome(ExitStatus::from_raw(3 << 8)) {
            Outcome::Failed(message) => assert_eq!(message, "exit status 3"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(exit_outcome(ExitStatus::from_raw(0)), Outcome::Exited));
    }
}
