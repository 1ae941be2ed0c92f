use crate::error::{JobError, Result};
use std::{fmt, str::FromStr};

/// Lifecycle state of a job.
///
/// `Ready -> Running -> {Success, Failed, Timeout, Terminated}`, plus
/// `Ready -> Terminated` for a job killed before it was started.
/// Terminal states never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Ready,
    Running,
    Success,
    Failed,
    Timeout,
    Terminated,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Timeout | JobStatus::Terminated
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Ready, Running)
                | (Ready, Terminated)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Timeout)
                | (Running, Terminated)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ready" => Ok(JobStatus::Ready),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            "timeout" => Ok(JobStatus::Timeout),
            "terminated" => Ok(JobStatus::Terminated),
            other => Err(format!("unknown job status {other:?}")),
        }
    }
}

/// Check a transition along the lifecycle edges.
pub(crate) fn check_transition(from: JobStatus, to: JobStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(JobError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::*;

    const ALL: [JobStatus; 6] = [Ready, Running, Success, Failed, Timeout, Terminated];

    #[test]
    fn terminal_states_are_final() {
        for from in ALL.iter().copied().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn running_reaches_every_terminal_state() {
        for to in [Success, Failed, Timeout, Terminated] {
            assert!(check_transition(Running, to).is_ok());
        }
        assert_eq!(
            check_transition(Running, Ready),
            Err(JobError::IllegalTransition {
                from: Running,
                to: Ready
            })
        );
    }

    #[test]
    fn ready_can_only_start_or_be_killed() {
        let allowed: Vec<_> = ALL.into_iter().filter(|s| Ready.can_transition_to(*s)).collect();
        assert_eq!(allowed, vec![Running, Terminated]);
    }

    #[test]
    fn tags_parse_back() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("done".parse::<JobStatus>().is_err());
    }
}
