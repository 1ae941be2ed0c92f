use crate::status::JobStatus;
use std::result;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} already exists, name must be unique")]
    AlreadyExists(String),
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),
    #[error("job {0} has already been started")]
    AlreadyStarted(String),
    #[error("subscriber {0} is already registered")]
    SubscriberExists(String),
    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
}

pub type Result<T> = result::Result<T, JobError>;
