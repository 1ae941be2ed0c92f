mod gateway;

use futures::Stream;
use joblib::{JobCoordinator, JobError, JobSnapshot, JobSpec};
use jobproto::remote_jobs_server::RemoteJobs;
use jobproto::{
    CreateRequest, CreateResponse, DeleteResponse, HealthRequest, HealthResponse, JobInfo,
    JobRequest, KillResponse, ListRequest, ListResponse, OutputResponse, StreamRequest,
    StreamResponse,
};
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};
use tonic::{Request, Response, Status};
use tracing::info;

// tonic wraps this in Arc anyway internally, so we don't need Arc
#[derive(Clone, Default)]
pub struct RemoteJobsService {
    coordinator: JobCoordinator,
}

impl RemoteJobsService {
    pub fn new(coordinator: JobCoordinator) -> Self {
        Self { coordinator }
    }
}

#[tonic::async_trait]
impl RemoteJobs for RemoteJobsService {
    type StreamOutputStream = Pin<Box<dyn Stream<Item = Result<StreamResponse, Status>> + Send>>;

    async fn health(&self, _req: Request<HealthRequest>) -> Result<Response<HealthResponse>, Status> {
        Ok(Response::new(HealthResponse {
            status: "running".into(),
        }))
    }

    async fn create_job(
        &self,
        req: Request<CreateRequest>,
    ) -> Result<Response<CreateResponse>, Status> {
        let CreateRequest {
            name,
            cmd,
            args,
            timeout,
        } = req.into_inner();
        info!(job = %name, cmd = %cmd, args = %args, timeout_secs = timeout, "create requested");

        let job = self
            .coordinator
            .create(JobSpec::new(name, cmd, args, timeout))
            .map_err(to_status)?;
        let info = job_info(job.snapshot().await, false);
        Ok(Response::new(CreateResponse { job: Some(info) }))
    }

    async fn delete_job(
        &self,
        req: Request<JobRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        let name = req.into_inner().name;
        self.coordinator.delete(&name).await.map_err(to_status)?;
        Ok(Response::new(DeleteResponse {})) // empty response on success
    }

    async fn kill_job(&self, req: Request<JobRequest>) -> Result<Response<KillResponse>, Status> {
        let name = req.into_inner().name;
        let job = self.coordinator.get(&name).map_err(to_status)?;
        job.kill().await;
        let mut response = KillResponse::default();
        response.set_status(wire_status(job.status()));
        Ok(Response::new(response))
    }

    async fn get_job(&self, req: Request<JobRequest>) -> Result<Response<JobInfo>, Status> {
        let name = req.into_inner().name;
        let snapshot = self.coordinator.snapshot(&name).await.map_err(to_status)?;
        Ok(Response::new(job_info(snapshot, true)))
    }

    async fn list_jobs(&self, req: Request<ListRequest>) -> Result<Response<ListResponse>, Status> {
        let include_output = req.into_inner().include_output;
        let jobs = self
            .coordinator
            .list()
            .await
            .into_iter()
            .map(|snapshot| job_info(snapshot, include_output))
            .collect();
        Ok(Response::new(ListResponse { jobs }))
    }

    async fn get_output(
        &self,
        req: Request<JobRequest>,
    ) -> Result<Response<OutputResponse>, Status> {
        let name = req.into_inner().name;
        let data = self.coordinator.output(&name).await.map_err(to_status)?;
        Ok(Response::new(OutputResponse {
            data: data.to_vec(),
        }))
    }

    async fn stream_output(
        &self,
        req: Request<StreamRequest>,
    ) -> Result<Response<Self::StreamOutputStream>, Status> {
        let StreamRequest { name, from_start } = req.into_inner();
        let job = self.coordinator.get(&name).map_err(to_status)?;
        let stream = gateway::relay(job, from_start).await.map_err(to_status)?;
        Ok(Response::new(Box::pin(stream) as Self::StreamOutputStream))
    }
}

fn to_status(err: JobError) -> Status {
    let message = err.to_string();
    match err {
        JobError::NotFound(_) => Status::not_found(message),
        JobError::AlreadyExists(_) | JobError::SubscriberExists(_) => {
            Status::already_exists(message)
        }
        JobError::InvalidSpec(_) => Status::invalid_argument(message),
        JobError::AlreadyStarted(_) | JobError::IllegalTransition { .. } => {
            Status::failed_precondition(message)
        }
    }
}

pub(crate) fn wire_status(status: joblib::JobStatus) -> jobproto::JobStatus {
    use joblib::JobStatus::*;
    match status {
        Ready => jobproto::JobStatus::Ready,
        Running => jobproto::JobStatus::Running,
        Success => jobproto::JobStatus::Success,
        Failed => jobproto::JobStatus::Failed,
        Timeout => jobproto::JobStatus::Timeout,
        Terminated => jobproto::JobStatus::Terminated,
    }
}

fn unix_ms(time: Option<SystemTime>) -> i64 {
    time.and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|since| since.as_millis() as i64)
        .unwrap_or(0)
}

fn job_info(snapshot: JobSnapshot, include_output: bool) -> JobInfo {
    let mut info = JobInfo {
        name: snapshot.name,
        cmd: snapshot.cmd,
        args: snapshot.args,
        timeout: snapshot.timeout.as_secs(),
        start_time_ms: unix_ms(snapshot.start_time),
        stop_time_ms: unix_ms(snapshot.stop_time),
        duration_secs: snapshot.duration.unwrap_or_default().as_secs_f64(),
        status: 0,
        error: snapshot.error.unwrap_or_default(),
        output: if include_output {
            snapshot.output.to_vec()
        } else {
            Vec::new()
        },
    };
    info.set_status(wire_status(snapshot.status));
    info
}
