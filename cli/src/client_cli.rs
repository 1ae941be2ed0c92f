use jobproto::{
    remote_jobs_client::RemoteJobsClient, stream_response::Event, CreateRequest, HealthRequest,
    JobInfo, JobRequest, JobStatus, ListRequest, StreamRequest,
};
use std::io::{self, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tonic::{transport::Channel, Status};

pub struct ClientCli {
    inner: RemoteJobsClient<Channel>,
}

impl ClientCli {
    pub async fn connect(server_addr: &str) -> Result<Self, tonic::transport::Error> {
        let inner = RemoteJobsClient::connect(server_addr.to_string()).await?;
        Ok(Self { inner })
    }

    pub async fn health(&mut self) -> Result<(), Status> {
        let response = self.inner.health(HealthRequest {}).await?;
        println!("{}", response.into_inner().status);
        Ok(())
    }

    pub async fn create_job(
        &mut self,
        name: &str,
        cmd: &str,
        args: &str,
        timeout: u64,
    ) -> Result<(), Status> {
        let request = CreateRequest {
            name: name.into(),
            cmd: cmd.into(),
            args: args.into(),
            timeout,
        };
        let response = self.inner.create_job(request).await?;
        let status = response
            .into_inner()
            .job
            .map(|job| status_name(job.status()))
            .unwrap_or("unknown");
        println!("Created job {} ({})", name, status);
        Ok(())
    }

    pub async fn delete_job(&mut self, name: &str) -> Result<(), Status> {
        self.inner.delete_job(job_request(name)).await?;
        println!("Deleted job {}", name);
        Ok(())
    }

    pub async fn kill_job(&mut self, name: &str) -> Result<(), Status> {
        let response = self.inner.kill_job(job_request(name)).await?;
        println!("{}: {}", name, status_name(response.into_inner().status()));
        Ok(())
    }

    pub async fn query_status(&mut self, name: &str) -> Result<(), Status> {
        let job = self.inner.get_job(job_request(name)).await?.into_inner();
        print_details(&job);
        Ok(())
    }

    pub async fn list_jobs(&mut self) -> Result<(), Status> {
        let jobs = self
            .inner
            .list_jobs(ListRequest {
                include_output: false,
            })
            .await?
            .into_inner()
            .jobs;
        if jobs.is_empty() {
            println!("No jobs");
        }
        for job in &jobs {
            println!(
                "{:<20} {:<10} {:>8.2}s  {} {}",
                job.name,
                status_name(job.status()),
                job.duration_secs,
                job.cmd,
                job.args
            );
        }
        Ok(())
    }

    pub async fn output(&mut self, name: &str) -> Result<(), Status> {
        let data = self.inner.get_output(job_request(name)).await?.into_inner().data;
        write_raw(&data);
        Ok(())
    }

    /// Stream the job's output until it finishes
    pub async fn stream_output(&mut self, name: &str, from_start: bool) -> Result<(), Status> {
        let request = StreamRequest {
            name: name.into(),
            from_start,
        };
        let mut stream = self.inner.stream_output(request).await?.into_inner();
        while let Some(message) = stream.message().await? {
            match message.event {
                Some(Event::Data(data)) => write_raw(&data),
                Some(Event::Finished(finished)) => {
                    let status = status_name(finished.status());
                    if finished.error.is_empty() {
                        eprintln!("[{}]", status);
                    } else {
                        eprintln!("[{}: {}]", status, finished.error);
                    }
                }
                None => {}
            }
        }
        Ok(())
    }
}

fn job_request(name: &str) -> JobRequest {
    JobRequest { name: name.into() }
}

fn write_raw(data: &[u8]) {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(data);
    let _ = stdout.flush();
}

fn status_name(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Unspecified => "unknown",
        JobStatus::Ready => "ready",
        JobStatus::Running => "running",
        JobStatus::Success => "success",
        JobStatus::Failed => "failed",
        JobStatus::Timeout => "timeout",
        JobStatus::Terminated => "terminated",
    }
}

fn format_time(ms: i64) -> String {
    if ms <= 0 {
        return "-".into();
    }
    let time = UNIX_EPOCH + Duration::from_millis(ms as u64);
    match SystemTime::now().duration_since(time) {
        Ok(ago) => format!("{}ms since epoch ({}s ago)", ms, ago.as_secs()),
        Err(_) => format!("{}ms since epoch", ms),
    }
}

fn print_details(job: &JobInfo) {
    println!("name:     {}", job.name);
    println!("command:  {} {}", job.cmd, job.args);
    println!("timeout:  {}s", job.timeout);
    println!("status:   {}", status_name(job.status()));
    println!("started:  {}", format_time(job.start_time_ms));
    println!("stopped:  {}", format_time(job.stop_time_ms));
    println!("duration: {:.3}s", job.duration_secs);
    if !job.error.is_empty() {
        println!("error:    {}", job.error);
    }
}
