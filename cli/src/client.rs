use std::io::Write;
use std::path::Path;

use protobuf::job_worker_service_client::JobWorkerServiceClient;
use protobuf::{
    JobState, JobStatusRequest, StartJobRequest, StopJobRequest, StreamJobOutputRequest,
    StreamJobOutputResponse,
};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tonic::{Request, Status};

pub struct Client {
    inner: JobWorkerServiceClient<Channel>,
}

impl Client {
    /// Connects to the server with the caller's certificate as the client
    /// identity.
    pub async fn connect(
        server_addr: &str,
        ca_cert: &Path,
        cert: &Path,
        key: &Path,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let ca = Certificate::from_pem(tokio::fs::read(ca_cert).await?);
        let identity = Identity::from_pem(
            tokio::fs::read(cert).await?,
            tokio::fs::read(key).await?,
        );
        let tls = ClientTlsConfig::new()
            .domain_name("localhost")
            .ca_certificate(ca)
            .identity(identity);

        let channel = Channel::from_shared(format!("https://{}", server_addr))?
            .tls_config(tls)?
            .connect()
            .await?;

        Ok(Self {
            inner: JobWorkerServiceClient::new(channel),
        })
    }

    pub async fn start_job(&mut self, command: String, args: Vec<String>) -> Result<(), Status> {
        let request = Request::new(StartJobRequest { command, args });
        let response = self.inner.start_job(request).await?;
        println!("{}", response.into_inner().job_id);
        Ok(())
    }

    pub async fn stop_job(&mut self, job_id: String) -> Result<(), Status> {
        let request = Request::new(StopJobRequest {
            job_id: job_id.clone(),
        });
        self.inner.stop_job(request).await?;
        println!("Stopped {job_id}");
        Ok(())
    }

    pub async fn job_status(&mut self, job_id: String) -> Result<(), Status> {
        let request = Request::new(JobStatusRequest { job_id });
        let response = self.inner.job_status(request).await?.into_inner();

        let state = match response.state() {
            JobState::Unspecified => "unknown",
            JobState::NotStarted => "not started",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Stopped => "stopped",
        };
        println!("Status: {state}");
        if let Some(code) = response.exit_code {
            println!("Exit code: {code}");
        }
        if !response.error.is_empty() {
            println!("Error: {}", response.error);
        }
        Ok(())
    }

    /// Streams the job's output to stdout until the job finishes.
    pub async fn stream_output(&mut self, job_id: String) -> Result<(), Status> {
        let request = Request::new(StreamJobOutputRequest { job_id });
        let mut stream = self.inner.stream_job_output(request).await?.into_inner();

        let mut stdout = std::io::stdout();
        while let Some(StreamJobOutputResponse { data }) = stream.message().await? {
            if let Err(err) = stdout.write_all(&data) {
                if err.kind() == std::io::ErrorKind::BrokenPipe {
                    break;
                }
                let _ = writeln!(std::io::stderr(), "{}", err);
            }
        }
        let _ = stdout.flush();
        Ok(())
    }
}
