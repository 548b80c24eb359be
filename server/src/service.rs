use std::io::ErrorKind;
use std::pin::Pin;

use protobuf::job_worker_service_server::JobWorkerService;
use protobuf::{
    JobState, JobStatusRequest, JobStatusResponse, StartJobRequest, StartJobResponse,
    StopJobRequest, StopJobResponse, StreamJobOutputRequest, StreamJobOutputResponse,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use worker::{JobId, UserId, Worker};

use crate::interceptor::UserExtension;

/// Capacity of the per-stream output channel.
const OUTPUT_CHANNEL_CAPACITY: usize = 16;

/// gRPC service delegating to the job execution engine.
pub struct JobService {
    worker: Worker,
}

impl JobService {
    pub fn new(worker: Worker) -> Self {
        Self { worker }
    }
}

fn caller<T>(req: &Request<T>) -> Result<UserId, Status> {
    let ext = req
        .extensions()
        .get::<UserExtension>()
        .ok_or_else(|| Status::unauthenticated("no authenticated caller"))?;
    Ok(UserId::from(ext.user_id.as_str()))
}

fn parse_job_id(raw: &str) -> Result<JobId, Status> {
    raw.parse()
        .map_err(|_| Status::invalid_argument("invalid job id"))
}

fn into_status(err: worker::Error) -> Status {
    use worker::Error::*;
    match err {
        // unknown job and foreign owner look identical to the caller
        JobNotFound => Status::not_found(err.to_string()),
        OwnerRequired | CommandRequired => Status::invalid_argument(err.to_string()),
        Spawn(ref io) => match io.kind() {
            ErrorKind::NotFound => Status::not_found(err.to_string()),
            ErrorKind::PermissionDenied => Status::permission_denied(err.to_string()),
            _ => Status::internal(err.to_string()),
        },
        _ => Status::internal(err.to_string()),
    }
}

fn state_of(status: worker::Status) -> JobState {
    match status {
        worker::Status::NotStarted => JobState::NotStarted,
        worker::Status::Running => JobState::Running,
        worker::Status::Completed => JobState::Completed,
        worker::Status::Stopped => JobState::Stopped,
    }
}

#[tonic::async_trait]
impl JobWorkerService for JobService {
    async fn start_job(
        &self,
        req: Request<StartJobRequest>,
    ) -> Result<Response<StartJobResponse>, Status> {
        let user = caller(&req)?;
        let StartJobRequest { command, args } = req.into_inner();

        let job_id = self
            .worker
            .start_job(user, &command, &args)
            .map_err(into_status)?;

        Ok(Response::new(StartJobResponse {
            job_id: job_id.to_string(),
        }))
    }

    async fn stop_job(
        &self,
        req: Request<StopJobRequest>,
    ) -> Result<Response<StopJobResponse>, Status> {
        let user = caller(&req)?;
        let job_id = parse_job_id(&req.get_ref().job_id)?;

        self.worker
            .stop_job(&user, job_id)
            .await
            .map_err(into_status)?;

        Ok(Response::new(StopJobResponse {}))
    }

    async fn job_status(
        &self,
        req: Request<JobStatusRequest>,
    ) -> Result<Response<JobStatusResponse>, Status> {
        let user = caller(&req)?;
        let job_id = parse_job_id(&req.get_ref().job_id)?;

        let status = self
            .worker
            .job_status(&user, job_id)
            .map_err(into_status)?;

        Ok(Response::new(JobStatusResponse {
            state: state_of(status.status).into(),
            exit_code: status.exit_code,
            error: status
                .error
                .map(|err| err.to_string())
                .unwrap_or_default(),
        }))
    }

    type StreamJobOutputStream =
        Pin<Box<dyn Stream<Item = Result<StreamJobOutputResponse, Status>> + Send + 'static>>;

    async fn stream_job_output(
        &self,
        req: Request<StreamJobOutputRequest>,
    ) -> Result<Response<Self::StreamJobOutputStream>, Status> {
        let user = caller(&req)?;
        let job_id = parse_job_id(&req.get_ref().job_id)?;

        let reader = self
            .worker
            .job_output(&user, job_id)
            .map_err(into_status)?;

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let msg = StreamJobOutputResponse {
                            data: chunk[..n].to_vec(),
                        };
                        // a send error means the client went away; dropping
                        // the reader closes it and unregisters it
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(Status::internal(err.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(Response::new(
            Box::pin(ReceiverStream::new(rx)) as Self::StreamJobOutputStream
        ))
    }
}
