//! gRPC round-trip tests: mutual TLS, certificate-derived identity and the
//! owner check seen from the wire.

#![cfg(target_os = "linux")]

mod common;

use std::path::PathBuf;
use std::time::Duration;

use common::{engine, isolation_works, limits};
use protobuf::job_worker_service_client::JobWorkerServiceClient;
use protobuf::{
    JobState, JobStatusRequest, StartJobRequest, StopJobRequest, StreamJobOutputRequest,
};
use server::{ServerConfig, TlsConfig};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tonic::Code;

fn tls_data(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(format!("../tls/data/{name}"))
}

async fn start_server(addr: &'static str) {
    let cfg = ServerConfig {
        addr: addr.parse().expect("listen addr"),
        tls: TlsConfig {
            ca_cert: tls_data("ca.pem"),
            cert: tls_data("server.pem"),
            key: tls_data("server.key"),
        },
        worker: server::worker_config(common::bin_path(), &limits()),
    };
    tokio::spawn(async move {
        if let Err(err) = server::serve(cfg, std::future::pending()).await {
            eprintln!("server error: {err}");
        }
    });
}

async fn connect(user: &str, addr: &str) -> JobWorkerServiceClient<Channel> {
    let ca = Certificate::from_pem(tokio::fs::read(tls_data("ca.pem")).await.expect("ca"));
    let identity = Identity::from_pem(
        tokio::fs::read(tls_data(&format!("{user}.pem")))
            .await
            .expect("client cert"),
        tokio::fs::read(tls_data(&format!("{user}.key")))
            .await
            .expect("client key"),
    );
    let tls = ClientTlsConfig::new()
        .domain_name("localhost")
        .ca_certificate(ca)
        .identity(identity);

    // retry while the server is still binding
    for _ in 0..50 {
        let endpoint = Channel::from_shared(format!("https://{addr}"))
            .expect("endpoint")
            .tls_config(tls.clone())
            .expect("tls config");
        match endpoint.connect().await {
            Ok(channel) => return JobWorkerServiceClient::new(channel),
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    panic!("server at {addr} never became reachable");
}

#[tokio::test]
async fn rejects_malformed_and_unknown_job_ids() {
    let addr = "127.0.0.1:50151";
    start_server(addr).await;
    let mut client = connect("alice", addr).await;

    let err = client
        .job_status(JobStatusRequest {
            job_id: "garbage".to_string(),
        })
        .await
        .expect_err("malformed id must be rejected");
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = client
        .job_status(JobStatusRequest {
            job_id: "job_00000000000000000000000000000000".to_string(),
        })
        .await
        .expect_err("unknown id must be rejected");
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn rejects_empty_commands() {
    let addr = "127.0.0.1:50152";
    start_server(addr).await;
    let mut client = connect("alice", addr).await;

    let err = client
        .start_job(StartJobRequest {
            command: String::new(),
            args: Vec::new(),
        })
        .await
        .expect_err("empty command must be rejected");
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn echo_job_round_trip() {
    if !isolation_works(&engine(&limits())).await {
        return;
    }

    let addr = "127.0.0.1:50153";
    start_server(addr).await;
    let mut client = connect("alice", addr).await;

    let job_id = client
        .start_job(StartJobRequest {
            command: "echo".to_string(),
            args: vec!["-n".to_string(), "hello alice".to_string()],
        })
        .await
        .expect("start job")
        .into_inner()
        .job_id;

    let mut stream = client
        .stream_job_output(StreamJobOutputRequest {
            job_id: job_id.clone(),
        })
        .await
        .expect("stream output")
        .into_inner();

    let mut received = Vec::new();
    while let Some(msg) = stream.message().await.expect("stream message") {
        received.extend_from_slice(&msg.data);
    }
    assert_eq!(String::from_utf8_lossy(&received), "hello alice");

    let status = client
        .job_status(JobStatusRequest { job_id })
        .await
        .expect("job status")
        .into_inner();
    assert_eq!(status.state(), JobState::Completed);
    assert_eq!(status.exit_code, Some(0));
    assert!(status.error.is_empty());
}

#[tokio::test]
async fn foreign_callers_cannot_see_each_others_jobs() {
    if !isolation_works(&engine(&limits())).await {
        return;
    }

    let addr = "127.0.0.1:50154";
    start_server(addr).await;
    let mut alice = connect("alice", addr).await;
    let mut bob = connect("bob", addr).await;

    let job_id = alice
        .start_job(StartJobRequest {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 1000".to_string()],
        })
        .await
        .expect("start job")
        .into_inner()
        .job_id;

    // the job exists, but bob gets the same answer as for a missing one
    let err = bob
        .job_status(JobStatusRequest {
            job_id: job_id.clone(),
        })
        .await
        .expect_err("foreign status must fail");
    assert_eq!(err.code(), Code::NotFound);

    let err = bob
        .stop_job(StopJobRequest {
            job_id: job_id.clone(),
        })
        .await
        .expect_err("foreign stop must fail");
    assert_eq!(err.code(), Code::NotFound);

    alice
        .stop_job(StopJobRequest {
            job_id: job_id.clone(),
        })
        .await
        .expect("owner stop");

    let status = alice
        .job_status(JobStatusRequest { job_id })
        .await
        .expect("job status")
        .into_inner();
    assert_eq!(status.state(), JobState::Stopped);
    assert_eq!(status.exit_code, Some(-1));
    assert!(!status.error.is_empty());
}
