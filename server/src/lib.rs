//! gRPC front end for the job execution engine.
//!
//! Callers authenticate with client certificates; the certificate subject's
//! common name becomes the opaque owner id that the engine checks on every
//! job operation.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;

use protobuf::job_worker_service_server::JobWorkerServiceServer;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};

pub mod interceptor;
pub mod service;

/// Paths to the PEM files that make up the server's TLS identity and the CA
/// used to validate client certificates.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Per-job cgroup limits as configured on the command line.
#[derive(Clone, Debug, Default)]
pub struct Limits {
    /// Fraction of one cpu in (0, 1]; zero disables the limit.
    pub cpu_max: f32,
    /// Verbatim `memory.max` contents; empty disables the limit.
    pub memory_max: String,
    pub riops_max: u32,
    pub wiops_max: u32,
}

/// Everything needed to run the server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub tls: TlsConfig,
    pub worker: worker::Config,
}

/// Builds the engine config for a server whose host binary lives at
/// `reexec_command`: jobs re-enter that binary through the hidden `child`
/// subcommand, with the limit flags forwarded and `--` separating them from
/// the payload command.
pub fn worker_config(reexec_command: String, limits: &Limits) -> worker::Config {
    let mut reexec_args = vec!["child".to_string()];
    if limits.cpu_max != 0.0 {
        reexec_args.push("--max-cpu".to_string());
        reexec_args.push(limits.cpu_max.to_string());
    }
    if !limits.memory_max.is_empty() {
        reexec_args.push("--max-memory".to_string());
        reexec_args.push(limits.memory_max.clone());
    }
    if limits.riops_max > 0 {
        reexec_args.push("--max-riops".to_string());
        reexec_args.push(limits.riops_max.to_string());
    }
    if limits.wiops_max > 0 {
        reexec_args.push("--max-wiops".to_string());
        reexec_args.push(limits.wiops_max.to_string());
    }
    reexec_args.push("--".to_string());

    worker::Config {
        reexec_command,
        reexec_args,
        reexec_env: Vec::new(),
        cpu_max: limits.cpu_max,
        memory_max: limits.memory_max.clone(),
        riops_max: limits.riops_max,
        wiops_max: limits.wiops_max,
    }
}

/// Serves the job-worker API over mutually authenticated TLS until the
/// `shutdown` future resolves.
pub async fn serve(
    cfg: ServerConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let worker = worker::Worker::new(cfg.worker)?;
    let service = service::JobService::new(worker);
    let server = JobWorkerServiceServer::with_interceptor(service, interceptor::extract_user);

    let identity = Identity::from_pem(
        std::fs::read(&cfg.tls.cert)?,
        std::fs::read(&cfg.tls.key)?,
    );
    let client_ca = Certificate::from_pem(std::fs::read(&cfg.tls.ca_cert)?);
    let tls = ServerTlsConfig::new()
        .identity(identity)
        .client_ca_root(client_ca);

    tracing::info!(addr = %cfg.addr, "listening");

    Server::builder()
        .tls_config(tls)?
        .add_service(server)
        .serve_with_shutdown(cfg.addr, shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_flags_are_forwarded_to_the_child() {
        let limits = Limits {
            cpu_max: 0.25,
            memory_max: "128M".to_string(),
            riops_max: 100,
            wiops_max: 0,
        };
        let cfg = worker_config("/usr/bin/job-worker".to_string(), &limits);

        assert_eq!(cfg.reexec_command, "/usr/bin/job-worker");
        assert_eq!(
            cfg.reexec_args,
            vec![
                "child",
                "--max-cpu",
                "0.25",
                "--max-memory",
                "128M",
                "--max-riops",
                "100",
                "--",
            ]
        );
    }

    #[test]
    fn unset_limits_produce_a_bare_child_invocation() {
        let cfg = worker_config("job-worker".to_string(), &Limits::default());
        assert_eq!(cfg.reexec_args, vec!["child", "--"]);
    }
}
