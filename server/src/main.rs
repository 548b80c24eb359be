use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use server::{Limits, ServerConfig, TlsConfig};

/// A prototype job worker service that provides an api to run arbitrary
/// linux processes.
#[derive(Debug, Parser)]
#[command(name = "job-worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the job-worker server and listen for connections
    Serve(ServeArgs),
    /// Child entry point used when this binary is re-executed under new
    /// namespaces; never invoked by hand
    #[command(hide = true)]
    Child(ChildArgs),
}

#[derive(Debug, Args)]
struct LimitArgs {
    /// Maximum cpu usage per job as a fraction of one cpu
    #[arg(long, default_value_t = 0.0)]
    max_cpu: f32,

    /// memory.max value to set in the cgroup of each job
    #[arg(long, default_value = "")]
    max_memory: String,

    /// Maximum read io operations per second for each job
    #[arg(long, default_value_t = 0)]
    max_riops: u32,

    /// Maximum write io operations per second for each job
    #[arg(long, default_value_t = 0)]
    max_wiops: u32,
}

impl LimitArgs {
    fn limits(&self) -> Limits {
        Limits {
            cpu_max: self.max_cpu,
            memory_max: self.max_memory.clone(),
            riops_max: self.max_riops,
            wiops_max: self.max_wiops,
        }
    }
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Listen address
    #[arg(long, default_value = "[::1]:8000")]
    listen_addr: SocketAddr,

    /// TLS ca cert file used to validate client certificates
    #[arg(long)]
    tls_ca_cert: PathBuf,

    /// TLS server certificate file
    #[arg(long)]
    tls_cert: PathBuf,

    /// TLS server key file
    #[arg(long)]
    tls_key: PathBuf,

    #[command(flatten)]
    limits: LimitArgs,
}

#[derive(Debug, Args)]
struct ChildArgs {
    #[command(flatten)]
    limits: LimitArgs,

    /// Command and arguments to execute
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Serve(args) => run_serve(args),
        Command::Child(args) => run_child(args),
    }
}

fn current_exe() -> Result<String, ExitCode> {
    match std::env::current_exe() {
        Ok(path) => Ok(path.to_string_lossy().into_owned()),
        Err(err) => {
            tracing::error!(error = %err, "cannot determine own executable path");
            Err(ExitCode::FAILURE)
        }
    }
}

fn run_serve(args: ServeArgs) -> ExitCode {
    let reexec_command = match current_exe() {
        Ok(path) => path,
        Err(code) => return code,
    };

    let cfg = ServerConfig {
        addr: args.listen_addr,
        tls: TlsConfig {
            ca_cert: args.tls_ca_cert,
            cert: args.tls_cert,
            key: args.tls_key,
        },
        worker: server::worker_config(reexec_command, &args.limits.limits()),
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "cannot build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(server::serve(cfg, shutdown_signal())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "server error");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::warn!("caught interrupt, shutting down"),
        Err(err) => tracing::error!(error = %err, "error waiting for interrupt"),
    }
}

/// The child code path deliberately runs without an async runtime: the engine
/// forks and execs here, which must not happen on runtime threads.
fn run_child(args: ChildArgs) -> ExitCode {
    let reexec_command = match current_exe() {
        Ok(path) => path,
        Err(code) => return code,
    };

    let (command, command_args) = args
        .command
        .split_first()
        .expect("clap guarantees at least one trailing argument");

    let cfg = server::worker_config(reexec_command, &args.limits.limits());
    let worker = match worker::Worker::new(cfg) {
        Ok(worker) => worker,
        Err(err) => {
            tracing::error!(error = %err, "error configuring child worker");
            return ExitCode::FAILURE;
        }
    };

    match worker.start_job_child(command, command_args) {
        // start_job_child replaces the process image; it only returns on
        // error, which it has already logged
        Err(_) => ExitCode::FAILURE,
        Ok(never) => match never {},
    }
}
