mod client;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use client::Client;

/// Connect to a job-worker server
#[derive(Debug, Parser)]
#[command(name = "job-worker-cli")]
struct Cli {
    /// The address of the server
    #[arg(short = 's', long = "server")]
    server: String,

    /// TLS ca cert file used to validate the server certificate
    #[arg(long)]
    tls_ca_cert: PathBuf,

    /// TLS client certificate file identifying the caller
    #[arg(long)]
    tls_cert: PathBuf,

    /// TLS client key file
    #[arg(long)]
    tls_key: PathBuf,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(Debug, Subcommand)]
enum SubCommand {
    /// Start a job on the server
    Start {
        /// Command and arguments to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Stop a job
    Stop { job_id: String },
    /// Get the status of a job
    Status { job_id: String },
    /// Stream the output of a job
    Output { job_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut client =
        match Client::connect(&cli.server, &cli.tls_ca_cert, &cli.tls_cert, &cli.tls_key).await {
            Ok(client) => client,
            Err(err) => {
                eprintln!("connect error: {err}");
                return ExitCode::FAILURE;
            }
        };

    let result = match cli.command {
        SubCommand::Start { mut command } => {
            let args = command.split_off(1);
            let command = command.pop().expect("clap requires a command");
            client.start_job(command, args).await
        }
        SubCommand::Stop { job_id } => client.stop_job(job_id).await,
        SubCommand::Status { job_id } => client.job_status(job_id).await,
        SubCommand::Output { job_id } => client.stream_output(job_id).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(status) => {
            eprintln!("{}: {}", status.code(), status.message());
            ExitCode::FAILURE
        }
    }
}
