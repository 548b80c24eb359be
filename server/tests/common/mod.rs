#![allow(dead_code)] // not every test binary uses every helper

use server::Limits;
use worker::{UserId, Worker};

/// Path of the host binary whose hidden `child` subcommand is the re-exec
/// target for every job.
pub fn bin_path() -> String {
    env!("CARGO_BIN_EXE_job-worker").to_string()
}

pub fn limits() -> Limits {
    Limits {
        cpu_max: 0.25,
        memory_max: "134217728".to_string(),
        riops_max: 0,
        wiops_max: 0,
    }
}

pub fn engine(limits: &Limits) -> Worker {
    Worker::new(server::worker_config(bin_path(), limits)).expect("engine config")
}

pub fn args<const N: usize>(list: [&str; N]) -> Vec<String> {
    list.into_iter().map(String::from).collect()
}

/// Whether this environment can actually run an isolated job: namespace
/// creation and cgroup setup both need privileges that CI sandboxes often
/// withhold. Runs a trivial job end to end and reports the reason on failure
/// so gated tests can skip loudly instead of failing.
pub async fn isolation_works(worker: &Worker) -> bool {
    let owner = UserId::from("probe");
    let id = match worker.start_job(owner.clone(), "sh", &args(["-c", "true"])) {
        Ok(id) => id,
        Err(err) => {
            eprintln!("skipping: cannot spawn isolated process: {err}");
            return false;
        }
    };

    let reader = worker.job_output(&owner, id).expect("probe output");
    let output = reader.read_to_end().await.expect("probe read");
    let status = worker.job_status(&owner, id).expect("probe status");

    if status.exit_code == Some(0) {
        return true;
    }

    eprintln!(
        "skipping: isolated probe failed: status={:?} exit_code={:?} error={:?} output={:?}",
        status.status,
        status.exit_code,
        status.error.map(|err| err.to_string()),
        String::from_utf8_lossy(&output),
    );
    false
}
