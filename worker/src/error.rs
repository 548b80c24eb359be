use std::io;
use std::process::ExitStatus;
use std::result;
use std::sync::Arc;

#[cfg(unix)]
use nix::errno::Errno;

/// Errors produced by the job execution engine.
///
/// The enum is `Clone` (io errors are held behind `Arc`) because some results
/// are computed once and then handed back on every subsequent call: a job's
/// terminal wait error and the memoized outcome of `stop`.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// A job owner is required and may not be empty.
    #[error("owner is required")]
    OwnerRequired,

    /// A job command is required and may not be empty.
    #[error("command is required")]
    CommandRequired,

    /// The worker config is missing the reexec command.
    #[error("reexec command is required")]
    ReexecCommandRequired,

    /// The configured cpu fraction is outside (0, 1].
    #[error("cpu max can not be less than 0 or greater than 1")]
    InvalidCpuMax,

    /// Second call to start on the same job.
    #[error("job already started")]
    AlreadyStarted,

    /// Unknown job id, or the caller does not own the job. The two cases are
    /// deliberately indistinguishable.
    #[error("job not found")]
    JobNotFound,

    /// The textual form of a job id could not be parsed.
    #[error("invalid job id")]
    InvalidJobId,

    /// Read on an output reader after it was closed.
    #[error("reader is closed")]
    ReaderClosed,

    /// The system randomness source failed while generating a job id.
    #[error("error generating job id")]
    IdGeneration,

    /// The job process could not be spawned.
    #[error("error spawning job process: {0}")]
    Spawn(Arc<io::Error>),

    /// Waiting on the job process failed at the OS level.
    #[error("error waiting for job process: {0}")]
    Wait(Arc<io::Error>),

    /// The job process terminated unsuccessfully. Carries the wait status,
    /// which reports either a non-zero exit code or the fatal signal.
    #[error("job process exited unsuccessfully: {0}")]
    JobFailed(ExitStatus),

    /// Signaling the job process during stop failed.
    #[cfg(unix)]
    #[error("error signaling job process: {0}")]
    Stop(Errno),

    /// Forking the namespaced payload process failed in the child entry.
    #[cfg(unix)]
    #[error("error forking job payload: {0}")]
    Fork(Errno),

    /// Creating or populating a cgroup failed in the child entry.
    #[error("error setting up cgroup: {0}")]
    CgroupSetup(String),

    /// Mounting /proc inside the new namespaces failed.
    #[cfg(unix)]
    #[error("error mounting /proc: {0}")]
    ProcMount(Errno),

    /// The requested command could not be resolved or executed.
    #[cfg(unix)]
    #[error("error executing {command}: {errno}")]
    Exec { command: String, errno: Errno },
}

pub type Result<T> = result::Result<T, Error>;
