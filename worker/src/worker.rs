use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[cfg(target_os = "linux")]
use std::path::PathBuf;
#[cfg(target_os = "linux")]
use std::sync::OnceLock;

#[cfg(target_os = "linux")]
use crate::cgroup;
#[cfg(unix)]
use crate::child;
use crate::error::{Error, Result};
use crate::id::JobId;
use crate::job::Job;
use crate::reader::OutputReader;
use crate::status::Status;
use crate::user::UserId;

/// Period written as the second field of `cpu.max`, in microseconds.
const CPU_PERIOD_USEC: u32 = 100_000;

/// Worker configuration. All fields are fixed once the worker is built.
///
/// `reexec_command`/`reexec_args` describe how to re-invoke this binary so
/// that it lands in the child entry point (typically the current executable
/// with a hidden subcommand); `reexec_env` entries (`KEY=VALUE`) are appended
/// to the inherited environment of every job.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub reexec_command: String,
    pub reexec_args: Vec<String>,
    pub reexec_env: Vec<String>,
    /// Maximum cpu usage as a fraction of one cpu, 0 < value <= 1. Zero
    /// disables the limit.
    pub cpu_max: f32,
    /// Contents written verbatim to each job cgroup's `memory.max`. Empty
    /// disables the limit.
    pub memory_max: String,
    /// Maximum read io operations per second. Zero disables the limit.
    pub riops_max: u32,
    /// Maximum write io operations per second. Zero disables the limit.
    pub wiops_max: u32,
}

/// Point-in-time view of a job returned by [`Worker::job_status`].
#[derive(Clone, Debug)]
pub struct StatusResponse {
    pub status: Status,
    /// Absent while the job is running or when no code could be retrieved.
    pub exit_code: Option<i32>,
    /// Terminal error, only meaningful for completed or stopped jobs. A job
    /// may finish without a usable exit code; this carries the detail.
    pub error: Option<Error>,
}

/// The job execution engine: a fleet of [`Job`]s indexed by id, with owner
/// checks on every lookup, plus the child-entry half that sets up cgroups and
/// `/proc` before the payload runs.
pub struct Worker {
    cfg: Config,
    /// `cpu.max` contents rendered once from the validated fraction.
    cpu_max_contents: Option<String>,
    block_devices: Vec<String>,
    #[cfg(target_os = "linux")]
    root_cgroup: OnceLock<Result<PathBuf>>,
    jobs: RwLock<HashMap<JobId, Arc<Job>>>,
}

impl Worker {
    /// Validates `cfg` and builds a worker. On Linux this also probes the
    /// system's block devices once, for later io limits.
    pub fn new(cfg: Config) -> Result<Self> {
        if cfg.reexec_command.is_empty() {
            return Err(Error::ReexecCommandRequired);
        }
        if cfg.cpu_max < 0.0 || cfg.cpu_max > 1.0 {
            return Err(Error::InvalidCpuMax);
        }

        let cpu_max_contents = (cfg.cpu_max != 0.0).then(|| {
            let quota = (cfg.cpu_max * CPU_PERIOD_USEC as f32) as i64;
            format!("{quota} {CPU_PERIOD_USEC}")
        });

        Ok(Self {
            cfg,
            cpu_max_contents,
            block_devices: block_devices()?,
            #[cfg(target_os = "linux")]
            root_cgroup: OnceLock::new(),
            jobs: RwLock::new(HashMap::new()),
        })
    }

    /// Starts `command` with `args` as a new job owned by `owner` and returns
    /// its id. The process runs the configured reexec command so that it
    /// enters the child entry point under fresh pid, mount and network
    /// namespaces; only the matching owner can later stop or inspect the job.
    pub fn start_job(&self, owner: UserId, command: &str, args: &[String]) -> Result<JobId> {
        if command.is_empty() {
            return Err(Error::CommandRequired);
        }

        let mut argv = self.cfg.reexec_args.clone();
        argv.push(command.to_string());
        argv.extend(args.iter().cloned());

        let job = Arc::new(Job::new(
            owner,
            &self.cfg.reexec_command,
            argv,
            &self.cfg.reexec_env,
        )?);
        job.start()?;

        let id = job.id();
        self.jobs
            .write()
            .expect("job map poisoned")
            .insert(id, job);

        tracing::debug!(job_id = %id, "started job");
        Ok(id)
    }

    /// Child entry point, called from the re-executed binary and never
    /// otherwise. Resolves `command`, enters a freshly created leaf cgroup
    /// (creating the root cgroup on first use), then replaces this process
    /// tree with the payload. Only returns on error.
    #[cfg(unix)]
    pub fn start_job_child(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<std::convert::Infallible> {
        self.start_job_child_inner(command, args).map_err(|err| {
            tracing::error!(error = %err, "error starting child process");
            err
        })
    }

    #[cfg(unix)]
    fn start_job_child_inner(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<std::convert::Infallible> {
        let resolved = child::resolve_command(command)?;

        // cgroup files must be written before /proc is remounted, and /proc
        // before the exec; exec_payload handles the latter ordering
        #[cfg(target_os = "linux")]
        {
            let root = self.root_cgroup()?;
            cgroup::create_leaf(
                &root,
                &cgroup::LeafLimits {
                    cpu_max: self.cpu_max_contents.as_deref(),
                    memory_max: (!self.cfg.memory_max.is_empty())
                        .then_some(self.cfg.memory_max.as_str()),
                    riops_max: self.cfg.riops_max,
                    wiops_max: self.cfg.wiops_max,
                    block_devices: &self.block_devices,
                },
            )?;
        }

        child::exec_payload(&resolved, args)
    }

    #[cfg(target_os = "linux")]
    fn root_cgroup(&self) -> Result<PathBuf> {
        self.root_cgroup.get_or_init(cgroup::create_root).clone()
    }

    /// Kills the job and waits for it to finish. Returns
    /// [`Error::JobNotFound`] for unknown ids and foreign owners alike.
    pub async fn stop_job(&self, owner: &UserId, id: JobId) -> Result<()> {
        self.job(owner, id)?.stop().await
    }

    /// Reports the job's status, exit code and terminal error. Returns
    /// [`Error::JobNotFound`] for unknown ids and foreign owners alike.
    pub fn job_status(&self, owner: &UserId, id: JobId) -> Result<StatusResponse> {
        let job = self.job(owner, id)?;
        Ok(StatusResponse {
            status: job.status(),
            exit_code: job.exit_code(),
            error: job.error(),
        })
    }

    /// Returns a new reader over the job's output from its beginning.
    /// Returns [`Error::JobNotFound`] for unknown ids and foreign owners
    /// alike.
    pub fn job_output(&self, owner: &UserId, id: JobId) -> Result<OutputReader> {
        Ok(self.job(owner, id)?.new_output_reader())
    }

    fn job(&self, owner: &UserId, id: JobId) -> Result<Arc<Job>> {
        let jobs = self.jobs.read().expect("job map poisoned");
        match jobs.get(&id) {
            Some(job) if job.owner() == owner => Ok(job.clone()),
            // unknown id and wrong owner are indistinguishable on purpose
            _ => Err(Error::JobNotFound),
        }
    }
}

fn block_devices() -> Result<Vec<String>> {
    #[cfg(target_os = "linux")]
    {
        cgroup::block_devices()
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok(Vec::new())
    }
}
