use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::OnceCell;

use crate::buffer::StreamBuffer;
use crate::error::{Error, Result};
use crate::id::JobId;
use crate::reader::OutputReader;
use crate::status::{AtomicStatus, Status};
use crate::trigger::{Signal, Trigger};
use crate::user::UserId;

/// Terminal fields of a job, published exactly once before the done signal
/// fires. Observers that have seen the signal may read them freely.
#[derive(Debug)]
struct Outcome {
    error: Option<Error>,
    exit_code: Option<i32>,
}

/// A single supervised system process.
///
/// The job owns the process's combined stdout/stderr stream and its terminal
/// state. `id`, `owner` and the command are fixed at construction; the status
/// only ever ratchets forward.
pub struct Job {
    id: JobId,
    owner: UserId,
    buffer: Arc<StreamBuffer>,
    done: Trigger,
    status: AtomicStatus,
    // taken by the first call to start; a later call finds it empty
    command: Mutex<Option<Command>>,
    pid: OnceLock<i32>,
    outcome: OnceLock<Outcome>,
    stop_result: OnceCell<Result<()>>,
}

impl Job {
    /// Creates, but does not start, a new job running `command` with `args`.
    ///
    /// `env` entries are `KEY=VALUE` strings appended to the inherited
    /// environment. The child process is configured for new pid, mount and
    /// network namespaces with private mount propagation; establishing those
    /// is part of spawning, so a failure there surfaces from [`Job::start`].
    pub fn new(owner: UserId, command: &str, args: Vec<String>, env: &[String]) -> Result<Self> {
        if owner.is_empty() {
            return Err(Error::OwnerRequired);
        }
        if command.is_empty() {
            return Err(Error::CommandRequired);
        }

        let id = JobId::new()?;
        let done = Trigger::new();
        let buffer = Arc::new(StreamBuffer::new(done.watch()));

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env.iter().map(|entry| match entry.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (entry.clone(), String::new()),
            }))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                use nix::mount::{mount, MsFlags};
                use nix::sched::{unshare, CloneFlags};

                unshare(
                    CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWNET,
                )
                .map_err(errno_to_io)?;
                // keep mount changes made by the child from propagating back
                // to the host
                mount(
                    None::<&str>,
                    "/",
                    None::<&str>,
                    MsFlags::MS_REC | MsFlags::MS_PRIVATE,
                    None::<&str>,
                )
                .map_err(errno_to_io)?;
                Ok(())
            });
        }

        Ok(Self {
            id,
            owner,
            buffer,
            done,
            status: AtomicStatus::new(Status::NotStarted),
            command: Mutex::new(Some(cmd)),
            pid: OnceLock::new(),
            outcome: OnceLock::new(),
            stop_result: OnceCell::new(),
        })
    }

    /// Starts the job process. A second call returns
    /// [`Error::AlreadyStarted`]. Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut cmd = self
            .command
            .lock()
            .expect("job command lock poisoned")
            .take()
            .ok_or(Error::AlreadyStarted)?;

        let child = cmd.spawn().map_err(|err| Error::Spawn(Arc::new(err)))?;
        if let Some(pid) = child.id() {
            let _ = self.pid.set(pid as i32);
        }
        self.status.advance(Status::Running);

        let job = self.clone();
        tokio::spawn(async move { job.supervise(child).await });
        Ok(())
    }

    async fn supervise(self: Arc<Self>, mut child: Child) {
        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(stdout, self.buffer.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(stderr, self.buffer.clone())));
        }

        let wait_result = child.wait().await;

        // drain both pipes fully; every byte must be in the buffer before
        // the done signal releases readers
        for handle in pumps {
            let _ = handle.await;
        }

        let outcome = match wait_result {
            Ok(status) if status.success() => Outcome {
                error: None,
                exit_code: Some(0),
            },
            Ok(status) => Outcome {
                error: Some(Error::JobFailed(status)),
                exit_code: exit_code(status),
            },
            Err(err) => Outcome {
                error: Some(Error::Wait(Arc::new(err))),
                exit_code: None,
            },
        };

        // outcome first, then status, then the signal: anyone who observes
        // the signal sees settled terminal fields
        let _ = self.outcome.set(outcome);
        self.status.advance(Status::Completed);
        self.done.fire();
    }

    /// Stops the job by sending it an unconditional kill signal, then waits
    /// for it to finish. Repeated calls signal at most once and always return
    /// the first call's result. A job that already finished is left alone.
    pub async fn stop(&self) -> Result<()> {
        self.stop_result
            .get_or_init(|| async {
                if self.done.fired() {
                    return Ok(());
                }
                let Some(&pid) = self.pid.get() else {
                    // never started: there is no process to signal
                    return Ok(());
                };

                #[cfg(unix)]
                {
                    use nix::errno::Errno;
                    use nix::sys::signal::{kill, Signal as Sig};
                    use nix::unistd::Pid;

                    match kill(Pid::from_raw(pid), Sig::SIGKILL) {
                        // the job finished between the check above and the
                        // signal; treat the lost race as a no-op
                        Err(Errno::ESRCH) => return Ok(()),
                        Err(errno) => return Err(Error::Stop(errno)),
                        Ok(()) => {}
                    }

                    self.done.watch().wait().await;
                    self.status.advance(Status::Stopped);
                    Ok(())
                }

                #[cfg(not(unix))]
                {
                    let _ = pid;
                    Ok(())
                }
            })
            .await
            .clone()
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// Exit code of the finished process: `0` on success, the reported code
    /// on failure, `-1` when terminated by a signal. `None` while the job is
    /// still running or when no code could be retrieved.
    pub fn exit_code(&self) -> Option<i32> {
        if !self.done.fired() {
            return None;
        }
        self.outcome.get().and_then(|outcome| outcome.exit_code)
    }

    /// Terminal error from waiting on the process, if any. `None` while the
    /// job is still running.
    pub fn error(&self) -> Option<Error> {
        if !self.done.fired() {
            return None;
        }
        self.outcome.get().and_then(|outcome| outcome.error.clone())
    }

    /// Returns a reader that replays the job's output from the beginning and
    /// then follows new output until the job finishes.
    pub fn new_output_reader(&self) -> OutputReader {
        self.buffer.new_reader()
    }

    /// Signal that fires once the job has finished and its terminal fields
    /// are settled.
    pub fn done(&self) -> Signal {
        self.done.watch()
    }
}

async fn pump<R>(mut src: R, buffer: Arc<StreamBuffer>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match src.read_buf(&mut buf).await {
            Ok(n) if n > 0 => {
                buffer.write(&buf.split());
            }
            _ => break,
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|_| -1))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code()
}

#[cfg(target_os = "linux")]
fn errno_to_io(errno: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(errno as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_owner_and_command() {
        assert!(matches!(
            Job::new(UserId::from(""), "sh", Vec::new(), &[]),
            Err(Error::OwnerRequired)
        ));
        assert!(matches!(
            Job::new(UserId::from("alice"), "", Vec::new(), &[]),
            Err(Error::CommandRequired)
        ));
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let job = Job::new(UserId::from("alice"), "sh", Vec::new(), &[]).expect("new job");
        job.stop().await.expect("stop");
        job.stop().await.expect("stop again");
        assert_eq!(job.status(), Status::NotStarted);
        assert_eq!(job.exit_code(), None);
    }

    #[tokio::test]
    async fn second_start_reports_already_started() {
        let job = Arc::new(
            Job::new(
                UserId::from("alice"),
                "/this/binary/does/not/exist",
                Vec::new(),
                &[],
            )
            .expect("new job"),
        );

        // the first attempt fails to spawn, but consumes the one start
        assert!(matches!(job.start(), Err(Error::Spawn(_))));
        assert!(matches!(job.start(), Err(Error::AlreadyStarted)));
    }
}
