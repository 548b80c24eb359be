use std::convert::Infallible;
use std::env;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
#[cfg(target_os = "linux")]
use std::process;

use nix::errno::Errno;
use nix::unistd::{self, AccessFlags};

use crate::error::{Error, Result};

/// Resolves `command` against PATH, requiring an executable regular file.
/// A command containing a path separator is used as-is.
pub(crate) fn resolve_command(command: &str) -> Result<PathBuf> {
    let not_found = || Error::Exec {
        command: command.to_string(),
        errno: Errno::ENOENT,
    };

    if command.contains('/') {
        let path = PathBuf::from(command);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(not_found())
        };
    }

    for dir in env::split_paths(&env::var_os("PATH").unwrap_or_default()) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(command);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }

    Err(not_found())
}

fn is_executable(path: &Path) -> bool {
    path.is_file() && unistd::access(path, AccessFlags::X_OK).is_ok()
}

/// Replaces this process tree with the payload command.
///
/// The calling process already lives in the job's new mount and network
/// namespaces, but `unshare(CLONE_NEWPID)` only applies to future children,
/// so one fork is needed for the payload to run as pid 1 of the new pid
/// namespace. The fork child mounts `/proc` (which must happen inside the new
/// pid namespace, after the cgroup files were written) and execs; the fork
/// parent waits and forwards the payload's exit status, re-raising a fatal
/// signal on itself so the supervising engine observes signal termination.
#[cfg(target_os = "linux")]
pub(crate) fn exec_payload(command: &Path, args: &[String]) -> Result<Infallible> {
    use nix::unistd::ForkResult;

    match unsafe { unistd::fork() }.map_err(Error::Fork)? {
        ForkResult::Parent { child } => forward_exit(child),
        ForkResult::Child => match mount_proc_and_exec(command, args) {
            Ok(never) => match never {},
            Err(err) => {
                // stderr is piped into the job's output buffer
                eprintln!("{err}");
                process::exit(1);
            }
        },
    }
}

#[cfg(target_os = "linux")]
fn forward_exit(child: unistd::Pid) -> Result<Infallible> {
    use nix::sys::signal::kill;
    use nix::sys::wait::{waitpid, WaitStatus};

    let status = waitpid(child, None).map_err(|errno| {
        Error::Wait(std::sync::Arc::new(std::io::Error::from_raw_os_error(
            errno as i32,
        )))
    })?;

    match status {
        WaitStatus::Exited(_, code) => process::exit(code),
        WaitStatus::Signaled(_, signal, _) => {
            let _ = kill(unistd::Pid::this(), signal);
            // unreachable for fatal signals; fall back to the shell encoding
            process::exit(128 + signal as i32);
        }
        _ => process::exit(1),
    }
}

#[cfg(target_os = "linux")]
fn mount_proc_and_exec(command: &Path, args: &[String]) -> Result<Infallible> {
    use nix::mount::{mount, MsFlags};
    use nix::sys::prctl;
    use nix::sys::signal::Signal;

    // take the payload down if its supervisor dies first
    if let Err(errno) = prctl::set_pdeathsig(Signal::SIGKILL) {
        tracing::warn!(error = %errno, "could not set parent death signal");
    }

    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(Error::ProcMount)?;

    exec(command, args)
}

/// Plain exec replacement for platforms without the namespace machinery.
#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) fn exec_payload(command: &Path, args: &[String]) -> Result<Infallible> {
    exec(command, args)
}

fn exec(command: &Path, args: &[String]) -> Result<Infallible> {
    let invalid = || Error::Exec {
        command: command.display().to_string(),
        errno: Errno::EINVAL,
    };

    let path = CString::new(command.as_os_str().as_bytes()).map_err(|_| invalid())?;
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(path.clone());
    for arg in args {
        argv.push(CString::new(arg.as_str()).map_err(|_| invalid())?);
    }

    Ok(unistd::execv(&path, &argv).map_err(|errno| Error::Exec {
        command: command.display().to_string(),
        errno,
    })?)
}
