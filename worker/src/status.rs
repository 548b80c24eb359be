use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// State of a job. Transitions are a one-way ratchet:
/// `NotStarted -> Running -> Completed -> Stopped`.
///
/// `Completed` means the process reached wait() on its own; `Stopped` means a
/// stop request signaled the process and it subsequently exited. `Stopped`
/// supersedes `Completed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Status {
    NotStarted = 0,
    Running = 1,
    Completed = 2,
    Stopped = 3,
}

impl Status {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => Status::NotStarted,
            1 => Status::Running,
            2 => Status::Completed,
            _ => Status::Stopped,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::NotStarted => "not started",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Lock-free holder for a job's status.
///
/// `advance` refuses non-increasing transitions, so concurrent updaters can
/// never move the status backwards and the read path needs no lock.
#[derive(Debug)]
pub(crate) struct AtomicStatus(AtomicU32);

impl AtomicStatus {
    pub(crate) fn new(status: Status) -> Self {
        Self(AtomicU32::new(status as u32))
    }

    pub(crate) fn get(&self) -> Status {
        Status::from_u32(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn advance(&self, to: Status) {
        loop {
            let cur = self.0.load(Ordering::SeqCst);
            if to as u32 <= cur {
                return;
            }
            if self
                .0
                .compare_exchange(cur, to as u32, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }
}
