use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::bytelog::ByteLog;
use crate::reader::{OutputReader, ReaderState};
use crate::trigger::Signal;

/// Buffer that ingests a job's combined output and hands out independent
/// readers able to replay everything from the start and then follow new data
/// as it arrives.
///
/// Bytes are never mutated or dropped while the owning job is alive, so a
/// reader created at any time observes the full output from offset zero.
#[derive(Debug)]
pub struct StreamBuffer {
    log: ByteLog,
    readers: Mutex<Vec<Arc<ReaderState>>>,
    done: Signal,
}

impl StreamBuffer {
    /// Creates a buffer whose readers finish when `done` fires.
    pub(crate) fn new(done: Signal) -> Self {
        Self {
            log: ByteLog::new(),
            readers: Mutex::new(Vec::new()),
            done,
        }
    }

    /// Appends `data` to the log, then wakes every registered reader exactly
    /// once. Readers observed closed are dropped from the registry instead of
    /// being woken.
    pub fn write(&self, data: &[u8]) -> usize {
        let n = self.log.append(data);

        let mut readers = self.readers.lock().expect("reader registry poisoned");
        readers.retain(|reader| {
            if reader.is_closed() {
                return false;
            }
            reader.wake();
            true
        });

        n
    }

    /// Registers and returns a fresh reader positioned at offset zero.
    pub fn new_reader(self: &Arc<Self>) -> OutputReader {
        let state = Arc::new(ReaderState::new());
        self.readers
            .lock()
            .expect("reader registry poisoned")
            .push(state.clone());
        OutputReader::new(self.clone(), state)
    }

    /// Signal that fires when the stream has ended: no more data will be
    /// written and readers at the end of the log should stop waiting.
    pub fn done(&self) -> &Signal {
        &self.done
    }

    pub(crate) fn log(&self) -> &ByteLog {
        &self.log
    }
}

/// Per-reader wake primitive shared between the buffer's writer and one
/// reader.
///
/// `Notify` stores a wakeup permit when nobody is waiting, so a reader that
/// checks the log, finds it exhausted, and only then starts waiting still
/// observes a write that landed in between. Stale permits merely cause one
/// extra loop through the read path.
#[derive(Debug)]
pub(crate) struct Wake(Notify);

impl Wake {
    pub(crate) fn new() -> Self {
        Self(Notify::new())
    }

    pub(crate) fn fire(&self) {
        self.0.notify_one();
    }

    pub(crate) async fn wait(&self) {
        self.0.notified().await;
    }
}
