use std::sync::Arc;

use tokio::sync::Mutex;

use crate::buffer::{StreamBuffer, Wake};
use crate::error::{Error, Result};
use crate::trigger::{Signal, Trigger};

/// State shared between one [`OutputReader`] and the buffer's writer.
#[derive(Debug)]
pub(crate) struct ReaderState {
    wake: Wake,
    closed: Trigger,
}

impl ReaderState {
    pub(crate) fn new() -> Self {
        Self {
            wake: Wake::new(),
            closed: Trigger::new(),
        }
    }

    pub(crate) fn wake(&self) {
        self.wake.fire();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.fired()
    }

    fn closed_signal(&self) -> Signal {
        self.closed.watch()
    }
}

/// Cursor over a job's output stream.
///
/// Each reader owns an independent offset starting at zero, so multiple
/// readers over one job never affect each other. Concurrent calls on the same
/// reader serialize on the offset.
#[derive(Debug)]
pub struct OutputReader {
    buffer: Arc<StreamBuffer>,
    state: Arc<ReaderState>,
    offset: Mutex<usize>,
}

impl OutputReader {
    pub(crate) fn new(buffer: Arc<StreamBuffer>, state: Arc<ReaderState>) -> Self {
        Self {
            buffer,
            state,
            offset: Mutex::new(0),
        }
    }

    /// Reads the next available bytes into `dst`.
    ///
    /// Returns the number of bytes read. When the cursor is at the end of
    /// what has been written so far, the call waits for more data, for the
    /// stream to end, or for the reader to be closed, whichever comes first.
    /// `Ok(0)` with a non-empty `dst` means the stream has ended;
    /// [`Error::ReaderClosed`] means this reader was closed.
    pub async fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let mut offset = self.offset.lock().await;

        loop {
            if self.state.is_closed() {
                return Err(Error::ReaderClosed);
            }

            let (n, end) = self.buffer.log().read_at(*offset, dst);
            if n > 0 {
                *offset += n;
                return Ok(n);
            }
            if !end {
                // empty destination
                return Ok(0);
            }
            if self.buffer.done().fired() {
                return Ok(0);
            }

            let closed = self.state.closed_signal();
            tokio::select! {
                _ = self.state.wake.wait() => {}
                _ = closed.wait() => return Err(Error::ReaderClosed),
                // loop rather than return: bytes may have landed between the
                // read above and the done signal firing
                _ = self.buffer.done().wait() => {}
            }
        }
    }

    /// Reads until the end of the stream, returning everything seen from the
    /// current offset on.
    pub async fn read_to_end(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Closes the reader. Idempotent. Any waiting or future `read` returns
    /// [`Error::ReaderClosed`], and the buffer stops waking this reader.
    pub fn close(&self) {
        self.state.closed.fire();
    }
}

impl Drop for OutputReader {
    fn drop(&mut self) {
        self.close();
    }
}
