use std::sync::RwLock;

/// Append-only byte log supporting concurrent appends and positional reads.
///
/// A growing contiguous buffer under a reader-writer lock: appends take the
/// lock exclusively, positional reads share it. Appends are atomic with
/// respect to concurrent reads; a read never observes a partial append.
#[derive(Debug, Default)]
pub(crate) struct ByteLog {
    buf: RwLock<Vec<u8>>,
}

impl ByteLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends `data` and returns the number of bytes written.
    pub(crate) fn append(&self, data: &[u8]) -> usize {
        let mut buf = self.buf.write().expect("byte log lock poisoned");
        buf.extend_from_slice(data);
        data.len()
    }

    /// Copies bytes starting at `offset` into `dst`.
    ///
    /// Returns the number of bytes copied and an end-of-log flag. The flag is
    /// set, with zero bytes copied, when `offset` is at or past the end of
    /// the log. An empty `dst` always reads zero bytes without the flag.
    pub(crate) fn read_at(&self, offset: usize, dst: &mut [u8]) -> (usize, bool) {
        if dst.is_empty() {
            return (0, false);
        }

        let buf = self.buf.read().expect("byte log lock poisoned");
        if offset >= buf.len() {
            return (0, true);
        }

        let n = dst.len().min(buf.len() - offset);
        dst[..n].copy_from_slice(&buf[offset..offset + n]);
        (n, false)
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.read().expect("byte log lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_at_end_reports_end_of_log() {
        let log = ByteLog::new();
        let mut dst = [0u8; 4];
        assert_eq!(log.read_at(0, &mut dst), (0, true));

        log.append(b"foo");
        assert_eq!(log.read_at(3, &mut dst), (0, true));
        assert_eq!(log.read_at(7, &mut dst), (0, true));
    }

    #[test]
    fn empty_destination_reads_nothing() {
        let log = ByteLog::new();
        log.append(b"foo");
        assert_eq!(log.read_at(0, &mut []), (0, false));
        assert_eq!(log.read_at(9, &mut []), (0, false));
    }

    #[test]
    fn partial_and_full_reads() {
        let log = ByteLog::new();
        assert_eq!(log.append(b"foobar"), 6);
        assert_eq!(log.len(), 6);

        let mut dst = [0u8; 4];
        assert_eq!(log.read_at(0, &mut dst), (4, false));
        assert_eq!(&dst, b"foob");

        assert_eq!(log.read_at(4, &mut dst), (2, false));
        assert_eq!(&dst[..2], b"ar");
    }

    #[test]
    fn appends_are_visible_in_order() {
        let log = ByteLog::new();
        log.append(b"foo");
        log.append(b"bar");

        let mut dst = [0u8; 6];
        assert_eq!(log.read_at(0, &mut dst), (6, false));
        assert_eq!(&dst, b"foobar");
    }
}
