//! Capture buffers for spawn output
//!
//! Each output stream of a spawn gets one [`CaptureBuffer`]. The stream
//! piper appends every chunk it drains while the session is capturing, and
//! callers read point-in-time snapshots at any moment. The buffer is
//! append-only: it never shrinks and is never cleared while the session is
//! alive, so snapshot lengths are monotonically non-decreasing up to the
//! point interactive mode suspends capturing.

use bytes::BytesMut;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared, append-only accumulation of one output stream.
///
/// Cloning is cheap; all clones observe the same data. Exactly one writer
/// (the stream piper) appends, which keeps appends from interleaving.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<BytesMut>>,
}

impl CaptureBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of raw output.
    pub(crate) fn append(&self, chunk: &[u8]) {
        self.lock().extend_from_slice(chunk);
    }

    /// Snapshot of everything captured so far, as lossy UTF-8.
    pub fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    /// Number of bytes captured so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing has been captured yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BytesMut> {
        // The buffer is append-only, so data behind a poisoned lock is
        // still well-formed.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer() {
        let buffer = CaptureBuffer::new();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.snapshot(), "");
    }

    #[test]
    fn test_append() {
        let buffer = CaptureBuffer::new();
        buffer.append(b"Hello");
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.snapshot(), "Hello");
    }

    #[test]
    fn test_multiple_appends() {
        let buffer = CaptureBuffer::new();
        buffer.append(b"Hello ");
        buffer.append(b"World");
        assert_eq!(buffer.snapshot(), "Hello World");
    }

    #[test]
    fn test_clones_share_data() {
        let buffer = CaptureBuffer::new();
        let view = buffer.clone();
        buffer.append(b"shared");
        assert_eq!(view.snapshot(), "shared");
    }

    #[test]
    fn test_snapshot_is_non_destructive() {
        let buffer = CaptureBuffer::new();
        buffer.append(b"data");
        assert_eq!(buffer.snapshot(), "data");
        assert_eq!(buffer.snapshot(), "data");
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_length_never_shrinks() {
        let buffer = CaptureBuffer::new();
        let mut last = 0;
        for chunk in [&b"a"[..], b"", b"bcd", b"e"] {
            buffer.append(chunk);
            assert!(buffer.len() >= last);
            last = buffer.len();
        }
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let buffer = CaptureBuffer::new();
        buffer.append(&[0x48, 0x69, 0xFF]);
        assert_eq!(buffer.snapshot(), "Hi\u{FFFD}");
    }
}
