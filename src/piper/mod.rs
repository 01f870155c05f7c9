//! Stream pipers: background copy loops over spawn streams
//!
//! One piper task continuously drains each output stream of the spawn.
//! While the session is capturing, every chunk is appended to the stream's
//! [`CaptureBuffer`] and forwarded on a channel that expect calls consume
//! through [`OutputStream::wait_ready`]. When the session enters
//! interactive mode the pipers switch to mirroring chunks onto the user's
//! console instead, and a third piper bridges user input to the spawn.
//!
//! Pipers stop cooperatively: the shutdown check shares a `select!` with
//! the read, so a raised [`StopSignal`] terminates the loop within one
//! read's latency.

use crate::buffer::CaptureBuffer;
use crate::wait::{Deadline, StopSignal};
use bytes::Bytes;
use log::{debug, warn};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Where an output piper sends the chunks it drains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PipeMode {
    /// Append to the capture buffer and feed expect calls.
    Capture,
    /// Mirror to the user's console (interactive mode).
    Console,
}

/// The user-visible sink an output piper mirrors to in console mode.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Console {
    Stdout,
    Stderr,
}

impl Console {
    async fn mirror(&self, chunk: &[u8]) -> std::io::Result<()> {
        match self {
            Console::Stdout => {
                let mut out = tokio::io::stdout();
                out.write_all(chunk).await?;
                out.flush().await
            }
            Console::Stderr => {
                let mut err = tokio::io::stderr();
                err.write_all(chunk).await?;
                err.flush().await
            }
        }
    }
}

/// What a readiness wait observed.
pub(crate) enum Readiness {
    /// A chunk of output is available.
    Data(Bytes),
    /// No more bytes will ever arrive on this stream.
    End,
    /// The deadline passed with no data.
    DeadlineElapsed,
    /// The session's stop signal was raised.
    Stopped,
}

/// Receiving end of one output piper; the per-stream readiness primitive.
///
/// Owned by the session, one per output stream. `&mut` access enforces the
/// one-in-flight-expect-per-stream rule.
pub(crate) struct OutputStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
    ended: bool,
}

impl OutputStream {
    /// Block until data is available, the stream ends, the deadline
    /// elapses, or the stop signal is raised.
    ///
    /// End-of-stream is latched: once observed, every later wait reports
    /// [`Readiness::End`] immediately.
    pub(crate) async fn wait_ready(
        &mut self,
        deadline: &Deadline,
        stop: &StopSignal,
    ) -> Readiness {
        if self.ended {
            return Readiness::End;
        }
        tokio::select! {
            biased;
            chunk = self.rx.recv() => match chunk {
                Some(bytes) => Readiness::Data(bytes),
                None => {
                    self.ended = true;
                    Readiness::End
                }
            },
            _ = stop.raised() => Readiness::Stopped,
            _ = deadline.elapsed() => Readiness::DeadlineElapsed,
        }
    }
}

/// Start the continuous drain loop for one output stream.
///
/// Returns the session-side [`OutputStream`] handle and the piper's join
/// handle. The loop exits on end-of-stream, on a raised stop signal, or
/// when the session side goes away.
pub(crate) fn start_output_piper(
    mut source: Box<dyn AsyncRead + Send + Unpin>,
    buffer: CaptureBuffer,
    mut mode: watch::Receiver<PipeMode>,
    console: Console,
    stop: Arc<StopSignal>,
    chunk_size: usize,
) -> (OutputStream, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; chunk_size];
        loop {
            let n = tokio::select! {
                biased;
                _ = stop.raised() => {
                    debug!("output piper stopped");
                    break;
                }
                read = source.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!("output piper reached end of stream");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!("output piper read failed: {e}");
                        break;
                    }
                },
            };
            let current = *mode.borrow_and_update();
            match current {
                PipeMode::Capture => {
                    buffer.append(&buf[..n]);
                    if tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        // Session side is gone.
                        break;
                    }
                }
                PipeMode::Console => {
                    if let Err(e) = console.mirror(&buf[..n]).await {
                        warn!("console mirror failed: {e}");
                    }
                }
            }
        }
    });
    (OutputStream { rx, ended: false }, handle)
}

/// Start the interactive piper bridging user input to the spawn's input.
///
/// The writer is shared with `Session::send`, so each chunk takes the lock
/// for the duration of one write-and-flush.
pub(crate) fn start_input_piper(
    writer: Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
    stop: Arc<StopSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 1024];
        loop {
            let n = tokio::select! {
                biased;
                _ = stop.raised() => break,
                read = stdin.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        warn!("input piper read failed: {e}");
                        break;
                    }
                },
            };
            let mut writer = writer.lock().await;
            if writer.write_all(&buf[..n]).await.is_err() {
                break;
            }
            if let Err(e) = writer.flush().await {
                warn!("input piper flush failed: {e}");
                break;
            }
        }
        debug!("input piper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::Timeout;

    fn capture_piper(
        source: Box<dyn AsyncRead + Send + Unpin>,
    ) -> (OutputStream, JoinHandle<()>, CaptureBuffer, Arc<StopSignal>) {
        let buffer = CaptureBuffer::new();
        let stop = Arc::new(StopSignal::new());
        let (_, mode) = watch::channel(PipeMode::Capture);
        let (stream, handle) = start_output_piper(
            source,
            buffer.clone(),
            mode,
            Console::Stdout,
            stop.clone(),
            4096,
        );
        (stream, handle, buffer, stop)
    }

    #[tokio::test]
    async fn test_piper_captures_and_forwards() {
        let (mut producer, consumer) = tokio::io::duplex(256);
        let (mut stream, handle, buffer, _stop) = capture_piper(Box::new(consumer));

        producer.write_all(b"hello").await.unwrap();
        let deadline = Deadline::start(Timeout::from_secs(5.0).unwrap());
        let stop = StopSignal::new();
        match stream.wait_ready(&deadline, &stop).await {
            Readiness::Data(chunk) => assert_eq!(&chunk[..], b"hello"),
            _ => panic!("expected data"),
        }
        assert_eq!(buffer.snapshot(), "hello");

        drop(producer);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_end_of_stream_is_latched() {
        let (producer, consumer) = tokio::io::duplex(256);
        let (mut stream, handle, _buffer, _stop) = capture_piper(Box::new(consumer));
        drop(producer);
        handle.await.unwrap();

        let deadline = Deadline::start(Timeout::Infinite);
        let stop = StopSignal::new();
        assert!(matches!(
            stream.wait_ready(&deadline, &stop).await,
            Readiness::End
        ));
        assert!(matches!(
            stream.wait_ready(&deadline, &stop).await,
            Readiness::End
        ));
    }

    #[tokio::test]
    async fn test_deadline_elapses_without_data() {
        let (_producer, consumer) = tokio::io::duplex(256);
        let (mut stream, _handle, _buffer, _stop) = capture_piper(Box::new(consumer));

        let deadline = Deadline::start(Timeout::from_secs(0.05).unwrap());
        let stop = StopSignal::new();
        assert!(matches!(
            stream.wait_ready(&deadline, &stop).await,
            Readiness::DeadlineElapsed
        ));
    }

    #[tokio::test]
    async fn test_stop_wakes_waiting_reader() {
        let (_producer, consumer) = tokio::io::duplex(256);
        let (mut stream, handle, _buffer, stop) = capture_piper(Box::new(consumer));

        let deadline = Deadline::start(Timeout::Infinite);
        stop.raise();
        assert!(matches!(
            stream.wait_ready(&deadline, &stop).await,
            Readiness::Stopped
        ));
        handle.await.unwrap();
    }
}
