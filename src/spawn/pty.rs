//! Local child process behind a pseudo-terminal

use crate::result::ExpectError;
use crate::spawn::{SpawnStreams, Spawnable};
use bytes::Bytes;
use log::{debug, warn};
use portable_pty::{native_pty_system, CommandBuilder, PtyPair, PtySize};
use std::io::{Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;

/// A child process running inside a PTY.
///
/// Programs that detect a terminal (password prompts, pagers, interactive
/// shells in line-editing mode) behave very differently on pipes; this
/// adapter gives them the terminal they want. The PTY merges stdout and
/// stderr into one stream, so there is no error stream and `expect_err`
/// is unavailable.
///
/// The PTY handles are blocking; dedicated threads pump them onto async
/// channels so the session sees ordinary async streams.
pub struct PtySpawn {
    _pair: PtyPair,
    child: Box<dyn portable_pty::Child + Send>,
    exit: Option<i32>,
    streams: Option<SpawnStreams>,
}

impl PtySpawn {
    /// Launch `command` inside a freshly allocated 24x80 PTY.
    ///
    /// # Errors
    ///
    /// [`ExpectError::Launch`] if the PTY cannot be allocated or the
    /// command cannot be spawned.
    pub fn new(command: &str) -> Result<Self, ExpectError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ExpectError::Launch(format!("openpty: {e}")))?;

        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ExpectError::Launch("empty command".to_string()))?;
        let mut cmd = CommandBuilder::new(program);
        for arg in parts {
            cmd.arg(arg);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ExpectError::Launch(format!("{command}: {e}")))?;
        debug!("spawned pty process: {command}");

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ExpectError::Launch(format!("pty reader: {e}")))?;
        // take_writer consumes the writer side of the master.
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ExpectError::Launch(format!("pty writer: {e}")))?;

        let streams = SpawnStreams {
            input: Some(Box::new(bridge_writer(writer))),
            output: Box::new(bridge_reader(reader)),
            error: None,
        };

        Ok(Self {
            _pair: pair,
            child,
            exit: None,
            streams: Some(streams),
        })
    }
}

impl Spawnable for PtySpawn {
    fn take_streams(&mut self) -> Result<SpawnStreams, ExpectError> {
        self.streams
            .take()
            .ok_or_else(|| ExpectError::Launch("pty streams already taken".to_string()))
    }

    fn is_terminated(&mut self) -> bool {
        if self.exit.is_some() {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(status.exit_code() as i32);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("polling pty child status failed: {e}");
                false
            }
        }
    }

    fn exit_code(&mut self) -> Result<i32, ExpectError> {
        if self.is_terminated() {
            self.exit.ok_or(ExpectError::NotTerminated)
        } else {
            Err(ExpectError::NotTerminated)
        }
    }

    fn terminate(&mut self) {
        if self.exit.is_none() {
            if let Err(e) = self.child.kill() {
                debug!("pty kill failed (child likely already gone): {e}");
            }
        }
    }
}

/// Pump a blocking reader onto a bounded channel from a dedicated thread.
fn bridge_reader(mut reader: Box<dyn Read + Send>) -> ChannelReader {
    let (tx, rx) = mpsc::channel::<Bytes>(32);
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        break; // async side dropped
                    }
                }
                Err(e) => {
                    debug!("pty reader thread done: {e}");
                    break;
                }
            }
        }
    });
    ChannelReader {
        rx,
        pending: Bytes::new(),
    }
}

/// Hand writes to a dedicated thread that owns the blocking writer.
fn bridge_writer(mut writer: Box<dyn Write + Send>) -> ChannelWriter {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    std::thread::spawn(move || {
        while let Some(data) = rx.blocking_recv() {
            if writer.write_all(&data).and_then(|()| writer.flush()).is_err() {
                break;
            }
        }
    });
    ChannelWriter { tx }
}

/// Async read half over the reader thread's channel.
struct ChannelReader {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pending.is_empty() {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => this.pending = chunk,
                // Channel closed: reader thread saw end of stream.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = this.pending.len().min(buf.remaining());
        buf.put_slice(&this.pending.split_to(n));
        Poll::Ready(Ok(()))
    }
}

/// Async write half over the writer thread's channel.
struct ChannelWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pty writer thread has exited",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        // The writer thread flushes after every chunk.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_channel_reader_delivers_and_ends() {
        let (tx, rx) = mpsc::channel::<Bytes>(4);
        let mut reader = ChannelReader {
            rx,
            pending: Bytes::new(),
        };
        tx.send(Bytes::from_static(b"abc")).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
    }

    #[tokio::test]
    async fn test_channel_reader_partial_reads() {
        let (tx, rx) = mpsc::channel::<Bytes>(4);
        let mut reader = ChannelReader {
            rx,
            pending: Bytes::new(),
        };
        tx.send(Bytes::from_static(b"abcdef")).await.unwrap();

        let mut buf = [0u8; 4];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ef");
    }

    #[tokio::test]
    async fn test_channel_writer_reports_dead_thread() {
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let mut writer = ChannelWriter { tx };
        drop(rx);
        assert!(writer.write_all(b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_pty_launch_failure() {
        assert!(matches!(
            PtySpawn::new(""),
            Err(ExpectError::Launch(_))
        ));
    }
}
