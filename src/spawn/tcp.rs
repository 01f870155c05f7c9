//! Remote interactive session over raw TCP

use crate::result::ExpectError;
use crate::spawn::{SpawnStreams, Spawnable};
use log::debug;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::TcpStream;

/// A telnet-style remote session: a raw byte stream over TCP.
///
/// No protocol parsing happens here; whatever the peer writes is the
/// output, whatever you send goes onto the wire verbatim. "Terminated"
/// means the connection has closed, either because the peer hung up or
/// because [`Spawnable::terminate`] was called. A closed connection
/// reports exit code `0`.
pub struct TcpSpawn {
    closed: Arc<AtomicBool>,
    streams: Option<SpawnStreams>,
}

impl TcpSpawn {
    /// Connect to `addr` (e.g. `"host:23"`).
    ///
    /// # Errors
    ///
    /// [`ExpectError::Launch`] if the connection cannot be established.
    pub async fn connect(addr: &str) -> Result<Self, ExpectError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ExpectError::Launch(format!("connect {addr}: {e}")))?;
        debug!("connected to {addr}");

        let (read, write) = stream.into_split();
        let closed = Arc::new(AtomicBool::new(false));
        let streams = SpawnStreams {
            input: Some(Box::new(write)),
            output: Box::new(EofFlagReader {
                inner: read,
                closed: closed.clone(),
            }),
            error: None,
        };

        Ok(Self {
            closed,
            streams: Some(streams),
        })
    }
}

impl Spawnable for TcpSpawn {
    fn take_streams(&mut self) -> Result<SpawnStreams, ExpectError> {
        self.streams
            .take()
            .ok_or_else(|| ExpectError::Launch("connection streams already taken".to_string()))
    }

    fn is_terminated(&mut self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn exit_code(&mut self) -> Result<i32, ExpectError> {
        if self.is_terminated() {
            Ok(0)
        } else {
            Err(ExpectError::NotTerminated)
        }
    }

    fn terminate(&mut self) {
        // The socket halves live with the session's pipers and are closed
        // when those wind down; marking the connection closed here is what
        // makes termination observable immediately.
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Read half that records end-of-stream in a shared flag.
struct EofFlagReader {
    inner: tokio::net::tcp::OwnedReadHalf,
    closed: Arc<AtomicBool>,
}

impl AsyncRead for EofFlagReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if buf.filled().len() == before {
                    this.closed.store(true, Ordering::SeqCst);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_observe_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            peer.write_all(b"hello\n").await.unwrap();
            // Dropping the socket closes the connection.
        });

        let mut spawn = TcpSpawn::connect(&addr.to_string()).await.unwrap();
        assert!(!spawn.is_terminated());
        assert!(matches!(
            spawn.exit_code(),
            Err(ExpectError::NotTerminated)
        ));

        let mut streams = spawn.take_streams().unwrap();
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut streams.output, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"hello\n");
        server.await.unwrap();

        // End of stream was observed, so the connection counts as closed.
        assert!(spawn.is_terminated());
        assert_eq!(spawn.exit_code().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        // Port 1 on localhost is essentially never listening.
        let result = TcpSpawn::connect("127.0.0.1:1").await;
        assert!(matches!(result, Err(ExpectError::Launch(_))));
    }

    #[tokio::test]
    async fn test_terminate_marks_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut spawn = TcpSpawn::connect(&addr.to_string()).await.unwrap();
        spawn.terminate();
        spawn.terminate();
        assert!(spawn.is_terminated());
    }
}
