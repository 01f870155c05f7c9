//! The controllable-spawn capability and its adapters
//!
//! A session does not care what kind of thing it is driving. Anything that
//! can hand over an input stream, a primary output stream, and optionally
//! an error output stream, and that can report and effect its own
//! termination, implements [`Spawnable`]. The crate ships three adapters:
//!
//! - [`ProcessSpawn`]: a local child process with piped stdio, the only
//!   adapter with a separate error stream.
//! - [`PtySpawn`]: a local child process behind a pseudo-terminal, for
//!   programs that refuse to behave without one.
//! - [`TcpSpawn`]: a raw TCP connection to a remote interactive service
//!   (a telnet-style session; no protocol handling of any kind).

mod process;
mod pty;
mod tcp;

pub use process::ProcessSpawn;
pub use pty::PtySpawn;
pub use tcp::TcpSpawn;

use crate::result::ExpectError;
use tokio::io::{AsyncRead, AsyncWrite};

/// The streams of a spawn, surrendered once to the session.
pub struct SpawnStreams {
    /// Writable input, or `None` if the spawn does not accept input.
    pub input: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    /// The primary readable output stream.
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    /// The secondary (error) output stream, if the spawn has one.
    pub error: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

/// A process or remote session that a [`Session`] can control.
///
/// Implement this to attach the expect engine to something the built-in
/// adapters do not cover.
///
/// [`Session`]: crate::Session
pub trait Spawnable: Send {
    /// Surrender the spawn's streams. Called exactly once, at attach time.
    ///
    /// # Errors
    ///
    /// [`ExpectError::Launch`] if the streams are gone, including when they
    /// were already taken by an earlier attach.
    fn take_streams(&mut self) -> Result<SpawnStreams, ExpectError>;

    /// Has the spawn terminated?
    fn is_terminated(&mut self) -> bool;

    /// The spawn's exit code.
    ///
    /// # Errors
    ///
    /// [`ExpectError::NotTerminated`] while the spawn is still running.
    fn exit_code(&mut self) -> Result<i32, ExpectError>;

    /// Forcibly terminate the spawn. Best-effort, non-blocking, and
    /// idempotent; failures are swallowed.
    fn terminate(&mut self);
}
