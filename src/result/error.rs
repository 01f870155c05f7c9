//! Error types for expectr

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while driving a spawned session.
///
/// Most methods return `Result<T, ExpectError>`. The variants map directly
/// onto the ways a blocking wait can go wrong: bad arguments are rejected
/// before anything blocks, a deadline elapsing surfaces as [`Timeout`]
/// at the end of the call, and I/O trouble on a live stream is passed
/// through rather than retried.
///
/// [`Timeout`]: ExpectError::Timeout
///
/// # Examples
///
/// ```no_run
/// use expectr::{ExpectError, Session};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut session = Session::spawn("some-command")?;
///
/// match session.expect_timeout("done", 5.0).await {
///     Ok(()) => println!("matched"),
///     Err(ExpectError::Timeout { after }) => {
///         eprintln!("timed out after {:?}", after);
///     }
///     Err(ExpectError::StreamEnded) => {
///         eprintln!("spawn closed its output before matching");
///     }
///     Err(e) => return Err(e.into()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum ExpectError {
    /// Timeout value out of range.
    ///
    /// Timeouts are given in seconds; `-1` means "wait forever" and anything
    /// below that is rejected before the call blocks.
    #[error("timeout must be >= -1 seconds, was {value}")]
    InvalidTimeout {
        /// The rejected value.
        value: f64,
    },

    /// The deadline elapsed before the pattern matched or the spawn closed.
    ///
    /// Also reported by [`Session::last_expect_timed_out`] until the next
    /// blocking call starts.
    ///
    /// [`Session::last_expect_timed_out`]: crate::Session::last_expect_timed_out
    #[error("timeout after {after:?}")]
    Timeout {
        /// How long the call was allowed to wait.
        after: Duration,
    },

    /// The output stream ended before the pattern matched.
    ///
    /// The spawn closed its output (usually because it exited) while an
    /// expect call was still scanning, and before the deadline elapsed.
    #[error("output stream ended before the pattern matched")]
    StreamEnded,

    /// I/O error on a live stream.
    ///
    /// Reading from the spawn's output or writing to its input failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking wait was interrupted by session shutdown.
    ///
    /// Raised when [`Session::stop`] wakes a call that was still waiting.
    ///
    /// [`Session::stop`]: crate::Session::stop
    #[error("blocking wait interrupted: {0}")]
    Interrupted(String),

    /// Exit code requested while the spawn is still running.
    #[error("spawn has not terminated")]
    NotTerminated,

    /// The spawn could not be started.
    ///
    /// Command not found, PTY allocation failure, connection refused, and
    /// similar launch-time trouble.
    #[error("failed to launch spawn: {0}")]
    Launch(String),
}
