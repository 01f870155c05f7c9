//! Session builder for configuration

use crate::result::ExpectError;
use crate::session::Session;
use crate::spawn::{ProcessSpawn, PtySpawn, Spawnable, TcpSpawn};
use crate::wait::Timeout;
use std::time::Duration;

/// Default timeout for expect operations (in seconds)
const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// Default read chunk size for the stream pipers (in bytes)
const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default interval at which `expect_close` polls termination
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Builder for configuring and creating sessions.
///
/// # Defaults
///
/// - Default timeout: 30 seconds (`-1` makes every defaulted wait infinite)
/// - Read chunk size: 4096 bytes
/// - Termination poll interval: 500 ms
///
/// # Examples
///
/// ```no_run
/// use expectr::Session;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Session::builder()
///     .default_timeout(60.0)
///     .spawn("python3 -i")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    default_timeout_secs: f64,
    chunk_size: usize,
    poll_interval: Duration,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the default timeout, in seconds, used by the expect calls that
    /// take no explicit timeout. `-1` means wait forever; values below
    /// `-1` are rejected when the session is created.
    pub fn default_timeout(mut self, secs: f64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Set the read chunk size used by the stream pipers.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Set how often `expect_close` polls the spawn's termination status.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Spawn `command` as a child process with piped stdio.
    ///
    /// This is the adapter with a separate error stream; use it when
    /// `expect_err` matters.
    ///
    /// # Errors
    ///
    /// [`ExpectError::Launch`] if the command cannot be started;
    /// [`ExpectError::InvalidTimeout`] if the default timeout is below `-1`.
    pub fn spawn(self, command: &str) -> Result<Session, ExpectError> {
        let spawn = ProcessSpawn::new(command)?;
        self.attach(spawn)
    }

    /// Spawn `command` inside a pseudo-terminal.
    ///
    /// For programs that only cooperate when they see a terminal. Output
    /// is a single merged stream; there is no error stream.
    ///
    /// # Errors
    ///
    /// As for [`SessionBuilder::spawn`].
    pub fn spawn_pty(self, command: &str) -> Result<Session, ExpectError> {
        let spawn = PtySpawn::new(command)?;
        self.attach(spawn)
    }

    /// Connect to a remote interactive service over raw TCP.
    ///
    /// # Errors
    ///
    /// [`ExpectError::Launch`] if the connection fails;
    /// [`ExpectError::InvalidTimeout`] if the default timeout is below `-1`.
    pub async fn connect(self, addr: &str) -> Result<Session, ExpectError> {
        let spawn = TcpSpawn::connect(addr).await?;
        self.attach(spawn)
    }

    /// Attach to any [`Spawnable`] capability.
    ///
    /// # Errors
    ///
    /// [`ExpectError::InvalidTimeout`] if the default timeout is below
    /// `-1`; [`ExpectError::Launch`] if the capability cannot surrender
    /// its streams.
    pub fn attach(self, spawn: impl Spawnable + 'static) -> Result<Session, ExpectError> {
        let default_timeout = Timeout::from_secs(self.default_timeout_secs)?;
        Session::attach(
            Box::new(spawn),
            default_timeout,
            self.chunk_size,
            self.poll_interval,
        )
    }
}
