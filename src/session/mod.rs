//! Session management: the expect engine
//!
//! A [`Session`] owns one [`Spawnable`] and composes the crate's pieces
//! around it: stream pipers continuously drain the spawn's output into
//! capture buffers, expect calls scan that output for case-insensitive
//! substrings under a deadline, and interactive mode hands the streams to
//! the console user until shutdown.

mod builder;

pub use builder::SessionBuilder;

use crate::buffer::CaptureBuffer;
use crate::piper::{self, OutputStream, PipeMode, Readiness};
use crate::result::ExpectError;
use crate::spawn::Spawnable;
use crate::wait::{Deadline, StopSignal, Timeout};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// How the scan loop of one expect call ended.
enum ScanOutcome {
    Matched,
    TimedOut,
    Ended,
    Stopped,
}

/// The live handle to a controlled process or remote interactive session.
///
/// Created through [`Session::builder`] (or the [`Session::spawn`]
/// shorthand). All blocking operations take `&mut self`, which is what
/// enforces "at most one in-flight expect per stream".
///
/// # Examples
///
/// ```no_run
/// use expectr::Session;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut session = Session::builder()
///     .default_timeout(10.0)
///     .spawn("sh")?;
///
/// session.send("echo Chunder\n").await?;
/// session.expect("Chunder").await?;
/// session.send("exit\n").await?;
/// session.expect_close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    spawn: Box<dyn Spawnable>,
    input: Option<Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>>,
    stdout: OutputStream,
    stderr: Option<OutputStream>,
    out_buffer: CaptureBuffer,
    err_buffer: CaptureBuffer,
    mode: watch::Sender<PipeMode>,
    stop: Arc<StopSignal>,
    pipers: Vec<JoinHandle<()>>,
    default_timeout: Timeout,
    poll_interval: Duration,
    last_timed_out: bool,
    interacting: bool,
    stopped: bool,
}

impl Session {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Spawn a command with default settings (shorthand for
    /// `Session::builder().spawn(command)`).
    ///
    /// # Errors
    ///
    /// [`ExpectError::Launch`] if the command cannot be started.
    pub fn spawn(command: &str) -> Result<Self, ExpectError> {
        SessionBuilder::new().spawn(command)
    }

    pub(crate) fn attach(
        mut spawn: Box<dyn Spawnable>,
        default_timeout: Timeout,
        chunk_size: usize,
        poll_interval: Duration,
    ) -> Result<Self, ExpectError> {
        let streams = spawn.take_streams()?;
        let stop = Arc::new(StopSignal::new());
        let (mode, mode_rx) = watch::channel(PipeMode::Capture);

        let out_buffer = CaptureBuffer::new();
        let err_buffer = CaptureBuffer::new();
        let mut pipers = Vec::new();

        let (stdout, handle) = piper::start_output_piper(
            streams.output,
            out_buffer.clone(),
            mode_rx.clone(),
            piper::Console::Stdout,
            stop.clone(),
            chunk_size,
        );
        pipers.push(handle);

        let stderr = streams.error.map(|source| {
            let (stream, handle) = piper::start_output_piper(
                source,
                err_buffer.clone(),
                mode_rx,
                piper::Console::Stderr,
                stop.clone(),
                chunk_size,
            );
            pipers.push(handle);
            stream
        });

        Ok(Self {
            spawn,
            input: streams
                .input
                .map(|writer| Arc::new(Mutex::new(writer))),
            stdout,
            stderr,
            out_buffer,
            err_buffer,
            mode,
            stop,
            pipers,
            default_timeout,
            poll_interval,
            last_timed_out: false,
            interacting: false,
            stopped: false,
        })
    }

    /// Write `text` verbatim to the spawn's input and flush.
    ///
    /// No line terminator is added; include the `\n` yourself if the spawn
    /// expects one.
    ///
    /// # Errors
    ///
    /// [`ExpectError::Io`] if the spawn has no input stream or the write
    /// fails (e.g. the spawn has exited and closed its input).
    pub async fn send(&mut self, text: &str) -> Result<(), ExpectError> {
        debug!("sending {text:?}");
        let writer = self.input.as_ref().ok_or_else(|| {
            ExpectError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "spawn has no input stream",
            ))
        })?;
        let mut writer = writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Wait for `pattern` on the primary output, with the default timeout.
    ///
    /// See [`Session::expect_timeout`].
    pub async fn expect(&mut self, pattern: &str) -> Result<(), ExpectError> {
        let timeout = self.default_timeout;
        self.expect_with(pattern, timeout, false).await
    }

    /// Wait until `pattern` appears as a case-insensitive substring of the
    /// primary output, or the timeout elapses.
    ///
    /// Matching is line-oriented: each arriving chunk is appended to a
    /// running buffer holding the text since the last newline, the trimmed
    /// buffer is tested for the pattern, and on a failed test everything up
    /// to and including the last newline is discarded. A pattern that
    /// spans a newline already flushed by an earlier failed test will not
    /// be found; that is the documented scan policy.
    ///
    /// `timeout_secs` follows the `-1` convention: `-1` (and `0`) wait
    /// indefinitely, positive values arm a deadline. Fractions are fine.
    ///
    /// # Errors
    ///
    /// - [`ExpectError::InvalidTimeout`] for `timeout_secs < -1`, before
    ///   anything blocks.
    /// - [`ExpectError::Timeout`] when the deadline elapses first.
    /// - [`ExpectError::StreamEnded`] when the spawn closes its output
    ///   before the pattern appears.
    /// - [`ExpectError::Interrupted`] when [`Session::stop`] wakes the call.
    pub async fn expect_timeout(
        &mut self,
        pattern: &str,
        timeout_secs: f64,
    ) -> Result<(), ExpectError> {
        let timeout = Timeout::from_secs(timeout_secs)?;
        self.expect_with(pattern, timeout, false).await
    }

    /// Wait for `pattern` on the error output, with the default timeout.
    ///
    /// See [`Session::expect_err_timeout`].
    pub async fn expect_err(&mut self, pattern: &str) -> Result<(), ExpectError> {
        let timeout = self.default_timeout;
        self.expect_with(pattern, timeout, true).await
    }

    /// Like [`Session::expect_timeout`], but matches against the spawn's
    /// error output stream.
    ///
    /// # Errors
    ///
    /// As for [`Session::expect_timeout`], plus [`ExpectError::Io`] with
    /// `NotConnected` if the spawn has no error stream (PTY and TCP spawns
    /// merge everything into the primary output).
    pub async fn expect_err_timeout(
        &mut self,
        pattern: &str,
        timeout_secs: f64,
    ) -> Result<(), ExpectError> {
        let timeout = Timeout::from_secs(timeout_secs)?;
        self.expect_with(pattern, timeout, true).await
    }

    async fn expect_with(
        &mut self,
        pattern: &str,
        timeout: Timeout,
        on_error_stream: bool,
    ) -> Result<(), ExpectError> {
        self.last_timed_out = false;
        debug!("expecting {pattern:?}");
        let deadline = Deadline::start(timeout);
        let outcome = if on_error_stream {
            let stream = self.stderr.as_mut().ok_or_else(|| {
                ExpectError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "spawn has no error stream",
                ))
            })?;
            Self::scan(stream, pattern, &deadline, &self.stop).await
        } else {
            Self::scan(&mut self.stdout, pattern, &deadline, &self.stop).await
        };
        match outcome {
            ScanOutcome::Matched => {
                debug!("found match for {pattern:?}");
                Ok(())
            }
            ScanOutcome::TimedOut => {
                debug!("timed out waiting for {pattern:?}");
                self.last_timed_out = true;
                Err(ExpectError::Timeout {
                    after: timeout.armed().unwrap_or_default(),
                })
            }
            ScanOutcome::Ended => {
                debug!("stream ended waiting for {pattern:?}");
                Err(ExpectError::StreamEnded)
            }
            ScanOutcome::Stopped => Err(ExpectError::Interrupted(
                "session stopped while waiting for pattern".to_string(),
            )),
        }
    }

    /// The scan loop shared by `expect` and `expect_err`. The line buffer
    /// lives here, so no match state survives the call.
    async fn scan(
        stream: &mut OutputStream,
        pattern: &str,
        deadline: &Deadline,
        stop: &StopSignal,
    ) -> ScanOutcome {
        let wanted = pattern.to_uppercase();
        let mut line = String::new();
        loop {
            // Re-check on every turn so a fast producer cannot starve the
            // deadline arm of the readiness wait.
            if deadline.expired() {
                return ScanOutcome::TimedOut;
            }
            match stream.wait_ready(deadline, stop).await {
                Readiness::Data(chunk) => {
                    line.push_str(&String::from_utf8_lossy(&chunk));
                    if line.trim().to_uppercase().contains(&wanted) {
                        return ScanOutcome::Matched;
                    }
                    // Keep only the unterminated remainder.
                    if let Some(pos) = line.rfind('\n') {
                        line.drain(..=pos);
                    }
                }
                Readiness::End => return ScanOutcome::Ended,
                Readiness::DeadlineElapsed => return ScanOutcome::TimedOut,
                Readiness::Stopped => return ScanOutcome::Stopped,
            }
        }
    }

    /// Wait for the spawn to terminate, with the default timeout.
    ///
    /// See [`Session::expect_close_timeout`].
    pub async fn expect_close(&mut self) -> Result<(), ExpectError> {
        let timeout = self.default_timeout;
        self.expect_close_with(timeout).await
    }

    /// Wait until the spawn has terminated or the timeout elapses.
    ///
    /// Termination is polled at the session's poll interval (500 ms by
    /// default), so success is observed within one interval of the spawn
    /// actually exiting.
    ///
    /// # Errors
    ///
    /// [`ExpectError::InvalidTimeout`] for `timeout_secs < -1`;
    /// [`ExpectError::Timeout`] if the spawn outlives the deadline.
    pub async fn expect_close_timeout(&mut self, timeout_secs: f64) -> Result<(), ExpectError> {
        let timeout = Timeout::from_secs(timeout_secs)?;
        self.expect_close_with(timeout).await
    }

    async fn expect_close_with(&mut self, timeout: Timeout) -> Result<(), ExpectError> {
        self.last_timed_out = false;
        debug!("waiting for spawn to close");
        let deadline = Deadline::start(timeout);
        loop {
            if self.spawn.is_terminated() {
                debug!("spawn closed");
                return Ok(());
            }
            if deadline.expired() {
                debug!("timed out waiting for spawn to close");
                self.last_timed_out = true;
                return Err(ExpectError::Timeout {
                    after: timeout.armed().unwrap_or_default(),
                });
            }
            let tick = match deadline.remaining() {
                Some(remaining) => remaining.min(self.poll_interval),
                None => self.poll_interval,
            };
            if self.stop.is_raised() {
                // stop() kills the spawn; keep polling plainly until the
                // exit is observed or the deadline passes.
                tokio::time::sleep(tick).await;
            } else {
                tokio::select! {
                    biased;
                    _ = self.stop.raised() => {}
                    _ = tokio::time::sleep(tick) => {}
                }
            }
        }
    }

    /// Hand bidirectional control of the spawn to the console user.
    ///
    /// Output pipers switch from capturing to mirroring onto stdout and
    /// stderr, and a third piper bridges the user's stdin to the spawn's
    /// input. Returns immediately; piping continues until [`Session::stop`].
    ///
    /// Capture buffers stop growing from this point, but
    /// [`Session::current_output`] keeps returning everything captured up
    /// to the switch.
    pub fn interact(&mut self) {
        if self.interacting || self.stopped {
            return;
        }
        self.interacting = true;
        debug!("entering interactive mode");
        let _ = self.mode.send(PipeMode::Console);
        if let Some(writer) = &self.input {
            self.pipers
                .push(piper::start_input_piper(writer.clone(), self.stop.clone()));
        }
    }

    /// Shut the session down: wake every blocking wait, stop all stream
    /// pipers, and terminate the spawn.
    ///
    /// Idempotent and infallible; secondary failures during shutdown are
    /// logged and swallowed. Safe to call in any state, including before
    /// any expect call and after the spawn has already exited.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        debug!("stopping session");
        self.stop.raise();
        self.spawn.terminate();
        for piper in self.pipers.drain(..) {
            if let Err(e) = piper.await {
                warn!("piper exited abnormally: {e}");
            }
        }
        // Bounded wait for the termination to become observable.
        for _ in 0..200 {
            if self.spawn.is_terminated() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        warn!("spawn still running after stop");
    }

    /// Has the spawn terminated?
    pub fn is_terminated(&mut self) -> bool {
        self.spawn.is_terminated()
    }

    /// The spawn's exit code.
    ///
    /// # Errors
    ///
    /// [`ExpectError::NotTerminated`] while the spawn is still running.
    pub fn exit_code(&mut self) -> Result<i32, ExpectError> {
        self.spawn.exit_code()
    }

    /// Snapshot of everything captured from the primary output so far.
    ///
    /// Non-destructive and available at any time; while the session is
    /// capturing, successive snapshots never shrink.
    pub fn current_output(&self) -> String {
        self.out_buffer.snapshot()
    }

    /// Snapshot of everything captured from the error output so far.
    ///
    /// Empty for spawns without an error stream.
    pub fn current_error(&self) -> String {
        self.err_buffer.snapshot()
    }

    /// Did the most recent `expect`, `expect_err`, or `expect_close` end
    /// in a timeout rather than a match?
    pub fn last_expect_timed_out(&self) -> bool {
        self.last_timed_out
    }
}
