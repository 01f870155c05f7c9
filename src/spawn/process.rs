//! Local child process with piped stdio

use crate::result::ExpectError;
use crate::spawn::{SpawnStreams, Spawnable};
use log::{debug, warn};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

/// A child process controlled through ordinary pipes.
///
/// Stdout and stderr are separate streams, so this is the adapter to use
/// when `expect_err` matters. Must be created inside a tokio runtime.
///
/// # Examples
///
/// ```no_run
/// use expectr::{ProcessSpawn, Session};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let spawn = ProcessSpawn::new("cat")?;
/// let mut session = Session::builder().attach(spawn)?;
/// # Ok(())
/// # }
/// ```
pub struct ProcessSpawn {
    child: Child,
    exit: Option<i32>,
    streams: Option<SpawnStreams>,
}

impl ProcessSpawn {
    /// Launch `command`, splitting it on whitespace into program and
    /// arguments.
    ///
    /// # Errors
    ///
    /// [`ExpectError::Launch`] if the command is empty or cannot be
    /// spawned.
    pub fn new(command: &str) -> Result<Self, ExpectError> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ExpectError::Launch("empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| ExpectError::Launch(format!("{command}: {e}")))?;
        debug!("spawned process: {command}");

        let output = child
            .stdout
            .take()
            .ok_or_else(|| ExpectError::Launch("child has no stdout".to_string()))?;
        let streams = SpawnStreams {
            input: child
                .stdin
                .take()
                .map(|s| Box::new(s) as Box<dyn AsyncWrite + Send + Unpin>),
            output: Box::new(output),
            error: child
                .stderr
                .take()
                .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>),
        };

        Ok(Self {
            child,
            exit: None,
            streams: Some(streams),
        })
    }
}

impl Spawnable for ProcessSpawn {
    fn take_streams(&mut self) -> Result<SpawnStreams, ExpectError> {
        self.streams
            .take()
            .ok_or_else(|| ExpectError::Launch("process streams already taken".to_string()))
    }

    fn is_terminated(&mut self) -> bool {
        if self.exit.is_some() {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                // Signal-killed processes have no code; report -1.
                self.exit = Some(status.code().unwrap_or(-1));
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("polling child status failed: {e}");
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
            if let Err(e) = self.child.start_kill() {
                debug!("kill failed (process likely already gone): {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_launch_failure_for_missing_program() {
        let result = ProcessSpawn::new("definitely-not-a-real-program-xyz");
        assert!(matches!(result, Err(ExpectError::Launch(_))));
    }

    #[tokio::test]
    async fn test_launch_failure_for_empty_command() {
        assert!(matches!(
            ProcessSpawn::new("   "),
            Err(ExpectError::Launch(_))
        ));
    }

    #[tokio::test]
    async fn test_streams_taken_once() {
        let mut spawn = ProcessSpawn::new("cat").unwrap();
        assert!(spawn.take_streams().is_ok());
        assert!(matches!(
            spawn.take_streams(),
            Err(ExpectError::Launch(_))
        ));
        spawn.terminate();
    }

    #[tokio::test]
    async fn test_exit_code_lifecycle() {
        let mut spawn = ProcessSpawn::new("false").unwrap();
        // Wait for the process to finish.
        for _ in 0..100 {
            if spawn.is_terminated() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(spawn.is_terminated());
        assert_eq!(spawn.exit_code().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exit_code_before_termination() {
        let mut spawn = ProcessSpawn::new("cat").unwrap();
        assert!(!spawn.is_terminated());
        assert!(matches!(
            spawn.exit_code(),
            Err(ExpectError::NotTerminated)
        ));
        spawn.terminate();
        spawn.terminate(); // idempotent
    }
}
