//! expectr: scripted interaction with spawned processes and remote sessions
//!
//! expectr automates interactive programs the way the Unix `expect`
//! utility does: spawn something, send it input, wait for expected output
//! within a bounded time, capture everything for later inspection, and
//! optionally hand control to a live user. It is a testing and automation
//! utility, not a general IPC framework.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use expectr::Session;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Spawn a shell
//!     let mut session = Session::builder()
//!         .default_timeout(10.0)
//!         .spawn("sh")?;
//!
//!     // Drive it
//!     session.send("echo Chunder\n").await?;
//!     session.expect("Chunder").await?;
//!
//!     // Everything captured so far, at any time
//!     println!("{}", session.current_output());
//!
//!     // Wait for it to exit
//!     session.send("exit\n").await?;
//!     session.expect_close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Matching
//!
//! Matching is deliberately simple: a case-insensitive substring search
//! over the text received since the last newline. Output containing
//! `"READY"` satisfies `expect("ready")`. There are no regexes, no glob
//! patterns, and no multi-pattern dispatch.
//!
//! # Timeouts
//!
//! Timeouts are seconds with the classic `-1` convention: `-1` (and `0`)
//! wait forever, positive values bound the wait, fractions are allowed.
//! Each call computes its deadline once on entry, so a timed-out call can
//! never bleed abort state into the next one:
//!
//! ```rust,no_run
//! use expectr::{ExpectError, Session};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let mut session = Session::spawn("slow-tool")?;
//! match session.expect_timeout("done", 0.5).await {
//!     Ok(()) => {}
//!     Err(ExpectError::Timeout { .. }) => {
//!         assert!(session.last_expect_timed_out());
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # What can be spawned
//!
//! Anything implementing [`Spawnable`]. Built in: [`ProcessSpawn`] (piped
//! stdio, separate stderr), [`PtySpawn`] (pseudo-terminal for programs
//! that demand one), and [`TcpSpawn`] (telnet-style raw TCP session).
//!
//! # Interactive mode
//!
//! [`Session::interact`] bridges the spawn's streams to the console user
//! (stdin to the spawn, output and error to the terminal) until
//! [`Session::stop`] shuts the session down.

#![warn(missing_docs)]

mod buffer;
mod piper;
mod result;
mod session;
mod spawn;
mod wait;

// Public API exports
pub use result::ExpectError;
pub use session::{Session, SessionBuilder};
pub use spawn::{ProcessSpawn, PtySpawn, SpawnStreams, Spawnable, TcpSpawn};
pub use wait::Timeout;
