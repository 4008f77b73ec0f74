//! Pseudo console handling
//!
//! This module defines the operations the launch session needs from the
//! platform: reading the host geometry, allocating pipes, creating the pseudo
//! console, building the process attribute list and spawning the child.
//!
//! Every acquired resource is an owned value whose `Drop` releases it. The
//! session decides *when* each one is dropped.

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

mod size;

#[cfg(windows)]
pub mod windows;

pub use size::WindowSize;

#[cfg(windows)]
pub use self::windows::ConPtySystem;

/// Which side of the pseudo console a pipe serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeRole {
    /// Carries bytes from the wrapper into the pseudo console
    Input,
    /// Carries bytes from the pseudo console back to the wrapper
    Output,
}

impl std::fmt::Display for PipeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipeRole::Input => f.write_str("input"),
            PipeRole::Output => f.write_str("output"),
        }
    }
}

/// Both ends of one unidirectional pipe
#[derive(Debug)]
pub struct PipePair<P> {
    pub read: P,
    pub write: P,
}

/// A created pseudo console
pub trait PseudoConsole {
    /// Change the pseudo console dimensions
    fn resize(&self, size: WindowSize) -> Result<()>;
}

/// A child process attached to a pseudo console
pub trait ChildProcess {
    /// OS process identifier
    fn pid(&self) -> u32;

    /// Wait for the child to exit.
    ///
    /// `None` waits forever. Returns `Ok(None)` if the timeout elapsed first,
    /// otherwise the child's exit code.
    fn wait_timeout(&mut self, timeout: Option<Duration>) -> Result<Option<u32>>;
}

/// Platform operations behind a launch session
pub trait PtySystem {
    /// One end of a pipe
    type Pipe: Read + Write + Send + 'static;
    /// Pseudo console object
    type Console: PseudoConsole;
    /// Process attribute list referencing a console
    type Attributes;
    /// Spawned child process and thread handles
    type Child: ChildProcess;
    /// Writer for the host terminal's real output stream
    type Output: Write + Send + 'static;

    /// Visible size of the host terminal
    fn window_size(&self) -> Result<WindowSize>;

    /// Allocate one pipe
    fn create_pipe(&self, role: PipeRole) -> Result<PipePair<Self::Pipe>>;

    /// Create a pseudo console reading from `input` and writing to `output`.
    ///
    /// On success the console holds its own duplicates of both ends.
    fn create_console(
        &self,
        size: WindowSize,
        input: &Self::Pipe,
        output: &Self::Pipe,
    ) -> Result<Self::Console>;

    /// Build an attribute list that attaches `console` to a new process
    fn build_attributes(&self, console: &Self::Console) -> Result<Self::Attributes>;

    /// Spawn `command_line` with `attributes`
    fn spawn(&self, command_line: &str, attributes: &Self::Attributes) -> Result<Self::Child>;

    /// Open the host output stream for the relay worker
    fn host_output(&self) -> Result<Self::Output>;
}
