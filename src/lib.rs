//! Raft: run a command inside a Windows pseudo console
//!
//! The child gets a real console (a ConPTY) instead of redirected pipes, so
//! colors, cursor movement and resizing keep working while its output is
//! relayed to the invoking terminal.
//!
//! - `pty`: platform operations and the ConPTY backend
//! - `session`: resource ownership and teardown for one launch
//! - `relay`: the output relay worker
//! - `config`: command line and environment options
//! - `app`: the launch flow and fatal error reporting

pub mod app;
pub mod config;
pub mod error;
pub mod pty;
pub mod relay;
pub mod session;

pub use config::{CliArgs, Config};
pub use error::{Error, ErrorKind, Result};
pub use pty::{ChildProcess, PipePair, PipeRole, PseudoConsole, PtySystem, WindowSize};
pub use relay::{Relay, RelayStats};
pub use session::{Outcome, Session, SessionOptions};
