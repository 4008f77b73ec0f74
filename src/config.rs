//! Configuration
//!
//! Options come from the command line, then `RAFT_*` environment variables,
//! then defaults. Everything after the options is passed to the program.

use std::env;
use std::time::Duration;

use clap::Parser;

use crate::error::{Error, Result};
use crate::session::SessionOptions;

/// Program launched when none is configured
pub const DEFAULT_PROGRAM: &str = "wsl.exe";

const MAX_DRAIN_TIMEOUT_MS: u64 = 60_000;
const MIN_RESIZE_POLL_MS: u64 = 10;

/// Command line arguments
#[derive(Parser, Debug, Default)]
#[command(
    name = "raft",
    about = "Run a command inside a pseudo console and relay its output",
    after_help = "Use `--` before arguments that clash with raft's own options."
)]
pub struct CliArgs {
    /// Program to launch; arguments are appended to it
    #[arg(short, long, value_name = "PROGRAM")]
    pub program: Option<String>,

    /// Milliseconds to wait for trailing output after the child exits
    #[arg(long, value_name = "MS")]
    pub drain_timeout: Option<u64>,

    /// Keep the initial pseudo console size when the window is resized
    #[arg(long)]
    pub no_resize: bool,

    /// Milliseconds between host window size checks
    #[arg(long, value_name = "MS")]
    pub resize_poll: Option<u64>,

    /// Arguments for the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

impl From<clap::Error> for Error {
    fn from(err: clap::Error) -> Self {
        let text = err.to_string();
        let line = text.lines().next().unwrap_or_default();
        Error::Usage(line.strip_prefix("error: ").unwrap_or(line).to_string())
    }
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Leading program of the command line
    pub program: String,
    /// Arguments appended to the program
    pub args: Vec<String>,
    /// Bound on each wait for trailing output
    pub drain_timeout: Duration,
    /// Carry host window resizes over to the pseudo console
    pub follow_resize: bool,
    /// Interval between host window size checks
    pub resize_poll: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let options = SessionOptions::default();
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: Vec::new(),
            drain_timeout: options.drain_timeout,
            follow_resize: options.follow_resize,
            resize_poll: options.resize_poll,
        }
    }
}

impl Config {
    /// Load configuration with full precedence:
    /// CLI args > environment variables > defaults
    pub fn load_with_args(args: &CliArgs) -> Result<Self> {
        Self::load_from(args, |key| env::var(key).ok())
    }

    /// Resolve `args` over variables looked up through `lookup`.
    ///
    /// A missing command is reported before any option is validated.
    pub fn load_from<F>(args: &CliArgs, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        config.apply_env(lookup);
        config.apply_cli_args(args);
        config.program = config.program.trim().to_string();

        if config.args.is_empty() {
            return Err(Error::NoArguments);
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply `RAFT_*` variables looked up through `lookup`.
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("RAFT_PROGRAM") {
            self.program = val;
        }
        if let Some(ms) = lookup("RAFT_DRAIN_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.drain_timeout = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("RAFT_FOLLOW_RESIZE") {
            self.follow_resize = !matches!(val.to_lowercase().as_str(), "0" | "false" | "no" | "off");
        }
        if let Some(ms) = lookup("RAFT_RESIZE_POLL_MS").and_then(|v| v.parse().ok()) {
            self.resize_poll = Duration::from_millis(ms);
        }
    }

    fn apply_cli_args(&mut self, args: &CliArgs) {
        if let Some(program) = &args.program {
            self.program = program.clone();
        }
        if let Some(ms) = args.drain_timeout {
            self.drain_timeout = Duration::from_millis(ms);
        }
        if args.no_resize {
            self.follow_resize = false;
        }
        if let Some(ms) = args.resize_poll {
            self.resize_poll = Duration::from_millis(ms);
        }
        self.args = args.args.clone();
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::Config {
                field: "program",
                message: "must not be empty".to_string(),
            });
        }
        if self.program.contains('\0') || self.args.iter().any(|a| a.contains('\0')) {
            return Err(Error::Config {
                field: "args",
                message: "must not contain NUL characters".to_string(),
            });
        }
        if self.drain_timeout > Duration::from_millis(MAX_DRAIN_TIMEOUT_MS) {
            return Err(Error::Config {
                field: "drain_timeout",
                message: format!("must be at most {} ms", MAX_DRAIN_TIMEOUT_MS),
            });
        }
        if self.resize_poll < Duration::from_millis(MIN_RESIZE_POLL_MS) {
            return Err(Error::Config {
                field: "resize_poll",
                message: format!("must be at least {} ms", MIN_RESIZE_POLL_MS),
            });
        }
        Ok(())
    }

    /// The literal command line: the program followed by each argument,
    /// separated by single spaces.
    ///
    /// Fails with [`Error::NoArguments`] when there are no arguments.
    pub fn command_line(&self) -> Result<String> {
        if self.args.is_empty() {
            return Err(Error::NoArguments);
        }

        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        Ok(line)
    }

    /// Session tunables derived from this configuration
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            drain_timeout: self.drain_timeout,
            follow_resize: self.follow_resize,
            resize_poll: self.resize_poll,
        }
    }
}
