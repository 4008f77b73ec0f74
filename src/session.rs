//! Launch session
//!
//! A [`Session`] owns every resource acquired while launching a child into a
//! pseudo console. Each resource sits in its own `Option` slot: `Some` means
//! acquired and not yet released. [`Session::cleanup`] empties the slots in a
//! fixed order and can run from any point, any number of times.

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pty::{ChildProcess, PipePair, PipeRole, PseudoConsole, PtySystem, WindowSize};
use crate::relay::{Relay, RelayStats};

/// Tunables for a launch session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Bound on each wait for the relay to reach end-of-stream
    pub drain_timeout: Duration,
    /// Resize the pseudo console when the host window changes
    pub follow_resize: bool,
    /// How often to check the host window size while the child runs
    pub resize_poll: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_millis(500),
            follow_resize: true,
            resize_poll: Duration::from_millis(250),
        }
    }
}

/// Result of a completed launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Exit code reported by the child
    pub exit_code: u32,
    /// Relay counters, if the relay finished before teardown returned
    pub relay: Option<RelayStats>,
}

/// Owner of all resources for one child launched into a pseudo console
pub struct Session<S: PtySystem> {
    system: S,
    options: SessionOptions,
    size: Option<WindowSize>,

    /// Wrapper side of the input pipe
    input_writer: Option<S::Pipe>,
    /// Wrapper side of the output pipe, until the relay takes it
    output_reader: Option<S::Pipe>,
    /// Pseudo console side of the input pipe
    console_input: Option<S::Pipe>,
    /// Pseudo console side of the output pipe
    console_output: Option<S::Pipe>,

    console: Option<S::Console>,
    attributes: Option<S::Attributes>,
    relay: Option<Relay>,
    relay_stats: Option<RelayStats>,
    child: Option<S::Child>,
}

impl<S: PtySystem> Session<S> {
    /// Create a session that has acquired nothing yet
    pub fn new(system: S, options: SessionOptions) -> Self {
        Self {
            system,
            options,
            size: None,
            input_writer: None,
            output_reader: None,
            console_input: None,
            console_output: None,
            console: None,
            attributes: None,
            relay: None,
            relay_stats: None,
            child: None,
        }
    }

    /// Run `command_line` to completion.
    ///
    /// Acquires every resource in order, relays output until the child exits,
    /// then tears everything down. On error the resources acquired so far are
    /// left in place for [`Session::cleanup`].
    pub fn run(&mut self, command_line: &str) -> Result<Outcome> {
        let size = self.query_size()?;
        self.open_pipes()?;
        self.create_console(size)?;
        self.build_attributes()?;
        self.start_relay()?;
        self.spawn(command_line)?;

        let exit_code = self.wait()?;
        info!("Child exited with code {}", exit_code);

        self.cleanup();
        Ok(Outcome {
            exit_code,
            relay: self.relay_stats,
        })
    }

    /// Read the host terminal size used for the pseudo console
    pub fn query_size(&mut self) -> Result<WindowSize> {
        let size = self.system.window_size()?;
        self.size = Some(size);
        Ok(size)
    }

    /// Allocate the input and output pipes.
    ///
    /// If the output pipe fails the input pipe stays in its slots.
    pub fn open_pipes(&mut self) -> Result<()> {
        let PipePair { read, write } = self.system.create_pipe(PipeRole::Input)?;
        self.console_input = Some(read);
        self.input_writer = Some(write);

        let PipePair { read, write } = self.system.create_pipe(PipeRole::Output)?;
        self.output_reader = Some(read);
        self.console_output = Some(write);
        Ok(())
    }

    /// Create the pseudo console on the pipe ends reserved for it.
    ///
    /// The console duplicates those ends, so our copies are closed as soon as
    /// it exists.
    pub fn create_console(&mut self, size: WindowSize) -> Result<()> {
        let (Some(input), Some(output)) = (&self.console_input, &self.console_output) else {
            return Err(Error::OutOfOrder {
                step: "pseudo console creation",
                requires: "both pipes",
            });
        };

        let console = self.system.create_console(size, input, output)?;
        self.console = Some(console);

        debug!("Releasing pseudo console side of the pipes");
        self.console_input = None;
        self.console_output = None;
        Ok(())
    }

    /// Build the process attribute list that attaches the pseudo console
    pub fn build_attributes(&mut self) -> Result<()> {
        let Some(console) = &self.console else {
            return Err(Error::OutOfOrder {
                step: "attribute list",
                requires: "a pseudo console",
            });
        };

        let attributes = self.system.build_attributes(console)?;
        self.attributes = Some(attributes);
        Ok(())
    }

    /// Start the output relay.
    ///
    /// Must run before [`Session::spawn`] so no early output is missed.
    pub fn start_relay(&mut self) -> Result<()> {
        let Some(reader) = self.output_reader.take() else {
            return Err(Error::OutOfOrder {
                step: "output relay",
                requires: "the output pipe",
            });
        };

        let output = match self.system.host_output() {
            Ok(output) => output,
            Err(e) => {
                self.output_reader = Some(reader);
                return Err(e);
            }
        };

        debug!("Creating ConPTY output relay");
        self.relay = Some(Relay::spawn(reader, output)?);
        Ok(())
    }

    /// Spawn the child with the prepared attribute list.
    ///
    /// Returns the child's process id.
    pub fn spawn(&mut self, command_line: &str) -> Result<u32> {
        let Some(attributes) = &self.attributes else {
            return Err(Error::OutOfOrder {
                step: "process spawn",
                requires: "an attribute list",
            });
        };
        if self.relay.is_none() {
            return Err(Error::OutOfOrder {
                step: "process spawn",
                requires: "a running output relay",
            });
        }

        debug!("Spawning `{}`", command_line);
        let child = self.system.spawn(command_line, attributes)?;
        let pid = child.pid();
        info!("Spawned child process {}", pid);

        self.child = Some(child);
        Ok(pid)
    }

    /// Block until the child exits and return its exit code.
    ///
    /// With resize following enabled the wait wakes periodically to carry
    /// host window changes over to the pseudo console.
    pub fn wait(&mut self) -> Result<u32> {
        let timeout = self
            .options
            .follow_resize
            .then_some(self.options.resize_poll);

        loop {
            let Some(child) = self.child.as_mut() else {
                return Err(Error::OutOfOrder {
                    step: "wait",
                    requires: "a spawned child",
                });
            };

            if let Some(code) = child.wait_timeout(timeout)? {
                return Ok(code);
            }
            self.sync_size();
        }
    }

    fn sync_size(&mut self) {
        let Some(console) = &self.console else {
            return;
        };

        let size = match self.system.window_size() {
            Ok(size) => size,
            Err(e) => {
                debug!("Skipping resize: {}", e);
                return;
            }
        };
        if self.size == Some(size) {
            return;
        }

        match console.resize(size) {
            Ok(()) => {
                debug!("Resized pseudo console to {}", size);
                self.size = Some(size);
            }
            Err(e) => warn!("{}", e),
        }
    }

    /// Release every resource still held, in teardown order.
    ///
    /// Safe to call at any point and more than once.
    pub fn cleanup(&mut self) {
        debug!("Closing handles");

        // The relay normally ends on its own once the child has gone
        let mut relay = self.relay.take();
        if let Some(r) = relay.as_mut() {
            if r.wait_timeout(self.options.drain_timeout) {
                self.relay_stats = relay.take().and_then(|r| r.join(Duration::ZERO));
            }
        }

        if self.child.take().is_some() {
            debug!("Closing child process handles");
        }
        if self.attributes.take().is_some() {
            debug!("Releasing attribute list");
        }

        // With nobody draining it, the output pipe could stall console teardown
        self.output_reader = None;

        if self.console.take().is_some() {
            debug!("Closed pseudo console");
        }

        // Closing the console ends its output, which lets a held relay finish
        if let Some(r) = relay {
            self.relay_stats = r.join(self.options.drain_timeout);
        }

        self.console_input = None;
        self.console_output = None;
        self.input_writer = None;
    }

    /// Whether any resource is still held
    pub fn holds_resources(&self) -> bool {
        self.input_writer.is_some()
            || self.output_reader.is_some()
            || self.console_input.is_some()
            || self.console_output.is_some()
            || self.console.is_some()
            || self.attributes.is_some()
            || self.relay.is_some()
            || self.child.is_some()
    }
}

impl<S: PtySystem> Drop for Session<S> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
