//! In-memory pseudo console system for lifecycle tests
//!
//! Every resource the mock hands out records its acquisition and its release
//! in a shared ledger, so tests can check exactly what a session closed.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use raft::{
    ChildProcess, Error, ErrorKind, PipePair, PipeRole, PseudoConsole, PtySystem, Result,
    SessionOptions, WindowSize,
};

/// Pipe end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum End {
    Read,
    Write,
}

/// A resource the mock can hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Res {
    Pipe(PipeRole, End),
    Console,
    Attributes,
    Output,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Acquired(Res),
    Released(Res),
}

/// Step at which the mock reports a failure instead of acquiring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WindowSize,
    InputPipe,
    OutputPipe,
    Console,
    Attributes,
    HostOutput,
    Spawn,
    Wait,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::WindowSize,
        Stage::InputPipe,
        Stage::OutputPipe,
        Stage::Console,
        Stage::Attributes,
        Stage::HostOutput,
        Stage::Spawn,
        Stage::Wait,
    ];

    pub fn kind(self) -> ErrorKind {
        match self {
            Stage::WindowSize => ErrorKind::EnvironmentQuery,
            Stage::InputPipe | Stage::OutputPipe | Stage::HostOutput => ErrorKind::ResourceCreation,
            Stage::Console => ErrorKind::PtyCreation,
            Stage::Attributes => ErrorKind::AttributeList,
            Stage::Spawn => ErrorKind::ProcessSpawn,
            Stage::Wait => ErrorKind::ProcessWait,
        }
    }
}

pub type Ledger = Arc<Mutex<Vec<Event>>>;

fn record(ledger: &Ledger, event: Event) {
    ledger.lock().unwrap().push(event);
}

/// Mock platform
pub struct MockSystem {
    pub ledger: Ledger,
    pub host: Arc<Mutex<Vec<u8>>>,
    pub resizes: Arc<Mutex<Vec<WindowSize>>>,
    pub console_sizes: Arc<Mutex<Vec<WindowSize>>>,
    pub size_queries: Arc<Mutex<usize>>,
    fail_at: Option<Stage>,
    child_output: Vec<Vec<u8>>,
    hold_output: bool,
    held: Mutex<Option<Sender<()>>>,
    sizes: Mutex<VecDeque<WindowSize>>,
    exit_code: u32,
    polls_before_exit: usize,
}

impl MockSystem {
    pub fn new() -> Self {
        Self::with_ledger(Ledger::default())
    }

    pub fn with_ledger(ledger: Ledger) -> Self {
        Self {
            ledger,
            host: Arc::default(),
            resizes: Arc::default(),
            console_sizes: Arc::default(),
            size_queries: Arc::default(),
            fail_at: None,
            child_output: Vec::new(),
            hold_output: false,
            held: Mutex::new(None),
            sizes: Mutex::new(VecDeque::from([WindowSize::default()])),
            exit_code: 0,
            polls_before_exit: 0,
        }
    }

    pub fn fail_at(mut self, stage: Stage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Bytes the child writes, one chunk per read of the output pipe
    pub fn child_output(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.child_output = chunks;
        self
    }

    /// Keep the output pipe open until the console is closed
    pub fn hold_output_until_close(mut self) -> Self {
        self.hold_output = true;
        self
    }

    /// Window sizes reported by successive queries; the last one repeats
    pub fn window_sizes(mut self, sizes: Vec<WindowSize>) -> Self {
        self.sizes = Mutex::new(sizes.into());
        self
    }

    pub fn exit_code(mut self, code: u32) -> Self {
        self.exit_code = code;
        self
    }

    /// Timed waits that report "still running" before the child exits
    pub fn polls_before_exit(mut self, polls: usize) -> Self {
        self.polls_before_exit = polls;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.ledger.lock().unwrap().clone()
    }

    pub fn host_bytes(&self) -> Vec<u8> {
        self.host.lock().unwrap().clone()
    }

    fn check(&self, stage: Stage) -> Result<()> {
        if self.fail_at == Some(stage) {
            return Err(Error::bare(stage.kind(), format!("injected {:?} failure", stage)));
        }
        Ok(())
    }

    fn pipe(&self, res: Res) -> MockPipe {
        record(&self.ledger, Event::Acquired(res));
        MockPipe {
            res,
            ledger: self.ledger.clone(),
            chunks: VecDeque::new(),
            hold: None,
        }
    }
}

impl PtySystem for MockSystem {
    type Pipe = MockPipe;
    type Console = MockConsole;
    type Attributes = MockAttributes;
    type Child = MockChild;
    type Output = MockOutput;

    fn window_size(&self) -> Result<WindowSize> {
        self.check(Stage::WindowSize)?;
        *self.size_queries.lock().unwrap() += 1;

        let mut sizes = self.sizes.lock().unwrap();
        let size = if sizes.len() > 1 {
            sizes.pop_front()
        } else {
            sizes.front().copied()
        };
        Ok(size.unwrap_or_default())
    }

    fn create_pipe(&self, role: PipeRole) -> Result<PipePair<MockPipe>> {
        match role {
            PipeRole::Input => self.check(Stage::InputPipe)?,
            PipeRole::Output => self.check(Stage::OutputPipe)?,
        }

        let mut read = self.pipe(Res::Pipe(role, End::Read));
        let write = self.pipe(Res::Pipe(role, End::Write));

        if role == PipeRole::Output {
            read.chunks = self.child_output.iter().cloned().collect();
            if self.hold_output {
                let (tx, rx) = mpsc::channel();
                read.hold = Some(rx);
                *self.held.lock().unwrap() = Some(tx);
            }
        }
        Ok(PipePair { read, write })
    }

    fn create_console(&self, size: WindowSize, input: &MockPipe, output: &MockPipe) -> Result<MockConsole> {
        self.check(Stage::Console)?;
        assert_eq!(input.res, Res::Pipe(PipeRole::Input, End::Read));
        assert_eq!(output.res, Res::Pipe(PipeRole::Output, End::Write));

        self.console_sizes.lock().unwrap().push(size);
        record(&self.ledger, Event::Acquired(Res::Console));
        Ok(MockConsole {
            ledger: self.ledger.clone(),
            resizes: self.resizes.clone(),
            _hold: self.held.lock().unwrap().take(),
        })
    }

    fn build_attributes(&self, _console: &MockConsole) -> Result<MockAttributes> {
        self.check(Stage::Attributes)?;
        record(&self.ledger, Event::Acquired(Res::Attributes));
        Ok(MockAttributes {
            ledger: self.ledger.clone(),
        })
    }

    fn spawn(&self, _command_line: &str, _attributes: &MockAttributes) -> Result<MockChild> {
        self.check(Stage::Spawn)?;
        record(&self.ledger, Event::Acquired(Res::Child));
        Ok(MockChild {
            ledger: self.ledger.clone(),
            exit_code: self.exit_code,
            polls_left: self.polls_before_exit,
            fail_wait: self.fail_at == Some(Stage::Wait),
        })
    }

    fn host_output(&self) -> Result<MockOutput> {
        self.check(Stage::HostOutput)?;
        record(&self.ledger, Event::Acquired(Res::Output));
        Ok(MockOutput {
            ledger: self.ledger.clone(),
            host: self.host.clone(),
        })
    }
}

pub struct MockPipe {
    res: Res,
    ledger: Ledger,
    chunks: VecDeque<Vec<u8>>,
    hold: Option<Receiver<()>>,
}

impl Read for MockPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(chunk) = self.chunks.pop_front() {
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk[n..].to_vec());
            }
            return Ok(n);
        }
        if let Some(hold) = self.hold.take() {
            // Returns once the console drops its sender
            let _ = hold.recv();
        }
        Ok(0)
    }
}

impl Write for MockPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockPipe {
    fn drop(&mut self) {
        record(&self.ledger, Event::Released(self.res));
    }
}

pub struct MockConsole {
    ledger: Ledger,
    resizes: Arc<Mutex<Vec<WindowSize>>>,
    _hold: Option<Sender<()>>,
}

impl PseudoConsole for MockConsole {
    fn resize(&self, size: WindowSize) -> Result<()> {
        self.resizes.lock().unwrap().push(size);
        Ok(())
    }
}

impl Drop for MockConsole {
    fn drop(&mut self) {
        record(&self.ledger, Event::Released(Res::Console));
    }
}

pub struct MockAttributes {
    ledger: Ledger,
}

impl Drop for MockAttributes {
    fn drop(&mut self) {
        record(&self.ledger, Event::Released(Res::Attributes));
    }
}

pub struct MockChild {
    ledger: Ledger,
    exit_code: u32,
    polls_left: usize,
    fail_wait: bool,
}

impl ChildProcess for MockChild {
    fn pid(&self) -> u32 {
        4242
    }

    fn wait_timeout(&mut self, timeout: Option<Duration>) -> Result<Option<u32>> {
        if self.fail_wait {
            return Err(Error::bare(ErrorKind::ProcessWait, "injected Wait failure"));
        }
        if timeout.is_some() && self.polls_left > 0 {
            self.polls_left -= 1;
            return Ok(None);
        }
        Ok(Some(self.exit_code))
    }
}

impl Drop for MockChild {
    fn drop(&mut self) {
        record(&self.ledger, Event::Released(Res::Child));
    }
}

pub struct MockOutput {
    ledger: Ledger,
    host: Arc<Mutex<Vec<u8>>>,
}

impl Write for MockOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.host.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockOutput {
    fn drop(&mut self) {
        record(&self.ledger, Event::Released(Res::Output));
    }
}

/// Options with short waits so held relays do not slow the suite down
pub fn fast_options() -> SessionOptions {
    SessionOptions {
        drain_timeout: Duration::from_millis(250),
        follow_resize: true,
        resize_poll: Duration::from_millis(10),
    }
}

/// Resources acquired and not yet released
pub fn outstanding(events: &[Event]) -> Vec<Res> {
    let mut held: Vec<Res> = Vec::new();
    for event in events {
        match *event {
            Event::Acquired(res) => held.push(res),
            Event::Released(res) => {
                let pos = held
                    .iter()
                    .position(|r| *r == res)
                    .unwrap_or_else(|| panic!("{:?} released without being held", res));
                held.remove(pos);
            }
        }
    }
    held
}

/// Every release matches an earlier acquisition and nothing is left held
pub fn assert_balanced(events: &[Event]) {
    let held = outstanding(events);
    assert!(held.is_empty(), "still held: {:?} in {:?}", held, events);
}

pub fn acquired(events: &[Event]) -> Vec<Res> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Acquired(res) => Some(*res),
            Event::Released(_) => None,
        })
        .collect()
}

pub fn position(events: &[Event], event: Event) -> usize {
    events
        .iter()
        .position(|e| *e == event)
        .unwrap_or_else(|| panic!("{:?} not in {:?}", event, events))
}
