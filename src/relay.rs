//! Output relay
//!
//! Copies bytes from the pseudo console's output pipe to the host terminal on
//! a dedicated thread. Reads block until data arrives or the pipe closes;
//! every chunk read is written out unchanged before the next read.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, ErrorKind, Result};

/// Maximum bytes moved per read
pub const CHUNK_SIZE: usize = 4096;

/// Counters reported by a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes read from the source
    pub bytes: u64,
    /// Successful non-empty reads
    pub chunks: u64,
    /// Chunks that could not be written in full
    pub write_errors: u64,
}

/// Copy `reader` to `writer` until end-of-stream or a read error.
///
/// Write failures are counted and skipped; the loop keeps draining the source.
pub fn pump<R: Read, W: Write>(mut reader: R, mut writer: W) -> RelayStats {
    let mut stats = RelayStats::default();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Relay source closed: {}", e);
                break;
            }
        };
        stats.bytes += n as u64;
        stats.chunks += 1;

        if let Err(e) = writer.write_all(&buf[..n]).and_then(|()| writer.flush()) {
            stats.write_errors += 1;
            debug!("Dropped {} relayed bytes: {}", n, e);
        }
    }

    stats
}

/// A running relay worker
pub struct Relay {
    handle: Option<JoinHandle<RelayStats>>,
    done: Receiver<()>,
    finished: bool,
}

impl Relay {
    /// Start relaying `reader` into `writer` on a new thread
    pub fn spawn<R, W>(reader: R, writer: W) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (done_tx, done) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("raft-relay".to_string())
            .spawn(move || {
                let stats = pump(reader, writer);
                // The receiver may already be gone if the session detached us
                let _ = done_tx.send(());
                stats
            })
            .map_err(|e| {
                Error::with_source(
                    ErrorKind::ThreadCreation,
                    "Unable to create ConPTY stdio processing threads",
                    e,
                )
            })?;

        Ok(Self {
            handle: Some(handle),
            done,
            finished: false,
        })
    }

    /// Whether the worker has reached end-of-stream
    pub fn is_finished(&mut self) -> bool {
        self.wait_timeout(Duration::ZERO)
    }

    /// Wait up to `timeout` for the worker to reach end-of-stream
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        if self.finished {
            return true;
        }
        self.finished = match self.done.recv_timeout(timeout) {
            Ok(()) => true,
            // The sender only drops without sending if the worker panicked
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };
        self.finished
    }

    /// Collect the worker's counters.
    ///
    /// Waits at most `timeout`; a worker still blocked after that is detached
    /// and `None` is returned.
    pub fn join(mut self, timeout: Duration) -> Option<RelayStats> {
        if !self.wait_timeout(timeout) {
            warn!("Relay still running after {:?}, detaching it", timeout);
            return None;
        }
        match self.handle.take()?.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                warn!("Relay thread panicked");
                None
            }
        }
    }
}
