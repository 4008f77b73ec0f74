//! Launch flow shared by the binary and the tests

use std::process::ExitCode;

use log::debug;

use crate::error::Error;
use crate::pty::PtySystem;
use crate::session::{Outcome, Session, SessionOptions};

/// Launch `command_line` on `system` and report the result.
///
/// Setup failures go through [`report_fatal`]; a child that ran to completion
/// yields success whatever its own exit code was.
pub fn run<S: PtySystem>(system: S, command_line: &str, options: SessionOptions) -> ExitCode {
    debug!("Command line: {}", command_line);

    let mut session = Session::new(system, options);
    match session.run(command_line) {
        Ok(outcome) => {
            log_outcome(&outcome);
            ExitCode::SUCCESS
        }
        Err(e) => report_fatal(&mut session, &e),
    }
}

/// Print the diagnostic for `err`, release everything `session` holds and
/// return the failure status.
pub fn report_fatal<S: PtySystem>(session: &mut Session<S>, err: &Error) -> ExitCode {
    report(err);
    session.cleanup();
    ExitCode::FAILURE
}

/// Print the diagnostic line for `err` to standard output
pub fn report(err: &Error) {
    println!("{}", err.diagnostic());
}

fn log_outcome(outcome: &Outcome) {
    match outcome.relay {
        Some(stats) => debug!(
            "Relayed {} bytes in {} chunks ({} write failures)",
            stats.bytes, stats.chunks, stats.write_errors
        ),
        None => debug!("Relay did not finish before exit"),
    }
}
