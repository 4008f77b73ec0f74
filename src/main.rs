//! Raft
//!
//! Runs `wsl.exe <args>` (or another program) inside a pseudo console.

use std::process::ExitCode;

use clap::error::ErrorKind as ClapErrorKind;
use clap::Parser;

use raft::app;
use raft::config::{CliArgs, Config};

fn main() -> ExitCode {
    // Default to "warn" so log lines stay out of the relayed output.
    // Set RUST_LOG=debug to trace the launch sequence.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            app::report(&raft::Error::from(e));
            return ExitCode::FAILURE;
        }
    };

    let config = match Config::load_with_args(&args) {
        Ok(config) => config,
        Err(e) => {
            app::report(&e);
            return ExitCode::FAILURE;
        }
    };

    let command_line = match config.command_line() {
        Ok(line) => line,
        Err(e) => {
            app::report(&e);
            return ExitCode::FAILURE;
        }
    };

    launch(&command_line, &config)
}

#[cfg(windows)]
fn launch(command_line: &str, config: &Config) -> ExitCode {
    let system = raft::pty::ConPtySystem::new();

    if let Err(e) = system.enable_virtual_terminal() {
        app::report(&e);
        return ExitCode::FAILURE;
    }

    app::run(system, command_line, config.session_options())
}

#[cfg(not(windows))]
fn launch(_command_line: &str, _config: &Config) -> ExitCode {
    app::report(&raft::Error::bare(
        raft::ErrorKind::EnvironmentQuery,
        "Pseudo consoles require Windows 10 1809 or later",
    ));
    ExitCode::FAILURE
}
