//! Error taxonomy and exit-code mapping.
//!
//! - Map io::ErrorKind::NotFound to exit code 127; all others to 1.
//! - A dispatched tool's own non-zero exit code is passed through unchanged.
//! - Setup errors (engine, pull, start) carry the engine/image so the message is actionable on its own.
use std::io;
use std::time::Duration;

use crate::engine::ContainerEngine;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An explicitly configured engine could not be found on the host.
    #[error("container engine '{engine}' not found: {reason}")]
    EngineNotFound {
        engine: ContainerEngine,
        reason: String,
    },

    /// `auto` selection probed every known engine and none was usable.
    #[error("no valid container engine found (probed podman, docker)")]
    NoEngineAvailable,

    #[error("failed to pull execution environment image '{image}' with {engine}: {reason}")]
    ImagePull {
        image: String,
        engine: ContainerEngine,
        reason: String,
    },

    #[error("execution environment image '{image}' is not present in {engine}")]
    ImageNotPresent {
        image: String,
        engine: ContainerEngine,
    },

    #[error("failed to initialize execution environment '{image}' (container '{name}'): {reason}")]
    ContainerStart {
        image: String,
        name: String,
        reason: String,
    },

    /// Non-zero exit or spawn failure. `exit_code` is `None` when the process was killed by a signal.
    #[error("command '{command}' failed with exit code {}", display_code(.exit_code))]
    Execution {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("command '{command}' timed out after {}", display_timeout(.timeout))]
    Timeout { command: String, timeout: Duration },

    #[error("execution environment image '{image}' is not ready: {reason}")]
    NotReady { image: String, reason: String },

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string())
}

fn display_timeout(timeout: &Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

impl Error {
    /// Captured stdout of a failed command, if any. Callers that expect
    /// diagnostic output on non-zero exit (syntax checks, lint) read it from here.
    pub fn stdout(&self) -> Option<&str> {
        match self {
            Error::Execution { stdout, .. } => Some(stdout),
            _ => None,
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::Execution { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// True for failures that abort execution-environment setup as a whole.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Error::EngineNotFound { .. }
                | Error::NoEngineAvailable
                | Error::ImagePull { .. }
                | Error::ImageNotPresent { .. }
                | Error::ContainerStart { .. }
                | Error::NotReady { .. }
        )
    }
}

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (command not found)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

/// Convert an Error to a CLI exit code (parity with io::Error mapping).
pub fn exit_code_for_error(e: &Error) -> u8 {
    match e {
        Error::Io(ioe) => exit_code_for_io_error(ioe),
        Error::Execution {
            exit_code: Some(code),
            ..
        } => u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1),
        _ => 1,
    }
}
