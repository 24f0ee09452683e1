#![allow(clippy::module_name_repetitions)]
//! Container engine discovery, image policy and container lifecycle.
//!
//! podman and docker share the CLI surface used here (`image inspect`, `images`,
//! `pull`, `run`, `exec`, `cp`, `stop`, `rm`), so one [`Engine`] value drives both;
//! the few flags that differ are matched on [`ContainerEngine`].

pub mod container;
pub mod images;
pub mod runtime;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::util::{ExecRequest, ExecService};

pub use container::{run_once_command_line, ContainerHandle, ContainerLifecycleManager, RunOnce};
pub use images::{image_tag, pull_required, ImageIdentity, ImagePuller, PullOutcome};
pub use runtime::EngineSelector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerEngine {
    Podman,
    Docker,
}

impl ContainerEngine {
    /// Probe order for `auto` selection.
    pub const PROBE_ORDER: [ContainerEngine; 2] = [ContainerEngine::Podman, ContainerEngine::Docker];

    pub fn binary_name(self) -> &'static str {
        match self {
            ContainerEngine::Podman => "podman",
            ContainerEngine::Docker => "docker",
        }
    }
}

impl fmt::Display for ContainerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// A resolved, usable engine binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engine {
    kind: ContainerEngine,
    path: PathBuf,
}

impl Engine {
    pub fn new(kind: ContainerEngine, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn kind(&self) -> ContainerEngine {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start an engine invocation: `<engine-path> <args...>`.
    pub(crate) fn command<I, S>(&self, args: I) -> ExecRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        ExecRequest::new(self.path.as_os_str()).args(args)
    }

    /// First line of `<engine> --version`, if the engine answers.
    pub fn version(&self, exec: &ExecService) -> Option<String> {
        let out = exec
            .run(self.command(["--version"]).timeout(Duration::from_secs(10)))
            .ok()?;
        if !out.success() {
            return None;
        }
        out.stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    }
}
