/*!
Container lifecycle: short-lived doc-fetch containers and run-once tool invocations.

- with_container: pre-clean, start detached, run body, always stop+rm (guard Drop)
- ContainerHandle: `exec … find` existence probes and `cp` out of the container
- RunOnce: `engine run --rm …` command line for a single containerized tool call
*/
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::errors::{Error, Result};
use crate::util::{join_command, shell_join, ExecService};

use super::{ContainerEngine, Engine};

/// Entry command keeping a doc-fetch container alive until teardown.
const KEEPALIVE_SHELL: &str = "bash";
const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ContainerLifecycleManager {
    exec: ExecService,
}

impl Default for ContainerLifecycleManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

impl ContainerLifecycleManager {
    /// `timeout` bounds every single engine call (start, exec, cp).
    pub fn new(timeout: Duration) -> Self {
        Self {
            exec: ExecService::new(timeout),
        }
    }

    /// Run `body` against a live container named `name` and remove the container afterwards,
    /// whether `body` succeeds, fails or panics.
    pub fn with_container<T, F>(&self, engine: &Engine, image: &str, name: &str, body: F) -> Result<T>
    where
        F: FnOnce(&ContainerHandle<'_>) -> Result<T>,
    {
        // a crashed earlier run may have left a container under this name
        self.remove(engine, name, false);

        let guard = ContainerGuard {
            manager: self,
            engine,
            name,
        };
        self.start(engine, image, name)?;

        let handle = ContainerHandle {
            exec: &self.exec,
            engine,
            name,
        };
        let result = body(&handle);
        drop(guard);
        result
    }

    fn start(&self, engine: &Engine, image: &str, name: &str) -> Result<()> {
        let req = engine.command(["run", "--rm", "-i", "-d", "--name", name, image, KEEPALIVE_SHELL]);
        tracing::info!("run container with command '{}'", req.display());
        let fail = |reason: String| {
            tracing::error!("Failed to initialize execution environment '{image}': {reason}");
            Error::ContainerStart {
                image: image.to_string(),
                name: name.to_string(),
                reason,
            }
        };
        match self.exec.run(req) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(fail(out.failure_reason())),
            Err(e) => Err(fail(e.to_string())),
        }
    }

    /// True iff the engine reports the container as running; any failure means not running.
    pub fn is_running(&self, engine: &Engine, name: &str) -> bool {
        self.exec
            .run(
                engine
                    .command(["container", "inspect", "--format", "{{.State.Running}}", name])
                    .timeout(CONTROL_TIMEOUT),
            )
            .map(|out| out.success() && out.stdout.trim() == "true")
            .unwrap_or(false)
    }

    /// Stop then remove. Never fails: a missing container is the expected case for
    /// pre-cleanup and for `--rm` containers after stop; other failures are logged.
    pub(crate) fn remove(&self, engine: &Engine, name: &str, teardown: bool) {
        for action in ["stop", "rm"] {
            let req = engine.command([action, name]).timeout(CONTROL_TIMEOUT);
            let command = req.display();
            match self.exec.run(req) {
                Ok(out) if out.success() => tracing::debug!("cleanup command '{command}' succeeded"),
                Ok(out) if !teardown || is_missing_container(&out.stderr) => {
                    tracing::debug!("cleanup command '{command}' failed with error '{}'", out.failure_reason())
                }
                Ok(out) => {
                    tracing::warn!("cleanup command '{command}' failed with error '{}'", out.failure_reason())
                }
                Err(e) => tracing::warn!("cleanup command '{command}' failed with error '{e}'"),
            }
        }
    }
}

fn is_missing_container(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("no such container") || s.contains("no container with name or id")
}

struct ContainerGuard<'a> {
    manager: &'a ContainerLifecycleManager,
    engine: &'a Engine,
    name: &'a str,
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        self.manager.remove(self.engine, self.name, true);
    }
}

/// Operations available on a live container inside `with_container`.
pub struct ContainerHandle<'a> {
    exec: &'a ExecService,
    engine: &'a Engine,
    name: &'a str,
}

impl ContainerHandle<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    /// `engine exec <name> find <path> -path <pattern>`; present iff output is non-empty.
    pub fn path_exists(&self, path: &str, pattern: &str) -> bool {
        let req = self
            .engine
            .command(["exec", self.name, "find", path, "-path", pattern]);
        tracing::info!("Executing command {}", req.display());
        match self.exec.run(req) {
            Ok(out) => !out.stdout.trim().is_empty(),
            Err(e) => {
                tracing::info!("probe for '{path}' in container '{}' failed: {e}", self.name);
                false
            }
        }
    }

    /// `engine cp <name>:<src> <dest_dir>`; `dest_dir` is created first.
    pub fn copy_out(&self, src: &str, dest_dir: &Path) -> Result<()> {
        fs::create_dir_all(dest_dir)?;
        let req = self.engine.command([
            OsString::from("cp"),
            OsString::from(format!("{}:{src}", self.name)),
            dest_dir.as_os_str().to_os_string(),
        ]);
        tracing::info!("Copying plugins from container to local cache path {}", req.display());
        self.exec.run(req)?.check().map(|_| ())
    }
}

/// A single containerized tool invocation.
#[derive(Debug, Clone)]
pub struct RunOnce<'a> {
    pub engine: &'a Engine,
    pub image: &'a str,
    pub workdir: &'a Path,
    pub name: &'a str,
    pub env: &'a [(&'a str, &'a str)],
    /// `--user=<uid>` under docker so files written to the mount are not root-owned.
    pub host_uid: Option<u32>,
}

impl RunOnce<'_> {
    /// Engine arguments up to and including the image; the tool command is appended raw.
    pub fn engine_args(&self) -> Vec<String> {
        let dir = self.workdir.display().to_string();
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--workdir".to_string(),
            dir.clone(),
            "-v".to_string(),
            format!("{dir}:{dir}"),
        ];
        match self.engine.kind() {
            ContainerEngine::Podman => {
                args.push("--group-add=root".to_string());
                args.push("--ipc=host".to_string());
                args.push("--quiet".to_string());
            }
            ContainerEngine::Docker => {
                if let Some(uid) = self.host_uid {
                    args.push(format!("--user={uid}"));
                }
            }
        }
        args.push("--name".to_string());
        args.push(self.name.to_string());
        for (k, v) in self.env {
            args.push("-e".to_string());
            args.push(format!("{k}={v}"));
        }
        args.push(self.image.to_string());
        args
    }
}

/// Full shell command line: `<engine> run --rm … <image> <tool> <args>`.
pub fn run_once_command_line(spec: &RunOnce<'_>, command: &str) -> String {
    let mut words = vec![spec.engine.path().display().to_string()];
    words.extend(spec.engine_args());
    join_command(&shell_join(&words), command)
}

/// Current user id for docker's `--user`.
pub fn host_uid() -> Option<u32> {
    #[cfg(unix)]
    {
        Some(nix::unistd::getuid().as_raw())
    }
    #[cfg(not(unix))]
    {
        None
    }
}
