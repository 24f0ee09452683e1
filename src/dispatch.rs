//! Command dispatch: one entry point for running external tools on the host,
//! under an emulated virtual environment, or inside a run-once container.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::engine::{container::host_uid, run_once_command_line, Engine, RunOnce};
use crate::errors::{Error, Result};
use crate::exec_env::ExecutionEnvironment;
use crate::interpreter;
use crate::settings::ExecutionSettings;
use crate::util::id::unique_id;
use crate::util::{join_command, ExecOutput, ExecRequest, ExecService};

/// Variables forcing plain output; tool stdout is parsed with strict grammars downstream.
pub const COLOR_DISABLE_ENV: [(&str, &str); 3] =
    [("ANSIBLE_FORCE_COLOR", "0"), ("PY_COLORS", "0"), ("NO_COLOR", "1")];

pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

const RUN_ONCE_PREFIX: &str = "ansible_language_server";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl From<ExecOutput> for RunResult {
    fn from(out: ExecOutput) -> Self {
        Self {
            exit_code: out.status.code(),
            stdout: out.stdout,
            stderr: out.stderr,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    settings: ExecutionSettings,
    workspace_root: PathBuf,
    ee: Arc<ExecutionEnvironment>,
    exec: ExecService,
}

impl Dispatcher {
    pub fn new(
        settings: ExecutionSettings,
        workspace_root: impl Into<PathBuf>,
        ee: Arc<ExecutionEnvironment>,
    ) -> Self {
        Self {
            settings,
            workspace_root: workspace_root.into(),
            ee,
            exec: ExecService::new(DEFAULT_DISPATCH_TIMEOUT),
        }
    }

    /// Bound every dispatched process; zero waits indefinitely.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.exec = ExecService::new(timeout);
        self
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    pub fn environment(&self) -> &Arc<ExecutionEnvironment> {
        &self.ee
    }

    /// Run `tool args`; a non-zero exit or spawn failure is `Error::Execution` carrying
    /// the captured output.
    pub fn run(
        &self,
        tool: &str,
        args: &str,
        cwd: Option<&Path>,
        keep_ansi_colors: bool,
    ) -> Result<RunResult> {
        let prepared = self.prepare(tool, args, cwd, keep_ansi_colors)?;
        let out = self.execute(prepared)?.check()?;
        Ok(out.into())
    }

    /// Like [`Dispatcher::run`], but a non-zero exit is returned as a result instead
    /// of an error. Spawn failures and timeouts are still errors.
    pub fn run_capture(
        &self,
        tool: &str,
        args: &str,
        cwd: Option<&Path>,
        keep_ansi_colors: bool,
    ) -> Result<RunResult> {
        let prepared = self.prepare(tool, args, cwd, keep_ansi_colors)?;
        Ok(self.execute(prepared)?.into())
    }

    /// Spawn the prepared request. Killing the engine client on timeout does not stop
    /// the container it started, so a run-once container is torn down by name whenever
    /// the client did not exit on its own.
    fn execute(&self, prepared: Prepared) -> Result<ExecOutput> {
        let result = self.exec.run(prepared.request);
        if let (Err(e), Some((engine, name))) = (&result, &prepared.container) {
            tracing::warn!("run-once container '{name}' did not finish: {e}; removing it");
            self.ee.lifecycle().remove(engine, name, true);
        }
        result
    }

    /// Concrete executable for `tool` under the current settings.
    pub fn resolve_executable(&self, tool: &str) -> String {
        resolve_executable(&self.settings, tool)
    }

    /// The request `run` would spawn. Containerized requests make sure the image is
    /// ready first, which may select an engine and pull.
    pub fn build_request(
        &self,
        tool: &str,
        args: &str,
        cwd: Option<&Path>,
        keep_ansi_colors: bool,
    ) -> Result<ExecRequest> {
        Ok(self.prepare(tool, args, cwd, keep_ansi_colors)?.request)
    }

    fn prepare(
        &self,
        tool: &str,
        args: &str,
        cwd: Option<&Path>,
        keep_ansi_colors: bool,
    ) -> Result<Prepared> {
        let workdir = cwd.unwrap_or(&self.workspace_root);
        if self.settings.execution_environment.enabled {
            self.containerized(tool, args, workdir, keep_ansi_colors)
        } else {
            Ok(Prepared {
                request: self.local(tool, args, workdir, keep_ansi_colors),
                container: None,
            })
        }
    }

    fn local(&self, tool: &str, args: &str, workdir: &Path, keep_ansi_colors: bool) -> ExecRequest {
        let executable = self.resolve_executable(tool);
        let python = &self.settings.python;
        let resolved = interpreter::resolve(
            &executable,
            args,
            python.interpreter_path(),
            python.activation_script(),
        );
        tracing::debug!(command = %resolved.command_line, cwd = %workdir.display(), "local dispatch");

        let mut req = ExecRequest::shell(resolved.command_line).cwd(workdir);
        req = resolved.env.apply_to_request(req);
        if !keep_ansi_colors {
            for (k, v) in COLOR_DISABLE_ENV {
                req = req.env(k, v);
            }
        }
        req
    }

    fn containerized(
        &self,
        tool: &str,
        args: &str,
        workdir: &Path,
        keep_ansi_colors: bool,
    ) -> Result<Prepared> {
        let image = &self.settings.execution_environment.image;
        let engine = self.ee.ensure_ready(&self.settings).map_err(|e| {
            tracing::error!("execution environment not ready for '{tool}': {e}");
            if e.is_setup_failure() {
                e
            } else {
                Error::NotReady {
                    image: image.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let env: &[(&str, &str)] = if keep_ansi_colors {
            &[]
        } else {
            &COLOR_DISABLE_ENV
        };
        let name = format!("{RUN_ONCE_PREFIX}_{}", unique_id());
        let spec = RunOnce {
            engine: &engine,
            image,
            workdir,
            name: &name,
            env,
            host_uid: host_uid(),
        };
        // inside the image the tool runs on the container's own python3
        let line = run_once_command_line(&spec, &join_command(tool, args));
        tracing::debug!(command = %line, "containerized dispatch");
        Ok(Prepared {
            request: ExecRequest::shell(line).cwd(workdir),
            container: Some((engine, name)),
        })
    }
}

/// A request ready to spawn, plus the engine and name of the run-once container it starts.
struct Prepared {
    request: ExecRequest,
    container: Option<(Engine, String)>,
}

/// With the execution environment disabled, `ansible-lint` maps to its configured
/// path and other `ansible*` tools are looked up next to the configured `ansible`;
/// inside an image, and for anything else, the name is used verbatim.
pub fn resolve_executable(settings: &ExecutionSettings, tool: &str) -> String {
    if settings.execution_environment.enabled {
        return tool.to_string();
    }
    if tool == "ansible-lint" {
        return settings.ansible_lint.path.clone();
    }
    if tool.starts_with("ansible") {
        let ansible = Path::new(&settings.ansible.path);
        if let Some(dir) = ansible.parent().filter(|d| !d.as_os_str().is_empty()) {
            return dir.join(tool).display().to_string();
        }
    }
    tool.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ExecutionSettings {
        let mut s = ExecutionSettings::default();
        s.ansible.path = "/opt/tools/bin/ansible".into();
        s.ansible_lint.path = "/usr/local/bin/ansible-lint".into();
        s
    }

    #[test]
    fn test_resolve_executable_local() {
        let s = settings();
        assert_eq!(resolve_executable(&s, "ansible-lint"), "/usr/local/bin/ansible-lint");
        assert_eq!(resolve_executable(&s, "ansible-config"), "/opt/tools/bin/ansible-config");
        assert_eq!(resolve_executable(&s, "ansible"), "/opt/tools/bin/ansible");
        assert_eq!(resolve_executable(&s, "python3"), "python3");
    }

    #[test]
    fn test_resolve_executable_bare_ansible_path_is_verbatim() {
        let s = ExecutionSettings::default();
        assert_eq!(resolve_executable(&s, "ansible-playbook"), "ansible-playbook");
    }

    #[test]
    fn test_resolve_executable_in_ee_is_verbatim() {
        let mut s = settings();
        s.execution_environment.enabled = true;
        assert_eq!(resolve_executable(&s, "ansible-lint"), "ansible-lint");
        assert_eq!(resolve_executable(&s, "ansible-config"), "ansible-config");
    }

    #[test]
    fn test_local_request_sets_color_env_unless_kept() {
        let td = tempfile::tempdir().expect("tmpdir");
        let ee = Arc::new(ExecutionEnvironment::new(td.path(), td.path().join("cache")));
        let d = Dispatcher::new(settings(), td.path(), ee);
        let plain = d
            .build_request("ansible-config", "dump", None, false)
            .expect("request");
        assert!(plain.display().contains("/opt/tools/bin/ansible-config dump"));
        let colored = d
            .build_request("ansible-config", "dump", None, true)
            .expect("request");
        assert!(format!("{plain:?}").contains("NO_COLOR"));
        assert!(!format!("{colored:?}").contains("NO_COLOR"));
    }
}
