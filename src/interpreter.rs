//! Interpreter resolution for local (non-container) execution.
//!
//! Emulates activating a Python virtual environment, or sourcing an arbitrary
//! activation script, by returning a command line plus an [`EnvOverlay`]. Nothing
//! here touches the process environment; the spawner merges the overlay at call time.
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::util::{join_command, ExecRequest};

/// Environment changes layered over the inherited process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    set: BTreeMap<String, String>,
    path_prepend: Vec<String>,
    unset: BTreeSet<String>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.path_prepend.is_empty() && self.unset.is_empty()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.unset.remove(&key);
        self.set.insert(key, value.into());
        self
    }

    pub fn unset(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.set.remove(&key);
        self.unset.insert(key);
        self
    }

    /// Prepend a directory to `PATH` (entries added later end up in front).
    pub fn prepend_path(mut self, dir: impl Into<String>) -> Self {
        self.path_prepend.insert(0, dir.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.set.get(key).map(String::as_str)
    }

    pub fn unsets(&self, key: &str) -> bool {
        self.unset.contains(key)
    }

    pub fn path_prefix(&self) -> Option<String> {
        if self.path_prepend.is_empty() {
            None
        } else {
            Some(self.path_prepend.join(":"))
        }
    }

    /// Merge over `base` and return the resulting environment.
    pub fn apply<I, K, V>(&self, base: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env: BTreeMap<String, String> = base
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        for key in &self.unset {
            env.remove(key);
        }
        for (k, v) in &self.set {
            env.insert(k.clone(), v.clone());
        }
        if let Some(prefix) = self.path_prefix() {
            let path = match env.get("PATH").filter(|p| !p.is_empty()) {
                Some(existing) => format!("{prefix}:{existing}"),
                None => prefix,
            };
            env.insert("PATH".to_string(), path);
        }
        env
    }

    /// Add this overlay to a request; `PATH` is computed from the caller's current `PATH`.
    pub fn apply_to_request(&self, mut req: ExecRequest) -> ExecRequest {
        for key in &self.unset {
            req = req.env_remove(key);
        }
        for (k, v) in &self.set {
            req = req.env(k, v);
        }
        if let Some(prefix) = self.path_prefix() {
            let path = match std::env::var("PATH").ok().filter(|p| !p.is_empty()) {
                Some(existing) => format!("{prefix}:{existing}"),
                None => prefix,
            };
            req = req.env("PATH", path);
        }
        req
    }
}

/// A resolved local invocation: shell command line plus environment overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub command_line: String,
    pub env: EnvOverlay,
}

/// Build the command line and environment overlay for `executable args`.
///
/// - activation script set: `bash -c 'source <script> && <executable> <args>'`, no overlay
/// - interpreter set: `PYTHONHOME` is removed and an absolute executable is run through
///   the interpreter directly; when the venv root (two levels above the interpreter)
///   exists lexically, `VIRTUAL_ENV` is set and `<root>/bin` is prepended to `PATH`
/// - neither: `executable args`, no overlay
pub fn resolve(
    executable: &str,
    args: &str,
    interpreter_path: Option<&str>,
    activation_script: Option<&str>,
) -> Resolved {
    let base = join_command(executable, args);

    if let Some(script) = activation_script.filter(|s| !s.is_empty()) {
        return Resolved {
            command_line: format!("bash -c 'source {script} && {base}'"),
            env: EnvOverlay::new(),
        };
    }

    let Some(interpreter) = interpreter_path.filter(|s| !s.is_empty()) else {
        return Resolved {
            command_line: base,
            env: EnvOverlay::new(),
        };
    };

    let command_line = if Path::new(executable).is_absolute() {
        join_command(&format!("{interpreter} {executable}"), args)
    } else {
        base
    };

    let Some(venv_root) = venv_root(interpreter) else {
        tracing::debug!(interpreter, "interpreter path has no virtualenv root; only PYTHONHOME is cleared");
        return Resolved {
            command_line,
            env: EnvOverlay::new().unset("PYTHONHOME"),
        };
    };

    let bin = Path::new(&venv_root).join("bin").to_string_lossy().into_owned();
    Resolved {
        command_line,
        env: EnvOverlay::new()
            .set("VIRTUAL_ENV", venv_root)
            .prepend_path(bin)
            .unset("PYTHONHOME"),
    }
}

/// `/opt/venv/bin/python3` -> `/opt/venv`. Lexical only; `None` without two parent levels.
fn venv_root(interpreter: &str) -> Option<String> {
    let root = Path::new(interpreter).parent()?.parent()?;
    if root.as_os_str().is_empty() {
        return None;
    }
    Some(root.to_string_lossy().into_owned())
}
