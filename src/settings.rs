//! Execution settings snapshot.
//!
//! The language server owns settings storage; this module only describes the
//! shape this crate reads, loads it from YAML for the CLI, and applies `ALS_*`
//! environment overrides. A snapshot is immutable for the duration of a dispatch.
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

pub const DEFAULT_IMAGE: &str = "quay.io/ansible/creator-ee:latest";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionSettings {
    pub ansible: AnsibleSettings,
    pub ansible_lint: AnsibleLintSettings,
    pub execution_environment: ExecutionEnvironmentSettings,
    pub python: PythonSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnsibleSettings {
    /// Path of the `ansible` executable; sibling `ansible-*` tools are looked up next to it.
    pub path: String,
}

impl Default for AnsibleSettings {
    fn default() -> Self {
        Self {
            path: "ansible".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnsibleLintSettings {
    pub path: String,
}

impl Default for AnsibleLintSettings {
    fn default() -> Self {
        Self {
            path: "ansible-lint".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionEnvironmentSettings {
    pub enabled: bool,
    pub image: String,
    pub container_engine: EnginePreference,
    pub pull_policy: PullPolicy,
}

impl Default for ExecutionEnvironmentSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            image: DEFAULT_IMAGE.to_string(),
            container_engine: EnginePreference::Auto,
            pull_policy: PullPolicy::Missing,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PythonSettings {
    pub interpreter_path: Option<String>,
    pub activation_script: Option<String>,
}

impl PythonSettings {
    pub fn interpreter_path(&self) -> Option<&str> {
        non_empty(self.interpreter_path.as_deref())
    }

    pub fn activation_script(&self) -> Option<&str> {
        non_empty(self.activation_script.as_deref())
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnginePreference {
    #[default]
    Auto,
    Podman,
    Docker,
}

impl FromStr for EnginePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(EnginePreference::Auto),
            "podman" => Ok(EnginePreference::Podman),
            "docker" => Ok(EnginePreference::Docker),
            other => Err(format!(
                "unknown container engine '{other}' (expected auto, podman or docker)"
            )),
        }
    }
}

impl fmt::Display for EnginePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnginePreference::Auto => "auto",
            EnginePreference::Podman => "podman",
            EnginePreference::Docker => "docker",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    Always,
    #[default]
    Missing,
    Never,
    Tag,
}

impl PullPolicy {
    pub const ALL: [PullPolicy; 4] = [
        PullPolicy::Always,
        PullPolicy::Missing,
        PullPolicy::Never,
        PullPolicy::Tag,
    ];
}

impl FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(PullPolicy::Always),
            "missing" => Ok(PullPolicy::Missing),
            "never" => Ok(PullPolicy::Never),
            "tag" => Ok(PullPolicy::Tag),
            other => Err(format!(
                "unknown pull policy '{other}' (expected always, missing, never or tag)"
            )),
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PullPolicy::Always => "always",
            PullPolicy::Missing => "missing",
            PullPolicy::Never => "never",
            PullPolicy::Tag => "tag",
        })
    }
}

impl ExecutionSettings {
    /// Defaults, then the YAML file (if any), then `ALS_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        settings.apply_overrides(env::vars())?;
        Ok(settings)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Settings(format!("cannot read settings file {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
            .map_err(|e| Error::Settings(format!("{}: {e}", path.display())))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| Error::Settings(e.to_string()))
    }

    /// Apply `ALS_*` overrides from an explicit variable list (the process environment in `load`).
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let value = value.as_ref();
            let ee = &mut self.execution_environment;
            match key.as_ref() {
                "ALS_EE_ENABLED" => ee.enabled = parse_bool("ALS_EE_ENABLED", value)?,
                "ALS_EE_IMAGE" if !value.trim().is_empty() => {
                    ee.image = value.trim().to_string()
                }
                "ALS_CONTAINER_ENGINE" => {
                    ee.container_engine = value
                        .parse()
                        .map_err(|e| Error::Settings(format!("ALS_CONTAINER_ENGINE: {e}")))?
                }
                "ALS_PULL_POLICY" => {
                    ee.pull_policy = value
                        .parse()
                        .map_err(|e| Error::Settings(format!("ALS_PULL_POLICY: {e}")))?
                }
                "ALS_PYTHON_INTERPRETER" => {
                    self.python.interpreter_path = Some(value.to_string())
                }
                "ALS_PYTHON_ACTIVATION_SCRIPT" => {
                    self.python.activation_script = Some(value.to_string())
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Settings(format!(
            "{name}: expected a boolean, got '{other}'"
        ))),
    }
}

/// Host cache root: `ALS_EXEC_CACHE_DIR`, else `<home>/.cache/ansible-language-server`.
pub fn default_cache_root() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("ALS_EXEC_CACHE_DIR").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    home::home_dir()
        .map(|h| h.join(".cache").join("ansible-language-server"))
        .ok_or_else(|| {
            Error::Settings(
                "cannot determine home directory for the plugin doc cache; set ALS_EXEC_CACHE_DIR"
                    .to_string(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = ExecutionSettings::default();
        assert!(!s.execution_environment.enabled);
        assert_eq!(s.execution_environment.image, DEFAULT_IMAGE);
        assert_eq!(s.execution_environment.container_engine, EnginePreference::Auto);
        assert_eq!(s.execution_environment.pull_policy, PullPolicy::Missing);
        assert_eq!(s.ansible.path, "ansible");
        assert_eq!(s.python.interpreter_path(), None);
    }

    #[test]
    fn test_yaml_camel_case_partial() {
        let yaml = "executionEnvironment:\n  enabled: true\n  containerEngine: podman\n  pullPolicy: tag\npython:\n  interpreterPath: /opt/venv/bin/python3\n  activationScript: \"\"\n";
        let s = ExecutionSettings::from_yaml_str(yaml).expect("parse");
        assert!(s.execution_environment.enabled);
        assert_eq!(s.execution_environment.container_engine, EnginePreference::Podman);
        assert_eq!(s.execution_environment.pull_policy, PullPolicy::Tag);
        assert_eq!(s.execution_environment.image, DEFAULT_IMAGE);
        assert_eq!(s.python.interpreter_path(), Some("/opt/venv/bin/python3"));
        assert_eq!(s.python.activation_script(), None);
    }

    #[test]
    fn test_yaml_rejects_unknown_engine() {
        let err = ExecutionSettings::from_yaml_str("executionEnvironment:\n  containerEngine: lxc\n")
            .expect_err("lxc is not an engine");
        assert!(matches!(err, Error::Settings(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut s = ExecutionSettings::default();
        s.apply_overrides([
            ("ALS_EE_ENABLED", "1"),
            ("ALS_EE_IMAGE", "ghcr.io/acme/ee:2.1"),
            ("ALS_CONTAINER_ENGINE", "Docker"),
            ("ALS_PULL_POLICY", "never"),
            ("UNRELATED", "x"),
        ])
        .expect("overrides");
        assert!(s.execution_environment.enabled);
        assert_eq!(s.execution_environment.image, "ghcr.io/acme/ee:2.1");
        assert_eq!(s.execution_environment.container_engine, EnginePreference::Docker);
        assert_eq!(s.execution_environment.pull_policy, PullPolicy::Never);
    }

    #[test]
    fn test_env_override_invalid_policy_names_variable() {
        let mut s = ExecutionSettings::default();
        let err = s
            .apply_overrides([("ALS_PULL_POLICY", "sometimes")])
            .expect_err("invalid");
        assert!(err.to_string().contains("ALS_PULL_POLICY"), "{err}");
    }
}
