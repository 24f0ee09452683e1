#![allow(clippy::module_name_repetitions)]
//! als-exec library: command dispatch and execution-environment management for the
//! Ansible language server.
//!
//! - dispatch: run a tool on the host, under an emulated venv, or in a run-once container
//! - engine: container engine selection, image pull policy, container lifecycle
//! - plugin_docs: host cache of plugin/module docs copied out of images
//! - exec_env: per-workspace session state tying the above together

pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod exec_env;
pub mod interpreter;
pub mod lock;
pub mod plugin_docs;
pub mod settings;
pub mod telemetry;
pub mod util;

pub use dispatch::{resolve_executable, Dispatcher, RunResult, COLOR_DISABLE_ENV};
pub use engine::{ContainerEngine, Engine, EngineSelector, ImageIdentity};
pub use errors::{exit_code_for_error, exit_code_for_io_error, Error, Result};
pub use exec_env::{DoctorReport, ExecutionEnvironment};
pub use plugin_docs::{PluginDocCache, PluginPathSet, SyncReport};
pub use settings::{default_cache_root, EnginePreference, ExecutionSettings, PullPolicy};
