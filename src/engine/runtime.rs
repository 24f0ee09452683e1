//! Container engine discovery.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::errors::{Error, Result};
use crate::settings::EnginePreference;

use super::{ContainerEngine, Engine};

/// Resolves the configured engine preference to a usable binary.
///
/// The result is cached for the lifetime of the selector (one workspace session);
/// engine availability does not change within a session. A different preference
/// re-probes.
#[derive(Debug, Default)]
pub struct EngineSelector {
    search_path: Option<OsString>,
    selected: Mutex<Option<(EnginePreference, Engine)>>,
}

impl EngineSelector {
    /// Probe the host `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe an explicit `PATH`-style search list instead of the host `PATH`.
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
            selected: Mutex::new(None),
        }
    }

    pub fn select(&self, preference: EnginePreference) -> Result<Engine> {
        let mut cached = self
            .selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((pref, engine)) = cached.as_ref() {
            if *pref == preference {
                return Ok(engine.clone());
            }
        }
        let engine = self.probe_preference(preference)?;
        *cached = Some((preference, engine.clone()));
        Ok(engine)
    }

    /// Previously selected engine, without probing.
    pub fn cached(&self) -> Option<Engine> {
        self.selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, e)| e.clone())
    }

    fn probe_preference(&self, preference: EnginePreference) -> Result<Engine> {
        match preference {
            EnginePreference::Auto => {
                for kind in ContainerEngine::PROBE_ORDER {
                    match self.probe(kind) {
                        Ok(path) => {
                            tracing::info!("Container engine set to: '{kind}'");
                            return Ok(Engine::new(kind, path));
                        }
                        Err(e) => tracing::info!("Container engine '{kind}' not found ({e})"),
                    }
                }
                Err(Error::NoEngineAvailable)
            }
            EnginePreference::Podman => self.probe_exact(ContainerEngine::Podman),
            EnginePreference::Docker => self.probe_exact(ContainerEngine::Docker),
        }
    }

    fn probe_exact(&self, kind: ContainerEngine) -> Result<Engine> {
        self.probe(kind)
            .map(|path| Engine::new(kind, path))
            .map_err(|e| {
                tracing::error!("Container engine '{kind}' not found. Failed with error '{e}'");
                Error::EngineNotFound {
                    engine: kind,
                    reason: e.to_string(),
                }
            })
    }

    fn probe(&self, kind: ContainerEngine) -> which::Result<PathBuf> {
        match &self.search_path {
            None => which::which(kind.binary_name()),
            Some(paths) => {
                let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
                which::which_in(kind.binary_name(), Some(paths), cwd)
            }
        }
    }
}
