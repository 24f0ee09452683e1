//! Per-workspace execution-environment session.
//!
//! Owns the engine selection cache, the readiness state of the configured image
//! and the plugin path set consumed by the documentation index. Setup is strictly
//! sequential: engine -> image -> identity -> doc sync.
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::engine::{ContainerLifecycleManager, Engine, EngineSelector, ImageIdentity, ImagePuller};
use crate::errors::{Error, Result};
use crate::plugin_docs::{DocFetchContainer, PluginDocCache, PluginPathSet, SyncReport};
use crate::settings::ExecutionSettings;
use crate::util::ExecService;

pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Default)]
struct State {
    /// Image the readiness below refers to; a different configured image resets it.
    image: Option<String>,
    engine: Option<Engine>,
    identity: Option<ImageIdentity>,
    ready: bool,
    plugin_paths: PluginPathSet,
}

#[derive(Debug)]
pub struct ExecutionEnvironment {
    workspace_root: PathBuf,
    selector: EngineSelector,
    puller: ImagePuller,
    lifecycle: ContainerLifecycleManager,
    cache: PluginDocCache,
    state: Mutex<State>,
}

impl ExecutionEnvironment {
    pub fn new(workspace_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            selector: EngineSelector::new(),
            puller: ImagePuller::new(DEFAULT_PULL_TIMEOUT),
            lifecycle: ContainerLifecycleManager::default(),
            cache: PluginDocCache::new(cache_root),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_selector(mut self, selector: EngineSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.puller = ImagePuller::new(timeout);
        self
    }

    pub fn with_container_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle = ContainerLifecycleManager::new(timeout);
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn cache(&self) -> &PluginDocCache {
        &self.cache
    }

    pub fn lifecycle(&self) -> &ContainerLifecycleManager {
        &self.lifecycle
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select the engine and make the configured image available.
    ///
    /// Returns the cached engine when the same image is already ready. On failure
    /// the image is marked not ready and the error names the engine/image.
    pub fn ensure_ready(&self, settings: &ExecutionSettings) -> Result<Engine> {
        let ee = &settings.execution_environment;
        {
            let st = self.state();
            if st.ready && st.image.as_deref() == Some(ee.image.as_str()) {
                if let Some(engine) = &st.engine {
                    return Ok(engine.clone());
                }
            }
        }

        self.mark_not_ready(&ee.image);
        let engine = self.selector.select(ee.container_engine)?;
        let outcome = self.puller.ensure_image(&engine, &ee.image, ee.pull_policy)?;
        let identity = self.puller.identity(&engine, &ee.image)?;
        tracing::info!(
            image = %ee.image,
            content_id = %identity.content_id,
            pulled = outcome.pulled,
            "execution environment image ready"
        );

        let mut st = self.state();
        st.image = Some(ee.image.clone());
        st.engine = Some(engine.clone());
        st.identity = Some(identity);
        st.ready = true;
        Ok(engine)
    }

    fn mark_not_ready(&self, image: &str) {
        let mut st = self.state();
        if st.image.as_deref() != Some(image) {
            st.plugin_paths = PluginPathSet::default();
        }
        st.image = Some(image.to_string());
        st.ready = false;
        st.identity = None;
    }

    /// Full setup: engine, image, identity, then plugin doc cache sync for `reported`
    /// (the paths as the tool reports them inside the container).
    pub fn initialize(
        &self,
        settings: &ExecutionSettings,
        reported: &PluginPathSet,
    ) -> Result<SyncReport> {
        let result = self.initialize_inner(settings, reported);
        if let Err(e) = &result {
            tracing::error!(
                "Execution environment image '{}' setup failed: {e}",
                settings.execution_environment.image
            );
        }
        result
    }

    fn initialize_inner(
        &self,
        settings: &ExecutionSettings,
        reported: &PluginPathSet,
    ) -> Result<SyncReport> {
        let engine = self.ensure_ready(settings)?;
        let image = settings.execution_environment.image.as_str();
        let identity = self.identity().ok_or_else(|| Error::NotReady {
            image: image.to_string(),
            reason: "image identity was not resolved".to_string(),
        })?;
        let provider = DocFetchContainer::new(&self.lifecycle, &engine, image);
        let report = self.cache.sync(reported, &identity, &provider)?;
        self.state().plugin_paths = report.paths.clone();
        Ok(report)
    }

    pub fn container_ready(&self) -> bool {
        self.state().ready
    }

    /// Plugin paths on the host (cache copies) after a successful `initialize`.
    pub fn plugin_paths(&self) -> PluginPathSet {
        self.state().plugin_paths.clone()
    }

    pub fn engine(&self) -> Option<Engine> {
        self.state().engine.clone()
    }

    pub fn identity(&self) -> Option<ImageIdentity> {
        self.state().identity.clone()
    }

    /// Read-only diagnostics; never pulls and never starts containers.
    pub fn doctor(&self, settings: &ExecutionSettings) -> DoctorReport {
        let ee = &settings.execution_environment;
        let mut report = DoctorReport {
            enabled: ee.enabled,
            engine_preference: ee.container_engine.to_string(),
            engine: None,
            engine_path: None,
            engine_version: None,
            engine_error: None,
            image: ee.image.clone(),
            pull_policy: ee.pull_policy.to_string(),
            image_present: false,
            content_id: None,
            cache_root: self.cache.root().to_path_buf(),
            cache_base: None,
            cache_populated: false,
        };
        let engine = match self.selector.select(ee.container_engine) {
            Ok(engine) => engine,
            Err(e) => {
                report.engine_error = Some(e.to_string());
                return report;
            }
        };
        report.engine = Some(engine.kind().to_string());
        report.engine_path = Some(engine.path().to_path_buf());
        report.engine_version = engine.version(&ExecService::default());
        report.image_present = self.puller.image_present(&engine, &ee.image);
        if report.image_present {
            if let Ok(identity) = self.puller.identity(&engine, &ee.image) {
                let base = self.cache.cache_base(&identity);
                report.cache_populated = base.is_dir();
                report.cache_base = Some(base);
                report.content_id = Some(identity.content_id);
            }
        }
        report
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorReport {
    pub enabled: bool,
    pub engine_preference: String,
    pub engine: Option<String>,
    pub engine_path: Option<PathBuf>,
    pub engine_version: Option<String>,
    pub engine_error: Option<String>,
    pub image: String,
    pub pull_policy: String,
    pub image_present: bool,
    pub content_id: Option<String>,
    pub cache_root: PathBuf,
    pub cache_base: Option<PathBuf>,
    pub cache_populated: bool,
}
