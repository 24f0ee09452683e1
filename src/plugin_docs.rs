//! Host-side cache of plugin/module documentation pulled out of execution-environment images.
//!
//! Layout: `<root>/<sanitized image>/<content id>/<container path>`. The presence of
//! the content-id directory (the cache base) is the only "populated" marker; it is
//! created by an atomic rename of a fully staged directory, so it is never half-filled.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::engine::{ContainerHandle, ContainerLifecycleManager, Engine, ImageIdentity};
use crate::errors::Result;
use crate::lock::IdentityLock;
use crate::util::fs::{mirror_path, sanitize_name};
use crate::util::id::unique_id;

pub const COLLECTIONS_PATTERN: &str = "**/ansible_collections";
pub const PLUGINS_PATTERN: &str = "*";
pub const MODULES_PATTERN: &str = "**/modules";

/// Python package-install directories; a builtin module root under one of these has
/// its sibling `plugins` directory copied as well.
const PACKAGE_INSTALL_DIRS: [&str; 2] = ["site-packages", "dist-packages"];

/// Plugin search paths in the tool's own filesystem namespace. Order is significant
/// (later entries have lower priority) and is preserved by every operation here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginPathSet {
    pub collection_paths: Vec<String>,
    pub module_locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub paths: PluginPathSet,
    pub cache_base: PathBuf,
    pub cache_hit: bool,
    /// Source paths absent from the image (or that failed to copy); not an error.
    pub skipped: Vec<String>,
}

/// A live container the cache can probe and copy from.
pub trait ContainerSession {
    fn path_exists(&self, path: &str, pattern: &str) -> bool;
    fn copy_out(&self, src: &str, dest_dir: &Path) -> Result<()>;
}

impl ContainerSession for ContainerHandle<'_> {
    fn path_exists(&self, path: &str, pattern: &str) -> bool {
        ContainerHandle::path_exists(self, path, pattern)
    }

    fn copy_out(&self, src: &str, dest_dir: &Path) -> Result<()> {
        ContainerHandle::copy_out(self, src, dest_dir)
    }
}

/// Opens a container session for the duration of `body`.
pub trait SessionProvider {
    fn with_session<T>(&self, body: impl FnOnce(&dyn ContainerSession) -> Result<T>) -> Result<T>;
}

/// The doc-fetch container: one uniquely named container per population run.
pub struct DocFetchContainer<'a> {
    pub manager: &'a ContainerLifecycleManager,
    pub engine: &'a Engine,
    pub image: &'a str,
    pub name: String,
}

impl<'a> DocFetchContainer<'a> {
    pub fn new(manager: &'a ContainerLifecycleManager, engine: &'a Engine, image: &'a str) -> Self {
        Self {
            manager,
            engine,
            image,
            name: format!("{}_{}", sanitize_name(image), unique_id()),
        }
    }
}

impl SessionProvider for DocFetchContainer<'_> {
    fn with_session<T>(&self, body: impl FnOnce(&dyn ContainerSession) -> Result<T>) -> Result<T> {
        self.manager
            .with_container(self.engine, self.image, &self.name, |handle| body(handle))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryInfo {
    pub image: String,
    pub content_id: String,
    pub path: PathBuf,
    pub files: u64,
}

#[derive(Debug, Clone)]
pub struct PluginDocCache {
    root: PathBuf,
}

impl PluginDocCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn image_dir(&self, reference: &str) -> PathBuf {
        self.root.join(sanitize_name(reference))
    }

    pub fn cache_base(&self, identity: &ImageIdentity) -> PathBuf {
        self.image_dir(&identity.reference)
            .join(sanitize_name(&identity.content_id))
    }

    pub fn is_populated(&self, identity: &ImageIdentity) -> bool {
        self.cache_base(identity).is_dir()
    }

    /// Cache-hit rewrite using only the host filesystem; `None` when not populated.
    pub fn lookup(&self, paths: &PluginPathSet, identity: &ImageIdentity) -> Option<PluginPathSet> {
        self.hit(paths, identity).map(|report| report.paths)
    }

    /// Point `paths` at cached copies, populating the cache from the container on first use.
    ///
    /// Population runs at most once per identity: concurrent callers for the same
    /// identity wait on the identity lock and then take the cache-hit path.
    pub fn sync<P: SessionProvider>(
        &self,
        paths: &PluginPathSet,
        identity: &ImageIdentity,
        provider: &P,
    ) -> Result<SyncReport> {
        if let Some(report) = self.hit(paths, identity) {
            return Ok(report);
        }

        let image_dir = self.image_dir(&identity.reference);
        let content = sanitize_name(&identity.content_id);
        let lock_key = format!("{}/{content}", image_dir.display());
        let _lock = IdentityLock::acquire(&lock_key, &image_dir.join(format!(".{content}.lock")))?;
        if let Some(report) = self.hit(paths, identity) {
            return Ok(report);
        }

        let base = self.cache_base(identity);
        let staging = image_dir.join(format!(".{content}.partial-{}", unique_id()));
        fs::create_dir_all(&staging)?;
        tracing::info!(
            image = %identity.reference,
            content_id = %identity.content_id,
            "populating plugin doc cache at {}",
            base.display()
        );

        let populated = provider.with_session(|session| Ok(populate(session, paths, &staging)));
        let skipped = match populated {
            Ok(skipped) => skipped,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&staging, &base) {
            let _ = fs::remove_dir_all(&staging);
            // another process may have won the race on a shared cache root
            return self.hit(paths, identity).ok_or_else(|| e.into());
        }

        // Results are read back from the host tree so a later cache hit returns the same set.
        let mut report = self.hit(paths, identity).ok_or_else(|| {
            std::io::Error::other(format!("cache base {} vanished", base.display()))
        })?;
        report.cache_hit = false;
        report.skipped = skipped;
        Ok(report)
    }

    fn hit(&self, paths: &PluginPathSet, identity: &ImageIdentity) -> Option<SyncReport> {
        let base = self.cache_base(identity);
        if !base.is_dir() {
            return None;
        }
        let mut skipped = Vec::new();
        let collection_paths = rebase_existing(&base, &paths.collection_paths, &mut skipped);
        let module_locations = rebase_existing(&base, &paths.module_locations, &mut skipped);
        Some(SyncReport {
            paths: PluginPathSet {
                collection_paths,
                module_locations,
            },
            cache_base: base,
            cache_hit: true,
            skipped,
        })
    }

    /// Populated cache bases under the root, with file counts.
    pub fn entries(&self) -> Result<Vec<CacheEntryInfo>> {
        let mut out = Vec::new();
        if !self.root.is_dir() {
            return Ok(out);
        }
        for entry in WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type().is_dir() || name.starts_with('.') {
                continue;
            }
            let image = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let files = WalkDir::new(entry.path())
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .count() as u64;
            out.push(CacheEntryInfo {
                image,
                content_id: name,
                path: entry.path().to_path_buf(),
                files,
            });
        }
        Ok(out)
    }
}

/// Cached counterparts of `paths`, in order; paths with no cached copy go to `skipped`.
fn rebase_existing(base: &Path, paths: &[String], skipped: &mut Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    for p in paths.iter().filter(|p| !p.trim().is_empty()) {
        let cached = mirror_path(base, p);
        if cached.as_path() != base && cached.exists() {
            out.push(cached.display().to_string());
        } else {
            skipped.push(p.clone());
        }
    }
    out
}

/// Builtin plugin roots derived from module locations: drop the last component and,
/// under a package-install directory, descend into `plugins`.
pub fn plugin_roots(module_locations: &[String]) -> Vec<String> {
    let mut roots: Vec<String> = Vec::new();
    for location in module_locations {
        let mut parts: Vec<&str> = location.split('/').collect();
        if parts.len() < 2 {
            continue;
        }
        parts.pop();
        if parts.iter().any(|p| PACKAGE_INSTALL_DIRS.contains(p)) {
            parts.push("plugins");
        }
        let root = parts.join("/");
        if !root.is_empty() && !roots.contains(&root) {
            roots.push(root);
        }
    }
    roots
}

/// Copy the three path classes into `staging`; returns the skipped source paths.
fn populate(session: &dyn ContainerSession, paths: &PluginPathSet, staging: &Path) -> Vec<String> {
    let mut skipped = Vec::new();
    copy_class(session, &paths.collection_paths, COLLECTIONS_PATTERN, staging, &mut skipped);
    // plugin roots are not part of the returned path set; their misses are not reported
    let mut plugin_skips = Vec::new();
    copy_class(
        session,
        &plugin_roots(&paths.module_locations),
        PLUGINS_PATTERN,
        staging,
        &mut plugin_skips,
    );
    copy_class(session, &paths.module_locations, MODULES_PATTERN, staging, &mut skipped);
    skipped
}

fn copy_class(
    session: &dyn ContainerSession,
    sources: &[String],
    pattern: &str,
    staging: &Path,
    skipped: &mut Vec<String>,
) {
    for src in sources {
        if src.trim().is_empty() {
            continue;
        }
        let dest = mirror_path(staging, src);
        let Some(dest_dir) = dest.parent().filter(|_| dest != staging) else {
            skipped.push(src.clone());
            continue;
        };
        if dest.exists() {
            // already brought in as part of an earlier, enclosing copy
            continue;
        }
        if !session.path_exists(src, pattern) {
            tracing::info!("plugin path '{src}' not found in container; skipping");
            skipped.push(src.clone());
            continue;
        }
        if let Err(e) = session.copy_out(src, dest_dir) {
            tracing::info!("copying '{src}' out of container failed: {e}; skipping");
            skipped.push(src.clone());
            continue;
        }
        if !dest.exists() {
            tracing::info!("copy of '{src}' produced no files; skipping");
            skipped.push(src.clone());
        }
    }
}
