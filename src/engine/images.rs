//! Image presence, pull policy and image identity.
//!
//! The pull decision is the pure [`pull_required`]; [`ImagePuller`] wraps it with
//! the engine calls (`image inspect`, `pull`, `images --format`).
use std::time::Duration;

use serde::Serialize;

use crate::errors::{Error, Result};
use crate::settings::PullPolicy;
use crate::util::ExecService;

use super::Engine;

const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tag of an image reference: the text after the last `:`, or `latest`.
///
/// A `:` that belongs to a registry port (`registry:5000/ee`) is not a tag separator.
pub fn image_tag(reference: &str) -> &str {
    let name = reference.split('@').next().unwrap_or(reference);
    match name.rsplit_once(':') {
        Some((_, tag)) if !tag.is_empty() && !tag.contains('/') => tag,
        _ => "latest",
    }
}

/// Pull truth table: `always`; `missing` when absent; `tag` when the tag is
/// `latest` or the image is absent; `never` never.
pub fn pull_required(policy: PullPolicy, tag: &str, image_present: bool) -> bool {
    match policy {
        PullPolicy::Always => true,
        PullPolicy::Missing => !image_present,
        PullPolicy::Tag => tag == "latest" || !image_present,
        PullPolicy::Never => false,
    }
}

/// Image reference plus the engine's content id; the content id changes when the
/// image is rebuilt under the same tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageIdentity {
    pub reference: String,
    pub content_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PullOutcome {
    pub image_present: bool,
    pub pull_required: bool,
    pub pulled: bool,
}

#[derive(Debug, Clone)]
pub struct ImagePuller {
    exec: ExecService,
}

impl ImagePuller {
    /// `pull_timeout` bounds a single `pull`; inspect calls use a short fixed bound.
    pub fn new(pull_timeout: Duration) -> Self {
        Self {
            exec: ExecService::new(pull_timeout),
        }
    }

    /// Any failure, including "no such image", counts as absent.
    pub fn image_present(&self, engine: &Engine, image: &str) -> bool {
        self.exec
            .run(
                engine
                    .command(["image", "inspect", image])
                    .timeout(INSPECT_TIMEOUT),
            )
            .map(|out| out.success())
            .unwrap_or(false)
    }

    /// Make `image` available according to `policy`.
    ///
    /// A failed pull is an `ImagePull` error; callers must treat the image as not ready.
    pub fn ensure_image(
        &self,
        engine: &Engine,
        image: &str,
        policy: PullPolicy,
    ) -> Result<PullOutcome> {
        let tag = image_tag(image);
        let present = self.image_present(engine, image);
        let required = pull_required(policy, tag, present);
        tracing::debug!(
            %image, %policy, tag, present, required,
            "evaluated pull policy"
        );
        if !required {
            return Ok(PullOutcome {
                image_present: present,
                pull_required: false,
                pulled: false,
            });
        }

        tracing::info!("Pulling image '{image}' with {}", engine.kind());
        let fail = |reason: String| {
            tracing::error!("Failed to pull image '{image}' with {}: {reason}", engine.kind());
            Error::ImagePull {
                image: image.to_string(),
                engine: engine.kind(),
                reason,
            }
        };
        match self.exec.run(engine.command(["pull", image])) {
            Ok(out) if out.success() => Ok(PullOutcome {
                image_present: present,
                pull_required: true,
                pulled: true,
            }),
            Ok(out) => Err(fail(out.failure_reason())),
            Err(e) => Err(fail(e.to_string())),
        }
    }

    /// Resolve the image's content id (`<engine> images <image> --format {{.ID}}`, first line).
    pub fn identity(&self, engine: &Engine, image: &str) -> Result<ImageIdentity> {
        let out = self
            .exec
            .run(
                engine
                    .command(["images", image, "--format", "{{.ID}}"])
                    .timeout(INSPECT_TIMEOUT),
            )?
            .check()?;
        match parse_image_id(&out.stdout) {
            Some(id) => Ok(ImageIdentity {
                reference: image.to_string(),
                content_id: id,
            }),
            None => Err(Error::ImageNotPresent {
                image: image.to_string(),
                engine: engine.kind(),
            }),
        }
    }
}

fn parse_image_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(|l| l.trim().trim_matches('"').trim())
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
