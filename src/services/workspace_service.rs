//! src/services/workspace_service.rs
//!
//! Per-request scratch directories. Every conversion gets its own
//! `convert-<uuid>` directory beneath the configured temp root, so two
//! uploads with the same file name never see each other's artifacts.

use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const WORKSPACE_PREFIX: &str = "convert-";
const OUTPUT_DIR: &str = "output";
const FALLBACK_NAME: &str = "upload";

/// Allocates workspaces under a fixed root directory.
#[derive(Clone, Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh, uniquely named workspace.
    ///
    /// The `output/` subdirectory is created up front so the external tool
    /// only has to write a file, never a directory.
    pub async fn create(&self) -> io::Result<Workspace> {
        let path = self
            .root
            .join(format!("{}{}", WORKSPACE_PREFIX, Uuid::new_v4()));
        fs::create_dir(&path).await?;

        // From here on the guard owns the directory, even if the next step fails.
        let workspace = Workspace {
            path,
            destroyed: false,
        };
        fs::create_dir(workspace.path.join(OUTPUT_DIR)).await?;

        debug!(workspace = %workspace.path.display(), "created workspace");
        Ok(workspace)
    }
}

/// An isolated directory owned by exactly one request.
///
/// Call [`Workspace::destroy`] when the request is done. If the value is
/// dropped without that (cancelled request, panic), `Drop` removes the
/// directory on the blocking pool, or inline when no runtime is running.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    destroyed: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the upload is staged: the base name of `original_name`, with
    /// its extension kept.
    pub fn input_path(&self, original_name: &str) -> PathBuf {
        self.path.join(base_name(original_name))
    }

    /// Where the tool must write its result: the same base name with
    /// `output_extension` substituted for the original extension.
    pub fn output_path(&self, original_name: &str, output_extension: &str) -> PathBuf {
        let base = Path::new(base_name(original_name));
        let stem = base
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(FALLBACK_NAME);
        self.path
            .join(OUTPUT_DIR)
            .join(format!("{}{}", stem, output_extension))
    }

    /// Recursively remove the workspace. Failures are logged, never returned.
    pub async fn destroy(mut self) {
        self.destroyed = true;
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!(workspace = %self.path.display(), "removed workspace"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                workspace = %self.path.display(),
                error = %err,
                "failed to remove workspace"
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_abandoned(&path));
            }
            Err(_) => remove_abandoned(&path),
        }
    }
}

fn remove_abandoned(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!(workspace = %path.display(), "removed abandoned workspace"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(
            workspace = %path.display(),
            error = %err,
            "failed to remove abandoned workspace"
        ),
    }
}

/// Strip directory components from a client-supplied file name.
///
/// Both separators are honoured because browsers on Windows may send a
/// full `C:\...` path.
fn base_name(original_name: &str) -> &str {
    let name = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name)
        .trim();
    match name {
        "" | "." | ".." => FALLBACK_NAME,
        other => other,
    }
}
