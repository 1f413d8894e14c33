//! Ephemeral per-execution workspaces.
//!
//! Every execution owns one directory under the workspace root:
//!
//! ```text
//! <root>/
//! └── <execution-id>/
//!     ├── main.<ext>    # submitted source
//!     ├── input.txt     # optional stdin payload
//!     └── main          # compiled artifact (native languages)
//! ```
//!
//! The directory is removed on every terminal transition of its session.
//! [`Workspace::destroy`] is the normal path; the `Drop` impl is a blocking
//! fallback for futures that are dropped before reaching it.

use std::path::{Path, PathBuf};

use tokio::sync::OnceCell;

use crate::error::{Error, Result};
use crate::language::{BuildPaths, LanguageSpec};
use crate::session::ExecutionId;

/// Name of the materialized stdin file.
pub const STDIN_FILE_NAME: &str = "input.txt";

/// Creates workspaces under a shared root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Create a manager, creating the root directory if it doesn't exist.
    ///
    /// # Errors
    /// Returns [`Error::Workspace`] if the root cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| Error::Workspace {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Allocate the directory for one execution.
    ///
    /// # Errors
    /// Returns [`Error::Workspace`] if the directory cannot be created. No
    /// process may be spawned for the execution in that case.
    pub async fn create(&self, id: &ExecutionId) -> Result<Workspace> {
        let dir = self.root.join(id.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| Error::Workspace {
                path: dir.clone(),
                source,
            })?;

        tracing::debug!(execution_id = %id, dir = %dir.display(), "Workspace created");

        Ok(Workspace {
            id: id.clone(),
            dir,
            cleanup: OnceCell::new(),
        })
    }
}

/// Files written into a workspace.
#[derive(Debug, Clone)]
pub struct MaterializedFiles {
    /// Source and artifact paths.
    pub paths: BuildPaths,
    /// Stdin payload file, if one was supplied.
    pub stdin: Option<PathBuf>,
}

/// A directory exclusively owned by one execution.
#[derive(Debug)]
pub struct Workspace {
    id: ExecutionId,
    dir: PathBuf,
    /// Initialized once removal has completed.
    cleanup: OnceCell<()>,
}

impl Workspace {
    /// The workspace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.cleanup.initialized()
    }

    /// Write the source file and, if given, the stdin file.
    ///
    /// # Errors
    /// Returns [`Error::Workspace`] if either file cannot be written.
    pub async fn materialize(
        &self,
        spec: &LanguageSpec,
        code: &str,
        stdin: Option<&str>,
    ) -> Result<MaterializedFiles> {
        let paths = BuildPaths::new(spec, &self.dir);
        write_file(&paths.source, code.as_bytes()).await?;

        let stdin = match stdin {
            Some(payload) => Some(self.write_stdin(payload).await?),
            None => None,
        };

        Ok(MaterializedFiles { paths, stdin })
    }

    /// Replace the stdin payload file, returning its path.
    ///
    /// # Errors
    /// Returns [`Error::Workspace`] if the file cannot be written.
    pub async fn write_stdin(&self, payload: &str) -> Result<PathBuf> {
        let path = self.dir.join(STDIN_FILE_NAME);
        write_file(&path, payload.as_bytes()).await?;
        Ok(path)
    }

    /// Delete every entry in the directory, then the directory itself.
    ///
    /// Failures are logged and swallowed: by the time a workspace is torn
    /// down the caller's result is already decided. Concurrent callers all
    /// return once removal has finished; later calls are no-ops.
    pub async fn destroy(&self) {
        self.cleanup.get_or_init(|| self.remove_contents()).await;
    }

    async fn remove_contents(&self) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(execution_id = %self.id, "Unable to list workspace {}: {}", self.dir.display(), e);
                remove_dir_fallback(&self.id, &self.dir).await;
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(execution_id = %self.id, "Error while listing workspace: {}", e);
                    break;
                }
            };

            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let removed = if is_dir {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            if let Err(e) = removed {
                tracing::warn!(execution_id = %self.id, "Unable to delete {}: {}", path.display(), e);
            }
        }

        if let Err(e) = tokio::fs::remove_dir(&self.dir).await {
            tracing::warn!(execution_id = %self.id, "Unable to delete directory {}: {}", self.dir.display(), e);
            remove_dir_fallback(&self.id, &self.dir).await;
            return;
        }

        tracing::debug!(execution_id = %self.id, "Cleaned up workspace");
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.cleanup.initialized() {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::debug!(execution_id = %self.id, "Workspace removed on drop");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(execution_id = %self.id, "Unable to remove workspace on drop: {}", e);
            }
        }
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| Error::Workspace {
            path: path.to_path_buf(),
            source,
        })
}

async fn remove_dir_fallback(id: &ExecutionId, dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(execution_id = %id, "Recursive removal of {} failed: {}", dir.display(), e);
        }
    }
}
