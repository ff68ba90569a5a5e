//! Content-addressed bare mirrors, one per distinct repository URL.
//!
//! A mirror lives at `{cache_dir}/{hex(sha256(url))}`.  The URL string is
//! hashed verbatim, so two spellings of the same remote get separate
//! mirrors.  Mirrors are created lazily and never removed.
//!
//! Concurrent requests for the same URL share the directory without any
//! locking: two racing first requests may both run `init`, and racing
//! fetches update the same refs.  `git` tolerates both.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument};

use super::Vcs;
use crate::error::FetchError;

/// A resolved mirror directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub path: PathBuf,
    /// `true` when this call created and initialised the directory.
    pub created: bool,
}

/// Maps repository URLs to mirror directories under a cache root.
#[derive(Debug, Clone)]
pub struct MirrorCache {
    root: PathBuf,
}

impl MirrorCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of the mirror for `repo_url`.
    pub fn mirror_path(&self, repo_url: &str) -> PathBuf {
        self.root.join(mirror_dir_name(repo_url))
    }

    /// Return the mirror for `repo_url`, creating the directory and an empty
    /// bare repository inside it if it does not exist yet.
    ///
    /// An existing directory is trusted as-is; nothing else writes under the
    /// cache root.
    #[instrument(skip(self, vcs, repo_url))]
    pub async fn ensure(&self, vcs: &dyn Vcs, repo_url: &str) -> Result<Mirror, FetchError> {
        let path = self.mirror_path(repo_url);

        match tokio::fs::metadata(&path).await {
            Ok(_) => {
                debug!(path = %path.display(), "mirror exists");
                return Ok(Mirror {
                    path,
                    created: false,
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot stat git dir");
                return Err(FetchError::MirrorSetup);
            }
        }

        if let Err(e) = tokio::fs::create_dir_all(&path).await {
            error!(path = %path.display(), error = %e, "error creating git dir");
            return Err(FetchError::MirrorSetup);
        }

        if let Err(e) = vcs.init_bare(&path).await {
            error!(path = %path.display(), error = %e, "error initialising git dir");
            return Err(FetchError::MirrorSetup);
        }

        info!(path = %path.display(), "created mirror");
        Ok(Mirror {
            path,
            created: true,
        })
    }
}

/// Hex-encoded SHA-256 of the URL bytes.
pub fn mirror_dir_name(repo_url: &str) -> String {
    hex::encode(Sha256::digest(repo_url.as_bytes()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
