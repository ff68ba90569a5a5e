//! The `/fetch` pipeline: validate, ensure the mirror, sync when needed,
//! export, and retry once after a forced sync.
//!
//! A pinned commit is exported optimistically from whatever the mirror
//! already holds; fetching from upstream is the expensive step and is only
//! done when the export proves it necessary.  Without a pinned commit the
//! branch is always fetched first, because the cached tip may be stale.
//! At most one sync-and-retry happens per request; if the failed attempt
//! already streamed bytes, the sync still runs but the export is not
//! repeated.

use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::AppState;
use crate::archive::{self, BodySender};
use crate::error::FetchError;
use crate::git::{resolve_tip, sync};

/// The only archive format served.
pub const FORMAT_TAR: &str = "tar";

/// Parameters of one `/fetch` call.  Absent fields deserialize as empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FetchRequest {
    /// Upstream URL; fetch source and mirror key.
    pub repo: String,
    /// Required even with a pinned commit, which may have to be fetched.
    pub branch: String,
    /// Optional pinned commit.
    pub commit: String,
    /// Optional subtree path; empty means the repository root.
    pub tree: String,
    pub format: String,
}

impl FetchRequest {
    /// Reject missing or unsupported parameters before anything touches
    /// disk or network.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.repo.is_empty() {
            return Err(FetchError::MissingRepo);
        }
        if self.branch.is_empty() {
            return Err(FetchError::MissingBranch);
        }
        if self.format.is_empty() {
            return Err(FetchError::MissingFormat);
        }
        if self.format != FORMAT_TAR {
            return Err(FetchError::UnsupportedFormat);
        }
        Ok(())
    }
}

/// Drive one request to completion, streaming the normalized archive into
/// `sink`.
///
/// An `Err` returned after bytes reached `sink` can no longer change the
/// response status; the caller turns it into a truncated body.
#[instrument(skip_all, fields(branch = %req.branch, commit = %req.commit, tree = %req.tree))]
pub async fn run_fetch(
    state: &AppState,
    req: &FetchRequest,
    sink: &BodySender,
) -> Result<(), FetchError> {
    req.validate()?;

    let vcs = state.vcs.as_ref();
    let metrics = &state.metrics.metrics;

    let mirror = state.mirrors.ensure(vcs, &req.repo).await?;
    if mirror.created {
        metrics.mirrors_created_total.inc();
    }
    let git_dir = mirror.path.as_path();

    let have_fetched = req.commit.is_empty();
    let commit = if have_fetched {
        metrics.upstream_fetches_total.inc();
        sync(vcs, git_dir, &req.repo, &req.branch).await?;
        resolve_tip(vcs, git_dir, &req.branch).await?
    } else {
        req.commit.clone()
    };
    let treeish = format!("{commit}:{}", req.tree);

    let mut attempt = archive::export(vcs, git_dir, &treeish, sink).await;
    metrics.record_attempt(attempt.is_ok());

    if let Err(e) = &attempt
        && !have_fetched
    {
        let cause = format!("{e:#}");
        let partial = sink.bytes_sent() > 0;
        warn!(error = %cause, %treeish, partial, "export from mirror failed, fetching");
        metrics.upstream_fetches_total.inc();
        sync(vcs, git_dir, &req.repo, &req.branch).await?;

        // A second archive would be appended to the bytes already sent.
        if partial {
            error!(%treeish, "export failed mid-stream; mirror refreshed, not re-exporting");
            return Err(FetchError::Archive);
        }

        attempt = archive::export(vcs, git_dir, &treeish, sink).await;
        metrics.record_attempt(attempt.is_ok());
    }

    match attempt {
        Ok(stats) => {
            info!(
                %commit,
                entries = stats.entries,
                payload_bytes = stats.payload_bytes,
                "archive served"
            );
            Ok(())
        }
        Err(e) => {
            let cause = format!("{e:#}");
            error!(error = %cause, %treeish, "error running archive");
            Err(FetchError::Archive)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
