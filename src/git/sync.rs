//! Bringing a mirror's branch up to date with upstream.

use std::path::Path;

use tracing::{error, info, instrument};

use super::Vcs;
use crate::error::FetchError;

/// Force-fetch `branch` from `repo_url` into the mirror at `git_dir`.
///
/// The cause of a failure (unreachable host, unknown branch, auth) is logged
/// but not distinguished for the caller.
#[instrument(skip(vcs, git_dir, repo_url))]
pub async fn sync(
    vcs: &dyn Vcs,
    git_dir: &Path,
    repo_url: &str,
    branch: &str,
) -> Result<(), FetchError> {
    vcs.fetch_branch(git_dir, repo_url, branch)
        .await
        .map_err(|e| {
            error!(error = %e, "error fetching from repo");
            FetchError::Fetch
        })?;
    info!("branch synced");
    Ok(())
}

/// Resolve the mirror's local `branch` ref to a commit id.
#[instrument(skip(vcs, git_dir))]
pub async fn resolve_tip(vcs: &dyn Vcs, git_dir: &Path, branch: &str) -> Result<String, FetchError> {
    let raw = vcs.rev_parse(git_dir, branch).await.map_err(|e| {
        error!(error = %e, "error resolving branch tip");
        FetchError::ResolveCommit
    })?;

    let commit = raw.trim();
    if commit.is_empty() {
        error!("branch resolved to an empty commit id");
        return Err(FetchError::ResolveCommit);
    }
    Ok(commit.to_string())
}
