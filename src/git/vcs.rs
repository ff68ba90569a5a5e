//! The version-control capability and its `git` subprocess implementation.
//!
//! Every [`GitCli`] operation runs `git --git-dir <mirror> ...` with
//! `GIT_TERMINAL_PROMPT=0` so a credential prompt can never hang a request.
//! Each invocation is logged before it runs.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, instrument};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Resolves once the exporting process has exited; an error means the
/// export must be treated as failed even if the stream looked complete.
pub type ExitFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A running archive export: an uncompressed tar byte stream plus the
/// completion status of whatever produces it.
pub struct ArchiveExport {
    pub stream: Box<dyn AsyncRead + Send + Unpin>,
    pub exit: ExitFuture,
}

impl std::fmt::Debug for ArchiveExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveExport").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Primitives the fetch pipeline needs from the version-control tool.
#[async_trait::async_trait]
pub trait Vcs: Send + Sync {
    /// Initialise an empty bare repository in the existing directory
    /// `git_dir`.
    async fn init_bare(&self, git_dir: &Path) -> Result<()>;

    /// Force-fetch `branch` from `url` into the same-named local ref.
    async fn fetch_branch(&self, git_dir: &Path, url: &str, branch: &str) -> Result<()>;

    /// Resolve `rev` to a commit id.  The raw tool output is returned; callers
    /// trim it.
    async fn rev_parse(&self, git_dir: &Path, rev: &str) -> Result<String>;

    /// Start streaming an uncompressed tar of `treeish` (`<commit>:<path>`).
    async fn archive(&self, git_dir: &Path, treeish: &str) -> Result<ArchiveExport>;

    /// Report the tool version; used by the health check.
    async fn version(&self) -> Result<String>;
}

// ---------------------------------------------------------------------------
// git subprocess implementation
// ---------------------------------------------------------------------------

/// [`Vcs`] backed by the system `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
}

impl GitCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, git_dir: Option<&Path>, args: &[&str]) -> Command {
        match git_dir {
            Some(dir) => info!(
                git_dir = %dir.display(),
                args = %args.join(" "),
                "{}", self.binary
            ),
            None => info!(args = %args.join(" "), "{}", self.binary),
        }

        let mut cmd = Command::new(&self.binary);
        if let Some(dir) = git_dir {
            cmd.arg("--git-dir").arg(dir);
        }
        cmd.args(args);

        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run a command to completion and return its stdout.
    async fn run(&self, git_dir: Option<&Path>, args: &[&str]) -> Result<Vec<u8>> {
        let subcommand = args.first().copied().unwrap_or_default();
        let output = self
            .command(git_dir, args)
            .output()
            .await
            .with_context(|| format!("failed to spawn git {subcommand}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git {subcommand} failed (status {}): {}",
                output.status,
                stderr.trim(),
            );
        }

        debug!(subcommand, "git command succeeded");
        Ok(output.stdout)
    }
}

/// Collect everything a child writes to `pipe`; read errors end the capture.
async fn drain<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!(error = %e, "stopped reading child stderr");
    }
    buf
}

/// Refuse positional arguments git would parse as options.
fn positional(arg: &str, what: &str) -> Result<()> {
    if arg.starts_with('-') {
        bail!("{what} must not start with '-': {arg:?}");
    }
    Ok(())
}

#[async_trait::async_trait]
impl Vcs for GitCli {
    #[instrument(skip(self, git_dir), fields(git_dir = %git_dir.display()))]
    async fn init_bare(&self, git_dir: &Path) -> Result<()> {
        self.run(Some(git_dir), &["init", "--bare"]).await?;
        Ok(())
    }

    #[instrument(skip(self, git_dir, url), fields(git_dir = %git_dir.display()))]
    async fn fetch_branch(&self, git_dir: &Path, url: &str, branch: &str) -> Result<()> {
        positional(url, "repository url")?;
        let refspec = format!("+{branch}:{branch}");
        self.run(Some(git_dir), &["fetch", url, &refspec]).await?;
        Ok(())
    }

    #[instrument(skip(self, git_dir), fields(git_dir = %git_dir.display()))]
    async fn rev_parse(&self, git_dir: &Path, rev: &str) -> Result<String> {
        positional(rev, "revision")?;
        let stdout = self.run(Some(git_dir), &["rev-parse", rev]).await?;
        String::from_utf8(stdout).context("git rev-parse printed non-UTF-8 output")
    }

    #[instrument(skip(self, git_dir), fields(git_dir = %git_dir.display()))]
    async fn archive(&self, git_dir: &Path, treeish: &str) -> Result<ArchiveExport> {
        positional(treeish, "tree-ish")?;
        let mut child = self
            .command(Some(git_dir), &["archive", "--format", "tar", treeish])
            .spawn()
            .context("failed to spawn git archive")?;

        let stdout = child
            .stdout
            .take()
            .context("failed to capture git archive stdout")?;
        let stderr = child
            .stderr
            .take()
            .context("failed to capture git archive stderr")?;

        // Read stderr while stdout streams so a chatty git cannot block.
        let stderr_task = tokio::spawn(drain(stderr));

        let exit: ExitFuture = Box::pin(async move {
            let status = child.wait().await.context("failed to wait on git archive")?;
            let stderr = stderr_task
                .await
                .context("git archive stderr reader panicked")?;
            if !status.success() {
                bail!(
                    "git archive failed (status {status}): {}",
                    String::from_utf8_lossy(&stderr).trim(),
                );
            }
            Ok(())
        });

        Ok(ArchiveExport {
            stream: Box::new(stdout),
            exit,
        })
    }

    async fn version(&self) -> Result<String> {
        let stdout = self.run(None, &["--version"]).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
