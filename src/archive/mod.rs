//! Archive export and tar normalization.
//!
//! An export attempt asks the [`Vcs`] for a tar of `<commit>:<tree>`, runs
//! the normalizer on a blocking thread and relays its output to a
//! [`BodySender`].  The end-of-archive trailer is only appended when both
//! the normalizer and the export process finished cleanly, so a failed
//! attempt never looks like a complete archive.

pub mod normalize;
pub mod sink;

use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, instrument};

pub use normalize::{END_OF_ARCHIVE, NORMALIZED_MTIME, NormalizeStats, normalize_tar};
pub use sink::{BodyChunk, BodySender};

use crate::git::{ArchiveExport, Vcs};

/// Size of the buffer between the normalizer and the body channel.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Run one export attempt of `treeish` from the mirror at `git_dir` into
/// `sink`.
///
/// On failure, normalized bytes still sitting in the local buffer are
/// dropped; bytes already handed to `sink` stay delivered, which callers can
/// observe through [`BodySender::bytes_sent`].
#[instrument(skip(vcs, git_dir, sink))]
pub async fn export(
    vcs: &dyn Vcs,
    git_dir: &Path,
    treeish: &str,
    sink: &BodySender,
) -> Result<NormalizeStats> {
    let ArchiveExport { stream, exit } = vcs.archive(git_dir, treeish).await?;

    let handle = Handle::current();
    let sink = sink.clone();

    tokio::task::spawn_blocking(move || {
        let mut out = BufWriter::with_capacity(CHUNK_SIZE, sink);

        let reader = SyncIoBridge::new_with_handle(stream, handle.clone());
        let normalized = normalize_tar(reader, &mut out);
        let exited = handle.block_on(exit);

        let result = normalized.and_then(|stats| {
            exited?;
            out.write_all(&END_OF_ARCHIVE)
                .context("error writing tar trailer")?;
            out.flush().context("error flushing tar")?;
            Ok(stats)
        });

        if result.is_err() {
            // Discard whatever was not yet handed to the body.
            let (_sink, unflushed) = out.into_parts();
            debug!(
                discarded = unflushed.map(|b| b.len()).unwrap_or(0),
                "dropped buffered archive bytes"
            );
        }
        result
    })
    .await
    .context("archive normalizer task panicked")?
}
