//! Local mirror management and the `git` capability the fetch pipeline
//! drives.
//!
//! Every interaction with the version-control tool goes through the narrow
//! [`Vcs`] trait (init, fetch, resolve, archive) so the orchestration logic
//! can be exercised against a fake.  [`GitCli`] is the production
//! implementation and shells out to the `git` binary with
//! `tokio::process::Command`.

pub mod mirror;
pub mod sync;
pub mod vcs;

pub use mirror::{Mirror, MirrorCache};
pub use sync::{resolve_tip, sync};
pub use vcs::{ArchiveExport, GitCli, Vcs};
