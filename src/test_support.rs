//! In-memory [`Vcs`] double and tar fixtures shared by unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, bail};

use crate::git::{ArchiveExport, Vcs};

/// What the fake produces for a given `<commit>:<tree>`.
#[derive(Debug, Clone)]
pub enum FakeArchive {
    /// Stream these bytes, then exit successfully.
    Tar(Vec<u8>),
    /// Stream these bytes, then exit with an error.
    Failing(Vec<u8>),
}

/// Invocation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calls {
    pub init: usize,
    pub fetch: usize,
    pub rev_parse: usize,
    pub archive: usize,
    /// Every operation in order, e.g. `fetch main`, `archive abc:`.
    pub log: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeVcs {
    pub fail_init: bool,
    pub fail_fetch: bool,
    pub fail_rev_parse: bool,
    /// Printed by `rev_parse`, followed by a newline.
    pub tip: String,
    /// Exports available right now, keyed by tree-ish.
    pub archives: Mutex<HashMap<String, FakeArchive>>,
    /// Exports that become available once a fetch succeeds.
    pub after_fetch: Mutex<HashMap<String, FakeArchive>>,
    pub calls: Mutex<Calls>,
}

impl FakeVcs {
    pub fn with_tip(tip: &str) -> Self {
        Self {
            tip: tip.to_string(),
            ..Self::default()
        }
    }

    pub fn add_archive(&self, treeish: &str, archive: FakeArchive) {
        self.archives
            .lock()
            .unwrap()
            .insert(treeish.to_string(), archive);
    }

    pub fn add_archive_after_fetch(&self, treeish: &str, archive: FakeArchive) {
        self.after_fetch
            .lock()
            .unwrap()
            .insert(treeish.to_string(), archive);
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, f: impl FnOnce(&mut Calls) -> String) {
        let mut calls = self.calls.lock().unwrap();
        let entry = f(&mut calls);
        calls.log.push(entry);
    }
}

#[async_trait::async_trait]
impl Vcs for FakeVcs {
    async fn init_bare(&self, _git_dir: &Path) -> Result<()> {
        self.record(|c| {
            c.init += 1;
            "init".to_string()
        });
        if self.fail_init {
            bail!("init refused");
        }
        Ok(())
    }

    async fn fetch_branch(&self, _git_dir: &Path, _url: &str, branch: &str) -> Result<()> {
        self.record(|c| {
            c.fetch += 1;
            format!("fetch {branch}")
        });
        if self.fail_fetch {
            bail!("could not read from remote repository");
        }
        let arrived: Vec<_> = self.after_fetch.lock().unwrap().drain().collect();
        self.archives.lock().unwrap().extend(arrived);
        Ok(())
    }

    async fn rev_parse(&self, _git_dir: &Path, rev: &str) -> Result<String> {
        self.record(|c| {
            c.rev_parse += 1;
            format!("rev-parse {rev}")
        });
        if self.fail_rev_parse {
            bail!("unknown revision");
        }
        Ok(format!("{}\n", self.tip))
    }

    async fn archive(&self, _git_dir: &Path, treeish: &str) -> Result<ArchiveExport> {
        self.record(|c| {
            c.archive += 1;
            format!("archive {treeish}")
        });
        let archive = self
            .archives
            .lock()
            .unwrap()
            .get(treeish)
            .cloned()
            .unwrap_or(FakeArchive::Failing(Vec::new()));

        let (bytes, ok) = match archive {
            FakeArchive::Tar(bytes) => (bytes, true),
            FakeArchive::Failing(bytes) => (bytes, false),
        };
        let treeish = treeish.to_string();
        Ok(ArchiveExport {
            stream: Box::new(std::io::Cursor::new(bytes)),
            exit: Box::pin(async move {
                if !ok {
                    bail!("not a valid object name {treeish}");
                }
                Ok(())
            }),
        })
    }

    async fn version(&self) -> Result<String> {
        Ok("git version 2.99.0 (fake)".to_string())
    }
}

/// Build a tar with one directory and the given files, all stamped with
/// `mtime`.
pub fn tar_fixture(mtime: u64, files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut dir = tar::Header::new_ustar();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_path("src/").unwrap();
    dir.set_mode(0o775);
    dir.set_size(0);
    dir.set_mtime(mtime);
    dir.set_cksum();
    builder.append(&dir, std::io::empty()).unwrap();

    for (path, data) in files {
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_path(path).unwrap();
        header.set_mode(0o664);
        header.set_size(data.len() as u64);
        header.set_mtime(mtime);
        header.set_cksum();
        builder.append(&header, *data).unwrap();
    }

    builder.into_inner().unwrap()
}
