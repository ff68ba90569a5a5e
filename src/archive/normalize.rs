//! Deterministic rewriting of a tar entry stream.
//!
//! `git archive` stamps every header with the commit time, so identical
//! trees reached through different commits produce different bytes.  Each
//! header is relayed with its modification time reset to the epoch and its
//! checksum recomputed.  Every other header field and all payload bytes
//! pass through untouched, entry for entry, in order.
//!
//! Entries are read raw: pax and GNU long-name records are relayed as the
//! entries they are instead of being folded into the following header.

use std::io::{self, Read, Write};

use anyhow::{Context, Result, bail};
use tracing::{error, trace};

/// Modification time written into every relayed header.
pub const NORMALIZED_MTIME: u64 = 0;

/// Two zero blocks terminating a tar archive.
pub const END_OF_ARCHIVE: [u8; 1024] = [0; 1024];

const BLOCK_SIZE: u64 = 512;

/// Counts for one normalized stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeStats {
    /// Header records relayed, including pax and GNU long-name records.
    pub records: usize,
    /// Archive members, excluding extension records.
    pub entries: usize,
    /// Payload bytes of archive members.
    pub payload_bytes: u64,
}

/// Records that only describe the member following them.
fn is_extension(kind: tar::EntryType) -> bool {
    kind.is_gnu_longname()
        || kind.is_gnu_longlink()
        || kind.is_pax_local_extensions()
        || kind.is_pax_global_extensions()
}

/// Relay every entry of `input` to `output` with normalized headers.
///
/// Returns once the input's end-of-archive marker or EOF is reached.  The
/// end-of-archive trailer is *not* written; callers append
/// [`END_OF_ARCHIVE`] once they know the producer exited cleanly.
///
/// A header that cannot be parsed is never written.  A payload shorter than
/// its header's declared size is an error even though its bytes have
/// already been relayed.
pub fn normalize_tar<R: Read, W: Write>(input: R, output: &mut W) -> Result<NormalizeStats> {
    let mut archive = tar::Archive::new(input);
    let mut stats = NormalizeStats::default();

    {
        let entries = archive
            .entries()
            .context("unexpected error reading tar")?
            .raw(true);

        for entry in entries {
            let mut entry = entry.map_err(|e| {
                error!(error = %e, "unexpected error reading tar");
                anyhow::Error::new(e).context("unexpected error reading tar")
            })?;

            let mut header = entry.header().clone();
            let size = header
                .entry_size()
                .context("tar header has a corrupt size field")?;
            header.set_mtime(NORMALIZED_MTIME);
            header.set_cksum();

            output
                .write_all(header.as_bytes())
                .context("error writing tar header")?;

            let copied = io::copy(&mut (&mut entry).take(size), output).map_err(|e| {
                error!(error = %e, "error copying tar data");
                anyhow::Error::new(e).context("error copying tar data")
            })?;
            if copied != size {
                error!(copied, size, "error copying tar data: short entry");
                bail!("error copying tar data: copied {copied} of {size} bytes");
            }
            write_padding(output, size).context("error writing tar padding")?;

            trace!(path = %String::from_utf8_lossy(&header.path_bytes()), size, "relayed record");
            stats.records += 1;
            if !is_extension(header.entry_type()) {
                stats.entries += 1;
                stats.payload_bytes += size;
            }
        }
    }

    // Drain trailing record padding so the producer never sees a closed pipe.
    io::copy(&mut archive.into_inner(), &mut io::sink()).context("error draining tar")?;

    Ok(stats)
}

fn write_padding<W: Write>(output: &mut W, size: u64) -> io::Result<()> {
    let rem = size % BLOCK_SIZE;
    if rem == 0 {
        return Ok(());
    }
    let pad = (BLOCK_SIZE - rem) as usize;
    output.write_all(&END_OF_ARCHIVE[..pad])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tar_fixture;

    fn normalize_complete(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        normalize_tar(input, &mut out).unwrap();
        out.extend_from_slice(&END_OF_ARCHIVE);
        out
    }

    #[test]
    fn different_mtimes_give_identical_output() {
        let files: &[(&str, &[u8])] = &[
            ("src/main.rs", b"fn main() {}\n"),
            ("README.md", b"# readme\n"),
        ];
        let early = normalize_complete(&tar_fixture(1_500_000_000, files));
        let late = normalize_complete(&tar_fixture(1_700_000_000, files));
        assert_eq!(early, late);
    }

    #[test]
    fn entries_keep_everything_but_mtime() {
        let files: &[(&str, &[u8])] = &[("a.txt", b"alpha"), ("b/c.bin", &[0u8; 700])];
        let input = tar_fixture(1_234_567_890, files);
        let output = normalize_complete(&input);

        let mut before = tar::Archive::new(input.as_slice());
        let mut after = tar::Archive::new(output.as_slice());
        let before: Vec<_> = before
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let h = e.header().clone();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (h, data)
            })
            .collect();
        let after: Vec<_> = after
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let h = e.header().clone();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (h, data)
            })
            .collect();

        assert_eq!(before.len(), 3);
        assert_eq!(before.len(), after.len());
        for ((bh, bd), (ah, ad)) in before.iter().zip(&after) {
            assert_eq!(bh.path_bytes(), ah.path_bytes());
            assert_eq!(bh.mode().unwrap(), ah.mode().unwrap());
            assert_eq!(bh.size().unwrap(), ah.size().unwrap());
            assert_eq!(bh.entry_type(), ah.entry_type());
            assert_eq!(bd, ad);
            assert_eq!(bh.mtime().unwrap(), 1_234_567_890);
            assert_eq!(ah.mtime().unwrap(), NORMALIZED_MTIME);
        }
    }

    #[test]
    fn stats_count_entries_and_payload() {
        let input = tar_fixture(7, &[("x", b"12345"), ("y", b"")]);
        let mut out = Vec::new();
        let stats = normalize_tar(input.as_slice(), &mut out).unwrap();
        assert_eq!(
            stats,
            NormalizeStats {
                records: 3,
                entries: 3,
                payload_bytes: 5
            }
        );
        // Three headers plus one padded data block; no trailer.
        assert_eq!(out.len(), 4 * 512);
    }

    #[test]
    fn long_names_pass_through_as_raw_records() {
        let long_path = format!("{}/file.txt", "deep".repeat(75));
        assert!(long_path.len() > 255);

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_size(4);
        header.set_mtime(1_700_000_000);
        builder
            .append_data(&mut header, &long_path, &b"data"[..])
            .unwrap();
        let input = builder.into_inner().unwrap();

        let mut out = Vec::new();
        let stats = normalize_tar(input.as_slice(), &mut out).unwrap();
        out.extend_from_slice(&END_OF_ARCHIVE);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.payload_bytes, 4);

        let mut raw = tar::Archive::new(out.as_slice());
        let raw_entries = raw.entries().unwrap().raw(true);
        for entry in raw_entries {
            assert_eq!(entry.unwrap().header().mtime().unwrap(), NORMALIZED_MTIME);
        }

        let mut archive = tar::Archive::new(out.as_slice());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str().unwrap(), long_path);
        assert_eq!(entry.header().mtime().unwrap(), NORMALIZED_MTIME);
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"data");
        drop(entry);
        assert!(entries.next().is_none());
    }

    #[test]
    fn empty_input_is_clean_end() {
        let mut out = Vec::new();
        let stats = normalize_tar(io::empty(), &mut out).unwrap();
        assert_eq!(stats.entries, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn corrupt_first_header_writes_nothing() {
        let mut input = tar_fixture(7, &[("x", b"12345")]);
        // Break the checksum of the first header.
        input[148] ^= 0x01;
        let mut out = Vec::new();
        assert!(normalize_tar(input.as_slice(), &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let input = tar_fixture(7, &[("big", &[b'z'; 2048])]);
        // Directory header, file header, then only part of the payload.
        let cut = &input[..512 + 512 + 1000];
        let mut out = Vec::new();
        assert!(normalize_tar(cut, &mut out).is_err());
    }

    #[test]
    fn padding_sizes() {
        let mut out = Vec::new();
        write_padding(&mut out, 512).unwrap();
        assert!(out.is_empty());
        write_padding(&mut out, 1).unwrap();
        assert_eq!(out.len(), 511);
    }
}
