//! Candidate discovery and multi-container runs.
//!
//! Every path given on the command line is either a file (a candidate if it
//! is large enough) or a directory walked recursively for such files.  Each
//! candidate is then extracted on its own: a file that is not a batch, or is
//! a corrupt one, is logged and skipped without affecting the rest.
//!
//! With the `parallel` feature candidates are extracted on the rayon pool.
//! Report output is still emitted per candidate, in discovery order.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Error;
use crate::extract::{extract, ExtractOptions, ExtractSummary};

/// Files of this size or smaller are never considered batches.
pub const MIN_CANDIDATE_SIZE: u64 = 256;

#[inline]
pub fn is_candidate_size(len: u64) -> bool {
    len > MIN_CANDIDATE_SIZE
}

// ── Discovery ────────────────────────────────────────────────────────────────

/// Expand `paths` into the list of candidate container files.
///
/// An empty list means the current directory.  Paths that cannot be
/// examined are skipped.  Directory contents are visited in name order.
pub fn discover<P: AsRef<Path>>(paths: &[P]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if paths.is_empty() {
        collect(Path::new("."), &mut out);
    }
    for path in paths {
        collect(path.as_ref(), &mut out);
    }
    debug!(count = out.len(), "Found potential batches");
    out
}

fn collect(path: &Path, out: &mut Vec<PathBuf>) {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Cannot examine path");
            return;
        }
    };
    if meta.is_dir() {
        walk_dir(path, out);
    } else if meta.is_file() && is_candidate_size(meta.len()) {
        out.push(path.to_path_buf());
    }
}

/// Symlinks inside the tree are not followed.
fn walk_dir(dir: &Path, out: &mut Vec<PathBuf>) {
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(path = ?err.path(), error = %err, "Cannot examine path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) if is_candidate_size(meta.len()) => out.push(entry.into_path()),
            Ok(meta) => debug!(path = %entry.path().display(), size = meta.len(), "Too small to be a batch"),
            Err(err) => warn!(path = %entry.path().display(), error = %err, "Cannot examine path"),
        }
    }
}

// ── BatchSummary ─────────────────────────────────────────────────────────────

/// Totals over one multi-container run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub candidates: usize,
    /// Candidates decoded and extracted without error.
    pub extracted:  usize,
    pub failed:     usize,
    /// Entries written (or reported) across all candidates.
    pub written:    usize,
}

impl BatchSummary {
    /// A run fails only when there was work and none of it succeeded.
    pub fn is_failure(&self) -> bool {
        self.candidates > 0 && self.extracted == 0
    }

    fn record(&mut self, path: &Path, result: Result<ExtractSummary, Error>) {
        match result {
            Ok(summary) => {
                self.extracted += 1;
                self.written += summary.written;
            }
            Err(err) => {
                self.failed += 1;
                warn!(path = %path.display(), error = %err, "Failed to extract");
            }
        }
    }
}

// ── Runs ─────────────────────────────────────────────────────────────────────

fn extract_candidate(path: &Path, opts: &ExtractOptions, report: &mut Vec<u8>) -> Result<ExtractSummary, Error> {
    let content = fs::read(path).map_err(|e| Error::io(path, e))?;
    extract(&path.to_string_lossy(), &content, opts, report)
}

/// Discover candidates under `paths` and extract each of them.
///
/// Only a failure to write to `out` is returned as an error; per-candidate
/// failures are logged and counted in the summary.
pub fn extract_batches<P, W>(paths: &[P], opts: &ExtractOptions, out: &mut W) -> io::Result<BatchSummary>
where
    P: AsRef<Path>,
    W: Write,
{
    let candidates = discover(paths);
    let mut summary = BatchSummary { candidates: candidates.len(), ..Default::default() };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        // Worker threads do not inherit the caller's scoped subscriber.
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        let results: Vec<(Vec<u8>, Result<ExtractSummary, Error>)> = candidates
            .par_iter()
            .map(|path| {
                tracing::dispatcher::with_default(&dispatch, || {
                    let mut report = Vec::new();
                    let result = extract_candidate(path, opts, &mut report);
                    (report, result)
                })
            })
            .collect();

        for (path, (report, result)) in candidates.iter().zip(results) {
            out.write_all(&report)?;
            summary.record(path, result);
        }
    }

    #[cfg(not(feature = "parallel"))]
    for path in &candidates {
        let mut report = Vec::new();
        let result = extract_candidate(path, opts, &mut report);
        out.write_all(&report)?;
        summary.record(path, result);
    }

    out.flush()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_threshold_is_exclusive() {
        assert!(!is_candidate_size(0));
        assert!(!is_candidate_size(MIN_CANDIDATE_SIZE));
        assert!(is_candidate_size(MIN_CANDIDATE_SIZE + 1));
    }

    #[test]
    fn summary_failure_needs_candidates() {
        assert!(!BatchSummary::default().is_failure());
        let all_failed = BatchSummary { candidates: 2, failed: 2, ..Default::default() };
        assert!(all_failed.is_failure());
        let one_ok = BatchSummary { candidates: 2, extracted: 1, failed: 1, written: 3 };
        assert!(!one_ok.is_failure());
    }

    #[test]
    fn missing_path_is_skipped() {
        let found = discover(&["/definitely/not/here/scalpel"]);
        assert!(found.is_empty());
    }

    #[test]
    fn directories_are_walked_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b").join("inner.bin"), vec![0u8; 300]).unwrap();
        fs::write(dir.path().join("a.bin"), vec![0u8; 300]).unwrap();
        fs::write(dir.path().join("c.bin"), vec![0u8; 300]).unwrap();
        fs::write(dir.path().join("tiny.bin"), vec![0u8; 10]).unwrap();

        let found = discover(&[dir.path()]);
        let expected = vec![
            dir.path().join("a.bin"),
            dir.path().join("b").join("inner.bin"),
            dir.path().join("c.bin"),
        ];
        assert_eq!(found, expected);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_inside_a_tree_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("big.bin"), vec![0u8; 300]).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("big.bin"), dir.path().join("file-link")).unwrap();

        assert!(discover(&[dir.path()]).is_empty());
    }
}
