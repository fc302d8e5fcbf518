//! Single-container extraction: detect, decode, filter, unpack, write.
//!
//! ```no_run
//! use scalpel::extract::{extract, ExtractOptions};
//!
//! let opts = ExtractOptions { dest: "out".into(), long: true, ..Default::default() };
//! let bytes = std::fs::read("logs.batch")?;
//! let summary = extract("logs.batch", &bytes, &opts, &mut std::io::stdout())?;
//! println!("{} of {} entries written", summary.written, summary.entries);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::container::{walk, Entry};
use crate::detect::detect;
use crate::encoding::NameEncoding;
use crate::envelope;
use crate::error::Error;

/// Permissions of extracted files.
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

// ── ExtractOptions ───────────────────────────────────────────────────────────

/// Configuration for one extraction run.  Never mutated by the pipeline.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub dest:     PathBuf,
    /// Overwrite files that already exist at the destination.
    pub force:    bool,
    /// Inflate gzip-compressed log envelopes before writing.
    pub unpack:   bool,
    /// Dry run: report what would be written, touch nothing.
    pub test:     bool,
    /// Append the content length to every report line.
    pub long:     bool,
    /// Entry name regexes; an entry is kept if it matches any of them.
    pub patterns: Vec<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            dest:     PathBuf::from("."),
            force:    false,
            unpack:   false,
            test:     false,
            long:     false,
            patterns: Vec::new(),
        }
    }
}

// ── ExtractSummary ───────────────────────────────────────────────────────────

/// What happened to one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub encoding: NameEncoding,
    /// Entries decoded.
    pub entries:  usize,
    /// Entries that passed the name filter.
    pub matched:  usize,
    /// Entries written (or reported, in a dry run).
    pub written:  usize,
    /// Matched entries left alone: destination exists or name is unsafe.
    pub skipped:  usize,
    /// Envelopes that were decompressed.
    pub unpacked: usize,
}

impl ExtractSummary {
    fn new(encoding: NameEncoding) -> Self {
        Self { encoding, entries: 0, matched: 0, written: 0, skipped: 0, unpacked: 0 }
    }
}

// ── NameFilter ───────────────────────────────────────────────────────────────

/// Compiled `--match` patterns.
///
/// With no patterns configured every name passes.  Patterns that do not
/// compile are dropped with a warning; if all of them are dropped, nothing
/// passes.
#[derive(Debug, Clone)]
pub struct NameFilter {
    matchers:   Vec<Regex>,
    configured: bool,
}

impl NameFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let matchers = patterns
            .iter()
            .filter_map(|p| {
                let pattern: &str = p.as_ref();
                match Regex::new(pattern) {
                    Ok(re) => Some(re),
                    Err(err) => {
                        warn!(pattern, error = %err, "Failed to compile regex");
                        None
                    }
                }
            })
            .collect();
        Self { matchers, configured: !patterns.is_empty() }
    }

    pub fn accepts(&self, name: &str) -> bool {
        !self.configured || self.matchers.iter().any(|re| re.is_match(name))
    }

    /// Number of patterns that compiled.
    pub fn active(&self) -> usize {
        self.matchers.len()
    }
}

// ── Entry writer ─────────────────────────────────────────────────────────────

enum Outcome {
    Written,
    Skipped,
}

/// Writes (or, in a dry run, only reports) one entry at a time.
struct EntryWriter<'r, W: Write> {
    opts:   &'r ExtractOptions,
    report: &'r mut W,
}

impl<'r, W: Write> EntryWriter<'r, W> {
    /// Creates the destination directory for real runs.
    fn new(opts: &'r ExtractOptions, report: &'r mut W) -> Result<Self, Error> {
        if !opts.test {
            fs::create_dir_all(&opts.dest).map_err(|e| Error::io(&opts.dest, e))?;
        }
        Ok(Self { opts, report })
    }

    fn write(&mut self, name: &str, content: &[u8], summary: &mut ExtractSummary) -> Result<Outcome, Error> {
        if self.opts.test {
            let Some(path) = destination(&self.opts.dest, name) else {
                return Ok(Outcome::Skipped);
            };
            self.report_line(&path, content.len())?;
            return Ok(Outcome::Written);
        }

        let (content, name) = if self.opts.unpack {
            let (content, new_name) = envelope::unpack(content, name);
            if matches!(content, Cow::Owned(_)) {
                summary.unpacked += 1;
            }
            (content, new_name)
        } else {
            (Cow::Borrowed(content), Cow::Borrowed(name))
        };

        let Some(path) = destination(&self.opts.dest, &name) else {
            return Ok(Outcome::Skipped);
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        if !write_file(&path, &content, self.opts.force).map_err(|e| Error::io(&path, e))? {
            warn!(path = %path.display(), "File already exists");
            return Ok(Outcome::Skipped);
        }
        self.report_line(&path, content.len())?;
        Ok(Outcome::Written)
    }

    fn report_line(&mut self, path: &Path, len: usize) -> Result<(), Error> {
        let written = if self.opts.long {
            writeln!(self.report, "{}\t{}", path.display(), len)
        } else {
            writeln!(self.report, "{}", path.display())
        };
        written.map_err(Error::Report)
    }
}

/// Join `name` onto `dest`, refusing names that would escape it.
fn destination(dest: &Path, name: &str) -> Option<PathBuf> {
    let rel = Path::new(name);
    let mut components = rel.components();
    let safe = components.clone().any(|c| matches!(c, Component::Normal(_)))
        && components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        warn!(name, "Refusing to extract entry outside the destination");
        return None;
    }
    Some(dest.join(rel))
}

/// Write `bytes` to `path`.  Returns `false`, leaving the file untouched, if
/// it already exists and `force` is not set.
fn write_file(path: &Path, bytes: &[u8], force: bool) -> io::Result<bool> {
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }

    let mut file = match options.open(path) {
        Ok(f) => f,
        Err(e) if !force && e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };
    file.write_all(bytes)?;
    Ok(true)
}

// ── extract ──────────────────────────────────────────────────────────────────

/// Run the whole pipeline over one in-memory container.
///
/// `name` identifies the container in logs only.  Report lines go to
/// `report`: one per written entry, `path` or `path\tlength`.
pub fn extract<W: Write>(
    name:    &str,
    content: &[u8],
    opts:    &ExtractOptions,
    report:  &mut W,
) -> Result<ExtractSummary, Error> {
    debug!(batch = name, "Extracting");
    let encoding = detect(content)?;
    info!(batch = name, %encoding, "Detected batch");

    let filter = NameFilter::new(&opts.patterns);
    let mut writer = EntryWriter::new(opts, report)?;
    let mut summary = ExtractSummary::new(encoding);

    let mut sink = |entry: Entry<'_>| -> Result<(), Error> {
        summary.entries += 1;
        if !filter.accepts(&entry.name) {
            return Ok(());
        }
        summary.matched += 1;
        match writer.write(&entry.name, entry.content, &mut summary)? {
            Outcome::Written => {
                summary.written += 1;
                info!("\t{}", entry.name);
            }
            Outcome::Skipped => summary.skipped += 1,
        }
        Ok(())
    };
    walk(content, encoding, Some(&mut sink))?;

    debug!(batch = name, entries = summary.entries, written = summary.written, "Finished batch");
    Ok(summary)
}
