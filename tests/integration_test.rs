use scalpel::batch::{discover, extract_batches};
use scalpel::container::{walk, ContainerWriter};
use scalpel::envelope::{EnvelopeHeader, CAP_COMPRESSED_CONTENTS, ENVELOPE_HEADER_SIZE};
use scalpel::extract::{extract, ExtractOptions};
use scalpel::{decode_container, detect, Error, NameEncoding};
use flate2::write::GzEncoder;
use flate2::Compression;
use proptest::prelude::*;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

fn batch(encoding: NameEncoding, entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut w = ContainerWriter::new(Vec::new(), encoding).unwrap();
    for (name, content) in entries {
        w.add_entry(0, name, content).unwrap();
    }
    w.finish().unwrap()
}

fn compressed_envelope(plain: &[u8]) -> Vec<u8> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(plain).unwrap();
    let mut out = EnvelopeHeader::new(3, CAP_COMPRESSED_CONTENTS).to_bytes();
    out.extend(gz.finish().unwrap());
    out
}

#[test]
fn test_extract_single_entry() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("out");
    let opts = ExtractOptions { dest: dest.clone(), force: true, long: true, ..Default::default() };
    let buf = batch(NameEncoding::Windows, &[("a.log", b"hello")]);

    let mut report = Vec::new();
    let summary = extract("batch", &buf, &opts, &mut report).unwrap();

    let written = dest.join("a.log");
    assert_eq!(fs::read(&written).unwrap(), b"hello");
    assert_eq!(String::from_utf8(report).unwrap(), format!("{}\t5\n", written.display()));
    assert_eq!(summary.encoding, NameEncoding::Windows);
    assert_eq!(summary.written, 1);
}

#[test]
fn test_dry_run_matches_documented_report() {
    let opts = ExtractOptions { dest: "/out".into(), force: true, test: true, long: true, ..Default::default() };
    let buf = batch(NameEncoding::Windows, &[("a.log", b"hello")]);

    let mut report = Vec::new();
    extract("batch", &buf, &opts, &mut report).unwrap();
    assert_eq!(report, b"/out/a.log\t5\n");
}

#[cfg(unix)]
#[test]
fn test_extracted_files_are_0644() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let opts = ExtractOptions { dest: dir.path().to_path_buf(), ..Default::default() };
    let buf = batch(NameEncoding::Windows, &[("perm.log", b"x")]);
    extract("batch", &buf, &opts, &mut Vec::new()).unwrap();

    let mode = fs::metadata(dir.path().join("perm.log")).unwrap().permissions().mode();
    // The process umask may only remove bits.
    assert_eq!(mode & 0o7133, 0);
    assert_eq!(mode & 0o600, 0o600);
}

#[test]
fn test_overwrite_guard() {
    let dir = tempdir().unwrap();
    let existing = dir.path().join("a.log");
    fs::write(&existing, b"original").unwrap();
    let buf = batch(NameEncoding::Windows, &[("a.log", b"replacement"), ("b.log", b"new")]);

    let keep = ExtractOptions { dest: dir.path().to_path_buf(), ..Default::default() };
    let summary = extract("batch", &buf, &keep, &mut Vec::new()).unwrap();
    assert_eq!(fs::read(&existing).unwrap(), b"original");
    assert_eq!(fs::read(dir.path().join("b.log")).unwrap(), b"new");
    assert_eq!((summary.written, summary.skipped), (1, 1));

    let force = ExtractOptions { force: true, ..keep };
    extract("batch", &buf, &force, &mut Vec::new()).unwrap();
    assert_eq!(fs::read(&existing).unwrap(), b"replacement");
}

#[test]
fn test_unpack_inflates_and_renames() {
    let dir = tempdir().unwrap();
    let buf = batch(NameEncoding::Mac, &[
        ("SyncEngine-2024-01-01.odlgz", &compressed_envelope(b"line one\nline two\n")),
        ("notes.txt", b"not an envelope"),
    ]);
    let opts = ExtractOptions { dest: dir.path().to_path_buf(), unpack: true, ..Default::default() };

    let summary = extract("batch", &buf, &opts, &mut Vec::new()).unwrap();
    assert_eq!(summary.encoding, NameEncoding::Mac);
    assert_eq!(summary.unpacked, 1);

    let odl = fs::read(dir.path().join("SyncEngine-2024-01-01.odl")).unwrap();
    assert_eq!(&odl[ENVELOPE_HEADER_SIZE..], b"line one\nline two\n");
    assert!(!EnvelopeHeader::parse(&odl).unwrap().is_compressed());
    assert!(!dir.path().join("SyncEngine-2024-01-01.odlgz").exists());
    assert_eq!(fs::read(dir.path().join("notes.txt")).unwrap(), b"not an envelope");
}

#[test]
fn test_without_unpack_envelopes_are_written_verbatim() {
    let dir = tempdir().unwrap();
    let blob = compressed_envelope(b"data");
    let buf = batch(NameEncoding::Windows, &[("x.odlgz", &blob)]);
    let opts = ExtractOptions { dest: dir.path().to_path_buf(), ..Default::default() };

    extract("batch", &buf, &opts, &mut Vec::new()).unwrap();
    assert_eq!(fs::read(dir.path().join("x.odlgz")).unwrap(), blob);
}

#[test]
fn test_match_filters_entries() {
    let dir = tempdir().unwrap();
    let buf = batch(NameEncoding::Windows, &[("keep.odl", b"1"), ("drop.txt", b"2"), ("also.odl", b"3")]);
    let opts = ExtractOptions {
        dest:     dir.path().to_path_buf(),
        patterns: vec![r"\.odl$".into(), "(broken".into()],
        ..Default::default()
    };

    let summary = extract("batch", &buf, &opts, &mut Vec::new()).unwrap();
    assert_eq!((summary.entries, summary.matched), (3, 2));
    assert!(dir.path().join("keep.odl").exists());
    assert!(dir.path().join("also.odl").exists());
    assert!(!dir.path().join("drop.txt").exists());
}

#[test]
fn test_traversal_names_are_not_written() {
    let root = tempdir().unwrap();
    let dest = root.path().join("dest");
    let buf = batch(NameEncoding::Windows, &[("../escape.log", b"x"), ("sub/inner.log", b"y")]);
    let opts = ExtractOptions { dest: dest.clone(), ..Default::default() };

    let summary = extract("batch", &buf, &opts, &mut Vec::new()).unwrap();
    assert!(!root.path().join("escape.log").exists());
    assert_eq!(fs::read(dest.join("sub").join("inner.log")).unwrap(), b"y");
    assert_eq!((summary.written, summary.skipped), (1, 1));
}

#[test]
fn test_name_naming_the_destination_itself_is_skipped() {
    let dir = tempdir().unwrap();
    let buf = batch(NameEncoding::Windows, &[(".", b"x"), ("./", b"y"), ("after.log", b"z")]);
    let opts = ExtractOptions { dest: dir.path().to_path_buf(), force: true, ..Default::default() };

    let summary = extract("batch", &buf, &opts, &mut Vec::new()).unwrap();
    assert_eq!(fs::read(dir.path().join("after.log")).unwrap(), b"z");
    assert_eq!((summary.written, summary.skipped), (1, 2));
}

#[test]
fn test_out_of_bounds_content_fails_before_writing() {
    let dir = tempdir().unwrap();
    let mut buf = batch(NameEncoding::Windows, &[("a.log", b"hello")]);
    buf.truncate(buf.len() - 1);
    let opts = ExtractOptions { dest: dir.path().to_path_buf(), ..Default::default() };

    let err = extract("batch", &buf, &opts, &mut Vec::new()).unwrap_err();
    match err {
        Error::Unrecognized { attempts } => {
            assert!(matches!(attempts[0].1, Error::ContentOutOfBounds { declared: 5, remaining: 4 }));
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(!dir.path().join("a.log").exists());
}

#[test]
fn test_unsupported_version_is_a_format_error() {
    let mut buf = batch(NameEncoding::Windows, &[("a.log", b"hello")]);
    buf[0] = 1;
    let err = decode_container(&buf).unwrap_err();
    assert!(err.is_format_error());
    assert!(err.to_string().contains("Unsupported batch version: 1"));
}

#[test]
fn test_discovery_size_threshold() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("exactly.bin"), vec![0u8; 256]).unwrap();
    fs::write(dir.path().join("over.bin"), vec![0u8; 257]).unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested").join("deep.bin"), vec![0u8; 1000]).unwrap();

    let found = discover(&[dir.path()]);
    assert_eq!(found, vec![dir.path().join("nested").join("deep.bin"), dir.path().join("over.bin")]);

    assert!(discover(&[dir.path().join("exactly.bin")]).is_empty());
    assert_eq!(discover(&[dir.path().join("over.bin")]).len(), 1);
}

#[test]
fn test_bad_candidate_does_not_abort_batch() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let filler = vec![b'.'; 300];
    fs::write(input.path().join("a-garbage.bin"), vec![0xEEu8; 400]).unwrap();
    fs::write(input.path().join("b-good.batch"), batch(NameEncoding::Windows, &[("good.log", &filler)])).unwrap();

    let opts = ExtractOptions { dest: output.path().to_path_buf(), ..Default::default() };
    let mut report = Vec::new();
    let summary = extract_batches(&[input.path()], &opts, &mut report).unwrap();

    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.extracted, 1);
    assert!(!summary.is_failure());
    assert_eq!(fs::read(output.path().join("good.log")).unwrap(), filler);
    assert_eq!(String::from_utf8(report).unwrap(), format!("{}\n", output.path().join("good.log").display()));
}

#[test]
fn test_batch_of_only_garbage_is_a_failure() {
    let input = tempdir().unwrap();
    fs::write(input.path().join("junk"), vec![7u8; 512]).unwrap();
    let opts = ExtractOptions { test: true, ..Default::default() };
    let summary = extract_batches(&[input.path()], &opts, &mut Vec::new()).unwrap();
    assert!(summary.is_failure());
}

fn entries_strategy() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::vec(
        ("[a-zA-Z0-9_.-]{1,24}", prop::collection::vec(any::<u8>(), 0..64)),
        0..8,
    )
}

/// Content offsets computed independently of the decoder.
fn sliced<'a>(buf: &'a [u8], entries: &[(String, Vec<u8>)], width: usize) -> Vec<&'a [u8]> {
    let mut pos = 4;
    let mut out = Vec::new();
    for (name, content) in entries {
        let units = if width == 2 { name.encode_utf16().count() } else { name.chars().count() };
        pos += 2 + 4 + units * width + 8;
        out.push(&buf[pos..pos + content.len()]);
        pos += content.len();
    }
    assert_eq!(pos, buf.len());
    out
}

proptest! {
    #[test]
    fn prop_correct_encoding_reaches_clean_end(entries in entries_strategy()) {
        for encoding in NameEncoding::PRIORITY {
            let refs: Vec<(&str, &[u8])> = entries.iter().map(|(n, c)| (n.as_str(), c.as_slice())).collect();
            let buf = batch(encoding, &refs);
            prop_assert_eq!(walk(&buf, encoding, None).unwrap(), entries.len());
        }
    }

    #[test]
    fn prop_windows_decode_matches_slicing(entries in entries_strategy()) {
        let refs: Vec<(&str, &[u8])> = entries.iter().map(|(n, c)| (n.as_str(), c.as_slice())).collect();
        let buf = batch(NameEncoding::Windows, &refs);
        prop_assert_eq!(detect(&buf).unwrap(), NameEncoding::Windows);

        let (_, decoded) = decode_container(&buf).unwrap();
        let expected = sliced(&buf, &entries, 2);
        prop_assert_eq!(decoded.len(), expected.len());
        for ((entry, slice), (name, _)) in decoded.iter().zip(&expected).zip(&entries) {
            prop_assert_eq!(entry.content, *slice);
            prop_assert_eq!(&entry.name, name);
        }
    }

    #[test]
    fn prop_truncation_never_panics(entries in entries_strategy(), cut in any::<prop::sample::Index>()) {
        let refs: Vec<(&str, &[u8])> = entries.iter().map(|(n, c)| (n.as_str(), c.as_slice())).collect();
        let buf = batch(NameEncoding::Windows, &refs);
        let cut = cut.index(buf.len());
        let _ = decode_container(&buf[..cut]);
    }
}

#[test]
fn test_discover_accepts_mixed_inputs() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("one.bin");
    fs::write(&file, vec![1u8; 300]).unwrap();
    let inputs: Vec<&Path> = vec![file.as_path(), Path::new("/no/such/dir/scalpel")];
    assert_eq!(discover(&inputs), vec![file]);
}
