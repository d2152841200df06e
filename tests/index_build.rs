//! End-to-end B-tree builds through the public request API.

mod fixtures;

use fixtures::*;
use flatdex::index::{IndexReader, LEAF_TAG};
use flatdex::request::{BuildContext, BuildMode, BuildRequest, BuildSummary, execute};
use flatdex::spec::header::{IndexFormat, StoredHeader};
use flatdex::spec::{FieldSpec, IndexOptions, IndexSpec, parse_command};
use flatdex::utils::{AppConfig, decode_pointer};
use flatdex::{BuildError, ErrorKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

fn two_field_spec(options: IndexOptions) -> IndexSpec {
    IndexSpec {
        fields: vec![FieldSpec::new(0, 6), FieldSpec::new(10, 6)],
        options,
        ..Default::default()
    }
}

fn fixed_512() -> IndexOptions {
    IndexOptions {
        block_size: 512,
        fixed: true,
        ..Default::default()
    }
}

fn build(
    dir: &Path,
    records: &[String],
    options: IndexOptions,
) -> (PathBuf, Result<BuildSummary, BuildError>) {
    let input = write_file(dir, "accounts.dat", &join_lines(records));
    let output = dir.join("accounts.isi");
    let request = BuildRequest::new(
        BuildMode::BuildIndex(two_field_spec(options)),
        &input,
        &output,
    );
    let result = execute(&request, &BuildContext::default());
    (output, result)
}

#[test]
fn test_ten_thousand_fixed_records() {
    let dir = tempfile::tempdir().unwrap();
    let records = unique_records(10_000);
    let (output, result) = build(dir.path(), &records, fixed_512());
    let BuildSummary::Index(summary) = result.unwrap() else {
        panic!("expected an index summary");
    };
    assert_eq!(summary.keys, 10_000);
    assert_eq!(summary.duplicates, 0);

    let reader = IndexReader::open(&output).unwrap();
    assert_eq!(reader.header().key_size, 12);
    assert_eq!(reader.header().fixed_length, Some(FIXED_LEN));
    let top = reader.pointers().top_block;
    assert!(top >= 512 && top % 512 == 0);

    let walk = reader.verify(None).unwrap();
    assert_eq!(walk.entries.len(), 10_000);
    assert!(walk.height >= 2);

    // Every key present exactly once, pointing back at its own record
    let stride = (FIXED_LEN + 1) as u64;
    let mut seen = HashSet::new();
    for entry in &walk.entries {
        assert_eq!(entry.position % stride, 0);
        let record = &records[(entry.position / stride) as usize];
        assert_eq!(entry.key, composite_key(record));
        assert!(seen.insert(entry.key.clone()));
    }
}

#[test]
fn test_leaf_blocks_front_coded_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (output, result) = build(dir.path(), &unique_records(3000), fixed_512());
    result.unwrap();

    let data = std::fs::read(&output).unwrap();
    let geometry = IndexReader::open(&output).unwrap().geometry();
    let (size, size1) = (geometry.key_size, geometry.entry_size);
    let mut leaves = 0;
    for block in data.chunks(512).skip(1).filter(|b| b[0] == LEAF_TAG) {
        leaves += 1;
        let mut prev = block[1..1 + size].to_vec();
        let mut at = 1 + size1;
        while at < block.len() && block[at] != 0xFF {
            let prefix = block[at] as usize;
            assert!(prefix <= size);
            // The stored prefix is exactly what the keys share
            let mut key = prev[..prefix].to_vec();
            key.extend_from_slice(&block[at + 1..at + 1 + size - prefix]);
            let shared = key.iter().zip(&prev).take_while(|(a, b)| a == b).count();
            assert_eq!(shared, prefix);
            assert!(key > prev, "leaf keys out of order");
            let ptr_at = at + 1 + size - prefix;
            assert_eq!(decode_pointer(&block[ptr_at..ptr_at + 6]) % 25, 0);
            prev = key;
            at = ptr_at + 6;
        }
    }
    assert!(leaves > 1);
}

#[test]
fn test_fifty_duplicates_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (output, result) = build(dir.path(), &records_with_duplicates(10_000, 50), fixed_512());
    match result {
        Err(BuildError::DuplicateKeys { count }) => assert_eq!(count, 50),
        other => panic!("expected DuplicateKeys, got {other:?}"),
    }
    // The index is still complete
    let reader = IndexReader::open(&output).unwrap();
    assert_eq!(reader.entries().unwrap().len(), 9_950);
}

#[test]
fn test_duplicate_side_file_lists_each_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let side = dir.path().join("dups.txt");
    let options = IndexOptions {
        ignore_duplicates: true,
        duplicate_file: Some(side.clone()),
        ..fixed_512()
    };
    let records = records_with_duplicates(2_000, 50);
    let (_, result) = build(dir.path(), &records, options);
    let BuildSummary::Index(summary) = result.unwrap() else {
        panic!("expected an index summary");
    };
    assert_eq!(summary.duplicates, 50);

    let listed = std::fs::read_to_string(&side).unwrap();
    let lines: Vec<&str> = listed.lines().collect();
    assert_eq!(lines.len(), 50);
    let expected: HashSet<Vec<u8>> = records[..50].iter().map(|r| composite_key(r)).collect();
    for line in lines {
        assert!(expected.contains(line.as_bytes()));
    }
}

#[test]
fn test_duplicates_allowed_keep_every_record() {
    let dir = tempfile::tempdir().unwrap();
    let options = IndexOptions { allow_duplicates: true, ..fixed_512() };
    let (output, result) = build(dir.path(), &records_with_duplicates(1_000, 50), options);
    result.unwrap();
    let reader = IndexReader::open(&output).unwrap();
    assert_eq!(reader.verify(None).unwrap().entries.len(), 1_000);
}

#[test]
fn test_block_size_below_minimum_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("accounts.isi");
    let options = IndexOptions { block_size: 256, ..fixed_512() };
    let (_, result) = build(dir.path(), &unique_records(10), options);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::BadArgument);
    assert!(!output.exists());

    // The same through the argument parser
    let args: Vec<String> = ["accounts.dat", "1-6", "11-16", "-B=256"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let err = parse_command::<IndexOptions>(&args).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadArgument);
}

#[test]
fn test_tall_tree_stays_balanced() {
    let dir = tempfile::tempdir().unwrap();
    let records = unique_records(20_000);
    let (output, result) = build(dir.path(), &records, fixed_512());
    result.unwrap();
    let walk = IndexReader::open(&output).unwrap().verify(None).unwrap();
    // walk_tree rejects unbalanced subtrees, so a height is only reported
    // when every leaf sits at the same depth
    assert!(walk.height >= 3 && walk.height <= 32);
    assert!(walk.branch_blocks >= 2);
}

#[test]
fn test_configured_collation_orders_keys() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(dir.path(), "words.txt", b"beta\nAlpha\nalpha\nGamma\nbeta\n");
    let output = dir.path().join("words.isi");
    let config: AppConfig = serde_json::from_str(r#"{"collate_ignore_case": true}"#).unwrap();
    let ctx = BuildContext::from_config(&config, Default::default());
    let spec = IndexSpec {
        fields: vec![FieldSpec::new(0, 5)],
        options: IndexOptions { block_size: 512, ignore_duplicates: true, ..Default::default() },
        ..Default::default()
    };
    let summary = execute(
        &BuildRequest::new(BuildMode::BuildIndex(spec), &input, &output),
        &ctx,
    )
    .unwrap();
    let BuildSummary::Index(summary) = summary else {
        panic!("expected an index summary");
    };
    // "Alpha"/"alpha" and the two "beta" records collate equal
    assert_eq!(summary.duplicates, 2);

    let reader = IndexReader::open(&output).unwrap();
    let entries = reader.verify(ctx.collation.as_ref()).unwrap().entries;
    let keys: Vec<String> = entries.iter(
    )
    .map(|e| String::from_utf8_lossy(&e.key).trim_end().to_string()).collect();
    assert_eq!(keys.len(), 3);
    assert!(keys[0].eq_ignore_ascii_case("alpha"));
    assert_eq!(keys[1], "beta");
    assert_eq!(keys[2], "Gamma");
}

#[test]
fn test_header_records_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let (output, result) = build(dir.path(), &unique_records(100), fixed_512());
    result.unwrap();
    let stored = StoredHeader::read(&output, IndexFormat::Isi).unwrap();
    let (name, args) = stored.stored_arguments().unwrap();
    assert!(name.ends_with("accounts.dat"));
    assert_eq!(args[..2], ["1-6".to_string(), "11-16".to_string()]);
    assert!(args.contains(&"-B=512".to_string()));
}
