//! Shared record generators for the integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Length of a generated fixed record, not counting the newline.
pub const FIXED_LEN: usize = 24;

pub fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// First key field of record `i`: a permutation of 0..n, so keys arrive
/// out of order.
pub fn account(i: usize, n: usize) -> String {
    format!("{:06}", (i * 7919) % n)
}

/// Fixed records `AAAAAA|pad|KKKKKK|filler` with the key split across
/// bytes 0..6 and 10..16.
pub fn fixed_record(first: &str, second: &str) -> String {
    let record = format!("{first}:::{second:>7}-{:<7}", "rec");
    assert_eq!(record.len(), FIXED_LEN, "record layout drifted: {record:?}");
    record
}

/// `n` fixed-length records with unique 12-byte keys.
pub fn unique_records(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| fixed_record(&account(i, n), &format!("K{:05}", i % 100_000)))
        .collect()
}

/// `n` records of which the last `dups` repeat the key of an earlier one.
pub fn records_with_duplicates(n: usize, dups: usize) -> Vec<String> {
    let mut records = unique_records(n - dups);
    let copies: Vec<String> = records[..dups].to_vec();
    records.extend(copies);
    records
}

/// Records terminated by `\r\n`.
pub fn join_crlf_lines(records: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        out.extend_from_slice(record.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

pub fn join_lines(records: &[String]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * (FIXED_LEN + 1));
    for record in records {
        out.extend_from_slice(record.as_bytes());
        out.push(b'\n');
    }
    out
}

/// Composite key of a generated fixed record: bytes 0..6 then 10..16.
pub fn composite_key(record: &str) -> Vec<u8> {
    let bytes = record.as_bytes();
    let mut key = bytes[0..6].to_vec();
    key.extend_from_slice(&bytes[10..16]);
    key
}

const WORDS: [&str; 12] = [
    "harbor", "lantern", "quartz", "meadow", "copper", "violet", "summit", "falcon", "ember",
    "willow", "glacier", "orchid",
];

/// Text records of exactly `width` bytes: a name field and a city field.
pub fn text_records(n: usize, width: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let name = format!("{} {}", WORDS[i % WORDS.len()], WORDS[(i / 7) % WORDS.len()]);
            let city = format!("{}{:04}", WORDS[(i * 5 + 3) % WORDS.len()], i);
            format!("{:<half$}{:<rest$}", name, city, half = width / 2, rest = width - width / 2)
        })
        .collect()
}
