use crate::error::{BuildError, Result};
use crate::index::pool::BufferPool;
use crate::index::reclaim::FreeList;
use crate::index::types::{TreeGeometry, TreeSummary};
use crate::index::writer::{BTreeWriter, InsertOutcome};
use crate::record::{
    KeyExtractor, MmapRecordReader, Record, RecordSource, Selector, first_record_length,
};
use crate::request::BuildContext;
use crate::sort::{MergeSort, RecordSort};
use crate::spec::IndexSpec;
use crate::spec::header::{IsiHeader, IsiPointers};
use crate::utils::progress::phase_spinner;
use crate::utils::{encode_pointer, read_decimal};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Width of the ASCII position in front of each key-tag record.
pub const KEY_TAG_WIDTH: usize = 12;

/// What an ISI build produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexBuildSummary {
    pub records_read: u64,
    pub keys: u64,
    pub duplicates: u64,
    /// Deleted source records recorded in the free chain.
    pub deleted: u64,
    pub tree: TreeSummary,
    pub blocks: u64,
    pub spilled_runs: usize,
}

/// Build a B-tree index of `input` into `output`.
pub fn build_index(
    input: &Path,
    output: &Path,
    spec: &IndexSpec,
    ctx: &BuildContext,
) -> Result<IndexBuildSummary> {
    let opts = &spec.options;
    let work_dir = opts.work_path.as_deref().or(ctx.work_dir.as_deref());
    let mut sort = MergeSort::new(opts.memory_kb.unwrap_or(ctx.sort_memory_kb), work_dir);
    let mut summary = build_index_with(input, output, spec, ctx, &mut sort)?;
    summary.spilled_runs = sort.spilled_runs();
    Ok(summary)
}

/// Build with a caller-supplied sort.
pub fn build_index_with(
    input: &Path,
    output: &Path,
    spec: &IndexSpec,
    ctx: &BuildContext,
    sort: &mut dyn RecordSort,
) -> Result<IndexBuildSummary> {
    let source_name = input.to_string_lossy();
    spec.validate(&source_name)?;
    let opts = &spec.options;
    let block_size = opts.block_size;

    // Key-tag records carry their own position; the source is not read
    let key_tag = opts.key_tag_file.is_some();
    let mut tag_length = 0;
    let mut source = match &opts.key_tag_file {
        Some(tags) => {
            let mut reader = MmapRecordReader::open(tags)?;
            let len = first_record_length(&mut reader)?
                .ok_or_else(|| BuildError::bad_argument("Key-tag file is empty"))?;
            if len <= KEY_TAG_WIDTH {
                return Err(BuildError::Record(format!(
                    "key-tag record length {len} leaves no key"
                )));
            }
            tag_length = len;
            reader.with_fixed_length(len)
        }
        None => MmapRecordReader::open(input)?,
    };

    let mut fixed_length = None;
    if opts.fixed && !key_tag {
        let len = match opts.fixed_length {
            Some(len) => len,
            None => first_record_length(&mut source)?.ok_or_else(|| {
                BuildError::bad_argument("Unable to determine record length of an empty file")
            })?,
        };
        source = source.with_fixed_length(len);
        fixed_length = Some(len);
    }

    let key_size = if key_tag {
        tag_length - KEY_TAG_WIDTH
    } else {
        spec.key_length()
    };
    let geometry = TreeGeometry::new(block_size, key_size)?;

    let header = IsiHeader {
        block_size,
        text_marker: opts.text_marker,
        allow_duplicates: opts.allow_duplicates,
        fixed_length,
        key_size,
    }
    .encode(&source_name, &spec.stored_arguments())?;

    let mut out = File::create(output).map_err(|e| BuildError::create(output, e))?;
    out.write_all(&header).map_err(BuildError::Write)?;
    info!(output = %output.display(), block_size, key_size, "building index");

    // Sort records are `collated key ++ position ++ key` when a collation
    // is configured, else `key ++ position`
    let size1 = geometry.entry_size;
    let collation = ctx.collation.as_ref();
    let record_size = if collation.is_some() { size1 + key_size } else { size1 };
    sort.begin(record_size, &[0..size1])?;

    let mut summary = IndexBuildSummary::default();
    let mut free = FreeList::new(block_size, 0);
    let selector = Selector::new(&spec.predicates, opts.invert_selection);
    let mut extractor = KeyExtractor::new(&spec.fields);
    let mut key = Vec::with_capacity(key_size);
    let mut sort_record = vec![0u8; record_size];

    let spinner = phase_spinner("Reading records", ctx.show_progress);
    loop {
        let position = match source.next_record()? {
            Record::Eof => {
                if opts.strict_eof && source.last_position() < source.eof_position() {
                    return Err(BuildError::UnexpectedEof);
                }
                break;
            }
            Record::Deleted => {
                if fixed_length.is_some() {
                    free.push(&mut out, source.last_position())?;
                }
                continue;
            }
            Record::Data(rec) => {
                if rec.is_empty() {
                    warn!(offset = source.last_position(), "ignoring zero length record");
                    continue;
                }
                if !selector.selects(rec) {
                    continue;
                }
                key.clear();
                if key_tag {
                    key.extend_from_slice(&rec[KEY_TAG_WIDTH..]);
                    read_decimal(&rec[..KEY_TAG_WIDTH]).ok_or_else(|| {
                        BuildError::Record("key-tag record without a position".into())
                    })?
                } else {
                    extractor.extract(rec, &mut key);
                    source.last_position()
                }
            }
        };

        match collation {
            Some(table) => {
                table.map_into(&key, &mut sort_record[..key_size]);
                sort_record[size1..].copy_from_slice(&key);
            }
            None => sort_record[..key_size].copy_from_slice(&key),
        }
        encode_pointer(position, &mut sort_record[key_size..size1]);
        sort.put(&sort_record)?;
        summary.records_read += 1;
        spinner.inc(1);
    }
    spinner.finish_and_clear();
    free.finish(&mut out)?;
    summary.deleted = free.count();
    debug!(
        records = summary.records_read,
        deleted = summary.deleted,
        "input phase complete"
    );

    let mut duplicates = match &opts.duplicate_file {
        Some(path) => Some(BufWriter::new(
            File::create(path).map_err(|e| BuildError::create(path, e))?,
        )),
        None => None,
    };

    let pool = BufferPool::new(out, block_size, free.high_water());
    let mut writer = BTreeWriter::new(pool, geometry, collation, opts.allow_duplicates);
    let mut entry = vec![0u8; size1];
    let spinner = phase_spinner("Inserting keys", ctx.show_progress);
    while let Some(rec) = sort.get()? {
        let rec: &[u8] = if collation.is_some() {
            entry[..key_size].copy_from_slice(&rec[size1..]);
            entry[key_size..].copy_from_slice(&rec[key_size..size1]);
            &entry
        } else {
            rec
        };
        if writer.insert(rec)? == InsertOutcome::Duplicate {
            summary.duplicates += 1;
            let dup_key = &rec[..key_size];
            debug!(key = %String::from_utf8_lossy(dup_key), "duplicate key");
            if let Some(file) = duplicates.as_mut() {
                file.write_all(dup_key)
                    .and_then(|_| file.write_all(b"\n"))
                    .map_err(BuildError::Write)?;
            }
        }
        spinner.inc(1);
    }
    spinner.finish_and_clear();
    sort.end()?;

    if let Some(mut file) = duplicates {
        file.flush().map_err(BuildError::Write)?;
    }

    let (tree, mut out) = writer.finish()?;
    let pointers = IsiPointers {
        delete_chain: free.head(),
        top_block: tree.top_block,
        high_block: tree.high_block,
    };
    out.seek(SeekFrom::Start(0))
        .and_then(|_| out.write_all(&pointers.encode()))
        .map_err(BuildError::Write)?;
    out.sync_all().map_err(BuildError::Close)?;

    summary.keys = tree.keys;
    summary.blocks = tree.high_block / block_size as u64;
    summary.tree = tree;
    info!(
        keys = summary.keys,
        height = tree.height,
        blocks = summary.blocks,
        "index complete"
    );

    if summary.duplicates > 0 {
        warn!(count = summary.duplicates, "duplicate keys found");
        if !opts.ignore_duplicates {
            return Err(BuildError::DuplicateKeys { count: summary.duplicates });
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::index::reader::IndexReader;
    use crate::spec::{FieldSpec, IndexOptions};
    use std::io::Write as _;

    fn write_source(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    fn spec(fields: Vec<FieldSpec>, options: IndexOptions) -> IndexSpec {
        IndexSpec { fields, options, ..Default::default() }
    }

    #[test]
    fn test_small_build_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_source(dir.path(), "src.txt", b"delta 4\nalpha 1\ncharl 3\nbravo 2\n");
        let output = dir.path().join("src.isi");
        let spec = spec(vec![FieldSpec::new(0, 5)], IndexOptions::default());
        let summary = build_index(&input, &output, &spec, &BuildContext::default()).unwrap();
        assert_eq!(summary.keys, 4);
        assert_eq!(summary.tree.height, 1);

        let reader = IndexReader::open(&output).unwrap();
        let entries = reader.entries().unwrap();
        let keys: Vec<&[u8]> = entries.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![&b"alpha"[..], b"bravo", b"charl", b"delta"]);
        // "alpha" is the second line
        assert_eq!(entries[0].position, 8);
    }

    #[test]
    fn test_duplicates_reported_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_source(dir.path(), "dup.txt", b"aa\nbb\naa\ncc\nbb\n");
        let output = dir.path().join("dup.isi");
        let spec = spec(vec![FieldSpec::new(0, 2)], IndexOptions::default());
        let err = build_index(&input, &output, &spec, &BuildContext::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKeys);
        assert!(matches!(err, BuildError::DuplicateKeys { count: 2 }));
        // The index itself is complete
        assert_eq!(IndexReader::open(&output).unwrap().entries().unwrap().len(), 3);
    }

    #[test]
    fn test_duplicate_side_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_source(dir.path(), "dup.txt", b"aa\nbb\naa\n");
        let output = dir.path().join("dup.isi");
        let dups = dir.path().join("dups.txt");
        let options = IndexOptions {
            ignore_duplicates: true,
            duplicate_file: Some(dups.clone()),
            ..Default::default()
        };
        let summary = build_index(
            &input,
            &output,
            &spec(vec![FieldSpec::new(0, 2)], options),
            &BuildContext::default(),
        )
        .unwrap();
        assert_eq!(summary.duplicates, 1);
        assert_eq!(std::fs::read(&dups).unwrap(), b"aa\n");
    }

    #[test]
    fn test_fixed_mode_records_deleted_positions() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_source(
            dir.path(),
            "fix.txt",
            b"k1xx\n\xff\xff\xff\xff\nk2xx\n\x7f\x7f\x7f\x7f\n",
        );
        let output = dir.path().join("fix.isi");
        let options = IndexOptions { fixed: true, ..Default::default() };
        let summary = build_index(
            &input,
            &output,
            &spec(vec![FieldSpec::new(0, 2)], options),
            &BuildContext::default(),
        )
        .unwrap();
        assert_eq!(summary.deleted, 2);
        assert_eq!(summary.keys, 2);

        let reader = IndexReader::open(&output).unwrap();
        assert_eq!(reader.header().fixed_length, Some(4));
        assert_eq!(reader.deleted_positions().unwrap(), vec![5, 15]);
    }

    #[test]
    fn test_fixed_mode_empty_file_needs_length() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_source(dir.path(), "empty.txt", b"");
        let output = dir.path().join("empty.isi");
        let options = IndexOptions { fixed: true, ..Default::default() };
        let err = build_index(
            &input,
            &output,
            &spec(vec![FieldSpec::new(0, 2)], options),
            &BuildContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadArgument);
        assert!(!output.exists());
    }

    #[test]
    fn test_empty_input_finalizes_header() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_source(dir.path(), "empty.txt", b"");
        let output = dir.path().join("empty.isi");
        let summary = build_index(
            &input,
            &output,
            &spec(vec![FieldSpec::new(0, 2)], IndexOptions::default()),
            &BuildContext::default(),
        )
        .unwrap();
        assert_eq!(summary.keys, 0);
        let reader = IndexReader::open(&output).unwrap();
        assert_eq!(reader.pointers().top_block, 0);
        assert!(reader.entries().unwrap().is_empty());
    }

    #[test]
    fn test_key_tag_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_source(dir.path(), "data.txt", b"");
        let tags = write_source(dir.path(), "tags.txt", b"000000000300zeta\n000000000100beta\n");
        let output = dir.path().join("data.isi");
        let options = IndexOptions { key_tag_file: Some(tags), ..Default::default() };
        let summary = build_index(
            &input,
            &output,
            &spec(Vec::new(), options),
            &BuildContext::default(),
        )
        .unwrap();
        assert_eq!(summary.keys, 2);

        let entries = IndexReader::open(&output).unwrap().entries().unwrap();
        assert_eq!(entries[0].key, b"beta");
        assert_eq!(entries[0].position, 100);
        assert_eq!(entries[1].position, 300);
    }

    #[test]
    fn test_strict_eof() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_source(dir.path(), "eof.txt", b"aa\n\x1abb\n");
        let output = dir.path().join("eof.isi");
        let options = IndexOptions { strict_eof: true, ..Default::default() };
        let err = build_index(
            &input,
            &output,
            &spec(vec![FieldSpec::new(0, 2)], options),
            &BuildContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_collation_orders_and_merges_case() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_source(dir.path(), "case.txt", b"beta\nALPHA\nalpha\nGamma\n");
        let output = dir.path().join("case.isi");
        let ctx = BuildContext {
            collation: Some(crate::utils::Collation::from_order(b"", true)),
            ..Default::default()
        };
        let options = IndexOptions { ignore_duplicates: true, ..Default::default() };
        let summary = build_index(
            &input,
            &output,
            &spec(vec![FieldSpec::new(0, 4)], options),
            &ctx,
        )
        .unwrap();
        assert_eq!(summary.duplicates, 1);
        let entries = IndexReader::open(&output).unwrap().entries().unwrap();
        let keys: Vec<&[u8]> = entries.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![&b"ALPH"[..], b"beta", b"Gamm"]);
    }
}
