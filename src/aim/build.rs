use crate::aim::hash::SignatureHasher;
use crate::aim::planes::SignaturePlanes;
use crate::error::{BuildError, Result};
use crate::record::{MmapRecordReader, Record, RecordSource, Selector, first_record_length};
use crate::request::BuildContext;
use crate::spec::AimSpec;
use crate::spec::header::{AimHeader, AimOrganization};
use crate::utils::encode_pointer;
use crate::utils::progress::phase_spinner;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info};

/// Record length stored for variable-length sources.
pub const VARIABLE_RECORD_LENGTH: usize = 256;
const MIN_RECORD_COUNT: u64 = 128;

/// What an AIM build produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AimBuildSummary {
    pub records_read: u64,
    pub records_indexed: u64,
    pub deleted: u64,
    pub record_count: u64,
    pub slot_count: usize,
    pub passes: usize,
}

/// Map source offsets to record numbers.
#[derive(Debug, Clone, Copy)]
enum Numbering {
    /// Fixed records of this many bytes including the terminator.
    Fixed(u64),
    Variable,
}

impl Numbering {
    fn record(self, position: u64) -> u64 {
        match self {
            Numbering::Fixed(stride) => position / stride,
            Numbering::Variable if position == 0 => 0,
            Numbering::Variable => (position - 1) / VARIABLE_RECORD_LENGTH as u64,
        }
    }
}

/// Record count the planes are sized for, rounded up to a multiple of 32.
pub fn plan_record_count(actual: u64, primary: Option<u64>, add_primary: bool) -> u64 {
    let mut count = actual.max(MIN_RECORD_COUNT);
    match primary {
        Some(extra) if add_primary => count = count.saturating_add(extra),
        Some(floor) => count = count.max(floor),
        None => {}
    }
    count.checked_next_multiple_of(32).unwrap_or(u64::MAX & !31)
}

/// Build an AIM signature file of `input` into `output`.
pub fn build_signature(
    input: &Path,
    output: &Path,
    spec: &AimSpec,
    ctx: &BuildContext,
) -> Result<AimBuildSummary> {
    let source_name = input.to_string_lossy();
    spec.validate(&source_name)?;
    let opts = &spec.options;
    let z = opts.slot_count;

    let mut source = MmapRecordReader::open(input)?;
    let eof = source.eof_position();
    let (numbering, record_length, actual) = if opts.fixed {
        let first = first_record_length(&mut source)?;
        let len = match (opts.record_length, first) {
            (Some(len), Some(found)) if len != found => {
                return Err(BuildError::Record(format!(
                    "record length {found} does not match -F={len}"
                )));
            }
            (Some(len), _) => len,
            (None, Some(found)) => found,
            (None, None) => {
                return Err(BuildError::bad_argument(
                    "Unable to determine record length of an empty file",
                ));
            }
        };
        // The first record's terminator decides; the file size only when it has none
        let stride = match source.terminator_width()? {
            Some(width) => Some((len + width) as u64).filter(|stride| eof % stride == 0),
            None => [len as u64 + 1, len as u64 + 2]
                .into_iter()
                .find(|stride| eof % stride == 0),
        }
        .ok_or_else(|| {
            BuildError::Record(format!(
                "file size {eof} is not a multiple of record length {len}"
            ))
        })?;
        source = source.with_fixed_length(len);
        (Numbering::Fixed(stride), len, eof / stride)
    } else {
        (Numbering::Variable, VARIABLE_RECORD_LENGTH, (eof >> 8) + 1)
    };
    let record_count = plan_record_count(actual, opts.primary_records, opts.add_primary);

    let memory_kb = opts.memory_kb.unwrap_or(ctx.aim_memory_kb);
    let mut planes = SignaturePlanes::new(
        record_count,
        z + opts.reclaim as usize,
        memory_kb * 1024,
    )?;

    let organization = match (opts.reclaim, opts.fixed) {
        (true, _) => AimOrganization::Reclaim,
        (false, true) => AimOrganization::Fixed,
        (false, false) => AimOrganization::Variable,
    };
    let header = AimHeader {
        slot_count: z,
        record_length,
        text_marker: opts.text_marker,
        distinct: opts.distinct,
        wildcard: opts.wildcard,
        organization,
        record_count,
        secondary_records: opts.secondary_records,
        first_deleted: 0,
    }
    .encode(&source_name, &spec.stored_arguments())?;

    let mut out = File::create(output).map_err(|e| BuildError::create(output, e))?;
    out.write_all(&header).map_err(BuildError::Write)?;
    info!(
        output = %output.display(),
        record_count,
        slots = z,
        passes = planes.passes(),
        "building signature file"
    );

    let fold = (!opts.distinct).then(|| ctx.case_map.clone());
    let hasher = SignatureHasher::new(&spec.fields, z, fold);
    let selector = Selector::new(&spec.predicates, opts.invert_selection);
    let high_water = spec.high_water();
    let mut work = Vec::with_capacity(high_water);
    let mut summary = AimBuildSummary {
        record_count,
        slot_count: z,
        passes: planes.passes(),
        ..Default::default()
    };
    let mut first_deleted = None;

    let check = |record: u64| {
        if record >= record_count {
            Err(BuildError::BadFile(format!(
                "Record {record} exceeds the planned {record_count} records"
            )))
        } else {
            Ok(record)
        }
    };

    let spinner = phase_spinner("Hashing records", ctx.show_progress);
    loop {
        match source.next_record()? {
            Record::Eof => {
                if opts.strict_eof && source.last_position() < source.eof_position() {
                    return Err(BuildError::UnexpectedEof);
                }
                break;
            }
            Record::Deleted => {
                if !opts.reclaim {
                    continue;
                }
                let record = check(numbering.record(source.last_position()))?;
                first_deleted.get_or_insert(record + 1);
                planes.advance(&mut out, record)?;
                planes.set(z, record);
                summary.deleted += 1;
            }
            Record::Data(rec) => {
                summary.records_read += 1;
                if !selector.selects(rec) {
                    continue;
                }
                work.clear();
                work.extend_from_slice(rec);
                if work.len() < high_water {
                    work.resize(high_water, b' ');
                }
                let record = check(numbering.record(source.last_position()))?;
                planes.advance(&mut out, record)?;
                hasher.hash_record(&mut work, |slot| planes.set(slot, record));
                summary.records_indexed += 1;
                spinner.inc(1);
            }
        }
    }
    spinner.finish_and_clear();
    planes.finish(&mut out)?;

    if let Some(first) = first_deleted {
        let mut field = [0u8; 6];
        encode_pointer(first, &mut field);
        out.seek(SeekFrom::Start(7))
            .and_then(|_| out.write_all(&field))
            .map_err(BuildError::Write)?;
    }
    out.seek(SeekFrom::Start(0))
        .and_then(|_| out.write_all(b"A"))
        .map_err(BuildError::Write)?;
    out.sync_all().map_err(BuildError::Close)?;

    debug!(
        read = summary.records_read,
        indexed = summary.records_indexed,
        deleted = summary.deleted,
        "signature input complete"
    );
    info!(records = summary.records_indexed, "aimdex complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aim::reader::AimReader;
    use crate::error::ErrorKind;
    use crate::spec::{AimOptions, FieldSpec};

    fn spec(fields: Vec<FieldSpec>, options: AimOptions) -> AimSpec {
        AimSpec { fields, options, ..Default::default() }
    }

    #[test]
    fn test_plan_record_count() {
        assert_eq!(plan_record_count(10, None, false), 128);
        assert_eq!(plan_record_count(130, None, false), 160);
        assert_eq!(plan_record_count(100, Some(1000), false), 1024);
        assert_eq!(plan_record_count(200, Some(50), true), 256);
        assert_eq!(plan_record_count(200, Some(u64::MAX), true), u64::MAX & !31);
    }

    #[test]
    fn test_variable_numbering() {
        assert_eq!(Numbering::Variable.record(0), 0);
        assert_eq!(Numbering::Variable.record(256), 0);
        assert_eq!(Numbering::Variable.record(257), 1);
        assert_eq!(Numbering::Fixed(11).record(33), 3);
    }

    #[test]
    fn test_fixed_build_sets_bits() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("names.txt");
        std::fs::write(&input, b"SMITH \nJONES \nbrown \n").unwrap();
        let output = dir.path().join("names.aim");
        let options = AimOptions { fixed: true, ..Default::default() };
        let summary = build_signature(
            &input,
            &output,
            &spec(vec![FieldSpec::new(0, 6)], options),
            &BuildContext::default(),
        )
        .unwrap();
        assert_eq!(summary.record_count, 128);
        assert_eq!(summary.records_indexed, 3);

        let reader = AimReader::open(&output).unwrap();
        assert_eq!(reader.header().record_length, 6);
        let slot = reader.hasher().trigram_slot(*b"ROW");
        assert!(reader.is_set(slot, 2));
        for slot in reader.reference_slots(0, b"JONES ") {
            assert!(reader.is_set(slot, 1));
        }
    }

    #[test]
    fn test_reclaim_plane() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("r.txt");
        std::fs::write(&input, b"AAA\n\xff\xff\xff\nBBB\n\x7f\x7f\x7f\n").unwrap();
        let output = dir.path().join("r.aim");
        let options = AimOptions { fixed: true, reclaim: true, ..Default::default() };
        let summary = build_signature(
            &input,
            &output,
            &spec(vec![FieldSpec::new(0, 3)], options),
            &BuildContext::default(),
        )
        .unwrap();
        assert_eq!(summary.deleted, 2);

        let reader = AimReader::open(&output).unwrap();
        assert_eq!(reader.header().first_deleted, 2);
        assert!(reader.is_deleted(1));
        assert!(reader.is_deleted(3));
        assert!(!reader.is_deleted(0));
    }

    #[test]
    fn test_bad_fixed_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("odd.txt");
        std::fs::write(&input, b"AAAA\nBBBB\nCCC").unwrap();
        let output = dir.path().join("odd.aim");
        let options = AimOptions { fixed: true, ..Default::default() };
        let err = build_signature(
            &input,
            &output,
            &spec(vec![FieldSpec::new(0, 2)], options),
            &BuildContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Read);
    }

    #[test]
    fn test_memory_too_small() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("v.txt");
        std::fs::write(&input, b"hello\n").unwrap();
        let output = dir.path().join("v.aim");
        let options = AimOptions { memory_kb: Some(1), slot_count: 2000, ..Default::default() };
        let err = build_signature(
            &input,
            &output,
            &spec(vec![FieldSpec::new(0, 5)], options),
            &BuildContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        assert!(!output.exists());
    }
}
