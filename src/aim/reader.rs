//! Read-only view of a finished signature file.

use crate::aim::hash::SignatureHasher;
use crate::error::{BuildError, Result};
use crate::spec::header::{AIM_HEADER_SIZE, AimHeader, AimOrganization, IndexFormat, StoredHeader};
use crate::spec::parse_stored;
use crate::spec::AimOptions;
use crate::utils::CaseMap;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

pub struct AimReader {
    map: Mmap,
    stored: StoredHeader,
    header: AimHeader,
    planes: usize,
    plane_size: usize,
    hasher: SignatureHasher,
}

impl AimReader {
    /// Open with the default case fold.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, CaseMap::default())
    }

    /// Open, folding query text with `case_map` unless the file is distinct.
    pub fn open_with(path: &Path, case_map: CaseMap) -> Result<Self> {
        let file = File::open(path).map_err(|e| BuildError::open(path, e))?;
        let map = unsafe { Mmap::map(&file).map_err(|e| BuildError::open(path, e))? };
        let head = map[..map.len().min(AIM_HEADER_SIZE)].to_vec();
        let stored = StoredHeader::from_bytes(head, IndexFormat::Aim)?;
        let header = AimHeader::decode(stored.as_bytes())?;

        let planes = header.slot_count + (header.organization == AimOrganization::Reclaim) as usize;
        let plane_size = (header.record_count / 8) as usize;
        if map.len() < AIM_HEADER_SIZE + planes * plane_size {
            return Err(BuildError::BadFile("Signature planes are truncated".into()));
        }

        // Field layout comes from the stored arguments
        let (name, arguments) = stored.stored_arguments()?;
        let spec = parse_stored::<AimOptions>(name.len(), &arguments)?;
        let fold = (!header.distinct).then_some(case_map);
        let hasher = SignatureHasher::new(&spec.fields, header.slot_count, fold);

        Ok(Self {
            map,
            stored,
            header,
            planes,
            plane_size,
            hasher,
        })
    }

    pub fn header(&self) -> &AimHeader {
        &self.header
    }

    pub fn stored_header(&self) -> &StoredHeader {
        &self.stored
    }

    pub fn record_count(&self) -> u64 {
        self.header.record_count
    }

    pub fn slot_count(&self) -> usize {
        self.header.slot_count
    }

    pub fn hasher(&self) -> &SignatureHasher {
        &self.hasher
    }

    fn plane(&self, slot: usize) -> &[u8] {
        let start = AIM_HEADER_SIZE + slot * self.plane_size;
        &self.map[start..start + self.plane_size]
    }

    pub fn is_set(&self, slot: usize, record: u64) -> bool {
        if slot >= self.planes || record >= self.header.record_count {
            return false;
        }
        self.plane(slot)[(record >> 3) as usize] & (1 << (record & 7)) != 0
    }

    /// Whether `record` is marked free in the reclaim plane.
    pub fn is_deleted(&self, record: u64) -> bool {
        self.header.organization == AimOrganization::Reclaim
            && self.is_set(self.header.slot_count, record)
    }

    /// Planes a record with `text` in field number `field` sets.
    pub fn reference_slots(&self, field: usize, text: &[u8]) -> Vec<usize> {
        self.hasher.field_slots(field, text)
    }

    /// Fraction of records with their bit set, per plane.
    pub fn plane_density(&self) -> Vec<f64> {
        let records = self.header.record_count.max(1) as f64;
        (0..self.planes)
            .map(|slot| {
                let ones: u32 = self.plane(slot).iter().map(|b| b.count_ones()).sum();
                ones as f64 / records
            })
            .collect()
    }
}
