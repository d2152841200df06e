//! Superimposed n-gram coding of signature fields.
//!
//! Every included field contributes its leading and trailing characters
//! (tagged with the field number) and each interior three-character window
//! of non-blank bytes. Each n-gram hashes to one of the signature planes.

use crate::spec::FieldSpec;
use crate::utils::CaseMap;

/// Tag mixed with the first character of a field.
const LEADING: u8 = 31;
/// Tag mixed with the last character of a field.
const TRAILING: u8 = 30;

/// Plane selected by three small values.
#[inline]
pub fn axhash(h1: u32, h2: u32, h3: u32, slot_count: usize) -> usize {
    let code = ((h1 & 0x1F) << 10) | ((h2 & 0x1F) << 5) | (h3 & 0x1F);
    code as usize % slot_count
}

#[derive(Debug, Clone)]
pub struct SignatureHasher {
    fields: Vec<FieldSpec>,
    slot_count: usize,
    /// None hashes bytes as they are.
    fold: Option<CaseMap>,
}

impl SignatureHasher {
    pub fn new(fields: &[FieldSpec], slot_count: usize, fold: Option<CaseMap>) -> Self {
        Self {
            fields: fields.to_vec(),
            slot_count,
            fold,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Plane of one interior window.
    pub fn trigram_slot(&self, window: [u8; 3]) -> usize {
        let [c1, c2, c3] = window.map(|b| self.fold_byte(b) as u32);
        axhash(c1, c2, c3, self.slot_count)
    }

    /// Hash every included field of `record`, which must already be padded
    /// to the high-water length. Folds the field bytes in place.
    pub fn hash_record(&self, record: &mut [u8], mut emit: impl FnMut(usize)) {
        for (index, field) in self.fields.iter().enumerate() {
            if field.exclude {
                continue;
            }
            let bytes = &mut record[field.offset..field.end()];
            if let Some(map) = &self.fold {
                map.fold_in_place(bytes);
            }
            self.hash_field(index, bytes, &mut emit);
        }
    }

    /// Planes set for field number `field` holding `text`, sorted.
    pub fn field_slots(&self, field: usize, text: &[u8]) -> Vec<usize> {
        let mut bytes = text.to_vec();
        if let Some(map) = &self.fold {
            map.fold_in_place(&mut bytes);
        }
        let mut slots = Vec::new();
        if !bytes.is_empty() {
            self.hash_field(field, &bytes, &mut |slot| slots.push(slot));
        }
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    fn fold_byte(&self, b: u8) -> u8 {
        self.fold.as_ref().map_or(b, |map| map.fold(b))
    }

    fn hash_field(&self, index: usize, field: &[u8], emit: &mut impl FnMut(usize)) {
        let z = self.slot_count;
        let index = index as u32;
        // Offset of the last byte
        let n = field.len() - 1;

        let first = field[0];
        if first != b' ' {
            emit(axhash(index, LEADING as u32, first as u32, z));
            if n > 1 && field[1] != b' ' {
                emit(axhash(index, first as u32, field[1] as u32, z));
            }
        }

        let last = field[n];
        if n > 0 && last != b' ' {
            emit(axhash(index, TRAILING as u32, last as u32, z));
            if n > 1 && field[n - 1] != b' ' {
                emit(axhash(index, field[n - 1] as u32, last as u32, z));
            }
        }

        if n > 2 {
            let mut at = 0;
            while at < n - 1 {
                let c1 = field[at];
                at += 1;
                if c1 == b' ' {
                    continue;
                }
                let c2 = field[at];
                if c2 == b' ' {
                    at += 1;
                    continue;
                }
                let c3 = field[at + 1];
                if c3 == b' ' {
                    at += 2;
                } else {
                    emit(axhash(c1 as u32, c2 as u32, c3 as u32, z));
                }
            }
        }
    }
}
