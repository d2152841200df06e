//! Composite key extraction.

use crate::spec::FieldSpec;

/// Pads short records to the high-water length and copies key fields out.
#[derive(Debug, Clone)]
pub struct KeyExtractor {
    fields: Vec<FieldSpec>,
    high_water: usize,
    key_length: usize,
    padded: Vec<u8>,
}

impl KeyExtractor {
    /// Excluded fields count toward the high-water length but are never
    /// copied into a key.
    pub fn new(fields: &[FieldSpec]) -> Self {
        let high_water = fields.iter().map(FieldSpec::end).max().unwrap_or(0);
        let fields: Vec<FieldSpec> = fields.iter().copied().filter(|f| !f.exclude).collect();
        let key_length = fields.iter().map(|f| f.length).sum();
        Self {
            fields,
            high_water,
            key_length,
            padded: Vec::with_capacity(high_water),
        }
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    /// Append the composite key of `record` to `key`.
    pub fn extract(&mut self, record: &[u8], key: &mut Vec<u8>) {
        let source: &[u8] = if record.len() >= self.high_water {
            record
        } else {
            self.padded.clear();
            self.padded.extend_from_slice(record);
            self.padded.resize(self.high_water, b' ');
            &self.padded
        };
        for field in &self.fields {
            key.extend_from_slice(&source[field.offset..field.end()]);
        }
    }
}
