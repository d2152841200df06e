//! Byte collation and case folding tables.
//!
//! A [`Collation`] assigns every byte a priority; keys compare by the
//! priorities of their bytes, left to right. The same table must be used by
//! the sort and by duplicate detection so that "adjacent" and "equal" agree.
//!
//! A [`CaseMap`] folds bytes before signature hashing.

use std::cmp::Ordering;

/// Per-byte priority table used to order keys.
#[derive(Clone, PartialEq, Eq)]
pub struct Collation {
    priority: Box<[u8; 256]>,
}

impl std::fmt::Debug for Collation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collation").finish_non_exhaustive()
    }
}

impl Collation {
    /// Build a table from the bytes of `order`, listed lowest priority
    /// first. Bytes not listed follow in byte order. With `ignore_case`,
    /// ASCII lowercase letters take the priority of their uppercase form.
    pub fn from_order(order: &[u8], ignore_case: bool) -> Self {
        let fold = |b: u8| if ignore_case { b.to_ascii_uppercase() } else { b };

        let mut ranked = [false; 256];
        let mut sequence = Vec::with_capacity(256);
        for &b in order {
            let b = fold(b);
            if !ranked[b as usize] {
                ranked[b as usize] = true;
                sequence.push(b);
            }
        }
        for b in 0..=255u8 {
            if !ranked[b as usize] && fold(b) == b {
                ranked[b as usize] = true;
                sequence.push(b);
            }
        }

        let mut priority = Box::new([0u8; 256]);
        for (rank, &b) in sequence.iter().enumerate() {
            priority[b as usize] = rank as u8;
        }
        if ignore_case {
            for b in b'a'..=b'z' {
                priority[b as usize] = priority[b.to_ascii_uppercase() as usize];
            }
        }
        Self { priority }
    }

    #[inline]
    pub fn priority(&self, b: u8) -> u8 {
        self.priority[b as usize]
    }

    pub fn compare(&self, left: &[u8], right: &[u8]) -> Ordering {
        for (&l, &r) in left.iter().zip(right) {
            match self.priority(l).cmp(&self.priority(r)) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        left.len().cmp(&right.len())
    }

    /// Write the priority image of `src` into `dest`.
    ///
    /// Raw byte order over images equals collation order over sources.
    pub fn map_into(&self, src: &[u8], dest: &mut [u8]) {
        for (d, &s) in dest.iter_mut().zip(src) {
            *d = self.priority(s);
        }
    }
}

/// Compare two keys under an optional collation.
#[inline]
pub fn compare_keys(collation: Option<&Collation>, left: &[u8], right: &[u8]) -> Ordering {
    match collation {
        Some(c) => c.compare(left, right),
        None => left.cmp(right),
    }
}

/// Byte-to-byte fold applied to signature fields.
#[derive(Clone, PartialEq, Eq)]
pub struct CaseMap {
    map: Box<[u8; 256]>,
}

impl std::fmt::Debug for CaseMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseMap").finish_non_exhaustive()
    }
}

impl Default for CaseMap {
    fn default() -> Self {
        let mut map = Box::new([0u8; 256]);
        for (i, slot) in map.iter_mut().enumerate() {
            *slot = (i as u8).to_ascii_uppercase();
        }
        Self { map }
    }
}

impl CaseMap {
    /// Identity map plus explicit `from, to` byte pairs.
    pub fn from_pairs(pairs: &[u8]) -> Self {
        let mut map = Box::new([0u8; 256]);
        for (i, slot) in map.iter_mut().enumerate() {
            *slot = i as u8;
        }
        for pair in pairs.chunks_exact(2) {
            map[pair[0] as usize] = pair[1];
        }
        Self { map }
    }

    #[inline]
    pub fn fold(&self, b: u8) -> u8 {
        self.map[b as usize]
    }

    pub fn fold_in_place(&self, bytes: &mut [u8]) {
        for b in bytes {
            *b = self.fold(*b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listed_bytes_sort_first() {
        let c = Collation::from_order(b"ZYX", false);
        assert_eq!(c.compare(b"Z", b"A"), Ordering::Less);
        assert_eq!(c.compare(b"X", b"Y"), Ordering::Greater);
        assert_eq!(c.compare(b"A", b"B"), Ordering::Less);
    }

    #[test]
    fn test_ignore_case_is_equal() {
        let c = Collation::from_order(b"", true);
        assert_eq!(c.compare(b"abc", b"ABC"), Ordering::Equal);
        assert_eq!(c.compare(b"abd", b"ABC"), Ordering::Greater);
    }

    #[test]
    fn test_image_order_matches_compare() {
        let c = Collation::from_order(b"9876543210", false);
        let mut a = [0u8; 3];
        let mut b = [0u8; 3];
        c.map_into(b"123", &mut a);
        c.map_into(b"321", &mut b);
        assert_eq!(a.cmp(&b), c.compare(b"123", b"321"));
        assert_eq!(a.cmp(&b), Ordering::Greater);
    }

    #[test]
    fn test_case_map_default_uppercases() {
        let m = CaseMap::default();
        assert_eq!(m.fold(b'a'), b'A');
        assert_eq!(m.fold(b'Z'), b'Z');
        assert_eq!(m.fold(b'1'), b'1');
    }

    #[test]
    fn test_case_map_pairs() {
        let m = CaseMap::from_pairs(b"aAeE");
        assert_eq!(m.fold(b'a'), b'A');
        assert_eq!(m.fold(b'e'), b'E');
        assert_eq!(m.fold(b'b'), b'b');
    }
}
