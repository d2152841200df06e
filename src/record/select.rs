//! Record selection.

use crate::spec::{Comparison, SelectPredicate};
use std::cmp::Ordering;

/// Evaluates the selection predicates of a build against raw records.
///
/// Predicates form AND groups; a predicate flagged `or_group_start` opens a
/// new group. A record is selected when any group holds entirely.
#[derive(Debug, Clone, Copy)]
pub struct Selector<'a> {
    predicates: &'a [SelectPredicate],
    invert: bool,
}

impl<'a> Selector<'a> {
    pub fn new(predicates: &'a [SelectPredicate], invert: bool) -> Self {
        Self { predicates, invert }
    }

    /// `record` is the record as read, before any padding.
    pub fn selects(&self, record: &[u8]) -> bool {
        if self.predicates.is_empty() {
            return true;
        }
        let mut group = true;
        for pred in self.predicates {
            if pred.or_group_start {
                if group {
                    break;
                }
                group = true;
            }
            if group && !matches(pred, record) {
                group = false;
            }
        }
        group != self.invert
    }
}

fn matches(pred: &SelectPredicate, record: &[u8]) -> bool {
    let len = if pred.string_compare { pred.value.len() } else { 1 };
    let Some(field) = record.get(pred.offset..pred.offset + len) else {
        return false;
    };

    let ordering = if pred.string_compare {
        field.cmp(&pred.value[..])
    } else {
        let byte = field[0];
        match pred.comparison {
            Comparison::Equal | Comparison::NotEqual => {
                if pred.value.contains(&byte) {
                    Ordering::Equal
                } else {
                    Ordering::Less
                }
            }
            _ => byte.cmp(&pred.value[0]),
        }
    };

    match pred.comparison {
        Comparison::Equal => ordering == Ordering::Equal,
        Comparison::NotEqual => ordering != Ordering::Equal,
        Comparison::Greater => ordering == Ordering::Greater,
        Comparison::GreaterOrEqual => ordering != Ordering::Less,
        Comparison::Less => ordering == Ordering::Less,
        Comparison::LessOrEqual => ordering != Ordering::Greater,
    }
}
