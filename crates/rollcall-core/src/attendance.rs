//! Daily attendance statistics.
//!
//! The one-mark-per-(student, day, subject) rule lives in the store's UNIQUE
//! constraint; see `rollcall_store::Store::mark_present`.

use crate::types::AttendanceRecord;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Colour band for an attendance rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RateBand {
    Good,
    Fair,
    Poor,
}

impl RateBand {
    pub fn for_rate(rate: u32) -> Self {
        if rate >= 80 {
            RateBand::Good
        } else if rate >= 50 {
            RateBand::Fair
        } else {
            RateBand::Poor
        }
    }
}

/// Daily attendance figures.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub date: NaiveDate,
    pub total_students: usize,
    /// Distinct students with at least one mark on `date`.
    pub present: usize,
    /// Percentage, rounded; 0 when nobody is registered.
    pub rate: u32,
    pub band: RateBand,
    /// Marks per subject code on `date`.
    pub per_subject: BTreeMap<String, usize>,
}

impl Statistics {
    pub fn compute(total_students: usize, records: &[AttendanceRecord], date: NaiveDate) -> Self {
        let mut present_ids = HashSet::new();
        let mut per_subject = BTreeMap::new();

        for record in records.iter().filter(|r| r.date == date) {
            present_ids.insert(record.student_id.as_str());
            *per_subject.entry(record.subject.clone()).or_insert(0) += 1;
        }

        let present = present_ids.len();
        let rate = if total_students > 0 {
            ((present as f64 / total_students as f64) * 100.0).round() as u32
        } else {
            0
        };

        Self {
            date,
            total_students,
            present,
            rate,
            band: RateBand::for_rate(rate),
            per_subject,
        }
    }
}
