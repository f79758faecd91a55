//! CSV exports and the plain-text attendance summary.

use crate::attendance::Statistics;
use crate::types::{AttendanceRecord, Student, Subject};
use chrono::{Local, NaiveDate};
use std::fmt::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("no data to export")]
    Empty,
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

/// Default filename for the student export, dated `day`.
pub fn students_csv_filename(day: NaiveDate) -> String {
    format!("attendance_students_{}.csv", day.format("%Y-%m-%d"))
}

/// Default filename for the attendance record export, dated `day`.
pub fn attendance_csv_filename(day: NaiveDate) -> String {
    format!("attendance_records_{}.csv", day.format("%Y-%m-%d"))
}

pub const SUMMARY_FILENAME: &str = "attendance_summary.txt";

/// Registered students as CSV.
pub fn students_csv(students: &[Student]) -> Result<String, ReportError> {
    if students.is_empty() {
        return Err(ReportError::Empty);
    }

    let mut csv = String::from("Student ID,Name,Course,Registration Date\n");
    for s in students {
        let date = s.registered_at.with_timezone(&Local).format("%Y-%m-%d").to_string();
        push_row(&mut csv, &[&s.id, &s.name, &s.course, &date]);
    }
    Ok(csv)
}

/// Attendance records as CSV, in the order given.
pub fn attendance_csv(records: &[AttendanceRecord]) -> Result<String, ReportError> {
    if records.is_empty() {
        return Err(ReportError::Empty);
    }

    let mut csv = String::from("Student ID,Name,Date,Time,Subject,Status\n");
    for r in records {
        let date = r.date.format("%Y-%m-%d").to_string();
        push_row(
            &mut csv,
            &[
                &r.student_id,
                &r.student_name,
                &date,
                &r.local_time(),
                &r.subject_name,
                r.status.as_str(),
            ],
        );
    }
    Ok(csv)
}

fn push_row(csv: &mut String, fields: &[&str]) {
    let row: Vec<String> = fields
        .iter()
        .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
        .collect();
    csv.push_str(&row.join(","));
    csv.push('\n');
}

/// Human-readable summary of one day's attendance.
pub fn summary(stats: &Statistics, subjects: &[Subject]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ATTENDANCE SUMMARY");
    let _ = writeln!(out, "==================");
    let _ = writeln!(out, "Date: {}", stats.date.format("%A, %B %-d, %Y"));
    let _ = writeln!(out, "Registered students: {}", stats.total_students);
    let _ = writeln!(out, "Present: {}", stats.present);
    let _ = writeln!(out, "Attendance rate: {}% ({:?})", stats.rate, stats.band);
    let _ = writeln!(out, "------------------");

    for subject in subjects {
        let count = stats.per_subject.get(&subject.code).copied().unwrap_or(0);
        let _ = writeln!(out, "{}: {count}", subject.name);
    }
    // Marks for subjects no longer in the catalog still show up.
    for (code, count) in &stats.per_subject {
        if !subjects.iter().any(|s| &s.code == code) {
            let _ = writeln!(out, "{code}: {count}");
        }
    }

    let _ = writeln!(out, "==================");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Descriptor;
    use chrono::{TimeZone, Utc};

    fn student(id: &str, name: &str) -> Student {
        Student {
            id: id.into(),
            name: name.into(),
            course: "CS".into(),
            descriptor: Some(Descriptor::new(vec![0.0])),
            photo: None,
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn test_students_csv_quotes_fields() {
        let csv = students_csv(&[student("S1", "Ada \"Countess\" Lovelace")]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Student ID,Name,Course,Registration Date"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("\"S1\",\"Ada \"\"Countess\"\" Lovelace\",\"CS\",\""));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_students_csv_empty() {
        assert!(matches!(students_csv(&[]), Err(ReportError::Empty)));
    }

    #[test]
    fn test_attendance_csv_row() {
        let now = Local.with_ymd_and_hms(2024, 3, 5, 9, 15, 0).unwrap();
        let record = AttendanceRecord::present(
            &student("S1", "Ada"),
            &Subject::new("math", "Mathematics"),
            now,
        );
        let csv = attendance_csv(&[record]).unwrap();
        assert!(csv.contains("\"S1\",\"Ada\",\"2024-03-05\",\"09:15:00\",\"Mathematics\",\"Present\""));
    }

    #[test]
    fn test_students_csv_filename() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(students_csv_filename(day), "attendance_students_2024-03-05.csv");
    }

    #[test]
    fn test_summary_lists_subjects() {
        let now = Local.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        let records = vec![
            AttendanceRecord::present(&student("S1", "Ada"), &Subject::new("math", "Mathematics"), now),
            AttendanceRecord::present(&student("S2", "Bob"), &Subject::new("old", "Retired"), now),
        ];
        let stats = Statistics::compute(2, &records, now.date_naive());
        let subjects = vec![
            Subject::new("math", "Mathematics"),
            Subject::new("physics", "Physics"),
        ];

        let text = summary(&stats, &subjects);
        assert!(text.contains("Date: Tuesday, March 5, 2024"));
        assert!(text.contains("Attendance rate: 100% (Good)"));
        assert!(text.contains("Mathematics: 1"));
        assert!(text.contains("Physics: 0"));
        assert!(text.contains("old: 1"));
    }
}
