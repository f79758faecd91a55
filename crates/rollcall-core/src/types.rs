use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Face descriptor vector (128-dimensional in demo mode, 512 for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two descriptors.
    ///
    /// Only meaningful for descriptors of equal length; extra trailing
    /// dimensions of the longer one are ignored.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Serialize as little-endian f32 bytes for storage.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes). Returns `None` when the
    /// byte length is not a multiple of four.
    pub fn from_le_bytes(bytes: &[u8], model_version: Option<String>) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self {
            values,
            model_version,
        })
    }
}

/// A registered student.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub course: String,
    pub descriptor: Option<Descriptor>,
    /// 200x200 JPEG face crop taken at registration.
    #[serde(skip)]
    pub photo: Option<Vec<u8>>,
    pub registered_at: DateTime<Utc>,
}

/// A subject attendance can be taken for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Stable key stored with each record (e.g., "math").
    pub code: String,
    /// Display name (e.g., "Mathematics").
    pub name: String,
}

impl Subject {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Present" => Ok(AttendanceStatus::Present),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

/// One attendance mark for a student, day and subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub student_id: String,
    pub student_name: String,
    /// Local calendar day the mark belongs to.
    pub date: NaiveDate,
    pub marked_at: DateTime<Utc>,
    pub subject: String,
    pub subject_name: String,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    /// Build a Present record for `student` at local time `now`.
    pub fn present(student: &Student, subject: &Subject, now: DateTime<Local>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            date: now.date_naive(),
            marked_at: now.with_timezone(&Utc),
            subject: subject.code.clone(),
            subject_name: subject.name.clone(),
            status: AttendanceStatus::Present,
        }
    }

    /// Local wall-clock time of the mark, `HH:MM:SS`.
    pub fn local_time(&self) -> String {
        self.marked_at
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string()
    }
}

/// Result of matching a probe descriptor against the registered students.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance of the closest comparable student.
    pub distance: f32,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
}

impl MatchResult {
    pub fn no_match(distance: f32) -> Self {
        Self {
            matched: false,
            distance,
            student_id: None,
            student_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Descriptor::new(vec![0.1, 0.2, 0.3]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_known() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_descriptor_bytes_reject_ragged_length() {
        assert!(Descriptor::from_le_bytes(&[0, 0, 0], None).is_none());
    }

    #[test]
    fn test_descriptor_bytes_keep_values() {
        let d = Descriptor::new(vec![1.5, -0.25, 0.0]);
        let back = Descriptor::from_le_bytes(&d.to_le_bytes(), None).unwrap();
        assert_eq!(back.values, d.values);
    }

    #[test]
    fn test_attendance_status_parse() {
        assert_eq!("Present".parse::<AttendanceStatus>(), Ok(AttendanceStatus::Present));
        assert!("Absent".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn test_present_record_uses_local_day() {
        let student = Student {
            id: "S1".into(),
            name: "Ada".into(),
            course: "CS".into(),
            descriptor: None,
            photo: None,
            registered_at: Utc::now(),
        };
        let subject = Subject::new("math", "Mathematics");
        let now = Local.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap();
        let record = AttendanceRecord::present(&student, &subject, now);

        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(record.subject, "math");
        assert_eq!(record.subject_name, "Mathematics");
        assert_eq!(record.status, AttendanceStatus::Present);
        assert_eq!(record.local_time(), "09:30:00");
    }
}
