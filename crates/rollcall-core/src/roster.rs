//! Student registration and roster lookup.

use crate::types::{Descriptor, Student};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("capture a face before registering")]
    NoCapture,
    #[error("student id already exists: {0}")]
    DuplicateId(String),
}

/// Form fields for a new student.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub id: String,
    pub name: String,
    pub course: String,
}

/// Descriptor and face crop produced by a capture.
#[derive(Debug, Clone)]
pub struct FaceCapture {
    pub descriptor: Descriptor,
    /// JPEG-encoded face crop.
    pub photo: Vec<u8>,
}

impl Registration {
    /// Validate the form and build the student record.
    ///
    /// Fields are trimmed and must be non-empty; `existing` is checked for an
    /// id clash.
    pub fn into_student(
        self,
        capture: Option<FaceCapture>,
        existing: &[Student],
        registered_at: DateTime<Utc>,
    ) -> Result<Student, RegistrationError> {
        let id = required("id", &self.id)?;
        let name = required("name", &self.name)?;
        let course = required("course", &self.course)?;
        let capture = capture.ok_or(RegistrationError::NoCapture)?;

        if existing.iter().any(|s| s.id == id) {
            return Err(RegistrationError::DuplicateId(id));
        }

        Ok(Student {
            id,
            name,
            course,
            descriptor: Some(capture.descriptor),
            photo: Some(capture.photo),
            registered_at,
        })
    }
}

fn required(field: &'static str, value: &str) -> Result<String, RegistrationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(RegistrationError::MissingField(field))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Students whose id, name or course contains `term`, ignoring case.
pub fn search<'a>(students: &'a [Student], term: &str) -> Vec<&'a Student> {
    let term = term.trim().to_lowercase();
    students
        .iter()
        .filter(|s| {
            term.is_empty()
                || s.id.to_lowercase().contains(&term)
                || s.name.to_lowercase().contains(&term)
                || s.course.to_lowercase().contains(&term)
        })
        .collect()
}
