//! Daemon state behind the D-Bus interface.

use crate::engine::{EngineError, EngineHandle};
use crate::recognition::{lock_store, RecognitionSession, Scanner};
use chrono::Utc;
use rollcall_core::{Config, FaceCapture, Matcher, Registration, RegistrationError, Student};
use rollcall_store::{Store, StoreError};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error("no students registered yet; register students first")]
    NoStudents,
    #[error("unknown subject: {0}")]
    UnknownSubject(String),
    #[error("recognition already running for {0}")]
    AlreadyRunning(String),
}

/// Summary returned after a capture.
#[derive(Debug, Serialize)]
pub struct CaptureInfo {
    pub descriptor_len: usize,
    pub model_version: Option<String>,
    pub photo_bytes: usize,
}

/// Snapshot reported by `Status`.
#[derive(Debug, Serialize)]
pub struct StatusInfo {
    pub version: &'static str,
    pub source: String,
    pub encoder: &'static str,
    pub students: usize,
    pub pending_capture: bool,
    pub recognizing: Option<SessionInfo>,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub subject: String,
    pub subject_name: String,
    pub started_at: String,
    pub marked: usize,
}

pub struct Daemon {
    config: Config,
    scanner: Arc<Scanner>,
    /// Most recent capture, consumed by the next registration.
    pending: tokio::sync::Mutex<Option<FaceCapture>>,
    session: tokio::sync::Mutex<Option<RecognitionSession>>,
}

impl Daemon {
    pub fn new(
        config: Config,
        store: Store,
        engine: EngineHandle,
        matcher: Box<dyn Matcher + Send + Sync>,
    ) -> Self {
        let scanner = Arc::new(Scanner {
            engine,
            store: Arc::new(Mutex::new(store)),
            matcher,
            threshold: config.match_threshold,
            interval: Duration::from_secs(config.scan_interval_secs),
        });
        Self {
            config,
            scanner,
            pending: tokio::sync::Mutex::new(None),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Capture a face and hold it for the next registration.
    pub async fn capture(&self) -> Result<CaptureInfo, DaemonError> {
        let capture = self.scanner.engine.capture().await?;
        let info = CaptureInfo {
            descriptor_len: capture.descriptor.len(),
            model_version: capture.descriptor.model_version.clone(),
            photo_bytes: capture.photo.len(),
        };
        *self.pending.lock().await = Some(capture);
        Ok(info)
    }

    /// Register a student from the pending capture.
    ///
    /// The capture is kept when validation fails so the form can be fixed.
    pub async fn register(&self, registration: Registration) -> Result<Student, DaemonError> {
        let mut pending = self.pending.lock().await;
        let store = lock_store(&self.scanner.store);

        let existing = store.students()?;
        let student = registration.into_student(pending.clone(), &existing, Utc::now())?;
        store.insert_student(&student)?;
        *pending = None;

        tracing::info!(
            student = %student.id,
            name = %student.name,
            total = existing.len() + 1,
            "student registered"
        );
        Ok(student)
    }

    pub async fn start_recognition(&self, subject_code: &str) -> Result<(), DaemonError> {
        let subject = self
            .config
            .subject(subject_code)
            .cloned()
            .ok_or_else(|| DaemonError::UnknownSubject(subject_code.to_string()))?;

        let mut session = self.session.lock().await;
        if let Some(running) = session.as_ref().filter(|s| !s.is_finished()) {
            return Err(DaemonError::AlreadyRunning(running.subject.name.clone()));
        }
        if let Some(dead) = session.take() {
            tracing::warn!(subject = %dead.subject.code, "previous recognition loop exited; replacing it");
            dead.stop().await;
        }

        let students = lock_store(&self.scanner.store).student_count()?;
        if students == 0 {
            return Err(DaemonError::NoStudents);
        }

        *session = Some(RecognitionSession::start(self.scanner.clone(), subject));
        Ok(())
    }

    /// Stop the recognition loop. Returns whether one was running.
    pub async fn stop_recognition(&self) -> bool {
        let running = self.session.lock().await.take();
        match running {
            Some(session) => {
                session.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn status(&self) -> Result<StatusInfo, DaemonError> {
        let students = lock_store(&self.scanner.store).student_count()?;
        let pending_capture = self.pending.lock().await.is_some();
        let recognizing = self
            .session
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.is_finished())
            .map(|s| SessionInfo {
                subject: s.subject.code.clone(),
                subject_name: s.subject.name.clone(),
                started_at: s.started_at.to_rfc3339(),
                marked: s.marked(),
            });

        Ok(StatusInfo {
            version: env!("CARGO_PKG_VERSION"),
            source: self.scanner.engine.source().to_string(),
            encoder: self.scanner.engine.encoder(),
            students,
            pending_capture,
            recognizing,
        })
    }
}
