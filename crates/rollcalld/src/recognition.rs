//! Timer-driven recognition loop: scan, match, mark.

use crate::engine::{EngineError, EngineHandle};
use chrono::{DateTime, Local};
use rollcall_core::{AttendanceRecord, Descriptor, Matcher, Subject};
use rollcall_store::{Store, StoreError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a single scan did.
#[derive(Debug)]
pub enum ScanOutcome {
    NoMatch { distance: f32 },
    /// Matched a student who already has a mark for this day and subject.
    AlreadyMarked { student_id: String },
    Marked(AttendanceRecord),
}

/// Lock the shared store, recovering from a poisoned mutex.
pub fn lock_store(store: &Mutex<Store>) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Match `probe` against the registered students and mark the best match
/// present for `subject`.
pub fn recognize_and_mark(
    store: &Store,
    matcher: &dyn Matcher,
    probe: &Descriptor,
    threshold: f32,
    subject: &Subject,
    now: DateTime<Local>,
) -> Result<ScanOutcome, StoreError> {
    let gallery = store.gallery()?;
    let result = matcher.compare(probe, &gallery, threshold);

    let Some(student) = result
        .student_id
        .as_deref()
        .filter(|_| result.matched)
        .and_then(|id| gallery.iter().find(|s| s.id == id))
    else {
        return Ok(ScanOutcome::NoMatch {
            distance: result.distance,
        });
    };

    let record = AttendanceRecord::present(student, subject, now);
    if store.mark_present(&record)? {
        Ok(ScanOutcome::Marked(record))
    } else {
        Ok(ScanOutcome::AlreadyMarked {
            student_id: student.id.clone(),
        })
    }
}

/// Everything a scan needs; shared between the daemon and the loop task.
pub struct Scanner {
    pub engine: EngineHandle,
    pub store: Arc<Mutex<Store>>,
    pub matcher: Box<dyn Matcher + Send + Sync>,
    pub threshold: f32,
    pub interval: Duration,
}

impl Scanner {
    pub async fn scan(&self, subject: &Subject) -> Result<ScanOutcome, ScanError> {
        let probe = self.engine.scan().await?;
        let store = lock_store(&self.store);
        let outcome = recognize_and_mark(
            &store,
            self.matcher.as_ref(),
            &probe,
            self.threshold,
            subject,
            Local::now(),
        )?;
        Ok(outcome)
    }
}

/// A running recognition loop for one subject.
pub struct RecognitionSession {
    pub subject: Subject,
    pub started_at: DateTime<Local>,
    marked: Arc<AtomicUsize>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RecognitionSession {
    pub fn start(scanner: Arc<Scanner>, subject: Subject) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let marked = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(run_loop(scanner, subject.clone(), marked.clone(), stop_rx));

        tracing::info!(subject = %subject.code, "recognition started");
        Self {
            subject,
            started_at: Local::now(),
            marked,
            stop_tx,
            task,
        }
    }

    /// Students newly marked during this session.
    pub fn marked(&self) -> usize {
        self.marked.load(Ordering::Relaxed)
    }

    /// True once the loop task has exited, whether stopped or panicked.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it to finish its current scan.
    ///
    /// Returns the number of students marked during the session.
    pub async fn stop(self) -> usize {
        let Self {
            subject,
            marked,
            stop_tx,
            task,
            ..
        } = self;

        let _ = stop_tx.send(true);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "recognition task ended abnormally");
        }
        let marked = marked.load(Ordering::Relaxed);
        tracing::info!(subject = %subject.code, marked, "recognition stopped");
        marked
    }
}

async fn run_loop(
    scanner: Arc<Scanner>,
    subject: Subject,
    marked: Arc<AtomicUsize>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }

        match scanner.scan(&subject).await {
            Ok(ScanOutcome::Marked(record)) => {
                marked.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    student = %record.student_id,
                    name = %record.student_name,
                    time = %record.local_time(),
                    subject = %record.subject_name,
                    "attendance marked"
                );
            }
            Ok(ScanOutcome::AlreadyMarked { student_id }) => {
                tracing::debug!(student = %student_id, "already marked today");
            }
            Ok(ScanOutcome::NoMatch { distance }) => {
                tracing::debug!(distance, "no registered student matched");
            }
            Err(e) => {
                tracing::warn!(error = %e, "recognition scan failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(scanner.interval) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rollcall_core::{EuclideanMatcher, Student};

    fn store_with(students: &[(&str, Vec<f32>)]) -> Store {
        let store = Store::open_in_memory().unwrap();
        for (id, values) in students {
            store
                .insert_student(&Student {
                    id: id.to_string(),
                    name: format!("Student {id}"),
                    course: "CS".into(),
                    descriptor: Some(Descriptor::new(values.clone())),
                    photo: None,
                    registered_at: Utc::now(),
                })
                .unwrap();
        }
        store
    }

    fn at(hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_marks_closest_student_once_per_subject() {
        let store = store_with(&[("A", vec![0.0, 0.0]), ("B", vec![1.0, 1.0])]);
        let math = Subject::new("math", "Mathematics");
        let probe = Descriptor::new(vec![0.9, 1.0]);

        let first = recognize_and_mark(&store, &EuclideanMatcher, &probe, 0.6, &math, at(9)).unwrap();
        match first {
            ScanOutcome::Marked(record) => {
                assert_eq!(record.student_id, "B");
                assert_eq!(record.subject_name, "Mathematics");
            }
            other => panic!("expected a mark, got {other:?}"),
        }

        let again = recognize_and_mark(&store, &EuclideanMatcher, &probe, 0.6, &math, at(11)).unwrap();
        assert!(matches!(again, ScanOutcome::AlreadyMarked { student_id } if student_id == "B"));

        let physics = Subject::new("physics", "Physics");
        let other = recognize_and_mark(&store, &EuclideanMatcher, &probe, 0.6, &physics, at(11)).unwrap();
        assert!(matches!(other, ScanOutcome::Marked(_)));

        assert_eq!(store.attendance().unwrap().len(), 2);
    }

    #[test]
    fn test_no_match_writes_nothing() {
        let store = store_with(&[("A", vec![0.0, 0.0])]);
        let probe = Descriptor::new(vec![5.0, 5.0]);
        let outcome = recognize_and_mark(
            &store,
            &EuclideanMatcher,
            &probe,
            0.6,
            &Subject::new("math", "Mathematics"),
            at(9),
        )
        .unwrap();

        assert!(matches!(outcome, ScanOutcome::NoMatch { distance } if distance > 0.6));
        assert!(store.attendance().unwrap().is_empty());
    }

    mod session {
        use super::*;
        use crate::engine::spawn_engine;
        use image::RgbImage;
        use rollcall_core::{DescriptorEncoder, EncoderError};
        use rollcall_hw::{CameraError, Frame, FrameSource};

        /// Counts captures; serves bright frames, or only dark skips.
        struct CountingSource {
            dark: bool,
            captures: Arc<AtomicUsize>,
        }

        impl FrameSource for CountingSource {
            fn capture_frames(&mut self, count: usize) -> Result<(Vec<Frame>, usize), CameraError> {
                self.captures.fetch_add(1, Ordering::SeqCst);
                if self.dark {
                    return Ok((Vec::new(), count * 3));
                }
                let frames = (0..count)
                    .map(|i| Frame::from_rgb_image(RgbImage::from_pixel(64, 64, image::Rgb([150; 3])), i as u32))
                    .collect();
                Ok((frames, 0))
            }

            fn describe(&self) -> String {
                "counting".into()
            }
        }

        /// Always yields the same descriptor.
        struct FixedEncoder(Vec<f32>);

        impl DescriptorEncoder for FixedEncoder {
            fn encode(&mut self, _face: &RgbImage) -> Result<Descriptor, EncoderError> {
                Ok(Descriptor::new(self.0.clone()))
            }

            fn name(&self) -> &'static str {
                "fixed"
            }
        }

        fn scanner(dark: bool, interval: Duration) -> (Arc<Scanner>, Arc<AtomicUsize>) {
            let captures = Arc::new(AtomicUsize::new(0));
            let source = CountingSource {
                dark,
                captures: captures.clone(),
            };
            let engine = spawn_engine(Box::new(source), Box::new(FixedEncoder(vec![0.0, 0.0])), 0).unwrap();
            let store = store_with(&[("A", vec![0.0, 0.0]), ("B", vec![3.0, 3.0])]);
            let scanner = Scanner {
                engine,
                store: Arc::new(Mutex::new(store)),
                matcher: Box::new(EuclideanMatcher),
                threshold: 0.6,
                interval,
            };
            (Arc::new(scanner), captures)
        }

        async fn wait_until(cond: impl Fn() -> bool) -> bool {
            for _ in 0..300 {
                if cond() {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            false
        }

        #[tokio::test]
        async fn test_session_marks_matched_student_once() {
            let (scanner, captures) = scanner(false, Duration::from_millis(10));
            let session = RecognitionSession::start(scanner.clone(), Subject::new("math", "Mathematics"));

            assert!(wait_until(|| captures.load(Ordering::SeqCst) >= 4).await);
            assert_eq!(session.marked(), 1);
            assert!(!session.is_finished());
            assert_eq!(session.stop().await, 1);

            let records = lock_store(&scanner.store).attendance().unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].student_id, "A");
            assert_eq!(records[0].subject, "math");
        }

        #[tokio::test]
        async fn test_session_survives_failed_scans() {
            let (scanner, captures) = scanner(true, Duration::from_millis(10));
            let session = RecognitionSession::start(scanner.clone(), Subject::new("math", "Mathematics"));

            assert!(wait_until(|| captures.load(Ordering::SeqCst) >= 3).await);
            assert!(!session.is_finished());
            assert_eq!(session.stop().await, 0);
            assert!(lock_store(&scanner.store).attendance().unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_session_waits_interval_between_scans() {
            let (scanner, captures) = scanner(false, Duration::from_secs(30));
            let session = RecognitionSession::start(scanner, Subject::new("math", "Mathematics"));

            assert!(wait_until(|| captures.load(Ordering::SeqCst) >= 1).await);
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(captures.load(Ordering::SeqCst), 1);

            // Stop interrupts the pending sleep.
            let stopped = tokio::time::timeout(Duration::from_secs(5), session.stop()).await;
            assert_eq!(stopped.unwrap(), 1);
        }
    }
}
