use crate::daemon::Daemon;
use rollcall_core::Registration;
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    pub daemon: Arc<Daemon>,
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Capture a face from the camera and hold it for the next `Register`.
    /// Returns a JSON summary of the capture.
    async fn capture(&self) -> zbus::fdo::Result<String> {
        tracing::info!("capture requested");
        let info = self.daemon.capture().await.map_err(failed)?;
        serde_json::to_string(&info).map_err(failed)
    }

    /// Register a student using the pending capture. Returns the student as JSON.
    async fn register(&self, id: &str, name: &str, course: &str) -> zbus::fdo::Result<String> {
        tracing::info!(id, "register requested");
        let registration = Registration {
            id: id.to_string(),
            name: name.to_string(),
            course: course.to_string(),
        };
        let student = self.daemon.register(registration).await.map_err(failed)?;
        Ok(serde_json::json!({
            "id": student.id,
            "name": student.name,
            "course": student.course,
            "registered_at": student.registered_at.to_rfc3339(),
        })
        .to_string())
    }

    /// Start the periodic recognition loop for a subject code.
    async fn start_recognition(&self, subject: &str) -> zbus::fdo::Result<()> {
        tracing::info!(subject, "start recognition requested");
        self.daemon.start_recognition(subject).await.map_err(failed)
    }

    /// Stop the recognition loop. Returns false when none was running.
    async fn stop_recognition(&self) -> bool {
        tracing::info!("stop recognition requested");
        self.daemon.stop_recognition().await
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.daemon.status().await.map_err(failed)?;
        serde_json::to_string(&status).map_err(failed)
    }
}
