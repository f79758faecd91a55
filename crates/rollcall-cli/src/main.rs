use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rollcall_core::{report, roster, Config, FaceCapture, Registration, Statistics};
use rollcall_hw::frame::{encode_jpeg, FACE_CROP_SIZE, PHOTO_JPEG_QUALITY};
use rollcall_hw::{Camera, Frame};
use rollcall_store::Store;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    fn capture(&self) -> zbus::Result<String>;
    fn register(&self, id: &str, name: &str, course: &str) -> zbus::Result<String>;
    fn start_recognition(&self, subject: &str) -> zbus::Result<()>;
    fn stop_recognition(&self) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a face with the daemon's camera and hold it for registration
    Capture,
    /// Register a new student
    Register {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        course: String,
        /// Use the capture already held by the daemon instead of taking a new one
        #[arg(long, conflicts_with = "photo")]
        pending: bool,
        /// Register from a photo file without the daemon
        #[arg(long)]
        photo: Option<PathBuf>,
    },
    /// Start marking attendance for a subject
    Start {
        /// Subject code (see `rollcall subjects`)
        subject: String,
    },
    /// Stop the recognition loop
    Stop,
    /// Show daemon status
    Status,
    /// List registered students, optionally filtered
    Students {
        /// Matches id, name or course, ignoring case
        search: Option<String>,
    },
    /// Show one student
    Show {
        id: String,
        /// Write the registration photo (JPEG) to this path
        #[arg(long)]
        photo_out: Option<PathBuf>,
    },
    /// Remove a student and their attendance records
    Remove {
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// List attendance marks for a day, most recent first
    Attendance {
        /// Subject code; all subjects when omitted
        #[arg(long)]
        subject: Option<String>,
        /// Day as YYYY-MM-DD; today when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show attendance statistics for a day
    Stats {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Export students (or all attendance records) as CSV
    Export {
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Export attendance records instead of students
        #[arg(long)]
        attendance: bool,
    },
    /// Write the plain-text attendance summary for a day
    Summary {
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Delete every student and attendance record
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// List V4L2 capture devices
    Devices,
    /// List configured subjects
    Subjects,
}

async fn proxy() -> Result<AttendanceProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable; is the daemon running?")
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("malformed daemon reply")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Encode a photo locally and insert the student directly into the store.
fn register_from_photo(config: &Config, registration: Registration, photo: &Path) -> Result<()> {
    let frame = Frame::load(photo).with_context(|| format!("failed to load {}", photo.display()))?;
    let face = frame.face_crop(FACE_CROP_SIZE)?;

    let mut encoder = rollcall_core::load_encoder(config)?;
    let descriptor = encoder.encode(&face)?;
    let capture = FaceCapture {
        descriptor,
        photo: encode_jpeg(&face, PHOTO_JPEG_QUALITY)?,
    };

    let store = open_store(config)?;
    let student = registration.into_student(Some(capture), &store.students()?, Utc::now())?;
    store.insert_student(&student)?;
    tracing::debug!(encoder = encoder.name(), "registered from photo");
    println!("Registered {} ({})", student.name, student.id);
    Ok(())
}

fn print_stats(stats: &Statistics, config: &Config) {
    println!("Date:                {}", stats.date.format("%Y-%m-%d"));
    println!("Registered students: {}", stats.total_students);
    println!("Present:             {}", stats.present);
    println!("Attendance rate:     {}% ({:?})", stats.rate, stats.band);
    for subject in &config.subjects {
        let count = stats.per_subject.get(&subject.code).copied().unwrap_or(0);
        println!("  {:<20} {count}", subject.name);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Commands::Capture => {
            let reply = proxy().await?.capture().await?;
            print_json(&reply)?;
        }
        Commands::Register {
            id,
            name,
            course,
            pending,
            photo,
        } => {
            let registration = Registration { id, name, course };
            if let Some(photo) = photo {
                register_from_photo(&config, registration, &photo)?;
            } else {
                let proxy = proxy().await?;
                if !pending {
                    println!("Capturing face...");
                    proxy.capture().await?;
                }
                let reply = proxy
                    .register(&registration.id, &registration.name, &registration.course)
                    .await?;
                print_json(&reply)?;
            }
        }
        Commands::Start { subject } => {
            proxy().await?.start_recognition(&subject).await?;
            let name = config.subject(&subject).map_or(subject.as_str(), |s| s.name.as_str());
            println!("Recognition started for {name}");
        }
        Commands::Stop => {
            if proxy().await?.stop_recognition().await? {
                println!("Recognition stopped");
            } else {
                println!("Recognition was not running");
            }
        }
        Commands::Status => {
            let reply = proxy().await?.status().await?;
            print_json(&reply)?;
        }
        Commands::Students { search } => {
            let students = open_store(&config)?.students()?;
            let matches = roster::search(&students, search.as_deref().unwrap_or(""));
            if matches.is_empty() {
                println!("No students found");
            }
            for s in matches {
                println!("{:<12} {:<28} {}", s.id, s.name, s.course);
            }
        }
        Commands::Show { id, photo_out } => {
            let Some(student) = open_store(&config)?.student(&id)? else {
                bail!("no student with id {id}");
            };
            println!("ID:         {}", student.id);
            println!("Name:       {}", student.name);
            println!("Course:     {}", student.course);
            println!(
                "Registered: {}",
                student.registered_at.with_timezone(&Local).format("%Y-%m-%d")
            );
            if let Some(d) = &student.descriptor {
                println!(
                    "Descriptor: {} dims ({})",
                    d.len(),
                    d.model_version.as_deref().unwrap_or("unknown model")
                );
            }
            if let Some(path) = photo_out {
                let Some(photo) = &student.photo else {
                    bail!("student {id} has no stored photo");
                };
                std::fs::write(&path, photo)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Wrote {}", path.display());
            }
        }
        Commands::Remove { id, yes } => {
            if !yes && !confirm(&format!("Remove student {id} and all their attendance records?"))? {
                println!("Cancelled");
                return Ok(());
            }
            let removed = open_store(&config)?.remove_student(&id)?;
            let name = removed.as_ref().map_or("Unknown", |s| s.name.as_str());
            println!("Removed student: {name}");
        }
        Commands::Attendance { subject, date } => {
            let date = date.unwrap_or_else(today);
            let records = open_store(&config)?.attendance_on(date, subject.as_deref())?;
            if records.is_empty() {
                println!("No attendance marked on {date}");
            }
            for r in &records {
                println!(
                    "{}  {:<12} {:<28} {}",
                    r.local_time(),
                    r.student_id,
                    r.student_name,
                    r.subject_name
                );
            }
        }
        Commands::Stats { date } => {
            let date = date.unwrap_or_else(today);
            let store = open_store(&config)?;
            let records = store.attendance_on(date, None)?;
            let stats = Statistics::compute(store.student_count()?, &records, date);
            print_stats(&stats, &config);
        }
        Commands::Export { out, attendance } => {
            let store = open_store(&config)?;
            let (csv, default_name) = if attendance {
                (
                    report::attendance_csv(&store.attendance()?)?,
                    report::attendance_csv_filename(today()),
                )
            } else {
                (
                    report::students_csv(&store.students()?)?,
                    report::students_csv_filename(today()),
                )
            };
            write_output(&out.unwrap_or_else(|| PathBuf::from(default_name)), &csv)?;
        }
        Commands::Summary { out, date } => {
            let date = date.unwrap_or_else(today);
            let store = open_store(&config)?;
            let records = store.attendance_on(date, None)?;
            let stats = Statistics::compute(store.student_count()?, &records, date);
            let text = report::summary(&stats, &config.subjects);
            let path = out.unwrap_or_else(|| PathBuf::from(report::SUMMARY_FILENAME));
            write_output(&path, &text)?;
        }
        Commands::Clear { yes } => {
            if !yes && !confirm("Delete ALL students and attendance records?")? {
                println!("Cancelled");
                return Ok(());
            }
            open_store(&config)?.clear_all()?;
            println!("All data cleared");
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Subjects => {
            for s in &config.subjects {
                println!("{:<10} {}", s.code, s.name);
            }
        }
    }

    Ok(())
}
