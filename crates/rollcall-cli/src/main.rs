use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn start_session(&self, major: &str, section: &str, course: &str)
        -> zbus::Result<String>;
    async fn stop_session(&self, major: &str, section: &str, course: &str)
        -> zbus::Result<String>;
    async fn submit_frame(
        &self,
        major: &str,
        section: &str,
        course: &str,
        frame: &[u8],
    ) -> zbus::Result<String>;
    async fn recently_marked(
        &self,
        major: &str,
        section: &str,
        course: &str,
    ) -> zbus::Result<String>;
    async fn list_courses(&self, major: &str, section: &str) -> zbus::Result<String>;
    async fn attendance_report(
        &self,
        major: &str,
        section: &str,
        course: &str,
    ) -> zbus::Result<String>;
    async fn session_status(
        &self,
        major: &str,
        section: &str,
        course: &str,
    ) -> zbus::Result<String>;
    async fn enroll_student(
        &self,
        major: &str,
        section: &str,
        course: &str,
        student_id: &str,
        name: &str,
    ) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Identifies one class: degree program, section and course.
#[derive(Args)]
struct Class {
    /// Degree program (e.g., "BSCS")
    major: String,
    /// Section (e.g., "6")
    section: String,
    /// Course code (e.g., "04")
    course: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an attendance session
    Start(Class),
    /// Stop a session and commit its attendance
    Stop(Class),
    /// Submit an image file as a frame
    Submit {
        #[command(flatten)]
        class: Class,
        /// Encoded image (JPEG, PNG, ...)
        file: PathBuf,
    },
    /// Students already marked for this course in the last hours
    Recent(Class),
    /// List courses for a major and section
    Courses {
        major: String,
        section: String,
    },
    /// Attendance counts for a course
    Report(Class),
    /// Show a session's live status
    Session(Class),
    /// Enroll a student in a course
    Enroll {
        #[command(flatten)]
        class: Class,
        /// Student id
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = match cli.session_bus {
        true => zbus::Connection::session().await,
        false => zbus::Connection::system().await,
    };
    let conn = conn.context("connecting to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    let json = match cli.command {
        Commands::Start(c) => proxy.start_session(&c.major, &c.section, &c.course).await?,
        Commands::Stop(c) => proxy.stop_session(&c.major, &c.section, &c.course).await?,
        Commands::Submit { class: c, file } => {
            let frame = std::fs::read(&file)
                .with_context(|| format!("reading frame {}", file.display()))?;
            tracing::debug!(bytes = frame.len(), "submitting frame");
            proxy
                .submit_frame(&c.major, &c.section, &c.course, &frame)
                .await?
        }
        Commands::Recent(c) => proxy.recently_marked(&c.major, &c.section, &c.course).await?,
        Commands::Courses { major, section } => proxy.list_courses(&major, &section).await?,
        Commands::Report(c) => {
            proxy
                .attendance_report(&c.major, &c.section, &c.course)
                .await?
        }
        Commands::Session(c) => proxy.session_status(&c.major, &c.section, &c.course).await?,
        Commands::Enroll { class: c, id, name } => {
            proxy
                .enroll_student(&c.major, &c.section, &c.course, &id, &name)
                .await?;
            println!("Enrolled {id} in {}/{}/{}", c.major, c.section, c.course);
            return Ok(());
        }
        Commands::Status => proxy.status().await?,
    };

    println!("{}", pretty(&json));
    Ok(())
}

/// Re-indent a JSON reply; anything unparseable is printed as-is.
fn pretty(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit() {
        let cli = Cli::parse_from(["rollcall", "submit", "BSCS", "6", "04", "frame.jpg"]);
        match cli.command {
            Commands::Submit { class, file } => {
                assert_eq!(class.major, "BSCS");
                assert_eq!(class.course, "04");
                assert_eq!(file, PathBuf::from("frame.jpg"));
            }
            _ => panic!("expected submit"),
        }
        assert!(!cli.session_bus);
    }

    #[test]
    fn test_parse_enroll_on_session_bus() {
        let cli = Cli::parse_from([
            "rollcall", "--session-bus", "enroll", "BSCS", "6", "04", "--id", "S7", "--name", "Ada",
        ]);
        assert!(cli.session_bus);
        assert!(matches!(cli.command, Commands::Enroll { ref id, .. } if id == "S7"));
    }

    #[test]
    fn test_pretty_passes_through_non_json() {
        assert_eq!(pretty("not json"), "not json");
        assert_eq!(pretty(r#"{"a":1}"#), "{\n  \"a\": 1\n}");
    }
}
