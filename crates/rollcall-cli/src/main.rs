use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_hw::{Camera, FrameGrabber, FrameSource};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

const ANGLES: [(&str, &str); 5] = [
    ("front", "Look straight at the camera"),
    ("left", "Turn your head slightly left"),
    ("right", "Turn your head slightly right"),
    ("up", "Tilt your head slightly up"),
    ("down", "Tilt your head slightly down"),
];

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn begin_enrollment(&self, name: &str, employee_id: &str) -> zbus::Result<()>;
    async fn capture_angle(&self, angle: &str) -> zbus::Result<u32>;
    async fn capture_sweep(&self, index: u16) -> zbus::Result<String>;
    async fn finalize_enrollment(&self) -> zbus::Result<i64>;
    async fn cancel_enrollment(&self) -> zbus::Result<bool>;
    async fn start_attendance(&self) -> zbus::Result<()>;
    async fn start_login(&self) -> zbus::Result<()>;
    async fn check_login(&self) -> zbus::Result<String>;
    async fn authenticate_image(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn start_evacuation(&self) -> zbus::Result<String>;
    async fn evacuation_stats(&self) -> zbus::Result<String>;
    async fn stop_evacuation(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<String>;
    async fn today_attendance(&self) -> zbus::Result<String>;
    async fn list_persons(&self) -> zbus::Result<String>;
    async fn latest_login(&self) -> zbus::Result<String>;
    async fn login_history(&self) -> zbus::Result<String>;
    async fn last_report(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "rollcall face attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Daemon(DaemonCommand),
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value_t = 1280)]
        width: u32,
        #[arg(long, default_value_t = 720)]
        height: u32,
        /// Save the captured frame as an image
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

/// Commands served by rollcalld over D-Bus.
#[derive(Subcommand)]
enum DaemonCommand {
    /// Enroll a new person, guiding them through each head pose
    Enroll {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        employee_id: String,
        /// Full-view samples to attempt after the poses. Defaults to the
        /// daemon's sweep size when it requires sweep samples, else none.
        #[arg(long)]
        sweep: Option<u16>,
    },
    /// Start marking attendance from the camera
    Attendance,
    /// Authenticate the person in front of the camera, or a still image
    Login {
        /// Encoded image (PNG, JPEG, ...) to authenticate instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
        /// Seconds to wait for a face
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Manage an evacuation head count
    Evacuate {
        #[command(subcommand)]
        action: EvacuateAction,
    },
    /// Show today's attendance
    Today,
    /// List enrolled persons
    Persons,
    /// Show the most recent login
    LastLogin,
    /// Show every recorded login, newest first
    Logins,
    /// Show boxes and identities from the last processed frame
    Report,
    /// Return the daemon to idle and release the camera
    Stop,
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum EvacuateAction {
    /// Declare an evacuation for everyone present today
    Start,
    /// Show evacuated and remaining counts
    Stats,
    /// Conclude the evacuation
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            list_devices();
            Ok(())
        }
        Commands::Test {
            device,
            width,
            height,
            save,
        } => camera_test(&device, width, height, save),
        Commands::Daemon(command) => {
            let connection = if cli.session {
                zbus::Connection::session().await?
            } else {
                zbus::Connection::system().await?
            };
            let proxy = RollcallProxy::new(&connection)
                .await
                .context("rollcalld is not reachable on D-Bus")?;
            run(&proxy, command).await
        }
    }
}

async fn run(proxy: &RollcallProxy<'_>, command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Enroll {
            name,
            employee_id,
            sweep,
        } => enroll(proxy, &name, &employee_id, sweep).await?,
        DaemonCommand::Attendance => {
            proxy.start_attendance().await?;
            println!("Attendance mode started. Use `rollcall report` to watch, `rollcall stop` to end.");
        }
        DaemonCommand::Login { image, timeout } => login(proxy, image, timeout).await?,
        DaemonCommand::Evacuate { action } => match action {
            EvacuateAction::Start => {
                let event_id = proxy.start_evacuation().await?;
                println!("Evacuation {event_id} started");
            }
            EvacuateAction::Stats => print_json(&proxy.evacuation_stats().await?)?,
            EvacuateAction::Stop => print_json(&proxy.stop_evacuation().await?)?,
        },
        DaemonCommand::Today => print_json(&proxy.today_attendance().await?)?,
        DaemonCommand::Persons => print_json(&proxy.list_persons().await?)?,
        DaemonCommand::LastLogin => print_json(&proxy.latest_login().await?)?,
        DaemonCommand::Logins => print_json(&proxy.login_history().await?)?,
        DaemonCommand::Report => print_json(&proxy.last_report().await?)?,
        DaemonCommand::Stop => {
            let previous = proxy.stop().await?;
            println!("Stopped (was {})", previous.trim_matches('"'));
        }
        DaemonCommand::Status => print_json(&proxy.status().await?)?,
    }

    Ok(())
}

async fn enroll(
    proxy: &RollcallProxy<'_>,
    name: &str,
    employee_id: &str,
    sweep: Option<u16>,
) -> Result<()> {
    let sweep = match sweep {
        Some(n) => n,
        None => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            default_sweep(&status)
        }
    };

    proxy.begin_enrollment(name, employee_id).await?;
    println!("Enrolling {name} ({employee_id}). Press Enter to capture each pose, or type q to cancel.");

    let stdin = std::io::stdin();
    for (angle, prompt) in ANGLES {
        loop {
            print!("[{angle}] {prompt}: ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            stdin.lock().read_line(&mut line)?;
            if line.trim().eq_ignore_ascii_case("q") {
                proxy.cancel_enrollment().await?;
                bail!("enrollment cancelled");
            }
            match proxy.capture_angle(angle).await {
                Ok(count) => {
                    println!("  captured ({count} samples)");
                    break;
                }
                Err(e) => println!("  {}", describe(&e)),
            }
        }
    }

    if sweep > 0 {
        println!("Slowly move your head around; capturing {sweep} full-view samples...");
        let mut stored = 0;
        for index in 0..sweep {
            let outcome: serde_json::Value = serde_json::from_str(&proxy.capture_sweep(index).await?)?;
            if outcome["result"] == "stored" {
                stored += 1;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        println!("  {stored}/{sweep} full-view samples stored");
    }

    match proxy.finalize_enrollment().await {
        Ok(id) => println!("Enrolled {name} as person {id}"),
        Err(e) => bail!("enrollment failed: {}", describe(&e)),
    }
    Ok(())
}

async fn login(proxy: &RollcallProxy<'_>, image: Option<PathBuf>, timeout: u64) -> Result<()> {
    if let Some(path) = image {
        let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        return print_login(&proxy.authenticate_image(bytes).await?);
    }

    proxy.start_login().await?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);
    let result = loop {
        match proxy.check_login().await {
            Ok(json) => {
                let outcome: serde_json::Value = serde_json::from_str(&json)?;
                if outcome["result"] != "no_face" || tokio::time::Instant::now() >= deadline {
                    break Ok(json);
                }
            }
            Err(e) if tokio::time::Instant::now() >= deadline => break Err(e),
            Err(_) => {}
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    };
    proxy.stop().await?;
    print_login(&result?)
}

/// Sweep attempts to make when the operator gave none.
fn default_sweep(status: &serde_json::Value) -> u16 {
    let required = status["sweep_required"].as_u64().unwrap_or(0);
    if required == 0 {
        return 0;
    }
    let attempts = status["sweep_attempts"].as_u64().unwrap_or(0).max(required);
    u16::try_from(attempts).unwrap_or(u16::MAX)
}

fn print_login(json: &str) -> Result<()> {
    let outcome: serde_json::Value = serde_json::from_str(json)?;
    match outcome["result"].as_str() {
        Some("authorized") => println!(
            "Authorized: {} ({}), confidence {:.2}",
            outcome["person"]["name"].as_str().unwrap_or("?"),
            outcome["person"]["employee_id"].as_str().unwrap_or("?"),
            outcome["confidence"].as_f64().unwrap_or(0.0)
        ),
        Some("unauthorized") => println!("Unauthorized"),
        _ => println!("No face detected"),
    }
    Ok(())
}

fn print_json(json: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// The daemon's human-readable reason, without the D-Bus error name.
fn describe(e: &zbus::Error) -> String {
    match e {
        zbus::Error::MethodError(_, Some(msg), _) => msg.clone(),
        other => other.to_string(),
    }
}

fn list_devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} [{}] {}", dev.path, dev.name, dev.driver, dev.bus);
    }
}

fn camera_test(device: &str, width: u32, height: u32, save: Option<PathBuf>) -> Result<()> {
    println!("Opening {device} at {width}x{height}...");
    let mut grabber = FrameGrabber::new(device, width, height, Duration::from_millis(30));
    grabber.start()?;

    let mut frame = None;
    for _ in 0..20 {
        frame = grabber.latest_frame();
        if frame.is_some() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    grabber.stop();

    let Some(frame) = frame else {
        bail!("no frame arrived from {device} within 2 seconds");
    };
    println!(
        "Frame {}x{} seq={} brightness={:.1}{}",
        frame.width,
        frame.height,
        frame.sequence,
        frame.avg_brightness(),
        if frame.is_dark { " (dark)" } else { "" }
    );

    if let Some(path) = save {
        let img = image::GrayImage::from_raw(frame.width, frame.height, frame.data)
            .context("frame size does not match its dimensions")?;
        img.save(&path)
            .with_context(|| format!("saving {}", path.display()))?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_sweep_follows_daemon_requirement() {
        let optional = json!({ "sweep_required": 0, "sweep_attempts": 45 });
        assert_eq!(default_sweep(&optional), 0);

        let required = json!({ "sweep_required": 30, "sweep_attempts": 45 });
        assert_eq!(default_sweep(&required), 45);

        // Never attempt fewer than the daemon will accept
        let short = json!({ "sweep_required": 30, "sweep_attempts": 10 });
        assert_eq!(default_sweep(&short), 30);

        assert_eq!(default_sweep(&json!({})), 0);
    }

    #[test]
    fn test_enroll_sweep_flag_is_optional() {
        let cli = Cli::parse_from(["rollcall", "enroll", "-n", "Asha", "-e", "E100"]);
        assert!(matches!(
            cli.command,
            Commands::Daemon(DaemonCommand::Enroll { sweep: None, .. })
        ));
        let cli = Cli::parse_from(["rollcall", "enroll", "-n", "Asha", "-e", "E100", "--sweep", "12"]);
        assert!(matches!(
            cli.command,
            Commands::Daemon(DaemonCommand::Enroll { sweep: Some(12), .. })
        ));
    }
}
