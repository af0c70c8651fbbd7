//! presensi — face-recognition attendance from the command line.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use presensi_service::{decode_image, Config, EnrollRequest, Service, ServiceOptions};
use presensi_store::{AttendanceStatus, SqliteStore};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "presensi", version, about = "Face-recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enroll a new identity from one or more face images.
    Enroll {
        /// Unique identity key, e.g. a member or student ID.
        key: String,
        /// Display name.
        #[arg(long)]
        name: String,
        /// Optional division or group.
        #[arg(long)]
        division: Option<String>,
        /// Face images; the first is required to contain a usable face.
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Replace an identity's stored face vectors from a new image batch.
    UpdateFaces {
        key: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Identify the person in an image.
    Recognize {
        image: PathBuf,
        /// Override the similarity threshold for this query.
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Recognize and record today's check-in.
    CheckIn { image: PathBuf },
    /// Recognize and record today's check-out with an activity note.
    CheckOut {
        image: PathBuf,
        #[arg(long)]
        activity: String,
    },
    /// List enrolled members.
    Members {
        #[arg(long)]
        division: Option<String>,
    },
    /// List attendance events for a date (default: today).
    Attendance {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        member: Option<String>,
        /// Filter by status: "open" or "closed".
        #[arg(long)]
        status: Option<String>,
    },
    /// Delete an identity and its vectors and attendance rows.
    Remove { key: String },
}

fn load_image(path: &Path) -> anyhow::Result<image::RgbImage> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    decode_image(&bytes).with_context(|| format!("decoding {}", path.display()))
}

fn parse_status(raw: &str) -> anyhow::Result<AttendanceStatus> {
    match raw {
        "open" => Ok(AttendanceStatus::Open),
        "closed" => Ok(AttendanceStatus::Closed),
        other => anyhow::bail!("unknown status \"{other}\" (expected \"open\" or \"closed\")"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::open(&config.db_path).await?;

    let vision = presensi_service::spawn_engine(
        &config.detector_model_path(),
        &config.embedder_model_path(),
    )?;
    let service = Service::new(
        vision,
        store,
        ServiceOptions {
            similarity_threshold: config.similarity_threshold,
            photo_dir: Some(config.photo_dir.clone()),
            max_update_images: config.max_update_images,
        },
    );

    match cli.command {
        Command::Enroll {
            key,
            name,
            division,
            images,
        } => {
            let mut images = images.iter().map(|p| load_image(p));
            let primary = images.next().expect("clap enforces at least one image")?;
            let additional = images.collect::<anyhow::Result<Vec<_>>>()?;

            let report = service
                .enroll(EnrollRequest {
                    key,
                    name,
                    division,
                    image: primary,
                    additional_images: additional,
                })
                .await?;
            print_json(&report)?;
        }
        Command::UpdateFaces { key, images } => {
            let images = images
                .iter()
                .map(|p| load_image(p))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let report = service.update_faces(&key, images).await?;
            print_json(&report)?;
        }
        Command::Recognize { image, threshold } => {
            let image = load_image(&image)?;
            let recognition = service.recognize(&image, threshold).await?;
            print_json(&recognition)?;
        }
        Command::CheckIn { image } => {
            let image = load_image(&image)?;
            let receipt = service.check_in(&image).await?;
            print_json(&receipt)?;
        }
        Command::CheckOut { image, activity } => {
            let image = load_image(&image)?;
            let receipt = service.check_out(&image, &activity).await?;
            print_json(&receipt)?;
        }
        Command::Members { division } => {
            let members = service.members(division).await?;
            print_json(&members)?;
        }
        Command::Attendance {
            date,
            member,
            status,
        } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let status = status.as_deref().map(parse_status).transpose()?;
            let events = service.attendance(date, member, status).await?;
            print_json(&events)?;
        }
        Command::Remove { key } => {
            service.remove_member(&key).await?;
            println!("removed \"{key}\"");
        }
    }

    Ok(())
}
