use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use presence_core::{local_day, Descriptor};
use presence_store::{matches_search, AttendanceStore};

#[derive(Parser)]
#[command(name = "presence", about = "Presence attendance CLI")]
struct Cli {
    /// Database path (defaults to $PRESENCE_DB_PATH or the XDG data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity
    Register {
        /// Unique identity id (e.g., a student number)
        id: String,
        /// Display name
        name: String,
        /// Descriptor as a JSON array, or a path to a file containing one
        #[arg(short, long)]
        descriptor: String,
    },
    /// List registered identities
    List {
        /// Only identities whose id or name contains this text
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Remove a registered identity
    Remove {
        /// Identity id to remove
        id: String,
    },
    /// Show attendance for one day
    Report {
        /// Day as YYYY-MM-DD (defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Only entries whose id or name contains this text
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show how many identities were marked present today
    Today,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(default_db_path);
    let store = AttendanceStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open database {}", db_path.display()))?;

    match cli.command {
        Commands::Register {
            id,
            name,
            descriptor,
        } => {
            let descriptor = read_descriptor(&descriptor)?;
            let identity = store.register(&id, &name, &descriptor).await?;
            println!(
                "Registered {} ({}), {}-dimensional descriptor",
                identity.display_name,
                identity.id,
                identity.descriptor.len()
            );
        }
        Commands::List { search, json } => {
            let query = search.unwrap_or_default();
            let identities: Vec<_> = store
                .list()
                .await?
                .into_iter()
                .filter(|i| matches_search(&i.id, &i.display_name, &query))
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&identities)?);
            } else if identities.is_empty() && query.is_empty() {
                println!("No identities registered");
            } else if identities.is_empty() {
                println!("No identities match {query:?}");
            } else {
                for identity in &identities {
                    println!(
                        "{:<16} {:<24} enrolled {}",
                        identity.id,
                        identity.display_name,
                        identity.enrolled_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        Commands::Remove { id } => {
            if store.remove(&id).await? {
                println!("Removed {id}");
            } else {
                bail!("no identity with id {id}");
            }
        }
        Commands::Report { date, search, json } => {
            let day = date.unwrap_or_else(|| local_day(chrono::Utc::now()));
            let mut summary = store.summary(day).await?;
            if let Some(query) = search {
                summary = summary.filtered(&query);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{}: {}/{} present",
                    summary.day, summary.present, summary.enrolled
                );
                for record in &summary.records {
                    println!(
                        "  {}  {:<16} {:<24} liveness {:.2}",
                        record.marked_at.with_timezone(&Local).format("%H:%M:%S"),
                        record.identity_id,
                        record.display_name,
                        record.liveness_score
                    );
                }
                if !summary.absent.is_empty() {
                    println!("Absent:");
                    for identity in &summary.absent {
                        println!("  {:<16} {}", identity.id, identity.display_name);
                    }
                }
            }
        }
        Commands::Today => {
            let day = local_day(chrono::Utc::now());
            let count = store.count_on(day).await?;
            println!("{count}");
        }
    }

    Ok(())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("PRESENCE_DB_PATH") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("presence")
        .join("attendance.db")
}

/// Parse a descriptor from inline JSON or from a file holding the JSON array.
fn read_descriptor(arg: &str) -> Result<Descriptor> {
    let text = if arg.trim_start().starts_with('[') {
        arg.to_string()
    } else {
        std::fs::read_to_string(Path::new(arg))
            .with_context(|| format!("failed to read descriptor file {arg}"))?
    };
    let values: Vec<f32> =
        serde_json::from_str(text.trim()).context("descriptor must be a JSON array of numbers")?;
    Ok(Descriptor::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_descriptor() {
        let d = read_descriptor("[0.5, -1.0, 2]").unwrap();
        assert_eq!(d.values, vec![0.5, -1.0, 2.0]);
    }

    #[test]
    fn test_descriptor_file() {
        let path =
            std::env::temp_dir().join(format!("presence-descriptor-{}.json", std::process::id()));
        std::fs::write(&path, "[1, 2, 3]\n").unwrap();
        let d = read_descriptor(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn test_bad_descriptor_rejected() {
        assert!(read_descriptor("[1, \"x\"]").is_err());
        assert!(read_descriptor("/nonexistent/descriptor.json").is_err());
    }

    #[test]
    fn test_cli_parses_report_date() {
        let cli = Cli::try_parse_from(["presence", "report", "--date", "2026-03-02", "--json"])
            .unwrap();
        match cli.command {
            Commands::Report { date, search, json } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 3, 2));
                assert!(search.is_none());
                assert!(json);
            }
            _ => panic!("expected report"),
        }
    }

    #[test]
    fn test_cli_parses_search() {
        let cli = Cli::try_parse_from(["presence", "report", "--search", "ada"]).unwrap();
        match cli.command {
            Commands::Report { date, search, .. } => {
                assert!(date.is_none());
                assert_eq!(search.as_deref(), Some("ada"));
            }
            _ => panic!("expected report"),
        }

        let cli = Cli::try_parse_from(["presence", "list", "-s", "S-00"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::List { search: Some(ref q), json: false } if q == "S-00"
        ));
    }
}
