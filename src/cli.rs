use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::info;

use crate::calendar::{self, Timestamp};
use crate::config::Config;
use crate::error::CadenceError;
use crate::manager::{NormalizedResult, ScheduleManager};
use crate::record::{ScheduleRecord, WireRecord};
use crate::reminders::LogNotifier;
use crate::sections::{self, Section};
use crate::store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "cadence",
    version,
    about = "cadence: study schedule splitting and local reminders"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Ingest a server response and show the resulting sessions and reminders
    Ingest {
        /// JSON file holding an array of schedule records
        #[arg(long = "input", short = 'i')]
        input: PathBuf,

        /// Evaluate as of this RFC 3339 instant instead of the current time
        #[arg(long = "now", value_parser = parse_now)]
        now: Option<Timestamp>,

        /// Only show this section (e.g. "today", "coming-up")
        #[arg(long = "section", value_parser = Section::from_str)]
        section: Option<Section>,

        /// Print the full result as JSON
        #[arg(long = "json", default_value_t = false)]
        json: bool,
    },

    /// List completed and expired schedules from the local cache
    History {
        /// Print as JSON
        #[arg(long = "json", default_value_t = false)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn parse_now(s: &str) -> Result<Timestamp, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| format!("'{}' is not an RFC 3339 timestamp: {}", s, e))
}

impl Cli {
    pub fn handle_command_line(
        config: &Config,
        project_dirs: &ProjectDirs,
    ) -> Result<(), CadenceError> {
        let args = Cli::parse();

        match args.command {
            Command::Ingest {
                input,
                now,
                section,
                json,
            } => {
                let manager = Self::open_manager(config, project_dirs)?;
                let text = fs::read_to_string(&input)?;
                let wire: Vec<WireRecord> = serde_json::from_str(&text)?;
                info!("Read {} records from {}", wire.len(), input.display());

                let now = now.unwrap_or_else(Local::now);
                let result = manager.ingest_wire(wire, now);
                if json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    Self::print_result(&result, section, config, &now);
                }
                Ok(())
            }
            Command::History { json } => {
                let manager = Self::open_manager(config, project_dirs)?;
                let history = manager.history(Local::now())?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&history)?);
                } else {
                    for record in &history {
                        Self::print_record(record);
                    }
                }
                Ok(())
            }
            Command::Config => {
                let text = toml::to_string_pretty(config)
                    .map_err(|e| CadenceError::Error(format!("Failed to render config: {}", e)))?;
                print!("{}", text);
                Ok(())
            }
        }
    }

    fn open_manager(
        config: &Config,
        project_dirs: &ProjectDirs,
    ) -> Result<ScheduleManager, CadenceError> {
        let db_path = config.store.db_path(project_dirs.data_local_dir());
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let store = SqliteStore::open(&db_path)?;

        Ok(ScheduleManager::new(
            Arc::new(store),
            Box::new(LogNotifier),
            config.manager_config(),
        ))
    }

    fn print_result(
        result: &NormalizedResult,
        only: Option<Section>,
        config: &Config,
        now: &Timestamp,
    ) {
        for section in result
            .sections
            .iter()
            .filter(|s| only.map_or(true, |wanted| s.section == wanted))
        {
            println!("{}", section.title);
            for record in &section.schedules {
                Self::print_record(record);
                if sections::is_upcoming(record, now) {
                    println!(
                        "      {}",
                        sections::unavailable_message(record, &config.protocol)
                    );
                }
            }
            println!();
        }

        if only.is_none() {
            println!("Reminders ({})", result.reminders.len());
            for reminder in &result.reminders {
                println!(
                    "  {}  {}",
                    calendar::format_date_time(&reminder.fire_at),
                    reminder.message
                );
            }
        }
    }

    fn print_record(record: &ScheduleRecord) {
        let window = match record.expires_on {
            Some(expires_on) => format!(
                "{} - {}",
                calendar::format_date_time(&record.scheduled_on),
                calendar::format_date_time(&expires_on)
            ),
            None => calendar::format_date_time(&record.scheduled_on),
        };
        println!("  {:<24} {}", record.label, window);
        if let Some(detail) = &record.label_detail {
            println!("      {}", detail);
        }
    }
}
