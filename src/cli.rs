use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use inquire::Text;

use crate::models::busy::{BusyInterval, CoverageWindow};
use crate::models::event::{resolve_color, EventDraft, EventId, EventTags};
use crate::service::reconciler::parse_timestamp;
use crate::service::schedule_service::{CalendarEntry, ScheduleController, ScheduleError};

#[derive(Debug, Parser)]
#[command(name = "goalPlanner", about = "Plan a week of work around your calendar")]
pub struct Cli {
    /// Day (YYYY-MM-DD) that events may not be created on or moved onto.
    #[arg(long = "block", global = true)]
    pub blocked: Vec<NaiveDate>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print every stored event.
    Events,
    /// Create an event by hand.
    Add {
        text: String,
        start: String,
        end: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        progress: Option<u8>,
    },
    /// Move or resize an event.
    Move { id: EventId, start: String, end: String },
    Delete { id: EventId },
    /// Show the busy intervals an .ics file contributes to a week.
    Busy {
        file: PathBuf,
        #[arg(long)]
        reference: Option<String>,
    },
    /// Generate a schedule for the week from goals and an optional calendar.
    Plan {
        #[arg(long = "goal")]
        goals: Vec<String>,
        #[arg(long)]
        ics: Option<PathBuf>,
        #[arg(long)]
        reference: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unrecognised timestamp `{0}`")]
    Timestamp(String),
    #[error("unknown color `{0}`")]
    Color(String),
    #[error(transparent)]
    Prompt(#[from] inquire::InquireError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub async fn cli(controller: Arc<ScheduleController>, generation_timeout: Duration) {
    let cli = Cli::parse();
    match run_cli(&controller, cli, generation_timeout).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Applies the blocked days, then runs the command.
pub async fn run_cli(
    controller: &ScheduleController,
    cli: Cli,
    generation_timeout: Duration,
) -> Result<String, CliError> {
    for day in cli.blocked {
        controller.on_block_day(day).await;
    }
    run_command(controller, cli.command, generation_timeout).await
}

/// Runs one command and returns what should be printed.
pub async fn run_command(
    controller: &ScheduleController,
    command: Commands,
    generation_timeout: Duration,
) -> Result<String, CliError> {
    let tz = controller.options().tz;
    match command {
        Commands::Events => {
            let entries: Vec<CalendarEntry> = controller.events().await.iter().map(CalendarEntry::from).collect();
            Ok(serde_json::to_string_pretty(&entries)?)
        }
        Commands::Add {
            text,
            start,
            end,
            color,
            progress,
        } => {
            let color = color
                .map(|c| resolve_color(&c).ok_or(CliError::Color(c)))
                .transpose()?;
            let tags = (color.is_some() || progress.is_some()).then_some(EventTags { color, progress });
            let draft = EventDraft {
                text,
                start: timestamp(&start, tz)?,
                end: timestamp(&end, tz)?,
                tags,
            };
            let event = controller.on_user_create(draft).await?;
            Ok(serde_json::to_string_pretty(&event)?)
        }
        Commands::Move { id, start, end } => {
            let event = controller
                .on_user_move(id, timestamp(&start, tz)?, timestamp(&end, tz)?)
                .await?;
            Ok(serde_json::to_string_pretty(&event)?)
        }
        Commands::Delete { id } => {
            controller.on_user_delete(id).await?;
            Ok(format!("Deleted event {}", id))
        }
        Commands::Busy { file, reference } => {
            let reference = reference_or_now(reference.as_deref(), tz)?;
            let intervals = import_file(controller, &file, reference).await?;
            Ok(serde_json::to_string_pretty(&intervals)?)
        }
        Commands::Plan {
            goals,
            ics,
            reference,
        } => {
            let reference = reference_or_now(reference.as_deref(), tz)?;
            let goals = if goals.is_empty() { prompt_goals()? } else { goals };
            for goal in &goals {
                controller.add_goal(goal).await;
            }
            if let Some(file) = ics {
                import_file(controller, &file, reference).await?;
            }
            let outcome = controller.generate_schedule(reference, generation_timeout).await?;
            Ok(serde_json::to_string_pretty(&outcome)?)
        }
    }
}

async fn import_file(
    controller: &ScheduleController,
    file: &Path,
    reference: DateTime<Utc>,
) -> Result<Vec<BusyInterval>, CliError> {
    let raw = tokio::fs::read(file).await.map_err(|source| CliError::Read {
        path: file.to_path_buf(),
        source,
    })?;
    let window = CoverageWindow::week_of(reference, controller.options().tz);
    Ok(controller.import_busy(&raw, window).await?)
}

fn timestamp(raw: &str, tz: Tz) -> Result<DateTime<Utc>, CliError> {
    parse_timestamp(raw.trim(), tz).ok_or_else(|| CliError::Timestamp(raw.to_string()))
}

fn reference_or_now(raw: Option<&str>, tz: Tz) -> Result<DateTime<Utc>, CliError> {
    raw.map(|r| timestamp(r, tz)).unwrap_or_else(|| Ok(Utc::now()))
}

fn prompt_goals() -> Result<Vec<String>, CliError> {
    let mut goals = Vec::new();
    loop {
        let goal = Text::new("Add a goal (leave empty to finish):").prompt()?;
        if goal.trim().is_empty() {
            break;
        }
        goals.push(goal);
    }
    Ok(goals)
}
