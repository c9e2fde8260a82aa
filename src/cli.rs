// src/cli.rs
use clap::{Command, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Guided workout sessions with rest timers and sync", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DayBoundaryCli {
    Local,
    Utc,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitsCli {
    Metric,
    Imperial,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the training plan
    #[command(subcommand)]
    Plan(PlanCommands),
    /// Run a training session
    #[command(subcommand)]
    Session(SessionCommands),
    /// Show recorded history for an exercise
    History {
        /// Exercise name
        exercise: String,
        /// Show only the last N entries
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Export all history as CSV to stdout (or a file)
    ExportHistory {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Save pre-fill defaults for an exercise in the current plan
    SetDefaults {
        exercise: String,
        #[arg(short, long)]
        weight: Option<f64>,
        #[arg(short, long)]
        repeats: Option<u32>,
        /// Rest time in seconds
        #[arg(short = 't', long)]
        rest: Option<u32>,
    },
    /// First-time setup: save starting weights for every exercise of a training
    Setup {
        training: String,
        /// Starting weight per exercise, in plan order (e.g. --weights 40,20,0)
        #[arg(long, value_delimiter = ',')]
        weights: Vec<f64>,
    },
    /// Synchronise with the server
    #[command(subcommand)]
    Sync(SyncCommands),
    /// Configure the sync server. Omit both to disable sync.
    SetServer {
        url: Option<String>,
        trainee_id: Option<String>,
    },
    /// Set the countdown cue volume (0 mutes)
    SetVolume {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        volume: u8,
    },
    /// Set the fallback rest time in seconds
    SetDefaultRest { seconds: u32 },
    /// Choose when daily progress resets
    SetDayBoundary {
        #[arg(value_enum)]
        boundary: DayBoundaryCli,
    },
    SetUnits {
        #[arg(value_enum)]
        units: UnitsCli,
    },
    /// Override the displayed title and/or note of an exercise (empty string clears)
    Customize {
        exercise: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Show the path to the database file
    DbPath,
    /// Show the path to the config file
    ConfigPath,
    /// Generate shell completion script
    GenerateCompletion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum PlanCommands {
    /// Import a plan from a JSON or TOML file
    Import { file: PathBuf },
    /// Pull the assigned plan from the server
    Pull,
    /// Show the trainings and exercises of the current plan
    Show,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Start (or restart) a session for a training
    Start {
        training: String,
        /// Skip the start-up pull from the server
        #[arg(long)]
        offline: bool,
    },
    /// Show the current session
    Status,
    /// Start an exercise (name or 1-based position; defaults to the selected one)
    Begin { exercise: Option<String> },
    /// Set the working weight/repeats
    Values {
        #[arg(short, long)]
        exercise: Option<String>,
        #[arg(short, long)]
        weight: Option<f64>,
        #[arg(short, long)]
        repeats: Option<u32>,
    },
    /// Override the rest time (seconds, 0 clears)
    Rest {
        seconds: u32,
        #[arg(short, long)]
        exercise: Option<String>,
    },
    /// Finish the current set
    FinishSet { exercise: Option<String> },
    /// End an exercise now, filling the remaining sets
    Finish { exercise: Option<String> },
    /// Replace the sets of a completed exercise, e.g. "40x10,45x8"
    EditSets {
        exercise: String,
        sets: String,
    },
    /// Select an exercise by 1-based position
    Select { position: usize },
    /// Move to the next unfinished exercise
    Next,
    /// Follow running rest timers until they end
    Watch,
    /// Discard the session and today's progress
    Reset,
    /// Clear a completed session
    Done,
}

#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Replace local state with the server record
    Pull,
    /// Push a full copy of local state
    Push,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

pub fn build_cli_command() -> Command {
    Cli::command()
}
