//src/main.rs
mod cli;

use anyhow::{bail, Context, Result};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use session_coach_lib::{
    parse_color, AdvanceOutcome, AppService, DayBoundary, ExerciseDefaults, ExerciseStatus,
    SessionEvent, SetOutcome, SetResult, Units,
};
use std::collections::BTreeMap;
use std::io::stdout;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("session_coach_lib=warn,session_coach=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = cli::parse_args();

    if let cli::Commands::GenerateCompletion { shell } = cli_args.command {
        let mut cmd = cli::build_cli_command();
        let bin_name = cmd.get_name().to_string();
        eprintln!("Generating completion script for {shell}...");
        clap_complete::generate(shell, &mut cmd, bin_name, &mut stdout());
        return Ok(());
    }

    init_tracing();
    let mut service =
        AppService::initialize().context("Failed to initialize application service")?;

    let result = run(&mut service, cli_args.command).await;

    // Pushes are best-effort; give queued ones a chance before the process exits
    if let Some(stats) = service.flush_sync().await {
        if stats.failed > 0 {
            eprintln!("Note: {} sync push(es) failed; they will be superseded on next start.", stats.failed);
        }
    }
    service.dispose().context("Failed to close database")?;
    result
}

async fn run(service: &mut AppService, command: cli::Commands) -> Result<()> {
    match command {
        cli::Commands::GenerateCompletion { .. } => {
            unreachable!("Completion generation should have exited already");
        }
        cli::Commands::Plan(plan) => run_plan(service, plan).await?,
        cli::Commands::Session(cmd) => run_session(service, cmd).await?,
        cli::Commands::History { exercise, limit } => {
            let entries = service.history(&exercise);
            if entries.is_empty() {
                println!("No history for '{exercise}'.");
            } else {
                let mut table = styled_table(service, &["Date", "Sets", "Weight", "Reps", "Rest"]);
                for entry in entries.iter().take(limit) {
                    table.add_row(vec![
                        Cell::new(entry.date.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")),
                        Cell::new(format!("{}/{}", entry.completed_sets, entry.total_sets)),
                        Cell::new(format_sets(&entry.sets_data, service.config.units)),
                        Cell::new(opt(entry.repeats)),
                        Cell::new(entry.rest_time.map_or("-".to_string(), |r| format!("{r}s"))),
                    ]);
                }
                println!("{table}");
            }
        }
        cli::Commands::ExportHistory { output } => match output {
            Some(path) => {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("Failed to create {path:?}"))?;
                service.export_history_csv(file)?;
                println!("History exported to {}", path.display());
            }
            None => service.export_history_csv(stdout())?,
        },
        cli::Commands::SetDefaults { exercise, weight, repeats, rest } => {
            service.save_exercise_defaults(
                &exercise,
                ExerciseDefaults { weight, repeats, rest_time: rest },
            )?;
            println!("Saved defaults for '{exercise}'.");
        }
        cli::Commands::Setup { training, weights } => {
            let Some(plan_training) = service.catalog().training(&training).cloned() else {
                bail!("Training '{training}' is not in the current plan.");
            };
            if service.first_time_completed() {
                println!("First-time setup was already completed; updating defaults.");
            }
            let initial: BTreeMap<String, ExerciseDefaults> = plan_training
                .exercises
                .iter()
                .zip(weights.iter().chain(std::iter::repeat(&0.0)))
                .map(|(spec, w)| {
                    (
                        spec.name.clone(),
                        ExerciseDefaults {
                            weight: Some(*w),
                            repeats: None,
                            rest_time: None,
                        },
                    )
                })
                .collect();
            service.complete_first_time_setup(&initial)?;
            println!("Setup complete for {} exercises of '{}'.", initial.len(), plan_training.name);
        }
        cli::Commands::Sync(cli::SyncCommands::Pull) => {
            if service.sync_engine().is_none() {
                bail!("Sync is not configured. Use 'set-server <url> <trainee-id>'.");
            }
            match service.bootstrap().await? {
                Some(summary) => println!(
                    "Pulled server record: {} exercises with history, {} trainings with progress today.",
                    summary.exercises_with_history, summary.trainings_with_progress
                ),
                None => println!("Pull failed; local data left unchanged (see log)."),
            }
        }
        cli::Commands::Sync(cli::SyncCommands::Push) => {
            service.queue_full_resync()?;
            println!("Full resync queued.");
        }
        cli::Commands::SetServer { url, trainee_id } => {
            service.set_sync_server(url, trainee_id)?;
            match (&service.config.sync.server_url, &service.config.sync.trainee_id) {
                (Some(url), Some(id)) => println!("Sync enabled: {url} as trainee {id}"),
                _ => println!("Sync disabled."),
            }
        }
        cli::Commands::SetVolume { volume } => {
            service.set_volume(volume)?;
            println!("Volume set to {volume}.");
        }
        cli::Commands::SetDefaultRest { seconds } => {
            service.set_default_rest(seconds)?;
            println!("Fallback rest time set to {seconds}s.");
        }
        cli::Commands::SetDayBoundary { boundary } => {
            let boundary = match boundary {
                cli::DayBoundaryCli::Local => DayBoundary::Local,
                cli::DayBoundaryCli::Utc => DayBoundary::Utc,
            };
            service.set_day_boundary(boundary)?;
            println!("Daily progress now resets at {boundary} midnight.");
        }
        cli::Commands::SetUnits { units } => {
            let units = match units {
                cli::UnitsCli::Metric => Units::Metric,
                cli::UnitsCli::Imperial => Units::Imperial,
            };
            service.set_units(units)?;
            println!("Units set to {units:?}.");
        }
        cli::Commands::Customize { exercise, title, note } => {
            service.set_custom_exercise(&exercise, title, note)?;
            println!("Updated display overrides for '{exercise}'.");
        }
        cli::Commands::DbPath => println!("Database file is located at: {:?}", service.get_db_path()),
        cli::Commands::ConfigPath => {
            println!("Config file is located at: {:?}", service.get_config_path());
        }
    }
    Ok(())
}

async fn run_plan(service: &mut AppService, cmd: cli::PlanCommands) -> Result<()> {
    match cmd {
        cli::PlanCommands::Import { file } => {
            let catalog = service.import_plan(&file)?;
            println!(
                "Imported plan '{}' with trainings: {}",
                catalog.plan_id,
                catalog.training_names().join(", ")
            );
        }
        cli::PlanCommands::Pull => {
            if service.sync_engine().is_none() {
                bail!("Sync is not configured. Use 'set-server <url> <trainee-id>'.");
            }
            service.bootstrap().await?;
            println!("Current plan: '{}'", service.catalog().plan_id);
        }
        cli::PlanCommands::Show => {
            let catalog = service.catalog();
            if catalog.trainings.is_empty() {
                println!("No plan loaded. Use 'plan import <file>' or 'plan pull'.");
                return Ok(());
            }
            println!("Plan '{}'", catalog.plan_id);
            for training in &catalog.trainings {
                let mut table =
                    styled_table(service, &["#", "Exercise", "Sets", "Reps", "Rest", "Muscles"]);
                for (i, ex) in training.exercises.iter().enumerate() {
                    table.add_row(vec![
                        Cell::new(i + 1),
                        Cell::new(&ex.name),
                        Cell::new(ex.number_of_sets),
                        Cell::new(format!("{}-{}", ex.min_reps, ex.max_reps)),
                        Cell::new(format!("{}-{}s", ex.min_rest, ex.max_rest)),
                        Cell::new(ex.muscle_group.as_deref().unwrap_or("-")),
                    ]);
                }
                println!("\n{}\n{table}", training.name);
            }
        }
    }
    Ok(())
}

/// Resolves a name or 1-based position to an exercise name; `None` means the
/// selected exercise.
fn resolve_exercise(service: &AppService, identifier: Option<&str>) -> Result<String> {
    let Some(view) = service.session_view() else {
        bail!("No training session is active. Start one with 'session start <training>'.");
    };
    let found = match identifier.map(str::trim) {
        None => view.exercises.get(view.current_exercise_index),
        Some(id) => match id.parse::<usize>() {
            Ok(pos) if pos >= 1 => view.exercises.get(pos - 1),
            _ => view
                .exercises
                .iter()
                .find(|e| e.name.eq_ignore_ascii_case(id) || e.title.eq_ignore_ascii_case(id)),
        },
    };
    found
        .map(|e| e.name.clone())
        .with_context(|| format!("Exercise '{}' not found in this session", identifier.unwrap_or("")))
}

fn parse_sets(raw: &str) -> Result<Vec<SetResult>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|set| {
            let (w, r) = set
                .split_once(['x', 'X'])
                .with_context(|| format!("Expected WEIGHTxREPS, got '{set}'"))?;
            let weight: f64 = w.trim().parse().with_context(|| format!("Invalid weight '{w}'"))?;
            let repeats: u32 = r.trim().parse().with_context(|| format!("Invalid repeats '{r}'"))?;
            Ok(SetResult::new(Some(weight), Some(repeats)))
        })
        .collect()
}

async fn run_session(service: &mut AppService, cmd: cli::SessionCommands) -> Result<()> {
    match cmd {
        cli::SessionCommands::Start { training, offline } => {
            if !offline {
                service.bootstrap().await?;
            }
            service.with_session(|c| c.select_training(&training).map(|_| ()))?;
            print_view(service);
        }
        cli::SessionCommands::Status => {
            let (expired, events) = service.with_session(|c| c.resume())?;
            report_events(&events);
            if expired.is_empty() && service.session_view().is_none() {
                println!("No session in progress.");
            }
            print_view(service);
        }
        cli::SessionCommands::Begin { exercise } => {
            let name = resolve_exercise(service, exercise.as_deref())?;
            let (started, _) = service.with_session(|c| c.start(&name))?;
            if started {
                println!("Started '{name}'.");
            } else {
                println!("'{name}' is already running or completed.");
            }
            print_view(service);
        }
        cli::SessionCommands::Values { exercise, weight, repeats } => {
            let name = resolve_exercise(service, exercise.as_deref())?;
            let current = service.controller().exercise_state(&name).cloned().unwrap_or_default();
            service.with_session(|c| {
                c.set_working_values(&name, weight.or(current.weight), repeats.or(current.repeats))
            })?;
            print_view(service);
        }
        cli::SessionCommands::Rest { seconds, exercise } => {
            let name = resolve_exercise(service, exercise.as_deref())?;
            service.with_session(|c| c.set_custom_rest_time(&name, Some(seconds)))?;
            println!("Rest for '{name}' set to {seconds}s.");
        }
        cli::SessionCommands::FinishSet { exercise } => {
            let name = resolve_exercise(service, exercise.as_deref())?;
            let (outcome, events) = service.with_session(|c| {
                c.resume()?;
                c.finish_set(&name)
            })?;
            match outcome {
                SetOutcome::Resting { next_set, rest_seconds } => {
                    println!("Set done. Rest {rest_seconds}s before set {next_set}.");
                }
                SetOutcome::Completed => println!("'{name}' completed."),
                SetOutcome::Ignored => {
                    println!("Cannot finish a set now: start the exercise first or wait for the rest to end.");
                }
            }
            report_events(&events);
        }
        cli::SessionCommands::Finish { exercise } => {
            let name = resolve_exercise(service, exercise.as_deref())?;
            let (outcome, events) = service.with_session(|c| c.force_complete(&name))?;
            if outcome == SetOutcome::Ignored {
                println!("'{name}' is already completed.");
            }
            report_events(&events);
        }
        cli::SessionCommands::EditSets { exercise, sets } => {
            let name = resolve_exercise(service, Some(&exercise))?;
            let sets = parse_sets(&sets)?;
            service.with_session(|c| c.edit_completed_sets(&name, sets))?;
            println!("Updated sets for '{name}'.");
        }
        cli::SessionCommands::Select { position } => {
            if position == 0 {
                bail!("Positions start at 1.");
            }
            service.with_session(|c| c.select_exercise(position - 1))?;
            print_view(service);
        }
        cli::SessionCommands::Next => {
            let (outcome, events) = service.with_session(|c| c.advance())?;
            match outcome {
                AdvanceOutcome::Selected(i) => println!("Next up: exercise {}.", i + 1),
                AdvanceOutcome::SessionCompleted => {}
                AdvanceOutcome::NoIncomplete => println!("Nothing left to select."),
            }
            report_events(&events);
            print_view(service);
        }
        cli::SessionCommands::Watch => watch(service).await?,
        cli::SessionCommands::Reset => {
            service.with_session(|c| c.reset())?;
            println!("Session reset.");
        }
        cli::SessionCommands::Done => {
            let (cleared, _) = service.with_session(|c| c.acknowledge_completion())?;
            if cleared {
                println!("Session closed. Well done!");
            } else {
                println!("The session is not complete yet.");
            }
        }
    }
    Ok(())
}

/// 1 Hz loop while any rest is running.
async fn watch(service: &mut AppService) -> Result<()> {
    service.with_session(|c| c.resume())?;
    if !service.controller().needs_tick() {
        println!("No rest timer running.");
        return Ok(());
    }
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    while service.controller().needs_tick() {
        interval.tick().await;
        let (_, events) = service.with_session(|c| c.tick())?;
        if let Some(view) = service.session_view() {
            for ex in view.exercises.iter().filter(|e| e.status == ExerciseStatus::Resting) {
                let cue = if ex.countdown_cue { " *" } else { "" };
                println!("{}: {}s{}", ex.title, ex.time_left, cue);
            }
        }
        report_events(&events);
    }
    Ok(())
}

fn report_events(events: &[SessionEvent]) {
    for event in events {
        match event {
            SessionEvent::ExerciseCompleted(record) => println!(
                "Recorded '{}': {} of {} sets.",
                record.exercise, record.entry.completed_sets, record.entry.total_sets
            ),
            SessionEvent::HistoryEdited { exercise } => println!("History for '{exercise}' updated."),
            SessionEvent::RestExpired { exercise } => println!("Rest over for '{exercise}'. Go!"),
            SessionEvent::SessionCompleted { training } => {
                println!("Congratulations! Training '{training}' is complete.");
            }
        }
    }
}

fn styled_table(service: &AppService, headers: &[&str]) -> Table {
    let color = parse_color(&service.config.theme.header_color)
        .map(Color::from)
        .unwrap_or(Color::Green);
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).fg(color).add_attribute(Attribute::Bold)),
        );
    table
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or("-".to_string(), |v| v.to_string())
}

fn format_sets(sets: &[SetResult], units: Units) -> String {
    if sets.is_empty() {
        return "-".to_string();
    }
    sets.iter()
        .map(|s| format!("{}{}x{}", opt(s.weight), units.weight_label(), opt(s.repeats)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_view(service: &AppService) {
    let Some(view) = service.session_view() else {
        return;
    };
    let mut table = styled_table(
        service,
        &["#", "Exercise", "Status", "Set", "Weight", "Reps", "Rest", "Done"],
    );
    for ex in &view.exercises {
        let marker = if ex.index == view.current_exercise_index { ">" } else { "" };
        let status = match ex.status {
            ExerciseStatus::Resting => format!("Resting {}s", ex.time_left),
            other => other.to_string(),
        };
        table.add_row(vec![
            Cell::new(format!("{marker}{}", ex.index + 1)),
            Cell::new(&ex.title),
            Cell::new(status),
            Cell::new(format!("{}/{}", ex.current_set, ex.total_sets)),
            Cell::new(opt(ex.weight)),
            Cell::new(opt(ex.repeats)),
            Cell::new(format!("{}s", ex.rest_seconds)),
            Cell::new(format_sets(&ex.sets_data, service.config.units)),
        ]);
    }
    let state = if view.is_complete { " (complete)" } else { "" };
    println!("Training '{}'{state}", view.training);
    println!("{table}");
    if let Some(current) = view.exercises.get(view.current_exercise_index) {
        if let Some(note) = &current.note {
            println!("Note: {note}");
        }
        if let Some(link) = &current.video_link {
            println!("Video: {link}");
        }
    }
}
