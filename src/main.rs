mod config;
mod database;
mod error;
mod models;
mod timer;
mod ui;
mod validation;


use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use dotenvy::dotenv;
use std::path::PathBuf;

use crate::config::logging;
use crate::config::settings::Settings;
use crate::database::Database;
use crate::timer::driver::TICK_INTERVAL;
use crate::timer::{JournalFile, SessionDriver, SystemTimeSource, TimerSession};
use crate::ui::app::App;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("pocut")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Pomodoro timer and task list for the terminal")
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Log at debug level")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("PATH")
                .help("Where to write logs")
                .default_value(logging::DEFAULT_LOG_FILE),
        )
        .arg(
            Arg::new("max-log-size")
                .long("max-log-size")
                .value_name("MB")
                .help("Rotate the log file to <PATH>.1 once it grows past this size")
                .value_parser(clap::value_parser!(u64))
                .default_value("5"),
        )
        .arg(
            Arg::new("task")
                .long("task")
                .value_name("ID")
                .help("Select this task on launch")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("db")
                .long("db")
                .value_name("URL")
                .help("Database URL, overrides POCUT_DATABASE_URL"),
        )
        .get_matches();

    dotenv().ok();
    let mut settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("❌ Invalid settings: {:#}", e);
            eprintln!("  - Check the POCUT_* values in .env");
            std::process::exit(1);
        }
    };
    if let Some(url) = matches.get_one::<String>("db") {
        settings.database_url = url.clone();
    }

    let debug = matches.get_flag("debug") || settings.debug;
    let log_file = matches
        .get_one::<String>("log-file")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(logging::DEFAULT_LOG_FILE));
    let max_log_size = matches
        .get_one::<u64>("max-log-size")
        .copied()
        .unwrap_or(logging::DEFAULT_MAX_LOG_SIZE_MB);
    logging::init(debug, &log_file, max_log_size)?;

    log::info!("Starting pocut {}", env!("CARGO_PKG_VERSION"));
    log::info!("Database URL: {}", settings.database_url);
    let database = match Database::new(&settings.database_url).await {
        Ok(db) => {
            log::info!("Database ready");
            db
        }
        Err(e) => {
            log::error!("Database connection failed: {:?}", e);
            eprintln!("❌ Failed to open database. Please check:");
            eprintln!("  - POCUT_DATABASE_URL in .env (or --db) is a sqlite:// URL");
            eprintln!("  - The directory is writable");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut session = TimerSession::new(SystemTimeSource::new(), settings.durations());
    let journal = JournalFile::new(settings.journal_path.clone());
    let recovered = match SessionDriver::recover(&mut session, &database, &journal).await {
        Ok(recovered) => recovered,
        Err(e) => {
            log::warn!("Ignoring unreadable session journal {}: {}", journal.path().display(), e);
            None
        }
    };

    let (handle, driver) = SessionDriver::spawn(session, database.clone(), Some(journal), TICK_INTERVAL);
    let mut app = App::new(database.clone(), handle, settings);

    match &recovered {
        Some(saved) if saved.pending.is_some() => app.log(format!(
            "Recovered an unsaved stop on task {}. Press [f]/[a] to save it or [r] to discard",
            saved.task_id
        )),
        Some(saved) => app.log(format!(
            "Recovered unfinished session on task {} ({}s banked, paused). Press [s] to resume",
            saved.task_id,
            saved.banked_millis / 1000
        )),
        None => {}
    }
    if let Some(task_id) = matches.get_one::<i64>("task").copied() {
        match database.get_task(task_id).await {
            Ok(task) => {
                app.preselect(task.id);
                app.log(format!("Selected '{}'. Press [s] to start", task.title));
            }
            Err(e) => app.log(format!("--task {}: {}", task_id, e)),
        }
    }

    let result = app.run().await;

    // Dropping the last handle lets the driver write its journal and exit
    drop(app);
    if let Err(e) = driver.await {
        log::error!("Session driver panicked: {}", e);
    }
    database.close().await;
    log::info!("pocut stopped");
    result
}
