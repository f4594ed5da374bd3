use anyhow::Result;
use chrono::Local;

use crate::database::Database;
use crate::error::{TimerError, TimerResult};
use crate::models::{NewTask, Recurrence, Task};
use crate::timer::{Command, CommandOutcome, SessionHandle};
use crate::validation;

/// Command execution context containing app state references
pub struct CommandContext<'a> {
    pub database: &'a Database,
    pub logs: &'a mut Vec<String>,
}

impl CommandContext<'_> {
    pub fn log(&mut self, message: impl AsRef<str>) {
        push_log(self.logs, message);
    }
}

/// Result of executing a command that may require UI refresh
pub struct CommandResult {
    pub should_refresh: bool,
}

impl CommandResult {
    pub fn success_with_refresh() -> Self {
        Self { should_refresh: true }
    }

    pub fn success_no_refresh() -> Self {
        Self { should_refresh: false }
    }
}

pub fn push_log(logs: &mut Vec<String>, message: impl AsRef<str>) {
    logs.push(format!("[{}] {}", Local::now().format("%H:%M:%S"), message.as_ref()));
}

/// `1h 05m`, `12m 30s` or `45s`.
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn parse_priority(input: &str) -> TimerResult<i64> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(3);
    }
    let priority = input
        .parse::<i64>()
        .map_err(|_| TimerError::validation("priority", format!("'{}' is not a number", input)))?;
    validation::validate_priority(priority)?;
    Ok(priority)
}

/// Accepts `none`, `daily`, `weekly Mon,Thu`, `monthly` or `yearly`.
pub fn parse_recurrence(input: &str) -> TimerResult<Recurrence> {
    let input = input.trim();
    let (kind, rest) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
    match kind.to_lowercase().as_str() {
        "" | "none" | "no" => Ok(Recurrence::None),
        "daily" => Ok(Recurrence::Daily),
        "weekly" => {
            let days = validation::parse_days_of_week(rest)?;
            if days.is_empty() {
                return Err(TimerError::validation("recurrence", "weekly needs at least one day, e.g. 'weekly Mon,Thu'"));
            }
            Ok(Recurrence::Weekly(days))
        }
        "monthly" => Ok(Recurrence::Monthly),
        "yearly" => Ok(Recurrence::Yearly),
        other => Err(TimerError::validation("recurrence", format!("unknown repeat '{}'", other))),
    }
}

/// Minutes (`25`) or minutes and seconds (`12:30`), returned as seconds.
pub fn parse_duration_input(field: &'static str, input: &str) -> TimerResult<u64> {
    let input = input.trim();
    let invalid = || TimerError::validation(field, format!("'{}' is not minutes or MM:SS", input));
    let secs = match input.split_once(':') {
        Some((m, s)) => {
            let m: u64 = m.trim().parse().map_err(|_| invalid())?;
            let s: u64 = s.trim().parse().map_err(|_| invalid())?;
            if s >= 60 {
                return Err(invalid());
            }
            m * 60 + s
        }
        None => input.parse::<u64>().map_err(|_| invalid())? * 60,
    };
    validation::validate_phase_secs(field, secs)
}

pub async fn execute_create_task(ctx: &mut CommandContext<'_>, task: &NewTask) -> Result<CommandResult> {
    match ctx.database.create_task(task).await {
        Ok(created) => {
            ctx.log(format!("Created task '{}' (priority {})", created.title, created.priority));
            Ok(CommandResult::success_with_refresh())
        }
        Err(e) => {
            ctx.log(format!("Failed to create task: {}", e));
            Ok(CommandResult::success_no_refresh())
        }
    }
}

pub async fn execute_create_category(ctx: &mut CommandContext<'_>, name: &str) -> Result<CommandResult> {
    match ctx.database.create_category(name).await {
        Ok(category) => {
            ctx.log(format!("Created category '{}'", category.name));
            Ok(CommandResult::success_with_refresh())
        }
        Err(e) => {
            ctx.log(format!("Failed to create category: {}", e));
            Ok(CommandResult::success_no_refresh())
        }
    }
}

pub async fn execute_delete_task(ctx: &mut CommandContext<'_>, task: &Task) -> Result<CommandResult> {
    match ctx.database.delete_task(task.id).await {
        Ok(()) => {
            ctx.log(format!("Deleted task '{}'", task.title));
            Ok(CommandResult::success_with_refresh())
        }
        Err(e) => {
            ctx.log(format!("Failed to delete '{}': {}", task.title, e));
            Ok(CommandResult::success_no_refresh())
        }
    }
}

pub async fn execute_delete_category(ctx: &mut CommandContext<'_>, category_id: i64, name: &str) -> Result<CommandResult> {
    match ctx.database.delete_category(category_id).await {
        Ok(detached) => {
            ctx.log(format!("Deleted category '{}' ({} tasks now uncategorized)", name, detached));
            Ok(CommandResult::success_with_refresh())
        }
        Err(e) => {
            ctx.log(format!("Failed to delete category '{}': {}", name, e));
            Ok(CommandResult::success_no_refresh())
        }
    }
}

pub async fn execute_toggle_completed(ctx: &mut CommandContext<'_>, task: &Task) -> Result<CommandResult> {
    match ctx.database.mark_completed(task.id, !task.completed).await {
        Ok(updated) => {
            let status = if updated.completed { "done" } else { "open" };
            ctx.log(format!("Marked '{}' as {}", updated.title, status));
            Ok(CommandResult::success_with_refresh())
        }
        Err(e) => {
            ctx.log(format!("Failed to update '{}': {}", task.title, e));
            Ok(CommandResult::success_no_refresh())
        }
    }
}

/// Sends a timer command and reports the outcome; rejections are logged, not fatal.
pub async fn execute_timer_command(
    session: &SessionHandle,
    logs: &mut Vec<String>,
    command: Command,
) -> Result<CommandResult> {
    let state = session.snapshot().state;
    match session.send(command).await {
        Ok(CommandOutcome::Flushed(task)) => {
            let verb = if task.completed { "Completed" } else { "Logged attempt on" };
            push_log(
                logs,
                format!(
                    "{} '{}': {} total over {} attempts",
                    verb,
                    task.title,
                    format_duration(task.time_spent),
                    task.attempts
                ),
            );
            Ok(CommandResult::success_with_refresh())
        }
        Ok(CommandOutcome::Applied) => {
            push_log(logs, format!("Timer: {}", command.name()));
            Ok(CommandResult::success_no_refresh())
        }
        Err(e @ TimerError::InvalidTransition { .. }) => {
            push_log(logs, format!("Rejected '{}' (timer {}): {}", command.name(), state.as_str(), e));
            Ok(CommandResult::success_no_refresh())
        }
        Err(e) => {
            push_log(logs, format!("Timer '{}' failed: {}", command.name(), e));
            if matches!(command, Command::Stop { .. }) {
                push_log(logs, "Session kept. Stop again to retry or reset to discard it");
            }
            Ok(CommandResult::success_no_refresh())
        }
    }
}
