use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::database::Database;
use crate::error::{TimerError, TimerResult};
use crate::models::Task;
use crate::timer::clock::{SessionClock, SystemTimeSource, TimeSource};
use crate::timer::journal::SessionJournal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Abandoned => "abandoned",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Abandoned)
    }
}

/// Display-only label; never gates a transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Work,
    Break,
}

impl Phase {
    pub fn toggled(self) -> Self {
        match self {
            Phase::Work => Phase::Break,
            Phase::Break => Phase::Work,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Work => "Work",
            Phase::Break => "Break",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start(i64),
    Pause,
    Resume,
    Stop { completed: bool },
    Reset,
    TogglePhase,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start(_) => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop { .. } => "stop",
            Command::Reset => "reset",
            Command::TogglePhase => "toggle phase",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDurations {
    pub work_secs: u64,
    pub break_secs: u64,
}

impl PhaseDurations {
    pub fn for_phase(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Work => self.work_secs,
            Phase::Break => self.break_secs,
        }
    }
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            work_secs: 1500,
            break_secs: 300,
        }
    }
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub elapsed_seconds: u64,
    pub phase: Phase,
    pub task_id: Option<i64>,
    pub phase_duration: u64,
    pub remaining_seconds: u64,
    pub time_up: bool,
    /// A stop failed to persist and is waiting for a retry or a reset.
    pub flush_pending: bool,
    pub flushing: bool,
}

impl SessionSnapshot {
    /// Share of the phase still remaining, 0-100.
    pub fn progress_percent(&self) -> u16 {
        if self.phase_duration == 0 {
            return 0;
        }
        ((self.remaining_seconds.min(self.phase_duration) * 100) / self.phase_duration) as u16
    }

    pub fn clock_label(&self) -> String {
        format!("{:02}:{:02}", self.remaining_seconds / 60, self.remaining_seconds % 60)
    }
}

/// A stop that has banked its seconds but not yet reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFlush {
    pub task_id: i64,
    pub seconds: u64,
    pub completed: bool,
    /// Counters already written; a retry only needs the completion flag.
    pub applied: bool,
    /// The task's attempt count before this flush, used after a crash to
    /// tell whether the counter write landed.
    #[serde(default)]
    pub attempts_before: Option<i64>,
}

impl PendingFlush {
    /// Writes the session result, skipping any step that already succeeded.
    pub async fn run(mut self, db: &Database) -> (Self, TimerResult<Task>) {
        if !self.applied {
            match db.apply_session_result(self.task_id, self.seconds, 1).await {
                Ok(task) => {
                    self.applied = true;
                    if !self.completed {
                        return (self, Ok(task));
                    }
                }
                Err(e) => return (self, Err(e)),
            }
        }

        let result = if self.completed {
            db.mark_completed(self.task_id, true).await
        } else {
            db.get_task(self.task_id).await
        };
        (self, result)
    }
}

pub struct TimerSession<S: TimeSource = SystemTimeSource> {
    state: SessionState,
    task_id: Option<i64>,
    clock: SessionClock<S>,
    phase: Phase,
    /// Elapsed seconds at the moment the current phase began.
    phase_offset: u64,
    durations: PhaseDurations,
    pending: Option<PendingFlush>,
    flushing: bool,
}

impl<S: TimeSource> TimerSession<S> {
    pub fn new(source: S, durations: PhaseDurations) -> Self {
        Self {
            state: SessionState::Idle,
            task_id: None,
            clock: SessionClock::new(source),
            phase: Phase::Work,
            phase_offset: 0,
            durations,
            pending: None,
            flushing: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending_flush(&self) -> Option<PendingFlush> {
        self.pending
    }

    pub fn set_durations(&mut self, durations: PhaseDurations) {
        self.durations = durations;
    }

    fn reject(&self, command: &'static str) -> TimerError {
        let state = if self.flushing {
            "flushing"
        } else if self.pending.is_some() {
            "awaiting flush retry"
        } else {
            self.state.as_str()
        };
        log::warn!("Rejected '{}' while {}", command, state);
        TimerError::InvalidTransition { state, command }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let elapsed_seconds = match self.state {
            SessionState::Idle => 0,
            _ => self.clock.elapsed(),
        };
        let phase_duration = self.durations.for_phase(self.phase);
        let in_phase = elapsed_seconds.saturating_sub(self.phase_offset);
        let remaining_seconds = phase_duration.saturating_sub(in_phase);
        SessionSnapshot {
            state: self.state,
            elapsed_seconds,
            phase: self.phase,
            task_id: self.task_id,
            phase_duration,
            remaining_seconds,
            time_up: self.state.is_in_progress() && remaining_seconds == 0,
            flush_pending: self.pending.is_some() && !self.flushing,
            flushing: self.flushing,
        }
    }

    pub fn start(&mut self, task_id: i64) -> TimerResult<()> {
        if self.flushing || self.pending.is_some() || self.state.is_in_progress() {
            return Err(self.reject("start"));
        }
        if self.state.is_terminal() {
            log::debug!("Clearing {} session on task {:?}", self.state.as_str(), self.task_id);
        }
        self.clock.reset()?;
        self.clock.start();
        self.state = SessionState::Active;
        self.task_id = Some(task_id);
        self.phase_offset = 0;
        log::info!("Session started on task {} ({} phase)", task_id, self.phase.label());
        Ok(())
    }

    pub fn pause(&mut self) -> TimerResult<u64> {
        if self.flushing || self.pending.is_some() || self.state != SessionState::Active {
            return Err(self.reject("pause"));
        }
        let banked = self.clock.pause();
        self.state = SessionState::Paused;
        log::info!("Session paused with {}s banked", banked);
        Ok(banked)
    }

    pub fn resume(&mut self) -> TimerResult<()> {
        if self.flushing || self.pending.is_some() || self.state != SessionState::Paused {
            return Err(self.reject("resume"));
        }
        self.clock.resume();
        self.state = SessionState::Active;
        log::info!("Session resumed");
        Ok(())
    }

    /// First half of `stop`: freezes the clock and records what must be written.
    /// Retrying after a failed flush reuses the recorded seconds.
    pub fn begin_stop(&mut self, completed: bool) -> TimerResult<PendingFlush> {
        if self.flushing {
            return Err(self.reject("stop"));
        }
        let pending = match self.pending {
            Some(pending) => PendingFlush { completed, ..pending },
            None => {
                if !self.state.is_in_progress() {
                    return Err(self.reject("stop"));
                }
                let Some(task_id) = self.task_id else {
                    return Err(self.reject("stop"));
                };
                let seconds = self.clock.pause();
                PendingFlush {
                    task_id,
                    seconds,
                    completed,
                    applied: false,
                    attempts_before: None,
                }
            }
        };
        self.pending = Some(pending);
        self.flushing = true;
        Ok(pending)
    }

    /// Records the pre-flush attempt count on the pending flush, once.
    pub fn set_flush_baseline(&mut self, attempts: i64) -> Option<PendingFlush> {
        let pending = self.pending.as_mut()?;
        if pending.attempts_before.is_none() && !pending.applied {
            pending.attempts_before = Some(attempts);
        }
        Some(*pending)
    }

    /// Second half of `stop`: advances to a terminal state only if the write succeeded.
    pub fn finish_stop(&mut self, pending: PendingFlush, result: TimerResult<Task>) -> TimerResult<Task> {
        self.flushing = false;
        match result {
            Ok(task) => {
                self.pending = None;
                self.state = if pending.completed {
                    SessionState::Completed
                } else {
                    SessionState::Abandoned
                };
                log::info!(
                    "Session on task {} {} after {}s",
                    pending.task_id,
                    self.state.as_str(),
                    pending.seconds
                );
                Ok(task)
            }
            Err(e) => {
                self.pending = Some(pending);
                log::error!(
                    "Failed to flush {}s to task {}: {}. Session kept for retry",
                    pending.seconds,
                    pending.task_id,
                    e
                );
                Err(e)
            }
        }
    }

    pub async fn stop(&mut self, db: &Database, completed: bool) -> TimerResult<Task> {
        let pending = self.begin_stop(completed)?;
        let (pending, result) = pending.run(db).await;
        self.finish_stop(pending, result)
    }

    /// Drops the session without writing anything. Banked time is lost.
    pub fn reset(&mut self) -> TimerResult<()> {
        if self.flushing {
            return Err(self.reject("reset"));
        }
        if self.state == SessionState::Idle && self.pending.is_none() {
            return Ok(());
        }
        let discarded = self.clock.pause();
        self.clock.reset()?;
        if self.state.is_in_progress() {
            log::info!(
                "Session on task {:?} reset, discarding {}s without credit",
                self.task_id,
                discarded
            );
        }
        self.state = SessionState::Idle;
        self.task_id = None;
        self.phase_offset = 0;
        self.pending = None;
        Ok(())
    }

    pub fn toggle_phase(&mut self) -> Phase {
        self.phase = self.phase.toggled();
        self.phase_offset = match self.state {
            SessionState::Idle => 0,
            _ => self.clock.elapsed(),
        };
        log::info!("Switched to {} phase", self.phase.label());
        self.phase
    }

    /// Applies a synchronous command. `Stop` needs the store and goes through `stop`.
    pub fn apply(&mut self, command: Command) -> TimerResult<()> {
        match command {
            Command::Start(task_id) => self.start(task_id),
            Command::Pause => self.pause().map(|_| ()),
            Command::Resume => self.resume(),
            Command::Reset => self.reset(),
            Command::TogglePhase => {
                self.toggle_phase();
                Ok(())
            }
            Command::Stop { .. } => {
                log::warn!("Rejected 'stop': it has to go through the store");
                Err(TimerError::InvalidTransition {
                    state: "detached from the store",
                    command: "stop",
                })
            }
        }
    }

    /// In-progress session state worth keeping across a restart.
    pub fn journal(&self) -> Option<SessionJournal> {
        if !self.state.is_in_progress() {
            return None;
        }
        let task_id = self.task_id?;
        Some(SessionJournal {
            task_id,
            state: self.state,
            banked_millis: self.clock.elapsed_duration().as_millis() as u64,
            phase: self.phase,
            pending: self.pending,
            saved_at: Utc::now(),
        })
    }

    /// Rebuilds an interrupted session as paused. Only legal from idle.
    /// An interrupted stop comes back as a pending flush, so the next `stop`
    /// retries it instead of counting the session again.
    pub fn restore(&mut self, journal: &SessionJournal) -> TimerResult<()> {
        if self.state != SessionState::Idle || self.pending.is_some() || self.flushing {
            return Err(self.reject("restore"));
        }
        self.clock.restore(Duration::from_millis(journal.banked_millis))?;
        self.state = SessionState::Paused;
        self.task_id = Some(journal.task_id);
        self.phase = journal.phase;
        self.phase_offset = 0;
        self.pending = journal.pending;
        match journal.pending {
            Some(pending) => log::info!(
                "Restored unsaved stop on task {} ({}s, counters written: {})",
                pending.task_id,
                pending.seconds,
                pending.applied
            ),
            None => log::info!(
                "Restored session on task {} with {}s banked",
                journal.task_id,
                self.clock.elapsed()
            ),
        }
        Ok(())
    }
}
