use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::database::Database;
use crate::error::{TimerError, TimerResult};
use crate::models::Task;
use crate::timer::clock::TimeSource;
use crate::timer::journal::{JournalFile, SessionJournal};
use crate::timer::session::{Command, PhaseDurations, SessionSnapshot, TimerSession};

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Command(Command),
    SetDurations(PhaseDurations),
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::Command(command) => command.name(),
            Request::SetDurations(_) => "change durations",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Applied,
    /// The session was stopped and its result written to this task.
    Flushed(Task),
}

struct Envelope {
    request: Request,
    reply: oneshot::Sender<TimerResult<CommandOutcome>>,
}

/// Cheap handle the UI uses to drive the session and read snapshots.
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<Envelope>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn send(&self, command: Command) -> TimerResult<CommandOutcome> {
        self.request(Request::Command(command)).await
    }

    pub async fn set_durations(&self, durations: PhaseDurations) -> TimerResult<()> {
        self.request(Request::SetDurations(durations)).await.map(|_| ())
    }

    async fn request(&self, request: Request) -> TimerResult<CommandOutcome> {
        let (reply, response) = oneshot::channel();
        let command = request.name();
        let gone = || TimerError::InvalidTransition {
            state: "shut down",
            command,
        };
        self.requests
            .send(Envelope { request, reply })
            .await
            .map_err(|_| gone())?;
        response.await.map_err(|_| gone())?
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

/// Owns the timer session; the only writer of task counters while the app runs.
pub struct SessionDriver<S: TimeSource> {
    session: TimerSession<S>,
    db: Database,
    journal: Option<JournalFile>,
    snapshots: watch::Sender<SessionSnapshot>,
    tick: Duration,
}

impl<S: TimeSource + 'static> SessionDriver<S> {
    /// Restores an unfinished session from the journal, if there is one for a live task.
    pub async fn recover(
        session: &mut TimerSession<S>,
        db: &Database,
        journal: &JournalFile,
    ) -> TimerResult<Option<SessionJournal>> {
        let Some(mut saved) = journal.load()? else {
            return Ok(None);
        };
        match db.get_task(saved.task_id).await {
            Ok(task) => {
                // A crash right after the counter write leaves `applied` unset;
                // the attempt count tells whether the write landed.
                if let Some(pending) = saved.pending.as_mut() {
                    if !pending.applied && pending.attempts_before.is_some_and(|n| task.attempts > n) {
                        log::info!("Counters for the interrupted stop on task {} were already written", task.id);
                        pending.applied = true;
                    }
                }
                session.restore(&saved)?;
                Ok(Some(saved))
            }
            Err(TimerError::NotFound { .. }) => {
                log::warn!(
                    "Journal refers to deleted task {}; dropping {}ms of banked time",
                    saved.task_id,
                    saved.banked_millis
                );
                journal.clear()?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn spawn(
        session: TimerSession<S>,
        db: Database,
        journal: Option<JournalFile>,
        tick: Duration,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (requests, inbox) = mpsc::channel(32);
        let (snapshots, snapshot_rx) = watch::channel(session.snapshot());
        let driver = Self {
            session,
            db,
            journal,
            snapshots,
            tick,
        };
        let task = tokio::spawn(driver.run(inbox));
        let handle = SessionHandle {
            requests,
            snapshots: snapshot_rx,
        };
        (handle, task)
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Envelope>) {
        log::debug!("Session driver started (tick {:?})", self.tick);
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.publish(),
                envelope = inbox.recv() => {
                    let Some(Envelope { request, reply }) = envelope else {
                        break;
                    };
                    let result = self.handle(request, &mut inbox).await;
                    if let Err(e) = &result {
                        log::warn!("{} failed: {}", request.name(), e);
                    }
                    self.write_journal();
                    self.publish();
                    let _ = reply.send(result);
                }
            }
        }

        // Keep an interrupted session recoverable on the next launch
        self.write_journal();
        log::debug!("Session driver stopped");
    }

    async fn handle(
        &mut self,
        request: Request,
        inbox: &mut mpsc::Receiver<Envelope>,
    ) -> TimerResult<CommandOutcome> {
        match request {
            Request::SetDurations(durations) => {
                self.session.set_durations(durations);
                Ok(CommandOutcome::Applied)
            }
            Request::Command(Command::Start(task_id)) => {
                if self.session.state().is_in_progress() || self.session.pending_flush().is_some() {
                    return self.session.start(task_id).map(|_| CommandOutcome::Applied);
                }
                self.db.get_task(task_id).await?;
                self.session.start(task_id)?;
                Ok(CommandOutcome::Applied)
            }
            Request::Command(Command::Stop { completed }) => {
                self.stop(completed, inbox).await.map(CommandOutcome::Flushed)
            }
            Request::Command(command) => {
                self.session.apply(command)?;
                Ok(CommandOutcome::Applied)
            }
        }
    }

    async fn stop(&mut self, completed: bool, inbox: &mut mpsc::Receiver<Envelope>) -> TimerResult<Task> {
        let mut pending = self.session.begin_stop(completed)?;
        if pending.attempts_before.is_none() && !pending.applied {
            match self.db.get_task(pending.task_id).await {
                Ok(task) => {
                    if let Some(updated) = self.session.set_flush_baseline(task.attempts) {
                        pending = updated;
                    }
                }
                Err(e) => log::warn!("Could not read task {} before flushing: {}", pending.task_id, e),
            }
        }
        // Journal the stop before the store write
        self.write_journal();
        self.publish();

        let db = self.db.clone();
        let flush = pending.run(&db);
        tokio::pin!(flush);

        let (pending, result) = loop {
            tokio::select! {
                outcome = &mut flush => break outcome,
                Some(Envelope { request, reply }) = inbox.recv() => {
                    log::warn!("Rejected '{}' while flushing", request.name());
                    let _ = reply.send(Err(TimerError::InvalidTransition {
                        state: "flushing",
                        command: request.name(),
                    }));
                }
            }
        };
        self.session.finish_stop(pending, result)
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }

    fn write_journal(&self) {
        let Some(journal) = &self.journal else {
            return;
        };
        let result = match self.session.journal() {
            Some(entry) => journal.save(&entry),
            None => journal.clear(),
        };
        if let Err(e) = result {
            log::warn!("Could not update session journal: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use crate::timer::clock::ManualTimeSource;
    use crate::timer::session::{PendingFlush, Phase, SessionState};
    use chrono::Utc;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
    use sqlx::Connection;
    use tempfile::{tempdir, TempDir};

    async fn setup() -> (Database, TempDir, ManualTimeSource) {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).await.unwrap();
        (db, dir, ManualTimeSource::new())
    }

    #[tokio::test]
    async fn test_driver_runs_full_session() {
        let (db, dir, time) = setup().await;
        let task = db.create_task(&NewTask::new("driven", 2)).await.unwrap();
        let journal = JournalFile::new(dir.path().join("session.json"));
        let session = TimerSession::new(time.clone(), PhaseDurations::default());
        let (handle, _task) =
            SessionDriver::spawn(session, db.clone(), Some(journal.clone()), TICK_INTERVAL);

        handle.send(Command::Start(task.id)).await.unwrap();
        assert_eq!(handle.snapshot().state, SessionState::Active);
        assert!(journal.load().unwrap().is_some());

        time.advance_secs(42);
        handle.send(Command::Pause).await.unwrap();
        let outcome = handle.send(Command::Stop { completed: true }).await.unwrap();

        let CommandOutcome::Flushed(updated) = outcome else {
            panic!("stop should flush, got {:?}", outcome);
        };
        assert_eq!(updated.time_spent, 42);
        assert_eq!(updated.attempts, 1);
        assert!(updated.completed);
        assert_eq!(handle.snapshot().state, SessionState::Completed);
        assert!(journal.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_driver_rejects_unknown_task() {
        let (db, _dir, time) = setup().await;
        let session = TimerSession::new(time, PhaseDurations::default());
        let (handle, _task) = SessionDriver::spawn(session, db, None, TICK_INTERVAL);

        let err = handle.send(Command::Start(12345)).await.unwrap_err();
        assert!(matches!(err, TimerError::NotFound { entity: "Task", id: 12345 }));
        assert_eq!(handle.snapshot().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_tick_refreshes_snapshot() {
        let (db, _dir, time) = setup().await;
        let task = db.create_task(&NewTask::new("ticking", 1)).await.unwrap();
        let session = TimerSession::new(time.clone(), PhaseDurations::default());
        let (handle, _task) =
            SessionDriver::spawn(session, db, None, Duration::from_millis(10));
        handle.send(Command::Start(task.id)).await.unwrap();

        time.advance_secs(5);
        let mut rx = handle.subscribe();
        let seen = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                rx.changed().await.unwrap();
                let snap = rx.borrow_and_update().clone();
                if snap.elapsed_seconds == 5 {
                    break snap;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(seen.remaining_seconds, 1495);
    }

    #[tokio::test]
    async fn test_recover_restores_paused_session() {
        let (db, dir, time) = setup().await;
        let task = db.create_task(&NewTask::new("recover", 1)).await.unwrap();
        let journal = JournalFile::new(dir.path().join("session.json"));

        let session = TimerSession::new(time.clone(), PhaseDurations::default());
        let (handle, driver) =
            SessionDriver::spawn(session, db.clone(), Some(journal.clone()), TICK_INTERVAL);
        handle.send(Command::Start(task.id)).await.unwrap();
        time.advance_secs(90);
        drop(handle);
        driver.await.unwrap();

        let mut session = TimerSession::new(time.clone(), PhaseDurations::default());
        let restored = SessionDriver::recover(&mut session, &db, &journal).await.unwrap();
        assert_eq!(restored.map(|j| j.task_id), Some(task.id));
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(session.snapshot().elapsed_seconds, 90);

        // Journal pointing at a deleted task is dropped
        db.delete_task(task.id).await.unwrap();
        let mut fresh = TimerSession::new(time, PhaseDurations::default());
        assert!(SessionDriver::recover(&mut fresh, &db, &journal).await.unwrap().is_none());
        assert!(journal.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_rejected_while_flush_in_flight() {
        let (db, dir, time) = setup().await;
        let task = db.create_task(&NewTask::new("contended", 2)).await.unwrap();
        let journal = JournalFile::new(dir.path().join("session.json"));
        let session = TimerSession::new(time.clone(), PhaseDurations::default());
        let (handle, _driver) =
            SessionDriver::spawn(session, db.clone(), Some(journal.clone()), TICK_INTERVAL);
        handle.send(Command::Start(task.id)).await.unwrap();
        time.advance_secs(30);

        // Hold the write lock so the flush has to wait for it
        let options = SqliteConnectOptions::new().filename(dir.path().join("test.db"));
        let mut blocker = SqliteConnection::connect_with(&options).await.unwrap();
        sqlx::query("BEGIN EXCLUSIVE").execute(&mut blocker).await.unwrap();

        let mut rx = handle.subscribe();
        let stopper = handle.clone();
        let stop = tokio::spawn(async move { stopper.send(Command::Stop { completed: false }).await });
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|snap| snap.flushing))
            .await
            .unwrap()
            .unwrap();

        let saved = journal.load().unwrap().unwrap();
        let pending = saved.pending.unwrap();
        assert_eq!(pending.seconds, 30);
        assert_eq!(pending.attempts_before, Some(0));
        assert!(!pending.applied);

        let err = handle.send(Command::Reset).await.unwrap_err();
        assert!(matches!(
            err,
            TimerError::InvalidTransition { state: "flushing", command: "reset" }
        ));

        sqlx::query("COMMIT").execute(&mut blocker).await.unwrap();
        let outcome = stop.await.unwrap().unwrap();
        let CommandOutcome::Flushed(updated) = outcome else {
            panic!("stop should flush, got {:?}", outcome);
        };
        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.time_spent, 30);
        assert_eq!(handle.snapshot().state, SessionState::Abandoned);
        assert!(journal.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recover_detects_counters_written_before_crash() {
        let (db, dir, time) = setup().await;
        let task = db.create_task(&NewTask::new("crashed", 3)).await.unwrap();
        let journal = JournalFile::new(dir.path().join("session.json"));

        // Stop was journaled, the counter write committed, then the process died
        journal
            .save(&SessionJournal {
                task_id: task.id,
                state: SessionState::Active,
                banked_millis: 20_000,
                phase: Phase::Work,
                pending: Some(PendingFlush {
                    task_id: task.id,
                    seconds: 20,
                    completed: true,
                    applied: false,
                    attempts_before: Some(0),
                }),
                saved_at: Utc::now(),
            })
            .unwrap();
        db.apply_session_result(task.id, 20, 1).await.unwrap();

        let mut session = TimerSession::new(time, PhaseDurations::default());
        let restored = SessionDriver::recover(&mut session, &db, &journal).await.unwrap().unwrap();
        assert_eq!(restored.pending.map(|p| p.applied), Some(true));
        assert!(session.snapshot().flush_pending);

        let (handle, _driver) =
            SessionDriver::spawn(session, db.clone(), Some(journal.clone()), TICK_INTERVAL);
        let outcome = handle.send(Command::Stop { completed: true }).await.unwrap();
        let CommandOutcome::Flushed(updated) = outcome else {
            panic!("stop should flush, got {:?}", outcome);
        };
        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.time_spent, 20);
        assert!(updated.completed);
        assert!(journal.load().unwrap().is_none());
    }
}
