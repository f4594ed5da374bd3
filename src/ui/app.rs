use anyhow::Result;
use chrono::Local;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::{Frame, Terminal};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::settings::Settings;
use crate::database::Database;
use crate::models::{Category, NewTask, Recurrence, Task, TaskFilter};
use crate::timer::{Command, PhaseDurations, SessionHandle, SessionSnapshot, SessionState};
use crate::ui::commands::{self, push_log, CommandContext, CommandResult};

#[derive(Debug, Clone, PartialEq)]
pub enum InputAction {
    NewTaskTitle,
    NewTaskPriority { title: String },
    NewTaskRepeat { title: String, priority: i64 },
    NewCategory,
    WorkDuration,
    BreakDuration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Dashboard,
    ViewingLogs,
    HelpPopup,
    Input { prompt: String, buffer: String, action: InputAction },
    /// Picks a category for `draft`; index 0 is "uncategorized".
    CategoryMenu { draft: NewTask, selected_index: usize },
    DeleteCategoryMenu { selected_index: usize },
}

pub struct App {
    pub state: AppState,
    pub database: Database,
    pub session: SessionHandle,
    pub settings: Settings,
    pub tasks: Vec<Task>,
    pub categories: Vec<Category>,
    pub selected: usize,
    pub logs: Vec<String>,
    pub snapshot: SessionSnapshot,
    initial_task: Option<i64>,
    time_up_announced: bool,
}

impl App {
    pub fn new(database: Database, session: SessionHandle, settings: Settings) -> Self {
        let snapshot = session.snapshot();
        Self {
            state: AppState::Dashboard,
            database,
            session,
            settings,
            tasks: Vec::new(),
            categories: Vec::new(),
            selected: 0,
            logs: Vec::new(),
            snapshot,
            initial_task: None,
            time_up_announced: false,
        }
    }

    /// Task to highlight on launch when no session was recovered.
    pub fn preselect(&mut self, task_id: i64) {
        self.initial_task = Some(task_id);
    }

    pub fn log(&mut self, message: impl AsRef<str>) {
        push_log(&mut self.logs, message);
    }

    pub async fn run(&mut self) -> Result<()> {
        log::info!("Starting UI...");

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown_flag))?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown_flag))?;

        self.refresh().await?;
        if let Some(task_id) = self.snapshot.task_id.or(self.initial_task) {
            self.select_task(task_id);
        }

        if let Err(e) = enable_raw_mode() {
            eprintln!("Failed to enable raw mode: {}. pocut needs an interactive terminal.", e);
            return Err(anyhow::anyhow!("Terminal raw mode not supported: {}", e));
        }
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen) {
            eprintln!("Failed to enter alternate screen: {}", e);
            let _ = disable_raw_mode();
            return Err(anyhow::anyhow!("Failed to setup terminal: {}", e));
        }
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal, &shutdown_flag).await;

        if let Err(e) = disable_raw_mode() {
            log::warn!("Failed to disable raw mode: {}", e);
        }
        if let Err(e) = execute!(terminal.backend_mut(), LeaveAlternateScreen) {
            log::warn!("Failed to leave alternate screen: {}", e);
        }
        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        shutdown_flag: &AtomicBool,
    ) -> Result<()> {
        loop {
            self.sync_snapshot();
            terminal.draw(|f| self.draw(f))?;

            if shutdown_flag.load(Ordering::Relaxed) {
                log::info!("Received shutdown signal, exiting...");
                break;
            }

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    log::debug!("Key pressed: {:?} in state: {:?}", key.code, self.state);
                    if self.handle_key(key.code).await? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn draw(&self, f: &mut Frame) {
        crate::ui::render::draw(self, f);
    }

    /// Pulls the latest timer snapshot and announces a phase running out once.
    pub fn sync_snapshot(&mut self) {
        self.snapshot = self.session.snapshot();
        if self.snapshot.time_up && !self.time_up_announced {
            self.time_up_announced = true;
            let message = format!("{} phase is up. Stop, pause or toggle the phase", self.snapshot.phase.label());
            log::info!("{}", message);
            self.log(message);
        } else if !self.snapshot.time_up {
            self.time_up_announced = false;
        }
    }

    pub async fn refresh(&mut self) -> Result<()> {
        self.tasks = self.database.list_tasks(&TaskFilter::default()).await?;
        self.categories = self.database.list_categories().await?;
        if self.selected >= self.tasks.len() {
            self.selected = self.tasks.len().saturating_sub(1);
        }
        Ok(())
    }

    pub fn select_task(&mut self, task_id: i64) {
        if let Some(index) = self.tasks.iter().position(|t| t.id == task_id) {
            self.selected = index;
        }
    }

    pub fn selected_task(&self) -> Option<&Task> {
        self.tasks.get(self.selected)
    }

    pub fn task_title(&self, task_id: i64) -> Option<String> {
        self.tasks.iter().find(|t| t.id == task_id).map(|t| t.title.clone())
    }

    pub fn category_name(&self, category_id: Option<i64>) -> String {
        category_id
            .and_then(|id| self.categories.iter().find(|c| c.id == id))
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "-".to_string())
    }

    /// Returns `true` when the app should quit.
    pub async fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        match self.state.clone() {
            AppState::Dashboard => return self.handle_dashboard_key(code).await,
            AppState::ViewingLogs | AppState::HelpPopup => {
                if code == KeyCode::Char('q') {
                    return Ok(true);
                }
                self.state = AppState::Dashboard;
            }
            AppState::Input { prompt, mut buffer, action } => match code {
                KeyCode::Esc => {
                    self.log("Input cancelled");
                    self.state = AppState::Dashboard;
                }
                KeyCode::Enter => {
                    self.state = AppState::Dashboard;
                    self.submit_input(action, buffer.trim().to_string()).await?;
                }
                KeyCode::Backspace => {
                    buffer.pop();
                    self.state = AppState::Input { prompt, buffer, action };
                }
                KeyCode::Char(c) => {
                    buffer.push(c);
                    self.state = AppState::Input { prompt, buffer, action };
                }
                _ => {}
            },
            AppState::CategoryMenu { mut draft, selected_index } => {
                let options = self.categories.len() + 1;
                match code {
                    KeyCode::Esc => {
                        self.log("Task creation cancelled");
                        self.state = AppState::Dashboard;
                    }
                    KeyCode::Up => {
                        self.state = AppState::CategoryMenu {
                            draft,
                            selected_index: selected_index.saturating_sub(1),
                        };
                    }
                    KeyCode::Down => {
                        self.state = AppState::CategoryMenu {
                            draft,
                            selected_index: (selected_index + 1).min(options - 1),
                        };
                    }
                    KeyCode::Enter => {
                        draft.category_id = selected_index
                            .checked_sub(1)
                            .and_then(|i| self.categories.get(i))
                            .map(|c| c.id);
                        self.state = AppState::Dashboard;
                        self.create_task(draft).await?;
                    }
                    _ => {}
                }
            }
            AppState::DeleteCategoryMenu { selected_index } => match code {
                KeyCode::Esc => self.state = AppState::Dashboard,
                KeyCode::Up => {
                    self.state = AppState::DeleteCategoryMenu {
                        selected_index: selected_index.saturating_sub(1),
                    };
                }
                KeyCode::Down => {
                    self.state = AppState::DeleteCategoryMenu {
                        selected_index: (selected_index + 1).min(self.categories.len().saturating_sub(1)),
                    };
                }
                KeyCode::Enter => {
                    self.state = AppState::Dashboard;
                    if let Some(category) = self.categories.get(selected_index).cloned() {
                        let mut ctx = CommandContext { database: &self.database, logs: &mut self.logs };
                        let result = commands::execute_delete_category(&mut ctx, category.id, &category.name).await?;
                        self.after_command(result).await?;
                    }
                }
                _ => {}
            },
        }
        Ok(false)
    }

    async fn handle_dashboard_key(&mut self, code: KeyCode) -> Result<bool> {
        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => {
                if self.selected + 1 < self.tasks.len() {
                    self.selected += 1;
                }
            }
            KeyCode::Char('s') => {
                let command = if self.snapshot.state == SessionState::Paused {
                    Command::Resume
                } else {
                    match self.selected_task() {
                        Some(task) => Command::Start(task.id),
                        None => {
                            self.log("No task selected. Press [n] to create one");
                            return Ok(false);
                        }
                    }
                };
                self.timer(command).await?;
            }
            KeyCode::Char('p') => {
                let command = if self.snapshot.state == SessionState::Paused {
                    Command::Resume
                } else {
                    Command::Pause
                };
                self.timer(command).await?;
            }
            KeyCode::Char('f') => self.timer(Command::Stop { completed: true }).await?,
            KeyCode::Char('a') => self.timer(Command::Stop { completed: false }).await?,
            KeyCode::Char('r') => self.timer(Command::Reset).await?,
            KeyCode::Char('t') => self.timer(Command::TogglePhase).await?,
            KeyCode::Char('n') => self.prompt("Task title:", InputAction::NewTaskTitle),
            KeyCode::Char('c') => self.prompt("Category name:", InputAction::NewCategory),
            KeyCode::Char('w') => self.prompt(
                format!("Work duration in minutes or MM:SS (now {}):", commands::format_duration(self.settings.work_duration as i64)),
                InputAction::WorkDuration,
            ),
            KeyCode::Char('b') => self.prompt(
                format!("Break duration in minutes or MM:SS (now {}):", commands::format_duration(self.settings.break_duration as i64)),
                InputAction::BreakDuration,
            ),
            KeyCode::Char('x') => {
                let Some(task) = self.selected_task().cloned() else {
                    return Ok(false);
                };
                if self.snapshot.task_id == Some(task.id) && (self.snapshot.state.is_in_progress() || self.snapshot.flush_pending) {
                    self.log(format!("'{}' has a running session. Stop or reset it first", task.title));
                    return Ok(false);
                }
                let mut ctx = CommandContext { database: &self.database, logs: &mut self.logs };
                let result = commands::execute_delete_task(&mut ctx, &task).await?;
                self.after_command(result).await?;
            }
            KeyCode::Char('X') => {
                if self.categories.is_empty() {
                    self.log("No categories to delete");
                } else {
                    self.state = AppState::DeleteCategoryMenu { selected_index: 0 };
                }
            }
            KeyCode::Enter | KeyCode::Char(' ') => {
                let Some(task) = self.selected_task().cloned() else {
                    return Ok(false);
                };
                let mut ctx = CommandContext { database: &self.database, logs: &mut self.logs };
                let result = commands::execute_toggle_completed(&mut ctx, &task).await?;
                self.after_command(result).await?;
            }
            KeyCode::Char('l') => self.state = AppState::ViewingLogs,
            KeyCode::Char('?') => self.state = AppState::HelpPopup,
            _ => {}
        }
        Ok(false)
    }

    fn prompt(&mut self, prompt: impl Into<String>, action: InputAction) {
        self.state = AppState::Input {
            prompt: prompt.into(),
            buffer: String::new(),
            action,
        };
    }

    async fn submit_input(&mut self, action: InputAction, input: String) -> Result<()> {
        match action {
            InputAction::NewTaskTitle => {
                if input.is_empty() {
                    self.log("Task title cannot be empty");
                    return Ok(());
                }
                self.prompt("Priority 1-5 (Enter for 3):", InputAction::NewTaskPriority { title: input });
            }
            InputAction::NewTaskPriority { title } => match commands::parse_priority(&input) {
                Ok(priority) => self.prompt(
                    "Repeat: none, daily, weekly Mon,Thu, monthly or yearly (Enter for none):",
                    InputAction::NewTaskRepeat { title, priority },
                ),
                Err(e) => {
                    self.log(e.to_string());
                    self.prompt("Priority 1-5 (Enter for 3):", InputAction::NewTaskPriority { title });
                }
            },
            InputAction::NewTaskRepeat { title, priority } => match commands::parse_recurrence(&input) {
                Ok(recurrence) => {
                    let mut draft = NewTask::new(title, priority);
                    if recurrence != Recurrence::None {
                        draft = draft.due(Local::now().date_naive()).recurring(recurrence);
                    }
                    if self.categories.is_empty() {
                        self.create_task(draft).await?;
                    } else {
                        self.state = AppState::CategoryMenu { draft, selected_index: 0 };
                    }
                }
                Err(e) => {
                    self.log(e.to_string());
                    self.prompt(
                        "Repeat: none, daily, weekly Mon,Thu, monthly or yearly (Enter for none):",
                        InputAction::NewTaskRepeat { title, priority },
                    );
                }
            },
            InputAction::NewCategory => {
                let mut ctx = CommandContext { database: &self.database, logs: &mut self.logs };
                let result = commands::execute_create_category(&mut ctx, &input).await?;
                self.after_command(result).await?;
            }
            InputAction::WorkDuration | InputAction::BreakDuration => {
                let field = if action == InputAction::WorkDuration { "work_duration" } else { "break_duration" };
                let secs = match commands::parse_duration_input(field, &input) {
                    Ok(secs) => secs,
                    Err(e) => {
                        self.log(e.to_string());
                        return Ok(());
                    }
                };
                let (work, break_) = if action == InputAction::WorkDuration {
                    (secs, self.settings.break_duration)
                } else {
                    (self.settings.work_duration, secs)
                };
                if let Err(e) = self.settings.save_durations(work, break_) {
                    self.log(format!("Failed to save durations: {}", e));
                    return Ok(());
                }
                let durations = PhaseDurations { work_secs: work, break_secs: break_ };
                match self.session.set_durations(durations).await {
                    Ok(()) => self.log(format!(
                        "Durations set: work {} / break {}",
                        commands::format_duration(work as i64),
                        commands::format_duration(break_ as i64)
                    )),
                    Err(e) => self.log(format!("Timer did not take new durations: {}", e)),
                }
            }
        }
        Ok(())
    }

    async fn create_task(&mut self, draft: NewTask) -> Result<()> {
        let mut ctx = CommandContext { database: &self.database, logs: &mut self.logs };
        let result = commands::execute_create_task(&mut ctx, &draft).await?;
        self.after_command(result).await
    }

    async fn timer(&mut self, command: Command) -> Result<()> {
        let result = commands::execute_timer_command(&self.session, &mut self.logs, command).await?;
        self.sync_snapshot();
        self.after_command(result).await
    }

    async fn after_command(&mut self, result: CommandResult) -> Result<()> {
        if result.should_refresh {
            let selected_id = self.selected_task().map(|t| t.id);
            self.refresh().await?;
            if let Some(id) = selected_id {
                self.select_task(id);
            }
        }
        Ok(())
    }
}
