use chrono::{Local, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::QueryBuilder;
use std::path::Path;
use std::str::FromStr;

use crate::error::{TimerError, TimerResult};
use crate::models::task::CategoryFilter;
use crate::models::{Category, NewTask, Task, TaskFilter};
use crate::validation;

const TASK_COLUMNS: &str = "id, title, text, completed, priority, category_id, attempts, time_spent, \
     due_date, recurrence, days_of_week, created_at, updated_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> TimerResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?;
        Self::connect_with(options).await
    }

    pub async fn open(path: &Path) -> TimerResult<Self> {
        Self::connect_with(SqliteConnectOptions::new().filename(path)).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> TimerResult<Self> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_tables().await?;
        Ok(db)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn create_tables(&self) -> TimerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                text TEXT,
                completed BOOLEAN NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 1 CHECK (priority BETWEEN 1 AND 5),
                category_id INTEGER REFERENCES categories (id) ON DELETE SET NULL,
                attempts INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
                time_spent INTEGER NOT NULL DEFAULT 0 CHECK (time_spent >= 0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Recurrence columns were added after the first schema
        self.add_column_if_missing("tasks", "due_date", "TEXT").await?;
        self.add_column_if_missing("tasks", "recurrence", "TEXT NOT NULL DEFAULT 'none'")
            .await?;
        self.add_column_if_missing("tasks", "days_of_week", "TEXT").await?;
        Ok(())
    }

    async fn add_column_if_missing(&self, table: &str, column: &str, decl: &str) -> TimerResult<()> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
                .bind(table)
                .bind(column)
                .fetch_one(&self.pool)
                .await?;
        if count == 0 {
            log::info!("Migrating {}: adding column {}", table, column);
            sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn create_category(&self, name: &str) -> TimerResult<Category> {
        let name = validation::validate_category_name(name)?;
        let category = sqlx::query_as::<_, Category>(
            "INSERT INTO categories (name, created_at) VALUES (?, ?) RETURNING id, name, created_at",
        )
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        log::info!("Created category {} '{}'", category.id, category.name);
        Ok(category)
    }

    pub async fn get_category(&self, id: i64) -> TimerResult<Category> {
        sqlx::query_as::<_, Category>("SELECT id, name, created_at FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TimerError::NotFound { entity: "Category", id })
    }

    pub async fn list_categories(&self) -> TimerResult<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(
            "SELECT id, name, created_at FROM categories ORDER BY name ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    /// Deletes a category and detaches it from its tasks. Returns how many tasks were detached.
    pub async fn delete_category(&self, id: i64) -> TimerResult<u64> {
        let mut tx = self.pool.begin().await?;

        let detached = sqlx::query(
            "UPDATE tasks SET category_id = NULL, updated_at = MAX(created_at, ?) WHERE category_id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let deleted = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(TimerError::NotFound { entity: "Category", id });
        }

        tx.commit().await?;
        log::info!("Deleted category {} ({} tasks now uncategorized)", id, detached);
        Ok(detached)
    }

    async fn check_task_input(&self, task: &NewTask) -> TimerResult<()> {
        validation::validate_title(&task.title)?;
        validation::validate_priority(task.priority)?;
        if let Some(category_id) = task.category_id {
            self.get_category(category_id).await?;
        }
        Ok(())
    }

    pub async fn create_task(&self, task: &NewTask) -> TimerResult<Task> {
        self.check_task_input(task).await?;
        let mut conn = self.pool.acquire().await?;
        let created = insert_task(&mut conn, task).await?;
        log::info!("Created task {} '{}' (priority {})", created.id, created.title, created.priority);
        Ok(created)
    }

    pub async fn update_task(&self, id: i64, task: &NewTask) -> TimerResult<Task> {
        self.check_task_input(task).await?;
        let (recurrence, days) = task.recurrence.to_columns();
        let sql = format!(
            "UPDATE tasks SET title = ?, text = ?, priority = ?, category_id = ?, due_date = ?, \
             recurrence = ?, days_of_week = ?, updated_at = MAX(created_at, ?) \
             WHERE id = ? RETURNING {}",
            TASK_COLUMNS
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(validation::validate_title(&task.title)?)
            .bind(&task.text)
            .bind(task.priority)
            .bind(task.category_id)
            .bind(task.due_date)
            .bind(recurrence)
            .bind(days)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TimerError::NotFound { entity: "Task", id })
    }

    pub async fn get_task(&self, id: i64) -> TimerResult<Task> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TimerError::NotFound { entity: "Task", id })
    }

    /// Tasks matching `filter`, highest priority first, then oldest first.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> TimerResult<Vec<Task>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM tasks WHERE 1 = 1", TASK_COLUMNS));

        match filter.category {
            Some(CategoryFilter::Category(id)) => {
                query.push(" AND category_id = ").push_bind(id);
            }
            Some(CategoryFilter::Uncategorized) => {
                query.push(" AND category_id IS NULL");
            }
            None => {}
        }
        if let Some(completed) = filter.completed {
            query.push(" AND completed = ").push_bind(completed);
        }
        if let Some(min) = filter.min_priority {
            query.push(" AND priority >= ").push_bind(min);
        }
        if let Some(max) = filter.max_priority {
            query.push(" AND priority <= ").push_bind(max);
        }
        query.push(" ORDER BY priority DESC, created_at ASC, id ASC");

        let tasks = query.build_query_as::<Task>().fetch_all(&self.pool).await?;
        Ok(tasks)
    }

    /// Adds a finished session to the task's counters in one statement.
    pub async fn apply_session_result(
        &self,
        task_id: i64,
        seconds_delta: u64,
        attempt_increment: u8,
    ) -> TimerResult<Task> {
        if attempt_increment > 1 {
            return Err(TimerError::validation("attempt_increment", "must be 0 or 1"));
        }
        let seconds = i64::try_from(seconds_delta)
            .map_err(|_| TimerError::validation("seconds_delta", "out of range"))?;

        let sql = format!(
            "UPDATE tasks SET time_spent = time_spent + ?, attempts = attempts + ?, \
             updated_at = MAX(created_at, ?) WHERE id = ? RETURNING {}",
            TASK_COLUMNS
        );
        let task = sqlx::query_as::<_, Task>(&sql)
            .bind(seconds)
            .bind(i64::from(attempt_increment))
            .bind(Utc::now())
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TimerError::NotFound { entity: "Task", id: task_id })?;

        log::info!(
            "Applied session to task {}: +{}s, +{} attempt(s) -> {}s over {} attempts",
            task_id,
            seconds,
            attempt_increment,
            task.time_spent,
            task.attempts
        );
        Ok(task)
    }

    /// Sets the completion flag. Completing a recurring task schedules its next occurrence.
    pub async fn mark_completed(&self, task_id: i64, completed: bool) -> TimerResult<Task> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        // Only a false -> true change returns a row here
        let sql = format!(
            "UPDATE tasks SET completed = 1, updated_at = MAX(created_at, ?) \
             WHERE id = ? AND completed = 0 RETURNING {}",
            TASK_COLUMNS
        );
        let newly_completed = if completed {
            sqlx::query_as::<_, Task>(&sql)
                .bind(now)
                .bind(task_id)
                .fetch_optional(&mut *tx)
                .await?
        } else {
            None
        };

        let task = match newly_completed {
            Some(task) => {
                if let Some(next) = NewTask::next_occurrence(&task, Local::now().date_naive()) {
                    let successor = insert_task(&mut tx, &next).await?;
                    log::info!(
                        "Scheduled next occurrence of task {} as task {} due {:?}",
                        task.id,
                        successor.id,
                        successor.due_date
                    );
                }
                task
            }
            None => {
                let sql = format!(
                    "UPDATE tasks SET completed = ?, updated_at = MAX(created_at, ?) \
                     WHERE id = ? RETURNING {}",
                    TASK_COLUMNS
                );
                sqlx::query_as::<_, Task>(&sql)
                    .bind(completed)
                    .bind(now)
                    .bind(task_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or(TimerError::NotFound { entity: "Task", id: task_id })?
            }
        };

        tx.commit().await?;
        log::info!("Task {} marked completed={}", task_id, task.completed);
        Ok(task)
    }

    pub async fn delete_task(&self, id: i64) -> TimerResult<()> {
        let deleted = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(TimerError::NotFound { entity: "Task", id });
        }
        log::info!("Deleted task {}", id);
        Ok(())
    }
}

async fn insert_task(conn: &mut sqlx::SqliteConnection, task: &NewTask) -> Result<Task, sqlx::Error> {
    let now = Utc::now();
    let (recurrence, days) = task.recurrence.to_columns();
    let sql = format!(
        "INSERT INTO tasks (title, text, completed, priority, category_id, attempts, time_spent, \
         due_date, recurrence, days_of_week, created_at, updated_at) \
         VALUES (?, ?, 0, ?, ?, 0, 0, ?, ?, ?, ?, ?) RETURNING {}",
        TASK_COLUMNS
    );
    sqlx::query_as::<_, Task>(&sql)
        .bind(task.title.trim())
        .bind(task.text.as_deref().map(str::trim).filter(|t| !t.is_empty()))
        .bind(task.priority)
        .bind(task.category_id)
        .bind(task.due_date)
        .bind(recurrence)
        .bind(days)
        .bind(now)
        .bind(now)
        .fetch_one(conn)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Recurrence;
    use chrono::{Days, NaiveDate, Weekday};
    use tempfile::{tempdir, TempDir};

    async fn setup_db() -> (Database, TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() {
        let (db, _dir) = setup_db().await;
        db.create_tables().await.unwrap();
        db.create_tables().await.unwrap();

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pragma_table_info('tasks') WHERE name IN ('due_date', 'recurrence', 'days_of_week')",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_create_task_defaults() {
        let (db, _dir) = setup_db().await;
        let task = db
            .create_task(&NewTask::new("  Read chapter 3 ", 3).text("notes"))
            .await
            .unwrap();

        assert_eq!(task.title, "Read chapter 3");
        assert_eq!(task.text.as_deref(), Some("notes"));
        assert!(!task.completed);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.time_spent, 0);
        assert_eq!(task.category_id, None);
        assert!(task.updated_at >= task.created_at);
        assert_eq!(db.get_task(task.id).await.unwrap(), task);
    }

    #[tokio::test]
    async fn test_create_task_priority_bounds() {
        let (db, _dir) = setup_db().await;
        for p in 1..=5 {
            assert!(db.create_task(&NewTask::new("ok", p)).await.is_ok());
        }
        for p in [0, 6, -3] {
            let err = db.create_task(&NewTask::new("bad", p)).await.unwrap_err();
            assert!(matches!(err, TimerError::Validation { field: "priority", .. }));
        }
    }

    #[tokio::test]
    async fn test_create_task_rejects_empty_title_and_unknown_category() {
        let (db, _dir) = setup_db().await;
        let err = db.create_task(&NewTask::new("", 1)).await.unwrap_err();
        assert!(matches!(err, TimerError::Validation { field: "title", .. }));

        let err = db.create_task(&NewTask::new("orphan", 1).category(99)).await.unwrap_err();
        assert!(matches!(err, TimerError::NotFound { entity: "Category", id: 99 }));
    }

    #[tokio::test]
    async fn test_create_category_rejects_empty_name() {
        let (db, _dir) = setup_db().await;
        assert!(matches!(
            db.create_category("  ").await,
            Err(TimerError::Validation { field: "name", .. })
        ));
        let category = db.create_category("Study").await.unwrap();
        assert_eq!(db.list_categories().await.unwrap(), vec![category]);
    }

    #[tokio::test]
    async fn test_list_tasks_order_and_filters() {
        let (db, _dir) = setup_db().await;
        let work = db.create_category("Work").await.unwrap();
        let low = db.create_task(&NewTask::new("low", 1)).await.unwrap();
        let high_a = db.create_task(&NewTask::new("high a", 5).category(work.id)).await.unwrap();
        let mid = db.create_task(&NewTask::new("mid", 3).category(work.id)).await.unwrap();
        let high_b = db.create_task(&NewTask::new("high b", 5)).await.unwrap();
        db.mark_completed(mid.id, true).await.unwrap();

        let ids: Vec<i64> = db
            .list_tasks(&TaskFilter::default())
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![high_a.id, high_b.id, mid.id, low.id]);

        let in_work: Vec<i64> = db
            .list_tasks(&TaskFilter::in_category(work.id))
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(in_work, vec![high_a.id, mid.id]);

        let open = db.list_tasks(&TaskFilter::default().completed(false)).await.unwrap();
        assert_eq!(open.len(), 3);

        let ranged = db
            .list_tasks(&TaskFilter::default().priority_between(2, 4))
            .await
            .unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].id, mid.id);

        let uncategorized = db
            .list_tasks(&TaskFilter {
                category: Some(CategoryFilter::Uncategorized),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(uncategorized.len(), 2);
    }

    #[tokio::test]
    async fn test_apply_session_result_adds_counters() {
        let (db, _dir) = setup_db().await;
        let task = db.create_task(&NewTask::new("focus", 2)).await.unwrap();

        let updated = db.apply_session_result(task.id, 42, 1).await.unwrap();
        assert_eq!(updated.time_spent, 42);
        assert_eq!(updated.attempts, 1);
        assert!(updated.updated_at >= task.updated_at);

        let updated = db.apply_session_result(task.id, 8, 0).await.unwrap();
        assert_eq!(updated.time_spent, 50);
        assert_eq!(updated.attempts, 1);

        assert!(matches!(
            db.apply_session_result(task.id, 1, 2).await,
            Err(TimerError::Validation { .. })
        ));
        assert!(matches!(
            db.apply_session_result(404, 1, 1).await,
            Err(TimerError::NotFound { entity: "Task", id: 404 })
        ));
    }

    #[tokio::test]
    async fn test_apply_session_result_is_atomic_for_readers() {
        let (db, _dir) = setup_db().await;
        let task_id = db.create_task(&NewTask::new("atomic", 1)).await.unwrap().id;

        let reader_db = db.clone();
        let reader = tokio::spawn(async move {
            for _ in 0..200 {
                let seen = reader_db.get_task(task_id).await.unwrap();
                assert_eq!(seen.time_spent, seen.attempts * 10, "torn read: {:?}", seen);
                tokio::task::yield_now().await;
            }
        });

        for _ in 0..50 {
            db.apply_session_result(task_id, 10, 1).await.unwrap();
        }
        reader.await.unwrap();

        let done = db.get_task(task_id).await.unwrap();
        assert_eq!(done.attempts, 50);
        assert_eq!(done.time_spent, 500);
    }

    #[tokio::test]
    async fn test_delete_category_detaches_tasks() {
        let (db, _dir) = setup_db().await;
        let category = db.create_category("Chores").await.unwrap();
        let task = db.create_task(&NewTask::new("dishes", 2).category(category.id)).await.unwrap();

        assert_eq!(db.delete_category(category.id).await.unwrap(), 1);

        let task = db.get_task(task.id).await.unwrap();
        assert_eq!(task.category_id, None);
        assert!(db.list_categories().await.unwrap().is_empty());
        assert!(matches!(
            db.delete_category(category.id).await,
            Err(TimerError::NotFound { entity: "Category", .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_task() {
        let (db, _dir) = setup_db().await;
        let task = db.create_task(&NewTask::new("gone", 1)).await.unwrap();
        db.delete_task(task.id).await.unwrap();
        assert!(matches!(db.get_task(task.id).await, Err(TimerError::NotFound { .. })));
        assert!(matches!(db.delete_task(task.id).await, Err(TimerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_task() {
        let (db, _dir) = setup_db().await;
        let category = db.create_category("Home").await.unwrap();
        let task = db.create_task(&NewTask::new("draft", 1)).await.unwrap();

        let edited = db
            .update_task(task.id, &NewTask::new("final", 4).category(category.id))
            .await
            .unwrap();
        assert_eq!(edited.title, "final");
        assert_eq!(edited.priority, 4);
        assert_eq!(edited.category_id, Some(category.id));
        assert_eq!(edited.created_at, task.created_at);

        assert!(db.update_task(task.id, &NewTask::new("final", 9)).await.is_err());
    }

    #[tokio::test]
    async fn test_mark_completed_toggles() {
        let (db, _dir) = setup_db().await;
        let task = db.create_task(&NewTask::new("toggle", 1)).await.unwrap();

        assert!(db.mark_completed(task.id, true).await.unwrap().completed);
        assert!(db.mark_completed(task.id, true).await.unwrap().completed);
        assert!(!db.mark_completed(task.id, false).await.unwrap().completed);
        assert_eq!(db.list_tasks(&TaskFilter::default()).await.unwrap().len(), 1);
        assert!(matches!(
            db.mark_completed(77, true).await,
            Err(TimerError::NotFound { entity: "Task", id: 77 })
        ));
    }

    #[tokio::test]
    async fn test_completing_recurring_task_schedules_next_once() {
        let (db, _dir) = setup_db().await;
        // 2024-03-04 is a Monday
        let due = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let task = db
            .create_task(
                &NewTask::new("gym", 3)
                    .due(due)
                    .recurring(Recurrence::Weekly(vec![Weekday::Mon, Weekday::Thu])),
            )
            .await
            .unwrap();

        db.mark_completed(task.id, true).await.unwrap();
        // Already completed: no second successor
        db.mark_completed(task.id, true).await.unwrap();

        let open = db.list_tasks(&TaskFilter::default().completed(false)).await.unwrap();
        assert_eq!(open.len(), 1);
        let next = &open[0];
        assert_eq!(next.title, "gym");
        assert_eq!(next.attempts, 0);
        assert_eq!(next.due_date, due.checked_add_days(Days::new(3)));
        assert_eq!(next.recurrence, task.recurrence);
    }
}
