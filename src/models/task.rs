use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc, Weekday};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

/// How a task repeats once it has been completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly(Vec<Weekday>),
    Monthly,
    Yearly,
}

impl Recurrence {
    /// Column values stored in `tasks.recurrence` and `tasks.days_of_week`.
    pub fn to_columns(&self) -> (&'static str, Option<String>) {
        match self {
            Recurrence::None => ("none", None),
            Recurrence::Daily => ("daily", None),
            Recurrence::Weekly(days) => {
                let days = days.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(",");
                ("weekly", Some(days))
            }
            Recurrence::Monthly => ("monthly", None),
            Recurrence::Yearly => ("yearly", None),
        }
    }

    pub fn from_columns(kind: &str, days: Option<&str>) -> Result<Self, String> {
        match kind {
            "none" | "" => Ok(Recurrence::None),
            "daily" => Ok(Recurrence::Daily),
            "weekly" => {
                let days = days
                    .map(|d| crate::validation::parse_days_of_week(d).map_err(|e| e.to_string()))
                    .transpose()?
                    .unwrap_or_default();
                Ok(Recurrence::Weekly(days))
            }
            "monthly" => Ok(Recurrence::Monthly),
            "yearly" => Ok(Recurrence::Yearly),
            other => Err(format!("unknown recurrence '{}'", other)),
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::None)
    }

    /// Due date of the occurrence following one due on `base`.
    pub fn next_due(&self, base: NaiveDate) -> Option<NaiveDate> {
        match self {
            Recurrence::None => None,
            Recurrence::Daily => base.checked_add_days(Days::new(1)),
            Recurrence::Weekly(days) => (1..=7u64)
                .filter_map(|i| base.checked_add_days(Days::new(i)))
                .find(|d| days.contains(&d.weekday())),
            Recurrence::Monthly => base.checked_add_months(Months::new(1)),
            Recurrence::Yearly => base.checked_add_months(Months::new(12)),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Recurrence::None => String::new(),
            Recurrence::Daily => "daily".to_string(),
            Recurrence::Weekly(days) => {
                let days = days.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(",");
                format!("weekly {}", days)
            }
            Recurrence::Monthly => "monthly".to_string(),
            Recurrence::Yearly => "yearly".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub text: Option<String>,
    pub completed: bool,
    pub priority: i64,
    /// Weak reference; `None` means uncategorized.
    pub category_id: Option<i64>,
    pub attempts: i64,
    /// Whole seconds.
    pub time_spent: i64,
    pub due_date: Option<NaiveDate>,
    pub recurrence: Recurrence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Task {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("recurrence")?;
        let days: Option<String> = row.try_get("days_of_week")?;
        let recurrence = Recurrence::from_columns(&kind, days.as_deref()).map_err(|e| {
            sqlx::Error::ColumnDecode {
                index: "recurrence".to_string(),
                source: e.into(),
            }
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            text: row.try_get("text")?,
            completed: row.try_get("completed")?,
            priority: row.try_get("priority")?,
            category_id: row.try_get("category_id")?,
            attempts: row.try_get("attempts")?,
            time_spent: row.try_get("time_spent")?,
            due_date: row.try_get("due_date")?,
            recurrence,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Input for creating or editing a task.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub text: Option<String>,
    pub priority: i64,
    pub category_id: Option<i64>,
    pub due_date: Option<NaiveDate>,
    pub recurrence: Recurrence,
}

impl NewTask {
    pub fn new(title: impl Into<String>, priority: i64) -> Self {
        Self {
            title: title.into(),
            text: None,
            priority,
            category_id: None,
            due_date: None,
            recurrence: Recurrence::None,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn category(mut self, category_id: i64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn due(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn recurring(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    /// Fresh occurrence of a completed recurring task, or `None` if it does not repeat.
    pub fn next_occurrence(task: &Task, today: NaiveDate) -> Option<Self> {
        let base = task.due_date.unwrap_or(today);
        let due = task.recurrence.next_due(base)?;
        Some(Self {
            title: task.title.clone(),
            text: task.text.clone(),
            priority: task.priority,
            category_id: task.category_id,
            due_date: Some(due),
            recurrence: task.recurrence.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryFilter {
    Category(i64),
    Uncategorized,
}

/// Filter for listing tasks. Empty filter lists everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub category: Option<CategoryFilter>,
    pub completed: Option<bool>,
    pub min_priority: Option<i64>,
    pub max_priority: Option<i64>,
}

impl TaskFilter {
    pub fn in_category(category_id: i64) -> Self {
        Self {
            category: Some(CategoryFilter::Category(category_id)),
            ..Self::default()
        }
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn priority_between(mut self, min: i64, max: i64) -> Self {
        self.min_priority = Some(min);
        self.max_priority = Some(max);
        self
    }
}
