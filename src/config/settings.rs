use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::timer::PhaseDurations;
use crate::validation;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://pocut.db";
pub const DEFAULT_WORK_DURATION: u64 = 1500;
pub const DEFAULT_BREAK_DURATION: u64 = 300;
pub const DEFAULT_JOURNAL_PATH: &str = "pocut_session.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub work_duration: u64,
    pub break_duration: u64,
    pub journal_path: PathBuf,
    pub debug: bool,
    env_path: PathBuf,
}

impl Settings {
    fn get_env_path() -> Result<PathBuf> {
        Ok(env::current_dir()?.join(".env"))
    }

    pub fn new() -> Result<Self> {
        let env_path = Self::get_env_path()?;

        // First launch: write the defaults so there is something to edit
        if !env_path.exists() {
            log::warn!("No .env found. Writing default settings to {}", env_path.display());
            fs::write(&env_path, Self::default_env_content())
                .with_context(|| format!("Failed to write {}", env_path.display()))?;
        }
        dotenvy::from_path(&env_path).ok();

        let mut settings = Self::from_lookup(|key| env::var(key).ok())?;
        settings.env_path = env_path;
        Ok(settings)
    }

    /// Builds settings from a key lookup, falling back to defaults for missing keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let duration = |key: &'static str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => {
                    let secs: u64 = raw
                        .trim()
                        .parse()
                        .with_context(|| format!("{} must be a number of seconds, got '{}'", key, raw))?;
                    Ok(validation::validate_phase_secs(key, secs)?)
                }
                None => Ok(default),
            }
        };

        Ok(Self {
            database_url: lookup("POCUT_DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            work_duration: duration("POCUT_WORK_DURATION", DEFAULT_WORK_DURATION)?,
            break_duration: duration("POCUT_BREAK_DURATION", DEFAULT_BREAK_DURATION)?,
            journal_path: lookup("POCUT_JOURNAL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_JOURNAL_PATH)),
            debug: lookup("POCUT_DEBUG")
                .and_then(|v| v.trim().parse::<bool>().ok())
                .unwrap_or(false),
            env_path: PathBuf::from(".env"),
        })
    }

    pub fn durations(&self) -> PhaseDurations {
        PhaseDurations {
            work_secs: self.work_duration,
            break_secs: self.break_duration,
        }
    }

    fn default_env_content() -> String {
        format!(
            "# Auto-generated pocut settings\n\
             # Durations are in seconds. Edit freely; pocut also rewrites the\n\
             # duration lines when you change them from the settings prompt.\n\
             \n\
             POCUT_DATABASE_URL={}\n\
             POCUT_WORK_DURATION={}\n\
             POCUT_BREAK_DURATION={}\n\
             POCUT_JOURNAL_PATH={}\n\
             POCUT_DEBUG=false\n",
            DEFAULT_DATABASE_URL, DEFAULT_WORK_DURATION, DEFAULT_BREAK_DURATION, DEFAULT_JOURNAL_PATH
        )
    }

    /// Validates new phase lengths and writes them back to `.env`.
    pub fn save_durations(&mut self, work: u64, break_: u64) -> Result<()> {
        let work = validation::validate_phase_secs("work_duration", work)?;
        let break_ = validation::validate_phase_secs("break_duration", break_)?;

        let content = fs::read_to_string(&self.env_path).unwrap_or_default();
        let content = set_env_line(&content, "POCUT_WORK_DURATION", &work.to_string());
        let content = set_env_line(&content, "POCUT_BREAK_DURATION", &break_.to_string());
        fs::write(&self.env_path, content)
            .with_context(|| format!("Failed to write {}", self.env_path.display()))?;

        self.work_duration = work;
        self.break_duration = break_;
        log::info!("Durations updated: Work={} seconds, Break={} seconds", work, break_);
        Ok(())
    }
}

/// Replaces `KEY=...` in dotenv text, appending the line when the key is absent.
fn set_env_line(content: &str, key: &str, value: &str) -> String {
    let prefix = format!("{}=", key);
    let mut found = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if line.trim_start().starts_with(&prefix) {
                found = true;
                format!("{}{}", prefix, value)
            } else {
                line.to_string()
            }
        })
        .collect();
    if !found {
        lines.push(format!("{}{}", prefix, value));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(settings.work_duration, 1500);
        assert_eq!(settings.break_duration, 300);
        assert_eq!(settings.journal_path, PathBuf::from(DEFAULT_JOURNAL_PATH));
        assert!(!settings.debug);
    }

    #[test]
    fn test_reads_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("POCUT_DATABASE_URL", "sqlite://other.db"),
            ("POCUT_WORK_DURATION", "3000"),
            ("POCUT_BREAK_DURATION", " 600 "),
            ("POCUT_DEBUG", "true"),
        ]))
        .unwrap();
        assert_eq!(settings.database_url, "sqlite://other.db");
        assert_eq!(settings.durations(), PhaseDurations { work_secs: 3000, break_secs: 600 });
        assert!(settings.debug);
    }

    #[test]
    fn test_rejects_bad_durations() {
        assert!(Settings::from_lookup(lookup(&[("POCUT_WORK_DURATION", "soon")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("POCUT_BREAK_DURATION", "0")])).is_err());
    }

    #[test]
    fn test_set_env_line_replaces_or_appends() {
        let content = "# comment\nPOCUT_WORK_DURATION=1500\nOTHER=1\n";
        let updated = set_env_line(content, "POCUT_WORK_DURATION", "900");
        assert_eq!(updated, "# comment\nPOCUT_WORK_DURATION=900\nOTHER=1\n");

        let appended = set_env_line("OTHER=1\n", "POCUT_BREAK_DURATION", "120");
        assert_eq!(appended, "OTHER=1\nPOCUT_BREAK_DURATION=120\n");
    }

    #[test]
    fn test_save_durations_writes_env_file() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, Settings::default_env_content()).unwrap();

        let mut settings = Settings::from_lookup(lookup(&[])).unwrap();
        settings.env_path = env_path.clone();
        settings.save_durations(1200, 240).unwrap();

        let written = fs::read_to_string(&env_path).unwrap();
        assert!(written.contains("POCUT_WORK_DURATION=1200\n"));
        assert!(written.contains("POCUT_BREAK_DURATION=240\n"));
        assert!(written.contains("POCUT_DATABASE_URL="));
        assert_eq!(settings.work_duration, 1200);

        assert!(settings.save_durations(0, 240).is_err());
        assert_eq!(settings.work_duration, 1200);
    }
}
