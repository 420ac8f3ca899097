//! Configuration loaded once from a JSON file at startup (§6). Unlike the
//! source's per-key `lru_cache` memoization, the full crate parses and
//! validates everything eagerly into one `Config` value passed by parameter
//! from the CLI entry point down to the supervisor, matching the teacher's
//! `GlobalOptions` idiom in `bin/podcore/main.rs`.

use errors::*;

use serde_json;
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(rename = "connection-string")]
    pub connection_string: String,

    #[serde(rename = "max-connections")]
    pub max_connections: u32,

    #[serde(rename = "max-simultaneous-jobs")]
    pub max_simultaneous_jobs: u32,

    #[serde(rename = "seconds-between-updates")]
    pub seconds_between_updates: u64,

    #[serde(rename = "seconds-between-cleanups")]
    pub seconds_between_cleanups: u64,

    #[serde(rename = "seconds-between-task-issue-updates")]
    pub seconds_between_task_issue_updates: u64,

    #[serde(rename = "seconds-between-retries")]
    pub seconds_between_retries: u64,

    #[serde(rename = "days-logs-to-keep")]
    pub days_logs_to_keep: i32,

    #[serde(rename = "conda-project-root")]
    pub conda_project_root: Option<String>,
}

impl Config {
    /// Reads and validates the config file at `path`. Validation happens
    /// here, eagerly, rather than being deferred to first use.
    pub fn load(path: &Path) -> Result<Config> {
        let mut file = File::open(path).chain_err(|| format!("error opening config file at {}", path.display()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .chain_err(|| format!("error reading config file at {}", path.display()))?;

        let config: Config = serde_json::from_str(&contents)
            .chain_err(|| format!("error parsing config file at {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_connections < 3 {
            bail!("max-connections must be >= 3, got {}", self.max_connections);
        }
        if self.max_simultaneous_jobs < 1 {
            bail!("max-simultaneous-jobs must be >= 1, got {}", self.max_simultaneous_jobs);
        }
        if self.seconds_between_updates < 1 {
            bail!("seconds-between-updates must be >= 1, got {}", self.seconds_between_updates);
        }
        if self.seconds_between_cleanups < 1 {
            bail!("seconds-between-cleanups must be >= 1, got {}", self.seconds_between_cleanups);
        }
        if self.seconds_between_task_issue_updates < 1 {
            bail!(
                "seconds-between-task-issue-updates must be >= 1, got {}",
                self.seconds_between_task_issue_updates
            );
        }
        if self.days_logs_to_keep < 0 {
            bail!("days-logs-to-keep must be >= 0, got {}", self.days_logs_to_keep);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use config::*;

    fn valid_json() -> &'static str {
        r#"{
            "connection-string": "postgres://localhost/ppe",
            "max-connections": 5,
            "max-simultaneous-jobs": 3,
            "seconds-between-updates": 5,
            "seconds-between-cleanups": 60,
            "seconds-between-task-issue-updates": 10,
            "seconds-between-retries": 30,
            "days-logs-to-keep": 7,
            "conda-project-root": "/opt/conda-projects"
        }"#
    }

    #[test]
    fn test_parses_and_validates_well_formed_config() {
        let config: Config = ::serde_json::from_str(valid_json()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!("postgres://localhost/ppe", config.connection_string);
        assert_eq!(5, config.max_connections);
    }

    #[test]
    fn test_rejects_too_few_max_connections() {
        let mut config: Config = ::serde_json::from_str(valid_json()).unwrap();
        config.max_connections = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_simultaneous_jobs() {
        let mut config: Config = ::serde_json::from_str(valid_json()).unwrap();
        config.max_simultaneous_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_days_logs_to_keep() {
        let mut config: Config = ::serde_json::from_str(valid_json()).unwrap();
        config.days_logs_to_keep = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_allows_absent_conda_project_root() {
        let config: Config = serde_json::from_str(
            r#"{
                "connection-string": "postgres://localhost/ppe",
                "max-connections": 5,
                "max-simultaneous-jobs": 3,
                "seconds-between-updates": 5,
                "seconds-between-cleanups": 60,
                "seconds-between-task-issue-updates": 10,
                "seconds-between-retries": 30,
                "days-logs-to-keep": 7
            }"#,
        ).unwrap();
        assert!(config.conda_project_root.is_none());
    }
}
