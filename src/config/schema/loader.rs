use super::Config;
use crate::error::ConfigError;
use anyhow::{Context, Result};
use directories::UserDirs;
use std::fs;
use std::path::{Path, PathBuf};

impl Config {
    /// Loads `path` (or `~/.agentplane/config.toml`), writing defaults when absent.
    pub fn load_or_init(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };

        let mut config = if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path.clone_from(&config_path);
            config
        } else {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
            let config = Self {
                config_path: config_path.clone(),
                ..Self::default()
            };
            config.save()?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.run_recheck_secs == 0 {
            return Err(ConfigError::Validation(
                "controller.run_recheck_secs must be greater than zero".into(),
            ));
        }
        if self.controller.schedule_max_recheck_secs == 0 {
            return Err(ConfigError::Validation(
                "controller.schedule_max_recheck_secs must be greater than zero".into(),
            ));
        }
        if self.controller.error_backoff_secs > self.controller.error_backoff_max_secs {
            return Err(ConfigError::Validation(
                "controller.error_backoff_secs exceeds controller.error_backoff_max_secs".into(),
            ));
        }
        if self.workload.agent_image.trim().is_empty() {
            return Err(ConfigError::Validation("workload.agent_image is empty".into()));
        }
        if self.workload.service_account.trim().is_empty() {
            return Err(ConfigError::Validation(
                "workload.service_account is empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".agentplane").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let config = Config::load_or_init(Some(&path)).unwrap();

        assert!(path.exists());
        assert_eq!(config.config_path, path);
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("[workload]"));
    }

    #[test]
    fn existing_file_is_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[controller]\nlog_tail_lines = 42\n").unwrap();

        let config = Config::load_or_init(Some(&path)).unwrap();
        assert_eq!(config.controller.log_tail_lines, 42);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[controller]\nrun_recheck_secs = 0\n").unwrap();

        let err = Config::load_or_init(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("run_recheck_secs"));
    }

    #[test]
    fn malformed_toml_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[controller\n").unwrap();

        let err = Config::load_or_init(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
