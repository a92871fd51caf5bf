use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub agent: AgentConfig,
    pub storage: StorageConfig,
    pub loops: LoopDefaults,
    pub breakpoints: BreakpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the agent-execution runtime.
    pub base_url: String,
    /// Default agent role for tasks that don't name one.
    pub default_agent: String,
    pub timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8700".to_string(),
            default_agent: "worker".to_string(),
            timeout_ms: 300000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub store_dir: PathBuf,
    pub jsonl_warn_mb: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cadence"),
            jsonl_warn_mb: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDefaults {
    pub max_iterations: u32,
    pub threshold: f64,
}

impl Default for LoopDefaults {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            threshold: 80.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakpointConfig {
    /// How often a suspended run polls the store for a resolution.
    pub poll_interval_ms: u64,
    /// Approve every breakpoint without waiting (demos, CI).
    pub auto_approve: bool,
}

impl Default for BreakpointConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            auto_approve: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            agent: AgentConfig::default(),
            storage: StorageConfig::default(),
            loops: LoopDefaults::default(),
            breakpoints: BreakpointConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level.as_deref(), Some("info"));
        assert_eq!(config.loops.max_iterations, 5);
        assert_eq!(config.loops.threshold, 80.0);
        assert!(!config.breakpoints.auto_approve);
    }

    #[test]
    fn test_load_from_yaml() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("cadence.yml");
        fs::write(
            &path,
            r#"
log_level: debug
agent:
  base_url: "http://agent.internal:9000"
  default_agent: "analyst"
loops:
  max_iterations: 3
  threshold: 90.0
breakpoints:
  auto_approve: true
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.agent.base_url, "http://agent.internal:9000");
        assert_eq!(config.agent.default_agent, "analyst");
        assert_eq!(config.loops.max_iterations, 3);
        assert!(config.breakpoints.auto_approve);
        // Unspecified sections fall back to defaults
        assert_eq!(config.agent.timeout_ms, 300000);
        assert_eq!(config.breakpoints.poll_interval_ms, 2000);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/cadence.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
