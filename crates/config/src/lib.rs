//! Configuration for the HTN planner binary.
//!
//! Settings load from a TOML file with `HTN_PLANNER_*` environment
//! overrides on top, and every section falls back to documented defaults.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use temporal::{LodLevel, StnOptions, TimeUnit};
use tracing::{debug, info};

/// Default config file looked up next to the working directory.
const DEFAULT_CONFIG_FILE: &str = "htn-planner.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub planning: PlanningSettings,
    pub temporal: TemporalSettings,
    pub solver: SolverSettings,
}

/// Planning-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningSettings {
    /// Trace verbosity, 0..=3
    pub verbose: u8,
    /// Iteration bound on the expansion loop
    pub max_depth: usize,
    /// Re-check goals against projected execution
    pub verify_goals: bool,
}

impl Default for PlanningSettings {
    fn default() -> Self {
        Self {
            verbose: 0,
            max_depth: 100,
            verify_goals: false,
        }
    }
}

/// Temporal-network construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalSettings {
    pub time_unit: TimeUnit,
    pub lod_level: LodLevel,
    pub auto_rescale: bool,
    pub max_timepoints: usize,
    pub constant_work: bool,
}

impl Default for TemporalSettings {
    fn default() -> Self {
        Self {
            time_unit: TimeUnit::Seconds,
            lod_level: LodLevel::UltraHigh,
            auto_rescale: true,
            max_timepoints: 256,
            constant_work: false,
        }
    }
}

/// External-solver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Whether large networks may be delegated at all
    pub enabled: bool,
    pub binary: PathBuf,
    pub solver_id: String,
    pub timeout_ms: u64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: PathBuf::from("minizinc"),
            solver_id: "gecode".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl PlannerConfig {
    /// Load configuration: explicit file if given, the default file if it
    /// exists, defaults otherwise; environment overrides apply on top.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(&path).await?,
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(&default_path).await?
                } else {
                    debug!("no config file found; using defaults");
                    Self::default()
                }
            }
        };
        config.apply_overrides(std::env::vars());
        config.validate()?;
        Ok(config)
    }

    async fn from_file(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading configuration");
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("invalid TOML in {}: {}", path.display(), e)))
    }

    /// Apply `HTN_PLANNER_*` overrides from an environment-like iterator.
    pub fn apply_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            let result = match key.as_str() {
                "HTN_PLANNER_VERBOSE" => value
                    .parse()
                    .map(|v| self.planning.verbose = v)
                    .map_err(|e| format!("{}", e)),
                "HTN_PLANNER_MAX_DEPTH" => value
                    .parse()
                    .map(|v| self.planning.max_depth = v)
                    .map_err(|e| format!("{}", e)),
                "HTN_PLANNER_VERIFY_GOALS" => value
                    .parse()
                    .map(|v| self.planning.verify_goals = v)
                    .map_err(|e| format!("{}", e)),
                "HTN_PLANNER_SOLVER_ENABLED" => value
                    .parse()
                    .map(|v| self.solver.enabled = v)
                    .map_err(|e| format!("{}", e)),
                "HTN_PLANNER_SOLVER_BINARY" => {
                    self.solver.binary = PathBuf::from(value);
                    Ok(())
                }
                "HTN_PLANNER_SOLVER_ID" => {
                    self.solver.solver_id = value;
                    Ok(())
                }
                "HTN_PLANNER_SOLVER_TIMEOUT_MS" => value
                    .parse()
                    .map(|v| self.solver.timeout_ms = v)
                    .map_err(|e| format!("{}", e)),
                _ => continue,
            };
            if let Err(err) = result {
                tracing::warn!(key = %key, %err, "ignoring malformed environment override");
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.planning.verbose > 3 {
            return Err(Error::Config(format!(
                "planning.verbose must be 0..=3, got {}",
                self.planning.verbose
            )));
        }
        if self.planning.max_depth == 0 {
            return Err(Error::Config(
                "planning.max_depth must be positive".to_string(),
            ));
        }
        if self.temporal.max_timepoints == 0 {
            return Err(Error::Config(
                "temporal.max_timepoints must be positive".to_string(),
            ));
        }
        if self.solver.timeout_ms == 0 {
            return Err(Error::Config(
                "solver.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// STN construction options derived from the temporal section.
    pub fn stn_options(&self) -> StnOptions {
        StnOptions {
            time_unit: self.temporal.time_unit,
            lod_level: self.temporal.lod_level,
            max_timepoints: self.temporal.max_timepoints,
            constant_work: self.temporal.constant_work,
            auto_rescale: self.temporal.auto_rescale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PlannerConfig::default();
        assert_eq!(config.planning.max_depth, 100);
        assert_eq!(config.planning.verbose, 0);
        assert_eq!(config.temporal.time_unit, TimeUnit::Seconds);
        assert_eq!(config.solver.solver_id, "gecode");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[planning]
max_depth = 25
verbose = 2

[temporal]
time_unit = "minutes"
lod_level = "medium"

[solver]
enabled = true
timeout_ms = 2500
"#
        )
        .unwrap();

        let config = PlannerConfig::load(Some(file.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(config.planning.max_depth, 25);
        assert_eq!(config.planning.verbose, 2);
        assert_eq!(config.temporal.time_unit, TimeUnit::Minutes);
        assert_eq!(config.temporal.lod_level, LodLevel::Medium);
        assert!(config.solver.enabled);
        assert_eq!(config.solver.timeout_ms, 2500);
        // Unspecified sections keep their defaults.
        assert_eq!(config.temporal.max_timepoints, 256);
    }

    #[tokio::test]
    async fn test_load_rejects_bad_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "this is not toml [").unwrap();

        let err = PlannerConfig::load(Some(file.path().to_path_buf()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = PlannerConfig::load(Some(PathBuf::from("/no/such/file.toml")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let mut config = PlannerConfig::default();
        config.apply_overrides(
            vec![
                ("HTN_PLANNER_MAX_DEPTH".to_string(), "7".to_string()),
                ("HTN_PLANNER_SOLVER_ID".to_string(), "chuffed".to_string()),
                ("HTN_PLANNER_VERBOSE".to_string(), "not-a-number".to_string()),
                ("UNRELATED".to_string(), "ignored".to_string()),
            ]
            .into_iter(),
        );
        assert_eq!(config.planning.max_depth, 7);
        assert_eq!(config.solver.solver_id, "chuffed");
        // Malformed override left the default in place.
        assert_eq!(config.planning.verbose, 0);
    }

    #[test]
    fn test_validation_bounds() {
        let mut config = PlannerConfig::default();
        config.planning.verbose = 4;
        assert!(config.validate().is_err());

        let mut config = PlannerConfig::default();
        config.planning.max_depth = 0;
        assert!(config.validate().is_err());

        let mut config = PlannerConfig::default();
        config.solver.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stn_options() {
        let mut config = PlannerConfig::default();
        config.temporal.lod_level = LodLevel::Low;
        config.temporal.constant_work = true;
        let opts = config.stn_options();
        assert_eq!(opts.lod_level, LodLevel::Low);
        assert!(opts.constant_work);
    }
}
