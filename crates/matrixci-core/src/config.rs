//! Runtime settings resolved from the environment.

use std::path::PathBuf;

use crate::error::{CoreError, Result};

/// Default ledger and work-directory root.
pub const DEFAULT_HOME: &str = ".matrixci";
/// Default per-step timeout (30 minutes).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 1800;

/// Resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root for the run ledger (`<home>/runs`) and context work dirs (`<home>/work`).
    pub home: PathBuf,
    /// Timeout applied to steps that do not declare one. 0 disables it.
    pub step_timeout_secs: u64,
    /// Cap on concurrent contexts, overriding the workflow when set.
    pub max_parallel: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home: PathBuf::from(DEFAULT_HOME),
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            max_parallel: None,
        }
    }
}

impl Settings {
    /// Create from environment variables
    ///
    /// Reads:
    /// - MATRIXCI_HOME (optional, default: ".matrixci")
    /// - MATRIXCI_STEP_TIMEOUT_SECS (optional, default: 1800)
    /// - MATRIXCI_MAX_PARALLEL (optional, must be >= 1)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(home) = lookup("MATRIXCI_HOME").filter(|v| !v.trim().is_empty()) {
            settings.home = PathBuf::from(home);
        }
        if let Some(raw) = lookup("MATRIXCI_STEP_TIMEOUT_SECS") {
            settings.step_timeout_secs =
                raw.trim().parse().map_err(|_| CoreError::InvalidSetting {
                    name: "MATRIXCI_STEP_TIMEOUT_SECS".to_string(),
                    value: raw.clone(),
                    reason: "expected a non-negative integer".to_string(),
                })?;
        }
        if let Some(raw) = lookup("MATRIXCI_MAX_PARALLEL") {
            let n: usize = raw.trim().parse().map_err(|_| CoreError::InvalidSetting {
                name: "MATRIXCI_MAX_PARALLEL".to_string(),
                value: raw.clone(),
                reason: "expected a positive integer".to_string(),
            })?;
            if n == 0 {
                return Err(CoreError::InvalidSetting {
                    name: "MATRIXCI_MAX_PARALLEL".to_string(),
                    value: raw,
                    reason: "must be at least 1".to_string(),
                });
            }
            settings.max_parallel = Some(n);
        }
        Ok(settings)
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.home.clone()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.home.join("work")
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        if max_parallel.is_some() {
            self.max_parallel = max_parallel;
        }
        self
    }
}
