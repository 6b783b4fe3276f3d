use custodia_consent::{
    DEFAULT_AT_RISK_HOURS, DEFAULT_EXPIRING_SOON_DAYS, DEFAULT_RECENT_REVOCATION_DAYS,
    DEFAULT_SLA_DAYS,
};
use custodia_core::IdStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RootError, RootResult};

/// Request workflow settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// SLA applied to requests submitted without an explicit `sla_days`.
    #[serde(default = "default_sla_days")]
    pub default_sla_days: u32,

    /// Window before the SLA deadline in which a pending request is at risk.
    #[serde(default = "default_at_risk_hours")]
    pub at_risk_hours: i64,
}

fn default_sla_days() -> u32 {
    DEFAULT_SLA_DAYS
}

fn default_at_risk_hours() -> i64 {
    DEFAULT_AT_RISK_HOURS
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_sla_days: default_sla_days(),
            at_risk_hours: default_at_risk_hours(),
        }
    }
}

/// Consent lifecycle reporting windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_expiring_soon_days")]
    pub expiring_soon_days: i64,

    #[serde(default = "default_recent_revocation_days")]
    pub recent_revocation_days: i64,
}

fn default_expiring_soon_days() -> i64 {
    DEFAULT_EXPIRING_SOON_DAYS
}

fn default_recent_revocation_days() -> i64 {
    DEFAULT_RECENT_REVOCATION_DAYS
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            expiring_soon_days: default_expiring_soon_days(),
            recent_revocation_days: default_recent_revocation_days(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdConfig {
    #[serde(default)]
    pub strategy: IdStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Record decisions and state changes on the hash-chained trail.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
}

fn default_audit_enabled() -> bool {
    true
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
        }
    }
}

/// Top-level configuration, loaded from TOML (typically
/// `~/.custodia/config.toml`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodiaConfig {
    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub ids: IdConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

/// Upper bound for the reporting windows, about one hundred years.
pub const MAX_WINDOW_DAYS: i64 = 36_500;
pub const MAX_AT_RISK_HOURS: i64 = MAX_WINDOW_DAYS * 24;

fn check_window(name: &str, value: i64, max: i64) -> RootResult<()> {
    if value <= 0 || value > max {
        return Err(RootError::Config(format!(
            "{} must be in 1..={}, got {}",
            name, max, value
        )));
    }
    Ok(())
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl CustodiaConfig {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults.
    pub fn load(path: &Path) -> RootResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(RootError::Io)?;
        let config: CustodiaConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> RootResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RootError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(RootError::Io)?;
        }
        std::fs::write(path, contents).map_err(RootError::Io)?;
        Ok(())
    }

    pub fn validate(&self) -> RootResult<()> {
        if self.workflow.default_sla_days == 0 {
            return Err(RootError::Config("default_sla_days must be > 0".into()));
        }
        if i64::from(self.workflow.default_sla_days) > MAX_WINDOW_DAYS {
            return Err(RootError::Config(format!(
                "default_sla_days must be <= {}, got {}",
                MAX_WINDOW_DAYS, self.workflow.default_sla_days
            )));
        }
        check_window("at_risk_hours", self.workflow.at_risk_hours, MAX_AT_RISK_HOURS)?;
        check_window(
            "expiring_soon_days",
            self.lifecycle.expiring_soon_days,
            MAX_WINDOW_DAYS,
        )?;
        check_window(
            "recent_revocation_days",
            self.lifecycle.recent_revocation_days,
            MAX_WINDOW_DAYS,
        )?;
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".custodia/config.toml")
    }
}
