//! Circulation service configuration.
//!
//! Everything is read once at process start; the resulting transition table
//! is immutable and shared by `Arc`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use circulation_loans::{
    DefaultPolicy, InMemoryItemLocations, ItemLocations, Registry, TableError, TransitionConfig, TransitionEngine,
    TransitionTable,
};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_LOAN_DURATION_DAYS: i64 = 30;
pub const DEFAULT_REQUEST_DURATION_DAYS: i64 = 30;
/// Upper bound for configured loan and request periods (100 years).
pub const MAX_DURATION_DAYS: i64 = 36_500;
const DEV_JWT_SECRET: &str = "dev-secret";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({message})")]
    InvalidValue {
        key: &'static str,
        value: String,
        message: String,
    },

    #[error("cannot read {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("invalid item location directory {}: {message}", path.display())]
    ItemLocations { path: PathBuf, message: String },

    #[error("invalid transition table: {0}")]
    Table(#[from] TableError),
}

/// Process configuration for the circulation service.
///
/// Custom `Debug` implementation redacts `jwt_secret`.
#[derive(Clone)]
pub struct CirculationConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    /// Loan period granted by the default checkout policy, in days.
    pub loan_duration_days: i64,
    /// Lifetime of a request under the default request policy, in days.
    pub request_duration_days: i64,
    /// JSON transition table replacing the built-in lifecycle.
    pub transitions_path: Option<PathBuf>,
    /// JSON object mapping item pids to their home location pids.
    pub item_locations_path: Option<PathBuf>,
}

impl std::fmt::Debug for CirculationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CirculationConfig")
            .field("bind_addr", &self.bind_addr)
            .field("jwt_secret", &"[REDACTED]")
            .field("loan_duration_days", &self.loan_duration_days)
            .field("request_duration_days", &self.request_duration_days)
            .field("transitions_path", &self.transitions_path)
            .field("item_locations_path", &self.item_locations_path)
            .finish()
    }
}

impl Default for CirculationConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            loan_duration_days: DEFAULT_LOAN_DURATION_DAYS,
            request_duration_days: DEFAULT_REQUEST_DURATION_DAYS,
            transitions_path: None,
            item_locations_path: None,
        }
    }
}

impl CirculationConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `CIRCULATION_BIND_ADDR` (default: `0.0.0.0:8080`)
    /// - `JWT_SECRET` (default: insecure dev secret, logged as a warning)
    /// - `CIRCULATION_DEFAULT_LOAN_DURATION` (days, default: 30)
    /// - `CIRCULATION_DEFAULT_REQUEST_DURATION` (days, default: 30)
    /// - `CIRCULATION_LOAN_TRANSITIONS` (optional path to a JSON transition table)
    /// - `CIRCULATION_ITEM_LOCATIONS` (optional path to a JSON `{item_pid: location_pid}` map)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        Ok(Self {
            bind_addr: lookup("CIRCULATION_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            jwt_secret,
            loan_duration_days: days(
                "CIRCULATION_DEFAULT_LOAN_DURATION",
                lookup("CIRCULATION_DEFAULT_LOAN_DURATION"),
                DEFAULT_LOAN_DURATION_DAYS,
            )?,
            request_duration_days: days(
                "CIRCULATION_DEFAULT_REQUEST_DURATION",
                lookup("CIRCULATION_DEFAULT_REQUEST_DURATION"),
                DEFAULT_REQUEST_DURATION_DAYS,
            )?,
            transitions_path: path_var(lookup("CIRCULATION_LOAN_TRANSITIONS")),
            item_locations_path: path_var(lookup("CIRCULATION_ITEM_LOCATIONS")),
        })
    }

    pub fn policy(&self) -> DefaultPolicy {
        DefaultPolicy::from_days(self.loan_duration_days, self.request_duration_days)
    }

    /// The configured transition table source, or the built-in lifecycle.
    pub fn transition_config(&self) -> Result<TransitionConfig, ConfigError> {
        match &self.transitions_path {
            None => Ok(TransitionConfig::circulation_default()),
            Some(path) => Ok(TransitionConfig::from_json(&read(path)?)?),
        }
    }

    /// Item location directory; empty when no file is configured.
    pub fn item_locations(&self) -> Result<InMemoryItemLocations, ConfigError> {
        let locations = InMemoryItemLocations::new();
        let Some(path) = &self.item_locations_path else {
            return Ok(locations);
        };

        let entries: BTreeMap<String, String> =
            serde_json::from_str(&read(path)?).map_err(|e| ConfigError::ItemLocations {
                path: path.clone(),
                message: e.to_string(),
            })?;
        for (item_pid, location_pid) in entries {
            locations
                .insert(item_pid, location_pid)
                .map_err(|e| ConfigError::ItemLocations {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(locations)
    }

    /// Build the validated transition engine backed by the default policy.
    pub fn build_engine(&self, locations: Arc<dyn ItemLocations>) -> Result<TransitionEngine, ConfigError> {
        let registry = Registry::circulation(Arc::new(self.policy()), locations);
        let table = TransitionTable::build(&self.transition_config()?, &registry)?;
        Ok(TransitionEngine::new(Arc::new(table)))
    }
}

fn path_var(raw: Option<String>) -> Option<PathBuf> {
    raw.filter(|p| !p.trim().is_empty()).map(PathBuf::from)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn days(key: &'static str, raw: Option<String>, default: i64) -> Result<i64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };

    match raw.trim().parse::<i64>() {
        Ok(days) if (1..=MAX_DURATION_DAYS).contains(&days) => Ok(days),
        Ok(_) => Err(ConfigError::InvalidValue {
            key,
            value: raw,
            message: format!("must be between 1 and {MAX_DURATION_DAYS} days"),
        }),
        Err(e) => Err(ConfigError::InvalidValue {
            key,
            value: raw,
            message: e.to_string(),
        }),
    }
}
