use std::path::PathBuf;
use std::str::FromStr;

use chrono::{FixedOffset, Local};
use thiserror::Error;

use crate::queue::EngineSettings;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CLINICS_CSV: &str = "data/clinics.csv";
pub const DEFAULT_EVENT_BUFFER: usize = 100;
pub const DEFAULT_CLAIM_RETRIES: u32 = 5;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} has an invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub clinics_csv: PathBuf,
    pub utc_offset: FixedOffset,
    /// Events kept per clinic for polling clients
    pub event_buffer: usize,
    pub claim_retries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            port: DEFAULT_PORT,
            clinics_csv: PathBuf::from(DEFAULT_CLINICS_CSV),
            utc_offset: *Local::now().offset(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            claim_retries: DEFAULT_CLAIM_RETRIES,
        }
    }
}

fn parse_var<T: FromStr>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn parse_offset(raw: Option<String>) -> Result<Option<FixedOffset>, ConfigError> {
    const VAR: &str = "CLINIC_QUEUE_UTC_OFFSET_MINUTES";
    let Some(minutes) = parse_var::<i32>(VAR, raw.clone())? else {
        return Ok(None);
    };
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .map(Some)
        .ok_or_else(|| ConfigError::Invalid { var: VAR, value: raw.unwrap_or_default() })
}

impl AppConfig {
    /// Reads the `CLINIC_QUEUE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the configuration from any variable source; unset variables keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();
        Ok(AppConfig {
            port: parse_var("CLINIC_QUEUE_PORT", lookup("CLINIC_QUEUE_PORT"))?.unwrap_or(defaults.port),
            clinics_csv: lookup("CLINIC_QUEUE_CLINICS")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.clinics_csv),
            utc_offset: parse_offset(lookup("CLINIC_QUEUE_UTC_OFFSET_MINUTES"))?.unwrap_or(defaults.utc_offset),
            event_buffer: parse_var("CLINIC_QUEUE_EVENT_BUFFER", lookup("CLINIC_QUEUE_EVENT_BUFFER"))?
                .unwrap_or(defaults.event_buffer),
            claim_retries: parse_var("CLINIC_QUEUE_CLAIM_RETRIES", lookup("CLINIC_QUEUE_CLAIM_RETRIES"))?
                .unwrap_or(defaults.claim_retries),
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            utc_offset: self.utc_offset,
            claim_retries: self.claim_retries,
        }
    }
}
