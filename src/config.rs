//! Service configuration.
//!
//! Read once at startup from the environment (a `.env` file is loaded first
//! by `main`). Only `MISTRAL_API_KEY` is required.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.mistral.ai/v1/chat/completions";
const DEFAULT_MODEL: &str = "pixtral-12b-2409";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_WORKBOOK: &str = "Firmas electrónica procesadas.xlsx";
const DEFAULT_MAX_UPLOAD_MB: usize = 25;
const DEFAULT_SESSION_IDLE_MINS: u64 = 60;

/// Where a confirmed record ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Spreadsheet and images are served for the operator's browser to download.
    Download,
    /// Row appended to a cumulative workbook, images written under `output_dir`.
    Disk,
}

impl ExportMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "download" | "web" | "cloud" => Some(Self::Download),
            "disk" | "local" | "desktop" => Some(Self::Disk),
            _ => None,
        }
    }
}

/// Settings for the vision model endpoint.
#[derive(Debug, Clone)]
pub struct MistralConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub mistral: MistralConfig,
    pub export_mode: ExportMode,
    pub workbook_path: PathBuf,
    pub output_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// Sessions untouched for this long are dropped.
    pub session_idle: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key =
            get("MISTRAL_API_KEY").context("MISTRAL_API_KEY environment variable not set")?;

        let timeout_secs = match get("EXTRACTION_TIMEOUT_SECS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid EXTRACTION_TIMEOUT_SECS: {}", v))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let export_mode = match get("EXPORT_MODE") {
            Some(v) => ExportMode::parse(&v).with_context(|| {
                format!("Invalid EXPORT_MODE: {} (expected download or disk)", v)
            })?,
            None => ExportMode::Download,
        };

        let max_upload_mb = match get("MAX_UPLOAD_MB") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid MAX_UPLOAD_MB: {}", v))?,
            None => DEFAULT_MAX_UPLOAD_MB,
        };

        let idle_mins = match get("SESSION_IDLE_MINUTES") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid SESSION_IDLE_MINUTES: {}", v))?,
            None => DEFAULT_SESSION_IDLE_MINS,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            mistral: MistralConfig {
                api_key,
                api_url: get("MISTRAL_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                model: get("MISTRAL_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                timeout: Duration::from_secs(timeout_secs),
            },
            export_mode,
            workbook_path: get("WORKBOOK_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKBOOK)),
            output_dir: get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            session_idle: Duration::from_secs(idle_mins * 60),
        })
    }
}
