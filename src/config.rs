//! Configuration loader for the `fieldsurvey` toolkit.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Command-line flags override individual values per
//! run; everything else reads from the [`Config`] snapshot built here.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::sampler::SelectionPolicy;

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read an optional, non-empty string environment variable.
macro_rules! optional_env {
    ($var_name:expr) => {
        env::var($var_name).ok().filter(|v| !v.trim().is_empty())
    };
}

pub const DEFAULT_GEOCODER_URL: &str = "https://dapi.kakao.com/v2/local/geo/coord2address.json";
pub const DEFAULT_PHOTO_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_PHOTO_SCALE: f32 = 0.5;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Reverse-geocoding endpoint.
    pub geocoder_url: String,

    /// REST key for the geocoder. `None` disables address lookups.
    pub geocoder_api_key: Option<String>,

    /// Per-request timeout for the geocoder.
    pub geocoder_timeout: Duration,

    /// Default sampling window.
    pub sample_duration: Duration,

    /// How the best fix is chosen from a window.
    pub selection_policy: SelectionPolicy,

    /// Directory used by the direct-download sink.
    pub output_dir: PathBuf,

    /// Set on hosts without reliable programmatic downloads.
    pub share_handoff: bool,

    pub photo: PhotoConfig,

    /// gpsd `host:port`.
    pub gpsd_addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotoConfig {
    // ---
    /// Attachments above this size are rejected before any processing.
    pub max_bytes: usize,
    /// Linear scale-down factor applied before re-encoding.
    pub scale: f32,
    /// JPEG re-encode quality, 1-100.
    pub jpeg_quality: u8,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_PHOTO_MAX_BYTES,
            scale: DEFAULT_PHOTO_SCALE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `GEOCODER_API_URL` – reverse-geocoding endpoint (default: Kakao coord2address)
/// - `GEOCODER_API_KEY` – REST key; unset disables address lookups
/// - `GEOCODER_TIMEOUT_SECS` – request timeout (default: 10)
/// - `SAMPLE_DURATION_SECS` – sampling window (default: 10)
/// - `FIX_POLICY` – `min` or `trimmed-mean:K` (default: `min`)
/// - `OUTPUT_DIR` – where artifacts are written (default: `.`)
/// - `SHARE_HANDOFF` – `true` on hosts without reliable downloads (default: false)
/// - `PHOTO_MAX_BYTES` – attachment ceiling (default: 5 MiB)
/// - `PHOTO_SCALE` – resize factor (default: 0.5)
/// - `PHOTO_JPEG_QUALITY` – re-encode quality (default: 80)
/// - `GPSD_ADDR` – gpsd endpoint (default: `127.0.0.1:2947`)
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let geocoder_url = optional_env!("GEOCODER_API_URL").unwrap_or_else(|| DEFAULT_GEOCODER_URL.to_string());
    let geocoder_api_key = optional_env!("GEOCODER_API_KEY");
    let geocoder_timeout = Duration::from_secs(parse_env!("GEOCODER_TIMEOUT_SECS", u64, 10));

    let sample_secs = parse_env!("SAMPLE_DURATION_SECS", u64, 10);
    if sample_secs == 0 {
        return Err(anyhow!("Invalid SAMPLE_DURATION_SECS: must be greater than zero"));
    }

    let selection_policy = parse_env!("FIX_POLICY", SelectionPolicy, SelectionPolicy::MinAccuracy);
    let output_dir = PathBuf::from(optional_env!("OUTPUT_DIR").unwrap_or_else(|| ".".to_string()));
    let share_handoff = optional_env!("SHARE_HANDOFF")
        .map(|v| parse_flag(&v))
        .transpose()
        .map_err(|e| anyhow!("Invalid SHARE_HANDOFF: {}", e))?
        .unwrap_or(false);

    let photo = PhotoConfig {
        max_bytes: parse_env!("PHOTO_MAX_BYTES", usize, DEFAULT_PHOTO_MAX_BYTES),
        scale: parse_env!("PHOTO_SCALE", f32, DEFAULT_PHOTO_SCALE),
        jpeg_quality: parse_env!("PHOTO_JPEG_QUALITY", u8, DEFAULT_JPEG_QUALITY),
    };
    if !(photo.scale > 0.0 && photo.scale <= 1.0) {
        return Err(anyhow!("Invalid PHOTO_SCALE: {} is outside (0, 1]", photo.scale));
    }
    if !(1..=100).contains(&photo.jpeg_quality) {
        return Err(anyhow!("Invalid PHOTO_JPEG_QUALITY: {} is outside 1-100", photo.jpeg_quality));
    }

    let gpsd_addr = optional_env!("GPSD_ADDR").unwrap_or_else(|| "127.0.0.1:2947".to_string());

    Ok(Config {
        geocoder_url,
        geocoder_api_key,
        geocoder_timeout,
        sample_duration: Duration::from_secs(sample_secs),
        selection_policy,
        output_dir,
        share_handoff,
        photo,
        gpsd_addr,
    })
}

fn parse_flag(value: &str) -> Result<bool, String> {
    // ---
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(format!("expected true/false, got {other:?}")),
    }
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the geocoder API key while showing all other values.
    pub fn log_config(&self) {
        // ---
        let masked_key = match &self.geocoder_api_key {
            Some(key) if key.chars().count() > 4 => {
                format!("{}****", key.chars().take(4).collect::<String>())
            }
            Some(_) => "****".to_string(),
            None => "(unset, address lookup disabled)".to_string(),
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  GEOCODER_API_URL      : {}", self.geocoder_url);
        tracing::info!("  GEOCODER_API_KEY      : {}", masked_key);
        tracing::info!("  GEOCODER_TIMEOUT_SECS : {}", self.geocoder_timeout.as_secs());
        tracing::info!("  SAMPLE_DURATION_SECS  : {}", self.sample_duration.as_secs());
        tracing::info!("  FIX_POLICY            : {}", self.selection_policy);
        tracing::info!("  OUTPUT_DIR            : {}", self.output_dir.display());
        tracing::info!("  SHARE_HANDOFF         : {}", self.share_handoff);
        tracing::info!("  PHOTO_MAX_BYTES       : {}", self.photo.max_bytes);
        tracing::info!("  PHOTO_SCALE           : {}", self.photo.scale);
        tracing::info!("  PHOTO_JPEG_QUALITY    : {}", self.photo.jpeg_quality);
        tracing::info!("  GPSD_ADDR             : {}", self.gpsd_addr);
    }
}
