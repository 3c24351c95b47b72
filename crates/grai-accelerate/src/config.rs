//! Configuration for the compute context.
//!
//! Sources, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. A configuration file (`.toml`, `.yaml`/`.yml` or `.json`)
//! 3. Environment variables (`GRAI_*`)

use anyhow::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Default SIMD width assumed when the backend does not report one.
pub const DEFAULT_EXECUTION_WIDTH: u32 = 32;

/// Float storage used by [`crate::FloatBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Precision {
    #[default]
    Float32,
    Float16,
}

/// Power preference used to pick the platform default device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreferenceOption {
    #[default]
    HighPerformance,
    LowPower,
    None,
}

impl From<PowerPreferenceOption> for wgpu::PowerPreference {
    fn from(value: PowerPreferenceOption) -> Self {
        match value {
            PowerPreferenceOption::HighPerformance => wgpu::PowerPreference::HighPerformance,
            PowerPreferenceOption::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreferenceOption::None => wgpu::PowerPreference::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeOptions {
    /// Devices to open, by adapter name, in priority order. Empty means
    /// "external GPUs first, then the platform default".
    pub preferred_devices: Vec<String>,
    pub power_preference: PowerPreferenceOption,
    pub force_fallback_adapter: bool,
    /// Thread-execution width used for 1-D groups and the group-size hint.
    pub execution_width: u32,
    /// Block on every enqueued command and record elapsed time.
    pub track_timing: bool,
    pub precision: Precision,
}

impl Default for ComputeOptions {
    fn default() -> Self {
        Self {
            preferred_devices: Vec::new(),
            power_preference: PowerPreferenceOption::HighPerformance,
            force_fallback_adapter: false,
            execution_width: DEFAULT_EXECUTION_WIDTH,
            track_timing: false,
            precision: Precision::Float32,
        }
    }
}

impl ComputeOptions {
    /// Defaults overridden by the environment.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.apply_environment_variables();
        options
    }

    /// Load from a file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut options = Self::load_from_file(path)?;
        options.apply_environment_variables();
        Ok(options)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let options = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            other => bail!(
                "Unsupported config format {:?} for {}",
                other.unwrap_or(""),
                path.display()
            ),
        };
        debug!("Loaded compute options from {}", path.display());
        Ok(options)
    }

    pub fn apply_environment_variables(&mut self) {
        if let Ok(names) = env::var("GRAI_GPU_NAMES") {
            self.preferred_devices = parse_device_names(&names);
        }
        if let Ok(power) = env::var("GRAI_POWER_PREFERENCE") {
            if let Some(pref) = parse_power_preference(&power) {
                self.power_preference = pref;
            }
        }
        if let Ok(flag) = env::var("GRAI_FORCE_FALLBACK_ADAPTER") {
            if let Some(flag) = parse_bool(&flag) {
                self.force_fallback_adapter = flag;
            }
        }
        if let Ok(width) = env::var("GRAI_EXECUTION_WIDTH") {
            match width.trim().parse::<u32>() {
                Ok(parsed) if parsed > 0 => self.execution_width = parsed,
                _ => log::warn!(
                    "GRAI_EXECUTION_WIDTH='{width}' ignored (expected a positive integer)"
                ),
            }
        }
        if let Ok(flag) = env::var("GRAI_TRACK_TIMING") {
            if let Some(flag) = parse_bool(&flag) {
                self.track_timing = flag;
            }
        }
        if let Ok(precision) = env::var("GRAI_PRECISION") {
            if let Some(precision) = parse_precision(&precision) {
                self.precision = precision;
            }
        }
    }
}

fn parse_device_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_power_preference(raw: &str) -> Option<PowerPreferenceOption> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "high" | "high-performance" | "high_performance" => {
            Some(PowerPreferenceOption::HighPerformance)
        }
        "low" | "low-power" | "low_power" => Some(PowerPreferenceOption::LowPower),
        "none" => Some(PowerPreferenceOption::None),
        _ => None,
    }
}

fn parse_precision(raw: &str) -> Option<Precision> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "f32" | "float32" | "32" => Some(Precision::Float32),
        "f16" | "float16" | "16" | "half" => Some(Precision::Float16),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_prefer_external_then_default_device() {
        let options = ComputeOptions::default();
        assert!(options.preferred_devices.is_empty());
        assert_eq!(options.execution_width, DEFAULT_EXECUTION_WIDTH);
        assert_eq!(options.precision, Precision::Float32);
        assert!(!options.track_timing);
    }

    #[test]
    fn device_names_are_trimmed_and_ordered() {
        assert_eq!(
            parse_device_names(" AMD Radeon Pro W6800X , Apple M2 ,,"),
            vec!["AMD Radeon Pro W6800X".to_string(), "Apple M2".to_string()]
        );
        assert!(parse_device_names("").is_empty());
    }

    #[test]
    fn parses_flags_and_enums() {
        assert_eq!(parse_bool("On"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_precision("half"), Some(Precision::Float16));
        assert_eq!(
            parse_power_preference("low-power"),
            Some(PowerPreferenceOption::LowPower)
        );
    }

    #[test]
    fn loads_toml_with_partial_fields() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "preferred_devices = [\"eGPU\"]\nexecution_width = 64\nprecision = \"float16\""
        )
        .unwrap();
        let options = ComputeOptions::load_from_file(file.path()).unwrap();
        assert_eq!(options.preferred_devices, vec!["eGPU".to_string()]);
        assert_eq!(options.execution_width, 64);
        assert_eq!(options.precision, Precision::Float16);
        assert_eq!(options.power_preference, PowerPreferenceOption::HighPerformance);
    }

    #[test]
    fn loads_json_and_rejects_unknown_extension() {
        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(json, "{{\"track_timing\": true, \"power_preference\": \"low-power\"}}").unwrap();
        let options = ComputeOptions::load_from_file(json.path()).unwrap();
        assert!(options.track_timing);
        assert_eq!(options.power_preference, PowerPreferenceOption::LowPower);

        let ini = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(ComputeOptions::load_from_file(ini.path()).is_err());
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars = [
            ("GRAI_GPU_NAMES", "Apple M2, eGPU"),
            ("GRAI_POWER_PREFERENCE", "low"),
            ("GRAI_FORCE_FALLBACK_ADAPTER", "yes"),
            ("GRAI_EXECUTION_WIDTH", "64"),
            ("GRAI_TRACK_TIMING", "1"),
            ("GRAI_PRECISION", "f16"),
        ];
        for (key, value) in vars {
            env::set_var(key, value);
        }
        let options = ComputeOptions::from_env();

        // Unparsable values leave the current setting alone.
        env::set_var("GRAI_EXECUTION_WIDTH", "wide");
        env::set_var("GRAI_PRECISION", "f8");
        let mut reapplied = options.clone();
        reapplied.apply_environment_variables();
        for (key, _) in vars {
            env::remove_var(key);
        }

        assert_eq!(
            options.preferred_devices,
            vec!["Apple M2".to_string(), "eGPU".to_string()]
        );
        assert_eq!(options.power_preference, PowerPreferenceOption::LowPower);
        assert!(options.force_fallback_adapter);
        assert_eq!(options.execution_width, 64);
        assert!(options.track_timing);
        assert_eq!(options.precision, Precision::Float16);
        assert_eq!(reapplied.execution_width, 64);
        assert_eq!(reapplied.precision, Precision::Float16);
    }
}
