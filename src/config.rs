/// TOML configuration: Home Assistant connection plus one or more flux switches.
/// Every switch field except `lights` has a default; values are range-checked
/// once at startup and never again.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveTime;
use serde::Deserialize;

use crate::circadian::ColorTemps;
use crate::color::{ColorMode, MAX_KELVIN, MIN_KELVIN};
use crate::command;

/// Largest transition Home Assistant accepts, in seconds.
const MAX_TRANSITION_S: f64 = 6553.0;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hass: HassConfig,
    #[serde(default)]
    pub switches: Vec<SwitchSettings>,
}

/// Home Assistant REST connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HassConfig {
    pub url: String,
    /// Long-lived access token
    pub token: String,
    /// How often light states are polled to spot lights being switched on
    pub poll_interval_s: u64,
    pub timeout_s: u64,
}

/// One switch as written in the file, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwitchSettings {
    pub name: String,
    pub lights: Vec<String>,
    /// Overrides sunrise. "HH:MM" or "HH:MM:SS"
    pub start_time: Option<String>,
    pub stop_time: String,
    pub start_colortemp: i64,
    pub sunset_colortemp: i64,
    pub stop_colortemp: i64,
    /// Fixed brightness instead of the color-derived one
    pub brightness: Option<i64>,
    pub disable_brightness_adjust: bool,
    pub init_on_turn_on: bool,
    pub mode: ColorMode,
    /// Seconds
    pub interval: i64,
    /// Seconds, for periodic updates only
    pub transition: f64,
}

/// Validated, immutable settings of one switch.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchConfig {
    pub name: String,
    pub lights: Vec<String>,
    pub start_time: Option<NaiveTime>,
    pub stop_time: NaiveTime,
    pub colortemps: ColorTemps,
    pub brightness: Option<u8>,
    pub disable_brightness_adjust: bool,
    pub init_on_turn_on: bool,
    pub mode: ColorMode,
    pub interval: u32,
    pub transition: f64,
}

#[derive(Debug)]
pub enum ConfigError {
    Read { path: String, source: std::io::Error },
    Parse(toml::de::Error),
    Invalid { field: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => write!(f, "cannot read {path}: {source}"),
            ConfigError::Parse(e) => write!(f, "invalid TOML: {e}"),
            ConfigError::Invalid { field, reason } => write!(f, "{field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

impl Default for HassConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".into(),
            token: String::new(),
            poll_interval_s: 5,
            timeout_s: 10,
        }
    }
}

impl Default for SwitchSettings {
    fn default() -> Self {
        let temps = ColorTemps::default();
        Self {
            name: "MyFlux".into(),
            lights: Vec::new(),
            start_time: None,
            stop_time: "22:00".into(),
            start_colortemp: temps.start as i64,
            sunset_colortemp: temps.sunset as i64,
            stop_colortemp: temps.stop as i64,
            brightness: None,
            disable_brightness_adjust: false,
            init_on_turn_on: false,
            mode: ColorMode::Xy,
            interval: 180,
            transition: 180.0,
        }
    }
}

/// "HH:MM" or "HH:MM:SS".
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

impl SwitchSettings {
    pub fn validate(&self) -> Result<SwitchConfig, ConfigError> {
        let field = |f: &str| format!("switch '{}'.{f}", self.name);

        if self.name.trim().is_empty() {
            return Err(invalid("switch.name", "must not be empty"));
        }
        if self.lights.is_empty() {
            return Err(invalid(field("lights"), "at least one light entity is required"));
        }
        if let Some(bad) = self.lights.iter().find(|id| id.trim().is_empty()) {
            return Err(invalid(field("lights"), format!("invalid entity id {bad:?}")));
        }

        let start_time = match &self.start_time {
            Some(s) => Some(
                parse_time_of_day(s)
                    .ok_or_else(|| invalid(field("start_time"), format!("not a time of day: {s:?}")))?,
            ),
            None => None,
        };
        let stop_time = parse_time_of_day(&self.stop_time).ok_or_else(|| {
            invalid(field("stop_time"), format!("not a time of day: {:?}", self.stop_time))
        })?;

        let kelvin = |name: &str, value: i64| -> Result<u32, ConfigError> {
            if (MIN_KELVIN as i64..=MAX_KELVIN as i64).contains(&value) {
                Ok(value as u32)
            } else {
                Err(invalid(
                    field(name),
                    format!("{value} is outside {MIN_KELVIN}..={MAX_KELVIN}"),
                ))
            }
        };
        let colortemps = ColorTemps {
            start: kelvin("start_colortemp", self.start_colortemp)?,
            sunset: kelvin("sunset_colortemp", self.sunset_colortemp)?,
            stop: kelvin("stop_colortemp", self.stop_colortemp)?,
        };

        let brightness = match self.brightness {
            Some(b) => Some(
                u8::try_from(b)
                    .map_err(|_| invalid(field("brightness"), format!("{b} is outside 0..=255")))?,
            ),
            None => None,
        };

        let interval = u32::try_from(self.interval)
            .map_err(|_| invalid(field("interval"), format!("{} must not be negative", self.interval)))?;

        if !self.transition.is_finite() {
            return Err(invalid(field("transition"), "must be a number"));
        }

        Ok(SwitchConfig {
            name: self.name.clone(),
            lights: self.lights.clone(),
            start_time,
            stop_time,
            colortemps,
            brightness,
            disable_brightness_adjust: self.disable_brightness_adjust,
            init_on_turn_on: self.init_on_turn_on,
            mode: self.mode,
            interval,
            transition: self.transition.clamp(0.0, MAX_TRANSITION_S),
        })
    }
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(ConfigError::Parse)
    }

    /// Load and parse the config file. A missing or malformed file is an error:
    /// there is no useful default for which lights to drive.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&contents)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Validate every switch. Services are addressed by name, so no two
    /// switches may expose the same service name (e.g. "Flux" and
    /// "Flux Force" would both own `flux_force_update`).
    pub fn switch_configs(&self) -> Result<Vec<SwitchConfig>, ConfigError> {
        if self.switches.is_empty() {
            return Err(invalid("switches", "no [[switches]] configured"));
        }
        let mut owners: HashMap<String, String> = HashMap::new();
        self.switches
            .iter()
            .map(|s| {
                let cfg = s.validate()?;
                let slug = command::slugify(&cfg.name);
                for service in command::service_names(&slug) {
                    if let Some(other) = owners.insert(service.clone(), cfg.name.clone()) {
                        return Err(invalid(
                            "switch.name",
                            format!("{:?} and {other:?} both provide service {service}", cfg.name),
                        ));
                    }
                }
                Ok(cfg)
            })
            .collect()
    }
}

/// CLI argument, then `$FLUXPP_CONFIG`, then `fluxpp.toml`.
pub fn config_file_path() -> String {
    if let Some(arg) = std::env::args().nth(1) {
        arg
    } else if let Ok(path) = std::env::var("FLUXPP_CONFIG") {
        path
    } else {
        "fluxpp.toml".into()
    }
}
