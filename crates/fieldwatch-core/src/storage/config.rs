//! TOML-based monitor configuration.
//!
//! Stores site and policy settings including:
//! - Worksite geofence (center, radius, site code)
//! - Supervisor notification targets
//! - Accuracy and fence-buffer limits
//! - Alert cooldown windows and escalation thresholds
//! - Sweep scheduling parameters
//!
//! Configuration is stored at `~/.config/fieldwatch/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use crate::alerts::AlertThresholds;
use crate::attendance::MachineLimits;
use crate::error::GeoError;
use crate::geo::{Coordinate, Geofence};
use crate::monitor::MonitorSettings;

/// Worksite configuration: one geofenced site per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_company_id")]
    pub company_id: String,
    /// Credential workers present when clocking in (QR payload or terminal code).
    #[serde(default = "default_site_code")]
    pub code: String,
    #[serde(default = "default_latitude")]
    pub latitude_deg: f64,
    #[serde(default = "default_longitude")]
    pub longitude_deg: f64,
    #[serde(default = "default_radius")]
    pub radius_m: f64,
    /// User ids escalations are delivered to.
    #[serde(default)]
    pub supervisors: Vec<String>,
}

/// Position acceptance limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_accuracy_ceiling")]
    pub accuracy_ceiling_m: f64,
    #[serde(default = "default_fence_buffer")]
    pub fence_buffer_m: f64,
}

/// Alert cooldown windows, in minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownsConfig {
    #[serde(default = "default_outside_cooldown_min")]
    pub outside_geofence_min: u32,
    #[serde(default = "default_break_cooldown_min")]
    pub extended_break_min: u32,
    #[serde(default = "default_missing_cooldown_min")]
    pub missing_clock_out_min: u32,
    #[serde(default = "default_positioning_cooldown_min")]
    pub positioning_disabled_min: u32,
}

/// Supervisor escalation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_break_escalation_min")]
    pub extended_break_min: u32,
    #[serde(default = "default_distance_escalation")]
    pub outside_geofence_distance_m: f64,
}

/// Periodic sweep parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepsConfig {
    #[serde(default = "default_missing_after_min")]
    pub missing_clock_out_after_min: u32,
    #[serde(default = "default_break_after_min")]
    pub extended_break_after_min: u32,
    #[serde(default = "default_worker_timeout_ms")]
    pub worker_timeout_ms: u64,
}

/// Monitor configuration.
///
/// Serialized to/from TOML at `~/.config/fieldwatch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub cooldowns: CooldownsConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub sweeps: SweepsConfig,
}

// Default functions
fn default_company_id() -> String {
    "default".into()
}
fn default_site_code() -> String {
    "site".into()
}
fn default_latitude() -> f64 {
    48.1486
}
fn default_longitude() -> f64 {
    17.1077
}
fn default_radius() -> f64 {
    150.0
}
fn default_accuracy_ceiling() -> f64 {
    50.0
}
fn default_fence_buffer() -> f64 {
    10.0
}
fn default_outside_cooldown_min() -> u32 {
    10
}
fn default_break_cooldown_min() -> u32 {
    65
}
fn default_missing_cooldown_min() -> u32 {
    720
}
fn default_positioning_cooldown_min() -> u32 {
    30
}
fn default_break_escalation_min() -> u32 {
    90
}
fn default_distance_escalation() -> f64 {
    500.0
}
fn default_missing_after_min() -> u32 {
    720
}
fn default_break_after_min() -> u32 {
    65
}
fn default_worker_timeout_ms() -> u64 {
    2000
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            company_id: default_company_id(),
            code: default_site_code(),
            latitude_deg: default_latitude(),
            longitude_deg: default_longitude(),
            radius_m: default_radius(),
            supervisors: Vec::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            accuracy_ceiling_m: default_accuracy_ceiling(),
            fence_buffer_m: default_fence_buffer(),
        }
    }
}

impl Default for CooldownsConfig {
    fn default() -> Self {
        Self {
            outside_geofence_min: default_outside_cooldown_min(),
            extended_break_min: default_break_cooldown_min(),
            missing_clock_out_min: default_missing_cooldown_min(),
            positioning_disabled_min: default_positioning_cooldown_min(),
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            extended_break_min: default_break_escalation_min(),
            outside_geofence_distance_m: default_distance_escalation(),
        }
    }
}

impl Default for SweepsConfig {
    fn default() -> Self {
        Self {
            missing_clock_out_after_min: default_missing_after_min(),
            extended_break_after_min: default_break_after_min(),
            worker_timeout_ms: default_worker_timeout_ms(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            limits: LimitsConfig::default(),
            cooldowns: CooldownsConfig::default(),
            escalation: EscalationConfig::default(),
            sweeps: SweepsConfig::default(),
        }
    }
}

impl MonitorConfig {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err("config key is empty".into());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| format!("unknown config key: {key}"))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| format!("unknown config key: {key}"))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(value.parse::<bool>()?),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| format!("cannot parse '{value}' as number"))?
                        } else {
                            return Err(format!("cannot parse '{value}' as number").into());
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value)?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| format!("unknown config key: {key}"))?;
        }

        Err(format!("unknown config key: {key}").into())
    }

    fn path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cfg: MonitorConfig = toml::from_str(&content)?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(Self::path()?, content)?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key. Returns error if key is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json)?;
        self.save()?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// The configured worksite fence.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured coordinates or radius are invalid.
    pub fn geofence(&self) -> Result<Geofence, GeoError> {
        let center = Coordinate::new(self.site.latitude_deg, self.site.longitude_deg)?;
        Geofence::new(center, self.site.radius_m)
    }

    pub fn machine_limits(&self) -> MachineLimits {
        MachineLimits {
            accuracy_ceiling_m: self.limits.accuracy_ceiling_m,
            fence_buffer_m: self.limits.fence_buffer_m,
            site_code: self.site.code.clone(),
        }
    }

    pub fn alert_thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            outside_geofence_cooldown: chrono::Duration::minutes(
                self.cooldowns.outside_geofence_min as i64,
            ),
            extended_break_cooldown: chrono::Duration::minutes(
                self.cooldowns.extended_break_min as i64,
            ),
            missing_clock_out_cooldown: chrono::Duration::minutes(
                self.cooldowns.missing_clock_out_min as i64,
            ),
            positioning_disabled_cooldown: chrono::Duration::minutes(
                self.cooldowns.positioning_disabled_min as i64,
            ),
            extended_break_escalation: chrono::Duration::minutes(
                self.escalation.extended_break_min as i64,
            ),
            outside_distance_escalation_m: self.escalation.outside_geofence_distance_m,
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            company_id: self.site.company_id.clone(),
            missing_clock_out_after: chrono::Duration::minutes(
                self.sweeps.missing_clock_out_after_min as i64,
            ),
            extended_break_after: chrono::Duration::minutes(
                self.sweeps.extended_break_after_min as i64,
            ),
            sweep_worker_timeout: std::time::Duration::from_millis(self.sweeps.worker_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = MonitorConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: MonitorConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.limits.accuracy_ceiling_m, 50.0);
        assert_eq!(parsed.cooldowns.outside_geofence_min, 10);
    }

    #[test]
    fn empty_toml_fills_defaults() {
        let parsed: MonitorConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.site.radius_m, 150.0);
        assert_eq!(parsed.sweeps.worker_timeout_ms, 2000);
        assert!(parsed.site.supervisors.is_empty());
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.get("limits.fence_buffer_m").as_deref(), Some("10.0"));
        assert_eq!(
            cfg.get("cooldowns.extended_break_min").as_deref(),
            Some("65")
        );
        assert!(cfg.get("site.missing_key").is_none());
    }

    #[test]
    fn set_json_value_by_path_updates_nested_number() {
        let mut json = serde_json::to_value(MonitorConfig::default()).unwrap();
        MonitorConfig::set_json_value_by_path(&mut json, "cooldowns.outside_geofence_min", "15")
            .unwrap();
        assert_eq!(
            MonitorConfig::get_json_value_by_path(&json, "cooldowns.outside_geofence_min").unwrap(),
            &serde_json::Value::Number(15.into())
        );
    }

    #[test]
    fn set_json_value_by_path_updates_nested_string() {
        let mut json = serde_json::to_value(MonitorConfig::default()).unwrap();
        MonitorConfig::set_json_value_by_path(&mut json, "site.code", "site-qr-42").unwrap();
        assert_eq!(
            MonitorConfig::get_json_value_by_path(&json, "site.code").unwrap(),
            &serde_json::Value::String("site-qr-42".to_string())
        );
    }

    #[test]
    fn set_json_value_by_path_rejects_unknown_key() {
        let mut json = serde_json::to_value(MonitorConfig::default()).unwrap();
        let result = MonitorConfig::set_json_value_by_path(&mut json, "site.nonexistent", "x");
        assert!(result.is_err());
    }

    #[test]
    fn converters_carry_configured_values() {
        let mut cfg = MonitorConfig::default();
        cfg.site.code = "qr-7".into();
        cfg.cooldowns.outside_geofence_min = 20;
        cfg.escalation.outside_geofence_distance_m = 750.0;
        cfg.sweeps.worker_timeout_ms = 500;

        let limits = cfg.machine_limits();
        assert_eq!(limits.site_code, "qr-7");
        assert_eq!(limits.accuracy_ceiling_m, 50.0);

        let thresholds = cfg.alert_thresholds();
        assert_eq!(
            thresholds.outside_geofence_cooldown,
            chrono::Duration::minutes(20)
        );
        assert_eq!(thresholds.outside_distance_escalation_m, 750.0);

        let settings = cfg.monitor_settings();
        assert_eq!(settings.company_id, "default");
        assert_eq!(
            settings.sweep_worker_timeout,
            std::time::Duration::from_millis(500)
        );
    }

    #[test]
    fn geofence_builds_from_site() {
        let cfg = MonitorConfig::default();
        let fence = cfg.geofence().unwrap();
        assert_eq!(fence.radius_m, 150.0);
    }
}
