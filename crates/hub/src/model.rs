//! Typed domain model for the water system: tank levels, pump state, status
//! snapshots, control settings, alerts, and usage log entries.
//!
//! Everything here is plain data. The decision logic lives in `control`,
//! `alerts`, and `orchestrator`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

// ---------------------------------------------------------------------------
// Validation error
// ---------------------------------------------------------------------------

/// A `StatusSnapshot` or `Settings` value violated one of its invariants.
/// Names the offending field so API callers can point at it.
#[derive(Debug, Clone, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Coarse fill level of a tank. Ordered: `Empty < Low < ... < Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TankLevel {
    Empty,
    Low,
    Medium,
    High,
    Full,
}

impl TankLevel {
    /// Map a 0..=100 percentage onto the category bands used by the level
    /// sensors (empty <10, low <30, medium <70, high <90, full otherwise).
    pub fn from_percentage(pct: f64) -> Self {
        if pct < 10.0 {
            Self::Empty
        } else if pct < 30.0 {
            Self::Low
        } else if pct < 70.0 {
            Self::Medium
        } else if pct < 90.0 {
            Self::High
        } else {
            Self::Full
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "empty" => Some(Self::Empty),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Operating state of the pump. Automatic control only ever produces
/// `Off`/`On`; `Maintenance` and `Error` are set externally and are never
/// overridden by the control engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpState {
    Off,
    On,
    Maintenance,
    Error,
}

impl PumpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Maintenance => "maintenance",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(Self::Off),
            "on" => Some(Self::On),
            "maintenance" => Some(Self::Maintenance),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for PumpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who last changed the pump state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMode {
    Manual,
    Automatic,
    Maintenance,
}

impl SystemMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "automatic" => Some(Self::Automatic),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

fn default_mode() -> SystemMode {
    SystemMode::Automatic
}

/// One sensor report: tank levels, pump state, flow and power metrics.
/// Immutable once received; each report becomes a new append-only record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub tinaco_level: TankLevel,
    pub tinaco_percentage: f64,
    pub cisterna_level: TankLevel,
    pub cisterna_percentage: f64,

    pub pump_state: PumpState,
    /// Minutes the pump has been running in the current session. Resets to
    /// zero on every off-to-on transition (tracked by the sensor unit).
    #[serde(default)]
    pub pump_runtime_minutes: i64,
    /// Total pump minutes today. Reset at local midnight by the sensor unit.
    #[serde(default)]
    pub pump_runtime_today_minutes: i64,

    #[serde(default)]
    pub water_flow_lpm: f64,
    #[serde(default)]
    pub power_watts: f64,
    #[serde(default)]
    pub daily_power_kwh: f64,

    #[serde(default)]
    pub water_temperature_c: Option<f64>,
    #[serde(default)]
    pub ambient_temperature_c: Option<f64>,

    #[serde(default = "default_mode")]
    pub mode: SystemMode,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

impl StatusSnapshot {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=100.0).contains(&self.tinaco_percentage) {
            return Err(ValidationError::new(
                "tinaco_percentage",
                format!("{} out of range [0, 100]", self.tinaco_percentage),
            ));
        }
        if !(0.0..=100.0).contains(&self.cisterna_percentage) {
            return Err(ValidationError::new(
                "cisterna_percentage",
                format!("{} out of range [0, 100]", self.cisterna_percentage),
            ));
        }
        if self.pump_runtime_minutes < 0 {
            return Err(ValidationError::new(
                "pump_runtime_minutes",
                "must not be negative",
            ));
        }
        if self.pump_runtime_today_minutes < self.pump_runtime_minutes {
            return Err(ValidationError::new(
                "pump_runtime_today_minutes",
                format!(
                    "{} is less than the current session runtime {}",
                    self.pump_runtime_today_minutes, self.pump_runtime_minutes
                ),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Control settings. A single version is active at a time and is replaced
/// wholesale on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub system_name: String,
    pub auto_mode_enabled: bool,

    /// Start the pump when the tinaco drops to this percentage or below.
    pub fill_trigger_percentage: f64,
    /// Stop the pump when the tinaco reaches this percentage or above.
    /// Must be greater than the trigger percentage.
    pub fill_stop_percentage: f64,
    /// Lowest cisterna level at which a start is allowed. Must not be
    /// `empty`; with the default `low` this means "anything but empty".
    pub min_cisterna_level_to_start: TankLevel,

    pub max_pump_runtime_minutes: i64,
    pub max_daily_runtime_minutes: i64,

    pub energy_saving_enabled: bool,
    pub preferred_hours: Vec<u8>,
    pub avoid_peak_hours: bool,
    pub peak_hours: Vec<u8>,

    /// Minimum expected flow while the pump runs, in L/min.
    pub flow_rate_threshold_lpm: f64,
    /// Daily energy use above this many kWh raises a warning.
    pub daily_power_alarm_kwh: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_name: "SmartWater System".to_string(),
            auto_mode_enabled: true,
            fill_trigger_percentage: 25.0,
            fill_stop_percentage: 90.0,
            min_cisterna_level_to_start: TankLevel::Low,
            max_pump_runtime_minutes: 60,
            max_daily_runtime_minutes: 240,
            energy_saving_enabled: false,
            preferred_hours: vec![22, 23, 0, 1, 2, 3, 4, 5],
            avoid_peak_hours: true,
            peak_hours: vec![18, 19, 20, 21],
            flow_rate_threshold_lpm: 10.0,
            daily_power_alarm_kwh: 5.0,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=100.0).contains(&self.fill_trigger_percentage) {
            return Err(ValidationError::new(
                "fill_trigger_percentage",
                format!("{} out of range [0, 100]", self.fill_trigger_percentage),
            ));
        }
        if !(0.0..=100.0).contains(&self.fill_stop_percentage) {
            return Err(ValidationError::new(
                "fill_stop_percentage",
                format!("{} out of range [0, 100]", self.fill_stop_percentage),
            ));
        }
        if self.fill_stop_percentage <= self.fill_trigger_percentage {
            return Err(ValidationError::new(
                "fill_stop_percentage",
                format!(
                    "{} must be greater than fill_trigger_percentage ({})",
                    self.fill_stop_percentage, self.fill_trigger_percentage
                ),
            ));
        }
        if self.min_cisterna_level_to_start == TankLevel::Empty {
            return Err(ValidationError::new(
                "min_cisterna_level_to_start",
                "must not be 'empty'",
            ));
        }
        if self.max_pump_runtime_minutes <= 0 {
            return Err(ValidationError::new(
                "max_pump_runtime_minutes",
                format!("must be positive, got {}", self.max_pump_runtime_minutes),
            ));
        }
        if self.max_daily_runtime_minutes <= 0 {
            return Err(ValidationError::new(
                "max_daily_runtime_minutes",
                format!("must be positive, got {}", self.max_daily_runtime_minutes),
            ));
        }
        if self.max_daily_runtime_minutes < self.max_pump_runtime_minutes {
            return Err(ValidationError::new(
                "max_daily_runtime_minutes",
                format!(
                    "{} is less than max_pump_runtime_minutes ({})",
                    self.max_daily_runtime_minutes, self.max_pump_runtime_minutes
                ),
            ));
        }
        if let Some(h) = self.preferred_hours.iter().find(|h| **h > 23) {
            return Err(ValidationError::new(
                "preferred_hours",
                format!("hour {h} out of range [0, 23]"),
            ));
        }
        if let Some(h) = self.peak_hours.iter().find(|h| **h > 23) {
            return Err(ValidationError::new(
                "peak_hours",
                format!("hour {h} out of range [0, 23]"),
            ));
        }
        if self.flow_rate_threshold_lpm < 0.0 {
            return Err(ValidationError::new(
                "flow_rate_threshold_lpm",
                "must not be negative",
            ));
        }
        if self.daily_power_alarm_kwh <= 0.0 {
            return Err(ValidationError::new(
                "daily_power_alarm_kwh",
                "must be positive",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// An operational alert. Created unresolved; transitions exactly once to
/// resolved (handled by the alert store, not by the rule engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
    pub alert_type: AlertType,
    /// Component tag: "bomba", "tinaco", "cisterna", "energia", "sistema".
    pub component: String,
    /// Severity 1 (lowest) to 5 (highest).
    pub severity: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub resolved: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
    pub resolved_by: Option<String>,
    pub auto_generated: bool,
}

impl Alert {
    /// An auto-generated, unresolved alert stamped with the snapshot time.
    pub fn auto(
        message: impl Into<String>,
        alert_type: AlertType,
        component: &str,
        severity: u8,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            message: message.into(),
            alert_type,
            component: component.to_string(),
            severity,
            created_at,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            auto_generated: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpAction {
    Start,
    Stop,
    None,
}

/// Output of the control engine: what the pump should do and why. A gated
/// decision leaves the pump unchanged but lets the caller log a deferral.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub action: PumpAction,
    pub reason: &'static str,
    pub gated: bool,
}

impl Decision {
    pub fn no_action() -> Self {
        Self {
            action: PumpAction::None,
            reason: "no action",
            gated: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Usage log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    AutoStart,
    AutoStop,
    Deferred,
    NoAction,
    ManualStart,
    ManualStop,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoStart => "auto_start",
            Self::AutoStop => "auto_stop",
            Self::Deferred => "deferred",
            Self::NoAction => "no_action",
            Self::ManualStart => "manual_start",
            Self::ManualStop => "manual_stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto_start" => Some(Self::AutoStart),
            "auto_stop" => Some(Self::AutoStop),
            "deferred" => Some(Self::Deferred),
            "no_action" => Some(Self::NoAction),
            "manual_start" => Some(Self::ManualStart),
            "manual_stop" => Some(Self::ManualStop),
            _ => None,
        }
    }
}

/// One activity log record, derived from a processed status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub action: LogAction,

    pub tinaco_level_before: TankLevel,
    pub tinaco_level_after: TankLevel,
    pub tinaco_percentage_before: f64,
    pub tinaco_percentage_after: f64,

    /// Pump session length in minutes, known when a stop closes a run.
    pub duration_minutes: Option<i64>,
    /// Liters moved during the session, estimated as flow rate times
    /// duration when both are known.
    pub water_amount_liters: Option<f64>,
    /// kWh for the session: instantaneous watts times minutes / 60000.
    pub power_consumed_kwh: Option<f64>,

    pub triggered_by: String,
    pub operation_mode: SystemMode,
    pub note: Option<String>,
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    pub(crate) fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            tinaco_level: TankLevel::Medium,
            tinaco_percentage: 50.0,
            cisterna_level: TankLevel::High,
            cisterna_percentage: 75.0,
            pump_state: PumpState::Off,
            pump_runtime_minutes: 0,
            pump_runtime_today_minutes: 30,
            water_flow_lpm: 0.0,
            power_watts: 0.0,
            daily_power_kwh: 1.2,
            water_temperature_c: None,
            ambient_temperature_c: None,
            mode: SystemMode::Automatic,
            recorded_at: datetime!(2025-06-01 12:00 UTC),
        }
    }

    // -- TankLevel ---------------------------------------------------------

    #[test]
    fn tank_level_ordering() {
        assert!(TankLevel::Empty < TankLevel::Low);
        assert!(TankLevel::Low < TankLevel::Medium);
        assert!(TankLevel::Medium < TankLevel::High);
        assert!(TankLevel::High < TankLevel::Full);
    }

    #[test]
    fn tank_level_from_percentage_bands() {
        assert_eq!(TankLevel::from_percentage(0.0), TankLevel::Empty);
        assert_eq!(TankLevel::from_percentage(9.9), TankLevel::Empty);
        assert_eq!(TankLevel::from_percentage(10.0), TankLevel::Low);
        assert_eq!(TankLevel::from_percentage(29.9), TankLevel::Low);
        assert_eq!(TankLevel::from_percentage(30.0), TankLevel::Medium);
        assert_eq!(TankLevel::from_percentage(69.9), TankLevel::Medium);
        assert_eq!(TankLevel::from_percentage(70.0), TankLevel::High);
        assert_eq!(TankLevel::from_percentage(89.9), TankLevel::High);
        assert_eq!(TankLevel::from_percentage(90.0), TankLevel::Full);
        assert_eq!(TankLevel::from_percentage(100.0), TankLevel::Full);
    }

    #[test]
    fn enum_str_round_trips() {
        for level in [
            TankLevel::Empty,
            TankLevel::Low,
            TankLevel::Medium,
            TankLevel::High,
            TankLevel::Full,
        ] {
            assert_eq!(TankLevel::parse(level.as_str()), Some(level));
        }
        for state in [
            PumpState::Off,
            PumpState::On,
            PumpState::Maintenance,
            PumpState::Error,
        ] {
            assert_eq!(PumpState::parse(state.as_str()), Some(state));
        }
        for mode in [
            SystemMode::Manual,
            SystemMode::Automatic,
            SystemMode::Maintenance,
        ] {
            assert_eq!(SystemMode::parse(mode.as_str()), Some(mode));
        }
        for action in [
            LogAction::AutoStart,
            LogAction::AutoStop,
            LogAction::Deferred,
            LogAction::NoAction,
            LogAction::ManualStart,
            LogAction::ManualStop,
        ] {
            assert_eq!(LogAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(TankLevel::parse("bogus"), None);
    }

    // -- StatusSnapshot validation -----------------------------------------

    #[test]
    fn valid_snapshot_passes() {
        snapshot().validate().unwrap();
    }

    #[test]
    fn tinaco_percentage_out_of_range_rejected() {
        let mut s = snapshot();
        s.tinaco_percentage = 101.0;
        let err = s.validate().unwrap_err();
        assert_eq!(err.field, "tinaco_percentage");
    }

    #[test]
    fn cisterna_percentage_negative_rejected() {
        let mut s = snapshot();
        s.cisterna_percentage = -0.5;
        let err = s.validate().unwrap_err();
        assert_eq!(err.field, "cisterna_percentage");
    }

    #[test]
    fn runtime_today_below_session_runtime_rejected() {
        let mut s = snapshot();
        s.pump_runtime_minutes = 45;
        s.pump_runtime_today_minutes = 30;
        let err = s.validate().unwrap_err();
        assert_eq!(err.field, "pump_runtime_today_minutes");
    }

    #[test]
    fn negative_session_runtime_rejected() {
        let mut s = snapshot();
        s.pump_runtime_minutes = -1;
        let err = s.validate().unwrap_err();
        assert_eq!(err.field, "pump_runtime_minutes");
    }

    #[test]
    fn snapshot_json_defaults_fill_optional_fields() {
        // Minimal payload a sensor unit might send.
        let json = r#"{
            "tinaco_level": "low",
            "tinaco_percentage": 22.0,
            "cisterna_level": "high",
            "cisterna_percentage": 80.0,
            "pump_state": "off",
            "recorded_at": "2025-06-01T12:00:00Z"
        }"#;
        let s: StatusSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(s.tinaco_level, TankLevel::Low);
        assert_eq!(s.pump_runtime_minutes, 0);
        assert_eq!(s.mode, SystemMode::Automatic);
        assert!(s.water_temperature_c.is_none());
        s.validate().unwrap();
    }

    // -- Settings validation -----------------------------------------------

    #[test]
    fn default_settings_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn stop_must_exceed_trigger() {
        let mut s = Settings::default();
        s.fill_trigger_percentage = 50.0;
        s.fill_stop_percentage = 50.0;
        let err = s.validate().unwrap_err();
        assert_eq!(err.field, "fill_stop_percentage");
    }

    #[test]
    fn min_cisterna_empty_rejected() {
        let mut s = Settings::default();
        s.min_cisterna_level_to_start = TankLevel::Empty;
        let err = s.validate().unwrap_err();
        assert_eq!(err.field, "min_cisterna_level_to_start");
    }

    #[test]
    fn hour_above_23_rejected() {
        let mut s = Settings::default();
        s.peak_hours = vec![18, 24];
        let err = s.validate().unwrap_err();
        assert_eq!(err.field, "peak_hours");
    }

    #[test]
    fn daily_runtime_below_continuous_rejected() {
        let mut s = Settings::default();
        s.max_pump_runtime_minutes = 120;
        s.max_daily_runtime_minutes = 60;
        let err = s.validate().unwrap_err();
        assert_eq!(err.field, "max_daily_runtime_minutes");
    }

    #[test]
    fn settings_deserialize_fills_missing_fields_with_defaults() {
        let s: Settings = serde_json::from_str(r#"{"fill_trigger_percentage": 30.0}"#).unwrap();
        assert_eq!(s.fill_trigger_percentage, 30.0);
        assert_eq!(s.fill_stop_percentage, 90.0);
        assert!(s.auto_mode_enabled);
    }

    #[test]
    fn validation_error_names_field_in_message() {
        let mut s = Settings::default();
        s.fill_stop_percentage = 10.0;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("fill_stop_percentage"));
    }
}
