//! Composes the control engine and the alert rule engine for one incoming
//! status report, and derives the activity log entry.
//!
//! Pure layer: validation, decision, alert evaluation, and log derivation
//! all happen here on owned values. Persisting the resulting triple is the
//! caller's job (see `processor`).

use thiserror::Error;
use time::OffsetDateTime;

use crate::alerts;
use crate::control;
use crate::model::{
    Alert, AlertType, Decision, LogAction, LogEntry, PumpAction, PumpState, Settings,
    StatusSnapshot, SystemMode, ValidationError,
};

/// Everything produced by processing one report: the working-copy snapshot
/// (pump state and mode already updated when a transition fired), the
/// decision, the alerts, and the derived log entry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Outcome {
    pub status: StatusSnapshot,
    pub decision: Decision,
    pub alerts: Vec<Alert>,
    pub log: LogEntry,
}

#[derive(Debug, Error)]
pub enum ManualControlError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// The requested state equals the current pump state; nothing was
    /// mutated and no log entry is produced.
    #[error("pump is already {0}")]
    AlreadyInState(PumpState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualAction {
    Start,
    Stop,
}

/// Process one status report through automatic control and the alert rules.
///
/// The control engine runs only when `auto_mode_enabled`; its pump/mode
/// change is applied to a working copy (no other field is touched) and the
/// alert rules read that working copy, so a fresh start suppresses the
/// "tinaco low" warning for the same report.
pub fn process(
    status: &StatusSnapshot,
    settings: &Settings,
    now: OffsetDateTime,
) -> Result<Outcome, ValidationError> {
    status.validate()?;
    settings.validate()?;

    let decision = if settings.auto_mode_enabled {
        control::decide(status, settings, now)
    } else {
        Decision::no_action()
    };

    let mut working = status.clone();
    match decision.action {
        PumpAction::Start => {
            working.pump_state = PumpState::On;
            working.mode = SystemMode::Automatic;
        }
        PumpAction::Stop => {
            working.pump_state = PumpState::Off;
            working.mode = SystemMode::Automatic;
        }
        PumpAction::None => {}
    }

    let mut out_alerts = Vec::new();
    if let Some(alert) = decision_alert(&decision, &working) {
        out_alerts.push(alert);
    }
    out_alerts.extend(alerts::evaluate(&working, settings));

    let action = match decision.action {
        PumpAction::Start => LogAction::AutoStart,
        PumpAction::Stop => LogAction::AutoStop,
        PumpAction::None if decision.gated => LogAction::Deferred,
        PumpAction::None => LogAction::NoAction,
    };
    let log = derive_log(status, &working, action, &decision, "system");

    Ok(Outcome {
        status: working,
        decision,
        alerts: out_alerts,
        log,
    })
}

/// Manual pump control. Bypasses the automatic decision but still validates
/// the inputs, runs the alert rules on the updated snapshot, and yields a
/// `manual_start`/`manual_stop` log entry attributed to `user`.
pub fn manual_pump_control(
    status: &StatusSnapshot,
    settings: &Settings,
    action: ManualAction,
    user: &str,
) -> Result<Outcome, ManualControlError> {
    status.validate()?;
    settings.validate()?;

    let (target, log_action, pump_action, reason, message) = match action {
        ManualAction::Start => (
            PumpState::On,
            LogAction::ManualStart,
            PumpAction::Start,
            "manual start",
            "Bomba encendida manualmente",
        ),
        ManualAction::Stop => (
            PumpState::Off,
            LogAction::ManualStop,
            PumpAction::Stop,
            "manual stop",
            "Bomba apagada manualmente",
        ),
    };

    if status.pump_state == target {
        return Err(ManualControlError::AlreadyInState(target));
    }

    let mut working = status.clone();
    working.pump_state = target;
    working.mode = SystemMode::Manual;

    let decision = Decision {
        action: pump_action,
        reason,
        gated: false,
    };

    let mut out_alerts = vec![Alert::auto(
        message,
        AlertType::Info,
        "bomba",
        3,
        working.recorded_at,
    )];
    out_alerts.extend(alerts::evaluate(&working, settings));

    let log = derive_log(status, &working, log_action, &decision, user);

    Ok(Outcome {
        status: working,
        decision,
        alerts: out_alerts,
        log,
    })
}

/// Informational alert describing what the control engine did, mirroring
/// the end-user notifications the rest of the system speaks.
fn decision_alert(decision: &Decision, working: &StatusSnapshot) -> Option<Alert> {
    let at = working.recorded_at;
    match decision.action {
        PumpAction::Start => Some(Alert::auto(
            "Bomba encendida automáticamente",
            AlertType::Info,
            "bomba",
            3,
            at,
        )),
        PumpAction::Stop => {
            let motivo = match decision.reason {
                "cisterna empty" => "cisterna vacía",
                "max runtime reached" => "tiempo máximo alcanzado",
                _ => "llenado completado",
            };
            Some(Alert::auto(
                format!("Bomba apagada automáticamente: {motivo}"),
                AlertType::Info,
                "bomba",
                3,
                at,
            ))
        }
        PumpAction::None if decision.gated => {
            let message = if decision.reason == "deferred: peak hours" {
                "Llenado pospuesto por horas pico"
            } else {
                "Llenado pospuesto por modo de ahorro energético"
            };
            Some(Alert::auto(message, AlertType::Info, "sistema", 3, at))
        }
        PumpAction::None => None,
    }
}

fn derive_log(
    before: &StatusSnapshot,
    after: &StatusSnapshot,
    action: LogAction,
    decision: &Decision,
    triggered_by: &str,
) -> LogEntry {
    // A stop closes a pump session, so its length is known; session metrics
    // derive from the snapshot the sensors reported (`before`).
    let duration = matches!(decision.action, PumpAction::Stop)
        .then_some(before.pump_runtime_minutes);
    let water = duration.map(|min| before.water_flow_lpm * min as f64);
    let power = duration.map(|min| before.power_watts * min as f64 / 60_000.0);

    LogEntry {
        recorded_at: before.recorded_at,
        action,
        tinaco_level_before: before.tinaco_level,
        tinaco_level_after: after.tinaco_level,
        tinaco_percentage_before: before.tinaco_percentage,
        tinaco_percentage_after: after.tinaco_percentage,
        duration_minutes: duration,
        water_amount_liters: water,
        power_consumed_kwh: power,
        triggered_by: triggered_by.to_string(),
        operation_mode: after.mode,
        note: (action != LogAction::NoAction).then(|| decision.reason.to_string()),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TankLevel;
    use time::macros::datetime;

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            tinaco_level: TankLevel::Low,
            tinaco_percentage: 22.0,
            cisterna_level: TankLevel::High,
            cisterna_percentage: 75.0,
            pump_state: PumpState::Off,
            pump_runtime_minutes: 0,
            pump_runtime_today_minutes: 30,
            water_flow_lpm: 0.0,
            power_watts: 0.0,
            daily_power_kwh: 1.0,
            water_temperature_c: None,
            ambient_temperature_c: None,
            mode: SystemMode::Automatic,
            recorded_at: datetime!(2025-06-01 12:00 UTC),
        }
    }

    fn noon() -> OffsetDateTime {
        datetime!(2025-06-01 12:00 UTC)
    }

    // -- Automatic path -----------------------------------------------------

    #[test]
    fn auto_start_updates_working_copy_only_pump_and_mode() {
        let input = snapshot();
        let out = process(&input, &Settings::default(), noon()).unwrap();

        assert_eq!(out.decision.action, PumpAction::Start);
        assert_eq!(out.status.pump_state, PumpState::On);
        assert_eq!(out.status.mode, SystemMode::Automatic);
        // Nothing else moves.
        assert_eq!(out.status.tinaco_percentage, input.tinaco_percentage);
        assert_eq!(out.status.pump_runtime_minutes, input.pump_runtime_minutes);
        assert_eq!(out.status.recorded_at, input.recorded_at);
    }

    #[test]
    fn start_suppresses_low_tinaco_warning_on_same_report() {
        // tinaco low + cisterna high + pump off triggers a start; the alert
        // rules then see the pump already on, so no "tinaco bajo" warning.
        let out = process(&snapshot(), &Settings::default(), noon()).unwrap();
        assert_eq!(out.decision.reason, "auto start");
        assert!(out.alerts.iter().all(|a| a.component != "tinaco"));
        // The info alert about the start is still there.
        assert_eq!(out.alerts[0].alert_type, AlertType::Info);
        assert!(out.alerts[0].message.contains("encendida"));
    }

    #[test]
    fn auto_disabled_skips_control_but_still_alerts() {
        let mut settings = Settings::default();
        settings.auto_mode_enabled = false;
        let out = process(&snapshot(), &settings, noon()).unwrap();

        assert_eq!(out.decision.action, PumpAction::None);
        assert_eq!(out.status.pump_state, PumpState::Off);
        assert_eq!(out.log.action, LogAction::NoAction);
        // Pump stayed off, so the tinaco-low warning fires.
        assert!(out.alerts.iter().any(|a| a.component == "tinaco"));
    }

    #[test]
    fn cisterna_empty_stop_emits_critical_alert_and_info() {
        let mut s = snapshot();
        s.pump_state = PumpState::On;
        s.pump_runtime_minutes = 10;
        s.pump_runtime_today_minutes = 40;
        s.water_flow_lpm = 30.0;
        s.power_watts = 750.0;
        s.cisterna_level = TankLevel::Empty;
        s.cisterna_percentage = 3.0;

        let out = process(&s, &Settings::default(), noon()).unwrap();
        assert_eq!(out.decision.action, PumpAction::Stop);
        assert_eq!(out.decision.reason, "cisterna empty");
        assert_eq!(out.log.action, LogAction::AutoStop);

        // Info alert first, then the critical rule alert.
        assert_eq!(out.alerts[0].alert_type, AlertType::Info);
        assert!(out.alerts[0].message.contains("cisterna vacía"));
        let critical = out
            .alerts
            .iter()
            .find(|a| a.alert_type == AlertType::Critical)
            .expect("critical alert");
        assert_eq!(critical.severity, 5);
        assert_eq!(critical.component, "cisterna");
    }

    #[test]
    fn max_runtime_stop_also_raises_leak_alert() {
        // One underlying condition, two independent subsystems: the control
        // engine stops the pump, the rule engine flags a possible leak.
        let mut s = snapshot();
        s.pump_state = PumpState::On;
        s.pump_runtime_minutes = 65;
        s.pump_runtime_today_minutes = 65;
        s.water_flow_lpm = 30.0;
        s.power_watts = 750.0;
        s.tinaco_percentage = 50.0;
        s.tinaco_level = TankLevel::Medium;

        let out = process(&s, &Settings::default(), noon()).unwrap();
        assert_eq!(out.decision.reason, "max runtime reached");
        let leak = out
            .alerts
            .iter()
            .find(|a| a.alert_type == AlertType::Error)
            .expect("leak alert");
        assert_eq!(leak.severity, 4);
        assert_eq!(leak.component, "bomba");
    }

    #[test]
    fn deferred_start_logs_deferral_without_state_change() {
        let mut settings = Settings::default();
        settings.energy_saving_enabled = true;
        let out = process(&snapshot(), &settings, noon()).unwrap();

        assert_eq!(out.decision.action, PumpAction::None);
        assert!(out.decision.gated);
        assert_eq!(out.status.pump_state, PumpState::Off);
        assert_eq!(out.log.action, LogAction::Deferred);
        assert!(out.alerts.iter().any(|a| a.component == "sistema"));
    }

    #[test]
    fn stop_log_carries_session_metrics() {
        let mut s = snapshot();
        s.pump_state = PumpState::On;
        s.pump_runtime_minutes = 30;
        s.pump_runtime_today_minutes = 60;
        s.water_flow_lpm = 28.0;
        s.power_watts = 750.0;
        s.tinaco_percentage = 92.0;
        s.tinaco_level = TankLevel::Full;

        let out = process(&s, &Settings::default(), noon()).unwrap();
        assert_eq!(out.log.action, LogAction::AutoStop);
        assert_eq!(out.log.duration_minutes, Some(30));
        assert_eq!(out.log.water_amount_liters, Some(28.0 * 30.0));
        // 750 W for 30 min = 0.375 kWh
        let kwh = out.log.power_consumed_kwh.unwrap();
        assert!((kwh - 0.375).abs() < 1e-9, "got {kwh}");
        assert_eq!(out.log.note.as_deref(), Some("fill complete"));
    }

    #[test]
    fn no_action_log_has_no_metrics_or_note() {
        let mut s = snapshot();
        s.tinaco_percentage = 60.0;
        s.tinaco_level = TankLevel::Medium;
        let out = process(&s, &Settings::default(), noon()).unwrap();
        assert_eq!(out.log.action, LogAction::NoAction);
        assert!(out.log.duration_minutes.is_none());
        assert!(out.log.power_consumed_kwh.is_none());
        assert!(out.log.note.is_none());
        assert_eq!(out.log.tinaco_percentage_before, 60.0);
        assert_eq!(out.log.tinaco_percentage_after, 60.0);
    }

    #[test]
    fn invalid_snapshot_is_rejected_before_engines_run() {
        let mut s = snapshot();
        s.tinaco_percentage = 140.0;
        let err = process(&s, &Settings::default(), noon()).unwrap_err();
        assert_eq!(err.field, "tinaco_percentage");
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut settings = Settings::default();
        settings.fill_stop_percentage = 20.0; // below trigger
        let err = process(&snapshot(), &settings, noon()).unwrap_err();
        assert_eq!(err.field, "fill_stop_percentage");
    }

    // -- Manual path --------------------------------------------------------

    #[test]
    fn manual_start_sets_manual_mode_and_logs_user() {
        let out =
            manual_pump_control(&snapshot(), &Settings::default(), ManualAction::Start, "ana")
                .unwrap();
        assert_eq!(out.status.pump_state, PumpState::On);
        assert_eq!(out.status.mode, SystemMode::Manual);
        assert_eq!(out.log.action, LogAction::ManualStart);
        assert_eq!(out.log.triggered_by, "ana");
        assert_eq!(out.log.operation_mode, SystemMode::Manual);
        assert!(out.alerts[0].message.contains("manualmente"));
    }

    #[test]
    fn manual_start_when_already_on_is_rejected_without_log() {
        let mut s = snapshot();
        s.pump_state = PumpState::On;
        s.pump_runtime_minutes = 5;
        s.pump_runtime_today_minutes = 35;
        let err =
            manual_pump_control(&s, &Settings::default(), ManualAction::Start, "ana").unwrap_err();
        assert!(matches!(
            err,
            ManualControlError::AlreadyInState(PumpState::On)
        ));
    }

    #[test]
    fn manual_stop_when_already_off_is_rejected() {
        let err = manual_pump_control(&snapshot(), &Settings::default(), ManualAction::Stop, "ana")
            .unwrap_err();
        assert!(matches!(
            err,
            ManualControlError::AlreadyInState(PumpState::Off)
        ));
    }

    #[test]
    fn manual_stop_closes_the_session() {
        let mut s = snapshot();
        s.pump_state = PumpState::On;
        s.pump_runtime_minutes = 12;
        s.pump_runtime_today_minutes = 42;
        s.water_flow_lpm = 25.0;
        s.power_watts = 600.0;

        let out =
            manual_pump_control(&s, &Settings::default(), ManualAction::Stop, "ana").unwrap();
        assert_eq!(out.log.action, LogAction::ManualStop);
        assert_eq!(out.log.duration_minutes, Some(12));
        assert_eq!(out.log.water_amount_liters, Some(25.0 * 12.0));
    }

    #[test]
    fn manual_path_still_evaluates_alert_rules() {
        // Starting manually while the cisterna is empty is allowed (the
        // operator may know better) but the critical alert still fires.
        let mut s = snapshot();
        s.cisterna_level = TankLevel::Empty;
        s.cisterna_percentage = 3.0;
        let out =
            manual_pump_control(&s, &Settings::default(), ManualAction::Start, "ana").unwrap();
        assert!(out
            .alerts
            .iter()
            .any(|a| a.alert_type == AlertType::Critical));
    }
}
