//! Alert rule engine: evaluates a fixed, ordered set of independent rules
//! against one status snapshot and returns the alerts that fire.
//!
//! The engine is stateless and re-evaluates every rule on every snapshot.
//! Repeated reports with the same condition re-emit the same alert; it is
//! the alert store's job to decide what to do with duplicates.
//
// TODO: repeated snapshots in a bad state re-emit identical alerts every
// report; add an optional cooldown keyed on (component, alert_type) once the
// store exposes the last-emitted timestamp.

use crate::model::{Alert, AlertType, PumpState, Settings, StatusSnapshot, TankLevel};

/// Evaluate all rules. Output order follows rule order; each rule is
/// independent, so several can fire from one snapshot.
pub fn evaluate(status: &StatusSnapshot, settings: &Settings) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let at = status.recorded_at;

    // 1. Empty cisterna starves the pump; everything else is secondary.
    if status.cisterna_level == TankLevel::Empty {
        alerts.push(Alert::auto(
            "Cisterna vacía - revisar el suministro de agua",
            AlertType::Critical,
            "cisterna",
            5,
            at,
        ));
    }

    // 2. Session runtime past the limit points at a leak or an obstruction.
    if status.pump_runtime_minutes > settings.max_pump_runtime_minutes {
        alerts.push(Alert::auto(
            format!(
                "Bomba funcionando {} minutos - posible fuga u obstrucción",
                status.pump_runtime_minutes
            ),
            AlertType::Error,
            "bomba",
            4,
            at,
        ));
    }

    // 3. Tinaco low while a fill would be possible but is not running.
    if status.tinaco_level == TankLevel::Low
        && status.cisterna_level != TankLevel::Empty
        && status.pump_state == PumpState::Off
    {
        alerts.push(Alert::auto(
            "Nivel de tinaco bajo - llenado requerido",
            AlertType::Warning,
            "tinaco",
            3,
            at,
        ));
    }

    // 4. Daily energy budget exceeded.
    if status.daily_power_kwh > settings.daily_power_alarm_kwh {
        alerts.push(Alert::auto(
            format!(
                "Consumo energético alto: {:.2} kWh hoy",
                status.daily_power_kwh
            ),
            AlertType::Warning,
            "energia",
            3,
            at,
        ));
    }

    // 5. Pump running with low flow: blockage or dry run.
    if status.pump_state == PumpState::On
        && status.water_flow_lpm < settings.flow_rate_threshold_lpm
    {
        alerts.push(Alert::auto(
            format!("Flujo de agua bajo: {:.1} L/min", status.water_flow_lpm),
            AlertType::Warning,
            "bomba",
            3,
            at,
        ));
    }

    alerts
}

// ===========================================================================
// Tests
// ===========================================================================
