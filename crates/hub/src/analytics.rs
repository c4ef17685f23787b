//! Usage analytics: a fold over historical log entries producing fill
//! counts, water volume, runtime, and energy totals for a time window.

use serde::Serialize;

use crate::model::{LogAction, LogEntry};

#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub period_days: i64,
    pub total_fills: usize,
    pub total_water_liters: f64,
    pub total_duration_minutes: i64,
    pub total_power_kwh: f64,
    pub average_duration_minutes: f64,
    pub fills_per_day: f64,
    pub water_per_day: f64,
    pub power_per_day: f64,
}

/// Fold `logs` (any order) into a usage summary for a `period_days` window.
///
/// A "fill" is any entry that closed a pump session, i.e. an auto or manual
/// stop. Water and power totals only count entries that carry the metric.
pub fn summarize(logs: &[LogEntry], period_days: i64) -> UsageSummary {
    let fills: Vec<&LogEntry> = logs
        .iter()
        .filter(|e| matches!(e.action, LogAction::AutoStop | LogAction::ManualStop))
        .collect();

    let total_fills = fills.len();
    let total_duration_minutes: i64 = fills.iter().filter_map(|e| e.duration_minutes).sum();
    let total_water_liters: f64 = fills.iter().filter_map(|e| e.water_amount_liters).sum();
    let total_power_kwh: f64 = fills.iter().filter_map(|e| e.power_consumed_kwh).sum();

    let days = period_days.max(1) as f64;
    let average_duration_minutes = total_duration_minutes as f64 / total_fills.max(1) as f64;

    UsageSummary {
        period_days,
        total_fills,
        total_water_liters,
        total_duration_minutes,
        total_power_kwh,
        average_duration_minutes,
        fills_per_day: total_fills as f64 / days,
        water_per_day: total_water_liters / days,
        power_per_day: total_power_kwh / days,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
