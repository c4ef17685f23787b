//! Automatic pump control: decides start/stop from a status snapshot and the
//! active settings.
//!
//! `decide` is a pure function of its inputs plus the wall-clock hour, so
//! every branch is testable with a fixed timestamp. It never touches the
//! snapshot; the orchestrator applies the resulting transition.
//!
//! ```text
//! Off ──[tinaco <= trigger, cisterna ok, daily budget left]──▶ On
//!  ▲        (unless deferred by energy-saving / peak-hour gates)
//!  │
//!  └──[cisterna empty | max runtime | tinaco >= stop]── On
//! ```

use time::OffsetDateTime;

use crate::model::{Decision, PumpAction, PumpState, Settings, StatusSnapshot, TankLevel};

/// Decide what the pump should do for one status report.
///
/// Start and stop are mutually exclusive: start is only evaluated while the
/// pump is off, stop only while it is on. `Maintenance` and `Error` states
/// are never transitioned out of here.
pub fn decide(status: &StatusSnapshot, settings: &Settings, now: OffsetDateTime) -> Decision {
    match status.pump_state {
        PumpState::Off => decide_start(status, settings, now),
        PumpState::On => decide_stop(status, settings),
        PumpState::Maintenance | PumpState::Error => Decision::no_action(),
    }
}

fn decide_start(status: &StatusSnapshot, settings: &Settings, now: OffsetDateTime) -> Decision {
    let wants_start = status.tinaco_percentage <= settings.fill_trigger_percentage
        && status.cisterna_level >= settings.min_cisterna_level_to_start
        && status.pump_runtime_today_minutes < settings.max_daily_runtime_minutes;

    if !wants_start {
        return Decision::no_action();
    }

    let hour = now.hour();
    if settings.energy_saving_enabled && !settings.preferred_hours.contains(&hour) {
        return Decision {
            action: PumpAction::None,
            reason: "deferred: energy saving window",
            gated: true,
        };
    }
    if settings.avoid_peak_hours && settings.peak_hours.contains(&hour) {
        return Decision {
            action: PumpAction::None,
            reason: "deferred: peak hours",
            gated: true,
        };
    }

    Decision {
        action: PumpAction::Start,
        reason: "auto start",
        gated: false,
    }
}

/// Any one condition stops the pump; the order only picks the reported
/// reason, the action is the same.
fn decide_stop(status: &StatusSnapshot, settings: &Settings) -> Decision {
    let reason = if status.cisterna_level == TankLevel::Empty {
        Some("cisterna empty")
    } else if status.pump_runtime_minutes >= settings.max_pump_runtime_minutes {
        Some("max runtime reached")
    } else if status.tinaco_percentage >= settings.fill_stop_percentage {
        Some("fill complete")
    } else {
        None
    };

    match reason {
        Some(reason) => Decision {
            action: PumpAction::Stop,
            reason,
            gated: false,
        },
        None => Decision::no_action(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
