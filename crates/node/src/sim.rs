//! Stateful tank-system simulator for local development.
//!
//! Models the physical plant the hub controls:
//! - Household draw drains the tinaco continuously (with noise)
//! - The municipal supply refills the cisterna at a scenario-dependent rate
//! - When the pump runs it transfers water from cisterna to tinaco and
//!   produces flow/power readings; an empty cisterna makes the flow collapse
//!   (dry run), which the hub's alert rules should catch
//! - Session and daily runtime counters behave like the real firmware:
//!   the session counter resets on every off-to-on transition, the daily
//!   counters reset when the caller signals a new local day

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Multiplicative jitter in [1-spread, 1+spread].
fn jitter(spread: f64) -> f64 {
    1.0 + spread * (fastrand::f64() * 2.0 - 1.0)
}

/// Category label for a fill percentage, matching the hub's level bands.
pub fn level_label(pct: f64) -> &'static str {
    if pct < 10.0 {
        "empty"
    } else if pct < 30.0 {
        "low"
    } else if pct < 70.0 {
        "medium"
    } else if pct < 90.0 {
        "high"
    } else {
        "full"
    }
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Typical household: steady draw, healthy municipal supply.
    Normal,
    /// Municipal supply almost gone; the cisterna will eventually run dry
    /// and exercise the critical-alert path.
    Drought,
    /// Heavy consumption; the pump has to run often.
    HeavyUse,
    /// Low consumption, tanks mostly full; the hub should do nothing.
    Quiet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "drought" => Self::Drought,
            "heavy-use" | "heavy_use" => Self::HeavyUse,
            "quiet" => Self::Quiet,
            _ => Self::Normal, // default
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Drought => write!(f, "drought"),
            Self::HeavyUse => write!(f, "heavy-use"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

/// Rooftop tank (tinaco) + ground reservoir (cisterna) + transfer pump.
pub struct TankSim {
    tinaco_pct: f64,
    cisterna_pct: f64,
    pump_on: bool,

    pump_runtime_min: f64,
    runtime_today_min: f64,
    daily_power_kwh: f64,

    // Current instantaneous readings, refreshed by `step`.
    flow_lpm: f64,
    power_watts: f64,

    // Scenario parameters
    household_draw_lpm: f64,
    municipal_inflow_lpm: f64,
    noise: f64,

    // Plant constants
    tinaco_capacity_l: f64,
    cisterna_capacity_l: f64,
    pump_flow_lpm: f64,
    pump_power_w: f64,
}

/// Standby draw of the controller electronics in watts.
const STANDBY_WATTS: f64 = 1.5;

impl TankSim {
    pub fn new(scenario: Scenario) -> Self {
        let (draw, inflow, noise, tinaco_start, cisterna_start) = match scenario {
            Scenario::Normal => (6.0, 8.0, 0.10, 60.0, 70.0),
            Scenario::Drought => (6.0, 0.4, 0.10, 50.0, 25.0),
            Scenario::HeavyUse => (16.0, 8.0, 0.15, 55.0, 65.0),
            Scenario::Quiet => (2.0, 8.0, 0.05, 85.0, 80.0),
        };

        Self {
            tinaco_pct: tinaco_start,
            cisterna_pct: cisterna_start,
            pump_on: false,
            pump_runtime_min: 0.0,
            runtime_today_min: 0.0,
            daily_power_kwh: 0.0,
            flow_lpm: 0.0,
            power_watts: STANDBY_WATTS,
            household_draw_lpm: draw,
            municipal_inflow_lpm: inflow,
            noise,
            tinaco_capacity_l: 1100.0,
            cisterna_capacity_l: 5000.0,
            pump_flow_lpm: 35.0,
            pump_power_w: 750.0,
        }
    }

    /// Apply a pump command. The session runtime counter resets on every
    /// off-to-on transition, like the real relay firmware.
    pub fn set_pump(&mut self, on: bool) {
        if on && !self.pump_on {
            self.pump_runtime_min = 0.0;
        }
        self.pump_on = on;
    }

    /// Advance the plant by `dt_min` minutes and refresh the instantaneous
    /// flow/power readings.
    pub fn step(&mut self, dt_min: f64) {
        // Household draw from the tinaco.
        let draw_l = self.household_draw_lpm * jitter(self.noise) * dt_min;
        self.tinaco_pct -= 100.0 * draw_l / self.tinaco_capacity_l;

        // Municipal refill of the cisterna.
        let inflow_l = self.municipal_inflow_lpm * jitter(self.noise) * dt_min;
        self.cisterna_pct += 100.0 * inflow_l / self.cisterna_capacity_l;

        if self.pump_on {
            let available_l = self.cisterna_pct / 100.0 * self.cisterna_capacity_l;
            let wanted_l = self.pump_flow_lpm * jitter(self.noise) * dt_min;
            let moved_l = wanted_l.min(available_l.max(0.0));

            self.tinaco_pct += 100.0 * moved_l / self.tinaco_capacity_l;
            self.cisterna_pct -= 100.0 * moved_l / self.cisterna_capacity_l;

            // Near-empty cisterna: the pump sucks air and flow collapses.
            self.flow_lpm = if dt_min > 0.0 {
                (moved_l / dt_min).max(0.5 * jitter(self.noise))
            } else {
                0.0
            };
            self.power_watts = self.pump_power_w * jitter(self.noise * 0.5);

            self.pump_runtime_min += dt_min;
            self.runtime_today_min += dt_min;
            self.daily_power_kwh += self.power_watts * dt_min / 60_000.0;
        } else {
            self.flow_lpm = 0.0;
            self.power_watts = STANDBY_WATTS * jitter(self.noise);
        }

        self.tinaco_pct = self.tinaco_pct.clamp(0.0, 100.0);
        self.cisterna_pct = self.cisterna_pct.clamp(0.0, 100.0);
    }

    /// Reset the per-day counters. Called by the sampling loop at local
    /// midnight.
    pub fn reset_daily(&mut self) {
        self.runtime_today_min = 0.0;
        self.daily_power_kwh = 0.0;
    }

    pub fn tinaco_percentage(&self) -> f64 {
        self.tinaco_pct
    }

    pub fn cisterna_percentage(&self) -> f64 {
        self.cisterna_pct
    }

    pub fn pump_on(&self) -> bool {
        self.pump_on
    }

    pub fn pump_runtime_minutes(&self) -> i64 {
        self.pump_runtime_min as i64
    }

    pub fn runtime_today_minutes(&self) -> i64 {
        self.runtime_today_min as i64
    }

    pub fn flow_lpm(&self) -> f64 {
        self.flow_lpm
    }

    pub fn power_watts(&self) -> f64 {
        self.power_watts
    }

    pub fn daily_power_kwh(&self) -> f64 {
        self.daily_power_kwh
    }
}

// ===========================================================================
// Tests
// ===========================================================================
