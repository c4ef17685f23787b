use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::model::StatusSnapshot;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Ephemeral runtime state for the dashboard: last snapshot, connectivity,
/// and a bounded event feed. Durable history lives in sqlite.
pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub last_status: Option<StatusSnapshot>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Status,
    Control,
    Alert,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct Overview {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub status: Option<StatusSnapshot>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            last_status: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record an incoming (already processed) status snapshot.
    pub fn record_status(&mut self, status: &StatusSnapshot) {
        let detail = format!(
            "tinaco {:.1}% ({}), cisterna {:.1}% ({}), bomba {}",
            status.tinaco_percentage,
            status.tinaco_level.as_str(),
            status.cisterna_percentage,
            status.cisterna_level.as_str(),
            status.pump_state
        );
        self.last_status = Some(status.clone());
        self.push_event(EventKind::Status, detail);
    }

    /// Record a control action or deferral.
    pub fn record_control(&mut self, detail: String) {
        self.push_event(EventKind::Control, detail);
    }

    /// Record a raised alert.
    pub fn record_alert(&mut self, detail: String) {
        self.push_event(EventKind::Alert, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable overview, newest events first.
    pub fn to_overview(&self) -> Overview {
        Overview {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            status: self.last_status.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
