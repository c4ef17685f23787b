//! Sqlite persistence for the four stores the hub needs: status snapshots,
//! alerts, usage logs (all append-only), and the single current settings row.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use time::OffsetDateTime;

use crate::model::{
    Alert, AlertType, LogAction, LogEntry, PumpState, Settings, StatusSnapshot, SystemMode,
    TankLevel,
};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// An alert as stored, with its row id so it can be resolved later.
#[derive(Debug, Clone, Serialize)]
pub struct StoredAlert {
    pub id: i64,
    #[serde(flatten)]
    pub alert: Alert,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS status_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recorded_at INTEGER NOT NULL,
        tinaco_level TEXT NOT NULL,
        tinaco_percentage REAL NOT NULL,
        cisterna_level TEXT NOT NULL,
        cisterna_percentage REAL NOT NULL,
        pump_state TEXT NOT NULL,
        pump_runtime_minutes INTEGER NOT NULL,
        pump_runtime_today_minutes INTEGER NOT NULL,
        water_flow_lpm REAL NOT NULL,
        power_watts REAL NOT NULL,
        daily_power_kwh REAL NOT NULL,
        water_temperature_c REAL,
        ambient_temperature_c REAL,
        mode TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_status_recorded ON status_log(recorded_at)",
    "CREATE TABLE IF NOT EXISTS alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at INTEGER NOT NULL,
        message TEXT NOT NULL,
        alert_type TEXT NOT NULL,
        component TEXT NOT NULL,
        severity INTEGER NOT NULL,
        resolved INTEGER NOT NULL DEFAULT 0,
        resolved_at INTEGER,
        resolved_by TEXT,
        auto_generated INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE INDEX IF NOT EXISTS idx_alerts_resolved ON alerts(resolved, created_at)",
    "CREATE TABLE IF NOT EXISTS usage_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recorded_at INTEGER NOT NULL,
        action TEXT NOT NULL,
        tinaco_level_before TEXT NOT NULL,
        tinaco_level_after TEXT NOT NULL,
        tinaco_percentage_before REAL NOT NULL,
        tinaco_percentage_after REAL NOT NULL,
        duration_minutes INTEGER,
        water_amount_liters REAL,
        power_consumed_kwh REAL,
        triggered_by TEXT NOT NULL,
        operation_mode TEXT NOT NULL,
        note TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_usage_recorded ON usage_logs(recorded_at)",
    "CREATE TABLE IF NOT EXISTS settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        system_name TEXT NOT NULL,
        auto_mode_enabled INTEGER NOT NULL,
        fill_trigger_percentage REAL NOT NULL,
        fill_stop_percentage REAL NOT NULL,
        min_cisterna_level_to_start TEXT NOT NULL,
        max_pump_runtime_minutes INTEGER NOT NULL,
        max_daily_runtime_minutes INTEGER NOT NULL,
        energy_saving_enabled INTEGER NOT NULL,
        preferred_hours TEXT NOT NULL,
        avoid_peak_hours INTEGER NOT NULL,
        peak_hours TEXT NOT NULL,
        flow_rate_threshold_lpm REAL NOT NULL,
        daily_power_alarm_kwh REAL NOT NULL
    )",
];

// ---------------------------------------------------------------------------
// Decode helpers
// ---------------------------------------------------------------------------

fn tank_level(s: &str) -> Result<TankLevel> {
    TankLevel::parse(s).ok_or_else(|| anyhow!("unknown tank level '{s}' in database"))
}

fn pump_state(s: &str) -> Result<PumpState> {
    PumpState::parse(s).ok_or_else(|| anyhow!("unknown pump state '{s}' in database"))
}

fn system_mode(s: &str) -> Result<SystemMode> {
    SystemMode::parse(s).ok_or_else(|| anyhow!("unknown system mode '{s}' in database"))
}

fn alert_type(s: &str) -> Result<AlertType> {
    AlertType::parse(s).ok_or_else(|| anyhow!("unknown alert type '{s}' in database"))
}

fn log_action(s: &str) -> Result<LogAction> {
    LogAction::parse(s).ok_or_else(|| anyhow!("unknown log action '{s}' in database"))
}

fn timestamp(ts: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts).with_context(|| format!("bad stored timestamp {ts}"))
}

impl Db {
    /// db_url examples:
    /// - "sqlite:smartwater.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // An in-memory sqlite database exists per connection; a pool larger
        // than one would hand out empty databases.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("failed to apply schema")?;
        }
        Ok(())
    }

    // ----------------------------
    // Settings store
    // ----------------------------

    /// The current settings, or the defaults if none were ever persisted.
    pub async fn current_settings(&self) -> Result<Settings> {
        let row = sqlx::query("SELECT * FROM settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("current_settings failed")?;

        let Some(row) = row else {
            return Ok(Settings::default());
        };

        let preferred: Vec<u8> = serde_json::from_str(row.try_get("preferred_hours")?)
            .context("bad preferred_hours in database")?;
        let peak: Vec<u8> = serde_json::from_str(row.try_get("peak_hours")?)
            .context("bad peak_hours in database")?;

        Ok(Settings {
            system_name: row.try_get("system_name")?,
            auto_mode_enabled: row.try_get("auto_mode_enabled")?,
            fill_trigger_percentage: row.try_get("fill_trigger_percentage")?,
            fill_stop_percentage: row.try_get("fill_stop_percentage")?,
            min_cisterna_level_to_start: tank_level(row.try_get("min_cisterna_level_to_start")?)?,
            max_pump_runtime_minutes: row.try_get("max_pump_runtime_minutes")?,
            max_daily_runtime_minutes: row.try_get("max_daily_runtime_minutes")?,
            energy_saving_enabled: row.try_get("energy_saving_enabled")?,
            preferred_hours: preferred,
            avoid_peak_hours: row.try_get("avoid_peak_hours")?,
            peak_hours: peak,
            flow_rate_threshold_lpm: row.try_get("flow_rate_threshold_lpm")?,
            daily_power_alarm_kwh: row.try_get("daily_power_alarm_kwh")?,
        })
    }

    /// Replace the single active settings version wholesale.
    pub async fn replace_settings(&self, s: &Settings) -> Result<()> {
        let preferred = serde_json::to_string(&s.preferred_hours)?;
        let peak = serde_json::to_string(&s.peak_hours)?;
        sqlx::query(
            "INSERT INTO settings (
                id, system_name, auto_mode_enabled,
                fill_trigger_percentage, fill_stop_percentage,
                min_cisterna_level_to_start,
                max_pump_runtime_minutes, max_daily_runtime_minutes,
                energy_saving_enabled, preferred_hours,
                avoid_peak_hours, peak_hours,
                flow_rate_threshold_lpm, daily_power_alarm_kwh
            ) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                system_name=excluded.system_name,
                auto_mode_enabled=excluded.auto_mode_enabled,
                fill_trigger_percentage=excluded.fill_trigger_percentage,
                fill_stop_percentage=excluded.fill_stop_percentage,
                min_cisterna_level_to_start=excluded.min_cisterna_level_to_start,
                max_pump_runtime_minutes=excluded.max_pump_runtime_minutes,
                max_daily_runtime_minutes=excluded.max_daily_runtime_minutes,
                energy_saving_enabled=excluded.energy_saving_enabled,
                preferred_hours=excluded.preferred_hours,
                avoid_peak_hours=excluded.avoid_peak_hours,
                peak_hours=excluded.peak_hours,
                flow_rate_threshold_lpm=excluded.flow_rate_threshold_lpm,
                daily_power_alarm_kwh=excluded.daily_power_alarm_kwh",
        )
        .bind(&s.system_name)
        .bind(s.auto_mode_enabled)
        .bind(s.fill_trigger_percentage)
        .bind(s.fill_stop_percentage)
        .bind(s.min_cisterna_level_to_start.as_str())
        .bind(s.max_pump_runtime_minutes)
        .bind(s.max_daily_runtime_minutes)
        .bind(s.energy_saving_enabled)
        .bind(preferred)
        .bind(s.avoid_peak_hours)
        .bind(peak)
        .bind(s.flow_rate_threshold_lpm)
        .bind(s.daily_power_alarm_kwh)
        .execute(&self.pool)
        .await
        .context("replace_settings failed")?;
        Ok(())
    }

    pub async fn has_settings(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("has_settings failed")?;
        Ok(row.is_some())
    }

    // ----------------------------
    // Status store (append-only)
    // ----------------------------

    pub async fn append_status(&self, s: &StatusSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO status_log (
                recorded_at,
                tinaco_level, tinaco_percentage,
                cisterna_level, cisterna_percentage,
                pump_state, pump_runtime_minutes, pump_runtime_today_minutes,
                water_flow_lpm, power_watts, daily_power_kwh,
                water_temperature_c, ambient_temperature_c,
                mode
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(s.recorded_at.unix_timestamp())
        .bind(s.tinaco_level.as_str())
        .bind(s.tinaco_percentage)
        .bind(s.cisterna_level.as_str())
        .bind(s.cisterna_percentage)
        .bind(s.pump_state.as_str())
        .bind(s.pump_runtime_minutes)
        .bind(s.pump_runtime_today_minutes)
        .bind(s.water_flow_lpm)
        .bind(s.power_watts)
        .bind(s.daily_power_kwh)
        .bind(s.water_temperature_c)
        .bind(s.ambient_temperature_c)
        .bind(s.mode.as_str())
        .execute(&self.pool)
        .await
        .context("append_status failed")?;
        Ok(())
    }

    pub async fn latest_status(&self) -> Result<Option<StatusSnapshot>> {
        let row = sqlx::query("SELECT * FROM status_log ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .context("latest_status failed")?;

        row.map(|row| {
            Ok(StatusSnapshot {
                tinaco_level: tank_level(row.try_get("tinaco_level")?)?,
                tinaco_percentage: row.try_get("tinaco_percentage")?,
                cisterna_level: tank_level(row.try_get("cisterna_level")?)?,
                cisterna_percentage: row.try_get("cisterna_percentage")?,
                pump_state: pump_state(row.try_get("pump_state")?)?,
                pump_runtime_minutes: row.try_get("pump_runtime_minutes")?,
                pump_runtime_today_minutes: row.try_get("pump_runtime_today_minutes")?,
                water_flow_lpm: row.try_get("water_flow_lpm")?,
                power_watts: row.try_get("power_watts")?,
                daily_power_kwh: row.try_get("daily_power_kwh")?,
                water_temperature_c: row.try_get("water_temperature_c")?,
                ambient_temperature_c: row.try_get("ambient_temperature_c")?,
                mode: system_mode(row.try_get("mode")?)?,
                recorded_at: timestamp(row.try_get("recorded_at")?)?,
            })
        })
        .transpose()
    }

    // ----------------------------
    // Alert store
    // ----------------------------

    pub async fn append_alert(&self, a: &Alert) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO alerts (
                created_at, message, alert_type, component, severity,
                resolved, resolved_at, resolved_by, auto_generated
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(a.created_at.unix_timestamp())
        .bind(&a.message)
        .bind(a.alert_type.as_str())
        .bind(&a.component)
        .bind(a.severity as i64)
        .bind(a.resolved)
        .bind(a.resolved_at.map(|t| t.unix_timestamp()))
        .bind(a.resolved_by.as_deref())
        .bind(a.auto_generated)
        .execute(&self.pool)
        .await
        .context("append_alert failed")?;
        Ok(result.last_insert_rowid())
    }

    /// Newest first. `unresolved_only` filters out resolved alerts.
    pub async fn list_alerts(&self, unresolved_only: bool, limit: i64) -> Result<Vec<StoredAlert>> {
        let query = if unresolved_only {
            "SELECT * FROM alerts WHERE resolved = 0 ORDER BY created_at DESC, id DESC LIMIT ?"
        } else {
            "SELECT * FROM alerts ORDER BY created_at DESC, id DESC LIMIT ?"
        };
        let rows = sqlx::query(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("list_alerts failed")?;

        rows.into_iter()
            .map(|row| {
                let resolved_at: Option<i64> = row.try_get("resolved_at")?;
                Ok(StoredAlert {
                    id: row.try_get("id")?,
                    alert: Alert {
                        message: row.try_get("message")?,
                        alert_type: alert_type(row.try_get("alert_type")?)?,
                        component: row.try_get("component")?,
                        severity: row.try_get::<i64, _>("severity")? as u8,
                        created_at: timestamp(row.try_get("created_at")?)?,
                        resolved: row.try_get("resolved")?,
                        resolved_at: resolved_at.map(timestamp).transpose()?,
                        resolved_by: row.try_get("resolved_by")?,
                        auto_generated: row.try_get("auto_generated")?,
                    },
                })
            })
            .collect()
    }

    /// Mark an alert resolved. Returns false when the alert does not exist
    /// or was already resolved; an alert resolves exactly once.
    pub async fn resolve_alert(&self, id: i64, by: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE alerts SET resolved = 1, resolved_at = ?, resolved_by = ?
             WHERE id = ? AND resolved = 0",
        )
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .bind(by)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("resolve_alert failed")?;
        Ok(result.rows_affected() > 0)
    }

    // ----------------------------
    // Usage log store (append-only)
    // ----------------------------

    pub async fn append_log(&self, e: &LogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO usage_logs (
                recorded_at, action,
                tinaco_level_before, tinaco_level_after,
                tinaco_percentage_before, tinaco_percentage_after,
                duration_minutes, water_amount_liters, power_consumed_kwh,
                triggered_by, operation_mode, note
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(e.recorded_at.unix_timestamp())
        .bind(e.action.as_str())
        .bind(e.tinaco_level_before.as_str())
        .bind(e.tinaco_level_after.as_str())
        .bind(e.tinaco_percentage_before)
        .bind(e.tinaco_percentage_after)
        .bind(e.duration_minutes)
        .bind(e.water_amount_liters)
        .bind(e.power_consumed_kwh)
        .bind(&e.triggered_by)
        .bind(e.operation_mode.as_str())
        .bind(e.note.as_deref())
        .execute(&self.pool)
        .await
        .context("append_log failed")?;
        Ok(())
    }

    /// Log entries recorded at or after `since` (unix seconds), newest first.
    pub async fn logs_since(&self, since: i64) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM usage_logs WHERE recorded_at >= ? ORDER BY recorded_at DESC, id DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("logs_since failed")?;

        rows.into_iter()
            .map(|row| {
                Ok(LogEntry {
                    recorded_at: timestamp(row.try_get("recorded_at")?)?,
                    action: log_action(row.try_get("action")?)?,
                    tinaco_level_before: tank_level(row.try_get("tinaco_level_before")?)?,
                    tinaco_level_after: tank_level(row.try_get("tinaco_level_after")?)?,
                    tinaco_percentage_before: row.try_get("tinaco_percentage_before")?,
                    tinaco_percentage_after: row.try_get("tinaco_percentage_after")?,
                    duration_minutes: row.try_get("duration_minutes")?,
                    water_amount_liters: row.try_get("water_amount_liters")?,
                    power_consumed_kwh: row.try_get("power_consumed_kwh")?,
                    triggered_by: row.try_get("triggered_by")?,
                    operation_mode: system_mode(row.try_get("operation_mode")?)?,
                    note: row.try_get("note")?,
                })
            })
            .collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
