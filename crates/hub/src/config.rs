//! TOML config file loading, validation, and initial settings seeding.
//!
//! The file carries site parameters (local UTC offset for the hour-of-day
//! policies) and the initial control settings. Settings are seeded into the
//! database only when no settings row exists yet; after that, runtime
//! updates through the API are the source of truth.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use time::UtcOffset;

use crate::db::Db;
use crate::model::Settings;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Deserialize)]
pub struct SiteSection {
    /// Local offset from UTC in whole hours, used to turn snapshot
    /// timestamps into the local hour the energy policies reason about.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i8,
}

fn default_utc_offset() -> i8 {
    -6 // America/Mexico_City, no DST since 2022
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset(),
        }
    }
}

impl SiteSection {
    pub fn utc_offset(&self) -> UtcOffset {
        // Validated range, cannot fail.
        UtcOffset::from_hms(self.utc_offset_hours, 0, 0)
            .unwrap_or(UtcOffset::UTC)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if !(-12..=14).contains(&self.site.utc_offset_hours) {
            errors.push(format!(
                "site: utc_offset_hours {} out of range [-12, 14]",
                self.site.utc_offset_hours
            ));
        }

        if let Err(e) = self.settings.validate() {
            errors.push(format!("settings: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Seed the initial settings into the database when none are persisted yet.
/// Settings changed at runtime survive restarts; the file only bootstraps.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    if db.has_settings().await? {
        tracing::debug!("settings already persisted, config file not applied");
        return Ok(());
    }

    db.replace_settings(&config.settings)
        .await
        .context("failed to seed initial settings")?;

    tracing::info!(
        system = %config.settings.system_name,
        trigger = config.settings.fill_trigger_percentage,
        stop = config.settings.fill_stop_percentage,
        "initial settings seeded"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
