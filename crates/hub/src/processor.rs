//! Glue between the pure decision core and the collaborators: loads the
//! current settings, runs the orchestrator, persists the resulting triple,
//! publishes the pump command, and feeds the dashboard event stream.
//!
//! Both ingestion paths (MQTT telemetry and `POST /api/status`) land here,
//! as does manual pump control.

use anyhow::Result;
use rumqttc::{AsyncClient, QoS};
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};
use tracing::{error, info};

use crate::db::Db;
use crate::model::{AlertType, PumpAction, StatusSnapshot, ValidationError};
use crate::mqtt::{pump_command, PUMP_COMMAND_TOPIC};
use crate::orchestrator::{self, ManualAction, ManualControlError, Outcome};
use crate::state::SharedState;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ManualError {
    #[error("no status snapshot recorded yet")]
    NoStatus,
    #[error(transparent)]
    Rejected(#[from] ManualControlError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Process one incoming status report end to end.
pub async fn handle_status(
    db: &Db,
    shared: &SharedState,
    mqtt: &AsyncClient,
    utc_offset: UtcOffset,
    snapshot: StatusSnapshot,
) -> Result<Outcome, ProcessError> {
    let settings = db.current_settings().await?;
    let now = OffsetDateTime::now_utc().to_offset(utc_offset);

    let outcome = orchestrator::process(&snapshot, &settings, now)?;
    persist_and_publish(db, shared, mqtt, &outcome).await?;

    info!(
        action = ?outcome.decision.action,
        reason = outcome.decision.reason,
        alerts = outcome.alerts.len(),
        "status processed"
    );
    Ok(outcome)
}

/// Apply a manual start/stop against the latest recorded snapshot.
pub async fn handle_manual(
    db: &Db,
    shared: &SharedState,
    mqtt: &AsyncClient,
    action: ManualAction,
    user: &str,
) -> Result<Outcome, ManualError> {
    let Some(current) = db.latest_status().await? else {
        return Err(ManualError::NoStatus);
    };
    let settings = db.current_settings().await?;

    let outcome = orchestrator::manual_pump_control(&current, &settings, action, user)?;
    persist_and_publish(db, shared, mqtt, &outcome).await?;

    info!(user, reason = outcome.decision.reason, "manual pump control applied");
    Ok(outcome)
}

/// Persist the triple, publish the pump command when the state changed, and
/// record dashboard events. The MQTT publish is best-effort; the persisted
/// record is the source of truth and the unit re-reports its state anyway.
async fn persist_and_publish(
    db: &Db,
    shared: &SharedState,
    mqtt: &AsyncClient,
    outcome: &Outcome,
) -> Result<()> {
    db.append_status(&outcome.status).await?;
    for alert in &outcome.alerts {
        db.append_alert(alert).await?;
    }
    db.append_log(&outcome.log).await?;

    if let Some(on) = match outcome.decision.action {
        PumpAction::Start => Some(true),
        PumpAction::Stop => Some(false),
        PumpAction::None => None,
    } {
        if let Err(e) = mqtt
            .publish(PUMP_COMMAND_TOPIC, QoS::AtLeastOnce, false, pump_command(on))
            .await
        {
            error!("failed to publish pump command: {e}");
            let mut st = shared.write().await;
            st.record_error(format!("mqtt publish failed: {e}"));
        }
    }

    let mut st = shared.write().await;
    st.record_status(&outcome.status);
    match outcome.decision.action {
        PumpAction::Start => {
            st.record_control(format!("bomba -> on ({})", outcome.decision.reason));
        }
        PumpAction::Stop => {
            st.record_control(format!("bomba -> off ({})", outcome.decision.reason));
        }
        PumpAction::None if outcome.decision.gated => {
            st.record_control(format!("start deferred ({})", outcome.decision.reason));
        }
        PumpAction::None => {}
    }
    for alert in outcome
        .alerts
        .iter()
        .filter(|a| a.alert_type != AlertType::Info)
    {
        st.record_alert(format!("[{}] {}", alert.component, alert.message));
    }

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
