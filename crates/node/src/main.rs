mod sim;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::{env, time::Duration};
use time::{Date, OffsetDateTime, UtcOffset};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sim::{level_label, Scenario, TankSim};

/// Pump commands from the hub arrive here.
const PUMP_COMMAND_TOPIC: &str = "bomba/set";

#[derive(Debug, Serialize)]
struct StatusMsg {
    tinaco_level: &'static str,
    tinaco_percentage: f64,
    cisterna_level: &'static str,
    cisterna_percentage: f64,
    pump_state: &'static str,
    pump_runtime_minutes: i64,
    pump_runtime_today_minutes: i64,
    water_flow_lpm: f64,
    power_watts: f64,
    daily_power_kwh: f64,
    mode: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    recorded_at: OffsetDateTime,
}

fn status_msg(sim: &TankSim, now: OffsetDateTime) -> StatusMsg {
    StatusMsg {
        tinaco_level: level_label(sim.tinaco_percentage()),
        tinaco_percentage: sim.tinaco_percentage(),
        cisterna_level: level_label(sim.cisterna_percentage()),
        cisterna_percentage: sim.cisterna_percentage(),
        pump_state: if sim.pump_on() { "on" } else { "off" },
        pump_runtime_minutes: sim.pump_runtime_minutes(),
        pump_runtime_today_minutes: sim.runtime_today_minutes(),
        water_flow_lpm: sim.flow_lpm(),
        power_watts: sim.power_watts(),
        daily_power_kwh: sim.daily_power_kwh(),
        mode: "automatic",
        recorded_at: now,
    }
}

/// Parse an "ON"/"OFF" payload into a bool (case-insensitive, trims whitespace).
fn parse_pump_command(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(format!("unknown pump command '{s}'")),
    }
}

fn local_date(offset: UtcOffset) -> Date {
    OffsetDateTime::now_utc().to_offset(offset).date()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let node_id = env::var("NODE_ID").unwrap_or_else(|_| "casa-1".to_string());

    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    // Local offset, for resetting the daily counters at midnight.
    let offset_hours: i8 = env::var("UTC_OFFSET_HOURS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(-6);
    let offset = UtcOffset::from_hms(offset_hours, 0, 0).unwrap_or(UtcOffset::UTC);

    let scenario = Scenario::from_str_lossy(
        &env::var("SIM_SCENARIO").unwrap_or_default(),
    );

    let mut sim = TankSim::new(scenario);
    let mut last_day = local_date(offset);

    let client_id = format!("smartwater-node-{node_id}");
    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);
    client
        .subscribe(PUMP_COMMAND_TOPIC, QoS::AtLeastOnce)
        .await?;

    let topic = format!("tele/{node_id}/status");
    info!(%scenario, sample_every_s, "publishing to topic: {topic}");

    // The tick advances the simulated plant by the sampling interval, so a
    // short SAMPLE_EVERY_S also fast-forwards the simulation.
    let dt_min = sample_every_s as f64 / 60.0;
    let mut ticker = tokio::time::interval(Duration::from_secs(sample_every_s));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let today = local_date(offset);
                if today != last_day {
                    sim.reset_daily();
                    last_day = today;
                    info!("daily counters reset");
                }

                sim.step(dt_min);
                let msg = status_msg(&sim, OffsetDateTime::now_utc());
                let payload = serde_json::to_vec(&msg)?;

                if let Err(e) = client
                    .publish(&topic, QoS::AtLeastOnce, false, payload)
                    .await
                {
                    error!("publish error: {e}");
                } else {
                    info!(
                        tinaco = format!("{:.1}%", sim.tinaco_percentage()),
                        cisterna = format!("{:.1}%", sim.cisterna_percentage()),
                        pump = sim.pump_on(),
                        "published status"
                    );
                }
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("node connected to mqtt");
                    // Re-subscribe after reconnects; duplicates are harmless.
                    if let Err(e) = client.subscribe(PUMP_COMMAND_TOPIC, QoS::AtLeastOnce).await {
                        error!("subscribe failed: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == PUMP_COMMAND_TOPIC => {
                    match parse_pump_command(&p.payload) {
                        Ok(on) => {
                            sim.set_pump(on);
                            info!(on, "pump command applied");
                        }
                        Err(msg) => warn!("{msg} (use ON/OFF)"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
