mod alerts;
mod analytics;
mod config;
mod control;
mod db;
mod model;
mod mqtt;
mod orchestrator;
mod processor;
mod state;
mod web;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use db::Db;
use state::SystemState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let db_url =
        env::var("DB_URL").unwrap_or_else(|_| "sqlite:smartwater.db?mode=rwc".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (site params + initial settings) ────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &db).await?;
    let utc_offset = cfg.site.utc_offset();

    info!(
        offset_hours = cfg.site.utc_offset_hours,
        db = %db_url,
        "hub ready"
    );

    // ── Shared state (ephemeral, for the web UI) ────────────────────
    let shared = Arc::new(RwLock::new(SystemState::new()));
    {
        let mut st = shared.write().await;
        st.record_system("hub started".to_string());
    }

    // ── MQTT ────────────────────────────────────────────────────────
    let client_id = "smartwater-hub";
    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    client
        .subscribe(mqtt::STATUS_TOPIC_FILTER, QoS::AtLeastOnce)
        .await?;
    info!("hub subscribed to {}", mqtt::STATUS_TOPIC_FILTER);

    // ── Web server ──────────────────────────────────────────────────
    let app_state = web::AppState {
        db: db.clone(),
        shared: Arc::clone(&shared),
        mqtt: client.clone(),
        utc_offset,
    };
    tokio::spawn(async move {
        web::serve(app_state).await;
    });

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let topic = p.topic.clone();
                let payload = p.payload.to_vec();

                let Some(device_id) = mqtt::extract_device_id(&topic) else {
                    warn!("unhandled topic={topic}");
                    continue;
                };

                match mqtt::parse_status_payload(&payload) {
                    Ok(snapshot) => {
                        match processor::handle_status(
                            &db, &shared, &client, utc_offset, snapshot,
                        )
                        .await
                        {
                            Ok(outcome) => {
                                info!(
                                    device = device_id,
                                    reason = outcome.decision.reason,
                                    "telemetry processed"
                                );
                            }
                            Err(e) => {
                                error!(device = device_id, "failed to process status: {e}");
                                let mut st = shared.write().await;
                                st.record_error(format!("{device_id}: {e}"));
                            }
                        }
                    }
                    Err(e) => {
                        error!(device = device_id, "bad status json: {e}");
                        let mut st = shared.write().await;
                        st.record_error(format!("bad status json from {device_id}: {e}"));
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
