use crate::config::Config;
use crate::error::RollupError;
use crate::rollup::RollupEngine;
use crate::telemetry::{parse_reading_payload, reading_topic_filter};
use anyhow::Result;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::time::{sleep, Duration};

/// Subscribes to the reading feed and ingests every decoded reading,
/// reconnecting whenever the broker connection drops. Runs until the task
/// is dropped.
pub async fn run_listener(config: Config, engine: RollupEngine) -> Result<()> {
    let reading_filter = reading_topic_filter(&config.mqtt_topic_prefix);
    let stats = engine.stats();
    let mut backoff = Duration::from_secs(1);

    loop {
        let mut mqttoptions = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        mqttoptions.set_keep_alive(config.mqtt_keepalive());
        if let Some(username) = &config.mqtt_username {
            mqttoptions.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 32);

        match client
            .subscribe(reading_filter.clone(), QoS::AtLeastOnce)
            .await
        {
            Ok(_) => {
                tracing::info!(topic = %reading_filter, "subscribed to reading feed");
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to subscribe to MQTT; retrying");
                sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(30));
                continue;
            }
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    stats.set_mqtt_connected(true);
                    backoff = Duration::from_secs(1);
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let mut payload = publish.payload.to_vec();
                    match parse_reading_payload(
                        &config.mqtt_topic_prefix,
                        &publish.topic,
                        &mut payload,
                    ) {
                        Ok(Some(reading)) => {
                            match engine
                                .ingest(&reading.sensor_id, reading.value, reading.position)
                                .await
                            {
                                Ok(_) => {}
                                // Persistence failures are already logged at error.
                                Err(RollupError::Persistence(_)) => {}
                                Err(err) => {
                                    tracing::warn!(
                                        sensor = %reading.sensor_id,
                                        error = %err,
                                        "rejected MQTT reading"
                                    );
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            stats.record_rejected();
                            tracing::warn!(error = %err, topic = %publish.topic, "failed to decode MQTT payload");
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    stats.set_mqtt_connected(false);
                    tracing::warn!(error = %err, "MQTT connection dropped; reconnecting");
                    break;
                }
            }
        }

        sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(30));
    }
}
