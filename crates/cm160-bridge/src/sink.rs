//! Reading sink contract and the MQTT implementation.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rumqttc::{Client, Connection, Event, LastWill, MqttOptions, Packet, QoS};
use tracing::{debug, info, warn};

use crate::error::SinkError;

/// Destination for published payloads.
///
/// Publishing is fire-and-forget: an `Ok` means the payload was handed off,
/// not that it was delivered.
pub trait ReadingSink {
    /// Queue a payload for a topic.
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), SinkError>;
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client id.
    pub client_id: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// How long to wait for the first CONNACK.
    pub connect_timeout: Duration,
    /// Last will as (topic, payload).
    pub last_will: Option<(String, Vec<u8>)>,
}

impl MqttSettings {
    /// Settings with the usual keep-alive and connect timeout.
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        MqttSettings {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            last_will: None,
        }
    }

    /// Register a last will.
    pub fn with_last_will(mut self, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        self.last_will = Some((topic.into(), payload));
        self
    }
}

const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// QoS 0 publisher backed by `rumqttc`.
///
/// A background thread drives the connection and reconnects after errors
/// until the sink is disconnected or dropped.
pub struct MqttSink {
    client: Client,
    driver: Option<JoinHandle<()>>,
    stop: Sender<()>,
}

impl MqttSink {
    /// Connect and wait for the broker to accept the session.
    pub fn connect(settings: &MqttSettings) -> Result<Self, SinkError> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(true);
        if let Some((topic, payload)) = &settings.last_will {
            options.set_last_will(LastWill::new(topic, payload.clone(), QoS::AtMostOnce, false));
        }

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let (status_tx, status_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded(1);
        let endpoint = format!("{}:{}", settings.host, settings.port);
        let driver = thread::Builder::new()
            .name("mqtt".to_string())
            .spawn(move || drive(connection, endpoint, status_tx, stop_rx))?;

        match status_rx.recv_timeout(settings.connect_timeout) {
            Ok(Ok(())) => Ok(MqttSink {
                client,
                driver: Some(driver),
                stop: stop_tx,
            }),
            Ok(Err(reason)) => Err(SinkError::Connect {
                host: settings.host.clone(),
                port: settings.port,
                reason,
            }),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(SinkError::ConnectTimeout {
                    host: settings.host.clone(),
                    port: settings.port,
                })
            }
        }
    }

    /// Send DISCONNECT and wait for the driver thread to finish.
    ///
    /// If the broker is unreachable the DISCONNECT is dropped and the driver
    /// stops at its next reconnect attempt.
    pub fn disconnect(mut self) {
        if let Err(e) = self.client.disconnect() {
            warn!("MQTT: disconnect failed: {}", e);
        }
        let _ = self.stop.try_send(());
        if let Some(driver) = self.driver.take() {
            if driver.join().is_err() {
                warn!("MQTT: driver thread panicked");
            }
        }
    }
}

impl ReadingSink for MqttSink {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), SinkError> {
        self.client.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}

/// Run the connection until the client disconnects or `stop` fires.
///
/// The first CONNACK or connection error is reported on `status`. Later
/// errors are retried, checking `stop` between attempts.
fn drive(
    mut connection: Connection,
    endpoint: String,
    status: Sender<Result<(), String>>,
    stop: Receiver<()>,
) {
    let mut status = Some(status);
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT: connected to {}", endpoint);
                if let Some(tx) = status.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                debug!("MQTT: disconnecting from {}", endpoint);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT: connection to {} failed: {}", endpoint, e);
                match status.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(e.to_string()));
                        return;
                    }
                    None => match stop.recv_timeout(RECONNECT_DELAY) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            debug!("MQTT: giving up on {}", endpoint);
                            return;
                        }
                    },
                }
            }
        }
    }
}
