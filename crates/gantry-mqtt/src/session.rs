//! Per-printer connection and telemetry state machine

use chrono::Utc;
use gantry_core::{merge_report, StatusSnapshot, SERVICE_PORT};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration,
    Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tls;

/// Fixed username printers accept on their MQTT channel
pub const MQTT_USERNAME: &str = "bblp";

/// Command body requesting a full status push. The sequence id is a
/// constant: the protocol subset implemented here does not correlate
/// replies to requests.
pub const PUSHALL_BODY: &str = r#"{"pushing": {"sequence_id": "0", "command": "pushall"}}"#;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// MQTT topic a printer publishes telemetry reports on
pub fn report_topic(serial: &str) -> String {
    format!("device/{}/report", serial)
}

/// MQTT topic a printer accepts commands on
pub fn request_topic(serial: &str) -> String {
    format!("device/{}/request", serial)
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },
    #[error("connection to {host} timed out")]
    Timeout { host: String },
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("status request failed: {0}")]
    Publish(String),
    #[error("TLS setup failed: {0}")]
    Tls(String),
}

/// One printer's live connection and decoded status state.
///
/// The session owns its transport and snapshot exclusively; callers and
/// the telemetry reader task interleave arbitrarily, so every snapshot
/// access goes through the session's lock. Failed connections are not
/// retried internally; the next caller-initiated call reconnects.
pub struct PrinterSession {
    host: String,
    serial: String,
    access_code: String,
    snapshot: Arc<RwLock<StatusSnapshot>>,
    connected: Arc<AtomicBool>,
    conn: Mutex<Conn>,
}

#[derive(Default)]
struct Conn {
    client: Option<AsyncClient>,
    reader: Option<JoinHandle<()>>,
}

impl PrinterSession {
    pub fn new(host: &str, serial: &str, access_code: &str) -> Self {
        Self {
            host: host.to_string(),
            serial: serial.to_string(),
            access_code: access_code.to_string(),
            snapshot: Arc::new(RwLock::new(StatusSnapshot::default())),
            connected: Arc::new(AtomicBool::new(false)),
            conn: Mutex::new(Conn::default()),
        }
    }

    /// Whether the transport currently reports itself live
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Read-only copy of the current snapshot
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Establish the MQTT session if it is not already live.
    ///
    /// Concurrent callers serialize on the connection lock, so only one
    /// underlying attempt is ever in flight per session. No-op when the
    /// session is already connected.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let mut conn = self.conn.lock().await;
        if conn.client.is_some() && self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.close_locked(&mut conn).await;

        let mut options = MqttOptions::new(
            format!("gantry-{}", self.serial),
            self.host.clone(),
            SERVICE_PORT,
        );
        options.set_credentials(MQTT_USERNAME, self.access_code.clone());
        options.set_keep_alive(KEEP_ALIVE);
        let tls = tls::relaxed_client_config().map_err(|e| SessionError::Tls(e.to_string()))?;
        options.set_transport(Transport::Tls(TlsConfiguration::Rustls(tls)));

        let (client, mut eventloop) = AsyncClient::new(options, 16);

        // Drive the event loop by hand until the printer acknowledges
        // the connection, so handshake and authentication failures
        // surface here instead of inside the reader task.
        let connack = tokio::time::timeout(CONNECT_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack.code),
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match connack {
            Ok(Ok(ConnectReturnCode::Success)) => {}
            Ok(Ok(code)) => {
                return Err(SessionError::Connect {
                    host: self.host.clone(),
                    reason: format!("printer refused connection: {:?}", code),
                });
            }
            Ok(Err(e)) => {
                return Err(SessionError::Connect {
                    host: self.host.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(SessionError::Timeout {
                    host: self.host.clone(),
                });
            }
        }

        client
            .subscribe(report_topic(&self.serial), QoS::AtMostOnce)
            .await
            .map_err(|e| SessionError::Subscribe(e.to_string()))?;

        self.connected.store(true, Ordering::SeqCst);
        let reader = tokio::spawn(run_reader(
            eventloop,
            Arc::clone(&self.snapshot),
            Arc::clone(&self.connected),
            self.serial.clone(),
        ));
        conn.client = Some(client);
        conn.reader = Some(reader);
        info!(host = %self.host, serial = %self.serial, "connected to printer");
        Ok(())
    }

    /// Ask the printer for a full status push and return the current
    /// snapshot.
    ///
    /// The returned snapshot may be stale: the printer answers on the
    /// report topic whenever it pleases, and the reader task merges the
    /// reply in whenever it arrives. On connection failure the snapshot
    /// is marked unreachable and the error is returned; the last-known
    /// snapshot stays available through [`PrinterSession::snapshot`].
    pub async fn request_status(&self) -> Result<StatusSnapshot, SessionError> {
        if let Err(e) = self.connect().await {
            warn!(host = %self.host, error = %e, "printer unreachable");
            let mut snapshot = self.snapshot.write().await;
            snapshot.reachable = false;
            return Err(e);
        }

        let client = self.conn.lock().await.client.clone();
        let Some(client) = client else {
            return Err(SessionError::Connect {
                host: self.host.clone(),
                reason: "session closed".to_string(),
            });
        };

        if let Err(e) = client
            .publish(
                request_topic(&self.serial),
                QoS::AtMostOnce,
                false,
                PUSHALL_BODY,
            )
            .await
        {
            self.disconnect().await;
            let mut snapshot = self.snapshot.write().await;
            snapshot.reachable = false;
            return Err(SessionError::Publish(e.to_string()));
        }

        let mut snapshot = self.snapshot.write().await;
        snapshot.reachable = true;
        Ok(snapshot.clone())
    }

    /// Close the transport and stop the reader task. Idempotent.
    pub async fn disconnect(&self) {
        let mut conn = self.conn.lock().await;
        self.close_locked(&mut conn).await;
    }

    async fn close_locked(&self, conn: &mut Conn) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(client) = conn.client.take() {
            let _ = client.disconnect().await;
        }
        if let Some(reader) = conn.reader.take() {
            reader.abort();
        }
    }
}

/// Drain the event loop, folding telemetry into the snapshot.
///
/// Runs until the transport fails; decode problems on individual
/// messages are discarded and never end the loop.
async fn run_reader(
    mut eventloop: EventLoop,
    snapshot: Arc<RwLock<StatusSnapshot>>,
    connected: Arc<AtomicBool>,
    serial: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let report: serde_json::Value = match serde_json::from_slice(&publish.payload) {
                    Ok(report) => report,
                    Err(e) => {
                        debug!(serial = %serial, error = %e, "discarding undecodable telemetry");
                        continue;
                    }
                };
                let mut snapshot = snapshot.write().await;
                if merge_report(&report, &serial, &mut snapshot) {
                    snapshot.updated_at = Some(Utc::now());
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(serial = %serial, error = %e, "printer connection lost");
                connected.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
}
