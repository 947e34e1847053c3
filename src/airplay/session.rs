//! AirPlay tunnel orchestration
//!
//! Bring-up is strictly linear: connect control, verify, encrypt control,
//! SETUP the event channel, connect it, RECORD, SETUP the data channel,
//! connect it, then start feedback. Any failed step aborts the whole
//! tunnel; there is no partial-success state. Each step runs under the
//! configured setup timeout, with expiry treated like a transport error.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

use super::channels::{DataStreamChannel, EventChannel};
use super::http::{HttpConnection, HttpRequest, HttpResponse};
use super::verify;
use crate::error::{RemoteError, Result};
use crate::protocol::crypto::ChannelKeys;
use crate::protocol::pairing::Credentials;
use crate::protocol::plist::PlistValue;
use crate::types::{DisconnectReason, RemoteConfig};

const CLIENT_TYPE_UUID: &str = "1910A70F-DBC0-4242-AF95-115DB30604E1";

/// An established media-remote tunnel
pub struct AirPlaySession {
    control: Arc<Mutex<HttpConnection>>,
    event: EventChannel,
    data: DataStreamChannel,
    feedback_task: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
    disconnect_tx: broadcast::Sender<DisconnectReason>,
    closed: Arc<StdMutex<bool>>,
}

impl AirPlaySession {
    /// Bring up the tunnel against an AirPlay service endpoint
    ///
    /// Returns the session and the receiver for inbound media-remote
    /// messages.
    ///
    /// # Errors
    /// Any step failure (including a step timeout) aborts the whole
    /// bring-up and surfaces here; nothing is left half-connected.
    pub async fn connect(
        host: &str,
        port: u16,
        credentials: &Credentials,
        config: &RemoteConfig,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>)> {
        let timeout = config.setup_timeout;

        let mut control = step(timeout, "connect", HttpConnection::connect(host, port)).await?;

        let shared = step(
            timeout,
            "pair-verify",
            verify::pair_verify(&mut control, credentials),
        )
        .await?;

        // Control channel encryption
        let keys = ChannelKeys::derive(
            &shared,
            b"Control-Salt",
            b"Control-Write-Encryption-Key",
            b"Control-Read-Encryption-Key",
        )?;
        control.enable_encryption(&keys.output_key, &keys.input_key)?;
        tracing::debug!("control channel encrypted");

        let session_id = u64::from(rand::thread_rng().r#gen::<u32>());
        let uri = format!("rtsp://{host}/{session_id}");

        // Event channel SETUP
        let response = step(
            timeout,
            "setup-event",
            send_setup(&mut control, &uri, event_setup_body(config)),
        )
        .await?;
        let event_port = extract_port(&response, "eventPort")?;

        // The event connection runs in the reverse direction, so its key
        // roles are swapped relative to the other channels.
        let event_keys = ChannelKeys::derive(
            &shared,
            b"Events-Salt",
            b"Events-Write-Encryption-Key",
            b"Events-Read-Encryption-Key",
        )?;
        let event = step(
            timeout,
            "connect-event",
            EventChannel::connect(host, event_port, &event_keys.input_key, &event_keys.output_key),
        )
        .await?;
        tracing::debug!(port = event_port, "event channel up");

        // RECORD
        let record_result = async {
            let cseq = control.next_cseq();
            let request = HttpRequest::new("RECORD", &uri).header("CSeq", cseq.to_string());
            let response = control.send_request(request).await?;
            expect_success(&response, "RECORD")
        };
        if let Err(e) = step(timeout, "record", record_result).await {
            event.shutdown();
            return Err(e);
        }

        // Data channel SETUP, keyed by a random seed folded into the salt
        let seed: u64 = rand::thread_rng().r#gen();
        let data_setup = send_setup(&mut control, &uri, data_setup_body(seed));
        let response = match step(timeout, "setup-data", data_setup).await {
            Ok(response) => response,
            Err(e) => {
                event.shutdown();
                return Err(e);
            }
        };
        let data_port = match extract_stream_port(&response) {
            Ok(port) => port,
            Err(e) => {
                event.shutdown();
                return Err(e);
            }
        };

        let salt = format!("DataStream-Salt{seed}");
        let data_keys = ChannelKeys::derive(
            &shared,
            salt.as_bytes(),
            b"DataStream-Output-Encryption-Key",
            b"DataStream-Input-Encryption-Key",
        )?;

        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let data = match step(
            timeout,
            "connect-data",
            DataStreamChannel::connect(
                host,
                data_port,
                &data_keys.output_key,
                &data_keys.input_key,
                inbound_tx,
            ),
        )
        .await
        {
            Ok(data) => data,
            Err(e) => {
                event.shutdown();
                return Err(e);
            }
        };
        tracing::debug!(port = data_port, "data channel up");

        let control = Arc::new(Mutex::new(control));
        let (disconnect_tx, _) = broadcast::channel(4);
        let closed = Arc::new(StdMutex::new(false));

        let feedback_task = tokio::spawn(feedback_loop(
            Arc::clone(&control),
            uri.clone(),
            config.feedback_interval,
            disconnect_tx.clone(),
            Arc::clone(&closed),
        ));

        let monitor_task = tokio::spawn(monitor_channels(
            event.disconnects(),
            data.disconnects(),
            disconnect_tx.clone(),
            Arc::clone(&closed),
        ));

        tracing::info!(host, "media-remote tunnel ready");

        Ok((
            Self {
                control,
                event,
                data,
                feedback_task,
                monitor_task,
                disconnect_tx,
                closed,
            },
            inbound_rx,
        ))
    }

    /// Send one serialized media-remote message
    ///
    /// # Errors
    /// Propagates channel failures.
    pub async fn send_message(&self, message: &[u8]) -> Result<()> {
        self.data.send_message(message).await
    }

    /// Subscribe to the tunnel's single disconnect notification
    #[must_use]
    pub fn disconnects(&self) -> broadcast::Receiver<DisconnectReason> {
        self.disconnect_tx.subscribe()
    }

    /// Tear the tunnel down: data, then event, then control
    pub async fn disconnect(&self) {
        notify_once(&self.closed, &self.disconnect_tx, DisconnectReason::Requested);
        self.feedback_task.abort();
        self.monitor_task.abort();
        self.data.shutdown();
        self.event.shutdown();
        self.control.lock().await.close().await;
    }
}

impl Drop for AirPlaySession {
    fn drop(&mut self) {
        self.feedback_task.abort();
        self.monitor_task.abort();
    }
}

async fn step<T>(
    timeout: Duration,
    name: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.inspect_err(|e| {
            tracing::warn!(step = name, error = %e, "tunnel setup step failed");
        }),
        Err(_) => {
            tracing::warn!(step = name, "tunnel setup step timed out");
            Err(RemoteError::Timeout)
        }
    }
}

fn notify_once(
    closed: &StdMutex<bool>,
    tx: &broadcast::Sender<DisconnectReason>,
    reason: DisconnectReason,
) {
    let mut closed = closed.lock().unwrap();
    if *closed {
        return;
    }
    *closed = true;
    let _ = tx.send(reason);
}

async fn monitor_channels(
    mut event_rx: broadcast::Receiver<DisconnectReason>,
    mut data_rx: broadcast::Receiver<DisconnectReason>,
    tx: broadcast::Sender<DisconnectReason>,
    closed: Arc<StdMutex<bool>>,
) {
    let reason = tokio::select! {
        r = event_rx.recv() => r,
        r = data_rx.recv() => r,
    };
    let reason = reason.unwrap_or(DisconnectReason::RemoteClosed);
    notify_once(&closed, &tx, reason);
}

async fn feedback_loop(
    control: Arc<Mutex<HttpConnection>>,
    uri: String,
    interval: Duration,
    tx: broadcast::Sender<DisconnectReason>,
    closed: Arc<StdMutex<bool>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let mut control = control.lock().await;
        let cseq = control.next_cseq();
        let request = HttpRequest::new("POST", "/feedback")
            .header("CSeq", cseq.to_string())
            .header("Session", uri.clone());
        match control.send_request(request).await {
            Ok(response) if response.is_success() => {}
            Ok(response) => {
                tracing::warn!(status = response.status, "feedback rejected");
            }
            Err(e) => {
                notify_once(&closed, &tx, DisconnectReason::Error(e.to_string()));
                return;
            }
        }
    }
}

async fn send_setup(
    control: &mut HttpConnection,
    uri: &str,
    body: PlistValue,
) -> Result<HttpResponse> {
    let cseq = control.next_cseq();
    let request = HttpRequest::new("SETUP", uri)
        .header("CSeq", cseq.to_string())
        .body_plist(&body)?;
    let response = control.send_request(request).await?;
    expect_success(&response, "SETUP")?;
    Ok(response)
}

fn expect_success(response: &HttpResponse, what: &str) -> Result<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(RemoteError::InvalidResponse {
            message: format!("{what} failed with status {}", response.status),
        })
    }
}

fn event_setup_body(config: &RemoteConfig) -> PlistValue {
    PlistValue::dict([
        ("isRemoteControlOnly", PlistValue::Boolean(true)),
        ("osName", PlistValue::string("iPhone OS")),
        ("sourceVersion", PlistValue::string("550.10")),
        ("timingProtocol", PlistValue::string("None")),
        ("model", PlistValue::string("iPhone10,6")),
        ("osVersion", PlistValue::string("14.7.1")),
        ("osBuildVersion", PlistValue::string("18G82")),
        ("deviceID", PlistValue::string(random_mac())),
        ("macAddress", PlistValue::string(random_mac())),
        ("sessionUUID", PlistValue::string(random_uuid())),
        ("name", PlistValue::string(config.name.clone())),
    ])
}

fn data_setup_body(seed: u64) -> PlistValue {
    PlistValue::dict([(
        "streams",
        PlistValue::Array(vec![PlistValue::dict([
            ("controlType", PlistValue::Integer(2)),
            ("channelID", PlistValue::string(random_uuid())),
            ("clientUUID", PlistValue::string(random_uuid())),
            ("seed", PlistValue::UnsignedInteger(seed)),
            ("type", PlistValue::Integer(130)),
            ("wantsDedicatedSocket", PlistValue::Boolean(true)),
            ("clientTypeUUID", PlistValue::string(CLIENT_TYPE_UUID)),
        ])]),
    )])
}

fn extract_port(response: &HttpResponse, key: &'static str) -> Result<u16> {
    let plist = response.body_as_plist()?;
    plist
        .get(key)
        .and_then(PlistValue::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| RemoteError::InvalidResponse {
            message: format!("SETUP response missing {key}"),
        })
}

fn extract_stream_port(response: &HttpResponse) -> Result<u16> {
    let plist = response.body_as_plist()?;
    plist
        .get("streams")
        .and_then(PlistValue::as_array)
        .and_then(<[PlistValue]>::first)
        .and_then(|s| s.get("dataPort"))
        .and_then(PlistValue::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| RemoteError::InvalidResponse {
            message: "SETUP response missing stream dataPort".to_string(),
        })
}

fn random_uuid() -> String {
    let b: [u8; 16] = rand::random();
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15],
    )
}

fn random_mac() -> String {
    let b: [u8; 6] = rand::random();
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        b[0], b[1], b[2], b[3], b[4], b[5],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_setup_body_declares_remote_control() {
        let body = event_setup_body(&RemoteConfig::default());
        assert_eq!(
            body.get("isRemoteControlOnly").and_then(PlistValue::as_bool),
            Some(true)
        );
        assert_eq!(
            body.get("timingProtocol").and_then(PlistValue::as_str),
            Some("None")
        );
    }

    #[test]
    fn test_data_setup_body_stream_descriptor() {
        let body = data_setup_body(12345);
        let stream = body
            .get("streams")
            .and_then(PlistValue::as_array)
            .and_then(<[PlistValue]>::first)
            .unwrap();
        assert_eq!(stream.get("type").and_then(PlistValue::as_i64), Some(130));
        assert_eq!(stream.get("seed").and_then(PlistValue::as_u64), Some(12345));
        assert_eq!(
            stream.get("clientTypeUUID").and_then(PlistValue::as_str),
            Some(CLIENT_TYPE_UUID)
        );
    }

    #[test]
    fn test_random_identifiers_shape() {
        let uuid = random_uuid();
        assert_eq!(uuid.len(), 36);
        assert_eq!(uuid.matches('-').count(), 4);

        let mac = random_mac();
        assert_eq!(mac.len(), 17);
        assert_eq!(mac.matches(':').count(), 5);
    }
}
