//! Companion link connection
//!
//! Owns the byte stream: a receive task parses frames out of an append-only
//! buffer, decrypts encrypted frame types once transport encryption is on,
//! and dispatches decoded envelopes. Requests correlate to responses by
//! transaction id through a mutex-guarded pending map; the mutex matters
//! because request timeouts fire from a different execution context than
//! the receive task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::crypto::{CompanionDecryptor, CompanionEncryptor};
use super::envelope::{self, MessageType};
use super::frame::{Frame, FrameType};
use crate::error::{RemoteError, Result};
use crate::protocol::opack::{self, Value};
use crate::protocol::pairing::TransportKeys;
use crate::types::DisconnectReason;

/// An unsolicited event from the device
#[derive(Debug, Clone)]
pub struct CompanionEvent {
    /// Event name from the envelope
    pub name: String,
    /// Event content
    pub content: Value,
}

struct Shared {
    pending: StdMutex<HashMap<i64, oneshot::Sender<Value>>>,
    auth_waiter: StdMutex<Option<oneshot::Sender<Value>>>,
    decryptor: StdMutex<Option<CompanionDecryptor>>,
    event_tx: broadcast::Sender<CompanionEvent>,
    disconnect_tx: broadcast::Sender<DisconnectReason>,
    closed: StdMutex<bool>,
}

impl Shared {
    /// Tear down once; later calls are ignored
    fn close(&self, reason: DisconnectReason) {
        {
            let mut closed = self.closed.lock().unwrap();
            if *closed {
                return;
            }
            *closed = true;
        }
        tracing::debug!(?reason, "companion connection closed");
        self.pending.lock().unwrap().clear();
        self.auth_waiter.lock().unwrap().take();
        let _ = self.disconnect_tx.send(reason);
    }
}

/// Connection to the device's Companion service
pub struct CompanionConnection {
    writer: Mutex<OwnedWriteHalf>,
    encryptor: Mutex<Option<CompanionEncryptor>>,
    shared: Arc<Shared>,
    recv_task: JoinHandle<()>,
    next_xid: AtomicI64,
    request_timeout: Duration,
}

impl CompanionConnection {
    /// Connect to a Companion service endpoint
    ///
    /// # Errors
    /// Returns `ConnectionFailed` if the TCP connection cannot be opened.
    pub async fn connect(host: &str, port: u16, request_timeout: Duration) -> Result<Self> {
        tracing::debug!(host, port, "connecting companion link");
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            RemoteError::ConnectionFailed {
                host: host.to_string(),
                port,
                message: e.to_string(),
            }
        })?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        let (event_tx, _) = broadcast::channel(32);
        let (disconnect_tx, _) = broadcast::channel(4);
        let shared = Arc::new(Shared {
            pending: StdMutex::new(HashMap::new()),
            auth_waiter: StdMutex::new(None),
            decryptor: StdMutex::new(None),
            event_tx,
            disconnect_tx,
            closed: StdMutex::new(false),
        });

        let recv_task = tokio::spawn(receive_loop(reader, Arc::clone(&shared)));

        Ok(Self {
            writer: Mutex::new(writer),
            encryptor: Mutex::new(None),
            shared,
            recv_task,
            next_xid: AtomicI64::new(rand::thread_rng().gen_range(1..0x1_0000)),
            request_timeout,
        })
    }

    /// Switch the transport to encrypted operation
    ///
    /// Applies to every subsequent frame whose type is encrypted; the keys
    /// come from a just-completed Pair-Verify and are never reused.
    ///
    /// # Errors
    /// Returns an error if key setup fails.
    pub async fn enable_encryption(&self, keys: TransportKeys) -> Result<()> {
        *self.encryptor.lock().await = Some(CompanionEncryptor::new(&keys.encrypt_key)?);
        *self.shared.decryptor.lock().unwrap() =
            Some(CompanionDecryptor::new(&keys.decrypt_key)?);
        tracing::debug!("companion transport encryption enabled");
        Ok(())
    }

    /// Send one frame, encrypting the payload if applicable
    ///
    /// # Errors
    /// Returns an error on encryption or socket failure.
    pub async fn send_frame(&self, frame_type: FrameType, payload: Vec<u8>) -> Result<()> {
        let payload = {
            let mut encryptor = self.encryptor.lock().await;
            match encryptor.as_mut() {
                Some(enc) if frame_type.is_encrypted_type() => {
                    enc.encrypt(frame_type, &payload)?
                }
                _ => payload,
            }
        };

        let wire = Frame::new(frame_type, payload).serialize()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&wire).await?;
        Ok(())
    }

    /// Send a pairing envelope and await the device's next pairing frame
    ///
    /// Pairing exchanges are strictly alternating, so correlation is a
    /// single waiting slot rather than a transaction id.
    ///
    /// # Errors
    /// Returns `Timeout` if no pairing frame arrives in time.
    pub async fn exchange_auth(&self, frame_type: FrameType, message: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        *self.shared.auth_waiter.lock().unwrap() = Some(tx);

        self.send_frame(frame_type, opack::encode(&message)?).await?;

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(RemoteError::Disconnected {
                reason: "connection closed during pairing".to_string(),
            }),
            Err(_) => {
                self.shared.auth_waiter.lock().unwrap().take();
                Err(RemoteError::Timeout)
            }
        }
    }

    /// Send a request and await the response with the matching transaction id
    ///
    /// # Errors
    /// Returns `Timeout` if no response arrives in time.
    pub async fn request(&self, name: &str, content: Value) -> Result<Value> {
        let xid = self.next_xid.fetch_add(1, Ordering::SeqCst);
        let message = envelope::request(name, xid, content);

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(xid, tx);

        if let Err(e) = self.send_frame(FrameType::EOpack, opack::encode(&message)?).await {
            self.shared.pending.lock().unwrap().remove(&xid);
            return Err(e);
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(RemoteError::Disconnected {
                reason: "connection closed".to_string(),
            }),
            Err(_) => {
                self.shared.pending.lock().unwrap().remove(&xid);
                Err(RemoteError::Timeout)
            }
        }
    }

    /// Send a fire-and-forget event
    ///
    /// # Errors
    /// Returns an error on encoding or socket failure.
    pub async fn send_event(&self, name: &str, content: Value) -> Result<()> {
        let message = envelope::event(name, content);
        self.send_frame(FrameType::EOpack, opack::encode(&message)?)
            .await
    }

    /// Subscribe to unsolicited device events
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<CompanionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Subscribe to the disconnect notification
    #[must_use]
    pub fn disconnects(&self) -> broadcast::Receiver<DisconnectReason> {
        self.shared.disconnect_tx.subscribe()
    }

    /// Tear down the connection, clearing all pending handlers
    pub async fn disconnect(&self) {
        self.recv_task.abort();
        self.shared.close(DisconnectReason::Requested);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl Drop for CompanionConnection {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn receive_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>) {
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        match reader.read_buf(&mut buffer).await {
            Ok(0) => {
                shared.close(DisconnectReason::RemoteClosed);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                shared.close(DisconnectReason::Error(e.to_string()));
                return;
            }
        }

        while let Some((frame, consumed)) = Frame::parse(&buffer) {
            buffer.advance(consumed);
            if let Err(e) = handle_frame(&shared, frame) {
                // Decrypt or decode failures desynchronize the stream; the
                // channel cannot continue.
                shared.close(DisconnectReason::Error(e.to_string()));
                return;
            }
        }
    }
}

fn handle_frame(shared: &Shared, frame: Frame) -> Result<()> {
    tracing::trace!(frame_type = ?frame.frame_type, len = frame.payload.len(), "received frame");

    let payload = if frame.frame_type.is_encrypted_type() {
        let mut decryptor = shared.decryptor.lock().unwrap();
        match decryptor.as_mut() {
            Some(dec) => dec.decrypt(frame.frame_type, &frame.payload)?,
            None => frame.payload,
        }
    } else {
        frame.payload
    };

    if frame.frame_type.is_auth_type() {
        let value = opack::decode(&payload)?;
        if let Some(tx) = shared.auth_waiter.lock().unwrap().take() {
            let _ = tx.send(value);
        } else {
            tracing::warn!("unsolicited pairing frame dropped");
        }
        return Ok(());
    }

    if frame.frame_type.is_opack_type() {
        let value = opack::decode(&payload)?;
        match envelope::message_type(&value) {
            Some(MessageType::Response) => {
                if let Some(id) = envelope::xid(&value) {
                    let handler = shared.pending.lock().unwrap().remove(&id);
                    if let Some(tx) = handler {
                        let _ = tx.send(value);
                    } else {
                        // Routine: the waiter timed out or nobody cared.
                        tracing::debug!(xid = id, "response without a pending handler");
                    }
                }
            }
            Some(MessageType::Event) => {
                let name = value
                    .get(envelope::keys::NAME)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let content = value
                    .get(envelope::keys::CONTENT)
                    .cloned()
                    .unwrap_or(Value::Null);
                let _ = shared.event_tx.send(CompanionEvent { name, content });
            }
            Some(MessageType::Request) | None => {
                tracing::debug!("ignoring device-initiated request");
            }
        }
        return Ok(());
    }

    Ok(())
}
