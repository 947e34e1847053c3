//! Event and data-stream channels of the AirPlay tunnel
//!
//! The event channel is a reverse-direction HTTP endpoint: the device sends
//! requests and tears the session down unless each one is answered with a
//! 200 OK. The data-stream channel carries the media-remote protocol in
//! 32-byte framed messages, with a link-level `rply` acknowledgment for
//! every inbound `sync` frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

use super::hap::{HapDecryptor, HapEncryptor};
use super::http::parse_request;
use crate::error::{RemoteError, Result};
use crate::mrp::varint;
use crate::protocol::plist::{self, PlistValue};
use crate::types::DisconnectReason;

/// Data-stream frame header length
pub const FRAME_HEADER_LEN: usize = 32;

/// Frame type for application messages
pub const TYPE_SYNC: [u8; 12] = *b"sync\0\0\0\0\0\0\0\0";
/// Frame type for link-level acknowledgments
pub const TYPE_RPLY: [u8; 12] = *b"rply\0\0\0\0\0\0\0\0";
/// Command for application messages
pub const COMMAND_COMM: [u8; 4] = *b"comm";

/// One data-stream frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// 12-byte frame type
    pub frame_type: [u8; 12],
    /// 4-byte command
    pub command: [u8; 4],
    /// Sequence number
    pub seqno: u64,
    /// Payload following the header
    pub payload: Vec<u8>,
}

impl DataFrame {
    /// Encode to wire bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let total = FRAME_HEADER_LEN + self.payload.len();
        let mut output = Vec::with_capacity(total);
        #[allow(clippy::cast_possible_truncation)]
        output.extend_from_slice(&(total as u32).to_be_bytes());
        output.extend_from_slice(&self.frame_type);
        output.extend_from_slice(&self.command);
        output.extend_from_slice(&self.seqno.to_be_bytes());
        output.extend_from_slice(&[0u8; 4]);
        output.extend_from_slice(&self.payload);
        output
    }

    /// Parse one frame from the front of `buffer`
    ///
    /// Returns `None` until the declared total size is available.
    #[must_use]
    pub fn parse(buffer: &[u8]) -> Option<(DataFrame, usize)> {
        if buffer.len() < FRAME_HEADER_LEN {
            return None;
        }
        let total = u32::from_be_bytes(buffer[0..4].try_into().unwrap()) as usize;
        if total < FRAME_HEADER_LEN || buffer.len() < total {
            return None;
        }

        let mut frame_type = [0u8; 12];
        frame_type.copy_from_slice(&buffer[4..16]);
        let mut command = [0u8; 4];
        command.copy_from_slice(&buffer[16..20]);
        let seqno = u64::from_be_bytes(buffer[20..28].try_into().unwrap());

        Some((
            DataFrame {
                frame_type,
                command,
                seqno,
                payload: buffer[FRAME_HEADER_LEN..total].to_vec(),
            },
            total,
        ))
    }
}

/// Split a payload's `data` bytes into individual protocol messages
///
/// Messages are varint-length-prefixed, except that a payload starting with
/// 0x08 (the message type field's key) is treated as a single unprefixed
/// message; some device-originated control messages omit the prefix. This
/// heuristic is reproduced from observed device behavior, not redesigned.
#[must_use]
pub fn split_messages(data: &[u8]) -> Vec<Vec<u8>> {
    if data.first() == Some(&0x08) {
        return vec![data.to_vec()];
    }

    let mut messages = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let Some((len, consumed)) = varint::read(&data[pos..]) else {
            tracing::warn!("truncated varint in message payload");
            break;
        };
        pos += consumed;
        let len = len as usize;
        if pos + len > data.len() {
            tracing::warn!("message length exceeds payload");
            break;
        }
        messages.push(data[pos..pos + len].to_vec());
        pos += len;
    }
    messages
}

/// Wrap serialized protocol messages into the data-stream plist payload
///
/// # Errors
/// Returns an error if plist encoding fails.
pub fn wrap_payload(message: &[u8]) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(message.len() + 4);
    varint::write(message.len() as u64, &mut data);
    data.extend_from_slice(message);

    let value = PlistValue::dict([(
        "params",
        PlistValue::dict([("data", PlistValue::Data(data))]),
    )]);
    Ok(plist::encode(&value)?)
}

fn unwrap_payload(payload: &[u8]) -> Result<Vec<Vec<u8>>> {
    let value = plist::decode(payload)?;
    let data = value
        .get("params")
        .and_then(|p| p.get("data"))
        .and_then(PlistValue::as_bytes)
        .ok_or_else(|| RemoteError::InvalidResponse {
            message: "data frame payload without params.data".to_string(),
        })?;
    Ok(split_messages(data))
}

struct DataShared {
    writer: Mutex<OwnedWriteHalf>,
    encryptor: Mutex<HapEncryptor>,
    disconnect_tx: broadcast::Sender<DisconnectReason>,
    closed: std::sync::Mutex<bool>,
}

impl DataShared {
    async fn send_frame(&self, frame: DataFrame) -> Result<()> {
        let wire = {
            let mut encryptor = self.encryptor.lock().await;
            encryptor.encrypt(&frame.encode())?
        };
        let mut writer = self.writer.lock().await;
        writer.write_all(&wire).await?;
        Ok(())
    }

    fn close(&self, reason: DisconnectReason) {
        let mut closed = self.closed.lock().unwrap();
        if *closed {
            return;
        }
        *closed = true;
        tracing::debug!(?reason, "data channel closed");
        let _ = self.disconnect_tx.send(reason);
    }
}

/// The data-stream channel carrying the media-remote protocol
pub struct DataStreamChannel {
    shared: Arc<DataShared>,
    seqno: AtomicU64,
    recv_task: JoinHandle<()>,
}

impl DataStreamChannel {
    /// Connect and start the receive loop
    ///
    /// Inbound protocol messages are delivered through `inbound_tx`.
    ///
    /// # Errors
    /// Returns an error if the connection or key setup fails.
    pub async fn connect(
        host: &str,
        port: u16,
        output_key: &[u8; 32],
        input_key: &[u8; 32],
        inbound_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            RemoteError::ConnectionFailed {
                host: host.to_string(),
                port,
                message: e.to_string(),
            }
        })?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        let (disconnect_tx, _) = broadcast::channel(4);
        let shared = Arc::new(DataShared {
            writer: Mutex::new(writer),
            encryptor: Mutex::new(HapEncryptor::new(output_key)?),
            disconnect_tx,
            closed: std::sync::Mutex::new(false),
        });

        let decryptor = HapDecryptor::new(input_key)?;
        let recv_task = tokio::spawn(data_receive_loop(
            reader,
            decryptor,
            Arc::clone(&shared),
            inbound_tx,
        ));

        // Start well clear of device-originated numbering.
        let seqno = rand::thread_rng().gen_range(0x1_0000_0000u64..0x2_0000_0000u64);

        Ok(Self {
            shared,
            seqno: AtomicU64::new(seqno),
            recv_task,
        })
    }

    /// Send one serialized protocol message
    ///
    /// # Errors
    /// Returns an error on encoding, encryption or socket failure.
    pub async fn send_message(&self, message: &[u8]) -> Result<()> {
        let frame = DataFrame {
            frame_type: TYPE_SYNC,
            command: COMMAND_COMM,
            seqno: self.seqno.fetch_add(1, Ordering::SeqCst),
            payload: wrap_payload(message)?,
        };
        self.shared.send_frame(frame).await
    }

    /// Subscribe to the disconnect notification
    #[must_use]
    pub fn disconnects(&self) -> broadcast::Receiver<DisconnectReason> {
        self.shared.disconnect_tx.subscribe()
    }

    /// Tear the channel down
    pub fn shutdown(&self) {
        self.recv_task.abort();
        self.shared.close(DisconnectReason::Requested);
    }
}

impl Drop for DataStreamChannel {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn data_receive_loop(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    mut decryptor: HapDecryptor,
    shared: Arc<DataShared>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
) {
    let mut plain = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                shared.close(DisconnectReason::RemoteClosed);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                shared.close(DisconnectReason::Error(e.to_string()));
                return;
            }
        };

        match decryptor.feed(&chunk[..n]) {
            Ok(bytes) => plain.extend_from_slice(&bytes),
            Err(e) => {
                shared.close(DisconnectReason::Error(e.to_string()));
                return;
            }
        }

        while let Some((frame, consumed)) = DataFrame::parse(&plain) {
            plain.drain(..consumed);

            if frame.frame_type != TYPE_SYNC {
                tracing::trace!(seqno = frame.seqno, "ignoring non-sync frame");
                continue;
            }

            // Link-level acknowledgment at the same sequence number; this
            // is not an application response.
            let reply = DataFrame {
                frame_type: TYPE_RPLY,
                command: [0u8; 4],
                seqno: frame.seqno,
                payload: Vec::new(),
            };
            if let Err(e) = shared.send_frame(reply).await {
                shared.close(DisconnectReason::Error(e.to_string()));
                return;
            }

            if frame.payload.is_empty() {
                continue;
            }
            match unwrap_payload(&frame.payload) {
                Ok(messages) => {
                    for message in messages {
                        if inbound_tx.send(message).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "undecodable data frame payload"),
            }
        }
    }
}

/// The event channel: answers device requests to keep the session alive
pub struct EventChannel {
    task: JoinHandle<()>,
    disconnect_tx: broadcast::Sender<DisconnectReason>,
}

impl EventChannel {
    /// Connect and start answering device requests
    ///
    /// # Errors
    /// Returns an error if the connection or key setup fails.
    pub async fn connect(
        host: &str,
        port: u16,
        output_key: &[u8; 32],
        input_key: &[u8; 32],
    ) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            RemoteError::ConnectionFailed {
                host: host.to_string(),
                port,
                message: e.to_string(),
            }
        })?;
        let _ = stream.set_nodelay(true);

        let encryptor = HapEncryptor::new(output_key)?;
        let decryptor = HapDecryptor::new(input_key)?;
        let (disconnect_tx, _) = broadcast::channel(4);

        let task = tokio::spawn(event_loop(
            stream,
            encryptor,
            decryptor,
            disconnect_tx.clone(),
        ));

        Ok(Self {
            task,
            disconnect_tx,
        })
    }

    /// Subscribe to the disconnect notification
    #[must_use]
    pub fn disconnects(&self) -> broadcast::Receiver<DisconnectReason> {
        self.disconnect_tx.subscribe()
    }

    /// Tear the channel down
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn event_loop(
    mut stream: TcpStream,
    mut encryptor: HapEncryptor,
    mut decryptor: HapDecryptor,
    disconnect_tx: broadcast::Sender<DisconnectReason>,
) {
    let mut plain = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => {
                let _ = disconnect_tx.send(DisconnectReason::RemoteClosed);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                let _ = disconnect_tx.send(DisconnectReason::Error(e.to_string()));
                return;
            }
        };

        match decryptor.feed(&chunk[..n]) {
            Ok(bytes) => plain.extend_from_slice(&bytes),
            Err(e) => {
                let _ = disconnect_tx.send(DisconnectReason::Error(e.to_string()));
                return;
            }
        }

        loop {
            let parsed = match parse_request(&plain) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => break,
                Err(e) => {
                    let _ = disconnect_tx.send(DisconnectReason::Error(e.to_string()));
                    return;
                }
            };
            let (request, consumed) = parsed;
            plain.drain(..consumed);

            tracing::trace!(method = %request.method, uri = %request.uri, "event request");

            // The device tears the session down unless every request gets
            // a 200 with echoed CSeq/Server headers.
            let mut response = format!("{} 200 OK\r\n", request.protocol);
            if let Some(cseq) = request.get_header("CSeq") {
                response.push_str(&format!("CSeq: {cseq}\r\n"));
            }
            if let Some(server) = request.get_header("Server") {
                response.push_str(&format!("Server: {server}\r\n"));
            }
            response.push_str("Content-Length: 0\r\n\r\n");

            let wire = match encryptor.encrypt(response.as_bytes()) {
                Ok(wire) => wire,
                Err(e) => {
                    let _ = disconnect_tx.send(DisconnectReason::Error(e.to_string()));
                    return;
                }
            };
            if let Err(e) = stream.write_all(&wire).await {
                let _ = disconnect_tx.send(DisconnectReason::Error(e.to_string()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = DataFrame {
            frame_type: TYPE_SYNC,
            command: COMMAND_COMM,
            seqno: 0x1_2345_6789,
            payload: vec![1, 2, 3],
        };
        let wire = frame.encode();
        assert_eq!(wire.len(), 35);
        assert_eq!(&wire[0..4], &35u32.to_be_bytes());

        let (parsed, consumed) = DataFrame::parse(&wire).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(consumed, 35);
    }

    #[test]
    fn test_frame_partial_input() {
        let frame = DataFrame {
            frame_type: TYPE_RPLY,
            command: [0; 4],
            seqno: 1,
            payload: vec![9; 10],
        };
        let wire = frame.encode();
        assert!(DataFrame::parse(&wire[..31]).is_none());
        assert!(DataFrame::parse(&wire[..40]).is_none());
    }

    #[test]
    fn test_split_prefixed_messages() {
        let mut data = Vec::new();
        varint::write(3, &mut data);
        data.extend_from_slice(&[0x10, 0x20, 0x30]);
        varint::write(2, &mut data);
        data.extend_from_slice(&[0x40, 0x50]);

        let messages = split_messages(&data);
        assert_eq!(messages, vec![vec![0x10, 0x20, 0x30], vec![0x40, 0x50]]);
    }

    #[test]
    fn test_split_unprefixed_heuristic() {
        // Starts with the 0x08 field key: one unprefixed message.
        let data = [0x08, 0x0F, 0x12, 0x00];
        let messages = split_messages(&data);
        assert_eq!(messages, vec![data.to_vec()]);
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let message = vec![0x12, 0x34, 0x56];
        let payload = wrap_payload(&message).unwrap();
        let messages = unwrap_payload(&payload).unwrap();
        assert_eq!(messages, vec![message]);
    }

    #[test]
    fn test_split_truncated_length_stops() {
        let mut data = Vec::new();
        varint::write(100, &mut data);
        data.extend_from_slice(&[1, 2, 3]);
        assert!(split_messages(&data).is_empty());
    }
}
