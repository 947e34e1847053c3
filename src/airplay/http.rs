//! HTTP/RTSP-style client for the AirPlay control channel
//!
//! Requests and responses are textual with an optional binary body sized by
//! Content-Length. Once channel encryption is enabled, whole request bytes
//! pass through the HAP encryptor and received bytes through the decryptor
//! before parsing.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::hap::{HapDecryptor, HapEncryptor};
use crate::error::{RemoteError, Result};
use crate::protocol::plist::PlistValue;

/// An outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method (GET, POST, SETUP, RECORD, ...)
    pub method: String,
    /// Request URI
    pub uri: String,
    /// Protocol token, e.g. `RTSP/1.0` or `HTTP/1.1`
    pub protocol: String,
    /// Headers in insertion order
    pub headers: Vec<(String, String)>,
    /// Body (may be empty)
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Create a request with the given method and URI
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            protocol: "RTSP/1.0".to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Override the protocol token
    #[must_use]
    pub fn protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.to_string();
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a raw body
    #[must_use]
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Set a binary plist body with its content type
    ///
    /// # Errors
    /// Returns an error if plist encoding fails.
    pub fn body_plist(self, value: &PlistValue) -> Result<Self> {
        let body = crate::protocol::plist::encode(value)?;
        Ok(self
            .header("Content-Type", "application/x-apple-binary-plist")
            .body(body))
    }

    /// Encode to wire bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(256 + self.body.len());

        output.extend_from_slice(self.method.as_bytes());
        output.push(b' ');
        output.extend_from_slice(self.uri.as_bytes());
        output.push(b' ');
        output.extend_from_slice(self.protocol.as_bytes());
        output.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            output.extend_from_slice(name.as_bytes());
            output.extend_from_slice(b": ");
            output.extend_from_slice(value.as_bytes());
            output.extend_from_slice(b"\r\n");
        }

        let len_header = format!("Content-Length: {}\r\n", self.body.len());
        output.extend_from_slice(len_header.as_bytes());
        output.extend_from_slice(b"\r\n");
        output.extend_from_slice(&self.body);

        output
    }

    /// Get a header value, case-insensitive
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Protocol token from the status line
    pub protocol: String,
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Headers in wire order
    pub headers: Vec<(String, String)>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Whether this is a 2xx response
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get a header value, case-insensitive
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parse the body as a binary plist
    ///
    /// # Errors
    /// Returns an error if the body is not a valid binary plist.
    pub fn body_as_plist(&self) -> Result<PlistValue> {
        Ok(crate::protocol::plist::decode(&self.body)?)
    }
}

/// Try to parse one complete response from the front of `buffer`
///
/// Returns the response and the bytes consumed once the header terminator
/// is present and the declared body length is fully buffered.
pub fn parse_response(buffer: &[u8]) -> Result<Option<(HttpResponse, usize)>> {
    let Some(header_end) = find_terminator(buffer) else {
        return Ok(None);
    };

    let header_text = std::str::from_utf8(&buffer[..header_end]).map_err(|_| {
        RemoteError::InvalidResponse {
            message: "non-UTF8 response header".to_string(),
        }
    })?;
    let mut lines = header_text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let protocol = parts
        .next()
        .ok_or_else(|| invalid("missing protocol"))?
        .to_string();
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("bad status code"))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let headers = parse_headers(lines)?;
    let content_length = header_value(&headers, "Content-Length")
        .map(str::parse::<usize>)
        .transpose()
        .map_err(|_| invalid("bad content length"))?
        .unwrap_or(0);

    let body_start = header_end + 4;
    if buffer.len() < body_start + content_length {
        return Ok(None);
    }

    Ok(Some((
        HttpResponse {
            protocol,
            status,
            reason,
            headers,
            body: buffer[body_start..body_start + content_length].to_vec(),
        },
        body_start + content_length,
    )))
}

/// Try to parse one complete request (event channel direction)
pub fn parse_request(buffer: &[u8]) -> Result<Option<(HttpRequest, usize)>> {
    let Some(header_end) = find_terminator(buffer) else {
        return Ok(None);
    };

    let header_text = std::str::from_utf8(&buffer[..header_end]).map_err(|_| {
        RemoteError::InvalidResponse {
            message: "non-UTF8 request header".to_string(),
        }
    })?;
    let mut lines = header_text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.splitn(3, ' ');
    let method = parts
        .next()
        .ok_or_else(|| invalid("missing method"))?
        .to_string();
    let uri = parts
        .next()
        .ok_or_else(|| invalid("missing uri"))?
        .to_string();
    let protocol = parts.next().unwrap_or("RTSP/1.0").to_string();

    let headers = parse_headers(lines)?;
    let content_length = header_value(&headers, "Content-Length")
        .map(str::parse::<usize>)
        .transpose()
        .map_err(|_| invalid("bad content length"))?
        .unwrap_or(0);

    let body_start = header_end + 4;
    if buffer.len() < body_start + content_length {
        return Ok(None);
    }

    Ok(Some((
        HttpRequest {
            method,
            uri,
            protocol,
            headers,
            body: buffer[body_start..body_start + content_length].to_vec(),
        },
        body_start + content_length,
    )))
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| invalid("malformed header line"))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn invalid(message: &str) -> RemoteError {
    RemoteError::InvalidResponse {
        message: message.to_string(),
    }
}

/// Sequential request/response connection to an AirPlay channel port
pub struct HttpConnection {
    stream: TcpStream,
    encryptor: Option<HapEncryptor>,
    decryptor: Option<HapDecryptor>,
    /// Decrypted-but-unparsed bytes
    buffer: Vec<u8>,
    cseq: u32,
}

impl HttpConnection {
    /// Connect to the given host and port
    ///
    /// # Errors
    /// Returns `ConnectionFailed` if the TCP connection cannot be opened.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            RemoteError::ConnectionFailed {
                host: host.to_string(),
                port,
                message: e.to_string(),
            }
        })?;
        let _ = stream.set_nodelay(true);

        Ok(Self {
            stream,
            encryptor: None,
            decryptor: None,
            buffer: Vec::new(),
            cseq: 0,
        })
    }

    /// Enable HAP encryption with this channel's directional keys
    ///
    /// # Errors
    /// Returns an error if key setup fails.
    pub fn enable_encryption(
        &mut self,
        output_key: &[u8; 32],
        input_key: &[u8; 32],
    ) -> Result<()> {
        self.encryptor = Some(HapEncryptor::new(output_key)?);
        self.decryptor = Some(HapDecryptor::new(input_key)?);
        Ok(())
    }

    /// Next CSeq value for this connection
    pub fn next_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    /// Send a request and wait for its response
    ///
    /// The channel is strictly sequential; there is never more than one
    /// request in flight.
    ///
    /// # Errors
    /// Returns an error on transport failure, AEAD failure (fatal for the
    /// channel) or malformed response.
    pub async fn send_request(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        tracing::debug!(method = %request.method, uri = %request.uri, "sending request");

        let mut wire = request.encode();
        if let Some(enc) = self.encryptor.as_mut() {
            wire = enc.encrypt(&wire)?;
        }
        self.stream.write_all(&wire).await?;

        loop {
            if let Some((response, consumed)) = parse_response(&self.buffer)? {
                self.buffer.drain(..consumed);
                tracing::debug!(status = response.status, "received response");
                return Ok(response);
            }

            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(RemoteError::Disconnected {
                    reason: "control channel closed".to_string(),
                });
            }

            match self.decryptor.as_mut() {
                Some(dec) => {
                    let plain = dec.feed(&chunk[..n])?;
                    self.buffer.extend_from_slice(&plain);
                }
                None => self.buffer.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Shut the connection down
    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encode_shape() {
        let request = HttpRequest::new("SETUP", "rtsp://192.0.2.1/1234")
            .header("CSeq", "1")
            .body(vec![0xAA, 0xBB]);
        let encoded = request.encode();
        let text = String::from_utf8_lossy(&encoded[..encoded.len() - 2]);

        assert!(text.starts_with("SETUP rtsp://192.0.2.1/1234 RTSP/1.0\r\n"));
        assert!(text.contains("CSeq: 1\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(encoded.ends_with(&[0xAA, 0xBB]));
    }

    #[test]
    fn test_parse_response_with_body() {
        let wire = b"RTSP/1.0 200 OK\r\nCSeq: 3\r\nContent-Length: 5\r\n\r\nhello";
        let (response, consumed) = parse_response(wire).unwrap().unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.get_header("cseq"), Some("3"));
        assert_eq!(response.body, b"hello");
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn test_parse_response_incomplete() {
        let wire = b"RTSP/1.0 200 OK\r\nContent-Length: 10\r\n\r\nhell";
        assert!(parse_response(wire).unwrap().is_none());

        let wire = b"RTSP/1.0 200 OK\r\nCon";
        assert!(parse_response(wire).unwrap().is_none());
    }

    #[test]
    fn test_parse_response_no_body() {
        let wire = b"HTTP/1.1 200 OK\r\n\r\nEXTRA";
        let (response, consumed) = parse_response(wire).unwrap().unwrap();
        assert_eq!(response.protocol, "HTTP/1.1");
        assert!(response.body.is_empty());
        // Trailing bytes stay in the buffer for the next response
        assert_eq!(consumed, wire.len() - 5);
    }

    #[test]
    fn test_parse_request_roundtrip() {
        let wire = b"POST /command RTSP/1.0\r\nCSeq: 7\r\nContent-Length: 0\r\n\r\n";
        let (request, consumed) = parse_request(wire).unwrap().unwrap();

        assert_eq!(request.method, "POST");
        assert_eq!(request.uri, "/command");
        assert_eq!(request.get_header("CSeq"), Some("7"));
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn test_parse_garbage_status() {
        let wire = b"RTSP/1.0 abc OK\r\n\r\n";
        assert!(parse_response(wire).is_err());
    }
}
