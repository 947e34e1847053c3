//! Pair-Verify over the AirPlay control channel
//!
//! The same ephemeral-key state machine as the Companion link, driven by
//! HTTP request/response instead of frames. The resulting shared secret is
//! the root for every tunnel channel's key derivation.

use super::http::{HttpConnection, HttpRequest};
use crate::error::{RemoteError, Result};
use crate::protocol::pairing::{Credentials, PairVerify};

const PAIR_VERIFY_PATH: &str = "/pair-verify";
const USER_AGENT: &str = "AirPlay/320.20";

/// Run the two round-trip verify exchange, returning the shared secret
///
/// # Errors
/// Propagates in-band device errors (`ServerError` with the code
/// preserved), identity or signature failures, and transport errors. A
/// non-2xx status fails with `InvalidResponse`.
pub async fn pair_verify(
    connection: &mut HttpConnection,
    credentials: &Credentials,
) -> Result<[u8; 32]> {
    let mut verify = PairVerify::new(credentials.clone());

    let response = post_pairing(connection, verify.start()).await?;
    let m3 = verify.process_m2(&response)?;

    let response = post_pairing(connection, m3).await?;
    verify.process_m4(&response)?;

    let shared = verify
        .shared_secret()
        .copied()
        .ok_or_else(|| RemoteError::InvalidState {
            message: "verify finished without a shared secret".to_string(),
        })?;
    tracing::debug!("airplay pair-verify complete");
    Ok(shared)
}

async fn post_pairing(connection: &mut HttpConnection, tlv: Vec<u8>) -> Result<Vec<u8>> {
    let cseq = connection.next_cseq();
    let request = HttpRequest::new("POST", PAIR_VERIFY_PATH)
        .protocol("HTTP/1.1")
        .header("User-Agent", USER_AGENT)
        .header("Content-Type", "application/octet-stream")
        .header("CSeq", cseq.to_string())
        .body(tlv);

    let response = connection.send_request(request).await?;
    if !response.is_success() {
        return Err(RemoteError::InvalidResponse {
            message: format!("pair-verify rejected with status {}", response.status),
        });
    }
    Ok(response.body)
}
