//! High-level Companion operations over an established connection

use std::sync::Arc;

use super::connection::CompanionConnection;
use super::envelope;
use super::frame::FrameType;
use crate::error::{RemoteError, Result};
use crate::protocol::opack::{DictBuilder, Value};
use crate::protocol::pairing::{Credentials, PairSetup, PairVerify};
use crate::types::Button;

/// Button press phases within a HID command
const BUTTON_DOWN: i64 = 1;
const BUTTON_UP: i64 = 2;

/// A launchable application reported by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    /// Bundle identifier used for launching
    pub bundle_id: String,
    /// Display name
    pub name: String,
}

/// Pair-Setup paused between M2 and M3, waiting for the on-screen PIN
pub struct PairingSession {
    setup: PairSetup,
    m2: Vec<u8>,
}

/// Companion command surface
pub struct CompanionApi {
    connection: Arc<CompanionConnection>,
}

impl CompanionApi {
    /// Wrap an established connection
    #[must_use]
    pub fn new(connection: Arc<CompanionConnection>) -> Self {
        Self { connection }
    }

    /// Access the underlying connection
    #[must_use]
    pub fn connection(&self) -> &Arc<CompanionConnection> {
        &self.connection
    }

    /// Begin first-time pairing: send M1 and wait for the device's M2
    ///
    /// The device shows its PIN once M1 arrives; the returned session waits
    /// for that PIN.
    ///
    /// # Errors
    /// Propagates handshake and transport errors.
    pub async fn start_pair_setup(&self, client_id: &str) -> Result<PairingSession> {
        let setup = PairSetup::new(client_id)?;
        let response = self
            .connection
            .exchange_auth(FrameType::PsStart, envelope::pair_setup(setup.start()))
            .await?;
        let m2 = expect_pairing_data(&response)?.to_vec();

        Ok(PairingSession { setup, m2 })
    }

    /// Complete pairing with the PIN shown on screen
    ///
    /// # Errors
    /// A wrong PIN surfaces as `PairingError::ProofVerificationFailed` (or a
    /// device-reported `ServerError`); neither is retried internally.
    pub async fn finish_pair_setup(
        &self,
        mut session: PairingSession,
        pin: &str,
    ) -> Result<Credentials> {
        session.setup.set_pin(pin);

        let m3 = session.setup.process_m2(&session.m2)?;
        let response = self
            .connection
            .exchange_auth(FrameType::PsNext, envelope::pair_setup(m3))
            .await?;

        let m5 = session.setup.process_m4(expect_pairing_data(&response)?)?;
        let response = self
            .connection
            .exchange_auth(FrameType::PsNext, envelope::pair_setup(m5))
            .await?;

        let credentials = session.setup.process_m6(expect_pairing_data(&response)?)?;
        tracing::info!(server_id = %credentials.server_id, "pair-setup complete");
        Ok(credentials)
    }

    /// Re-authenticate with stored credentials and switch on encryption
    ///
    /// # Errors
    /// `IdentityMismatch` and signature failures are fatal; the caller
    /// decides whether to fall back to fresh pairing.
    pub async fn pair_verify(&self, credentials: &Credentials) -> Result<()> {
        let mut verify = PairVerify::new(credentials.clone());

        let response = self
            .connection
            .exchange_auth(FrameType::PvStart, envelope::pair_verify(verify.start()))
            .await?;
        let m3 = verify.process_m2(expect_pairing_data(&response)?)?;

        let response = self
            .connection
            .exchange_auth(FrameType::PvNext, envelope::pair_verify(m3))
            .await?;
        verify.process_m4(expect_pairing_data(&response)?)?;

        let keys = verify
            .transport_keys()?
            .ok_or_else(|| RemoteError::InvalidState {
                message: "verify finished without a shared secret".to_string(),
            })?;
        self.connection.enable_encryption(keys).await?;
        tracing::info!("pair-verify complete, companion link encrypted");
        Ok(())
    }

    /// Press and release a remote button
    ///
    /// # Errors
    /// Propagates transport errors.
    pub async fn press_button(&self, button: Button) -> Result<()> {
        self.send_hid(button, BUTTON_DOWN).await?;
        self.send_hid(button, BUTTON_UP).await
    }

    async fn send_hid(&self, button: Button, state: i64) -> Result<()> {
        let content = DictBuilder::new()
            .entry(envelope::keys::BUTTON_STATE, Value::Int(state))
            .entry(envelope::keys::HID_COMMAND, Value::Int(button.code()))
            .build();
        self.connection.request("_hidC", content).await?;
        Ok(())
    }

    /// Launch an app by bundle identifier
    ///
    /// # Errors
    /// Propagates transport errors.
    pub async fn launch_app(&self, bundle_id: &str) -> Result<()> {
        let content = DictBuilder::new()
            .entry("_bundleID", Value::string(bundle_id))
            .build();
        self.connection.request("_launchApp", content).await?;
        Ok(())
    }

    /// Fetch the list of launchable applications
    ///
    /// # Errors
    /// Propagates transport errors and malformed responses.
    pub async fn fetch_apps(&self) -> Result<Vec<AppInfo>> {
        let response = self
            .connection
            .request("FetchLaunchableApplicationsEvent", Value::Null)
            .await?;

        let content = response
            .get(envelope::keys::CONTENT)
            .ok_or_else(|| RemoteError::InvalidResponse {
                message: "app list response without content".to_string(),
            })?;

        let Value::Dict(pairs) = content else {
            return Err(RemoteError::InvalidResponse {
                message: "app list content is not a dictionary".to_string(),
            });
        };

        let mut apps: Vec<AppInfo> = pairs
            .iter()
            .filter_map(|(k, v)| {
                Some(AppInfo {
                    bundle_id: k.as_str()?.to_string(),
                    name: v.as_str()?.to_string(),
                })
            })
            .collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }

    /// Open a remote-control service session
    ///
    /// # Errors
    /// Propagates transport errors.
    pub async fn start_session(&self) -> Result<()> {
        let content = DictBuilder::new()
            .entry("_srvT", Value::string("com.apple.tvremoteservices"))
            .entry("_sid", Value::Int(i64::from(rand::random::<u32>())))
            .build();
        self.connection.request("_sessionStart", content).await?;
        Ok(())
    }
}

fn expect_pairing_data(response: &Value) -> Result<&[u8]> {
    envelope::pairing_data(response).ok_or_else(|| RemoteError::InvalidResponse {
        message: "pairing response without pairing data".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_pairing_data_missing() {
        let value = DictBuilder::new().entry("_x", Value::Int(1)).build();
        assert!(matches!(
            expect_pairing_data(&value),
            Err(RemoteError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_expect_pairing_data_present() {
        let value = envelope::pair_setup(vec![1, 2, 3]);
        assert_eq!(expect_pairing_data(&value).unwrap(), &[1, 2, 3]);
    }
}
