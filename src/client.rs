//! Top-level client tying the two transports together
//!
//! The Companion link handles pairing, input and app launching; the
//! AirPlay tunnel carries the media-remote session. They are independent
//! encrypted sessions sharing only the long-term credentials, so losing
//! one does not tear down the other; the caller decides whether to
//! re-establish.
//!
//! The client is constructed once and handed by reference to whatever
//! needs it; there is no global instance.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::airplay::AirPlaySession;
use crate::companion::{CompanionApi, CompanionConnection, PairingSession};
use crate::error::{RemoteError, Result};
use crate::mrp::{MrpCommand, MrpSession};
use crate::protocol::pairing::{CredentialStorage, Credentials};
use crate::types::{
    Button, ConnectionEvent, ConnectionState, DisconnectReason, NowPlaying, RemoteConfig,
    ServiceEndpoint,
};

/// Everything tied to one connection attempt
#[derive(Default)]
struct Session {
    device_id: Option<String>,
    airplay_endpoint: Option<ServiceEndpoint>,
    companion: Option<CompanionApi>,
    pending_pairing: Option<PairingSession>,
    airplay: Option<Arc<AirPlaySession>>,
    mrp: Option<Arc<MrpSession>>,
    forward_tasks: Vec<JoinHandle<()>>,
}

/// Client for one remote device
pub struct RemoteClient {
    config: RemoteConfig,
    storage: Mutex<Box<dyn CredentialStorage>>,
    session: Mutex<Session>,
    state: StdMutex<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl RemoteClient {
    /// Create a client with the given configuration and credential store
    #[must_use]
    pub fn new(config: RemoteConfig, storage: Box<dyn CredentialStorage>) -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            config,
            storage: Mutex::new(storage),
            session: Mutex::new(Session::default()),
            state: StdMutex::new(ConnectionState::Disconnected),
            event_tx,
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Subscribe to connection and now-playing events
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Connect to a device given its two resolved service endpoints
    ///
    /// With stored credentials this verifies and brings everything up;
    /// without them it starts pairing and parks in `PairingRequired`,
    /// waiting for [`RemoteClient::submit_pairing_code`].
    ///
    /// # Errors
    /// Propagates transport and handshake errors; the attempt is aborted
    /// as a whole on any failure.
    pub async fn connect(
        &self,
        companion: &ServiceEndpoint,
        airplay: &ServiceEndpoint,
    ) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            return Err(RemoteError::InvalidState {
                message: "already connected or connecting".to_string(),
            });
        }
        self.set_state(ConnectionState::Connecting);

        let device_id = companion.service_name.clone();
        let result = self.connect_inner(&device_id, companion, airplay).await;
        if result.is_err() {
            self.teardown(DisconnectReason::Error("connect failed".to_string()))
                .await;
        }
        result
    }

    async fn connect_inner(
        &self,
        device_id: &str,
        companion: &ServiceEndpoint,
        airplay: &ServiceEndpoint,
    ) -> Result<()> {
        let connection = Arc::new(
            CompanionConnection::connect(
                &companion.host,
                companion.port,
                self.config.request_timeout,
            )
            .await?,
        );
        let api = CompanionApi::new(connection);

        let credentials = self.storage.lock().await.load(device_id).await;

        match credentials {
            Some(credentials) => {
                api.pair_verify(&credentials).await?;
                self.store_session(device_id, airplay, api, None).await;
                self.bring_up_tunnel(&credentials).await?;
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            None => {
                let pairing = api.start_pair_setup(&self.config.client_id).await?;
                self.store_session(device_id, airplay, api, Some(pairing)).await;
                self.set_state(ConnectionState::PairingRequired);
                Ok(())
            }
        }
    }

    async fn store_session(
        &self,
        device_id: &str,
        airplay: &ServiceEndpoint,
        api: CompanionApi,
        pending_pairing: Option<PairingSession>,
    ) {
        let mut session = self.session.lock().await;
        session.device_id = Some(device_id.to_string());
        session.airplay_endpoint = Some(airplay.clone());
        session.companion = Some(api);
        session.pending_pairing = pending_pairing;
    }

    /// Finish pairing with the PIN shown on the device
    ///
    /// # Errors
    /// A wrong PIN fails the attempt without retry; the caller restarts
    /// with a fresh `connect`.
    pub async fn submit_pairing_code(&self, code: &str) -> Result<()> {
        let (pairing, device_id) = {
            let mut session = self.session.lock().await;
            let pairing = session.pending_pairing.take().ok_or_else(|| {
                RemoteError::InvalidState {
                    message: "no pairing in progress".to_string(),
                }
            })?;
            (pairing, session.device_id.clone().unwrap_or_default())
        };

        let result = async {
            let credentials = {
                let session = self.session.lock().await;
                let api = session.companion.as_ref().ok_or_else(|| {
                    RemoteError::InvalidState {
                        message: "not connected".to_string(),
                    }
                })?;
                let credentials = api.finish_pair_setup(pairing, code).await?;
                api.pair_verify(&credentials).await?;
                credentials
            };

            self.storage
                .lock()
                .await
                .save(&device_id, &credentials)
                .await?;

            self.bring_up_tunnel(&credentials).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.teardown(DisconnectReason::Error("pairing failed".to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Bring up the AirPlay tunnel and media-remote session
    async fn bring_up_tunnel(&self, credentials: &Credentials) -> Result<()> {
        let endpoint = self
            .session
            .lock()
            .await
            .airplay_endpoint
            .clone()
            .ok_or_else(|| RemoteError::InvalidState {
                message: "no airplay endpoint".to_string(),
            })?;

        let (airplay, inbound) = AirPlaySession::connect(
            &endpoint.host,
            endpoint.port,
            credentials,
            &self.config,
        )
        .await?;
        let airplay = Arc::new(airplay);

        let mrp = Arc::new(
            MrpSession::start(
                Arc::clone(&airplay) as Arc<dyn crate::mrp::session::MessageSink>,
                inbound,
                self.config.clone(),
            )
            .await?,
        );

        // Forward projection updates and the tunnel's disconnect signal.
        let mut updates = mrp.updates();
        let update_tx = self.event_tx.clone();
        let updates_task = tokio::spawn(async move {
            while let Ok(projection) = updates.recv().await {
                let _ = update_tx.send(ConnectionEvent::NowPlaying(projection));
            }
        });

        let mut disconnects = airplay.disconnects();
        let disconnect_tx = self.event_tx.clone();
        let disconnect_task = tokio::spawn(async move {
            if let Ok(reason) = disconnects.recv().await {
                let _ = disconnect_tx.send(ConnectionEvent::Disconnected(reason));
            }
        });

        let mut session = self.session.lock().await;
        session.airplay = Some(airplay);
        session.mrp = Some(mrp);
        session.forward_tasks.push(updates_task);
        session.forward_tasks.push(disconnect_task);
        Ok(())
    }

    /// Press a remote button
    ///
    /// # Errors
    /// Fails when not connected.
    pub async fn send_button(&self, button: Button) -> Result<()> {
        let session = self.session.lock().await;
        let api = session.companion.as_ref().ok_or_else(not_connected)?;
        api.press_button(button).await
    }

    /// Launch an app by bundle identifier
    ///
    /// # Errors
    /// Fails when not connected.
    pub async fn launch_app(&self, bundle_id: &str) -> Result<()> {
        let session = self.session.lock().await;
        let api = session.companion.as_ref().ok_or_else(not_connected)?;
        api.launch_app(bundle_id).await
    }

    /// Dispatch a playback command over the media-remote session
    ///
    /// # Errors
    /// Fails when the tunnel is not up.
    pub async fn send_command(&self, command: MrpCommand) -> Result<()> {
        let mrp = {
            let session = self.session.lock().await;
            session.mrp.clone().ok_or_else(not_connected)?
        };
        mrp.send_command(command).await
    }

    /// Current now-playing projection, if the tunnel is up
    pub async fn now_playing(&self) -> Option<NowPlaying> {
        let session = self.session.lock().await;
        session.mrp.as_ref().map(|mrp| mrp.now_playing())
    }

    /// Remove stored credentials for a device
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn unpair(&self, device_id: &str) -> Result<()> {
        self.storage.lock().await.delete(device_id).await?;
        Ok(())
    }

    /// Disconnect everything
    pub async fn disconnect(&self) {
        self.teardown(DisconnectReason::Requested).await;
    }

    async fn teardown(&self, reason: DisconnectReason) {
        let mut session = self.session.lock().await;

        for task in session.forward_tasks.drain(..) {
            task.abort();
        }
        if let Some(mrp) = session.mrp.take() {
            mrp.shutdown();
        }
        if let Some(airplay) = session.airplay.take() {
            airplay.disconnect().await;
        }
        if let Some(api) = session.companion.take() {
            api.connection().disconnect().await;
        }
        *session = Session::default();
        drop(session);

        let was_connected =
            !matches!(self.state(), ConnectionState::Disconnected);
        self.set_state(ConnectionState::Disconnected);
        if was_connected {
            let _ = self.event_tx.send(ConnectionEvent::Disconnected(reason));
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
        let _ = self.event_tx.send(ConnectionEvent::StateChanged(state));
    }
}

fn not_connected() -> RemoteError {
    RemoteError::InvalidState {
        message: "not connected".to_string(),
    }
}
