//! Session supervision for the single configured device.
//!
//! [`Supervisor`] owns the connection lifecycle as an explicit state machine:
//!
//! ```text
//! Disconnected --match--> Connecting --link opened--> Connected
//!      ^                      |                           |
//!      +------ failure -------+---- timeout/disconnect ---+
//! ```
//!
//! Discovery matches, link events, pending connects and commands each
//! arrive on their own channel and are handled one at a time, in arrival
//! order per source, by [`Supervisor::step`].

pub mod aggregator;
pub mod event;
pub mod gateway;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use self::aggregator::StatusAggregator;
use self::event::Event;
use crate::accessory::CastSwitch;
use crate::network::discovery::DeviceBrowser;
use crate::network::{CastConnector, CastLink, DeviceStatus, LinkEvent, MediaStatus};
use crate::{CastError, Config, ConnectionState, DeviceIdentity, ExposedState, Result};

/// The receiver application currently running on the device.
///
/// The transport id is always the session id: some speaker-group firmware
/// omits the transport id and the session id addresses the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSession {
    session_id: String,
    transport_id: String,
}

impl ApplicationSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            transport_id: session_id.clone(),
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transport_id(&self) -> &str {
        &self.transport_id
    }
}

/// Handle to the media channel of a joined application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSession {
    application: ApplicationSession,
    media_session_id: Option<i32>,
}

impl MediaSession {
    pub fn new(application: ApplicationSession, media_session_id: Option<i32>) -> Self {
        Self {
            application,
            media_session_id,
        }
    }

    pub fn application(&self) -> &ApplicationSession {
        &self.application
    }

    /// Id of the current media item, once the device reported one.
    pub fn media_session_id(&self) -> Option<i32> {
        self.media_session_id
    }

    fn with_media_session_id(self, media_session_id: i32) -> Self {
        Self {
            media_session_id: Some(media_session_id),
            ..self
        }
    }
}

/// Everything tied to one open link. Dropped as a whole on disconnect.
struct DeviceSession {
    identity: DeviceIdentity,
    link: Arc<dyn CastLink>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    application: Option<ApplicationSession>,
    media: Option<MediaSession>,
}

enum Phase {
    Disconnected,
    Connecting {
        identity: DeviceIdentity,
        pending: oneshot::Receiver<Result<Arc<dyn CastLink>>>,
        events: mpsc::UnboundedReceiver<LinkEvent>,
    },
    Connected(DeviceSession),
}

impl Phase {
    fn state(&self) -> ConnectionState {
        match self {
            Phase::Disconnected => ConnectionState::Disconnected,
            Phase::Connecting { .. } => ConnectionState::Connecting,
            Phase::Connected(_) => ConnectionState::Connected,
        }
    }
}

enum Input {
    Found(DeviceIdentity),
    Opened(Result<Arc<dyn CastLink>>),
    Link(LinkEvent),
    Event(Event),
}

pub struct Supervisor {
    connector: Arc<dyn CastConnector>,
    browser: Box<dyn DeviceBrowser>,
    aggregator: StatusAggregator,
    phase: Phase,
    connect_timeout: Duration,
    request_timeout: Duration,
    events: mpsc::UnboundedReceiver<Event>,
    found_tx: mpsc::UnboundedSender<DeviceIdentity>,
    found: mpsc::UnboundedReceiver<DeviceIdentity>,
    identity: watch::Sender<Option<DeviceIdentity>>,
    connection: watch::Sender<ConnectionState>,
}

impl Supervisor {
    /// Build a supervisor and the handle the host platform uses.
    pub fn new(
        config: &Config,
        connector: Arc<dyn CastConnector>,
        browser: Box<dyn DeviceBrowser>,
    ) -> (Self, CastSwitch) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (found_tx, found) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ExposedState::default());
        let (identity, identity_rx) = watch::channel(None);
        let (connection, connection_rx) = watch::channel(ConnectionState::Disconnected);

        let aggregator = StatusAggregator::new(config.switch_off_delay(), state_tx, events_tx.clone());
        let switch = CastSwitch::new(state_rx, identity_rx, connection_rx, events_tx);

        let supervisor = Self {
            connector,
            browser,
            aggregator,
            phase: Phase::Disconnected,
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            events,
            found_tx,
            found,
            identity,
            connection,
        };
        (supervisor, switch)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.phase.state()
    }

    /// Start browsing for the device.
    pub fn start(&mut self) -> Result<()> {
        self.browser.start(self.found_tx.clone())
    }

    /// Browse and supervise until shut down.
    pub async fn run(mut self) -> Result<()> {
        self.start()?;
        while self.step().await {}
        Ok(())
    }

    /// Wait for the next input and handle it. Returns `false` after shutdown.
    pub async fn step(&mut self) -> bool {
        let input = tokio::select! {
            Some(event) = self.events.recv() => Input::Event(event),
            Some(identity) = self.found.recv() => Input::Found(identity),
            input = phase_input(&mut self.phase) => input,
        };
        self.handle(input).await
    }

    async fn handle(&mut self, input: Input) -> bool {
        match input {
            Input::Found(identity) => self.on_device_found(identity),
            Input::Opened(result) => self.on_link_opened(result).await,
            Input::Link(event) => self.on_link_event(event).await,
            Input::Event(Event::SetCasting { on, done }) => self.on_set_casting(on, done),
            Input::Event(Event::SwitchOffElapsed { generation }) => {
                self.aggregator.on_switch_off_elapsed(generation)
            }
            Input::Event(Event::Shutdown) => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn on_device_found(&mut self, identity: DeviceIdentity) {
        if !matches!(self.phase, Phase::Disconnected) {
            debug!(
                "Ignoring advertisement for {} while {}",
                identity.name,
                self.phase.state()
            );
            return;
        }

        info!("Connecting to {} at {}", identity.name, identity.address());
        let (events_tx, events) = mpsc::unbounded_channel();
        let (opened_tx, pending) = oneshot::channel();
        let connector = Arc::clone(&self.connector);
        let target = identity.clone();
        let connect_timeout = self.connect_timeout;

        tokio::spawn(async move {
            let result = tokio::time::timeout(connect_timeout, connector.connect(&target, events_tx))
                .await
                .unwrap_or_else(|_| Err(CastError::Timeout(format!("connecting to {}", target.address()))));
            if let Err(Ok(link)) = opened_tx.send(result) {
                link.close();
            }
        });

        self.identity.send_replace(Some(identity.clone()));
        self.phase = Phase::Connecting {
            identity,
            pending,
            events,
        };
        self.publish_connection();
    }

    async fn on_link_opened(&mut self, result: Result<Arc<dyn CastLink>>) {
        let Phase::Connecting {
            identity, events, ..
        } = std::mem::replace(&mut self.phase, Phase::Disconnected)
        else {
            return;
        };

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                warn!("Failed to connect to {}: {}", identity.name, e);
                self.await_rediscovery();
                return;
            }
        };

        info!("Connected to {}", identity.name);
        self.phase = Phase::Connected(DeviceSession {
            identity,
            link: Arc::clone(&link),
            events,
            application: None,
            media: None,
        });
        self.publish_connection();

        // The device may already be mid-session; read it instead of waiting for a push.
        match self.bounded("receiver status", link.receiver_status()).await {
            Ok(status) => self.process_device_status(status).await,
            Err(e) if e.is_connection_loss() => {
                warn!("Initial status read failed: {}", e);
                self.device_timeout();
            }
            Err(e) => warn!("Initial status read failed: {}", e),
        }
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::ReceiverStatus(status) => self.process_device_status(status).await,
            LinkEvent::MediaStatus(status) => self.process_media_status(status),
            LinkEvent::HeartbeatPong => trace!("Heartbeat pong"),
            LinkEvent::HeartbeatTimeout => {
                warn!("Heartbeat timed out");
                self.device_timeout();
            }
            LinkEvent::ConnectionTimeout => {
                warn!("Connection timed out");
                self.device_timeout();
            }
            LinkEvent::Disconnected => self.device_disconnected(),
            LinkEvent::Error(message) => warn!("Connection error: {}", message),
        }
    }

    async fn process_device_status(&mut self, status: DeviceStatus) {
        if status.applications.is_none() {
            debug!("Status carries no applications");
            self.aggregator.set_is_casting(false);
        }

        let Phase::Connected(session) = &mut self.phase else {
            return;
        };

        let Some(app) = status.current_application() else {
            if let Some(previous) = session.application.take() {
                info!("Application session {} ended", previous.session_id());
            }
            session.media = None;
            return;
        };

        let unchanged = session
            .application
            .as_ref()
            .is_some_and(|current| current.session_id() == app.session_id);
        if unchanged {
            return;
        }

        let application = ApplicationSession::new(app.session_id.clone());
        info!(
            "Joining {} session {}",
            app.display_name,
            application.session_id()
        );
        session.application = Some(application.clone());
        session.media = None;
        let link = Arc::clone(&session.link);

        self.join(link, application).await;
    }

    async fn join(&mut self, link: Arc<dyn CastLink>, application: ApplicationSession) {
        let media = match self.bounded("session join", link.join(&application)).await {
            Ok(media) => media,
            Err(e) => {
                warn!("Failed to join session {}: {}", application.session_id(), e);
                self.device_timeout();
                return;
            }
        };

        let media = match self.bounded("media status", link.media_status(&media)).await {
            Ok(status) => {
                self.aggregator.process_media_status(status.as_ref());
                match status {
                    Some(status) => media.with_media_session_id(status.media_session_id),
                    None => media,
                }
            }
            Err(e) => {
                warn!("Initial media status read failed: {}", e);
                media
            }
        };

        if let Phase::Connected(session) = &mut self.phase {
            debug!("Listening for media status of {}", application.session_id());
            session.media = Some(media);
        }
    }

    fn process_media_status(&mut self, status: Option<MediaStatus>) {
        let Phase::Connected(DeviceSession {
            media: Some(media), ..
        }) = &mut self.phase
        else {
            trace!("Media status without a joined session");
            return;
        };

        if let Some(status) = status {
            if media.media_session_id() != Some(status.media_session_id) {
                *media = media.clone().with_media_session_id(status.media_session_id);
            }
        }
        self.aggregator.process_media_status(status.as_ref());
    }

    fn on_set_casting(&mut self, on: bool, done: oneshot::Sender<()>) {
        let target = match &self.phase {
            Phase::Connected(session) => session
                .media
                .clone()
                .map(|media| (Arc::clone(&session.link), media)),
            _ => None,
        };
        gateway::set_casting(&mut self.aggregator, target, on, done);
    }

    /// Force the transport closed, then tear down like any disconnect.
    fn device_timeout(&mut self) {
        if let Phase::Connected(session) = &self.phase {
            info!("Closing connection to {}", session.identity.name);
            session.link.close();
        }
        self.device_disconnected();
    }

    /// Drop all per-device state and go back to waiting for discovery.
    fn device_disconnected(&mut self) {
        let previous = std::mem::replace(&mut self.phase, Phase::Disconnected);
        if matches!(previous, Phase::Disconnected) {
            return;
        }
        drop(previous);

        info!("Device disconnected");
        self.await_rediscovery();
    }

    fn await_rediscovery(&mut self) {
        self.aggregator.set_is_casting(false);
        self.identity.send_replace(None);
        self.publish_connection();

        if let Err(e) = self.browser.restart() {
            warn!("Failed to restart discovery: {}", e);
        }
    }

    fn shutdown(&mut self) {
        info!("Shutting down");
        if let Phase::Connected(session) = &self.phase {
            session.link.close();
        }
        self.phase = Phase::Disconnected;
        self.identity.send_replace(None);
        self.publish_connection();

        if let Err(e) = self.browser.stop() {
            warn!("Failed to stop discovery: {}", e);
        }
    }

    fn publish_connection(&self) {
        let state = self.phase.state();
        let changed = self.connection.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        if changed {
            info!("Connection state: {}", state);
        }
    }

    async fn bounded<T>(&self, what: &str, request: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.request_timeout, request)
            .await
            .unwrap_or_else(|_| Err(CastError::Timeout(what.to_string())))
    }
}

/// Next input owned by the current phase: the connect result while
/// connecting, link events while connected.
async fn phase_input(phase: &mut Phase) -> Input {
    match phase {
        Phase::Connecting { pending, .. } => {
            Input::Opened(pending.await.unwrap_or(Err(CastError::Disconnected)))
        }
        Phase::Connected(session) => {
            Input::Link(session.events.recv().await.unwrap_or(LinkEvent::Disconnected))
        }
        Phase::Disconnected => std::future::pending().await,
    }
}
