//! In-memory stand-ins for discovery and the cast transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ApplicationSession, MediaSession};
use crate::network::discovery::DeviceBrowser;
use crate::network::{Application, CastConnector, CastLink, DeviceStatus, LinkEvent, MediaStatus, PlayerState};
use crate::{CastError, DeviceIdentity, Result};

pub fn identity(ip: &str) -> DeviceIdentity {
    DeviceIdentity {
        name: "Living Room TV".into(),
        device_type: "Chromecast".into(),
        ip_address: ip.parse().unwrap(),
        port: 8009,
        device_id: "4a1b2c3d".into(),
    }
}

pub fn application(session_id: &str) -> Application {
    Application {
        app_id: "CC1AD845".into(),
        session_id: session_id.into(),
        display_name: "Default Media Receiver".into(),
        status_text: "Casting".into(),
    }
}

#[derive(Default)]
struct BrowserShared {
    found: Mutex<Option<mpsc::UnboundedSender<DeviceIdentity>>>,
    restarts: AtomicUsize,
    stopped: AtomicBool,
}

pub struct FakeBrowser {
    shared: Arc<BrowserShared>,
}

/// Test-side view of a [`FakeBrowser`].
#[derive(Clone)]
pub struct BrowserProbe {
    shared: Arc<BrowserShared>,
}

impl FakeBrowser {
    pub fn new() -> (Self, BrowserProbe) {
        let shared = Arc::new(BrowserShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            BrowserProbe { shared },
        )
    }
}

impl DeviceBrowser for FakeBrowser {
    fn start(&mut self, found: mpsc::UnboundedSender<DeviceIdentity>) -> Result<()> {
        *self.shared.found.lock().unwrap() = Some(found);
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        self.shared.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.shared.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl BrowserProbe {
    pub fn advertise(&self, identity: DeviceIdentity) {
        let found = self.shared.found.lock().unwrap();
        found
            .as_ref()
            .expect("browser not started")
            .send(identity)
            .expect("supervisor gone");
    }

    pub fn restarts(&self) -> usize {
        self.shared.restarts.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }
}

/// How the next link behaves.
#[derive(Debug, Clone)]
pub struct LinkScript {
    pub status: DeviceStatus,
    pub media_state: Option<PlayerState>,
    pub fail_join: bool,
    pub fail_commands: bool,
}

impl LinkScript {
    pub fn playing(session_id: &str) -> Self {
        Self::with_state(session_id, PlayerState::Playing)
    }

    pub fn with_state(session_id: &str, state: PlayerState) -> Self {
        Self {
            status: DeviceStatus::running(application(session_id)),
            media_state: Some(state),
            fail_join: false,
            fail_commands: false,
        }
    }
}

impl Default for LinkScript {
    fn default() -> Self {
        Self {
            status: DeviceStatus::stopped(),
            media_state: None,
            fail_join: false,
            fail_commands: false,
        }
    }
}

#[derive(Default)]
struct ConnectorShared {
    script: Mutex<LinkScript>,
    links: Mutex<Vec<Arc<FakeLink>>>,
    fail_next: AtomicBool,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    shared: Arc<ConnectorShared>,
}

impl FakeConnector {
    pub fn script(&self, script: LinkScript) {
        *self.shared.script.lock().unwrap() = script;
    }

    pub fn fail_next_connect(&self) {
        self.shared.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.shared.links.lock().unwrap().len()
    }

    pub fn last_link(&self) -> Arc<FakeLink> {
        Arc::clone(self.shared.links.lock().unwrap().last().expect("no link opened"))
    }
}

#[async_trait]
impl CastConnector for FakeConnector {
    async fn connect(
        &self,
        _device: &DeviceIdentity,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn CastLink>> {
        if self.shared.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CastError::Connection("connection refused".into()));
        }
        let script = self.shared.script.lock().unwrap().clone();
        let link = Arc::new(FakeLink {
            script,
            events,
            joined: Mutex::new(Vec::new()),
            status_pulls: AtomicUsize::new(0),
            plays: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        self.shared.links.lock().unwrap().push(Arc::clone(&link));
        Ok(link)
    }
}

pub struct FakeLink {
    script: LinkScript,
    events: mpsc::UnboundedSender<LinkEvent>,
    joined: Mutex<Vec<ApplicationSession>>,
    status_pulls: AtomicUsize,
    plays: AtomicUsize,
    stops: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeLink {
    /// Push an event as the device would. Returns `false` once nobody listens.
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn joined(&self) -> Vec<ApplicationSession> {
        self.joined.lock().unwrap().clone()
    }

    pub fn status_pulls(&self) -> usize {
        self.status_pulls.load(Ordering::SeqCst)
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn command(&self, counter: &AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_commands {
            return Err(CastError::Command("invalid player state".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CastLink for FakeLink {
    async fn receiver_status(&self) -> Result<DeviceStatus> {
        self.status_pulls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.status.clone())
    }

    async fn join(&self, application: &ApplicationSession) -> Result<MediaSession> {
        self.joined.lock().unwrap().push(application.clone());
        if self.script.fail_join {
            return Err(CastError::Join("session not found".into()));
        }
        Ok(MediaSession::new(application.clone(), None))
    }

    async fn media_status(&self, _media: &MediaSession) -> Result<Option<MediaStatus>> {
        Ok(self.script.media_state.map(|player_state| MediaStatus {
            media_session_id: 1,
            player_state,
        }))
    }

    async fn play(&self, _media: &MediaSession) -> Result<()> {
        self.command(&self.plays)
    }

    async fn stop(&self, _media: &MediaSession) -> Result<()> {
        self.command(&self.stops)
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
