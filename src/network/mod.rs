//! Control-protocol seam between the session supervisor and a cast device.
//!
//! The supervisor only talks to [`CastConnector`] and [`CastLink`]; the
//! rust_cast implementation lives in [`chromecast`], discovery in
//! [`discovery`].

pub mod chromecast;
pub mod discovery;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::session::{ApplicationSession, MediaSession};
use crate::{DeviceIdentity, Result};

/// A receiver application reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub app_id: String,
    pub session_id: String,
    pub display_name: String,
    pub status_text: String,
}

/// Receiver status as pushed or pulled from the device.
///
/// `applications` is `None` when the payload carried no application list at
/// all, which the device uses to signal that casting stopped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    pub applications: Option<Vec<Application>>,
}

impl DeviceStatus {
    pub fn stopped() -> Self {
        Self { applications: None }
    }

    pub fn running(app: Application) -> Self {
        Self {
            applications: Some(vec![app]),
        }
    }

    /// The application the supervisor tracks.
    pub fn current_application(&self) -> Option<&Application> {
        self.applications.as_ref().and_then(|apps| apps.first())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    Idle,
    Playing,
    Buffering,
    Paused,
    Unknown,
}

impl PlayerState {
    /// Only an active player counts as casting.
    pub fn is_casting(self) -> bool {
        matches!(self, PlayerState::Playing | PlayerState::Buffering)
    }
}

impl FromStr for PlayerState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "IDLE" => PlayerState::Idle,
            "PLAYING" => PlayerState::Playing,
            "BUFFERING" => PlayerState::Buffering,
            "PAUSED" => PlayerState::Paused,
            _ => PlayerState::Unknown,
        })
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlayerState::Idle => "IDLE",
            PlayerState::Playing => "PLAYING",
            PlayerState::Buffering => "BUFFERING",
            PlayerState::Paused => "PAUSED",
            PlayerState::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// One media status entry of the joined session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaStatus {
    pub media_session_id: i32,
    pub player_state: PlayerState,
}

/// Asynchronous events raised by an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    ReceiverStatus(DeviceStatus),
    /// `None` when the device pushed a media status without entries.
    MediaStatus(Option<MediaStatus>),
    HeartbeatPong,
    HeartbeatTimeout,
    ConnectionTimeout,
    Disconnected,
    /// Non-fatal transport error.
    Error(String),
}

/// Opens links to a device.
#[async_trait]
pub trait CastConnector: Send + Sync + 'static {
    /// Connect to `device`. Every event of the resulting link is sent to
    /// `events`; dropping the receiving half detaches all listeners.
    async fn connect(
        &self,
        device: &DeviceIdentity,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn CastLink>>;
}

/// An open control connection with its connection, heartbeat, receiver and
/// media channels.
#[async_trait]
pub trait CastLink: Send + Sync {
    /// Pull the current receiver status.
    async fn receiver_status(&self) -> Result<DeviceStatus>;

    /// Attach to the media channel of a running application.
    async fn join(&self, application: &ApplicationSession) -> Result<MediaSession>;

    /// Pull the current media status of a joined session.
    async fn media_status(&self, media: &MediaSession) -> Result<Option<MediaStatus>>;

    async fn play(&self, media: &MediaSession) -> Result<()>;

    async fn stop(&self, media: &MediaSession) -> Result<()>;

    /// Force the transport closed. Safe to call more than once.
    fn close(&self);
}
