//! rust_cast implementation of the control link.
//!
//! rust_cast is blocking and its `CastDevice` is not `Send`, so every link
//! gets a dedicated worker thread that owns the device. The async side talks
//! to the worker through a command queue; the worker reports pushed messages
//! as [`LinkEvent`]s. A tokio task watches worker activity and raises
//! [`LinkEvent::HeartbeatTimeout`] when the device goes quiet.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_cast::channels::connection::ConnectionResponse;
use rust_cast::channels::heartbeat::HeartbeatResponse;
use rust_cast::channels::media::{self, MediaResponse};
use rust_cast::channels::receiver::{self, ReceiverResponse};
use rust_cast::{CastDevice, ChannelMessage};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use super::{Application, CastConnector, CastLink, DeviceStatus, LinkEvent, MediaStatus, PlayerState};
use crate::session::{ApplicationSession, MediaSession};
use crate::{CastError, Config, DeviceIdentity, Result};

/// Platform receiver endpoint every sender connects to first.
const RECEIVER_DESTINATION: &str = "receiver-0";

#[derive(Debug, Clone, Copy)]
struct LinkTimings {
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    request_timeout: Duration,
}

/// Opens rust_cast links to discovered devices.
#[derive(Debug, Clone)]
pub struct RustCastConnector {
    timings: LinkTimings,
}

impl RustCastConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            timings: LinkTimings {
                heartbeat_interval: config.heartbeat_interval(),
                heartbeat_timeout: config.heartbeat_timeout(),
                request_timeout: config.request_timeout(),
            },
        }
    }
}

#[async_trait]
impl CastConnector for RustCastConnector {
    async fn connect(
        &self,
        device: &DeviceIdentity,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn CastLink>> {
        let host = device.ip_address.to_string();
        let port = device.port;
        let (commands_tx, commands) = std_mpsc::channel();
        let (ready_tx, ready) = oneshot::channel();
        let (alive_tx, alive) = watch::channel(Instant::now());
        let timings = self.timings;
        let worker_events = events.clone();

        thread::Builder::new()
            .name(format!("cast-link-{}", host))
            .spawn(move || {
                let device = match open_device(host, port) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    // Caller gave up waiting.
                    return;
                }
                Worker {
                    device,
                    commands,
                    events: worker_events,
                    alive: alive_tx,
                    heartbeat_interval: timings.heartbeat_interval,
                    joined: None,
                }
                .run();
            })
            .map_err(|e| CastError::Connection(format!("Failed to spawn link worker: {}", e)))?;

        ready
            .await
            .map_err(|_| CastError::Connection("link worker exited during connect".into()))??;

        info!("Cast link open to {}", device.address());
        tokio::spawn(watch_heartbeat(alive, timings.heartbeat_timeout, events));

        Ok(Arc::new(RustCastLink {
            commands: commands_tx,
            request_timeout: timings.request_timeout,
        }))
    }
}

fn open_device(host: String, port: u16) -> Result<CastDevice<'static>> {
    let device = CastDevice::connect_without_host_verification(host, port)
        .map_err(|e| CastError::Connection(format!("Failed to connect to cast device: {}", e)))?;
    device
        .connection
        .connect(RECEIVER_DESTINATION.to_string())
        .map_err(|e| CastError::Connection(format!("Failed to connect to receiver: {}", e)))?;
    Ok(device)
}

/// Raise a heartbeat timeout when the worker saw no traffic for `timeout`.
async fn watch_heartbeat(
    mut alive: watch::Receiver<Instant>,
    timeout: Duration,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    loop {
        tokio::select! {
            changed = tokio::time::timeout(timeout, alive.changed()) => match changed {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => break,
                Err(_) => {
                    debug!("No traffic from device for {:?}", timeout);
                    let _ = events.send(LinkEvent::HeartbeatTimeout);
                    break;
                }
            },
            _ = events.closed() => break,
        }
    }
}

enum WorkerCommand {
    ReceiverStatus(oneshot::Sender<Result<DeviceStatus>>),
    Join(ApplicationSession, oneshot::Sender<Result<MediaSession>>),
    MediaStatus(MediaSession, oneshot::Sender<Result<Option<MediaStatus>>>),
    Play(MediaSession, oneshot::Sender<Result<()>>),
    Stop(MediaSession, oneshot::Sender<Result<()>>),
    Close,
}

/// Async face of a worker thread.
struct RustCastLink {
    commands: std_mpsc::Sender<WorkerCommand>,
    request_timeout: Duration,
}

impl RustCastLink {
    async fn request<T>(&self, command: WorkerCommand, reply: oneshot::Receiver<Result<T>>, what: &str) -> Result<T> {
        self.commands.send(command).map_err(|_| CastError::Disconnected)?;
        match tokio::time::timeout(self.request_timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CastError::Disconnected),
            Err(_) => Err(CastError::Timeout(what.to_string())),
        }
    }
}

#[async_trait]
impl CastLink for RustCastLink {
    async fn receiver_status(&self) -> Result<DeviceStatus> {
        let (tx, rx) = oneshot::channel();
        self.request(WorkerCommand::ReceiverStatus(tx), rx, "receiver status").await
    }

    async fn join(&self, application: &ApplicationSession) -> Result<MediaSession> {
        let (tx, rx) = oneshot::channel();
        self.request(WorkerCommand::Join(application.clone(), tx), rx, "session join").await
    }

    async fn media_status(&self, media: &MediaSession) -> Result<Option<MediaStatus>> {
        let (tx, rx) = oneshot::channel();
        self.request(WorkerCommand::MediaStatus(media.clone(), tx), rx, "media status").await
    }

    async fn play(&self, media: &MediaSession) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(WorkerCommand::Play(media.clone(), tx), rx, "play").await
    }

    async fn stop(&self, media: &MediaSession) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(WorkerCommand::Stop(media.clone(), tx), rx, "stop").await
    }

    /// The worker leaves at its next read; rust_cast offers no way to
    /// interrupt a blocked one.
    fn close(&self) {
        let _ = self.commands.send(WorkerCommand::Close);
    }
}

/// Owns the device for the lifetime of one link.
///
/// Commands are handled between reads, so their latency is bounded by the
/// heartbeat interval.
struct Worker {
    device: CastDevice<'static>,
    commands: std_mpsc::Receiver<WorkerCommand>,
    events: mpsc::UnboundedSender<LinkEvent>,
    alive: watch::Sender<Instant>,
    heartbeat_interval: Duration,
    joined: Option<String>,
}

impl Worker {
    fn run(mut self) {
        let mut last_ping = Instant::now();
        loop {
            loop {
                match self.commands.try_recv() {
                    Ok(command) => {
                        if !self.execute(command) {
                            self.close();
                            return;
                        }
                    }
                    Err(std_mpsc::TryRecvError::Disconnected) => {
                        self.close();
                        return;
                    }
                    Err(std_mpsc::TryRecvError::Empty) => break,
                }
            }

            if last_ping.elapsed() >= self.heartbeat_interval {
                if let Err(e) = self.device.heartbeat.ping() {
                    warn!("Failed to send heartbeat: {}", e);
                }
                last_ping = Instant::now();
            }

            match self.device.receive() {
                Ok(message) => {
                    self.alive.send_replace(Instant::now());
                    if !self.dispatch(message) {
                        return;
                    }
                }
                Err(rust_cast::errors::Error::Io(e)) => {
                    debug!("Cast link read failed: {}", e);
                    let _ = self.events.send(LinkEvent::Disconnected);
                    return;
                }
                Err(e) => {
                    if self.events.send(LinkEvent::Error(e.to_string())).is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Forward one pushed message. Returns `false` when the link is done.
    fn dispatch(&mut self, message: ChannelMessage) -> bool {
        let event = match message {
            ChannelMessage::Heartbeat(HeartbeatResponse::Ping) => {
                if let Err(e) = self.device.heartbeat.pong() {
                    warn!("Failed to answer heartbeat: {}", e);
                }
                return true;
            }
            ChannelMessage::Heartbeat(HeartbeatResponse::Pong) => LinkEvent::HeartbeatPong,
            ChannelMessage::Receiver(ReceiverResponse::Status(status)) => {
                LinkEvent::ReceiverStatus(device_status(status))
            }
            ChannelMessage::Media(MediaResponse::Status(status)) if self.joined.is_some() => {
                LinkEvent::MediaStatus(media_status(status))
            }
            ChannelMessage::Connection(ConnectionResponse::Close) => {
                let _ = self.events.send(LinkEvent::Disconnected);
                return false;
            }
            other => {
                trace!("Unhandled cast message: {:?}", other);
                return true;
            }
        };
        self.events.send(event).is_ok()
    }

    /// Run one queued command. Returns `false` on close.
    fn execute(&mut self, command: WorkerCommand) -> bool {
        match command {
            WorkerCommand::ReceiverStatus(reply) => {
                let status = self
                    .device
                    .receiver
                    .get_status()
                    .map(device_status)
                    .map_err(|e| CastError::Command(format!("Failed to get status: {}", e)));
                let _ = reply.send(status);
            }
            WorkerCommand::Join(application, reply) => {
                let _ = reply.send(self.join(application));
            }
            WorkerCommand::MediaStatus(media, reply) => {
                let status = self
                    .device
                    .media
                    .get_status(media.application().transport_id().to_string(), media.media_session_id())
                    .map(media_status)
                    .map_err(|e| CastError::Command(format!("Failed to get media status: {}", e)));
                let _ = reply.send(status);
            }
            WorkerCommand::Play(media, reply) => {
                let _ = reply.send(self.control(&media, MediaCommand::Play));
            }
            WorkerCommand::Stop(media, reply) => {
                let _ = reply.send(self.control(&media, MediaCommand::Stop));
            }
            WorkerCommand::Close => return false,
        }
        true
    }

    fn join(&mut self, application: ApplicationSession) -> Result<MediaSession> {
        let transport_id = application.transport_id().to_string();
        if let Some(previous) = self.joined.take() {
            if previous != transport_id {
                let _ = self.device.connection.disconnect(previous);
            }
        }

        self.device
            .connection
            .connect(transport_id.clone())
            .map_err(|e| CastError::Join(format!("Failed to connect to {}: {}", transport_id, e)))?;
        let status = self
            .device
            .media
            .get_status(transport_id.clone(), None)
            .map_err(|e| CastError::Join(format!("Failed to read media of {}: {}", transport_id, e)))?;

        self.joined = Some(transport_id);
        let media_session_id = status.entries.first().map(|entry| entry.media_session_id);
        Ok(MediaSession::new(application, media_session_id))
    }

    fn control(&mut self, media: &MediaSession, command: MediaCommand) -> Result<()> {
        let transport_id = media.application().transport_id().to_string();
        let media_session_id = match media.media_session_id() {
            Some(id) => id,
            None => self
                .device
                .media
                .get_status(transport_id.clone(), None)
                .map_err(|e| CastError::Command(format!("Failed to get media status: {}", e)))?
                .entries
                .first()
                .map(|entry| entry.media_session_id)
                .ok_or_else(|| CastError::Command("No media loaded".into()))?,
        };

        let result = match command {
            MediaCommand::Play => self.device.media.play(transport_id, media_session_id),
            MediaCommand::Stop => self.device.media.stop(transport_id, media_session_id),
        };
        result
            .map(|_| ())
            .map_err(|e| CastError::Command(format!("Failed to {:?}: {}", command, e)))
    }

    fn close(&mut self) {
        if let Some(transport_id) = self.joined.take() {
            let _ = self.device.connection.disconnect(transport_id);
        }
        let _ = self
            .device
            .connection
            .disconnect(RECEIVER_DESTINATION.to_string());
        debug!("Cast link closed");
    }
}

#[derive(Debug, Clone, Copy)]
enum MediaCommand {
    Play,
    Stop,
}

/// rust_cast reports a missing application list as an empty one; receivers
/// leave the field out when nothing runs, so empty maps to absent.
fn device_status(status: receiver::Status) -> DeviceStatus {
    if status.applications.is_empty() {
        return DeviceStatus::stopped();
    }
    DeviceStatus {
        applications: Some(
            status
                .applications
                .into_iter()
                .map(|app| Application {
                    app_id: app.app_id,
                    session_id: app.session_id,
                    display_name: app.display_name,
                    status_text: app.status_text,
                })
                .collect(),
        ),
    }
}

fn media_status(status: media::Status) -> Option<MediaStatus> {
    status.entries.into_iter().next().map(|entry| MediaStatus {
        media_session_id: entry.media_session_id,
        player_state: player_state(entry.player_state),
    })
}

fn player_state(state: media::PlayerState) -> PlayerState {
    match state {
        media::PlayerState::Idle => PlayerState::Idle,
        media::PlayerState::Playing => PlayerState::Playing,
        media::PlayerState::Buffering => PlayerState::Buffering,
        media::PlayerState::Paused => PlayerState::Paused,
    }
}
