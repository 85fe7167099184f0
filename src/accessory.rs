//! The handle the host platform reads and writes.

use tokio::sync::{mpsc, oneshot, watch};

use crate::session::event::Event;
use crate::{CastError, ConnectionState, DeviceIdentity, ExposedState, Result};

/// Switch-plus-sensor view of the supervised device.
///
/// Reads are synchronous and reflect the last committed state. Writes go
/// through the supervisor's queue.
#[derive(Clone)]
pub struct CastSwitch {
    state: watch::Receiver<ExposedState>,
    device: watch::Receiver<Option<DeviceIdentity>>,
    connection: watch::Receiver<ConnectionState>,
    commands: mpsc::UnboundedSender<Event>,
}

impl CastSwitch {
    pub(crate) fn new(
        state: watch::Receiver<ExposedState>,
        device: watch::Receiver<Option<DeviceIdentity>>,
        connection: watch::Receiver<ConnectionState>,
        commands: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            state,
            device,
            connection,
            commands,
        }
    }

    pub fn state(&self) -> ExposedState {
        *self.state.borrow()
    }

    pub fn casting_on(&self) -> bool {
        self.state.borrow().casting_on
    }

    pub fn streaming_detected(&self) -> bool {
        self.state.borrow().streaming_detected
    }

    /// Turn casting on or off. Resolves once the device acknowledged, or at
    /// once when there was nothing to send.
    pub async fn set_casting_on(&self, on: bool) -> Result<()> {
        let (done, acknowledged) = oneshot::channel();
        self.commands
            .send(Event::SetCasting { on, done })
            .map_err(|_| CastError::Command("supervisor is not running".into()))?;
        acknowledged
            .await
            .map_err(|_| CastError::Command("supervisor stopped before completing the command".into()))
    }

    pub fn device(&self) -> Option<DeviceIdentity> {
        self.device.borrow().clone()
    }

    pub fn device_type(&self) -> Option<String> {
        self.device.borrow().as_ref().map(|d| d.device_type.clone())
    }

    pub fn address(&self) -> Option<String> {
        self.device.borrow().as_ref().map(DeviceIdentity::address)
    }

    pub fn device_id(&self) -> Option<String> {
        self.device.borrow().as_ref().map(|d| d.device_id.clone())
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Receiver notified on every committed change of the exposed state.
    pub fn subscribe(&self) -> watch::Receiver<ExposedState> {
        self.state.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Event::Shutdown);
    }

    /// Detached handle over fixed channels, for exercising consumers.
    #[cfg(test)]
    pub(crate) fn detached(
        state: ExposedState,
        device: Option<DeviceIdentity>,
    ) -> (Self, watch::Sender<ExposedState>, mpsc::UnboundedReceiver<Event>) {
        let (state_tx, state_rx) = watch::channel(state);
        let (device_tx, device_rx) = watch::channel(device);
        let connected = if device_tx.borrow().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        let (_connection_tx, connection_rx) = watch::channel(connected);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        (
            Self::new(state_rx, device_rx, connection_rx, commands),
            state_tx,
            commands_rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::identity;

    #[tokio::test]
    async fn diagnostics_follow_device() {
        let (switch, _state, _commands) = CastSwitch::detached(ExposedState::default(), Some(identity("10.0.0.5")));
        assert_eq!(switch.device_type().as_deref(), Some("Chromecast"));
        assert_eq!(switch.address().as_deref(), Some("10.0.0.5:8009"));
        assert_eq!(switch.device_id().as_deref(), Some("4a1b2c3d"));

        let (empty, _state, _commands) = CastSwitch::detached(ExposedState::default(), None);
        assert!(empty.device_type().is_none());
        assert_eq!(empty.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn set_casting_reports_stopped_supervisor() {
        let (switch, _state, commands) = CastSwitch::detached(ExposedState::default(), None);
        drop(commands);
        assert!(matches!(switch.set_casting_on(true).await, Err(CastError::Command(_))));
    }

    #[tokio::test]
    async fn reads_reflect_latest_state() {
        let (switch, state, _commands) = CastSwitch::detached(ExposedState::default(), None);
        state.send_replace(ExposedState {
            casting_on: true,
            streaming_detected: true,
        });
        assert!(switch.casting_on());
        assert!(switch.streaming_detected());
    }
}
