use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::aggregator::StatusAggregator;
use super::MediaSession;
use crate::network::CastLink;

/// What an on/off intent translates to on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Play,
    Stop,
}

/// Decide the device command for an intent.
///
/// Nothing is sent without a joined media session, nor when the intent
/// matches what was already believed.
pub fn plan(on: bool, was_casting: bool, has_media: bool) -> Option<DeviceCommand> {
    if !has_media {
        return None;
    }
    match (on, was_casting) {
        (true, false) => Some(DeviceCommand::Play),
        (false, true) => Some(DeviceCommand::Stop),
        _ => None,
    }
}

/// Apply an external on/off intent.
///
/// The casting flag is updated before anything is sent so the host sees the
/// intent at once. `done` fires when the device acknowledged, or right away
/// when nothing had to be sent. Command failures are only logged: the next
/// status push corrects any drift.
pub fn set_casting(
    aggregator: &mut StatusAggregator,
    target: Option<(Arc<dyn CastLink>, MediaSession)>,
    on: bool,
    done: oneshot::Sender<()>,
) -> Option<DeviceCommand> {
    let was_casting = aggregator.is_casting();
    aggregator.set_is_casting(on);

    let command = plan(on, was_casting, target.is_some());
    let (Some(command), Some((link, media))) = (command, target) else {
        debug!("Casting set to {} without a device command", on);
        let _ = done.send(());
        return None;
    };

    info!("Sending {:?} to session {}", command, media.application().session_id());
    tokio::spawn(async move {
        let result = match command {
            DeviceCommand::Play => link.play(&media).await,
            DeviceCommand::Stop => link.stop(&media).await,
        };
        if let Err(e) = result {
            warn!("{:?} failed: {}", command, e);
        }
        let _ = done.send(());
    });
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_media_means_no_command() {
        assert_eq!(plan(true, false, false), None);
        assert_eq!(plan(false, true, false), None);
    }

    #[test]
    fn only_transitions_send_commands() {
        assert_eq!(plan(true, false, true), Some(DeviceCommand::Play));
        assert_eq!(plan(false, true, true), Some(DeviceCommand::Stop));
        assert_eq!(plan(true, true, true), None);
        assert_eq!(plan(false, false, true), None);
    }
}
