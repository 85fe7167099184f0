use std::fmt;

use tokio::sync::oneshot;

/// Inputs posted to the supervisor's own queue.
///
/// Discovery matches, link events and pending connects arrive on their own
/// channels and are merged by [`super::Supervisor::step`].
pub enum Event {
    /// External on/off intent; `done` fires once the device command (if any)
    /// completed.
    SetCasting { on: bool, done: oneshot::Sender<()> },
    /// The delayed-off timer with this generation fired.
    SwitchOffElapsed { generation: u64 },
    Shutdown,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::SetCasting { on, .. } => f.debug_struct("SetCasting").field("on", on).finish(),
            Event::SwitchOffElapsed { generation } => f
                .debug_struct("SwitchOffElapsed")
                .field("generation", generation)
                .finish(),
            Event::Shutdown => f.write_str("Shutdown"),
        }
    }
}
