use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::event::Event;
use crate::network::MediaStatus;
use crate::ExposedState;

/// Pending delayed-off transition.
///
/// The generation guards against an elapsed message that was already queued
/// when the timer got cancelled.
#[derive(Debug)]
pub struct DelayTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl DelayTimer {
    fn cancel(self) {
        self.handle.abort();
    }
}

/// Folds device and media status into the single casting flag.
pub struct StatusAggregator {
    switch_off_delay: Duration,
    casting: bool,
    state: watch::Sender<ExposedState>,
    timers: mpsc::UnboundedSender<Event>,
    pending: Option<DelayTimer>,
    next_generation: u64,
}

impl StatusAggregator {
    pub fn new(
        switch_off_delay: Duration,
        state: watch::Sender<ExposedState>,
        timers: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            switch_off_delay,
            casting: false,
            state,
            timers,
            pending: None,
            next_generation: 0,
        }
    }

    pub fn is_casting(&self) -> bool {
        self.casting
    }

    pub fn has_pending_switch_off(&self) -> bool {
        self.pending.is_some()
    }

    /// Map a media status to the casting flag. Missing status is ignored.
    pub fn process_media_status(&mut self, status: Option<&MediaStatus>) {
        let Some(status) = status else {
            debug!("Ignoring empty media status");
            return;
        };
        debug!("Player state {}", status.player_state);
        self.set_is_casting(status.player_state.is_casting());
    }

    /// The only place the casting flag changes.
    ///
    /// On is applied to both properties at once. Off is applied to
    /// `casting_on` at once and to `streaming_detected` after the switch-off
    /// delay, unless casting resumes first.
    pub fn set_is_casting(&mut self, casting: bool) {
        if casting == self.casting {
            return;
        }
        self.casting = casting;
        info!("Casting {}", if casting { "started" } else { "stopped" });

        self.cancel_pending();
        self.state.send_if_modified(|state| {
            let changed = state.casting_on != casting;
            state.casting_on = casting;
            changed
        });

        if casting || self.switch_off_delay.is_zero() {
            self.set_streaming_detected(casting);
        } else {
            self.schedule_switch_off();
        }
    }

    /// Called when a delayed-off timer fires.
    pub fn on_switch_off_elapsed(&mut self, generation: u64) {
        match self.pending.as_ref() {
            Some(timer) if timer.generation == generation => {
                self.pending = None;
                if !self.casting {
                    self.set_streaming_detected(false);
                }
            }
            _ => debug!("Dropping stale switch-off timer {}", generation),
        }
    }

    fn schedule_switch_off(&mut self) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let deadline = tokio::time::Instant::now() + self.switch_off_delay;
        let timers = self.timers.clone();

        debug!("Streaming off in {}ms", self.switch_off_delay.as_millis());
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = timers.send(Event::SwitchOffElapsed { generation });
        });
        self.pending = Some(DelayTimer { generation, handle });
    }

    fn cancel_pending(&mut self) {
        if let Some(timer) = self.pending.take() {
            debug!("Cancelled switch-off timer {}", timer.generation);
            timer.cancel();
        }
    }

    fn set_streaming_detected(&mut self, detected: bool) {
        let changed = self.state.send_if_modified(|state| {
            let changed = state.streaming_detected != detected;
            state.streaming_detected = detected;
            changed
        });
        if changed {
            info!("Streaming {}", if detected { "detected" } else { "no longer detected" });
        }
    }
}

impl Drop for StatusAggregator {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
