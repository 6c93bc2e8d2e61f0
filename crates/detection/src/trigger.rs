use std::time::{Duration, Instant};

/// Rate limit for recordings started by detections.
///
/// The gate closes for `cooldown` every time it fires, whether or not the
/// recorder then manages to start a clip.
#[derive(Clone, Debug)]
pub struct AutoTrigger {
    cooldown: Duration,
    last_fired: Option<Instant>,
}

impl AutoTrigger {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: None,
        }
    }

    /// Returns `true` if a recording should be started now.
    pub fn poll(&mut self, now: Instant, saw_target: bool) -> bool {
        if !saw_target {
            return false;
        }

        if let Some(last) = self.last_fired {
            if now.saturating_duration_since(last) < self.cooldown {
                return false;
            }
        }

        self.last_fired = Some(now);
        true
    }
}
