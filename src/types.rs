//! Data types for the lamp session.

/// Default timer duration in minutes, applied until the caller configures one.
pub const DEFAULT_TIMER_DURATION_MINS: u16 = 15;

/// Minimum configurable timer duration in minutes.
pub const MIN_TIMER_DURATION_MINS: u16 = 1;

/// Maximum configurable timer duration in minutes.
pub const MAX_TIMER_DURATION_MINS: u16 = 60;

/// The believed state of the lamp.
///
/// Owned by the session state machine and mutated only by decoded
/// notifications, countdown ticks, and optimistic updates right after a
/// command is sent. Everything else observes snapshots of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    /// Whether the lamp is believed to be on.
    pub is_on: bool,
    /// Seconds left on the device's shutoff timer, mirrored client-side.
    pub timer_remaining_secs: u16,
    /// Configured timer duration in minutes (1-60). Applied on the next
    /// turn-on; not confirmed by the device.
    pub timer_duration_mins: u16,
}

impl DeviceState {
    /// Formats the remaining timer as `M:SS` for display.
    #[must_use]
    pub fn format_remaining(&self) -> String {
        let minutes = self.timer_remaining_secs / 60;
        let seconds = self.timer_remaining_secs % 60;
        format!("{minutes}:{seconds:02}")
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            is_on: false,
            timer_remaining_secs: 0,
            timer_duration_mins: DEFAULT_TIMER_DURATION_MINS,
        }
    }
}
