//! Asynchronous notifications delivered by `NOTIFY`.

/// A notification received on a listened channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    channel: String,
    pid: u32,
    payload: String,
}

impl Notification {
    pub fn new(channel: impl Into<String>, pid: u32, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            pid,
            payload: payload.into(),
        }
    }

    /// Channel the notification was sent on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Process ID of the notifying backend.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Payload string; empty if none was given.
    pub fn payload(&self) -> &str {
        &self.payload
    }
}
