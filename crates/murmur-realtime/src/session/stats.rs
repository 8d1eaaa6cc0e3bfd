/// Per-session counters, updated by the session and its link tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    audio_frames_sent: u64,
    control_frames_sent: u64,
    frames_dropped: u64,
    frames_received: u64,
    malformed_frames: u64,
    reconnects_scheduled: u64,
    connections: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&mut self, audio: bool) {
        if audio {
            self.audio_frames_sent += 1;
        } else {
            self.control_frames_sent += 1;
        }
    }

    pub(crate) fn record_dropped(&mut self) {
        self.frames_dropped += 1;
    }

    pub(crate) fn record_received(&mut self) {
        self.frames_received += 1;
    }

    pub(crate) fn record_malformed(&mut self) {
        self.malformed_frames += 1;
    }

    pub(crate) fn record_reconnect_scheduled(&mut self) {
        self.reconnects_scheduled += 1;
    }

    pub(crate) fn record_connection(&mut self) {
        self.connections += 1;
    }

    pub fn audio_frames_sent(&self) -> u64 {
        self.audio_frames_sent
    }

    pub fn control_frames_sent(&self) -> u64 {
        self.control_frames_sent
    }

    /// Frames refused by `send` because the session was not CONNECTED or the
    /// outbound queue was full.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames
    }

    pub fn reconnects_scheduled(&self) -> u64 {
        self.reconnects_scheduled
    }

    /// Successful handshakes, the first one included.
    pub fn connections(&self) -> u64 {
        self.connections
    }
}
