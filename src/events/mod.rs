//! Events broadcast by the detector
//!
//! Subscribers receive mute classifications and lifecycle transitions
//! as they are processed on the detector task.

use serde::{Deserialize, Serialize};

/// Events emitted by the detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorEvent {
    /// A probe produced a notification
    MuteChanged {
        /// Classified mute state
        muted: bool,
        /// Time from playback request to completion
        elapsed_ms: u64,
    },

    /// The audio service dropped a completion without signalling
    ProbeAborted,

    /// Probing suspended (host entered background)
    Paused,

    /// Probing resumed (host entering foreground)
    Resumed,
}

impl std::fmt::Display for DetectorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorEvent::MuteChanged { muted: true, elapsed_ms } => {
                write!(f, "MUTED ({}ms)", elapsed_ms)
            }
            DetectorEvent::MuteChanged { muted: false, elapsed_ms } => {
                write!(f, "UNMUTED ({}ms)", elapsed_ms)
            }
            DetectorEvent::ProbeAborted => write!(f, "PROBE_ABORTED"),
            DetectorEvent::Paused => write!(f, "PAUSED"),
            DetectorEvent::Resumed => write!(f, "RESUMED"),
        }
    }
}
