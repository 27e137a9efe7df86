//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::detector::DetectorStatus;
use crate::events::DetectorEvent;

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from clients to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Run one probe and wait for its result
    CheckNow,

    /// Enable or disable continuous probing
    SetPeriodic { enabled: bool },

    /// Pause or resume probing
    SetPaused { paused: bool },

    /// Change the probe interval (clamped to 0.5s)
    SetInterval { seconds: f64 },

    /// Notify on every probe instead of only on changes
    SetNotifyEveryProbe { enabled: bool },

    /// Subscribe to detector events
    Subscribe,
}

/// Messages from the daemon to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Outcome of a `check_now` request, empty when the probe was absorbed
    CheckResult { muted: Option<bool> },

    /// Setting applied
    Ok,

    /// Subscription confirmed
    Subscribed,

    /// Pushed to subscribed clients
    Event { event: DetectorEvent },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    pub detector: DetectorStatus,
}

impl DaemonStatus {
    pub fn new(uptime_secs: u64, detector: DetectorStatus) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
            detector,
        }
    }
}
