//! Mute detection
//!
//! A probe plays a near-silent clip and times how long the audio service
//! takes to report completion. Muted outputs discard the clip and finish
//! almost immediately; unmuted outputs take the clip's real duration.
//!
//! - [`ProbeMachine`]: flags, guards and classification, no I/O
//! - [`MuteDetector`]: the serialized task that runs the machine

mod machine;
mod service;

pub use machine::{
    classify, clamp_probe_interval, Action, DetectorStatus, ProbeMachine, DEFAULT_MUTE_THRESHOLD,
    MAX_PROBE_INTERVAL, MIN_PROBE_INTERVAL,
};
pub use service::{listener, DetectorError, Listener, MuteDetector, ProbeTicket};
