//! mute-probe: hardware mute switch detection
//!
//! The mute switch state is not exposed by the platform, so it is inferred
//! from audio timing: a near-silent clip played through a muted output
//! completes almost instantly, while an unmuted output takes the clip's real
//! duration.
//!
//! ```no_run
//! use mute_probe::{listener, DetectorConfig, MuteDetector, ProcessPlayer};
//!
//! # async fn run() -> Result<(), mute_probe::DetectorError> {
//! let config = DetectorConfig {
//!     clip_path: "silence.wav".into(),
//!     ..DetectorConfig::default()
//! };
//! let detector = MuteDetector::spawn(config, ProcessPlayer::default(), None)?;
//! detector.set_listener(Some(listener(|muted| println!("muted: {muted}"))));
//!
//! if let Some(muted) = detector.check_once().await {
//!     println!("probe says muted={muted}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod clip;
pub mod config;
pub mod detector;
pub mod events;
pub mod ipc;
pub mod lifecycle;

pub use audio::{AudioError, AudioService, ProcessPlayer, SoundId};
pub use clip::{Clip, ClipError};
pub use config::{Config, DetectorConfig};
pub use detector::{listener, DetectorError, DetectorStatus, Listener, MuteDetector, ProbeTicket};
pub use events::DetectorEvent;
pub use lifecycle::LifecycleEvent;
