//! Audio playback seam
//!
//! The detector only needs "play this clip and tell me when it is done".
//! Platform backends implement [`AudioService`]; the crate ships a
//! [`ProcessPlayer`] that drives a command-line player.

mod process;
#[cfg(test)]
pub(crate) mod scripted;

use std::path::PathBuf;

use tokio::sync::oneshot;

use crate::clip::Clip;

pub use process::{ProcessPlayer, DEFAULT_PLAYER};

/// Handle to a clip loaded into an audio service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundId(pub u32);

/// Errors allocating a playback handle
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio player `{0}` is not available")]
    PlayerUnavailable(String),

    #[error("failed to open clip {path}: {source}")]
    ClipUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audio backend refused to allocate a sound: {0}")]
    Allocation(String),
}

/// Playback service used by the detector
///
/// All methods are called from the detector task.
pub trait AudioService: Send + 'static {
    /// Allocate a playback handle for `clip`
    fn load(&mut self, clip: &Clip) -> Result<SoundId, AudioError>;

    /// Start playback and return immediately.
    ///
    /// The receiver resolves exactly once when playback finishes. Dropping
    /// the sender without sending aborts the probe.
    fn play(&mut self, sound: SoundId) -> oneshot::Receiver<()>;

    /// Release a handle returned by [`AudioService::load`]
    fn unload(&mut self, sound: SoundId);
}
