//! Host lifecycle signals
//!
//! The detector pauses while the host is in the background. The daemon
//! drives this from Unix signals and shuts down on SIGTERM/SIGINT.

mod shutdown;
mod signals;

use serde::{Deserialize, Serialize};

pub use shutdown::ShutdownSignal;
pub use signals::SignalLifecycle;

/// Lifecycle transitions reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Host moved to the background
    EnteredBackground,
    /// Host is returning to the foreground
    EnteringForeground,
}

impl LifecycleEvent {
    /// Pause state this event maps to
    pub fn pauses(self) -> bool {
        matches!(self, LifecycleEvent::EnteredBackground)
    }
}
