//! Unix signal lifecycle source
//!
//! SIGUSR1 reports the host entering the background, SIGUSR2 its return
//! to the foreground.

use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::LifecycleEvent;

/// Forwards SIGUSR1/SIGUSR2 to the detector as lifecycle events
pub struct SignalLifecycle {
    event_tx: mpsc::Sender<LifecycleEvent>,
}

impl SignalLifecycle {
    /// Create the source together with the receiver handed to the detector
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LifecycleEvent>) {
        let (event_tx, event_rx) = mpsc::channel(capacity);
        (Self { event_tx }, event_rx)
    }

    /// Listen for signals until the detector stops receiving
    pub async fn run(self) -> io::Result<()> {
        let mut background = signal(SignalKind::user_defined1())?;
        let mut foreground = signal(SignalKind::user_defined2())?;

        info!("lifecycle signals registered (SIGUSR1=background, SIGUSR2=foreground)");

        loop {
            let event = tokio::select! {
                Some(()) = background.recv() => LifecycleEvent::EnteredBackground,
                Some(()) = foreground.recv() => LifecycleEvent::EnteringForeground,
                else => break,
            };

            debug!(?event, "lifecycle signal received");
            if self.event_tx.send(event).await.is_err() {
                debug!("lifecycle receiver closed");
                break;
            }
        }
        Ok(())
    }
}
