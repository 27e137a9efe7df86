//! Detector task and public handle
//!
//! Every piece of detector state lives on one tokio task. Handle commands,
//! lifecycle events, timer wake-ups and audio completions all arrive there as
//! messages, which keeps the in-flight and scheduled guards race free.

use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::machine::{Action, DetectorStatus, ProbeMachine};
use crate::audio::{AudioService, SoundId};
use crate::clip::{Clip, ClipError};
use crate::config::DetectorConfig;
use crate::events::DetectorEvent;
use crate::lifecycle::LifecycleEvent;

/// Standing listener for mute notifications
pub type Listener = Arc<dyn Fn(bool) + Send + Sync + 'static>;

/// Wrap a closure as a [`Listener`]
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(bool) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Errors surfaced by the detector handle
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error(transparent)]
    Clip(#[from] ClipError),

    #[error("detector task has stopped")]
    Closed,
}

/// Result of a [`MuteDetector::check_once`] request.
///
/// Resolves to `Some(muted)` when the probe produced a notification and to
/// `None` when the request was absorbed or the probe finished silently.
#[derive(Debug)]
pub struct ProbeTicket {
    rx: oneshot::Receiver<bool>,
}

impl Future for ProbeTicket {
    type Output = Option<bool>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

enum Command {
    CheckOnce(oneshot::Sender<bool>),
    SetPeriodic(bool),
    SetPaused(bool),
    SetProbeInterval(f64),
    SetNotifyEveryProbe(bool),
    SetMuteThreshold(Duration),
    SetListener(Option<Listener>),
    Status(oneshot::Sender<DetectorStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Messages posted back to the task by timers and audio completions
#[derive(Debug)]
enum Wakeup {
    TimerFired,
    ProbeFinished { finished_at: Instant },
    ProbeAborted,
}

/// Handle to a running mute detector
///
/// Cloning is cheap; the detector stops once every handle is dropped or
/// [`MuteDetector::shutdown`] is called.
#[derive(Clone)]
pub struct MuteDetector {
    command_tx: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<DetectorEvent>,
}

impl MuteDetector {
    /// Resolve the clip, load it into `audio` and start the detector task.
    ///
    /// A missing clip is fatal. An audio service that cannot load the clip
    /// leaves the detector running but inert. Must be called inside a tokio
    /// runtime.
    pub fn spawn<A: AudioService>(
        config: DetectorConfig,
        mut audio: A,
        lifecycle: Option<mpsc::Receiver<LifecycleEvent>>,
    ) -> Result<Self, DetectorError> {
        let clip = Clip::resolve(&config.clip_path)?;

        let mut machine = ProbeMachine::new(&config);
        let sound = match audio.load(&clip) {
            Ok(sound) => Some(sound),
            Err(e) => {
                error!(?e, clip = ?clip.path(), "audio unavailable, mute detection disabled");
                machine.mark_inert();
                None
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (wakeup_tx, wakeup_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(64);

        let task = DetectorTask {
            machine,
            audio,
            sound,
            listener: None,
            ticket: None,
            event_tx: event_tx.clone(),
            wakeup_tx,
        };
        tokio::spawn(task.run(command_rx, wakeup_rx, lifecycle));

        Ok(Self {
            command_tx,
            event_tx,
        })
    }

    /// Request a single probe
    pub fn check_once(&self) -> ProbeTicket {
        let (tx, rx) = oneshot::channel();
        self.send(Command::CheckOnce(tx));
        ProbeTicket { rx }
    }

    /// Enable or disable continuous probing.
    ///
    /// Enabling schedules the next probe right away unless one is in flight
    /// or the detector is paused. Disabling lets a pending timer fire once.
    pub fn set_periodic(&self, enabled: bool) {
        self.send(Command::SetPeriodic(enabled));
    }

    /// Suspend or resume probing.
    ///
    /// A probe already in flight still classifies. Resuming schedules a probe
    /// when periodic mode is on and nothing is in flight.
    pub fn set_paused(&self, paused: bool) {
        self.send(Command::SetPaused(paused));
    }

    /// Set the probe interval in seconds; values under 0.5 are raised to 0.5
    pub fn set_probe_interval(&self, seconds: f64) {
        self.send(Command::SetProbeInterval(seconds));
    }

    pub fn set_notify_every_probe(&self, enabled: bool) {
        self.send(Command::SetNotifyEveryProbe(enabled));
    }

    pub fn set_mute_threshold(&self, threshold: Duration) {
        self.send(Command::SetMuteThreshold(threshold));
    }

    /// Register or clear the standing listener
    pub fn set_listener(&self, listener: Option<Listener>) {
        self.send(Command::SetListener(listener));
    }

    /// Snapshot of the detector state after all earlier commands
    pub async fn status(&self) -> Result<DetectorStatus, DetectorError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Status(tx))
            .map_err(|_| DetectorError::Closed)?;
        rx.await.map_err(|_| DetectorError::Closed)
    }

    /// Subscribe to detector events
    pub fn subscribe(&self) -> broadcast::Receiver<DetectorEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the detector task and release the audio resource
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.command_tx.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            debug!("detector task has stopped, command dropped");
        }
    }
}

struct DetectorTask<A> {
    machine: ProbeMachine,
    audio: A,
    sound: Option<SoundId>,
    listener: Option<Listener>,
    /// Completion for the manual check currently in flight
    ticket: Option<oneshot::Sender<bool>>,
    event_tx: broadcast::Sender<DetectorEvent>,
    wakeup_tx: mpsc::UnboundedSender<Wakeup>,
}

impl<A: AudioService> DetectorTask<A> {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        mut wakeup_rx: mpsc::UnboundedReceiver<Wakeup>,
        mut lifecycle_rx: Option<mpsc::Receiver<LifecycleEvent>>,
    ) {
        info!(
            interval_ms = self.machine.probe_interval().as_millis() as u64,
            "mute detector started"
        );

        let initial = self.machine.start();
        self.apply(initial);

        let shutdown_ack = loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => {
                        if let ControlFlow::Break(ack) = self.handle_command(command) {
                            break Some(ack);
                        }
                    }
                    None => break None,
                },

                Some(wakeup) = wakeup_rx.recv() => self.handle_wakeup(wakeup),

                event = next_lifecycle(&mut lifecycle_rx) => match event {
                    Some(event) => self.handle_lifecycle(event),
                    None => {
                        debug!("lifecycle source closed");
                        lifecycle_rx = None;
                    }
                },
            }
        };

        if let Some(sound) = self.sound.take() {
            self.audio.unload(sound);
        }
        info!("mute detector stopped");

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<oneshot::Sender<()>> {
        match command {
            Command::CheckOnce(ticket) => {
                let action = self.machine.begin_probe(Instant::now());
                if action.is_some() {
                    self.ticket = Some(ticket);
                }
                self.apply(action);
            }
            Command::SetPeriodic(enabled) => {
                debug!(enabled, "periodic probing updated");
                let action = self.machine.set_periodic(enabled);
                self.apply(action);
            }
            Command::SetPaused(paused) => self.update_paused(paused),
            Command::SetProbeInterval(seconds) => self.machine.set_probe_interval(seconds),
            Command::SetNotifyEveryProbe(enabled) => self.machine.set_notify_every_probe(enabled),
            Command::SetMuteThreshold(threshold) => self.machine.set_mute_threshold(threshold),
            Command::SetListener(listener) => self.listener = listener,
            Command::Status(reply) => {
                let _ = reply.send(self.machine.status());
            }
            Command::Shutdown(ack) => return ControlFlow::Break(ack),
        }
        ControlFlow::Continue(())
    }

    fn handle_wakeup(&mut self, wakeup: Wakeup) {
        match wakeup {
            Wakeup::TimerFired => {
                let action = self.machine.timer_fired(Instant::now());
                self.apply(action);
            }
            Wakeup::ProbeFinished { finished_at } => {
                let actions = self.machine.finish_probe(finished_at);
                self.apply(actions);
                // A manual check that did not notify completes empty
                self.ticket = None;
            }
            Wakeup::ProbeAborted => {
                warn!("audio completion dropped, probe aborted");
                self.ticket = None;
                let action = self.machine.abort_probe();
                self.emit(DetectorEvent::ProbeAborted);
                self.apply(action);
            }
        }
    }

    fn handle_lifecycle(&mut self, event: LifecycleEvent) {
        debug!(?event, "lifecycle event");
        self.update_paused(event.pauses());
    }

    fn update_paused(&mut self, paused: bool) {
        let was_paused = self.machine.is_paused();
        let action = self.machine.set_paused(paused);

        if was_paused != paused {
            info!(paused, "detector pause state changed");
            self.emit(if paused {
                DetectorEvent::Paused
            } else {
                DetectorEvent::Resumed
            });
        }
        self.apply(action);
    }

    fn apply(&mut self, actions: impl IntoIterator<Item = Action>) {
        for action in actions {
            match action {
                Action::Play => self.play(),
                Action::Schedule(delay) => self.schedule(delay),
                Action::Notify { muted, elapsed } => self.notify(muted, elapsed),
            }
        }
    }

    fn play(&mut self) {
        let Some(sound) = self.sound else {
            return;
        };

        let completion = self.audio.play(sound);
        let wakeup_tx = self.wakeup_tx.clone();
        tokio::spawn(async move {
            let wakeup = match completion.await {
                Ok(()) => Wakeup::ProbeFinished {
                    finished_at: Instant::now(),
                },
                Err(_) => Wakeup::ProbeAborted,
            };
            let _ = wakeup_tx.send(wakeup);
        });
    }

    fn schedule(&self, delay: Duration) {
        debug!(delay_ms = delay.as_millis() as u64, "next probe scheduled");
        let wakeup_tx = self.wakeup_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = wakeup_tx.send(Wakeup::TimerFired);
        });
    }

    fn notify(&mut self, muted: bool, elapsed: Duration) {
        if let Some(listener) = &self.listener {
            listener(muted);
        }
        if let Some(ticket) = self.ticket.take() {
            let _ = ticket.send(muted);
        }
        self.emit(DetectorEvent::MuteChanged {
            muted,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    fn emit(&self, event: DetectorEvent) {
        debug!(%event, "emitting detector event");
        let _ = self.event_tx.send(event);
    }
}

async fn next_lifecycle(rx: &mut Option<mpsc::Receiver<LifecycleEvent>>) -> Option<LifecycleEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
