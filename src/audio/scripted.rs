//! Scripted audio service for tests
//!
//! Completion delays are queued per probe, so tests running under a paused
//! tokio clock see exact elapsed times.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use super::{AudioError, AudioService, SoundId};
use crate::clip::Clip;

#[derive(Debug, Clone, Copy)]
enum Step {
    After(Duration),
    Hang,
    Drop,
}

#[derive(Default)]
struct Shared {
    steps: Mutex<VecDeque<Step>>,
    plays: AtomicUsize,
    unloads: AtomicUsize,
}

/// Test-side handle for scripting and inspecting a [`ScriptedAudio`]
#[derive(Clone)]
pub(crate) struct Script {
    shared: Arc<Shared>,
}

impl Script {
    /// Next probe completes after `delay`
    pub fn complete_after(&self, delay: Duration) -> &Self {
        self.push(Step::After(delay))
    }

    /// Next probe never completes
    pub fn hang(&self) -> &Self {
        self.push(Step::Hang)
    }

    /// Next probe drops its completion signal
    pub fn drop_completion(&self) -> &Self {
        self.push(Step::Drop)
    }

    pub fn plays(&self) -> usize {
        self.shared.plays.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.shared.unloads.load(Ordering::SeqCst)
    }

    fn push(&self, step: Step) -> &Self {
        self.shared.steps.lock().unwrap().push_back(step);
        self
    }
}

/// Audio service whose completions follow a script
pub(crate) struct ScriptedAudio {
    shared: Arc<Shared>,
    fail_load: bool,
    default_delay: Duration,
    hung: Vec<oneshot::Sender<()>>,
}

impl ScriptedAudio {
    pub fn new() -> (Self, Script) {
        let shared = Arc::new(Shared::default());
        let audio = Self {
            shared: Arc::clone(&shared),
            fail_load: false,
            default_delay: Duration::from_millis(300),
            hung: Vec::new(),
        };
        (audio, Script { shared })
    }

    /// Audio service that refuses to allocate a sound
    pub fn failing() -> (Self, Script) {
        let (mut audio, script) = Self::new();
        audio.fail_load = true;
        (audio, script)
    }
}

impl AudioService for ScriptedAudio {
    fn load(&mut self, _clip: &Clip) -> Result<SoundId, AudioError> {
        if self.fail_load {
            return Err(AudioError::Allocation("scripted failure".into()));
        }
        Ok(SoundId(1))
    }

    fn play(&mut self, _sound: SoundId) -> oneshot::Receiver<()> {
        self.shared.plays.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        let step = self
            .shared
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::After(self.default_delay));

        match step {
            Step::After(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(());
                });
            }
            Step::Hang => self.hung.push(tx),
            Step::Drop => drop(tx),
        }
        rx
    }

    fn unload(&mut self, _sound: SoundId) {
        self.shared.unloads.fetch_add(1, Ordering::SeqCst);
    }
}
