//! Playback through an external command-line player
//!
//! Each probe spawns the player with the clip path as its last argument and
//! signals completion when the process exits successfully. A failed player
//! drops the completion so the probe aborts instead of being classified.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{AudioError, AudioService, SoundId};
use crate::clip::Clip;

/// Player used when none is configured
#[cfg(target_os = "macos")]
pub const DEFAULT_PLAYER: &str = "afplay";
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_PLAYER: &str = "paplay";

/// Audio service backed by a player executable
#[derive(Debug)]
pub struct ProcessPlayer {
    program: String,
    args: Vec<String>,
    sounds: HashMap<SoundId, PathBuf>,
    next_id: u32,
}

impl ProcessPlayer {
    /// Create a player that runs `program <clip>`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            sounds: HashMap::new(),
            next_id: 1,
        }
    }

    /// Extra arguments placed before the clip path
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for ProcessPlayer {
    fn default() -> Self {
        Self::new(DEFAULT_PLAYER)
    }
}

impl AudioService for ProcessPlayer {
    fn load(&mut self, clip: &Clip) -> Result<SoundId, AudioError> {
        let program = find_program(&self.program)
            .ok_or_else(|| AudioError::PlayerUnavailable(self.program.clone()))?;

        std::fs::File::open(clip.path()).map_err(|source| AudioError::ClipUnreadable {
            path: clip.path().to_owned(),
            source,
        })?;

        let id = SoundId(self.next_id);
        self.next_id += 1;
        self.sounds.insert(id, clip.path().to_owned());

        info!(?program, clip = ?clip.path(), ?id, "sound loaded");
        Ok(id)
    }

    fn play(&mut self, sound: SoundId) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();

        let Some(path) = self.sounds.get(&sound) else {
            warn!(?sound, "play requested for unknown sound");
            return done_rx;
        };

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(mut child) => {
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) if status.success() => {
                            let _ = done_tx.send(());
                        }
                        // Nothing was rendered, so the timing means nothing
                        Ok(status) => {
                            warn!(?status, "player exited with failure, probe aborted");
                        }
                        Err(e) => {
                            warn!(?e, "failed to wait for player");
                        }
                    }
                });
            }
            Err(e) => {
                warn!(?e, program = %self.program, "failed to spawn player");
            }
        }

        done_rx
    }

    fn unload(&mut self, sound: SoundId) {
        if self.sounds.remove(&sound).is_some() {
            debug!(?sound, "sound unloaded");
        }
    }
}

/// Locate `program` directly or on `PATH`
fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_owned());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}
