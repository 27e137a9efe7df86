//! Probe clip resolution
//!
//! The detector plays a short, near-silent clip. Resolving it is the only
//! construction step that is allowed to fail hard.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{debug, warn};

/// Clips longer than this still work but slow every unmuted probe down
pub const MAX_CLIP_DURATION: Duration = Duration::from_millis(500);

/// Length of the clip installed when none is configured. Unmuted playback
/// must outlast the mute threshold or every probe reads as muted
pub const DEFAULT_CLIP_DURATION: Duration = Duration::from_millis(300);

const SAMPLE_RATE: u32 = 44_100;

/// Errors resolving or writing the probe clip
#[derive(Debug, thiserror::Error)]
pub enum ClipError {
    #[error("probe clip not found at {0}")]
    Missing(PathBuf),

    #[error("failed to write probe clip {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
}

/// A resolved probe clip
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    path: PathBuf,
    /// Known for WAV files only
    duration: Option<Duration>,
}

impl Clip {
    /// Resolve the clip at `path`, failing if the file does not exist
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self, ClipError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ClipError::Missing(path.to_owned()));
        }

        let duration = if is_wav(path) { wav_duration(path) } else { None };
        match duration {
            Some(d) if d > MAX_CLIP_DURATION => {
                warn!(
                    ?path,
                    duration_ms = d.as_millis() as u64,
                    "probe clip is longer than recommended"
                );
            }
            Some(d) => debug!(?path, duration_ms = d.as_millis() as u64, "probe clip resolved"),
            None => debug!(?path, "probe clip resolved, duration unknown"),
        }

        Ok(Self {
            path: path.to_owned(),
            duration,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

fn wav_duration(path: &Path) -> Option<Duration> {
    let reader = match WavReader::open(path) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(?path, ?e, "could not read WAV header");
            return None;
        }
    };
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(
        reader.duration() as f64 / sample_rate as f64,
    ))
}

/// Write a near-silent mono clip of the given length and resolve it
pub fn write_silent_wav(path: impl AsRef<Path>, duration: Duration) -> Result<Clip, ClipError> {
    let path = path.as_ref();
    let write_err = |source| ClipError::Write {
        path: path.to_owned(),
        source,
    };

    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let file = File::create(path).map_err(|e| write_err(hound::Error::IoError(e)))?;
    let mut writer = WavWriter::new(BufWriter::new(file), spec).map_err(write_err)?;

    // One LSB of alternating dither so the output path cannot treat it as empty
    let frames = (duration.as_secs_f64() * SAMPLE_RATE as f64).round() as u32;
    for i in 0..frames {
        let sample: i16 = if i % 2 == 0 { 1 } else { -1 };
        writer.write_sample(sample).map_err(write_err)?;
    }
    writer.finalize().map_err(write_err)?;

    Clip::resolve(path)
}
