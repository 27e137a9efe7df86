//! Configuration loading and management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::audio::DEFAULT_PLAYER;
use crate::detector::{clamp_probe_interval, DEFAULT_MUTE_THRESHOLD};

/// File name of the probe clip inside the data directory
pub const DEFAULT_CLIP_NAME: &str = "silence.wav";

/// Detector settings
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Delay between periodic probes, between 0.5s and one day
    pub probe_interval: Duration,

    /// Probes completing faster than this are classified as muted
    pub mute_threshold: Duration,

    /// Notify on every probe instead of only on changes
    pub notify_every_probe: bool,

    /// Start probing continuously as soon as the detector runs
    pub periodic: bool,

    /// Near-silent clip played by every probe
    pub clip_path: PathBuf,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(1),
            mute_threshold: DEFAULT_MUTE_THRESHOLD,
            notify_every_probe: false,
            periodic: true,
            clip_path: PathBuf::from(DEFAULT_CLIP_NAME),
        }
    }
}

impl DetectorConfig {
    /// Set the probe interval in seconds, clamped to the minimum
    pub fn with_probe_interval(mut self, seconds: f64) -> Self {
        self.probe_interval = clamp_probe_interval(seconds);
        self
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Player executable for probe playback
    pub player: String,

    /// Arguments passed to the player before the clip path
    pub player_args: Vec<String>,

    /// Whether the clip path came from the environment
    pub custom_clip: bool,

    pub detector: DetectorConfig,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("mute-probe");

        let socket_path = lookup("MUTE_PROBE_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let custom_clip = lookup("MUTE_PROBE_CLIP");
        let clip_path = custom_clip
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(DEFAULT_CLIP_NAME));

        let mut detector = DetectorConfig {
            clip_path,
            ..DetectorConfig::default()
        };

        if let Some(seconds) = parse_var::<f64, _>(&lookup, "MUTE_PROBE_INTERVAL")? {
            detector = detector.with_probe_interval(seconds);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "MUTE_PROBE_THRESHOLD_MS")? {
            detector.mute_threshold = Duration::from_millis(ms);
        }
        if let Some(flag) = flag_var(&lookup, "MUTE_PROBE_NOTIFY_EVERY")? {
            detector.notify_every_probe = flag;
        }
        if let Some(flag) = flag_var(&lookup, "MUTE_PROBE_PERIODIC")? {
            detector.periodic = flag;
        }

        Ok(Self {
            socket_path,
            data_dir,
            player: lookup("MUTE_PROBE_PLAYER").unwrap_or_else(|| DEFAULT_PLAYER.to_string()),
            player_args: lookup("MUTE_PROBE_PLAYER_ARGS")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            custom_clip: custom_clip.is_some(),
            detector,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        })
        .transpose()
}

fn flag_var<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => bail!("invalid flag for {key}: {raw:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_with(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load_with(&[("HOME", "/home/probe")]).unwrap();
        assert!(config.socket_path.to_string_lossy().contains("mute-probe"));
        assert_eq!(
            config.detector.clip_path,
            PathBuf::from("/home/probe/.local/share/mute-probe/silence.wav")
        );
        assert!(!config.custom_clip);
        assert!(config.detector.periodic);
        assert!(!config.detector.notify_every_probe);
        assert_eq!(config.detector.probe_interval, Duration::from_secs(1));
        assert_eq!(config.detector.mute_threshold, Duration::from_millis(100));
        assert_eq!(config.player, DEFAULT_PLAYER);
        assert!(config.player_args.is_empty());
    }

    #[test]
    fn test_config_overrides() {
        let config = load_with(&[
            ("HOME", "/home/probe"),
            ("MUTE_PROBE_CLIP", "/opt/clips/blank.wav"),
            ("MUTE_PROBE_INTERVAL", "2.5"),
            ("MUTE_PROBE_THRESHOLD_MS", "80"),
            ("MUTE_PROBE_NOTIFY_EVERY", "yes"),
            ("MUTE_PROBE_PERIODIC", "off"),
            ("MUTE_PROBE_PLAYER", "aplay"),
            ("MUTE_PROBE_PLAYER_ARGS", "-q  --device=default"),
            ("MUTE_PROBE_SOCKET", "/tmp/probe.sock"),
        ])
        .unwrap();

        assert!(config.custom_clip);
        assert_eq!(config.detector.clip_path, PathBuf::from("/opt/clips/blank.wav"));
        assert_eq!(config.detector.probe_interval, Duration::from_millis(2500));
        assert_eq!(config.detector.mute_threshold, Duration::from_millis(80));
        assert!(config.detector.notify_every_probe);
        assert!(!config.detector.periodic);
        assert_eq!(config.player, "aplay");
        assert_eq!(config.player_args, vec!["-q", "--device=default"]);
        assert_eq!(config.socket_path, PathBuf::from("/tmp/probe.sock"));
    }

    #[test]
    fn test_interval_override_is_clamped() {
        let config = load_with(&[("HOME", "/h"), ("MUTE_PROBE_INTERVAL", "0.1")]).unwrap();
        assert_eq!(config.detector.probe_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(load_with(&[("HOME", "/h"), ("MUTE_PROBE_INTERVAL", "soon")]).is_err());
        assert!(load_with(&[("HOME", "/h"), ("MUTE_PROBE_PERIODIC", "maybe")]).is_err());
        assert!(load_with(&[]).is_err());
    }
}
