//! Core probe state machine
//!
//! Owns every flag of the probe cycle and decides what should happen next.
//! The machine never touches audio or timers itself: each transition returns
//! the [`Action`]s the detector task has to carry out.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DetectorConfig;

/// Lowest probe interval the detector will ever run with
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Highest probe interval, one day. Larger requests are lowered to it
pub const MAX_PROBE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Playback that completes faster than this was discarded by a muted output
pub const DEFAULT_MUTE_THRESHOLD: Duration = Duration::from_millis(100);

/// Side effects requested by a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Request playback of the probe clip
    Play,
    /// Arm a one-shot timer that fires after the given delay
    Schedule(Duration),
    /// Deliver a classification to the listener and pending ticket
    Notify { muted: bool, elapsed: Duration },
}

/// Snapshot of the detector state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorStatus {
    pub is_muted: bool,
    pub is_probing: bool,
    pub probe_scheduled: bool,
    pub is_paused: bool,
    pub periodic_enabled: bool,
    pub probe_interval_ms: u64,
    pub notify_every_probe: bool,
    pub mute_threshold_ms: u64,
    /// Audio could not be allocated, probes are no-ops
    pub inert: bool,
    pub probes_completed: u64,
}

/// Classify a probe: playback that finished under the threshold is muted.
///
/// An elapsed time exactly equal to the threshold counts as unmuted.
pub fn classify(elapsed: Duration, threshold: Duration) -> bool {
    elapsed < threshold
}

/// Convert a requested interval in seconds into a usable one.
///
/// Anything below [`MIN_PROBE_INTERVAL`], including NaN and negative values,
/// is raised to the minimum. Anything above [`MAX_PROBE_INTERVAL`], including
/// infinity and values that overflow a `Duration`, is lowered to the maximum.
pub fn clamp_probe_interval(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds < MIN_PROBE_INTERVAL.as_secs_f64() {
        warn!(
            requested = seconds,
            min_secs = MIN_PROBE_INTERVAL.as_secs_f64(),
            "probe interval below minimum, clamping"
        );
        return MIN_PROBE_INTERVAL;
    }

    match Duration::try_from_secs_f64(seconds) {
        Ok(interval) if interval <= MAX_PROBE_INTERVAL => interval.max(MIN_PROBE_INTERVAL),
        _ => {
            warn!(
                requested = seconds,
                max_secs = MAX_PROBE_INTERVAL.as_secs_f64(),
                "probe interval above maximum, clamping"
            );
            MAX_PROBE_INTERVAL
        }
    }
}

/// The probe cycle state machine
#[derive(Debug)]
pub struct ProbeMachine {
    is_muted: bool,
    /// Playback requested, completion not yet received
    is_probing: bool,
    /// A timer is pending and has not fired yet
    probe_scheduled: bool,
    is_paused: bool,
    periodic: bool,
    inert: bool,
    probe_interval: Duration,
    mute_threshold: Duration,
    notify_every_probe: bool,
    probe_started_at: Option<Instant>,
    probes_completed: u64,
}

impl ProbeMachine {
    /// Create a machine from configuration
    pub fn new(config: &DetectorConfig) -> Self {
        let probe_interval = if config.probe_interval < MIN_PROBE_INTERVAL
            || config.probe_interval > MAX_PROBE_INTERVAL
        {
            clamp_probe_interval(config.probe_interval.as_secs_f64())
        } else {
            config.probe_interval
        };

        Self {
            is_muted: false,
            is_probing: false,
            probe_scheduled: false,
            is_paused: false,
            periodic: config.periodic,
            inert: false,
            probe_interval,
            mute_threshold: config.mute_threshold,
            notify_every_probe: config.notify_every_probe,
            probe_started_at: None,
            probes_completed: 0,
        }
    }

    /// Disable probing permanently
    pub fn mark_inert(&mut self) {
        self.inert = true;
    }

    /// Kick off periodic probing when the detector starts
    pub fn start(&mut self) -> Option<Action> {
        self.try_schedule()
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn is_probing(&self) -> bool {
        self.is_probing
    }

    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    /// Start a probe unless one is in flight, the detector is paused or inert
    pub fn begin_probe(&mut self, now: Instant) -> Option<Action> {
        if self.inert {
            debug!("probe ignored, detector is inert");
            return None;
        }
        if self.is_probing {
            debug!("probe ignored, another probe is in flight");
            return None;
        }
        if self.is_paused {
            debug!("probe ignored, detector is paused");
            return None;
        }

        self.is_probing = true;
        self.probe_started_at = Some(now);
        Some(Action::Play)
    }

    /// Handle the audio completion signal for the in-flight probe
    pub fn finish_probe(&mut self, finished_at: Instant) -> Vec<Action> {
        let Some(started_at) = self.probe_started_at.take().filter(|_| self.is_probing) else {
            warn!("completion received with no probe in flight");
            return Vec::new();
        };
        self.is_probing = false;
        self.probes_completed += 1;

        let elapsed = finished_at.saturating_duration_since(started_at);
        let muted = classify(elapsed, self.mute_threshold);

        debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            muted,
            "probe classified"
        );

        let mut actions = Vec::with_capacity(2);
        if muted != self.is_muted || self.notify_every_probe {
            if muted != self.is_muted {
                info!(from = self.is_muted, to = muted, "mute state changed");
            }
            self.is_muted = muted;
            actions.push(Action::Notify { muted, elapsed });
        }
        actions.extend(self.try_schedule());
        actions
    }

    /// Handle a completion signal that was dropped without firing
    pub fn abort_probe(&mut self) -> Option<Action> {
        if !self.is_probing {
            return None;
        }
        self.is_probing = false;
        self.probe_started_at = None;
        self.try_schedule()
    }

    /// Handle a pending timer firing
    pub fn timer_fired(&mut self, now: Instant) -> Option<Action> {
        self.probe_scheduled = false;
        if self.is_paused {
            debug!("timer fired while paused, cycle abandoned");
            return None;
        }
        self.begin_probe(now)
    }

    /// Enable or disable continuous probing
    pub fn set_periodic(&mut self, enabled: bool) -> Option<Action> {
        self.periodic = enabled;
        if enabled && !self.is_probing && !self.is_paused {
            self.try_schedule()
        } else {
            None
        }
    }

    /// Enter or leave the paused state
    pub fn set_paused(&mut self, paused: bool) -> Option<Action> {
        let was_paused = self.is_paused;
        self.is_paused = paused;

        if was_paused && !paused && !self.is_probing {
            self.try_schedule()
        } else {
            None
        }
    }

    /// Set the probe interval in seconds, clamped to the minimum
    pub fn set_probe_interval(&mut self, seconds: f64) {
        self.probe_interval = clamp_probe_interval(seconds);
    }

    pub fn set_notify_every_probe(&mut self, enabled: bool) {
        self.notify_every_probe = enabled;
    }

    pub fn set_mute_threshold(&mut self, threshold: Duration) {
        self.mute_threshold = threshold;
    }

    /// Current state snapshot
    pub fn status(&self) -> DetectorStatus {
        DetectorStatus {
            is_muted: self.is_muted,
            is_probing: self.is_probing,
            probe_scheduled: self.probe_scheduled,
            is_paused: self.is_paused,
            periodic_enabled: self.periodic,
            probe_interval_ms: self.probe_interval.as_millis() as u64,
            notify_every_probe: self.notify_every_probe,
            mute_threshold_ms: self.mute_threshold.as_millis() as u64,
            inert: self.inert,
            probes_completed: self.probes_completed,
        }
    }

    /// Arm the next timer if periodic mode wants one and none is pending
    fn try_schedule(&mut self) -> Option<Action> {
        if self.inert || !self.periodic || self.probe_scheduled {
            return None;
        }
        self.probe_scheduled = true;
        Some(Action::Schedule(self.probe_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_machine(periodic: bool, notify_every_probe: bool) -> ProbeMachine {
        let config = DetectorConfig {
            periodic,
            notify_every_probe,
            probe_interval: Duration::from_secs(1),
            ..DetectorConfig::default()
        };
        ProbeMachine::new(&config)
    }

    /// Run one probe that completes after `elapsed`
    fn run_probe(machine: &mut ProbeMachine, elapsed: Duration) -> Vec<Action> {
        let start = Instant::now();
        assert_eq!(machine.begin_probe(start), Some(Action::Play));
        machine.finish_probe(start + elapsed)
    }

    fn notifications(actions: &[Action]) -> Vec<bool> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Notify { muted, .. } => Some(*muted),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_classify_threshold_boundary() {
        let threshold = DEFAULT_MUTE_THRESHOLD;
        assert!(classify(Duration::ZERO, threshold));
        assert!(classify(Duration::from_millis(50), threshold));
        assert!(classify(Duration::from_micros(99_999), threshold));
        assert!(!classify(Duration::from_millis(100), threshold));
        assert!(!classify(Duration::from_millis(101), threshold));
        assert!(!classify(Duration::from_secs(2), threshold));
    }

    #[test]
    fn test_interval_clamped_to_minimum() {
        assert_eq!(clamp_probe_interval(0.1), MIN_PROBE_INTERVAL);
        assert_eq!(clamp_probe_interval(0.0), MIN_PROBE_INTERVAL);
        assert_eq!(clamp_probe_interval(-3.0), MIN_PROBE_INTERVAL);
        assert_eq!(clamp_probe_interval(f64::NAN), MIN_PROBE_INTERVAL);
        assert_eq!(clamp_probe_interval(0.5), MIN_PROBE_INTERVAL);
        assert_eq!(clamp_probe_interval(2.5), Duration::from_millis(2500));
    }

    #[test]
    fn test_huge_interval_clamped_to_maximum() {
        assert_eq!(clamp_probe_interval(1e30), MAX_PROBE_INTERVAL);
        assert_eq!(clamp_probe_interval(f64::INFINITY), MAX_PROBE_INTERVAL);
        assert_eq!(clamp_probe_interval(f64::MAX), MAX_PROBE_INTERVAL);
        assert_eq!(clamp_probe_interval(86_401.0), MAX_PROBE_INTERVAL);
        assert_eq!(clamp_probe_interval(86_400.0), MAX_PROBE_INTERVAL);
        assert_eq!(clamp_probe_interval(3600.0), Duration::from_secs(3600));
        assert_eq!(clamp_probe_interval(f64::NEG_INFINITY), MIN_PROBE_INTERVAL);
    }

    #[test]
    fn test_setter_caps_infinite_interval() {
        let mut machine = create_machine(true, false);
        machine.set_probe_interval(f64::INFINITY);
        assert_eq!(machine.probe_interval(), MAX_PROBE_INTERVAL);
        assert_eq!(machine.status().probe_interval_ms, 86_400_000);
    }

    #[test]
    fn test_setter_clamps_interval() {
        let mut machine = create_machine(true, false);
        machine.set_probe_interval(0.2);
        assert_eq!(machine.probe_interval(), MIN_PROBE_INTERVAL);
        assert_eq!(machine.status().probe_interval_ms, 500);
    }

    #[test]
    fn test_config_interval_below_minimum_is_clamped() {
        let config = DetectorConfig {
            probe_interval: Duration::from_millis(10),
            ..DetectorConfig::default()
        };
        let machine = ProbeMachine::new(&config);
        assert_eq!(machine.probe_interval(), MIN_PROBE_INTERVAL);
    }

    #[test]
    fn test_initial_state() {
        let machine = create_machine(true, false);
        let status = machine.status();
        assert!(!status.is_muted);
        assert!(!status.is_probing);
        assert!(!status.probe_scheduled);
        assert!(!status.is_paused);
    }

    #[test]
    fn test_start_schedules_when_periodic() {
        let mut machine = create_machine(true, false);
        assert_eq!(machine.start(), Some(Action::Schedule(Duration::from_secs(1))));
        assert!(machine.status().probe_scheduled);

        let mut machine = create_machine(false, false);
        assert_eq!(machine.start(), None);
    }

    #[test]
    fn test_overlapping_probe_rejected() {
        let mut machine = create_machine(false, false);
        let now = Instant::now();
        assert_eq!(machine.begin_probe(now), Some(Action::Play));
        assert_eq!(machine.begin_probe(now), None);
        assert!(machine.is_probing());
    }

    #[test]
    fn test_probe_rejected_while_paused() {
        let mut machine = create_machine(true, false);
        machine.set_paused(true);
        assert_eq!(machine.begin_probe(Instant::now()), None);
        assert!(!machine.is_probing());
    }

    #[test]
    fn test_timer_fired_while_paused_abandons_cycle() {
        let mut machine = create_machine(true, false);
        assert!(machine.start().is_some());
        machine.set_paused(true);

        assert_eq!(machine.timer_fired(Instant::now()), None);
        let status = machine.status();
        assert!(!status.probe_scheduled);
        assert!(!status.is_probing);
    }

    #[test]
    fn test_timer_fired_starts_probe() {
        let mut machine = create_machine(true, false);
        assert!(machine.start().is_some());
        assert_eq!(machine.timer_fired(Instant::now()), Some(Action::Play));
        assert!(!machine.status().probe_scheduled);
    }

    #[test]
    fn test_unpause_schedules_exactly_one_probe() {
        let mut machine = create_machine(true, false);
        machine.set_paused(true);

        assert_eq!(
            machine.set_paused(false),
            Some(Action::Schedule(Duration::from_secs(1)))
        );
        // Already scheduled, a repeated transition must not arm a second timer
        machine.set_paused(true);
        assert_eq!(machine.set_paused(false), None);
    }

    #[test]
    fn test_unpause_without_prior_pause_does_nothing() {
        let mut machine = create_machine(true, false);
        assert_eq!(machine.set_paused(false), None);
    }

    #[test]
    fn test_unpause_while_probing_defers_to_completion() {
        let mut machine = create_machine(true, false);
        let start = Instant::now();
        assert_eq!(machine.begin_probe(start), Some(Action::Play));
        machine.set_paused(true);
        assert_eq!(machine.set_paused(false), None);

        // The in-flight probe reschedules on completion
        let actions = machine.finish_probe(start + Duration::from_millis(20));
        assert!(actions.contains(&Action::Schedule(Duration::from_secs(1))));
    }

    #[test]
    fn test_probe_in_flight_classifies_after_pause() {
        let mut machine = create_machine(true, false);
        let start = Instant::now();
        machine.begin_probe(start);
        machine.set_paused(true);

        let actions = machine.finish_probe(start + Duration::from_millis(10));
        assert_eq!(notifications(&actions), vec![true]);
        assert!(machine.is_muted());
    }

    #[test]
    fn test_set_periodic_schedules_once() {
        let mut machine = create_machine(false, false);
        assert!(machine.set_periodic(true).is_some());
        assert_eq!(machine.set_periodic(true), None);
    }

    #[test]
    fn test_set_periodic_respects_guards() {
        let mut machine = create_machine(false, false);
        machine.set_paused(true);
        assert_eq!(machine.set_periodic(true), None);

        let mut machine = create_machine(false, false);
        machine.begin_probe(Instant::now());
        assert_eq!(machine.set_periodic(true), None);
    }

    #[test]
    fn test_disabled_periodic_stops_rescheduling() {
        let mut machine = create_machine(true, false);
        assert!(machine.start().is_some());
        machine.set_periodic(false);

        // The pending timer still fires once
        assert_eq!(machine.timer_fired(Instant::now()), Some(Action::Play));
        let actions = machine.finish_probe(Instant::now() + Duration::from_millis(300));
        assert!(!actions.iter().any(|a| matches!(a, Action::Schedule(_))));
    }

    #[test]
    fn test_notify_on_change_only() {
        let mut machine = create_machine(false, false);
        let first = run_probe(&mut machine, Duration::from_millis(30));
        let second = run_probe(&mut machine, Duration::from_millis(30));
        assert_eq!(notifications(&first), vec![true]);
        assert!(notifications(&second).is_empty());
    }

    #[test]
    fn test_notify_every_probe() {
        let mut machine = create_machine(false, true);
        let first = run_probe(&mut machine, Duration::from_millis(30));
        let second = run_probe(&mut machine, Duration::from_millis(30));
        assert_eq!(notifications(&first), vec![true]);
        assert_eq!(notifications(&second), vec![true]);
    }

    #[test]
    fn test_unmuted_first_probe_does_not_notify() {
        let mut machine = create_machine(false, false);
        let actions = run_probe(&mut machine, Duration::from_millis(400));
        assert!(notifications(&actions).is_empty());
        assert_eq!(machine.status().probes_completed, 1);
    }

    #[test]
    fn test_periodic_scenario_notifications() {
        let mut machine = create_machine(true, false);
        assert!(machine.start().is_some());

        let mut notified = Vec::new();
        for elapsed_ms in [50, 50, 2000] {
            let now = Instant::now();
            assert_eq!(machine.timer_fired(now), Some(Action::Play));
            let actions = machine.finish_probe(now + Duration::from_millis(elapsed_ms));
            assert!(actions.contains(&Action::Schedule(Duration::from_secs(1))));
            notified.extend(notifications(&actions));
        }

        assert_eq!(notified, vec![true, false]);
        assert!(!machine.is_muted());
    }

    #[test]
    fn test_stale_completion_ignored() {
        let mut machine = create_machine(true, false);
        assert!(machine.finish_probe(Instant::now()).is_empty());
        assert_eq!(machine.status().probes_completed, 0);
    }

    #[test]
    fn test_abort_clears_flight_and_reschedules() {
        let mut machine = create_machine(true, false);
        machine.begin_probe(Instant::now());
        assert_eq!(
            machine.abort_probe(),
            Some(Action::Schedule(Duration::from_secs(1)))
        );
        assert!(!machine.is_probing());
        assert!(!machine.is_muted());
    }

    #[test]
    fn test_inert_machine_never_probes() {
        let mut machine = create_machine(true, false);
        machine.mark_inert();
        assert_eq!(machine.start(), None);
        assert_eq!(machine.begin_probe(Instant::now()), None);
        assert_eq!(machine.set_periodic(true), None);
        assert!(machine.status().inert);
    }

    #[test]
    fn test_custom_threshold() {
        let mut machine = create_machine(false, false);
        machine.set_mute_threshold(Duration::from_millis(250));
        let actions = run_probe(&mut machine, Duration::from_millis(200));
        assert_eq!(notifications(&actions), vec![true]);
    }
}
