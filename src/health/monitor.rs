//! Stall and fatal-error recovery for the attached media source.
//!
//! The monitor never touches the source itself. It consumes media signals and
//! ticks with an injected `Instant` and answers with at most one
//! [`RecoveryAction`] for the owner to carry out, so its behaviour is fully
//! deterministic under test.

use tokio::time::Instant;

use super::HealthConfig;
use crate::error::ErrorClass;
use crate::media::{FatalKind, MediaSignal};
use crate::models::HealthState;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const PROGRESS_EPSILON: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryAction {
    /// Seek just past the stuck position and resume playback.
    NudgeSeek { to: f64 },
    /// Ask the source to recover from a decode error without re-attaching.
    RecoverInPlace,
    /// Destroy the source and attach a fresh one to the same URL.
    Reinitialize,
    /// Stop retrying on our own and show the error class.
    Surface(ErrorClass),
}

#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    state: HealthState,
    waiting_since: Option<Instant>,
    last_position: f64,
    last_progress_at: Option<Instant>,
    cooldown_until: Option<Instant>,
    reinit_due: Option<Instant>,
    reinit_attempts: u32,
    media_recoveries: u32,
    problem: Option<ErrorClass>,
    stall_count: u32,
    has_played: bool,
    /// Retrying stopped until a fresh attach; `Stalled` is final until then.
    gave_up: bool,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            state: HealthState::Healthy,
            waiting_since: None,
            last_position: 0.0,
            last_progress_at: None,
            cooldown_until: None,
            reinit_due: None,
            reinit_attempts: 0,
            media_recoveries: 0,
            problem: None,
            stall_count: 0,
            has_played: false,
            gave_up: false,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Error class to show next to playback, if any.
    pub fn problem(&self) -> Option<ErrorClass> {
        self.problem
    }

    pub fn stall_count(&self) -> u32 {
        self.stall_count
    }

    /// Forgets everything, including retry budgets. Used for a fresh attach.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// Called after a `Reinitialize` was carried out. Retry budgets survive so
    /// the attempt cap still applies across re-attaches.
    pub fn on_reattached(&mut self) {
        self.waiting_since = None;
        self.last_position = 0.0;
        self.last_progress_at = None;
        self.cooldown_until = None;
        self.has_played = false;
        self.state = HealthState::Buffering;
    }

    pub fn on_signal(
        &mut self,
        signal: &MediaSignal,
        position: f64,
        now: Instant,
    ) -> Option<RecoveryAction> {
        match signal {
            MediaSignal::Playing => {
                if self.state != HealthState::Healthy {
                    log_info!("playback healthy again at {:.1}s", position);
                }
                self.state = HealthState::Healthy;
                self.waiting_since = None;
                self.reinit_attempts = 0;
                self.media_recoveries = 0;
                self.problem = None;
                self.gave_up = false;
                self.has_played = true;
                self.mark_progress(position, now);
                None
            }
            MediaSignal::Waiting => {
                if self.state == HealthState::Healthy {
                    self.state = HealthState::Buffering;
                }
                self.waiting_since.get_or_insert(now);
                self.check_stall(position, now)
            }
            MediaSignal::DurationChanged { .. } => None,
            MediaSignal::Fatal(err) => match err.kind {
                FatalKind::Network => self.on_network_fatal(now),
                FatalKind::Media => {
                    if self.media_recoveries < self.config.max_media_recoveries {
                        self.media_recoveries += 1;
                        self.state = HealthState::Recovering;
                        log_warn!(
                            "media error ({}); recovering in place, attempt {}",
                            err.message,
                            self.media_recoveries
                        );
                        Some(RecoveryAction::RecoverInPlace)
                    } else {
                        log_warn!("media error persists ({}); re-attaching", err.message);
                        self.media_recoveries = 0;
                        self.on_network_fatal(now)
                    }
                }
                FatalKind::Other => {
                    log_warn!("unplayable stream: {}", err.message);
                    self.reinit_due = None;
                    Some(self.give_up())
                }
            },
        }
    }

    /// `media_complete` is true once the manifest is final and the playhead
    /// sits at its end, where a frozen position is expected.
    pub fn on_tick(
        &mut self,
        position: f64,
        media_complete: bool,
        now: Instant,
    ) -> Option<RecoveryAction> {
        if let Some(due) = self.reinit_due {
            if now < due {
                return None;
            }
            self.reinit_due = None;
            self.reinit_attempts += 1;
            self.state = HealthState::Recovering;
            log_info!(
                "re-attaching media source (attempt {}/{})",
                self.reinit_attempts,
                self.config.max_reinit_attempts
            );
            return Some(RecoveryAction::Reinitialize);
        }

        if self.state == HealthState::Stalled && !self.gave_up {
            self.state = HealthState::Recovering;
        }

        match self.state {
            HealthState::Buffering | HealthState::Recovering if self.waiting_since.is_some() => {
                self.check_stall(position, now)
            }
            HealthState::Healthy if self.has_played => {
                if media_complete {
                    self.mark_progress(position, now);
                    return None;
                }
                self.check_frozen(position, now)
            }
            _ => None,
        }
    }

    fn on_network_fatal(&mut self, now: Instant) -> Option<RecoveryAction> {
        if self.reinit_due.is_some() {
            return None;
        }
        if self.reinit_attempts >= self.config.max_reinit_attempts {
            if self.gave_up {
                return None;
            }
            log_warn!(
                "media still unavailable after {} re-attaches; giving up until retried",
                self.reinit_attempts
            );
            return Some(self.give_up());
        }

        self.state = HealthState::Recovering;
        self.problem = Some(ErrorClass::TransientNetwork);
        self.reinit_due = Some(now + self.config.reinit_delay());
        None
    }

    /// Shown as "still preparing"; only `retry_playback` or a new attach
    /// resumes recovery.
    fn give_up(&mut self) -> RecoveryAction {
        self.gave_up = true;
        self.state = HealthState::Stalled;
        self.problem = Some(ErrorClass::TransientNetwork);
        RecoveryAction::Surface(ErrorClass::TransientNetwork)
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.map_or(false, |until| now < until)
    }

    fn mark_progress(&mut self, position: f64, now: Instant) {
        self.last_position = position;
        self.last_progress_at = Some(now);
    }

    fn progressed(&self, position: f64) -> bool {
        position > self.last_position + PROGRESS_EPSILON
    }

    fn check_stall(&mut self, position: f64, now: Instant) -> Option<RecoveryAction> {
        if self.in_cooldown(now) {
            return None;
        }
        if self.progressed(position) {
            self.mark_progress(position, now);
            self.waiting_since = Some(now);
            return None;
        }
        let since = self.waiting_since?;
        if now.saturating_duration_since(since) < self.config.stall_grace() {
            return None;
        }
        Some(self.stall(position, now))
    }

    fn check_frozen(&mut self, position: f64, now: Instant) -> Option<RecoveryAction> {
        if self.progressed(position) {
            self.mark_progress(position, now);
            return None;
        }
        if self.in_cooldown(now) {
            return None;
        }
        let since = self.last_progress_at.get_or_insert(now);
        if now.saturating_duration_since(*since) < self.config.stall_grace() {
            return None;
        }
        Some(self.stall(position, now))
    }

    /// Reports `Stalled` until the next tick, which moves on to `Recovering`.
    fn stall(&mut self, position: f64, now: Instant) -> RecoveryAction {
        self.stall_count += 1;
        self.state = HealthState::Stalled;
        self.cooldown_until = Some(now + self.config.recovery_cooldown());
        self.waiting_since = Some(now);
        self.mark_progress(position, now);

        let to = position + self.config.nudge_seek_secs;
        log_warn!("stall #{} at {:.1}s; nudging to {:.1}s", self.stall_count, position, to);
        RecoveryAction::NudgeSeek { to }
    }
}
