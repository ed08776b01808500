use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::{
    error::ErrorClass,
    media::stream_url,
    models::{
        DurationEstimate, HealthState, LifecycleState, PlaybackSample, ProgressHint,
        RoomRecord, SemanticPosition, Session, SessionId,
    },
    realtime::LifecycleEvent,
    settings::{ClientSettings, Endpoints},
    timeline::{
        compute_intermissions, compute_semantic_position, late_join_offset,
        late_join_percentage, SegmentProfile,
    },
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Seeks shorter than this are not worth interrupting playback for.
const MIN_LATE_SEEK_SECS: f64 = 1.0;

/// Inputs a session view needs from the client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub media_base: Url,
    pub intermission_secs: f64,
    pub default_profile: SegmentProfile,
    pub reciter_profiles: HashMap<String, SegmentProfile>,
}

impl SessionConfig {
    pub fn from_settings(settings: &ClientSettings, endpoints: &Endpoints) -> Self {
        Self {
            media_base: endpoints.media_base.clone(),
            intermission_secs: settings.intermission_secs,
            default_profile: settings.default_profile.clone(),
            reciter_profiles: settings.reciter_profiles.clone(),
        }
    }

    fn profile_for(&self, reciter: Option<&str>) -> &SegmentProfile {
        reciter
            .and_then(|name| self.reciter_profiles.get(name))
            .unwrap_or(&self.default_profile)
    }
}

#[derive(Debug, Clone)]
pub enum SessionAction {
    /// Result of the single status fetch made at mount.
    Loaded {
        record: RoomRecord,
        now: DateTime<Utc>,
    },
    LoadFailed(ErrorClass),
    /// The local user asked to start; applied optimistically.
    StartRequested,
    StartAcknowledged,
    StartFailed(ErrorClass),
    Realtime(LifecycleEvent),
    Sample {
        elapsed: f64,
        duration: DurationEstimate,
        now: DateTime<Utc>,
    },
    Health(HealthState),
    PlaybackProblem(Option<ErrorClass>),
}

/// Side effects the owner must carry out after an action was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    AttachMedia(Url),
    DetachMedia,
    SeekTo(f64),
}

/// Everything the presentation layer sees about one session view.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: SessionId,
    pub lifecycle: LifecycleState,
    pub session: Option<Session>,
    pub joined_late: bool,
    pub late_join_percentage: Option<f64>,
    /// `None` while the duration is unknown or before going live.
    pub position: Option<SemanticPosition>,
    /// False when the unit estimate is too short for the segment budget;
    /// phase labels should be hidden then.
    pub phase_reliable: bool,
    pub elapsed: f64,
    pub duration: DurationEstimate,
    pub health: HealthState,
    pub participant_count: u32,
    pub progress_hint: Option<ProgressHint>,
    /// Blocking error for the whole view (status fetch failures).
    pub error: Option<ErrorClass>,
    /// Non-blocking playback indicator from the health monitor.
    pub playback_problem: Option<ErrorClass>,
    /// Error from the last start/invite command.
    pub command_error: Option<ErrorClass>,
    pub start_pending: bool,
    #[serde(skip)]
    config: Arc<SessionConfig>,
    #[serde(skip)]
    profile: SegmentProfile,
    #[serde(skip)]
    joined_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    late_seek_done: bool,
    /// Building was entered on our own start request and not yet confirmed.
    #[serde(skip)]
    optimistic_building: bool,
}

impl SessionState {
    pub fn new(session_id: SessionId, config: Arc<SessionConfig>) -> Self {
        Self {
            session_id,
            lifecycle: LifecycleState::Waiting,
            session: None,
            joined_late: false,
            late_join_percentage: None,
            position: None,
            phase_reliable: false,
            elapsed: 0.0,
            duration: DurationEstimate::default(),
            health: HealthState::Healthy,
            participant_count: 0,
            progress_hint: None,
            error: None,
            playback_problem: None,
            command_error: None,
            start_pending: false,
            profile: config.default_profile.clone(),
            config,
            joined_at: None,
            late_seek_done: false,
            optimistic_building: false,
        }
    }

    /// The most recent tick as observed locally.
    pub fn latest_sample(&self) -> PlaybackSample {
        PlaybackSample {
            elapsed: self.elapsed,
            total_duration: self.duration.seconds,
            health_state: self.health,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    /// Manifest location for this session, always derived from the
    /// configured media base.
    pub fn stream_url(&self) -> Option<Url> {
        self.session
            .as_ref()
            .and_then(|s| s.stream_url.clone())
            .or_else(|| stream_url(&self.config.media_base, self.session_id).ok())
    }

    pub fn is_creator(&self, user_id: Option<&str>) -> bool {
        self.session
            .as_ref()
            .map_or(false, |session| session.is_creator(user_id))
    }

    pub fn apply(&mut self, action: SessionAction) -> Vec<SessionEffect> {
        match action {
            SessionAction::Loaded { record, now } => self.on_loaded(record, now),
            SessionAction::LoadFailed(class) => {
                self.error = Some(class);
                Vec::new()
            }
            SessionAction::StartRequested => {
                self.start_pending = true;
                self.command_error = None;
                if self.lifecycle == LifecycleState::Waiting {
                    self.optimistic_building = true;
                }
                self.transition(LifecycleState::Building)
            }
            SessionAction::StartAcknowledged => {
                self.start_pending = false;
                self.optimistic_building = false;
                Vec::new()
            }
            SessionAction::StartFailed(class) => {
                self.start_pending = false;
                self.command_error = Some(class);
                if self.optimistic_building && self.lifecycle == LifecycleState::Building {
                    log_info!("start rejected; reverting optimistic building state");
                    self.set_lifecycle(LifecycleState::Waiting);
                }
                self.optimistic_building = false;
                Vec::new()
            }
            SessionAction::Realtime(event) => self.on_realtime(event),
            SessionAction::Sample {
                elapsed,
                duration,
                now,
            } => self.on_sample(elapsed, duration, now),
            SessionAction::Health(health) => {
                self.health = health;
                Vec::new()
            }
            SessionAction::PlaybackProblem(problem) => {
                self.playback_problem = problem;
                Vec::new()
            }
        }
    }

    fn on_loaded(&mut self, record: RoomRecord, now: DateTime<Utc>) -> Vec<SessionEffect> {
        let mut session = Session::from(record);
        let fetched = session.state;

        self.profile = self
            .config
            .profile_for(session.reciter.as_deref())
            .clone();
        self.participant_count = session.participant_count;
        self.error = None;

        if session.is_late_join(now) && self.lifecycle.precedes(LifecycleState::Live) {
            self.joined_late = true;
            self.joined_at = Some(now);
        }

        session.state = self.lifecycle;
        // A started event may have beaten the fetch; the URL is still ours.
        if self.lifecycle == LifecycleState::Live {
            session.stream_url = stream_url(&self.config.media_base, self.session_id).ok();
        }
        self.session = Some(session);

        self.transition(fetched)
    }

    fn on_realtime(&mut self, event: LifecycleEvent) -> Vec<SessionEffect> {
        match event {
            LifecycleEvent::Joined { participant_count }
            | LifecycleEvent::ParticipantCount(participant_count) => {
                self.participant_count = participant_count;
                if let Some(session) = self.session.as_mut() {
                    session.participant_count = participant_count;
                }
                Vec::new()
            }
            LifecycleEvent::Progress(hint) => {
                self.progress_hint = Some(hint);
                Vec::new()
            }
            LifecycleEvent::Building => {
                self.optimistic_building = false;
                self.transition(LifecycleState::Building)
            }
            LifecycleEvent::Started => {
                self.optimistic_building = false;
                self.transition(LifecycleState::Live)
            }
            LifecycleEvent::Ended => self.transition(LifecycleState::Ended),
        }
    }

    fn on_sample(
        &mut self,
        elapsed: f64,
        duration: DurationEstimate,
        now: DateTime<Utc>,
    ) -> Vec<SessionEffect> {
        if self.lifecycle != LifecycleState::Live {
            return Vec::new();
        }

        self.elapsed = if elapsed.is_finite() { elapsed.max(0.0) } else { 0.0 };
        self.duration = duration;

        let mut effects = Vec::new();
        if !duration.is_known() {
            self.position = None;
            self.phase_reliable = false;
            return effects;
        }

        let started_at = self.session.as_ref().and_then(|s| s.started_at);
        if self.joined_late {
            if let (Some(started_at), Some(joined_at)) = (started_at, self.joined_at) {
                self.late_join_percentage =
                    late_join_percentage(started_at, joined_at, duration.seconds);

                if !self.late_seek_done {
                    self.late_seek_done = true;
                    let offset = late_join_offset(started_at, now, duration.seconds);
                    if offset - self.elapsed >= MIN_LATE_SEEK_SECS {
                        log_info!("late join: seeking to {:.1}s", offset);
                        self.elapsed = offset;
                        effects.push(SessionEffect::SeekTo(offset));
                    }
                }
            }
        }

        let unit_count = self.session.as_ref().map_or(1, |s| s.unit_count).max(1);
        let windows =
            compute_intermissions(duration.seconds, unit_count, self.config.intermission_secs);
        let position = compute_semantic_position(
            self.elapsed,
            duration.seconds,
            unit_count,
            &windows,
            &self.profile,
        );

        let breaks: f64 = windows.iter().map(|w| w.duration()).sum();
        let unit_len = (duration.seconds - breaks).max(1.0) / unit_count as f64;
        self.phase_reliable = self.profile.is_reliable(unit_len);
        self.position = Some(position);

        effects
    }

    /// Moves forward to `target` if the current state precedes it; anything
    /// else is a stale or duplicate notification and changes nothing.
    fn transition(&mut self, target: LifecycleState) -> Vec<SessionEffect> {
        if !self.lifecycle.precedes(target) {
            return Vec::new();
        }
        log_info!(
            "session {}: {} -> {}",
            self.session_id,
            self.lifecycle.as_str(),
            target.as_str()
        );
        self.set_lifecycle(target);

        match target {
            LifecycleState::Live => match stream_url(&self.config.media_base, self.session_id) {
                Ok(url) => {
                    if let Some(session) = self.session.as_mut() {
                        session.stream_url = Some(url.clone());
                    }
                    vec![SessionEffect::AttachMedia(url)]
                }
                Err(err) => {
                    log_error!("cannot build stream url: {}", err);
                    self.playback_problem = Some(ErrorClass::DecodeMedia);
                    Vec::new()
                }
            },
            LifecycleState::Ended => {
                self.health = HealthState::Healthy;
                self.playback_problem = None;
                vec![SessionEffect::DetachMedia]
            }
            LifecycleState::Waiting | LifecycleState::Building => Vec::new(),
        }
    }

    fn set_lifecycle(&mut self, state: LifecycleState) {
        self.lifecycle = state;
        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
    }
}
