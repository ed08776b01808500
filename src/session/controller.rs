use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::{JoinError, JoinHandle, JoinSet},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    api::RoomsService,
    error::{SyncError, SyncResult},
    health::{HealthConfig, HealthMonitor, RecoveryAction},
    media::{MediaAdapter, MediaSourceFactory, TaggedSignal},
    models::{LifecycleState, RoomRecord, SessionId},
    realtime::{HubMessage, RealtimeHub},
    settings::debug_mode,
};

use super::state::{SessionAction, SessionConfig, SessionEffect, SessionState};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Playhead this close to the end of a complete manifest counts as finished.
const END_TOLERANCE_SECS: f64 = 0.5;

/// Everything a session view needs from the process.
#[derive(Clone)]
pub struct SessionDeps {
    pub api: Arc<dyn RoomsService>,
    pub hub: RealtimeHub,
    pub media: Arc<dyn MediaSourceFactory>,
    pub config: Arc<SessionConfig>,
    pub health: HealthConfig,
    pub user_id: Option<String>,
    pub tick_interval: Duration,
}

enum Command {
    Start(oneshot::Sender<SyncResult<()>>),
    Invite(String, oneshot::Sender<SyncResult<()>>),
    RetryPlayback,
}

enum TaskOutcome {
    Loaded(SyncResult<RoomRecord>),
    Joined(SyncResult<()>),
    Started(SyncResult<()>),
    Invited(SyncResult<()>, oneshot::Sender<SyncResult<()>>),
}

/// Handle on one mounted session view. All state lives in a single actor
/// task; this handle only sends commands and reads published snapshots.
pub struct SessionController {
    session_id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Subscribes to realtime events, issues the status fetch and the join,
    /// and starts the tick loop.
    pub fn mount(session_id: SessionId, deps: SessionDeps) -> Self {
        let state = SessionState::new(session_id, deps.config.clone());
        let (publisher, snapshot) = watch::channel(state.clone());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let actor = SessionActor {
            session_id,
            api: deps.api,
            hub: deps.hub,
            user_id: deps.user_id,
            tick_interval: deps.tick_interval,
            log_every_tick: debug_mode(),
            state,
            monitor: HealthMonitor::new(deps.health),
            adapter: MediaAdapter::new(deps.media, signal_tx),
            publisher,
            tasks: JoinSet::new(),
            start_reply: None,
        };
        log_info!("mounting session view {}", session_id);
        let task = tokio::spawn(actor.run(command_rx, signal_rx, cancel.clone()));

        Self {
            session_id,
            commands,
            snapshot,
            cancel,
            task: Some(task),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn snapshot(&self) -> SessionState {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.snapshot.clone()
    }

    /// Creator-only. Resolves once the server has acknowledged; the view moves
    /// to building immediately.
    pub async fn start_prayer(&self) -> SyncResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start(tx))?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn invite(&self, friend_id: impl Into<String>) -> SyncResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Invite(friend_id.into(), tx))?;
        rx.await.map_err(|_| closed())?
    }

    /// Re-attaches playback after an error was surfaced.
    pub fn retry_playback(&self) -> SyncResult<()> {
        self.send(Command::RetryPlayback)
    }

    /// Cancels the actor and waits for it to release the media source and the
    /// realtime subscription.
    pub async fn teardown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                log_error!("session actor {} ended abnormally: {}", self.session_id, err);
            }
        }
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        self.commands.send(command).map_err(|_| closed())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn closed() -> SyncError {
    SyncError::Unexpected("session view is closed".into())
}

struct SessionActor {
    session_id: SessionId,
    api: Arc<dyn RoomsService>,
    hub: RealtimeHub,
    user_id: Option<String>,
    tick_interval: Duration,
    log_every_tick: bool,
    state: SessionState,
    monitor: HealthMonitor,
    adapter: MediaAdapter,
    publisher: watch::Sender<SessionState>,
    tasks: JoinSet<TaskOutcome>,
    start_reply: Option<oneshot::Sender<SyncResult<()>>>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<TaggedSignal>,
        cancel: CancellationToken,
    ) {
        // Subscribe before fetching so no transition can slip between the two.
        let mut subscription = self.hub.subscribe(self.session_id);
        self.spawn_fetch();
        self.spawn_join();

        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                message = subscription.recv() => match message {
                    Some(HubMessage::Event(event)) => self.dispatch(SessionAction::Realtime(event)),
                    Some(HubMessage::Reconnected) => {
                        log_info!("realtime reconnected; re-joining {}", self.session_id);
                        self.spawn_join();
                    }
                    Some(HubMessage::Disconnected) => {
                        log_warn!("realtime channel lost for {}", self.session_id);
                    }
                    None => break,
                },
                Some(tagged) = signals.recv() => self.on_media_signal(tagged),
                _ = ticker.tick() => self.on_tick(),
                Some(outcome) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.on_task(outcome);
                }
            }
        }

        log_info!("tearing down session view {}", self.session_id);
        self.tasks.abort_all();
        self.adapter.detach();
        drop(subscription);
    }

    fn spawn_fetch(&mut self) {
        let api = self.api.clone();
        let id = self.session_id;
        self.tasks
            .spawn(async move { TaskOutcome::Loaded(api.fetch_status(id).await) });
    }

    fn spawn_join(&mut self) {
        let api = self.api.clone();
        let id = self.session_id;
        self.tasks
            .spawn(async move { TaskOutcome::Joined(api.join(id).await) });
    }

    fn require_creator(&self) -> SyncResult<()> {
        if !self.state.is_loaded() {
            return Err(SyncError::Unexpected("session is still loading".into()));
        }
        if !self.state.is_creator(self.user_id.as_deref()) {
            return Err(SyncError::AccessDenied(
                "only the room creator can do this".into(),
            ));
        }
        Ok(())
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                if let Err(err) = self.require_creator() {
                    let _ = reply.send(Err(err));
                    return;
                }
                if !self.state.lifecycle.precedes(LifecycleState::Building) {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.start_reply = Some(reply);
                self.dispatch(SessionAction::StartRequested);

                let api = self.api.clone();
                let id = self.session_id;
                self.tasks
                    .spawn(async move { TaskOutcome::Started(api.start(id).await) });
            }
            Command::Invite(friend_id, reply) => {
                if let Err(err) = self.require_creator() {
                    let _ = reply.send(Err(err));
                    return;
                }
                let api = self.api.clone();
                let id = self.session_id;
                self.tasks.spawn(async move {
                    TaskOutcome::Invited(api.invite(id, &friend_id).await, reply)
                });
            }
            Command::RetryPlayback => self.retry_playback(),
        }
    }

    fn on_task(&mut self, outcome: Result<TaskOutcome, JoinError>) {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                log_error!("session task failed: {}", err);
                return;
            }
        };

        match outcome {
            TaskOutcome::Loaded(Ok(record)) => self.dispatch(SessionAction::Loaded {
                record,
                now: Utc::now(),
            }),
            TaskOutcome::Loaded(Err(err)) => {
                log_warn!("status fetch for {} failed: {}", self.session_id, err);
                self.dispatch(SessionAction::LoadFailed(err.class()));
            }
            TaskOutcome::Joined(Ok(())) => log_debug!("joined {}", self.session_id),
            // Joining only feeds participant counts; playback goes on without it.
            TaskOutcome::Joined(Err(err)) => log_warn!("join for {} failed: {}", self.session_id, err),
            TaskOutcome::Started(Ok(())) | TaskOutcome::Started(Err(SyncError::Conflict)) => {
                self.dispatch(SessionAction::StartAcknowledged);
                if let Some(reply) = self.start_reply.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            TaskOutcome::Started(Err(err)) => {
                log_warn!("start for {} rejected: {}", self.session_id, err);
                self.dispatch(SessionAction::StartFailed(err.class()));
                if let Some(reply) = self.start_reply.take() {
                    let _ = reply.send(Err(err));
                }
            }
            TaskOutcome::Invited(result, reply) => {
                if let Err(err) = &result {
                    log_warn!("invite for {} failed: {}", self.session_id, err);
                }
                let _ = reply.send(result);
            }
        }
    }

    fn on_media_signal(&mut self, tagged: TaggedSignal) {
        if !self.adapter.is_current(tagged.generation) {
            log_debug!("ignoring signal from stale source #{}", tagged.generation);
            return;
        }

        let action =
            self.monitor
                .on_signal(&tagged.signal, self.adapter.position(), Instant::now());
        if let Some(action) = action {
            self.recover(action);
        }
        self.sync_health();
        self.publish();
    }

    fn on_tick(&mut self) {
        if self.state.lifecycle != LifecycleState::Live || !self.adapter.is_attached() {
            return;
        }

        let position = self.adapter.position();
        let duration = self.adapter.duration();
        let complete = duration.is_final && position >= duration.seconds - END_TOLERANCE_SECS;
        if complete {
            self.adapter.pause();
        }
        if let Some(action) = self.monitor.on_tick(position, complete, Instant::now()) {
            self.recover(action);
        }
        self.sync_health();

        let effects = self.state.apply(SessionAction::Sample {
            elapsed: self.adapter.position(),
            duration: self.adapter.duration(),
            now: Utc::now(),
        });
        self.run_effects(effects);

        if self.log_every_tick {
            if let Some(position) = self.state.position {
                let sample = self.state.latest_sample();
                log::info!(
                    "t={:.1}/{:.1}s unit {} {} health {:?}",
                    sample.elapsed,
                    sample.total_duration,
                    position.unit_index,
                    position.phase_label,
                    sample.health_state
                );
            }
        }
        self.publish();
    }

    fn recover(&mut self, action: RecoveryAction) {
        match action {
            RecoveryAction::NudgeSeek { to } => {
                let available = self.adapter.duration().seconds;
                if to <= available {
                    self.adapter.seek(to);
                } else {
                    log_debug!("no media past {:.1}s yet; resuming in place", available);
                }
                self.adapter.play();
            }
            RecoveryAction::RecoverInPlace => self.adapter.recover(),
            RecoveryAction::Reinitialize => {
                if self.adapter.reattach() {
                    self.monitor.on_reattached();
                }
            }
            RecoveryAction::Surface(class) => {
                log_warn!("playback of {} needs attention: {:?}", self.session_id, class);
            }
        }
    }

    fn retry_playback(&mut self) {
        if self.state.lifecycle != LifecycleState::Live {
            return;
        }
        self.monitor.reset();
        if !self.adapter.reattach() {
            match self.state.stream_url() {
                Some(url) => self.adapter.attach(url),
                None => log_error!("no stream url for {}", self.session_id),
            }
        }
        self.sync_health();
        self.publish();
    }

    fn sync_health(&mut self) {
        self.state.apply(SessionAction::Health(self.monitor.state()));
        self.state
            .apply(SessionAction::PlaybackProblem(self.monitor.problem()));
    }

    fn dispatch(&mut self, action: SessionAction) {
        let effects = self.state.apply(action);
        self.run_effects(effects);
        self.publish();
    }

    fn run_effects(&mut self, effects: Vec<SessionEffect>) {
        for effect in effects {
            match effect {
                SessionEffect::AttachMedia(url) => {
                    self.monitor.reset();
                    self.adapter.attach(url);
                }
                SessionEffect::DetachMedia => {
                    self.adapter.detach();
                    self.monitor.reset();
                }
                SessionEffect::SeekTo(position) => self.adapter.seek(position),
            }
        }
    }

    fn publish(&self) {
        self.publisher.send_if_modified(|current| {
            if *current == self.state {
                false
            } else {
                *current = self.state.clone();
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::media::hls::testing::{manifest, ScriptedLoader};
    use crate::media::hls::HlsSourceFactory;
    use crate::media::testing::{Call, FakeFactory, FakeMedia};
    use crate::media::{FatalError, MediaSignal};
    use crate::models::HealthState;
    use crate::realtime::testing::FakeTransport;
    use crate::realtime::TransportEvent;
    use crate::timeline::SegmentProfile;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, timeout};
    use url::Url;
    use uuid::Uuid;

    struct FakeRooms {
        record: RoomRecord,
        /// HTTP status the status fetch answers with instead of the record.
        fetch_rejects: Option<u16>,
        join_rejects: Option<u16>,
        joins: AtomicUsize,
        starts: AtomicUsize,
        invites: AtomicUsize,
    }

    impl FakeRooms {
        fn new(record: RoomRecord) -> Arc<Self> {
            Self::rejecting(record, None, None)
        }

        fn rejecting(
            record: RoomRecord,
            fetch_rejects: Option<u16>,
            join_rejects: Option<u16>,
        ) -> Arc<Self> {
            Arc::new(Self {
                record,
                fetch_rejects,
                join_rejects,
                joins: AtomicUsize::new(0),
                starts: AtomicUsize::new(0),
                invites: AtomicUsize::new(0),
            })
        }
    }

    fn rejection(status: u16) -> SyncError {
        match status {
            404 => SyncError::NotFound("room not found".into()),
            401 | 403 => SyncError::AccessDenied("not invited".into()),
            409 => SyncError::Conflict,
            other => SyncError::Network(format!("status {other}")),
        }
    }

    #[async_trait]
    impl RoomsService for FakeRooms {
        async fn fetch_status(&self, _session_id: SessionId) -> SyncResult<RoomRecord> {
            match self.fetch_rejects {
                Some(status) => Err(rejection(status)),
                None => Ok(self.record.clone()),
            }
        }

        async fn join(&self, _session_id: SessionId) -> SyncResult<()> {
            self.joins.fetch_add(1, Ordering::SeqCst);
            match self.join_rejects {
                Some(status) => Err(rejection(status)),
                None => Ok(()),
            }
        }

        async fn start(&self, _session_id: SessionId) -> SyncResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn invite(&self, _session_id: SessionId, _friend_id: &str) -> SyncResult<()> {
            self.invites.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        id: SessionId,
        rooms: Arc<FakeRooms>,
        media: Arc<FakeMedia>,
        transport: Arc<FakeTransport>,
        hub: RealtimeHub,
        controller: SessionController,
    }

    fn room(id: SessionId, status: &str, started_at: Option<DateTime<Utc>>) -> RoomRecord {
        RoomRecord {
            id,
            status: status.into(),
            rakats: 8,
            participant_count: 1,
            started_at,
            is_private: true,
            creator_id: Some("me".into()),
            ramadan_night: None,
            juz_number: None,
            juz_half: None,
            reciter: None,
        }
    }

    fn mount(record: RoomRecord, user_id: Option<&str>) -> Harness {
        mount_with(FakeRooms::new(record), None, user_id)
    }

    /// `factory` replaces the recording fake media when given.
    fn mount_with(
        rooms: Arc<FakeRooms>,
        factory: Option<Arc<dyn MediaSourceFactory>>,
        user_id: Option<&str>,
    ) -> Harness {
        let id = rooms.record.id;
        let media = Arc::new(FakeMedia::default());
        let transport = Arc::new(FakeTransport::default());
        let hub = RealtimeHub::new(transport.clone());
        let factory: Arc<dyn MediaSourceFactory> = match factory {
            Some(factory) => factory,
            None => Arc::new(FakeFactory(media.clone())),
        };
        let deps = SessionDeps {
            api: rooms.clone(),
            hub: hub.clone(),
            media: factory,
            config: Arc::new(SessionConfig {
                media_base: Url::parse("http://media.local:8001").unwrap(),
                intermission_secs: 30.0,
                default_profile: SegmentProfile::default(),
                reciter_profiles: HashMap::new(),
            }),
            health: HealthConfig::default(),
            user_id: user_id.map(str::to_string),
            tick_interval: Duration::from_millis(500),
        };
        let controller = SessionController::mount(id, deps);
        Harness {
            id,
            rooms,
            media,
            transport,
            hub,
            controller,
        }
    }

    async fn wait_until(
        controller: &SessionController,
        predicate: impl Fn(&SessionState) -> bool,
    ) -> SessionState {
        let mut rx = controller.subscribe();
        let state = timeout(Duration::from_secs(60), rx.wait_for(|s| predicate(s)))
            .await
            .expect("condition not reached")
            .expect("session actor stopped");
        state.clone()
    }

    async fn connected(h: &Harness) {
        while h.transport.opens() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
        h.transport.push(TransportEvent::Open);
    }

    fn event(h: &Harness, name: &str) {
        h.transport.message(name, json!({ "room_id": h.id }));
    }

    #[tokio::test(start_paused = true)]
    async fn late_joiner_is_placed_at_the_live_point() {
        let id = Uuid::new_v4();
        let started = Utc::now() - ChronoDuration::minutes(10);
        let h = mount(room(id, "live", Some(started)), None);
        h.media.set_duration(3600.0, true);

        let state = wait_until(&h.controller, |s| s.late_join_percentage.is_some()).await;
        assert!(state.joined_late);
        let pct = state.late_join_percentage.unwrap();
        assert!((pct - 16.7).abs() < 0.1, "{pct}");

        let seeks: Vec<f64> = h
            .media
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Seek(to) => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(seeks.len(), 1);
        assert!((seeks[0] - 600.0).abs() < 5.0, "{seeks:?}");
        assert_eq!(
            h.media.calls()[0],
            Call::Create(format!("http://media.local:8001/hls/{id}/stream.m3u8"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_started_events_attach_once() {
        let h = mount(room(Uuid::new_v4(), "building", None), None);
        wait_until(&h.controller, |s| s.is_loaded()).await;

        connected(&h).await;
        event(&h, "room_started");
        event(&h, "room_started");
        wait_until(&h.controller, |s| s.lifecycle == LifecycleState::Live).await;
        sleep(Duration::from_secs(1)).await;

        assert_eq!(h.media.creates(), 1);
        assert!(!h.controller.snapshot().joined_late);
    }

    #[tokio::test(start_paused = true)]
    async fn ended_event_detaches_media() {
        let h = mount(room(Uuid::new_v4(), "live", None), None);
        wait_until(&h.controller, |s| s.lifecycle == LifecycleState::Live).await;
        assert_eq!(h.media.creates(), 1);

        connected(&h).await;
        event(&h, "room_ended");
        wait_until(&h.controller, |s| s.lifecycle == LifecycleState::Ended).await;
        assert_eq!(h.media.count(&Call::Destroy), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn creator_start_is_optimistic_and_idempotent() {
        let h = mount(room(Uuid::new_v4(), "waiting", None), Some("me"));
        wait_until(&h.controller, |s| s.is_loaded()).await;

        h.controller.start_prayer().await.unwrap();
        assert_eq!(h.controller.snapshot().lifecycle, LifecycleState::Building);
        h.controller.start_prayer().await.unwrap();
        assert_eq!(h.rooms.starts.load(Ordering::SeqCst), 1);

        h.controller.invite("friend-1").await.unwrap();
        assert_eq!(h.rooms.invites.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_creator_cannot_start() {
        let h = mount(room(Uuid::new_v4(), "waiting", None), Some("someone-else"));
        wait_until(&h.controller, |s| s.is_loaded()).await;

        let err = h.controller.start_prayer().await.unwrap_err();
        assert!(matches!(err, SyncError::AccessDenied(_)));
        assert_eq!(h.rooms.starts.load(Ordering::SeqCst), 0);
        assert_eq!(h.controller.snapshot().lifecycle, LifecycleState::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn stall_is_nudged_once() {
        let h = mount(room(Uuid::new_v4(), "live", None), None);
        wait_until(&h.controller, |s| s.lifecycle == LifecycleState::Live).await;
        h.media.set_duration(2400.0, false);

        h.media.emit(MediaSignal::Playing);
        h.media.emit(MediaSignal::Waiting);
        wait_until(&h.controller, |s| s.health == HealthState::Buffering).await;

        sleep(Duration::from_secs(4)).await;
        assert_eq!(h.media.count(&Call::Seek(1.0)), 1);
        assert_eq!(h.controller.snapshot().health, HealthState::Recovering);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_rejoins_the_room() {
        let h = mount(room(Uuid::new_v4(), "waiting", None), None);
        wait_until(&h.controller, |s| s.is_loaded()).await;
        connected(&h).await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(h.rooms.joins.load(Ordering::SeqCst), 1);

        h.transport.push(TransportEvent::Error("reset".into()));
        sleep(Duration::from_secs(2)).await;
        h.transport.push(TransportEvent::Open);
        sleep(Duration::from_millis(100)).await;

        assert_eq!(h.rooms.joins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_releases_media_and_subscription() {
        let mut h = mount(room(Uuid::new_v4(), "live", None), None);
        wait_until(&h.controller, |s| s.lifecycle == LifecycleState::Live).await;
        assert_eq!(h.hub.subscriber_count(), 1);

        h.controller.teardown().await;
        assert_eq!(h.hub.subscriber_count(), 0);
        assert!(!h.hub.is_connected());
        assert_eq!(h.media.count(&Call::Destroy), 1);
        assert!(h.controller.start_prayer().await.is_err());
    }

    fn seeks(media: &FakeMedia) -> Vec<f64> {
        media
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Seek(to) => Some(to),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn finished_media_is_paused_once() {
        let h = mount(room(Uuid::new_v4(), "live", None), None);
        wait_until(&h.controller, |s| s.lifecycle == LifecycleState::Live).await;
        h.media.set_duration(60.0, true);
        h.media.set_position(60.0);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(h.media.count(&Call::Pause), 1);
        assert_eq!(h.controller.snapshot().lifecycle, LifecycleState::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_join_does_not_block_playback() {
        let rooms = FakeRooms::rejecting(room(Uuid::new_v4(), "live", None), None, Some(403));
        let h = mount_with(rooms, None, None);

        wait_until(&h.controller, |s| s.lifecycle == LifecycleState::Live).await;
        sleep(Duration::from_secs(1)).await;

        assert_eq!(h.rooms.joins.load(Ordering::SeqCst), 1);
        let state = h.controller.snapshot();
        assert_eq!(state.error, None);
        assert!(state.is_loaded());
        assert_eq!(h.media.creates(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_fetch_failures_are_classified() {
        for (status, class) in [(404, ErrorClass::NotFound), (403, ErrorClass::AccessDenied)] {
            let rooms = FakeRooms::rejecting(room(Uuid::new_v4(), "live", None), Some(status), None);
            let h = mount_with(rooms, None, None);

            let state = wait_until(&h.controller, |s| s.error.is_some()).await;
            assert_eq!(state.error, Some(class));
            assert_eq!(state.lifecycle, LifecycleState::Waiting);
            assert!(!state.is_loaded());
            assert_eq!(h.media.creates(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn network_fatal_reattaches_and_ignores_the_old_source() {
        let h = mount(room(Uuid::new_v4(), "live", None), None);
        wait_until(&h.controller, |s| s.lifecycle == LifecycleState::Live).await;
        h.media.set_duration(600.0, false);
        h.media.set_position(120.0);

        h.media.emit(MediaSignal::Fatal(FatalError::network("manifest fetch failed")));
        wait_until(&h.controller, |s| {
            s.playback_problem == Some(ErrorClass::TransientNetwork)
        })
        .await;
        assert_eq!(h.media.creates(), 1);

        sleep(Duration::from_secs(4)).await;
        let calls = h.media.calls();
        let second = calls
            .iter()
            .rposition(|c| matches!(c, Call::Create(_)))
            .unwrap();
        assert_eq!(h.media.creates(), 2);
        assert_eq!(calls[second - 1], Call::Destroy);
        assert_eq!(&calls[second + 1..], &[Call::Play, Call::Seek(120.0)]);

        h.media.emit_from(0, MediaSignal::Playing);
        sleep(Duration::from_millis(100)).await;
        assert_ne!(h.controller.snapshot().health, HealthState::Healthy);

        h.media.emit(MediaSignal::Playing);
        let state = wait_until(&h.controller, |s| {
            s.health == HealthState::Healthy && s.playback_problem.is_none()
        })
        .await;
        assert_eq!(state.lifecycle, LifecycleState::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn unplayable_stream_waits_for_retry() {
        let h = mount(room(Uuid::new_v4(), "live", None), None);
        wait_until(&h.controller, |s| s.lifecycle == LifecycleState::Live).await;

        h.media.emit(MediaSignal::Fatal(FatalError::other("no playable variants")));
        wait_until(&h.controller, |s| {
            s.health == HealthState::Stalled && s.playback_problem.is_some()
        })
        .await;
        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.media.creates(), 1);
        assert_eq!(h.controller.snapshot().lifecycle, LifecycleState::Live);

        h.controller.retry_playback().unwrap();
        let state = wait_until(&h.controller, |s| s.playback_problem.is_none()).await;
        assert_eq!(h.media.creates(), 2);
        assert_eq!(state.lifecycle, LifecycleState::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn stall_at_the_buffered_edge_resumes_without_seeking() {
        let h = mount(room(Uuid::new_v4(), "live", None), None);
        wait_until(&h.controller, |s| s.lifecycle == LifecycleState::Live).await;
        h.media.set_duration(30.0, false);
        h.media.set_position(30.0);

        h.media.emit(MediaSignal::Playing);
        h.media.emit(MediaSignal::Waiting);
        wait_until(&h.controller, |s| s.health == HealthState::Buffering).await;
        sleep(Duration::from_secs(4)).await;

        assert!(seeks(&h.media).is_empty());
        assert!(h.media.count(&Call::Play) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manifest_blip_keeps_the_session_position() {
        let mut script: Vec<Result<String, FatalError>> =
            (0..10).map(|_| Ok(manifest(100, false))).collect();
        script.push(Err(FatalError::network("manifest fetch failed: timed out")));
        script.push(Ok(manifest(100, false)));
        let factory = HlsSourceFactory::new(ScriptedLoader::new(script), Duration::from_secs(1));

        let rooms = FakeRooms::new(room(Uuid::new_v4(), "live", None));
        let h = mount_with(rooms, Some(Arc::new(factory)), None);
        wait_until(&h.controller, |s| s.lifecycle == LifecycleState::Live).await;

        sleep(Duration::from_secs(20)).await;
        let state = h.controller.snapshot();
        assert!(state.elapsed > 15.0, "elapsed {}", state.elapsed);
        assert_eq!(state.health, HealthState::Healthy);
        assert_eq!(state.playback_problem, None);
    }
}
