//! Manifest-driven HLS source.
//!
//! A worker task polls the media playlist, learns how much audio the server
//! has assembled so far, and advances a wall-clock playhead across that
//! buffered range. Reaching the edge of an incomplete playlist is reported as
//! a wait-for-data condition; new segments landing resume playback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::playlist::{parse_playlist, Playlist};
use super::{FatalError, FatalKind, MediaSignal, MediaSource, MediaSourceFactory, SignalSink};
use crate::models::DurationEstimate;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const CLOCK_INTERVAL: Duration = Duration::from_millis(200);
const EDGE_EPSILON: f64 = 1e-3;
/// Failed polls tolerated while parked at the buffered edge before the
/// source gives up and asks to be re-attached.
const MAX_FAILED_POLLS_AT_EDGE: u32 = 5;

#[async_trait]
pub trait ManifestLoader: Send + Sync + 'static {
    async fn load(&self, url: &Url) -> Result<String, FatalError>;
}

pub struct HttpManifestLoader {
    client: reqwest::Client,
}

impl HttpManifestLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestLoader for HttpManifestLoader {
    async fn load(&self, url: &Url) -> Result<String, FatalError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| FatalError::network(format!("manifest fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(FatalError::network(format!(
                "manifest not ready: {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| FatalError::network(format!("failed to read manifest: {e}")))
    }
}

pub struct HlsSourceFactory {
    loader: Arc<dyn ManifestLoader>,
    poll_interval: Duration,
}

impl HlsSourceFactory {
    pub fn new(loader: Arc<dyn ManifestLoader>, poll_interval: Duration) -> Self {
        Self {
            loader,
            poll_interval,
        }
    }
}

impl MediaSourceFactory for HlsSourceFactory {
    fn create(&self, url: &Url, signals: SignalSink) -> Box<dyn MediaSource> {
        Box::new(HlsSource::spawn(
            url.clone(),
            self.loader.clone(),
            signals,
            self.poll_interval,
        ))
    }
}

enum Command {
    Play,
    Pause,
    Seek(f64),
    Recover,
}

#[derive(Debug, Clone, Copy, Default)]
struct Playhead {
    position: f64,
    duration: DurationEstimate,
}

pub struct HlsSource {
    commands: mpsc::UnboundedSender<Command>,
    playhead: watch::Receiver<Playhead>,
    cancel: CancellationToken,
}

impl HlsSource {
    pub fn spawn(
        url: Url,
        loader: Arc<dyn ManifestLoader>,
        signals: SignalSink,
        poll_interval: Duration,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (playhead_tx, playhead) = watch::channel(Playhead::default());
        let cancel = CancellationToken::new();

        let worker = Worker {
            playlist_url: url,
            loader,
            signals,
            playhead_tx,
            position: 0.0,
            pending_seek: None,
            buffered_end: 0.0,
            duration: DurationEstimate::default(),
            playing: false,
            ready: false,
            flowing: false,
            halted: false,
            failed_polls: 0,
            last_clock: Instant::now(),
        };
        tokio::spawn(worker.run(command_rx, cancel.clone(), poll_interval));

        Self {
            commands,
            playhead,
            cancel,
        }
    }

    fn send(&self, command: Command) {
        // The worker only stops after destroy or a fatal error; later commands are moot.
        let _ = self.commands.send(command);
    }
}

impl MediaSource for HlsSource {
    fn play(&mut self) {
        self.send(Command::Play);
    }

    fn pause(&mut self) {
        self.send(Command::Pause);
    }

    fn seek(&mut self, position: f64) {
        self.send(Command::Seek(position));
    }

    fn recover(&mut self) {
        self.send(Command::Recover);
    }

    fn position(&self) -> f64 {
        self.playhead.borrow().position
    }

    fn duration(&self) -> DurationEstimate {
        self.playhead.borrow().duration
    }

    fn destroy(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for HlsSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    playlist_url: Url,
    loader: Arc<dyn ManifestLoader>,
    signals: SignalSink,
    playhead_tx: watch::Sender<Playhead>,
    position: f64,
    /// Seek requested before the first media playlist arrived.
    pending_seek: Option<f64>,
    buffered_end: f64,
    duration: DurationEstimate,
    playing: bool,
    /// At least one media playlist has been parsed.
    ready: bool,
    /// `Playing` announced and not yet followed by `Waiting` or a halt.
    flowing: bool,
    /// Stopped after a media error until `Recover`.
    halted: bool,
    /// Consecutive failed polls since the last good playlist.
    failed_polls: u32,
    last_clock: Instant,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
        poll_interval: Duration,
    ) {
        let mut poll = time::interval(poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut clock = time::interval(CLOCK_INTERVAL);
        clock.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log_debug!("hls worker for {} cancelled", self.playlist_url);
                    break;
                }
                command = commands.recv() => match command {
                    Some(Command::Recover) => {
                        log_info!("recovering hls source {}", self.playlist_url);
                        self.halted = false;
                        self.flowing = false;
                        poll.reset_immediately();
                    }
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = poll.tick(), if !self.halted && !self.duration.is_final => {
                    if !self.refresh().await {
                        break;
                    }
                }
                _ = clock.tick() => {
                    if !self.advance() {
                        break;
                    }
                }
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Play => {
                self.playing = true;
                self.last_clock = Instant::now();
            }
            Command::Pause => {
                self.playing = false;
                self.flowing = false;
            }
            Command::Seek(target) => {
                let target = if target.is_finite() { target.max(0.0) } else { 0.0 };
                if self.ready {
                    self.position = target.min(self.buffered_end);
                    self.publish();
                } else {
                    self.pending_seek = Some(target);
                }
            }
            Command::Recover => {}
        }
    }

    fn halt(&mut self, err: FatalError) {
        self.halted = true;
        self.flowing = false;
        self.signals.send(MediaSignal::Fatal(err));
    }

    fn at_edge(&self) -> bool {
        self.position >= self.buffered_end - EDGE_EPSILON
    }

    /// Returns false when the worker should stop (network-class failure; the
    /// owner re-attaches a fresh source).
    async fn refresh(&mut self) -> bool {
        let content = match self.loader.load(&self.playlist_url).await {
            Ok(content) => content,
            Err(err) if self.ready && err.kind == FatalKind::Network => {
                // Buffered media keeps playing; the edge is reported as Waiting.
                self.failed_polls += 1;
                log_warn!(
                    "manifest poll {} for {} failed: {}",
                    self.failed_polls,
                    self.playlist_url,
                    err.message
                );
                return true;
            }
            Err(err) => {
                log_warn!("manifest load failed for {}: {}", self.playlist_url, err.message);
                if err.kind == FatalKind::Network {
                    self.signals.send(MediaSignal::Fatal(err));
                    return false;
                }
                self.halt(err);
                return true;
            }
        };
        self.failed_polls = 0;

        match parse_playlist(content.as_bytes()) {
            Ok(Playlist::Master(variants)) => {
                let best = variants.iter().max_by_key(|v| v.bandwidth);
                match best.map(|v| self.playlist_url.join(&v.uri)) {
                    Some(Ok(next)) => {
                        log_info!("following variant playlist {}", next);
                        self.playlist_url = next;
                    }
                    Some(Err(err)) => self.halt(FatalError::other(format!("bad variant uri: {err}"))),
                    None => self.halt(FatalError::other("master playlist has no playable variants")),
                }
            }
            Ok(Playlist::Media(playlist)) => {
                self.ready = true;
                self.buffered_end = self.buffered_end.max(playlist.total_duration());
                if let Some(target) = self.pending_seek.take() {
                    self.position = target.min(self.buffered_end);
                }
                if self.duration.observe(self.buffered_end, playlist.ended) {
                    self.signals.send(MediaSignal::DurationChanged {
                        seconds: self.duration.seconds,
                        is_final: self.duration.is_final,
                    });
                }
                self.publish();
            }
            Err(err) => self.halt(FatalError::media(err.to_string())),
        }
        true
    }

    /// Returns false when polling has failed for too long to keep waiting at
    /// the buffered edge.
    fn advance(&mut self) -> bool {
        let now = Instant::now();
        let dt = now.saturating_duration_since(self.last_clock).as_secs_f64();
        self.last_clock = now;

        if !self.playing || !self.ready || self.halted {
            return true;
        }

        if !self.at_edge() {
            self.position = (self.position + dt).min(self.buffered_end);
            if !self.flowing {
                self.flowing = true;
                self.signals.send(MediaSignal::Playing);
            }
        } else if !self.duration.is_final {
            if self.flowing {
                self.flowing = false;
                self.signals.send(MediaSignal::Waiting);
            }
            if self.failed_polls >= MAX_FAILED_POLLS_AT_EDGE {
                self.signals.send(MediaSignal::Fatal(FatalError::network(format!(
                    "manifest unavailable after {} polls",
                    self.failed_polls
                ))));
                return false;
            }
        }
        self.publish();
        true
    }

    fn publish(&self) {
        self.playhead_tx.send_replace(Playhead {
            position: self.position,
            duration: self.duration,
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves scripted responses in order, repeating the last one.
    pub struct ScriptedLoader {
        responses: Mutex<VecDeque<Result<String, FatalError>>>,
    }

    impl ScriptedLoader {
        pub fn new(responses: Vec<Result<String, FatalError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl ManifestLoader for ScriptedLoader {
        async fn load(&self, _url: &Url) -> Result<String, FatalError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses.front().cloned().unwrap()
            }
        }
    }

    /// Media playlist of six-second segments.
    pub fn manifest(segments: usize, ended: bool) -> String {
        let mut out = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:6\n");
        for i in 0..segments {
            out.push_str(&format!("#EXTINF:6.0,\nseg{i:05}.ts\n"));
        }
        if ended {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }
}
