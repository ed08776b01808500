//! Media source adapter.
//!
//! A [`MediaSource`] wraps whatever actually decodes the adaptive stream. The
//! [`MediaAdapter`] is the single playback slot of a session view: it owns at
//! most one source, always destroys the previous one before creating the
//! next, and tags every signal with an attach generation so callbacks from a
//! replaced source are recognisably stale.

pub mod hls;
pub mod playlist;

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use crate::models::{DurationEstimate, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// Manifest or segment fetch failed, usually because assembly has not
    /// produced the first segment yet.
    Network,
    /// Decode/parse failure the source can recover from in place.
    Media,
    /// Anything the source cannot play at all, such as a stream with no
    /// usable variant.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FatalError {
    pub kind: FatalKind,
    pub message: String,
}

impl FatalError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FatalKind::Network,
            message: message.into(),
        }
    }

    pub fn media(message: impl Into<String>) -> Self {
        Self {
            kind: FatalKind::Media,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: FatalKind::Other,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaSignal {
    Playing,
    Waiting,
    DurationChanged { seconds: f64, is_final: bool },
    Fatal(FatalError),
}

/// Signal stamped with the attach generation that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedSignal {
    pub generation: u64,
    pub signal: MediaSignal,
}

#[derive(Debug, Clone)]
pub struct SignalSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedSignal>,
}

impl SignalSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedSignal>) -> Self {
        Self { generation, tx }
    }

    /// Returns false once the owning view is gone.
    pub fn send(&self, signal: MediaSignal) -> bool {
        self.tx
            .send(TaggedSignal {
                generation: self.generation,
                signal,
            })
            .is_ok()
    }
}

pub trait MediaSource: Send {
    fn play(&mut self);
    fn pause(&mut self);
    /// Seeks issued before the first playlist arrived apply once it does.
    fn seek(&mut self, position: f64);
    /// In-place recovery after a decode/media error.
    fn recover(&mut self);
    fn position(&self) -> f64;
    fn duration(&self) -> DurationEstimate;
    /// Stops all output and background work. Must be idempotent.
    fn destroy(&mut self);
}

pub trait MediaSourceFactory: Send + Sync {
    fn create(&self, url: &Url, signals: SignalSink) -> Box<dyn MediaSource>;
}

/// Manifest URL for a session, built from the locally configured base only.
pub fn stream_url(media_base: &Url, session_id: SessionId) -> Result<Url, url::ParseError> {
    let base = media_base.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/hls/{session_id}/stream.m3u8"))
}

pub struct MediaAdapter {
    factory: Arc<dyn MediaSourceFactory>,
    signals: mpsc::UnboundedSender<TaggedSignal>,
    source: Option<Box<dyn MediaSource>>,
    url: Option<Url>,
    generation: u64,
    paused: bool,
}

impl MediaAdapter {
    pub fn new(
        factory: Arc<dyn MediaSourceFactory>,
        signals: mpsc::UnboundedSender<TaggedSignal>,
    ) -> Self {
        Self {
            factory,
            signals,
            source: None,
            url: None,
            generation: 0,
            paused: false,
        }
    }

    /// Destroys any current source, then creates and starts a new one.
    pub fn attach(&mut self, url: Url) {
        self.detach();
        self.generation += 1;
        log::info!("attaching media source #{} to {}", self.generation, url);

        let sink = SignalSink::new(self.generation, self.signals.clone());
        let mut source = self.factory.create(&url, sink);
        source.play();
        self.paused = false;
        self.source = Some(source);
        self.url = Some(url);
    }

    /// Recreates the source for the last attached URL and resumes it where
    /// the previous one stopped.
    pub fn reattach(&mut self) -> bool {
        let Some(url) = self.url.clone() else {
            return false;
        };
        let resume_at = self.position();
        self.attach(url);
        if resume_at > 0.0 {
            self.seek(resume_at);
        }
        true
    }

    pub fn detach(&mut self) {
        if let Some(mut source) = self.source.take() {
            log::info!("destroying media source #{}", self.generation);
            source.destroy();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.source.is_some() && generation == self.generation
    }

    pub fn position(&self) -> f64 {
        self.source.as_ref().map_or(0.0, |s| s.position())
    }

    pub fn duration(&self) -> DurationEstimate {
        self.source
            .as_ref()
            .map(|s| s.duration())
            .unwrap_or_default()
    }

    pub fn play(&mut self) {
        if let Some(source) = self.source.as_mut() {
            self.paused = false;
            source.play();
        }
    }

    /// Idempotent; only the first call after playing reaches the source.
    pub fn pause(&mut self) {
        if let Some(source) = self.source.as_mut() {
            if !self.paused {
                self.paused = true;
                source.pause();
            }
        }
    }

    pub fn seek(&mut self, position: f64) {
        if let Some(source) = self.source.as_mut() {
            source.seek(position);
        }
    }

    pub fn recover(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.recover();
        }
    }
}

impl Drop for MediaAdapter {
    fn drop(&mut self) {
        self.detach();
    }
}
