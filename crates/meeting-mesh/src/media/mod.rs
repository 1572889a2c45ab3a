//! Local and remote media primitives.
//!
//! A [`MediaTrack`] is a shared handle: clones refer to the same underlying
//! track, so enabling or disabling it in place is observed by every peer
//! link that carries it. A [`MediaStream`] is an ordered set of track handles.
//!
//! Device access sits behind the [`MediaDevices`] capability so that a
//! browser, a native capture stack, or the in-process [`SyntheticDevices`]
//! can back the same [`MediaDeviceController`].

pub mod controller;
pub mod synthetic;

pub use controller::MediaDeviceController;
pub use synthetic::SyntheticDevices;

use crate::errors::DeviceError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TrackInner {
    id: Uuid,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

/// Shared handle to one media track.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a new live, enabled track.
    #[must_use]
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4(),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether the track currently carries media (not muted, not stopped).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst) && !self.is_stopped()
    }

    /// Enable or disable the track in place without releasing the device.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Stop the track and release the underlying device. Stopping is final.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaTrack {}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("enabled", &self.inner.enabled.load(Ordering::SeqCst))
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// An ordered set of tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    id: Uuid,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    #[must_use]
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// First track of the given kind.
    #[must_use]
    pub fn track(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    #[must_use]
    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.track(TrackKind::Audio)
    }

    #[must_use]
    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.track(TrackKind::Video)
    }

    /// Whether any video track is currently carrying media.
    #[must_use]
    pub fn has_enabled_video(&self) -> bool {
        self.tracks
            .iter()
            .any(|t| t.kind() == TrackKind::Video && t.is_enabled())
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        if !self.tracks.contains(&track) {
            self.tracks.push(track);
        }
    }

    /// Detach every track of `kind`, returning them. Tracks are not stopped.
    pub fn remove_tracks(&mut self, kind: TrackKind) -> Vec<MediaTrack> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            self.tracks.drain(..).partition(|t| t.kind() == kind);
        self.tracks = kept;
        removed
    }

    /// Swap the track of `kind` for `track` (or just detach it when `None`).
    pub fn set_track(&mut self, kind: TrackKind, track: Option<MediaTrack>) {
        self.remove_tracks(kind);
        if let Some(track) = track {
            self.tracks.push(track);
        }
    }

    /// Stop every track in the stream.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Which devices to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    /// Camera only, used when re-acquiring video after camera-off.
    #[must_use]
    pub const fn video_only() -> Self {
        Self {
            audio: false,
            video: true,
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Local capture state owned by the [`MediaDeviceController`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalMediaState {
    pub stream: Option<MediaStream>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl LocalMediaState {
    /// The current local video track, if the camera is on.
    #[must_use]
    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.stream.as_ref().and_then(MediaStream::video_track)
    }

    #[must_use]
    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.stream.as_ref().and_then(MediaStream::audio_track)
    }
}

/// Capability for acquiring capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Request a stream satisfying `constraints`. May suspend on a
    /// permission prompt.
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, DeviceError>;
}
