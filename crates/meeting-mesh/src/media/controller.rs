//! `MediaDeviceController` - owns the local capture stream.
//!
//! Audio mute flips the existing track in place. Camera-off stops and
//! detaches the video track so the hardware is released; camera-on asks the
//! device for a fresh video-only stream and attaches its track.

use super::{LocalMediaState, MediaConstraints, MediaDevices, MediaStream, TrackKind};
use crate::errors::DeviceError;

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Owner of [`LocalMediaState`].
pub struct MediaDeviceController {
    devices: Arc<dyn MediaDevices>,
    state: LocalMediaState,
}

impl MediaDeviceController {
    #[must_use]
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            state: LocalMediaState::default(),
        }
    }

    /// Current local media state.
    #[must_use]
    pub fn state(&self) -> &LocalMediaState {
        &self.state
    }

    /// Acquire camera and/or microphone.
    ///
    /// Any previously held stream is released first.
    ///
    /// # Errors
    ///
    /// Returns the device error when permission is denied or no device
    /// exists; state is left empty in that case.
    #[instrument(skip_all, name = "mesh.media.acquire")]
    pub async fn acquire(
        &mut self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMediaState, DeviceError> {
        self.release();

        let stream = self.devices.get_user_media(constraints).await.map_err(|e| {
            warn!(target: "mesh.media", error = %e, "Failed to acquire local media");
            e
        })?;

        self.state = LocalMediaState {
            audio_enabled: stream.audio_track().is_some_and(|t| t.is_enabled()),
            video_enabled: stream.video_track().is_some_and(|t| t.is_enabled()),
            stream: Some(stream),
        };

        info!(
            target: "mesh.media",
            audio = self.state.audio_enabled,
            video = self.state.video_enabled,
            "Local media acquired"
        );

        Ok(self.state.clone())
    }

    /// Flip the microphone. Returns the new `audio_enabled`.
    ///
    /// Without an audio track the state stays off.
    pub fn toggle_audio(&mut self) -> bool {
        let target = !self.state.audio_enabled;
        self.set_audio_enabled(target)
    }

    /// Enable or disable the existing audio track in place.
    pub fn set_audio_enabled(&mut self, enabled: bool) -> bool {
        let Some(track) = self.state.audio_track() else {
            debug!(target: "mesh.media", "No audio track, ignoring mute change");
            return self.state.audio_enabled;
        };

        track.set_enabled(enabled);
        self.state.audio_enabled = enabled;
        debug!(target: "mesh.media", audio = enabled, "Audio toggled");
        enabled
    }

    /// Flip the camera. Returns the new `video_enabled`.
    ///
    /// Re-acquisition failures are logged and leave the camera off.
    pub async fn toggle_video(&mut self) -> bool {
        let target = !self.state.video_enabled;
        self.set_video_enabled(target).await
    }

    /// Turn the camera on (fresh device track) or off (track stopped and
    /// detached).
    #[instrument(skip_all, name = "mesh.media.video", fields(enabled = enabled))]
    pub async fn set_video_enabled(&mut self, enabled: bool) -> bool {
        if self.state.stream.is_none() {
            debug!(target: "mesh.media", "No local stream, ignoring camera change");
            return self.state.video_enabled;
        }

        if enabled == self.state.video_enabled {
            return enabled;
        }

        if enabled {
            self.camera_on().await;
        } else {
            self.camera_off();
        }

        self.state.video_enabled
    }

    fn camera_off(&mut self) {
        if let Some(stream) = self.state.stream.as_mut() {
            for track in stream.remove_tracks(TrackKind::Video) {
                track.stop();
                debug!(target: "mesh.media", track_id = %track.id(), "Video track stopped");
            }
        }
        self.state.video_enabled = false;
        info!(target: "mesh.media", "Camera released");
    }

    async fn camera_on(&mut self) {
        let fresh = match self
            .devices
            .get_user_media(&MediaConstraints::video_only())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(target: "mesh.media", error = %e, "Failed to re-enable camera");
                return;
            }
        };

        let Some(track) = fresh.video_track().cloned() else {
            warn!(target: "mesh.media", "Device returned no video track");
            fresh.stop_all();
            return;
        };

        // Anything else the device handed back is not wanted.
        for extra in fresh.tracks().iter().filter(|t| **t != track) {
            extra.stop();
        }

        if let Some(stream) = self.state.stream.as_mut() {
            stream.set_track(TrackKind::Video, Some(track.clone()));
            self.state.video_enabled = true;
            info!(target: "mesh.media", track_id = %track.id(), "Camera re-acquired");
        } else {
            track.stop();
        }
    }

    /// Stop every track and clear the state. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(stream) = self.state.stream.take() {
            stream.stop_all();
            info!(target: "mesh.media", "Local media released");
        }
        self.state = LocalMediaState::default();
    }

    /// Snapshot of the local stream, or an empty one when nothing is held.
    #[must_use]
    pub fn stream_or_empty(&self) -> MediaStream {
        self.state.stream.clone().unwrap_or_else(MediaStream::empty)
    }
}

impl Drop for MediaDeviceController {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::SyntheticDevices;

    fn controller() -> (MediaDeviceController, Arc<SyntheticDevices>) {
        let devices = Arc::new(SyntheticDevices::new());
        (MediaDeviceController::new(devices.clone()), devices)
    }

    #[tokio::test]
    async fn test_acquire_populates_state() {
        let (mut media, _) = controller();

        let state = media.acquire(&MediaConstraints::default()).await.unwrap();

        assert!(state.audio_enabled);
        assert!(state.video_enabled);
        assert!(state.audio_track().is_some());
        assert!(state.video_track().is_some());
    }

    #[tokio::test]
    async fn test_acquire_denied() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.set_permission_granted(false);
        let mut media = MediaDeviceController::new(devices);

        let result = media.acquire(&MediaConstraints::default()).await;

        assert_eq!(result.unwrap_err(), DeviceError::PermissionDenied);
        assert_eq!(media.state(), &LocalMediaState::default());
    }

    #[tokio::test]
    async fn test_toggle_audio_keeps_track() {
        let (mut media, _) = controller();
        media.acquire(&MediaConstraints::default()).await.unwrap();
        let track = media.state().audio_track().cloned().unwrap();

        assert!(!media.toggle_audio());
        assert!(!track.is_enabled());
        assert!(!track.is_stopped());
        assert_eq!(media.state().audio_track(), Some(&track));

        assert!(media.toggle_audio());
        assert!(track.is_enabled());
    }

    #[tokio::test]
    async fn test_toggle_audio_without_stream() {
        let (mut media, _) = controller();
        assert!(!media.toggle_audio());
    }

    #[tokio::test]
    async fn test_camera_off_releases_device() {
        let (mut media, _) = controller();
        media.acquire(&MediaConstraints::default()).await.unwrap();
        let old = media.state().video_track().cloned().unwrap();

        assert!(!media.toggle_video().await);

        assert!(old.is_stopped());
        assert!(media.state().video_track().is_none());
        assert!(!media.state().video_enabled);
        // Audio untouched
        assert!(media.state().audio_enabled);
    }

    #[tokio::test]
    async fn test_camera_round_trip_gets_new_track() {
        let (mut media, devices) = controller();
        media.acquire(&MediaConstraints::default()).await.unwrap();
        let old = media.state().video_track().cloned().unwrap();

        media.toggle_video().await;
        assert!(media.toggle_video().await);

        let new = media.state().video_track().cloned().unwrap();
        assert_ne!(new, old);
        assert!(new.is_enabled());
        assert!(media.state().video_enabled);
        assert_eq!(devices.acquisitions(), 2);
    }

    #[tokio::test]
    async fn test_camera_on_failure_leaves_video_off() {
        let (mut media, devices) = controller();
        media.acquire(&MediaConstraints::default()).await.unwrap();
        media.toggle_video().await;

        devices.set_camera_available(false);
        assert!(!media.toggle_video().await);
        assert!(!media.state().video_enabled);
        assert!(media.state().video_track().is_none());
        assert!(media.state().audio_track().is_some());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (mut media, _) = controller();
        media.acquire(&MediaConstraints::default()).await.unwrap();
        let stream = media.state().stream.clone().unwrap();

        media.release();
        media.release();

        assert!(stream.tracks().iter().all(|t| t.is_stopped()));
        assert_eq!(media.state(), &LocalMediaState::default());
        assert!(media.stream_or_empty().tracks().is_empty());
    }

    #[tokio::test]
    async fn test_drop_stops_tracks() {
        let (mut media, _) = controller();
        media.acquire(&MediaConstraints::default()).await.unwrap();
        let stream = media.state().stream.clone().unwrap();

        drop(media);

        assert!(stream.tracks().iter().all(|t| t.is_stopped()));
    }
}
