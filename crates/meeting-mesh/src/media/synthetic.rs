//! In-process capture devices.
//!
//! Produces labelled tracks with no real hardware behind them. Used by the
//! `mesh-sim` binary and by tests; switches simulate a denied permission
//! prompt or an unplugged camera/microphone.

use super::{MediaConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind};
use crate::errors::DeviceError;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Fake camera and microphone.
#[derive(Debug)]
pub struct SyntheticDevices {
    label: String,
    permission_granted: AtomicBool,
    camera_available: AtomicBool,
    microphone_available: AtomicBool,
    acquisitions: AtomicU32,
}

impl SyntheticDevices {
    #[must_use]
    pub fn new() -> Self {
        Self::with_label("synthetic")
    }

    /// Devices whose track labels start with `label`.
    #[must_use]
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            permission_granted: AtomicBool::new(true),
            camera_available: AtomicBool::new(true),
            microphone_available: AtomicBool::new(true),
            acquisitions: AtomicU32::new(0),
        }
    }

    pub fn set_permission_granted(&self, granted: bool) {
        self.permission_granted.store(granted, Ordering::SeqCst);
    }

    pub fn set_camera_available(&self, available: bool) {
        self.camera_available.store(available, Ordering::SeqCst);
    }

    pub fn set_microphone_available(&self, available: bool) {
        self.microphone_available.store(available, Ordering::SeqCst);
    }

    /// Number of successful `get_user_media` calls.
    #[must_use]
    pub fn acquisitions(&self) -> u32 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, DeviceError> {
        if !self.permission_granted.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied);
        }
        if constraints.video && !self.camera_available.load(Ordering::SeqCst) {
            return Err(DeviceError::NotFound(TrackKind::Video));
        }
        if constraints.audio && !self.microphone_available.load(Ordering::SeqCst) {
            return Err(DeviceError::NotFound(TrackKind::Audio));
        }

        let mut tracks = Vec::with_capacity(2);
        if constraints.audio {
            tracks.push(MediaTrack::new(
                TrackKind::Audio,
                format!("{}-microphone", self.label),
            ));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(
                TrackKind::Video,
                format!("{}-camera", self.label),
            ));
        }

        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(MediaStream::new(tracks))
    }
}
