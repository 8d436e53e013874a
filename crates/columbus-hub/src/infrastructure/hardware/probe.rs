//! Camera presence probes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::modules::CameraProbe;

/// Present while a device node (e.g. `/dev/video0`) exists.
#[derive(Debug, Clone)]
pub struct DevicePathProbe {
    path: PathBuf,
}

impl DevicePathProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CameraProbe for DevicePathProbe {
    fn is_present(&self) -> bool {
        self.path.exists()
    }

    fn device(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Presence flag flipped by hand.
#[derive(Debug, Default)]
pub struct FixedProbe {
    present: AtomicBool,
}

impl FixedProbe {
    pub fn new(present: bool) -> Self {
        Self {
            present: AtomicBool::new(present),
        }
    }

    pub fn set(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }
}

impl CameraProbe for FixedProbe {
    fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
