//! The screen-capture seam.
//!
//! The engine never touches capture mechanics; it asks a [`ScreenSensor`] for
//! frames and subscribes to its change events. The in-tree [`ReplaySensor`]
//! walks a directory of still images, which is enough for the demo binary
//! and for exercising the engine end to end.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::frame::{Frame, FramePair};

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("no frames available in {0}")]
    NoFrames(PathBuf),
    #[error("could not read frame: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not decode frame: {0}")]
    Decode(#[from] image::ImageError),
}

/// The engine's view of the screen.
///
/// Implementations must honor [`pause`](ScreenSensor::pause) by suppressing
/// change events for the window, and must close the change channel on
/// [`stop`](ScreenSensor::stop).
#[async_trait]
pub trait ScreenSensor: Send + Sync {
    /// Capture the current screen contents.
    async fn capture(&self) -> Result<FramePair, SensorError>;

    /// Start change detection, returning the stream of change frames.
    /// Called at most once per session.
    fn watch(&self) -> mpsc::UnboundedReceiver<Frame>;

    /// Suppress change events for the given window, e.g. around a rewind
    /// whose own visual change should not be mistaken for progress.
    fn pause(&self, window: Duration);

    /// Stop change detection; the change channel closes.
    fn stop(&self);
}

struct WatchState {
    changes: Option<mpsc::UnboundedSender<Frame>>,
    paused_until: Option<Instant>,
}

/// Frame source over a directory of still images.
///
/// Captures consume the files in name order, repeating the last one once the
/// directory is exhausted; the scaled and full frames are the same image.
/// Change events are driven explicitly via [`ReplaySensor::emit_change`].
pub struct ReplaySensor {
    frames: Vec<PathBuf>,
    next: Mutex<usize>,
    watch: Mutex<WatchState>,
}

impl ReplaySensor {
    /// Build from every decodable image file directly under `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, SensorError> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("png" | "jpg" | "jpeg")
                )
            })
            .collect();
        frames.sort();
        if frames.is_empty() {
            return Err(SensorError::NoFrames(dir.to_path_buf()));
        }
        Ok(Self {
            frames,
            next: Mutex::new(0),
            watch: Mutex::new(WatchState {
                changes: None,
                paused_until: None,
            }),
        })
    }

    /// Advance the replay and deliver the new frame as a change event.
    ///
    /// Returns whether the event was delivered (watching, not paused).
    pub async fn emit_change(&self) -> Result<bool, SensorError> {
        let frame = self.next_frame().await?;
        let state = self.watch_state();
        if let Some(until) = state.paused_until
            && Instant::now() < until
        {
            debug!("change event suppressed by pause window");
            return Ok(false);
        }
        match &state.changes {
            Some(tx) => Ok(tx.send(frame).is_ok()),
            None => Ok(false),
        }
    }

    async fn next_frame(&self) -> Result<Frame, SensorError> {
        let path = {
            let mut next = lock(&self.next);
            let idx = (*next).min(self.frames.len() - 1);
            *next = idx + 1;
            self.frames[idx].clone()
        };
        let bytes = tokio::fs::read(&path).await?;
        Ok(Frame::new(image::load_from_memory(&bytes)?))
    }

    fn watch_state(&self) -> MutexGuard<'_, WatchState> {
        lock(&self.watch)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ScreenSensor for ReplaySensor {
    async fn capture(&self) -> Result<FramePair, SensorError> {
        Ok(FramePair::unscaled(self.next_frame().await?))
    }

    fn watch(&self) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watch_state().changes = Some(tx);
        rx
    }

    fn pause(&self, window: Duration) {
        self.watch_state().paused_until = Some(Instant::now() + window);
    }

    fn stop(&self) {
        self.watch_state().changes = None;
    }
}
