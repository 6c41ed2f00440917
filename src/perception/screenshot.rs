use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::RgbImage;

use crate::errors::{HayBotError, HayBotResult};
use crate::perception::traits::ScreenSource;
use crate::perception::types::ScreenFrame;

/// Frames younger than this are reused by cached captures.
pub const CACHE_WINDOW: Duration = Duration::from_millis(50);

/// Blocking raw frame acquisition.
pub trait FrameGrabber: Send + Sync + 'static {
    fn grab(&self) -> HayBotResult<RgbImage>;
}

/// Wraps a blocking grabber, runs it off the async runtime and keeps the
/// most recent frame for short-lived reuse.
pub struct CachedScreen<G: FrameGrabber> {
    grabber: Arc<G>,
    cache: Mutex<Option<(Instant, ScreenFrame)>>,
    window: Duration,
}

impl<G: FrameGrabber> CachedScreen<G> {
    pub fn new(grabber: G) -> Self {
        Self::with_window(grabber, CACHE_WINDOW)
    }

    pub fn with_window(grabber: G, window: Duration) -> Self {
        Self {
            grabber: Arc::new(grabber),
            cache: Mutex::new(None),
            window,
        }
    }

    fn cached(&self) -> Option<ScreenFrame> {
        let guard = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.window)
            .map(|(_, frame)| frame.clone())
    }
}

#[async_trait]
impl<G: FrameGrabber> ScreenSource for CachedScreen<G> {
    async fn capture(&self, use_cache: bool) -> HayBotResult<ScreenFrame> {
        if use_cache {
            if let Some(frame) = self.cached() {
                return Ok(frame);
            }
        }
        let grabber = Arc::clone(&self.grabber);
        let image = tokio::task::spawn_blocking(move || grabber.grab()).await??;
        let frame = ScreenFrame::new(image);
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = Some((Instant::now(), frame.clone()));
        tracing::trace!(width = frame.width(), height = frame.height(), "frame captured");
        Ok(frame)
    }

    fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Primary-monitor capture through xcap.
#[cfg(feature = "native")]
pub struct XcapGrabber;

#[cfg(feature = "native")]
impl FrameGrabber for XcapGrabber {
    fn grab(&self) -> HayBotResult<RgbImage> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| HayBotError::Perception(format!("monitor enumeration failed: {e}")))?;
        let monitor = monitors
            .iter()
            .find(|m| m.is_primary())
            .or_else(|| monitors.first())
            .ok_or_else(|| HayBotError::Perception("no monitor available".into()))?;
        let rgba = monitor
            .capture_image()
            .map_err(|e| HayBotError::Perception(format!("screen capture failed: {e}")))?;
        let (w, h) = (rgba.width(), rgba.height());
        rgba_to_rgb(w, h, rgba.into_raw())
    }
}

/// Drops the alpha channel of a packed RGBA buffer.
pub fn rgba_to_rgb(width: u32, height: u32, raw: Vec<u8>) -> HayBotResult<RgbImage> {
    let rgb: Vec<u8> = raw
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| HayBotError::Perception(format!("bad frame buffer for {width}x{height}")))
}
