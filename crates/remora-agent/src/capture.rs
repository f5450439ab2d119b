//! Frame capture and input injection seams
//!
//! Screen capture and input injection are platform services the agent
//! only consumes, so both live behind traits. The streaming controller
//! calls [`FrameSource::capture`] on the blocking pool; the dispatcher
//! hands `vnc_input` events to an [`InputSink`].

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use tracing::debug;

use remora_proto::InputEvent;

use crate::error::Result;

/// Produces one encoded screen frame per call.
///
/// Implementations may block; callers are expected to run them on the
/// blocking pool.
pub trait FrameSource: Send + Sync {
    /// Capture the screen once, returning an encoded image (any format
    /// the `image` crate can sniff).
    fn capture(&self) -> Result<Vec<u8>>;
}

/// Synthetic frame source: a moving colour wash with no display access.
///
/// Serves headless smoke runs and tests; wiring a platform screenshot
/// backend means implementing [`FrameSource`] over it and swapping it in
/// at startup.
#[derive(Debug, Default)]
pub struct TestCardSource {
    frame_counter: AtomicU32,
}

impl TestCardSource {
    /// Frame width of the generated card.
    pub const WIDTH: u32 = 640;
    /// Frame height of the generated card.
    pub const HEIGHT: u32 = 480;

    /// Create a test card source.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSource for TestCardSource {
    fn capture(&self) -> Result<Vec<u8>> {
        let tick = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        let image = RgbImage::from_fn(Self::WIDTH, Self::HEIGHT, |x, y| {
            let r = ((x + tick) % 256) as u8;
            let g = ((y + tick) % 256) as u8;
            let b = ((x ^ y) % 256) as u8;
            image::Rgb([r, g, b])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

/// Applies remote input events to the local desktop.
#[async_trait]
pub trait InputSink: Send + Sync {
    /// Apply one event. Unsupported events are not errors.
    async fn inject(&self, event: InputEvent) -> Result<()>;
}

/// [`InputSink`] for platforms without an injection backend: events are
/// logged at debug level and discarded.
#[derive(Debug, Default)]
pub struct DiscardInputSink;

impl DiscardInputSink {
    /// Create a discarding sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InputSink for DiscardInputSink {
    async fn inject(&self, event: InputEvent) -> Result<()> {
        debug!(?event, "no input backend on this platform, event discarded");
        Ok(())
    }
}
