//! Screen-frame streaming controller
//!
//! Owns the start/stop lifecycle of one capture loop. The loop runs as
//! its own task, does the pixel work on the blocking pool, and pushes
//! `vnc_frame` messages through the channel sink. A failed frame pauses
//! the loop briefly instead of ending it, so screen sharing degrades
//! rather than dies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use remora_proto::{AgentMessage, VncQuality};

use crate::capture::FrameSource;
use crate::channel::ChannelSink;
use crate::error::Result;
use crate::identity::Identity;

/// JPEG quality for encoded frames.
const JPEG_QUALITY: u8 = 70;

/// Pause after a failed capture or send before the next attempt.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Longest wait for the loop to observe a stop request.
const STOP_WAIT: Duration = Duration::from_secs(2);

/// Resolved quality parameters for one streaming run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPreset {
    /// Frame dimensions are scaled to this percentage of the source.
    pub resize_percent: u32,
    /// The tier's native frame pacing, used when the request carries no
    /// usable fps.
    pub frame_interval: Duration,
}

/// Fixed preset table. Unknown tiers resolve to medium.
pub fn preset_for(quality: VncQuality) -> QualityPreset {
    let (resize_percent, interval_ms) = match quality {
        VncQuality::Low => (30, 50),
        VncQuality::Medium | VncQuality::Unknown => (50, 30),
        VncQuality::High => (75, 15),
    };
    QualityPreset {
        resize_percent,
        frame_interval: Duration::from_millis(interval_ms),
    }
}

struct Inner {
    identity: Arc<Identity>,
    sink: ChannelSink,
    source: Arc<dyn FrameSource>,
    running: AtomicBool,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Start/stop controller for the screen-frame stream.
///
/// At most one capture loop exists process-wide: starting while running
/// is a no-op, stopping is idempotent.
#[derive(Clone)]
pub struct VncController {
    inner: Arc<Inner>,
}

impl VncController {
    /// Create a controller streaming frames from `source`.
    pub fn new(identity: Arc<Identity>, sink: ChannelSink, source: Arc<dyn FrameSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                identity,
                sink,
                source,
                running: AtomicBool::new(false),
                task: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Launch the capture loop unless one is already running.
    pub async fn start(&self, quality: VncQuality, fps: u32) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("vnc capture loop already running");
            return;
        }

        let preset = preset_for(quality);
        let frame_delay = if fps > 0 {
            Duration::from_secs_f64(1.0 / f64::from(fps))
        } else {
            preset.frame_interval
        };

        let handle = tokio::spawn(capture_loop(self.inner.clone(), preset, frame_delay));
        *self.inner.task.lock().await = Some(handle);
        info!(?quality, fps, resize_percent = preset.resize_percent, "vnc streaming started");
    }

    /// Request the loop to stop and wait (bounded) for it to comply.
    ///
    /// A frame already in flight completes first; if the loop is inside
    /// its error pause it may outlive the wait, in which case it is left
    /// to notice the flag on its own.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let handle = self.inner.task.lock().await.take();
        if let Some(handle) = handle {
            if timeout(STOP_WAIT, handle).await.is_err() {
                warn!("vnc capture loop did not stop within {STOP_WAIT:?}");
            }
        }
        info!("vnc streaming stopped");
    }

    /// Whether the capture loop is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

async fn capture_loop(inner: Arc<Inner>, preset: QualityPreset, frame_delay: Duration) {
    while inner.running.load(Ordering::SeqCst) {
        match encode_frame(inner.source.clone(), preset.resize_percent).await {
            Ok(frame) => {
                let message = AgentMessage::VncFrame {
                    agent_id: inner.identity.agent_id(),
                    frame,
                    timestamp: unix_now(),
                };
                if inner.sink.send(message).is_err() {
                    warn!("channel down, vnc frame dropped");
                    tokio::time::sleep(RETRY_PAUSE).await;
                    continue;
                }
                tokio::time::sleep(frame_delay).await;
            }
            Err(e) => {
                warn!(error = %e, "vnc frame capture failed");
                tokio::time::sleep(RETRY_PAUSE).await;
            }
        }
    }
    debug!("vnc capture loop exited");
}

/// Capture one frame and produce the base64 JPEG payload. All pixel work
/// happens on the blocking pool.
async fn encode_frame(source: Arc<dyn FrameSource>, resize_percent: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        let raw = source.capture()?;
        let image = image::load_from_memory(&raw)?;

        let width = (image.width() * resize_percent / 100).max(1);
        let height = (image.height() * resize_percent / 100).max(1);
        let resized = image.resize_exact(width, height, FilterType::Lanczos3).into_rgb8();

        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
        resized.write_with_encoder(encoder)?;

        Ok(BASE64.encode(&jpeg))
    })
    .await?
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
