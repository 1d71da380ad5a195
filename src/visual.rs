//! Camera sampling while a session is open.
//!
//! Every tick runs pose detection on the current frame. Joint angles and
//! downscaled JPEG frames then go out on two independent throttles: angles
//! often, images rarely.

use crate::error::{LiveError, Result};
use crate::pose::{Landmark, PoseAngles};
use crate::realtime_api::RealtimeApi;
use async_trait::async_trait;
use formflux_live_types::audio::JPEG_MIME;
use formflux_live_types::{Blob, Part};
use formflux_live_utils::audio::encode_base64;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{resize, FilterType};
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub struct VisualConfig {
    frame_interval: Duration,
    pose_interval: Duration,
    image_interval: Duration,
    scale: f32,
    jpeg_quality: u8,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            pose_interval: Duration::from_millis(333),
            image_interval: Duration::from_millis(2000),
            scale: 0.25,
            jpeg_quality: 100,
        }
    }
}

impl VisualConfig {
    /// Fails unless `image_interval` is longer than `pose_interval`.
    pub fn new(pose_interval: Duration, image_interval: Duration) -> Result<Self> {
        Self::builder()
            .with_pose_interval(pose_interval)
            .with_image_interval(image_interval)
            .build()
    }

    pub fn builder() -> VisualConfigBuilder {
        VisualConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn pose_interval(&self) -> Duration {
        self.pose_interval
    }

    pub fn image_interval(&self) -> Duration {
        self.image_interval
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }
}

pub struct VisualConfigBuilder {
    config: VisualConfig,
}

impl VisualConfigBuilder {
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.config.frame_interval = interval;
        self
    }

    pub fn with_pose_interval(mut self, interval: Duration) -> Self {
        self.config.pose_interval = interval;
        self
    }

    pub fn with_image_interval(mut self, interval: Duration) -> Self {
        self.config.image_interval = interval;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.config.scale = scale;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn build(self) -> Result<VisualConfig> {
        let config = self.config;
        if config.image_interval <= config.pose_interval {
            return Err(LiveError::InvalidConfig(format!(
                "image interval {:?} must exceed pose interval {:?}",
                config.image_interval, config.pose_interval
            )));
        }
        if config.frame_interval.is_zero() {
            return Err(LiveError::InvalidConfig("frame interval must be positive".into()));
        }
        if !(config.scale > 0.0 && config.scale <= 1.0) {
            return Err(LiveError::InvalidConfig(format!(
                "scale {} outside (0, 1]",
                config.scale
            )));
        }
        Ok(config)
    }
}

/// Allows one dispatch per interval; elapsed time must strictly exceed it.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Marks a dispatch at `now` if allowed and reports whether it was.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let ready = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        };
        if ready {
            self.last = Some(now);
        }
        ready
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbImage,
    pub timestamp_ms: u64,
}

/// Camera stand-in. `is_active` turns false once the video stream is cleared.
pub trait FrameSource: Send + Sync {
    fn is_active(&self) -> bool;

    fn current_frame(&self) -> Option<VideoFrame>;
}

/// Single-person landmark detector.
pub trait PoseDetector: Send {
    /// Returns the landmarks of the detected person, if any.
    fn detect(&mut self, frame: &VideoFrame, timestamp_ms: u64) -> Result<Option<Vec<Landmark>>>;
}

#[async_trait]
pub trait DetectorLoader: Send + Sync {
    async fn load(&self) -> Result<Box<dyn PoseDetector>>;
}

enum Slot {
    Unloaded,
    Ready(Box<dyn PoseDetector>),
    Failed,
}

/// Lazily loaded detector shared by whoever samples frames.
///
/// The first caller loads it while holding the slot, so concurrent callers
/// never load twice. A failed load is remembered until [`DetectorSlot::teardown`].
pub struct DetectorSlot {
    loader: Arc<dyn DetectorLoader>,
    slot: tokio::sync::Mutex<Slot>,
}

impl DetectorSlot {
    pub fn new(loader: Arc<dyn DetectorLoader>) -> Self {
        Self {
            loader,
            slot: tokio::sync::Mutex::new(Slot::Unloaded),
        }
    }

    async fn ensure_loaded(&self, slot: &mut Slot) {
        if !matches!(slot, Slot::Unloaded) {
            return;
        }
        *slot = match self.loader.load().await {
            Ok(detector) => {
                tracing::info!("pose detector loaded");
                Slot::Ready(detector)
            }
            Err(e) => {
                let e = LiveError::DetectorInit(e.to_string());
                tracing::warn!("{}, continuing without landmarks", e);
                Slot::Failed
            }
        };
    }

    /// Whether the detector is usable, loading it on first use.
    pub async fn is_ready(&self) -> bool {
        let mut slot = self.slot.lock().await;
        self.ensure_loaded(&mut slot).await;
        matches!(*slot, Slot::Ready(_))
    }

    /// Runs detection on the blocking pool. The slot stays locked meanwhile,
    /// so callers queue behind one inference instead of stalling the runtime.
    pub async fn detect(&self, frame: &VideoFrame) -> Option<Vec<Landmark>> {
        let mut slot = self.slot.lock().await;
        self.ensure_loaded(&mut slot).await;
        let Slot::Ready(mut detector) = std::mem::replace(&mut *slot, Slot::Failed) else {
            return None;
        };
        let frame = frame.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = detector.detect(&frame, frame.timestamp_ms);
            (detector, result)
        })
        .await;
        let (detector, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!("pose detector crashed, continuing without landmarks: {}", e);
                return None;
            }
        };
        *slot = Slot::Ready(detector);
        match result {
            Ok(landmarks) => landmarks,
            Err(e) => {
                tracing::debug!("pose detection failed: {}", e);
                None
            }
        }
    }

    /// Releases the detector; the next use loads it again.
    pub async fn teardown(&self) {
        *self.slot.lock().await = Slot::Unloaded;
    }
}

/// Scales the frame and encodes it as base64 JPEG. `None` for an empty result.
pub fn encode_jpeg(image: &RgbImage, scale: f32, quality: u8) -> Result<Option<String>> {
    let width = (image.width() as f32 * scale) as u32;
    let height = (image.height() as f32 * scale) as u32;
    if width == 0 || height == 0 {
        return Ok(None);
    }
    let small = resize(image, width, height, FilterType::Triangle);
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&small)?;
    Ok(Some(encode_base64(&bytes)))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub landmarks: bool,
    pub pose_sent: bool,
    pub image_sent: bool,
}

/// Per-tick work of the visual loop, independent of any timer.
pub struct VisualSampler {
    api: Arc<dyn RealtimeApi>,
    config: VisualConfig,
    detector: Option<Arc<DetectorSlot>>,
    pose_throttle: Throttle,
    image_throttle: Throttle,
    landmarks_tx: watch::Sender<Option<Vec<Landmark>>>,
}

impl VisualSampler {
    pub fn new(
        api: Arc<dyn RealtimeApi>,
        config: VisualConfig,
        detector: Option<Arc<DetectorSlot>>,
        landmarks_tx: watch::Sender<Option<Vec<Landmark>>>,
    ) -> Self {
        Self {
            pose_throttle: Throttle::new(config.pose_interval),
            image_throttle: Throttle::new(config.image_interval),
            api,
            config,
            detector,
            landmarks_tx,
        }
    }

    pub async fn tick(&mut self, frame: &VideoFrame, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        if !self.api.state().is_open() {
            return report;
        }

        let landmarks = match &self.detector {
            Some(detector) => detector.detect(frame).await,
            None => None,
        };
        report.landmarks = landmarks.is_some();
        let angles = landmarks.as_deref().and_then(PoseAngles::from_landmarks);
        self.landmarks_tx.send_replace(landmarks);

        if let Some(angles) = angles {
            if self.pose_throttle.try_acquire(now) {
                report.pose_sent = self.send_angles(&angles).await;
            }
        }
        if self.image_throttle.try_acquire(now) {
            report.image_sent = self.send_image(frame).await;
        }
        report
    }

    async fn send_angles(&self, angles: &PoseAngles) -> bool {
        let text = match angles.to_message() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("failed to encode pose angles: {}", e);
                return false;
            }
        };
        match self.api.send(vec![Part::text(text)], false).await {
            Ok(()) => {
                tracing::debug!("sent pose angles");
                true
            }
            Err(e) => {
                tracing::debug!("pose angles not sent: {}", e);
                false
            }
        }
    }

    async fn send_image(&self, frame: &VideoFrame) -> bool {
        let image = frame.image.clone();
        let (scale, quality) = (self.config.scale, self.config.jpeg_quality);
        let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&image, scale, quality))
            .await
            .unwrap_or_else(|e| Err(LiveError::Encode(e.to_string())));
        let data = match encoded {
            Ok(Some(data)) => data,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!("failed to encode frame: {}", e);
                return false;
            }
        };
        match self
            .api
            .send_realtime_input(vec![Blob::new(JPEG_MIME, data)])
            .await
        {
            Ok(()) => {
                tracing::debug!("sent camera frame");
                true
            }
            Err(e) => {
                tracing::debug!("camera frame not sent: {}", e);
                false
            }
        }
    }
}

struct Running {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Drives a [`VisualSampler`] at the frame cadence.
///
/// The loop ends on `stop`, when the session is no longer open, or when the
/// frame source goes inactive.
pub struct VisualLoop {
    api: Arc<dyn RealtimeApi>,
    config: VisualConfig,
    source: Arc<dyn FrameSource>,
    detector: Option<Arc<DetectorSlot>>,
    landmarks_tx: watch::Sender<Option<Vec<Landmark>>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl VisualLoop {
    pub fn new(
        api: Arc<dyn RealtimeApi>,
        config: VisualConfig,
        source: Arc<dyn FrameSource>,
        detector: Option<Arc<DetectorSlot>>,
    ) -> Self {
        let (landmarks_tx, _) = watch::channel(None);
        Self {
            api,
            config,
            source,
            detector,
            landmarks_tx,
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Landmarks of the latest tick, `None` when nobody was detected.
    pub fn landmarks(&self) -> watch::Receiver<Option<Vec<Landmark>>> {
        self.landmarks_tx.subscribe()
    }

    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let mut sampler = VisualSampler::new(
            self.api.clone(),
            self.config.clone(),
            self.detector.clone(),
            self.landmarks_tx.clone(),
        );
        let api = self.api.clone();
        let source = self.source.clone();
        let landmarks_tx = self.landmarks_tx.clone();
        let frame_interval = self.config.frame_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                if !api.state().is_open() {
                    tracing::debug!("session closed, visual loop exiting");
                    break;
                }
                if !source.is_active() {
                    tracing::debug!("video cleared, visual loop exiting");
                    break;
                }
                let Some(frame) = source.current_frame() else {
                    continue;
                };
                sampler.tick(&frame, Instant::now()).await;
            }
            landmarks_tx.send_replace(None);
        });
        *running = Some(Running { stop_tx, task });
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Cancels the pending tick and releases the detector.
    pub async fn stop(&self) {
        if let Some(running) = self.running.lock().await.take() {
            let _ = running.stop_tx.send(true);
            running.task.abort();
            let _ = running.task.await;
        }
        self.landmarks_tx.send_replace(None);
        if let Some(detector) = &self.detector {
            detector.teardown().await;
        }
    }
}
