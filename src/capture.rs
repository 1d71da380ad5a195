use crate::error::{LiveError, Result};
use crate::realtime_api::RealtimeApi;
use formflux_live_types::audio::{input_pcm_mime, INPUT_SAMPLE_RATE};
use formflux_live_types::Blob;
use formflux_live_utils::audio::{encode_base64, encode_pcm16, rms, ChunkedResampler};
use formflux_live_utils::stream::{open_input, DeviceStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const RESAMPLE_CHUNK: usize = 1024;
const SAMPLES_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    device: Option<String>,
    chunk_samples: usize,
    buffer_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            chunk_samples: 2048,
            buffer_frames: 1024,
        }
    }
}

impl CaptureConfig {
    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }

    /// Samples per emitted chunk at 16 kHz.
    pub fn with_chunk_samples(mut self, chunk_samples: usize) -> Self {
        self.chunk_samples = chunk_samples.max(1);
        self
    }

    pub fn with_buffer_frames(mut self, buffer_frames: usize) -> Self {
        self.buffer_frames = buffer_frames.max(1);
        self
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }
}

/// Identifies one running capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHandle {
    id: u64,
    source_rate: u32,
}

impl CaptureHandle {
    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }
}

struct Running {
    handle: CaptureHandle,
    task: JoinHandle<()>,
    device: Option<DeviceStream>,
}

struct Pipeline {
    api: Arc<dyn RealtimeApi>,
    muted: AtomicBool,
    captured: AtomicU64,
    forwarded: AtomicU64,
    volume_tx: watch::Sender<f32>,
    faults: Option<mpsc::UnboundedSender<LiveError>>,
}

impl Pipeline {
    async fn emit(&self, chunk: &[f32]) {
        self.volume_tx.send_replace(rms(chunk));
        self.captured.fetch_add(1, Ordering::Relaxed);

        if self.muted.load(Ordering::Relaxed) || !self.api.state().is_open() {
            return;
        }
        let data = encode_base64(&encode_pcm16(chunk));
        match self
            .api
            .send_realtime_input(vec![Blob::new(input_pcm_mime(), data)])
            .await
        {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => tracing::debug!("dropped audio chunk: {}", e),
        }
    }

    fn fault(&self, detail: String) {
        tracing::error!("microphone stream failed: {}", detail);
        if let Some(faults) = &self.faults {
            let _ = faults.send(LiveError::Permission {
                device: "microphone".to_string(),
                detail,
            });
        }
    }
}

/// Microphone capture cut into fixed-size 16 kHz PCM16 chunks.
///
/// Chunks are forwarded only while the session is open and capture is not
/// muted. Muting keeps the device running so the input volume stays live.
pub struct AudioCapture {
    config: CaptureConfig,
    pipeline: Arc<Pipeline>,
    next_id: AtomicU64,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl AudioCapture {
    pub fn new(api: Arc<dyn RealtimeApi>, config: CaptureConfig) -> Self {
        Self::with_faults(api, config, None)
    }

    /// Device failures are reported on `faults` after the stream has started.
    pub fn with_faults(
        api: Arc<dyn RealtimeApi>,
        config: CaptureConfig,
        faults: Option<mpsc::UnboundedSender<LiveError>>,
    ) -> Self {
        let (volume_tx, _) = watch::channel(0.0);
        Self {
            config,
            pipeline: Arc::new(Pipeline {
                api,
                muted: AtomicBool::new(false),
                captured: AtomicU64::new(0),
                forwarded: AtomicU64::new(0),
                volume_tx,
                faults,
            }),
            next_id: AtomicU64::new(1),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Opens the microphone. Returns the existing handle when already streaming.
    pub async fn start(&self) -> Result<CaptureHandle> {
        let mut running = self.running.lock().await;
        if let Some(running) = running.as_ref() {
            return Ok(running.handle);
        }

        let (samples_tx, samples_rx) = mpsc::channel(SAMPLES_CAPACITY);
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let device = self.config.device.clone();
        let buffer_frames = self.config.buffer_frames;
        let stream = tokio::task::spawn_blocking(move || {
            open_input(device, buffer_frames, samples_tx, error_tx)
        })
        .await
        .map_err(|e| LiveError::permission("microphone", e))?
        .map_err(|e| LiveError::permission("microphone", e))?;

        let source_rate = stream.sample_rate();
        let started = self.spawn(samples_rx, error_rx, source_rate, Some(stream))?;
        tracing::info!("microphone capture started at {} Hz", source_rate);
        Ok(running.insert(started).handle)
    }

    /// Starts capture from an already open sample source instead of a device.
    pub async fn start_with_source(
        &self,
        samples_rx: mpsc::Receiver<Vec<f32>>,
        source_rate: u32,
    ) -> Result<CaptureHandle> {
        let mut running = self.running.lock().await;
        if let Some(running) = running.as_ref() {
            return Ok(running.handle);
        }
        let (_, error_rx) = mpsc::unbounded_channel();
        let started = self.spawn(samples_rx, error_rx, source_rate, None)?;
        Ok(running.insert(started).handle)
    }

    fn spawn(
        &self,
        mut samples_rx: mpsc::Receiver<Vec<f32>>,
        mut error_rx: mpsc::UnboundedReceiver<String>,
        source_rate: u32,
        device: Option<DeviceStream>,
    ) -> Result<Running> {
        let mut resampler = ChunkedResampler::new(source_rate, INPUT_SAMPLE_RATE, RESAMPLE_CHUNK)
            .map_err(|e| LiveError::InvalidConfig(format!("{:#}", e)))?;
        let chunk_samples = self.config.chunk_samples;
        let pipeline = self.pipeline.clone();

        let task = tokio::spawn(async move {
            let mut pending: Vec<f32> = Vec::with_capacity(chunk_samples * 2);
            loop {
                tokio::select! {
                    samples = samples_rx.recv() => {
                        let Some(samples) = samples else { break };
                        pending.extend(resampler.process(&samples));
                        while pending.len() >= chunk_samples {
                            let chunk: Vec<f32> = pending.drain(..chunk_samples).collect();
                            pipeline.emit(&chunk).await;
                        }
                    }
                    Some(detail) = error_rx.recv() => {
                        pipeline.fault(detail);
                        break;
                    }
                }
            }
        });

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Running {
            handle: CaptureHandle { id, source_rate },
            task,
            device,
        })
    }

    /// Halts emission and releases the microphone. Safe to call when stopped.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.task.abort();
        let _ = running.task.await;
        if let Some(device) = running.device {
            if tokio::task::spawn_blocking(move || device.stop()).await.is_err() {
                tracing::error!("failed to release microphone");
            }
        }
        self.pipeline.volume_tx.send_replace(0.0);
        tracing::info!("microphone capture stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn mute(&self) {
        self.pipeline.muted.store(true, Ordering::Relaxed);
    }

    pub fn unmute(&self) {
        self.pipeline.muted.store(false, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.pipeline.muted.load(Ordering::Relaxed)
    }

    /// RMS of the most recent chunk, in [0, 1].
    pub fn volume(&self) -> watch::Receiver<f32> {
        self.pipeline.volume_tx.subscribe()
    }

    pub fn captured_chunks(&self) -> u64 {
        self.pipeline.captured.load(Ordering::Relaxed)
    }

    pub fn forwarded_chunks(&self) -> u64 {
        self.pipeline.forwarded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime_api::MockRealtimeApi;
    use crate::state::SessionState;
    use std::time::Duration;

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    fn capture_with(api: MockRealtimeApi) -> AudioCapture {
        AudioCapture::new(Arc::new(api), CaptureConfig::default())
    }

    #[tokio::test]
    async fn test_mute_stops_forwarding_but_not_capture() {
        // Arrange
        let mut api = MockRealtimeApi::new();
        api.expect_state().return_const(SessionState::Open);
        api.expect_send_realtime_input()
            .withf(|chunks| chunks.len() == 1 && chunks[0].mime_type() == "audio/pcm;rate=16000")
            .times(2)
            .returning(|_| Ok(()));
        let capture = capture_with(api);
        let (tx, rx) = mpsc::channel(8);
        capture.start_with_source(rx, 16000).await.unwrap();

        // Act
        tx.send(vec![0.25; 4096]).await.unwrap();
        eventually(|| capture.forwarded_chunks() == 2).await;
        capture.mute();
        tx.send(vec![0.25; 4096]).await.unwrap();
        eventually(|| capture.captured_chunks() == 4).await;

        // Assert
        assert_eq!(capture.forwarded_chunks(), 2);
        assert!((*capture.volume().borrow() - 0.25).abs() < 1e-3);
        capture.stop().await;
    }

    #[tokio::test]
    async fn test_unmute_resumes_forwarding() {
        // Arrange
        let mut api = MockRealtimeApi::new();
        api.expect_state().return_const(SessionState::Open);
        api.expect_send_realtime_input()
            .times(2)
            .returning(|_| Ok(()));
        let capture = capture_with(api);
        let (tx, rx) = mpsc::channel(8);
        capture.start_with_source(rx, 16000).await.unwrap();

        // Act
        capture.mute();
        tx.send(vec![0.1; 2048]).await.unwrap();
        eventually(|| capture.captured_chunks() == 1).await;
        capture.unmute();
        tx.send(vec![0.1; 2048 * 2]).await.unwrap();
        eventually(|| capture.forwarded_chunks() == 2).await;

        // Assert
        assert!(!capture.is_muted());
        assert_eq!(capture.captured_chunks(), 3);
        capture.stop().await;
    }

    #[tokio::test]
    async fn test_nothing_forwarded_unless_open() {
        let mut api = MockRealtimeApi::new();
        api.expect_state().return_const(SessionState::Connecting);
        api.expect_send_realtime_input().times(0);
        let capture = capture_with(api);
        let (tx, rx) = mpsc::channel(8);
        capture.start_with_source(rx, 16000).await.unwrap();

        tx.send(vec![0.1; 2048 * 3]).await.unwrap();
        eventually(|| capture.captured_chunks() == 3).await;

        assert_eq!(capture.forwarded_chunks(), 0);
    }

    #[tokio::test]
    async fn test_partial_chunks_are_held_back() {
        let mut api = MockRealtimeApi::new();
        api.expect_state().return_const(SessionState::Open);
        api.expect_send_realtime_input()
            .times(1)
            .returning(|_| Ok(()));
        let capture = capture_with(api);
        let (tx, rx) = mpsc::channel(8);
        capture.start_with_source(rx, 16000).await.unwrap();

        tx.send(vec![0.0; 1500]).await.unwrap();
        tx.send(vec![0.0; 1500]).await.unwrap();
        eventually(|| capture.forwarded_chunks() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(capture.captured_chunks(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_returns_existing_handle() {
        let mut api = MockRealtimeApi::new();
        api.expect_state().return_const(SessionState::Idle);
        let capture = capture_with(api);
        let (_tx, rx) = mpsc::channel(8);
        let (_tx2, rx2) = mpsc::channel(8);

        let first = capture.start_with_source(rx, 16000).await.unwrap();
        let second = capture.start_with_source(rx2, 48000).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.source_rate(), 16000);
    }

    #[tokio::test]
    async fn test_stop_halts_emission() {
        let mut api = MockRealtimeApi::new();
        api.expect_state().return_const(SessionState::Open);
        api.expect_send_realtime_input()
            .times(1)
            .returning(|_| Ok(()));
        let capture = capture_with(api);
        let (tx, rx) = mpsc::channel(8);
        capture.start_with_source(rx, 16000).await.unwrap();
        tx.send(vec![0.0; 2048]).await.unwrap();
        eventually(|| capture.forwarded_chunks() == 1).await;

        capture.stop().await;
        capture.stop().await;

        assert!(tx.send(vec![0.0; 2048]).await.is_err());
        assert!(!capture.is_running().await);
        assert_eq!(*capture.volume().borrow(), 0.0);
    }
}
