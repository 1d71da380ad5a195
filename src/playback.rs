use crate::error::{LiveError, Result};
use crate::meter::{LevelProbe, VolumeMeter};
use formflux_live_types::audio::OUTPUT_SAMPLE_RATE;
use formflux_live_types::AudioChunk;
use formflux_live_utils::audio::{decode_pcm16, rms, ChunkedResampler};
use formflux_live_utils::stream::{open_output, DeviceStream};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const RESAMPLE_CHUNK: usize = 1024;

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    device: Option<String>,
    lookahead: Duration,
    meter_period: Duration,
    meter_decay: f32,
    buffer_frames: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: None,
            lookahead: Duration::from_millis(100),
            meter_period: Duration::from_millis(25),
            meter_decay: 0.7,
            buffer_frames: 1024,
        }
    }
}

impl PlaybackConfig {
    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }

    /// Silence inserted before audio resumes after the timeline ran dry.
    pub fn with_lookahead(mut self, lookahead: Duration) -> Self {
        self.lookahead = lookahead;
        self
    }

    pub fn with_meter(mut self, period: Duration, decay: f32) -> Self {
        self.meter_period = period;
        self.meter_decay = decay.clamp(0.0, 1.0);
        self
    }

    pub fn with_buffer_frames(mut self, buffer_frames: usize) -> Self {
        self.buffer_frames = buffer_frames.max(1);
        self
    }

    pub fn lookahead(&self) -> Duration {
        self.lookahead
    }
}

struct Scheduled {
    start: u64,
    samples: Vec<f32>,
}

/// Sample-indexed schedule of pending audio.
///
/// Positions count output samples since the timeline was created. A frame
/// starts where the previous one ends; only after the timeline has drained is
/// a new frame pushed `lookahead` past the render cursor.
pub struct PlaybackTimeline {
    sample_rate: u32,
    lookahead: u64,
    cursor: u64,
    scheduled_end: u64,
    queue: VecDeque<Scheduled>,
}

impl PlaybackTimeline {
    pub fn new(sample_rate: u32, lookahead: Duration) -> Self {
        let lookahead = (lookahead.as_secs_f64() * sample_rate as f64).round() as u64;
        Self {
            sample_rate,
            lookahead,
            cursor: 0,
            scheduled_end: 0,
            queue: VecDeque::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Position of the next sample to be rendered.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Samples scheduled but not yet rendered, including lookahead silence.
    pub fn pending(&self) -> u64 {
        self.scheduled_end.saturating_sub(self.cursor)
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Schedules `samples` and returns their start position.
    pub fn schedule(&mut self, samples: Vec<f32>) -> u64 {
        let start = if self.scheduled_end <= self.cursor {
            self.cursor + self.lookahead
        } else {
            self.scheduled_end
        };
        if samples.is_empty() {
            return start;
        }
        self.scheduled_end = start + samples.len() as u64;
        self.queue.push_back(Scheduled { start, samples });
        start
    }

    /// Fills `out` with the next samples, silence where nothing is scheduled.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let frame_start = self.cursor;
        let frame_end = frame_start + out.len() as u64;
        while let Some(front) = self.queue.front() {
            let end = front.start + front.samples.len() as u64;
            if front.start >= frame_end {
                break;
            }
            if end > frame_start {
                let from = front.start.max(frame_start);
                let to = end.min(frame_end);
                out[(from - frame_start) as usize..(to - frame_start) as usize].copy_from_slice(
                    &front.samples[(from - front.start) as usize..(to - front.start) as usize],
                );
            }
            if end > frame_end {
                break;
            }
            self.queue.pop_front();
        }
        self.cursor = frame_end;
    }

    /// Drops everything not yet rendered.
    pub fn interrupt(&mut self) {
        self.queue.clear();
        self.scheduled_end = self.cursor;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Renderer {
    timeline: Mutex<PlaybackTimeline>,
    probe: LevelProbe,
}

impl Renderer {
    fn render(&self, out: &mut [f32]) {
        lock(&self.timeline).render(out);
        self.probe.set(rms(out));
    }
}

struct Running {
    device: Option<DeviceStream>,
    meter: VolumeMeter,
    fault_task: Option<tokio::task::JoinHandle<()>>,
}

/// Plays model speech on a gapless timeline and meters the output volume.
pub struct AudioPlayback {
    config: PlaybackConfig,
    renderer: Arc<Renderer>,
    resampler: Mutex<Option<(u32, ChunkedResampler)>>,
    volume_tx: watch::Sender<f32>,
    faults: Option<mpsc::UnboundedSender<LiveError>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl AudioPlayback {
    pub fn new(config: PlaybackConfig) -> Self {
        Self::with_faults(config, None)
    }

    pub fn with_faults(
        config: PlaybackConfig,
        faults: Option<mpsc::UnboundedSender<LiveError>>,
    ) -> Self {
        let (volume_tx, _) = watch::channel(0.0);
        let timeline = PlaybackTimeline::new(OUTPUT_SAMPLE_RATE, config.lookahead);
        Self {
            config,
            renderer: Arc::new(Renderer {
                timeline: Mutex::new(timeline),
                probe: LevelProbe::new(),
            }),
            resampler: Mutex::new(None),
            volume_tx,
            faults,
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Opens the speaker. A no-op when already playing.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        let (error_tx, mut error_rx) = mpsc::unbounded_channel::<String>();
        let renderer = self.renderer.clone();
        let device = self.config.device.clone();
        let buffer_frames = self.config.buffer_frames;
        let stream = tokio::task::spawn_blocking(move || {
            open_output(
                device,
                buffer_frames,
                move |out: &mut [f32]| renderer.render(out),
                error_tx,
            )
        })
        .await
        .map_err(|e| LiveError::permission("speaker", e))?
        .map_err(|e| LiveError::permission("speaker", e))?;

        let faults = self.faults.clone();
        let fault_task = tokio::spawn(async move {
            if let Some(detail) = error_rx.recv().await {
                tracing::error!("speaker stream failed: {}", detail);
                if let Some(faults) = faults {
                    let _ = faults.send(LiveError::Permission {
                        device: "speaker".to_string(),
                        detail,
                    });
                }
            }
        });

        tracing::info!("speaker playback started at {} Hz", stream.sample_rate());
        self.reset_timeline(stream.sample_rate());
        *running = Some(Running {
            device: Some(stream),
            meter: self.spawn_meter(),
            fault_task: Some(fault_task),
        });
        Ok(())
    }

    /// Starts without a device; the caller pulls samples through [`AudioPlayback::render`].
    pub async fn start_detached(&self, sample_rate: u32) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }
        self.reset_timeline(sample_rate);
        *running = Some(Running {
            device: None,
            meter: self.spawn_meter(),
            fault_task: None,
        });
    }

    fn spawn_meter(&self) -> VolumeMeter {
        VolumeMeter::spawn_into(
            self.renderer.probe.clone(),
            self.config.meter_period,
            self.config.meter_decay,
            self.volume_tx.clone(),
        )
    }

    fn reset_timeline(&self, sample_rate: u32) {
        *lock(&self.renderer.timeline) = PlaybackTimeline::new(sample_rate, self.config.lookahead);
        *lock(&self.resampler) = None;
    }

    /// Schedules one inbound PCM16 chunk right after the previous one.
    ///
    /// Returns the start position on the output timeline.
    pub fn add_pcm16(&self, chunk: &AudioChunk) -> Result<u64> {
        let samples = decode_pcm16(chunk.data());
        let output_rate = lock(&self.renderer.timeline).sample_rate();

        let samples = if chunk.sample_rate() == output_rate {
            samples
        } else {
            let mut slot = lock(&self.resampler);
            let reuse = matches!(slot.as_ref(), Some((rate, _)) if *rate == chunk.sample_rate());
            if !reuse {
                let resampler =
                    ChunkedResampler::new(chunk.sample_rate(), output_rate, RESAMPLE_CHUNK)
                        .map_err(|e| LiveError::InvalidConfig(format!("{:#}", e)))?;
                *slot = Some((chunk.sample_rate(), resampler));
            }
            match slot.as_mut() {
                Some((_, resampler)) => resampler.process(&samples),
                None => samples,
            }
        };
        Ok(lock(&self.renderer.timeline).schedule(samples))
    }

    /// Discards all scheduled audio that has not played yet.
    pub fn interrupt(&self) {
        let mut timeline = lock(&self.renderer.timeline);
        let dropped = timeline.pending();
        timeline.interrupt();
        drop(timeline);
        if let Some((_, resampler)) = lock(&self.resampler).as_mut() {
            resampler.reset();
        }
        tracing::debug!("playback interrupted, dropped {} samples", dropped);
    }

    pub fn render(&self, out: &mut [f32]) {
        self.renderer.render(out);
    }

    pub fn pending(&self) -> u64 {
        lock(&self.renderer.timeline).pending()
    }

    /// Smoothed output volume in [0, 1].
    pub fn volume(&self) -> watch::Receiver<f32> {
        self.volume_tx.subscribe()
    }

    /// Stops the speaker mid-buffer if needed. Safe to call when stopped.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        self.interrupt();
        running.meter.stop();
        if let Some(task) = running.fault_task {
            task.abort();
        }
        if let Some(device) = running.device {
            if tokio::task::spawn_blocking(move || device.stop()).await.is_err() {
                tracing::error!("failed to release speaker");
            }
        }
        self.renderer.probe.set(0.0);
        tracing::info!("speaker playback stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline() -> PlaybackTimeline {
        // 10 samples of lookahead at 1 kHz.
        PlaybackTimeline::new(1000, Duration::from_millis(10))
    }

    #[test]
    fn test_frames_are_contiguous() {
        let mut timeline = timeline();

        let first = timeline.schedule(vec![0.1; 5]);
        let second = timeline.schedule(vec![0.2; 7]);
        let third = timeline.schedule(vec![0.3; 3]);

        assert_eq!(first, 10);
        assert_eq!(second, 15);
        assert_eq!(third, 22);
        assert_eq!(timeline.pending(), 25);
    }

    #[test]
    fn test_render_plays_after_lookahead() {
        let mut timeline = timeline();
        timeline.schedule(vec![0.5; 4]);
        timeline.schedule(vec![-0.5; 4]);

        let mut out = vec![1.0; 20];
        timeline.render(&mut out);

        assert_eq!(&out[..10], &[0.0; 10]);
        assert_eq!(&out[10..14], &[0.5; 4]);
        assert_eq!(&out[14..18], &[-0.5; 4]);
        assert_eq!(&out[18..], &[0.0; 2]);
        assert!(timeline.is_idle());
    }

    #[test]
    fn test_frame_spanning_render_calls() {
        let mut timeline = PlaybackTimeline::new(1000, Duration::ZERO);
        timeline.schedule((0..6).map(|i| i as f32).collect());

        let mut out = vec![0.0; 4];
        timeline.render(&mut out);
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0]);
        timeline.render(&mut out);
        assert_eq!(out, vec![4.0, 5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_late_frame_joins_running_timeline() {
        let mut timeline = timeline();
        timeline.schedule(vec![0.5; 20]);
        let mut out = vec![0.0; 15];
        timeline.render(&mut out);

        // Still 15 samples scheduled ahead of the cursor.
        assert_eq!(timeline.schedule(vec![0.5; 5]), 30);
    }

    #[test]
    fn test_starved_timeline_rebuffers() {
        let mut timeline = timeline();
        timeline.schedule(vec![0.5; 5]);
        let mut out = vec![0.0; 40];
        timeline.render(&mut out);

        assert_eq!(timeline.schedule(vec![0.5; 5]), 50);
    }

    #[test]
    fn test_interrupt_discards_unplayed_audio() {
        let mut timeline = timeline();
        timeline.schedule(vec![0.5; 50]);
        let mut out = vec![0.0; 20];
        timeline.render(&mut out);

        timeline.interrupt();
        timeline.render(&mut out);

        assert_eq!(out, vec![0.0; 20]);
        assert_eq!(timeline.pending(), 0);
        assert_eq!(timeline.schedule(vec![0.5; 5]), 50);
    }

    fn pcm_chunk(seq: u64, value: i16, samples: usize) -> AudioChunk {
        let data = std::iter::repeat(value.to_le_bytes())
            .take(samples)
            .flatten()
            .collect();
        AudioChunk::new(seq, OUTPUT_SAMPLE_RATE, data)
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_meters_and_interrupts() {
        let playback = AudioPlayback::new(PlaybackConfig::default());
        playback.start_detached(OUTPUT_SAMPLE_RATE).await;
        let volume = playback.volume();

        assert_eq!(playback.add_pcm16(&pcm_chunk(0, 16384, 2400)).unwrap(), 2400);
        assert_eq!(playback.add_pcm16(&pcm_chunk(1, 16384, 2400)).unwrap(), 4800);

        let mut out = vec![0.0; 3600];
        playback.render(&mut out);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(*volume.borrow() > 0.2);

        playback.interrupt();
        assert_eq!(playback.pending(), 0);
        playback.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));

        playback.stop().await;
        assert_eq!(*volume.borrow(), 0.0);
    }

    #[tokio::test]
    async fn test_chunks_are_resampled_to_output_rate() {
        let playback = AudioPlayback::new(PlaybackConfig::default().with_lookahead(Duration::ZERO));
        playback.start_detached(48000).await;

        for seq in 0..4 {
            playback.add_pcm16(&pcm_chunk(seq, 1000, 2400)).unwrap();
        }

        // 9600 input samples at 24 kHz, minus what the resampler still holds.
        let pending = playback.pending();
        assert!(pending > 15000 && pending <= 19200, "pending = {}", pending);
        playback.stop().await;
    }
}
