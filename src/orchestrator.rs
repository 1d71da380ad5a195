use crate::capture::{AudioCapture, CaptureConfig};
use crate::client::{Client, ServerRx};
use crate::error::{LiveError, Result};
use crate::playback::{AudioPlayback, PlaybackConfig};
use crate::pose::Landmark;
use crate::realtime_api::RealtimeApi;
use crate::state::SessionState;
use crate::tools::{rep_count_declaration, RepCounter, ToolDispatcher, DEFAULT_RESPONSE_DELAY};
use crate::visual::{DetectorLoader, DetectorSlot, FrameSource, VisualConfig, VisualLoop};
use formflux_live_types::{ServerEvent, SessionConfig, Voice};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const COACH_INSTRUCTION: &str = r#"You are an AI fitness coach specialized in real-time exercise form correction. Your primary role is to:

1. ANALYZE exercise form and technique from video/image input
2. PROVIDE immediate, specific feedback on posture and movement
3. SUGGEST precise corrections (e.g., "Move your hands 2 inches closer together" or "Lower your hips by 3 inches")
4. COUNT repetitions and track workout progress. Make sure you are actively counting and using the count_rep function for each rep.
5. PREVENT injuries by identifying dangerous form mistakes

You also receive joint angles in degrees as JSON (poseAngles) several times per second.

For exercises like push-ups, squats, deadlifts, etc., focus on:
- Joint alignment and positioning
- Range of motion
- Tempo and breathing
- Common form mistakes
- Safety considerations

Always be encouraging while being precise about corrections. Use clear, actionable language. Be very natural and concise."#;

/// Session config of the coach persona: spoken answers, rep counting and search.
pub fn coach_session_config() -> SessionConfig {
    SessionConfig::builder()
        .with_voice(Voice::Aoede)
        .with_system_instruction(COACH_INSTRUCTION)
        .with_function(rep_count_declaration())
        .with_google_search()
        .build()
}

#[derive(Debug, Clone)]
pub struct WorkoutConfig {
    pub session: SessionConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub visual: VisualConfig,
    pub tool_response_delay: Duration,
}

impl Default for WorkoutConfig {
    fn default() -> Self {
        Self {
            session: coach_session_config(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            visual: VisualConfig::default(),
            tool_response_delay: DEFAULT_RESPONSE_DELAY,
        }
    }
}

/// Where microphone samples come from.
pub enum AudioSource {
    Device,
    Samples {
        samples_rx: mpsc::Receiver<Vec<f32>>,
        sample_rate: u32,
    },
}

/// Where model speech goes. `Detached` leaves rendering to the caller.
pub enum AudioSink {
    Device,
    Detached { sample_rate: u32 },
}

struct Components {
    client: Arc<Client>,
    capture: AudioCapture,
    playback: AudioPlayback,
    visual: Option<VisualLoop>,
    dispatcher: ToolDispatcher,
}

impl Components {
    /// Stops everything that produces or consumes media. Idempotent.
    async fn stop_media(&self) {
        self.capture.stop().await;
        if let Some(visual) = &self.visual {
            visual.stop().await;
        }
        self.dispatcher.cancel_pending();
        self.playback.stop().await;
    }
}

/// One workout: a live session plus the devices feeding and playing it.
pub struct WorkoutSession {
    config: WorkoutConfig,
    components: Arc<Components>,
    reps: RepCounter,
    faults_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<LiveError>>>,
    fault_tx: watch::Sender<Option<LiveError>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkoutSession {
    pub fn new(
        client: Arc<Client>,
        config: WorkoutConfig,
        camera: Option<Arc<dyn FrameSource>>,
        detector: Option<Arc<dyn DetectorLoader>>,
    ) -> Self {
        let api: Arc<dyn RealtimeApi> = client.clone();
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        let reps = RepCounter::new();

        let capture =
            AudioCapture::with_faults(api.clone(), config.capture.clone(), Some(faults_tx.clone()));
        let playback = AudioPlayback::with_faults(config.playback.clone(), Some(faults_tx));
        let visual = camera.map(|camera| {
            let detector = detector.map(|loader| Arc::new(DetectorSlot::new(loader)));
            VisualLoop::new(api.clone(), config.visual.clone(), camera, detector)
        });
        let dispatcher = ToolDispatcher::new(api, config.tool_response_delay)
            .with_rep_counter(reps.clone());
        let (fault_tx, _) = watch::channel(None);

        Self {
            config,
            components: Arc::new(Components {
                client,
                capture,
                playback,
                visual,
                dispatcher,
            }),
            reps,
            faults_rx: Arc::new(tokio::sync::Mutex::new(faults_rx)),
            fault_tx,
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Connects and starts the speaker, microphone and camera loop.
    pub async fn start(&self) -> Result<()> {
        self.start_with(AudioSource::Device, AudioSink::Device).await
    }

    pub async fn start_with(&self, source: AudioSource, sink: AudioSink) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let c = &self.components;
        if c.client.state().is_open() {
            return Ok(());
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        self.fault_tx.send_replace(None);

        let events = c.client.server_events();
        c.client.connect(self.config.session.clone()).await?;

        if let Err(e) = self.start_media(source, sink).await {
            tracing::error!("failed to start media: {}", e);
            c.client.disconnect().await;
            c.stop_media().await;
            self.fault_tx.send_replace(Some(e.clone()));
            return Err(e);
        }

        tasks.push(tokio::spawn(route(events, c.clone())));
        tasks.push(tokio::spawn(supervise(
            self.faults_rx.clone(),
            c.clone(),
            self.fault_tx.clone(),
        )));
        tracing::info!("workout session started");
        Ok(())
    }

    async fn start_media(&self, source: AudioSource, sink: AudioSink) -> Result<()> {
        let c = &self.components;
        match sink {
            AudioSink::Device => c.playback.start().await?,
            AudioSink::Detached { sample_rate } => c.playback.start_detached(sample_rate).await,
        }
        match source {
            AudioSource::Device => c.capture.start().await?,
            AudioSource::Samples {
                samples_rx,
                sample_rate,
            } => c.capture.start_with_source(samples_rx, sample_rate).await?,
        };
        if let Some(visual) = &c.visual {
            visual.start().await;
        }
        Ok(())
    }

    /// Disconnects first so no frame is sent once teardown has begun.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        let c = &self.components;
        c.client.disconnect().await;
        c.capture.stop().await;
        if let Some(visual) = &c.visual {
            visual.stop().await;
        }
        c.dispatcher.cancel_pending();
        for task in tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        c.playback.stop().await;
        tracing::info!("workout session stopped");
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.components.client
    }

    pub fn capture(&self) -> &AudioCapture {
        &self.components.capture
    }

    pub fn playback(&self) -> &AudioPlayback {
        &self.components.playback
    }

    pub fn is_connected(&self) -> bool {
        self.components.client.state().is_open()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.components.client.state_changes()
    }

    pub fn input_volume(&self) -> watch::Receiver<f32> {
        self.components.capture.volume()
    }

    pub fn output_volume(&self) -> watch::Receiver<f32> {
        self.components.playback.volume()
    }

    pub fn reps(&self) -> watch::Receiver<u64> {
        self.reps.subscribe()
    }

    pub fn rep_count(&self) -> u64 {
        self.reps.get()
    }

    /// Landmarks for overlay rendering; `None` without a camera.
    pub fn landmarks(&self) -> Option<watch::Receiver<Option<Vec<Landmark>>>> {
        self.components.visual.as_ref().map(VisualLoop::landmarks)
    }

    /// Last device fault that ended the session.
    pub fn faults(&self) -> watch::Receiver<Option<LiveError>> {
        self.fault_tx.subscribe()
    }

    pub fn mute(&self) {
        self.components.capture.mute();
    }

    pub fn unmute(&self) {
        self.components.capture.unmute();
    }

    pub fn is_muted(&self) -> bool {
        self.components.capture.is_muted()
    }
}

async fn route(mut events: ServerRx, c: Arc<Components>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("event router lagged, {} events dropped", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            ServerEvent::Audio(chunk) => {
                if let Err(e) = c.playback.add_pcm16(&chunk) {
                    tracing::warn!("failed to schedule audio chunk {}: {}", chunk.seq(), e);
                }
            }
            ServerEvent::ToolCall(batch) => {
                c.dispatcher.dispatch(&batch);
            }
            ServerEvent::ToolCallCancellation(ids) => {
                tracing::info!("tool calls cancelled by the model: {:?}", ids);
            }
            ServerEvent::Interrupted => c.playback.interrupt(),
            ServerEvent::Close { reason } => {
                tracing::info!("session closed: {:?}", reason);
                c.stop_media().await;
                break;
            }
            ServerEvent::Error { detail } => {
                tracing::error!("session failed: {}", detail);
                c.stop_media().await;
                break;
            }
            ServerEvent::Text(text) => tracing::debug!("model text: {}", text),
            ServerEvent::InputTranscription(text) => tracing::debug!("user said: {}", text),
            ServerEvent::OutputTranscription(text) => tracing::debug!("coach said: {}", text),
            ServerEvent::TurnComplete => tracing::debug!("turn complete"),
            ServerEvent::Open | ServerEvent::SetupComplete | ServerEvent::GoAway { .. } => {}
        }
    }
}

async fn supervise(
    faults_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<LiveError>>>,
    c: Arc<Components>,
    fault_tx: watch::Sender<Option<LiveError>>,
) {
    let mut faults = faults_rx.lock().await;
    if let Some(fault) = faults.recv().await {
        tracing::error!("stopping session after device failure: {}", fault);
        fault_tx.send_replace(Some(fault));
        c.client.disconnect().await;
        c.stop_media().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{test_config, MemoryConnector, Peer};
    use crate::visual::tests::{slot, StillSource};
    use formflux_live_types::audio::OUTPUT_SAMPLE_RATE;
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    async fn started() -> (WorkoutSession, Peer, mpsc::Sender<Vec<f32>>) {
        let (connector, mut peers) = MemoryConnector::new();
        let client = Arc::new(Client::with_connector(test_config(), Arc::new(connector)));
        let session = WorkoutSession::new(client, WorkoutConfig::default(), None, None);
        let (samples_tx, samples_rx) = mpsc::channel(16);

        session
            .start_with(
                AudioSource::Samples {
                    samples_rx,
                    sample_rate: 16000,
                },
                AudioSink::Detached {
                    sample_rate: OUTPUT_SAMPLE_RATE,
                },
            )
            .await
            .unwrap();

        let mut peer = peers.recv().await.unwrap();
        let setup = peer.next_json().await;
        assert_eq!(
            setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Aoede"
        );
        (session, peer, samples_tx)
    }

    #[tokio::test]
    async fn test_audio_is_routed_to_playback_and_interrupt_flushes() {
        let (session, peer, _samples) = started().await;

        peer.push(serde_json::json!({
            "serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAAAAAAAAA="}}
            ]}}
        }));
        eventually(|| session.playback().pending() > 0).await;

        peer.push(serde_json::json!({"serverContent": {"interrupted": true}}));
        eventually(|| session.playback().pending() == 0).await;

        session.stop().await;
    }

    #[tokio::test]
    async fn test_rep_calls_answered_in_one_message() {
        let (session, mut peer, _samples) = started().await;

        peer.push(serde_json::json!({"toolCall": {"functionCalls": [
            {"id": "r1", "name": "count_rep", "args": {}},
            {"id": "r2", "name": "count_rep", "args": {}}
        ]}}));

        let response = peer.next_json().await;
        let ids: Vec<&str> = response["toolResponse"]["functionResponses"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(session.rep_count(), 2);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_microphone_chunks_stop_when_muted() {
        let (session, mut peer, samples) = started().await;

        samples.send(vec![0.1; 2048]).await.unwrap();
        let json = peer.next_json().await;
        assert_eq!(
            json["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );

        session.mute();
        samples.send(vec![0.1; 2048]).await.unwrap();
        eventually(|| session.capture().captured_chunks() == 2).await;

        assert_eq!(session.capture().forwarded_chunks(), 1);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_disconnects_before_media() {
        let (session, mut peer, samples) = started().await;

        session.stop().await;

        assert_eq!(session.client().state(), SessionState::Closed);
        assert_eq!(peer.sent.next().await, Some(Message::Close(None)));
        assert_eq!(peer.sent.next().await, None);
        assert!(samples.send(vec![0.0; 2048]).await.is_err());
        assert!(!session.capture().is_running().await);
    }

    #[tokio::test]
    async fn test_remote_close_stops_capture() {
        let (session, peer, _samples) = started().await;

        peer.inbound.unbounded_send(Ok(Message::Close(None))).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.capture().is_running().await {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(session.client().state(), SessionState::Closed);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_camera_loop_sends_frames_while_open() {
        let (connector, mut peers) = MemoryConnector::new();
        let client = Arc::new(Client::with_connector(test_config(), Arc::new(connector)));
        let (_, loader) = slot(false);
        let camera: Arc<dyn FrameSource> = Arc::new(StillSource::new());
        let detector: Arc<dyn DetectorLoader> = loader;
        let session =
            WorkoutSession::new(client, WorkoutConfig::default(), Some(camera), Some(detector));
        let (_samples_tx, samples_rx) = mpsc::channel(16);
        session
            .start_with(
                AudioSource::Samples {
                    samples_rx,
                    sample_rate: 16000,
                },
                AudioSink::Detached {
                    sample_rate: OUTPUT_SAMPLE_RATE,
                },
            )
            .await
            .unwrap();
        let mut peer = peers.recv().await.unwrap();
        peer.next_json().await;

        let mut saw_pose = false;
        let mut saw_image = false;
        while !(saw_pose && saw_image) {
            let json = peer.next_json().await;
            saw_pose |= json["clientContent"]["turnComplete"] == false;
            saw_image |= json["realtimeInput"]["mediaChunks"][0]["mimeType"] == "image/jpeg";
        }
        assert!(session.landmarks().is_some());
        session.stop().await;
    }
}
