use crate::audio::{pcm_rate, AudioChunk};
use crate::content::Content;
use crate::events::ServerEvent;
use crate::tools::ToolCallBatch;

// Incoming messages. The server sets exactly one top-level field per message.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCallBatch>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub go_away: Option<GoAway>,
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub response_token_count: u64,
    #[serde(default)]
    pub total_token_count: u64,
}

impl ServerMessage {
    /// Decodes the message into typed events.
    ///
    /// `next_seq` numbers audio chunks across messages of one session. Audio
    /// parts whose base64 payload fails to decode are skipped.
    pub fn into_events<F>(self, next_seq: &mut u64, decode: F) -> Vec<ServerEvent>
    where
        F: Fn(&str) -> Option<Vec<u8>>,
    {
        let mut events = vec![];

        if let Some(batch) = self.tool_call {
            events.push(ServerEvent::ToolCall(batch));
        }
        if let Some(cancellation) = self.tool_call_cancellation {
            events.push(ServerEvent::ToolCallCancellation(cancellation.ids));
        }
        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }
        if let Some(go_away) = self.go_away {
            events.push(ServerEvent::GoAway {
                time_left: go_away.time_left,
            });
        }

        let Some(content) = self.server_content else {
            return events;
        };

        // An interruption supersedes whatever else the message carries.
        if content.interrupted == Some(true) {
            events.push(ServerEvent::Interrupted);
            return events;
        }
        if let Some(t) = content.input_transcription {
            events.push(ServerEvent::InputTranscription(t.text));
        }
        if let Some(t) = content.output_transcription {
            events.push(ServerEvent::OutputTranscription(t.text));
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts() {
                if let Some(blob) = part.as_inline_data() {
                    let Some(rate) = pcm_rate(blob.mime_type()) else {
                        continue;
                    };
                    if let Some(bytes) = decode(blob.data()) {
                        events.push(ServerEvent::Audio(AudioChunk::new(*next_seq, rate, bytes)));
                        *next_seq += 1;
                    }
                } else if let Some(text) = part.as_text() {
                    events.push(ServerEvent::Text(text.to_string()));
                }
            }
        }
        if content.turn_complete == Some(true) {
            events.push(ServerEvent::TurnComplete);
        }
        events
    }
}
