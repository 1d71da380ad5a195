use formflux_live_types::audio::{JPEG_MIME, PCM_MIME_PREFIX};
use formflux_live_types::events::server::UsageMetadata;
use formflux_live_types::ClientMessage;

/// Token usage reported by the model plus counters of what was sent.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    total_tokens: u64,
    input_tokens: u64,
    output_tokens: u64,
    audio_chunks_sent: u64,
    images_sent: u64,
    turns_sent: u64,
    tool_responses_sent: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn update_usage(&mut self, usage: &UsageMetadata) {
        self.total_tokens += usage.total_token_count;
        self.input_tokens += usage.prompt_token_count;
        self.output_tokens += usage.response_token_count;
    }

    pub(crate) fn record_sent(&mut self, message: &ClientMessage) {
        match message {
            ClientMessage::RealtimeInput(input) => {
                for chunk in input.media_chunks() {
                    if chunk.mime_type().starts_with(PCM_MIME_PREFIX) {
                        self.audio_chunks_sent += 1;
                    } else if chunk.mime_type() == JPEG_MIME {
                        self.images_sent += 1;
                    }
                }
            }
            ClientMessage::ClientContent(_) => self.turns_sent += 1,
            ClientMessage::ToolResponse(response) => {
                self.tool_responses_sent += response.function_responses().len() as u64
            }
            ClientMessage::Setup(_) => {}
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn audio_chunks_sent(&self) -> u64 {
        self.audio_chunks_sent
    }

    pub fn images_sent(&self) -> u64 {
        self.images_sent
    }

    pub fn turns_sent(&self) -> u64 {
        self.turns_sent
    }

    pub fn tool_responses_sent(&self) -> u64 {
        self.tool_responses_sent
    }
}
