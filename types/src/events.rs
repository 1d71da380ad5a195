pub mod client;
pub mod server;

pub use client::ClientMessage;
pub use server::ServerMessage;

use crate::audio::AudioChunk;
use crate::tools::ToolCallBatch;

/// Inbound events of a live session, in arrival order.
///
/// Connection lifecycle events (`Open`, `Close`, `Error`) share the stream with
/// decoded model output so a single dispatch loop can consume everything.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Open,
    SetupComplete,
    Close { reason: Option<String> },
    Error { detail: String },
    Audio(AudioChunk),
    Text(String),
    ToolCall(ToolCallBatch),
    ToolCallCancellation(Vec<String>),
    /// The user started speaking over the model.
    Interrupted,
    TurnComplete,
    InputTranscription(String),
    OutputTranscription(String),
    GoAway { time_left: Option<String> },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Open => "open",
            ServerEvent::SetupComplete => "setup_complete",
            ServerEvent::Close { .. } => "close",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Audio(_) => "audio",
            ServerEvent::Text(_) => "text",
            ServerEvent::ToolCall(_) => "toolcall",
            ServerEvent::ToolCallCancellation(_) => "toolcall_cancellation",
            ServerEvent::Interrupted => "interrupted",
            ServerEvent::TurnComplete => "turn_complete",
            ServerEvent::InputTranscription(_) => "input_transcription",
            ServerEvent::OutputTranscription(_) => "output_transcription",
            ServerEvent::GoAway { .. } => "go_away",
        }
    }
}
