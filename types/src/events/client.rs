use crate::audio::Voice;
use crate::content::{Blob, Content, Part};
use crate::session::{Modality, SessionConfig};
use crate::tools::{Tool, ToolResponse};

/// Messages sent to the live model, one per websocket frame.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponseMessage),
}

impl ClientMessage {
    pub fn setup(config: &SessionConfig) -> Self {
        ClientMessage::Setup(Setup::from(config))
    }

    pub fn realtime_input(media_chunks: Vec<Blob>) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput { media_chunks })
    }

    pub fn client_content(parts: Vec<Part>, turn_complete: bool) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::user(parts)],
            turn_complete,
        })
    }

    pub fn tool_response(function_responses: Vec<ToolResponse>) -> Self {
        ClientMessage::ToolResponse(ToolResponseMessage { function_responses })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::RealtimeInput(_) => "realtimeInput",
            ClientMessage::ClientContent(_) => "clientContent",
            ClientMessage::ToolResponse(_) => "toolResponse",
        }
    }
}

/// `setup` message
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    model: String,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

impl Setup {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }
}

impl From<&SessionConfig> for Setup {
    fn from(config: &SessionConfig) -> Self {
        let speech_config = match config.response_modality() {
            Modality::Audio => Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: config.voice().clone(),
                    },
                },
            }),
            Modality::Text => None,
        };
        Self {
            model: config.model().to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality()],
                speech_config,
            },
            system_instruction: config
                .system_instruction()
                .map(|text| Content::from_parts(vec![Part::text(text)])),
            tools: config.tools(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    voice_name: Voice,
}

/// `realtimeInput` message
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    media_chunks: Vec<Blob>,
}

impl RealtimeInput {
    pub fn media_chunks(&self) -> &[Blob] {
        &self.media_chunks
    }
}

/// `clientContent` message
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    turns: Vec<Content>,
    turn_complete: bool,
}

impl ClientContent {
    pub fn turns(&self) -> &[Content] {
        &self.turns
    }

    pub fn turn_complete(&self) -> bool {
        self.turn_complete
    }
}

/// `toolResponse` message
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMessage {
    function_responses: Vec<ToolResponse>,
}

impl ToolResponseMessage {
    pub fn function_responses(&self) -> &[ToolResponse] {
        &self.function_responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FunctionDeclaration;

    #[test]
    fn test_setup_serialize() {
        let config = SessionConfig::builder()
            .with_model("models/test")
            .with_voice(Voice::Aoede)
            .with_system_instruction("coach")
            .with_function(FunctionDeclaration::without_parameters("count_rep", "rep"))
            .build();
        let json = serde_json::to_value(ClientMessage::setup(&config)).unwrap();
        let setup = &json["setup"];
        assert_eq!(setup["model"], "models/test");
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Aoede"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "coach");
        assert_eq!(setup["tools"][0]["functionDeclarations"][0]["name"], "count_rep");
    }

    #[test]
    fn test_text_modality_has_no_speech_config() {
        let config = SessionConfig::builder()
            .with_response_modality(Modality::Text)
            .build();
        let json = serde_json::to_value(ClientMessage::setup(&config)).unwrap();
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "TEXT");
        assert!(json["setup"]["generationConfig"].get("speechConfig").is_none());
        assert!(json["setup"].get("tools").is_none());
    }

    #[test]
    fn test_realtime_and_tool_response_serialize() {
        let json = serde_json::to_string(&ClientMessage::realtime_input(vec![Blob::new(
            "image/jpeg",
            "AAAA",
        )]))
        .unwrap();
        assert_eq!(
            json,
            r#"{"realtimeInput":{"mediaChunks":[{"mimeType":"image/jpeg","data":"AAAA"}]}}"#
        );

        let json = serde_json::to_value(ClientMessage::tool_response(vec![ToolResponse::new(
            "1",
            "count_rep",
            serde_json::json!({ "output": { "success": true } }),
        )]))
        .unwrap();
        assert_eq!(json["toolResponse"]["functionResponses"][0]["id"], "1");
        assert_eq!(
            json["toolResponse"]["functionResponses"][0]["response"]["output"]["success"],
            true
        );
    }
}
