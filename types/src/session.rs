use crate::audio::Voice;
use crate::tools::{FunctionDeclaration, Tool};

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-preview-native-audio-dialog";

/// The modality the model answers with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    #[default]
    Audio,
    Text,
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(Modality::Audio),
            "text" => Ok(Modality::Text),
            other => Err(format!("unknown response modality: {other}")),
        }
    }
}

/// Everything the remote model is configured with when a session opens.
///
/// A `SessionConfig` is handed to the connection by value; the connection keeps
/// its own copy for the lifetime of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    model: String,
    response_modality: Modality,
    voice: Voice,
    system_instruction: Option<String>,
    functions: Vec<FunctionDeclaration>,
    google_search: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            response_modality: Modality::Audio,
            voice: Voice::default(),
            system_instruction: None,
            functions: vec![],
            google_search: false,
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigurator {
        SessionConfigurator::new()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn response_modality(&self) -> Modality {
        self.response_modality
    }

    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    pub fn functions(&self) -> &[FunctionDeclaration] {
        &self.functions
    }

    /// The tool list as sent in the setup message.
    pub fn tools(&self) -> Vec<Tool> {
        let mut tools = vec![];
        if self.google_search {
            tools.push(Tool::google_search());
        }
        if !self.functions.is_empty() {
            tools.push(Tool::FunctionDeclarations(self.functions.clone()));
        }
        tools
    }

    /// Returns a configurator seeded with this config, for settings changes.
    pub fn to_builder(&self) -> SessionConfigurator {
        SessionConfigurator {
            config: self.clone(),
        }
    }
}

pub struct SessionConfigurator {
    config: SessionConfig,
}

impl Default for SessionConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfigurator {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_response_modality(mut self, modality: Modality) -> Self {
        self.config.response_modality = modality;
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.config.voice = voice;
        self
    }

    pub fn with_system_instruction(mut self, instruction: &str) -> Self {
        self.config.system_instruction = Some(instruction.to_string());
        self
    }

    pub fn with_function(mut self, function: FunctionDeclaration) -> Self {
        self.config.functions.push(function);
        self
    }

    pub fn with_google_search(mut self) -> Self {
        self.config.google_search = true;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}
