/// A function the model may call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDeclaration {
    /// The name of the function
    name: String,

    /// The description of the function
    description: String,

    /// The parameters of the function in OpenAPI schema format
    parameters: serde_json::Value,
}

impl FunctionDeclaration {
    pub fn new(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }

    /// A function with no arguments.
    pub fn without_parameters(name: &str, description: &str) -> Self {
        Self::new(
            name,
            description,
            serde_json::json!({ "type": "OBJECT", "properties": {} }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }
}

/// A tool entry of the setup message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tool {
    FunctionDeclarations(Vec<FunctionDeclaration>),
    GoogleSearch(serde_json::Map<String, serde_json::Value>),
}

impl Tool {
    pub fn google_search() -> Self {
        Tool::GoogleSearch(serde_json::Map::new())
    }
}

/// A model-initiated request to run a local function.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, args: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            args,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &serde_json::Value {
        &self.args
    }
}

/// The function calls delivered by one `toolCall` message.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBatch {
    #[serde(default)]
    function_calls: Vec<ToolCall>,
}

impl ToolCallBatch {
    pub fn new(function_calls: Vec<ToolCall>) -> Self {
        Self { function_calls }
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.function_calls
    }

    pub fn is_empty(&self) -> bool {
        self.function_calls.is_empty()
    }
}

/// Acknowledgement of one tool call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolResponse {
    id: String,
    name: String,
    response: serde_json::Value,
}

impl ToolResponse {
    pub fn new(id: &str, name: &str, response: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            response,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn response(&self) -> &serde_json::Value {
        &self.response
    }
}
