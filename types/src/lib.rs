pub mod audio;
pub mod content;
pub mod events;
pub mod session;
pub mod tools;

pub use audio::{AudioChunk, Voice};
pub use content::{Blob, Content, MediaChunk, Part};
pub use events::{ClientMessage, ServerEvent, ServerMessage};
pub use session::{Modality, SessionConfig};
pub use tools::{FunctionDeclaration, Tool, ToolCall, ToolCallBatch, ToolResponse};
