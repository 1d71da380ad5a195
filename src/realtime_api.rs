use crate::client::Client;
use crate::error::Result;
use crate::state::SessionState;
use async_trait::async_trait;
use formflux_live_types::{MediaChunk, Part, ToolResponse};
#[cfg(test)]
use mockall::automock;

/// Outbound half of a live session, as seen by the capture loops and the
/// tool dispatcher.
///
/// Every producer consults `state()` before sending so the connection stays
/// the single source of truth for whether sending is allowed. Tests swap in
/// `MockRealtimeApi` to assert the exact outbound calls.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RealtimeApi: Send + Sync {
    fn state(&self) -> SessionState;

    async fn send(&self, parts: Vec<Part>, turn_complete: bool) -> Result<()>;

    async fn send_realtime_input(&self, media_chunks: Vec<MediaChunk>) -> Result<()>;

    async fn send_tool_response(&self, responses: Vec<ToolResponse>) -> Result<()>;
}

#[async_trait]
impl RealtimeApi for Client {
    fn state(&self) -> SessionState {
        Client::state(self)
    }

    async fn send(&self, parts: Vec<Part>, turn_complete: bool) -> Result<()> {
        Client::send(self, parts, turn_complete).await
    }

    async fn send_realtime_input(&self, media_chunks: Vec<MediaChunk>) -> Result<()> {
        Client::send_realtime_input(self, media_chunks).await
    }

    async fn send_tool_response(&self, responses: Vec<ToolResponse>) -> Result<()> {
        Client::send_tool_response(self, responses).await
    }
}
