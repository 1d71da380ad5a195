use crate::client::config::Config;
use crate::client::utils;
use crate::error::Result;
use async_trait::async_trait;
use futures::{Sink, Stream};
use futures_util::StreamExt;
use std::pin::Pin;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub type WsSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
pub type WsStream = Pin<Box<dyn Stream<Item = std::result::Result<Message, WsError>> + Send>>;

/// Opens the duplex message transport a session runs over.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, config: &Config) -> Result<(WsSink, WsStream)>;
}

/// Secure websocket to the live model endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, config: &Config) -> Result<(WsSink, WsStream)> {
        let request = utils::build_request(config)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        tracing::debug!("websocket handshake complete");
        let (write, read) = ws_stream.split();
        Ok((Box::pin(write), Box::pin(read)))
    }
}
