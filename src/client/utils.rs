use crate::client::config::Config;
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    let url = format!("{}?key={}", config.base_url(), config.api_key().expose_secret());
    url.into_client_request()
}
