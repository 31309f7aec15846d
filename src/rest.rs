/// REST collaborator for the WebSocket client.
///
/// The WebSocket API needs exactly one REST endpoint: the private
/// `GetWebSocketsToken` call that mints the short-lived bearer token
/// required by authenticated subscriptions and order operations.
use reqwest::Client;
use serde::Deserialize;

use crate::auth::sign_request;
use crate::errors::Error;

/// API key pair for the private client.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    /// Base64-encoded API secret as issued by the exchange.
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

/// A freshly minted websocket authentication token.
#[derive(Debug, Clone, Deserialize)]
pub struct WebsocketToken {
    pub token: String,
    /// Remaining validity in seconds.
    pub expires: u64,
}

/// Response envelope shared by all REST endpoints: a (possibly empty)
/// error list plus the payload.
#[derive(Debug, Deserialize)]
struct RestEnvelope<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

const TOKEN_PATH: &str = "/0/private/GetWebSocketsToken";

#[derive(Debug, Clone)]
pub(crate) struct RestClient {
    http: Client,
    base: String,
    credentials: Credentials,
}

impl RestClient {
    pub fn new(base: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            http: Client::new(),
            base: base.into(),
            credentials,
        }
    }

    /// POST /0/private/GetWebSocketsToken.
    pub async fn get_websocket_token(&self, nonce: u64) -> Result<WebsocketToken, Error> {
        let postdata = format!("nonce={nonce}");
        let signature = sign_request(TOKEN_PATH, nonce, &postdata, &self.credentials.api_secret)?;
        let url = format!("{}{}", self.base, TOKEN_PATH);

        let response = self
            .http
            .post(&url)
            .header("API-Key", &self.credentials.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Token(format!("HTTP {status}: {text}")));
        }

        let envelope: RestEnvelope<WebsocketToken> = serde_json::from_str(&text)
            .map_err(|err| Error::Json(format!("failed to parse token response: {err}")))?;
        if !envelope.error.is_empty() {
            return Err(Error::Token(envelope.error.join("; ")));
        }
        envelope
            .result
            .ok_or_else(|| Error::Token("token response carried no result".into()))
    }
}
