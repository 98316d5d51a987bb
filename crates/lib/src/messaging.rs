//! Messaging platform bootstrap: access manager, chat client, connection.
//!
//! The gateway runs `start_messaging` once at startup. A failure leaves the bot without
//! a messaging connection; nothing retries it.

use serde::Deserialize;

use crate::config::Config;
use crate::token::{self, Claims, TokenError, TokenIssuer};

const TOKEN_HEADER: &str = "X-Twilio-Token";

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("token: {0}")]
    Token(#[from] TokenError),
    #[error("messaging request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("messaging api error: {0}")]
    Api(String),
    #[error("token has no chat grant")]
    MissingGrant,
}

/// Holds the current access token and what it grants.
#[derive(Debug, Clone)]
pub struct AccessManager {
    token: String,
    claims: Claims,
}

impl AccessManager {
    pub fn new(token: String) -> Result<Self, MessagingError> {
        let claims = token::decode_claims(&token)?;
        Ok(Self { token, claims })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }
}

/// Service instance details returned by `initialize`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceInfo {
    pub sid: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

/// Chat client bound to an access manager.
pub struct ChatClient {
    base_url: String,
    access_manager: AccessManager,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(access_manager: AccessManager, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_manager,
            client: reqwest::Client::new(),
        }
    }

    pub fn access_manager(&self) -> &AccessManager {
        &self.access_manager
    }

    /// GET /v2/Services/{sid} with the access token; succeeds when the platform accepts the grant.
    pub async fn initialize(&self) -> Result<ServiceInfo, MessagingError> {
        let grant = self
            .access_manager
            .claims()
            .grants
            .ip_messaging
            .as_ref()
            .ok_or(MessagingError::MissingGrant)?;
        let url = format!("{}/v2/Services/{}", self.base_url, grant.service_sid);
        let res = self
            .client
            .get(&url)
            .header(TOKEN_HEADER, self.access_manager.token())
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(MessagingError::Api(format!("{} {}", status, body)));
        }
        Ok(res.json().await?)
    }
}

/// A client whose `initialize` succeeded.
pub struct MessagingConnection {
    pub client: ChatClient,
    pub service: ServiceInfo,
}

/// Issue a token, build the access manager and client, and initialize the connection.
pub async fn start_messaging(config: &Config) -> Result<MessagingConnection, MessagingError> {
    let issuer = TokenIssuer::new(config.bot.clone(), &config.messaging);
    let token = issuer.issue_token().await?;
    let access_manager = AccessManager::new(token)?;
    let client = ChatClient::new(access_manager, &config.messaging.base_url);
    let service = client.initialize().await?;
    log::info!(
        "messaging connected to service {} ({})",
        service.sid,
        service.friendly_name.as_deref().unwrap_or("unnamed")
    );
    Ok(MessagingConnection { client, service })
}
