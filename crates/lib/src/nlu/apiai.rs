//! api.ai query API client (https://api.api.ai/v1 by default).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::NluService;
use crate::config::{BotConfig, NluConfig};

/// Tag sent with each query so the agent can tell where the utterance came from.
pub const REQUEST_SOURCE: &str = "twilio-ip";

#[derive(Debug, thiserror::Error)]
pub enum NluError {
    #[error("nlu request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("nlu api error: {0}")]
    Api(String),
}

/// Client for the api.ai `/query` endpoint.
#[derive(Clone)]
pub struct ApiAiClient {
    base_url: String,
    protocol_version: String,
    access_token: String,
    lang: String,
    client: reqwest::Client,
}

impl ApiAiClient {
    pub fn new(bot: &BotConfig, nlu: &NluConfig) -> Self {
        Self {
            base_url: nlu.base_url.trim_end_matches('/').to_string(),
            protocol_version: nlu.protocol_version.clone(),
            access_token: bot.apiai_access_token.clone(),
            lang: bot.apiai_lang.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// POST /query — one text query within a session.
    pub async fn query(&self, text: &str, session_id: &str) -> Result<NluResponse, NluError> {
        let url = format!("{}/query", self.base_url);
        let body = QueryRequest {
            query: text,
            lang: &self.lang,
            session_id,
            original_request: OriginalRequest {
                source: REQUEST_SOURCE,
            },
        };
        let res = self
            .client
            .post(&url)
            .query(&[("v", self.protocol_version.as_str())])
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(NluError::Api(format!("{} {}", status, body)));
        }
        let data: NluResponse = res.json().await?;
        Ok(data)
    }
}

#[async_trait]
impl NluService for ApiAiClient {
    async fn text_request(&self, text: &str, session_id: &str) -> Result<NluResponse, NluError> {
        self.query(text, session_id).await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    lang: &'a str,
    session_id: &'a str,
    original_request: OriginalRequest<'a>,
}

#[derive(Debug, Serialize)]
struct OriginalRequest<'a> {
    source: &'a str,
}

/// Query response. Only the fields the bridge reads are modelled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NluResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub result: Option<NluResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NluResult {
    #[serde(default)]
    pub resolved_query: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub fulfillment: Option<Fulfillment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fulfillment {
    #[serde(default)]
    pub speech: Option<String>,
}

impl NluResult {
    /// Reply text, if the agent produced a non-empty one.
    pub fn speech(&self) -> Option<&str> {
        self.fulfillment
            .as_ref()
            .and_then(|f| f.speech.as_deref())
            .filter(|s| !s.is_empty())
    }
}
