//! Access token issuance for the messaging platform.
//!
//! Tokens are compact HS256 JWTs signed with an API signing key. The payload carries an
//! IP Messaging grant scoping the bearer to one service instance and one endpoint id.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::{BotConfig, MessagingConfig};

type HmacSha256 = Hmac<Sha256>;

/// Device label appended to the application name to form the endpoint id.
pub const DEVICE_LABEL: &str = "server";

const CONTENT_TYPE: &str = "twilio-fpa;v=1";

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signing key: {0}")]
    Key(String),
    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Permission to use IP Messaging as a given endpoint within one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatGrant {
    pub service_sid: String,
    pub endpoint_id: String,
}

/// Grants attached to a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grants {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_messaging: Option<ChatGrant>,
}

/// JWT payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub jti: String,
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    pub grants: Grants,
}

#[derive(Debug, Serialize)]
struct Header<'a> {
    typ: &'a str,
    alg: &'a str,
    cty: &'a str,
}

/// An unsigned access token: account + signing key + grant. Call `to_jwt` to sign.
#[derive(Debug, Clone)]
pub struct AccessToken {
    account_sid: String,
    signing_key_sid: String,
    secret: String,
    ttl_secs: u64,
    grant: Option<ChatGrant>,
}

impl AccessToken {
    pub fn new(
        account_sid: impl Into<String>,
        signing_key_sid: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            signing_key_sid: signing_key_sid.into(),
            secret: secret.into(),
            ttl_secs: 3600,
            grant: None,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_grant(mut self, grant: ChatGrant) -> Self {
        self.grant = Some(grant);
        self
    }

    /// Build the claims for a token issued at `now` (unix seconds).
    /// An oversized ttl clamps `exp` at `i64::MAX` rather than wrapping.
    pub fn claims(&self, now: i64) -> Claims {
        let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
        Claims {
            jti: format!("{}-{}", self.signing_key_sid, now),
            iss: self.signing_key_sid.clone(),
            sub: self.account_sid.clone(),
            exp: now.saturating_add(ttl),
            grants: Grants {
                ip_messaging: self.grant.clone(),
            },
        }
    }

    /// Sign and serialize to compact form, using the current time.
    pub fn to_jwt(&self) -> Result<String, TokenError> {
        self.to_jwt_at(chrono::Utc::now().timestamp())
    }

    pub fn to_jwt_at(&self, now: i64) -> Result<String, TokenError> {
        let header = Header {
            typ: "JWT",
            alg: "HS256",
            cty: CONTENT_TYPE,
        };
        let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&self.claims(now))?);
        let signing_input = format!("{}.{}", header, payload);
        let signature = sign(self.secret.as_bytes(), signing_input.as_bytes())?;
        Ok(format!("{}.{}", signing_input, signature))
    }
}

fn sign(secret: &[u8], data: &[u8]) -> Result<String, TokenError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| TokenError::Key(e.to_string()))?;
    mac.update(data);
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Decode the payload of a compact token without checking the signature.
pub fn decode_claims(token: &str) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed("expected three segments".to_string()));
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// True if `token` carries a valid HS256 signature for `secret`.
pub fn verify_signature(token: &str, secret: &str) -> bool {
    let Some((signing_input, signature)) = token.rsplit_once('.') else {
        return false;
    };
    let Ok(sig_bytes) = URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&sig_bytes).is_ok()
}

/// Endpoint id for this bot: application name plus device label.
pub fn endpoint_id(bot: &BotConfig) -> String {
    format!("{}:{}", bot.apiai_access_token, DEVICE_LABEL)
}

/// Issues messaging access tokens from the bot's credentials.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    bot: BotConfig,
    ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(bot: BotConfig, messaging: &MessagingConfig) -> Self {
        Self {
            bot,
            ttl_secs: messaging.token_ttl_secs,
        }
    }

    /// Build and sign a token granting this bot's endpoint access to the configured service.
    /// Inputs are not validated; the platform rejects a token built from bad credentials.
    pub async fn issue_token(&self) -> Result<String, TokenError> {
        let grant = ChatGrant {
            service_sid: self.bot.service_sid.clone(),
            endpoint_id: endpoint_id(&self.bot),
        };
        AccessToken::new(
            &self.bot.account_sid,
            &self.bot.signing_key_sid,
            &self.bot.signing_key_secret,
        )
        .with_ttl(self.ttl_secs)
        .with_grant(grant)
        .to_jwt()
    }
}
