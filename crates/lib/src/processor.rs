//! Webhook message processing: validate, resolve session, query NLU, map the outcome.
//!
//! Every call produces exactly one `Reply`, which the gateway turns into an HTTP response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::nlu::NluService;
use crate::session::SessionRegistry;

pub const EMPTY_MESSAGE: &str = "Empty message";
pub const EMPTY_RESULT: &str = "Received empty result";
pub const EMPTY_SPEECH: &str = "Received empty speech";
pub const NLU_FAILED: &str = "NLU request failed";

/// Inbound webhook body: `{ "session": { "from": { "id" }, "initialText" } }`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundBody {
    #[serde(default)]
    pub session: Option<InboundSession>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundSession {
    #[serde(default)]
    pub from: Option<Sender>,
    #[serde(default)]
    pub initial_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Sender {
    #[serde(default, deserialize_with = "scalar_id")]
    pub id: Option<String>,
}

/// Sender ids arrive as strings or numbers; a number keys the session by its decimal text.
/// Any other JSON value counts as no id.
fn scalar_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: String,
    pub text: String,
}

impl InboundBody {
    /// Sender id and utterance, when both are present.
    fn into_parts(self) -> Option<(String, String)> {
        let session = self.session?;
        let chat_id = session.from?.id?;
        let text = session.initial_text?;
        Some((chat_id, text))
    }
}

/// JSON reply body on success: `{ "say": { "value": ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SayReply {
    pub say: SayValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SayValue {
    pub value: String,
}

/// Outcome of processing one webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// 200 with the NLU speech.
    Say(String),
    /// 400 with a fixed plain-text body.
    Rejected(&'static str),
    /// 502: the NLU service could not be reached or returned an error.
    NluFailed,
}

impl Reply {
    pub fn status(&self) -> StatusCode {
        match self {
            Reply::Say(_) => StatusCode::OK,
            Reply::Rejected(_) => StatusCode::BAD_REQUEST,
            Reply::NluFailed => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Reply::Say(value) => (
                status,
                Json(SayReply {
                    say: SayValue { value },
                }),
            )
                .into_response(),
            Reply::Rejected(text) => (status, text).into_response(),
            Reply::NluFailed => (status, NLU_FAILED).into_response(),
        }
    }
}

/// Parse and validate a raw webhook body. Anything without a sender id and a non-empty
/// utterance is rejected with "Empty message".
pub fn validate(body: &[u8]) -> Result<InboundMessage, Reply> {
    let parsed: InboundBody = if body.is_empty() {
        InboundBody::default()
    } else {
        serde_json::from_slice(body).map_err(|e| {
            log::debug!("webhook body is not a message: {}", e);
            Reply::Rejected(EMPTY_MESSAGE)
        })?
    };
    let Some((chat_id, text)) = parsed.into_parts() else {
        return Err(Reply::Rejected(EMPTY_MESSAGE));
    };
    if text.is_empty() {
        return Err(Reply::Rejected(EMPTY_MESSAGE));
    }
    Ok(InboundMessage { chat_id, text })
}

/// Relays webhook messages to the NLU service. Owns the session registry.
pub struct MessageProcessor {
    registry: Arc<SessionRegistry>,
    nlu: Arc<dyn NluService>,
    dev_mode: bool,
}

impl MessageProcessor {
    pub fn new(registry: Arc<SessionRegistry>, nlu: Arc<dyn NluService>, dev_mode: bool) -> Self {
        Self {
            registry,
            nlu,
            dev_mode,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Process one raw webhook body.
    pub async fn process_message(&self, body: &[u8]) -> Reply {
        if self.dev_mode {
            log::info!("body {}", String::from_utf8_lossy(body));
        }
        let msg = match validate(body) {
            Ok(m) => m,
            Err(reply) => {
                log::info!("{}", EMPTY_MESSAGE);
                return reply;
            }
        };
        log::info!("{} {}", msg.chat_id, msg.text);

        let session_id = self.registry.resolve_session(&msg.chat_id).await;
        let response = match self.nlu.text_request(&msg.text, &session_id).await {
            Ok(r) => r,
            Err(e) => {
                log::error!("nlu request for session {} failed: {}", session_id, e);
                return Reply::NluFailed;
            }
        };

        let Some(result) = response.result else {
            log::info!("{}", EMPTY_RESULT);
            return Reply::Rejected(EMPTY_RESULT);
        };
        match result.speech() {
            Some(speech) => {
                log::info!("response as text message");
                Reply::Say(speech.to_string())
            }
            None => {
                log::info!("{}", EMPTY_SPEECH);
                Reply::Rejected(EMPTY_SPEECH)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlu::{Fulfillment, NluError, NluResponse, NluResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Canned NLU outcome; records every (text, session) it was asked for.
    struct MockNlu {
        outcome: fn() -> Result<NluResponse, NluError>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl MockNlu {
        fn new(outcome: fn() -> Result<NluResponse, NluError>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NluService for MockNlu {
        async fn text_request(
            &self,
            text: &str,
            session_id: &str,
        ) -> Result<NluResponse, NluError> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), session_id.to_string()));
            (self.outcome)()
        }
    }

    fn speech(s: &str) -> Result<NluResponse, NluError> {
        Ok(NluResponse {
            result: Some(NluResult {
                fulfillment: Some(Fulfillment {
                    speech: Some(s.to_string()),
                }),
                ..NluResult::default()
            }),
            ..NluResponse::default()
        })
    }

    fn processor(nlu: Arc<MockNlu>) -> MessageProcessor {
        MessageProcessor::new(Arc::new(SessionRegistry::new()), nlu, false)
    }

    fn body(v: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    #[tokio::test]
    async fn relays_speech_and_registers_session() {
        let nlu = MockNlu::new(|| speech("Hi there"));
        let p = processor(nlu.clone());
        let reply = p
            .process_message(&body(
                json!({ "session": { "from": { "id": "u1" }, "initialText": "hi" } }),
            ))
            .await;
        assert_eq!(reply, Reply::Say("Hi there".to_string()));
        let session = p.registry().get("u1").await.expect("session for u1");
        assert_eq!(nlu.calls(), vec![("hi".to_string(), session)]);
    }

    #[tokio::test]
    async fn same_chat_reuses_session_across_messages() {
        let nlu = MockNlu::new(|| speech("ok"));
        let p = processor(nlu.clone());
        for text in ["one", "two"] {
            p.process_message(&body(
                json!({ "session": { "from": { "id": "u1" }, "initialText": text } }),
            ))
            .await;
        }
        let calls = nlu.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, calls[1].1);
        assert_eq!(p.registry().len().await, 1);
    }

    #[tokio::test]
    async fn incomplete_bodies_are_empty_message_without_nlu_call() {
        let nlu = MockNlu::new(|| speech("unused"));
        let p = processor(nlu.clone());
        let bodies: Vec<Vec<u8>> = vec![
            Vec::new(),
            b"not json".to_vec(),
            body(json!({})),
            body(json!({ "session": {} })),
            body(json!({ "session": { "initialText": "hi" } })),
            body(json!({ "session": { "from": {}, "initialText": "hi" } })),
            body(json!({ "session": { "from": { "id": "u1" } } })),
            body(json!({ "session": { "from": { "id": "u1" }, "initialText": "" } })),
            body(json!({ "session": { "from": { "id": "u1" }, "initialText": null } })),
        ];
        for b in bodies {
            assert_eq!(p.process_message(&b).await, Reply::Rejected(EMPTY_MESSAGE));
        }
        assert!(nlu.calls().is_empty());
        assert!(p.registry().is_empty().await);
    }

    #[tokio::test]
    async fn missing_result_is_rejected() {
        let p = processor(MockNlu::new(|| Ok(NluResponse::default())));
        let reply = p
            .process_message(&body(
                json!({ "session": { "from": { "id": "u1" }, "initialText": "hi" } }),
            ))
            .await;
        assert_eq!(reply, Reply::Rejected(EMPTY_RESULT));
    }

    #[tokio::test]
    async fn empty_speech_is_rejected() {
        for outcome in [
            (|| speech("")) as fn() -> Result<NluResponse, NluError>,
            || {
                Ok(NluResponse {
                    result: Some(NluResult::default()),
                    ..NluResponse::default()
                })
            },
        ] {
            let p = processor(MockNlu::new(outcome));
            let reply = p
                .process_message(&body(
                    json!({ "session": { "from": { "id": "u1" }, "initialText": "hi" } }),
                ))
                .await;
            assert_eq!(reply, Reply::Rejected(EMPTY_SPEECH));
        }
    }

    #[tokio::test]
    async fn nlu_error_yields_single_failure_reply() {
        let p = processor(MockNlu::new(|| Err(NluError::Api("500 boom".to_string()))));
        let reply = p
            .process_message(&body(
                json!({ "session": { "from": { "id": "u1" }, "initialText": "hi" } }),
            ))
            .await;
        assert_eq!(reply, Reply::NluFailed);
        assert_eq!(reply.status(), StatusCode::BAD_GATEWAY);
        // The session is still assigned; only the query failed.
        assert!(p.registry().get("u1").await.is_some());
    }

    #[test]
    fn say_reply_serializes_to_expected_shape() {
        let v = serde_json::to_value(SayReply {
            say: SayValue {
                value: "Hello!".to_string(),
            },
        })
        .unwrap();
        assert_eq!(v, json!({ "say": { "value": "Hello!" } }));
    }

    #[tokio::test]
    async fn numeric_sender_id_is_keyed_by_its_text() {
        let nlu = MockNlu::new(|| speech("ok"));
        let p = processor(nlu.clone());
        let reply = p
            .process_message(&body(
                json!({ "session": { "from": { "id": 42 }, "initialText": "hi" } }),
            ))
            .await;
        assert_eq!(reply, Reply::Say("ok".to_string()));
        let session = p.registry().get("42").await.expect("session for 42");
        assert_eq!(nlu.calls(), vec![("hi".to_string(), session.clone())]);

        // "42" as a string is the same chat.
        p.process_message(&body(
            json!({ "session": { "from": { "id": "42" }, "initialText": "again" } }),
        ))
        .await;
        assert_eq!(nlu.calls()[1].1, session);
        assert_eq!(p.registry().len().await, 1);
    }

    #[tokio::test]
    async fn non_scalar_sender_id_is_empty_message() {
        let nlu = MockNlu::new(|| speech("unused"));
        let p = processor(nlu.clone());
        for id in [json!(null), json!(true), json!([1]), json!({ "n": 1 })] {
            let reply = p
                .process_message(&body(
                    json!({ "session": { "from": { "id": id }, "initialText": "hi" } }),
                ))
                .await;
            assert_eq!(reply, Reply::Rejected(EMPTY_MESSAGE));
        }
        assert!(nlu.calls().is_empty());
    }

    #[tokio::test]
    async fn dev_mode_logs_body_and_still_validates() {
        let nlu = MockNlu::new(|| speech("dev reply"));
        let p = MessageProcessor::new(Arc::new(SessionRegistry::new()), nlu.clone(), true);
        assert_eq!(
            p.process_message(b"not json").await,
            Reply::Rejected(EMPTY_MESSAGE)
        );
        assert_eq!(
            p.process_message(&[0xff, 0xfe, b'{']).await,
            Reply::Rejected(EMPTY_MESSAGE)
        );
        assert!(nlu.calls().is_empty());

        let reply = p
            .process_message(&body(
                json!({ "session": { "from": { "id": "u1" }, "initialText": "hi" } }),
            ))
            .await;
        assert_eq!(reply, Reply::Say("dev reply".to_string()));
        assert_eq!(nlu.calls().len(), 1);
    }

    #[test]
    fn validate_keeps_text_verbatim() {
        let msg = validate(&body(
            json!({ "session": { "from": { "id": "c" }, "initialText": "  spaced  " } }),
        ))
        .unwrap();
        assert_eq!(msg.chat_id, "c");
        assert_eq!(msg.text, "  spaced  ");
    }
}
