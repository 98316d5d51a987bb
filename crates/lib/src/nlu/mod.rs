//! NLU abstraction and api.ai client.
//!
//! The message processor talks to `NluService`; `ApiAiClient` is the HTTP implementation.

mod apiai;

pub use apiai::{ApiAiClient, Fulfillment, NluError, NluResponse, NluResult, REQUEST_SOURCE};

use async_trait::async_trait;

/// Text-request seam to the NLU service. One call, one outcome.
#[async_trait]
pub trait NluService: Send + Sync {
    async fn text_request(&self, text: &str, session_id: &str) -> Result<NluResponse, NluError>;
}
