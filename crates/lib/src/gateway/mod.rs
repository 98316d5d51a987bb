//! Gateway: HTTP server for NLU webhooks.
//!
//! Single port. `POST /webhook` relays an utterance to the NLU service; `GET /` is a health
//! check that also reports whether the messaging bootstrap has connected.

mod server;

pub use server::{router, run_gateway, spawn_messaging_bootstrap, GatewayState};
