//! # conduit-bridge
//!
//! The agent-facing half of Conduit:
//!
//! - **NDJSON framer**: [`ndjson::NdjsonParser`] / [`ndjson::to_ndjson`]
//! - **Bridge server**: [`server::BridgeServer`], one ephemeral WebSocket
//!   listener per session with a strict one-client policy
//! - **Message router**: [`router::route_message`], pure dispatch to typed
//!   handlers plus bus-event emission
//! - **Subprocess launcher**: [`launcher::AgentProcess`], argv construction,
//!   bounded stderr capture, graceful kill with SIGKILL escalation
//!
//! ## Crate Position
//!
//! Depends on: conduit-core.
//! Depended on by: conduit-runtime.

#![deny(unsafe_code)]

pub mod errors;
pub mod launcher;
pub mod ndjson;
pub mod router;
pub mod server;

pub use errors::{BridgeError, SpawnError};
pub use launcher::{AgentProcess, SpawnOptions, TerminateSignal, build_argv, signal_pid};
pub use ndjson::{NdjsonParser, to_ndjson};
pub use router::{MessageHandlers, NoopHandlers, route_message};
pub use server::{BridgeServer, MessageSink};
