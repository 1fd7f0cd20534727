//! # conduit-core
//!
//! Foundation types for the Conduit agent orchestrator.
//!
//! This crate provides the shared vocabulary that all other Conduit crates
//! depend on:
//!
//! - **Errors**: [`errors::ErrorKind`] surface-level taxonomy
//! - **Protocol**: [`protocol::AgentMessage`] / [`protocol::OutboundMessage`],
//!   the NDJSON wire format spoken by agent CLI subprocesses in SDK mode
//! - **Events**: [`events::BusEvent`] published on the in-process event bus
//!   and fanned out to SSE / consumer-WebSocket subscribers
//! - **Status**: [`status::SessionStatus`] lifecycle state machine states
//! - **Logging**: [`logging::init_logging`] tracing-subscriber setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other conduit crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod logging;
pub mod protocol;
pub mod status;

pub use errors::ErrorKind;
pub use events::BusEvent;
pub use status::SessionStatus;
