//! # conduit-runtime
//!
//! Session lifecycle orchestration.
//!
//! - **Event bus**: [`bus::EventBus`], in-process pub/sub with per-subscriber
//!   session filters and sandboxed delivery
//! - **Port pool**: [`ports::PortPool`], lowest-free allocation over the
//!   configured inclusive range
//! - **Session manager**: [`manager::SessionManager`], the state machine
//!   owner — spawn, bridge wiring, metric updates, orphan cleanup, shutdown
//!
//! ## Crate Position
//!
//! Aggregation layer. Depends on: conduit-core, conduit-store,
//! conduit-bridge, conduit-permissions.
//! Depended on by: conduit-server.

#![deny(unsafe_code)]

pub mod bus;
pub mod errors;
pub mod manager;
pub mod ports;

pub use bus::{BusHandler, ChannelSubscription, EventBus, SubscriptionId};
pub use errors::{Result, RuntimeError};
pub use manager::{
    CONNECT_TIMEOUT, CreateSessionRequest, SessionManager, SessionManagerConfig,
    VALID_PERMISSION_MODES,
};
pub use ports::PortPool;
