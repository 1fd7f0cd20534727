//! # conduit-permissions
//!
//! Rule-based tool-use guardrails.
//!
//! - **Matcher**: limited glob (`*` wildcard, prefix-colon special case,
//!   everything else literal) over a per-tool target field
//! - **Engine**: deterministic evaluation order — project deny, global deny,
//!   project allow, global allow, default allow — with exactly one audit
//!   entry per decision
//!
//! Rule CRUD lives on the store ([`conduit_store::Store`]); the update path
//! enforces the mutable-column allowlist there.
//!
//! ## Crate Position
//!
//! Depends on: conduit-core, conduit-store.
//! Depended on by: conduit-runtime, conduit-server.

#![deny(unsafe_code)]

pub mod engine;
pub mod matcher;

pub use engine::{DecisionSource, EvaluationRequest, PermissionDecision, PermissionEngine};
pub use matcher::{pattern_matches, rule_matches, target_value, tool_matches};
