//! REST handlers.

pub mod rules;
pub mod sessions;
