//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format. Each type implements [`Default`] with production default values,
//! and `#[serde(default)]` allows partial JSON — missing fields get their
//! default value during deserialization.

use serde::{Deserialize, Serialize};

/// Root settings type for the Conduit server.
///
/// Loaded from `~/.conduit/settings.json` with defaults applied for missing
/// fields. `CONDUIT_*` environment variables override specific values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConduitSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// HTTP server network settings.
    pub server: ServerSettings,
    /// Agent CLI settings.
    pub agent: AgentSettings,
    /// Per-session bridge settings.
    pub bridge: BridgeSettings,
    /// Session lifecycle settings.
    pub session: SessionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ConduitSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "conduit".to_string(),
            server: ServerSettings::default(),
            agent: AgentSettings::default(),
            bridge: BridgeSettings::default(),
            session: SessionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ConduitSettings {
    /// Correct invalid invariants in place.
    ///
    /// Out-of-range values are corrected with a warning rather than rejected,
    /// so users get working behavior instead of a confusing startup error.
    pub fn validate(&mut self) {
        let b = &mut self.bridge;
        if b.port_range_end < b.port_range_start {
            tracing::warn!(
                "bridge portRangeEnd ({}) < portRangeStart ({}), correcting",
                b.port_range_end,
                b.port_range_start
            );
            b.port_range_end = b.port_range_start;
        }
        if self.session.max_sessions == 0 {
            tracing::warn!("session maxSessions is 0, correcting to 1");
            self.session.max_sessions = 1;
        }
    }
}

/// HTTP server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address for the HTTP/WS/SSE surface.
    pub host: String,
    /// Bind port for the HTTP/WS/SSE surface.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8787 }
    }
}

/// Agent CLI settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Path (or bare name resolved on PATH) of the agent CLI binary.
    pub cli_path: String,
    /// Access token injected into the agent environment when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Reserved: per-request permission decision timeout. Currently unused —
    /// decisions are synchronous and rule-driven.
    pub permission_timeout_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            access_token: None,
            permission_timeout_ms: 30_000,
        }
    }
}

/// Per-session bridge settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// First port of the inclusive bridge port range.
    pub port_range_start: u16,
    /// Last port of the inclusive bridge port range.
    pub port_range_end: u16,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self { port_range_start: 9300, port_range_end: 9399 }
    }
}

/// Session lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Global cap on concurrently live sessions.
    pub max_sessions: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { max_sessions: 20 }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default tracing filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit structured JSON log lines instead of the human format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
