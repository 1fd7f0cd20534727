//! Session manager — owns the lifecycle state machine, the active-session
//! table, and the bridge port pool.
//!
//! Each live session bundles one bridge listener, one agent subprocess, and
//! one port. `create()` races the bridge connect signal against the
//! subprocess exit watch and a hard-coded 15-second timer; every failure
//! path releases whatever was acquired before surfacing a typed error.
//! Runtime failures after creation (crash, disconnect) never throw to
//! callers — they drive state transitions and `session.error` bus events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use conduit_bridge::router::MessageHandlers;
use conduit_bridge::{
    AgentProcess, BridgeServer, MessageSink, SpawnOptions, TerminateSignal, route_message,
    signal_pid,
};
use conduit_core::protocol::{OutboundMessage, ResultMessage, SystemMessage, ToolUseRequest};
use conduit_core::{BusEvent, SessionStatus};
use conduit_permissions::{EvaluationRequest, PermissionEngine};
use conduit_store::{MessageDirection, NewSession, SessionRow, Store};
use metrics::gauge;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::errors::{Result, RuntimeError};
use crate::ports::PortPool;

/// Hard-coded bridge connect window. Not configuration — the 15-second
/// contract is part of the session-creation semantics.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Permission modes the agent CLI accepts.
pub const VALID_PERMISSION_MODES: [&str; 6] = [
    "acceptEdits",
    "bypassPermissions",
    "default",
    "delegate",
    "dontAsk",
    "plan",
];

/// Static configuration for the manager.
#[derive(Clone, Debug)]
pub struct SessionManagerConfig {
    /// Agent CLI binary.
    pub cli_path: String,
    /// Token exported into the agent environment when set.
    pub access_token: Option<String>,
    /// First bridge port (inclusive).
    pub port_range_start: u16,
    /// Last bridge port (inclusive).
    pub port_range_end: u16,
    /// Global cap on live sessions.
    pub max_sessions: usize,
}

/// Caller-facing session creation request.
#[derive(Clone, Debug, Default)]
pub struct CreateSessionRequest {
    /// Owning project id.
    pub project_id: String,
    /// Display name.
    pub name: String,
    /// Model override (falls back to the project default).
    pub model: Option<String>,
    /// Permission mode override (falls back to the project default).
    pub permission_mode: Option<String>,
    /// Agent session id to resume.
    pub resume_session_id: Option<String>,
    /// Fork the resumed session instead of continuing it.
    pub fork_session: bool,
}

/// How a live session ends.
enum Teardown {
    /// Creation failed or the subprocess died: kill (if needed), mark
    /// `error`, emit `session.error` with the reason tag.
    Failure {
        reason: &'static str,
        message: String,
        process_alive: bool,
    },
    /// Terminated by caller: kill, mark `closed`, emit `session.closed`.
    Closed,
}

/// One live session's resources.
struct ActiveSession {
    id: String,
    project_id: String,
    port: u16,
    bridge: BridgeServer,
    process: AgentProcess,
    /// Whether the agent ever completed the bridge handshake — selects the
    /// `session.error` reason tag on unexpected exit.
    connected_once: AtomicBool,
    /// First teardown path wins; later ones wait for it to finish.
    teardown_started: AtomicBool,
    /// Flipped to `true` when the winning teardown has fully released the
    /// session's resources.
    teardown_done: tokio::sync::watch::Sender<bool>,
}

/// Multi-session coordinator.
pub struct SessionManager {
    config: SessionManagerConfig,
    store: Arc<Store>,
    bus: EventBus,
    permissions: Arc<PermissionEngine>,
    active: Mutex<HashMap<String, Arc<ActiveSession>>>,
    ports: Mutex<PortPool>,
}

impl SessionManager {
    /// Create a manager.
    pub fn new(
        config: SessionManagerConfig,
        store: Arc<Store>,
        bus: EventBus,
        permissions: Arc<PermissionEngine>,
    ) -> Arc<Self> {
        let ports = PortPool::new(config.port_range_start, config.port_range_end);
        Arc::new(Self {
            config,
            store,
            bus,
            permissions,
            active: Mutex::new(HashMap::new()),
            ports: Mutex::new(ports),
        })
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The permission engine.
    pub fn permissions(&self) -> &Arc<PermissionEngine> {
        &self.permissions
    }

    /// Number of live sessions.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Number of allocated bridge ports.
    pub fn allocated_port_count(&self) -> usize {
        self.ports.lock().allocated_count()
    }

    /// Whether a session is live (has a subprocess and bridge).
    pub fn is_running(&self, session_id: &str) -> bool {
        self.active.lock().contains_key(session_id)
    }

    /// Whether a session's agent is currently attached to its bridge.
    pub fn is_connected(&self, session_id: &str) -> bool {
        self.active
            .lock()
            .get(session_id)
            .is_some_and(|entry| entry.bridge.is_connected())
    }

    // ─────────────────────────────────────────────────────────────────────
    // create
    // ─────────────────────────────────────────────────────────────────────

    /// Spawn a new session: allocate a port, persist the row, start the
    /// bridge, launch the agent, and wait (≤ 15 s) for the handshake.
    #[instrument(skip(self, request), fields(project_id = %request.project_id))]
    pub async fn create(self: &Arc<Self>, request: CreateSessionRequest) -> Result<SessionRow> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(RuntimeError::Validation("session name must not be empty".into()));
        }
        let project = self
            .store
            .get_project(&request.project_id)?
            .ok_or_else(|| RuntimeError::NotFound(format!("project {}", request.project_id)))?;

        let model = request.model.clone().or_else(|| project.default_model.clone());
        let permission_mode = request
            .permission_mode
            .clone()
            .or_else(|| project.default_permission_mode.clone());
        if let Some(mode) = permission_mode.as_deref() {
            if !mode.is_empty() && !VALID_PERMISSION_MODES.contains(&mode) {
                return Err(RuntimeError::Validation(format!(
                    "invalid permission mode '{mode}'"
                )));
            }
        }

        // Capacity gate and port allocation under the cross-session locks.
        let port = {
            let active = self.active.lock();
            if active.len() >= self.config.max_sessions {
                return Err(RuntimeError::Conflict(format!(
                    "session cap reached ({} live)",
                    active.len()
                )));
            }
            self.ports
                .lock()
                .allocate()
                .ok_or_else(|| RuntimeError::Conflict("bridge port pool exhausted".into()))?
        };

        let session_id = Uuid::now_v7().to_string();
        if let Err(error) = self.store.create_session(&NewSession {
            id: &session_id,
            project_id: &project.id,
            name,
            model: model.as_deref(),
            ws_port: port,
        }) {
            let _ = self.ports.lock().release(port);
            return Err(error.into());
        }

        // Bridge listener. Bind failure releases the port and errs the row.
        let bridge = match BridgeServer::start(session_id.clone(), port, self.message_sink(&session_id)).await {
            Ok(bridge) => bridge,
            Err(error) => {
                let _ = self.ports.lock().release(port);
                let _ = self.store.mark_session_error(&session_id, &error.to_string());
                return Err(error.into());
            }
        };

        // Agent subprocess.
        let spawn_opts = SpawnOptions {
            cli_path: self.config.cli_path.clone(),
            sdk_url: format!("ws://localhost:{port}"),
            working_dir: Some(project.folder_path.clone()),
            model,
            permission_mode,
            resume_session_id: request.resume_session_id.clone(),
            fork_session: request.fork_session,
            system_prompt: project.system_prompt.clone(),
            append_system_prompt: project.append_system_prompt.clone(),
            access_token: self.config.access_token.clone(),
        };
        let process = match AgentProcess::spawn(&spawn_opts) {
            Ok(process) => process,
            Err(error) => {
                bridge.close().await;
                let _ = self.ports.lock().release(port);
                let _ = self.store.mark_session_error(&session_id, &error.to_string());
                return Err(error.into());
            }
        };
        let _ = self.store.set_session_pid(&session_id, process.pid());

        let entry = Arc::new(ActiveSession {
            id: session_id.clone(),
            project_id: project.id.clone(),
            port,
            bridge,
            process,
            connected_once: AtomicBool::new(false),
            teardown_started: AtomicBool::new(false),
            teardown_done: tokio::sync::watch::Sender::new(false),
        });
        {
            let mut active = self.active.lock();
            let _ = active.insert(session_id.clone(), Arc::clone(&entry));
            gauge!("sessions_active").set(active.len() as f64);
        }
        self.spawn_exit_watcher(&entry);

        // First-completed-wins: connect, exit, or the 15-second timer.
        let mut exit_rx = entry.process.exit_watch();
        let failure: Option<&'static str> = tokio::select! {
            () = entry.bridge.wait_connected() => None,
            _ = exit_rx.wait_for(Option::is_some) => Some("agent exited before connecting"),
            () = tokio::time::sleep(CONNECT_TIMEOUT) => Some("agent did not connect within 15s"),
        };

        if let Some(what) = failure {
            let stderr = entry.process.stderr_snapshot();
            let message = if stderr.is_empty() {
                what.to_string()
            } else {
                format!("{what}: {stderr}")
            };
            self.teardown(
                &entry,
                Teardown::Failure {
                    reason: "cli_failed_to_connect",
                    message: message.clone(),
                    process_alive: true,
                },
            )
            .await;
            return Err(RuntimeError::AgentStartup(message));
        }

        entry.connected_once.store(true, Ordering::SeqCst);
        let _ = self.store.set_session_status(&session_id, SessionStatus::Idle);
        self.emit_status(&session_id, SessionStatus::Idle);
        info!(session_id, port, pid = entry.process.pid(), "session started");

        self.store
            .get_session(&session_id)?
            .ok_or_else(|| RuntimeError::Internal(format!("session {session_id} row vanished")))
    }

    // ─────────────────────────────────────────────────────────────────────
    // turn operations
    // ─────────────────────────────────────────────────────────────────────

    /// Send one user message, moving the session to `active`.
    #[instrument(skip(self, content))]
    pub fn send_message(&self, session_id: &str, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(RuntimeError::Validation("message content must not be empty".into()));
        }
        let entry = self.require_running(session_id)?;
        if !entry.bridge.is_connected() {
            return Err(RuntimeError::Conflict(format!(
                "session {session_id} has no connected agent"
            )));
        }

        let frame = OutboundMessage::user(content);
        let _ = entry.bridge.send(&frame);
        let _ = self.store.set_session_status(session_id, SessionStatus::Active);
        self.emit_status(session_id, SessionStatus::Active);

        match serde_json::to_value(&frame) {
            Ok(payload) => {
                if let Err(error) =
                    self.store.append_message(session_id, MessageDirection::Outbound, "user", &payload)
                {
                    warn!(session_id, %error, "failed to record outbound transcript entry");
                }
            }
            Err(error) => warn!(session_id, %error, "failed to serialize outbound frame"),
        }
        Ok(())
    }

    /// Interrupt the in-flight turn. No state change.
    #[instrument(skip(self))]
    pub fn interrupt(&self, session_id: &str) -> Result<()> {
        let entry = self.require_running(session_id)?;
        if !entry.bridge.is_connected() {
            return Err(RuntimeError::Conflict(format!(
                "session {session_id} has no connected agent"
            )));
        }
        let _ = entry.bridge.send(&OutboundMessage::interrupt());
        Ok(())
    }

    /// Terminate a session: kill the subprocess, close the bridge, release
    /// the port, persist `closed`. Killing an already-terminal session is
    /// idempotent.
    #[instrument(skip(self))]
    pub async fn kill(&self, session_id: &str) -> Result<SessionRow> {
        let entry = { self.active.lock().get(session_id).cloned() };
        if let Some(entry) = entry {
            info!(session_id, "terminating session");
            self.teardown(&entry, Teardown::Closed).await;
        } else {
            let row = self
                .store
                .get_session(session_id)?
                .ok_or_else(|| RuntimeError::NotFound(format!("session {session_id}")))?;
            if !row.status().is_some_and(SessionStatus::is_terminal) {
                // Not live in this process but not terminal in the store —
                // a row left behind by an earlier run. Close it.
                let _ = self.store.mark_session_closed(session_id);
                let _ = self.bus.emit(&BusEvent::session_closed(session_id));
            }
        }
        self.store
            .get_session(session_id)?
            .ok_or_else(|| RuntimeError::NotFound(format!("session {session_id}")))
    }

    // ─────────────────────────────────────────────────────────────────────
    // startup / shutdown
    // ─────────────────────────────────────────────────────────────────────

    /// Reconcile persisted state with reality after a restart.
    ///
    /// Every session whose status is not `closed` gets its recorded PID
    /// signaled (SIGTERM; "no such process" swallowed) and is marked
    /// `error` with `closed_at` set. Running this twice leaves the same
    /// final state as running it once.
    pub fn cleanup_orphans(&self) -> Result<usize> {
        let sessions = self.store.list_unclosed_sessions()?;
        let count = sessions.len();
        for session in sessions {
            if let Some(pid) = session.cli_pid {
                if pid > 0 {
                    let signaled = signal_pid(pid as u32, TerminateSignal::Term);
                    debug!(session_id = %session.id, pid, signaled, "signaled orphan pid");
                }
            }
            let _ = self
                .store
                .mark_session_error(&session.id, "orphaned by server restart");
        }
        if count > 0 {
            info!(count, "orphan session cleanup complete");
        }
        Ok(count)
    }

    /// End every live session and drop all bus subscribers.
    pub async fn shutdown(&self) {
        info!("session manager shutdown initiated");
        let entries: Vec<_> = self.active.lock().values().cloned().collect();
        for entry in entries {
            self.teardown(&entry, Teardown::Closed).await;
        }
        self.bus.clear();
    }

    // ─────────────────────────────────────────────────────────────────────
    // inbound-frame handlers (called from the router)
    // ─────────────────────────────────────────────────────────────────────

    fn handle_system_init(&self, session_id: &str, message: &SystemMessage) {
        if let Some(agent_id) = message.session_id.as_deref().filter(|id| !id.is_empty()) {
            match self.store.set_agent_session_id(session_id, agent_id) {
                Ok(true) => debug!(session_id, agent_id, "captured agent session id"),
                Ok(false) => {}
                Err(error) => warn!(session_id, %error, "failed to persist agent session id"),
            }
        }
        // The init notice arrives as the agent begins processing a turn.
        let _ = self.store.set_session_status(session_id, SessionStatus::Active);
        self.emit_status(session_id, SessionStatus::Active);
    }

    fn handle_assistant(&self, session_id: &str, payload: &Value) {
        if let Err(error) =
            self.store.append_message(session_id, MessageDirection::Inbound, "assistant", payload)
        {
            warn!(session_id, %error, "failed to record assistant transcript entry");
        }
    }

    fn handle_result(&self, session_id: &str, message: &ResultMessage) {
        if let Err(error) = self.store.record_result(
            session_id,
            message.total_cost_usd,
            message.input_tokens,
            message.output_tokens,
        ) {
            warn!(session_id, %error, "failed to apply result metrics");
        }
        if let Err(error) =
            self.store.append_message(session_id, MessageDirection::Inbound, "result", &message.raw)
        {
            warn!(session_id, %error, "failed to record result transcript entry");
        }
        self.emit_status(session_id, SessionStatus::Idle);
    }

    fn handle_status(&self, session_id: &str, status: &str) {
        // Agent-reported passthrough states (`compacting`). Terminal states
        // are owned by the manager and never accepted from the wire.
        if let Some(parsed) = SessionStatus::parse(status) {
            if !parsed.is_terminal() {
                let _ = self.store.set_session_status(session_id, parsed);
                self.emit_status(session_id, parsed);
            }
        }
    }

    fn handle_permission_request(&self, session_id: &str, request: &ToolUseRequest) {
        let entry = { self.active.lock().get(session_id).cloned() };
        let Some(entry) = entry else {
            warn!(session_id, "permission request for session that is not running");
            return;
        };
        let decision = self.permissions.evaluate(&EvaluationRequest {
            session_id,
            project_id: Some(&entry.project_id),
            request_id: &request.request_id,
            tool_name: &request.tool_name,
            tool_input: &request.tool_input,
            decided_by: "conduit",
        });
        let frame = OutboundMessage::control_response(
            &request.request_id,
            decision.behavior,
            decision.updated_input,
        );
        let _ = entry.bridge.send(&frame);
    }

    // ─────────────────────────────────────────────────────────────────────
    // internals
    // ─────────────────────────────────────────────────────────────────────

    fn require_running(&self, session_id: &str) -> Result<Arc<ActiveSession>> {
        let entry = { self.active.lock().get(session_id).cloned() };
        match entry {
            Some(entry) => Ok(entry),
            None => match self.store.get_session(session_id)? {
                Some(_) => Err(RuntimeError::Conflict(format!(
                    "session {session_id} is not running"
                ))),
                None => Err(RuntimeError::NotFound(format!("session {session_id}"))),
            },
        }
    }

    fn emit_status(&self, session_id: &str, status: SessionStatus) {
        let _ = self.bus.emit(&BusEvent::session_status(session_id, status.as_str()));
    }

    /// Bridge → router glue. The sink holds only a weak manager reference so
    /// a torn-down manager does not keep sessions alive through their sinks.
    fn message_sink(self: &Arc<Self>, session_id: &str) -> MessageSink {
        let manager = Arc::downgrade(self);
        let session_id = session_id.to_string();
        Arc::new(move |frame: Value| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let handlers = ManagerHandlers { manager: Arc::clone(&manager) };
            let bus = manager.bus.clone();
            route_message(&session_id, frame, &handlers, &|event| {
                let _ = bus.emit(&event);
            });
        })
    }

    fn spawn_exit_watcher(self: &Arc<Self>, entry: &Arc<ActiveSession>) {
        let manager = Arc::downgrade(self);
        let session_id = entry.id.clone();
        let mut exit_rx = entry.process.exit_watch();
        let _ = tokio::spawn(async move {
            if exit_rx.wait_for(Option::is_some).await.is_err() {
                return;
            }
            if let Some(manager) = manager.upgrade() {
                manager.handle_process_exit(&session_id).await;
            }
        });
    }

    async fn handle_process_exit(&self, session_id: &str) {
        let entry = { self.active.lock().get(session_id).cloned() };
        let Some(entry) = entry else {
            // Already torn down (kill or failed create).
            return;
        };
        let stderr = entry.process.stderr_snapshot();
        let connected = entry.connected_once.load(Ordering::SeqCst);
        let (reason, what) = if connected {
            ("unexpected_exit", "agent exited unexpectedly")
        } else {
            ("cli_failed_to_connect", "agent exited before connecting")
        };
        let message = if stderr.is_empty() {
            what.to_string()
        } else {
            format!("{what}: {stderr}")
        };
        warn!(session_id, reason, "agent subprocess died");
        self.teardown(
            &entry,
            Teardown::Failure { reason, message, process_alive: false },
        )
        .await;
    }

    /// Release everything a session holds. Exactly one caller performs the
    /// cleanup; concurrent callers (kill racing the exit watcher, the exit
    /// watcher racing a failed create) wait until it has finished so no
    /// caller observes a half-released session.
    async fn teardown(&self, entry: &Arc<ActiveSession>, outcome: Teardown) {
        if entry.teardown_started.swap(true, Ordering::SeqCst) {
            let mut done = entry.teardown_done.subscribe();
            let _ = done.wait_for(|finished| *finished).await;
            return;
        }

        let kill_needed = match &outcome {
            Teardown::Closed => true,
            Teardown::Failure { process_alive, .. } => *process_alive,
        };
        if kill_needed {
            entry.process.kill().await;
        }
        entry.bridge.close().await;

        {
            let mut active = self.active.lock();
            let _ = active.remove(&entry.id);
            gauge!("sessions_active").set(active.len() as f64);
        }
        let _ = self.ports.lock().release(entry.port);

        match outcome {
            Teardown::Failure { reason, message, .. } => {
                let _ = self.store.mark_session_error(&entry.id, &message);
                let _ = self.bus.emit(&BusEvent::session_error(&entry.id, reason, &message));
                self.emit_status(&entry.id, SessionStatus::Error);
            }
            Teardown::Closed => {
                let _ = self.store.mark_session_closed(&entry.id);
                let _ = self.bus.emit(&BusEvent::session_closed(&entry.id));
                self.emit_status(&entry.id, SessionStatus::Closed);
            }
        }
        let _ = entry.teardown_done.send(true);
    }
}

/// Router callbacks bound to one manager.
struct ManagerHandlers {
    manager: Arc<SessionManager>,
}

impl MessageHandlers for ManagerHandlers {
    fn on_system_init(&self, session_id: &str, message: &SystemMessage) {
        self.manager.handle_system_init(session_id, message);
    }

    fn on_assistant(&self, session_id: &str, payload: &Value) {
        self.manager.handle_assistant(session_id, payload);
    }

    fn on_result(&self, session_id: &str, message: &ResultMessage) {
        self.manager.handle_result(session_id, message);
    }

    fn on_permission_request(&self, session_id: &str, request: &ToolUseRequest) {
        self.manager.handle_permission_request(session_id, request);
    }

    fn on_status(&self, session_id: &str, status: &str) {
        self.manager.handle_status(session_id, status);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
