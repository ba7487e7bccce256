use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use termcast_terminal::{
    resolve_command, EngineFactory, ExitInfo, ProcessBridge, ProcessEvent, PtyBridge,
    SpawnRequest, Vt100EngineFactory, DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_SCROLLBACK_LINES,
};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::web::protocol::{
    now_millis, ClientId, CreateSessionRequest, ServerFrame, ServerMessage, SessionId,
    SessionStatus, SessionSummary,
};
use crate::web::session::{clamp_cols, clamp_rows, SessionState};
use crate::web::transport::Outbound;

/// Default coalescing window for change computation
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Tunables shared by every session
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub history_limit: usize,
    pub debounce: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_SCROLLBACK_LINES,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("failed to spawn process: {0:#}")]
    Spawn(anyhow::Error),
    #[error("process i/o failed: {0:#}")]
    Process(anyhow::Error),
}

/// A viewer connection attached to a session
#[derive(Debug)]
pub struct ClientConnection {
    pub client_id: ClientId,
    pub sender: mpsc::UnboundedSender<Outbound>,
    pub joined_at: DateTime<Utc>,
}

/// A live terminal session
pub struct Session {
    pub id: SessionId,
    pub command: String,
    pub created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    clients: RwLock<HashMap<ClientId, ClientConnection>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Session {
    fn new(id: SessionId, command: String, state: SessionState) -> Self {
        Self {
            id,
            command,
            created_at: Utc::now(),
            state: Mutex::new(state),
            clients: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn add_client(&self, client_id: ClientId, sender: mpsc::UnboundedSender<Outbound>) {
        let conn = ClientConnection {
            client_id,
            sender,
            joined_at: Utc::now(),
        };
        self.clients.write().await.insert(client_id, conn);
    }

    async fn remove_client(&self, client_id: ClientId) {
        self.clients.write().await.remove(&client_id);
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    fn frame(&self, message: ServerMessage) -> Arc<str> {
        Arc::from(ServerFrame::new(self.id, message).to_json())
    }

    /// Push the same serialized frame to every attached client. Closed
    /// connections are skipped; their own close event prunes them.
    async fn broadcast(&self, message: ServerMessage) {
        let frame = self.frame(message);
        let clients = self.clients.read().await;
        for client in clients.values() {
            let _ = client.sender.send(Outbound::Frame(frame.clone()));
        }
    }

    async fn send_to_client(&self, client_id: ClientId, message: ServerMessage) {
        let clients = self.clients.read().await;
        if let Some(client) = clients.get(&client_id) {
            let _ = client.sender.send(Outbound::Frame(self.frame(message)));
        }
    }

    async fn close_clients(&self) {
        let mut clients = self.clients.write().await;
        for (_, client) in clients.drain() {
            let _ = client.sender.send(Outbound::Close);
        }
    }

    pub async fn summary(&self) -> SessionSummary {
        let (size, status) = {
            let state = self.state.lock().await;
            (state.size(), state.status())
        };

        SessionSummary {
            id: self.id,
            command: self.command.clone(),
            cols: size.cols,
            rows: size.rows,
            created_at: self.created_at.to_rfc3339(),
            status,
            clients: self.client_count().await,
        }
    }

    /// Run a debounced change computation and broadcast the patch, if any
    async fn emit_change(&self) {
        let mut state = self.state.lock().await;
        if self.is_closed() {
            return;
        }
        if let Some(patch) = state.compute_change() {
            self.broadcast(patch).await;
        }
    }
}

/// Manages all active sessions
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    bridge: Arc<dyn ProcessBridge>,
    engines: Arc<dyn EngineFactory>,
    settings: ManagerSettings,
}

impl SessionManager {
    /// Create a manager backed by native PTYs and the VT100 engine
    pub fn new(settings: ManagerSettings) -> Self {
        Self::with_backends(settings, Arc::new(PtyBridge::new()), Arc::new(Vt100EngineFactory))
    }

    pub fn with_backends(
        settings: ManagerSettings,
        bridge: Arc<dyn ProcessBridge>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            bridge,
            engines,
            settings,
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Spawn a process and start streaming it
    pub async fn create_session(
        self: &Arc<Self>,
        request: CreateSessionRequest,
    ) -> Result<SessionId, SessionError> {
        let session_id = Uuid::new_v4();
        let command = request.command.trim().to_string();
        let resolved = resolve_command(&command);
        let cols = clamp_cols(request.cols, DEFAULT_COLS);
        let rows = clamp_rows(request.rows, DEFAULT_ROWS);

        let spawned = self
            .bridge
            .spawn(SpawnRequest {
                program: resolved.program.clone(),
                args: request.args.unwrap_or(resolved.args),
                cols,
                rows,
                cwd: request.cwd.map(Into::into),
                env: request.env.unwrap_or_default(),
            })
            .map_err(SessionError::Spawn)?;

        let engine = self.engines.create(cols, rows, self.settings.history_limit);
        let state = SessionState::new(engine, spawned.handle, cols, rows, self.settings.history_limit);
        let label = if command.is_empty() { resolved.program } else { command };
        let session = Arc::new(Session::new(session_id, label, state));

        self.sessions.write().await.insert(session_id, session.clone());
        tracing::info!(
            session = %session_id,
            command = %session.command,
            bridge = self.bridge.bridge_name(),
            cols,
            rows,
            "Session created"
        );

        tokio::spawn(Arc::clone(self).run_session(session, spawned.events));
        Ok(session_id)
    }

    /// Per-session event loop: applies output in arrival order and owns the
    /// debounce deadline for change computation.
    async fn run_session(
        self: Arc<Self>,
        session: Arc<Session>,
        mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    ) {
        let debounce = self.settings.debounce;
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => return,
                event = events.recv() => match event {
                    Some(ProcessEvent::Output(data)) => {
                        let mut state = session.state.lock().await;
                        if session.is_closed() {
                            return;
                        }
                        if let Err(e) = state.apply_output(&data) {
                            tracing::error!(session = %session.id, error = %e, "Failed to apply process output");
                        }
                        deadline = Some(Instant::now() + debounce);
                    }
                    Some(ProcessEvent::Exit(exit)) => {
                        self.handle_exit(&session, exit, deadline.is_some()).await;
                        return;
                    }
                    None => {
                        let exit = ExitInfo { code: -1, signal: None };
                        self.handle_exit(&session, exit, deadline.is_some()).await;
                        return;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    session.emit_change().await;
                }
            }
        }
    }

    async fn handle_exit(&self, session: &Arc<Session>, exit: ExitInfo, change_pending: bool) {
        {
            let mut state = session.state.lock().await;
            state.mark_exited();
            // Let viewers see the final screen before the exit frame
            if change_pending && !session.is_closed() {
                if let Some(patch) = state.compute_change() {
                    session.broadcast(patch).await;
                }
            }
        }

        tracing::info!(session = %session.id, code = exit.code, signal = ?exit.signal, "Process exited");
        let message = ServerMessage::Exit {
            code: exit.code,
            signal: exit.signal,
            message: "Process completed".to_string(),
        };
        self.teardown(session, message, false).await;
    }

    /// Shared end of life for explicit termination and natural exit. Only the
    /// first call does anything.
    async fn teardown(&self, session: &Arc<Session>, exit_message: ServerMessage, kill: bool) {
        if session.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        session.cancel.cancel();
        self.sessions.write().await.remove(&session.id);

        let mut state = session.state.lock().await;
        if kill {
            if let Err(e) = state.kill() {
                tracing::debug!(session = %session.id, error = %e, "Kill failed");
            }
        }
        session.broadcast(exit_message).await;
        session.close_clients().await;
        state.dispose();
    }

    /// Get a session by ID
    pub async fn get_session(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn require(&self, session_id: &SessionId) -> Result<Arc<Session>, SessionError> {
        self.get_session(session_id)
            .await
            .ok_or(SessionError::NotFound(*session_id))
    }

    /// List all active sessions, oldest first
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.summary().await);
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Kill the process and tear the session down
    pub async fn terminate(&self, session_id: &SessionId) -> bool {
        let Some(session) = self.get_session(session_id).await else {
            return false;
        };

        tracing::info!(session = %session_id, "Terminating session");
        let message = ServerMessage::Exit {
            code: 0,
            signal: None,
            message: "Terminated by user".to_string(),
        };
        self.teardown(&session, message, true).await;
        true
    }

    /// Add a viewer and send it a full snapshot
    pub async fn attach_client(
        &self,
        session_id: &SessionId,
        client_id: ClientId,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> Result<(), SessionError> {
        let session = self.require(session_id).await?;
        let mut state = session.state.lock().await;
        if session.is_closed() {
            return Err(SessionError::NotFound(*session_id));
        }

        session.add_client(client_id, sender).await;
        let snapshot = state.full_snapshot(true);
        session.send_to_client(client_id, snapshot).await;

        tracing::info!(session = %session_id, client = %client_id, "Client attached");
        Ok(())
    }

    pub async fn detach_client(&self, session_id: &SessionId, client_id: ClientId) {
        if let Some(session) = self.get_session(session_id).await {
            session.remove_client(client_id).await;
            tracing::info!(session = %session_id, client = %client_id, "Client detached");
        }
    }

    /// Forward raw input to the process
    pub async fn write_input(&self, session_id: &SessionId, data: &str) -> Result<(), SessionError> {
        let session = self.require(session_id).await?;
        let mut state = session.state.lock().await;
        state
            .write_input(data.as_bytes())
            .map_err(SessionError::Process)
    }

    /// Resize and broadcast the resulting snapshot to every viewer
    pub async fn resize(
        &self,
        session_id: &SessionId,
        cols: f64,
        rows: f64,
    ) -> Result<(), SessionError> {
        let session = self.require(session_id).await?;
        let mut state = session.state.lock().await;
        let snapshot = state.resize(Some(cols), Some(rows));
        let size = state.size();
        session.broadcast(snapshot).await;

        tracing::info!(session = %session_id, cols = size.cols, rows = size.rows, "Session resized");
        Ok(())
    }

    /// Full snapshot frame of a session
    pub async fn full_snapshot(
        &self,
        session_id: &SessionId,
        advance_seq: bool,
    ) -> Result<ServerFrame, SessionError> {
        let session = self.require(session_id).await?;
        let mut state = session.state.lock().await;
        Ok(ServerFrame::new(session.id, state.full_snapshot(advance_seq)))
    }

    /// Send a fresh snapshot to one viewer
    pub async fn resync(&self, session_id: &SessionId, client_id: ClientId) -> Result<(), SessionError> {
        let session = self.require(session_id).await?;
        let mut state = session.state.lock().await;
        let snapshot = state.full_snapshot(true);
        session.send_to_client(client_id, snapshot).await;
        Ok(())
    }

    /// Answer a history page request to the requesting viewer only
    pub async fn send_history(
        &self,
        session_id: &SessionId,
        client_id: ClientId,
        req_id: String,
        before: &str,
        limit: f64,
    ) -> Result<(), SessionError> {
        let session = self.require(session_id).await?;
        let chunk = session.state.lock().await.history_chunk(req_id, before, limit);
        session.send_to_client(client_id, chunk).await;
        Ok(())
    }

    pub async fn send_pong(&self, session_id: &SessionId, client_id: ClientId) -> Result<(), SessionError> {
        let session = self.require(session_id).await?;
        session
            .send_to_client(client_id, ServerMessage::Pong { ts: now_millis() })
            .await;
        Ok(())
    }

    pub async fn send_error(&self, session_id: &SessionId, client_id: ClientId, message: String) {
        if let Some(session) = self.get_session(session_id).await {
            session
                .send_to_client(client_id, ServerMessage::Error { message })
                .await;
        }
    }

    /// Push an unsolicited ping to every attached viewer of every session
    pub async fn heartbeat(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.broadcast(ServerMessage::Ping { ts: now_millis() }).await;
        }
    }

    /// Status of a session, if it is still registered
    pub async fn status(&self, session_id: &SessionId) -> Option<SessionStatus> {
        let session = self.get_session(session_id).await?;
        let status = session.state.lock().await.status();
        Some(status)
    }

    /// Current history size, if the session is still registered
    pub async fn history_len(&self, session_id: &SessionId) -> Option<usize> {
        let session = self.get_session(session_id).await?;
        let len = session.state.lock().await.history().len();
        Some(len)
    }
}
