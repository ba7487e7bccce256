#![allow(dead_code)]

use anyhow::{bail, Result};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use termcast::web::protocol::{ClientId, CreateSessionRequest, SessionId};
use termcast::web::{ManagerSettings, Outbound, SessionManager};
use termcast_terminal::{
    CellData, EngineCursor, EngineFactory, ProcessBridge, ProcessEvent, ProcessHandle,
    SpawnRequest, SpawnedProcess, TerminalEngine, Vt100EngineFactory,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Everything the session did to its fake process
#[derive(Debug, Default)]
pub struct ProcessLog {
    pub input: Vec<u8>,
    pub resizes: Vec<(u16, u16)>,
    pub killed: bool,
}

struct FakeHandle {
    log: Arc<Mutex<ProcessLog>>,
}

impl ProcessHandle for FakeHandle {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.log.lock().unwrap().input.extend_from_slice(data);
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.log.lock().unwrap().resizes.push((cols, rows));
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.log.lock().unwrap().killed = true;
        Ok(())
    }
}

/// A process the test drives by hand
pub struct FakeProcess {
    pub request: SpawnRequest,
    pub events: mpsc::UnboundedSender<ProcessEvent>,
    pub log: Arc<Mutex<ProcessLog>>,
}

impl FakeProcess {
    pub fn output(&self, data: &str) {
        self.events
            .send(ProcessEvent::Output(data.as_bytes().to_vec()))
            .unwrap();
    }

    pub fn exit(&self, code: i32) {
        self.events
            .send(ProcessEvent::Exit(termcast_terminal::ExitInfo { code, signal: None }))
            .unwrap();
    }
}

/// Process bridge that hands out scriptable processes
#[derive(Default)]
pub struct FakeBridge {
    spawned: Mutex<Vec<Arc<FakeProcess>>>,
    failing: bool,
}

impl FakeBridge {
    pub fn failing() -> Self {
        Self {
            spawned: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn last(&self) -> Arc<FakeProcess> {
        self.spawned.lock().unwrap().last().cloned().expect("nothing spawned")
    }
}

impl ProcessBridge for FakeBridge {
    fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess> {
        if self.failing {
            bail!("no such program: {}", request.program);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(ProcessLog::default()));
        self.spawned.lock().unwrap().push(Arc::new(FakeProcess {
            request,
            events: tx,
            log: log.clone(),
        }));

        Ok(SpawnedProcess {
            handle: Box::new(FakeHandle { log }),
            events: rx,
        })
    }

    fn bridge_name(&self) -> &str {
        "fake"
    }
}

/// Line-mode engine: printable characters append to the current line,
/// `\n` starts a new one and `\r` is ignored. Every line ever written is
/// retained, so the viewport top is simply `lines - rows`.
pub struct LineEngine {
    lines: Vec<String>,
    rows: u16,
    disposed: bool,
}

impl LineEngine {
    pub fn new(rows: u16) -> Self {
        Self {
            lines: vec![String::new()],
            rows,
            disposed: false,
        }
    }
}

impl TerminalEngine for LineEngine {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.disposed {
            bail!("engine disposed");
        }
        for ch in String::from_utf8_lossy(data).chars() {
            match ch {
                '\n' => self.lines.push(String::new()),
                '\r' => {}
                c => self.lines.last_mut().unwrap().push(c),
            }
        }
        Ok(())
    }

    fn resize(&mut self, _cols: u16, rows: u16) {
        self.rows = rows;
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.lines.clear();
    }

    fn line(&mut self, row: usize) -> Option<Vec<CellData>> {
        let line = self.lines.get(row)?;
        Some(line.chars().map(|c| CellData::plain(c.to_string())).collect())
    }

    fn cursor(&self) -> EngineCursor {
        let y = self.lines.len().saturating_sub(1);
        let x = self.lines.last().map(|l| l.chars().count()).unwrap_or(0);
        EngineCursor {
            x: x as u16,
            y,
            visible: true,
        }
    }

    fn baseline(&self) -> usize {
        self.lines.len().saturating_sub(usize::from(self.rows))
    }
}

pub struct LineEngineFactory;

impl EngineFactory for LineEngineFactory {
    fn create(&self, _cols: u16, rows: u16, _scrollback: usize) -> Box<dyn TerminalEngine> {
        Box::new(LineEngine::new(rows))
    }
}

pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub bridge: Arc<FakeBridge>,
}

impl Harness {
    pub fn new(history_limit: usize) -> Self {
        Self::with_bridge(history_limit, FakeBridge::default())
    }

    pub fn with_bridge(history_limit: usize, bridge: FakeBridge) -> Self {
        Self::build(history_limit, bridge, Arc::new(LineEngineFactory))
    }

    /// Harness whose sessions interpret output with the real vt100 engine
    pub fn with_vt100(history_limit: usize) -> Self {
        Self::build(history_limit, FakeBridge::default(), Arc::new(Vt100EngineFactory))
    }

    fn build(history_limit: usize, bridge: FakeBridge, engines: Arc<dyn EngineFactory>) -> Self {
        let bridge = Arc::new(bridge);
        let settings = ManagerSettings {
            history_limit,
            debounce: Duration::from_millis(50),
        };
        let manager = Arc::new(SessionManager::with_backends(settings, bridge.clone(), engines));
        Self { manager, bridge }
    }

    pub async fn spawn(&self, command: &str) -> (SessionId, Arc<FakeProcess>) {
        let request = CreateSessionRequest {
            command: command.to_string(),
            ..Default::default()
        };
        let id = self.manager.create_session(request).await.unwrap();
        (id, self.bridge.last())
    }

    pub async fn attach(&self, session_id: &SessionId) -> Viewer {
        let (tx, rx) = mpsc::unbounded_channel();
        let client_id = Uuid::new_v4();
        self.manager
            .attach_client(session_id, client_id, tx)
            .await
            .unwrap();
        Viewer { client_id, rx }
    }
}

/// The receiving end of a connection, without a socket
pub struct Viewer {
    pub client_id: ClientId,
    pub rx: mpsc::UnboundedReceiver<Outbound>,
}

impl Viewer {
    /// Next queued frame, parsed. `None` if nothing is queued.
    pub fn next_frame(&mut self) -> Option<Value> {
        match self.rx.try_recv().ok()? {
            Outbound::Frame(text) => Some(serde_json::from_str(&text).unwrap()),
            Outbound::Close => Some(Value::String("close".into())),
        }
    }

    /// Drain every queued frame
    pub fn drain(&mut self) -> Vec<Value> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }
}

/// Plain text of a row's segments
pub fn row_text(row: &Value) -> String {
    row["segs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|seg| seg[0].as_str().unwrap().to_string())
        .collect()
}

/// Let the session tasks run and the paused clock move forward
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
