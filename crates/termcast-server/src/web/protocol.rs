use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use termcast_terminal::{Row, Segment, StyleDefinition, StyleId};
use uuid::Uuid;

/// Session ID type
pub type SessionId = Uuid;

/// Connection ID type
pub type ClientId = Uuid;

/// Wire protocol version carried by every frame
pub const PROTOCOL_VERSION: u8 = 1;

/// Request body for creating a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub cols: Option<f64>,
    #[serde(default)]
    pub rows: Option<f64>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

/// Session information for listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub command: String,
    pub cols: u16,
    pub rows: u16,
    pub created_at: String,
    pub status: SessionStatus,
    pub clients: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Exited,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

/// Cursor position relative to the top of the viewport
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorState {
    pub x: u16,
    pub y: usize,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryMeta {
    pub available: usize,
    pub newest_cursor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkLine {
    pub segs: Vec<Segment>,
}

/// Frame envelope: `{version, session_id, type, ...}`
#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    pub version: u8,
    pub session_id: String,
    #[serde(flatten)]
    pub message: ServerMessage,
}

impl ServerFrame {
    pub fn new(session_id: impl ToString, message: ServerMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            session_id: session_id.to_string(),
            message,
        }
    }

    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "snapshot")]
    Snapshot {
        seq: u64,
        ts: i64,
        size: TermSize,
        cursor: CursorState,
        styles: BTreeMap<StyleId, StyleDefinition>,
        rows: Vec<Row>,
        history: HistoryMeta,
    },
    #[serde(rename = "patch")]
    Patch {
        seq: u64,
        ts: i64,
        cursor: CursorState,
        styles: BTreeMap<StyleId, StyleDefinition>,
        rows: Vec<Row>,
    },
    #[serde(rename = "exit")]
    Exit {
        code: i32,
        signal: Option<String>,
        message: String,
    },
    #[serde(rename = "history.chunk")]
    HistoryChunk {
        req_id: String,
        lines: Vec<ChunkLine>,
        next_before: String,
        exhausted: bool,
    },
    #[serde(rename = "ping")]
    Ping { ts: i64 },
    #[serde(rename = "pong")]
    Pong { ts: i64 },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Snapshot { seq, .. } | Self::Patch { seq, .. } => Some(*seq),
            _ => None,
        }
    }
}

/// Why a client asked for a resync. Informational only: every resync is a
/// full snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResyncReason {
    SeqGap,
    DecodeError,
    ClientBackpressure,
    Manual,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RequestedSize {
    pub cols: f64,
    pub rows: f64,
}

/// Inbound frame envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientFrame {
    pub version: u8,
    pub session_id: String,
    #[serde(flatten)]
    pub message: ClientMessage,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "stdin")]
    Stdin { data: String },
    #[serde(rename = "resize")]
    Resize { req_id: String, size: RequestedSize },
    #[serde(rename = "resync")]
    Resync {
        req_id: String,
        reason: ResyncReason,
        #[serde(default)]
        last_seq: Option<u64>,
    },
    #[serde(rename = "history.get")]
    HistoryGet {
        req_id: String,
        before: String,
        limit: f64,
    },
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        ts: Option<i64>,
    },
    #[serde(rename = "pong")]
    Pong {
        #[serde(default)]
        ts: Option<i64>,
    },
}

/// Why an inbound frame was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid message")]
    Invalid,
    #[error("session mismatch")]
    SessionMismatch,
}

/// Parse and validate an inbound text frame against the bound session
pub fn parse_client_frame(text: &str, bound_session: &str) -> Result<ClientMessage, FrameError> {
    let frame: ClientFrame = serde_json::from_str(text).map_err(|_| FrameError::Invalid)?;
    if frame.version != PROTOCOL_VERSION {
        return Err(FrameError::Invalid);
    }
    if frame.session_id != bound_session {
        return Err(FrameError::SessionMismatch);
    }
    Ok(frame.message)
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
