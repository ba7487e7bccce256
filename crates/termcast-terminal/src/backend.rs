/// Collaborator seams: the process bridge and the terminal engine
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Everything needed to start a child process on a pseudo-terminal
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    pub cwd: Option<PathBuf>,
    /// Merged on top of the inherited environment
    pub env: HashMap<String, String>,
}

/// How a child process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: i32,
    pub signal: Option<String>,
}

/// Events reported by a running process, in the order they happened.
///
/// A single channel carries both kinds so that every `Output` chunk is
/// observed before the final `Exit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output(Vec<u8>),
    Exit(ExitInfo),
}

/// Control half of a spawned process
pub trait ProcessHandle: Send {
    /// Forward raw bytes to the process input, unmodified.
    ///
    /// Called with the session lock held, so it must queue rather than wait
    /// for the process to read.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()>;

    fn kill(&mut self) -> Result<()>;
}

/// A freshly spawned process: its control handle plus its event stream
pub struct SpawnedProcess {
    pub handle: Box<dyn ProcessHandle>,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

/// Spawns processes attached to a pseudo-terminal
pub trait ProcessBridge: Send + Sync {
    fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess>;

    /// Get bridge name for debugging
    fn bridge_name(&self) -> &str;
}

/// One character cell as read from the engine.
///
/// `width` is 0 for the trailing half of a wide character, 2 for the leading
/// half, 1 otherwise. Colors are palette indexes (0..=255) or
/// `0x0100_0000 | rgb` for true color.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellData {
    pub contents: String,
    pub width: u8,
    pub fg: Option<u32>,
    pub bg: Option<u32>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub inverse: bool,
}

impl CellData {
    /// A plain single-width cell with default styling
    pub fn plain(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            width: 1,
            ..Self::default()
        }
    }
}

/// Cursor as reported by the engine; `y` is an absolute buffer row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineCursor {
    pub x: u16,
    pub y: usize,
    pub visible: bool,
}

/// Screen state interpreter (escape-sequence parsing lives behind this trait).
///
/// Rows are addressed in absolute buffer coordinates: the visible viewport
/// starts at `baseline()`, rows below it are scrollback.
pub trait TerminalEngine: Send {
    /// Apply a chunk of process output. Chunks must be applied one at a time
    /// in arrival order.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    fn resize(&mut self, cols: u16, rows: u16);

    /// Release engine resources; further reads return nothing
    fn dispose(&mut self);

    /// Cells of an absolute row, or `None` if the row is not retained
    fn line(&mut self, row: usize) -> Option<Vec<CellData>>;

    fn cursor(&self) -> EngineCursor;

    /// Absolute row index of the top of the visible viewport
    fn baseline(&self) -> usize;
}

/// Builds engines for new sessions
pub trait EngineFactory: Send + Sync {
    fn create(&self, cols: u16, rows: u16, scrollback: usize) -> Box<dyn TerminalEngine>;
}
