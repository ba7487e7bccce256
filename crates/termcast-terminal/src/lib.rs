// Terminal streaming primitives
//
// This crate holds the pieces a session needs to turn a live pseudo-terminal
// into a stream of compact screen updates: the process and screen collaborators
// (PTY spawning, VT100 interpretation), style interning, row extraction, and
// the bounded scrollback history that viewers page through.

pub mod backend;
pub mod command;
pub mod extract;
pub mod history;
mod pty_backend;
mod screen_buffer;
pub mod style_registry;

// Re-export public API
pub use backend::{
    CellData, EngineCursor, EngineFactory, ExitInfo, ProcessBridge, ProcessEvent, ProcessHandle,
    SpawnRequest, SpawnedProcess, TerminalEngine,
};
pub use command::{resolve_command, ResolvedCommand};
pub use extract::{extract_visible_rows, row_to_segments, Row, Segment, VisibleRows};
pub use history::{HistoryLine, HistoryPage, HistoryRing};
pub use pty_backend::PtyBridge;
pub use screen_buffer::{ScreenBuffer, Vt100EngineFactory};
pub use style_registry::{StyleDefinition, StyleId, StyleRegistry};

// Constants
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 25;
pub const MAX_COLS: u16 = 500;
pub const MAX_ROWS: u16 = 300;
pub const DEFAULT_SCROLLBACK_LINES: usize = 1000;
/// Upper bound on a single history page.
pub const MAX_HISTORY_PAGE: usize = 200;
