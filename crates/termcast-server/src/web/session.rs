//! Per-session screen state: output application, history capture and change
//! detection.

use anyhow::Result;
use termcast_terminal::{
    extract_visible_rows, row_to_segments, HistoryRing, ProcessHandle, StyleRegistry,
    TerminalEngine, MAX_COLS, MAX_ROWS,
};

use super::protocol::{
    now_millis, ChunkLine, CursorState, HistoryMeta, ServerMessage, SessionStatus, TermSize,
};

/// Clamp a requested dimension, falling back when it is not a finite number
pub fn clamp_dimension(value: Option<f64>, fallback: u16, max: u16) -> u16 {
    match value {
        Some(v) if v.is_finite() => v.floor().clamp(1.0, f64::from(max)) as u16,
        _ => fallback,
    }
}

pub fn clamp_cols(value: Option<f64>, fallback: u16) -> u16 {
    clamp_dimension(value, fallback, MAX_COLS)
}

pub fn clamp_rows(value: Option<f64>, fallback: u16) -> u16 {
    clamp_dimension(value, fallback, MAX_ROWS)
}

/// Mutable state of one session, guarded by the session's lock
pub struct SessionState {
    engine: Box<dyn TerminalEngine>,
    process: Box<dyn ProcessHandle>,
    styles: StyleRegistry,
    history: HistoryRing,
    cols: u16,
    rows: u16,
    status: SessionStatus,
    seq: u64,
    last_signatures: Vec<String>,
    last_cursor: CursorState,
    last_baseline: usize,
    disposed: bool,
}

impl SessionState {
    pub fn new(
        mut engine: Box<dyn TerminalEngine>,
        process: Box<dyn ProcessHandle>,
        cols: u16,
        rows: u16,
        history_limit: usize,
    ) -> Self {
        let mut styles = StyleRegistry::new();
        let visible = extract_visible_rows(engine.as_mut(), cols, rows, &mut styles);
        let last_baseline = engine.baseline();
        let last_cursor = cursor_of(engine.as_ref());

        Self {
            engine,
            process,
            styles,
            history: HistoryRing::new(history_limit),
            cols,
            rows,
            status: SessionStatus::Running,
            seq: 0,
            last_signatures: visible.signatures,
            last_cursor,
            last_baseline,
            disposed: false,
        }
    }

    pub fn size(&self) -> TermSize {
        TermSize {
            cols: self.cols,
            rows: self.rows,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn mark_exited(&mut self) {
        self.status = SessionStatus::Exited;
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Apply one output chunk to the engine, then pull any lines that
    /// scrolled off into history.
    pub fn apply_output(&mut self, data: &[u8]) -> Result<()> {
        self.engine.write(data)?;
        self.capture_history();
        Ok(())
    }

    fn capture_history(&mut self) {
        let baseline = self.engine.baseline();

        if baseline < self.last_baseline {
            // Alternate screen or a reset: the old scrollback no longer lines up
            self.history.clear();
            self.last_baseline = baseline;
            return;
        }

        if baseline == self.last_baseline {
            return;
        }

        // Anything older than the last `capacity` rows would be evicted anyway
        let start = self
            .last_baseline
            .max(baseline.saturating_sub(self.history.capacity()));
        for row in start..baseline {
            // Unreadable rows still take a slot so numbering stays aligned
            let cells = self.engine.line(row);
            let segs = row_to_segments(cells.as_deref(), self.cols, &mut self.styles);
            self.history.push(segs);
        }

        self.last_baseline = baseline;
    }

    /// Diff the viewport against the last emitted state.
    ///
    /// Returns a patch with only the changed rows, or `None` if neither rows
    /// nor cursor moved. The stored baseline is updated either way.
    pub fn compute_change(&mut self) -> Option<ServerMessage> {
        if self.disposed {
            return None;
        }

        let visible = extract_visible_rows(self.engine.as_mut(), self.cols, self.rows, &mut self.styles);
        let cursor = cursor_of(self.engine.as_ref());

        let changed: Vec<_> = visible
            .rows
            .into_iter()
            .zip(&visible.signatures)
            .enumerate()
            .filter(|(index, (_, signature))| self.last_signatures.get(*index) != Some(*signature))
            .map(|(_, (row, _))| row)
            .collect();
        let cursor_changed = cursor != self.last_cursor;

        self.last_signatures = visible.signatures;
        self.last_cursor = cursor;

        if changed.is_empty() && !cursor_changed {
            return None;
        }

        self.seq += 1;
        Some(ServerMessage::Patch {
            seq: self.seq,
            ts: now_millis(),
            cursor,
            styles: self.styles.snapshot(),
            rows: changed,
        })
    }

    /// Dense snapshot of the viewport. Does not touch the diff baseline.
    pub fn full_snapshot(&mut self, advance_seq: bool) -> ServerMessage {
        let visible = extract_visible_rows(self.engine.as_mut(), self.cols, self.rows, &mut self.styles);
        if advance_seq {
            self.seq += 1;
        }

        ServerMessage::Snapshot {
            seq: self.seq,
            ts: now_millis(),
            size: self.size(),
            cursor: cursor_of(self.engine.as_ref()),
            styles: self.styles.snapshot(),
            rows: visible.rows,
            history: HistoryMeta {
                available: self.history.len(),
                newest_cursor: self.history.newest_cursor(),
            },
        }
    }

    /// Resize process and engine, drop history, re-baseline and return a
    /// fresh snapshot with an advanced sequence number.
    pub fn resize(&mut self, cols: Option<f64>, rows: Option<f64>) -> ServerMessage {
        let cols = clamp_cols(cols, self.cols);
        let rows = clamp_rows(rows, self.rows);
        self.cols = cols;
        self.rows = rows;

        let resized = self.process.resize(cols, rows);
        self.engine.resize(cols, rows);

        self.history.clear();
        self.last_baseline = self.engine.baseline();
        let visible = extract_visible_rows(self.engine.as_mut(), cols, rows, &mut self.styles);
        self.last_signatures = visible.signatures;
        self.last_cursor = cursor_of(self.engine.as_ref());

        // An exited process cannot be resized; the snapshot is still valid
        if let Err(e) = resized {
            tracing::debug!(error = %e, "PTY resize failed");
        }
        self.full_snapshot(true)
    }

    pub fn history_chunk(&self, req_id: String, before: &str, limit: f64) -> ServerMessage {
        let limit = if limit.is_finite() { limit.max(0.0) as usize } else { 1 };
        let page = self.history.fetch(before, limit);

        ServerMessage::HistoryChunk {
            req_id,
            lines: page
                .lines
                .into_iter()
                .map(|line| ChunkLine { segs: line.segs })
                .collect(),
            next_before: page.next_before,
            exhausted: page.exhausted,
        }
    }

    pub fn write_input(&mut self, data: &[u8]) -> Result<()> {
        self.process.write(data)
    }

    pub fn kill(&mut self) -> Result<()> {
        self.process.kill()
    }

    /// Release the engine. Idempotent.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.engine.dispose();
        }
    }
}

fn cursor_of(engine: &dyn TerminalEngine) -> CursorState {
    let cursor = engine.cursor();
    CursorState {
        x: cursor.x,
        y: cursor.y.saturating_sub(engine.baseline()),
        visible: cursor.visible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use termcast_terminal::{CellData, EngineCursor, ScreenBuffer};

    /// Engine with directly settable content and viewport top
    #[derive(Default)]
    struct StubEngine {
        lines: Vec<String>,
        top: usize,
        cursor: EngineCursor,
        unreadable: Vec<usize>,
    }

    impl TerminalEngine for StubEngine {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            // "+" scrolls one line into history, anything else replaces the
            // top visible row
            let text = String::from_utf8_lossy(data).to_string();
            if text.is_empty() {
                return Ok(());
            }
            if text == "+" {
                self.top += 1;
            } else if text == "alt" {
                self.top = 0;
            } else {
                while self.lines.len() <= self.top {
                    self.lines.push(String::new());
                }
                self.lines[self.top] = text;
            }
            Ok(())
        }

        fn resize(&mut self, _cols: u16, _rows: u16) {}

        fn dispose(&mut self) {
            self.lines.clear();
        }

        fn line(&mut self, row: usize) -> Option<Vec<CellData>> {
            if self.unreadable.contains(&row) {
                return None;
            }
            let line = self.lines.get(row).cloned().unwrap_or_else(|| format!("old {row}"));
            Some(line.chars().map(|c| CellData::plain(c.to_string())).collect())
        }

        fn cursor(&self) -> EngineCursor {
            self.cursor
        }

        fn baseline(&self) -> usize {
            self.top
        }
    }

    struct NullProcess;

    impl ProcessHandle for NullProcess {
        fn write(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn resize(&mut self, _cols: u16, _rows: u16) -> Result<()> {
            anyhow::bail!("process has exited")
        }

        fn kill(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn state(history_limit: usize) -> SessionState {
        SessionState::new(
            Box::new(StubEngine::default()),
            Box::new(NullProcess),
            10,
            3,
            history_limit,
        )
    }

    #[test]
    fn clamps_requested_dimensions() {
        assert_eq!(clamp_cols(Some(120.7), 80), 120);
        assert_eq!(clamp_cols(Some(0.0), 80), 1);
        assert_eq!(clamp_cols(Some(-4.0), 80), 1);
        assert_eq!(clamp_cols(Some(1e9), 80), MAX_COLS);
        assert_eq!(clamp_rows(Some(f64::INFINITY), 25), 25);
        assert_eq!(clamp_rows(None, 25), 25);
    }

    #[test]
    fn unchanged_screen_has_no_patch_and_keeps_seq() {
        let mut state = state(10);
        assert!(state.compute_change().is_none());
        assert_eq!(state.seq(), 0);

        state.apply_output(b"hey").unwrap();
        let Some(ServerMessage::Patch { seq, rows, .. }) = state.compute_change() else {
            panic!("expected a patch");
        };
        assert_eq!(seq, 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].y, 0);
        assert_eq!(rows[0].segs[0].text(), "hey");

        assert!(state.compute_change().is_none());
        assert_eq!(state.seq(), 1);
    }

    #[test]
    fn snapshot_leaves_diff_baseline_alone() {
        let mut state = state(10);
        state.apply_output(b"hey").unwrap();

        let snapshot = state.full_snapshot(true);
        assert_eq!(snapshot.seq(), Some(1));
        // Without advancing, the snapshot repeats the current number
        assert_eq!(state.full_snapshot(false).seq(), Some(1));

        let patch = state.compute_change().expect("change still pending");
        assert_eq!(patch.seq(), Some(2));
    }

    #[test]
    fn cursor_visibility_alone_is_a_change() {
        let mut engine = StubEngine::default();
        engine.cursor.visible = true;
        let mut state = SessionState::new(Box::new(engine), Box::new(NullProcess), 10, 3, 10);

        // Swap in an engine whose cursor is hidden
        state.engine = Box::new(StubEngine::default());
        let Some(ServerMessage::Patch { rows, cursor, .. }) = state.compute_change() else {
            panic!("expected a patch");
        };
        assert!(rows.is_empty());
        assert!(!cursor.visible);
    }

    #[test]
    fn scrolled_lines_enter_history() {
        let mut state = state(10);
        state.apply_output(b"+").unwrap();
        state.apply_output(b"+").unwrap();

        assert_eq!(state.history().len(), 2);
        assert_eq!(state.history().newest_cursor(), "h-3");

        let ServerMessage::HistoryChunk { lines, exhausted, .. } =
            state.history_chunk("q".into(), "h-3", 10.0)
        else {
            panic!("expected a history chunk");
        };
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].segs[0].text(), "old 0");
        assert!(exhausted);
    }

    #[test]
    fn large_jump_only_walks_retained_rows() {
        let mut state = state(3);
        for _ in 0..8 {
            state.engine.as_mut().write(b"+").unwrap();
        }
        state.apply_output(b"").unwrap();

        assert_eq!(state.history().len(), 3);
        let ServerMessage::HistoryChunk { lines, .. } =
            state.history_chunk("q".into(), "", 10.0)
        else {
            panic!("expected a history chunk");
        };
        let texts: Vec<_> = lines.iter().map(|l| l.segs[0].text().to_string()).collect();
        assert_eq!(texts, vec!["old 5", "old 6", "old 7"]);
    }

    #[test]
    fn unreadable_rows_become_blank_history_lines() {
        let engine = StubEngine {
            unreadable: vec![1],
            ..Default::default()
        };
        let mut state = SessionState::new(Box::new(engine), Box::new(NullProcess), 10, 3, 10);
        for _ in 0..3 {
            state.apply_output(b"+").unwrap();
        }

        assert_eq!(state.history().len(), 3);
        let ServerMessage::HistoryChunk { lines, .. } =
            state.history_chunk("q".into(), "", 10.0)
        else {
            panic!("expected a history chunk");
        };
        let texts: Vec<_> = lines.iter().map(|l| l.segs[0].text().to_string()).collect();
        assert_eq!(texts, vec!["old 0", "", "old 2"]);
        assert_eq!(lines[1].segs[0].style(), 0);
    }

    #[test]
    fn vt100_burst_taller_than_screen_fills_history() {
        let mut state = SessionState::new(
            Box::new(ScreenBuffer::new(80, 24, 1000)),
            Box::new(NullProcess),
            80,
            24,
            1000,
        );
        let burst: String = (1..=100).map(|i| format!("{i}\r\n")).collect();
        state.apply_output(burst.as_bytes()).unwrap();

        assert_eq!(state.history().len(), 77);
        let ServerMessage::HistoryChunk { lines, exhausted, .. } =
            state.history_chunk("q".into(), "", 100.0)
        else {
            panic!("expected a history chunk");
        };
        assert_eq!(lines.len(), 77);
        assert_eq!(lines[0].segs[0].text(), "1");
        assert_eq!(lines[76].segs[0].text(), "77");
        assert!(exhausted);

        let Some(ServerMessage::Patch { rows, .. }) = state.compute_change() else {
            panic!("expected a patch");
        };
        assert_eq!(rows[0].y, 0);
        assert_eq!(rows[0].segs[0].text(), "78");
    }

    #[test]
    fn baseline_regression_clears_history() {
        let mut state = state(10);
        state.apply_output(b"+").unwrap();
        state.apply_output(b"+").unwrap();
        assert_eq!(state.history().len(), 2);

        state.apply_output(b"alt").unwrap();
        assert!(state.history().is_empty());
    }

    #[test]
    fn resize_survives_process_failure() {
        let mut state = state(10);
        state.apply_output(b"+").unwrap();

        let snapshot = state.resize(Some(40.0), Some(f64::NAN));
        let ServerMessage::Snapshot { size, history, seq, .. } = snapshot else {
            panic!("expected a snapshot");
        };
        assert_eq!(size, TermSize { cols: 40, rows: 3 });
        assert_eq!(history.available, 0);
        assert_eq!(seq, 1);
    }

    #[test]
    fn non_finite_history_limit_reads_one_line() {
        let mut state = state(10);
        state.apply_output(b"+").unwrap();
        state.apply_output(b"+").unwrap();

        let ServerMessage::HistoryChunk { lines, .. } =
            state.history_chunk("q".into(), "h-3", f64::NAN)
        else {
            panic!("expected a history chunk");
        };
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn dispose_is_idempotent_and_silences_changes() {
        let mut state = state(10);
        state.apply_output(b"hey").unwrap();
        state.dispose();
        state.dispose();

        assert!(state.compute_change().is_none());
    }
}
