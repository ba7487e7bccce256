use anyhow::Result;
use std::collections::VecDeque;
use vt100::{Color, Parser};

use super::backend::{CellData, EngineCursor, EngineFactory, TerminalEngine};
use super::MAX_ROWS;

/// Terminal screen state buffer backed by a VT100 parser.
///
/// vt100 keeps no running count of scrolled lines and can only show
/// scrollback one screen deep, so the buffer copies every line that scrolls
/// off into its own bounded store and keeps a monotonic `scrolled` total.
/// Absolute rows below `scrolled` are read from that store, rows from
/// `scrolled` on are the visible screen.
pub struct ScreenBuffer {
    parser: Parser,
    scrollback: VecDeque<Vec<CellData>>,
    scrollback_lines: usize,
    cols: u16,
    rows: u16,
    scrolled: usize,
    disposed: bool,
}

impl ScreenBuffer {
    /// Create a new screen buffer
    pub fn new(cols: u16, rows: u16, scrollback_lines: usize) -> Self {
        // One byte scrolls at most a screen, so the parser only needs
        // enough scrollback to stage a single byte's worth of lines
        let staging = usize::from(rows.max(MAX_ROWS)) + 1;
        Self {
            parser: Parser::new(rows, cols, staging),
            scrollback: VecDeque::new(),
            scrollback_lines,
            cols,
            rows,
            scrolled: 0,
            disposed: false,
        }
    }

    fn staged_len(&mut self) -> usize {
        self.parser.set_scrollback(usize::MAX);
        let len = self.parser.screen().scrollback();
        self.parser.set_scrollback(0);
        len
    }

    /// Feed one byte on the main screen and return how many lines it pushed
    /// into the parser's scrollback.
    ///
    /// The view offset is parked at 1 while processing: vt100 bumps a
    /// non-zero offset for every line pushed, which still counts lines once
    /// the staging area is full and starts evicting.
    fn process_main(&mut self, byte: &[u8]) -> usize {
        let staged = self.staged_len();
        self.parser.set_scrollback(1);
        self.parser.process(byte);

        if self.parser.screen().alternate_screen() {
            return 0;
        }

        let offset = self.parser.screen().scrollback();
        self.parser.set_scrollback(0);
        if staged == 0 {
            self.staged_len()
        } else {
            offset.saturating_sub(1)
        }
    }

    /// Copy the `pushed` newest staged lines into the store, oldest first
    fn harvest(&mut self, pushed: usize) {
        for depth in (1..=pushed).rev() {
            self.parser.set_scrollback(depth);
            let cells = self.read_visible_row(0);
            self.scrollback.push_back(cells);
            if self.scrollback.len() > self.scrollback_lines {
                self.scrollback.pop_front();
            }
        }
        self.parser.set_scrollback(0);
        self.scrolled += pushed;
    }

    fn read_cell(cell: &vt100::Cell) -> CellData {
        let width = if cell.is_wide_continuation() {
            0
        } else if cell.is_wide() {
            2
        } else {
            1
        };

        CellData {
            contents: cell.contents(),
            width,
            fg: color_code(cell.fgcolor()),
            bg: color_code(cell.bgcolor()),
            bold: cell.bold(),
            italic: cell.italic(),
            underline: cell.underline(),
            inverse: cell.inverse(),
        }
    }

    fn read_visible_row(&self, row: u16) -> Vec<CellData> {
        let screen = self.parser.screen();
        (0..self.cols)
            .map(|col| {
                screen
                    .cell(row, col)
                    .map(Self::read_cell)
                    .unwrap_or_else(|| CellData::plain(""))
            })
            .collect()
    }
}

fn color_code(color: Color) -> Option<u32> {
    match color {
        Color::Default => None,
        Color::Idx(idx) => Some(u32::from(idx)),
        Color::Rgb(r, g, b) => {
            Some(0x0100_0000 | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b))
        }
    }
}

impl TerminalEngine for ScreenBuffer {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.disposed {
            anyhow::bail!("screen buffer already disposed");
        }
        for byte in data.chunks(1) {
            if self.parser.screen().alternate_screen() {
                self.parser.process(byte);
                // Back on the main screen with the offset still parked
                if !self.parser.screen().alternate_screen() {
                    self.parser.set_scrollback(0);
                }
                continue;
            }

            let pushed = self.process_main(byte);
            if pushed > 0 {
                self.harvest(pushed);
            }
        }
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
        self.parser.set_size(rows, cols);
    }

    fn dispose(&mut self) {
        self.disposed = true;
        // Drop the grid and scrollback now; the session may outlive us briefly
        self.parser = Parser::new(1, 1, 0);
        self.scrollback = VecDeque::new();
    }

    fn line(&mut self, row: usize) -> Option<Vec<CellData>> {
        if self.disposed {
            return None;
        }

        let baseline = self.baseline();
        if row >= baseline {
            let visible = u16::try_from(row - baseline).ok()?;
            return (visible < self.rows).then(|| self.read_visible_row(visible));
        }

        let oldest = self.scrolled - self.scrollback.len();
        row.checked_sub(oldest)
            .and_then(|index| self.scrollback.get(index))
            .cloned()
    }

    fn cursor(&self) -> EngineCursor {
        let screen = self.parser.screen();
        let (row, col) = screen.cursor_position();
        EngineCursor {
            x: col,
            y: self.baseline() + usize::from(row),
            visible: !screen.hide_cursor(),
        }
    }

    fn baseline(&self) -> usize {
        if self.parser.screen().alternate_screen() {
            0
        } else {
            self.scrolled
        }
    }
}

/// Builds [`ScreenBuffer`] engines
#[derive(Debug, Clone, Copy, Default)]
pub struct Vt100EngineFactory;

impl EngineFactory for Vt100EngineFactory {
    fn create(&self, cols: u16, rows: u16, scrollback: usize) -> Box<dyn TerminalEngine> {
        Box::new(ScreenBuffer::new(cols, rows, scrollback))
    }
}
