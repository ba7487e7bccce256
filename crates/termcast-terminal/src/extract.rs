//! Row extraction: turns engine cells into run-length encoded segments.

use serde::{Deserialize, Serialize};

use super::backend::{CellData, TerminalEngine};
use super::style_registry::{StyleId, StyleRegistry};

/// A run of same-styled text, serialized as `[text, styleId]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment(pub String, pub StyleId);

impl Segment {
    pub fn new(text: impl Into<String>, style: StyleId) -> Self {
        Self(text.into(), style)
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    pub fn style(&self) -> StyleId {
        self.1
    }

    /// The blank-row sentinel
    pub fn blank() -> Self {
        Self(String::new(), 0)
    }
}

/// A viewport row: its index plus its segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub y: usize,
    pub segs: Vec<Segment>,
}

/// Visible rows plus the per-row comparison signatures
#[derive(Debug, Clone, Default)]
pub struct VisibleRows {
    pub rows: Vec<Row>,
    pub signatures: Vec<String>,
}

/// Convert one row of cells into segments.
///
/// Wide-character continuation cells are skipped, empty cells read as a
/// space, trailing whitespace is trimmed. A blank row yields exactly one
/// empty segment with style 0.
pub fn row_to_segments(
    row: Option<&[CellData]>,
    width: u16,
    styles: &mut StyleRegistry,
) -> Vec<Segment> {
    let Some(cells) = row else {
        return vec![Segment::blank()];
    };

    let mut segs: Vec<Segment> = Vec::new();
    let mut current: Option<Segment> = None;

    for x in 0..usize::from(width) {
        let cell = cells.get(x);
        if cell.map(|c| c.width) == Some(0) {
            continue;
        }

        let text = match cell {
            Some(c) if !c.contents.is_empty() => c.contents.as_str(),
            _ => " ",
        };
        let style = styles.intern_cell_style(cell);

        match current.as_mut() {
            Some(seg) if seg.1 == style => seg.0.push_str(text),
            _ => {
                if let Some(seg) = current.take() {
                    segs.push(seg);
                }
                current = Some(Segment::new(text, style));
            }
        }
    }

    if let Some(seg) = current {
        segs.push(seg);
    }

    trim_trailing_whitespace(segs)
}

fn trim_trailing_whitespace(mut segs: Vec<Segment>) -> Vec<Segment> {
    while let Some(last) = segs.last_mut() {
        let trimmed_len = last.0.trim_end().len();
        if trimmed_len == 0 {
            segs.pop();
            continue;
        }
        last.0.truncate(trimmed_len);
        break;
    }

    if segs.is_empty() {
        segs.push(Segment::blank());
    }
    segs
}

/// Comparison key for a row; never sent to viewers
pub fn row_signature(segs: &[Segment]) -> String {
    segs.iter()
        .map(|seg| format!("{}:{}", seg.1, seg.0))
        .collect::<Vec<_>>()
        .join("|")
}

/// Extract every row of the visible viewport along with its signature
pub fn extract_visible_rows(
    engine: &mut dyn TerminalEngine,
    width: u16,
    height: u16,
    styles: &mut StyleRegistry,
) -> VisibleRows {
    let start = engine.baseline();
    let mut visible = VisibleRows {
        rows: Vec::with_capacity(usize::from(height)),
        signatures: Vec::with_capacity(usize::from(height)),
    };

    for y in 0..usize::from(height) {
        let cells = engine.line(start + y);
        let segs = row_to_segments(cells.as_deref(), width, styles);
        visible.signatures.push(row_signature(&segs));
        visible.rows.push(Row { y, segs });
    }

    visible
}
