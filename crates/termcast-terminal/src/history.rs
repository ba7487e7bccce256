use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::extract::Segment;
use super::MAX_HISTORY_PAGE;

const CURSOR_PREFIX: &str = "h-";

/// A line that scrolled out of the viewport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLine {
    pub cursor: String,
    pub segs: Vec<Segment>,
}

/// One page of history, oldest line first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub lines: Vec<HistoryLine>,
    pub next_before: String,
    pub exhausted: bool,
}

/// Fixed-capacity FIFO of scrolled-off lines with cursor pagination.
///
/// Every pushed line gets the next value of a counter that starts at 1 and
/// never goes back, so cursors stay ordered across evictions and clears.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    capacity: usize,
    items: VecDeque<(u64, Vec<Segment>)>,
    counter: u64,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.min(4096)),
            counter: 1,
        }
    }

    pub fn push(&mut self, segs: Vec<Segment>) {
        self.items.push_back((self.counter, segs));
        self.counter += 1;
        if self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cursor one past the newest line; fetching with it returns the most
    /// recent lines
    pub fn newest_cursor(&self) -> String {
        make_cursor(self.counter)
    }

    /// Up to `limit` lines strictly older than `before`, oldest first.
    ///
    /// A cursor at or below the oldest retained line (stale, or a first call
    /// with a zero watermark) is treated as "now".
    pub fn fetch(&self, before: &str, limit: usize) -> HistoryPage {
        let before = parse_cursor(before);
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        let oldest = self.items.front().map(|(n, _)| *n).unwrap_or(u64::MAX);
        let boundary = if before <= oldest { self.counter } else { before };

        let matched = self.items.iter().filter(|(n, _)| *n < boundary).count();
        let lines: Vec<HistoryLine> = self
            .items
            .iter()
            .filter(|(n, _)| *n < boundary)
            .skip(matched.saturating_sub(limit))
            .map(|(n, segs)| HistoryLine {
                cursor: make_cursor(*n),
                segs: segs.clone(),
            })
            .collect();

        match lines.first() {
            Some(first) => HistoryPage {
                next_before: first.cursor.clone(),
                exhausted: matched <= lines.len(),
                lines,
            },
            None => HistoryPage {
                lines,
                next_before: make_cursor(boundary),
                exhausted: matched == 0,
            },
        }
    }
}

fn make_cursor(n: u64) -> String {
    format!("{CURSOR_PREFIX}{n}")
}

fn parse_cursor(cursor: &str) -> u64 {
    cursor
        .strip_prefix(CURSOR_PREFIX)
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}
