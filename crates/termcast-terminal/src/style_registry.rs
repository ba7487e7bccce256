use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::backend::CellData;

/// Dense per-session style identifier
pub type StyleId = u32;

/// A visual attribute combination. Id 0 is always the default style.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StyleDefinition {
    pub fg: Option<u32>,
    pub bg: Option<u32>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub inverse: bool,
}

impl StyleDefinition {
    fn of_cell(cell: &CellData) -> Self {
        Self {
            fg: cell.fg,
            bg: cell.bg,
            bold: cell.bold,
            italic: cell.italic,
            underline: cell.underline,
            inverse: cell.inverse,
        }
    }
}

/// Interns the distinct styles seen in a session into sequential ids.
///
/// Ids are handed out in first-seen order and never removed, so a viewer can
/// cache the table and only ever needs additions.
#[derive(Debug, Clone)]
pub struct StyleRegistry {
    by_key: HashMap<StyleDefinition, StyleId>,
    styles: Vec<StyleDefinition>,
}

impl Default for StyleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StyleRegistry {
    pub fn new() -> Self {
        let default = StyleDefinition::default();
        let mut by_key = HashMap::new();
        by_key.insert(default.clone(), 0);

        Self {
            by_key,
            styles: vec![default],
        }
    }

    /// Get the id for a cell's style, allocating one on first sight.
    /// A missing cell maps to the default style.
    pub fn intern_cell_style(&mut self, cell: Option<&CellData>) -> StyleId {
        match cell {
            Some(cell) => self.intern(StyleDefinition::of_cell(cell)),
            None => 0,
        }
    }

    pub fn intern(&mut self, def: StyleDefinition) -> StyleId {
        if let Some(&id) = self.by_key.get(&def) {
            return id;
        }

        let id = self.styles.len() as StyleId;
        self.by_key.insert(def.clone(), id);
        self.styles.push(def);
        id
    }

    pub fn get(&self, id: StyleId) -> Option<&StyleDefinition> {
        self.styles.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    /// The complete id -> definition table
    pub fn snapshot(&self) -> BTreeMap<StyleId, StyleDefinition> {
        self.styles
            .iter()
            .enumerate()
            .map(|(id, def)| (id as StyleId, def.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red_bold() -> CellData {
        CellData {
            contents: "x".into(),
            width: 1,
            fg: Some(1),
            bold: true,
            ..CellData::default()
        }
    }

    #[test]
    fn default_style_is_zero() {
        let mut registry = StyleRegistry::new();
        assert_eq!(registry.intern_cell_style(Some(&CellData::plain("a"))), 0);
        assert_eq!(registry.intern_cell_style(None), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn interning_is_idempotent() {
        let mut registry = StyleRegistry::new();
        let first = registry.intern_cell_style(Some(&red_bold()));
        let mut other = red_bold();
        other.contents = "y".into();
        let second = registry.intern_cell_style(Some(&other));

        assert_eq!(first, 1);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn ids_follow_first_seen_order() {
        let mut registry = StyleRegistry::new();
        let underline = CellData {
            underline: true,
            ..CellData::plain("u")
        };
        let inverse = CellData {
            inverse: true,
            ..CellData::plain("i")
        };

        assert_eq!(registry.intern_cell_style(Some(&underline)), 1);
        assert_eq!(registry.intern_cell_style(Some(&inverse)), 2);
        assert_eq!(registry.intern_cell_style(Some(&underline)), 1);
    }

    #[test]
    fn snapshot_contains_every_style() {
        let mut registry = StyleRegistry::new();
        registry.intern_cell_style(Some(&red_bold()));

        let table = registry.snapshot();
        assert_eq!(table.len(), 2);
        assert_eq!(table[&0], StyleDefinition::default());
        assert_eq!(table[&1].fg, Some(1));
        assert!(table[&1].bold);

        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["0"]["fg"], serde_json::Value::Null);
        assert_eq!(json["1"]["bold"], true);
    }
}
