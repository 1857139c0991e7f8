use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapLogSettings {
    /// Output file; the log is disabled when absent.
    pub path: Option<PathBuf>,
    pub interval_ms: u64,
    /// Seed the log from an existing file at start.
    pub resume: bool,
    /// Grid cell edge in relative position units.
    pub cell_size: i32,
}

impl Default for MapLogSettings {
    fn default() -> Self {
        Self { path: None, interval_ms: 10_000, resume: false, cell_size: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitedCell {
    pub x: i32,
    pub y: i32,
    pub visits: u32,
    pub first_seen: DateTime<Local>,
    pub last_seen: DateTime<Local>,
}

#[derive(Serialize, Deserialize)]
struct LogFile {
    cell_size: i32,
    cells: Vec<VisitedCell>,
}

/// Grid of visited cells. A visit counts when the position enters a cell
/// other than the current one, so standing still is one visit.
#[derive(Debug, Clone)]
pub struct VisitedLog {
    cell_size: i32,
    cells: BTreeMap<(i32, i32), VisitedCell>,
    current: Option<(i32, i32)>,
}

impl VisitedLog {
    pub fn new(cell_size: i32) -> Self {
        Self { cell_size: cell_size.max(1), cells: BTreeMap::new(), current: None }
    }

    pub fn record(&mut self, x: i32, y: i32, now: DateTime<Local>) {
        let key = (x.div_euclid(self.cell_size), y.div_euclid(self.cell_size));
        match self.cells.get_mut(&key) {
            Some(cell) => {
                cell.last_seen = now;
                if self.current != Some(key) {
                    cell.visits += 1;
                }
            }
            None => {
                self.cells.insert(key, VisitedCell { x: key.0, y: key.1, visits: 1, first_seen: now, last_seen: now });
            }
        }
        self.current = Some(key);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, x: i32, y: i32) -> Option<&VisitedCell> {
        self.cells.get(&(x, y))
    }

    /// Write to `path` via a sibling temp file and a rename.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = LogFile { cell_size: self.cell_size, cells: self.cells.values().cloned().collect() };
        let json = serde_json::to_string_pretty(&file)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let file: LogFile = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let mut log = Self::new(file.cell_size);
        log.cells = file.cells.into_iter().map(|c| ((c.x, c.y), c)).collect();
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visits_count_cell_transitions() {
        let now = Local::now();
        let mut log = VisitedLog::new(64);
        log.record(0, 0, now);
        log.record(10, 20, now);
        log.record(70, 0, now);
        log.record(-1, 0, now);
        log.record(5, 5, now);
        assert_eq!(log.len(), 3);
        assert_eq!(log.cell(0, 0).unwrap().visits, 2);
        assert_eq!(log.cell(1, 0).unwrap().visits, 1);
        assert_eq!(log.cell(-1, 0).unwrap().visits, 1);
    }

    #[test]
    fn saves_atomically_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maps").join("visited.json");
        let mut log = VisitedLog::new(32);
        log.record(100, -40, Local::now());
        log.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = VisitedLog::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.cell(3, -2).unwrap().visits, 1);
        assert!(VisitedLog::load(&dir.path().join("missing.json")).is_err());
    }
}
