//! Minimal probe store for scalar measurements.
//!
//! Entities and the status report put samples under a probe name; the store
//! keeps count/sum/min/max per name and is flushed as JSON into the output
//! directory.

use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

/// Summary of all samples put into one probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl ProbeSummary {
    fn first(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
            mean: value,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.mean = self.sum / self.count as f64;
    }
}

/// Shared handle to the run's probe store. Cloning shares the store.
#[derive(Debug, Clone, Default)]
pub struct Probes {
    series: Rc<RefCell<BTreeMap<String, ProbeSummary>>>,
}

impl Probes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: &str, value: f64) {
        let mut series = self.series.borrow_mut();
        match series.get_mut(name) {
            Some(summary) => summary.add(value),
            None => {
                series.insert(name.to_string(), ProbeSummary::first(value));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<ProbeSummary> {
        self.series.borrow().get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.series.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write all probe summaries as pretty JSON to `path`.
    pub fn flush(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(&*self.series.borrow())
            .map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_summary_accumulates() {
        let probes = Probes::new();
        for v in [3.0, 1.0, 5.0] {
            probes.put("delay", v);
        }
        let summary = probes.get("delay").unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
        assert_eq!(summary.mean, 3.0);
        assert!(probes.get("missing").is_none());
    }

    #[test]
    fn test_clones_share_store() {
        let probes = Probes::new();
        let other = probes.clone();
        other.put("x", 1.0);
        assert_eq!(probes.len(), 1);
    }

    #[test]
    fn test_flush_writes_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("probes.json");
        let probes = Probes::new();
        probes.put("arrivals", 2.0);
        probes.flush(&path).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["arrivals"]["count"], 1);
        assert_eq!(parsed["arrivals"]["max"], 2.0);
    }
}
