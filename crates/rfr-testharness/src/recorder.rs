//! ---
//! rfr_section: "05-simulation"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Enter/exit recording of remote write windows per route filter."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use parking_lot::Mutex;
use rfr_core::{FilterKey, RuleKey};
use tokio::time::Instant;

/// One remote write, from submission to terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteWindow {
    pub operation_id: String,
    pub rule: RuleKey,
    pub entered: Instant,
    /// `None` while the operation has not reached a terminal state.
    pub exited: Option<Instant>,
}

impl WriteWindow {
    fn overlaps(&self, other: &WriteWindow) -> bool {
        let self_end = self.exited.unwrap_or_else(Instant::now);
        let other_end = other.exited.unwrap_or_else(Instant::now);
        self.entered < other_end && other.entered < self_end
    }
}

#[derive(Debug, Default)]
pub struct CriticalSectionRecorder {
    windows: Mutex<Vec<WriteWindow>>,
}

impl CriticalSectionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, operation_id: &str, rule: &RuleKey) {
        self.windows.lock().push(WriteWindow {
            operation_id: operation_id.to_owned(),
            rule: rule.clone(),
            entered: Instant::now(),
            exited: None,
        });
    }

    pub fn exit(&self, operation_id: &str) {
        let mut windows = self.windows.lock();
        if let Some(window) = windows
            .iter_mut()
            .find(|window| window.operation_id == operation_id && window.exited.is_none())
        {
            window.exited = Some(Instant::now());
        }
    }

    pub fn windows(&self) -> Vec<WriteWindow> {
        self.windows.lock().clone()
    }

    /// Windows recorded for rules under `filter`, in submission order.
    pub fn windows_for(&self, filter: &FilterKey) -> Vec<WriteWindow> {
        self.windows
            .lock()
            .iter()
            .filter(|window| &window.rule.filter_key() == filter)
            .cloned()
            .collect()
    }

    /// Pairs of windows under `filter` that were open at the same time.
    pub fn overlapping_pairs(&self, filter: &FilterKey) -> Vec<(WriteWindow, WriteWindow)> {
        let windows = self.windows_for(filter);
        let mut pairs = Vec::new();
        for (index, first) in windows.iter().enumerate() {
            for second in &windows[index + 1..] {
                if first.overlaps(second) {
                    pairs.push((first.clone(), second.clone()));
                }
            }
        }
        pairs
    }

    pub fn clear(&self) {
        self.windows.lock().clear();
    }
}
