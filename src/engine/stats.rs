//! Engine-wide diagnostics counters.

use dashmap::DashMap;

/// Monotonic named counters, readable from any thread.
#[derive(Debug, Default)]
pub struct EngineStats {
    counters: DashMap<String, u64>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, amount: u64) {
        if let Some(mut value) = self.counters.get_mut(name) {
            *value += amount;
            return;
        }
        *self.counters.entry(name.to_string()).or_insert(0) += amount;
    }

    /// Current value; counters never touched read as zero.
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).map(|v| *v).unwrap_or(0)
    }

    /// `name: value` lines sorted by name.
    pub fn dump(&self) -> String {
        let mut lines: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        lines.sort();

        let mut out = String::new();
        for (name, value) in lines {
            out.push_str(&name);
            out.push_str(": ");
            out.push_str(&value.to_string());
            out.push('\n');
        }
        out
    }
}
