//! Per-statement execution profile

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Number of statements a profile tracks unless told otherwise
pub const DEFAULT_PROFILE_CAPACITY: usize = 64;

/// Executions of one statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementTiming {
    pub sql: String,
    pub count: u64,
    pub total_micros: u64,
}

impl StatementTiming {
    pub fn total(&self) -> Duration {
        Duration::from_micros(self.total_micros)
    }

    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.total_micros / self.count)
        }
    }
}

/// Execution counts and cumulative times, keeping the most expensive statements.
///
/// When full, recording a new statement drops the one with the smallest
/// total time.
pub struct StatementProfile {
    entries: Mutex<HashMap<String, StatementTiming>>,
    capacity: usize,
}

impl StatementProfile {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, sql: &str, elapsed: Duration) {
        if self.capacity == 0 {
            return;
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let mut entries = self.entries.lock();

        if let Some(timing) = entries.get_mut(sql) {
            timing.count += 1;
            timing.total_micros = timing.total_micros.saturating_add(micros);
            return;
        }

        if entries.len() >= self.capacity {
            let cheapest = entries
                .values()
                .min_by_key(|timing| timing.total_micros)
                .map(|timing| (timing.sql.clone(), timing.total_micros));
            match cheapest {
                Some((_, total)) if total > micros => return,
                Some((sql, _)) => {
                    entries.remove(&sql);
                }
                None => {}
            }
        }

        entries.insert(
            sql.to_string(),
            StatementTiming {
                sql: sql.to_string(),
                count: 1,
                total_micros: micros,
            },
        );
    }

    /// Up to `n` statements, most expensive first
    pub fn top(&self, n: usize) -> Vec<StatementTiming> {
        let mut timings: Vec<_> = self.entries.lock().values().cloned().collect();
        timings.sort_by(|a, b| {
            b.total_micros
                .cmp(&a.total_micros)
                .then_with(|| a.sql.cmp(&b.sql))
        });
        timings.truncate(n);
        timings
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for StatementProfile {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILE_CAPACITY)
    }
}
