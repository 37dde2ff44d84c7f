use std::collections::VecDeque;

use crate::types::{AuditEntry, PolicyStatistics};

/// Append-only assessment history with optional FIFO capacity.
///
/// Counters mirror the retained entries so statistics never need a full scan.
#[derive(Debug, Default)]
pub struct AuditLog {
    capacity: Option<usize>,
    entries: VecDeque<AuditEntry>,
    allowed: usize,
    risk_sum: u64,
    compliance_sum: u64,
    evicted: u64,
}

impl AuditLog {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry. Timestamps are kept non-decreasing so that insertion
    /// order and timestamp order agree even if the wall clock steps back.
    pub fn push(&mut self, mut entry: AuditEntry) -> &AuditEntry {
        if let Some(last) = self.entries.back() {
            if entry.timestamp < last.timestamp {
                entry.timestamp = last.timestamp;
            }
        }

        if let Some(capacity) = self.capacity {
            while self.entries.len() >= capacity.max(1) {
                match self.entries.pop_front() {
                    Some(evicted) => {
                        self.forget(&evicted);
                        self.evicted += 1;
                    }
                    None => break,
                }
            }
        }

        self.count(&entry);
        self.entries.push_back(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Most recent first; `limit` keeps only the newest entries.
    pub fn list(&self, limit: Option<usize>) -> Vec<AuditEntry> {
        let limit = limit.unwrap_or(self.entries.len());
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn statistics(&self) -> PolicyStatistics {
        let total = self.entries.len();
        if total == 0 {
            return PolicyStatistics {
                evicted_entries: self.evicted,
                ..PolicyStatistics::default()
            };
        }

        PolicyStatistics {
            total_assessments: total,
            allowed_operations: self.allowed,
            denied_operations: total - self.allowed,
            average_risk_level: self.risk_sum as f64 / total as f64,
            average_compliance_level: self.compliance_sum as f64 / total as f64,
            last_assessment_timestamp: self.entries.back().map(|entry| entry.timestamp),
            evicted_entries: self.evicted,
        }
    }

    fn count(&mut self, entry: &AuditEntry) {
        if entry.assessment.allowed {
            self.allowed += 1;
        }
        self.risk_sum += u64::from(entry.assessment.risk_level);
        self.compliance_sum += u64::from(entry.assessment.compliance_level);
    }

    fn forget(&mut self, entry: &AuditEntry) {
        if entry.assessment.allowed {
            self.allowed -= 1;
        }
        self.risk_sum -= u64::from(entry.assessment.risk_level);
        self.compliance_sum -= u64::from(entry.assessment.compliance_level);
    }
}
