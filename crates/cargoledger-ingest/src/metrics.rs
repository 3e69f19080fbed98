//! In-process pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the dispatcher. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    received: AtomicU64,
    stored: AtomicU64,
    duplicates: AtomicU64,
    unknown: AtomicU64,
    unhandled: AtomicU64,
    decode_errors: AtomicU64,
    dead_lettered: AtomicU64,
    not_found: AtomicU64,
    mutation_errors: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub stored: u64,
    pub duplicates: u64,
    pub unknown: u64,
    pub unhandled: u64,
    pub decode_errors: u64,
    pub dead_lettered: u64,
    pub not_found: u64,
    pub mutation_errors: u64,
    pub abandoned: u64,
}

macro_rules! counters {
    ($($method:ident => $field:ident),* $(,)?) => {
        impl PipelineMetrics {
            $(
                pub fn $method(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    record_received => received,
    record_stored => stored,
    record_duplicate => duplicates,
    record_unknown => unknown,
    record_unhandled => unhandled,
    record_decode_error => decode_errors,
    record_dead_letter => dead_lettered,
    record_not_found => not_found,
    record_mutation_error => mutation_errors,
    record_abandoned => abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counts() {
        let m = PipelineMetrics::default();
        m.record_received();
        m.record_received();
        m.record_stored();
        m.record_unknown();
        let snap = m.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.stored, 1);
        assert_eq!(snap.unknown, 1);
        assert_eq!(snap.duplicates, 0);
    }
}
