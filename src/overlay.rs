use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::telemetry::Snapshot;

/// Confirmed snapshots a pending write may survive without the device
/// echoing it back before it is dropped.
pub const CONFIRM_CYCLES: u32 = 2;

#[derive(Debug, Clone)]
struct PendingWrite {
    value: Value,
    applied_at: DateTime<Utc>,
    cycles_seen: u32,
}

/// Pending local writes layered over device telemetry until the device
/// confirms them, keyed by telemetry variable name.
///
/// A write lands here before its network call resolves, so readers see
/// it immediately. Each confirmed snapshot either clears an entry (the
/// device now reports the written value) or ages it; entries that
/// out-live [`CONFIRM_CYCLES`] revert to device truth. Nothing here is
/// persisted.
#[derive(Debug, Default)]
pub struct WriteOverlay {
    pending: BTreeMap<String, PendingWrite>,
}

impl WriteOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write. Re-applying a key replaces the entry and restarts
    /// its confirmation window.
    pub fn apply(&mut self, key: impl Into<String>, value: Value) {
        self.pending.insert(
            key.into(),
            PendingWrite {
                value,
                applied_at: Utc::now(),
                cycles_seen: 0,
            },
        );
    }

    /// Drop a pending entry without waiting for confirmation. Used when
    /// the network write it backed was rejected.
    pub fn revert(&mut self, key: &str) {
        self.pending.remove(key);
    }

    /// Pending value for a key, if any.
    pub fn pending(&self, key: &str) -> Option<&Value> {
        self.pending.get(key).map(|entry| &entry.value)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Reconcile against a confirmed snapshot.
    ///
    /// An entry whose key the snapshot reports with an equal value
    /// (after coercion) is confirmed and removed; the snapshot is
    /// authoritative from then on. Everything else ages one cycle.
    pub fn reconcile(&mut self, snapshot: &Snapshot) {
        self.pending.retain(|key, entry| {
            if let Some(reported) = snapshot.get(key)
                && values_match(reported, &entry.value)
            {
                debug!(key = %key, "pending write confirmed by device");
                return false;
            }
            entry.cycles_seen += 1;
            if entry.cycles_seen > CONFIRM_CYCLES {
                warn!(
                    key = %key,
                    value = %entry.value,
                    pending_since = %entry.applied_at,
                    "pending write never confirmed, reverting to device state"
                );
                return false;
            }
            true
        });
    }

    /// Copy of `base` with pending values layered on top.
    pub fn merge(&self, base: &Snapshot) -> Snapshot {
        let mut merged = base.clone();
        for (key, entry) in &self.pending {
            merged.values_mut().insert(key.clone(), entry.value.clone());
        }
        merged
    }
}

/// Equality after coercion: integer and float forms of the same number
/// match, and a boolean matches the 0/1 the firmware reports for it.
fn values_match(reported: &Value, pending: &Value) -> bool {
    if reported == pending {
        return true;
    }
    match (numeric(reported), numeric(pending)) {
        (Some(a), Some(b)) => (a - b).abs() < 1e-9,
        _ => false,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
