use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::stage::StageKey;

/// An immutable, append-only entry in a Session's pass history. `pass_number`
/// is strictly monotonic and satisfies `pass_history[k].pass_number == k + 1`
/// (P3).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PassRecord {
    pub pass_number: u32,
    pub completed_at: DateTime<Utc>,
    /// Cumulative count observed for each stage key at the end of this pass.
    pub cumulative_counts: HashMap<StageKey, u64>,
}

impl PassRecord {
    pub fn new(pass_number: u32, cumulative_counts: HashMap<StageKey, u64>) -> Self {
        Self {
            pass_number,
            completed_at: Utc::now(),
            cumulative_counts,
        }
    }
}
