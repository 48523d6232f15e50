use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OffsetStatus {
    Completed,
    Err,
}

/// One per-offset outcome reported by a sweep worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateEvent {
    pub status: OffsetStatus,
    pub offset: i64,
}

impl StateEvent {
    pub fn completed(offset: i64) -> Self {
        Self {
            status: OffsetStatus::Completed,
            offset,
        }
    }

    pub fn err(offset: i64) -> Self {
        Self {
            status: OffsetStatus::Err,
            offset,
        }
    }
}

/// Completed and Err offsets of one task. The two sets never overlap.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetSets {
    #[serde(default)]
    pub completed: BTreeSet<i64>,
    #[serde(default)]
    pub err: BTreeSet<i64>,
}

impl OffsetSets {
    /// Completed wins: it clears a prior Err, and a later Err for a completed
    /// offset is dropped.
    pub fn apply(&mut self, event: StateEvent) {
        match event.status {
            OffsetStatus::Completed => {
                self.err.remove(&event.offset);
                self.completed.insert(event.offset);
            }
            OffsetStatus::Err => {
                if !self.completed.contains(&event.offset) {
                    self.err.insert(event.offset);
                }
            }
        }
    }

    pub fn status(&self, offset: i64) -> Option<OffsetStatus> {
        if self.completed.contains(&offset) {
            Some(OffsetStatus::Completed)
        } else if self.err.contains(&offset) {
            Some(OffsetStatus::Err)
        } else {
            None
        }
    }

    pub fn recorded(&self) -> BTreeSet<i64> {
        self.completed.union(&self.err).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.completed.len() + self.err.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.err.is_empty()
    }
}
