//! Run types: one invocation of the harvester and its per-record outcomes.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One pass over a year's worth of firing positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestRun {
    pub id: Uuid,
    pub year: i16,
    pub started_at: Timestamp,
    pub status: RunStatus,
}

/// Where a run stands in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Records are still being processed (or the process died mid-run).
    Running,

    /// Every filtered position was visited.
    Completed {
        finished_at: Timestamp,
        published: u32,
        failed: u32,
        skipped: u32,
    },
}

/// Pipeline stage a record reaches, or fails to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Filtered,
    Located,
    Fetched,
    Published,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filtered => "filtered",
            Self::Located => "located",
            Self::Fetched => "fetched",
            Self::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "filtered" => Some(Self::Filtered),
            "located" => Some(Self::Located),
            "fetched" => Some(Self::Fetched),
            "published" => Some(Self::Published),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a single position during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum Outcome {
    Published { record_id: String, scene_id: String },

    /// The record did not reach `stage`.
    Failed { stage: Stage, reason: String },

    /// Already published by an earlier run.
    Skipped,
}

/// A ledger row: one position's outcome within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub run_id: Uuid,
    pub position_id: String,
    pub outcome: Outcome,
    pub recorded_at: Timestamp,
}
