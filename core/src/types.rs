//! Shared primitive types used across the entire simulation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One business hour of a simulated day (the fixed domain is 9..=16).
pub type Hour = u32;

/// A 1-based simulated business day.
pub type DayNumber = u32;

/// A stable, unique identifier for any entity in the simulation.
pub type EntityId = String;

pub type SimulationId = EntityId;
pub type AgentId = EntityId;
pub type DayId = EntityId;
pub type TickId = EntityId;
pub type DecisionId = EntityId;
pub type ArtifactId = EntityId;

/// Generate a fresh entity id.
pub fn new_id() -> EntityId {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall-clock time as an RFC 3339 string (the store's timestamp format).
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ── Status enums ─────────────────────────────────────────────────────────────

/// Top-level simulation status. Doubles as the run gate (see `store::simulation`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl SimulationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending   => "pending",
            Self::Running   => "running",
            Self::Completed => "completed",
            Self::Partial   => "partial",
            Self::Failed    => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending"   => Self::Pending,
            "running"   => Self::Running,
            "completed" => Self::Completed,
            "partial"   => Self::Partial,
            _           => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl DayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending   => "pending",
            Self::Running   => "running",
            Self::Completed => "completed",
            Self::Partial   => "partial",
            Self::Failed    => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending"   => Self::Pending,
            "running"   => Self::Running,
            "completed" => Self::Completed,
            "partial"   => Self::Partial,
            _           => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl TickStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending   => "pending",
            Self::Running   => "running",
            Self::Completed => "completed",
            Self::Partial   => "partial",
            Self::Failed    => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending"   => Self::Pending,
            "running"   => Self::Running,
            "completed" => Self::Completed,
            "partial"   => Self::Partial,
            _           => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }
}

impl fmt::Display for TickStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an insert-or-ignore write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This caller wrote the row.
    Inserted,
    /// A row with the same natural key already existed; nothing was written.
    Existing,
}
