//! The split plan type and its legal phase transitions.

use meridian_core::{PlanId, ShardId, TenantId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Planning,
    DualWrite,
    Tailing,
    CutoverPending,
    Completed,
    RolledBack,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::RolledBack)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    CaughtUp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillState {
    pub status: StepStatus,
    pub total_rows_copied: u64,
    /// `(table, cursor)` pairs for resuming a partially-copied backfill.
    pub cursor: Vec<(String, Option<i64>)>,
}

impl Default for BackfillState {
    fn default() -> Self {
        BackfillState {
            status: StepStatus::Pending,
            total_rows_copied: 0,
            cursor: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailState {
    pub status: StepStatus,
    pub last_event_at: Option<Timestamp>,
}

impl Default for TailState {
    fn default() -> Self {
        TailState {
            status: StepStatus::Pending,
            last_event_at: None,
        }
    }
}

/// A tenant-subset migration plan, persisted across every phase
/// transition (§3 Split Plan).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub id: PlanId,
    pub source_shard: ShardId,
    pub target_shard: ShardId,
    pub tenants: Vec<TenantId>,
    pub description: String,
    pub phase: Phase,
    pub routing_version_at_start: u64,
    pub routing_version_cutover: Option<u64>,
    pub dual_write_started_at: Option<Timestamp>,
    pub backfill: BackfillState,
    pub tail: TailState,
    pub error_message: Option<String>,
}

impl SplitPlan {
    pub fn new(
        source_shard: ShardId,
        target_shard: ShardId,
        tenants: Vec<TenantId>,
        description: impl Into<String>,
        routing_version_at_start: u64,
    ) -> Self {
        SplitPlan {
            id: PlanId::new(),
            source_shard,
            target_shard,
            tenants,
            description: description.into(),
            phase: Phase::Planning,
            routing_version_at_start,
            routing_version_cutover: None,
            dual_write_started_at: None,
            backfill: BackfillState::default(),
            tail: TailState::default(),
            error_message: None,
        }
    }

    pub fn contains_tenant(&self, tenant: &TenantId) -> bool {
        self.tenants.contains(tenant)
    }
}

pub fn storage_key(id: PlanId) -> String {
    format!("shard_split:plan:{id}")
}
