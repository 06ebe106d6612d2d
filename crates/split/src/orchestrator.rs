//! The split orchestrator (spec component F): the tenant-subset
//! migration state machine and its operator verbs.

use crate::plan::{storage_key, BackfillState, Phase, SplitPlan, StepStatus, TailState};
use crate::storage::PlanStorage;
use dashmap::DashMap;
use meridian_core::{Error, PlanId, Result, ShardId, TenantId, Timestamp};
use meridian_routing::RoutingStore;
use meridian_shard::ShardRuntime;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Rows copied per backfill page.
const BACKFILL_PAGE_SIZE: usize = 500;

/// Tail lag at or under which `replay_tail` considers the target
/// caught up and ready for `cutover_pending`. The spec leaves this
/// threshold unspecified; this mirrors the teacher's default
/// replication-lag alert threshold.
const TAIL_CAUGHT_UP_THRESHOLD_MS: u64 = 2_000;

pub struct SplitOrchestrator {
    routing: Arc<RoutingStore>,
    shards: DashMap<ShardId, Arc<ShardRuntime>>,
    plans: DashMap<PlanId, SplitPlan>,
    storage: Arc<dyn PlanStorage>,
    tail_caught_up_threshold_ms: u64,
}

impl SplitOrchestrator {
    pub fn new(routing: Arc<RoutingStore>, storage: Arc<dyn PlanStorage>) -> Self {
        Self::with_tail_threshold(routing, storage, TAIL_CAUGHT_UP_THRESHOLD_MS)
    }

    /// Like [`Self::new`], with an operator-configurable tail-caught-up
    /// lag threshold instead of the built-in default.
    pub fn with_tail_threshold(
        routing: Arc<RoutingStore>,
        storage: Arc<dyn PlanStorage>,
        tail_caught_up_threshold_ms: u64,
    ) -> Self {
        SplitOrchestrator {
            routing,
            shards: DashMap::new(),
            plans: DashMap::new(),
            storage,
            tail_caught_up_threshold_ms,
        }
    }

    pub fn register_shard(&self, shard_id: ShardId, runtime: Arc<ShardRuntime>) {
        self.shards.insert(shard_id, runtime);
    }

    fn shard(&self, shard_id: &ShardId) -> Result<Arc<ShardRuntime>> {
        self.shards
            .get(shard_id)
            .map(|e| e.clone())
            .ok_or_else(|| Error::NotFound(format!("unknown shard {shard_id}")))
    }

    fn persist(&self, plan: &SplitPlan) {
        if let Ok(bytes) = serde_json::to_vec(plan) {
            self.storage.put(&storage_key(plan.id), bytes);
        }
    }

    pub fn get_plan(&self, id: PlanId) -> Option<SplitPlan> {
        self.plans.get(&id).map(|e| e.clone())
    }

    pub fn list_plans(&self) -> Vec<SplitPlan> {
        self.plans.iter().map(|e| e.value().clone()).collect()
    }

    /// The plan, if any, actively covering `tenant` (non-terminal
    /// phase). Consulted by the gateway's resolver overlay.
    pub fn active_plan_for_tenant(&self, tenant: &TenantId) -> Option<SplitPlan> {
        self.plans
            .iter()
            .map(|e| e.value().clone())
            .find(|p| !p.phase.is_terminal() && p.contains_tenant(tenant))
    }

    fn require_phase(&self, plan: &SplitPlan, expected: Phase) -> Result<()> {
        if plan.phase == expected {
            Ok(())
        } else {
            warn!(plan_id = %plan.id, phase = ?plan.phase, expected = ?expected, "rejected split action: illegal phase");
            Err(Error::SplitPreconditionFailed(format!(
                "plan {} is in phase {:?}, expected {:?}",
                plan.id, plan.phase, expected
            )))
        }
    }

    fn transition(&self, plan: &mut SplitPlan, to: Phase) {
        info!(plan_id = %plan.id, from_phase = ?plan.phase, to_phase = ?to, "split plan phase transition");
        plan.phase = to;
    }

    /// Verify every listed tenant currently routes to `source`, capture
    /// `routing_version_at_start`, and persist a fresh plan.
    pub fn plan(
        &self,
        source: ShardId,
        target: ShardId,
        tenants: Vec<TenantId>,
        description: impl Into<String>,
    ) -> Result<PlanId> {
        let routing_version_at_start = self.routing.current_version();
        for tenant in &tenants {
            let resolved = self.routing.resolve(tenant.as_str(), Some(tenant))?;
            if resolved != source {
                return Err(Error::SplitPreconditionFailed(format!(
                    "tenant {tenant} currently routes to {resolved}, not source {source}"
                )));
            }
        }
        let plan = SplitPlan::new(source, target, tenants, description, routing_version_at_start);
        let id = plan.id;
        self.persist(&plan);
        self.plans.insert(id, plan);
        Ok(id)
    }

    pub fn start_dual_write(&self, id: PlanId) -> Result<()> {
        let mut entry = self
            .plans
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("no split plan {id}")))?;
        self.require_phase(&entry, Phase::Planning)?;
        entry.error_message = None;
        entry.dual_write_started_at = Some(Timestamp::now());
        self.transition(&mut entry, Phase::DualWrite);
        self.persist(&entry);
        Ok(())
    }

    /// Copy every row of `tables` for the plan's tenants from source to
    /// target, page by page, resuming from any cursor a prior partial
    /// run left behind.
    pub fn run_backfill(&self, id: PlanId, tables: &[String]) -> Result<()> {
        let (source, target) = {
            let entry = self
                .plans
                .get(&id)
                .ok_or_else(|| Error::NotFound(format!("no split plan {id}")))?;
            self.require_phase(&entry, Phase::DualWrite)?;
            (self.shard(&entry.source_shard)?, self.shard(&entry.target_shard)?)
        };

        {
            let mut entry = self.plans.get_mut(&id).unwrap();
            entry.backfill.status = StepStatus::Running;
        }

        let tenants = self.plans.get(&id).unwrap().tenants.clone();
        let mut total_copied = 0u64;

        for table in tables {
            for tenant in &tenants {
                let mut cursor: Option<i64> = None;
                loop {
                    let page = match source.export_page(table, tenant, cursor, BACKFILL_PAGE_SIZE) {
                        Ok(p) => p,
                        Err(e) => return self.fail_backfill(id, e),
                    };
                    let rows = page.rows.len() as u64;
                    if rows > 0 {
                        if let Err(e) = target.import_page(table, &page) {
                            return self.fail_backfill(id, e);
                        }
                    }
                    total_copied += rows;
                    cursor = page.next_cursor;
                    {
                        let mut entry = self.plans.get_mut(&id).unwrap();
                        entry.backfill.total_rows_copied = total_copied;
                        if let Some(slot) = entry
                            .backfill
                            .cursor
                            .iter_mut()
                            .find(|(t, _)| t == table)
                        {
                            slot.1 = cursor;
                        } else {
                            entry.backfill.cursor.push((table.clone(), cursor));
                        }
                        self.persist(&entry);
                    }
                    if cursor.is_none() {
                        break;
                    }
                }
            }
        }

        let mut entry = self.plans.get_mut(&id).unwrap();
        entry.backfill.status = StepStatus::Completed;
        self.transition(&mut entry, Phase::Tailing);
        self.persist(&entry);
        Ok(())
    }

    fn fail_backfill(&self, id: PlanId, e: Error) -> Result<()> {
        let mut entry = self.plans.get_mut(&id).unwrap();
        entry.backfill.status = StepStatus::Failed;
        entry.error_message = Some(e.to_string());
        self.persist(&entry);
        Err(Error::SplitDataError(e.to_string()))
    }

    /// Poll the source shard's mutation log since `dual_write_started_at`
    /// for events affecting this plan's tenants, and apply each on
    /// target. Advances to `cutover_pending` once the lag between the
    /// last replayed event and now is within the catch-up threshold.
    pub fn replay_tail(&self, id: PlanId) -> Result<()> {
        let (source, target, since, tenants) = {
            let entry = self
                .plans
                .get(&id)
                .ok_or_else(|| Error::NotFound(format!("no split plan {id}")))?;
            self.require_phase(&entry, Phase::Tailing)?;
            let since = entry
                .tail
                .last_event_at
                .unwrap_or_else(|| entry.dual_write_started_at.unwrap_or_else(Timestamp::now));
            (
                self.shard(&entry.source_shard)?,
                self.shard(&entry.target_shard)?,
                since,
                entry.tenants.iter().cloned().collect::<HashSet<TenantId>>(),
            )
        };

        {
            let mut entry = self.plans.get_mut(&id).unwrap();
            entry.tail.status = StepStatus::Running;
        }

        let mutations = source.mutations_since(since, &tenants);
        let mut last_ts = since;
        for (ts, tenant, stmt) in &mutations {
            if let Err(e) = target.mutation(&stmt.sql, &stmt.params, tenant, None) {
                let mut entry = self.plans.get_mut(&id).unwrap();
                entry.tail.status = StepStatus::Failed;
                entry.error_message = Some(e.to_string());
                self.persist(&entry);
                return Err(Error::SplitDataError(e.to_string()));
            }
            last_ts = *ts;
        }

        let now = Timestamp::now();
        let lag_ms = last_ts.elapsed_until(now);
        let mut entry = self.plans.get_mut(&id).unwrap();
        entry.tail.last_event_at = Some(last_ts);
        if lag_ms <= self.tail_caught_up_threshold_ms {
            entry.tail.status = StepStatus::CaughtUp;
            self.transition(&mut entry, Phase::CutoverPending);
        } else {
            entry.tail.status = StepStatus::Running;
        }
        self.persist(&entry);
        Ok(())
    }

    /// Flip the routing pointer so every plan tenant maps to target.
    pub fn cutover(&self, id: PlanId) -> Result<()> {
        let mut entry = self
            .plans
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("no split plan {id}")))?;
        self.require_phase(&entry, Phase::CutoverPending)?;
        if entry.tail.status != StepStatus::CaughtUp {
            return Err(Error::SplitPreconditionFailed(format!(
                "plan {} tail is not caught up",
                entry.id
            )));
        }

        let current = self
            .routing
            .current()
            .ok_or_else(|| Error::NotFound("no routing policy has been published".into()))?;
        let mut tenants = current.tenants.clone();
        for tenant in &entry.tenants {
            tenants.insert(tenant.clone(), entry.target_shard.clone());
        }
        let new_version = self.routing.publish(
            tenants.into_iter().collect(),
            current.ranges.clone(),
            format!("cutover for split plan {}", entry.id),
            Timestamp::now(),
        )?;

        entry.routing_version_cutover = Some(new_version);
        self.transition(&mut entry, Phase::Completed);
        self.persist(&entry);
        Ok(())
    }

    /// Revert routing to the plan's starting version and reset progress.
    pub fn rollback(&self, id: PlanId) -> Result<()> {
        let mut entry = self
            .plans
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("no split plan {id}")))?;
        if entry.phase.is_terminal() {
            return Err(Error::SplitPreconditionFailed(format!(
                "plan {} is already terminal ({:?})",
                entry.id, entry.phase
            )));
        }
        self.routing.rollback(entry.routing_version_at_start)?;
        entry.backfill = BackfillState::default();
        entry.tail = TailState::default();
        self.transition(&mut entry, Phase::RolledBack);
        self.persist(&entry);
        Ok(())
    }
}
