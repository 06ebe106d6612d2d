//! Pure resolver-overlay functions the gateway consults after base
//! routing resolution (§4.F Resolver overlay contract).

use crate::plan::{Phase, SplitPlan};
use meridian_core::{ShardId, TenantId};

/// Shard a read for `tenant` should target, given `base_shard` from
/// ordinary routing resolution and the plan (if any) actively covering
/// that tenant.
pub fn resolve_read_shard(tenant: &TenantId, base_shard: &ShardId, plan: Option<&SplitPlan>) -> ShardId {
    match plan {
        Some(p) if p.contains_tenant(tenant) => match p.phase {
            Phase::DualWrite | Phase::Tailing | Phase::CutoverPending => p.source_shard.clone(),
            Phase::Completed => p.target_shard.clone(),
            Phase::Planning | Phase::RolledBack => base_shard.clone(),
        },
        _ => base_shard.clone(),
    }
}

/// Shards a write for `tenant` must be fanned out to.
pub fn resolve_write_shards(tenant: &TenantId, base_shard: &ShardId, plan: Option<&SplitPlan>) -> Vec<ShardId> {
    match plan {
        Some(p) if p.contains_tenant(tenant) => match p.phase {
            Phase::DualWrite | Phase::Tailing | Phase::CutoverPending => {
                vec![p.source_shard.clone(), p.target_shard.clone()]
            }
            Phase::Completed => vec![p.target_shard.clone()],
            Phase::Planning | Phase::RolledBack => vec![base_shard.clone()],
        },
        _ => vec![base_shard.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::PlanId;

    fn plan_in_phase(phase: Phase) -> SplitPlan {
        let mut p = SplitPlan::new(
            ShardId::from("shard-a"),
            ShardId::from("shard-b"),
            vec![TenantId::from("alpha")],
            "test",
            1,
        );
        p.id = PlanId::new();
        p.phase = phase;
        p
    }

    #[test]
    fn outside_active_plan_write_equals_read_singleton() {
        let base = ShardId::from("shard-a");
        let tenant = TenantId::from("zeta");
        assert_eq!(resolve_read_shard(&tenant, &base, None), base.clone());
        assert_eq!(resolve_write_shards(&tenant, &base, None), vec![base]);
    }

    #[test]
    fn dual_write_phase_reads_source_writes_both() {
        let plan = plan_in_phase(Phase::DualWrite);
        let tenant = TenantId::from("alpha");
        let base = ShardId::from("shard-a");
        assert_eq!(resolve_read_shard(&tenant, &base, Some(&plan)), ShardId::from("shard-a"));
        assert_eq!(
            resolve_write_shards(&tenant, &base, Some(&plan)),
            vec![ShardId::from("shard-a"), ShardId::from("shard-b")]
        );
    }

    #[test]
    fn completed_phase_reads_and_writes_target_only() {
        let plan = plan_in_phase(Phase::Completed);
        let tenant = TenantId::from("alpha");
        let base = ShardId::from("shard-a");
        assert_eq!(resolve_read_shard(&tenant, &base, Some(&plan)), ShardId::from("shard-b"));
        assert_eq!(resolve_write_shards(&tenant, &base, Some(&plan)), vec![ShardId::from("shard-b")]);
    }

    #[test]
    fn untouched_tenant_unaffected_by_unrelated_plan() {
        let plan = plan_in_phase(Phase::DualWrite);
        let other = TenantId::from("gamma");
        let base = ShardId::from("shard-c");
        assert_eq!(resolve_read_shard(&other, &base, Some(&plan)), base.clone());
        assert_eq!(resolve_write_shards(&other, &base, Some(&plan)), vec![base]);
    }
}
