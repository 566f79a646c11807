use crate::document::{ClusterConfig, ConfigDocument};

/// Total weight of a balanced cluster.
const FULL_WEIGHT: u32 = 100;

/// Normalizes endpoint weights of outbound and forward clusters.
pub(super) fn rebalance(document: &mut ConfigDocument) {
    if let Some(outbound) = document.outbound.as_mut() {
        outbound
            .clusters_configs
            .values_mut()
            .for_each(rebalance_cluster);
    }
    if let Some(forward) = document.forward.as_mut() {
        forward
            .egress_gateways
            .values_mut()
            .for_each(rebalance_cluster);
    }
}

/// Clusters whose weights do not already sum to 100 are split evenly in
/// address order, rounding each share up.
fn rebalance_cluster(cluster: &mut ClusterConfig) {
    let total: u64 = cluster.endpoints.values().map(|w| u64::from(*w)).sum();
    if cluster.endpoints.is_empty() || total == u64::from(FULL_WEIGHT) {
        return;
    }
    let mut remaining = FULL_WEIGHT;
    let mut count = u32::try_from(cluster.endpoints.len()).unwrap_or(u32::MAX);
    for weight in cluster.endpoints.values_mut() {
        let share = remaining.div_ceil(count);
        *weight = share;
        remaining -= share;
        count -= 1;
    }
}
