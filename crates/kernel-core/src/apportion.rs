//! Largest-remainder apportionment of an integer quota across groups.
//!
//! Each group gets the floor of its exact share; leftover units go one at a
//! time to the largest fractional remainders, ties to the lower group index.
//! The result always sums to the quota exactly.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use contracts::{GroupKey, GroupQuota};

use crate::solver::snap;
use crate::EngineError;

pub fn apportion(global_quota: u64, group_weights: &[f64]) -> Result<Vec<u64>, EngineError> {
    for (index, weight) in group_weights.iter().enumerate() {
        if !weight.is_finite() || *weight < 0.0 {
            return Err(EngineError::InfeasiblePolicy(format!(
                "group weight {index} must be finite and >= 0, got {weight}"
            )));
        }
    }
    if global_quota == 0 {
        return Ok(vec![0; group_weights.len()]);
    }
    let total = group_weights.iter().sum::<f64>();
    if group_weights.is_empty() || total <= 0.0 {
        return Err(EngineError::EmptyGroupSet {
            quota: global_quota,
        });
    }

    let quota = global_quota as f64;
    let mut floors = Vec::with_capacity(group_weights.len());
    let mut remainders = Vec::with_capacity(group_weights.len());
    for weight in group_weights {
        let share = snap(quota * weight / total);
        let floor = share.floor();
        floors.push(floor as u64);
        remainders.push(share - floor);
    }

    let order = remainder_order(&remainders, |a, b| {
        a.partial_cmp(b).unwrap_or(Ordering::Equal)
    });
    Ok(settle(global_quota, floors, &order))
}

/// Same method in exact integer arithmetic, for headcount weights.
pub fn apportion_counts(global_quota: u64, group_weights: &[u64]) -> Result<Vec<u64>, EngineError> {
    if global_quota == 0 {
        return Ok(vec![0; group_weights.len()]);
    }
    let total = group_weights.iter().map(|w| u128::from(*w)).sum::<u128>();
    if total == 0 {
        return Err(EngineError::EmptyGroupSet {
            quota: global_quota,
        });
    }

    let quota = u128::from(global_quota);
    let mut floors = Vec::with_capacity(group_weights.len());
    let mut remainders = Vec::with_capacity(group_weights.len());
    for weight in group_weights {
        let scaled = quota * u128::from(*weight);
        floors.push((scaled / total) as u64);
        remainders.push(scaled % total);
    }

    let order = remainder_order(&remainders, Ord::cmp);
    Ok(settle(global_quota, floors, &order))
}

/// Apportion across keyed groups by fractional weights. Output is ascending by key.
pub fn apportion_groups(
    global_quota: u64,
    weights: &BTreeMap<GroupKey, f64>,
) -> Result<Vec<GroupQuota>, EngineError> {
    let values = weights.values().copied().collect::<Vec<_>>();
    let quotas = apportion(global_quota, &values)?;
    Ok(zip_groups(weights.keys().copied(), quotas))
}

/// Apportion across keyed groups by integer weights (headcounts). Output is ascending by key.
pub fn apportion_group_counts(
    global_quota: u64,
    weights: &BTreeMap<GroupKey, u64>,
) -> Result<Vec<GroupQuota>, EngineError> {
    let values = weights.values().copied().collect::<Vec<_>>();
    let quotas = apportion_counts(global_quota, &values)?;
    Ok(zip_groups(weights.keys().copied(), quotas))
}

fn zip_groups(keys: impl Iterator<Item = GroupKey>, quotas: Vec<u64>) -> Vec<GroupQuota> {
    keys.zip(quotas)
        .map(|(group_key, quota)| GroupQuota { group_key, quota })
        .collect()
}

/// Indices by remainder descending, then index ascending.
fn remainder_order<T>(remainders: &[T], cmp: impl Fn(&T, &T) -> Ordering) -> Vec<usize> {
    let mut order = (0..remainders.len()).collect::<Vec<_>>();
    order.sort_by(|a, b| cmp(&remainders[*b], &remainders[*a]).then(a.cmp(b)));
    order
}

fn settle(global_quota: u64, mut floors: Vec<u64>, order: &[usize]) -> Vec<u64> {
    let assigned = floors.iter().map(|v| u128::from(*v)).sum::<u128>();
    let quota = u128::from(global_quota);

    if assigned > quota {
        // Only reachable through float rounding on huge quotas; take back from the smallest remainders.
        let mut excess = assigned - quota;
        for index in order.iter().rev().cycle() {
            if excess == 0 {
                break;
            }
            if floors[*index] > 0 {
                floors[*index] -= 1;
                excess -= 1;
            }
        }
        return floors;
    }

    let leftover = (quota - assigned) as usize;
    for index in order.iter().cycle().take(leftover) {
        floors[*index] += 1;
    }
    floors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_ten_units_over_five_levels() {
        let result = apportion(10, &[0.4, 0.3, 0.2, 0.08, 0.02]).expect("apportion");
        assert_eq!(result, vec![4, 3, 2, 1, 0]);
        assert_eq!(result.iter().sum::<u64>(), 10);
    }

    #[test]
    fn ties_go_to_lower_index() {
        assert_eq!(apportion(1, &[1.0, 1.0, 1.0]).expect("apportion"), vec![1, 0, 0]);
        assert_eq!(apportion(2, &[1.0, 1.0, 1.0]).expect("apportion"), vec![1, 1, 0]);
        assert_eq!(apportion_counts(2, &[5, 5, 5]).expect("apportion"), vec![1, 1, 0]);
    }

    #[test]
    fn largest_remainder_wins_over_index() {
        // Shares: 1.4, 1.6 -> floors 1, 1 and the single leftover goes to index 1.
        assert_eq!(apportion(3, &[0.7, 0.8]).expect("apportion"), vec![1, 2]);
        assert_eq!(apportion_counts(3, &[7, 8]).expect("apportion"), vec![1, 2]);
    }

    #[test]
    fn headcount_quotas_never_exceed_group_size() {
        let weights = [3_u64, 1, 0, 7, 2];
        for quota in 0..=13 {
            let result = apportion_counts(quota, &weights).expect("apportion");
            assert_eq!(result.iter().sum::<u64>(), quota);
            for (share, size) in result.iter().zip(weights) {
                assert!(*share <= size);
            }
        }
    }

    #[test]
    fn empty_or_weightless_groups_fail_for_positive_quota() {
        assert_eq!(apportion(5, &[]), Err(EngineError::EmptyGroupSet { quota: 5 }));
        assert_eq!(apportion(5, &[0.0, 0.0]), Err(EngineError::EmptyGroupSet { quota: 5 }));
        assert_eq!(apportion_counts(1, &[0]), Err(EngineError::EmptyGroupSet { quota: 1 }));
        assert_eq!(apportion(0, &[]).expect("zero quota"), Vec::<u64>::new());
        assert_eq!(apportion_counts(0, &[0, 0]).expect("zero quota"), vec![0, 0]);
    }

    #[test]
    fn invalid_weights_are_infeasible() {
        assert!(matches!(
            apportion(3, &[0.5, -0.1]),
            Err(EngineError::InfeasiblePolicy(_))
        ));
        assert!(matches!(
            apportion(3, &[f64::NAN]),
            Err(EngineError::InfeasiblePolicy(_))
        ));
    }

    #[test]
    fn keyed_apportionment_is_ascending_by_group() {
        let weights = BTreeMap::from([(5_u16, 1.0), (1_u16, 3.0)]);
        let quotas = apportion_groups(4, &weights).expect("apportion");
        assert_eq!(
            quotas,
            vec![
                GroupQuota { group_key: 1, quota: 3 },
                GroupQuota { group_key: 5, quota: 1 },
            ]
        );
    }
}
