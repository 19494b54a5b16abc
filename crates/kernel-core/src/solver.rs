//! Growth equation solver.
//!
//! Converts fractional policy rates into integer event counts using a single
//! rounding per quantity: ROUND for the target, FLOOR for experienced
//! terminations, CEILING for hires. New-hire terminations are the residual and
//! are never rounded on their own, which is what makes
//! `start + hires - exp_terms - nh_terms == target` hold exactly.

use contracts::{GrowthPlan, PolicyParameters};

use crate::EngineError;

/// Distance from an integer under which a product is treated as that integer.
pub const SNAP_EPSILON: f64 = 1e-9;

pub fn solve(
    starting_count: u64,
    target_growth_rate: f64,
    experienced_term_rate: f64,
    new_hire_term_rate: f64,
) -> Result<GrowthPlan, EngineError> {
    check_rates(target_growth_rate, experienced_term_rate, new_hire_term_rate)?;

    let start = starting_count as f64;
    let target_ending_count = to_count(
        (start * (1.0 + target_growth_rate)).round(),
        "target ending count",
    )?;
    let mut experienced_terminations =
        to_count(snap(start * experienced_term_rate).floor(), "experienced terminations")?
            .min(starting_count);

    let mut net = i128::from(target_ending_count) - i128::from(starting_count)
        + i128::from(experienced_terminations);

    let (hires, new_hire_terminations) = if net < 0 {
        // Contraction deeper than rate-driven attrition: terminate exactly the deficit.
        experienced_terminations = starting_count - target_ending_count;
        net = 0;
        (0, 0)
    } else {
        let hires_exact = net as f64 / (1.0 - new_hire_term_rate);
        let hires = to_count(snap(hires_exact).ceil(), "hires")?;
        let hires = u128::from(hires).max(net as u128) as u64;
        (hires, hires - net as u64)
    };

    let plan = GrowthPlan {
        starting_count,
        target_ending_count,
        experienced_terminations,
        hires,
        new_hire_terminations,
    };
    let error = plan.reconciliation_error();
    if error != 0 {
        return Err(EngineError::ReconciliationFailure(format!(
            "solver produced {plan} with error {error} (net {net})"
        )));
    }
    Ok(plan)
}

pub fn solve_for(policy: &PolicyParameters, starting_count: u64) -> Result<GrowthPlan, EngineError> {
    solve(
        starting_count,
        policy.target_growth_rate,
        policy.experienced_termination_rate,
        policy.new_hire_termination_rate,
    )
}

/// FLOOR of `count * rate` with the same snapping as the solver. Used for promotion quotas.
pub fn floor_share(count: u64, rate: f64) -> u64 {
    let raw = snap(count as f64 * rate).floor();
    if raw.is_finite() && raw > 0.0 {
        (raw as u64).min(count)
    } else {
        0
    }
}

pub(crate) fn snap(value: f64) -> f64 {
    let nearest = value.round();
    if (value - nearest).abs() < SNAP_EPSILON {
        nearest
    } else {
        value
    }
}

fn check_rates(growth: f64, experienced: f64, new_hire: f64) -> Result<(), EngineError> {
    for (label, value) in [
        ("target_growth_rate", growth),
        ("experienced_termination_rate", experienced),
        ("new_hire_termination_rate", new_hire),
    ] {
        if !value.is_finite() {
            return Err(EngineError::InfeasiblePolicy(format!(
                "{label} is not finite ({value})"
            )));
        }
    }
    if growth <= -1.0 {
        return Err(EngineError::InfeasiblePolicy(format!(
            "target_growth_rate {growth} would empty the population"
        )));
    }
    if !(0.0..1.0).contains(&experienced) {
        return Err(EngineError::InfeasiblePolicy(format!(
            "experienced_termination_rate {experienced} outside [0, 1)"
        )));
    }
    if !(0.0..1.0).contains(&new_hire) {
        return Err(EngineError::InfeasiblePolicy(format!(
            "new_hire_termination_rate {new_hire} outside [0, 1); required hires would be unbounded"
        )));
    }
    Ok(())
}

fn to_count(value: f64, label: &str) -> Result<u64, EngineError> {
    if !value.is_finite() || value < 0.0 || value >= u64::MAX as f64 {
        return Err(EngineError::InfeasiblePolicy(format!(
            "{label} {value} is not a representable count"
        )));
    }
    Ok(value as u64)
}
