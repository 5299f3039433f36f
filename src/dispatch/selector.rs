//! Target selection.
//!
//! The selector filters a link's targets down to the eligible set, asks
//! the rotation memory for the next one, and only falls back to a weighted
//! random draw when the rotation store is unavailable. It never mutates
//! counters; capacity is judged from the snapshot the request resolved.

use tracing::debug;

use crate::models::{Link, Target};
use crate::rotation::RotationMemory;

/// Targets that may serve a request: active, with capacity headroom, and
/// open to the visitor's country.
pub fn eligible_targets<'a>(link: &'a Link, country: &str) -> Vec<&'a Target> {
    link.targets
        .iter()
        .filter(|t| t.is_active && t.has_capacity() && t.allows_country(country))
        .collect()
}

/// Pick a target for this visitor. Returns `None` when nothing is
/// eligible.
pub async fn select_target<'a>(
    rotation: &RotationMemory,
    link: &'a Link,
    ip: &str,
    country: &str,
) -> Option<&'a Target> {
    let eligible = eligible_targets(link, country);
    if eligible.is_empty() {
        return None;
    }

    match rotation.pick(ip, &link.link_id, &eligible).await {
        Ok(target) => Some(target),
        Err(e) => {
            debug!(
                "rotation memory unavailable for {} ({e}), using weighted draw",
                link.link_id
            );
            Some(weighted_pick(&eligible))
        }
    }
}

/// Weighted random draw over the eligible set. Draws r uniform in
/// [0, total weight) and walks the list in configured order subtracting
/// weights until the draw crosses zero.
pub fn weighted_pick<'a>(eligible: &[&'a Target]) -> &'a Target {
    use rand::Rng;

    if eligible.len() == 1 {
        return eligible[0];
    }

    let total: i64 = eligible.iter().map(|t| t.weight.max(0)).sum();
    if total <= 0 {
        return eligible[0];
    }

    let mut r = rand::thread_rng().gen_range(0..total);
    for target in eligible {
        r -= target.weight.max(0);
        if r < 0 {
            return target;
        }
    }
    eligible[eligible.len() - 1]
}
