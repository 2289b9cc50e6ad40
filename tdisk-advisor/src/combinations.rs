// SPDX-License-Identifier: GPL-3.0-only

//! New-combination scoring.
//!
//! Enumerates member sets of the currently-unattached devices up to the
//! configured maximum member count (bounded, never the full power set),
//! scores each candidate, and ranks them descending. Scoring is
//! deterministic: a fixed input set and a fixed history snapshot always
//! produce the same ranking.

use tdisk_types::{
    CandidateDevice, DeviceCombination, RedundancyClass, TDiskAdvice,
};

use crate::config::AdvisorConfig;

/// Classifies a member set; mixed redundant/non-redundant sets are
/// invalid and classify as `None`.
fn classify(devices: &[&CandidateDevice]) -> Option<RedundancyClass> {
    let redundant = devices.iter().filter(|device| device.redundant).count();

    if redundant == devices.len() {
        Some(RedundancyClass::Redundant)
    } else if redundant == 0 {
        Some(RedundancyClass::NonRedundant)
    } else {
        None
    }
}

/// Weighted score of one candidate set.
///
/// `avg_performance` answers with a device's recent mean throughput when
/// history exists for it (by name, since unattached devices carry no
/// stable member id yet).
fn evaluate_score(
    devices: &[&CandidateDevice],
    redundancy: RedundancyClass,
    config: &AdvisorConfig,
    avg_performance: &dyn Fn(&str) -> Option<f64>,
) -> f64 {
    let capacity_gib: f64 = devices
        .iter()
        .map(|device| device.capacity as f64 / (1u64 << 30) as f64)
        .sum();

    let mut score = config.capacity_weight * capacity_gib;

    if redundancy == RedundancyClass::Redundant {
        score += config.redundancy_weight;
    }

    let partitioned = devices
        .iter()
        .filter(|device| device.kind.is_partitioned())
        .count();
    score -= config.partition_penalty * partitioned as f64;

    let known: Vec<f64> = devices
        .iter()
        .filter_map(|device| avg_performance(&device.name))
        .collect();
    if !known.is_empty() {
        let mean = known.iter().sum::<f64>() / known.len() as f64;
        score += config.performance_weight * mean;
    }

    score
}

/// Scores all member sets of size 2..=max_members and returns them
/// ranked: score descending, ties broken by larger aggregate capacity,
/// then by fewer members.
pub fn get_tdisk_advices(
    candidates: &[CandidateDevice],
    config: &AdvisorConfig,
    avg_performance: &dyn Fn(&str) -> Option<f64>,
) -> Vec<TDiskAdvice> {
    let mut advices = Vec::new();
    let max_members = config.max_members.min(candidates.len());

    for member_count in 2..=max_members {
        for selection in index_combinations(candidates.len(), member_count) {
            let devices: Vec<&CandidateDevice> =
                selection.iter().map(|&index| &candidates[index]).collect();

            let Some(redundancy) = classify(&devices) else {
                tracing::debug!(?selection, "skipping mixed-redundancy combination");
                continue;
            };

            let score = evaluate_score(&devices, redundancy, config, avg_performance);
            let combination = DeviceCombination {
                devices: devices.into_iter().cloned().collect(),
                blocksize: config.default_blocksize,
                cache_percent: config.cache_percent,
            };

            advices.push(TDiskAdvice {
                capacity_estimate: combination.capacity(),
                combination,
                score,
                redundancy,
            });
        }
    }

    advices.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| right.capacity_estimate.cmp(&left.capacity_estimate))
            .then_with(|| {
                left.combination
                    .devices
                    .len()
                    .cmp(&right.combination.devices.len())
            })
    });

    advices
}

/// All index subsets of size `take` out of `n`, in lexicographic order
fn index_combinations(n: usize, take: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(take);
    extend(&mut out, &mut current, 0, n, take);
    out
}

fn extend(
    out: &mut Vec<Vec<usize>>,
    current: &mut Vec<usize>,
    from: usize,
    n: usize,
    take: usize,
) {
    if current.len() == take {
        out.push(current.clone());
        return;
    }

    for index in from..n {
        current.push(index);
        extend(out, current, index + 1, n, take);
        current.pop();
    }
}
