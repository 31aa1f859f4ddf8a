//! Merge candidate discovery: modularity gains, per-item best candidates,
//! mutual candidacy, and deterministic group formation.
//!
//! Groups form in three passes over the mutual-candidate structure:
//!
//! 1. Items whose closed candidate sets (`{i} ∪ mutual(i)`) coincide exactly
//!    merge multi-way; such a set is pairwise mutual by construction. The
//!    Agordi hash buckets candidate sets by fingerprint so coincidence is
//!    found without quadratic comparisons; bucket members are still verified
//!    by exact equality.
//! 2. Remaining items pair greedily in ascending index order, preferring a
//!    mutual candidate that is itself still unassigned.
//! 3. An item whose mutual candidates were all consumed claims its first
//!    candidate anyway, giving that candidate an additional, overlapping
//!    membership.
//!
//! All iteration follows the link order (ascending destination index), so the
//! outcome is a pure function of the level's weights.

use std::collections::HashMap;

use crate::agordi::{AgordiHash, Correction};
use crate::numeric::{equal_n, less};

use super::items::Item;

/// The merge decision for one level.
#[derive(Debug, Default)]
pub(crate) struct MergeOutcome {
    /// Item indices per merge group, ascending within each group.
    pub groups: Vec<Vec<u32>>,
    /// Per item: `(group index, activation count)` pairs, ascending by group.
    pub membership: Vec<Vec<(u32, u16)>>,
}

impl MergeOutcome {
    pub(crate) fn empty(items: usize) -> Self {
        Self {
            groups: Vec::new(),
            membership: vec![Vec::new(); items],
        }
    }

    /// Builds the outcome for an explicit set of groups.
    pub(crate) fn from_groups(items: usize, groups: Vec<Vec<u32>>, mutual: &[Vec<u32>]) -> Self {
        let mut membership = vec![Vec::new(); items];
        for (g, members) in groups.iter().enumerate() {
            for &m in members {
                let inside = members
                    .iter()
                    .filter(|&&o| o != m && mutual[m as usize].binary_search(&o).is_ok())
                    .count()
                    .max(1);
                let numac = u16::try_from(inside).unwrap_or(u16::MAX);
                membership[m as usize].push((g as u32, numac));
            }
        }
        Self { groups, membership }
    }
}

/// Modularity gain of merging two items at the given resolution.
///
/// `w_ij` is the bidirectional inter-item weight, `s` the strengths, and
/// `w_lev` the level's total bidirectional link weight.
#[inline]
pub(crate) fn merge_gain(w_ij: f64, s_i: f64, s_j: f64, w_lev: f64, gamma: f64) -> f64 {
    w_ij / w_lev - gamma * s_i * s_j / (w_lev * w_lev)
}

/// Tolerance width for gain ties, in accumulated operations.
const GAIN_TIE_OPS: usize = 16;

/// Per-item best merge candidates: the neighbors of maximal gain, ties
/// retained. While the prefilter applies (`relaxed` false) only positive
/// gains qualify and items without a gainful neighbor get an empty set; a
/// relaxed pass keeps the maximal-gain neighbors regardless of sign.
pub(crate) fn best_candidates(
    items: &[Item],
    strengths: &[f64],
    w_lev: f64,
    gamma: f64,
    relaxed: bool,
) -> Vec<Vec<u32>> {
    items
        .iter()
        .enumerate()
        .map(|(ix, item)| {
            let mut best = f64::NEG_INFINITY;
            let mut cands: Vec<u32> = Vec::new();
            for ln in &item.links {
                let gain = merge_gain(
                    ln.weight,
                    strengths[ix],
                    strengths[ln.dest as usize],
                    w_lev,
                    gamma,
                );
                if !relaxed && !less(0.0, gain) {
                    continue;
                }
                if cands.is_empty() || (gain > best && !equal_n(gain, best, GAIN_TIE_OPS)) {
                    best = gain;
                    cands.clear();
                    cands.push(ln.dest);
                } else if equal_n(gain, best, GAIN_TIE_OPS) {
                    cands.push(ln.dest);
                }
            }
            cands
        })
        .collect()
}

/// Restricts candidacy to mutual pairs: `j` stays a candidate of `i` iff `i`
/// is also a candidate of `j`.
pub(crate) fn mutual_candidates(mcands: &[Vec<u32>]) -> Vec<Vec<u32>> {
    mcands
        .iter()
        .enumerate()
        .map(|(ix, cands)| {
            cands
                .iter()
                .copied()
                .filter(|&j| mcands[j as usize].binary_search(&(ix as u32)).is_ok())
                .collect()
        })
        .collect()
}

/// Forms the merge groups from the mutual-candidate structure.
pub(crate) fn form_groups(mutual: &[Vec<u32>], use_ahash: bool) -> MergeOutcome {
    let n = mutual.len();
    // Closed candidate sets, each sorted: mutual lists are built in link
    // order, so only the self-insertion position matters.
    let closed: Vec<Vec<u32>> = mutual
        .iter()
        .enumerate()
        .map(|(ix, m)| {
            let ix = ix as u32;
            let mut set = Vec::with_capacity(m.len() + 1);
            let pos = m.partition_point(|&j| j < ix);
            set.extend_from_slice(&m[..pos]);
            set.push(ix);
            set.extend_from_slice(&m[pos..]);
            set
        })
        .collect();

    let mut assigned = vec![false; n];
    let mut groups: Vec<Vec<u32>> = Vec::new();

    // Pass 1: coincident closed sets merge whole.
    if use_ahash {
        let mut buckets: HashMap<u64, Vec<u32>> = HashMap::new();
        for (ix, set) in closed.iter().enumerate() {
            if set.len() < 2 {
                continue;
            }
            let mut hash = AgordiHash::new(Correction::CorAll);
            for &v in set {
                hash.add(v);
            }
            buckets.entry(hash.digest()).or_default().push(ix as u32);
        }
        for ix in 0..n {
            if assigned[ix] || closed[ix].len() < 2 {
                continue;
            }
            let mut hash = AgordiHash::new(Correction::CorAll);
            for &v in &closed[ix] {
                hash.add(v);
            }
            let Some(bucket) = buckets.get(&hash.digest()) else {
                continue;
            };
            // Fingerprint coincidence is only a hint; equality is verified.
            let group: Vec<u32> = bucket
                .iter()
                .copied()
                .filter(|&j| !assigned[j as usize] && closed[j as usize] == closed[ix])
                .collect();
            if group.len() >= 2 {
                for &m in &group {
                    assigned[m as usize] = true;
                }
                groups.push(group);
            }
        }
    } else {
        let mut buckets: HashMap<&[u32], Vec<u32>> = HashMap::new();
        for (ix, set) in closed.iter().enumerate() {
            if set.len() >= 2 {
                buckets.entry(set.as_slice()).or_default().push(ix as u32);
            }
        }
        for ix in 0..n {
            if assigned[ix] || closed[ix].len() < 2 {
                continue;
            }
            if let Some(group) = buckets.get(closed[ix].as_slice()) {
                if group.len() >= 2 {
                    for &m in group {
                        assigned[m as usize] = true;
                    }
                    groups.push(group.clone());
                }
            }
        }
    }

    // Pass 2: greedy pairing with still-unassigned mutual candidates.
    for ix in 0..n {
        if assigned[ix] || mutual[ix].is_empty() {
            continue;
        }
        if let Some(&j) = mutual[ix].iter().find(|&&j| !assigned[j as usize]) {
            assigned[ix] = true;
            assigned[j as usize] = true;
            let mut pair = vec![ix as u32, j];
            pair.sort_unstable();
            groups.push(pair);
        }
    }

    // Pass 3: leftover items claim their first consumed candidate, creating
    // an overlapping membership for it.
    for ix in 0..n {
        if assigned[ix] || mutual[ix].is_empty() {
            continue;
        }
        let j = mutual[ix][0];
        assigned[ix] = true;
        let mut pair = vec![ix as u32, j];
        pair.sort_unstable();
        groups.push(pair);
    }

    MergeOutcome::from_groups(n, groups, mutual)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::super::items::ItemLink;
    use super::*;

    fn item(self_weight: f64, links: &[(u32, f64)]) -> Item {
        Item {
            self_weight,
            nnodes: 1.0,
            links: links
                .iter()
                .map(|&(dest, weight)| ItemLink { dest, weight })
                .collect(),
        }
    }

    /// Unweighted triangle: every pair is mutually best and the closed sets
    /// coincide, so one three-way group forms.
    #[rstest]
    #[case(true)]
    #[case(false)]
    fn triangle_merges_whole(#[case] use_ahash: bool) {
        let items = vec![
            item(0.0, &[(1, 2.0), (2, 2.0)]),
            item(0.0, &[(0, 2.0), (2, 2.0)]),
            item(0.0, &[(0, 2.0), (1, 2.0)]),
        ];
        let strengths: Vec<f64> = items.iter().map(Item::strength).collect();
        let w_lev = 12.0;
        let mcands = best_candidates(&items, &strengths, w_lev, 1.0, false);
        let mutual = mutual_candidates(&mcands);
        let outcome = form_groups(&mutual, use_ahash);
        assert_eq!(outcome.groups, vec![vec![0, 1, 2]]);
        // Every member activated by its two fellows.
        assert_eq!(outcome.membership[0], vec![(0, 2)]);
    }

    /// Hub-and-spokes: each spoke is mutually best with the hub only, so the
    /// hub lands in one pair per spoke.
    #[test]
    fn star_produces_overlapping_pairs() {
        let items = vec![
            item(0.0, &[(2, 2.0)]),
            item(0.0, &[(2, 2.0)]),
            item(0.0, &[(0, 2.0), (1, 2.0), (3, 2.0)]),
            item(0.0, &[(2, 2.0)]),
        ];
        let strengths: Vec<f64> = items.iter().map(Item::strength).collect();
        let mcands = best_candidates(&items, &strengths, 12.0, 1.0, false);
        let mutual = mutual_candidates(&mcands);
        let outcome = form_groups(&mutual, true);
        assert_eq!(outcome.groups, vec![vec![0, 2], vec![1, 2], vec![2, 3]]);
        assert_eq!(outcome.membership[2].len(), 3);
        let totac: u16 = outcome.membership[2].iter().map(|&(_, n)| n).sum();
        assert_eq!(totac, 3);
    }

    #[test]
    fn negative_gains_need_the_relaxed_pass() {
        // Two items whose gain is negative at gamma 1: filtered while the
        // prefilter applies, retained by the relaxed pass.
        let items = vec![item(10.0, &[(1, 0.1)]), item(10.0, &[(0, 0.1)])];
        let strengths: Vec<f64> = items.iter().map(Item::strength).collect();
        let mcands = best_candidates(&items, &strengths, 0.2, 1.0, false);
        assert!(mcands.iter().all(Vec::is_empty));
        let relaxed = best_candidates(&items, &strengths, 0.2, 1.0, true);
        assert_eq!(relaxed[0], vec![1]);
        assert_eq!(relaxed[1], vec![0]);
    }

    #[test]
    fn non_mutual_candidacy_is_dropped() {
        // 0's best is 1, but 1's best is 2 (heavier): no mutual pair 0-1.
        let items = vec![
            item(0.0, &[(1, 2.0)]),
            item(0.0, &[(0, 2.0), (2, 6.0)]),
            item(0.0, &[(1, 6.0)]),
        ];
        let strengths: Vec<f64> = items.iter().map(Item::strength).collect();
        let mcands = best_candidates(&items, &strengths, 16.0, 1.0, false);
        let mutual = mutual_candidates(&mcands);
        assert!(mutual[0].is_empty());
        assert_eq!(mutual[1], vec![2]);
        let outcome = form_groups(&mutual, true);
        assert_eq!(outcome.groups, vec![vec![1, 2]]);
        assert!(outcome.membership[0].is_empty());
    }
}
