//! Input-link reduction: statistically insignificant links of a node are
//! folded into endpoint self-weights instead of being stored.
//!
//! Applicable only to directed weighted batches, because only there a link's
//! weight is a free-standing observation: an undirected edge already binds
//! two nodes symmetrically, and unweighted links carry no signal to rank.
//!
//! The batch is ranked by weight; a heavy window is accumulated from the top
//! until at least `rls_min` non-self links and two distinct weights are
//! covered, then the light prefix is dropped while its cumulative weight
//! stays safely below the heavy accumulation. The boundary never splits a run
//! of equal weights, so the outcome is independent of the input order.

use crate::numeric::less;
use crate::options::ReductionPolicy;

use super::InputLink;

/// Fraction of the heavy accumulation the light prefix may approach.
fn weight_drop_ratio(policy: ReductionPolicy) -> f64 {
    match policy {
        ReductionPolicy::Severe => 0.85,
        _ => 0.5,
    }
}

/// Ratio applied to the `i`-th heavy link (counted from the top, the head
/// excluded) when accumulating the heavy margin.
fn heavy_ratio(policy: ReductionPolicy, i: u32, n: u32, rls_min: u32) -> f64 {
    match policy {
        ReductionPolicy::Severe => {
            let denom = f64::from(rls_min) + 2.0 * f64::from(n - rls_min).sqrt();
            (f64::from(i) / denom).min(1.0)
        }
        // The tail past the window midpoint never contributes.
        _ => 2.0 * f64::from(i) / f64::from(n.saturating_sub(2).max(1)),
    }
}

/// Splits `links` into a retained suffix and the reduced prefix.
///
/// On return `links` holds the retained links (still sorted by ascending
/// weight) and the result holds the removed ones, to be folded into endpoint
/// self-weights by the caller. Returns an empty vector when nothing can be
/// reduced deterministically.
pub(super) fn reduce_links(
    src_id: u32,
    links: &mut Vec<InputLink>,
    policy: ReductionPolicy,
    rls_min: u32,
) -> Vec<InputLink> {
    debug_assert!(policy != ReductionPolicy::None && rls_min > 0);
    if links.len() <= rls_min as usize {
        return Vec::new();
    }
    // Rank by (weight, id): the id component keeps equal weights in a
    // reproducible order.
    links.sort_unstable_by(|a, b| {
        a.weight()
            .partial_cmp(&b.weight())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });

    let n = links.len();
    let accurate = policy == ReductionPolicy::Accurate;
    let rwh = weight_drop_ratio(policy);

    // Heavy window accumulation from the top: at least `rls_min` non-self
    // links (self-links extend the window via `skips`) spanning at least two
    // distinct weights.
    let mut ih = n; // heavy window is [ih, n)
    let mut wh = 0.0_f64; // accumulated heavy margin
    let mut wh0d = 0.0_f64; // decreased weight of the head link
    let mut wcur = 0.0_f64;
    let mut hnum = 0u32;
    let mut skips = 0u32;
    let mut distinct = 0u32;
    let mut i = 0u32;
    while (i < rls_min + skips || distinct < 2) && (i as usize) < n {
        ih -= 1;
        let w = f64::from(links[ih].weight());
        if links[ih].id != src_id {
            if !accurate && wh > 0.0 {
                hnum += 1;
                wh += w * heavy_ratio(policy, hnum, n as u32, rls_min);
            } else if wh == 0.0 {
                wh = w;
                wcur = w;
                wh0d = w * rwh;
                distinct = 1;
            }
            if less(w, wcur) {
                wcur = w;
                distinct += 1;
            }
        } else {
            skips += 1;
        }
        i += 1;
    }

    // Nothing lighter than the retained margin: reduction would have to be
    // input-order dependent, so skip it entirely.
    let head = f64::from(links[0].weight());
    if ih == 0 || !less(head, wh0d.min(f64::from(links[ih].weight()))) {
        return Vec::new();
    }

    // Light prefix accumulation towards the scaled heavy margin.
    let mut il = 0usize;
    let mut wl = 0.0_f64;
    if accurate {
        while il < ih && less(wl, wh * rwh) && wl < wh {
            wl += f64::from(links[il].weight());
            il += 1;
        }
    } else {
        while il < ih {
            let bound = wh0d.min(f64::from(links[ih].weight()));
            while il < ih && less(f64::from(links[il].weight()), bound) && wl < wh {
                wl += f64::from(links[il].weight());
                il += 1;
            }
            if !less(wl, wh) || il >= ih {
                break;
            }
            ih -= 1;
            if links[ih].id != src_id {
                hnum += 1;
                wh += f64::from(links[ih].weight()) * heavy_ratio(policy, hnum, n as u32, rls_min);
            }
        }
    }

    // Never split a run of equal weights: pull the boundary back so links
    // equal to the first retained weight all survive.
    if il == 0 {
        return Vec::new();
    }
    let border = f64::from(links[il.min(n - 1)].weight());
    while il > 0 && !less(f64::from(links[il - 1].weight()), border) {
        il -= 1;
    }
    if il == 0 {
        return Vec::new();
    }

    let removed: Vec<InputLink> = links.drain(..il).collect();
    removed
}

/// Runs the reduction scan and reports the first retained weight when the
/// batch is reducible; used by the per-level pruning to derive a symmetric
/// removal boundary without committing to either endpoint's view.
pub(crate) fn reduce_probe(
    src_id: u32,
    links: &mut Vec<InputLink>,
    policy: ReductionPolicy,
    rls_min: u32,
) -> Option<f64> {
    let removed = reduce_links(src_id, links, policy, rls_min);
    if removed.is_empty() {
        None
    } else {
        links.first().map(|l| f64::from(l.weight()))
    }
}
