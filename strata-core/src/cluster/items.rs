//! Item views for one clustering level.
//!
//! A level works on items: nodes for level 0, the previous level's clusters
//! above. An item carries its doubled self-weight, its share-weighted member
//! count, and bidirectional link weights to its same-level siblings. Strength
//! (self plus incident weight) is conserved from level to level: merging only
//! moves link weight into self-weight.

use std::collections::BTreeMap;

use crate::graph::{InputLink, Node};
use crate::options::{reduced_links_margin, Reduction};

/// Bidirectional link between same-level items.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ItemLink {
    pub dest: u32,
    pub weight: f64,
}

/// One clusterable item at the current level.
///
/// Item indices coincide with the indices of the backing stratum: node
/// indices at level 0, cluster indices within the freshly built level above.
#[derive(Clone, Debug, Default)]
pub(crate) struct Item {
    /// Doubled self-weight.
    pub self_weight: f64,
    /// Share-weighted member-node count.
    pub nnodes: f64,
    /// Links to sibling items, sorted by destination item index.
    pub links: Vec<ItemLink>,
}

impl Item {
    /// Strength: self-weight plus total incident bidirectional weight.
    pub fn strength(&self) -> f64 {
        self.self_weight + self.links.iter().map(|l| l.weight).sum::<f64>()
    }
}

/// Builds the level-0 items from node adjacency.
///
/// Link weights become bidirectional: symmetric entries double for an
/// undirected graph, and the two directions of an arc sum for a directed one
/// (a missing complement counts as zero).
pub(crate) fn items_from_nodes(nodes: &[Node], edges: bool) -> Vec<Item> {
    nodes
        .iter()
        .enumerate()
        .map(|(ix, nd)| {
            let links = nd
                .links
                .iter()
                .map(|ln| {
                    let weight = if edges {
                        2.0 * f64::from(ln.weight)
                    } else {
                        let back = &nodes[ln.dest as usize].links;
                        let rev = back
                            .binary_search_by_key(&(ix as u32), |l| l.dest)
                            .map(|pos| f64::from(back[pos].weight))
                            .unwrap_or(0.0);
                        f64::from(ln.weight) + rev
                    };
                    ItemLink {
                        dest: ln.dest,
                        weight,
                    }
                })
                .collect();
            Item {
                self_weight: nd.weight,
                nnodes: 1.0,
                links,
            }
        })
        .collect()
}

/// Total bidirectional link weight of a level: Σ over items of Σ link
/// weights. Each item pair contributes from both sides.
pub(crate) fn level_link_weight(items: &[Item]) -> f64 {
    items
        .iter()
        .map(|it| it.links.iter().map(|l| l.weight).sum::<f64>())
        .sum()
}

/// Ownership of an item in the next level: `(cluster index, share)` pairs.
pub(crate) type ItemShares = Vec<(u32, f64)>;

/// Aggregates the next level's items from this level's items and the
/// item→cluster ownership map.
///
/// Self-weight and member count distribute linearly by share; a link
/// distributes bilinearly over both endpoints' owners, intra-cluster
/// contributions landing in the self-weight (both directions of a pair are
/// visited, doubling it as required).
pub(crate) fn aggregate_items(
    items: &[Item],
    shares: &[ItemShares],
    cluster_count: usize,
) -> Vec<Item> {
    let mut next: Vec<Item> = vec![Item::default(); cluster_count];
    let mut cross: Vec<BTreeMap<u32, f64>> = vec![BTreeMap::new(); cluster_count];

    for (ix, item) in items.iter().enumerate() {
        for &(owner, share) in &shares[ix] {
            let tgt = &mut next[owner as usize];
            tgt.self_weight += item.self_weight * share;
            tgt.nnodes += item.nnodes * share;
        }
        for ln in &item.links {
            for &(a, sa) in &shares[ix] {
                for &(b, sb) in &shares[ln.dest as usize] {
                    let w = ln.weight * sa * sb;
                    if a == b {
                        next[a as usize].self_weight += w;
                    } else {
                        *cross[a as usize].entry(b).or_insert(0.0) += w;
                    }
                }
            }
        }
    }

    for (ix, links) in cross.into_iter().enumerate() {
        next[ix].links = links
            .into_iter()
            .map(|(dest, weight)| ItemLink { dest, weight })
            .collect();
    }
    next
}

/// Per-level link pruning: a pair link is folded into both endpoints'
/// self-weights when it falls into the removable prefix of *both* endpoints,
/// so the symmetric representation survives and the outcome does not depend
/// on the iteration side.
///
/// Links rank by their contribution to the optimisation function (weight
/// over the strength product) unless the raw-weight criteria is selected.
pub(crate) fn reduce_level_links(items: &mut [Item], reduction: Reduction) {
    if !reduction.active() {
        return;
    }
    let rls_min = reduced_links_margin(items.len() as u32, reduction.policy);
    if rls_min == 0 {
        return;
    }

    let strengths: Vec<f64> = items.iter().map(Item::strength).collect();
    let rank = |ix: usize, ln: &ItemLink| -> f64 {
        if reduction.weight_criteria {
            ln.weight
        } else {
            ln.weight / (strengths[ix] * strengths[ln.dest as usize]).max(f64::MIN_POSITIVE)
        }
    };

    // Removable boundary per item (in ranking space), computed by the same
    // policy scan that drives the ingestion reduction.
    let mut boundary: Vec<f64> = vec![0.0; items.len()];
    for (ix, item) in items.iter().enumerate() {
        if item.links.len() <= rls_min as usize {
            continue;
        }
        let mut batch: Vec<InputLink> = item
            .links
            .iter()
            .map(|l| InputLink::weighted(l.dest, rank(ix, l) as f32))
            .collect();
        if let Some(bound) =
            crate::graph::reduce_probe(ix as u32, &mut batch, reduction.policy, rls_min)
        {
            boundary[ix] = bound;
        }
    }

    for ix in 0..items.len() {
        if boundary[ix] == 0.0 {
            continue;
        }
        let mut folded = 0.0;
        let bound = boundary[ix];
        let bounds = &boundary;
        let strengths = &strengths;
        let links = std::mem::take(&mut items[ix].links);
        items[ix].links = links
            .into_iter()
            .filter(|ln| {
                let other = bounds[ln.dest as usize];
                let value = if reduction.weight_criteria {
                    ln.weight
                } else {
                    ln.weight
                        / (strengths[ix] * strengths[ln.dest as usize]).max(f64::MIN_POSITIVE)
                };
                if other > 0.0 && value < bound.min(other) {
                    folded += ln.weight / 2.0;
                    false
                } else {
                    true
                }
            })
            .collect();
        items[ix].self_weight += folded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(dest: u32, weight: f64) -> ItemLink {
        ItemLink { dest, weight }
    }

    #[test]
    fn strength_is_conserved_by_aggregation() {
        // Path 0 - 1 - 2 merged as {0,1} + {2}.
        let items = vec![
            Item {
                self_weight: 0.0,
                nnodes: 1.0,
                links: vec![link(1, 2.0)],
            },
            Item {
                self_weight: 0.0,
                nnodes: 1.0,
                links: vec![link(0, 2.0), link(2, 2.0)],
            },
            Item {
                self_weight: 0.0,
                nnodes: 1.0,
                links: vec![link(1, 2.0)],
            },
        ];
        let before: f64 = items.iter().map(Item::strength).sum();
        let shares: Vec<ItemShares> = vec![vec![(0, 1.0)], vec![(0, 1.0)], vec![(1, 1.0)]];
        let next = aggregate_items(&items, &shares, 2);
        let after: f64 = next.iter().map(Item::strength).sum();
        assert!((before - after).abs() < 1e-12);
        // Intra weight doubled into the self-weight of the pair cluster.
        assert_eq!(next[0].self_weight, 4.0);
        assert_eq!(next[0].links, vec![link(1, 2.0)]);
        assert_eq!(next[1].links, vec![link(0, 2.0)]);
        assert_eq!(next[0].nnodes, 2.0);
    }

    #[test]
    fn shared_item_splits_by_share() {
        // Item 1 belongs to both clusters with share 1/2 each.
        let items = vec![
            Item {
                self_weight: 0.0,
                nnodes: 1.0,
                links: vec![link(1, 2.0)],
            },
            Item {
                self_weight: 4.0,
                nnodes: 1.0,
                links: vec![link(0, 2.0), link(2, 2.0)],
            },
            Item {
                self_weight: 0.0,
                nnodes: 1.0,
                links: vec![link(1, 2.0)],
            },
        ];
        let shares: Vec<ItemShares> = vec![
            vec![(0, 1.0)],
            vec![(0, 0.5), (1, 0.5)],
            vec![(1, 1.0)],
        ];
        let next = aggregate_items(&items, &shares, 2);
        let before: f64 = items.iter().map(Item::strength).sum();
        let after: f64 = next.iter().map(Item::strength).sum();
        assert!((before - after).abs() < 1e-12);
        assert_eq!(next[0].nnodes, 1.5);
        assert_eq!(next[1].nnodes, 1.5);
        // The 0-1 link: share-weighted intra (2·1·½ from each side) plus a
        // remaining cross component towards the other owner of item 1.
        assert!((next[0].self_weight - (4.0 * 0.5 + 2.0)).abs() < 1e-12);
        assert!((next[0].links[0].weight - 2.0).abs() < 1e-12);
    }

    #[test]
    fn directed_items_sum_both_directions() {
        let mut nodes = vec![Node::default(), Node::default()];
        nodes[0].links = vec![crate::graph::Link {
            dest: 1,
            weight: 3.0,
        }];
        nodes[1].links = vec![crate::graph::Link {
            dest: 0,
            weight: 1.0,
        }];
        let items = items_from_nodes(&nodes, false);
        assert_eq!(items[0].links[0].weight, 4.0);
        assert_eq!(items[1].links[0].weight, 4.0);
        assert_eq!(level_link_weight(&items), 8.0);
    }
}
