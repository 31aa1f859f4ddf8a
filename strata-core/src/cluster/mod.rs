//! The agglomerative level builder.
//!
//! Clustering proceeds bottom-up: level 0 is built over the nodes, every
//! further level over the previous level's clusters. Each pass computes the
//! modularity gain of every linked item pair, retains the mutually-best
//! candidates, and fuses the resulting groups; items that do not merge are
//! wrapped (level 0), propagated (still linked), or frozen as roots
//! (linkless). The build terminates when no gainful merges remain, when the
//! root set reaches the configured bound, or when the per-level gain drops
//! below the margin; a gamma sweep instead lowers the resolution and retries.
//!
//! Every iteration follows the link order and every tie-break is by index,
//! so a run is a pure function of the graph and the options.

mod candidates;
mod items;

use tracing::{debug, info, warn};

use crate::error::{Result, StrataError};
use crate::graph::Graph;
use crate::graph::Node;
use crate::hierarchy::{Cluster, ClusterLink, ClusterRef, Hierarchy, Level, OwnerRef, Score};
use crate::numeric::{equal, less};
use crate::options::ClusterOptions;
use crate::profile::{build_profile, Membership};

use self::candidates::{
    best_candidates, form_groups, merge_gain, mutual_candidates, MergeOutcome,
};
use self::items::{
    aggregate_items, items_from_nodes, level_link_weight, reduce_level_links, Item, ItemShares,
};

/// Modularity is bounded; a score outside this tolerance of the bounds is a
/// numerical invariant violation.
const MODULARITY_TOL: f64 = 1e-6;

/// Validates the graph, moves its nodes out, and builds the hierarchy.
///
/// # Errors
/// Propagates validation failures, configuration errors, and the overflow
/// and invariant failures of the build itself.
pub fn cluster(graph: &mut Graph, opts: &ClusterOptions) -> Result<Hierarchy> {
    let (_, links) = graph.validate(opts.validation)?;
    let (nodes, directed) = graph.release();
    cluster_nodes(nodes, !directed, links, opts)
}

/// Builds the hierarchy over already-validated nodes.
///
/// `edges` marks symmetric link weights (undirected input); `nodes_links` is
/// the directed link count reported in the score.
///
/// # Errors
/// Returns [`StrataError::Overflow`] when the node universe exceeds the id
/// budget and [`StrataError::Invariant`] when the final modularity leaves
/// [-0.5, 1].
pub fn cluster_nodes(
    nodes: Vec<Node>,
    edges: bool,
    nodes_links: u64,
    opts: &ClusterOptions,
) -> Result<Hierarchy> {
    if nodes.len() >= (u32::MAX - crate::agordi::COR_VAL) as usize {
        return Err(StrataError::overflow(
            "the node universe exceeds the 32-bit id budget",
        ));
    }
    let membership = build_profile().membership;
    if nodes.is_empty() {
        warn!("the input graph is empty; the hierarchy has no levels");
        return Ok(Hierarchy {
            nodes,
            levels: Vec::new(),
            root: Vec::new(),
            score: Score::default(),
            edges,
            gamma: opts.gamma(),
            membership,
        });
    }

    let mut items = items_from_nodes(&nodes, edges);
    if opts.reduction.active() && !opts.reduction.skip_nodes {
        reduce_level_links(&mut items, opts.reduction);
    }

    let gamma0 = if opts.dynamic_gamma() {
        1.0
    } else if let Some(sweep) = &opts.sweep {
        sweep.gamma_max
    } else {
        opts.gamma()
    };
    let mut builder = Builder {
        opts,
        membership,
        nodes,
        levels: Vec::new(),
        frozen: Vec::new(),
        frozen_stats: Vec::new(),
        next_id: 0,
        w0: items.iter().map(Item::strength).sum(),
        gamma: gamma0,
        nodes_links,
        edges,
    };
    builder.run(items)
}

struct Builder<'a> {
    opts: &'a ClusterOptions,
    membership: Membership,
    nodes: Vec<Node>,
    levels: Vec<Level>,
    /// Roots frozen below the current top, and their (self, strength) stats.
    frozen: Vec<ClusterRef>,
    frozen_stats: Vec<(f64, f64)>,
    next_id: u32,
    /// Total level-0 strength; the normalisation of the reported modularity.
    w0: f64,
    gamma: f64,
    nodes_links: u64,
    edges: bool,
}

impl Builder<'_> {
    fn run(mut self, mut items: Vec<Item>) -> Result<Hierarchy> {
        let bound_up = self.opts.root_bound.up && self.opts.root_max() > 0;
        let bound_down = self.opts.root_bound.down && self.opts.root_max() > 0;
        let static_gamma = self.opts.sweep.is_none() && !self.opts.dynamic_gamma();

        loop {
            if self.levels.len() >= usize::from(u16::MAX) {
                return Err(StrataError::overflow("hierarchy level budget exhausted"));
            }
            let w_lev = level_link_weight(&items);
            let strengths: Vec<f64> = items.iter().map(Item::strength).collect();
            let root_count = self.frozen.len() + items.len();

            let mut outcome = if w_lev > 0.0 {
                self.discover(&items, &strengths, w_lev)
            } else {
                MergeOutcome::empty(items.len())
            };

            if outcome.groups.is_empty() {
                if let Some(sweep) = &self.opts.sweep {
                    let next = self.gamma * sweep.step_at(self.gamma);
                    if next >= sweep.gamma_min && !equal(next, self.gamma) {
                        debug!(gamma = next, "no merges left; gamma sweep advanced");
                        self.gamma = next;
                        continue;
                    }
                }
                if bound_up && root_count > self.opts.root_max() as usize && items.len() >= 2 {
                    outcome = self.forced_pair(&items, &strengths, w_lev);
                }
            }

            if outcome.groups.is_empty() {
                if self.levels.is_empty() {
                    // Wrap every node so each one has a level-0 owner.
                    items = self.materialize(&items, &outcome, bound_up);
                }
                break;
            }

            let before_q = self.partition_q(&items);
            items = self.materialize(&items, &outcome, bound_up);
            if self.opts.reduction.active() {
                reduce_level_links(&mut items, self.opts.reduction);
            }
            if self.opts.dynamic_gamma() {
                self.update_dynamic_gamma(&items);
            }
            let after_q = self.partition_q(&items);
            if self.opts.modtrace {
                info!(
                    level = self.levels.len() - 1,
                    gamma = self.gamma,
                    modularity = after_q,
                    clusters = items.len(),
                    "level closed"
                );
            }

            let root_count = self.frozen.len() + items.len();
            if bound_down && root_count <= self.opts.root_max() as usize {
                debug!(root_count, "root bound reached; terminating early");
                break;
            }
            if static_gamma {
                if let Some(marg) = self.opts.gain_marg {
                    let threshold = if self.opts.gain_marg_div {
                        marg / (self.nodes_links.max(1) as f64).sqrt()
                    } else {
                        marg
                    };
                    if after_q - before_q < threshold {
                        debug!(
                            gain = after_q - before_q,
                            threshold, "gain margin undercut; terminating"
                        );
                        break;
                    }
                }
            }
        }

        self.finish(items)
    }

    fn discover(&self, items: &[Item], strengths: &[f64], w_lev: f64) -> MergeOutcome {
        let mut mcands = best_candidates(items, strengths, w_lev, self.gamma, false);
        // The positive-gain prefilter kicks in only while at least
        // `filter_margin` of the items hold a gainful candidate; below the
        // margin the level is re-scanned relaxed, admitting maximal-gain
        // candidates of any sign. The default margin of 0 keeps the
        // prefilter permanently on.
        if build_profile().mcands_prefilter && self.opts.filter_margin > 0.0 {
            let gainful = mcands.iter().filter(|c| !c.is_empty()).count();
            if (gainful as f64) < self.opts.filter_margin * items.len() as f64 {
                debug!(
                    gainful,
                    items = items.len(),
                    "too few gainful items; prefilter skipped, non-positive candidates admitted"
                );
                mcands = best_candidates(items, strengths, w_lev, self.gamma, true);
            }
        }
        let mutual = mutual_candidates(&mcands);
        form_groups(&mutual, self.opts.use_ahash)
    }

    /// One forced merge towards the root bound: the best-gain linked pair,
    /// or the two lightest items when standalone fusion is allowed.
    fn forced_pair(&self, items: &[Item], strengths: &[f64], w_lev: f64) -> MergeOutcome {
        let mut best: Option<(f64, u32, u32)> = None;
        if w_lev > 0.0 {
            for (ix, item) in items.iter().enumerate() {
                for ln in &item.links {
                    if (ln.dest as usize) <= ix {
                        continue;
                    }
                    let gain = merge_gain(
                        ln.weight,
                        strengths[ix],
                        strengths[ln.dest as usize],
                        w_lev,
                        self.gamma,
                    );
                    if best.map_or(true, |(bg, _, _)| gain > bg) {
                        best = Some((gain, ix as u32, ln.dest));
                    }
                }
            }
        }
        let pair = match best {
            Some((gain, i, j)) => {
                if self.opts.root_bound.nonnegative && less(gain, 0.0) {
                    None
                } else {
                    Some((i, j))
                }
            }
            None => {
                if self.opts.root_bound.standalone && !self.opts.root_bound.nonnegative {
                    // Fuse the two lightest items; ties resolve by index.
                    let mut order: Vec<u32> = (0..items.len() as u32).collect();
                    order.sort_by(|&a, &b| {
                        strengths[a as usize]
                            .partial_cmp(&strengths[b as usize])
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(a.cmp(&b))
                    });
                    Some((order[0].min(order[1]), order[0].max(order[1])))
                } else {
                    None
                }
            }
        };
        match pair {
            Some((i, j)) => {
                debug!(i, j, "forced merge towards the root bound");
                let mutual = vec![Vec::new(); items.len()];
                MergeOutcome::from_groups(items.len(), vec![vec![i, j]], &mutual)
            }
            None => MergeOutcome::empty(items.len()),
        }
    }

    /// Builds the next level from the merge outcome. Unmerged items are
    /// wrapped on level 0, propagated while they still have links (or while
    /// the root bound keeps everything in play), and frozen as roots
    /// otherwise; the `chains_extra` build strategy keeps even linkless
    /// lineages propagating so every root surfaces on the top level.
    /// Returns the items of the freshly built level.
    fn materialize(&mut self, items: &[Item], outcome: &MergeOutcome, keep_all: bool) -> Vec<Item> {
        let lev = self.levels.len() as u16;
        let group_count = outcome.groups.len() as u32;
        let mut assign = outcome.membership.clone();
        let mut next_idx = group_count;
        let mut frozen_now: Vec<u32> = Vec::new();
        let chains_extra = build_profile().chains_extra;
        for (ix, item) in items.iter().enumerate() {
            if !assign[ix].is_empty() {
                continue;
            }
            if lev == 0 || !item.links.is_empty() || keep_all || chains_extra {
                assign[ix].push((next_idx, 1));
                next_idx += 1;
            } else {
                frozen_now.push(ix as u32);
            }
        }
        let cluster_count = next_idx as usize;

        let shares: Vec<ItemShares> = assign.iter().map(|m| self.shares_of(m)).collect();
        let next = aggregate_items(items, &shares, cluster_count);

        let mut des: Vec<Vec<u32>> = vec![Vec::new(); cluster_count];
        for (ix, mems) in assign.iter().enumerate() {
            for &(c, _) in mems {
                des[c as usize].push(ix as u32);
            }
        }
        let mut clusters = Vec::with_capacity(cluster_count);
        for (stats, des) in next.iter().zip(des) {
            clusters.push(Cluster {
                id: self.next_id,
                levnum: lev,
                des,
                links: stats
                    .links
                    .iter()
                    .map(|l| ClusterLink {
                        dest: l.dest,
                        weight: l.weight,
                    })
                    .collect(),
                owners: Vec::new(),
                weight: stats.self_weight,
                nnodes: stats.nnodes,
            });
            self.next_id += 1;
        }

        // Back-pointers on the stratum below; `assign` is ordered by cluster
        // index by construction.
        for (ix, mems) in assign.iter().enumerate() {
            if mems.is_empty() {
                continue;
            }
            let owners: Vec<OwnerRef> = mems
                .iter()
                .map(|&(dest, numac)| OwnerRef { dest, numac })
                .collect();
            if lev == 0 {
                self.nodes[ix].owners = owners;
            } else {
                self.levels[usize::from(lev) - 1].clusters[ix].owners = owners;
            }
        }
        for ix in frozen_now {
            self.frozen.push(ClusterRef {
                lev: lev - 1,
                idx: ix,
            });
            self.frozen_stats
                .push((items[ix as usize].self_weight, items[ix as usize].strength()));
        }

        let fullsize = (clusters.len() + self.frozen.len()) as u32;
        self.levels.push(Level { clusters, fullsize });
        next
    }

    fn shares_of(&self, mems: &[(u32, u16)]) -> ItemShares {
        if mems.len() < 2 {
            return mems.iter().map(|&(c, _)| (c, 1.0)).collect();
        }
        match self.membership {
            Membership::Crisp => {
                let share = 1.0 / mems.len() as f64;
                mems.iter().map(|&(c, _)| (c, share)).collect()
            }
            Membership::Fuzzy => {
                let totac: u32 = mems.iter().map(|&(_, n)| u32::from(n)).sum();
                if totac == 0 {
                    let share = 1.0 / mems.len() as f64;
                    mems.iter().map(|&(c, _)| (c, share)).collect()
                } else {
                    mems.iter()
                        .map(|&(c, n)| (c, f64::from(n) / f64::from(totac)))
                        .collect()
                }
            }
        }
    }

    /// Modularity of the current item partition against the level-0 totals.
    fn partition_q(&self, items: &[Item]) -> f64 {
        if self.w0 <= 0.0 {
            return 0.0;
        }
        items
            .iter()
            .map(|it| {
                let s = it.strength() / self.w0;
                it.self_weight / self.w0 - self.gamma * s * s
            })
            .sum()
    }

    /// Per-level dynamic resolution: the static-gamma estimate over the
    /// freshly formed clusters (intra weight over the null expectation).
    fn update_dynamic_gamma(&mut self, items: &[Item]) {
        if self.w0 <= 0.0 {
            return;
        }
        let intra: f64 = items.iter().map(|it| it.self_weight / self.w0).sum();
        let null: f64 = items
            .iter()
            .map(|it| {
                let s = it.strength() / self.w0;
                s * s
            })
            .sum();
        if intra > 0.0 && null > 0.0 {
            self.gamma = intra / null;
            debug!(gamma = self.gamma, "dynamic gamma re-estimated");
        }
    }

    fn finish(self, items: Vec<Item>) -> Result<Hierarchy> {
        let mut root: Vec<ClusterRef> = self.frozen.clone();
        let top = self.levels.len().saturating_sub(1) as u16;
        if !self.levels.is_empty() {
            root.extend((0..items.len() as u32).map(|idx| ClusterRef { lev: top, idx }));
        }
        root.sort_unstable();

        let mut modularity = 0.0;
        if self.w0 > 0.0 {
            for &(selfw, strength) in &self.frozen_stats {
                let s = strength / self.w0;
                modularity += selfw / self.w0 - self.gamma * s * s;
            }
            modularity += self.partition_q(&items);
        }
        // Q >= -gamma/2 by the usual modularity bound argument; the familiar
        // [-0.5, 1] range is its gamma <= 1 instance.
        let lower = -0.5 * self.gamma.max(1.0);
        if modularity < lower - MODULARITY_TOL || modularity > 1.0 + MODULARITY_TOL {
            return Err(StrataError::invariant(format!(
                "modularity {modularity} is outside [{lower}, 1]"
            )));
        }

        let mut hier = Hierarchy {
            nodes: self.nodes,
            levels: self.levels,
            root,
            score: Score {
                modularity,
                clusters: 0,
                nodes_links: self.nodes_links,
            },
            edges: self.edges,
            gamma: self.gamma,
            membership: self.membership,
        };
        let mut distinct = 0u64;
        for lev in 0..hier.levels.len() {
            for idx in 0..hier.levels[lev].clusters.len() {
                let cl = ClusterRef {
                    lev: lev as u16,
                    idx: idx as u32,
                };
                if !hier.is_trivial(cl) {
                    distinct += 1;
                }
            }
        }
        hier.score.clusters = distinct;
        Ok(hier)
    }
}
