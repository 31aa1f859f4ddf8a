//! Input graph: an owning store of nodes with ordered, unique adjacency.
//!
//! Links are kept sorted by destination node index at all times, which gives
//! every later stage (validation, clustering, output) a single total order to
//! iterate in. Undirected links are represented by two symmetric entries,
//! directed links by one entry on the source; self-links of either kind are
//! folded into the node's doubled self-weight so they aggregate the same way
//! intra-cluster weight does later.
//!
//! The optional shuffle randomises the node index order (and with it every
//! ordering-based tie-break downstream) from a caller-supplied seed, leaving
//! the clustering itself deterministic for a fixed seed.

mod errors;
mod reduce;

pub use errors::{LinkErrors, NodeErrors};

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, StrataError};
use crate::hierarchy::OwnerRef;
use crate::options::{reduced_links_margin, ReductionPolicy, Validation};

use self::reduce::reduce_links;
pub(crate) use self::reduce::reduce_probe;

/// Reserved sentinel id.
pub const ID_NONE: u32 = u32::MAX;

/// A link supplied by the caller, addressed by external node id.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputLink {
    /// Destination node id.
    pub id: u32,
    weight: Option<f32>,
}

impl InputLink {
    /// An unweighted link (weight defaults to 1).
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self { id, weight: None }
    }

    /// A weighted link.
    #[must_use]
    pub fn weighted(id: u32, weight: f32) -> Self {
        Self {
            id,
            weight: Some(weight),
        }
    }

    /// The effective weight; 1 when unspecified.
    #[must_use]
    pub fn weight(&self) -> f32 {
        self.weight.unwrap_or(1.0)
    }

    /// Whether a weight was supplied explicitly.
    #[must_use]
    pub fn has_weight(&self) -> bool {
        self.weight.is_some()
    }
}

/// A stored adjacency entry, addressed by internal node index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Link {
    /// Destination node index in the owning store.
    pub dest: u32,
    /// Link weight.
    pub weight: f32,
}

/// A graph node: external id, doubled self-weight, and ordered adjacency.
#[derive(Clone, Debug, Default)]
pub struct Node {
    pub(crate) id: u32,
    pub(crate) weight: f64,
    pub(crate) links: Vec<Link>,
    pub(crate) owners: Vec<OwnerRef>,
}

impl Node {
    fn new(id: u32) -> Self {
        Self {
            id,
            weight: 0.0,
            links: Vec::new(),
            owners: Vec::new(),
        }
    }

    /// External node id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Doubled self-weight (every self-link contributes twice).
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Adjacency, sorted by destination index and duplicate-free.
    #[must_use]
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Level-1 owners, populated by clustering.
    #[must_use]
    pub fn owners(&self) -> &[OwnerRef] {
        &self.owners
    }
}

/// Construction parameters of a [`Graph`].
#[derive(Clone, Copy, Debug)]
pub struct GraphOptions {
    /// Declared node count; used for preallocation and the reduction margin.
    pub expected_nodes: u32,
    /// Shuffle node creation order using this seed.
    pub shuffle: Option<u64>,
    /// Accumulate duplicated weighted links instead of skipping them.
    pub sum_duplicates: bool,
    /// Input-link reduction policy (weighted directed batches only).
    pub reduction: ReductionPolicy,
    /// Whether the graph carries explicit link weights.
    pub weighted: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            expected_nodes: 0,
            shuffle: None,
            sum_duplicates: false,
            reduction: ReductionPolicy::None,
            weighted: true,
        }
    }
}

/// Owning store for nodes and their ordered, unique adjacency lists.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    id_index: HashMap<u32, u32>,
    declared: u32,
    directed: bool,
    weighted: bool,
    sum_dups: bool,
    reduction: ReductionPolicy,
    rls_min: u32,
    rng: Option<StdRng>,
}

impl Graph {
    /// Creates an empty graph.
    ///
    /// # Errors
    /// Returns [`StrataError::Config`] when reduction is requested for an
    /// unweighted graph or without a declared node count.
    pub fn new(opts: GraphOptions) -> Result<Self> {
        if opts.reduction != ReductionPolicy::None && !(opts.weighted && opts.expected_nodes > 0) {
            return Err(StrataError::config(
                "input reduction requires weighted links and a declared node count",
            ));
        }
        let rls_min = reduced_links_margin(opts.expected_nodes, opts.reduction);
        Ok(Self {
            nodes: Vec::with_capacity(opts.expected_nodes as usize),
            id_index: HashMap::with_capacity(opts.expected_nodes as usize),
            declared: opts.expected_nodes,
            directed: false,
            weighted: opts.weighted,
            sum_dups: opts.sum_duplicates,
            reduction: opts.reduction,
            rls_min,
            rng: opts.shuffle.map(StdRng::seed_from_u64),
        })
    }

    /// The stored nodes, in index order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Whether any directed non-self link has been added.
    #[must_use]
    pub fn directed(&self) -> bool {
        self.directed
    }

    /// Whether the graph carries explicit link weights.
    #[must_use]
    pub fn weighted(&self) -> bool {
        self.weighted
    }

    /// Whether ingestion reduction is active for this graph.
    #[must_use]
    pub fn reduced(&self) -> bool {
        self.rls_min > 0 && self.directed
    }

    /// Declared node count from the input header, 0 when unknown.
    #[must_use]
    pub fn declared(&self) -> u32 {
        self.declared
    }

    /// Looks a node up by external id.
    #[must_use]
    pub fn node(&self, id: u32) -> Option<&Node> {
        self.id_index.get(&id).map(|&ix| &self.nodes[ix as usize])
    }

    /// Internal index of a node by external id.
    #[must_use]
    pub fn node_index(&self, id: u32) -> Option<u32> {
        self.id_index.get(&id).copied()
    }

    /// Adds `count` nodes with sequential ids starting at `first_id`.
    /// Duplicates are recorded in `errs` and discarded.
    pub fn add_nodes(&mut self, count: u32, first_id: u32, errs: &mut NodeErrors) {
        if count == 0 {
            return;
        }
        self.id_index.reserve(count as usize);
        let mut lo = first_id;
        let mut hi = first_id + count;
        if self.rng.is_some() {
            // Interleave from both ends so index order decouples from ids.
            while lo != hi {
                let id = if self.rng.as_mut().expect("shuffle rng").gen::<bool>() {
                    let id = lo;
                    lo += 1;
                    id
                } else {
                    hi -= 1;
                    hi
                };
                self.add_node(id, Some(errs));
            }
        } else {
            for id in lo..hi {
                self.add_node(id, Some(errs));
            }
        }
    }

    /// Adds nodes with explicit ids. Duplicates are recorded and discarded.
    pub fn add_node_ids(&mut self, ids: &[u32], errs: &mut NodeErrors) {
        self.id_index.reserve(ids.len());
        if self.rng.is_some() {
            let mut lo = 0usize;
            let mut hi = ids.len();
            while lo != hi {
                let id = if self.rng.as_mut().expect("shuffle rng").gen::<bool>() {
                    let id = ids[lo];
                    lo += 1;
                    id
                } else {
                    hi -= 1;
                    ids[hi]
                };
                self.add_node(id, Some(errs));
            }
        } else {
            for &id in ids {
                self.add_node(id, Some(errs));
            }
        }
    }

    fn add_node(&mut self, id: u32, errs: Option<&mut NodeErrors>) -> u32 {
        match self.id_index.get(&id) {
            Some(&ix) => {
                if let Some(errs) = errs {
                    errs.add(id);
                }
                ix
            }
            None => {
                let ix = self.nodes.len() as u32;
                self.nodes.push(Node::new(id));
                self.id_index.insert(id, ix);
                ix
            }
        }
    }

    /// Adds a batch of links for `src`. Every referenced node must already
    /// exist.
    ///
    /// Self-links contribute their doubled weight to the node self-weight
    /// regardless of `directed`. Undirected non-self links insert two
    /// symmetric entries. Duplicates accumulate under `sum_duplicates` on
    /// weighted graphs and are recorded otherwise.
    ///
    /// # Errors
    /// Returns [`StrataError::Reference`] when `src` or a destination does
    /// not exist.
    pub fn add_node_links(
        &mut self,
        src: u32,
        mut links: Vec<InputLink>,
        directed: bool,
        errs: &mut LinkErrors,
    ) -> Result<()> {
        let src_ix = self
            .id_index
            .get(&src)
            .copied()
            .ok_or(StrataError::Reference { id: src })?;
        for ln in &links {
            if !self.id_index.contains_key(&ln.id) {
                return Err(StrataError::Reference { id: ln.id });
            }
        }
        if directed && self.weighted && self.rls_min > 0 && links.len() > self.rls_min as usize {
            self.reduce_batch(src, src_ix, &mut links, errs);
        }
        for ln in links {
            self.add_one_link(src_ix, ln, directed, errs);
        }
        Ok(())
    }

    /// Adds a batch of links for `src`, creating missing nodes first.
    pub fn add_node_and_links(
        &mut self,
        src: u32,
        mut links: Vec<InputLink>,
        directed: bool,
        errs: &mut LinkErrors,
    ) {
        // Instantiate the ids in shuffle-aware order; duplicates here are
        // expected (most nodes already exist) and not worth a warning.
        let mut ids = Vec::with_capacity(1 + links.len());
        ids.push(src);
        ids.extend(links.iter().map(|ln| ln.id));
        if self.rng.is_some() {
            let mut lo = 0usize;
            let mut hi = ids.len();
            while lo != hi {
                let id = if self.rng.as_mut().expect("shuffle rng").gen::<bool>() {
                    let id = ids[lo];
                    lo += 1;
                    id
                } else {
                    hi -= 1;
                    ids[hi]
                };
                self.add_node(id, None);
            }
        } else {
            for &id in &ids {
                self.add_node(id, None);
            }
        }

        let src_ix = self.id_index[&src];
        if directed && self.weighted && self.rls_min > 0 && links.len() > self.rls_min as usize {
            self.reduce_batch(src, src_ix, &mut links, errs);
        }
        for ln in links {
            self.add_one_link(src_ix, ln, directed, errs);
        }
    }

    /// Adds a single link between existing nodes.
    ///
    /// # Errors
    /// Returns [`StrataError::Reference`] for an unknown endpoint and
    /// [`StrataError::Config`] when the source already has links in a
    /// reduced graph (reduction needs whole batches).
    pub fn add_link(
        &mut self,
        src: u32,
        dst: u32,
        weight: Option<f32>,
        directed: bool,
        errs: &mut LinkErrors,
    ) -> Result<()> {
        let src_ix = self
            .id_index
            .get(&src)
            .copied()
            .ok_or(StrataError::Reference { id: src })?;
        if !self.id_index.contains_key(&dst) {
            return Err(StrataError::Reference { id: dst });
        }
        if self.rls_min > 0 && !self.nodes[src_ix as usize].links.is_empty() {
            return Err(StrataError::config(
                "links can be added only once per node while the graph is being reduced",
            ));
        }
        let ln = match weight {
            Some(w) => InputLink::weighted(dst, w),
            None => InputLink::new(dst),
        };
        self.add_one_link(src_ix, ln, directed, errs);
        Ok(())
    }

    fn reduce_batch(
        &mut self,
        src: u32,
        src_ix: u32,
        links: &mut Vec<InputLink>,
        errs: &mut LinkErrors,
    ) {
        let removed = reduce_links(src, links, self.reduction, self.rls_min);
        if removed.is_empty() {
            return;
        }
        tracing::debug!(
            node = src,
            removed = removed.len(),
            retained = links.len(),
            "input links reduced into self-weights"
        );
        let mut seen = std::collections::HashSet::new();
        for ln in removed {
            if !self.sum_dups && !seen.insert(ln.id) {
                errs.add(src, ln.id);
                continue;
            }
            let w = f64::from(ln.weight());
            if ln.id == src {
                // Self-weight is stored doubled.
                self.nodes[src_ix as usize].weight += w * 2.0;
            } else {
                // A directed link folds half of its weight into each endpoint.
                let dst_ix = self.id_index[&ln.id];
                self.nodes[src_ix as usize].weight += w / 2.0;
                self.nodes[dst_ix as usize].weight += w / 2.0;
            }
        }
    }

    fn add_one_link(&mut self, src_ix: u32, ln: InputLink, directed: bool, errs: &mut LinkErrors) {
        let dst_ix = self.id_index[&ln.id];
        let weight = ln.weight();
        if dst_ix == src_ix {
            // Self-links are edges regardless of `directed`: doubled so they
            // aggregate like intra-cluster weight later.
            let node = &mut self.nodes[src_ix as usize];
            if node.weight == 0.0 || (self.sum_dups && self.weighted) {
                node.weight += f64::from(weight) * 2.0;
            } else {
                errs.add(node.id, node.id);
            }
            return;
        }
        if directed {
            self.directed = true;
            self.insert_link(src_ix, dst_ix, weight, errs);
        } else {
            // Both directions carry the original weight.
            self.insert_link(dst_ix, src_ix, weight, errs);
            self.insert_link(src_ix, dst_ix, weight, errs);
        }
    }

    /// Ordered insert keeping adjacency sorted by destination index and
    /// duplicate-free, with an append fast-path for in-order input.
    fn insert_link(&mut self, src_ix: u32, dst_ix: u32, weight: f32, errs: &mut LinkErrors) {
        let sum_dups = self.sum_dups && self.weighted;
        let (src_id, dst_id) = (
            self.nodes[src_ix as usize].id,
            self.nodes[dst_ix as usize].id,
        );
        let links = &mut self.nodes[src_ix as usize].links;
        let tail = links.last().map(|l| l.dest);
        match tail {
            // Append fast-path for in-order input.
            None => links.push(Link {
                dest: dst_ix,
                weight,
            }),
            Some(tail) if tail < dst_ix => links.push(Link {
                dest: dst_ix,
                weight,
            }),
            Some(tail) if tail == dst_ix => {
                if sum_dups {
                    links.last_mut().expect("non-empty").weight += weight;
                } else {
                    errs.add(src_id, dst_id);
                }
            }
            Some(_) => match links.binary_search_by_key(&dst_ix, |l| l.dest) {
                Ok(pos) => {
                    if sum_dups {
                        links[pos].weight += weight;
                    } else {
                        errs.add(src_id, dst_id);
                    }
                }
                Err(pos) => links.insert(
                    pos,
                    Link {
                        dest: dst_ix,
                        weight,
                    },
                ),
            },
        }
    }

    /// Validates link consistency and returns `(total_weight, link_count)`.
    ///
    /// STANDARD backfills missing directed complements with weight 0 so both
    /// directions of every arc are structurally present; SEVERE additionally
    /// verifies strict adjacency ordering. The total weight is
    /// Σ node self-weights + Σ stored link weights.
    ///
    /// # Errors
    /// Returns [`StrataError::Invariant`] for unsorted links under SEVERE.
    pub fn validate(&mut self, policy: Validation) -> Result<(f64, u64)> {
        if policy == Validation::Severe {
            for nd in &self.nodes {
                let sorted = nd.links.windows(2).all(|w| w[0].dest < w[1].dest);
                if !sorted {
                    return Err(StrataError::invariant(format!(
                        "links not ordered on node #{}",
                        nd.id
                    )));
                }
            }
        }
        if policy != Validation::None && self.directed {
            // Two-phase backfill of the missing complements to avoid aliasing
            // the node store while scanning it.
            let mut missing: Vec<(u32, u32)> = Vec::new();
            for (ix, nd) in self.nodes.iter().enumerate() {
                for ln in &nd.links {
                    let back = &self.nodes[ln.dest as usize].links;
                    if back.binary_search_by_key(&(ix as u32), |l| l.dest).is_err() {
                        missing.push((ln.dest, ix as u32));
                    }
                }
            }
            if !missing.is_empty() {
                tracing::warn!(
                    count = missing.len(),
                    "missing complement links were backfilled with zero weight"
                );
                let mut ignored = LinkErrors::new();
                for (src, dst) in missing {
                    self.insert_link(src, dst, 0.0, &mut ignored);
                }
            }
        }
        let mut weight = 0.0;
        let mut links = 0u64;
        for nd in &self.nodes {
            weight += nd.weight;
            links += nd.links.len() as u64;
            weight += nd.links.iter().map(|l| f64::from(l.weight)).sum::<f64>();
        }
        Ok((weight, links))
    }

    /// Releases the nodes, resetting the graph to its pre-fill state.
    #[must_use]
    pub fn release(&mut self) -> (Vec<Node>, bool) {
        let directed = self.directed;
        self.directed = false;
        self.declared = 0;
        self.rls_min = 0;
        self.reduction = ReductionPolicy::None;
        self.id_index.clear();
        (std::mem::take(&mut self.nodes), directed)
    }

    /// Verifies the standing adjacency invariant: strictly sorted, no
    /// duplicates. Used by tests and by the SEVERE validation path.
    #[must_use]
    pub fn links_ordered(&self) -> bool {
        self.nodes
            .iter()
            .all(|nd| nd.links.windows(2).all(|w| w[0].dest < w[1].dest))
    }

    /// Total weight: Σ self-weights + Σ stored link weights. Stable across
    /// reduction, which only moves link weight into self-weights.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.nodes
            .iter()
            .map(|nd| nd.weight + nd.links.iter().map(|l| f64::from(l.weight)).sum::<f64>())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn graph() -> Graph {
        Graph::new(GraphOptions::default()).expect("default options are valid")
    }

    fn add_all(g: &mut Graph, edges: &[(u32, u32, f32)], directed: bool) {
        let mut lerrs = LinkErrors::new();
        for &(s, d, w) in edges {
            g.add_node_and_links(s, vec![InputLink::weighted(d, w)], directed, &mut lerrs);
        }
    }

    #[test]
    fn adjacency_stays_sorted_and_unique() {
        let mut g = graph();
        let mut nerrs = NodeErrors::new();
        let mut lerrs = LinkErrors::new();
        g.add_nodes(5, 0, &mut nerrs);
        g.add_node_links(
            0,
            vec![
                InputLink::weighted(4, 1.0),
                InputLink::weighted(2, 1.0),
                InputLink::weighted(3, 1.0),
                InputLink::weighted(1, 1.0),
            ],
            false,
            &mut lerrs,
        )
        .expect("nodes exist");
        assert!(g.links_ordered());
        assert_eq!(g.node(0).expect("exists").links().len(), 4);
        // Symmetric complements were inserted.
        assert_eq!(g.node(4).expect("exists").links().len(), 1);
    }

    #[test]
    fn duplicate_nodes_are_recorded_and_discarded() {
        let mut g = graph();
        let mut nerrs = NodeErrors::new();
        g.add_node_ids(&[7, 8, 7], &mut nerrs);
        assert_eq!(g.nodes().len(), 2);
        assert_eq!(nerrs.len(), 1);
    }

    #[rstest]
    #[case(true, 3.0)] // duplicates accumulate
    #[case(false, 2.0)] // second entry discarded
    fn duplicate_links_follow_the_sum_option(#[case] sum_dups: bool, #[case] expected: f32) {
        let mut g = Graph::new(GraphOptions {
            sum_duplicates: sum_dups,
            ..GraphOptions::default()
        })
        .expect("valid");
        let mut nerrs = NodeErrors::new();
        let mut lerrs = LinkErrors::new();
        g.add_nodes(2, 0, &mut nerrs);
        g.add_node_links(0, vec![InputLink::weighted(1, 2.0)], true, &mut lerrs)
            .expect("nodes exist");
        g.add_node_links(0, vec![InputLink::weighted(1, 1.0)], true, &mut lerrs)
            .expect("nodes exist");
        let w = g.node(0).expect("exists").links()[0].weight;
        assert_eq!(w, expected);
        assert_eq!(lerrs.is_empty(), sum_dups);
    }

    #[test]
    fn unweighted_duplicates_are_always_recorded() {
        let mut g = Graph::new(GraphOptions {
            weighted: false,
            sum_duplicates: true,
            ..GraphOptions::default()
        })
        .expect("valid");
        let mut nerrs = NodeErrors::new();
        let mut lerrs = LinkErrors::new();
        g.add_nodes(2, 0, &mut nerrs);
        g.add_node_links(0, vec![InputLink::new(1)], true, &mut lerrs)
            .expect("nodes exist");
        g.add_node_links(0, vec![InputLink::new(1)], true, &mut lerrs)
            .expect("nodes exist");
        assert_eq!(lerrs.len(), 1);
        assert_eq!(g.node(0).expect("exists").links()[0].weight, 1.0);
    }

    #[test]
    fn self_links_double_into_node_weight() {
        let mut g = graph();
        let mut nerrs = NodeErrors::new();
        let mut lerrs = LinkErrors::new();
        g.add_nodes(1, 0, &mut nerrs);
        g.add_node_links(0, vec![InputLink::weighted(0, 1.5)], true, &mut lerrs)
            .expect("node exists");
        assert_eq!(g.node(0).expect("exists").weight(), 3.0);
        assert!(g.node(0).expect("exists").links().is_empty());
        // The graph is still undirected: self-arcs are edges.
        assert!(!g.directed());
        // A second self-link without sum_duplicates is recorded.
        g.add_node_links(0, vec![InputLink::weighted(0, 1.0)], false, &mut lerrs)
            .expect("node exists");
        assert_eq!(lerrs.len(), 1);
    }

    #[test]
    fn missing_destination_is_a_reference_error() {
        let mut g = graph();
        let mut nerrs = NodeErrors::new();
        let mut lerrs = LinkErrors::new();
        g.add_nodes(1, 0, &mut nerrs);
        let err = g
            .add_node_links(0, vec![InputLink::weighted(9, 1.0)], true, &mut lerrs)
            .expect_err("node 9 does not exist");
        assert!(matches!(err, StrataError::Reference { id: 9 }));
    }

    #[test]
    fn total_weight_is_preserved_by_reduction() {
        let mut g = Graph::new(GraphOptions {
            expected_nodes: 101,
            reduction: ReductionPolicy::Severe,
            ..GraphOptions::default()
        })
        .expect("valid");
        let mut nerrs = NodeErrors::new();
        let mut lerrs = LinkErrors::new();
        g.add_nodes(101, 0, &mut nerrs);
        let links: Vec<InputLink> = (1..=90)
            .map(|id| InputLink::weighted(id, 0.01))
            .chain((91..=98).map(|id| InputLink::weighted(id, 1.0)))
            .chain((99..=100).map(|id| InputLink::weighted(id, 10.0)))
            .collect();
        let before: f64 = links.iter().map(|l| f64::from(l.weight())).sum();
        g.add_node_links(0, links, true, &mut lerrs).expect("nodes exist");
        assert_eq!(g.node(0).expect("exists").links().len(), 10);
        assert!((g.total_weight() - before).abs() < 1e-9);
        assert!(g.links_ordered());
    }

    #[test]
    fn validation_backfills_directed_complements() {
        let mut g = graph();
        add_all(&mut g, &[(0, 1, 2.0), (1, 2, 3.0)], true);
        assert!(g.directed());
        let (weight, links) = g.validate(Validation::Standard).expect("consistent");
        // Each arc gained a zero-weight complement.
        assert_eq!(links, 4);
        assert!((weight - 5.0).abs() < 1e-9);
        let n1 = g.node(1).expect("exists");
        assert_eq!(n1.links().len(), 2);
    }

    #[test]
    fn release_and_reingest_reproduces_adjacency() {
        let mut g = graph();
        add_all(&mut g, &[(0, 1, 5.0), (1, 2, 5.0), (2, 0, 1.0)], false);
        let snapshot: Vec<(u32, Vec<Link>)> = g
            .nodes()
            .iter()
            .map(|nd| (nd.id(), nd.links().to_vec()))
            .collect();
        let (nodes, directed) = g.release();
        assert!(!directed);
        assert!(g.nodes().is_empty());

        let mut fresh = graph();
        let mut lerrs = LinkErrors::new();
        let mut nerrs = NodeErrors::new();
        let ids: Vec<u32> = nodes.iter().map(Node::id).collect();
        fresh.add_node_ids(&ids, &mut nerrs);
        for nd in &nodes {
            // Re-ingest as directed entries: the stored representation is
            // already symmetric, so this reproduces it exactly.
            let links: Vec<InputLink> = nd
                .links()
                .iter()
                .map(|l| InputLink::weighted(nodes[l.dest as usize].id(), l.weight))
                .collect();
            if !links.is_empty() {
                fresh.add_node_links(nd.id(), links, true, &mut lerrs).expect("exists");
            }
        }
        let again: Vec<(u32, Vec<Link>)> = fresh
            .nodes()
            .iter()
            .map(|nd| (nd.id(), nd.links().to_vec()))
            .collect();
        assert_eq!(snapshot, again);
    }

    #[test]
    fn shuffle_is_reproducible_for_a_seed() {
        let mk = |seed| {
            let mut g = Graph::new(GraphOptions {
                shuffle: Some(seed),
                ..GraphOptions::default()
            })
            .expect("valid");
            let mut nerrs = NodeErrors::new();
            g.add_nodes(16, 0, &mut nerrs);
            g.nodes().iter().map(Node::id).collect::<Vec<_>>()
        };
        assert_eq!(mk(42), mk(42));
        assert_ne!(mk(42), mk(43));
    }

    proptest! {
        #[test]
        fn links_stay_sorted_under_arbitrary_batches(
            batches in proptest::collection::vec(
                (0u32..16, proptest::collection::vec((0u32..16, 0.0f32..10.0), 1..8), any::<bool>()),
                1..24,
            )
        ) {
            let mut g = Graph::new(GraphOptions::default()).expect("valid");
            let mut nerrs = NodeErrors::new();
            let mut lerrs = LinkErrors::new();
            g.add_nodes(16, 0, &mut nerrs);
            for (src, links, directed) in batches {
                let links: Vec<InputLink> =
                    links.into_iter().map(|(d, w)| InputLink::weighted(d, w)).collect();
                g.add_node_links(src, links, directed, &mut lerrs).expect("all nodes exist");
                prop_assert!(g.links_ordered());
            }
        }
    }
}
