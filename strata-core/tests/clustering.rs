//! End-to-end clustering scenarios over the public API.

use std::collections::BTreeMap;

use rstest::rstest;

use strata_core::{
    cluster, ClusterListStyle, ClusterOptions, Graph, GraphOptions, Hierarchy, InputLink,
    LinkErrors, NodeErrors, ReductionPolicy, RootBound, Validation,
};

fn build_graph(edges: &[(u32, u32, f32)], nodes: u32, directed: bool) -> Graph {
    let mut g = Graph::new(GraphOptions::default()).expect("default options are valid");
    let mut nerrs = NodeErrors::new();
    let mut lerrs = LinkErrors::new();
    g.add_nodes(nodes, 0, &mut nerrs);
    for &(s, d, w) in edges {
        g.add_node_links(s, vec![InputLink::weighted(d, w)], directed, &mut lerrs)
            .expect("all nodes exist");
    }
    assert!(nerrs.is_empty() && lerrs.is_empty(), "unexpected duplicates");
    g
}

fn defaults() -> ClusterOptions {
    ClusterOptions::builder().build().expect("defaults are valid")
}

fn root_memberships(hier: &Hierarchy) -> Vec<BTreeMap<u32, f64>> {
    hier.root()
        .iter()
        .map(|&r| hier.unwrap(r, false))
        .collect()
}

fn member_ids(members: &BTreeMap<u32, f64>) -> Vec<u32> {
    members.keys().copied().collect()
}

/// Triangle: one level, one cluster, full shares.
#[test]
fn s1_triangle_collapses_to_one_cluster() {
    let mut g = build_graph(&[(0, 1, 1.0), (0, 2, 1.0), (1, 2, 1.0)], 3, false);
    let hier = cluster(&mut g, &defaults()).expect("clustering succeeds");
    assert_eq!(hier.levels().len(), 1);
    assert_eq!(hier.root().len(), 1);
    let members = hier.unwrap(hier.root()[0], false);
    assert_eq!(member_ids(&members), vec![0, 1, 2]);
    for share in members.values() {
        assert!((share - 1.0).abs() < 1e-12);
    }
}

/// Two disconnected triangles split at level 0; a standalone up-bound then
/// fuses them into a single root.
#[test]
fn s2_disconnected_triangles() {
    let edges = [
        (0, 1, 1.0),
        (0, 2, 1.0),
        (1, 2, 1.0),
        (3, 4, 1.0),
        (3, 5, 1.0),
        (4, 5, 1.0),
    ];
    let mut g = build_graph(&edges, 6, false);
    let hier = cluster(&mut g, &defaults()).expect("clustering succeeds");
    assert_eq!(hier.levels().len(), 1);
    let roots = root_memberships(&hier);
    assert_eq!(roots.len(), 2);
    assert_eq!(member_ids(&roots[0]), vec![0, 1, 2]);
    assert_eq!(member_ids(&roots[1]), vec![3, 4, 5]);

    let mut g = build_graph(&edges, 6, false);
    let bound = RootBound {
        up: true,
        standalone: true,
        ..RootBound::default()
    };
    let opts = ClusterOptions::builder()
        .with_root_bound(bound, 1)
        .build()
        .expect("valid combination");
    let hier = cluster(&mut g, &opts).expect("clustering succeeds");
    assert_eq!(hier.levels().len(), 2);
    assert_eq!(hier.root().len(), 1);
    let members = hier.unwrap(hier.root()[0], false);
    assert_eq!(member_ids(&members), vec![0, 1, 2, 3, 4, 5]);
}

/// Weighted square with a light diagonal: two dyads at gamma 1, one cluster
/// at gamma 0.2.
#[rstest]
#[case(1.0, 2)]
#[case(0.2, 1)]
fn s3_square_resolution(#[case] gamma: f64, #[case] expected_roots: usize) {
    let edges = [
        (0, 1, 5.0),
        (1, 2, 5.0),
        (2, 3, 5.0),
        (3, 0, 5.0),
        (0, 2, 1.0),
    ];
    let mut g = build_graph(&edges, 4, false);
    let opts = ClusterOptions::builder()
        .with_gamma(gamma)
        .build()
        .expect("valid gamma");
    let hier = cluster(&mut g, &opts).expect("clustering succeeds");
    assert_eq!(hier.root().len(), expected_roots);
    let roots = root_memberships(&hier);
    if expected_roots == 2 {
        assert_eq!(member_ids(&roots[0]), vec![0, 1]);
        assert_eq!(member_ids(&roots[1]), vec![2, 3]);
    } else {
        assert_eq!(member_ids(&roots[0]), vec![0, 1, 2, 3]);
    }
}

/// Hub shared by three spokes: the hub belongs to all three pair clusters
/// with a third of its membership each.
#[test]
fn s4_fuzzy_overlap_star() {
    let edges = [(0, 2, 1.0), (1, 2, 1.0), (2, 3, 1.0)];
    let mut g = build_graph(&edges, 4, false);
    let hier = cluster(&mut g, &defaults()).expect("clustering succeeds");
    let roots = root_memberships(&hier);
    assert_eq!(roots.len(), 3);
    assert_eq!(member_ids(&roots[0]), vec![0, 2]);
    assert_eq!(member_ids(&roots[1]), vec![1, 2]);
    assert_eq!(member_ids(&roots[2]), vec![2, 3]);
    for members in &roots {
        assert!((members[&2] - 1.0 / 3.0).abs() < 1e-9);
    }
    // The hub's shares over its owners rebuild a whole membership.
    let hub_total: f64 = roots.iter().map(|m| m[&2]).sum();
    assert!((hub_total - 1.0).abs() < 1e-9);
}

/// Severe input reduction folds the lightweight tail of a directed weighted
/// batch into self-weights, retaining exactly ten links.
#[test]
fn s5_input_reduction() {
    let mut g = Graph::new(GraphOptions {
        expected_nodes: 101,
        reduction: ReductionPolicy::Severe,
        ..GraphOptions::default()
    })
    .expect("reduction configuration is valid");
    let mut nerrs = NodeErrors::new();
    let mut lerrs = LinkErrors::new();
    g.add_nodes(101, 0, &mut nerrs);
    let links: Vec<InputLink> = (1..=90)
        .map(|id| InputLink::weighted(id, 0.01))
        .chain((91..=98).map(|id| InputLink::weighted(id, 1.0)))
        .chain((99..=100).map(|id| InputLink::weighted(id, 10.0)))
        .collect();
    let total_before = g.total_weight() + 28.9;
    g.add_node_links(0, links, true, &mut lerrs)
        .expect("all nodes exist");
    assert_eq!(g.node(0).expect("node 0 exists").links().len(), 10);
    assert!((g.total_weight() - total_before).abs() < 1e-6);
    assert!(g.links_ordered());
}

/// A clique of four equal nodes merges in one step to a single root with
/// zero modularity.
#[test]
fn clique_of_four_has_zero_modularity() {
    let edges = [
        (0, 1, 1.0),
        (0, 2, 1.0),
        (0, 3, 1.0),
        (1, 2, 1.0),
        (1, 3, 1.0),
        (2, 3, 1.0),
    ];
    let mut g = build_graph(&edges, 4, false);
    let hier = cluster(&mut g, &defaults()).expect("clustering succeeds");
    assert_eq!(hier.levels().len(), 1);
    assert_eq!(hier.root().len(), 1);
    assert!(hier.score().modularity.abs() < 1e-9);
}

#[test]
fn empty_graph_produces_no_levels_and_no_files() {
    let mut g = Graph::new(GraphOptions::default()).expect("valid options");
    let hier = cluster(&mut g, &defaults()).expect("empty input is accepted");
    assert!(hier.levels().is_empty());
    let out = strata_core::OutputOptions::new(
        strata_core::OutputScheme::Root,
        std::env::temp_dir().join("strata-empty-test/none.cnl"),
    );
    strata_core::write_outputs(&hier, &[out.clone()]).expect("no-op output");
    assert!(!out.path.exists());
}

#[test]
fn modularity_stays_in_range_across_gammas() {
    let edges = [
        (0, 1, 3.0),
        (1, 2, 1.0),
        (2, 3, 4.0),
        (3, 4, 1.0),
        (4, 0, 2.0),
        (1, 3, 0.5),
    ];
    for gamma in [0.1, 0.5, 1.0, 2.0, 5.0] {
        let mut g = build_graph(&edges, 5, false);
        let opts = ClusterOptions::builder()
            .with_gamma(gamma)
            .build()
            .expect("valid gamma");
        let hier = cluster(&mut g, &opts).expect("clustering succeeds");
        let q = hier.score().modularity;
        let lower = -0.5 * gamma.max(1.0);
        assert!((lower..=1.0).contains(&q), "Q = {q} at gamma = {gamma}");
        if gamma <= 1.0 {
            assert!(q >= -0.5, "Q = {q} breaks the gamma <= 1 bound");
        }
    }
}

/// Share bookkeeping: every node's shares across its level-0 owners sum to
/// one, whatever the structure.
#[test]
fn node_shares_sum_to_one() {
    let edges = [
        (0, 2, 1.0),
        (1, 2, 1.0),
        (2, 3, 1.0),
        (3, 4, 2.0),
        (4, 5, 2.0),
        (3, 5, 2.0),
    ];
    let mut g = build_graph(&edges, 6, false);
    let hier = cluster(&mut g, &defaults()).expect("clustering succeeds");
    for (ix, node) in hier.nodes().iter().enumerate() {
        if node.owners().is_empty() {
            continue;
        }
        let mut total = 0.0;
        for &root in hier.root() {
            let members = hier.unwrap(root, false);
            if let Some(share) = members.get(&(ix as u32)) {
                total += share;
            }
        }
        let tol = (node.owners().len() as f64) * 16.0 * f64::EPSILON;
        assert!((total - 1.0).abs() <= tol.max(1e-9), "node {ix}: {total}");
    }
}

/// Directed arcs cluster after standard validation backfills complements.
#[test]
fn directed_triangle_clusters_like_undirected() {
    let edges = [(0, 1, 1.0), (1, 2, 1.0), (2, 0, 1.0)];
    let mut g = build_graph(&edges, 3, true);
    assert!(g.directed());
    let opts = ClusterOptions::builder()
        .with_validation(Validation::Severe)
        .build()
        .expect("valid");
    let hier = cluster(&mut g, &opts).expect("clustering succeeds");
    assert_eq!(hier.root().len(), 1);
    assert_eq!(
        member_ids(&hier.unwrap(hier.root()[0], false)),
        vec![0, 1, 2]
    );
}

/// The produced root list round-trips through the CNL writer.
#[test]
fn root_output_is_well_formed() {
    let edges = [(0, 1, 5.0), (1, 2, 5.0), (2, 3, 5.0), (3, 0, 5.0), (0, 2, 1.0)];
    let mut g = build_graph(&edges, 4, false);
    let hier = cluster(&mut g, &defaults()).expect("clustering succeeds");
    let sink = std::io::Cursor::new(Vec::new());
    let out = strata_core::write_root_to(&hier, ClusterListStyle::Extended, false, sink)
        .expect("write succeeds");
    let text = String::from_utf8(out.into_inner()).expect("utf-8");
    let mut lines = text.lines();
    let header = lines.next().expect("header present");
    assert!(header.starts_with("# Clusters: 2,"));
    assert!(header.ends_with("Nodes: 4, Fuzzy: 1, Numbered: 1"));
    let body: Vec<&str> = lines.collect();
    assert_eq!(body, vec!["0> 0 1", "1> 2 3"]);
}
