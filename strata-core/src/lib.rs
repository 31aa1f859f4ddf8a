//! Strata core library: deterministic agglomerative overlap-aware clustering
//! of weighted or unweighted, directed or undirected graphs.
//!
//! The pipeline ingests pairwise similarities into a [`Graph`], optionally
//! discarding statistically insignificant links, builds a multi-level
//! [`Hierarchy`] of (possibly overlapping, fuzzy) clusters by fusing
//! mutually-best merge candidates, and emits selections of the hierarchy
//! through the [`output`] engine. Results are stable and independent of the
//! input order.

mod agordi;
mod cluster;
mod error;
mod graph;
mod hierarchy;
mod numeric;
mod options;
mod output;
mod profile;

pub use crate::{
    agordi::{AgordiHash, Correction, COR_VAL},
    cluster::{cluster, cluster_nodes},
    error::{Result, StrataError, StrataErrorCode},
    graph::{Graph, GraphOptions, InputLink, Link, LinkErrors, Node, NodeErrors, ID_NONE},
    hierarchy::{Cluster, ClusterLink, ClusterRef, Hierarchy, Level, OwnerRef, Score},
    options::{
        reduced_links_margin, ClusterOptions, ClusterOptionsBuilder, GammaSweep, Reduction,
        ReductionPolicy, RootBound, Validation,
    },
    output::{
        per_level_path, target_levels, write_outputs, write_rhb, write_root_to, ClusterListStyle,
        CnlWriter, CustomLevels, LevelMargin, OutputOptions, OutputScheme, SignifOptions,
        SizeBound, EXPM2_COMPL, GOLDEN_INV,
    },
    profile::{build_profile, BuildProfile, Membership, BUILD_PROFILE},
};
