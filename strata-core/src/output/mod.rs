//! Hierarchy output selection.
//!
//! Navigates a finished [`Hierarchy`] to emit the root set, per-level
//! clusterings, custom level selections, the union of distinct clusters, the
//! significant-clusters subset, or the full dendrogram. Cluster-list files
//! use the CNL format, dendrogram dumps the RHB format; files are opened at
//! output time and closed on every exit path.

mod cnl;
mod rhb;

pub use cnl::{ClusterListStyle, CnlWriter};
pub use rhb::write_rhb;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StrataError};
use crate::hierarchy::{ClusterRef, Hierarchy};
use crate::numeric::less;

/// Inverse golden ratio, the `g` constant of the selection options.
pub const GOLDEN_INV: f64 = 0.618_033_988_749_894_9;

/// Complement of the squared inverse exponent, the `e` constant.
pub const EXPM2_COMPL: f64 = 0.864_664_716_763_387_3;

/// Which levels a custom-levels selection ranges over.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LevelMargin {
    /// Select by the per-level cluster count.
    #[default]
    ClusterCount,
    /// Select by level index, bottom = 0.
    LevelId,
    /// Select by shrinkage step number: a step is a level whose full size
    /// drops below the previous level's.
    StepNum,
}

/// Custom level selection bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CustomLevels {
    /// Meaning of the `margmin..=margmax` range.
    pub margin: LevelMargin,
    /// Lower bound of the range.
    pub margmin: u32,
    /// Upper bound of the range; `u32::MAX` leaves it open.
    pub margmax: u32,
    /// Geometric thinning: a retained level must shrink to at most
    /// `prev · clsrstep` clusters; 0 disables thinning.
    pub clsrstep: f32,
    /// Approximate-count mode: bracket this cluster count instead of using
    /// the range.
    pub approx: Option<u32>,
}

impl Default for CustomLevels {
    fn default() -> Self {
        Self {
            margin: LevelMargin::ClusterCount,
            margmin: 0,
            margmax: u32::MAX,
            clsrstep: 0.0,
            approx: None,
        }
    }
}

/// Minimal emitted size of a non-root significant cluster.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SizeBound {
    /// Absolute member count.
    Abs(u32),
    /// log₂ of the node count.
    Log2,
    /// logₑ of the node count.
    LogE,
    /// Node count to the inverse golden power.
    PowGoldInv,
    /// n-th root of the node count.
    Root(u8),
}

impl SizeBound {
    /// Resolves the bound against the clustered node count.
    #[must_use]
    pub fn resolve(&self, nodes: usize) -> f64 {
        let n = nodes.max(1) as f64;
        match *self {
            Self::Abs(v) => f64::from(v),
            Self::Log2 => n.log2(),
            Self::LogE => n.ln(),
            Self::PowGoldInv => n.powf(GOLDEN_INV),
            Self::Root(base) => n.powf(1.0 / f64::from(base.max(1))),
        }
    }
}

/// Significant-clusters selection policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SignifOptions {
    /// Require the constraints of all owners instead of any single one.
    pub match_all_owners: bool,
    /// Inherit constraints from the nearest representative ancestor instead
    /// of the direct owners.
    pub hier_owners: bool,
    /// Emit only clusters with at most one owner.
    pub single_owner_only: bool,
    /// Allowed density drop for descendants; 1 keeps the density flat.
    pub densdrop: f32,
    /// Interpolate the drop linearly from 1 at the root towards `densdrop`
    /// at the bottom instead of compounding it.
    pub densbound: bool,
    /// Weight step ratio separating emitted ancestors and descendants.
    pub wrstep: f32,
    /// Treat `wrstep` as a band: descendants must also stay above
    /// `owner · (1 - wrstep) / wrstep`.
    pub wrange: bool,
    /// Minimal unwrapped size of emitted non-root clusters.
    pub szmin: SizeBound,
}

impl Default for SignifOptions {
    fn default() -> Self {
        Self {
            match_all_owners: false,
            hier_owners: false,
            single_owner_only: false,
            densdrop: 1.0,
            densbound: false,
            wrstep: 1.0,
            wrange: false,
            szmin: SizeBound::Abs(0),
        }
    }
}

impl SignifOptions {
    /// Validates the numeric ranges.
    ///
    /// # Errors
    /// Returns [`StrataError::Config`] for a negative drop or a step ratio
    /// outside its range.
    pub fn validate(&self) -> Result<()> {
        if self.densdrop < 0.0 {
            return Err(StrataError::config("density drop must be non-negative"));
        }
        let wmin = if self.wrange { 0.5 } else { 0.0 };
        if !(self.wrstep > wmin && self.wrstep <= 1.0) {
            return Err(StrataError::config(format!(
                "weight step ratio must lie in ({wmin}, 1]"
            )));
        }
        Ok(())
    }
}

/// What an output selects from the hierarchy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OutputScheme {
    /// The root set, unwrapped.
    Root,
    /// One file per level.
    PerLevel,
    /// Files for the levels matching a custom selection.
    CustomLevels(CustomLevels),
    /// All distinct non-wrapper clusters across the levels, in one file.
    AllClusters,
    /// The density/weight-filtered significant subset.
    Significant(SignifOptions),
    /// The full dendrogram (RHB).
    Hierarchy,
}

/// One requested output file (or file family).
#[derive(Clone, Debug)]
pub struct OutputOptions {
    /// Selection scheme.
    pub scheme: OutputScheme,
    /// Cluster-list body format.
    pub style: ClusterListStyle,
    /// Collapse multi-path shares to the maximum.
    pub max_share: bool,
    /// Suppress member nodes whose id has the top bit set.
    pub filter_members: bool,
    /// Target path; per-level schemes derive `<stem>_<level>` siblings.
    pub path: PathBuf,
}

impl OutputOptions {
    /// A cluster-list output of the given scheme with the default format.
    #[must_use]
    pub fn new(scheme: OutputScheme, path: impl Into<PathBuf>) -> Self {
        Self {
            scheme,
            style: ClusterListStyle::default(),
            max_share: false,
            filter_members: false,
            path: path.into(),
        }
    }
}

/// Writes every requested output of a finished hierarchy.
///
/// A hierarchy without levels produces no files.
///
/// # Errors
/// Propagates selection validation and I/O failures.
pub fn write_outputs(hier: &Hierarchy, outputs: &[OutputOptions]) -> Result<()> {
    if hier.levels().is_empty() && !outputs.is_empty() {
        debug!("the hierarchy has no levels; skipping output");
        return Ok(());
    }
    for out in outputs {
        match &out.scheme {
            OutputScheme::Root => write_root(hier, out)?,
            OutputScheme::PerLevel => {
                let targets: Vec<u16> = (0..hier.levels().len() as u16).collect();
                write_levels(hier, out, &targets)?;
            }
            OutputScheme::CustomLevels(custom) => {
                let targets = target_levels(hier, custom);
                write_levels(hier, out, &targets)?;
            }
            OutputScheme::AllClusters => write_all_clusters(hier, out)?,
            OutputScheme::Significant(signif) => write_significant(hier, out, signif)?,
            OutputScheme::Hierarchy => {
                let file = create_file(&out.path)?;
                write_rhb(hier, BufWriter::new(file))?;
            }
        }
    }
    Ok(())
}

/// Levels selected by a custom-levels request, ascending.
#[must_use]
pub fn target_levels(hier: &Hierarchy, custom: &CustomLevels) -> Vec<u16> {
    let sizes: Vec<u32> = hier.levels().iter().map(|l| l.fullsize()).collect();
    let mut targets: Vec<u16> = if let Some(clsnum) = custom.approx {
        // Bracket the requested count between the closest sizes around it.
        let lo = sizes.iter().copied().filter(|&s| s <= clsnum).max();
        let hi = sizes.iter().copied().filter(|&s| s >= clsnum).min();
        let lo = lo.unwrap_or(u32::MIN);
        let hi = hi.unwrap_or(u32::MAX);
        (0..sizes.len() as u16)
            .filter(|&l| (lo..=hi).contains(&sizes[l as usize]))
            .collect()
    } else {
        match custom.margin {
            LevelMargin::ClusterCount => (0..sizes.len() as u16)
                .filter(|&l| {
                    (custom.margmin..=custom.margmax).contains(&sizes[l as usize])
                })
                .collect(),
            LevelMargin::LevelId => (0..sizes.len() as u16)
                .filter(|&l| (custom.margmin..=custom.margmax).contains(&u32::from(l)))
                .collect(),
            LevelMargin::StepNum => {
                let mut step = 0u32;
                let mut out = Vec::new();
                for l in 0..sizes.len() {
                    if l > 0 && sizes[l] < sizes[l - 1] {
                        step += 1;
                    }
                    if (custom.margmin..=custom.margmax).contains(&step) {
                        out.push(l as u16);
                    }
                }
                out
            }
        }
    };
    if custom.clsrstep > 0.0 && custom.clsrstep < 1.0 && targets.len() > 1 {
        let last = *targets.last().expect("non-empty targets");
        let mut thinned = vec![targets[0]];
        let mut margin = f64::from(sizes[targets[0] as usize]) * f64::from(custom.clsrstep);
        for &lev in &targets[1..] {
            if f64::from(sizes[lev as usize]) <= margin {
                margin = f64::from(sizes[lev as usize]) * f64::from(custom.clsrstep);
                thinned.push(lev);
            }
        }
        // The top of the selection is always kept as the coarse margin.
        if *thinned.last().expect("non-empty") != last {
            thinned.push(last);
        }
        targets = thinned;
    }
    targets
}

/// The level span (exclusive end) a cluster represents: propagation chains
/// are transparent, so the community keeps appearing in level files until a
/// real merge (or the top, for root lineages).
fn emission_end(hier: &Hierarchy, cl: ClusterRef) -> u16 {
    let mut cur = cl;
    loop {
        let cluster = hier.cluster(cur);
        match cluster.owners() {
            [] => return hier.levels().len() as u16,
            [only] => {
                let owner = ClusterRef {
                    lev: cur.lev + 1,
                    idx: only.dest,
                };
                if hier.is_trivial(owner) {
                    cur = owner;
                } else {
                    return cur.lev + 1;
                }
            }
            _ => return cur.lev + 1,
        }
    }
}

fn write_root(hier: &Hierarchy, out: &OutputOptions) -> Result<()> {
    let mut writer = cnl_writer(out)?;
    writer.begin(hier.nodes().len() as u32, Some(hier.root().len() as u32))?;
    for &root in hier.root() {
        let members = hier.unwrap(root, out.max_share);
        writer.cluster(hier, hier.cluster(root).id(), &members)?;
    }
    writer.finish().map(drop)
}

fn write_levels(hier: &Hierarchy, out: &OutputOptions, targets: &[u16]) -> Result<()> {
    if targets.is_empty() {
        debug!("no levels matched the selection; no files written");
        return Ok(());
    }
    let mut writers = Vec::with_capacity(targets.len());
    for &lev in targets {
        let path = per_level_path(&out.path, lev);
        let mut writer = CnlWriter::new(
            BufWriter::new(create_file(&path)?),
            out.style,
            out.filter_members,
        );
        writer.begin(
            hier.nodes().len() as u32,
            Some(hier.levels()[lev as usize].fullsize()),
        )?;
        writers.push(writer);
    }

    // Bottom-up over all clusters so propagated communities reach every
    // covering level file.
    for lev in 0..hier.levels().len() as u16 {
        for idx in 0..hier.levels()[lev as usize].clusters().len() as u32 {
            let cl = ClusterRef { lev, idx };
            if hier.is_trivial(cl) || hier.is_wrapper(cl) {
                continue;
            }
            let end = emission_end(hier, cl);
            let members = hier.unwrap(cl, out.max_share);
            let id = hier.cluster(cl).id();
            for (w, &target) in writers.iter_mut().zip(targets) {
                if (lev..end).contains(&target) {
                    w.cluster(hier, id, &members)?;
                }
            }
        }
    }
    for w in writers {
        w.finish()?;
    }
    Ok(())
}

fn write_all_clusters(hier: &Hierarchy, out: &OutputOptions) -> Result<()> {
    let mut writer = cnl_writer(out)?;
    writer.begin(hier.nodes().len() as u32, None)?;
    for lev in 0..hier.levels().len() as u16 {
        for idx in 0..hier.levels()[lev as usize].clusters().len() as u32 {
            let cl = ClusterRef { lev, idx };
            if hier.is_trivial(cl) || hier.is_wrapper(cl) {
                continue;
            }
            let members = hier.unwrap(cl, out.max_share);
            writer.cluster(hier, hier.cluster(cl).id(), &members)?;
        }
    }
    writer.finish().map(drop)
}

/// Owner-derived constraints a descendant must satisfy to be emitted.
struct OwnerConstraint {
    dens: f64,
    weight: f64,
}

fn write_significant(hier: &Hierarchy, out: &OutputOptions, signif: &SignifOptions) -> Result<()> {
    signif.validate()?;
    let mut writer = cnl_writer(out)?;
    writer.begin(hier.nodes().len() as u32, None)?;

    let densdrop = f64::from(signif.densdrop);
    let wrstep = f64::from(signif.wrstep);
    let levsnum = hier.levels().len() as f64;
    let szmin = signif.szmin.resolve(hier.nodes().len());
    let wlow = |bound: f64| bound * (1.0 - wrstep) / wrstep;

    let mut csts: HashMap<ClusterRef, OwnerConstraint> = HashMap::new();
    let mut emitted = 0u32;

    for (levind, lev) in (0..hier.levels().len() as u16).rev().enumerate() {
        for idx in 0..hier.levels()[lev as usize].clusters().len() as u32 {
            let cl = ClusterRef { lev, idx };
            let cluster = hier.cluster(cl);
            let is_root = cluster.is_root();
            let weight = cluster.weight();
            let dens = if cluster.nnodes() > 0.0 {
                weight / cluster.nnodes()
            } else {
                0.0
            };

            let mut savdens = 0.0_f64;
            let mut savwgh = 0.0_f64;
            let mut representative = is_root;
            if is_root {
                if signif.densbound {
                    savdens = dens;
                }
            } else {
                let mut matched = 0usize;
                let mut bounded = 0usize;
                for ow in cluster.owners() {
                    let key = ClusterRef {
                        lev: lev + 1,
                        idx: ow.dest,
                    };
                    let Some(ocst) = csts.get(&key) else { continue };
                    bounded += 1;
                    // For all-owner matching keep the strictest inherited
                    // bound (densest, lightest); for any-owner the laxest.
                    let denser = if signif.match_all_owners {
                        !less(ocst.dens, savdens)
                    } else {
                        !less(savdens, ocst.dens)
                    };
                    let lighter = if signif.match_all_owners {
                        !less(savwgh, ocst.weight)
                    } else {
                        !less(ocst.weight, savwgh)
                    };
                    if (savdens == 0.0 || denser) && (savwgh == 0.0 || lighter) {
                        savdens = ocst.dens;
                        savwgh = ocst.weight;
                    }
                    if !signif.hier_owners
                        && (signif.match_all_owners || matched == 0)
                        && !less(dens, ocst.dens)
                        && !less(ocst.weight, weight)
                        && (!signif.wrange || !less(weight, wlow(ocst.weight)))
                    {
                        matched += 1;
                    }
                }
                let owners_ok = cluster.owners().len() == 1 || !signif.single_owner_only;
                let constrained = if signif.hier_owners {
                    !less(dens, savdens)
                        && !less(savwgh, weight)
                        && (!signif.wrange || !less(weight, wlow(savwgh)))
                } else {
                    let required = if signif.match_all_owners {
                        bounded.max(1)
                    } else {
                        1
                    };
                    matched > 0 && matched == required
                };
                representative = owners_ok && constrained;
            }

            if signif.densbound && savdens > 0.0 {
                savdens *= 1.0 - (levind as f64) * (1.0 - densdrop) / levsnum;
            }
            // Propagations pass their inherited constraints through
            // unchanged; real clusters re-derive them from their own
            // density and weight once they are representative (or always,
            // under direct-owner matching).
            let trivial = hier.is_trivial(cl);
            if !trivial && (!signif.hier_owners || representative) {
                if !signif.densbound {
                    savdens = dens * densdrop;
                }
                savwgh = weight * wrstep;
            }
            csts.insert(
                cl,
                OwnerConstraint {
                    dens: savdens,
                    weight: savwgh,
                },
            );

            if representative && (cluster.des().len() >= 2 || is_root) {
                let members = hier.unwrap(cl, out.max_share);
                if is_root || members.len() as f64 >= szmin {
                    writer.cluster(hier, cluster.id(), &members)?;
                    emitted += 1;
                } else {
                    debug!(cluster = cluster.id(), "dropped by the size bound");
                }
            }
        }
    }
    debug!(emitted, "significant clusters written");
    writer.finish().map(drop)
}

fn cnl_writer(out: &OutputOptions) -> Result<CnlWriter<BufWriter<File>>> {
    Ok(CnlWriter::new(
        BufWriter::new(create_file(&out.path)?),
        out.style,
        out.filter_members,
    ))
}

/// Creates the file, making any missing parent directories.
fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| StrataError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    File::create(path).map_err(|source| StrataError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Sibling path for one level of a multi-level output: `out.cnl` becomes
/// `out_3.cnl`.
#[must_use]
pub fn per_level_path(path: &Path, lev: u16) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clusters".to_owned());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{stem}_{lev}{ext}"))
}

/// Writes a cluster list to an arbitrary seekable sink; the in-memory
/// counterpart of the path-based outputs, used by tests and embedders.
///
/// # Errors
/// Propagates CNL writer failures.
pub fn write_root_to<W: Write + Seek>(
    hier: &Hierarchy,
    style: ClusterListStyle,
    max_share: bool,
    sink: W,
) -> Result<W> {
    let mut writer = CnlWriter::new(sink, style, false);
    writer.begin(hier.nodes().len() as u32, Some(hier.root().len() as u32))?;
    for &root in hier.root() {
        let members = hier.unwrap(root, max_share);
        writer.cluster(hier, hier.cluster(root).id(), &members)?;
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::graph::{Graph, GraphOptions, InputLink, LinkErrors, NodeErrors};
    use crate::options::ClusterOptions;

    fn clustered(edges: &[(u32, u32, f32)], nodes: u32) -> Hierarchy {
        let mut g = Graph::new(GraphOptions::default()).expect("valid options");
        let mut nerrs = NodeErrors::new();
        let mut lerrs = LinkErrors::new();
        g.add_nodes(nodes, 0, &mut nerrs);
        for &(s, d, w) in edges {
            g.add_node_links(s, vec![InputLink::weighted(d, w)], false, &mut lerrs)
                .expect("nodes exist");
        }
        let opts = ClusterOptions::builder().build().expect("defaults");
        crate::cluster::cluster(&mut g, &opts).expect("clusters")
    }

    fn two_triangles() -> Hierarchy {
        clustered(
            &[
                (0, 1, 1.0),
                (0, 2, 1.0),
                (1, 2, 1.0),
                (3, 4, 1.0),
                (3, 5, 1.0),
                (4, 5, 1.0),
            ],
            6,
        )
    }

    #[test]
    fn root_output_lists_each_root_once() {
        let hier = two_triangles();
        let sink = std::io::Cursor::new(Vec::new());
        let out = write_root_to(&hier, ClusterListStyle::Extended, false, sink)
            .expect("write succeeds");
        let text = String::from_utf8(out.into_inner()).expect("utf-8");
        assert!(text.starts_with("# Clusters: 2,"));
        assert!(text.contains("0> 0 1 2\n"));
        assert!(text.contains("1> 3 4 5\n"));
    }

    #[rstest]
    #[case(LevelMargin::ClusterCount, 1, 2, vec![0])]
    #[case(LevelMargin::LevelId, 0, 0, vec![0])]
    #[case(LevelMargin::StepNum, 0, 99, vec![0])]
    fn custom_level_targets(
        #[case] margin: LevelMargin,
        #[case] lo: u32,
        #[case] hi: u32,
        #[case] expected: Vec<u16>,
    ) {
        let hier = two_triangles();
        let custom = CustomLevels {
            margin,
            margmin: lo,
            margmax: hi,
            ..CustomLevels::default()
        };
        assert_eq!(target_levels(&hier, &custom), expected);
    }

    #[test]
    fn approx_brackets_the_requested_count() {
        let hier = two_triangles();
        let custom = CustomLevels {
            approx: Some(2),
            ..CustomLevels::default()
        };
        assert_eq!(target_levels(&hier, &custom), vec![0]);
    }

    #[test]
    fn size_bounds_resolve() {
        assert_eq!(SizeBound::Abs(3).resolve(100), 3.0);
        assert!((SizeBound::Log2.resolve(1024) - 10.0).abs() < 1e-9);
        assert!(SizeBound::Root(2).resolve(100) - 10.0 < 1e-9);
        assert!(SizeBound::PowGoldInv.resolve(100) > 10.0);
    }

    #[test]
    fn per_level_paths_are_siblings() {
        let p = per_level_path(Path::new("out/clusters.cnl"), 3);
        assert_eq!(p, Path::new("out/clusters_3.cnl"));
        let bare = per_level_path(Path::new("clusters"), 0);
        assert_eq!(bare, Path::new("clusters_0"));
    }

    #[test]
    fn significant_default_emits_roots() {
        let hier = two_triangles();
        let dir = std::env::temp_dir().join("strata-signif-test");
        let path = dir.join("signif.cnl");
        let out = OutputOptions {
            scheme: OutputScheme::Significant(SignifOptions::default()),
            style: ClusterListStyle::Extended,
            max_share: false,
            filter_members: false,
            path: path.clone(),
        };
        write_outputs(&hier, &[out]).expect("write succeeds");
        let text = std::fs::read_to_string(&path).expect("file written");
        assert!(text.starts_with("# Clusters: 2"));
        assert!(text.contains("0 1 2"));
        assert!(text.contains("3 4 5"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn wrappers_are_filtered_from_level_output() {
        // A triangle plus an isolated node: the node's wrapper must not
        // appear in the level file, the triangle must.
        let hier = clustered(&[(0, 1, 1.0), (0, 2, 1.0), (1, 2, 1.0)], 4);
        let dir = std::env::temp_dir().join("strata-levels-test");
        let out = OutputOptions {
            scheme: OutputScheme::PerLevel,
            style: ClusterListStyle::Simple,
            max_share: false,
            filter_members: false,
            path: dir.join("lv.cnl"),
        };
        write_outputs(&hier, &[out]).expect("write succeeds");
        let text = std::fs::read_to_string(per_level_path(&dir.join("lv.cnl"), 0))
            .expect("level file written");
        assert!(text.contains("0 1 2"));
        assert!(!text.contains('3'), "wrapper member leaked: {text}");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
