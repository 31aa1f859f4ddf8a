//! Command implementations and argument parsing for the strata CLI.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use strata_core::{
    build_profile, cluster, ClusterListStyle, ClusterOptions, CustomLevels, GammaSweep, Graph,
    LevelMargin, Membership, OutputOptions, OutputScheme, Reduction, ReductionPolicy, RootBound,
    SignifOptions, SizeBound, StrataError, Validation,
};

use crate::parsers::{FileFormat, NslParser, ParseOptions, RcgParser};

/// Top-level CLI options parsed by [`clap`].
#[derive(Debug, Parser, Clone)]
#[command(
    name = "strata",
    about = "Deterministic agglomerative overlap-aware graph clustering."
)]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Cluster an input network and write the selected outputs.
    Cluster(ClusterCommand),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Cluster(_) => "cluster",
        }
    }
}

/// Input format selector.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    /// Readable Compact Graph (`/edges`, `/arcs` sections).
    Rcg,
    /// Edge list, one undirected link per line.
    Nse,
    /// Arc list, one directed link per line.
    Nsa,
}

/// Reduction policy selector.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum ReductionArg {
    /// Keep every link.
    #[default]
    None,
    /// Accurate reduction for heavy-tailed weights.
    Accurate,
    /// Mean reduction, the balanced default.
    Mean,
    /// Severe reduction for maximal speedup.
    Severe,
}

impl From<ReductionArg> for ReductionPolicy {
    fn from(arg: ReductionArg) -> Self {
        match arg {
            ReductionArg::None => Self::None,
            ReductionArg::Accurate => Self::Accurate,
            ReductionArg::Mean => Self::Mean,
            ReductionArg::Severe => Self::Severe,
        }
    }
}

/// Root bound direction selector.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum BoundArg {
    /// Shrink up and terminate down.
    #[default]
    Both,
    /// Keep merging until the bound is met.
    Up,
    /// Terminate early once the bound is met.
    Down,
}

/// Cluster-list style selector.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum StyleArg {
    /// Nodes only, no header.
    Pure,
    /// Nodes only, with header.
    Simple,
    /// Unequal shares listed.
    Shared,
    /// Numbered lines with shares.
    #[default]
    Extended,
}

impl From<StyleArg> for ClusterListStyle {
    fn from(arg: StyleArg) -> Self {
        match arg {
            StyleArg::Pure => Self::Pure,
            StyleArg::Simple => Self::Simple,
            StyleArg::Shared => Self::Shared,
            StyleArg::Extended => Self::Extended,
        }
    }
}

/// Custom level margin selector.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum MarginArg {
    /// Range over per-level cluster counts.
    #[default]
    Count,
    /// Range over level indices.
    Id,
    /// Range over shrinkage step numbers.
    Step,
}

impl From<MarginArg> for LevelMargin {
    fn from(arg: MarginArg) -> Self {
        match arg {
            MarginArg::Count => Self::ClusterCount,
            MarginArg::Id => Self::LevelId,
            MarginArg::Step => Self::StepNum,
        }
    }
}

/// Options accepted by the `cluster` command.
#[derive(Debug, Args, Clone)]
pub struct ClusterCommand {
    /// Input network (similarity matrix) to be processed.
    pub network: PathBuf,

    /// Input format; inferred from the file extension when omitted.
    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,

    /// Resolution gamma: (0, 1) coarsens, above 1 refines; a negative value
    /// requests dynamic per-level resolution.
    #[arg(long, short = 'g', default_value_t = 1.0, allow_hyphen_values = true)]
    pub gamma: f64,

    /// Gamma sweep step ratio in (0, 1); enables the multi-resolution sweep
    /// from `gamma` down to `--gamma-min`.
    #[arg(long)]
    pub gamma_ratio: Option<f64>,

    /// Ceiling the sweep step adapts towards near gamma = 1.
    #[arg(long, default_value_t = GammaSweep::RATIO_MAX_DEFAULT)]
    pub gamma_ratio_max: f64,

    /// Lower end of the gamma sweep.
    #[arg(long, default_value_t = 0.1)]
    pub gamma_min: f64,

    /// Max cluster count of the root level; 0 leaves it unbounded.
    #[arg(long, short = 'b', default_value_t = 0)]
    pub root_max: u32,

    /// Bounding direction applied when `--root-max` is set.
    #[arg(long, value_enum, default_value_t = BoundArg::Both)]
    pub root_bound: BoundArg,

    /// Also fuse disconnected root clusters while shrinking up.
    #[arg(long)]
    pub standalone: bool,

    /// Admit only non-negative-gain merges while shrinking up.
    #[arg(long)]
    pub nonnegative: bool,

    /// Per-level link reduction policy.
    #[arg(long, short = 'r', value_enum, default_value_t = ReductionArg::None)]
    pub reduction: ReductionArg,

    /// Rank reduced links by raw weight instead of the optimisation
    /// function.
    #[arg(long)]
    pub reduction_weight: bool,

    /// Apply the reduction policy already at ingestion (directed weighted
    /// inputs with a declared node count).
    #[arg(long)]
    pub reduce_input: bool,

    /// Link validation severity: 0 none, 1 standard, 2 severe.
    #[arg(long, short = 'l', default_value_t = 1)]
    pub validation: u8,

    /// Candidate prefilter margin in [0, 1]: the fraction of items that
    /// must hold a positive-gain candidate for the prefilter to apply.
    /// Levels below the margin admit non-positive candidates, so merging
    /// continues past gain exhaustion; 0 keeps the prefilter always on.
    #[arg(long, short = 'f')]
    pub filter_margin: Option<f64>,

    /// Minimal modularity gain per level; undercut terminates the build.
    #[arg(long, short = 'm', allow_hyphen_values = true)]
    pub gain_margin: Option<f64>,

    /// Divide the gain margin by the square root of the link count.
    #[arg(long)]
    pub gain_margin_div: bool,

    /// Shuffle node creation order with this seed.
    #[arg(long, short = 's')]
    pub shuffle: Option<u64>,

    /// Accumulate weights of duplicated links instead of skipping them.
    #[arg(long, short = 'a')]
    pub sum_dups: bool,

    /// Disable the order-invariant candidate-set hash acceleration.
    #[arg(long)]
    pub no_ahash: bool,

    /// Trace the optimisation value for each clustering iteration.
    #[arg(long, short = 'i')]
    pub modtrace: bool,

    /// Write the root clustering to this file (default output when no other
    /// is selected).
    #[arg(long)]
    pub root_out: Option<PathBuf>,

    /// Write one file per selected level, derived from this path.
    #[arg(long)]
    pub levels_out: Option<PathBuf>,

    /// Write all distinct clusters across levels to this file.
    #[arg(long)]
    pub all_out: Option<PathBuf>,

    /// Write the significant-clusters selection to this file.
    #[arg(long)]
    pub signif_out: Option<PathBuf>,

    /// Write the full dendrogram (RHB) to this file.
    #[arg(long)]
    pub hier_out: Option<PathBuf>,

    /// Cluster-list body style.
    #[arg(long, value_enum, default_value_t = StyleArg::Extended)]
    pub style: StyleArg,

    /// Keep only the maximum share of fuzzy-overlapping nodes.
    #[arg(long)]
    pub max_share: bool,

    /// Suppress member nodes whose id has the top bit set.
    #[arg(long)]
    pub filter_members: bool,

    /// Lower bound of the custom level selection.
    #[arg(long)]
    pub lev_min: Option<u32>,

    /// Upper bound of the custom level selection.
    #[arg(long)]
    pub lev_max: Option<u32>,

    /// Meaning of the custom level range.
    #[arg(long, value_enum, default_value_t = MarginArg::Count)]
    pub lev_margin: MarginArg,

    /// Geometric level thinning ratio in (0, 1).
    #[arg(long)]
    pub lev_rstep: Option<f32>,

    /// Select the levels bracketing this cluster count.
    #[arg(long)]
    pub lev_approx: Option<u32>,

    /// Significant selection: require the constraints of all owners.
    #[arg(long)]
    pub signif_all_owners: bool,

    /// Significant selection: inherit constraints from the nearest
    /// representative ancestor.
    #[arg(long)]
    pub signif_hier: bool,

    /// Significant selection: emit only clusters with at most one owner.
    #[arg(long)]
    pub signif_single_owner: bool,

    /// Allowed density drop for descendants.
    #[arg(long, default_value_t = 1.0)]
    pub densdrop: f32,

    /// Interpolate the density drop linearly from root to bottom.
    #[arg(long)]
    pub densbound: bool,

    /// Weight step ratio separating emitted ancestors and descendants.
    #[arg(long, default_value_t = 1.0)]
    pub wrstep: f32,

    /// Treat the weight step as a band with a lower bound.
    #[arg(long)]
    pub wrange: bool,

    /// Minimal size of emitted non-root clusters: a number, or one of
    /// `l2`, `le`, `pg`, `r<2..8>`.
    #[arg(long, value_parser = parse_size_bound)]
    pub szmin: Option<SizeBound>,
}

/// Errors surfaced while executing CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Core ingestion, clustering, or output failed.
    #[error(transparent)]
    Core(#[from] StrataError),
    /// The validation severity flag was out of range.
    #[error("invalid validation severity {got}; expected 0..=2")]
    InvalidValidation {
        /// Supplied severity value.
        got: u8,
    },
}

/// Summarises the outcome of executing a CLI command.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    /// Input network path as given.
    pub network: PathBuf,
    /// Modularity at the stop point.
    pub modularity: f64,
    /// Distinct clusters across the hierarchy.
    pub clusters: u64,
    /// Number of built levels.
    pub levels: usize,
    /// Size of the root set.
    pub roots: usize,
    /// Clustered node count.
    pub nodes: usize,
    /// Directed node link count.
    pub links: u64,
}

/// Executes the CLI command represented by `cli`.
///
/// # Errors
/// Returns [`CliError`] when parsing, clustering, or output fails.
#[instrument(name = "cli.run", err, skip(cli), fields(command = %cli.command.name()))]
pub fn run_cli(cli: Cli) -> Result<ExecutionSummary, CliError> {
    match cli.command {
        Command::Cluster(cmd) => run_cluster(cmd),
    }
}

#[instrument(
    name = "cli.cluster",
    err,
    skip(cmd),
    fields(network = %cmd.network.display(), gamma = cmd.gamma)
)]
fn run_cluster(cmd: ClusterCommand) -> Result<ExecutionSummary, CliError> {
    log_profile();

    let mut graph = load_graph(&cmd)?;
    let opts = cluster_options(&cmd, graph.reduced())?;
    let hier = cluster(&mut graph, &opts)?;
    let outputs = assemble_outputs(&cmd);
    strata_core::write_outputs(&hier, &outputs)?;

    let summary = ExecutionSummary {
        network: cmd.network.clone(),
        modularity: hier.score().modularity,
        clusters: hier.score().clusters,
        levels: hier.levels().len(),
        roots: hier.root().len(),
        nodes: hier.nodes().len(),
        links: hier.score().nodes_links,
    };
    info!(
        modularity = summary.modularity,
        clusters = summary.clusters,
        levels = summary.levels,
        roots = summary.roots,
        "clustering completed"
    );
    Ok(summary)
}

fn log_profile() {
    let profile = build_profile();
    debug!(
        membership = %profile.membership,
        mcands_prefilter = profile.mcands_prefilter,
        dynamic_gamma = profile.dynamic_gamma,
        "library build profile"
    );
    if profile.membership != Membership::Fuzzy {
        warn!("the library was built with crisp membership; shares will be uniform");
    }
}

fn load_graph(cmd: &ClusterCommand) -> Result<Graph, CliError> {
    let format = match cmd.format {
        Some(FormatArg::Rcg) => FileFormat::Rcg,
        Some(FormatArg::Nse) => FileFormat::Nse,
        Some(FormatArg::Nsa) => FileFormat::Nsa,
        None => FileFormat::from_path(&cmd.network).unwrap_or_else(|| {
            warn!(
                network = %cmd.network.display(),
                "input format not recognised from the extension; assuming rcg"
            );
            FileFormat::Rcg
        }),
    };
    let popts = ParseOptions {
        shuffle: cmd.shuffle,
        sum_duplicates: cmd.sum_dups,
        reduction: if cmd.reduce_input {
            cmd.reduction.into()
        } else {
            ReductionPolicy::None
        },
    };
    let graph = match format {
        FileFormat::Rcg => RcgParser::new(&cmd.network, popts).build()?,
        FileFormat::Nse => NslParser::new(&cmd.network, false, popts).build()?,
        FileFormat::Nsa => NslParser::new(&cmd.network, true, popts).build()?,
    };
    Ok(graph)
}

fn cluster_options(cmd: &ClusterCommand, input_reduced: bool) -> Result<ClusterOptions, CliError> {
    let validation = match cmd.validation {
        0 => Validation::None,
        1 => Validation::Standard,
        2 => Validation::Severe,
        got => return Err(CliError::InvalidValidation { got }),
    };
    let mut builder = ClusterOptions::builder()
        .with_gamma(cmd.gamma)
        .with_validation(validation)
        .with_ahash(!cmd.no_ahash)
        .with_modtrace(cmd.modtrace)
        .with_reduction(Reduction {
            policy: cmd.reduction.into(),
            weight_criteria: cmd.reduction_weight,
            skip_nodes: input_reduced,
        });
    if let Some(margin) = cmd.filter_margin {
        builder = builder.with_filter_margin(margin);
    }
    if let Some(margin) = cmd.gain_margin {
        builder = builder.with_gain_margin(margin, cmd.gain_margin_div);
    }
    if let Some(ratio) = cmd.gamma_ratio {
        builder = builder.with_sweep(GammaSweep {
            ratio,
            ratio_max: cmd.gamma_ratio_max,
            gamma_min: cmd.gamma_min,
            gamma_max: cmd.gamma.max(0.0),
        });
    }
    if cmd.root_max > 0 {
        let bound = RootBound {
            up: matches!(cmd.root_bound, BoundArg::Up | BoundArg::Both),
            down: matches!(cmd.root_bound, BoundArg::Down | BoundArg::Both),
            standalone: cmd.standalone,
            nonnegative: cmd.nonnegative,
        };
        builder = builder.with_root_bound(bound, cmd.root_max);
    }
    Ok(builder.build()?)
}

fn assemble_outputs(cmd: &ClusterCommand) -> Vec<OutputOptions> {
    let style: ClusterListStyle = cmd.style.into();
    let mk = |scheme, path: &PathBuf| OutputOptions {
        scheme,
        style,
        max_share: cmd.max_share,
        filter_members: cmd.filter_members,
        path: path.clone(),
    };

    let mut outputs = Vec::new();
    if let Some(path) = &cmd.root_out {
        outputs.push(mk(OutputScheme::Root, path));
    }
    if let Some(path) = &cmd.levels_out {
        let custom = custom_levels(cmd);
        let scheme = match custom {
            Some(custom) => OutputScheme::CustomLevels(custom),
            None => OutputScheme::PerLevel,
        };
        outputs.push(mk(scheme, path));
    }
    if let Some(path) = &cmd.all_out {
        outputs.push(mk(OutputScheme::AllClusters, path));
    }
    if let Some(path) = &cmd.signif_out {
        outputs.push(mk(OutputScheme::Significant(signif_options(cmd)), path));
    }
    if let Some(path) = &cmd.hier_out {
        outputs.push(mk(OutputScheme::Hierarchy, path));
    }
    if outputs.is_empty() {
        let path = default_output_path(&cmd.network);
        debug!(path = %path.display(), "no output requested; writing the root clustering");
        outputs.push(mk(OutputScheme::Root, &path));
    }
    outputs
}

fn custom_levels(cmd: &ClusterCommand) -> Option<CustomLevels> {
    if cmd.lev_min.is_none()
        && cmd.lev_max.is_none()
        && cmd.lev_rstep.is_none()
        && cmd.lev_approx.is_none()
    {
        return None;
    }
    Some(CustomLevels {
        margin: cmd.lev_margin.into(),
        margmin: cmd.lev_min.unwrap_or(0),
        margmax: cmd.lev_max.unwrap_or(u32::MAX),
        clsrstep: cmd.lev_rstep.unwrap_or(0.0),
        approx: cmd.lev_approx,
    })
}

fn signif_options(cmd: &ClusterCommand) -> SignifOptions {
    SignifOptions {
        match_all_owners: cmd.signif_all_owners,
        hier_owners: cmd.signif_hier,
        single_owner_only: cmd.signif_single_owner,
        densdrop: cmd.densdrop,
        densbound: cmd.densbound,
        wrstep: cmd.wrstep,
        wrange: cmd.wrange,
        szmin: cmd.szmin.unwrap_or(SizeBound::Abs(0)),
    }
}

/// `network.nse` becomes `network_r.cnl` beside the input.
fn default_output_path(network: &Path) -> PathBuf {
    let stem = network
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clusters".to_owned());
    network.with_file_name(format!("{stem}_r.cnl"))
}

/// Parses the `--szmin` grammar.
fn parse_size_bound(raw: &str) -> Result<SizeBound, String> {
    match raw {
        "l2" => Ok(SizeBound::Log2),
        "le" => Ok(SizeBound::LogE),
        "pg" => Ok(SizeBound::PowGoldInv),
        _ => {
            if let Some(base) = raw.strip_prefix('r') {
                let base: u8 = base
                    .parse()
                    .map_err(|_| format!("invalid root base `{base}`"))?;
                if !(2..=8).contains(&base) {
                    return Err(format!("root base {base} must lie in 2..=8"));
                }
                return Ok(SizeBound::Root(base));
            }
            raw.parse()
                .map(SizeBound::Abs)
                .map_err(|_| format!("invalid size bound `{raw}`"))
        }
    }
}

/// Renders `summary` to `writer` in a human-readable text format.
///
/// # Errors
/// Returns [`io::Error`] if writing to the supplied writer fails.
pub fn render_summary(summary: &ExecutionSummary, mut writer: impl Write) -> io::Result<()> {
    writeln!(writer, "network: {}", summary.network.display())?;
    writeln!(
        writer,
        "Q: {:.6}, clusters: {}, levels: {}, roots: {}",
        summary.modularity, summary.clusters, summary.levels, summary.roots
    )?;
    writeln!(
        writer,
        "nodes: {}, links (directed): {}",
        summary.nodes, summary.links
    )
}
