//! Clustering options and their builder.
//!
//! The option surface mirrors the driver flags: resolution (fixed, dynamic,
//! or swept), per-level link reduction, root-level bounding, the minimum
//! per-step gain margin, link validation severity, and the candidate-hash
//! toggle. [`ClusterOptionsBuilder::build`] validates the combination before
//! the engine ever sees it.

use crate::error::{Result, StrataError};
use crate::profile::build_profile;

/// Link reduction severity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReductionPolicy {
    /// Keep every link.
    #[default]
    None,
    /// Accurate reduction: the heavy margin is the head weight alone; suited
    /// to heavy-tailed weight distributions.
    Accurate,
    /// Mean reduction: a compromise between severity and accuracy.
    Mean,
    /// Severe reduction: maximal pruning with a minor accuracy drop.
    Severe,
}

/// Link reduction configuration for the clustering iterations.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Reduction {
    /// Severity of the pruning.
    pub policy: ReductionPolicy,
    /// Rank links by raw weight instead of the optimisation function.
    pub weight_criteria: bool,
    /// The input graph was already reduced; skip node-level pruning.
    pub skip_nodes: bool,
}

impl Reduction {
    /// Whether any pruning is requested.
    #[must_use]
    pub fn active(&self) -> bool {
        self.policy != ReductionPolicy::None
    }
}

/// Minimal number of links to retain for a node under reduction.
///
/// Grows with the logarithm of the declared node count so small graphs are
/// never reduced and large ones keep a usable neighborhood.
#[must_use]
pub fn reduced_links_margin(nodes: u32, policy: ReductionPolicy) -> u32 {
    if nodes == 0 || policy == ReductionPolicy::None {
        return 0;
    }
    let base = (f64::from(nodes)).log2().ceil().max(1.0) as u32;
    match policy {
        ReductionPolicy::None => 0,
        ReductionPolicy::Accurate => base.saturating_mul(2),
        ReductionPolicy::Mean => base,
        ReductionPolicy::Severe => (base / 2).max(3),
    }
}

/// Root-level bounding policy; active only when `root_max` is set.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RootBound {
    /// Keep merging past gain exhaustion until the root set fits the bound.
    pub up: bool,
    /// Terminate early once the root set shrinks to the bound.
    pub down: bool,
    /// Permit fusing disconnected clusters while shrinking up.
    pub standalone: bool,
    /// While shrinking up, admit only merges with non-negative gain.
    pub nonnegative: bool,
}

impl RootBound {
    /// Bound in both directions, the default when only `root_max` is given.
    #[must_use]
    pub fn both() -> Self {
        Self {
            up: true,
            down: true,
            ..Self::default()
        }
    }
}

/// Link consistency validation severity, applied before clustering.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Validation {
    /// Skip validation; only for verified input.
    None,
    /// Backfill missing directed complements and accumulate totals.
    #[default]
    Standard,
    /// Standard plus strict ordering verification of every adjacency list.
    Severe,
}

/// Multi-resolution sweep of the gamma parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GammaSweep {
    /// Base step ratio between consecutive gamma values, in (0, 1).
    pub ratio: f64,
    /// Upper ratio the step adapts towards near gamma = 1, in [ratio, 1).
    pub ratio_max: f64,
    /// Lower end of the sweep.
    pub gamma_min: f64,
    /// Upper end of the sweep (the starting, finest resolution).
    pub gamma_max: f64,
}

impl GammaSweep {
    /// Default adaptation ceiling for the step ratio.
    pub const RATIO_MAX_DEFAULT: f64 = 0.96;

    /// The step ratio to apply at `gamma`: finer (closer to 1) near
    /// gamma = 1, coarser towards the range ends.
    #[must_use]
    pub fn step_at(&self, gamma: f64) -> f64 {
        let dist = (gamma.max(f64::MIN_POSITIVE).ln()).abs().min(1.0);
        self.ratio_max - (self.ratio_max - self.ratio) * dist
    }
}

/// Options controlling a single clustering run.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterOptions {
    pub(crate) gamma: f64,
    pub(crate) sweep: Option<GammaSweep>,
    pub(crate) filter_margin: f64,
    pub(crate) reduction: Reduction,
    pub(crate) root_bound: RootBound,
    pub(crate) root_max: u32,
    pub(crate) gain_marg: Option<f64>,
    pub(crate) gain_marg_div: bool,
    pub(crate) validation: Validation,
    pub(crate) use_ahash: bool,
    pub(crate) modtrace: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            sweep: None,
            filter_margin: 0.0,
            reduction: Reduction::default(),
            root_bound: RootBound::default(),
            root_max: 0,
            gain_marg: None,
            gain_marg_div: false,
            validation: Validation::default(),
            use_ahash: true,
            modtrace: false,
        }
    }
}

impl ClusterOptions {
    /// Creates a builder populated with the defaults.
    #[must_use]
    pub fn builder() -> ClusterOptionsBuilder {
        ClusterOptionsBuilder::default()
    }

    /// The resolution parameter of this run.
    #[must_use]
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// The configured root-level bound, 0 when unbounded.
    #[must_use]
    pub fn root_max(&self) -> u32 {
        self.root_max
    }

    /// Whether the dynamic (per-level) gamma mode was requested.
    #[must_use]
    pub fn dynamic_gamma(&self) -> bool {
        self.gamma < 0.0
    }
}

/// Configures and validates [`ClusterOptions`].
#[derive(Clone, Debug, Default)]
pub struct ClusterOptionsBuilder {
    opts: ClusterOptions,
}

impl ClusterOptionsBuilder {
    /// Creates a builder populated with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resolution parameter gamma. Values in (0, 1) coarsen the
    /// root clustering, values above 1 refine it; a negative value requests
    /// per-level dynamic resolution.
    #[must_use]
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.opts.gamma = gamma;
        self
    }

    /// Enables a multi-resolution gamma sweep.
    #[must_use]
    pub fn with_sweep(mut self, sweep: GammaSweep) -> Self {
        self.opts.sweep = Some(sweep);
        self
    }

    /// Sets the prefilter margin: the fraction of items that must hold a
    /// positive-gain candidate for the prefilter to apply. A level below the
    /// margin admits maximal-gain candidates of any sign, so merging
    /// continues past gain exhaustion; 0 (the default) keeps the prefilter
    /// permanently on.
    #[must_use]
    pub fn with_filter_margin(mut self, margin: f64) -> Self {
        self.opts.filter_margin = margin;
        self
    }

    /// Sets the per-level link reduction policy.
    #[must_use]
    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.opts.reduction = reduction;
        self
    }

    /// Bounds the root level to at most `root_max` clusters under the given
    /// policy. A `root_max` of 0 deactivates the bound.
    #[must_use]
    pub fn with_root_bound(mut self, bound: RootBound, root_max: u32) -> Self {
        self.opts.root_bound = bound;
        self.opts.root_max = root_max;
        self
    }

    /// Requires at least `margin` aggregate modularity gain per level;
    /// `divide` normalises the margin by √(link count).
    #[must_use]
    pub fn with_gain_margin(mut self, margin: f64, divide: bool) -> Self {
        self.opts.gain_marg = Some(margin);
        self.opts.gain_marg_div = divide;
        self
    }

    /// Sets the pre-clustering link validation severity.
    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.opts.validation = validation;
        self
    }

    /// Toggles the Agordi candidate-set hash acceleration.
    #[must_use]
    pub fn with_ahash(mut self, enabled: bool) -> Self {
        self.opts.use_ahash = enabled;
        self
    }

    /// Emits the optimisation value for every clustering iteration.
    #[must_use]
    pub fn with_modtrace(mut self, enabled: bool) -> Self {
        self.opts.modtrace = enabled;
        self
    }

    /// Validates the combination and produces the options.
    ///
    /// # Errors
    /// Returns [`StrataError::Config`] when a value is out of range, when a
    /// negative gamma is requested without the dynamic-gamma profile, or when
    /// the root-bound flags are inconsistent.
    pub fn build(mut self) -> Result<ClusterOptions> {
        let o = &mut self.opts;
        if o.gamma < 0.0 && !build_profile().dynamic_gamma {
            return Err(StrataError::config(
                "negative gamma requires the dynamic-gamma build profile",
            ));
        }
        if !(0.0..=1.0).contains(&o.filter_margin) {
            return Err(StrataError::config(format!(
                "filter_margin {} is outside [0, 1]",
                o.filter_margin
            )));
        }
        if o.filter_margin > 0.0 && !build_profile().mcands_prefilter {
            return Err(StrataError::config(
                "a filter margin requires the candidate-prefilter build profile",
            ));
        }
        if let Some(marg) = o.gain_marg {
            if !(-0.5..=1.0).contains(&marg) {
                return Err(StrataError::config(format!(
                    "gain margin {marg} is outside [-0.5, 1]"
                )));
            }
        }
        if let Some(sweep) = &o.sweep {
            if !(0.0 < sweep.ratio && sweep.ratio < 1.0) {
                return Err(StrataError::config("gamma step ratio must lie in (0, 1)"));
            }
            if !(sweep.ratio <= sweep.ratio_max && sweep.ratio_max < 1.0) {
                return Err(StrataError::config(
                    "gamma step ratio ceiling must lie in [ratio, 1)",
                ));
            }
            if sweep.gamma_min < 0.0 || sweep.gamma_min > sweep.gamma_max {
                return Err(StrataError::config(
                    "gamma sweep range must satisfy 0 <= gamma_min <= gamma_max",
                ));
            }
        }
        if o.root_bound.nonnegative && !o.root_bound.up {
            return Err(StrataError::config(
                "the non-negative root bound requires the up bound",
            ));
        }
        if o.root_max > 0 && !(o.root_bound.up || o.root_bound.down) {
            o.root_bound = RootBound {
                standalone: o.root_bound.standalone,
                nonnegative: o.root_bound.nonnegative,
                ..RootBound::both()
            };
        }
        // The gain margin applies only when the root size is unconstrained.
        if o.root_max > 0 {
            o.gain_marg = None;
        }
        Ok(self.opts)
    }
}
