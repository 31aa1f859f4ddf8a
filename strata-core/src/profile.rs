//! Build profile: the clustering strategy this library was compiled with.
//!
//! The membership model and several heuristics are fixed at build time; a
//! driver linked against a library built with a different strategy would
//! silently produce incomparable results. The profile makes the strategy an
//! inspectable value the driver compares at startup.

use std::fmt;

/// How a descendant's membership is shared among multiple owners.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Membership {
    /// Equal shares: `1 / owners`.
    Crisp,
    /// Shares proportional to per-owner activation counts.
    Fuzzy,
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Crisp => "crisp",
            Self::Fuzzy => "fuzzy",
        })
    }
}

/// Feature set of the clustering strategy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BuildProfile {
    /// Membership sharing model for overlapping descendants.
    pub membership: Membership,
    /// Whether linkless lineages keep materialising propagation wrappers
    /// instead of freezing as roots below the top level.
    pub chains_extra: bool,
    /// Whether the positive-gain candidate prefilter (and its margin
    /// option) is available.
    pub mcands_prefilter: bool,
    /// Whether negative gamma requests per-level dynamic resolution.
    pub dynamic_gamma: bool,
}

/// The profile this library was built with.
pub const BUILD_PROFILE: BuildProfile = BuildProfile {
    membership: Membership::Fuzzy,
    chains_extra: false,
    mcands_prefilter: true,
    dynamic_gamma: true,
};

/// Returns the library's [`BuildProfile`].
#[must_use]
pub fn build_profile() -> &'static BuildProfile {
    &BUILD_PROFILE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_is_self_consistent() {
        let p = build_profile();
        assert_eq!(p, &BUILD_PROFILE);
        assert_eq!(p.membership.to_string(), "fuzzy");
    }
}
