//! Text decoders for the supported graph and clustering formats.
//!
//! All formats are line oriented ASCII with `#` line comments. Parse
//! failures carry the file and 1-based line number.

mod cnl;
mod nsl;
mod rcg;

pub use cnl::{parse_cnl, CnlCluster, CnlClusters};
pub use nsl::NslParser;
pub use rcg::RcgParser;

use std::path::Path;

use strata_core::{ReductionPolicy, StrataError};

/// Supported input graph formats.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileFormat {
    /// Readable Compact Graph: `/edges` and `/arcs` sections.
    Rcg,
    /// Network Specified by Edges: one undirected link per line.
    Nse,
    /// Network Specified by Arcs: one directed link per line.
    Nsa,
}

impl FileFormat {
    /// Infers the format from the file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "rcg" | "hig" => Some(Self::Rcg),
            "nse" | "nsl" | "ncol" | "ll" => Some(Self::Nse),
            "nsa" => Some(Self::Nsa),
            _ => None,
        }
    }
}

/// Ingestion knobs shared by the graph parsers.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParseOptions {
    /// Shuffle node creation order with this seed.
    pub shuffle: Option<u64>,
    /// Accumulate duplicated weighted links instead of skipping them.
    pub sum_duplicates: bool,
    /// Reduce insignificant links already at ingestion (directed weighted
    /// batches only).
    pub reduction: ReductionPolicy,
}

pub(crate) fn format_error(
    path: &Path,
    line: u64,
    reason: impl Into<String>,
) -> StrataError {
    StrataError::InputFormat {
        path: path.to_path_buf(),
        line,
        reason: reason.into(),
    }
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> StrataError {
    StrataError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Splits an `id[:weight]` token.
pub(crate) fn parse_member(
    token: &str,
    path: &Path,
    line: u64,
) -> Result<(u32, Option<f32>), StrataError> {
    let (id_str, weight) = match token.split_once(':') {
        Some((id, w)) => {
            let weight: f32 = w.parse().map_err(|_| {
                format_error(path, line, format!("invalid weight `{w}`"))
            })?;
            if weight < 0.0 || !weight.is_finite() {
                return Err(format_error(
                    path,
                    line,
                    format!("weight {weight} must be a non-negative float"),
                ));
            }
            (id, Some(weight))
        }
        None => (token, None),
    };
    let id: u32 = id_str
        .parse()
        .map_err(|_| format_error(path, line, format!("invalid node id `{id_str}`")))?;
    if id == strata_core::ID_NONE {
        return Err(format_error(path, line, "the id u32::MAX is reserved"));
    }
    Ok((id, weight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_follow_extensions() {
        assert_eq!(FileFormat::from_path(Path::new("net.rcg")), Some(FileFormat::Rcg));
        assert_eq!(FileFormat::from_path(Path::new("net.hig")), Some(FileFormat::Rcg));
        assert_eq!(FileFormat::from_path(Path::new("net.NSE")), Some(FileFormat::Nse));
        assert_eq!(FileFormat::from_path(Path::new("net.nsa")), Some(FileFormat::Nsa));
        assert_eq!(FileFormat::from_path(Path::new("net.txt")), None);
        assert_eq!(FileFormat::from_path(Path::new("net")), None);
    }

    #[test]
    fn member_tokens_parse_ids_and_weights() {
        let p = Path::new("x");
        assert_eq!(parse_member("7", p, 1).expect("plain id"), (7, None));
        assert_eq!(
            parse_member("7:0.5", p, 1).expect("weighted"),
            (7, Some(0.5))
        );
        assert_eq!(parse_member("7:0", p, 1).expect("zero weight"), (7, Some(0.0)));
        assert!(parse_member("x", p, 1).is_err());
        assert!(parse_member("7:-1", p, 1).is_err());
    }
}
