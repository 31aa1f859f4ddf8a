//! Cluster Nodes List parser: reads clusterings produced by the engine (or
//! compatible tools) back into memory.
//!
//! Lines are `[<cluster_id>> ] <node_id>[:<share>] ...`; the cluster id is
//! either present on every line or on none. The optional header is
//! advisory and only validated for gross mismatch.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use tracing::warn;

use strata_core::Result;

use super::{format_error, io_error};

/// One parsed cluster: optional id and members with shares (1 when omitted).
#[derive(Clone, Debug, PartialEq)]
pub struct CnlCluster {
    /// Cluster id when the file is numbered.
    pub id: Option<u32>,
    /// `(node id, share)` pairs in file order.
    pub members: Vec<(u32, f64)>,
}

/// A parsed CNL file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CnlClusters {
    /// Clusters in file order.
    pub clusters: Vec<CnlCluster>,
    /// Whether the file carried cluster ids.
    pub numbered: bool,
}

impl CnlClusters {
    /// Total membership of each node across all clusters.
    #[must_use]
    pub fn memberships(&self) -> std::collections::BTreeMap<u32, f64> {
        let mut out = std::collections::BTreeMap::new();
        for cluster in &self.clusters {
            for &(node, share) in &cluster.members {
                *out.entry(node).or_insert(0.0) += share;
            }
        }
        out
    }
}

/// Parses a `.cnl` file.
///
/// # Errors
/// Returns input-format errors with file and line context, and I/O errors
/// verbatim.
pub fn parse_cnl(path: impl Into<PathBuf>) -> Result<CnlClusters> {
    let path = path.into();
    let file = File::open(&path).map_err(|e| io_error(&path, e))?;
    let reader = BufReader::new(file);

    let mut out = CnlClusters::default();
    let mut declared: Option<u64> = None;
    let mut numbered_seen: Option<bool> = None;

    for (lineno, line) in reader.lines().enumerate() {
        let lineno = lineno as u64 + 1;
        let line = line.map_err(|e| io_error(&path, e))?;
        let body = line.trim();
        if body.is_empty() {
            continue;
        }
        if let Some(comment) = body.strip_prefix('#') {
            if declared.is_none() {
                declared = header_clusters(comment);
            }
            continue;
        }

        let (id, members_str) = split_cluster_id(body);
        match numbered_seen {
            None => numbered_seen = Some(id.is_some()),
            Some(numbered) if numbered != id.is_some() => {
                return Err(format_error(
                    &path,
                    lineno,
                    "cluster ids must appear on every line or on none",
                ));
            }
            Some(_) => {}
        }
        let id = match id {
            Some(raw) => Some(raw.parse().map_err(|_| {
                format_error(&path, lineno, format!("invalid cluster id `{raw}`"))
            })?),
            None => None,
        };

        let mut members = Vec::new();
        for token in members_str.split_whitespace() {
            let (node, share) = match token.split_once(':') {
                Some((n, s)) => {
                    let share: f64 = s.parse().map_err(|_| {
                        format_error(&path, lineno, format!("invalid share `{s}`"))
                    })?;
                    if !(share > 0.0 && share <= 1.0) {
                        return Err(format_error(
                            &path,
                            lineno,
                            format!("share {share} must lie in (0, 1]"),
                        ));
                    }
                    (n, share)
                }
                None => (token, 1.0),
            };
            let node: u32 = node.parse().map_err(|_| {
                format_error(&path, lineno, format!("invalid node id `{node}`"))
            })?;
            members.push((node, share));
        }
        if members.is_empty() {
            return Err(format_error(&path, lineno, "empty cluster line"));
        }
        out.clusters.push(CnlCluster { id, members });
    }

    out.numbered = numbered_seen.unwrap_or(false);
    if let Some(declared) = declared {
        if declared != out.clusters.len() as u64 {
            warn!(
                declared,
                parsed = out.clusters.len(),
                "cluster count in the header does not match the payload"
            );
        }
    }
    Ok(out)
}

/// Pulls the declared cluster count out of a header comment.
fn header_clusters(comment: &str) -> Option<u64> {
    let rest = comment.trim_start();
    let rest = rest.strip_prefix("Clusters:")?;
    let value: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    value.parse().ok()
}

/// Splits an optional `<id>> ` prefix from a cluster line. The share
/// separator uses `:`, so a bare `>` ends the id unambiguously.
fn split_cluster_id(body: &str) -> (Option<&str>, &str) {
    match body.split_once('>') {
        Some((id, rest)) if id.chars().all(|c| c.is_ascii_digit()) && !id.is_empty() => {
            (Some(id), rest)
        }
        _ => (None, body),
    }
}
